//! Decides which fetched bugs are worth reporting and renders them.
//!
//! Everything here is a pure function over already-fetched data; network and
//! filesystem I/O stay in the command layer, which keeps every decision
//! testable without a live BTS.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::bts::BugRecord;
use crate::stamp::{StampMap, TIME_FORMAT};

/// Permalink prefix for report `Location:` lines.
const BUG_URL: &str = "https://bugs.debian.org/";

/// Sentinel for bugs never seen before; anything real compares newer.
fn never_seen() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .expect("static date")
        .and_hms_opt(0, 0, 0)
        .expect("static time")
}

/// Outcome of a reconciliation pass: the rendered report and the stamp map
/// built from this fetch.
#[derive(Debug)]
pub struct Reconciliation {
    pub report: String,
    pub new_stamp: StampMap,
}

/// Split requests into direct bug numbers and identifiers that need role
/// resolution. Duplicate numbers collapse via set semantics.
pub fn split_requests(requests: &[String]) -> (BTreeSet<u32>, Vec<&str>) {
    let mut numbers = BTreeSet::new();
    let mut identifiers = Vec::new();
    for request in requests {
        if !request.is_empty() && request.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(number) = request.parse() {
                numbers.insert(number);
                continue;
            }
        }
        identifiers.push(request.as_str());
    }
    (numbers, identifiers)
}

/// Sort records most recently modified first. Governs print order only;
/// persistence is keyed by bug number.
pub fn sort_newest_first(records: &mut [BugRecord]) {
    records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}

/// Address part of an originator, unwrapping one `<...>` pair when present.
pub fn submitter_email(originator: &str) -> &str {
    let re = Regex::new(r"<([^<>]*)>").unwrap();
    match re.captures(originator).and_then(|c| c.get(1)) {
        Some(address) => address.as_str(),
        None => originator,
    }
}

/// True when the record is strictly newer than what the stamp holds for it.
pub fn is_unseen(record: &BugRecord, old_stamp: &StampMap) -> bool {
    let seen = old_stamp
        .get(&record.number)
        .copied()
        .unwrap_or_else(never_seen);
    record.last_modified > seen
}

/// Render one report block, separator line included. The `Submitter:` line
/// is omitted for self-filed bugs (originator address equals the operator's).
pub fn render_bug(record: &BugRecord, operator_email: Option<&str>) -> String {
    let mut block = String::new();
    block.push_str(&format!("Package: {}\n", record.package));
    if let Some(originator) = &record.originator {
        let address = submitter_email(originator);
        if operator_email != Some(address) {
            block.push_str(&format!("Submitter: {address}\n"));
        }
    }
    block.push_str(&format!("Subject: {}\n", record.subject));
    block.push_str(&format!(
        "Date: {}\n",
        record.last_modified.format(TIME_FORMAT)
    ));
    block.push_str(&format!("Location: {BUG_URL}{}\n", record.number));
    block.push('\n');
    block
}

/// Run the comparison pass over fetched records.
///
/// Every record lands in `new_stamp`, printed or not. A record is printed
/// when `show_all` is set or its modification time is strictly newer than
/// the stored stamp (absent entries compare against the 1900 sentinel, so
/// first sightings always print).
pub fn reconcile(
    records: &[BugRecord],
    old_stamp: &StampMap,
    show_all: bool,
    operator_email: Option<&str>,
) -> Reconciliation {
    let mut report = String::new();
    let mut new_stamp = StampMap::new();

    for record in records {
        new_stamp.insert(record.number, record.last_modified);
        if show_all || is_unseen(record, old_stamp) {
            report.push_str(&render_bug(record, operator_email));
        }
    }

    Reconciliation { report, new_stamp }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn record(number: u32, last_modified: NaiveDateTime) -> BugRecord {
        BugRecord {
            number,
            package: "dpkg".to_string(),
            subject: format!("bug {number}"),
            originator: Some("Jane Doe <jane@example.org>".to_string()),
            last_modified,
        }
    }

    #[test]
    fn split_requests_separates_numbers_from_identifiers() {
        let requests = vec![
            "123456".to_string(),
            "maint@example.org".to_string(),
            "123456".to_string(),
            "10".to_string(),
        ];
        let (numbers, identifiers) = split_requests(&requests);
        assert_eq!(numbers.iter().copied().collect::<Vec<_>>(), vec![10, 123456]);
        assert_eq!(identifiers, vec!["maint@example.org"]);
    }

    #[test]
    fn split_requests_mixed_digits_are_identifiers() {
        let requests = vec!["123abc".to_string(), "".to_string()];
        let (numbers, identifiers) = split_requests(&requests);
        assert!(numbers.is_empty());
        assert_eq!(identifiers, vec!["123abc", ""]);
    }

    #[test]
    fn sort_is_descending_by_modification_time() {
        let mut records = vec![
            record(1, ts(2023, 1, 1, 0, 0, 0)),
            record(2, ts(2024, 6, 1, 0, 0, 0)),
            record(3, ts(2024, 1, 1, 0, 0, 0)),
        ];
        sort_newest_first(&mut records);
        let order: Vec<u32> = records.iter().map(|r| r.number).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn submitter_email_unwraps_angle_brackets() {
        assert_eq!(
            submitter_email("Jane Doe <jane@example.org>"),
            "jane@example.org"
        );
        assert_eq!(submitter_email("jane@example.org"), "jane@example.org");
        assert_eq!(submitter_email("<>"), "");
    }

    #[test]
    fn unseen_requires_strictly_newer_timestamp() {
        let mut old = StampMap::new();
        old.insert(10, ts(2023, 1, 1, 0, 0, 0));

        // Strictly newer: printed.
        assert!(is_unseen(&record(10, ts(2023, 1, 1, 0, 0, 1)), &old));
        // Equal: suppressed.
        assert!(!is_unseen(&record(10, ts(2023, 1, 1, 0, 0, 0)), &old));
        // Older: suppressed.
        assert!(!is_unseen(&record(10, ts(2022, 1, 1, 0, 0, 0)), &old));
        // Never seen: printed.
        assert!(is_unseen(&record(11, ts(2023, 1, 1, 0, 0, 0)), &old));
    }

    #[test]
    fn render_block_has_the_expected_lines() {
        let block = render_bug(&record(123456, ts(2024, 1, 1, 0, 0, 0)), None);
        assert_eq!(
            block,
            "Package: dpkg\n\
             Submitter: jane@example.org\n\
             Subject: bug 123456\n\
             Date: 2024-01-01T00:00:00\n\
             Location: https://bugs.debian.org/123456\n\
             \n"
        );
    }

    #[test]
    fn self_filed_bugs_omit_the_submitter_line() {
        let block = render_bug(
            &record(1, ts(2024, 1, 1, 0, 0, 0)),
            Some("jane@example.org"),
        );
        assert!(!block.contains("Submitter:"));

        // A different operator still sees the line.
        let block = render_bug(
            &record(1, ts(2024, 1, 1, 0, 0, 0)),
            Some("someone@else.example"),
        );
        assert!(block.contains("Submitter: jane@example.org\n"));
    }

    #[test]
    fn bare_originator_compares_and_prints_raw() {
        let mut bug = record(1, ts(2024, 1, 1, 0, 0, 0));
        bug.originator = Some("jane@example.org".to_string());

        let block = render_bug(&bug, Some("jane@example.org"));
        assert!(!block.contains("Submitter:"));

        let block = render_bug(&bug, None);
        assert!(block.contains("Submitter: jane@example.org\n"));
    }

    #[test]
    fn missing_originator_never_renders_a_submitter_line() {
        let mut bug = record(1, ts(2024, 1, 1, 0, 0, 0));
        bug.originator = None;
        let block = render_bug(&bug, None);
        assert!(!block.contains("Submitter:"));
    }

    #[test]
    fn reconcile_stamps_every_fetch_but_prints_only_fresh_ones() {
        let mut old = StampMap::new();
        old.insert(10, ts(2023, 1, 1, 0, 0, 0));

        let records = vec![
            record(10, ts(2023, 1, 1, 0, 0, 0)), // unchanged, suppressed
            record(11, ts(2024, 1, 1, 0, 0, 0)), // new, printed
        ];
        let outcome = reconcile(&records, &old, false, None);

        assert!(!outcome.report.contains("Location: https://bugs.debian.org/10\n"));
        assert!(outcome.report.contains("Location: https://bugs.debian.org/11\n"));
        // Both land in the new stamp regardless.
        assert_eq!(outcome.new_stamp.len(), 2);
        assert_eq!(outcome.new_stamp.get(&10), Some(&ts(2023, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn show_all_prints_unchanged_bugs_too() {
        let mut old = StampMap::new();
        old.insert(10, ts(2023, 1, 1, 0, 0, 0));

        let records = vec![record(10, ts(2023, 1, 1, 0, 0, 0))];
        let outcome = reconcile(&records, &old, true, None);
        assert!(outcome.report.contains("Location: https://bugs.debian.org/10\n"));
    }

    #[test]
    fn first_sighting_of_a_bug_is_reported() {
        // Stamp file absent; bug 123456 fetched at 2024-01-01T00:00:00.
        let records = vec![record(123456, ts(2024, 1, 1, 0, 0, 0))];
        let outcome = reconcile(&records, &StampMap::new(), false, None);

        assert_eq!(outcome.report.matches("Package: ").count(), 1);
        assert_eq!(
            outcome.new_stamp.get(&123456),
            Some(&ts(2024, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn unchanged_bug_produces_no_output() {
        // Stamp holds bug 10 at the exact fetched time; nothing to report.
        let mut old = StampMap::new();
        old.insert(10, ts(2023, 1, 1, 0, 0, 0));

        let records = vec![record(10, ts(2023, 1, 1, 0, 0, 0))];
        let outcome = reconcile(&records, &old, false, None);
        assert!(outcome.report.is_empty());
    }

    #[test]
    fn empty_fetch_yields_empty_report_and_stamp() {
        let outcome = reconcile(&[], &StampMap::new(), false, None);
        assert!(outcome.report.is_empty());
        assert!(outcome.new_stamp.is_empty());
    }
}
