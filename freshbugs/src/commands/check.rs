//! The default (and only) command: query the BTS and report fresh bugs.
//!
//! Holds the cache directory lock for the whole load-decide-save span, so a
//! concurrent scheduler-driven run fails fast instead of racing the stamp
//! file. Network calls happen under the lock; that serializes slow runs,
//! which is acceptable for a personal low-frequency tool.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

use anyhow::Context;
use tracing::debug;

use crate::bts::{BtsError, BugRecord, DebbugsClient, Role};
use crate::config::Config;
use crate::dir_lock::CacheDirLock;
use crate::report;
use crate::stamp::{self, SavePolicy};

pub fn run(requests: &[String], dry_run: bool, clean: bool, all: bool) -> anyhow::Result<()> {
    let config = Config::from_env();

    fs::create_dir_all(&config.stamp_dir)
        .with_context(|| format!("failed to create {}", config.stamp_dir.display()))?;

    // Held until this function returns, on every path.
    let lock = CacheDirLock::acquire(&config.stamp_dir)?;
    debug!(dir = %lock.path().display(), "locked cache directory");

    let old_stamp = stamp::load(&config.stamp_dir)?;
    debug!(entries = old_stamp.len(), "loaded stamp cache");

    let (numbers, identifiers) = report::split_requests(requests);

    let rt = tokio::runtime::Runtime::new()?;
    let client = DebbugsClient::new();

    let numbers = rt
        .block_on(resolve_identifiers(&client, numbers, &identifiers))
        .context("failed to resolve bug requests against the BTS")?;
    debug!(resolved = numbers.len(), "resolved bug numbers");

    let mut records: Vec<BugRecord> = if numbers.is_empty() {
        Vec::new()
    } else {
        let wanted: Vec<u32> = numbers.iter().copied().collect();
        rt.block_on(client.get_status(&wanted))
            .context("failed to fetch bug records from the BTS")?
    };
    debug!(fetched = records.len(), "fetched bug records");

    report::sort_newest_first(&mut records);

    let outcome = report::reconcile(&records, &old_stamp, all, config.operator_email.as_deref());
    print!("{}", outcome.report);
    std::io::stdout().flush().context("failed to write report")?;

    persist(&config.stamp_dir, old_stamp, outcome.new_stamp, dry_run, clean)?;

    Ok(())
}

/// Write the reconciled stamp map back, honoring the persistence flags.
/// A dry run bypasses the store entirely.
fn persist(
    dir: &std::path::Path,
    old_stamp: stamp::StampMap,
    new_stamp: stamp::StampMap,
    dry_run: bool,
    clean: bool,
) -> Result<(), stamp::StampError> {
    if dry_run {
        debug!("dry run, stamp cache left untouched");
        return Ok(());
    }

    let policy = if clean {
        SavePolicy::Clean
    } else {
        SavePolicy::Merge
    };
    stamp::save(dir, &stamp::resolve(old_stamp, new_stamp, policy))
}

/// Union of matches across every role for every non-numeric request.
async fn resolve_identifiers(
    client: &DebbugsClient,
    mut numbers: BTreeSet<u32>,
    identifiers: &[&str],
) -> Result<BTreeSet<u32>, BtsError> {
    for identifier in identifiers {
        for role in Role::ALL {
            let matches = client.get_bugs(role, identifier).await?;
            debug!(identifier = %identifier, role = ?role, count = matches.len(), "resolved role");
            numbers.extend(matches);
        }
    }
    Ok(numbers)
}
