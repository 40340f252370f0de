//! Persistent "already seen" stamp cache.
//!
//! One JSON file per user mapping bug numbers to the last modification time
//! observed for them. The format is detected once per load from the leading
//! byte of the file: current caches are JSON objects, and the pre-0.2 binary
//! table is still readable for migration but never written back.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

/// Stamp cache filename inside the cache directory.
pub const STAMP_FILE: &str = "freshbugs.stamp";

/// Temporary sibling used for atomic replacement.
const STAMP_TMP_FILE: &str = "freshbugs.stamp.tmp";

/// Wire format for timestamps: second precision, no timezone.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Leading marker byte of the legacy binary cache.
const LEGACY_MARKER: u8 = 0x01;

/// Bug number -> last observed modification time.
pub type StampMap = BTreeMap<u32, NaiveDateTime>;

/// Errors from loading or persisting the stamp cache. Parse failures are
/// fatal rather than degraded to an empty map, so corruption never silently
/// re-notifies every bug.
#[derive(Debug, thiserror::Error)]
pub enum StampError {
    #[error("failed to read stamp file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write stamp file {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stamp file {} is neither JSON nor a known legacy format", .path.display())]
    UnknownFormat { path: PathBuf },
    #[error("malformed stamp file {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("failed to encode stamp map")]
    Encode(#[source] serde_json::Error),
}

/// On-disk representations, resolved once per load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StampFormat {
    /// Current format: JSON object of stringified bug numbers to timestamps.
    JsonV1,
    /// Pre-0.2 binary table, read for migration only.
    LegacyV0,
}

/// Sniff the format from the first non-whitespace byte.
fn detect_format(content: &[u8]) -> Option<StampFormat> {
    let first = content.iter().copied().find(|b| !b" \t\r\n".contains(b))?;
    match first {
        b'{' => Some(StampFormat::JsonV1),
        LEGACY_MARKER => Some(StampFormat::LegacyV0),
        _ => None,
    }
}

/// Load the stamp map from `dir`. A missing file is an empty map; any other
/// read failure, and any content that parses as neither format, is fatal.
pub fn load(dir: &Path) -> Result<StampMap, StampError> {
    let path = dir.join(STAMP_FILE);

    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StampMap::new()),
        Err(source) => return Err(StampError::Read { path, source }),
    };

    match detect_format(&content) {
        Some(StampFormat::JsonV1) => parse_json(&path, &content),
        Some(StampFormat::LegacyV0) => parse_legacy(&path, &content),
        None => Err(StampError::UnknownFormat { path }),
    }
}

fn parse_json(path: &Path, content: &[u8]) -> Result<StampMap, StampError> {
    let raw: BTreeMap<String, String> =
        serde_json::from_slice(content).map_err(|e| StampError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut map = StampMap::new();
    for (key, value) in raw {
        let number: u32 = key.parse().map_err(|_| StampError::Malformed {
            path: path.to_path_buf(),
            reason: format!("bug number key {key:?} is not an integer"),
        })?;
        let when =
            NaiveDateTime::parse_from_str(&value, TIME_FORMAT).map_err(|e| StampError::Malformed {
                path: path.to_path_buf(),
                reason: format!("timestamp {value:?} for bug {number}: {e}"),
            })?;
        map.insert(number, when);
    }
    Ok(map)
}

/// Legacy layout: marker byte, u32 LE entry count, then per entry a u32 LE
/// bug number and an i64 LE unix timestamp in seconds.
fn parse_legacy(path: &Path, content: &[u8]) -> Result<StampMap, StampError> {
    let malformed = |reason: String| StampError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    if content.len() < 5 {
        return Err(malformed("truncated legacy header".into()));
    }
    let count = u32::from_le_bytes(content[1..5].try_into().unwrap()) as usize;
    let body = &content[5..];
    if body.len() != count * 12 {
        return Err(malformed(format!(
            "legacy table claims {count} entries but carries {} bytes",
            body.len()
        )));
    }

    let mut map = StampMap::new();
    for entry in body.chunks_exact(12) {
        let number = u32::from_le_bytes(entry[0..4].try_into().unwrap());
        let secs = i64::from_le_bytes(entry[4..12].try_into().unwrap());
        let when = chrono::DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| malformed(format!("timestamp {secs} for bug {number} out of range")))?
            .naive_utc();
        map.insert(number, when);
    }
    Ok(map)
}

/// How a freshly built map is combined with the previous one before saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Union of old and new; new entries always win on collision.
    Merge,
    /// Keep only the freshly fetched bugs, pruning everything else.
    Clean,
}

/// Combine the previous map with the freshly built one.
///
/// Under `Merge` a bug present in `new` always overwrites its old stamp,
/// even when the fetched timestamp is not newer, while a bug absent from
/// `new` keeps its old entry. The asymmetry is the documented policy; do
/// not replace it with a keep-max merge.
pub fn resolve(old: StampMap, new: StampMap, policy: SavePolicy) -> StampMap {
    match policy {
        SavePolicy::Clean => new,
        SavePolicy::Merge => {
            let mut merged = old;
            merged.extend(new);
            merged
        }
    }
}

/// Serialize `map` as JSON and atomically replace the stamp file.
///
/// The map is written with stringified bug numbers as keys (sorted, so the
/// output is deterministic and diffable) and then renamed over the real
/// filename, so a crash or a lock-ignoring reader sees either the old
/// complete file or the new one, never a partial write.
pub fn save(dir: &Path, map: &StampMap) -> Result<(), StampError> {
    let path = dir.join(STAMP_FILE);
    let tmp_path = dir.join(STAMP_TMP_FILE);

    let wire: BTreeMap<String, String> = map
        .iter()
        .map(|(number, when)| (number.to_string(), when.format(TIME_FORMAT).to_string()))
        .collect();
    let mut json = serde_json::to_string_pretty(&wire).map_err(StampError::Encode)?;
    json.push('\n');

    fs::write(&tmp_path, json).map_err(|source| StampError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, &path).map_err(|source| StampError::Write { path, source })?;
    Ok(())
}
