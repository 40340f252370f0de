//! Startup configuration resolved once from the environment and passed down
//! as a parameter.

use std::env;
use std::path::PathBuf;

/// Environment variables consulted for the operator's email, in priority
/// order; the first non-empty value wins.
const EMAIL_VARS: [&str; 3] = ["FRESHBUGS_EMAIL", "EMAIL", "DEBEMAIL"];

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the stamp cache; also the lock target.
    pub stamp_dir: PathBuf,
    /// The operator's own address, used to suppress self-filed bug notices.
    pub operator_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let xdg = env::var("XDG_DATA_HOME").ok();
        Self {
            stamp_dir: stamp_dir(xdg.as_deref(), dirs::home_dir()),
            operator_email: operator_email(|var| env::var(var).ok()),
        }
    }
}

/// Cache directory: `$XDG_DATA_HOME/freshbugs`, or `~/.local/share/freshbugs`
/// when the override is unset or empty.
fn stamp_dir(xdg_data_home: Option<&str>, home: Option<PathBuf>) -> PathBuf {
    let base = match xdg_data_home {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => home
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local")
            .join("share"),
    };
    base.join("freshbugs")
}

fn operator_email<F>(get: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    EMAIL_VARS
        .iter()
        .filter_map(|var| get(var))
        .find(|value| !value.is_empty())
}
