use rollcall_core::{ARCFACE_DIMENSION, DEFAULT_MAX_DISTANCE};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite roster database.
    pub db_path: PathBuf,
    /// Largest squared L2 distance still counted as a match.
    pub max_distance: f32,
    /// Embedding length every enrolled and queried vector must have.
    pub dimension: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            max_distance: env_parse("ROLLCALL_MAX_DISTANCE", DEFAULT_MAX_DISTANCE),
            dimension: env_parse("ROLLCALL_DIMENSION", ARCFACE_DIMENSION),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
