//! Run configuration.
//!
//! Settings come from a key-value env file (`.env` by default). The file is
//! parsed with `dotenvy` into an explicit [`Config`]; the process environment
//! is never modified.
//!
//! | Key                  | Meaning                                  |
//! |----------------------|------------------------------------------|
//! | `DB_PATH`            | SQLite database file (required to connect) |
//! | `DB_BUSY_TIMEOUT_MS` | Busy timeout for the connection          |
//! | `SONG_DATA_DIR`      | Root of the song metadata files          |
//! | `LOG_DATA_DIR`       | Root of the user activity logs           |

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EtlError, Result};
use crate::load::LoadMode;

pub const DEFAULT_SONG_DATA: &str = "data/song_data";
pub const DEFAULT_LOG_DATA: &str = "data/log_data";

#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: Option<PathBuf>,
    /// Raw `DB_BUSY_TIMEOUT_MS`; parsed when connecting
    pub busy_timeout_ms: Option<String>,
    pub song_data: PathBuf,
    pub log_data: PathBuf,
    pub mode: LoadMode,
    /// Drop and recreate the five tables before loading
    pub reset_schema: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: None,
            song_data: PathBuf::from(DEFAULT_SONG_DATA),
            log_data: PathBuf::from(DEFAULT_LOG_DATA),
            mode: LoadMode::default(),
            reset_schema: false,
        }
    }
}

impl Config {
    /// Read settings from an env file. A missing file yields the defaults,
    /// which leaves `DB_PATH` unset and makes [`connect`] fail.
    pub fn from_env_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Env file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| EtlError::Config(format!("{}: {}", path.display(), e)))?;

        let mut pairs = Vec::new();
        for item in iter {
            let pair = item.map_err(|e| EtlError::Config(format!("{}: {}", path.display(), e)))?;
            pairs.push(pair);
        }
        Self::from_pairs(pairs)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let value: String = value.into();
            match key.as_ref() {
                "DB_PATH" => config.db_path = Some(PathBuf::from(value)),
                "DB_BUSY_TIMEOUT_MS" => config.busy_timeout_ms = Some(value),
                "SONG_DATA_DIR" => config.song_data = PathBuf::from(value),
                "LOG_DATA_DIR" => config.log_data = PathBuf::from(value),
                other => debug!("Ignoring unknown config key {}", other),
            }
        }
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Result<Option<Duration>> {
        self.busy_timeout_ms
            .as_deref()
            .map(|raw| {
                raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                    EtlError::Config(format!("DB_BUSY_TIMEOUT_MS is not a number: {:?}", raw))
                })
            })
            .transpose()
    }
}

/// Open the single connection used for the whole run. Settings that only
/// matter for the connection are validated here.
pub fn connect(config: &Config) -> Result<Connection> {
    let path = config
        .db_path
        .as_ref()
        .ok_or_else(|| EtlError::Config("DB_PATH is not set".to_string()))?;
    let busy_timeout = config.busy_timeout()?;

    let conn = Connection::open(path)?;
    if let Some(timeout) = busy_timeout {
        conn.busy_timeout(timeout)?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_from_pairs_overrides_defaults() {
        let config = Config::from_pairs([
            ("DB_PATH", "/tmp/sparkify.sqlite3"),
            ("SONG_DATA_DIR", "/data/songs"),
            ("DB_BUSY_TIMEOUT_MS", "250"),
            ("UNRELATED", "x"),
        ])
        .unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/sparkify.sqlite3")));
        assert_eq!(config.song_data, PathBuf::from("/data/songs"));
        assert_eq!(config.log_data, PathBuf::from(DEFAULT_LOG_DATA));
        assert_eq!(config.busy_timeout().unwrap(), Some(Duration::from_millis(250)));
        assert_eq!(config.mode, LoadMode::Bulk);
    }

    #[test]
    fn test_malformed_timeout_fails_on_connect() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("sparkify.sqlite3");
        let config = Config::from_pairs([
            ("DB_PATH", db_path.to_string_lossy().into_owned()),
            ("DB_BUSY_TIMEOUT_MS", "soon".to_string()),
        ])
        .unwrap();

        let result = connect(&config);
        assert!(matches!(result, Err(EtlError::Config(_))));
        assert!(!db_path.exists());
    }

    #[test]
    fn test_connect_without_db_path_fails() {
        let result = connect(&Config::default());
        assert!(matches!(result, Err(EtlError::Config(_))));
    }

    #[test]
    fn test_env_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        let db_path = dir.path().join("sparkify.sqlite3");
        let mut file = std::fs::File::create(&env_path).unwrap();
        writeln!(file, "# database settings").unwrap();
        writeln!(file, "DB_PATH={}", db_path.display()).unwrap();
        writeln!(file, "LOG_DATA_DIR=logs").unwrap();
        drop(file);

        let config = Config::from_env_file(&env_path).unwrap();
        assert_eq!(config.db_path.as_deref(), Some(db_path.as_path()));
        assert_eq!(config.log_data, PathBuf::from("logs"));

        let conn = connect(&config).unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_missing_env_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_env_file(&dir.path().join("absent.env")).unwrap();
        assert!(config.db_path.is_none());
        assert_eq!(config.song_data, PathBuf::from(DEFAULT_SONG_DATA));
    }
}
