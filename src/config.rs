//! Startup configuration: resolves where and how the embedded store opens.
//!
//! WAL journaling with `NORMAL` synchronous and a short `busy_timeout` so
//! a blocked writer fails fast instead of hanging.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Where the embedded SQLite store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// A file on disk at this path.
    File(PathBuf),
    /// An ephemeral in-process database; gone when the handle is dropped.
    InMemory,
}

/// Raw configuration values read from the environment.
///
/// Field names track the `PRAGMA_*`/`DB_PATH` environment keys this config
/// resolves; see `from_env` for precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use = "config does nothing unless you resolve it into a StorageTarget"]
pub struct StoreConfig {
    /// Filesystem path to the database file, if configured.
    pub db_path: Option<String>,
    /// Journaling mode applied at open (`PRAGMA journal_mode`).
    pub journal_mode: String,
    /// Durability level applied at open (`PRAGMA synchronous`).
    pub synchronous: String,
    /// Whether an in-memory store is permitted outside test mode.
    pub allow_in_memory: bool,
    /// Whether in-memory storage is refused outright, even if allowed.
    pub strict: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            allow_in_memory: false,
            strict: false,
        }
    }
}

impl StoreConfig {
    /// Loads configuration from an optional `.env` file and the process
    /// environment. A missing `.env` file is not an error.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Ok(path) = std::env::var("DB_PATH") {
            cfg.db_path = Some(path);
        }
        if let Ok(mode) = std::env::var("PRAGMA_JOURNAL_MODE") {
            cfg.journal_mode = mode;
        }
        if let Ok(sync) = std::env::var("PRAGMA_SYNCHRONOUS") {
            cfg.synchronous = sync;
        }
        if let Ok(flag) = std::env::var("ALLOW_IN_MEMORY") {
            cfg.allow_in_memory = parse_bool(&flag);
        }
        if let Ok(flag) = std::env::var("STRICT") {
            cfg.strict = parse_bool(&flag);
        }
        cfg
    }

    /// Resolves a concrete storage target from the loaded configuration.
    ///
    /// * No `DB_PATH`, not in test mode, `ALLOW_IN_MEMORY` not set → error
    ///   naming the missing key.
    /// * `STRICT` and the resolved target is in-memory → error.
    /// * Non-test and in-memory and allowed → caller should log a warning
    ///   (see [`StoreConfig::in_memory_warning`]).
    pub fn resolve(&self, test_mode: bool) -> GatewayResult<StorageTarget> {
        let target = match &self.db_path {
            Some(path) if !path.is_empty() => StorageTarget::File(PathBuf::from(path)),
            _ => {
                if !test_mode && !self.allow_in_memory {
                    return Err(GatewayError::Internal(
                        "DB_PATH is not set; set DB_PATH or ALLOW_IN_MEMORY=true".to_string(),
                    ));
                }
                StorageTarget::InMemory
            }
        };

        if self.strict && matches!(target, StorageTarget::InMemory) {
            return Err(GatewayError::Internal(
                "STRICT is set and the resolved storage target is in-memory".to_string(),
            ));
        }

        Ok(target)
    }

    /// True when `resolve` would return an in-memory target outside test
    /// mode, i.e. the caller should emit a one-line warning before opening
    /// the pool.
    pub fn in_memory_warning(&self, test_mode: bool, target: &StorageTarget) -> bool {
        !test_mode && matches!(target, StorageTarget::InMemory)
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_wal_and_normal_synchronous() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.journal_mode, "WAL");
        assert_eq!(cfg.synchronous, "NORMAL");
        assert!(!cfg.allow_in_memory);
        assert!(!cfg.strict);
    }

    #[test]
    fn missing_db_path_outside_test_mode_without_allow_fails() {
        let cfg = StoreConfig::default();
        let err = cfg.resolve(false).unwrap_err();
        assert_eq!(err.code(), "internal");
    }

    #[test]
    fn missing_db_path_in_test_mode_resolves_in_memory() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.resolve(true).unwrap(), StorageTarget::InMemory);
    }

    #[test]
    fn allow_in_memory_permits_non_test_in_memory() {
        let mut cfg = StoreConfig::default();
        cfg.allow_in_memory = true;
        assert_eq!(cfg.resolve(false).unwrap(), StorageTarget::InMemory);
        assert!(cfg.in_memory_warning(false, &StorageTarget::InMemory));
    }

    #[test]
    fn strict_refuses_in_memory_even_when_allowed() {
        let mut cfg = StoreConfig::default();
        cfg.allow_in_memory = true;
        cfg.strict = true;
        assert!(cfg.resolve(false).is_err());
        assert!(cfg.resolve(true).is_err());
    }

    #[test]
    fn explicit_db_path_wins_over_in_memory_settings() {
        let mut cfg = StoreConfig::default();
        cfg.db_path = Some("/tmp/syncgate-test.db".to_string());
        assert_eq!(
            cfg.resolve(false).unwrap(),
            StorageTarget::File(PathBuf::from("/tmp/syncgate-test.db"))
        );
    }

    #[test]
    fn parse_bool_accepts_common_truthy_spellings() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
