use std::env;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_STORAGE_KEY: &str = "job_id_mappings";
pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_DATA_DIR: &str = ".job-id-map";

pub const ENV_STORAGE_KEY: &str = "JOB_ID_MAP_STORAGE_KEY";
pub const ENV_CAPACITY: &str = "JOB_ID_MAP_CAPACITY";
pub const ENV_RETENTION_DAYS: &str = "JOB_ID_MAP_RETENTION_DAYS";
pub const ENV_DATA_DIR: &str = "JOB_ID_MAP_DATA_DIR";

const CAPACITY_RANGE: (usize, usize) = (1, 100_000);
const RETENTION_DAYS_RANGE: (i64, i64) = (1, 3650);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid JOB_ID_MAP_STORAGE_KEY: {0}")]
    InvalidStorageKey(String),
    #[error("invalid JOB_ID_MAP_CAPACITY: {0}")]
    InvalidCapacity(String),
    #[error("invalid JOB_ID_MAP_RETENTION_DAYS: {0}")]
    InvalidRetentionDays(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Slot that holds the whole serialized collection.
    pub storage_key: String,
    /// Most records kept; the oldest positions are dropped first.
    pub capacity: usize,
    /// Age after which `prune_expired` drops a record.
    pub retention_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            capacity: DEFAULT_CAPACITY,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let storage_key = parse_with_lookup(&lookup, ENV_STORAGE_KEY, defaults.storage_key, |raw| {
            if raw.chars().any(char::is_control) {
                return Err(ConfigError::InvalidStorageKey(
                    "must not contain control characters".to_string(),
                ));
            }
            Ok(raw)
        })?;

        let capacity = parse_with_lookup(&lookup, ENV_CAPACITY, defaults.capacity, |raw| {
            raw.parse::<usize>()
                .map_err(|error| ConfigError::InvalidCapacity(error.to_string()))
                .map(|value| value.clamp(CAPACITY_RANGE.0, CAPACITY_RANGE.1))
        })?;

        let retention_days = parse_with_lookup(
            &lookup,
            ENV_RETENTION_DAYS,
            defaults.retention_days,
            |raw| {
                raw.parse::<i64>()
                    .map_err(|error| ConfigError::InvalidRetentionDays(error.to_string()))
                    .map(|value| value.clamp(RETENTION_DAYS_RANGE.0, RETENTION_DAYS_RANGE.1))
            },
        )?;

        Ok(Self {
            storage_key,
            capacity,
            retention_days,
        })
    }

    #[must_use]
    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.retention_days = retention_days;
        self
    }
}

/// Directory backing the file storage, from `JOB_ID_MAP_DATA_DIR` or the default.
pub fn data_dir_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    non_empty(&lookup, ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match non_empty(lookup, key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = StoreConfig::from_lookup(lookup_from(&[])).expect("defaults parse");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.storage_key, "job_id_mappings");
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_STORAGE_KEY, "   "),
            (ENV_CAPACITY, ""),
        ]))
        .expect("blank values parse");
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn overrides_are_trimmed_and_clamped() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_STORAGE_KEY, " staging_job_ids "),
            (ENV_CAPACITY, "0"),
            (ENV_RETENTION_DAYS, "99999"),
        ]))
        .expect("overrides parse");
        assert_eq!(config.storage_key, "staging_job_ids");
        assert_eq!(config.capacity, 1);
        assert_eq!(config.retention_days, 3650);
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let error = StoreConfig::from_lookup(lookup_from(&[(ENV_CAPACITY, "lots")]))
            .expect_err("capacity must be numeric");
        assert!(matches!(error, ConfigError::InvalidCapacity(_)));

        let error = StoreConfig::from_lookup(lookup_from(&[(ENV_RETENTION_DAYS, "-x")]))
            .expect_err("retention must be numeric");
        assert!(matches!(error, ConfigError::InvalidRetentionDays(_)));
    }

    #[test]
    fn data_dir_defaults_to_local_directory() {
        assert_eq!(
            data_dir_from_lookup(lookup_from(&[])),
            PathBuf::from(".job-id-map")
        );
        assert_eq!(
            data_dir_from_lookup(lookup_from(&[(ENV_DATA_DIR, "/var/lib/jobs")])),
            PathBuf::from("/var/lib/jobs")
        );
    }
}
