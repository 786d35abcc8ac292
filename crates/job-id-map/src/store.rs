use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::config::StoreConfig;
use crate::record::{
    EMPTY_COLLECTION_TEXT, MappingRecord, NewMapping, decode_collection, encode_collection,
    encode_collection_pretty,
};
use crate::storage::{KeyValueStorage, StorageError};

const COMPONENT: &str = "job_id_map";

#[derive(Debug, thiserror::Error)]
pub enum MappingStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to decode stored mappings: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode mappings: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Outcome of a lookup that keeps "not mapped" apart from "could not read".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Absent,
    Unavailable,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Absent | Self::Unavailable => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// The most recent failure a store operation swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailure {
    pub operation: &'static str,
    pub message: String,
}

/// Bounded mapping between local job ids and remote document ids.
///
/// The whole collection lives in one storage slot and every call is a full
/// read-decode-modify-encode-write of it. Failures of the medium never reach
/// the caller: they are logged, recorded in [`Self::last_failure`], and the
/// call falls back to absent, empty or no-op.
///
/// Mutations through one store are serialized by an internal lock. Two
/// stores (or two processes) pointed at the same slot still race, and the
/// last writer wins.
pub struct JobIdMappingStore<S> {
    storage: S,
    config: StoreConfig,
    write_lock: Mutex<()>,
    last_failure: Mutex<Option<StoreFailure>>,
}

impl<S: KeyValueStorage> JobIdMappingStore<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    pub fn with_config(storage: S, config: StoreConfig) -> Self {
        Self {
            storage,
            config,
            write_lock: Mutex::new(()),
            last_failure: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn upsert_mapping(&self, mapping: NewMapping) {
        self.upsert_mapping_at(mapping, Utc::now());
    }

    /// Replaces any record for the same local id and appends the new one at
    /// the tail, then trims the head down to the configured capacity.
    pub fn upsert_mapping_at(&self, mapping: NewMapping, now: DateTime<Utc>) {
        let record = MappingRecord::new(mapping, now);
        let capacity = self.config.capacity.max(1);
        let result = self.mutate(|records| {
            records.retain(|existing| existing.local_id != record.local_id);
            records.push(record.clone());
            let overflow = records.len().saturating_sub(capacity);
            if overflow > 0 {
                records.drain(..overflow);
            }
            (true, overflow)
        });
        match result {
            Ok(trimmed) => tracing::info!(
                component = COMPONENT,
                local_id = %record.local_id,
                remote_id = %record.remote_id,
                trimmed,
                "added job id mapping"
            ),
            Err(error) => self.record_failure("upsert_mapping", &error),
        }
    }

    pub fn lookup_remote_id(&self, local_id: &str) -> Option<String> {
        self.resolve_remote_id(local_id).into_option()
    }

    pub fn lookup_local_id(&self, remote_id: &str) -> Option<String> {
        self.resolve_local_id(remote_id).into_option()
    }

    pub fn resolve_remote_id(&self, local_id: &str) -> Lookup<String> {
        self.resolve("lookup_remote_id", |record| {
            (record.local_id == local_id).then(|| record.remote_id.clone())
        })
    }

    pub fn resolve_local_id(&self, remote_id: &str) -> Lookup<String> {
        self.resolve("lookup_local_id", |record| {
            (record.remote_id == remote_id).then(|| record.local_id.clone())
        })
    }

    pub fn has_mapping(&self, local_id: &str) -> bool {
        self.lookup_remote_id(local_id).is_some()
    }

    /// Snapshot of the stored collection in storage order.
    pub fn list_all(&self) -> Vec<MappingRecord> {
        self.load_or_empty("list_all")
    }

    pub fn list_for_owner(&self, owner_id: &str) -> Vec<MappingRecord> {
        self.load_or_empty("list_for_owner")
            .into_iter()
            .filter(|record| record.owner_id == owner_id)
            .collect()
    }

    pub fn remove_mapping(&self, local_id: &str) {
        let result = self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.local_id != local_id);
            let removed = before - records.len();
            (removed > 0, removed)
        });
        match result {
            Ok(removed) => tracing::info!(
                component = COMPONENT,
                local_id,
                removed,
                "removed job id mapping"
            ),
            Err(error) => self.record_failure("remove_mapping", &error),
        }
    }

    /// Drops records older than the configured retention window.
    pub fn prune_expired(&self) {
        self.prune_older_than(self.config.retention_days);
    }

    pub fn prune_older_than(&self, max_age_days: i64) {
        self.prune_older_than_at(max_age_days, Utc::now());
    }

    /// Keeps only records created strictly after `now - max_age_days`.
    /// Records whose timestamp does not parse are dropped.
    pub fn prune_older_than_at(&self, max_age_days: i64, now: DateTime<Utc>) {
        let cutoff = Duration::try_days(max_age_days)
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(if max_age_days >= 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        let result = self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.is_newer_than(cutoff));
            let pruned = before - records.len();
            (pruned > 0, pruned)
        });
        match result {
            Ok(pruned) => tracing::info!(
                component = COMPONENT,
                max_age_days,
                pruned,
                "cleared old job id mappings"
            ),
            Err(error) => self.record_failure("prune_older_than", &error),
        }
    }

    /// Removes the storage slot itself rather than writing an empty collection.
    pub fn clear_all(&self) {
        let _guard = self.lock_writes();
        match self.storage.remove_item(&self.config.storage_key) {
            Ok(()) => tracing::info!(component = COMPONENT, "cleared all job id mappings"),
            Err(error) => self.record_failure("clear_all", &MappingStoreError::from(error)),
        }
    }

    /// Pretty-printed collection for diagnostics; `"[]"` when it cannot be read.
    pub fn export_as_text(&self) -> String {
        let exported = self.load().and_then(|records| {
            encode_collection_pretty(&records).map_err(MappingStoreError::Encode)
        });
        match exported {
            Ok(text) => text,
            Err(error) => {
                self.record_failure("export_as_text", &error);
                EMPTY_COLLECTION_TEXT.to_string()
            }
        }
    }

    /// Shared by every caller of this store. Only reliable when one caller
    /// runs `clear_last_failure`, the operation and this check in sequence;
    /// with concurrent callers it may hold another caller's failure.
    pub fn last_failure(&self) -> Option<StoreFailure> {
        self.failure_slot().clone()
    }

    pub fn clear_last_failure(&self) {
        *self.failure_slot() = None;
    }

    fn resolve(
        &self,
        operation: &'static str,
        matcher: impl Fn(&MappingRecord) -> Option<String>,
    ) -> Lookup<String> {
        match self.load() {
            Ok(records) => {
                let found = records.iter().find_map(matcher);
                tracing::debug!(component = COMPONENT, operation, found = found.is_some());
                found.map_or(Lookup::Absent, Lookup::Found)
            }
            Err(error) => {
                self.record_failure(operation, &error);
                Lookup::Unavailable
            }
        }
    }

    fn load_or_empty(&self, operation: &'static str) -> Vec<MappingRecord> {
        self.load().unwrap_or_else(|error| {
            self.record_failure(operation, &error);
            Vec::new()
        })
    }

    fn load(&self) -> Result<Vec<MappingRecord>, MappingStoreError> {
        match self.storage.get_item(&self.config.storage_key)? {
            Some(raw) => decode_collection(&raw).map_err(MappingStoreError::Decode),
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, records: &[MappingRecord]) -> Result<(), MappingStoreError> {
        let encoded = encode_collection(records).map_err(MappingStoreError::Encode)?;
        self.storage
            .set_item(&self.config.storage_key, &encoded)
            .map_err(MappingStoreError::from)
    }

    /// One locked read-modify-write cycle. `apply` reports whether the
    /// collection changed; unchanged collections are not written back. A read
    /// failure aborts before anything is written.
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<MappingRecord>) -> (bool, T),
    ) -> Result<T, MappingStoreError> {
        let _guard = self.lock_writes();
        let mut records = self.load()?;
        let (changed, outcome) = apply(&mut records);
        if changed {
            self.persist(&records)?;
        }
        Ok(outcome)
    }

    fn record_failure(&self, operation: &'static str, error: &MappingStoreError) {
        tracing::warn!(
            component = COMPONENT,
            operation,
            reason = %error,
            "job id mapping operation failed"
        );
        *self.failure_slot() = Some(StoreFailure {
            operation,
            message: error.to_string(),
        });
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn failure_slot(&self) -> MutexGuard<'_, Option<StoreFailure>> {
        self.last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::DEFAULT_STORAGE_KEY;
    use crate::storage::MemoryStorage;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 10, 9, 0, 0)
            .single()
            .expect("valid fixed timestamp")
    }

    fn mapping(local_id: &str, remote_id: &str, owner_id: &str) -> NewMapping {
        NewMapping::new(local_id, remote_id, owner_id, "Backend Engineer", "Initech")
    }

    #[test]
    fn remapping_moves_record_to_tail() {
        let store = JobIdMappingStore::new(MemoryStorage::new());
        store.upsert_mapping_at(mapping("a", "r-a", "u"), fixed_now());
        store.upsert_mapping_at(mapping("b", "r-b", "u"), fixed_now());
        store.upsert_mapping_at(mapping("a", "r-a2", "u"), fixed_now());

        let order = store
            .list_all()
            .into_iter()
            .map(|record| (record.local_id, record.remote_id))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                ("b".to_string(), "r-b".to_string()),
                ("a".to_string(), "r-a2".to_string())
            ]
        );
    }

    #[test]
    fn configured_capacity_trims_from_head() {
        let config = StoreConfig::default().with_capacity(2);
        let store = JobIdMappingStore::with_config(MemoryStorage::new(), config);
        for local_id in ["one", "two", "three"] {
            store.upsert_mapping_at(mapping(local_id, local_id, "u"), fixed_now());
        }
        let ids = store
            .list_all()
            .into_iter()
            .map(|record| record.local_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn resolve_distinguishes_absent_from_unavailable() {
        let storage = MemoryStorage::new();
        let store = JobIdMappingStore::new(&storage);
        assert_eq!(store.resolve_remote_id("missing"), Lookup::Absent);
        store.upsert_mapping_at(mapping("present", "r-present", "u"), fixed_now());
        assert!(store.resolve_remote_id("present").is_found());
        assert_eq!(store.config().storage_key, DEFAULT_STORAGE_KEY);

        storage
            .set_item(DEFAULT_STORAGE_KEY, "{not json")
            .expect("seed corrupt blob");
        assert_eq!(store.resolve_remote_id("missing"), Lookup::Unavailable);
        assert_eq!(store.lookup_remote_id("missing"), None);
    }

    #[test]
    fn corrupt_blob_is_not_overwritten_by_mutations() {
        let storage = MemoryStorage::new();
        let store = JobIdMappingStore::new(&storage);
        storage
            .set_item(DEFAULT_STORAGE_KEY, "{not json")
            .expect("seed corrupt blob");

        store.upsert_mapping_at(mapping("a", "r-a", "u"), fixed_now());

        assert_eq!(
            storage
                .get_item(DEFAULT_STORAGE_KEY)
                .expect("read")
                .as_deref(),
            Some("{not json")
        );
        let failure = store.last_failure().expect("failure recorded");
        assert_eq!(failure.operation, "upsert_mapping");
        assert!(failure.message.contains("decode"));

        store.clear_all();
        assert!(!storage.contains_key(DEFAULT_STORAGE_KEY));
        store.clear_last_failure();
        assert_eq!(store.last_failure(), None);
    }

    #[test]
    fn unchanged_collection_is_not_written() {
        let storage = MemoryStorage::new();
        let store = JobIdMappingStore::new(&storage);
        store.remove_mapping("nothing-here");
        store.prune_older_than_at(30, fixed_now());
        assert!(!storage.contains_key(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn lookup_returns_first_match_for_duplicate_remote_ids() {
        let store = JobIdMappingStore::new(MemoryStorage::new());
        store.upsert_mapping_at(mapping("first", "shared", "u"), fixed_now());
        store.upsert_mapping_at(mapping("second", "shared", "u"), fixed_now());
        assert_eq!(store.lookup_local_id("shared").as_deref(), Some("first"));
    }

    #[test]
    fn prune_with_huge_age_keeps_parsable_records() {
        let store = JobIdMappingStore::new(MemoryStorage::new());
        store.upsert_mapping_at(mapping("a", "r-a", "u"), fixed_now());
        store.prune_older_than_at(i64::MAX, fixed_now());
        assert!(store.has_mapping("a"));
    }

    #[test]
    fn negative_age_prunes_everything_at_any_magnitude() {
        for max_age_days in [-1, -1_000_000, -100_000_000, i64::MIN] {
            let store = JobIdMappingStore::new(MemoryStorage::new());
            store.upsert_mapping_at(mapping("a", "r-a", "u"), fixed_now());
            store.prune_older_than_at(max_age_days, fixed_now());
            assert!(
                store.list_all().is_empty(),
                "max_age_days {max_age_days} should prune every record"
            );
        }
    }

    #[test]
    fn failure_stays_visible_to_every_caller_until_cleared() {
        let storage = MemoryStorage::new();
        storage
            .set_item(DEFAULT_STORAGE_KEY, "{not json")
            .expect("seed corrupt blob");
        let store = JobIdMappingStore::new(&storage);

        assert!(store.list_all().is_empty());
        storage.remove_item(DEFAULT_STORAGE_KEY).expect("drop blob");
        assert!(!store.has_mapping("a"));
        assert_eq!(
            store.last_failure().map(|failure| failure.operation),
            Some("list_all")
        );

        store.clear_last_failure();
        assert!(!store.has_mapping("a"));
        assert_eq!(store.last_failure(), None);
    }
}
