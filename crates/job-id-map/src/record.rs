use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Text written by diagnostic exports when the collection cannot be read.
pub const EMPTY_COLLECTION_TEXT: &str = "[]";

/// One locally created job and the remote document id it was persisted under.
///
/// The wire names match the blob written by the web client, so an existing
/// `job_id_mappings` slot can be read without migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(rename = "localId")]
    pub local_id: String,
    #[serde(rename = "firebaseId")]
    pub remote_id: String,
    #[serde(rename = "userId")]
    pub owner_id: String,
    #[serde(rename = "jobTitle")]
    pub title: String,
    #[serde(rename = "companyName")]
    pub secondary_label: String,
    /// Raw ISO-8601 text. Kept verbatim so malformed values survive a rewrite.
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// Caller-supplied half of a [`MappingRecord`]; the store stamps `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMapping {
    pub local_id: String,
    pub remote_id: String,
    pub owner_id: String,
    pub title: String,
    pub secondary_label: String,
}

impl NewMapping {
    pub fn new(
        local_id: impl Into<String>,
        remote_id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        secondary_label: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            secondary_label: secondary_label.into(),
        }
    }
}

impl MappingRecord {
    pub fn new(mapping: NewMapping, now: DateTime<Utc>) -> Self {
        Self {
            local_id: mapping.local_id,
            remote_id: mapping.remote_id,
            owner_id: mapping.owner_id,
            title: mapping.title,
            secondary_label: mapping.secondary_label,
            created_at: format_timestamp(now),
        }
    }

    /// Parsed `created_at`, or `None` when the stored text is not a valid instant.
    pub fn created_at_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.created_at.trim())
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc))
    }

    /// Strictly after `cutoff`. Invalid instants never compare as newer.
    pub fn is_newer_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at_instant()
            .is_some_and(|created_at| created_at > cutoff)
    }
}

/// `YYYY-MM-DDTHH:MM:SS.sssZ`, the shape browsers produce for `toISOString`.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_collection(raw: &str) -> Result<Vec<MappingRecord>, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn encode_collection(records: &[MappingRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string(records)
}

pub fn encode_collection_pretty(records: &[MappingRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}
