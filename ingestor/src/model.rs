use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single telemetry reading as received from a device and as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::codec::rfc3339_opt"
    )]
    pub timestamp: Option<DateTime<FixedOffset>>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, Option<String>>>,

    /// Free-form measurements, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::codec::rfc3339_opt"
    )]
    pub received_at: Option<DateTime<FixedOffset>>,
}

impl TelemetryRecord {
    /// Fills a missing or blank `id` and always overwrites `receivedAt`.
    pub fn stamp(&mut self, received_at: DateTime<Utc>) {
        if self.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            self.id = Some(generate_id());
        }
        self.received_at = Some(received_at.fixed_offset());
    }

    pub fn summary(&self) -> Option<IngestResponse> {
        Some(IngestResponse {
            id: self.id.clone()?,
            device_id: self.device_id.clone()?,
            timestamp: self.timestamp?,
        })
    }
}

/// 32 lowercase hex characters from a random UUID.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub id: String,
    pub device_id: String,
    #[serde(with = "crate::codec::rfc3339")]
    pub timestamp: DateTime<FixedOffset>,
}
