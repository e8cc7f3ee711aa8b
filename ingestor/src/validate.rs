use crate::codec;
use crate::model::TelemetryRecord;
use chrono::{DateTime, FixedOffset, NaiveDate};
use thiserror::Error;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Client input problems. The message is returned verbatim with a 400.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Request body is required.")]
    EmptyBody,

    #[error("Invalid JSON format.")]
    InvalidJson,

    #[error("Payload is required.")]
    MissingPayload,

    #[error("deviceId is required.")]
    MissingDeviceId,

    #[error("timestamp is required.")]
    MissingTimestamp,

    #[error("metrics is required.")]
    MissingMetrics,
}

impl ValidationError {
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyBody => "empty_body",
            ValidationError::InvalidJson => "invalid_json",
            ValidationError::MissingPayload => "missing_payload",
            ValidationError::MissingDeviceId => "missing_device_id",
            ValidationError::MissingTimestamp => "missing_timestamp",
            ValidationError::MissingMetrics => "missing_metrics",
        }
    }
}

pub fn parse(body: &[u8]) -> Result<TelemetryRecord, ValidationError> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let text = String::from_utf8_lossy(body);
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }

    let payload = codec::decode(text.as_bytes()).map_err(|e| {
        debug!("Failed to deserialize payload: {}", e);
        ValidationError::InvalidJson
    })?;

    let record = payload.ok_or(ValidationError::MissingPayload)?;
    validate(&record)?;
    Ok(record)
}

/// Checks required fields in a fixed order and stops at the first failure.
pub fn validate(record: &TelemetryRecord) -> Result<(), ValidationError> {
    if record
        .device_id
        .as_deref()
        .map_or(true, |id| id.trim().is_empty())
    {
        return Err(ValidationError::MissingDeviceId);
    }

    if record.timestamp.as_ref().map_or(true, is_zero_timestamp) {
        return Err(ValidationError::MissingTimestamp);
    }

    if record.metrics.as_ref().map_or(true, |m| m.is_empty()) {
        return Err(ValidationError::MissingMetrics);
    }

    Ok(())
}

/// `0001-01-01T00:00:00Z`, the value an unset timestamp serializes to.
fn is_zero_timestamp(ts: &DateTime<FixedOffset>) -> bool {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .is_some_and(|zero| ts.naive_utc() == zero)
}
