use crate::model::TelemetryRecord;
use serde::de::Error as _;
use serde_json::{Map, Value};

const FIELDS: [&str; 8] = [
    "id",
    "deviceId",
    "timestamp",
    "type",
    "source",
    "tags",
    "metrics",
    "receivedAt",
];

/// A JSON `null` body decodes to `None`. Top-level names match
/// case-insensitively, and a repeated name keeps its last value.
pub fn decode(body: &[u8]) -> serde_json::Result<Option<TelemetryRecord>> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Null => Ok(None),
        Value::Object(map) => serde_json::from_value(Value::Object(normalize_keys(map))).map(Some),
        other => Err(serde_json::Error::custom(format!(
            "expected a JSON object, found {}",
            kind_of(&other)
        ))),
    }
}

fn normalize_keys(map: Map<String, Value>) -> Map<String, Value> {
    let mut normalized = Map::with_capacity(map.len());
    for (key, value) in map {
        let key = FIELDS
            .iter()
            .find(|field| field.eq_ignore_ascii_case(&key))
            .map_or(key, |field| field.to_string());
        normalized.insert(key, value);
    }
    normalized
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub fn to_document(record: &TelemetryRecord) -> serde_json::Result<Value> {
    serde_json::to_value(record)
}

pub mod rfc3339 {
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<FixedOffset>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    // offset-less date-times and bare dates are UTC
    pub fn parse(s: &str) -> Option<DateTime<FixedOffset>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
    }

    pub fn serialize<S>(ts: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", s)))
    }
}

pub mod rfc3339_opt {
    use chrono::{DateTime, FixedOffset};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &Option<DateTime<FixedOffset>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => super::rfc3339::serialize(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::rfc3339")] DateTime<FixedOffset>);

        Option::<Wrapper>::deserialize(deserializer).map(|w| w.map(|Wrapper(ts)| ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_null_body() {
        assert!(decode(b"null").unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(decode(b"[1, 2, 3]").is_err());
        assert!(decode(b"\"dev-1\"").is_err());
    }

    #[test]
    fn test_decode_rejects_positional_array() {
        let body = br#"["x1","dev-1","2024-01-01T00:00:00Z",null,null,null,{"t":1}]"#;
        assert!(decode(body).is_err());
    }

    #[test]
    fn test_decode_matches_names_case_insensitively() {
        let record = decode(
            br#"{"DeviceId":"dev-1","TIMESTAMP":"2024-01-01T00:00:00Z","Type":"env","Metrics":{"Temp":1}}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(record.device_id.as_deref(), Some("dev-1"));
        assert_eq!(record.kind.as_deref(), Some("env"));
        // keys inside metrics are data and stay untouched
        assert_eq!(record.metrics.unwrap().get("Temp"), Some(&json!(1)));
    }

    #[test]
    fn test_decode_last_duplicate_wins() {
        let record = decode(br#"{"deviceId":"first","deviceid":"second","deviceId":"third"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(record.device_id.as_deref(), Some("third"));
    }

    #[test]
    fn test_null_tag_values_are_kept() {
        let record = decode(
            br#"{"deviceId":"dev-1","timestamp":"2024-01-01T00:00:00Z","tags":{"site":null,"zone":"b"},"metrics":{"t":1}}"#,
        )
        .unwrap()
        .unwrap();

        let doc = to_document(&record).unwrap();
        assert_eq!(doc["tags"], json!({"site": null, "zone": "b"}));
    }

    #[test]
    fn test_decode_rejects_wrong_field_types() {
        assert!(decode(br#"{"deviceId": 42}"#).is_err());
        assert!(decode(br#"{"timestamp": "yesterday"}"#).is_err());
        assert!(decode(br#"{"metrics": [1]}"#).is_err());
        assert!(decode(br#"{"tags": {"site": 7}}"#).is_err());
        assert!(decode(br#"{"metrics": "hot"}"#).is_err());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let record = decode(br#"{"deviceId": "dev-1", "firmware": "1.2.3"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(record.device_id.as_deref(), Some("dev-1"));
    }

    #[test]
    fn test_document_omits_absent_fields() {
        let record = decode(
            br#"{"deviceId":"dev-1","timestamp":"2024-01-01T00:00:00Z","metrics":{"temp":21.5}}"#,
        )
        .unwrap()
        .unwrap();

        let doc = to_document(&record).unwrap();
        assert_eq!(
            doc,
            json!({
                "deviceId": "dev-1",
                "timestamp": "2024-01-01T00:00:00Z",
                "metrics": {"temp": 21.5}
            })
        );
    }

    #[test]
    fn test_document_uses_camel_case() {
        let record = decode(
            br#"{"id":"a1","deviceId":"dev-1","timestamp":"2024-01-01T00:00:00Z","type":"env","source":"gw-3","tags":{"site":"north"},"metrics":{"temp":1},"receivedAt":"2024-01-01T00:00:05Z"}"#,
        )
        .unwrap()
        .unwrap();

        let doc = to_document(&record).unwrap();
        let keys: Vec<&str> = doc.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["id", "deviceId", "timestamp", "type", "source", "tags", "metrics", "receivedAt"]
        );
    }

    #[test]
    fn test_metric_values_keep_their_shape() {
        let body = br#"{"deviceId":"dev-1","timestamp":"2024-01-01T00:00:00Z","metrics":{"big":12345678901234567890123,"ratio":0.10000000000000000001,"label":"ok","on":true,"none":null,"nested":{"a":[1,2.50,{"b":null}]}}}"#;
        let record = decode(body).unwrap().unwrap();
        let doc = to_document(&record).unwrap();

        let text = serde_json::to_string(&doc["metrics"]).unwrap();
        assert_eq!(
            text,
            r#"{"big":12345678901234567890123,"ratio":0.10000000000000000001,"label":"ok","on":true,"none":null,"nested":{"a":[1,2.50,{"b":null}]}}"#
        );
    }

    #[test]
    fn test_timestamp_keeps_offset() {
        let ts = rfc3339::parse("2024-03-10T08:30:00+05:30").unwrap();
        assert_eq!(rfc3339::format(&ts), "2024-03-10T08:30:00+05:30");

        let utc = rfc3339::parse("2024-03-10T08:30:00.250+00:00").unwrap();
        assert_eq!(rfc3339::format(&utc), "2024-03-10T08:30:00.250Z");
    }

    #[test]
    fn test_timestamp_without_offset_is_utc() {
        let ts = rfc3339::parse("2024-03-10T08:30:00").unwrap();
        assert_eq!(rfc3339::format(&ts), "2024-03-10T08:30:00Z");

        let date = rfc3339::parse("2024-03-10").unwrap();
        assert_eq!(rfc3339::format(&date), "2024-03-10T00:00:00Z");
    }
}
