//! Record normalization.
//!
//! Servers have shipped several field-name variants for the same notification
//! over time. Everything entering the store, from snapshots or push events,
//! goes through [`normalize_at`] first. Payloads without a usable id are
//! dropped here and never reach consumers.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::record::{NotificationRecord, Role};

const ID_KEYS: &[&str] = &["id", "_id", "notificationId", "notification_id"];
const CREATED_AT_KEYS: &[&str] = &["createdAt", "created_at", "timestamp", "time", "date"];
const IS_READ_KEYS: &[&str] = &["isRead", "is_read", "read", "seen"];
const READ_AT_KEYS: &[&str] = &["readAt", "read_at"];
const ROLE_KEYS: &[&str] = &["role", "recipientRole", "recipient_role", "targetRole"];
const RECIPIENT_KEYS: &[&str] = &["recipientId", "recipient_id", "userId", "user_id"];
const TITLE_KEYS: &[&str] = &["title", "subject", "heading"];
const MESSAGE_KEYS: &[&str] = &["message", "body", "content", "text"];
const LINK_KEYS: &[&str] = &["link", "url", "href", "actionUrl"];
const KIND_KEYS: &[&str] = &["type", "kind", "category"];

/// Epoch values above this are milliseconds, below are seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const DEFAULT_KIND: &str = "info";

/// Normalize a payload using the current time for untimestamped records.
pub fn normalize(value: &Value) -> Option<NotificationRecord> {
    normalize_at(value, Utc::now())
}

/// Normalize a payload into a [`NotificationRecord`].
///
/// `now` becomes the ordering key when the payload has no timestamp; the
/// record's `created_at` stays `None` so consumers can still render "Just now".
pub fn normalize_at(value: &Value, now: DateTime<Utc>) -> Option<NotificationRecord> {
    let Some(obj) = value.as_object() else {
        debug!("Dropping non-object notification payload");
        return None;
    };

    let Some(id) = first(obj, ID_KEYS).and_then(canonical_id) else {
        debug!(keys = ?obj.keys().collect::<Vec<_>>(), "Dropping notification without id");
        return None;
    };

    let created_at = first(obj, CREATED_AT_KEYS).and_then(parse_timestamp);
    let read_at = first(obj, READ_AT_KEYS).and_then(parse_timestamp);
    let read_at_present = READ_AT_KEYS
        .iter()
        .any(|key| obj.get(*key).is_some_and(|v| !v.is_null()));
    let is_read = first(obj, IS_READ_KEYS)
        .and_then(parse_bool)
        .unwrap_or(read_at_present);

    // Unspecified until the consumer stamps it with its scope's role.
    let role = first(obj, ROLE_KEYS)
        .and_then(Value::as_str)
        .map(Role::from)
        .unwrap_or_else(|| Role::Other(String::new()));

    Some(NotificationRecord {
        id,
        role,
        recipient_id: first(obj, RECIPIENT_KEYS).and_then(canonical_id),
        title: text(obj, TITLE_KEYS).unwrap_or_default(),
        message: text(obj, MESSAGE_KEYS).unwrap_or_default(),
        link: text(obj, LINK_KEYS).filter(|s| !s.is_empty()),
        kind: text(obj, KIND_KEYS)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_KIND.to_string()),
        created_at,
        sort_at: created_at.unwrap_or(now),
        is_read,
        read_at,
    })
}

/// Normalize a list, dropping unusable items.
pub fn normalize_batch(values: &[Value], now: DateTime<Utc>) -> Vec<NotificationRecord> {
    let records: Vec<_> = values.iter().filter_map(|v| normalize_at(v, now)).collect();
    let dropped = values.len() - records.len();
    if dropped > 0 {
        debug!(dropped, total = values.len(), "Dropped malformed notifications");
    }
    records
}

/// Canonical string form of an id: `42` and `"42"` compare equal.
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        // Mongo-style `{ "$oid": "..." }`
        Value::Object(map) => map.get("$oid").and_then(canonical_id),
        _ => None,
    }
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|v| !v.is_null())
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first(obj, keys).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            s.parse::<i64>().ok().and_then(from_epoch)
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_numeric_and_string_ids_are_equal() {
        let a = normalize_at(&json!({"id": 42}), now()).unwrap();
        let b = normalize_at(&json!({"_id": "42"}), now()).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "42");
    }

    #[test]
    fn test_id_alias_precedence() {
        let record = normalize_at(&json!({"_id": "mongo", "notificationId": 7}), now()).unwrap();
        assert_eq!(record.id, "mongo");

        let record = normalize_at(&json!({"id": null, "notification_id": 7}), now()).unwrap();
        assert_eq!(record.id, "7");

        let record = normalize_at(&json!({"_id": {"$oid": "65ab"}}), now()).unwrap();
        assert_eq!(record.id, "65ab");
    }

    #[test]
    fn test_missing_id_is_dropped() {
        assert!(normalize_at(&json!({"title": "no id"}), now()).is_none());
        assert!(normalize_at(&json!({"id": "  "}), now()).is_none());
        assert!(normalize_at(&json!({"id": true}), now()).is_none());
        assert!(normalize_at(&json!("just a string"), now()).is_none());
        assert!(normalize_at(&json!([1, 2]), now()).is_none());
    }

    #[test]
    fn test_timestamp_aliases() {
        let record =
            normalize_at(&json!({"id": 1, "created_at": "2024-04-30T10:00:00Z"}), now()).unwrap();
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap())
        );
        assert_eq!(record.sort_at, record.created_at.unwrap());

        let record = normalize_at(&json!({"id": 1, "timestamp": 1714471200000i64}), now()).unwrap();
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap())
        );

        let record = normalize_at(&json!({"id": 1, "time": 1714471200}), now()).unwrap();
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap())
        );

        let record = normalize_at(&json!({"id": 1, "date": "2024-04-30 10:00:00"}), now()).unwrap();
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_missing_timestamp_sorts_as_now() {
        let record = normalize_at(&json!({"id": 1, "createdAt": "garbage"}), now()).unwrap();
        assert!(record.created_at.is_none());
        assert_eq!(record.sort_at, now());
    }

    #[test]
    fn test_read_state_aliases() {
        let read = |v: Value| normalize_at(&v, now()).unwrap().is_read;

        assert!(read(json!({"id": 1, "isRead": true})));
        assert!(read(json!({"id": 1, "is_read": 1})));
        assert!(read(json!({"id": 1, "read": "true"})));
        assert!(read(json!({"id": 1, "readAt": "2024-04-30T10:00:00Z"})));
        assert!(!read(json!({"id": 1, "read_at": null})));
        assert!(!read(json!({"id": 1})));
        // An explicit flag wins over a stray read timestamp.
        assert!(!read(json!({"id": 1, "isRead": false, "readAt": "2024-04-30T10:00:00Z"})));
    }

    #[test]
    fn test_display_fields() {
        let record = normalize_at(
            &json!({
                "id": "n1",
                "role": "Mentor",
                "userId": 7,
                "subject": "Interview booked",
                "body": "Tomorrow at 10",
                "url": "/interviews/3",
                "category": "interview"
            }),
            now(),
        )
        .unwrap();

        assert_eq!(record.role, Role::Mentor);
        assert_eq!(record.recipient_id.as_deref(), Some("7"));
        assert_eq!(record.title, "Interview booked");
        assert_eq!(record.message, "Tomorrow at 10");
        assert_eq!(record.link.as_deref(), Some("/interviews/3"));
        assert_eq!(record.kind, "interview");
    }

    #[test]
    fn test_defaults_for_absent_fields() {
        let record = normalize_at(&json!({"id": 5, "link": ""}), now()).unwrap();
        assert_eq!(record.kind, "info");
        assert!(record.link.is_none());
        assert!(record.title.is_empty());
        assert!(record.recipient_id.is_none());
    }

    #[test]
    fn test_normalize_batch_drops_unusable() {
        let values = vec![json!({"id": 1}), json!({"nope": 2}), json!(null), json!({"id": "3"})];
        let records = normalize_batch(&values, now());
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
