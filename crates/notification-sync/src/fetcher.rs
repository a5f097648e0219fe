//! Snapshot fetcher.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::http::HttpClient;
use crate::normalizer::normalize_batch;
use crate::record::{NotificationRecord, Scope};

const NOTIFICATIONS_PATH: &str = "/notifications";

/// Parameters of one snapshot request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub scope: Scope,
    pub limit: usize,
}

impl FetchRequest {
    pub fn new(scope: Scope, limit: usize) -> Self {
        Self { scope, limit }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("role", self.scope.role.as_str().to_string())];
        if let Some(recipient_id) = &self.scope.recipient_id {
            query.push(("recipientId", recipient_id.clone()));
        }
        query.push(("limit", self.limit.to_string()));
        query
    }
}

/// Retrieves the current notification set for a scope.
///
/// Stateless; the engine owns cancellation and staleness checks.
#[derive(Clone)]
pub struct SnapshotFetcher {
    http: Arc<dyn HttpClient>,
}

impl SnapshotFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Fetch and normalize a snapshot, newest first.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<NotificationRecord>> {
        let body = self.http.get(NOTIFICATIONS_PATH, &request.query()).await?;
        let items = extract_items(body)?;

        let mut records = normalize_batch(&items, Utc::now());
        for record in &mut records {
            record.fill_role_from(&request.scope);
        }
        records.sort_by(|a, b| b.sort_at.cmp(&a.sort_at));
        debug!(
            scope = %request.scope,
            received = items.len(),
            usable = records.len(),
            "Fetched notification snapshot"
        );
        Ok(records)
    }
}

/// Pull the record list out of a `{ success, data }` envelope.
fn extract_items(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            if obj.get("success").and_then(Value::as_bool) == Some(false) {
                let message = obj
                    .get("message")
                    .or_else(|| obj.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("request was not successful");
                return Err(SyncError::server(message));
            }
            match obj.remove("data") {
                Some(Value::Array(items)) => Ok(items),
                Some(Value::Object(mut data)) => match data.remove("notifications") {
                    Some(Value::Array(items)) => Ok(items),
                    _ => Err(SyncError::protocol("`data` carries no notification list")),
                },
                Some(Value::Null) => Err(SyncError::protocol("`data` is null")),
                Some(_) => Err(SyncError::protocol("`data` is not a list")),
                None => Err(SyncError::protocol("response has no `data` field")),
            }
        }
        other => Err(SyncError::protocol(format!(
            "unexpected snapshot body: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::record::Role;
    use parking_lot::Mutex;
    use serde_json::json;

    struct StaticHttp {
        body: Value,
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl StaticHttp {
        fn new(body: Value) -> Arc<Self> {
            Arc::new(Self {
                body,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for StaticHttp {
        async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
            self.calls.lock().push((
                path.to_string(),
                query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ));
            Ok(self.body.clone())
        }

        async fn patch(&self, _path: &str, _body: &Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_scope_query_and_sorts() {
        let http = StaticHttp::new(json!({
            "success": true,
            "data": [
                {"id": 1, "createdAt": "2024-05-01T10:00:00Z"},
                {"title": "no id"},
                {"id": "2", "createdAt": "2024-05-01T11:00:00Z"}
            ]
        }));
        let fetcher = SnapshotFetcher::new(http.clone());
        let request = FetchRequest::new(Scope::new("student", Some("42")), 20);

        let records = fetcher.fetch(&request).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);

        let calls = http.calls.lock();
        assert_eq!(calls[0].0, "/notifications");
        assert_eq!(
            calls[0].1,
            vec![
                ("role".to_string(), "student".to_string()),
                ("recipientId".to_string(), "42".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_omits_absent_recipient() {
        let http = StaticHttp::new(json!({"success": true, "data": []}));
        let fetcher = SnapshotFetcher::new(http.clone());
        fetcher
            .fetch(&FetchRequest::new(Scope::role_only("admin"), 5))
            .await
            .unwrap();
        let calls = http.calls.lock();
        assert!(calls[0].1.iter().all(|(k, _)| k != "recipientId"));
    }

    #[test]
    fn test_extract_items_envelopes() {
        assert_eq!(extract_items(json!([{"id": 1}])).unwrap().len(), 1);
        assert_eq!(
            extract_items(json!({"success": true, "data": {"notifications": [{"id": 1}]}}))
                .unwrap()
                .len(),
            1
        );
        assert!(extract_items(json!({"data": []})).unwrap().is_empty());
    }

    #[test]
    fn test_extract_items_rejects_null_data() {
        assert!(matches!(
            extract_items(json!({"success": true, "data": null})),
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_stamps_missing_role_from_scope() {
        let http = StaticHttp::new(json!({
            "success": true,
            "data": [
                {"id": 1, "title": "no role"},
                {"id": 2, "role": "student", "recipientId": "42"}
            ]
        }));
        let fetcher = SnapshotFetcher::new(http);
        let records = fetcher
            .fetch(&FetchRequest::new(Scope::new("student", Some("42")), 20))
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.role == Role::Student));
        let stamped = records.iter().find(|r| r.id == "1").unwrap();
        assert_eq!(stamped.recipient_id, None);
    }

    #[test]
    fn test_extract_items_failure() {
        let err = extract_items(json!({"success": false, "message": "forbidden"})).unwrap_err();
        assert!(matches!(err, SyncError::Server(ref m) if m == "forbidden"));

        assert!(matches!(
            extract_items(json!({"success": true})),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(extract_items(json!("oops")), Err(SyncError::Protocol(_))));
    }
}
