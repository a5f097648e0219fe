//! Canonical notification record and viewer scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scope discriminator for a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Student,
    Mentor,
    Company,
    Admin,
    /// Any other role string the server uses
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Company => "company",
            Role::Admin => "admin",
            Role::Other(s) => s,
        }
    }

    /// The payload carried no role at all.
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Role::Other(s) if s.is_empty())
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "student" => Role::Student,
            "mentor" => Role::Mentor,
            "company" => Role::Company,
            "admin" => Role::Admin,
            _ => Role::Other(trimmed.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(role, recipient_id?)` pair that partitions notifications per viewer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
}

impl Scope {
    pub fn new(role: impl Into<Role>, recipient_id: Option<impl Into<String>>) -> Self {
        Self {
            role: role.into(),
            recipient_id: recipient_id.map(Into::into),
        }
    }

    /// Broadcast-to-role scope without a recipient.
    pub fn role_only(role: impl Into<Role>) -> Self {
        Self {
            role: role.into(),
            recipient_id: None,
        }
    }

    /// Whether data tagged with `role` / `recipient_id` belongs to this scope.
    ///
    /// A missing role or recipient on the incoming side is treated as a wildcard;
    /// when both sides carry a value they must be equal.
    pub fn accepts(&self, role: Option<&Role>, recipient_id: Option<&str>) -> bool {
        if let Some(role) = role
            && role != &self.role
        {
            return false;
        }
        match (self.recipient_id.as_deref(), recipient_id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }

    /// Body sent with read mutations.
    pub fn mutation_body(&self) -> serde_json::Value {
        serde_json::json!({
            "role": self.role.as_str(),
            "recipientId": self.recipient_id,
        })
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.recipient_id {
            Some(id) => write!(f, "{}/{}", self.role, id),
            None => write!(f, "{}", self.role),
        }
    }
}

/// A notification in canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Canonical string id; numeric ids on the wire are stringified.
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Opaque category tag (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: String,
    /// Source timestamp, `None` when the payload carried none.
    pub created_at: Option<DateTime<Utc>>,
    /// Ordering key: `created_at`, or the instant the record was first normalized.
    pub sort_at: DateTime<Utc>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    /// Minimal record, mostly useful for tests and fakes.
    pub fn new(id: impl Into<String>, role: impl Into<Role>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            recipient_id: None,
            title: String::new(),
            message: String::new(),
            link: None,
            kind: "info".to_string(),
            created_at: Some(created_at),
            sort_at: created_at,
            is_read: false,
            read_at: None,
        }
    }

    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// Stamp a role-less record with the role of the scope it was delivered
    /// for. A missing recipient is left alone: it marks a role-wide broadcast.
    pub fn fill_role_from(&mut self, scope: &Scope) {
        if self.role.is_unspecified() {
            self.role = scope.role.clone();
        }
    }

    /// Human-readable age relative to `now`, "Just now" when the source had no timestamp.
    pub fn relative_age(&self, now: DateTime<Utc>) -> String {
        let Some(created_at) = self.created_at else {
            return "Just now".to_string();
        };
        let elapsed = now.signed_duration_since(created_at);
        let minutes = elapsed.num_minutes();
        if minutes < 1 {
            "Just now".to_string()
        } else if minutes < 60 {
            format!("{minutes}m ago")
        } else if elapsed.num_hours() < 24 {
            format!("{}h ago", elapsed.num_hours())
        } else {
            format!("{}d ago", elapsed.num_days())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::from("Student"), Role::Student);
        assert_eq!(Role::from(" admin "), Role::Admin);
        assert_eq!(Role::from("reviewer"), Role::Other("reviewer".to_string()));
        assert_eq!(Role::Other("reviewer".to_string()).as_str(), "reviewer");
    }

    #[test]
    fn test_fill_role_from_scope() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let scope = Scope::new("student", Some("42"));

        let mut record = NotificationRecord::new("1", "", now);
        assert!(record.role.is_unspecified());
        record.fill_role_from(&scope);
        assert_eq!(record.role, Role::Student);
        assert_eq!(record.recipient_id, None);

        let mut record = NotificationRecord::new("2", "mentor", now).with_recipient("7");
        record.fill_role_from(&scope);
        assert_eq!(record.role, Role::Mentor);
        assert_eq!(record.recipient_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_scope_accepts() {
        let scope = Scope::new("student", Some("42"));

        assert!(scope.accepts(Some(&Role::Student), Some("42")));
        assert!(scope.accepts(Some(&Role::Student), None));
        assert!(scope.accepts(None, None));
        assert!(!scope.accepts(Some(&Role::Mentor), Some("42")));
        assert!(!scope.accepts(Some(&Role::Student), Some("7")));

        let admin = Scope::role_only("admin");
        assert!(admin.accepts(Some(&Role::Admin), Some("1")));
    }

    #[test]
    fn test_scope_mutation_body() {
        let body = Scope::new("mentor", Some("7")).mutation_body();
        assert_eq!(body["role"], "mentor");
        assert_eq!(body["recipientId"], "7");

        let body = Scope::role_only("admin").mutation_body();
        assert!(body["recipientId"].is_null());
    }

    #[test]
    fn test_relative_age() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut record = NotificationRecord::new("1", "student", now - Duration::seconds(20));
        assert_eq!(record.relative_age(now), "Just now");

        record.created_at = Some(now - Duration::minutes(5));
        assert_eq!(record.relative_age(now), "5m ago");

        record.created_at = Some(now - Duration::hours(3));
        assert_eq!(record.relative_age(now), "3h ago");

        record.created_at = Some(now - Duration::days(2));
        assert_eq!(record.relative_age(now), "2d ago");

        record.created_at = None;
        assert_eq!(record.relative_age(now), "Just now");
    }

    #[test]
    fn test_record_serializes_type_field() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = NotificationRecord::new("9", "company", now).with_recipient("3");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "info");
        assert_eq!(json["role"], "company");
        assert_eq!(json["recipientId"], "3");
        assert_eq!(json["isRead"], false);
    }
}
