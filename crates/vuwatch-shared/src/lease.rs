//! Operator lease payload.
//!
//! A retained bus record granting exclusive destructive-command authority to
//! one owner until `expires_ts`. The agent never counter-publishes; it only
//! tracks the retained record.

use serde::{Deserialize, Serialize};

/// Schema tag for lease payloads.
pub const LEASE_SCHEMA: &str = "vu.watchdog.lease.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeasePayload {
    #[serde(default = "default_lease_schema")]
    pub schema: String,
    pub ts: i64,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub expires_ts: i64,
}

fn default_lease_schema() -> String {
    LEASE_SCHEMA.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_parse() {
        let json = r#"{"ts":100,"owner":"ops-42","expiresTs":900}"#;
        let lease: LeasePayload = serde_json::from_str(json).unwrap();
        assert_eq!(lease.owner.as_deref(), Some("ops-42"));
        assert_eq!(lease.expires_ts, 900);
        assert_eq!(lease.schema, LEASE_SCHEMA);
    }

    #[test]
    fn test_release_payload() {
        // A release is an owner-less payload.
        let json = r#"{"ts":100,"owner":null,"expiresTs":0}"#;
        let lease: LeasePayload = serde_json::from_str(json).unwrap();
        assert!(lease.owner.is_none());
    }
}
