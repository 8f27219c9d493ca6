//! Operator lease tracking and command authorization.
//!
//! A single process-wide record of `(owner, expires_ts)`, updated only from
//! the retained lease topic. The agent never counter-publishes a lease.

use tracing::{debug, info};

use vuwatch_shared::lease::LeasePayload;

/// Outcome of applying an inbound lease payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseUpdate {
    Accepted,
    /// Held by another owner; the update is ignored (log only).
    Rejected { current_owner: String },
}

/// Authorization answer for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    Allow,
    /// Allowed through the local-bypass path; callers emit the
    /// `LOCAL_OVERRIDE_USED` lifecycle event.
    AllowLocalBypass,
    Deny { reason: String },
}

#[derive(Debug, Default)]
pub struct LeaseManager {
    owner: Option<String>,
    expires_ts: i64,
}

impl LeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while an unexpired owner holds the lease.
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.owner.is_some() && self.expires_ts > now_ms
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Apply an inbound lease payload. Accepted when there is no active
    /// lease, or the existing owner matches the incoming owner.
    pub fn apply_update(&mut self, payload: &LeasePayload, now_ms: i64) -> LeaseUpdate {
        let holder_matches = match (&self.owner, &payload.owner) {
            (Some(current), Some(incoming)) => current == incoming,
            _ => false,
        };

        if !self.is_active(now_ms) || holder_matches || self.owner.is_none() {
            self.owner = payload.owner.clone();
            self.expires_ts = payload.expires_ts;
            info!(
                "Lease updated: owner={:?} expires_ts={}",
                self.owner, self.expires_ts
            );
            LeaseUpdate::Accepted
        } else {
            let current_owner = self.owner.clone().unwrap_or_default();
            debug!(
                "Lease update from {:?} rejected, held by {}",
                payload.owner, current_owner
            );
            LeaseUpdate::Rejected { current_owner }
        }
    }

    /// Authorization for one command dispatch.
    pub fn validate(
        &self,
        client_id: &str,
        is_local: bool,
        requires_lease: bool,
        local_bypass: bool,
        now_ms: i64,
    ) -> LeaseDecision {
        if !requires_lease {
            return LeaseDecision::Allow;
        }
        if is_local && local_bypass {
            return LeaseDecision::AllowLocalBypass;
        }
        if !self.is_active(now_ms) {
            return LeaseDecision::Deny { reason: "No active lease".to_string() };
        }
        match self.owner.as_deref() {
            Some(owner) if owner == client_id => LeaseDecision::Allow,
            Some(owner) => LeaseDecision::Deny {
                reason: format!("Lease held by {}", owner),
            },
            None => LeaseDecision::Deny { reason: "No active lease".to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(owner: Option<&str>, expires_ts: i64) -> LeasePayload {
        LeasePayload {
            schema: vuwatch_shared::lease::LEASE_SCHEMA.to_string(),
            ts: 0,
            owner: owner.map(String::from),
            expires_ts,
        }
    }

    #[test]
    fn test_is_active() {
        let mut lease = LeaseManager::new();
        assert!(!lease.is_active(100));

        lease.apply_update(&payload(Some("ops-1"), 1_000), 100);
        assert!(lease.is_active(999));
        assert!(!lease.is_active(1_000), "expiry boundary is exclusive");
    }

    #[test]
    fn test_takeover_requires_expiry() {
        let mut lease = LeaseManager::new();
        lease.apply_update(&payload(Some("ops-1"), 1_000), 0);

        // Foreign owner while active: rejected, state unchanged.
        let update = lease.apply_update(&payload(Some("ops-2"), 5_000), 500);
        assert_eq!(update, LeaseUpdate::Rejected { current_owner: "ops-1".to_string() });
        assert_eq!(lease.owner(), Some("ops-1"));

        // After expiry the takeover lands.
        let update = lease.apply_update(&payload(Some("ops-2"), 5_000), 1_500);
        assert_eq!(update, LeaseUpdate::Accepted);
        assert_eq!(lease.owner(), Some("ops-2"));
    }

    #[test]
    fn test_owner_can_renew() {
        let mut lease = LeaseManager::new();
        lease.apply_update(&payload(Some("ops-1"), 1_000), 0);
        let update = lease.apply_update(&payload(Some("ops-1"), 9_000), 500);
        assert_eq!(update, LeaseUpdate::Accepted);
        assert!(lease.is_active(8_999));
    }

    #[test]
    fn test_owner_can_release() {
        let mut lease = LeaseManager::new();
        lease.apply_update(&payload(Some("ops-1"), 1_000), 0);
        // An owner-less payload while active is not a holder match, but the
        // rule accepts when owner is nil on the incoming side only if the
        // lease is inactive; while active it is rejected.
        let update = lease.apply_update(&payload(None, 0), 500);
        assert_eq!(update, LeaseUpdate::Rejected { current_owner: "ops-1".to_string() });
    }

    #[test]
    fn test_validate_no_lease_required() {
        let lease = LeaseManager::new();
        assert_eq!(lease.validate("anyone", false, false, false, 0), LeaseDecision::Allow);
    }

    #[test]
    fn test_validate_local_bypass() {
        let lease = LeaseManager::new();
        assert_eq!(
            lease.validate("local-api", true, true, true, 0),
            LeaseDecision::AllowLocalBypass
        );
        // Local origin without the bypass flag is held to the lease rule.
        assert_eq!(
            lease.validate("local-api", true, true, false, 0),
            LeaseDecision::Deny { reason: "No active lease".to_string() }
        );
    }

    #[test]
    fn test_validate_owner_mismatch() {
        let mut lease = LeaseManager::new();
        lease.apply_update(&payload(Some("ops-1"), 10_000), 0);
        assert_eq!(lease.validate("ops-1", false, true, true, 500), LeaseDecision::Allow);
        assert_eq!(
            lease.validate("ops-2", false, true, true, 500),
            LeaseDecision::Deny { reason: "Lease held by ops-1".to_string() }
        );
    }

    #[test]
    fn test_validate_expired_lease() {
        let mut lease = LeaseManager::new();
        lease.apply_update(&payload(Some("ops-1"), 1_000), 0);
        assert_eq!(
            lease.validate("ops-1", false, true, true, 2_000),
            LeaseDecision::Deny { reason: "No active lease".to_string() }
        );
    }
}
