//! Access grants - one resource's redemption of a ticket.
//!
//! `Access` is the capability every protocol variant implements. The
//! validation engine and the logout coordinator only ever see
//! `Arc<dyn Access>`; which variant backs a grant is decided once, by
//! [`AccessFactory`], from the request's [`Protocol`](crate::models::Protocol).
//!
//! State machine:
//!
//! ```text
//! Pending --validate--> Validated | Failed
//!    \                      |
//!     \----invalidate----> Invalidated
//! ```
//!
//! `validate()` outside `Pending` is an [`AccessStateError`] unless the
//! variant's [`RevalidationPolicy`] is `Allow` and the grant is `Validated`.
//! After `Invalidated` it is always an error, never a silent no-op.

mod factory;
mod grant;
mod self_contained;
mod service_ticket;

pub use factory::AccessFactory;
pub use self_contained::SelfContainedAccess;
pub use service_ticket::ServiceTicketAccess;

use crate::models::{
    AccessResponseRequest, AccessResponseResult, GrantRecord, Protocol, TokenServiceAccessRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    #[default]
    Pending,
    Validated,
    Failed,
    Invalidated,
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Pending => "pending",
            ValidationState::Validated => "validated",
            ValidationState::Failed => "failed",
            ValidationState::Invalidated => "invalidated",
        }
    }
}

/// Whether `validate()` may run again on a `Validated` grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationPolicy {
    Reject,
    Allow,
}

/// Out-of-sequence call on a grant. A programming error: fatal to the
/// request, never to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessStateError {
    #[error("Access {access_id} has not been validated")]
    Pending { access_id: String },

    #[error("Access {access_id} was already validated and does not allow revalidation")]
    AlreadyValidated { access_id: String },

    #[error("Access {access_id} failed validation")]
    Failed { access_id: String },

    #[error("Access {access_id} has been invalidated")]
    Invalidated { access_id: String },
}

/// Everything a variant needs to know about the ticket and session a grant
/// is built from.
#[derive(Debug, Clone)]
pub struct GrantContext {
    pub access_id: String,
    pub ticket_id: String,
    pub resource_identifier: String,
    pub principal: String,
    pub attributes: BTreeMap<String, String>,
    pub from_new_login: bool,
    /// Uses left on the ticket after the redemption that created the grant.
    pub remaining_uses: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Access: Send + Sync {
    fn id(&self) -> &str;

    /// The resource this grant is bound to, e.g. the service URL.
    fn resource_identifier(&self) -> &str;

    fn ticket_id(&self) -> &str;

    fn protocol(&self) -> Protocol;

    fn state(&self) -> ValidationState;

    /// Run the variant's checks against `request` and move out of `Pending`.
    /// Mutates only this grant.
    fn validate(
        &self,
        request: &TokenServiceAccessRequest,
    ) -> Result<ValidationState, AccessStateError>;

    /// Tear down the local session this grant represents. Moves the grant to
    /// `Invalidated` whatever the outcome; returns true iff the teardown was
    /// confirmed. Repeated and concurrent calls share a single attempt.
    async fn invalidate(&self) -> bool;

    fn is_local_session_destroyed(&self) -> bool;

    /// Whether the grant must be retained after validation (logout or
    /// revalidation may revisit it).
    fn requires_storage(&self) -> bool;

    /// Build the response for the current state. Fails only while `Pending`.
    fn generate_response(
        &self,
        request: &AccessResponseRequest,
    ) -> Result<AccessResponseResult, AccessStateError>;

    fn record(&self) -> GrantRecord;
}

/// Canonical form of a resource identifier used for matching: no fragment,
/// no `;jsessionid=` path parameter, no trailing slash.
pub fn normalize_resource(resource: &str) -> String {
    let trimmed = resource.trim();
    let mut normalized = trimmed
        .split('#')
        .next()
        .unwrap_or(trimmed)
        .to_string();

    if let Some(start) = normalized.to_ascii_lowercase().find(";jsessionid=") {
        let end = normalized[start..]
            .find('?')
            .map(|offset| start + offset)
            .unwrap_or(normalized.len());
        normalized.replace_range(start..end, "");
    }

    normalized.trim_end_matches('/').to_string()
}

pub fn resource_matches(expected: &str, presented: &str) -> bool {
    normalize_resource(expected) == normalize_resource(presented)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resource() {
        assert_eq!(
            normalize_resource("https://app.example.com/"),
            "https://app.example.com"
        );
        assert_eq!(
            normalize_resource("https://app.example.com/home#section"),
            "https://app.example.com/home"
        );
        assert_eq!(
            normalize_resource("https://app.example.com/a;JSESSIONID=XYZ?q=1"),
            "https://app.example.com/a?q=1"
        );
    }

    #[test]
    fn test_resource_matches() {
        assert!(resource_matches("/app", "/app/"));
        assert!(!resource_matches("/app", "/other"));
    }
}
