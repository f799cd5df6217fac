//! Outbound result handed to the protocol-encoding layer.

use crate::services::error::TicketError;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FailureCode {
    InvalidTicket { reason: TicketError },
    ResourceMismatch { expected: String, presented: String },
    RenewRequired,
    SessionEnded,
    AccessInvalidated,
    /// Ticket redeemed again by a protocol that validates only once.
    RevalidationRejected,
}

impl FailureCode {
    /// Stable tag for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::InvalidTicket { .. } => "invalid_ticket",
            FailureCode::ResourceMismatch { .. } => "resource_mismatch",
            FailureCode::RenewRequired => "renew_required",
            FailureCode::SessionEnded => "session_ended",
            FailureCode::AccessInvalidated => "access_invalidated",
            FailureCode::RevalidationRejected => "revalidation_rejected",
        }
    }
}

/// Outcome of a validation. The core never serialises this to a client
/// protocol; that is the encoding layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessResponseResult {
    pub status: ResponseStatus,
    pub access_id: Option<String>,
    pub resource_identifier: String,
    pub principal: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub from_new_login: bool,
    pub renewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCode>,
}

impl AccessResponseResult {
    pub fn success(
        access_id: &str,
        resource_identifier: &str,
        principal: &str,
        attributes: BTreeMap<String, String>,
        from_new_login: bool,
        renewed: bool,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            access_id: Some(access_id.to_string()),
            resource_identifier: resource_identifier.to_string(),
            principal: Some(principal.to_string()),
            attributes,
            from_new_login,
            renewed,
            failure: None,
        }
    }

    pub fn failure(
        resource_identifier: &str,
        access_id: Option<&str>,
        failure: FailureCode,
    ) -> Self {
        Self {
            status: ResponseStatus::Failure,
            access_id: access_id.map(str::to_string),
            resource_identifier: resource_identifier.to_string(),
            principal: None,
            attributes: BTreeMap::new(),
            from_new_login: false,
            renewed: false,
            failure: Some(failure),
        }
    }

    pub fn ticket_failure(resource_identifier: &str, reason: TicketError) -> Self {
        Self::failure(
            resource_identifier,
            None,
            FailureCode::InvalidTicket { reason },
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn ticket_error(&self) -> Option<TicketError> {
        match self.failure {
            Some(FailureCode::InvalidTicket { reason }) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_failure_serializes_reason() {
        let result =
            AccessResponseResult::ticket_failure("https://app/", TicketError::AlreadyConsumed);

        assert!(!result.is_success());
        assert_eq!(result.ticket_error(), Some(TicketError::AlreadyConsumed));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["failure"]["code"], "invalid_ticket");
        assert_eq!(json["failure"]["reason"], "already_consumed");
        assert!(json.get("attributes").is_none());
    }
}
