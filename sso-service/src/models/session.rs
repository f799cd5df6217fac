//! Persistence form of an SSO session and its grants.

use crate::access::ValidationState;
use crate::models::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of one `Access` grant, enough to rebuild it after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub access_id: String,
    pub resource_identifier: String,
    pub ticket_id: String,
    pub protocol: Protocol,
    pub state: ValidationState,
    pub local_session_destroyed: bool,
    pub from_new_login: bool,
    pub requires_storage: bool,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of an SSO session as written to the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub principal: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub ticket_granting_ticket_id: String,
    pub created_at: DateTime<Utc>,
    pub destroyed_at: Option<DateTime<Utc>>,
    /// Creation order.
    #[serde(default)]
    pub grants: Vec<GrantRecord>,
}

impl SessionRecord {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at.is_some()
    }
}
