//! Ticket registry - the single source of truth for ticket lifetime.
//!
//! Tickets live in a `DashMap`, so every check-and-decrement happens under
//! one shard's write lock and two consumers of the same id can never both
//! see a remaining use. Consumed tickets stay in the map as tombstones until
//! they expire, which keeps replays reporting `AlreadyConsumed` rather than
//! `NotFound`.

use super::error::{RegistryError, TicketError};
use super::id_generator::{IdGenerator, TicketIdGenerator};
use super::metrics;
use crate::config::SsoConfig;
use crate::models::{Ticket, TicketKind, TicketPolicy};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Result of one expiration sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub removed: usize,
    /// Sessions whose ticket-granting ticket expired in this sweep.
    pub expired_sessions: Vec<String>,
}

pub struct TicketRegistry {
    tickets: DashMap<String, Ticket>,
    generator: Box<dyn IdGenerator>,
    max_issue_attempts: u32,
}

impl TicketRegistry {
    pub fn new(generator: Box<dyn IdGenerator>, max_issue_attempts: u32) -> Self {
        Self {
            tickets: DashMap::new(),
            generator,
            max_issue_attempts: max_issue_attempts.max(1),
        }
    }

    pub fn from_config(config: &SsoConfig) -> Self {
        Self::new(
            Box::new(TicketIdGenerator::new(config.node_id.clone())),
            config.registry.max_issue_attempts,
        )
    }

    /// Issue a ticket under a freshly generated id. The id is only ever
    /// inserted into a vacant slot; a collision retries with new randomness.
    pub fn issue(
        &self,
        owner_session_id: &str,
        kind: TicketKind,
        policy: &TicketPolicy,
        resource_identifier: Option<String>,
        from_new_login: bool,
        now: DateTime<Utc>,
    ) -> Result<Ticket, RegistryError> {
        for attempt in 1..=self.max_issue_attempts {
            let id = self.generator.next_id(kind);
            match self.tickets.entry(id) {
                Entry::Vacant(slot) => {
                    let ticket = Ticket::new(
                        slot.key().clone(),
                        kind,
                        owner_session_id.to_string(),
                        resource_identifier,
                        policy.clone(),
                        from_new_login,
                        now,
                    );
                    slot.insert(ticket.clone());

                    metrics::record_ticket_issued(kind.as_str());
                    metrics::set_registry_size(self.tickets.len());
                    tracing::debug!(
                        ticket = %Ticket::log_id(&ticket.id),
                        kind = kind.as_str(),
                        session_id = %owner_session_id,
                        expires_at = %ticket.expires_at,
                        "Ticket issued"
                    );
                    return Ok(ticket);
                }
                Entry::Occupied(_) => {
                    tracing::warn!(attempt, kind = kind.as_str(), "Ticket id collision, retrying");
                }
            }
        }

        tracing::error!(
            attempts = self.max_issue_attempts,
            kind = kind.as_str(),
            "Could not generate a unique ticket id"
        );
        Err(RegistryError::ExhaustedEntropy {
            attempts: self.max_issue_attempts,
        })
    }

    /// Atomically validate and spend one use of a ticket of any kind.
    pub fn validate_and_consume(
        &self,
        ticket_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketError> {
        self.consume(ticket_id, None, now)
    }

    /// Like [`validate_and_consume`](Self::validate_and_consume), but a ticket
    /// of another kind fails with `WrongKind` without spending its budget.
    pub fn validate_and_consume_as(
        &self,
        ticket_id: &str,
        kind: TicketKind,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketError> {
        self.consume(ticket_id, Some(kind), now)
    }

    fn consume(
        &self,
        ticket_id: &str,
        expected_kind: Option<TicketKind>,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketError> {
        let result = match self.tickets.get_mut(ticket_id) {
            None => Err(TicketError::NotFound),
            Some(mut entry) => {
                let ticket = entry.value_mut();
                if expected_kind.is_some_and(|kind| kind != ticket.kind) {
                    Err(TicketError::WrongKind)
                } else if ticket.is_expired(now) {
                    Err(TicketError::Expired)
                } else if ticket.is_consumed() {
                    Err(TicketError::AlreadyConsumed)
                } else {
                    ticket.record_use(now);
                    Ok(ticket.clone())
                }
            }
        };

        match &result {
            Ok(ticket) => {
                metrics::record_ticket_validation("success");
                tracing::debug!(
                    ticket = %Ticket::log_id(ticket_id),
                    remaining_uses = ?ticket.remaining_uses,
                    "Ticket consumed"
                );
            }
            Err(e) => {
                metrics::record_ticket_validation(e.as_str());
                tracing::info!(
                    ticket = %Ticket::log_id(ticket_id),
                    reason = e.as_str(),
                    "Ticket rejected"
                );
            }
        }

        result
    }

    /// Use a ticket-granting ticket without spending budget. Applies sliding
    /// renewal.
    pub fn touch(&self, ticket_id: &str, now: DateTime<Utc>) -> Result<Ticket, TicketError> {
        let mut entry = self.tickets.get_mut(ticket_id).ok_or(TicketError::NotFound)?;
        let ticket = entry.value_mut();
        if ticket.kind != TicketKind::TicketGranting {
            return Err(TicketError::WrongKind);
        }
        if ticket.is_expired(now) {
            return Err(TicketError::Expired);
        }
        ticket.touch(now);
        Ok(ticket.clone())
    }

    pub fn get(&self, ticket_id: &str) -> Option<Ticket> {
        self.tickets.get(ticket_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, ticket_id: &str) -> Option<Ticket> {
        let removed = self.tickets.remove(ticket_id).map(|(_, ticket)| ticket);
        if removed.is_some() {
            metrics::set_registry_size(self.tickets.len());
        }
        removed
    }

    /// Drop every ticket owned by `session_id`; returns how many were removed.
    pub fn remove_for_session(&self, session_id: &str) -> usize {
        let mut removed = 0;
        self.tickets.retain(|_, ticket| {
            let owned = ticket.owner_session_id == session_id;
            if owned {
                removed += 1;
            }
            !owned
        });

        metrics::set_registry_size(self.tickets.len());
        tracing::debug!(session_id = %session_id, removed, "Removed session tickets");
        removed
    }

    /// Remove every ticket with `expires_at <= now`. Locks one shard at a time.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut removed = 0;
        let mut expired_sessions = BTreeSet::new();

        self.tickets.retain(|_, ticket| {
            if !ticket.is_expired(now) {
                return true;
            }
            removed += 1;
            if ticket.kind == TicketKind::TicketGranting {
                expired_sessions.insert(ticket.owner_session_id.clone());
            }
            false
        });

        metrics::record_tickets_swept(removed);
        metrics::set_registry_size(self.tickets.len());

        SweepOutcome {
            removed,
            expired_sessions: expired_sessions.into_iter().collect(),
        }
    }

    /// Copy of every ticket, for flushing to a `TicketStore`.
    pub fn snapshot(&self) -> Vec<Ticket> {
        self.tickets
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Reload tickets from a snapshot. Expired tickets and ids already present
    /// are skipped; returns how many were loaded.
    pub fn restore(&self, tickets: Vec<Ticket>, now: DateTime<Utc>) -> usize {
        let mut loaded = 0;
        for ticket in tickets {
            if ticket.is_expired(now) {
                continue;
            }
            if let Entry::Vacant(slot) = self.tickets.entry(ticket.id.clone()) {
                slot.insert(ticket);
                loaded += 1;
            }
        }

        metrics::set_registry_size(self.tickets.len());
        loaded
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}
