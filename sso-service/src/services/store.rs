use super::error::StoreError;
use crate::models::{SessionRecord, Ticket};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Persistence for session records. Memory is authoritative while the
/// process runs; the store only lets sessions outlive it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;
    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError>;
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Bulk persistence for the ticket registry, used at startup and shutdown.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn save_tickets(&self, tickets: &[Ticket]) -> Result<(), StoreError>;
    async fn load_tickets(&self) -> Result<Vec<Ticket>, StoreError>;
}

pub struct InMemoryStore {
    pub sessions: Mutex<HashMap<String, SessionRecord>>,
    pub tickets: Mutex<Vec<Ticket>>,
    /// When set, every write fails. Lets callers exercise store outages.
    pub fail_writes: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            tickets: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("store unavailable".to_string()));
        }
        Ok(())
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(format!("In-memory store mutex poisoned: {}", e))
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.lock().map_err(poisoned)?.get(session_id).cloned())
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.sessions
            .lock()
            .map_err(poisoned)?
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.sessions.lock().map_err(poisoned)?.remove(session_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn save_tickets(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.tickets.lock().map_err(poisoned)? = tickets.to_vec();
        Ok(())
    }

    async fn load_tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        Ok(self.tickets.lock().map_err(poisoned)?.clone())
    }
}
