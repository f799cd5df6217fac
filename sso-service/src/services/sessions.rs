//! Live SSO sessions and their grants.

use super::store::SessionStore;
use crate::access::{Access, AccessFactory, AccessStateError, ValidationState};
use crate::models::{SessionRecord, TokenServiceAccessRequest};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outcome of [`SessionHandle::redeem`].
pub struct Redemption {
    pub access: Arc<dyn Access>,
    /// The session already held a grant for this ticket.
    pub revalidation: bool,
    pub state: Result<ValidationState, AccessStateError>,
}

/// One authenticated SSO session. Owns its grants in creation order.
pub struct SessionHandle {
    pub id: String,
    pub principal: String,
    pub attributes: BTreeMap<String, String>,
    pub ticket_granting_ticket_id: String,
    pub created_at: DateTime<Utc>,
    grants: Mutex<Vec<Arc<dyn Access>>>,
    terminating: AtomicBool,
    destroyed_at: Mutex<Option<DateTime<Utc>>>,
}

impl SessionHandle {
    pub fn new(
        id: String,
        principal: String,
        attributes: BTreeMap<String, String>,
        ticket_granting_ticket_id: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            principal,
            attributes,
            ticket_granting_ticket_id,
            created_at,
            grants: Mutex::new(Vec::new()),
            terminating: AtomicBool::new(false),
            destroyed_at: Mutex::new(None),
        }
    }

    /// Rebuild a session and its grants from a stored record.
    pub fn from_record(record: SessionRecord, factory: &AccessFactory) -> Self {
        let grants: Vec<Arc<dyn Access>> = record
            .grants
            .iter()
            .map(|grant| factory.restore(grant, &record.principal, &record.attributes))
            .collect();
        let destroyed = record.destroyed_at.is_some();

        Self {
            id: record.session_id,
            principal: record.principal,
            attributes: record.attributes,
            ticket_granting_ticket_id: record.ticket_granting_ticket_id,
            created_at: record.created_at,
            grants: Mutex::new(grants),
            terminating: AtomicBool::new(destroyed),
            destroyed_at: Mutex::new(record.destroyed_at),
        }
    }

    fn lock_grants(&self) -> MutexGuard<'_, Vec<Arc<dyn Access>>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grants in creation order.
    pub fn grants(&self) -> Vec<Arc<dyn Access>> {
        self.lock_grants().clone()
    }

    pub fn grant(&self, access_id: &str) -> Option<Arc<dyn Access>> {
        self.lock_grants()
            .iter()
            .find(|grant| grant.id() == access_id)
            .cloned()
    }

    pub fn grant_for_ticket(&self, ticket_id: &str) -> Option<Arc<dyn Access>> {
        self.lock_grants()
            .iter()
            .find(|grant| grant.ticket_id() == ticket_id)
            .cloned()
    }

    /// Append a grant. Refused once a logout walk has started, so a walk
    /// never misses a grant.
    pub fn attach(&self, access: Arc<dyn Access>) -> bool {
        let mut grants = self.lock_grants();
        if self.terminating.load(Ordering::SeqCst) {
            return false;
        }
        grants.push(access);
        true
    }

    /// Validate `request` against the grant held for `ticket_id`, or against a
    /// fresh one from `create`. Lookup, validation and attach share one lock,
    /// so concurrent redemptions of a ticket end up on the same grant. A fresh
    /// grant is kept only when it validated and requires storage.
    ///
    /// `None` once a logout walk has started.
    pub fn redeem<F>(
        &self,
        ticket_id: &str,
        request: &TokenServiceAccessRequest,
        create: F,
    ) -> Option<Redemption>
    where
        F: FnOnce() -> Arc<dyn Access>,
    {
        let mut grants = self.lock_grants();
        if self.terminating.load(Ordering::SeqCst) {
            return None;
        }

        if let Some(existing) = grants.iter().find(|grant| grant.ticket_id() == ticket_id) {
            let access = existing.clone();
            let state = access.validate(request);
            return Some(Redemption {
                access,
                revalidation: true,
                state,
            });
        }

        let access = create();
        let state = access.validate(request);
        if state == Ok(ValidationState::Validated) && access.requires_storage() {
            grants.push(access.clone());
        }

        Some(Redemption {
            access,
            revalidation: false,
            state,
        })
    }

    /// Claim the single logout walk for this session.
    pub fn begin_logout(&self) -> bool {
        self.terminating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn mark_destroyed(&self, at: DateTime<Utc>) {
        self.terminating.store(true, Ordering::SeqCst);
        let mut destroyed_at = self.destroyed_at.lock().unwrap_or_else(PoisonError::into_inner);
        destroyed_at.get_or_insert(at);
    }

    pub fn destroyed_at(&self) -> Option<DateTime<Utc>> {
        *self.destroyed_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at().is_some()
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// May still issue tickets and accept grants.
    pub fn is_active(&self) -> bool {
        !self.is_terminating() && !self.is_destroyed()
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.id.clone(),
            principal: self.principal.clone(),
            attributes: self.attributes.clone(),
            ticket_granting_ticket_id: self.ticket_granting_ticket_id.clone(),
            created_at: self.created_at,
            destroyed_at: self.destroyed_at(),
            grants: self.lock_grants().iter().map(|grant| grant.record()).collect(),
        }
    }
}

/// In-memory session table backed by a [`SessionStore`]. Memory wins while
/// the process runs; the store is read only on a miss.
pub struct SessionManager {
    sessions: DashMap<String, Arc<SessionHandle>>,
    store: Arc<dyn SessionStore>,
    factory: Arc<AccessFactory>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, factory: Arc<AccessFactory>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            factory,
        }
    }

    pub fn factory(&self) -> &AccessFactory {
        &self.factory
    }

    pub fn insert(&self, session: Arc<SessionHandle>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        if let Some(session) = self.sessions.get(session_id) {
            return Some(session.value().clone());
        }

        let record = match self.store.load_session(session_id).await {
            Ok(record) => record?,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to load session from store");
                return None;
            }
        };

        tracing::debug!(session_id = %session_id, grants = record.grants.len(), "Session rehydrated from store");
        let restored = Arc::new(SessionHandle::from_record(record, &self.factory));

        // Another caller may have rehydrated the same session meanwhile.
        Some(
            self.sessions
                .entry(session_id.to_string())
                .or_insert(restored)
                .value()
                .clone(),
        )
    }

    /// Write the session to the store. Failures are logged, never returned.
    pub async fn persist(&self, session: &SessionHandle) {
        if let Err(e) = self.store.save_session(&session.record()).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to persist session");
        }
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await.is_ok()
    }

    /// Drop destroyed sessions from memory and delete their stored records.
    /// A failed delete is logged; the session still leaves memory.
    pub async fn purge_destroyed(&self) -> usize {
        let destroyed: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_destroyed())
            .map(|entry| entry.key().clone())
            .collect();

        let mut purged = 0;
        for session_id in destroyed {
            if self
                .sessions
                .remove_if(&session_id, |_, session| session.is_destroyed())
                .is_none()
            {
                continue;
            }
            purged += 1;

            if let Err(e) = self.store.delete_session(&session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to delete session from store");
            }
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ValidationState;
    use crate::models::{Protocol, Ticket, TicketKind, TicketPolicy, TokenServiceAccessRequest};
    use crate::services::notifier::MockLogoutNotifier;
    use crate::services::store::InMemoryStore;
    use std::time::Duration;

    fn factory() -> Arc<AccessFactory> {
        Arc::new(AccessFactory::new(
            Arc::new(MockLogoutNotifier::accepting()),
            true,
            Duration::from_millis(100),
        ))
    }

    fn session(id: &str) -> Arc<SessionHandle> {
        Arc::new(SessionHandle::new(
            id.to_string(),
            "alice".to_string(),
            BTreeMap::from([("mail".to_string(), "alice@example.com".to_string())]),
            "TGT-1-abc".to_string(),
            Utc::now(),
        ))
    }

    fn grant(factory: &AccessFactory, ticket_id: &str) -> Arc<dyn Access> {
        let ticket = Ticket::new(
            ticket_id.to_string(),
            TicketKind::Service,
            "session-1".to_string(),
            Some("https://app.example.com/".to_string()),
            TicketPolicy::service(300, 1),
            false,
            Utc::now(),
        );
        let access = factory.create(Protocol::Cas, &ticket, "alice", &BTreeMap::new(), "/");
        access
            .validate(&TokenServiceAccessRequest::new(
                "https://app.example.com/",
                ticket_id,
                Protocol::Cas,
            ))
            .unwrap();
        access
    }

    #[test]
    fn test_attach_refused_after_logout_begins() {
        let factory = factory();
        let session = session("session-1");

        assert!(session.attach(grant(&factory, "ST-1")));
        assert!(session.begin_logout());
        assert!(!session.begin_logout());
        assert!(!session.attach(grant(&factory, "ST-2")));
        assert_eq!(session.grants().len(), 1);
        assert!(!session.is_active());
    }

    fn self_contained(factory: &AccessFactory, ticket_id: &str) -> Arc<dyn Access> {
        let mut ticket = Ticket::new(
            ticket_id.to_string(),
            TicketKind::Service,
            "session-1".to_string(),
            Some("https://api.example.com/".to_string()),
            TicketPolicy::service(300, 3),
            false,
            Utc::now(),
        );
        ticket.record_use(Utc::now());
        factory.create(Protocol::SelfContained, &ticket, "alice", &BTreeMap::new(), "/")
    }

    #[test]
    fn test_redeem_reuses_grant_for_same_ticket() {
        let factory = factory();
        let session = session("session-1");
        let request =
            TokenServiceAccessRequest::new("https://api.example.com/", "ST-4", Protocol::SelfContained);

        let first = session
            .redeem("ST-4", &request, || self_contained(&factory, "ST-4"))
            .unwrap();
        assert!(!first.revalidation);
        assert_eq!(first.state, Ok(ValidationState::Validated));

        let second = session
            .redeem("ST-4", &request, || panic!("grant should be reused"))
            .unwrap();
        assert!(second.revalidation);
        assert_eq!(second.access.id(), first.access.id());
        assert_eq!(session.grants().len(), 1);
    }

    #[test]
    fn test_redeem_keeps_only_validated_grants() {
        let factory = factory();
        let session = session("session-1");
        let wrong_resource =
            TokenServiceAccessRequest::new("https://evil.example.com/", "ST-5", Protocol::SelfContained);

        let redemption = session
            .redeem("ST-5", &wrong_resource, || self_contained(&factory, "ST-5"))
            .unwrap();
        assert_eq!(redemption.state, Ok(ValidationState::Failed));
        assert!(session.grants().is_empty());
    }

    #[test]
    fn test_redeem_refused_after_logout_begins() {
        let factory = factory();
        let session = session("session-1");
        let request =
            TokenServiceAccessRequest::new("https://api.example.com/", "ST-6", Protocol::SelfContained);
        assert!(session.begin_logout());

        assert!(session
            .redeem("ST-6", &request, || self_contained(&factory, "ST-6"))
            .is_none());
        assert!(session.grants().is_empty());
    }

    #[test]
    fn test_grant_lookup() {
        let factory = factory();
        let session = session("session-1");
        let access = grant(&factory, "ST-7");
        session.attach(access.clone());

        assert_eq!(session.grant_for_ticket("ST-7").unwrap().id(), access.id());
        assert!(session.grant(access.id()).is_some());
        assert!(session.grant("missing").is_none());
    }

    #[tokio::test]
    async fn test_rehydrates_from_store() {
        let factory = factory();
        let store = Arc::new(InMemoryStore::new());
        let original = session("session-1");
        original.attach(grant(&factory, "ST-9"));
        store.save_session(&original.record()).await.unwrap();

        let manager = SessionManager::new(store, factory);
        assert!(manager.is_empty());

        let restored = manager.get("session-1").await.unwrap();
        assert_eq!(restored.principal, "alice");
        assert_eq!(restored.attributes.get("mail").unwrap(), "alice@example.com");

        let grants = restored.grants();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].state(), ValidationState::Validated);
        assert_eq!(grants[0].ticket_id(), "ST-9");
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_destroyed_deletes_stored_record() {
        let store = Arc::new(InMemoryStore::new());
        let manager = SessionManager::new(store.clone(), factory());
        let live = session("live");
        let ended = session("ended");
        manager.insert(live.clone());
        manager.insert(ended.clone());
        manager.persist(&live).await;
        manager.persist(&ended).await;

        ended.mark_destroyed(Utc::now());
        manager.persist(&ended).await;
        assert_eq!(store.session_count(), 2);

        assert_eq!(manager.purge_destroyed().await, 1);
        assert_eq!(store.session_count(), 1);
        assert!(manager.get("live").await.is_some());
        assert!(manager.get("ended").await.is_none());
        assert_eq!(manager.purge_destroyed().await, 0);
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_writes.store(true, Ordering::SeqCst);
        let manager = SessionManager::new(store.clone(), factory());

        manager.persist(&session("session-1")).await;
        assert_eq!(store.session_count(), 0);
    }
}
