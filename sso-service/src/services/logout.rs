use super::error::LogoutError;
use super::metrics;
use super::registry::TicketRegistry;
use super::sessions::SessionManager;
use crate::access::Access;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationOutcome {
    /// The resource confirmed its local session is gone.
    ConfirmedDestroyed,
    /// Invalidation attempted; teardown refused, failed or timed out.
    NotConfirmed,
    /// Local session was already destroyed before this walk.
    AlreadyDestroyed,
    /// Grant does not take part in logout.
    Skipped,
}

impl InvalidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationOutcome::ConfirmedDestroyed => "confirmed_destroyed",
            InvalidationOutcome::NotConfirmed => "not_confirmed",
            InvalidationOutcome::AlreadyDestroyed => "already_destroyed",
            InvalidationOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    pub access_id: String,
    pub resource_identifier: String,
    pub outcome: InvalidationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutReport {
    pub session_id: String,
    pub confirmed_destroyed: usize,
    pub not_confirmed: usize,
    pub already_destroyed: usize,
    pub skipped: usize,
    /// One entry per grant, in creation order.
    pub outcomes: Vec<GrantOutcome>,
}

impl LogoutReport {
    fn new(session_id: &str, outcomes: Vec<GrantOutcome>) -> Self {
        let count = |wanted: InvalidationOutcome| {
            outcomes.iter().filter(|o| o.outcome == wanted).count()
        };

        Self {
            session_id: session_id.to_string(),
            confirmed_destroyed: count(InvalidationOutcome::ConfirmedDestroyed),
            not_confirmed: count(InvalidationOutcome::NotConfirmed),
            already_destroyed: count(InvalidationOutcome::AlreadyDestroyed),
            skipped: count(InvalidationOutcome::Skipped),
            outcomes,
        }
    }

    /// Grants that took part in logout, i.e. every grant that requires storage.
    pub fn invalidations(&self) -> usize {
        self.confirmed_destroyed + self.not_confirmed + self.already_destroyed
    }
}

/// Walks a session's grants on logout.
pub struct LogoutCoordinator {
    registry: Arc<TicketRegistry>,
    sessions: Arc<SessionManager>,
    max_concurrency: usize,
}

impl LogoutCoordinator {
    pub fn new(
        registry: Arc<TicketRegistry>,
        sessions: Arc<SessionManager>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            sessions,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// End a session: stop ticket issuance, invalidate every grant that
    /// takes part in logout, then mark the session destroyed. One failing
    /// grant never aborts the walk.
    #[instrument(skip(self))]
    pub async fn logout(&self, session_id: &str) -> Result<LogoutReport, LogoutError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| LogoutError::SessionNotFound(session_id.to_string()))?;

        if session.is_destroyed() || !session.begin_logout() {
            return Err(LogoutError::AlreadyLoggedOut(session_id.to_string()));
        }

        let removed_tickets = self.registry.remove_for_session(session_id);
        let grants = session.grants();
        tracing::info!(
            grants = grants.len(),
            removed_tickets,
            "Logout started"
        );

        // Owned, boxed futures keep the walk `Send` for spawned callers.
        // `buffered` keeps results in creation order while running up to
        // `max_concurrency` invalidations at once.
        let invalidations: Vec<BoxFuture<'static, GrantOutcome>> = grants
            .into_iter()
            .map(|grant| invalidate_one(grant).boxed())
            .collect();
        let outcomes: Vec<GrantOutcome> = stream::iter(invalidations)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        session.mark_destroyed(Utc::now());
        self.sessions.persist(&session).await;

        let report = LogoutReport::new(session_id, outcomes);
        tracing::info!(
            confirmed_destroyed = report.confirmed_destroyed,
            not_confirmed = report.not_confirmed,
            already_destroyed = report.already_destroyed,
            skipped = report.skipped,
            "Logout complete"
        );

        Ok(report)
    }

    /// Invalidate a single grant without ending its session.
    #[instrument(skip(self))]
    pub async fn invalidate_grant(
        &self,
        session_id: &str,
        access_id: &str,
    ) -> Result<bool, LogoutError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| LogoutError::SessionNotFound(session_id.to_string()))?;

        let grant = session
            .grant(access_id)
            .ok_or_else(|| LogoutError::GrantNotFound {
                session_id: session_id.to_string(),
                access_id: access_id.to_string(),
            })?;

        let destroyed = grant.invalidate().await;
        self.sessions.persist(&session).await;

        tracing::info!(destroyed, "Grant invalidated");
        Ok(destroyed)
    }
}

async fn invalidate_one(grant: Arc<dyn Access>) -> GrantOutcome {
    let outcome = if !grant.requires_storage() {
        InvalidationOutcome::Skipped
    } else if grant.is_local_session_destroyed() {
        InvalidationOutcome::AlreadyDestroyed
    } else if grant.invalidate().await {
        InvalidationOutcome::ConfirmedDestroyed
    } else {
        InvalidationOutcome::NotConfirmed
    };

    metrics::record_logout_invalidation(outcome.as_str());
    tracing::debug!(
        access_id = %grant.id(),
        resource = %grant.resource_identifier(),
        outcome = outcome.as_str(),
        "Grant processed"
    );

    GrantOutcome {
        access_id: grant.id().to_string(),
        resource_identifier: grant.resource_identifier().to_string(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessFactory, ValidationState};
    use crate::models::{Protocol, Ticket, TicketKind, TicketPolicy, TokenServiceAccessRequest};
    use crate::services::id_generator::TicketIdGenerator;
    use crate::services::notifier::MockLogoutNotifier;
    use crate::services::sessions::SessionHandle;
    use crate::services::store::InMemoryStore;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<TicketRegistry>,
        sessions: Arc<SessionManager>,
        notifier: Arc<MockLogoutNotifier>,
        coordinator: LogoutCoordinator,
    }

    fn fixture() -> Fixture {
        let notifier = Arc::new(MockLogoutNotifier::accepting());
        let factory = Arc::new(AccessFactory::new(
            notifier.clone(),
            true,
            Duration::from_millis(200),
        ));
        let registry = Arc::new(TicketRegistry::new(
            Box::new(TicketIdGenerator::default()),
            3,
        ));
        let sessions = Arc::new(SessionManager::new(Arc::new(InMemoryStore::new()), factory));
        let coordinator = LogoutCoordinator::new(registry.clone(), sessions.clone(), 4);
        Fixture {
            registry,
            sessions,
            notifier,
            coordinator,
        }
    }

    fn add_session(f: &Fixture, id: &str) -> Arc<SessionHandle> {
        let session = Arc::new(SessionHandle::new(
            id.to_string(),
            "alice".to_string(),
            BTreeMap::new(),
            format!("TGT-{}", id),
            Utc::now(),
        ));
        f.sessions.insert(session.clone());
        session
    }

    fn add_grant(
        f: &Fixture,
        session: &SessionHandle,
        protocol: Protocol,
        resource: &str,
    ) -> Arc<dyn Access> {
        let ticket = f
            .registry
            .issue(
                &session.id,
                TicketKind::Service,
                &TicketPolicy::service(300, 1),
                Some(resource.to_string()),
                false,
                Utc::now(),
            )
            .unwrap();
        let ticket = f
            .registry
            .validate_and_consume(&ticket.id, Utc::now())
            .unwrap();
        let access = f.sessions.factory().create(
            protocol,
            &ticket,
            &session.principal,
            &session.attributes,
            resource,
        );
        access
            .validate(&TokenServiceAccessRequest::new(resource, &ticket.id, protocol))
            .unwrap();
        assert!(session.attach(access.clone()));
        access
    }

    #[tokio::test]
    async fn test_logout_counts_mixed_outcomes() {
        let f = fixture();
        let session = add_session(&f, "s1");
        add_grant(&f, &session, Protocol::Cas, "https://a.example.com/");
        add_grant(&f, &session, Protocol::Saml, "https://b.example.com/");
        add_grant(&f, &session, Protocol::SelfContained, "https://c.example.com/");
        add_grant(&f, &session, Protocol::Cas, "https://d.example.com/");
        f.notifier.refuse("https://b.example.com/");

        let report = f.coordinator.logout("s1").await.unwrap();

        assert_eq!(report.confirmed_destroyed, 2);
        assert_eq!(report.not_confirmed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.invalidations(), 3);
        assert_eq!(f.notifier.call_count(), 3);
        assert_eq!(
            report
                .outcomes
                .iter()
                .map(|o| o.resource_identifier.as_str())
                .collect::<Vec<_>>(),
            vec![
                "https://a.example.com/",
                "https://b.example.com/",
                "https://c.example.com/",
                "https://d.example.com/"
            ]
        );
        assert!(session.is_destroyed());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_grants_are_never_invalidated() {
        let f = fixture();
        let session = add_session(&f, "s1");
        let token = add_grant(&f, &session, Protocol::SelfContained, "https://c.example.com/");

        let report = f.coordinator.logout("s1").await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.invalidations(), 0);
        assert_eq!(token.state(), ValidationState::Validated);
    }

    #[tokio::test]
    async fn test_logout_runs_on_spawned_task() {
        let f = fixture();
        let session = add_session(&f, "s1");
        add_grant(&f, &session, Protocol::Cas, "https://a.example.com/");
        add_grant(&f, &session, Protocol::Saml, "https://b.example.com/");
        let coordinator = Arc::new(LogoutCoordinator::new(
            f.registry.clone(),
            f.sessions.clone(),
            4,
        ));

        let report = tokio::spawn(async move { coordinator.logout("s1").await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.confirmed_destroyed, 2);
        assert!(session.is_destroyed());
    }

    #[tokio::test]
    async fn test_second_logout_rejected() {
        let f = fixture();
        add_session(&f, "s1");

        f.coordinator.logout("s1").await.unwrap();
        assert!(matches!(
            f.coordinator.logout("s1").await,
            Err(LogoutError::AlreadyLoggedOut(_))
        ));
        assert!(matches!(
            f.coordinator.logout("nope").await,
            Err(LogoutError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_individually_invalidated_grant_counts_as_already_destroyed() {
        let f = fixture();
        let session = add_session(&f, "s1");
        let access = add_grant(&f, &session, Protocol::Cas, "https://a.example.com/");

        assert!(f.coordinator.invalidate_grant("s1", access.id()).await.unwrap());
        assert!(session.is_active());

        let report = f.coordinator.logout("s1").await.unwrap();
        assert_eq!(report.already_destroyed, 1);
        assert_eq!(f.notifier.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_grant() {
        let f = fixture();
        add_session(&f, "s1");
        assert!(matches!(
            f.coordinator.invalidate_grant("s1", "missing").await,
            Err(LogoutError::GrantNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_resource_does_not_block_others() {
        let notifier = Arc::new(MockLogoutNotifier::accepting().with_delay(Duration::from_secs(5)));
        let factory = Arc::new(AccessFactory::new(
            notifier.clone(),
            true,
            Duration::from_millis(50),
        ));
        let registry = Arc::new(TicketRegistry::new(
            Box::new(TicketIdGenerator::default()),
            3,
        ));
        let sessions = Arc::new(SessionManager::new(Arc::new(InMemoryStore::new()), factory));
        let f = Fixture {
            coordinator: LogoutCoordinator::new(registry.clone(), sessions.clone(), 2),
            registry,
            sessions,
            notifier,
        };
        let session = add_session(&f, "s1");
        for i in 0..4 {
            add_grant(&f, &session, Protocol::Cas, &format!("https://r{}.example.com/", i));
        }

        let started = std::time::Instant::now();
        let report = f.coordinator.logout("s1").await.unwrap();

        assert_eq!(report.not_confirmed, 4);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
