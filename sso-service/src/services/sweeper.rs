use super::error::LogoutError;
use super::logout::LogoutCoordinator;
use super::registry::TicketRegistry;
use super::sessions::SessionManager;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_tickets: usize,
    /// Sessions logged out because their ticket-granting ticket expired.
    pub sessions_logged_out: usize,
    pub sessions_purged: usize,
}

/// Background task that removes expired tickets and times out sessions.
pub struct ExpirationSweeper {
    registry: Arc<TicketRegistry>,
    sessions: Arc<SessionManager>,
    coordinator: Arc<LogoutCoordinator>,
    interval: Duration,
}

impl ExpirationSweeper {
    pub fn new(
        registry: Arc<TicketRegistry>,
        sessions: Arc<SessionManager>,
        coordinator: Arc<LogoutCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            coordinator,
            interval,
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let outcome = self.registry.sweep_expired(now);

        let results = join_all(
            outcome
                .expired_sessions
                .iter()
                .map(|session_id| self.coordinator.logout(session_id)),
        )
        .await;

        let mut sessions_logged_out = 0;
        for (session_id, result) in outcome.expired_sessions.iter().zip(results) {
            match result {
                Ok(report) => {
                    sessions_logged_out += 1;
                    tracing::info!(
                        session_id = %session_id,
                        invalidations = report.invalidations(),
                        "Session timed out"
                    );
                }
                Err(LogoutError::AlreadyLoggedOut(_)) | Err(LogoutError::SessionNotFound(_)) => {
                    tracing::debug!(session_id = %session_id, "Expired session already gone");
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Session timeout logout failed");
                }
            }
        }

        let report = SweepReport {
            removed_tickets: outcome.removed,
            sessions_logged_out,
            sessions_purged: self.sessions.purge_destroyed().await,
        };

        if report != SweepReport::default() {
            tracing::info!(
                removed_tickets = report.removed_tickets,
                sessions_logged_out = report.sessions_logged_out,
                sessions_purged = report.sessions_purged,
                "Expiration sweep complete"
            );
        }

        report
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_seconds = self.interval.as_secs(), "Starting expiration sweeper");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Expiration sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
