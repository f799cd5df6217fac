//! Entry point the outer protocol layer talks to.

use super::error::{LogoutError, RegistryError, ServiceError, StoreError, ValidationError};
use super::logout::{LogoutCoordinator, LogoutReport};
use super::notifier::LogoutNotifier;
use super::registry::TicketRegistry;
use super::sessions::{SessionHandle, SessionManager};
use super::store::{SessionStore, TicketStore};
use super::sweeper::ExpirationSweeper;
use super::validation::ValidationEngine;
use crate::access::AccessFactory;
use crate::config::SsoConfig;
use crate::models::{
    AccessResponseRequest, AccessResponseResult, Ticket, TicketKind, TicketPolicy,
    TokenServiceAccessRequest,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TicketPolicies {
    pub ticket_granting: TicketPolicy,
    pub service: TicketPolicy,
}

/// Result of a primary authentication: the new session and its
/// ticket-granting ticket.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedSession {
    pub session_id: String,
    pub ticket_granting_ticket: Ticket,
}

pub struct SsoService {
    registry: Arc<TicketRegistry>,
    sessions: Arc<SessionManager>,
    engine: ValidationEngine,
    coordinator: Arc<LogoutCoordinator>,
    ticket_store: Arc<dyn TicketStore>,
    policies: TicketPolicies,
    sweep_interval: Duration,
}

impl SsoService {
    pub fn new(
        config: &SsoConfig,
        registry: Arc<TicketRegistry>,
        session_store: Arc<dyn SessionStore>,
        ticket_store: Arc<dyn TicketStore>,
        notifier: Arc<dyn LogoutNotifier>,
    ) -> Self {
        let factory = Arc::new(AccessFactory::from_config(&config.logout, notifier));
        let sessions = Arc::new(SessionManager::new(session_store, factory));
        let engine = ValidationEngine::new(registry.clone(), sessions.clone());
        let coordinator = Arc::new(LogoutCoordinator::new(
            registry.clone(),
            sessions.clone(),
            config.logout.max_concurrency,
        ));

        Self {
            registry,
            sessions,
            engine,
            coordinator,
            ticket_store,
            policies: TicketPolicies {
                ticket_granting: config.tickets.ticket_granting_policy(),
                service: config.tickets.service_policy(),
            },
            sweep_interval: config.registry.sweep_interval(),
        }
    }

    /// Reload the ticket snapshot written by the last shutdown.
    pub async fn restore_tickets(&self) -> Result<usize, StoreError> {
        let tickets = self.ticket_store.load_tickets().await?;
        let loaded = self.registry.restore(tickets, Utc::now());
        tracing::info!(loaded, "Ticket registry restored");
        Ok(loaded)
    }

    /// Open a session for a principal the authentication layer has already
    /// verified.
    pub async fn create_session(
        &self,
        principal: &str,
        attributes: BTreeMap<String, String>,
    ) -> Result<AuthenticatedSession, ServiceError> {
        if principal.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "principal must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let tgt = self.registry.issue(
            &session_id,
            TicketKind::TicketGranting,
            &self.policies.ticket_granting,
            None,
            true,
            now,
        )?;

        let session = Arc::new(SessionHandle::new(
            session_id.clone(),
            principal.to_string(),
            attributes,
            tgt.id.clone(),
            now,
        ));
        self.sessions.insert(session.clone());
        self.sessions.persist(&session).await;

        tracing::info!(session_id = %session_id, principal = %principal, "Session created");

        Ok(AuthenticatedSession {
            session_id,
            ticket_granting_ticket: tgt,
        })
    }

    /// Issue a service ticket for `resource_identifier` from a live
    /// ticket-granting ticket.
    pub async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        resource_identifier: &str,
        from_new_login: bool,
    ) -> Result<Ticket, ServiceError> {
        if resource_identifier.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "resource identifier must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let tgt = self.registry.touch(ticket_granting_ticket_id, now)?;

        let session = self
            .sessions
            .get(&tgt.owner_session_id)
            .await
            .ok_or_else(|| RegistryError::SessionNotFound(tgt.owner_session_id.clone()))?;
        if !session.is_active() {
            return Err(RegistryError::SessionEnded(session.id.clone()).into());
        }

        let ticket = self.registry.issue(
            &session.id,
            TicketKind::Service,
            &self.policies.service,
            Some(resource_identifier.to_string()),
            from_new_login,
            now,
        )?;

        // A logout that began during issue may already have swept the
        // registry for this session.
        if !session.is_active() {
            self.registry.remove(&ticket.id);
            tracing::info!(session_id = %session.id, "Service ticket withdrawn, session is ending");
            return Err(RegistryError::SessionEnded(session.id.clone()).into());
        }

        tracing::info!(
            session_id = %session.id,
            resource = %resource_identifier,
            ticket = %Ticket::log_id(&ticket.id),
            "Service ticket granted"
        );
        Ok(ticket)
    }

    pub async fn validate(
        &self,
        request: &TokenServiceAccessRequest,
        response_request: &AccessResponseRequest,
    ) -> Result<AccessResponseResult, ValidationError> {
        self.engine.validate(request, response_request).await
    }

    pub async fn logout(&self, session_id: &str) -> Result<LogoutReport, LogoutError> {
        self.coordinator.logout(session_id).await
    }

    pub async fn logout_by_ticket_granting_ticket(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> Result<LogoutReport, LogoutError> {
        let ticket = self
            .registry
            .get(ticket_granting_ticket_id)
            .filter(|ticket| ticket.kind == TicketKind::TicketGranting)
            .ok_or_else(|| LogoutError::UnknownTicket(Ticket::log_id(ticket_granting_ticket_id)))?;

        self.coordinator.logout(&ticket.owner_session_id).await
    }

    pub async fn invalidate_grant(
        &self,
        session_id: &str,
        access_id: &str,
    ) -> Result<bool, LogoutError> {
        self.coordinator.invalidate_grant(session_id, access_id).await
    }

    pub fn registry(&self) -> &Arc<TicketRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(
            self.registry.clone(),
            self.sessions.clone(),
            self.coordinator.clone(),
            self.sweep_interval,
        )
    }

    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.sweeper().spawn(shutdown)
    }

    /// Flush the registry to the ticket store.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        let tickets = self.registry.snapshot();
        self.ticket_store.save_tickets(&tickets).await?;
        tracing::info!(tickets = tickets.len(), "Ticket registry flushed");
        Ok(())
    }
}
