use super::error::ValidationError;
use super::registry::TicketRegistry;
use super::sessions::SessionManager;
use crate::access::{Access, AccessStateError, RevalidationPolicy, ValidationState};
use crate::models::{
    AccessResponseRequest, AccessResponseResult, FailureCode, Ticket, TicketKind,
    TokenServiceAccessRequest,
};
use crate::services::error::TicketError;
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Turns a presented service ticket into an access decision.
///
/// Protocol-agnostic: everything protocol specific happens behind
/// [`Access`].
pub struct ValidationEngine {
    registry: Arc<TicketRegistry>,
    sessions: Arc<SessionManager>,
}

impl ValidationEngine {
    pub fn new(registry: Arc<TicketRegistry>, sessions: Arc<SessionManager>) -> Self {
        Self { registry, sessions }
    }

    /// Validate `request`. Anything a client can trigger, from a rejected
    /// ticket to a refused repeat redemption, is an `Ok` failure result; only
    /// an out-of-sequence grant call is an `Err`.
    #[instrument(
        skip(self, request, response_request),
        fields(
            resource = %request.resource_identifier,
            protocol = request.protocol.as_str(),
            ticket = %Ticket::log_id(&request.token),
            access_id
        )
    )]
    pub async fn validate(
        &self,
        request: &TokenServiceAccessRequest,
        response_request: &AccessResponseRequest,
    ) -> Result<AccessResponseResult, ValidationError> {
        let resource = request.resource_identifier.as_str();

        let ticket = match self.registry.validate_and_consume_as(
            &request.token,
            TicketKind::Service,
            Utc::now(),
        ) {
            Ok(ticket) => ticket,
            Err(reason) => return Ok(AccessResponseResult::ticket_failure(resource, reason)),
        };

        let session = match self.sessions.get(&ticket.owner_session_id).await {
            Some(session) => session,
            None => {
                tracing::warn!(
                    session_id = %ticket.owner_session_id,
                    "Ticket refers to an unknown session"
                );
                return Ok(AccessResponseResult::ticket_failure(
                    resource,
                    TicketError::NotFound,
                ));
            }
        };

        if !session.is_active() {
            tracing::info!(session_id = %session.id, "Ticket presented for an ended session");
            return Ok(AccessResponseResult::failure(
                resource,
                None,
                FailureCode::SessionEnded,
            ));
        }

        let factory = self.sessions.factory();
        if matches!(ticket.redemptions(), Some(spent) if spent > 1)
            && factory.revalidation_policy(request.protocol) == RevalidationPolicy::Reject
        {
            tracing::info!(
                redemptions = ticket.redemptions(),
                "Repeat redemption refused for a single-validation protocol"
            );
            return Ok(AccessResponseResult::failure(
                resource,
                None,
                FailureCode::RevalidationRejected,
            ));
        }

        let redemption = match session.redeem(&ticket.id, request, || {
            factory.create(
                request.protocol,
                &ticket,
                &session.principal,
                &session.attributes,
                resource,
            )
        }) {
            Some(redemption) => redemption,
            None => {
                // Logout started between the activity check and here.
                tracing::info!(session_id = %session.id, "Grant refused by an ending session");
                return Ok(AccessResponseResult::failure(
                    resource,
                    None,
                    FailureCode::SessionEnded,
                ));
            }
        };
        let access = redemption.access;
        tracing::Span::current().record("access_id", access.id());

        let state = match redemption.state {
            Ok(state) => state,
            Err(AccessStateError::AlreadyValidated { .. }) => {
                return Ok(AccessResponseResult::failure(
                    resource,
                    Some(access.id()),
                    FailureCode::RevalidationRejected,
                ));
            }
            Err(AccessStateError::Invalidated { .. }) => {
                return Ok(AccessResponseResult::failure(
                    resource,
                    Some(access.id()),
                    FailureCode::AccessInvalidated,
                ));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            state = state.as_str(),
            revalidation = redemption.revalidation,
            "Access validated"
        );

        if state == ValidationState::Validated && access.requires_storage() {
            self.sessions.persist(&session).await;
        }

        Ok(access.generate_response(response_request)?)
    }
}
