use crate::access::AccessStateError;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use thiserror::Error;

/// Why a presented ticket could not be redeemed. Recoverable: surfaced to the
/// caller as a failed validation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketError {
    #[error("Ticket not found")]
    NotFound,

    #[error("Ticket expired")]
    Expired,

    #[error("Ticket already consumed")]
    AlreadyConsumed,

    #[error("Ticket is not valid for this operation")]
    WrongKind,
}

impl TicketError {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketError::NotFound => "not_found",
            TicketError::Expired => "expired",
            TicketError::AlreadyConsumed => "already_consumed",
            TicketError::WrongKind => "wrong_kind",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Could not generate a unique ticket id after {attempts} attempts")]
    ExhaustedEntropy { attempts: u32 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session has ended: {0}")]
    SessionEnded(String),

    #[error(transparent)]
    Ticket(#[from] TicketError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Internal(String),
}

/// Failure of a validation request as a whole (as opposed to a failed
/// validation, which is an `Ok` result).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    AccessState(#[from] AccessStateError),
}

#[derive(Error, Debug)]
pub enum LogoutError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already logged out: {0}")]
    AlreadyLoggedOut(String),

    #[error("No session owns ticket {0}")]
    UnknownTicket(String),

    #[error("Access {access_id} not found in session {session_id}")]
    GrantNotFound {
        session_id: String,
        access_id: String,
    },
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    AccessState(#[from] AccessStateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Logout(#[from] LogoutError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TicketError> for ServiceError {
    fn from(err: TicketError) -> Self {
        ServiceError::Registry(RegistryError::Ticket(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Registry(RegistryError::Ticket(e)) => {
                AppError::Unauthorized(anyhow::anyhow!(e))
            }
            ServiceError::Registry(RegistryError::SessionNotFound(id)) => {
                AppError::NotFound(anyhow::anyhow!("Session not found: {}", id))
            }
            ServiceError::Registry(RegistryError::SessionEnded(id)) => {
                AppError::Gone(anyhow::anyhow!("Session has ended: {}", id))
            }
            ServiceError::Registry(e @ RegistryError::ExhaustedEntropy { .. }) => {
                AppError::InternalError(anyhow::anyhow!(e))
            }
            ServiceError::AccessState(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::Validation(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::Logout(LogoutError::AlreadyLoggedOut(id)) => {
                AppError::Gone(anyhow::anyhow!("Session already logged out: {}", id))
            }
            ServiceError::Logout(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Store(StoreError::Redis(e)) => AppError::RedisError(e),
            ServiceError::Store(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ServiceError::InvalidRequest(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}
