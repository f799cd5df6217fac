pub mod error;
pub mod id_generator;
pub mod logout;
pub mod metrics;
pub mod notifier;
pub mod redis;
pub mod registry;
pub mod sessions;
pub mod sso;
pub mod store;
pub mod sweeper;
pub mod validation;

pub use error::{
    LogoutError, RegistryError, ServiceError, StoreError, TicketError, ValidationError,
};
pub use id_generator::{IdGenerator, TicketIdGenerator};
pub use logout::{GrantOutcome, InvalidationOutcome, LogoutCoordinator, LogoutReport};
pub use notifier::{
    HttpLogoutNotifier, LogoutNotice, LogoutNotifier, MockLogoutNotifier, NotifyError,
};
pub use self::redis::RedisStore;
pub use registry::{SweepOutcome, TicketRegistry};
pub use sessions::{Redemption, SessionHandle, SessionManager};
pub use sso::{AuthenticatedSession, SsoService, TicketPolicies};
pub use store::{InMemoryStore, SessionStore, TicketStore};
pub use sweeper::{ExpirationSweeper, SweepReport};
pub use validation::ValidationEngine;
