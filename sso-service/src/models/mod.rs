pub mod request;
pub mod response;
pub mod session;
pub mod ticket;

pub use request::{AccessResponseRequest, Protocol, TokenServiceAccessRequest};
pub use response::{AccessResponseResult, FailureCode, ResponseStatus};
pub use session::{GrantRecord, SessionRecord};
pub use ticket::{Ticket, TicketKind, TicketPolicy};
