//! Shared types for the POS engine.
//!
//! Everything here is a plain value type used by both the storage layer and
//! the domain layer: identifiers, money, the service day, and the status
//! enums together with their transition tables.

pub mod ids;
pub mod money;
pub mod service_day;
pub mod status;

pub use ids::{LineItemId, OrderId, ProductId, TicketId, UserId};
pub use money::Money;
pub use service_day::ServiceDay;
pub use status::{OrderStatus, PaymentMethod, TicketStatus, UnknownStatus};
