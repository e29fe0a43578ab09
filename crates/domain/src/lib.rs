//! Domain layer for the POS engine.
//!
//! This crate provides:
//! - Order admission: cart validation, pricing and stock decrements in one unit of work
//! - The order status machine, with optional restocking on cancellation
//! - Daily queue ticket sequencing and the ticket status machine
//! - [`PosEngine`], a facade over both services

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod order;
pub mod ticket;
mod unit_of_work;

pub use clock::{Clock, ManualClock, ServiceCalendar, SystemClock};
pub use config::{EngineConfig, TransitionPolicy};
pub use engine::PosEngine;
pub use error::{DomainError, ErrorKind, Result};
pub use order::{
    LineRequest, MAX_LINE_QUANTITY, OrderBuilder, OrderError, OrderRequest, OrderService,
    StagedOrder,
};
pub use ticket::{TicketService, current_of};
