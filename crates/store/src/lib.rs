//! Transactional storage for the POS engine.
//!
//! The [`PosStore`] trait is the persistence seam. Every multi-row write
//! happens inside a [`UnitOfWork`], which either commits all of its changes
//! or none of them. Two implementations are provided:
//! - [`InMemoryStore`] for tests and local development
//! - [`PostgresStore`] backed by `sqlx`

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::{FailPoint, InMemoryStore};
pub use postgres::PostgresStore;
pub use records::{LineItem, Order, OrderDetails, Product, Ticket};
pub use store::{CatalogReader, PosStore, PosStoreExt, UnitOfWork};
