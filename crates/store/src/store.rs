use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, ProductId, ServiceDay, TicketId};

use crate::{LineItem, Order, OrderDetails, Product, Result, Ticket};

/// Read access to the product catalog.
///
/// Implemented by every [`UnitOfWork`]: a read through a unit of work sees
/// the latest committed row and, where the backend supports it, locks it
/// until the unit of work ends.
#[async_trait]
pub trait CatalogReader: Send {
    /// Returns the product, or `None` if it does not exist.
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>>;
}

/// A single storage transaction.
///
/// Nothing written through a unit of work is visible to anyone else until
/// [`commit`](UnitOfWork::commit) succeeds. Dropping a unit of work without
/// committing discards every change.
#[async_trait]
pub trait UnitOfWork: CatalogReader {
    /// Removes `quantity` units from a product's stock.
    ///
    /// Fails with `StockConflict` rather than letting stock go negative.
    async fn decrement_stock(&mut self, id: ProductId, quantity: u32) -> Result<()>;

    /// Adds `quantity` units back to a product's stock.
    ///
    /// Returns false if the product no longer exists.
    async fn restock(&mut self, id: ProductId, quantity: u32) -> Result<bool>;

    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<()>;

    /// Reads an order for update.
    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Returns an order's line items in line-number order.
    async fn line_items(&mut self, order_id: OrderId) -> Result<Vec<LineItem>>;

    async fn update_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Reserves the next ticket number for a service day.
    ///
    /// Concurrent units of work asking for the same day are serialized until
    /// one of them ends.
    async fn next_ticket_number(&mut self, service_day: ServiceDay) -> Result<u32>;

    /// Inserts a ticket.
    ///
    /// Fails with `SequenceConflict` if the number is already taken for the
    /// ticket's service day.
    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()>;

    /// Reads a ticket for update.
    async fn get_ticket(&mut self, id: TicketId) -> Result<Option<Ticket>>;

    /// Persists a ticket's status and timestamps.
    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()>;

    /// Makes every change visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every change.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Core trait for store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait PosStore: Send + Sync {
    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Reads the latest committed state of a product.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts or replaces a product.
    ///
    /// Catalog administration lives outside the engine; this exists so
    /// products can be seeded and edited.
    async fn save_product(&self, product: &Product) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns an order's line items in line-number order.
    async fn line_items(&self, order_id: OrderId) -> Result<Vec<LineItem>>;

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>>;

    /// Returns all tickets of a service day ordered by sequence number.
    async fn tickets_for_day(&self, service_day: ServiceDay) -> Result<Vec<Ticket>>;
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait PosStoreExt: PosStore {
    /// Loads an order together with its line items.
    async fn order_details(&self, id: OrderId) -> Result<Option<OrderDetails>> {
        match self.get_order(id).await? {
            Some(order) => {
                let items = self.line_items(id).await?;
                Ok(Some(OrderDetails { order, items }))
            }
            None => Ok(None),
        }
    }
}

// Blanket implementation for all PosStore implementations
impl<T: PosStore + ?Sized> PosStoreExt for T {}
