use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, ProductId, ServiceDay, TicketId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    LineItem, Order, Product, Result, StoreError, Ticket,
    store::{CatalogReader, PosStore, UnitOfWork},
};

/// A step at which the in-memory store can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertOrder,
    InsertLineItem,
    DecrementStock,
    InsertTicket,
    UpdateTicket,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    tickets: HashMap<TicketId, Ticket>,
    orders: HashMap<OrderId, Order>,
    line_items: Vec<LineItem>,
}

#[derive(Debug, Default)]
struct Faults {
    armed: HashSet<FailPoint>,
    sequence_conflicts: u32,
    commit_timeouts: u32,
}

/// In-memory store implementation for testing.
///
/// Units of work are serialized by a single lock and operate on a private
/// copy of the data that replaces the shared state on commit, which gives
/// the same all-or-nothing behaviour as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future operation at `point` fail until [`clear_faults`](Self::clear_faults).
    pub fn fail_on(&self, point: FailPoint) {
        self.faults().armed.insert(point);
    }

    /// Makes the next `count` ticket inserts fail with `SequenceConflict`.
    pub fn inject_sequence_conflicts(&self, count: u32) {
        self.faults().sequence_conflicts = count;
    }

    /// Makes the next `count` commits fail with `Timeout`.
    pub fn inject_commit_timeouts(&self, count: u32) {
        self.faults().commit_timeouts = count;
    }

    /// Disarms every injected failure.
    pub fn clear_faults(&self) {
        *self.faults() = Faults::default();
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the number of committed line items.
    pub async fn line_item_count(&self) -> usize {
        self.state.lock().await.line_items.len()
    }

    /// Returns the number of committed tickets.
    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PosStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            staged,
            faults: self.faults.clone(),
        }))
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.lock().await;
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn line_items(&self, order_id: OrderId) -> Result<Vec<LineItem>> {
        let state = self.state.lock().await;
        Ok(items_of(&state, order_id))
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.state.lock().await.tickets.get(&id).cloned())
    }

    async fn tickets_for_day(&self, service_day: ServiceDay) -> Result<Vec<Ticket>> {
        let state = self.state.lock().await;
        let mut tickets: Vec<_> = state
            .tickets
            .values()
            .filter(|t| t.service_day == service_day)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.sequence_number);
        Ok(tickets)
    }
}

fn items_of(state: &MemoryState, order_id: OrderId) -> Vec<LineItem> {
    let mut items: Vec<_> = state
        .line_items
        .iter()
        .filter(|item| item.order_id == order_id)
        .cloned()
        .collect();
    items.sort_by_key(|item| item.line_number);
    items
}

/// Unit of work holding the store lock and a private copy of the data.
struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    faults: Arc<StdMutex<Faults>>,
}

impl MemoryUnitOfWork {
    fn check(&self, point: FailPoint) -> Result<()> {
        let faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if faults.armed.contains(&point) {
            tracing::debug!(?point, "injected storage failure");
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogReader for MemoryUnitOfWork {
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.staged.products.get(&id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn decrement_stock(&mut self, id: ProductId, quantity: u32) -> Result<()> {
        self.check(FailPoint::DecrementStock)?;
        let product = self
            .staged
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Product", id))?;

        product.stock = product
            .stock
            .checked_sub(quantity)
            .ok_or(StoreError::StockConflict { product_id: id })?;
        Ok(())
    }

    async fn restock(&mut self, id: ProductId, quantity: u32) -> Result<bool> {
        match self.staged.products.get_mut(&id) {
            Some(product) => {
                product.stock = product.stock.saturating_add(quantity);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.check(FailPoint::InsertOrder)?;
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<()> {
        self.check(FailPoint::InsertLineItem)?;
        if !self.staged.orders.contains_key(&item.order_id) {
            return Err(StoreError::not_found("Order", item.order_id));
        }
        self.staged.line_items.push(item.clone());
        Ok(())
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn line_items(&mut self, order_id: OrderId) -> Result<Vec<LineItem>> {
        Ok(items_of(&self.staged, order_id))
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let order = self
            .staged
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        order.status = status;
        order.updated_at = updated_at;
        Ok(())
    }

    async fn next_ticket_number(&mut self, service_day: ServiceDay) -> Result<u32> {
        let max = self
            .staged
            .tickets
            .values()
            .filter(|t| t.service_day == service_day)
            .map(|t| t.sequence_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        self.check(FailPoint::InsertTicket)?;
        {
            let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
            if faults.sequence_conflicts > 0 {
                faults.sequence_conflicts -= 1;
                return Err(StoreError::SequenceConflict {
                    service_day: ticket.service_day,
                    sequence_number: ticket.sequence_number,
                });
            }
        }

        // Unique (service_day, sequence_number) constraint simulation
        let taken = self.staged.tickets.values().any(|t| {
            t.service_day == ticket.service_day && t.sequence_number == ticket.sequence_number
        });
        if taken {
            return Err(StoreError::SequenceConflict {
                service_day: ticket.service_day,
                sequence_number: ticket.sequence_number,
            });
        }

        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get_ticket(&mut self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.staged.tickets.get(&id).cloned())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        self.check(FailPoint::UpdateTicket)?;
        match self.staged.tickets.get_mut(&ticket.id) {
            Some(existing) => {
                existing.status = ticket.status;
                existing.called_at = ticket.called_at;
                existing.served_at = ticket.served_at;
                Ok(())
            }
            None => Err(StoreError::not_found("Ticket", ticket.id)),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check(FailPoint::Commit)?;
        {
            let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
            if faults.commit_timeouts > 0 {
                faults.commit_timeouts -= 1;
                return Err(StoreError::Timeout);
            }
        }

        let MemoryUnitOfWork {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
