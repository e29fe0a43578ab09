//! Single entry point over the order and ticket services.

use std::sync::Arc;

use common::{OrderId, OrderStatus, ProductId, ServiceDay, TicketId, TicketStatus};
use store::{Order, OrderDetails, PosStore, PostgresStore, Product, Ticket};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::order::{OrderRequest, OrderService};
use crate::ticket::TicketService;

/// The order admission and queue ticketing engine.
///
/// Cheap to share behind an `Arc`; every operation is safe to call
/// concurrently.
pub struct PosEngine<S: PosStore + Clone> {
    store: S,
    orders: OrderService<S>,
    tickets: TicketService<S>,
}

impl<S: PosStore + Clone> PosEngine<S> {
    /// Creates an engine with default settings and the system clock.
    pub fn new(store: S) -> Self {
        Self::with_config(store, &EngineConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(store: S, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        tracing::debug!(
            policy = %config.transition_policy,
            restock_on_cancel = config.restock_on_cancel,
            "building engine"
        );
        Self {
            orders: OrderService::with_config(store.clone(), config, clock.clone()),
            tickets: TicketService::with_config(store.clone(), config, clock),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn tickets(&self) -> &TicketService<S> {
        &self.tickets
    }

    // Catalog pass-through

    /// Reads the latest committed state of a product.
    pub async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.store.get_product(product_id).await?)
    }

    /// Inserts or replaces a catalog product.
    pub async fn save_product(&self, product: &Product) -> Result<()> {
        Ok(self.store.save_product(product).await?)
    }

    // Orders

    pub async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        self.orders.place_order(request).await
    }

    pub async fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        self.orders.set_order_status(order_id, status).await
    }

    /// Like [`set_order_status`](Self::set_order_status), taking the status by name.
    pub async fn set_order_status_named(&self, order_id: OrderId, status: &str) -> Result<Order> {
        let status: OrderStatus = status.parse()?;
        self.orders.set_order_status(order_id, status).await
    }

    pub async fn get_order_details(&self, order_id: OrderId) -> Result<OrderDetails> {
        self.orders.get_order_details(order_id).await
    }

    // Tickets

    pub async fn issue_ticket(
        &self,
        service_day: ServiceDay,
        customer_name: Option<&str>,
    ) -> Result<Ticket> {
        self.tickets.issue_ticket(service_day, customer_name).await
    }

    pub async fn issue_ticket_now(&self, customer_name: Option<&str>) -> Result<Ticket> {
        self.tickets.issue_ticket_now(customer_name).await
    }

    pub async fn set_ticket_status(
        &self,
        ticket_id: TicketId,
        status: TicketStatus,
    ) -> Result<Ticket> {
        self.tickets.set_ticket_status(ticket_id, status).await
    }

    /// Like [`set_ticket_status`](Self::set_ticket_status), taking the status by name.
    pub async fn set_ticket_status_named(&self, ticket_id: TicketId, status: &str) -> Result<Ticket> {
        let status: TicketStatus = status.parse()?;
        self.tickets.set_ticket_status(ticket_id, status).await
    }

    pub async fn queue_for_day(&self, service_day: ServiceDay) -> Result<Vec<Ticket>> {
        self.tickets.queue_for_day(service_day).await
    }

    pub async fn current_ticket(&self, service_day: ServiceDay) -> Result<Option<Ticket>> {
        self.tickets.current_ticket(service_day).await
    }
}

impl PosEngine<PostgresStore> {
    /// Connects to PostgreSQL, runs migrations and builds the engine.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let store = PostgresStore::connect(&config.store).await?;
        store.run_migrations().await?;
        Ok(Self::with_config(store, config, Arc::new(SystemClock)))
    }
}
