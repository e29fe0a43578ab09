//! Persisted row shapes.

use chrono::{DateTime, Utc};
use common::{
    LineItemId, Money, OrderId, OrderStatus, PaymentMethod, ProductId, ServiceDay, TicketId,
    TicketStatus, UserId,
};
use serde::{Deserialize, Serialize};

/// A catalog product as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub active: bool,
    pub stock: u32,
}

impl Product {
    /// Creates an active product with a fresh id.
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            active: true,
            stock,
        }
    }

    /// Marks the product as not orderable.
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A queue ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,

    /// Position in the queue, unique within `service_day`.
    pub sequence_number: u32,

    pub customer_name: Option<String>,
    pub status: TicketStatus,
    pub service_day: ServiceDay,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub served_at: Option<DateTime<Utc>>,
}

/// A committed order.
///
/// `total` is the sum of the line totals at creation time and is never
/// recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    /// Weak reference: the ticket may be missing or in any state.
    pub ticket_id: Option<TicketId>,

    pub cashier_id: UserId,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One product line of an order, priced when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub order_id: OrderId,

    /// 1-based position within the order.
    pub line_number: u32,

    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// An order together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<LineItem>,
}
