//! Order admission and the order status machine.

mod builder;
mod service;

pub(crate) use builder::non_blank;
pub use builder::{LineRequest, MAX_LINE_QUANTITY, OrderBuilder, OrderRequest, StagedOrder};
pub use service::OrderService;

use common::ProductId;
use thiserror::Error;

/// Reasons a cart is rejected.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A requested product does not exist.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// A requested product is not currently sold.
    #[error("Product {product_id} is inactive")]
    ProductInactive { product_id: ProductId },

    /// A product has less stock than the cart asks for.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Invalid quantity.
    #[error("Invalid quantity on line {line_number}: {quantity} (must be between 1 and 2147483647)")]
    InvalidQuantity { line_number: u32, quantity: u32 },

    /// The cart has fewer lines than required.
    #[error("Order needs at least {required} line item(s), got {actual}")]
    TooFewLineItems { required: usize, actual: usize },

    /// A line or order total does not fit the money type.
    #[error("Order amount overflows")]
    AmountOverflow,
}
