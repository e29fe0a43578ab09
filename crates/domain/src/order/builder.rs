//! Cart validation and pricing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{
    LineItemId, Money, OrderId, OrderStatus, PaymentMethod, ProductId, TicketId, UserId,
};
use serde::{Deserialize, Serialize};
use store::{CatalogReader, LineItem, Order, Product};

use super::OrderError;
use crate::error::Result;

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A cart submitted by a cashier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub cashier_id: UserId,

    /// Queue ticket the order is for. Not validated.
    #[serde(default)]
    pub ticket_id: Option<TicketId>,

    pub payment_method: PaymentMethod,

    #[serde(default)]
    pub note: Option<String>,

    pub lines: Vec<LineRequest>,
}

impl OrderRequest {
    /// Creates an empty cart.
    pub fn new(cashier_id: UserId, payment_method: PaymentMethod) -> Self {
        Self {
            cashier_id,
            ticket_id: None,
            payment_method,
            note: None,
            lines: Vec::new(),
        }
    }

    /// Links the order to a queue ticket.
    pub fn for_ticket(mut self, ticket_id: TicketId) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Appends a cart line.
    pub fn line(mut self, product_id: ProductId, quantity: u32) -> Self {
        self.lines.push(LineRequest {
            product_id,
            quantity,
        });
        self
    }
}

/// An order priced against the catalog, ready to be written.
#[derive(Debug, Clone)]
pub struct StagedOrder {
    pub order: Order,

    /// One item per requested line, in request order.
    pub items: Vec<LineItem>,

    /// Summed quantity per product, in ascending product id order.
    pub decrements: Vec<(ProductId, u32)>,
}

/// Largest quantity a single line may carry; quantities are stored as SQL `INTEGER`.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// Validates carts and prices them against the catalog.
#[derive(Debug, Clone, Copy)]
pub struct OrderBuilder {
    min_line_items: usize,
}

impl Default for OrderBuilder {
    fn default() -> Self {
        Self { min_line_items: 1 }
    }
}

impl OrderBuilder {
    pub fn new(min_line_items: usize) -> Self {
        Self {
            min_line_items: min_line_items.max(1),
        }
    }

    /// Checks the shape of a cart without touching the catalog.
    pub fn validate(&self, request: &OrderRequest) -> std::result::Result<(), OrderError> {
        if request.lines.len() < self.min_line_items {
            return Err(OrderError::TooFewLineItems {
                required: self.min_line_items,
                actual: request.lines.len(),
            });
        }

        for (line_number, line) in (1u32..).zip(&request.lines) {
            if line.quantity == 0 || line.quantity > MAX_LINE_QUANTITY {
                return Err(OrderError::InvalidQuantity {
                    line_number,
                    quantity: line.quantity,
                });
            }
        }

        Ok(())
    }

    /// Prices a cart against the catalog.
    ///
    /// Products are read in ascending id order so that concurrent carts lock
    /// product rows in the same order.
    pub async fn build<C>(
        &self,
        catalog: &mut C,
        request: &OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<StagedOrder>
    where
        C: CatalogReader + ?Sized,
    {
        self.validate(request)?;

        let mut requested: BTreeMap<ProductId, u32> = BTreeMap::new();
        for line in &request.lines {
            let total = requested.entry(line.product_id).or_insert(0);
            *total = total
                .checked_add(line.quantity)
                .ok_or(OrderError::AmountOverflow)?;
        }

        let mut products: BTreeMap<ProductId, Product> = BTreeMap::new();
        for (&product_id, &quantity) in &requested {
            let product = catalog
                .get_product(product_id)
                .await?
                .ok_or(OrderError::ProductNotFound { product_id })?;

            if !product.active {
                return Err(OrderError::ProductInactive { product_id }.into());
            }
            if product.stock < quantity {
                return Err(OrderError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available: product.stock,
                }
                .into());
            }
            products.insert(product_id, product);
        }

        let order_id = OrderId::new();
        let mut total = Money::zero();
        let mut items = Vec::with_capacity(request.lines.len());

        for (line_number, line) in (1u32..).zip(&request.lines) {
            let product = products
                .get(&line.product_id)
                .ok_or(OrderError::ProductNotFound {
                    product_id: line.product_id,
                })?;

            let line_total = product
                .price
                .checked_multiply(line.quantity)
                .ok_or(OrderError::AmountOverflow)?;
            total = total
                .checked_add(line_total)
                .ok_or(OrderError::AmountOverflow)?;

            items.push(LineItem {
                id: LineItemId::new(),
                order_id,
                line_number,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: product.price,
                line_total,
            });
        }

        let order = Order {
            id: order_id,
            ticket_id: request.ticket_id,
            cashier_id: request.cashier_id,
            total,
            payment_method: request.payment_method,
            status: OrderStatus::Pending,
            note: non_blank(request.note.as_deref()),
            created_at: now,
            updated_at: now,
        };

        Ok(StagedOrder {
            order,
            items,
            decrements: requested.into_iter().collect(),
        })
    }
}

/// Treats empty and whitespace-only text as absent.
pub(crate) fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use store::StoreError;

    use super::*;
    use crate::error::{DomainError, ErrorKind};

    #[derive(Default)]
    struct FakeCatalog {
        products: HashMap<ProductId, Product>,
        reads: Vec<ProductId>,
    }

    impl FakeCatalog {
        fn with(products: &[&Product]) -> Self {
            Self {
                products: products.iter().map(|p| (p.id, (*p).clone())).collect(),
                reads: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CatalogReader for FakeCatalog {
        async fn get_product(&mut self, id: ProductId) -> store::Result<Option<Product>> {
            self.reads.push(id);
            Ok(self.products.get(&id).cloned())
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl CatalogReader for BrokenCatalog {
        async fn get_product(&mut self, _id: ProductId) -> store::Result<Option<Product>> {
            Err(StoreError::Timeout)
        }
    }

    fn request() -> OrderRequest {
        OrderRequest::new(UserId::new(), PaymentMethod::Card)
    }

    #[tokio::test]
    async fn prices_each_line_and_sums_total() {
        let burger = Product::new("Burger", Money::from_cents(1050), 10);
        let fries = Product::new("Fries", Money::from_cents(399), 10);
        let mut catalog = FakeCatalog::with(&[&burger, &fries]);

        let cart = request().line(burger.id, 2).line(fries.id, 3);
        let staged = OrderBuilder::default()
            .build(&mut catalog, &cart, Utc::now())
            .await
            .unwrap();

        assert_eq!(staged.order.total, Money::from_cents(2 * 1050 + 3 * 399));
        assert_eq!(staged.order.status, OrderStatus::Pending);
        assert_eq!(staged.items.len(), 2);
        assert_eq!(staged.items[0].line_number, 1);
        assert_eq!(staged.items[0].line_total, Money::from_cents(2100));
        assert_eq!(staged.items[1].unit_price, Money::from_cents(399));
        assert!(staged.items.iter().all(|i| i.order_id == staged.order.id));
    }

    #[tokio::test]
    async fn repeated_product_is_checked_against_summed_quantity() {
        let tea = Product::new("Tea", Money::from_cents(200), 3);
        let mut catalog = FakeCatalog::with(&[&tea]);

        let cart = request().line(tea.id, 2).line(tea.id, 2);
        let err = OrderBuilder::default()
            .build(&mut catalog, &cart, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::Order(OrderError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn repeated_product_keeps_one_item_per_line() {
        let tea = Product::new("Tea", Money::from_cents(200), 5);
        let mut catalog = FakeCatalog::with(&[&tea]);

        let cart = request().line(tea.id, 2).line(tea.id, 1);
        let staged = OrderBuilder::default()
            .build(&mut catalog, &cart, Utc::now())
            .await
            .unwrap();

        assert_eq!(staged.items.len(), 2);
        assert_eq!(staged.decrements, vec![(tea.id, 3)]);
        assert_eq!(catalog.reads, vec![tea.id]);
    }

    #[tokio::test]
    async fn reads_products_in_id_order() {
        let a = Product::new("A", Money::from_cents(100), 5);
        let b = Product::new("B", Money::from_cents(100), 5);
        let c = Product::new("C", Money::from_cents(100), 5);
        let mut catalog = FakeCatalog::with(&[&a, &b, &c]);

        let cart = request().line(c.id, 1).line(a.id, 1).line(b.id, 1);
        OrderBuilder::default()
            .build(&mut catalog, &cart, Utc::now())
            .await
            .unwrap();

        let mut sorted = catalog.reads.clone();
        sorted.sort();
        assert_eq!(catalog.reads, sorted);
    }

    #[tokio::test]
    async fn rejects_missing_and_inactive_products() {
        let retired = Product::new("Retired", Money::from_cents(100), 5).deactivated();
        let mut catalog = FakeCatalog::with(&[&retired]);

        let err = OrderBuilder::default()
            .build(&mut catalog, &request().line(retired.id, 1), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProductInactive);

        let err = OrderBuilder::default()
            .build(&mut catalog, &request().line(ProductId::new(), 1), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn validate_rejects_zero_quantity_and_short_carts() {
        let builder = OrderBuilder::default();
        let err = builder.validate(&request()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::TooFewLineItems {
                required: 1,
                actual: 0
            }
        ));

        let cart = request().line(ProductId::new(), 1).line(ProductId::new(), 0);
        let err = builder.validate(&cart).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidQuantity {
                line_number: 2,
                quantity: 0
            }
        ));

        let err = OrderBuilder::new(3)
            .validate(&request().line(ProductId::new(), 1))
            .unwrap_err();
        assert!(matches!(err, OrderError::TooFewLineItems { required: 3, .. }));
    }

    #[test]
    fn validate_rejects_quantities_beyond_integer_range() {
        let builder = OrderBuilder::default();

        assert!(builder
            .validate(&request().line(ProductId::new(), MAX_LINE_QUANTITY))
            .is_ok());

        let too_many = MAX_LINE_QUANTITY + 1;
        let err = builder
            .validate(&request().line(ProductId::new(), too_many))
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidQuantity {
                line_number: 1,
                quantity
            } if quantity == too_many
        ));
    }

    #[tokio::test]
    async fn overflowing_total_is_rejected() {
        let gold = Product::new("Gold", Money::from_cents(i64::MAX / 2), 10);
        let mut catalog = FakeCatalog::with(&[&gold]);

        let err = OrderBuilder::default()
            .build(&mut catalog, &request().line(gold.id, 3), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Order(OrderError::AmountOverflow)));
    }

    #[tokio::test]
    async fn catalog_failures_surface_as_store_errors() {
        let err = OrderBuilder::default()
            .build(&mut BrokenCatalog, &request().line(ProductId::new(), 1), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn blank_note_is_dropped() {
        let tea = Product::new("Tea", Money::from_cents(200), 5);
        let mut catalog = FakeCatalog::with(&[&tea]);

        let cart = request().line(tea.id, 1).with_note("   ");
        let staged = OrderBuilder::default()
            .build(&mut catalog, &cart, Utc::now())
            .await
            .unwrap();
        assert_eq!(staged.order.note, None);
    }

    #[test]
    fn non_blank_trims() {
        assert_eq!(non_blank(Some("  Ana ")), Some("Ana".to_string()));
        assert_eq!(non_blank(Some("")), None);
        assert_eq!(non_blank(None), None);
    }
}
