//! Order placement and the order status machine.

use std::sync::Arc;
use std::time::Instant;

use common::{OrderId, OrderStatus};
use store::{Order, OrderDetails, PosStore, PosStoreExt, UnitOfWork};

use super::{OrderBuilder, OrderRequest};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, TransitionPolicy};
use crate::error::{DomainError, Result};
use crate::unit_of_work::settle;

/// Service for placing orders and moving them through their lifecycle.
pub struct OrderService<S: PosStore> {
    store: S,
    clock: Arc<dyn Clock>,
    builder: OrderBuilder,
    max_attempts: u32,
    policy: TransitionPolicy,
    restock_on_cancel: bool,
}

impl<S: PosStore> OrderService<S> {
    /// Creates an order service with default settings and the system clock.
    pub fn new(store: S) -> Self {
        Self::with_config(store, &EngineConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(store: S, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            builder: OrderBuilder::new(config.min_line_items),
            max_attempts: config.order_max_attempts.max(1),
            policy: config.transition_policy,
            restock_on_cancel: config.restock_on_cancel,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places an order, decrementing stock for every product in the cart.
    ///
    /// The order, its line items and the stock changes are written in one
    /// unit of work. Transient storage failures re-run the whole unit of
    /// work, re-reading the catalog each time.
    #[tracing::instrument(skip(self, request), fields(cashier_id = %request.cashier_id, lines = request.lines.len()))]
    pub async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let started = Instant::now();
        let result = self.place_with_retry(&request).await;

        match &result {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                metrics::histogram!("order_placement_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(order_id = %order.id, total = %order.total, "order placed");
            }
            Err(err) => {
                metrics::counter!("orders_rejected_total", "reason" => err.kind().as_str())
                    .increment(1);
                tracing::warn!(error = %err, "order rejected");
            }
        }

        result
    }

    async fn place_with_retry(&self, request: &OrderRequest) -> Result<Order> {
        self.builder.validate(request)?;

        let mut attempt = 1;
        loop {
            match self.try_place(request).await {
                Err(DomainError::Store(err)) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %err, "transient storage failure, retrying order");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_place(&self, request: &OrderRequest) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let result = self.stage_and_write(uow.as_mut(), request).await;
        settle(uow, result).await
    }

    async fn stage_and_write(
        &self,
        uow: &mut dyn UnitOfWork,
        request: &OrderRequest,
    ) -> Result<Order> {
        let staged = self.builder.build(&mut *uow, request, self.clock.now()).await?;

        uow.insert_order(&staged.order).await?;
        for item in &staged.items {
            uow.insert_line_item(item).await?;
        }
        for &(product_id, quantity) in &staged.decrements {
            uow.decrement_stock(product_id, quantity).await?;
        }

        Ok(staged.order)
    }

    /// Moves an order to `status`.
    ///
    /// Under the strict policy only moves allowed by
    /// [`OrderStatus::can_transition_to`] succeed.
    #[tracing::instrument(skip(self))]
    pub async fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let result = self.transition(uow.as_mut(), order_id, status).await;
        let order = settle(uow, result).await?;

        metrics::counter!("order_status_changes_total", "status" => status.as_str()).increment(1);
        tracing::info!(%order_id, %status, "order status changed");
        Ok(order)
    }

    async fn transition(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order> {
        let mut order = uow
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Order", order_id))?;

        let from = order.status;
        if !self.policy.permits(from.can_transition_to(status)) {
            tracing::warn!(%order_id, %from, to = %status, "rejected order transition");
            return Err(DomainError::InvalidTransition {
                entity: "order",
                from: from.to_string(),
                to: status.to_string(),
            });
        }

        let now = self.clock.now();
        uow.update_order_status(order_id, status, now).await?;

        // Leaving a terminal state is only possible under the permissive
        // policy; such a re-cancel must not restock a second time.
        if self.restock_on_cancel && status == OrderStatus::Cancelled && from.can_cancel() {
            for item in uow.line_items(order_id).await? {
                if !uow.restock(item.product_id, item.quantity).await? {
                    tracing::warn!(
                        %order_id,
                        product_id = %item.product_id,
                        "product no longer exists, skipping restock"
                    );
                }
            }
        }

        order.status = status;
        order.updated_at = now;
        Ok(order)
    }

    /// Loads an order together with its line items.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_details(&self, order_id: OrderId) -> Result<OrderDetails> {
        self.store
            .order_details(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Order", order_id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use common::{Money, PaymentMethod, ProductId, UserId};
    use store::{FailPoint, InMemoryStore, Product};

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;

    async fn seeded(stock: u32) -> (InMemoryStore, Product) {
        let store = InMemoryStore::new();
        let product = Product::new("Burger", Money::from_cents(1000), stock);
        store.save_product(&product).await.unwrap();
        (store, product)
    }

    fn cart(product_id: ProductId, quantity: u32) -> OrderRequest {
        OrderRequest::new(UserId::new(), PaymentMethod::Cash).line(product_id, quantity)
    }

    #[tokio::test]
    async fn test_place_order_decrements_stock() {
        let (store, product) = seeded(5).await;
        let service = OrderService::new(store.clone());

        let order = service.place_order(cart(product.id, 2)).await.unwrap();

        assert_eq!(order.total, Money::from_cents(2000));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 3);
        assert_eq!(store.line_item_count().await, 1);
    }

    #[tokio::test]
    async fn test_transient_commit_failure_is_retried() {
        let (store, product) = seeded(5).await;
        store.inject_commit_timeouts(2);
        let service = OrderService::new(store.clone());

        service.place_order(cart(product.id, 1)).await.unwrap();

        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 4);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (store, product) = seeded(5).await;
        store.inject_commit_timeouts(3);
        let service = OrderService::new(store.clone());

        let err = service.place_order(cart(product.id, 1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(err.is_retryable());
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (store, product) = seeded(5).await;
        store.fail_on(FailPoint::DecrementStock);
        let service = OrderService::new(store.clone());

        let err = service.place_order(cart(product.id, 1)).await.unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.line_item_count().await, 0);
    }

    #[tokio::test]
    async fn test_status_change_stamps_updated_at() {
        let (store, product) = seeded(5).await;
        let start = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let service =
            OrderService::with_config(store, &EngineConfig::default(), Arc::new(clock.clone()));

        let order = service.place_order(cart(product.id, 1)).await.unwrap();
        assert_eq!(order.updated_at, start);

        clock.advance(TimeDelta::minutes(3));
        let order = service
            .set_order_status(order.id, OrderStatus::Preparing)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Preparing);
        assert_eq!(order.created_at, start);
        assert_eq!(order.updated_at, start + TimeDelta::minutes(3));

        let stored = service.get_order_details(order.id).await.unwrap();
        assert_eq!(stored.order.updated_at, order.updated_at);
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_backward_moves() {
        let (store, product) = seeded(5).await;
        let service = OrderService::new(store);
        let order = service.place_order(cart(product.id, 1)).await.unwrap();

        service
            .set_order_status(order.id, OrderStatus::Ready)
            .await
            .unwrap();
        let err = service
            .set_order_status(order.id, OrderStatus::Preparing)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        let stored = service.get_order_details(order.id).await.unwrap();
        assert_eq!(stored.order.status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn test_permissive_policy_allows_any_move() {
        let (store, product) = seeded(5).await;
        let config = EngineConfig {
            transition_policy: TransitionPolicy::Permissive,
            ..EngineConfig::default()
        };
        let service = OrderService::with_config(store, &config, Arc::new(SystemClock));
        let order = service.place_order(cart(product.id, 1)).await.unwrap();

        service
            .set_order_status(order.id, OrderStatus::Completed)
            .await
            .unwrap();
        let order = service
            .set_order_status(order.id, OrderStatus::Pending)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_keeps_stock_by_default() {
        let (store, product) = seeded(5).await;
        let service = OrderService::new(store.clone());
        let order = service.place_order(cart(product.id, 2)).await.unwrap();

        service
            .set_order_status(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 3);
    }

    #[tokio::test]
    async fn test_cancel_restocks_when_enabled() {
        let (store, product) = seeded(5).await;
        let config = EngineConfig {
            restock_on_cancel: true,
            ..EngineConfig::default()
        };
        let service = OrderService::with_config(store.clone(), &config, Arc::new(SystemClock));
        let order = service
            .place_order(cart(product.id, 2).line(product.id, 1))
            .await
            .unwrap();
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 2);

        service
            .set_order_status(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_reopened_order_is_restocked_once() {
        let (store, product) = seeded(3).await;
        let config = EngineConfig {
            transition_policy: TransitionPolicy::Permissive,
            restock_on_cancel: true,
            ..EngineConfig::default()
        };
        let service = OrderService::with_config(store.clone(), &config, Arc::new(SystemClock));
        let order = service.place_order(cart(product.id, 3)).await.unwrap();

        for status in [OrderStatus::Cancelled, OrderStatus::Pending, OrderStatus::Cancelled] {
            service.set_order_status(order.id, status).await.unwrap();
        }

        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 3);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let service = OrderService::new(InMemoryStore::new());

        let err = service
            .set_order_status(OrderId::new(), OrderStatus::Ready)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = service.get_order_details(OrderId::new()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "Order", .. }));
    }
}
