use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{
    LineItemId, Money, OrderId, OrderStatus, ProductId, ServiceDay, TicketId, UserId,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LineItem, Order, Product, Result, StoreConfig, StoreError, Ticket,
    store::{CatalogReader, PosStore, UnitOfWork},
};

const TICKET_NUMBER_CONSTRAINT: &str = "tickets_service_day_sequence_number_key";

const PRODUCT_COLUMNS: &str = "id, name, price_cents, active, stock_quantity";
const TICKET_COLUMNS: &str =
    "id, sequence_number, customer_name, status, service_day, created_at, called_at, served_at";
const ORDER_COLUMNS: &str = "id, ticket_id, cashier_id, total_cents, payment_method, status, note, created_at, updated_at";
const LINE_ITEM_COLUMNS: &str =
    "id, order_id, line_number, product_id, quantity, unit_price_cents, line_total_cents";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: StoreConfig::default().statement_timeout,
        }
    }

    /// Connects a pool sized and timed according to `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "connected to PostgreSQL"
        );
        Ok(Self::new(pool).with_statement_timeout(config.statement_timeout))
    }

    /// Sets the deadline applied to every statement inside a unit of work.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PosStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;

        // SET does not accept bind parameters
        let timeout_ms = self.statement_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, active, stock_quantity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                active = EXCLUDED.active,
                stock_quantity = EXCLUDED.stock_quantity,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(product.active)
        .bind(to_i32(product.stock)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn line_items(&self, order_id: OrderId) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY line_number ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_line_item).collect()
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_ticket).transpose()
    }

    async fn tickets_for_day(&self, service_day: ServiceDay) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE service_day = $1 ORDER BY sequence_number ASC"
        ))
        .bind(service_day.date())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_ticket).collect()
    }
}

/// A unit of work backed by one database transaction.
///
/// Reads lock the rows they return (`FOR UPDATE`) so the values a unit of
/// work decides on cannot change before it commits.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogReader for PgUnitOfWork {
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_product).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn decrement_stock(&mut self, id: ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND stock_quantity >= $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(to_i32(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StockConflict { product_id: id });
        }
        Ok(())
    }

    async fn restock(&mut self, id: ProductId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(to_i32(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, ticket_id, cashier_id, total_cents, payment_method, status, note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.ticket_id.map(|id| id.as_uuid()))
        .bind(order.cashier_id.as_uuid())
        .bind(order.total.cents())
        .bind(order.payment_method.as_str())
        .bind(order.status.as_str())
        .bind(&order.note)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, line_number, product_id, quantity, unit_price_cents, line_total_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.order_id.as_uuid())
        .bind(to_i32(item.line_number)?)
        .bind(item.product_id.as_uuid())
        .bind(to_i32(item.quantity)?)
        .bind(item.unit_price.cents())
        .bind(item.line_total.cents())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::not_found("Order", item.order_id);
            }
            StoreError::from(e)
        })?;

        Ok(())
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn line_items(&mut self, order_id: OrderId) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY line_number ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_line_item).collect()
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Order", id));
        }
        Ok(())
    }

    async fn next_ticket_number(&mut self, service_day: ServiceDay) -> Result<u32> {
        // The counter row lock serializes issuers for the same day. Seeding
        // from MAX(sequence_number) keeps the counter ahead of rows that
        // were inserted without it.
        let next: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO ticket_counters (service_day, last_number)
            VALUES (
                $1,
                (SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM tickets WHERE service_day = $1)
            )
            ON CONFLICT (service_day) DO UPDATE
            SET last_number = GREATEST(
                ticket_counters.last_number,
                (SELECT COALESCE(MAX(sequence_number), 0) FROM tickets WHERE service_day = $1)
            ) + 1
            RETURNING last_number
            "#,
        )
        .bind(service_day.date())
        .fetch_one(&mut *self.tx)
        .await?;

        from_i32("last_number", next)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, sequence_number, customer_name, status, service_day, created_at, called_at, served_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(ticket.id.as_uuid())
        .bind(to_i32(ticket.sequence_number)?)
        .bind(&ticket.customer_name)
        .bind(ticket.status.as_str())
        .bind(ticket.service_day.date())
        .bind(ticket.created_at)
        .bind(ticket.called_at)
        .bind(ticket.served_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(TICKET_NUMBER_CONSTRAINT)
            {
                return StoreError::SequenceConflict {
                    service_day: ticket.service_day,
                    sequence_number: ticket.sequence_number,
                };
            }
            StoreError::from(e)
        })?;

        Ok(())
    }

    async fn get_ticket(&mut self, id: TicketId) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_ticket).transpose()
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tickets SET status = $2, called_at = $3, served_at = $4 WHERE id = $1",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.status.as_str())
        .bind(ticket.called_at)
        .bind(ticket.served_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Ticket", ticket.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgUnitOfWork { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgUnitOfWork { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{value} exceeds INTEGER range")))
}

fn from_i32(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}: {e}")))
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        active: row.try_get("active")?,
        stock: from_i32("stock_quantity", row.try_get("stock_quantity")?)?,
    })
}

fn row_to_ticket(row: PgRow) -> Result<Ticket> {
    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get::<Uuid, _>("id")?),
        sequence_number: from_i32("sequence_number", row.try_get("sequence_number")?)?,
        customer_name: row.try_get("customer_name")?,
        status: parse_column(&row, "status")?,
        service_day: ServiceDay::new(row.try_get::<NaiveDate, _>("service_day")?),
        created_at: row.try_get("created_at")?,
        called_at: row.try_get("called_at")?,
        served_at: row.try_get("served_at")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        ticket_id: row
            .try_get::<Option<Uuid>, _>("ticket_id")?
            .map(TicketId::from_uuid),
        cashier_id: UserId::from_uuid(row.try_get::<Uuid, _>("cashier_id")?),
        total: Money::from_cents(row.try_get("total_cents")?),
        payment_method: parse_column(&row, "payment_method")?,
        status: parse_column(&row, "status")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_line_item(row: PgRow) -> Result<LineItem> {
    Ok(LineItem {
        id: LineItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        line_number: from_i32("line_number", row.try_get("line_number")?)?,
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: from_i32("quantity", row.try_get("quantity")?)?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        line_total: Money::from_cents(row.try_get("line_total_cents")?),
    })
}
