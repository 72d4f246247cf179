//! Order transaction coordinator.
//!
//! Checkout converts a set of requested lines into a priced, immutable order
//! inside one Postgres transaction: availability and stock checks, repricing
//! against the live catalog, header + line inserts, per-line stock
//! reservation, and cart clearing all commit or roll back together. There is
//! no compensation logic on this path; the transaction is the compensation.
//!
//! Cancellation is the inverse: it releases exactly the quantities the order
//! reserved and moves the order to its terminal state, also atomically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cart;
use crate::error::{Result, StoreError};
use crate::identity::CartIdentity;
use crate::models::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
use crate::stock;

/// Flat tax applied to every order's subtotal.
pub fn tax_rate() -> Decimal {
    Decimal::new(10, 2) // 10%
}

/// Orders at or above this subtotal ship free.
pub fn free_shipping_threshold() -> Decimal {
    Decimal::new(10_000, 2) // 100.00
}

/// Flat shipping fee below the threshold.
pub fn flat_shipping_fee() -> Decimal {
    Decimal::new(1_000, 2) // 10.00
}

/// Tax, shipping and grand total for a given subtotal. Monetary values are
/// rounded to cents here and never recomputed after the order is created.
pub fn compute_totals(subtotal: Decimal) -> (Decimal, Decimal, Decimal) {
    let tax = (subtotal * tax_rate()).round_dp(2);
    let shipping = if subtotal >= free_shipping_threshold() {
        Decimal::ZERO
    } else {
        flat_shipping_fee()
    };
    (tax, shipping, subtotal + tax + shipping)
}

/// Human-presentable order number: date plus a random suffix. Uniqueness is
/// collision-checked at creation and backstopped by the unique constraint.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::random::<u32>() & 0xFF_FFFF;
    format!("ORD-{}-{:06X}", now.format("%Y%m%d"), suffix)
}

/// Who is asking. `Owner` is scoped to their own orders; `Admin` sees all.
#[derive(Clone, Copy, Debug)]
pub enum OrderAccess {
    Owner(Uuid),
    Admin,
}

impl OrderAccess {
    fn permits(&self, order: &Order) -> bool {
        match self {
            Self::Owner(user_id) => order.user_id == *user_id,
            Self::Admin => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RequestedLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<RequestedLine>,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Create an order. Either a fully-priced, fully-reserved order exists and
/// the purchaser's cart is empty, or nothing changed at all.
pub async fn create_order(pool: &PgPool, input: NewOrder) -> Result<OrderWithItems> {
    if input.items.is_empty() {
        return Err(StoreError::EmptyOrder);
    }
    for line in &input.items {
        if !(1..=cart::MAX_QUANTITY).contains(&line.quantity) {
            return Err(StoreError::Validation(format!(
                "quantity for product {} must be between 1 and {}",
                line.product_id,
                cart::MAX_QUANTITY
            )));
        }
    }

    let mut tx = pool.begin().await?;

    // Price every line against current catalog state, in submission order.
    // The cart's snapshots are deliberately ignored here.
    let mut priced = Vec::with_capacity(input.items.len());
    let mut subtotal = Decimal::ZERO;
    for line in &input.items {
        let product = sqlx::query_as::<_, crate::models::Product>(
            "SELECT * FROM products WHERE id = $1",
        )
        .bind(line.product_id)
        .fetch_optional(&mut *tx)
        .await?;
        let product = match product {
            Some(p) if p.is_active => p,
            _ => return Err(StoreError::ProductUnavailable { product_id: line.product_id }),
        };
        if product.stock < line.quantity {
            return Err(StoreError::InsufficientStock { product_id: line.product_id });
        }
        let price = product.effective_price();
        let line_total = price * Decimal::from(line.quantity);
        subtotal += line_total;
        priced.push((line.product_id, line.quantity, price, line_total));
    }

    let (tax, shipping, total) = compute_totals(subtotal);

    let now = Utc::now();
    let order_number = {
        let mut candidate = generate_order_number(now);
        for _ in 0..3 {
            let taken: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM orders WHERE order_number = $1")
                    .bind(&candidate)
                    .fetch_optional(&mut *tx)
                    .await?;
            if taken.is_none() {
                break;
            }
            candidate = generate_order_number(now);
        }
        candidate
    };

    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (id, order_number, user_id, status, subtotal, tax, shipping, \
         discount, total, shipping_address, billing_address, payment_method, payment_status, notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $11, $12, $13) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&order_number)
    .bind(input.user_id)
    .bind(OrderStatus::Pending.as_str())
    .bind(subtotal)
    .bind(tax)
    .bind(shipping)
    .bind(total)
    .bind(&input.shipping_address)
    .bind(&input.billing_address)
    .bind(serde_json::to_value(&input.payment_method).map_err(anyhow::Error::from)?)
    .bind(PaymentStatus::Pending.as_str())
    .bind(&input.notes)
    .fetch_one(&mut *tx)
    .await?;

    let mut items = Vec::with_capacity(priced.len());
    for (product_id, quantity, price, line_total) in &priced {
        let item = sqlx::query_as::<_, OrderItem>(
            "INSERT INTO order_items (id, order_id, product_id, quantity, price, total) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(order.id)
        .bind(product_id)
        .bind(quantity)
        .bind(price)
        .bind(line_total)
        .fetch_one(&mut *tx)
        .await?;
        items.push(item);
    }

    // The authoritative stock check. A failure here rolls back everything
    // above, including reservations already applied for earlier lines.
    for (product_id, quantity, _, _) in &priced {
        stock::reserve(&mut *tx, *product_id, *quantity).await?;
    }

    cart::clear(&mut *tx, &CartIdentity::User(input.user_id)).await?;

    tx.commit().await?;
    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        user_id = %order.user_id,
        %total,
        "order created"
    );
    Ok(OrderWithItems { order, items })
}

async fn fetch_items(pool: &PgPool, order_id: Uuid) -> Result<Vec<OrderItem>> {
    Ok(sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?)
}

pub async fn get_order(pool: &PgPool, order_id: Uuid, access: OrderAccess) -> Result<OrderWithItems> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?
        .filter(|o| access.permits(o))
        .ok_or(StoreError::NotFound)?;
    let items = fetch_items(pool, order.id).await?;
    Ok(OrderWithItems { order, items })
}

pub async fn get_order_by_number(
    pool: &PgPool,
    order_number: &str,
    access: OrderAccess,
) -> Result<OrderWithItems> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_number = $1")
        .bind(order_number)
        .fetch_optional(pool)
        .await?
        .filter(|o| access.permits(o))
        .ok_or(StoreError::NotFound)?;
    let items = fetch_items(pool, order.id).await?;
    Ok(OrderWithItems { order, items })
}

#[derive(Clone, Copy, Debug, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSort {
    #[default]
    Date,
    Total,
    Status,
}

impl OrderSort {
    /// Whitelisted ORDER BY fragment; never interpolate caller strings.
    fn sql(&self, descending: bool) -> &'static str {
        match (self, descending) {
            (Self::Date, true) => "created_at DESC",
            (Self::Date, false) => "created_at ASC",
            (Self::Total, true) => "total DESC",
            (Self::Total, false) => "total ASC",
            (Self::Status, true) => "status DESC",
            (Self::Status, false) => "status ASC",
        }
    }
}

/// Row offset for a 1-based page. Widens before multiplying so an absurd
/// caller-supplied page number cannot overflow u32.
pub(crate) fn page_offset(page: u32, per_page: u32) -> i64 {
    (i64::from(page) - 1) * i64::from(per_page)
}

#[derive(Debug, Default)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sort: OrderSort,
    pub descending: bool,
    pub page: u32,
    pub per_page: u32,
}

/// Shared listing query for the user path (caller pins `user_id`) and the
/// admin path (all filters optional).
pub async fn list_orders(pool: &PgPool, query: &OrderQuery) -> Result<(Vec<Order>, i64)> {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 100);
    let status = query.status.map(|s| s.as_str());

    let where_clause = "($1::text IS NULL OR status = $1) \
         AND ($2::uuid IS NULL OR user_id = $2) \
         AND ($3::timestamptz IS NULL OR created_at >= $3) \
         AND ($4::timestamptz IS NULL OR created_at < $4)";

    let sql = format!(
        "SELECT * FROM orders WHERE {where_clause} ORDER BY {} LIMIT $5 OFFSET $6",
        query.sort.sql(query.descending)
    );
    let orders = sqlx::query_as::<_, Order>(&sql)
        .bind(status)
        .bind(query.user_id)
        .bind(query.from)
        .bind(query.to)
        .bind(per_page as i64)
        .bind(page_offset(page, per_page))
        .fetch_all(pool)
        .await?;

    let total: (i64,) =
        sqlx::query_as(&format!("SELECT COUNT(*) FROM orders WHERE {where_clause}"))
            .bind(status)
            .bind(query.user_id)
            .bind(query.from)
            .bind(query.to)
            .fetch_one(pool)
            .await?;

    Ok((orders, total.0))
}

/// Cancel an order, restoring exactly the quantities reserved at creation.
///
/// One transaction: the status flip and every stock release commit together
/// or not at all. A repeated cancel fails the cancellable-state gate, so
/// stock is never double-released.
pub async fn cancel_order(
    pool: &PgPool,
    order_id: Uuid,
    access: OrderAccess,
    reason: Option<String>,
) -> Result<Order> {
    let mut tx = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .filter(|o| access.permits(o))
        .ok_or(StoreError::NotFound)?;

    let status = OrderStatus::parse(&order.status)?;
    if !status.is_cancellable() {
        return Err(StoreError::NotCancellable { status: order.status });
    }

    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&mut *tx)
    .await?;

    for item in &items {
        stock::release(&mut *tx, item.product_id, item.quantity).await?;
    }

    let cancelled = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, notes = COALESCE($3, notes), updated_at = NOW() \
         WHERE id = $1 RETURNING *",
    )
    .bind(order_id)
    .bind(OrderStatus::Cancelled.as_str())
    .bind(&reason)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(
        %order_id,
        order_number = %cancelled.order_number,
        lines = items.len(),
        "order cancelled, stock restored"
    );
    Ok(cancelled)
}

#[derive(Debug, Default)]
pub struct StatusUpdate {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
}

/// Administrative update of status, payment status, tracking and notes.
/// Never touches the stock ledger; cancellation has its own path.
pub async fn admin_update_order(
    pool: &PgPool,
    order_id: Uuid,
    update: StatusUpdate,
) -> Result<Order> {
    let mut tx = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

    let new_status = match update.status {
        Some(target) => {
            OrderStatus::parse(&order.status)?.admin_can_set(target)?;
            target.as_str()
        }
        None => order.status.as_str(),
    };

    let updated = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, payment_status = COALESCE($3, payment_status), \
         tracking_number = COALESCE($4, tracking_number), notes = COALESCE($5, notes), \
         updated_at = NOW() \
         WHERE id = $1 RETURNING *",
    )
    .bind(order_id)
    .bind(new_status)
    .bind(update.payment_status.map(|p| p.as_str()))
    .bind(&update.tracking_number)
    .bind(&update.notes)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(%order_id, status = new_status, "order updated by admin");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_apply_tax_and_flat_shipping() {
        let (tax, shipping, total) = compute_totals(dec!(50.00));
        assert_eq!(tax, dec!(5.00));
        assert_eq!(shipping, dec!(10.00));
        assert_eq!(total, dec!(65.00));
    }

    #[test]
    fn totals_waive_shipping_at_threshold() {
        let (tax, shipping, total) = compute_totals(dec!(100.00));
        assert_eq!(tax, dec!(10.00));
        assert_eq!(shipping, dec!(0));
        assert_eq!(total, dec!(110.00));
    }

    #[test]
    fn tax_rounds_to_cents() {
        let (tax, _, _) = compute_totals(dec!(0.33));
        assert_eq!(tax, dec!(0.03));
    }

    #[test]
    fn order_numbers_are_dated_and_well_formed() {
        let now = Utc::now();
        let n = generate_order_number(now);
        let prefix = format!("ORD-{}-", now.format("%Y%m%d"));
        assert!(n.starts_with(&prefix));
        assert_eq!(n.len(), prefix.len() + 6);
    }

    #[test]
    fn owner_access_is_scoped() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let order = Order {
            id: Uuid::new_v4(),
            order_number: "ORD-20250101-000001".into(),
            user_id: user,
            status: "pending".into(),
            subtotal: dec!(10),
            tax: dec!(1),
            shipping: dec!(10),
            discount: dec!(0),
            total: dec!(21),
            shipping_address: serde_json::json!({}),
            billing_address: serde_json::json!({}),
            payment_method: serde_json::json!({"type": "cash_on_delivery"}),
            payment_status: "pending".into(),
            tracking_number: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(OrderAccess::Owner(user).permits(&order));
        assert!(!OrderAccess::Owner(other).permits(&order));
        assert!(OrderAccess::Admin.permits(&order));
    }

    #[test]
    fn page_offset_survives_huge_page_numbers() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        // u32 arithmetic would overflow here; i64 must not.
        assert_eq!(page_offset(u32::MAX, 100), (i64::from(u32::MAX) - 1) * 100);
    }

    #[test]
    fn sort_fragments_are_whitelisted() {
        assert_eq!(OrderSort::Date.sql(true), "created_at DESC");
        assert_eq!(OrderSort::Total.sql(false), "total ASC");
        assert_eq!(OrderSort::Status.sql(true), "status DESC");
    }
}
