//! Cart store: per-identity line items with cached price snapshots.
//!
//! Every mutation re-validates against live product state inside its own
//! transaction. The snapshots exist so the cart can display totals without
//! re-reading the catalog; checkout never trusts them and reprices.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::identity::CartIdentity;
use crate::models::{CartItem, Product};

/// Hard cap per line item, matching the table CHECK constraint.
pub const MAX_QUANTITY: i32 = 999;

#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
    pub item_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub line_total: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl CartView {
    pub fn from_lines(items: Vec<CartLine>) -> Self {
        let subtotal = items.iter().map(|l| l.line_total).sum();
        let item_count = items.iter().map(|l| l.quantity as i64).sum();
        Self { items, subtotal, item_count }
    }
}

/// Outcome of one line during a session-to-user merge.
#[derive(Debug, Serialize)]
pub struct MergeOutcome {
    pub product_id: Uuid,
    pub quantity: i32,
    pub merged: bool,
    pub reason: Option<String>,
}

fn check_quantity(qty: i32) -> Result<()> {
    if !(1..=MAX_QUANTITY).contains(&qty) {
        return Err(StoreError::Validation(format!(
            "quantity must be between 1 and {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

async fn load_product(exec: impl PgExecutor<'_>, product_id: Uuid) -> Result<Product> {
    // No implicit active-only scoping; activity is checked explicitly so the
    // stock read is against the same unfiltered row a reservation would hit.
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(exec)
        .await?
        .ok_or(StoreError::NotFound)
}

/// Add `quantity` units of a product to the identity's cart, merging into an
/// existing line if one exists. The stock check covers the combined quantity.
pub async fn add_item(
    pool: &PgPool,
    identity: &CartIdentity,
    product_id: Uuid,
    quantity: i32,
) -> Result<CartItem> {
    check_quantity(quantity)?;
    let (user_id, session_id) = identity.columns();

    let mut tx = pool.begin().await?;

    let product = load_product(&mut *tx, product_id).await?;
    if !product.is_active {
        return Err(StoreError::ProductUnavailable { product_id });
    }

    let existing = sqlx::query_as::<_, CartItem>(
        "SELECT * FROM cart_items \
         WHERE product_id = $1 AND (user_id = $2 OR session_id = $3) \
         FOR UPDATE",
    )
    .bind(product_id)
    .bind(user_id)
    .bind(&session_id)
    .fetch_optional(&mut *tx)
    .await?;

    let requested_total = existing.as_ref().map_or(0, |i| i.quantity) + quantity;
    if requested_total > MAX_QUANTITY {
        return Err(StoreError::Validation(format!(
            "cart line would exceed {MAX_QUANTITY} units"
        )));
    }
    if product.stock < requested_total {
        return Err(StoreError::InsufficientStock { product_id });
    }

    let price = product.effective_price();
    let item = match existing {
        Some(row) => {
            sqlx::query_as::<_, CartItem>(
                "UPDATE cart_items SET quantity = $2, price = $3, updated_at = NOW() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(row.id)
            .bind(requested_total)
            .bind(price)
            .fetch_one(&mut *tx)
            .await?
        }
        None => {
            // A concurrent first-add of the same line can slip past the
            // select above; the partial unique index turns that into a
            // conflict, which merges quantities instead of erroring.
            let insert = match identity {
                CartIdentity::User(_) => {
                    "INSERT INTO cart_items (id, user_id, session_id, product_id, quantity, price) \
                     VALUES ($1, $2, $3, $4, $5, $6) \
                     ON CONFLICT (user_id, product_id) WHERE user_id IS NOT NULL \
                     DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, \
                        price = EXCLUDED.price, updated_at = NOW() \
                     RETURNING *"
                }
                CartIdentity::Session(_) => {
                    "INSERT INTO cart_items (id, user_id, session_id, product_id, quantity, price) \
                     VALUES ($1, $2, $3, $4, $5, $6) \
                     ON CONFLICT (session_id, product_id) WHERE session_id IS NOT NULL \
                     DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, \
                        price = EXCLUDED.price, updated_at = NOW() \
                     RETURNING *"
                }
            };
            sqlx::query_as::<_, CartItem>(insert)
                .bind(Uuid::now_v7())
                .bind(user_id)
                .bind(&session_id)
                .bind(product_id)
                .bind(quantity)
                .bind(price)
                .fetch_one(&mut *tx)
                .await?
        }
    };

    tx.commit().await?;
    tracing::debug!(identity = %identity, %product_id, quantity, "cart item added");
    Ok(item)
}

/// Set a line's quantity. A non-positive quantity means removal and is
/// idempotent; `Ok(None)` reports that no line remains. Positive quantities
/// are re-validated against current stock and the price snapshot refreshed.
pub async fn update_quantity(
    pool: &PgPool,
    identity: &CartIdentity,
    item_id: Uuid,
    quantity: i32,
) -> Result<Option<CartItem>> {
    if quantity <= 0 {
        remove_item(pool, identity, item_id).await?;
        return Ok(None);
    }
    check_quantity(quantity)?;
    let (user_id, session_id) = identity.columns();

    let mut tx = pool.begin().await?;

    // Ownership scoping: a foreign item id reads as plain not-found.
    let item = sqlx::query_as::<_, CartItem>(
        "SELECT * FROM cart_items \
         WHERE id = $1 AND (user_id = $2 OR session_id = $3) FOR UPDATE",
    )
    .bind(item_id)
    .bind(user_id)
    .bind(&session_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(StoreError::NotFound)?;

    let product = load_product(&mut *tx, item.product_id).await?;
    if product.stock < quantity {
        return Err(StoreError::InsufficientStock { product_id: item.product_id });
    }

    let updated = sqlx::query_as::<_, CartItem>(
        "UPDATE cart_items SET quantity = $2, price = $3, updated_at = NOW() \
         WHERE id = $1 RETURNING *",
    )
    .bind(item.id)
    .bind(quantity)
    .bind(product.effective_price())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(updated))
}

/// Delete a line. Idempotent; the return value says whether a row actually
/// went away.
pub async fn remove_item(pool: &PgPool, identity: &CartIdentity, item_id: Uuid) -> Result<bool> {
    let (user_id, session_id) = identity.columns();
    let result = sqlx::query(
        "DELETE FROM cart_items WHERE id = $1 AND (user_id = $2 OR session_id = $3)",
    )
    .bind(item_id)
    .bind(user_id)
    .bind(&session_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every line for the identity. Takes any executor so checkout can
/// clear the purchaser's cart inside its transaction.
pub async fn clear(exec: impl PgExecutor<'_>, identity: &CartIdentity) -> Result<u64> {
    let (user_id, session_id) = identity.columns();
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 OR session_id = $2")
        .bind(user_id)
        .bind(&session_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Current cart contents with computed totals.
pub async fn get_cart(pool: &PgPool, identity: &CartIdentity) -> Result<CartView> {
    let (user_id, session_id) = identity.columns();
    let lines = sqlx::query_as::<_, (Uuid, Uuid, String, i32, Decimal, DateTime<Utc>)>(
        "SELECT ci.id, ci.product_id, p.name, ci.quantity, ci.price, ci.updated_at \
         FROM cart_items ci JOIN products p ON p.id = ci.product_id \
         WHERE ci.user_id = $1 OR ci.session_id = $2 \
         ORDER BY ci.created_at",
    )
    .bind(user_id)
    .bind(&session_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(id, product_id, product_name, quantity, price, updated_at)| CartLine {
        id,
        product_id,
        product_name,
        quantity,
        price,
        line_total: price * Decimal::from(quantity),
        updated_at,
    })
    .collect();
    Ok(CartView::from_lines(lines))
}

/// Fold an anonymous session's cart into a user's cart at login time.
///
/// Best-effort by design: each line is attempted independently through the
/// normal stock-validated add path, and a line that no longer fits (stock
/// vanished, product deactivated) is dropped rather than aborting the merge.
/// The session cart is cleared unconditionally afterwards. This is not a
/// monetary operation, so item-level skip beats all-or-nothing here.
pub async fn merge_session_into_user(
    pool: &PgPool,
    session_id: &str,
    user_id: Uuid,
) -> Result<Vec<MergeOutcome>> {
    let session = CartIdentity::Session(session_id.to_string());
    let user = CartIdentity::User(user_id);

    let items = sqlx::query_as::<_, CartItem>(
        "SELECT * FROM cart_items WHERE session_id = $1 ORDER BY created_at",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        let outcome = match add_item(pool, &user, item.product_id, item.quantity).await {
            Ok(_) => MergeOutcome {
                product_id: item.product_id,
                quantity: item.quantity,
                merged: true,
                reason: None,
            },
            Err(err) => {
                tracing::info!(
                    %user_id,
                    product_id = %item.product_id,
                    %err,
                    "cart merge dropped an item"
                );
                MergeOutcome {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    merged: false,
                    reason: Some(err.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    clear(pool, &session).await?;
    Ok(outcomes)
}

/// Maintenance sweep: re-snapshot every line's price to the product's current
/// effective price. Quantities are untouched; past orders are untouched.
pub async fn refresh_prices(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE cart_items ci SET price = \
           CASE WHEN p.sale_price IS NOT NULL AND p.sale_price < p.price \
                THEN p.sale_price ELSE p.price END, \
           updated_at = NOW() \
         FROM products p WHERE p.id = ci.product_id",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Drop anonymous-session lines older than `max_age_days`. Registered users'
/// carts are never swept.
pub async fn sweep_abandoned(pool: &PgPool, max_age_days: i32) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM cart_items \
         WHERE session_id IS NOT NULL \
           AND updated_at < NOW() - make_interval(days => $1)",
    )
    .bind(max_age_days)
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        tracing::info!(removed = result.rows_affected(), "swept abandoned session carts");
    }
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(qty: i32, price: Decimal) -> CartLine {
        CartLine {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Widget".into(),
            quantity: qty,
            price,
            line_total: price * Decimal::from(qty),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn view_totals_sum_line_totals() {
        let view = CartView::from_lines(vec![line(2, dec!(10.00)), line(1, dec!(5.50))]);
        assert_eq!(view.subtotal, dec!(25.50));
        assert_eq!(view.item_count, 3);
    }

    #[test]
    fn empty_view_is_zero() {
        let view = CartView::from_lines(vec![]);
        assert_eq!(view.subtotal, Decimal::ZERO);
        assert_eq!(view.item_count, 0);
    }

    #[test]
    fn quantity_bounds() {
        assert!(check_quantity(0).is_err());
        assert!(check_quantity(1).is_ok());
        assert!(check_quantity(MAX_QUANTITY).is_ok());
        assert!(check_quantity(MAX_QUANTITY + 1).is_err());
    }
}
