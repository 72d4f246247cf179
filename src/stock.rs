//! Stock ledger: the authoritative countable quantity per product.
//!
//! `reserve` is a single conditional UPDATE, so two concurrent reservations
//! against the same product serialize on the row lock and the non-negativity
//! CHECK can never be violated by interleaving. Both operations take any
//! executor so the coordinator can run them inside its transaction; a failed
//! reserve has no side effect.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Atomically decrement `stock` by `qty`, failing without effect when fewer
/// than `qty` units remain (or the product row does not exist).
pub async fn reserve(exec: impl PgExecutor<'_>, product_id: Uuid, qty: i32) -> Result<()> {
    debug_assert!(qty > 0);
    let result = sqlx::query(
        "UPDATE products SET stock = stock - $2, updated_at = NOW() \
         WHERE id = $1 AND stock >= $2",
    )
    .bind(product_id)
    .bind(qty)
    .execute(exec)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::InsufficientStock { product_id });
    }
    tracing::debug!(%product_id, qty, "stock reserved");
    Ok(())
}

/// Unconditionally return `qty` units to the shelf. Used on cancellation to
/// restore exactly what `reserve` took, regardless of intervening stock
/// edits. A missing product row (purged from the catalog) is logged and
/// tolerated rather than blocking the cancellation.
pub async fn release(exec: impl PgExecutor<'_>, product_id: Uuid, qty: i32) -> Result<()> {
    debug_assert!(qty > 0);
    let result = sqlx::query(
        "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(product_id)
    .bind(qty)
    .execute(exec)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!(%product_id, qty, "release against a purged product, skipped");
    } else {
        tracing::debug!(%product_id, qty, "stock released");
    }
    Ok(())
}
