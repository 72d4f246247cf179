//! Read-only reporting over the orders table. Never touches the
//! transactional core.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::Result;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusSummary {
    pub status: String,
    pub orders: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize)]
pub struct SalesReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub by_status: Vec<StatusSummary>,
    pub total_orders: i64,
    pub total_revenue: Decimal,
}

/// Order counts and revenue over `[from, to)`, grouped by status.
pub async fn sales_summary(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<SalesReport> {
    let by_status = sqlx::query_as::<_, StatusSummary>(
        "SELECT status, COUNT(*) AS orders, COALESCE(SUM(total), 0) AS revenue \
         FROM orders WHERE created_at >= $1 AND created_at < $2 \
         GROUP BY status ORDER BY status",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    let total_orders = by_status.iter().map(|s| s.orders).sum();
    let total_revenue = by_status.iter().map(|s| s.revenue).sum();
    Ok(SalesReport { from, to, by_status, total_orders, total_revenue })
}
