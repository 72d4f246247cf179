//! Product catalog read/write path.
//!
//! Browsing reads are allowed to show slightly stale stock; only the ledger
//! path in [`crate::stock`] needs strict consistency. Admin writes here set
//! absolute stock levels and never race with reservations beyond normal row
//! locking.

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Result, StoreError};
use crate::models::Product;

#[derive(Debug, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock: Option<i32>,
    pub is_active: Option<bool>,
}

pub async fn list_products(
    pool: &PgPool,
    active_only: bool,
    page: u32,
    per_page: u32,
) -> Result<(Vec<Product>, i64)> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE ($1 = FALSE OR is_active) \
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(active_only)
    .bind(per_page as i64)
    .bind(crate::orders::page_offset(page, per_page))
    .fetch_all(pool)
    .await?;
    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM products WHERE ($1 = FALSE OR is_active)")
            .bind(active_only)
            .fetch_one(pool)
            .await?;
    Ok((products, total.0))
}

pub async fn get_product(pool: &PgPool, id: Uuid) -> Result<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound)
}

pub async fn create_product(pool: &PgPool, input: NewProduct) -> Result<Product> {
    input
        .validate()
        .map_err(|e| StoreError::Validation(e.to_string()))?;
    if input.price < Decimal::ZERO {
        return Err(StoreError::Validation("price must not be negative".into()));
    }
    Ok(sqlx::query_as::<_, Product>(
        "INSERT INTO products (id, sku, name, description, price, sale_price, stock, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&input.sku)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.price)
    .bind(input.sale_price)
    .bind(input.stock.unwrap_or(0))
    .bind(input.is_active.unwrap_or(true))
    .fetch_one(pool)
    .await?)
}

pub async fn update_product(pool: &PgPool, id: Uuid, input: NewProduct) -> Result<Product> {
    input
        .validate()
        .map_err(|e| StoreError::Validation(e.to_string()))?;
    sqlx::query_as::<_, Product>(
        "UPDATE products SET sku = $2, name = $3, description = $4, price = $5, \
         sale_price = $6, stock = COALESCE($7, stock), is_active = COALESCE($8, is_active), \
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&input.sku)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.price)
    .bind(input.sale_price)
    .bind(input.stock)
    .bind(input.is_active)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)
}
