//! End-to-end lifecycle tests against a real Postgres instance.
//!
//! `#[sqlx::test]` provisions an isolated database per test and applies
//! `./migrations`, so these exercise the actual transaction and row-locking
//! behavior the service relies on.

use cartwright::cart;
use cartwright::catalog::{self, NewProduct};
use cartwright::models::{PaymentMethod, Product};
use cartwright::orders::{self, NewOrder, OrderAccess, OrderQuery, RequestedLine};
use cartwright::{CartIdentity, StoreError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_product(pool: &PgPool, sku: &str, price: Decimal, stock: i32) -> Product {
    catalog::create_product(
        pool,
        NewProduct {
            sku: sku.into(),
            name: format!("{sku} widget"),
            description: None,
            price,
            sale_price: None,
            stock: Some(stock),
            is_active: Some(true),
        },
    )
    .await
    .expect("seed product")
}

fn order_input(user_id: Uuid, items: Vec<(Uuid, i32)>) -> NewOrder {
    NewOrder {
        user_id,
        items: items
            .into_iter()
            .map(|(product_id, quantity)| RequestedLine { product_id, quantity })
            .collect(),
        shipping_address: serde_json::json!({"city": "Lagos", "country": "NG"}),
        billing_address: serde_json::json!({"city": "Lagos", "country": "NG"}),
        payment_method: PaymentMethod::CashOnDelivery,
        notes: None,
    }
}

async fn stock_of(pool: &PgPool, id: Uuid) -> i32 {
    catalog::get_product(pool, id).await.expect("product exists").stock
}

#[sqlx::test]
async fn failed_checkout_rolls_back_stock_cart_and_order_rows(pool: PgPool) {
    let p1 = seed_product(&pool, "ROLL-1", dec!(20.00), 5).await;
    let p2 = seed_product(&pool, "ROLL-2", dec!(10.00), 1).await;
    let user = Uuid::new_v4();
    let identity = CartIdentity::User(user);

    cart::add_item(&pool, &identity, p1.id, 2).await.unwrap();

    // Second line exceeds stock, so the whole transaction must abort.
    let err = orders::create_order(&pool, order_input(user, vec![(p1.id, 2), (p2.id, 2)]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InsufficientStock { product_id } if product_id == p2.id));

    assert_eq!(stock_of(&pool, p1.id).await, 5);
    assert_eq!(stock_of(&pool, p2.id).await, 1);

    let (_, total) = orders::list_orders(
        &pool,
        &OrderQuery { user_id: Some(user), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(total, 0, "no order rows survive an aborted checkout");

    let view = cart::get_cart(&pool, &identity).await.unwrap();
    assert_eq!(view.item_count, 2, "cart untouched by the failed checkout");
}

#[sqlx::test]
async fn concurrent_checkouts_of_last_unit_sell_exactly_one(pool: PgPool) {
    let p = seed_product(&pool, "LAST-1", dec!(15.00), 1).await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (a, b) = tokio::join!(
        orders::create_order(&pool, order_input(alice, vec![(p.id, 1)])),
        orders::create_order(&pool, order_input(bob, vec![(p.id, 1)])),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one checkout wins the last unit");
    let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(err, StoreError::InsufficientStock { product_id } if product_id == p.id));
    assert_eq!(stock_of(&pool, p.id).await, 0);
}

#[sqlx::test]
async fn cancellation_restores_exactly_what_was_reserved(pool: PgPool) {
    let p = seed_product(&pool, "CANCEL-1", dec!(30.00), 10).await;
    let user = Uuid::new_v4();
    let identity = CartIdentity::User(user);

    cart::add_item(&pool, &identity, p.id, 3).await.unwrap();
    let created = orders::create_order(&pool, order_input(user, vec![(p.id, 3)]))
        .await
        .unwrap();
    assert_eq!(stock_of(&pool, p.id).await, 7);
    let view = cart::get_cart(&pool, &identity).await.unwrap();
    assert_eq!(view.item_count, 0, "cart cleared by successful checkout");

    // Unrelated restock between checkout and cancel. Cancellation must add
    // back the reserved 3, not recompute from anything else.
    sqlx::query("UPDATE products SET stock = stock + 2 WHERE id = $1")
        .bind(p.id)
        .execute(&pool)
        .await
        .unwrap();

    let cancelled = orders::cancel_order(
        &pool,
        created.order.id,
        OrderAccess::Owner(user),
        Some("changed my mind".into()),
    )
    .await
    .unwrap();
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(stock_of(&pool, p.id).await, 12);

    // A second cancel hits the state gate and must not release again.
    let err = orders::cancel_order(&pool, created.order.id, OrderAccess::Owner(user), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotCancellable { .. }));
    assert_eq!(stock_of(&pool, p.id).await, 12, "stock is not double-released");
}

#[sqlx::test]
async fn order_prices_are_frozen_at_checkout(pool: PgPool) {
    let p = seed_product(&pool, "FREEZE-1", dec!(20.00), 5).await;
    let user = Uuid::new_v4();

    let created = orders::create_order(&pool, order_input(user, vec![(p.id, 2)]))
        .await
        .unwrap();
    assert_eq!(created.items[0].price, dec!(20.00));
    assert_eq!(created.order.subtotal, dec!(40.00));

    sqlx::query("UPDATE products SET price = 99.00 WHERE id = $1")
        .bind(p.id)
        .execute(&pool)
        .await
        .unwrap();

    let fetched = orders::get_order(&pool, created.order.id, OrderAccess::Owner(user))
        .await
        .unwrap();
    assert_eq!(fetched.items[0].price, dec!(20.00));
    assert_eq!(fetched.items[0].total, dec!(40.00));
    assert_eq!(fetched.order.subtotal, dec!(40.00));
}

#[sqlx::test]
async fn remove_item_is_idempotent(pool: PgPool) {
    let p = seed_product(&pool, "REMOVE-1", dec!(5.00), 5).await;
    let identity = CartIdentity::Session("sess-remove".into());

    let item = cart::add_item(&pool, &identity, p.id, 1).await.unwrap();
    assert!(cart::remove_item(&pool, &identity, item.id).await.unwrap());
    assert!(!cart::remove_item(&pool, &identity, item.id).await.unwrap());

    let view = cart::get_cart(&pool, &identity).await.unwrap();
    assert_eq!(view.item_count, 0);
    assert_eq!(view.subtotal, Decimal::ZERO);
}

#[sqlx::test]
async fn re_adding_validates_the_combined_quantity(pool: PgPool) {
    let p = seed_product(&pool, "COMBINE-1", dec!(5.00), 5).await;
    let identity = CartIdentity::Session("sess-combine".into());

    cart::add_item(&pool, &identity, p.id, 3).await.unwrap();
    let err = cart::add_item(&pool, &identity, p.id, 3).await.unwrap_err();
    assert!(matches!(err, StoreError::InsufficientStock { product_id } if product_id == p.id));

    let view = cart::get_cart(&pool, &identity).await.unwrap();
    assert_eq!(view.item_count, 3, "failed re-add leaves the line unchanged");
}

#[sqlx::test]
async fn concurrent_first_adds_merge_into_one_line(pool: PgPool) {
    let p = seed_product(&pool, "RACE-1", dec!(5.00), 10).await;
    let user = Uuid::new_v4();
    let identity = CartIdentity::User(user);

    let (a, b) = tokio::join!(
        cart::add_item(&pool, &identity, p.id, 2),
        cart::add_item(&pool, &identity, p.id, 3),
    );
    a.unwrap();
    b.unwrap();

    let view = cart::get_cart(&pool, &identity).await.unwrap();
    assert_eq!(view.items.len(), 1, "both adds land on a single line");
    assert_eq!(view.item_count, 5);
}
