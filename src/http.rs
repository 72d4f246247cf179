//! HTTP surface: axum handlers and request/response DTOs.
//!
//! Identity arrives from the upstream gateway as trusted `x-user-id` /
//! `x-session-id` headers; this service never issues sessions itself. Admin
//! routes are mounted under `/api/v1/admin` and assumed to sit behind the
//! gateway's authorization.

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::cart::{self, CartView, MergeOutcome};
use crate::catalog::{self, NewProduct};
use crate::error::{Result, StoreError};
use crate::identity::CartIdentity;
use crate::models::{CartItem, Order, OrderStatus, PaymentMethod, PaymentStatus, Product};
use crate::orders::{
    self, NewOrder, OrderAccess, OrderQuery, OrderSort, OrderWithItems, RequestedLine,
    StatusUpdate,
};
use crate::reports::{self, SalesReport};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub nats: Option<async_nats::Client>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product))
        .route("/api/v1/cart", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/items", post(add_cart_item))
        .route("/api/v1/cart/items/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/cart/merge", post(merge_cart))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_my_orders))
        .route("/api/v1/orders/:id", get(get_my_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_my_order))
        .route("/api/v1/orders/number/:number", get(get_my_order_by_number))
        .route("/api/v1/admin/orders", get(admin_list_orders))
        .route("/api/v1/admin/orders/:id", put(admin_update_order))
        .route("/api/v1/admin/orders/:id/cancel", post(admin_cancel_order))
        .route("/api/v1/admin/reports/sales", get(sales_report))
        .route("/api/v1/admin/maintenance/refresh-prices", post(refresh_prices))
        .route("/api/v1/admin/maintenance/sweep-carts", post(sweep_carts))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "cartwright"}))
}

const USER_HEADER: &str = "x-user-id";
const SESSION_HEADER: &str = "x-session-id";

fn header_value(parts: &Parts, name: &str) -> Result<Option<String>> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(|s| Some(s.to_string()))
            .map_err(|_| StoreError::Validation(format!("{name} is not valid UTF-8"))),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CartIdentity {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self> {
        let user = header_value(parts, USER_HEADER)?;
        let session = header_value(parts, SESSION_HEADER)?;
        match (user, session) {
            (Some(user), _) => {
                let id = user
                    .parse()
                    .map_err(|_| StoreError::Validation("x-user-id is not a UUID".into()))?;
                Ok(CartIdentity::User(id))
            }
            (None, Some(session)) if !session.is_empty() => Ok(CartIdentity::Session(session)),
            _ => Err(StoreError::Validation(
                "either x-user-id or x-session-id is required".into(),
            )),
        }
    }
}

/// Extractor for routes that require an authenticated user (checkout, order
/// management). Anonymous sessions are rejected before any work happens.
pub struct AuthedUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match CartIdentity::from_request_parts(parts, state).await? {
            CartIdentity::User(id) => Ok(AuthedUser(id)),
            CartIdentity::Session(_) => {
                Err(StoreError::Validation("this operation requires a signed-in user".into()))
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

// --- catalog -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProductListParams {
    page: Option<u32>,
    per_page: Option<u32>,
    include_inactive: Option<bool>,
}

async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ProductListParams>,
) -> Result<Json<PaginatedResponse<Product>>> {
    let page = p.page.unwrap_or(1);
    let (data, total) = catalog::list_products(
        &s.db,
        !p.include_inactive.unwrap_or(false),
        page,
        p.per_page.unwrap_or(20),
    )
    .await?;
    Ok(Json(PaginatedResponse { data, total, page }))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    Ok(Json(catalog::get_product(&s.db, id).await?))
}

async fn create_product(
    State(s): State<AppState>,
    Json(input): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = catalog::create_product(&s.db, input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<NewProduct>,
) -> Result<Json<Product>> {
    Ok(Json(catalog::update_product(&s.db, id, input).await?))
}

// --- cart --------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    quantity: i32,
}

async fn get_cart(State(s): State<AppState>, identity: CartIdentity) -> Result<Json<CartView>> {
    Ok(Json(cart::get_cart(&s.db, &identity).await?))
}

async fn add_cart_item(
    State(s): State<AppState>,
    identity: CartIdentity,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartItem>)> {
    req.validate().map_err(|e| StoreError::Validation(e.to_string()))?;
    let item = cart::add_item(&s.db, &identity, req.product_id, req.quantity).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Deserialize)]
struct UpdateItemRequest {
    quantity: i32,
}

#[derive(Debug, Serialize)]
struct UpdateItemResponse {
    item: Option<CartItem>,
    removed: bool,
}

async fn update_cart_item(
    State(s): State<AppState>,
    identity: CartIdentity,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<UpdateItemResponse>> {
    let item = cart::update_quantity(&s.db, &identity, id, req.quantity).await?;
    let removed = item.is_none();
    Ok(Json(UpdateItemResponse { item, removed }))
}

#[derive(Debug, Serialize)]
struct RemovedResponse {
    removed: bool,
}

async fn remove_cart_item(
    State(s): State<AppState>,
    identity: CartIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<RemovedResponse>> {
    let removed = cart::remove_item(&s.db, &identity, id).await?;
    Ok(Json(RemovedResponse { removed }))
}

async fn clear_cart(State(s): State<AppState>, identity: CartIdentity) -> Result<StatusCode> {
    cart::clear(&s.db, &identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
struct MergeRequest {
    #[validate(length(min = 1))]
    session_id: String,
}

async fn merge_cart(
    State(s): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(req): Json<MergeRequest>,
) -> Result<Json<Vec<MergeOutcome>>> {
    req.validate().map_err(|e| StoreError::Validation(e.to_string()))?;
    let outcomes = cart::merge_session_into_user(&s.db, &req.session_id, user_id).await?;
    Ok(Json(outcomes))
}

// --- checkout & orders --------------------------------------------------

#[derive(Debug, Deserialize)]
struct CheckoutItem {
    product_id: Uuid,
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    /// Explicit lines; when omitted the user's current cart is checked out.
    items: Option<Vec<CheckoutItem>>,
    shipping_address: serde_json::Value,
    billing_address: Option<serde_json::Value>,
    payment_method: PaymentMethod,
    notes: Option<String>,
}

async fn checkout(
    State(s): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderWithItems>)> {
    let items = match req.items {
        Some(items) => items
            .into_iter()
            .map(|i| RequestedLine { product_id: i.product_id, quantity: i.quantity })
            .collect(),
        None => cart::get_cart(&s.db, &CartIdentity::User(user_id))
            .await?
            .items
            .into_iter()
            .map(|l| RequestedLine { product_id: l.product_id, quantity: l.quantity })
            .collect(),
    };
    let billing = req.billing_address.unwrap_or_else(|| req.shipping_address.clone());
    let created = orders::create_order(
        &s.db,
        NewOrder {
            user_id,
            items,
            shipping_address: req.shipping_address,
            billing_address: billing,
            payment_method: req.payment_method,
            notes: req.notes,
        },
    )
    .await?;
    crate::notify::order_created(s.nats.clone(), &created.order);
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct OrderListParams {
    page: Option<u32>,
    per_page: Option<u32>,
    status: Option<String>,
    sort: Option<OrderSort>,
    desc: Option<bool>,
}

fn parse_status_filter(raw: Option<String>) -> Result<Option<OrderStatus>> {
    raw.map(|s| OrderStatus::parse(&s)).transpose()
}

async fn list_my_orders(
    State(s): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Query(p): Query<OrderListParams>,
) -> Result<Json<PaginatedResponse<Order>>> {
    let page = p.page.unwrap_or(1);
    let query = OrderQuery {
        status: parse_status_filter(p.status)?,
        user_id: Some(user_id),
        sort: p.sort.unwrap_or_default(),
        descending: p.desc.unwrap_or(true),
        page,
        per_page: p.per_page.unwrap_or(20),
        ..Default::default()
    };
    let (data, total) = orders::list_orders(&s.db, &query).await?;
    Ok(Json(PaginatedResponse { data, total, page }))
}

async fn get_my_order(
    State(s): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderWithItems>> {
    Ok(Json(orders::get_order(&s.db, id, OrderAccess::Owner(user_id)).await?))
}

async fn get_my_order_by_number(
    State(s): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(number): Path<String>,
) -> Result<Json<OrderWithItems>> {
    Ok(Json(
        orders::get_order_by_number(&s.db, &number, OrderAccess::Owner(user_id)).await?,
    ))
}

#[derive(Debug, Deserialize, Default)]
struct CancelRequest {
    reason: Option<String>,
}

async fn cancel_my_order(
    State(s): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
    req: Option<Json<CancelRequest>>,
) -> Result<Json<Order>> {
    let reason = req.and_then(|Json(r)| r.reason);
    let order = orders::cancel_order(&s.db, id, OrderAccess::Owner(user_id), reason).await?;
    Ok(Json(order))
}

// --- admin --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AdminOrderListParams {
    page: Option<u32>,
    per_page: Option<u32>,
    status: Option<String>,
    user_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    sort: Option<OrderSort>,
    desc: Option<bool>,
}

async fn admin_list_orders(
    State(s): State<AppState>,
    Query(p): Query<AdminOrderListParams>,
) -> Result<Json<PaginatedResponse<Order>>> {
    let page = p.page.unwrap_or(1);
    let query = OrderQuery {
        status: parse_status_filter(p.status)?,
        user_id: p.user_id,
        from: p.from,
        to: p.to,
        sort: p.sort.unwrap_or_default(),
        descending: p.desc.unwrap_or(true),
        page,
        per_page: p.per_page.unwrap_or(20),
    };
    let (data, total) = orders::list_orders(&s.db, &query).await?;
    Ok(Json(PaginatedResponse { data, total, page }))
}

#[derive(Debug, Deserialize)]
struct AdminUpdateRequest {
    status: Option<String>,
    payment_status: Option<PaymentStatus>,
    tracking_number: Option<String>,
    notes: Option<String>,
}

async fn admin_update_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdminUpdateRequest>,
) -> Result<Json<Order>> {
    let update = StatusUpdate {
        status: req.status.map(|raw| OrderStatus::parse(&raw)).transpose()?,
        payment_status: req.payment_status,
        tracking_number: req.tracking_number,
        notes: req.notes,
    };
    Ok(Json(orders::admin_update_order(&s.db, id, update).await?))
}

async fn admin_cancel_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    req: Option<Json<CancelRequest>>,
) -> Result<Json<Order>> {
    let reason = req.and_then(|Json(r)| r.reason);
    Ok(Json(orders::cancel_order(&s.db, id, OrderAccess::Admin, reason).await?))
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn sales_report(
    State(s): State<AppState>,
    Query(p): Query<ReportParams>,
) -> Result<Json<SalesReport>> {
    let to = p.to.unwrap_or_else(Utc::now);
    let from = p.from.unwrap_or(to - Duration::days(30));
    Ok(Json(reports::sales_summary(&s.db, from, to).await?))
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    affected: u64,
}

async fn refresh_prices(State(s): State<AppState>) -> Result<Json<SweepResponse>> {
    let affected = cart::refresh_prices(&s.db).await?;
    Ok(Json(SweepResponse { affected }))
}

#[derive(Debug, Deserialize)]
struct SweepRequest {
    max_age_days: Option<i32>,
}

async fn sweep_carts(
    State(s): State<AppState>,
    req: Option<Json<SweepRequest>>,
) -> Result<Json<SweepResponse>> {
    let days = req.and_then(|Json(r)| r.max_age_days).unwrap_or(30);
    if days < 1 {
        return Err(StoreError::Validation("max_age_days must be at least 1".into()));
    }
    let affected = cart::sweep_abandoned(&s.db, days).await?;
    Ok(Json(SweepResponse { affected }))
}
