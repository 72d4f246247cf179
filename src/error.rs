//! Service error taxonomy.
//!
//! Validation errors are raised before any transaction opens; conflict and
//! state-transition errors always leave state unchanged because the failing
//! transaction never commits. Unknown-or-foreign resources collapse into a
//! single `NotFound` so callers cannot probe other identities' carts/orders.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("order has no items")]
    EmptyOrder,

    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },

    #[error("product {product_id} is unavailable")]
    ProductUnavailable { product_id: Uuid },

    #[error("not found")]
    NotFound,

    #[error("order is {status} and cannot be cancelled")]
    NotCancellable { status: String },

    #[error("cannot change status from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unrecognized order status: {0}")]
    UnknownStatus(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::EmptyOrder | Self::UnknownStatus(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InsufficientStock { .. }
            | Self::ProductUnavailable { .. }
            | Self::NotCancellable { .. }
            | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::EmptyOrder => "empty_order",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ProductUnavailable { .. } => "product_unavailable",
            Self::NotFound => "not_found",
            Self::NotCancellable { .. } => "not_cancellable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownStatus(_) => "unknown_status",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    /// The product a conflict error is about, if any. Lets the UI re-sync
    /// the offending line.
    fn product_id(&self) -> Option<Uuid> {
        match self {
            Self::InsufficientStock { product_id } | Self::ProductUnavailable { product_id } => {
                Some(*product_id)
            }
            _ => None,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        // Never leak internals to the client.
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let mut body = serde_json::json!({ "error": self.code(), "message": message });
        if let Some(product_id) = self.product_id() {
            body["product_id"] = serde_json::json!(product_id);
        }
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_name_the_product() {
        let id = Uuid::new_v4();
        let err = StoreError::InsufficientStock { product_id: id };
        assert_eq!(err.product_id(), Some(id));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_is_uniform() {
        let err = StoreError::NotFound;
        assert_eq!(err.to_string(), "not found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn transition_errors_are_distinct_from_not_found() {
        let err = StoreError::NotCancellable { status: "shipped".into() };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "not_cancellable");
    }
}
