//! Row types and the order status state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Unit price a buyer actually pays: the sale price when one is set and
    /// lower than the list price.
    pub fn effective_price(&self) -> Decimal {
        match self.sale_price {
            Some(sale) if sale < self.price => sale,
            _ => self.price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Price snapshot captured at add/update time; checkout reprices against
    /// the live catalog and ignores this.
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub payment_method: serde_json::Value,
    pub payment_status: String,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
}

/// Payment method as a closed set of known provider shapes, with an escape
/// hatch for anything else. Stored as tagged JSON on the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card { brand: String, last_four: String },
    BankTransfer { reference: String },
    CashOnDelivery,
    Other { provider: String, detail: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Customer-facing cancellation gate: an order already handed to the
    /// carrier (or done) cannot be cancelled.
    pub fn is_cancellable(&self) -> bool {
        !matches!(self, Self::Shipped | Self::Delivered | Self::Cancelled)
    }

    /// Admin override rules. Deliberately permissive: any of the five active
    /// statuses may be set out of order (manual corrections), but terminal
    /// states only admit self-transitions, and `cancelled` is never reachable
    /// this way because it must go through the stock-restoring cancel path.
    pub fn admin_can_set(&self, target: OrderStatus) -> Result<(), StoreError> {
        if *self == target {
            return Ok(());
        }
        if self.is_terminal() || target == Self::Cancelled {
            return Err(StoreError::InvalidTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, sale: Option<Decimal>) -> Product {
        Product {
            id: Uuid::new_v4(),
            sku: "SKU-1".into(),
            name: "Widget".into(),
            description: None,
            price,
            sale_price: sale,
            stock: 10,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn effective_price_prefers_lower_sale_price() {
        assert_eq!(product(dec!(20), Some(dec!(15))).effective_price(), dec!(15));
        assert_eq!(product(dec!(20), Some(dec!(25))).effective_price(), dec!(20));
        assert_eq!(product(dec!(20), None).effective_price(), dec!(20));
    }

    #[test]
    fn cancellable_states() {
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(OrderStatus::Confirmed.is_cancellable());
        assert!(OrderStatus::Processing.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn admin_may_reorder_active_statuses() {
        // Backwards moves are allowed for manual corrections.
        assert!(OrderStatus::Shipped.admin_can_set(OrderStatus::Confirmed).is_ok());
        assert!(OrderStatus::Pending.admin_can_set(OrderStatus::Delivered).is_ok());
    }

    #[test]
    fn admin_cannot_leave_terminal_states() {
        assert!(OrderStatus::Delivered.admin_can_set(OrderStatus::Pending).is_err());
        assert!(OrderStatus::Cancelled.admin_can_set(OrderStatus::Pending).is_err());
        // Self-transition is a no-op, not an error.
        assert!(OrderStatus::Delivered.admin_can_set(OrderStatus::Delivered).is_ok());
    }

    #[test]
    fn admin_cannot_cancel_via_status_update() {
        assert!(OrderStatus::Pending.admin_can_set(OrderStatus::Cancelled).is_err());
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(matches!(OrderStatus::parse("refunded"), Err(StoreError::UnknownStatus(_))));
    }

    #[test]
    fn payment_method_round_trips_as_tagged_json() {
        let m = PaymentMethod::Card { brand: "visa".into(), last_four: "4242".into() };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["type"], "card");
        let back: PaymentMethod = serde_json::from_value(v).unwrap();
        assert!(matches!(back, PaymentMethod::Card { .. }));
    }
}
