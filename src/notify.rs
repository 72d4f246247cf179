//! Fire-and-forget order notifications over NATS.
//!
//! Publishing happens after the checkout transaction commits, on a spawned
//! task; a broker outage is logged and never fails or rolls back the order.

use crate::models::Order;

const ORDER_CREATED_SUBJECT: &str = "cartwright.orders.created";

pub fn order_created(nats: Option<async_nats::Client>, order: &Order) {
    let Some(client) = nats else { return };
    let payload = match serde_json::to_vec(order) {
        Ok(p) => p,
        Err(err) => {
            tracing::warn!(%err, "failed to serialize order notification");
            return;
        }
    };
    let order_number = order.order_number.clone();
    tokio::spawn(async move {
        if let Err(err) = client.publish(ORDER_CREATED_SUBJECT, payload.into()).await {
            tracing::warn!(%err, order_number, "order notification not delivered");
        }
    });
}
