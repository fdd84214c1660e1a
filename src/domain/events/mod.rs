//! Domain events

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a completed sale (or refund) was reported from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleSource {
    /// The customer's browser came back from the gateway.
    Redirect,
    /// The gateway called us server to server, or staff resolved the order.
    Backoffice,
    /// A refund was issued.
    Refund,
}

impl SaleSource {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Redirect => "redirect", Self::Backoffice => "backoffice", Self::Refund => "refund" }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Basket(BasketEvent),
    Order(OrderEvent),
    Refund(RefundEvent),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BasketEvent {
    ItemAdded { basket_id: Uuid, system_id: Uuid, user_id: Uuid, product_id: Uuid },
    ItemRemoved { basket_id: Uuid, system_id: Uuid, user_id: Uuid, product_id: Uuid },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, purchaser_id: Uuid },
    Fulfilled { order_id: Uuid, total: Decimal, source: SaleSource },
    Declined { order_id: Uuid },
    Cancelled { order_id: Uuid },
    Errored { order_id: Uuid },
    Refunded { order_id: Uuid, amount: Decimal },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RefundEvent {
    Created { request_id: Uuid, order_id: Uuid },
    Issued { request_id: Uuid, order_id: Uuid },
    Denied { request_id: Uuid, order_id: Uuid },
}

impl DomainEvent {
    /// Subject the event is published under on the message bus.
    pub fn subject(&self) -> String {
        let name = match self {
            Self::Basket(BasketEvent::ItemAdded { .. }) => "basket.item_added",
            Self::Basket(BasketEvent::ItemRemoved { .. }) => "basket.item_removed",
            Self::Order(OrderEvent::Created { .. }) => "order.created",
            Self::Order(OrderEvent::Fulfilled { .. }) => "order.fulfilled",
            Self::Order(OrderEvent::Declined { .. }) => "order.declined",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Order(OrderEvent::Errored { .. }) => "order.errored",
            Self::Order(OrderEvent::Refunded { .. }) => "order.refunded",
            Self::Refund(RefundEvent::Created { .. }) => "refund.created",
            Self::Refund(RefundEvent::Issued { .. }) => "refund.issued",
            Self::Refund(RefundEvent::Denied { .. }) => "refund.denied",
        };
        format!("ecommerce.{name}")
    }
}
