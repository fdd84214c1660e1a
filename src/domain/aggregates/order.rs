//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::product::ProductVersion;
use crate::domain::events::{DomainEvent, OrderEvent, SaleSource};
use crate::domain::value_objects::{quantize, CountryCode, Quantity};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    reference_number: String,
    purchaser_id: Uuid,
    integrated_system_id: Uuid,
    state: OrderState,
    total_price_paid: Decimal,
    tax_rate: Option<Decimal>,
    tax_country_code: Option<CountryCode>,
    purchaser_ip: Option<String>,
    lines: Vec<Line>,
    transactions: Vec<Transaction>,
    discount_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    #[default]
    Pending,
    Fulfilled,
    Canceled,
    Declined,
    Errored,
    Refunded,
    Review,
    PartiallyRefunded,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Fulfilled => "fulfilled", Self::Canceled => "canceled",
            Self::Declined => "declined", Self::Errored => "errored", Self::Refunded => "refunded",
            Self::Review => "review", Self::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        match self {
            Pending | Review => matches!(next, Fulfilled | Canceled | Declined | Errored | Review),
            Fulfilled | PartiallyRefunded => matches!(next, Refunded | PartiallyRefunded | Errored),
            Canceled | Declined | Errored | Refunded => false,
        }
    }

    /// Money changed hands for the order, whether or not some went back.
    pub fn is_paid(self) -> bool { matches!(self, Self::Fulfilled | Self::PartiallyRefunded | Self::Refunded) }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for OrderState {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|_| OrderError::UnknownState(s.to_string()))
    }
}

/// One purchased product, priced against the product version it was bought at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: Uuid,
    pub product_version: ProductVersion,
    pub quantity: Quantity,
    /// Total for the line after the best discount, before tax.
    pub discounted_price: Decimal,
    pub tax: Decimal,
    pub discount_id: Option<Uuid>,
}

impl Line {
    pub fn new(product_version: ProductVersion, quantity: Quantity, discounted_price: Decimal, tax: Decimal, discount_id: Option<Uuid>) -> Self {
        Self { id: Uuid::now_v7(), product_version, quantity, discounted_price: quantize(discounted_price), tax: quantize(tax), discount_id }
    }

    pub fn product_id(&self) -> Uuid { self.product_version.product_id }
    pub fn unit_price(&self) -> Decimal { self.product_version.price }
    pub fn total_price(&self) -> Decimal { quantize(self.unit_price() * self.quantity.as_decimal()) }
    pub fn total_with_tax(&self) -> Decimal { self.discounted_price + self.tax }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Payment,
    Refund,
}

/// Money moving on an order, as reported by the payment processor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub data: serde_json::Value,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Payment result handed to [`Order::fulfill`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentData {
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub data: serde_json::Value,
}

impl PaymentData {
    /// For orders that cost nothing and never reach the gateway.
    pub fn zero() -> Self {
        Self { transaction_id: None, amount: Decimal::ZERO, data: serde_json::json!({ "reason": "No payment required" }) }
    }
}

/// Refund result handed to [`Order::refund`].
#[derive(Clone, Debug, PartialEq)]
pub struct RefundRecord {
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub reason: String,
    pub data: serde_json::Value,
}

impl Order {
    pub fn create(purchaser_id: Uuid, integrated_system_id: Uuid, prefix: &str, environment: &str) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id, reference_number: format!("{prefix}-{environment}-{id}"), purchaser_id, integrated_system_id,
            state: OrderState::Pending, total_price_paid: Decimal::ZERO, tax_rate: None, tax_country_code: None,
            purchaser_ip: None, lines: vec![], transactions: vec![], discount_ids: vec![], created_at: now, updated_at: now,
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created { order_id: id, purchaser_id }));
        order
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn reference_number(&self) -> &str { &self.reference_number }
    pub fn purchaser_id(&self) -> Uuid { self.purchaser_id }
    pub fn integrated_system_id(&self) -> Uuid { self.integrated_system_id }
    pub fn state(&self) -> OrderState { self.state }
    pub fn total_price_paid(&self) -> Decimal { self.total_price_paid }
    pub fn tax_rate(&self) -> Option<Decimal> { self.tax_rate }
    pub fn tax_country_code(&self) -> Option<&CountryCode> { self.tax_country_code.as_ref() }
    pub fn purchaser_ip(&self) -> Option<&str> { self.purchaser_ip.as_deref() }
    pub fn lines(&self) -> &[Line] { &self.lines }
    pub fn transactions(&self) -> &[Transaction] { &self.transactions }
    pub fn discount_ids(&self) -> &[Uuid] { &self.discount_ids }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn is_review(&self) -> bool { self.state == OrderState::Review }
    pub fn is_fulfilled(&self) -> bool { self.state == OrderState::Fulfilled }

    pub fn total_tax(&self) -> Decimal { self.lines.iter().map(|l| l.tax).sum() }

    pub fn payment_transaction(&self) -> Option<&Transaction> {
        self.transactions.iter().rev().find(|t| t.transaction_type == TransactionType::Payment)
    }

    pub fn total_refunded(&self) -> Decimal {
        self.transactions.iter().filter(|t| t.transaction_type == TransactionType::Refund).map(|t| t.amount).sum()
    }

    /// Swap in freshly priced lines. Only pending orders can be repriced.
    pub fn replace_lines(&mut self, lines: Vec<Line>) -> Result<(), OrderError> {
        if self.state != OrderState::Pending { return Err(OrderError::NotPending(self.state)); }
        self.total_price_paid = quantize(lines.iter().map(Line::total_with_tax).sum());
        self.lines = lines;
        self.touch();
        Ok(())
    }

    pub fn set_discounts(&mut self, discount_ids: Vec<Uuid>) { self.discount_ids = discount_ids; self.touch(); }

    pub fn set_tax(&mut self, rate: Option<Decimal>, country: Option<CountryCode>) {
        self.tax_rate = rate;
        self.tax_country_code = country;
        self.touch();
    }

    pub fn set_purchaser_ip(&mut self, ip: Option<String>) { self.purchaser_ip = ip; self.touch(); }

    /// Record the payment and mark the order fulfilled. If the payment can't be
    /// recorded the order is moved to errored instead and the error returned.
    pub fn fulfill(&mut self, payment: &PaymentData, source: SaleSource) -> Result<(), OrderError> {
        self.ensure_transition(OrderState::Fulfilled)?;
        if let Err(e) = self.create_transaction(payment, "") {
            self.errored()?;
            return Err(e);
        }
        self.state = OrderState::Fulfilled;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Fulfilled { order_id: self.id, total: self.total_price_paid, source }));
        Ok(())
    }

    /// Record a payment-type transaction. A missing transaction id is only
    /// allowed for zero-value payments; recording the same id twice is a no-op.
    pub fn create_transaction(&mut self, payment: &PaymentData, reason: &str) -> Result<String, OrderError> {
        let transaction_id = match &payment.transaction_id {
            Some(id) => id.clone(),
            None if payment.amount.is_zero() => Uuid::new_v4().to_string(),
            None => return Err(OrderError::MissingTransactionId),
        };
        if !self.transactions.iter().any(|t| t.transaction_id == transaction_id) {
            self.transactions.push(Transaction {
                id: Uuid::now_v7(), transaction_id: transaction_id.clone(), transaction_type: TransactionType::Payment,
                amount: self.total_price_paid, data: payment.data.clone(), reason: reason.to_string(), created_at: Utc::now(),
            });
            self.touch();
        }
        Ok(transaction_id)
    }

    /// Record a refund. The order is refunded once refunds cover what was
    /// paid, partially refunded until then.
    pub fn refund(&mut self, record: RefundRecord) -> Result<Transaction, OrderError> {
        if !matches!(self.state, OrderState::Fulfilled | OrderState::PartiallyRefunded) {
            return Err(OrderError::InvalidTransition { from: self.state, to: OrderState::Refunded });
        }
        let Some(transaction_id) = record.transaction_id else {
            self.errored()?;
            return Err(OrderError::MissingTransactionId);
        };
        if self.transactions.iter().any(|t| t.transaction_id == transaction_id) {
            return Err(OrderError::DuplicateTransaction(transaction_id));
        }
        let transaction = Transaction {
            id: Uuid::now_v7(), transaction_id, transaction_type: TransactionType::Refund, amount: quantize(record.amount),
            data: record.data, reason: record.reason, created_at: Utc::now(),
        };
        self.transactions.push(transaction.clone());
        self.state = if self.total_refunded() >= self.total_price_paid { OrderState::Refunded } else { OrderState::PartiallyRefunded };
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Refunded { order_id: self.id, amount: transaction.amount }));
        Ok(transaction)
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition(OrderState::Canceled)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id }));
        Ok(())
    }

    pub fn decline(&mut self) -> Result<(), OrderError> {
        self.transition(OrderState::Declined)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Declined { order_id: self.id }));
        Ok(())
    }

    pub fn errored(&mut self) -> Result<(), OrderError> {
        self.transition(OrderState::Errored)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Errored { order_id: self.id }));
        Ok(())
    }

    pub fn review(&mut self) -> Result<(), OrderError> { self.transition(OrderState::Review) }

    fn transition(&mut self, next: OrderState) -> Result<(), OrderError> {
        self.ensure_transition(next)?;
        self.state = next;
        self.touch();
        Ok(())
    }

    fn ensure_transition(&self, next: OrderState) -> Result<(), OrderError> {
        if self.state.can_transition_to(next) { Ok(()) } else { Err(OrderError::InvalidTransition { from: self.state, to: next }) }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Pull the order id out of a reference number (`{prefix}-{environment}-{id}`).
/// Everything up to the last `-{environment}-` is dropped.
pub fn decode_reference_number(reference: &str, environment: &str) -> Option<Uuid> {
    let marker = format!("-{environment}-");
    let tail = match reference.rfind(&marker) {
        Some(at) => &reference[at + marker.len()..],
        None => reference,
    };
    Uuid::parse_str(tail).ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Order can't move from {from} to {to}")]
    InvalidTransition { from: OrderState, to: OrderState },
    #[error("Order is {0}, only pending orders can be changed")]
    NotPending(OrderState),
    #[error("Failed to record transaction: missing transaction id from payment API response")]
    MissingTransactionId,
    #[error("Transaction {0} is already recorded")]
    DuplicateTransaction(String),
    #[error("Unknown order state '{0}'")]
    UnknownState(String),
}
