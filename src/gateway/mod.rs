//! Payment gateway seam.
//!
//! Checkout hands the customer to a hosted payment page with a signed form;
//! the gateway reports back with signed fields. Refunds and pending-order
//! lookups go through the gateway's REST API.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use crate::Result;

pub mod cybersource;

pub use cybersource::CybersourceGateway;

/// Form fields as posted by, or to, the hosted payment page.
pub type Fields = BTreeMap<String, String>;

pub const REASON_CODE_SUCCESS: u32 = 100;
pub const ACCEPT_CODES: &[u32] = &[100, 110];
pub const REVIEW_CODES: &[u32] = &[200, 201, 230, 520];
pub const DECLINE_CODES: &[u32] = &[
    102, 200, 202, 203, 204, 205, 207, 208, 210, 211, 221, 222, 230, 231, 232, 233, 234, 236, 240, 475, 476, 478, 481,
];
pub const ERROR_CODES: &[u32] = &[102, 104, 150, 151, 152];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorState {
    Accepted,
    Declined,
    Error,
    Cancelled,
    Review,
    Pending,
}

impl ProcessorState {
    /// Refund outcomes we treat as done.
    pub fn is_refund_success(self) -> bool { matches!(self, Self::Accepted | Self::Pending) }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GatewayItem {
    pub code: String,
    pub name: String,
    pub quantity: u32,
    pub sku: String,
    pub unit_price: Decimal,
    pub tax_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GatewayOrder {
    pub username: String,
    pub ip_address: Option<String>,
    pub reference: String,
    pub items: Vec<GatewayItem>,
}

impl GatewayOrder {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(|i| (i.unit_price * Decimal::from(i.quantity)) + i.tax_amount).sum()
    }
}

/// What the browser should post to the hosted payment page.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutPayload {
    pub url: String,
    pub method: &'static str,
    pub payload: Fields,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessorResponse {
    pub state: ProcessorState,
    pub reason_code: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub message: String,
    pub response_data: serde_json::Value,
}

impl ProcessorResponse {
    pub fn numeric_reason_code(&self) -> Option<u32> {
        self.reason_code.as_deref().and_then(|c| c.trim().parse().ok())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RefundRequestData {
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RefundResponse {
    pub state: ProcessorState,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub message: String,
    pub response_data: serde_json::Value,
}

/// A transaction found for a pending order's reference number.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransactionLookup {
    pub reference: String,
    pub transaction_id: String,
    pub reason_code: u32,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn start_payment(&self, order: &GatewayOrder, receipt_url: &str, cancel_url: &str, merchant_fields: &[String]) -> Result<CheckoutPayload>;

    /// Whether the posted fields carry a valid signature.
    fn validate_response(&self, fields: &Fields) -> bool;

    fn format_response(&self, fields: &Fields) -> ProcessorResponse;

    fn reference_from_response(&self, fields: &Fields) -> Option<String>;

    async fn start_refund(&self, request: &RefundRequestData) -> Result<RefundResponse>;

    /// Look up transactions for these reference numbers, keyed by reference.
    async fn find_transactions(&self, references: &[String]) -> Result<HashMap<String, TransactionLookup>>;
}
