//! Unified Ecommerce
//!
//! One basket, checkout, payment and refund pipeline shared by many
//! integrated systems.
//!
//! ## Features
//! - Per-user, per-system baskets with automatic and code-based discounts
//! - Country blocking and tax collection decided by customer location
//! - Order lifecycle driven by payment gateway callbacks
//! - Refund requests approved or denied with e-mailed single-use codes
//! - Post-sale webhooks to the selling system

use thiserror::Error;

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod mail;
pub mod services;
pub mod store;
pub mod webhooks;

use domain::aggregates::{BasketError, DiscountError, OrderError, ProductError, RefundError, SystemError};
use domain::value_objects::{CountryCodeError, QuantityError, SkuError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("This product can't be purchased from your country")]
    ProductBlocked,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    #[error("{0}")]
    PaypalRefund(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Basket(#[from] BasketError),

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error(transparent)]
    Refund(#[from] RefundError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    System(#[from] SystemError),
}

pub type Result<T> = std::result::Result<T, EcommerceError>;

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<serde_json::Error> for EcommerceError {
    fn from(e: serde_json::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<SkuError> for EcommerceError {
    fn from(e: SkuError) -> Self { Self::Validation(e.to_string()) }
}

impl From<CountryCodeError> for EcommerceError {
    fn from(e: CountryCodeError) -> Self { Self::Validation(e.to_string()) }
}

impl From<QuantityError> for EcommerceError {
    fn from(e: QuantityError) -> Self { Self::Validation(e.to_string()) }
}
