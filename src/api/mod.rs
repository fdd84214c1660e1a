//! HTTP API.

use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use validator::Validate;
use crate::services::Services;

pub mod auth;
pub mod baskets;
pub mod checkout;
pub mod error;
pub mod meta;
pub mod orders;
pub mod refunds;

pub use error::{ApiError, ApiResult};

pub fn router(services: Services) -> Router {
    let api = Router::new()
        .route("/meta/integrated_systems", get(meta::list_systems).post(meta::create_system))
        .route("/meta/integrated_systems/:id", get(meta::get_system).patch(meta::update_system).delete(meta::delete_system))
        .route("/meta/products", get(meta::list_products).post(meta::create_product))
        .route("/meta/products/:id", get(meta::get_product).patch(meta::update_product).delete(meta::delete_product))
        .route("/meta/discounts", get(meta::list_discounts).post(meta::create_discount))
        .route("/meta/tax_rates", get(meta::list_tax_rates).post(meta::create_tax_rate))
        .route("/meta/blocked_countries", get(meta::list_blocked_countries).post(meta::create_blocked_country))
        .route("/meta/netblocks", post(meta::create_netblock))
        .route("/meta/refund_recipients", post(meta::create_refund_recipient))
        .route("/baskets", get(baskets::list_baskets))
        .route("/baskets/for_system/:system_slug", get(baskets::basket_for_system))
        .route("/baskets/create_from_product/:system_slug/:sku", post(baskets::create_from_product))
        .route("/baskets/:system_slug/items/:sku", delete(baskets::remove_item))
        .route("/baskets/:system_slug/clear", delete(baskets::clear))
        .route("/baskets/:system_slug/add_discount", post(baskets::add_discount))
        .route("/checkout/result", post(checkout::result))
        .route("/checkout/backoffice", post(checkout::backoffice))
        .route("/checkout/pending/resolve", post(checkout::resolve_pending))
        .route("/checkout/:system_slug", post(checkout::start))
        .route("/orders/history", get(orders::history))
        .route("/orders/history/:id", get(orders::detail))
        .route("/orders/:id/refund", post(orders::refund))
        .route("/refunds", get(refunds::list))
        .route("/refunds/create_from_order", post(refunds::create_from_order))
        .route("/refunds/process_code", get(refunds::process_code_link).post(refunds::process_code))
        .route("/refunds/sheet_row", post(refunds::sheet_row))
        .route("/refunds/:id", get(refunds::detail))
        .route("/refunds/:id/approve", patch(refunds::approve))
        .route("/refunds/:id/deny", patch(refunds::deny))
        .route("/refunds/:id/process", post(refunds::process));

    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "unified-ecommerce"})) }))
        .nest("/api/v0", api)
        .with_state(services)
}

/// Run a request body's declared validations.
pub(crate) fn validated<T: Validate>(body: T) -> ApiResult<T> {
    body.validate().map_err(|e| ApiError::Invalid(e.to_string()))?;
    Ok(body)
}

pub(crate) fn non_negative(value: &rust_decimal::Decimal) -> Result<(), validator::ValidationError> {
    if value.is_sign_negative() { Err(validator::ValidationError::new("negative")) } else { Ok(()) }
}
