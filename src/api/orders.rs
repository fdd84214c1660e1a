use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use crate::domain::aggregates::Order;
use crate::services::{OrderLookup, Services};
use super::auth::{CurrentUser, StaffUser};
use super::ApiResult;

pub async fn history(State(s): State<Services>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.order_history(&user).await?))
}

pub async fn detail(State(s): State<Services>, CurrentUser(user): CurrentUser, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.order_for(&user, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundOrderRequest {
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: String,
}

/// Staff refund of an order, by id or reference number.
pub async fn refund(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<String>, Json(r): Json<RefundOrderRequest>) -> ApiResult<Json<Order>> {
    let lookup = match Uuid::parse_str(&id) {
        Ok(id) => OrderLookup::Id(id),
        Err(_) => OrderLookup::Reference(id),
    };
    Ok(Json(s.refund_order(&staff, lookup, r.amount, &r.reason).await?))
}
