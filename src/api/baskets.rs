use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use crate::domain::aggregates::Basket;
use crate::services::{BasketView, Services};
use super::auth::{client_ip, CurrentUser};
use super::ApiResult;

pub async fn list_baskets(State(s): State<Services>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<Basket>>> {
    Ok(Json(s.list_baskets(&user).await?))
}

pub async fn basket_for_system(State(s): State<Services>, CurrentUser(user): CurrentUser, Path(system_slug): Path<String>) -> ApiResult<Json<BasketView>> {
    Ok(Json(s.basket_for_system(&user, &system_slug).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AddItemRequest {
    pub quantity: Option<u32>,
}

pub async fn create_from_product(
    State(s): State<Services>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Path((system_slug, sku)): Path<(String, String)>,
    body: Option<Json<AddItemRequest>>,
) -> ApiResult<(StatusCode, Json<BasketView>)> {
    let quantity = body.and_then(|Json(b)| b.quantity).unwrap_or(1);
    let ip = client_ip(&headers);
    let view = s.add_to_basket(&user, ip.as_deref(), &system_slug, &sku, quantity).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn remove_item(State(s): State<Services>, CurrentUser(user): CurrentUser, Path((system_slug, sku)): Path<(String, String)>) -> ApiResult<Json<BasketView>> {
    Ok(Json(s.remove_from_basket(&user, &system_slug, &sku).await?))
}

pub async fn clear(State(s): State<Services>, CurrentUser(user): CurrentUser, Path(system_slug): Path<String>) -> ApiResult<StatusCode> {
    s.clear_basket(&user, &system_slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DiscountCode {
    pub discount_code: String,
}

pub async fn add_discount(
    State(s): State<Services>,
    CurrentUser(user): CurrentUser,
    Path(system_slug): Path<String>,
    Query(q): Query<DiscountCode>,
) -> ApiResult<Json<BasketView>> {
    Ok(Json(s.apply_discount_code(&user, &system_slug, &q.discount_code).await?))
}
