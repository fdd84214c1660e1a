//! Integrated systems, products and the rest of the catalog.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::net::Ipv4Addr;
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{
    BlockedCountry, Discount, DiscountType, IntegratedSystem, NetBlock, PaymentType, Product, ProductChanges, RedemptionType,
    RequestRecipient, TaxRate,
};
use crate::domain::value_objects::{CountryCode, Sku};
use crate::services::Services;
use crate::EcommerceError;
use super::auth::{CurrentUser, StaffUser};
use super::{non_negative, validated, ApiResult};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSystemRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(url)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSystemRequest {
    pub description: Option<String>,
    #[validate(url)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub rotate_api_key: bool,
}

pub async fn list_systems(State(s): State<Services>, CurrentUser(_): CurrentUser) -> ApiResult<Json<Vec<IntegratedSystem>>> {
    let systems = s.store.list_systems().await?.into_iter().filter(|s| s.is_active).collect();
    Ok(Json(systems))
}

pub async fn get_system(State(s): State<Services>, CurrentUser(_): CurrentUser, Path(id): Path<Uuid>) -> ApiResult<Json<IntegratedSystem>> {
    Ok(Json(s.store.get_system(id).await?.ok_or(EcommerceError::NotFound("Integrated system"))?))
}

pub async fn create_system(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<CreateSystemRequest>) -> ApiResult<(StatusCode, Json<IntegratedSystem>)> {
    let r = validated(r)?;
    let system = s.create_system(&staff, &r.name, r.description, r.webhook_url).await?;
    Ok((StatusCode::CREATED, Json(system)))
}

pub async fn update_system(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<Uuid>, Json(r): Json<UpdateSystemRequest>) -> ApiResult<Json<IntegratedSystem>> {
    let r = validated(r)?;
    Ok(Json(s.update_system(&staff, id, r.description, r.webhook_url, r.rotate_api_key).await?))
}

pub async fn delete_system(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.deactivate_system(&staff, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ProductFilter {
    pub system_slug: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub system_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(custom = "non_negative")]
    pub price: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(custom = "non_negative")]
    pub price: Option<Decimal>,
    #[validate(url)]
    pub image_url: Option<String>,
}

pub async fn list_products(State(s): State<Services>, Query(f): Query<ProductFilter>) -> ApiResult<Json<Vec<Product>>> {
    let system_id = match f.system_slug {
        Some(slug) => Some(s.system_by_slug(&slug).await?.id),
        None => None,
    };
    let products = s.store.list_products(system_id).await?.into_iter().filter(|p| p.is_active()).collect();
    Ok(Json(products))
}

pub async fn get_product(State(s): State<Services>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.store.get_product(id).await?.ok_or(EcommerceError::NotFound("Product"))?))
}

pub async fn create_product(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<CreateProductRequest>) -> ApiResult<(StatusCode, Json<Product>)> {
    let r = validated(r)?;
    let product = s.create_product(&staff, r.system_id, &r.sku, &r.name, r.price, r.description).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<Uuid>, Json(r): Json<UpdateProductRequest>) -> ApiResult<Json<Product>> {
    let r = validated(r)?;
    let changes = ProductChanges {
        sku: r.sku.map(Sku::new).transpose()?,
        name: r.name,
        description: r.description,
        price: r.price,
        image_url: r.image_url,
    };
    let (product, _) = s.update_product(&staff, id, changes).await?;
    Ok(Json(product))
}

pub async fn delete_product(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.archive_product(&staff, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDiscountRequest {
    #[validate(length(min = 1, max = 100))]
    pub discount_code: String,
    #[validate(custom = "non_negative")]
    pub amount: Decimal,
    pub discount_type: DiscountType,
    #[serde(default)]
    pub redemption_type: Option<RedemptionType>,
    #[serde(default)]
    pub payment_type: Option<PaymentType>,
    #[serde(default)]
    pub automatic: bool,
    pub max_redemptions: Option<u32>,
    pub activation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub product_id: Option<Uuid>,
    pub integrated_system_id: Option<Uuid>,
    #[serde(default)]
    pub assigned_users: Vec<Uuid>,
}

pub async fn list_discounts(State(s): State<Services>, StaffUser(_): StaffUser) -> ApiResult<Json<Vec<Discount>>> {
    Ok(Json(s.store.list_discounts().await?))
}

pub async fn create_discount(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<CreateDiscountRequest>) -> ApiResult<(StatusCode, Json<Discount>)> {
    let r = validated(r)?;
    let mut discount = Discount::new(r.discount_code, r.discount_type, r.amount)?;
    if let Some(t) = r.redemption_type { discount.redemption_type = t; }
    if let Some(t) = r.payment_type { discount.payment_type = t; }
    discount.automatic = r.automatic;
    discount.max_redemptions = r.max_redemptions;
    discount.activation_date = r.activation_date;
    discount.expiration_date = r.expiration_date;
    discount.product_id = r.product_id;
    discount.integrated_system_id = r.integrated_system_id;
    discount.assigned_users = r.assigned_users;
    Ok((StatusCode::CREATED, Json(s.create_discount(&staff, discount).await?)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TaxRateRequest {
    #[validate(length(equal = 2))]
    pub country_code: String,
    #[validate(custom = "non_negative")]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub tax_rate_name: String,
}

pub async fn list_tax_rates(State(s): State<Services>, StaffUser(_): StaffUser) -> ApiResult<Json<Vec<TaxRate>>> {
    Ok(Json(s.store.list_tax_rates().await?))
}

pub async fn create_tax_rate(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<TaxRateRequest>) -> ApiResult<(StatusCode, Json<TaxRate>)> {
    let r = validated(r)?;
    Ok((StatusCode::CREATED, Json(s.set_tax_rate(&staff, &r.country_code, r.tax_rate, &r.tax_rate_name).await?)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BlockedCountryRequest {
    #[validate(length(equal = 2))]
    pub country_code: String,
    pub product_id: Option<Uuid>,
}

pub async fn list_blocked_countries(State(s): State<Services>, StaffUser(_): StaffUser) -> ApiResult<Json<Vec<BlockedCountry>>> {
    Ok(Json(s.store.list_blocked_countries().await?))
}

pub async fn create_blocked_country(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<BlockedCountryRequest>) -> ApiResult<(StatusCode, Json<BlockedCountry>)> {
    let r = validated(r)?;
    Ok((StatusCode::CREATED, Json(s.block_country(&staff, &r.country_code, r.product_id).await?)))
}

#[derive(Debug, Deserialize)]
pub struct NetBlockRequest {
    pub ip_start: Ipv4Addr,
    pub ip_end: Ipv4Addr,
    pub country_code: String,
}

pub async fn create_netblock(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<NetBlockRequest>) -> ApiResult<StatusCode> {
    let block = NetBlock { ip_start: r.ip_start, ip_end: r.ip_end, country_code: CountryCode::new(&r.country_code)? };
    s.add_netblock(&staff, block).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecipientRequest {
    pub integrated_system_id: Uuid,
    #[validate(email)]
    pub email: String,
}

pub async fn create_refund_recipient(State(s): State<Services>, StaffUser(staff): StaffUser, Json(r): Json<RecipientRequest>) -> ApiResult<(StatusCode, Json<RequestRecipient>)> {
    let r = validated(r)?;
    Ok((StatusCode::CREATED, Json(s.add_refund_recipient(&staff, r.integrated_system_id, &r.email).await?)))
}
