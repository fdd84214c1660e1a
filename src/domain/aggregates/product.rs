//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{quantize, Sku};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    system_id: Uuid,
    sku: Sku,
    name: String,
    description: String,
    price: Decimal,
    image_url: Option<String>,
    is_active: bool,
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Immutable snapshot of a product as it was at one version. Order lines point
/// at these so later price or description edits never rewrite history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductVersion {
    pub product_id: Uuid,
    pub version: u32,
    pub system_id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Partial update; `None` leaves the field alone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProductChanges {
    pub sku: Option<Sku>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub image_url: Option<String>,
}

impl Product {
    pub fn create(system_id: Uuid, sku: Sku, name: impl Into<String>, price: Decimal) -> Result<(Self, ProductVersion), ProductError> {
        let name = name.into();
        if name.trim().is_empty() { return Err(ProductError::MissingName); }
        let price = validate_price(price)?;
        let now = Utc::now();
        let product = Self {
            id: Uuid::now_v7(), system_id, sku, name, description: String::new(), price,
            image_url: None, is_active: true, version: 1, created_at: now, updated_at: now,
        };
        let version = product.snapshot();
        Ok((product, version))
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn system_id(&self) -> Uuid { self.system_id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn price(&self) -> Decimal { self.price }
    pub fn image_url(&self) -> Option<&str> { self.image_url.as_deref() }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn version(&self) -> u32 { self.version }

    /// Apply changes. Returns the new version snapshot when anything changed.
    pub fn update(&mut self, changes: ProductChanges) -> Result<Option<ProductVersion>, ProductError> {
        let mut changed = false;
        if let Some(name) = changes.name {
            if name.trim().is_empty() { return Err(ProductError::MissingName); }
            changed |= name != self.name;
            self.name = name;
        }
        if let Some(price) = changes.price {
            let price = validate_price(price)?;
            changed |= price != self.price;
            self.price = price;
        }
        if let Some(sku) = changes.sku { changed |= sku != self.sku; self.sku = sku; }
        if let Some(description) = changes.description { changed |= description != self.description; self.description = description; }
        if let Some(url) = changes.image_url { changed |= Some(&url) != self.image_url.as_ref(); self.image_url = Some(url); }
        if !changed { return Ok(None); }
        self.version += 1;
        self.touch();
        Ok(Some(self.snapshot()))
    }

    /// Soft delete: the product stays resolvable for existing orders.
    pub fn archive(&mut self) { self.is_active = false; self.touch(); }

    pub fn snapshot(&self) -> ProductVersion {
        ProductVersion {
            product_id: self.id, version: self.version, system_id: self.system_id, sku: self.sku.clone(),
            name: self.name.clone(), description: self.description.clone(), price: self.price, recorded_at: self.updated_at,
        }
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn validate_price(price: Decimal) -> Result<Decimal, ProductError> {
    if price.is_sign_negative() { return Err(ProductError::NegativePrice); }
    Ok(quantize(price))
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { MissingName, NegativePrice }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::MissingName => write!(f, "Missing name"), Self::NegativePrice => write!(f, "Price cannot be negative") }
    }
}
