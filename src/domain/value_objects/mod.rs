//! Value Objects for Unified Ecommerce

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept for every monetary amount we hand out.
pub const MONEY_PLACES: u32 = 2;

/// Round a monetary amount to cents, midpoint away from zero.
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// SKU (Stock Keeping Unit) value object. Unique per integrated system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 255 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for Sku {
    type Error = SkuError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self { sku.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SkuError { Empty, TooLong }
impl std::error::Error for SkuError {}
impl fmt::Display for SkuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "SKU empty"), Self::TooLong => write!(f, "SKU too long") }
    }
}

/// ISO 3166-1 alpha-2 country code, always upper case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(value: impl AsRef<str>) -> Result<Self, CountryCodeError> {
        let value = value.as_ref().trim().to_ascii_uppercase();
        if value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CountryCodeError(value));
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for CountryCode {
    type Error = CountryCodeError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self { code.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct CountryCodeError(pub String);
impl std::error::Error for CountryCodeError {}
impl fmt::Display for CountryCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Invalid country code '{}'", self.0) }
}

/// Quantity value object. Basket items and order lines never hold zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Result<Self, QuantityError> {
        if value == 0 { return Err(QuantityError); }
        Ok(Self(value))
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn as_decimal(&self) -> Decimal { Decimal::from(self.0) }
}

impl Default for Quantity { fn default() -> Self { Self::ONE } }

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;
    fn try_from(value: u32) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self { q.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct QuantityError;
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Quantity must be at least 1") }
}
