//! Discount Aggregate
//!
//! A discount lowers a product's price. It can be scoped to a product, an
//! integrated system, a set of users, any combination of those, or nothing at
//! all (global). Redemption limits and an activation window decide whether it
//! can still be used.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::quantize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscountType {
    #[default]
    PercentOff,
    DollarsOff,
    FixedPrice,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedemptionType {
    OneTime,
    OneTimePerUser,
    #[default]
    Unlimited,
}

/// Bookkeeping category for who pays for the discount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentType {
    Marketing,
    #[default]
    Sales,
    FinancialAssistance,
    CustomerSupport,
    Staff,
    Legacy,
    #[serde(rename = "credit_card")]
    CreditCard,
    #[serde(rename = "purchase_order")]
    PurchaseOrder,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub discount_code: String,
    pub amount: Decimal,
    pub discount_type: DiscountType,
    pub redemption_type: RedemptionType,
    pub payment_type: PaymentType,
    /// Applied to matching baskets without the user entering a code.
    pub automatic: bool,
    pub max_redemptions: Option<u32>,
    pub activation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub product_id: Option<Uuid>,
    pub integrated_system_id: Option<Uuid>,
    pub assigned_users: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Record of a discount being used on an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedeemedDiscount {
    pub id: Uuid,
    pub discount_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub redemption_date: DateTime<Utc>,
}

impl RedeemedDiscount {
    pub fn new(discount_id: Uuid, user_id: Uuid, order_id: Uuid) -> Self {
        Self { id: Uuid::now_v7(), discount_id, user_id, order_id, redemption_date: Utc::now() }
    }
}

/// What a discount is being checked against: one product in one user's
/// basket for one system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscountScope {
    pub user_id: Uuid,
    pub integrated_system_id: Uuid,
    pub product_id: Option<Uuid>,
}

/// A whole basket, for checking discount codes before any item is priced.
#[derive(Clone, Copy, Debug)]
pub struct BasketScope<'a> {
    pub user_id: Uuid,
    pub integrated_system_id: Uuid,
    pub product_ids: &'a [Uuid],
}

/// Prior redemptions of a discount, overall and by the current user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RedemptionCounts {
    pub total: u32,
    pub by_user: u32,
}

impl Discount {
    pub fn new(discount_code: impl Into<String>, discount_type: DiscountType, amount: Decimal) -> Result<Self, DiscountError> {
        let discount_code = discount_code.into().trim().to_string();
        if discount_code.is_empty() { return Err(DiscountError::MissingCode); }
        if amount.is_sign_negative() { return Err(DiscountError::NegativeAmount); }
        if discount_type == DiscountType::PercentOff && amount > Decimal::ONE_HUNDRED {
            return Err(DiscountError::PercentOutOfRange);
        }
        Ok(Self {
            id: Uuid::now_v7(), discount_code, amount, discount_type, redemption_type: RedemptionType::Unlimited,
            payment_type: PaymentType::default(), automatic: false, max_redemptions: None, activation_date: None,
            expiration_date: None, product_id: None, integrated_system_id: None, assigned_users: vec![], created_at: Utc::now(),
        })
    }

    /// Price of something costing `base` once this discount is applied.
    pub fn price_for(&self, base: Decimal) -> Decimal {
        let price = match self.discount_type {
            DiscountType::PercentOff => base * (Decimal::ONE - self.amount / Decimal::ONE_HUNDRED),
            DiscountType::DollarsOff => base - self.amount,
            DiscountType::FixedPrice => self.amount,
        };
        quantize(price.max(Decimal::ZERO))
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.activation_date.map_or(true, |start| start <= now)
            && self.expiration_date.map_or(true, |end| end > now)
    }

    /// Scope match. An unset scope field matches anything; a product scope
    /// only matches when a product is being checked.
    pub fn applies_to(&self, scope: &DiscountScope) -> bool {
        let product_ok = match (self.product_id, scope.product_id) {
            (None, _) => true,
            (Some(wanted), Some(have)) => wanted == have,
            (Some(_), None) => false,
        };
        let system_ok = self.integrated_system_id.map_or(true, |s| s == scope.integrated_system_id);
        let user_ok = self.assigned_users.is_empty() || self.assigned_users.contains(&scope.user_id);
        product_ok && system_ok && user_ok
    }

    pub fn has_redemptions_left(&self, counts: RedemptionCounts) -> bool {
        if let Some(max) = self.max_redemptions {
            if counts.total >= max { return false; }
        }
        match self.redemption_type {
            RedemptionType::OneTime => counts.total == 0,
            RedemptionType::OneTimePerUser => counts.by_user == 0,
            RedemptionType::Unlimited => true,
        }
    }

    /// Basket-level validity: in scope for the basket's user and system,
    /// targeting a product the basket holds (if it targets one), inside its
    /// activation window and not used up.
    pub fn is_valid(&self, basket: &BasketScope<'_>, counts: RedemptionCounts, now: DateTime<Utc>) -> bool {
        let product_ok = self.product_id.map_or(true, |p| basket.product_ids.contains(&p));
        let scope = DiscountScope { user_id: basket.user_id, integrated_system_id: basket.integrated_system_id, product_id: self.product_id };
        product_ok && self.applies_to(&scope) && self.is_active_at(now) && self.has_redemptions_left(counts)
    }

    /// Lower is more specific.
    fn specificity(&self) -> u8 {
        if self.product_id.is_some() { 0 }
        else if !self.assigned_users.is_empty() { 1 }
        else if self.integrated_system_id.is_some() { 2 }
        else { 3 }
    }
}

/// Pick the discount giving the lowest price for `base`. Ties go to the more
/// specific discount, then the older one, then the smaller id.
pub fn best_discount<'a, I>(base: Decimal, candidates: I) -> Option<&'a Discount>
where
    I: IntoIterator<Item = &'a Discount>,
{
    candidates.into_iter().min_by(|a, b| compare_for(base, a, b))
}

fn compare_for(base: Decimal, a: &Discount, b: &Discount) -> Ordering {
    a.price_for(base)
        .cmp(&b.price_for(base))
        .then_with(|| a.specificity().cmp(&b.specificity()))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountError {
    #[error("Discount code is required")]
    MissingCode,
    #[error("Discount amount cannot be negative")]
    NegativeAmount,
    #[error("Percent-off discounts must be between 0 and 100")]
    PercentOutOfRange,
    #[error("Discount code '{0}' is not valid for this basket")]
    NotApplicable(String),
}
