//! Basket pricing: best discount per item, then tax.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{best_discount, Basket, BasketError, Discount, DiscountScope, Product};
use crate::domain::value_objects::{quantize, Quantity};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PricedItem {
    pub product_id: Uuid,
    pub quantity: Quantity,
    pub unit_price: Decimal,
    pub base_price: Decimal,
    pub discounted_price: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub discount_id: Option<Uuid>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BasketPricing {
    pub items: Vec<PricedItem>,
    pub subtotal: Decimal,
    pub discounted_subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    /// Candidate discounts no item ended up using.
    pub unused_discounts: Vec<Uuid>,
}

/// Price every item in `basket`.
///
/// `candidates` are the discounts the basket may use (applied codes plus
/// automatic ones); each item takes whichever one in scope gives the lowest
/// unit price. Redemption limits are the caller's concern.
pub fn price_basket(basket: &Basket, products: &[Product], candidates: &[Discount], now: DateTime<Utc>) -> Result<BasketPricing, BasketError> {
    let mut pricing = BasketPricing::default();
    let mut used: Vec<Uuid> = Vec::new();
    for item in basket.items() {
        let product = products.iter().find(|p| p.id() == item.product_id).ok_or(BasketError::ItemNotFound(item.product_id))?;
        let scope = DiscountScope { user_id: basket.user_id(), integrated_system_id: basket.integrated_system_id(), product_id: Some(product.id()) };
        let in_scope = candidates.iter().filter(|d| d.applies_to(&scope) && d.is_active_at(now));
        let unit_price = product.price();
        let discount = best_discount(unit_price, in_scope);
        let unit_discounted = discount.map_or(unit_price, |d| d.price_for(unit_price));
        let qty = item.quantity.as_decimal();
        let discounted_price = quantize(unit_discounted * qty);
        let tax = basket.tax_rate().map_or(Decimal::ZERO, |rate| rate.tax_for(discounted_price));
        if let Some(d) = discount {
            if !used.contains(&d.id) { used.push(d.id); }
        }
        pricing.items.push(PricedItem {
            product_id: product.id(), quantity: item.quantity, unit_price, base_price: quantize(unit_price * qty),
            discounted_price, tax, total: discounted_price + tax, discount_id: discount.map(|d| d.id),
        });
    }
    pricing.subtotal = pricing.items.iter().map(|i| i.base_price).sum();
    pricing.discounted_subtotal = pricing.items.iter().map(|i| i.discounted_price).sum();
    pricing.tax = pricing.items.iter().map(|i| i.tax).sum();
    pricing.total = pricing.discounted_subtotal + pricing.tax;
    pricing.unused_discounts = candidates.iter().map(|d| d.id).filter(|id| !used.contains(id)).collect();
    Ok(pricing)
}
