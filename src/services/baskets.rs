//! Basket workflows.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::domain::aggregates::location::{applicable_tax_rate, is_blocked};
use crate::domain::aggregates::{Basket, BasketScope, Discount, DiscountError, DiscountType, IntegratedSystem, Product, User};
use crate::domain::pricing::{price_basket, BasketPricing};
use crate::domain::value_objects::{Quantity, Sku};
use crate::{EcommerceError, Result};
use super::locks::basket_key;
use super::Services;

/// A basket with its current prices.
#[derive(Clone, Debug, Serialize)]
pub struct BasketView {
    pub basket: Basket,
    pub integrated_system: String,
    pub products: Vec<Product>,
    pub discounts: Vec<AppliedDiscount>,
    pub pricing: BasketPricing,
}

/// The public face of a discount that priced at least one basket item.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppliedDiscount {
    pub id: Uuid,
    pub discount_code: String,
    pub discount_type: DiscountType,
    pub amount: Decimal,
}

impl From<&Discount> for AppliedDiscount {
    fn from(d: &Discount) -> Self {
        Self { id: d.id, discount_code: d.discount_code.clone(), discount_type: d.discount_type, amount: d.amount }
    }
}

impl Services {
    /// The user's basket for `system`, created if they don't have one yet.
    pub async fn establish_basket(&self, user: &User, system: &IntegratedSystem) -> Result<Basket> {
        if let Some(basket) = self.store.find_basket(user.id, system.id).await? {
            return Ok(basket);
        }
        let basket = Basket::new(user.id, system.id);
        match self.store.save_basket(&basket).await {
            Ok(()) => {
                debug!(user = %user.username, system = %system.slug, "Created basket");
                Ok(basket)
            }
            Err(EcommerceError::Conflict(_)) => self.store.find_basket(user.id, system.id).await?.ok_or(EcommerceError::NotFound("Basket")),
            Err(e) => Err(e),
        }
    }

    /// Add (or re-quantify) a product in the user's basket.
    ///
    /// Runs, in order: locate the customer, refuse products blocked in their
    /// country, update or create the item, set or clear the tax rate, apply
    /// any automatic discounts that now fit, then queue the added event.
    pub async fn add_to_basket(&self, user: &User, ip: Option<&str>, system_slug: &str, sku: &str, quantity: u32) -> Result<BasketView> {
        let system = self.system_by_slug(system_slug).await?;
        let sku = Sku::new(sku)?;
        let quantity = Quantity::new(quantity)?;
        let product = self.store.find_product(system.id, &sku).await?.ok_or(EcommerceError::NotFound("Product"))?;
        let _guard = self.locks.lock(basket_key(user.id, system.id)).await;
        let mut basket = self.establish_basket(user, &system).await?;

        let location = self.locate_customer(user, ip, Some(product.id())).await?;
        if let Some(country) = &location.location_block.country_code {
            if is_blocked(country, product.id(), &self.store.list_blocked_countries().await?) {
                warn!(user = %user.username, sku = %product.sku(), %country, "Blocked product added to basket");
                return Err(EcommerceError::ProductBlocked);
            }
        }

        let tax_country = location.location_tax.country_code.clone();
        basket.set_location(location);
        let created = basket.set_item(product.id(), quantity);

        let rates = self.store.list_tax_rates().await?;
        basket.set_tax_rate(applicable_tax_rate(tax_country.as_ref(), &rates).cloned());

        for discount in self.store.list_automatic_discounts().await? {
            if self.discount_valid_for(&discount, &basket).await? && basket.apply_discount(discount.id) {
                debug!(code = %discount.discount_code, basket = %basket.id(), "Applied automatic discount");
            }
        }

        self.store.save_basket(&basket).await?;
        self.events.publish(basket.take_events());
        info!(user = %user.username, system = %system.slug, sku = %product.sku(), created, "Basket item saved");
        self.view(basket, &system).await
    }

    pub async fn remove_from_basket(&self, user: &User, system_slug: &str, sku: &str) -> Result<BasketView> {
        let system = self.system_by_slug(system_slug).await?;
        let sku = Sku::new(sku)?;
        let product = self.store.find_product(system.id, &sku).await?.ok_or(EcommerceError::NotFound("Product"))?;
        let _guard = self.locks.lock(basket_key(user.id, system.id)).await;
        let mut basket = self.store.find_basket(user.id, system.id).await?.ok_or(EcommerceError::NotFound("Basket"))?;
        basket.remove_item(product.id())?;
        self.drop_unusable_discounts(&mut basket).await?;
        self.store.save_basket(&basket).await?;
        self.events.publish(basket.take_events());
        self.view(basket, &system).await
    }

    pub async fn clear_basket(&self, user: &User, system_slug: &str) -> Result<()> {
        let system = self.system_by_slug(system_slug).await?;
        let _guard = self.locks.lock(basket_key(user.id, system.id)).await;
        if let Some(mut basket) = self.store.find_basket(user.id, system.id).await? {
            basket.clear();
            self.store.save_basket(&basket).await?;
        }
        Ok(())
    }

    /// Apply a discount code. It has to exist and be usable by this basket
    /// right now.
    pub async fn apply_discount_code(&self, user: &User, system_slug: &str, code: &str) -> Result<BasketView> {
        let system = self.system_by_slug(system_slug).await?;
        let discount = self.store.find_discount_by_code(code.trim()).await?.ok_or(EcommerceError::NotFound("Discount"))?;
        let _guard = self.locks.lock(basket_key(user.id, system.id)).await;
        let mut basket = self.establish_basket(user, &system).await?;
        if !self.discount_valid_for(&discount, &basket).await? {
            return Err(DiscountError::NotApplicable(discount.discount_code).into());
        }
        if basket.apply_discount(discount.id) {
            self.store.save_basket(&basket).await?;
            info!(user = %user.username, code = %discount.discount_code, "Discount applied to basket");
        }
        self.view(basket, &system).await
    }

    pub async fn basket_for_system(&self, user: &User, system_slug: &str) -> Result<BasketView> {
        let system = self.system_by_slug(system_slug).await?;
        let basket = self.establish_basket(user, &system).await?;
        self.view(basket, &system).await
    }

    pub async fn list_baskets(&self, user: &User) -> Result<Vec<Basket>> { self.store.list_baskets(user.id).await }

    /// Price the basket against every discount it may use.
    pub async fn basket_summary(&self, basket: &Basket) -> Result<(Vec<Product>, Vec<Discount>, BasketPricing)> {
        let mut products = Vec::with_capacity(basket.items().len());
        for item in basket.items() {
            products.push(self.store.get_product(item.product_id).await?.ok_or(EcommerceError::NotFound("Product"))?);
        }
        let discounts = self.candidate_discounts(basket).await?;
        let pricing = price_basket(basket, &products, &discounts, Utc::now())?;
        Ok((products, discounts, pricing))
    }

    /// Applied and automatic discounts that are valid for the basket.
    pub(crate) async fn candidate_discounts(&self, basket: &Basket) -> Result<Vec<Discount>> {
        let mut pool: Vec<Discount> = Vec::new();
        for id in basket.discount_ids() {
            if let Some(discount) = self.store.get_discount(*id).await? { pool.push(discount); }
        }
        for discount in self.store.list_automatic_discounts().await? {
            if !pool.iter().any(|d| d.id == discount.id) { pool.push(discount); }
        }
        let mut valid = Vec::with_capacity(pool.len());
        for discount in pool {
            if self.discount_valid_for(&discount, basket).await? { valid.push(discount); }
        }
        Ok(valid)
    }

    pub(crate) async fn discount_valid_for(&self, discount: &Discount, basket: &Basket) -> Result<bool> {
        let counts = self.store.redemption_counts(discount.id, basket.user_id()).await?;
        let products: Vec<Uuid> = basket.product_ids();
        let scope = BasketScope { user_id: basket.user_id(), integrated_system_id: basket.integrated_system_id(), product_ids: &products };
        Ok(discount.is_valid(&scope, counts, Utc::now()))
    }

    async fn drop_unusable_discounts(&self, basket: &mut Basket) -> Result<()> {
        let mut keep = Vec::new();
        for id in basket.discount_ids().to_vec() {
            if let Some(discount) = self.store.get_discount(id).await? {
                if self.discount_valid_for(&discount, basket).await? { keep.push(id); }
            }
        }
        basket.retain_discounts(&keep);
        Ok(())
    }

    async fn view(&self, basket: Basket, system: &IntegratedSystem) -> Result<BasketView> {
        let (products, candidates, pricing) = self.basket_summary(&basket).await?;
        let discounts = candidates
            .iter()
            .filter(|d| pricing.items.iter().any(|i| i.discount_id == Some(d.id)))
            .map(AppliedDiscount::from)
            .collect();
        Ok(BasketView { basket, integrated_system: system.slug.clone(), products, discounts, pricing })
    }
}
