//! Integrated systems, products, discounts, tax rates, country blocks and
//! refund recipients. Everything here is staff-only.

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;
use crate::domain::aggregates::{
    BlockedCountry, Discount, IntegratedSystem, NetBlock, Product, ProductChanges, ProductVersion, RequestRecipient, TaxRate, User,
};
use crate::domain::value_objects::{CountryCode, Sku};
use crate::{EcommerceError, Result};
use super::Services;

impl Services {
    pub async fn create_system(&self, staff: &User, name: &str, description: Option<String>, webhook_url: Option<String>) -> Result<IntegratedSystem> {
        Self::require_staff(staff)?;
        let mut system = IntegratedSystem::create(name)?;
        system.description = description.unwrap_or_default();
        system.webhook_url = webhook_url;
        self.store.save_system(&system).await?;
        info!(system = %system.slug, "Integrated system created");
        Ok(system)
    }

    pub async fn update_system(&self, staff: &User, id: Uuid, description: Option<String>, webhook_url: Option<String>, rotate_key: bool) -> Result<IntegratedSystem> {
        Self::require_staff(staff)?;
        let mut system = self.store.get_system(id).await?.ok_or(EcommerceError::NotFound("Integrated system"))?;
        if let Some(description) = description { system.description = description; }
        if webhook_url.is_some() { system.webhook_url = webhook_url; }
        if rotate_key { system.rotate_api_key(); }
        self.store.save_system(&system).await?;
        Ok(system)
    }

    pub async fn deactivate_system(&self, staff: &User, id: Uuid) -> Result<()> {
        Self::require_staff(staff)?;
        let mut system = self.store.get_system(id).await?.ok_or(EcommerceError::NotFound("Integrated system"))?;
        system.deactivate();
        self.store.save_system(&system).await?;
        info!(system = %system.slug, "Integrated system deactivated");
        Ok(())
    }

    pub async fn create_product(&self, staff: &User, system_id: Uuid, sku: &str, name: &str, price: Decimal, description: Option<String>) -> Result<Product> {
        Self::require_staff(staff)?;
        self.store.get_system(system_id).await?.ok_or(EcommerceError::NotFound("Integrated system"))?;
        let (mut product, mut version) = Product::create(system_id, Sku::new(sku)?, name, price)?;
        if let Some(description) = description {
            if let Some(v) = product.update(ProductChanges { description: Some(description), ..Default::default() })? { version = v; }
        }
        self.store.save_product(&product, Some(&version)).await?;
        info!(sku = %product.sku(), system = %system_id, "Product created");
        Ok(product)
    }

    /// Returns the product and, when anything changed, its new version.
    pub async fn update_product(&self, staff: &User, id: Uuid, changes: ProductChanges) -> Result<(Product, Option<ProductVersion>)> {
        Self::require_staff(staff)?;
        let mut product = self.store.get_product(id).await?.ok_or(EcommerceError::NotFound("Product"))?;
        let version = product.update(changes)?;
        self.store.save_product(&product, version.as_ref()).await?;
        Ok((product, version))
    }

    pub async fn archive_product(&self, staff: &User, id: Uuid) -> Result<()> {
        Self::require_staff(staff)?;
        let mut product = self.store.get_product(id).await?.ok_or(EcommerceError::NotFound("Product"))?;
        product.archive();
        self.store.save_product(&product, None).await?;
        info!(sku = %product.sku(), "Product archived");
        Ok(())
    }

    pub async fn create_discount(&self, staff: &User, discount: Discount) -> Result<Discount> {
        Self::require_staff(staff)?;
        let checked = Discount::new(discount.discount_code.clone(), discount.discount_type, discount.amount)?;
        let discount = Discount { id: checked.id, discount_code: checked.discount_code, created_at: checked.created_at, ..discount };
        self.store.save_discount(&discount).await?;
        info!(code = %discount.discount_code, "Discount created");
        Ok(discount)
    }

    pub async fn set_tax_rate(&self, staff: &User, country: &str, rate: Decimal, name: &str) -> Result<TaxRate> {
        Self::require_staff(staff)?;
        if rate.is_sign_negative() { return Err(EcommerceError::Validation("Tax rate cannot be negative".into())); }
        let country = CountryCode::new(country)?;
        let existing = self.store.list_tax_rates().await?.into_iter().find(|r| r.country_code == country);
        let tax_rate = match existing {
            Some(mut r) => {
                r.tax_rate = rate;
                r.tax_rate_name = name.to_string();
                r.active = true;
                r
            }
            None => TaxRate::new(country, rate, name),
        };
        self.store.save_tax_rate(&tax_rate).await?;
        Ok(tax_rate)
    }

    pub async fn block_country(&self, staff: &User, country: &str, product_id: Option<Uuid>) -> Result<BlockedCountry> {
        Self::require_staff(staff)?;
        if let Some(id) = product_id {
            self.store.get_product(id).await?.ok_or(EcommerceError::NotFound("Product"))?;
        }
        let block = BlockedCountry::new(CountryCode::new(country)?, product_id);
        self.store.save_blocked_country(&block).await?;
        info!(country = %block.country_code, product = ?product_id, "Country blocked");
        Ok(block)
    }

    pub async fn add_netblock(&self, staff: &User, block: NetBlock) -> Result<()> {
        Self::require_staff(staff)?;
        if block.ip_start > block.ip_end { return Err(EcommerceError::Validation("Netblock start is after its end".into())); }
        self.store.save_netblock(&block).await
    }

    pub async fn add_refund_recipient(&self, staff: &User, system_id: Uuid, email: &str) -> Result<RequestRecipient> {
        Self::require_staff(staff)?;
        self.store.get_system(system_id).await?.ok_or(EcommerceError::NotFound("Integrated system"))?;
        let recipient = RequestRecipient::new(email.trim(), system_id);
        self.store.save_recipient(&recipient).await?;
        Ok(recipient)
    }
}
