//! In-process store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::domain::aggregates::{
    Basket, BlockedCountry, Discount, IntegratedSystem, NetBlock, Order, OrderState, Product, ProductVersion,
    RedeemedDiscount, RedemptionCounts, RefundRequest, RequestRecipient, TaxRate, User,
};
use crate::domain::value_objects::{CountryCode, Sku};
use crate::{EcommerceError, Result};
use super::Store;

#[derive(Default)]
struct Tables {
    systems: HashMap<Uuid, IntegratedSystem>,
    products: HashMap<Uuid, Product>,
    product_versions: Vec<ProductVersion>,
    users: HashMap<Uuid, User>,
    discounts: HashMap<Uuid, Discount>,
    redemptions: Vec<RedeemedDiscount>,
    tax_rates: HashMap<Uuid, TaxRate>,
    blocked: HashMap<Uuid, BlockedCountry>,
    netblocks: Vec<NetBlock>,
    baskets: HashMap<Uuid, Basket>,
    orders: HashMap<Uuid, Order>,
    refunds: HashMap<Uuid, RefundRequest>,
    recipients: HashMap<Uuid, RequestRecipient>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn conflict(what: &str) -> EcommerceError { EcommerceError::Conflict(format!("{what} already exists")) }

#[async_trait]
impl Store for MemoryStore {
    async fn save_system(&self, system: &IntegratedSystem) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.systems.values().any(|s| s.id != system.id && (s.slug == system.slug || s.name == system.name)) {
            return Err(conflict("Integrated system"));
        }
        t.systems.insert(system.id, system.clone());
        Ok(())
    }

    async fn get_system(&self, id: Uuid) -> Result<Option<IntegratedSystem>> {
        Ok(self.tables.read().await.systems.get(&id).cloned())
    }

    async fn get_system_by_slug(&self, slug: &str) -> Result<Option<IntegratedSystem>> {
        Ok(self.tables.read().await.systems.values().find(|s| s.slug == slug).cloned())
    }

    async fn list_systems(&self) -> Result<Vec<IntegratedSystem>> {
        let mut systems: Vec<_> = self.tables.read().await.systems.values().cloned().collect();
        systems.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(systems)
    }

    async fn save_product(&self, product: &Product, version: Option<&ProductVersion>) -> Result<()> {
        let mut t = self.tables.write().await;
        let clash = product.is_active()
            && t.products.values().any(|p| p.id() != product.id() && p.is_active() && p.system_id() == product.system_id() && p.sku() == product.sku());
        if clash { return Err(conflict("Product with this SKU")); }
        t.products.insert(product.id(), product.clone());
        if let Some(v) = version { t.product_versions.push(v.clone()); }
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn find_product(&self, system_id: Uuid, sku: &Sku) -> Result<Option<Product>> {
        let t = self.tables.read().await;
        Ok(t.products.values().find(|p| p.is_active() && p.system_id() == system_id && p.sku() == sku).cloned())
    }

    async fn list_products(&self, system_id: Option<Uuid>) -> Result<Vec<Product>> {
        let t = self.tables.read().await;
        let mut products: Vec<_> = t.products.values().filter(|p| p.is_active() && system_id.map_or(true, |s| p.system_id() == s)).cloned().collect();
        products.sort_by(|a, b| a.sku().as_str().cmp(b.sku().as_str()));
        Ok(products)
    }

    async fn list_product_versions(&self, product_id: Uuid) -> Result<Vec<ProductVersion>> {
        let t = self.tables.read().await;
        Ok(t.product_versions.iter().filter(|v| v.product_id == product_id).cloned().collect())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(conflict("User with this e-mail"));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn save_discount(&self, discount: &Discount) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.discounts.values().any(|d| d.id != discount.id && d.discount_code.eq_ignore_ascii_case(&discount.discount_code)) {
            return Err(conflict("Discount code"));
        }
        t.discounts.insert(discount.id, discount.clone());
        Ok(())
    }

    async fn get_discount(&self, id: Uuid) -> Result<Option<Discount>> {
        Ok(self.tables.read().await.discounts.get(&id).cloned())
    }

    async fn find_discount_by_code(&self, code: &str) -> Result<Option<Discount>> {
        let code = code.trim();
        Ok(self.tables.read().await.discounts.values().find(|d| d.discount_code.eq_ignore_ascii_case(code)).cloned())
    }

    async fn list_discounts(&self) -> Result<Vec<Discount>> {
        let mut discounts: Vec<_> = self.tables.read().await.discounts.values().cloned().collect();
        discounts.sort_by_key(|d| d.created_at);
        Ok(discounts)
    }

    async fn list_automatic_discounts(&self) -> Result<Vec<Discount>> {
        let mut discounts: Vec<_> = self.tables.read().await.discounts.values().filter(|d| d.automatic).cloned().collect();
        discounts.sort_by_key(|d| d.created_at);
        Ok(discounts)
    }

    async fn save_redemption(&self, redemption: &RedeemedDiscount) -> Result<()> {
        let mut t = self.tables.write().await;
        let exists = t.redemptions.iter().any(|r| r.discount_id == redemption.discount_id && r.order_id == redemption.order_id);
        if !exists { t.redemptions.push(redemption.clone()); }
        Ok(())
    }

    async fn clear_redemptions(&self, order_id: Uuid) -> Result<()> {
        self.tables.write().await.redemptions.retain(|r| r.order_id != order_id);
        Ok(())
    }

    async fn redemption_counts(&self, discount_id: Uuid, user_id: Uuid) -> Result<RedemptionCounts> {
        let t = self.tables.read().await;
        let paid = |r: &&RedeemedDiscount| t.orders.get(&r.order_id).is_some_and(|o| o.state().is_paid());
        let used: Vec<_> = t.redemptions.iter().filter(|r| r.discount_id == discount_id).filter(paid).collect();
        Ok(RedemptionCounts { total: used.len() as u32, by_user: used.iter().filter(|r| r.user_id == user_id).count() as u32 })
    }

    async fn save_tax_rate(&self, rate: &TaxRate) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.tax_rates.values().any(|r| r.id != rate.id && r.country_code == rate.country_code) {
            return Err(conflict("Tax rate for this country"));
        }
        t.tax_rates.insert(rate.id, rate.clone());
        Ok(())
    }

    async fn list_tax_rates(&self) -> Result<Vec<TaxRate>> {
        let mut rates: Vec<_> = self.tables.read().await.tax_rates.values().cloned().collect();
        rates.sort_by(|a, b| a.country_code.cmp(&b.country_code));
        Ok(rates)
    }

    async fn save_blocked_country(&self, block: &BlockedCountry) -> Result<()> {
        self.tables.write().await.blocked.insert(block.id, block.clone());
        Ok(())
    }

    async fn list_blocked_countries(&self) -> Result<Vec<BlockedCountry>> {
        let mut blocks: Vec<_> = self.tables.read().await.blocked.values().cloned().collect();
        blocks.sort_by(|a, b| a.country_code.cmp(&b.country_code));
        Ok(blocks)
    }

    async fn save_netblock(&self, block: &NetBlock) -> Result<()> {
        self.tables.write().await.netblocks.push(block.clone());
        Ok(())
    }

    async fn geoip_country(&self, ip: Ipv4Addr) -> Result<Option<CountryCode>> {
        let t = self.tables.read().await;
        Ok(t.netblocks.iter().find(|b| b.contains(ip)).map(|b| b.country_code.clone()))
    }

    async fn save_basket(&self, basket: &Basket) -> Result<()> {
        let mut t = self.tables.write().await;
        let clash = t.baskets.values().any(|b| b.id() != basket.id() && b.user_id() == basket.user_id() && b.integrated_system_id() == basket.integrated_system_id());
        if clash { return Err(conflict("Basket for this system")); }
        t.baskets.insert(basket.id(), basket.clone());
        Ok(())
    }

    async fn get_basket(&self, id: Uuid) -> Result<Option<Basket>> {
        Ok(self.tables.read().await.baskets.get(&id).cloned())
    }

    async fn find_basket(&self, user_id: Uuid, system_id: Uuid) -> Result<Option<Basket>> {
        let t = self.tables.read().await;
        Ok(t.baskets.values().find(|b| b.user_id() == user_id && b.integrated_system_id() == system_id).cloned())
    }

    async fn list_baskets(&self, user_id: Uuid) -> Result<Vec<Basket>> {
        let t = self.tables.read().await;
        let mut baskets: Vec<_> = t.baskets.values().filter(|b| b.user_id() == user_id).cloned().collect();
        baskets.sort_by_key(|b| b.updated_at());
        Ok(baskets)
    }

    async fn delete_basket(&self, id: Uuid) -> Result<()> {
        self.tables.write().await.baskets.remove(&id);
        Ok(())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        self.tables.write().await.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.values().find(|o| o.reference_number() == reference).cloned())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let t = self.tables.read().await;
        let mut orders: Vec<_> = t.orders.values().filter(|o| o.purchaser_id() == user_id).cloned().collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.created_at()));
        Ok(orders)
    }

    async fn list_orders_by_state(&self, state: OrderState) -> Result<Vec<Order>> {
        let t = self.tables.read().await;
        let mut orders: Vec<_> = t.orders.values().filter(|o| o.state() == state).cloned().collect();
        orders.sort_by_key(|o| o.created_at());
        Ok(orders)
    }

    async fn save_refund_request(&self, request: &RefundRequest) -> Result<()> {
        self.tables.write().await.refunds.insert(request.id(), request.clone());
        Ok(())
    }

    async fn get_refund_request(&self, id: Uuid) -> Result<Option<RefundRequest>> {
        Ok(self.tables.read().await.refunds.get(&id).cloned())
    }

    async fn list_refund_requests(&self, requester_id: Option<Uuid>) -> Result<Vec<RefundRequest>> {
        let t = self.tables.read().await;
        let mut requests: Vec<_> = t.refunds.values().filter(|r| requester_id.map_or(true, |u| r.requester_id() == u)).cloned().collect();
        requests.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(requests)
    }

    async fn find_refund_request_by_code(&self, code: Uuid) -> Result<Option<RefundRequest>> {
        let t = self.tables.read().await;
        Ok(t.refunds.values().find(|r| r.codes().iter().any(|c| c.approve_code == code || c.deny_code == code)).cloned())
    }

    async fn save_recipient(&self, recipient: &RequestRecipient) -> Result<()> {
        let mut t = self.tables.write().await;
        let clash = t.recipients.values().any(|r| {
            r.id != recipient.id && r.integrated_system_id == recipient.integrated_system_id && r.email.eq_ignore_ascii_case(&recipient.email)
        });
        if clash { return Err(conflict("Recipient for this system")); }
        t.recipients.insert(recipient.id, recipient.clone());
        Ok(())
    }

    async fn list_recipients(&self, system_id: Uuid) -> Result<Vec<RequestRecipient>> {
        let t = self.tables.read().await;
        let mut recipients: Vec<_> = t.recipients.values().filter(|r| r.integrated_system_id == system_id).cloned().collect();
        recipients.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(recipients)
    }
}
