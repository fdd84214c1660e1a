//! Persistence.
//!
//! Every aggregate is stored whole. [`MemoryStore`] keeps everything in
//! process and backs the tests; [`PgStore`] keeps a JSONB document per
//! aggregate next to the columns we look things up by.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use uuid::Uuid;
use crate::domain::aggregates::{
    Basket, BlockedCountry, Discount, IntegratedSystem, NetBlock, Order, OrderState, Product, ProductVersion,
    RedeemedDiscount, RedemptionCounts, RefundRequest, RequestRecipient, TaxRate, User,
};
use crate::domain::value_objects::{CountryCode, Sku};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // Integrated systems
    async fn save_system(&self, system: &IntegratedSystem) -> Result<()>;
    async fn get_system(&self, id: Uuid) -> Result<Option<IntegratedSystem>>;
    async fn get_system_by_slug(&self, slug: &str) -> Result<Option<IntegratedSystem>>;
    async fn list_systems(&self) -> Result<Vec<IntegratedSystem>>;

    // Products
    async fn save_product(&self, product: &Product, version: Option<&ProductVersion>) -> Result<()>;
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;
    /// Active product with this SKU in the system.
    async fn find_product(&self, system_id: Uuid, sku: &Sku) -> Result<Option<Product>>;
    async fn list_products(&self, system_id: Option<Uuid>) -> Result<Vec<Product>>;
    async fn list_product_versions(&self, product_id: Uuid) -> Result<Vec<ProductVersion>>;

    // Users
    async fn save_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    // Discounts
    async fn save_discount(&self, discount: &Discount) -> Result<()>;
    async fn get_discount(&self, id: Uuid) -> Result<Option<Discount>>;
    async fn find_discount_by_code(&self, code: &str) -> Result<Option<Discount>>;
    async fn list_discounts(&self) -> Result<Vec<Discount>>;
    async fn list_automatic_discounts(&self) -> Result<Vec<Discount>>;
    async fn save_redemption(&self, redemption: &RedeemedDiscount) -> Result<()>;
    async fn clear_redemptions(&self, order_id: Uuid) -> Result<()>;
    /// Redemptions on paid orders only; pending or failed checkouts don't use
    /// up a discount.
    async fn redemption_counts(&self, discount_id: Uuid, user_id: Uuid) -> Result<RedemptionCounts>;

    // Tax and blocking
    async fn save_tax_rate(&self, rate: &TaxRate) -> Result<()>;
    async fn list_tax_rates(&self) -> Result<Vec<TaxRate>>;
    async fn save_blocked_country(&self, block: &BlockedCountry) -> Result<()>;
    async fn list_blocked_countries(&self) -> Result<Vec<BlockedCountry>>;
    async fn save_netblock(&self, block: &NetBlock) -> Result<()>;
    async fn geoip_country(&self, ip: Ipv4Addr) -> Result<Option<CountryCode>>;

    // Baskets
    async fn save_basket(&self, basket: &Basket) -> Result<()>;
    async fn get_basket(&self, id: Uuid) -> Result<Option<Basket>>;
    async fn find_basket(&self, user_id: Uuid, system_id: Uuid) -> Result<Option<Basket>>;
    async fn list_baskets(&self, user_id: Uuid) -> Result<Vec<Basket>>;
    async fn delete_basket(&self, id: Uuid) -> Result<()>;

    // Orders
    async fn save_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn get_order_by_reference(&self, reference: &str) -> Result<Option<Order>>;
    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;
    async fn list_orders_by_state(&self, state: OrderState) -> Result<Vec<Order>>;

    // Refunds
    async fn save_refund_request(&self, request: &RefundRequest) -> Result<()>;
    async fn get_refund_request(&self, id: Uuid) -> Result<Option<RefundRequest>>;
    async fn list_refund_requests(&self, requester_id: Option<Uuid>) -> Result<Vec<RefundRequest>>;
    /// Request holding an approve or deny code equal to `code`.
    async fn find_refund_request_by_code(&self, code: Uuid) -> Result<Option<RefundRequest>>;
    async fn save_recipient(&self, recipient: &RequestRecipient) -> Result<()>;
    async fn list_recipients(&self, system_id: Uuid) -> Result<Vec<RequestRecipient>>;
}
