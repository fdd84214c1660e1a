//! Postgres-backed store.
//!
//! Each aggregate lives in one row: the serialized aggregate in `doc` plus the
//! columns queries filter on. Uniqueness rules are enforced by the schema in
//! `migrations/` and surface as [`EcommerceError::Conflict`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::net::Ipv4Addr;
use uuid::Uuid;
use crate::domain::aggregates::{
    Basket, BlockedCountry, Discount, IntegratedSystem, NetBlock, Order, OrderState, Product, ProductVersion,
    RedeemedDiscount, RedemptionCounts, RefundRequest, RequestRecipient, TaxRate, User,
};
use crate::domain::value_objects::{CountryCode, Sku};
use crate::{EcommerceError, Result};
use super::Store;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| EcommerceError::Storage(e.to_string()))
    }
}

fn doc<T: DeserializeOwned>(row: &PgRow) -> Result<T> {
    Ok(row.try_get::<Json<T>, _>("doc")?.0)
}

fn docs<T: DeserializeOwned>(rows: &[PgRow]) -> Result<Vec<T>> {
    rows.iter().map(doc).collect()
}

fn write_error(what: &str) -> impl FnOnce(sqlx::Error) -> EcommerceError + '_ {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => EcommerceError::Conflict(format!("{what} already exists")),
        _ => e.into(),
    }
}

fn system_from_row(row: &PgRow) -> Result<IntegratedSystem> {
    let mut system: IntegratedSystem = doc(row)?;
    system.api_key = row.try_get("api_key")?;
    Ok(system)
}

#[async_trait]
impl Store for PgStore {
    async fn save_system(&self, system: &IntegratedSystem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integrated_systems (id, name, slug, api_key, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, slug = EXCLUDED.slug, api_key = EXCLUDED.api_key,
                doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(system.id).bind(&system.name).bind(&system.slug).bind(&system.api_key).bind(Json(system)).bind(system.updated_at)
        .execute(&self.pool).await.map_err(write_error("Integrated system"))?;
        Ok(())
    }

    async fn get_system(&self, id: Uuid) -> Result<Option<IntegratedSystem>> {
        let row = sqlx::query("SELECT api_key, doc FROM integrated_systems WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(system_from_row).transpose()
    }

    async fn get_system_by_slug(&self, slug: &str) -> Result<Option<IntegratedSystem>> {
        let row = sqlx::query("SELECT api_key, doc FROM integrated_systems WHERE slug = $1").bind(slug).fetch_optional(&self.pool).await?;
        row.as_ref().map(system_from_row).transpose()
    }

    async fn list_systems(&self) -> Result<Vec<IntegratedSystem>> {
        let rows = sqlx::query("SELECT api_key, doc FROM integrated_systems ORDER BY name").fetch_all(&self.pool).await?;
        rows.iter().map(system_from_row).collect()
    }

    async fn save_product(&self, product: &Product, version: Option<&ProductVersion>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO products (id, system_id, sku, is_active, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku, is_active = EXCLUDED.is_active, doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(product.id()).bind(product.system_id()).bind(product.sku().as_str()).bind(product.is_active()).bind(Json(product))
        .execute(&mut *tx).await.map_err(write_error("Product with this SKU"))?;
        if let Some(v) = version {
            sqlx::query("INSERT INTO product_versions (product_id, version, doc) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING")
                .bind(v.product_id).bind(v.version as i32).bind(Json(v))
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT doc FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn find_product(&self, system_id: Uuid, sku: &Sku) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT doc FROM products WHERE system_id = $1 AND sku = $2 AND is_active")
            .bind(system_id).bind(sku.as_str()).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn list_products(&self, system_id: Option<Uuid>) -> Result<Vec<Product>> {
        let rows = sqlx::query("SELECT doc FROM products WHERE is_active AND ($1::uuid IS NULL OR system_id = $1) ORDER BY sku")
            .bind(system_id).fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn list_product_versions(&self, product_id: Uuid) -> Result<Vec<ProductVersion>> {
        let rows = sqlx::query("SELECT doc FROM product_versions WHERE product_id = $1 ORDER BY version")
            .bind(product_id).fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, email, doc) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, doc = EXCLUDED.doc")
            .bind(user.id).bind(&user.email).bind(Json(user))
            .execute(&self.pool).await.map_err(write_error("User with this e-mail"))?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT doc FROM users WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT doc FROM users WHERE LOWER(email) = LOWER($1)").bind(email).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn save_discount(&self, discount: &Discount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discounts (id, discount_code, automatic, doc, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET discount_code = EXCLUDED.discount_code, automatic = EXCLUDED.automatic, doc = EXCLUDED.doc
            "#,
        )
        .bind(discount.id).bind(&discount.discount_code).bind(discount.automatic).bind(Json(discount)).bind(discount.created_at)
        .execute(&self.pool).await.map_err(write_error("Discount code"))?;
        Ok(())
    }

    async fn get_discount(&self, id: Uuid) -> Result<Option<Discount>> {
        let row = sqlx::query("SELECT doc FROM discounts WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn find_discount_by_code(&self, code: &str) -> Result<Option<Discount>> {
        let row = sqlx::query("SELECT doc FROM discounts WHERE LOWER(discount_code) = LOWER($1)").bind(code.trim()).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn list_discounts(&self) -> Result<Vec<Discount>> {
        let rows = sqlx::query("SELECT doc FROM discounts ORDER BY created_at").fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn list_automatic_discounts(&self) -> Result<Vec<Discount>> {
        let rows = sqlx::query("SELECT doc FROM discounts WHERE automatic ORDER BY created_at").fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn save_redemption(&self, redemption: &RedeemedDiscount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO redeemed_discounts (id, discount_id, user_id, order_id, redemption_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (discount_id, order_id) DO NOTHING
            "#,
        )
        .bind(redemption.id).bind(redemption.discount_id).bind(redemption.user_id).bind(redemption.order_id).bind(redemption.redemption_date)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn clear_redemptions(&self, order_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM redeemed_discounts WHERE order_id = $1").bind(order_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn redemption_counts(&self, discount_id: Uuid, user_id: Uuid) -> Result<RedemptionCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE r.user_id = $2) AS by_user
            FROM redeemed_discounts r
            JOIN orders o ON o.id = r.order_id
            WHERE r.discount_id = $1 AND o.state IN ('fulfilled', 'partially_refunded', 'refunded')
            "#,
        )
        .bind(discount_id).bind(user_id).fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total")?;
        let by_user: i64 = row.try_get("by_user")?;
        Ok(RedemptionCounts { total: total as u32, by_user: by_user as u32 })
    }

    async fn save_tax_rate(&self, rate: &TaxRate) -> Result<()> {
        sqlx::query("INSERT INTO tax_rates (id, country_code, doc) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET country_code = EXCLUDED.country_code, doc = EXCLUDED.doc")
            .bind(rate.id).bind(rate.country_code.as_str()).bind(Json(rate))
            .execute(&self.pool).await.map_err(write_error("Tax rate for this country"))?;
        Ok(())
    }

    async fn list_tax_rates(&self) -> Result<Vec<TaxRate>> {
        let rows = sqlx::query("SELECT doc FROM tax_rates ORDER BY country_code").fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn save_blocked_country(&self, block: &BlockedCountry) -> Result<()> {
        sqlx::query(
            "INSERT INTO blocked_countries (id, country_code, product_id, doc) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(block.id).bind(block.country_code.as_str()).bind(block.product_id).bind(Json(block))
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn list_blocked_countries(&self) -> Result<Vec<BlockedCountry>> {
        let rows = sqlx::query("SELECT doc FROM blocked_countries ORDER BY country_code").fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn save_netblock(&self, block: &NetBlock) -> Result<()> {
        sqlx::query("INSERT INTO netblocks (ip_start, ip_end, country_code) VALUES ($1, $2, $3)")
            .bind(i64::from(u32::from(block.ip_start))).bind(i64::from(u32::from(block.ip_end))).bind(block.country_code.as_str())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn geoip_country(&self, ip: Ipv4Addr) -> Result<Option<CountryCode>> {
        let row = sqlx::query("SELECT country_code FROM netblocks WHERE $1 BETWEEN ip_start AND ip_end LIMIT 1")
            .bind(i64::from(u32::from(ip))).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let code: String = row.try_get("country_code")?;
                Ok(CountryCode::new(code).ok())
            }
            None => Ok(None),
        }
    }

    async fn save_basket(&self, basket: &Basket) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO baskets (id, user_id, integrated_system_id, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(basket.id()).bind(basket.user_id()).bind(basket.integrated_system_id()).bind(Json(basket)).bind(basket.updated_at())
        .execute(&self.pool).await.map_err(write_error("Basket for this system"))?;
        Ok(())
    }

    async fn get_basket(&self, id: Uuid) -> Result<Option<Basket>> {
        let row = sqlx::query("SELECT doc FROM baskets WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn find_basket(&self, user_id: Uuid, system_id: Uuid) -> Result<Option<Basket>> {
        let row = sqlx::query("SELECT doc FROM baskets WHERE user_id = $1 AND integrated_system_id = $2")
            .bind(user_id).bind(system_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn list_baskets(&self, user_id: Uuid) -> Result<Vec<Basket>> {
        let rows = sqlx::query("SELECT doc FROM baskets WHERE user_id = $1 ORDER BY updated_at").bind(user_id).fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn delete_basket(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM baskets WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, reference_number, purchaser_id, state, doc, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET state = EXCLUDED.state, doc = EXCLUDED.doc
            "#,
        )
        .bind(order.id()).bind(order.reference_number()).bind(order.purchaser_id()).bind(order.state().as_str()).bind(Json(order)).bind(order.created_at())
        .execute(&self.pool).await.map_err(write_error("Order"))?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT doc FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn get_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT doc FROM orders WHERE reference_number = $1").bind(reference).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT doc FROM orders WHERE purchaser_id = $1 ORDER BY created_at DESC").bind(user_id).fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn list_orders_by_state(&self, state: OrderState) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT doc FROM orders WHERE state = $1 ORDER BY created_at").bind(state.as_str()).fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn save_refund_request(&self, request: &RefundRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refund_requests (id, order_id, requester_id, doc, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc
            "#,
        )
        .bind(request.id()).bind(request.order_id()).bind(request.requester_id()).bind(Json(request)).bind(request.created_at())
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_refund_request(&self, id: Uuid) -> Result<Option<RefundRequest>> {
        let row = sqlx::query("SELECT doc FROM refund_requests WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn list_refund_requests(&self, requester_id: Option<Uuid>) -> Result<Vec<RefundRequest>> {
        let rows = sqlx::query("SELECT doc FROM refund_requests WHERE ($1::uuid IS NULL OR requester_id = $1) ORDER BY created_at DESC")
            .bind(requester_id).fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn find_refund_request_by_code(&self, code: Uuid) -> Result<Option<RefundRequest>> {
        let approve = serde_json::json!([{ "approve_code": code }]);
        let deny = serde_json::json!([{ "deny_code": code }]);
        let row = sqlx::query("SELECT doc FROM refund_requests WHERE doc -> 'codes' @> $1 OR doc -> 'codes' @> $2 LIMIT 1")
            .bind(Json(approve)).bind(Json(deny)).fetch_optional(&self.pool).await?;
        row.as_ref().map(doc).transpose()
    }

    async fn save_recipient(&self, recipient: &RequestRecipient) -> Result<()> {
        sqlx::query("INSERT INTO request_recipients (id, email, integrated_system_id) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email")
            .bind(recipient.id).bind(&recipient.email).bind(recipient.integrated_system_id)
            .execute(&self.pool).await.map_err(write_error("Recipient for this system"))?;
        Ok(())
    }

    async fn list_recipients(&self, system_id: Uuid) -> Result<Vec<RequestRecipient>> {
        let rows = sqlx::query("SELECT id, email, integrated_system_id FROM request_recipients WHERE integrated_system_id = $1 ORDER BY email")
            .bind(system_id).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<RequestRecipient> {
                Ok(RequestRecipient { id: row.try_get("id")?, email: row.try_get("email")?, integrated_system_id: row.try_get("integrated_system_id")? })
            })
            .collect()
    }
}
