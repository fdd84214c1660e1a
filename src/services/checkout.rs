//! Checkout, gateway callbacks, staff refunds and pending-order resolution.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::domain::aggregates::location::is_blocked;
use crate::domain::aggregates::{
    decode_reference_number, Basket, Line, Order, OrderError, OrderState, PaymentData, Product, RedeemedDiscount, RefundRecord, Transaction, User,
};
use crate::domain::events::SaleSource;
use crate::domain::pricing::BasketPricing;
use crate::domain::value_objects::quantize;
use crate::gateway::{CheckoutPayload, Fields, GatewayItem, GatewayOrder, ProcessorState, RefundRequestData, REASON_CODE_SUCCESS};
use crate::{EcommerceError, Result};
use super::locks::{basket_key, order_key};
use super::Services;

/// What the browser does next after asking to check out.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckoutResult {
    /// Nothing to pay; the order is already fulfilled.
    Fulfilled { order_id: Uuid, reference_number: String },
    /// Post `payload` to the hosted payment page.
    Redirect { order_id: Uuid, reference_number: String, checkout: CheckoutPayload },
}

#[derive(Clone, Debug)]
pub enum OrderLookup {
    Id(Uuid),
    Reference(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PendingResolution {
    pub fulfilled: u32,
    pub cancelled: u32,
    pub errors: u32,
}

impl Services {
    /// Turn the user's basket into a pending order and hand back what's
    /// needed to pay for it. Free orders are fulfilled on the spot.
    pub async fn generate_checkout_payload(&self, user: &User, system_slug: &str, ip: Option<&str>) -> Result<CheckoutResult> {
        let system = self.system_by_slug(system_slug).await?;
        let _guard = self.locks.lock(basket_key(user.id, system.id)).await;
        let basket = self.store.find_basket(user.id, system.id).await?.ok_or(EcommerceError::NotFound("Basket"))?;
        if basket.is_empty() { return Err(crate::domain::aggregates::BasketError::Empty.into()); }

        if let Some(country) = &basket.location().location_block.country_code {
            let blocks = self.store.list_blocked_countries().await?;
            if basket.product_ids().iter().any(|p| is_blocked(country, *p, &blocks)) {
                return Err(EcommerceError::ProductBlocked);
            }
        }

        let (products, _, pricing) = self.basket_summary(&basket).await?;
        let mut order = self.reusable_order(&basket, &products).await?.unwrap_or_else(|| {
            Order::create(user.id, system.id, &self.settings.reference_number_prefix, &self.settings.environment)
        });
        let _order_guard = self.locks.lock(order_key(order.id())).await;
        order.replace_lines(lines_for(&pricing, &products)?)?;
        let used: Vec<Uuid> = pricing.items.iter().filter_map(|i| i.discount_id).fold(Vec::new(), |mut acc, id| {
            if !acc.contains(&id) { acc.push(id); }
            acc
        });
        order.set_discounts(used.clone());
        order.set_tax(basket.tax_rate().map(|r| r.tax_rate), basket.location().location_tax.country_code.clone());
        order.set_purchaser_ip(ip.map(str::to_string));
        self.store.clear_redemptions(order.id()).await?;
        for discount_id in &used {
            self.store.save_redemption(&RedeemedDiscount::new(*discount_id, user.id, order.id())).await?;
        }

        if order.total_price_paid().is_zero() {
            order.fulfill(&PaymentData::zero(), SaleSource::Redirect)?;
            self.store.save_order(&order).await?;
            self.store.delete_basket(basket.id()).await?;
            self.events.publish(order.take_events());
            info!(order = %order.reference_number(), "Fulfilled zero-value order without payment");
            return Ok(CheckoutResult::Fulfilled { order_id: order.id(), reference_number: order.reference_number().to_string() });
        }

        let gateway_order = GatewayOrder {
            username: user.username.clone(),
            ip_address: ip.map(str::to_string),
            reference: order.reference_number().to_string(),
            items: order.lines().iter().map(gateway_item).collect(),
        };
        let callback = format!("{}/api/v0/checkout/result", self.settings.public_base_url);
        let checkout = self.gateway.start_payment(&gateway_order, &callback, &callback, &[system.slug.clone(), basket.id().to_string()])?;
        self.store.save_order(&order).await?;
        self.events.publish(order.take_events());
        info!(order = %order.reference_number(), total = %order.total_price_paid(), "Checkout started");
        Ok(CheckoutResult::Redirect { order_id: order.id(), reference_number: order.reference_number().to_string(), checkout })
    }

    /// A pending order of this user for this system whose lines are exactly
    /// the basket's products at their current versions.
    async fn reusable_order(&self, basket: &Basket, products: &[Product]) -> Result<Option<Order>> {
        let orders = self.store.list_orders_for_user(basket.user_id()).await?;
        Ok(orders.into_iter().find(|order| {
            order.state() == OrderState::Pending
                && order.integrated_system_id() == basket.integrated_system_id()
                && basket.compare_to_order(order)
                && order.lines().iter().all(|line| {
                    products.iter().any(|p| p.id() == line.product_id() && p.version() == line.product_version.version)
                })
        }))
    }

    /// Apply a signed gateway response to its order and return the state the
    /// order ends up in. Orders already past pending are left alone.
    pub async fn process_gateway_response(&self, fields: &Fields, source: SaleSource) -> Result<OrderState> {
        if !self.gateway.validate_response(fields) {
            warn!("Gateway response failed signature validation");
            return Err(EcommerceError::PermissionDenied("Invalid payment gateway signature".into()));
        }
        let reference = self
            .gateway
            .reference_from_response(fields)
            .ok_or_else(|| EcommerceError::Validation("Gateway response has no reference number".into()))?;
        let order_id = decode_reference_number(&reference, &self.settings.environment).ok_or(EcommerceError::NotFound("Order"))?;
        let _guard = self.locks.lock(order_key(order_id)).await;
        let mut order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        if !matches!(order.state(), OrderState::Pending | OrderState::Review) {
            debug!(order = %order.reference_number(), state = %order.state(), "Order already resolved, ignoring response");
            return Ok(order.state());
        }

        let response = self.gateway.format_response(fields);
        let accepted = response.state == ProcessorState::Accepted || response.numeric_reason_code() == Some(REASON_CODE_SUCCESS);
        let outcome = match response.state {
            ProcessorState::Declined => order.decline(),
            ProcessorState::Error => order.errored(),
            ProcessorState::Cancelled => order.cancel(),
            ProcessorState::Review if order.is_review() => Ok(()),
            ProcessorState::Review => order.review(),
            _ if accepted => {
                let payment = PaymentData { transaction_id: response.transaction_id.clone(), amount: order.total_price_paid(), data: response.response_data.clone() };
                order.fulfill(&payment, source)
            }
            _ => order.cancel(),
        };
        self.store.save_order(&order).await?;
        self.events.publish(order.take_events());
        outcome?;

        if order.state() == OrderState::Fulfilled {
            self.delete_matching_basket(&order).await?;
        }
        info!(order = %order.reference_number(), state = %order.state(), reason_code = ?response.reason_code, "Processed gateway response");
        Ok(order.state())
    }

    async fn delete_matching_basket(&self, order: &Order) -> Result<()> {
        let _guard = self.locks.lock(basket_key(order.purchaser_id(), order.integrated_system_id())).await;
        if let Some(basket) = self.store.find_basket(order.purchaser_id(), order.integrated_system_id()).await? {
            if basket.compare_to_order(order) {
                self.store.delete_basket(basket.id()).await?;
            }
        }
        Ok(())
    }

    pub async fn find_order(&self, lookup: &OrderLookup) -> Result<Order> {
        let order = match lookup {
            OrderLookup::Id(id) => self.store.get_order(*id).await?,
            OrderLookup::Reference(reference) => self.store.get_order_by_reference(reference).await?,
        };
        order.ok_or(EcommerceError::NotFound("Order"))
    }

    /// Refund a fulfilled order through the gateway. Without an amount,
    /// whatever hasn't been refunded yet goes back.
    pub async fn refund_order(&self, staff: &User, lookup: OrderLookup, amount: Option<Decimal>, reason: &str) -> Result<Order> {
        Self::require_staff(staff)?;
        let order_id = self.find_order(&lookup).await?.id();
        let _guard = self.locks.lock(order_key(order_id)).await;
        let mut order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        if !matches!(order.state(), OrderState::Fulfilled | OrderState::PartiallyRefunded) {
            return Err(OrderError::InvalidTransition { from: order.state(), to: OrderState::Refunded }.into());
        }
        let remaining = order.total_price_paid() - order.total_refunded();
        let amount = quantize(amount.unwrap_or(remaining));
        if amount <= Decimal::ZERO || amount > remaining {
            return Err(EcommerceError::Validation(format!("Refund amount must be between 0 and {remaining}")));
        }
        let payment = refundable_payment(&order)?.clone();
        let record = self.gateway_refund(&order, &payment, amount, reason).await?;
        order.refund(record)?;
        self.store.save_order(&order).await?;
        self.events.publish(order.take_events());
        info!(order = %order.reference_number(), %amount, "Order refunded");
        Ok(order)
    }

    /// Send a refund to the gateway and turn a successful response into a
    /// refund record for the order.
    pub(crate) async fn gateway_refund(&self, order: &Order, payment: &Transaction, amount: Decimal, reason: &str) -> Result<RefundRecord> {
        let currency = payment.data.get("req_currency").and_then(|c| c.as_str()).unwrap_or(&self.settings.currency).to_string();
        let request = RefundRequestData { transaction_id: payment.transaction_id.clone(), amount, currency, reference: order.reference_number().to_string() };
        let response = self.gateway.start_refund(&request).await?;
        if !response.state.is_refund_success() {
            error!(order = %order.reference_number(), state = ?response.state, message = %response.message, "Gateway refused refund");
            return Err(EcommerceError::PaymentGateway(format!("Refund for {} failed: {}", order.reference_number(), response.message)));
        }
        Ok(RefundRecord { transaction_id: response.transaction_id, amount: response.amount.unwrap_or(amount), reason: reason.to_string(), data: response.response_data })
    }

    /// Ask the gateway about pending orders and settle the ones it knows.
    /// With no reference numbers every pending order is checked.
    pub async fn check_and_process_pending_orders(&self, references: Option<&[String]>) -> Result<PendingResolution> {
        let pending: Vec<String> = self
            .store
            .list_orders_by_state(OrderState::Pending)
            .await?
            .into_iter()
            .map(|o| o.reference_number().to_string())
            .filter(|r| references.map_or(true, |wanted| wanted.contains(r)))
            .collect();
        let mut resolution = PendingResolution::default();
        if pending.is_empty() { return Ok(resolution); }
        info!(count = pending.len(), "Resolving pending orders");

        let found = self.gateway.find_transactions(&pending).await?;
        if found.is_empty() {
            info!("No orders found to resolve");
            return Ok(resolution);
        }
        for lookup in found.values() {
            match self.resolve_pending(lookup).await {
                Ok(OrderState::Fulfilled) => resolution.fulfilled += 1,
                Ok(_) => resolution.cancelled += 1,
                Err(e) => {
                    error!(order = %lookup.reference, error = %e, "Couldn't resolve pending order");
                    resolution.errors += 1;
                }
            }
        }
        Ok(resolution)
    }

    async fn resolve_pending(&self, lookup: &crate::gateway::TransactionLookup) -> Result<OrderState> {
        let order_id = self.find_order(&OrderLookup::Reference(lookup.reference.clone())).await?.id();
        let _guard = self.locks.lock(order_key(order_id)).await;
        let mut order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        if order.state() != OrderState::Pending {
            return Err(EcommerceError::Conflict(format!("Order {} is no longer pending", order.reference_number())));
        }
        let payment = PaymentData { transaction_id: Some(lookup.transaction_id.clone()), amount: order.total_price_paid(), data: lookup.data.clone() };
        let outcome = if lookup.reason_code == REASON_CODE_SUCCESS {
            order.fulfill(&payment, SaleSource::Backoffice).map(|_| ())
        } else {
            order.cancel().and_then(|_| order.create_transaction(&payment, &format!("Cancelled due to processor code {}", lookup.reason_code)).map(|_| ()))
        };
        self.store.save_order(&order).await?;
        self.events.publish(order.take_events());
        outcome?;
        if order.state() == OrderState::Fulfilled {
            self.delete_matching_basket(&order).await?;
        }
        info!(order = %order.reference_number(), state = %order.state(), "Resolved pending order");
        Ok(order.state())
    }

    pub async fn order_history(&self, user: &User) -> Result<Vec<Order>> {
        let mut orders = self.store.list_orders_for_user(user.id).await?;
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    pub async fn order_for(&self, user: &User, order_id: Uuid) -> Result<Order> {
        let order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        if order.purchaser_id() != user.id && !user.is_staff {
            return Err(EcommerceError::NotFound("Order"));
        }
        Ok(order)
    }
}

/// The payment we can refund against. PayPal payments have to go through
/// finance instead.
pub(crate) fn refundable_payment(order: &Order) -> Result<&Transaction> {
    let payment = order
        .payment_transaction()
        .ok_or_else(|| EcommerceError::Validation(format!("No payment transactions exist for order {}", order.reference_number())))?;
    if payment.data.get("paypal_token").is_some() {
        return Err(EcommerceError::PaypalRefund(format!(
            "Order {} contains a PayPal transaction. Please contact Finance to refund this order.",
            order.reference_number()
        )));
    }
    Ok(payment)
}

fn lines_for(pricing: &BasketPricing, products: &[Product]) -> Result<Vec<Line>> {
    pricing
        .items
        .iter()
        .map(|item| {
            let product = products.iter().find(|p| p.id() == item.product_id).ok_or(EcommerceError::NotFound("Product"))?;
            Ok(Line::new(product.snapshot(), item.quantity, item.discounted_price, item.tax, item.discount_id))
        })
        .collect()
}

fn gateway_item(line: &Line) -> GatewayItem {
    let version = &line.product_version;
    GatewayItem {
        code: format!("{}!{}", version.system_id, version.sku),
        name: version.name.clone(),
        quantity: line.quantity.value(),
        sku: version.sku.to_string(),
        unit_price: quantize(line.discounted_price / line.quantity.as_decimal()),
        tax_amount: line.tax,
    }
}

