//! Post-sale webhooks to integrated systems.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::config::WebhookSettings;
use crate::domain::aggregates::{IntegratedSystem, Line, Order, OrderState, User};
use crate::domain::events::SaleSource;

pub const POST_SALE: &str = "postsale";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub system_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user: WebhookUser,
    pub data: WebhookOrder,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookOrder {
    pub order: OrderSummary,
    pub lines: Vec<Line>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub reference_number: String,
    pub state: OrderState,
    pub total_price_paid: Decimal,
    pub source: SaleSource,
    pub created_at: DateTime<Utc>,
}

/// One post-sale payload per system with a webhook URL, carrying only that
/// system's lines.
pub fn post_sale_payloads(order: &Order, purchaser: &User, systems: &[IntegratedSystem], source: SaleSource) -> Vec<(String, WebhookPayload)> {
    let user = WebhookUser {
        id: purchaser.id, username: purchaser.username.clone(), email: purchaser.email.clone(),
        first_name: purchaser.first_name.clone(), last_name: purchaser.last_name.clone(),
    };
    systems
        .iter()
        .filter_map(|system| {
            let url = system.webhook_url.clone()?;
            let lines: Vec<Line> = order.lines().iter().filter(|l| l.product_version.system_id == system.id).cloned().collect();
            if lines.is_empty() { return None; }
            let payload = WebhookPayload {
                system_key: system.api_key.clone(),
                kind: POST_SALE.to_string(),
                user: user.clone(),
                data: WebhookOrder {
                    order: OrderSummary {
                        id: order.id(), reference_number: order.reference_number().to_string(), state: order.state(),
                        total_price_paid: order.total_price_paid(), source, created_at: order.created_at(),
                    },
                    lines,
                },
            };
            Some((url, payload))
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Worth another try later: timeouts, refused connections, 5xx.
    #[error("Transient webhook failure: {0}")]
    Transient(String),
    #[error("Webhook rejected: {0}")]
    Permanent(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    GaveUp { attempts: u32 },
    Rejected,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
    settings: WebhookSettings,
}

impl WebhookDispatcher {
    pub fn new(settings: WebhookSettings) -> Self {
        let http = reqwest::Client::builder().timeout(settings.timeout).build().unwrap_or_default();
        Self { http, settings }
    }

    pub async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self.http.post(url).json(payload).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() { WebhookError::Transient(e.to_string()) } else { WebhookError::Permanent(e.to_string()) }
        })?;
        let status = response.status();
        if status.is_server_error() {
            return Err(WebhookError::Transient(format!("{url} returned {status}")));
        }
        if status.is_client_error() {
            return Err(WebhookError::Permanent(format!("{url} returned {status}")));
        }
        Ok(())
    }

    /// Send, retrying transient failures after the cooldown until the retry
    /// max is reached.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Delivery {
        let reference = &payload.data.order.reference_number;
        info!(%url, order = %reference, source = payload.data.order.source.as_str(), "Calling webhook endpoint");
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.send(url, payload).await {
                Ok(()) => return Delivery::Delivered { attempts },
                Err(WebhookError::Permanent(reason)) => {
                    error!(%url, order = %reference, %reason, "Webhook URL returned something unexpected");
                    return Delivery::Rejected;
                }
                Err(WebhookError::Transient(reason)) => {
                    warn!(%url, attempt = attempts, order = %reference, %reason, "Had problems getting to the webhook URL");
                    if attempts >= self.settings.retry_max {
                        error!(%url, attempts, order = %reference, "Hit the webhook retry max, giving up");
                        return Delivery::GaveUp { attempts };
                    }
                    tokio::time::sleep(self.settings.retry_cooldown).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{PaymentData, Product, UserInfo};
    use crate::domain::value_objects::{Quantity, Sku};
    use httpmock::prelude::*;
    use std::time::Duration;

    fn fixtures() -> (Order, User, Vec<IntegratedSystem>) {
        let a = IntegratedSystem::create("Alpha").unwrap().with_webhook("http://alpha.test/hook");
        let b = IntegratedSystem::create("Beta").unwrap().with_webhook("http://beta.test/hook");
        let c = IntegratedSystem::create("Gamma").unwrap();
        let (_, va) = Product::create(a.id, Sku::new("A1").unwrap(), "Alpha course", Decimal::new(10, 0)).unwrap();
        let (_, vb) = Product::create(b.id, Sku::new("B1").unwrap(), "Beta course", Decimal::new(20, 0)).unwrap();
        let user = User::from_userinfo(&UserInfo {
            preferred_username: "learner".into(), email: "learner@example.com".into(), given_name: None,
            family_name: None, country_code: None, is_staff: false,
        });
        let mut order = Order::create(user.id, a.id, "uecom", "test");
        order.replace_lines(vec![
            Line::new(va, Quantity::ONE, Decimal::new(10, 0), Decimal::ZERO, None),
            Line::new(vb, Quantity::ONE, Decimal::new(20, 0), Decimal::ZERO, None),
        ]).unwrap();
        order.fulfill(&PaymentData { transaction_id: Some("t1".into()), amount: Decimal::new(30, 0), data: serde_json::json!({}) }, SaleSource::Redirect).unwrap();
        (order, user, vec![a, b, c])
    }

    #[test]
    fn test_one_payload_per_system_with_its_lines() {
        let (order, user, systems) = fixtures();
        let payloads = post_sale_payloads(&order, &user, &systems, SaleSource::Redirect);
        assert_eq!(payloads.len(), 2);
        let (url, alpha) = &payloads[0];
        assert_eq!(url, "http://alpha.test/hook");
        assert_eq!(alpha.system_key, systems[0].api_key);
        assert_eq!(alpha.data.lines.len(), 1);
        assert_eq!(alpha.data.lines[0].product_version.sku.as_str(), "A1");
        let json = serde_json::to_value(alpha).unwrap();
        assert_eq!(json["type"], "postsale");
        assert_eq!(json["data"]["order"]["state"], "fulfilled");
    }

    fn dispatcher(retry_max: u32) -> WebhookDispatcher {
        WebhookDispatcher::new(WebhookSettings { retry_max, retry_cooldown: Duration::from_millis(5), timeout: Duration::from_secs(5) })
    }

    #[tokio::test]
    async fn test_delivers_payload() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook").json_body_partial(r#"{"type": "postsale"}"#);
                then.status(200);
            })
            .await;
        let (order, user, systems) = fixtures();
        let (_, payload) = post_sale_payloads(&order, &user, &systems, SaleSource::Backoffice).remove(0);
        let outcome = dispatcher(3).deliver(&server.url("/hook"), &payload).await;
        assert_eq!(outcome, Delivery::Delivered { attempts: 1 });
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_gives_up() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(503);
            })
            .await;
        let (order, user, systems) = fixtures();
        let (_, payload) = post_sale_payloads(&order, &user, &systems, SaleSource::Redirect).remove(0);
        let outcome = dispatcher(3).deliver(&server.url("/hook"), &payload).await;
        assert_eq!(outcome, Delivery::GaveUp { attempts: 3 });
        hook.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(404);
            })
            .await;
        let (order, user, systems) = fixtures();
        let (_, payload) = post_sale_payloads(&order, &user, &systems, SaleSource::Redirect).remove(0);
        assert_eq!(dispatcher(3).deliver(&server.url("/hook"), &payload).await, Delivery::Rejected);
        hook.assert_hits_async(1).await;
    }
}
