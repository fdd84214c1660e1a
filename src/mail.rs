//! Outgoing e-mail.

use async_trait::async_trait;
use reqwest::Url;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use crate::domain::aggregates::{Order, RefundRequest, RequestProcessingCode, User};

#[derive(Debug, Error)]
#[error("Failed to send mail to {to}: {reason}")]
pub struct MailError {
    pub to: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "Mail sent");
        Ok(())
    }
}

pub fn receipt(order: &Order, purchaser: &User, currency: &str) -> Message {
    let mut body = format!("Thank you for your order {}.\n\n", order.reference_number());
    for line in order.lines() {
        let version = &line.product_version;
        body.push_str(&format!("{} x{}  {} {}\n", version.name, line.quantity.value(), line.discounted_price, currency));
    }
    if order.total_tax() > Decimal::ZERO {
        body.push_str(&format!("\nTax: {} {}\n", order.total_tax(), currency));
    }
    body.push_str(&format!("Total paid: {} {}\n", order.total_price_paid(), currency));
    Message { to: purchaser.email.clone(), subject: format!("Your receipt for order {}", order.reference_number()), body }
}

/// Approve and deny links for one processing-code recipient. The links only
/// show the request; acting on it takes a POST from the page they open.
pub fn refund_codes(request: &RefundRequest, code: &RequestProcessingCode, base_url: &str) -> Result<Message, MailError> {
    let endpoint = format!("{}/api/v0/refunds/process_code", base_url.trim_end_matches('/'));
    let link = |c: uuid::Uuid| {
        Url::parse_with_params(&endpoint, [("code", c.to_string()), ("email", code.email.clone())])
            .map(String::from)
            .map_err(|e| MailError { to: code.email.clone(), reason: format!("bad processing link {endpoint}: {e}") })
    };
    let body = format!(
        "A refund of {} was requested for order {}.\n\nApprove: {}\nDeny: {}\n\nOnly the first code used from this e-mail batch will be accepted.\n",
        request.total_requested(),
        request.order_reference(),
        link(code.approve_code)?,
        link(code.deny_code)?,
    );
    Ok(Message { to: code.email.clone(), subject: format!("Refund request for order {}", request.order_reference()), body })
}

pub fn refund_issued(request: &RefundRequest, requester: &User, currency: &str) -> Message {
    Message {
        to: requester.email.clone(),
        subject: format!("Your refund for order {} has been issued", request.order_reference()),
        body: format!("A refund of {} {} has been issued for order {}.\n", request.total_refunded(), currency, request.order_reference()),
    }
}

pub fn refund_denied(request: &RefundRequest, requester: &User) -> Message {
    let mut body = format!("Your refund request for order {} was denied.\n", request.order_reference());
    if !request.refund_reason().is_empty() {
        body.push_str(&format!("\nReason: {}\n", request.refund_reason()));
    }
    Message { to: requester.email.clone(), subject: format!("Refund request for order {}", request.order_reference()), body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Line, PaymentData, Product, RequestRecipient};
    use crate::domain::events::SaleSource;
    use crate::domain::value_objects::{Quantity, Sku};
    use uuid::Uuid;

    #[test]
    fn test_code_links_encode_email() {
        let system = Uuid::from_u128(2);
        let (_, version) = Product::create(system, Sku::new("A").unwrap(), "A", Decimal::new(30, 0)).unwrap();
        let mut order = Order::create(Uuid::from_u128(1), system, "uecom", "test");
        order.replace_lines(vec![Line::new(version, Quantity::ONE, Decimal::new(30, 0), Decimal::ZERO, None)]).unwrap();
        order.fulfill(&PaymentData { transaction_id: Some("tx".into()), amount: Decimal::new(30, 0), data: serde_json::json!({}) }, SaleSource::Redirect).unwrap();
        let mut request = RefundRequest::from_order(Uuid::from_u128(1), &order, &[]).unwrap();
        request.issue_codes(&[RequestRecipient::new("fin+refunds@example.com", system)]);

        let message = refund_codes(&request, &request.codes()[0], "https://shop.example/").unwrap();
        assert!(message.body.contains("https://shop.example/api/v0/refunds/process_code?code="));
        assert!(message.body.contains("email=fin%2Brefunds%40example.com"));
        assert!(message.body.contains(&request.codes()[0].approve_code.to_string()));
    }
}
