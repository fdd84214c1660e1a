//! CyberSource: Secure Acceptance for payments, REST API for refunds and
//! transaction search.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, error, warn};
use uuid::Uuid;
use crate::config::CybersourceSettings;
use crate::{EcommerceError, Result};
use super::{
    CheckoutPayload, Fields, GatewayOrder, PaymentGateway, ProcessorResponse, ProcessorState, RefundRequestData, RefundResponse,
    TransactionLookup, DECLINE_CODES, ERROR_CODES, REVIEW_CODES,
};

type HmacSha256 = Hmac<Sha256>;

pub struct CybersourceGateway {
    settings: CybersourceSettings,
    currency: String,
    http: reqwest::Client,
}

impl CybersourceGateway {
    pub fn new(settings: CybersourceSettings, currency: impl Into<String>) -> Self {
        Self { settings, currency: currency.into(), http: reqwest::Client::new() }
    }

    /// Secure Acceptance signature: HMAC-SHA256 over `name=value` pairs of
    /// the fields named in `signed_field_names`, comma joined, base64 encoded.
    pub fn sign(&self, fields: &Fields) -> Result<String> {
        let mut mac = self.mac(self.settings.security_key.as_bytes())?;
        mac.update(signing_string(fields).as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn mac(&self, key: &[u8]) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(key).map_err(|e| EcommerceError::PaymentGateway(e.to_string()))
    }

    fn rest_base(&self) -> (String, String) {
        let host = self.settings.rest_api_host.trim_end_matches('/');
        match host.split_once("://") {
            Some((_, bare)) => (host.to_string(), bare.to_string()),
            None => (format!("https://{host}"), host.to_string()),
        }
    }

    /// Headers for a REST call authenticated with an HTTP signature.
    fn signed_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(&'static str, String)>> {
        let (_, host) = self.rest_base();
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let digest = format!("SHA-256={}", BASE64.encode(Sha256::digest(body.as_bytes())));
        let merchant = &self.settings.merchant_id;
        let signing = format!(
            "host: {host}\ndate: {date}\n(request-target): {} {path}\ndigest: {digest}\nv-c-merchant-id: {merchant}",
            method.to_lowercase()
        );
        let secret = BASE64.decode(&self.settings.rest_shared_secret).map_err(|e| EcommerceError::PaymentGateway(e.to_string()))?;
        let mut mac = self.mac(&secret)?;
        mac.update(signing.as_bytes());
        let signature = format!(
            r#"keyid="{}", algorithm="HmacSHA256", headers="host date (request-target) digest v-c-merchant-id", signature="{}""#,
            self.settings.rest_key_id,
            BASE64.encode(mac.finalize().into_bytes())
        );
        Ok(vec![
            ("host", host), ("date", date), ("digest", digest), ("v-c-merchant-id", merchant.clone()), ("signature", signature),
        ])
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(reqwest::StatusCode, Value)> {
        let (base, _) = self.rest_base();
        let body = body.to_string();
        let mut request = self.http.post(format!("{base}{path}")).header("content-type", "application/json");
        for (name, value) in self.signed_headers("post", path, &body)? {
            request = request.header(name, value);
        }
        let response = request.body(body).send().await.map_err(|e| EcommerceError::PaymentGateway(e.to_string()))?;
        let status = response.status();
        let payload = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, payload))
    }
}

fn signing_string(fields: &Fields) -> String {
    let names = fields.get("signed_field_names").map(String::as_str).unwrap_or_default();
    names
        .split(',')
        .filter(|n| !n.is_empty())
        .map(|name| format!("{name}={}", fields.get(name).map(String::as_str).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Map a Secure Acceptance decision (and reason code) to a processor state.
pub fn decision_state(decision: &str, reason_code: Option<u32>) -> ProcessorState {
    match decision.to_ascii_uppercase().as_str() {
        "ACCEPT" => ProcessorState::Accepted,
        "DECLINE" => ProcessorState::Declined,
        "ERROR" => ProcessorState::Error,
        "CANCEL" => ProcessorState::Cancelled,
        "REVIEW" => ProcessorState::Review,
        _ => match reason_code {
            Some(code) if ERROR_CODES.contains(&code) => ProcessorState::Error,
            Some(code) if REVIEW_CODES.contains(&code) => ProcessorState::Review,
            Some(code) if DECLINE_CODES.contains(&code) => ProcessorState::Declined,
            _ => ProcessorState::Error,
        },
    }
}

fn refund_state(status: &str) -> ProcessorState {
    match status.to_ascii_uppercase().as_str() {
        "PENDING" | "TRANSMITTED" => ProcessorState::Pending,
        "ACCEPTED" | "REFUNDED" | "SUCCEEDED" => ProcessorState::Accepted,
        "DECLINED" | "INVALID_REQUEST" => ProcessorState::Declined,
        _ => ProcessorState::Error,
    }
}

fn money(amount: Decimal) -> String { format!("{:.2}", amount) }

#[async_trait]
impl PaymentGateway for CybersourceGateway {
    fn start_payment(&self, order: &GatewayOrder, receipt_url: &str, cancel_url: &str, merchant_fields: &[String]) -> Result<CheckoutPayload> {
        let mut fields = Fields::new();
        let mut put = |k: String, v: String| { fields.insert(k, v); };
        put("access_key".into(), self.settings.access_key.clone());
        put("profile_id".into(), self.settings.profile_id.clone());
        put("transaction_uuid".into(), Uuid::new_v4().simple().to_string());
        put("signed_date_time".into(), Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
        put("locale".into(), "en-us".into());
        put("transaction_type".into(), "sale".into());
        put("reference_number".into(), order.reference.clone());
        put("amount".into(), money(order.total()));
        put("tax_amount".into(), money(order.items.iter().map(|i| i.tax_amount).sum()));
        put("currency".into(), self.currency.clone());
        put("consumer_id".into(), order.username.clone());
        put("override_custom_receipt_page".into(), receipt_url.to_string());
        put("override_custom_cancel_page".into(), cancel_url.to_string());
        put("line_item_count".into(), order.items.len().to_string());
        if let Some(ip) = &order.ip_address { put("customer_ip_address".into(), ip.clone()); }
        for (i, item) in order.items.iter().enumerate() {
            put(format!("item_{i}_code"), item.code.clone());
            put(format!("item_{i}_name"), item.name.chars().take(254).collect());
            put(format!("item_{i}_quantity"), item.quantity.to_string());
            put(format!("item_{i}_sku"), item.sku.clone());
            put(format!("item_{i}_tax_amount"), money(item.tax_amount));
            put(format!("item_{i}_unit_price"), money(item.unit_price));
        }
        for (i, value) in merchant_fields.iter().enumerate() {
            put(format!("merchant_defined_data{}", i + 1), value.clone());
        }
        let mut names: Vec<String> = fields.keys().cloned().collect();
        names.push("signed_field_names".into());
        names.push("unsigned_field_names".into());
        fields.insert("unsigned_field_names".into(), String::new());
        fields.insert("signed_field_names".into(), names.join(","));
        let signature = self.sign(&fields)?;
        fields.insert("signature".into(), signature);
        debug!(reference = %order.reference, "Signed checkout payload");
        Ok(CheckoutPayload { url: self.settings.secure_acceptance_url.clone(), method: "POST", payload: fields })
    }

    fn validate_response(&self, fields: &Fields) -> bool {
        let (Some(signature), Some(_)) = (fields.get("signature"), fields.get("signed_field_names")) else { return false };
        let Ok(expected) = BASE64.decode(signature) else { return false };
        let Ok(mut mac) = self.mac(self.settings.security_key.as_bytes()) else { return false };
        mac.update(signing_string(fields).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn format_response(&self, fields: &Fields) -> ProcessorResponse {
        let reason_code = fields.get("reason_code").cloned();
        let numeric = reason_code.as_deref().and_then(|c| c.parse().ok());
        let decision = fields.get("decision").map(String::as_str).unwrap_or_default();
        ProcessorResponse {
            state: decision_state(decision, numeric),
            reason_code,
            transaction_id: fields.get("transaction_id").cloned(),
            amount: fields.get("req_amount").or_else(|| fields.get("auth_amount")).and_then(|a| Decimal::from_str(a).ok()),
            message: fields.get("message").cloned().unwrap_or_default(),
            response_data: json!(fields),
        }
    }

    fn reference_from_response(&self, fields: &Fields) -> Option<String> {
        fields.get("req_reference_number").cloned()
    }

    async fn start_refund(&self, request: &RefundRequestData) -> Result<RefundResponse> {
        let path = format!("/pts/v2/payments/{}/refunds", request.transaction_id);
        let body = json!({
            "clientReferenceInformation": { "code": request.reference },
            "orderInformation": { "amountDetails": { "totalAmount": money(request.amount), "currency": request.currency } },
        });
        let (status, payload) = self.post_json(&path, &body).await?;
        if !status.is_success() {
            warn!(%status, transaction = %request.transaction_id, "Refund request rejected");
        }
        let state = match payload.get("status").and_then(Value::as_str) {
            Some(s) if status.is_success() => refund_state(s),
            _ => ProcessorState::Error,
        };
        let amount = payload
            .pointer("/refundAmountDetails/refundAmount")
            .and_then(Value::as_str)
            .and_then(|a| Decimal::from_str(a).ok());
        let message = payload
            .pointer("/errorInformation/message")
            .or_else(|| payload.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(RefundResponse { state, transaction_id: payload.get("id").and_then(Value::as_str).map(String::from), amount, message, response_data: payload })
    }

    async fn find_transactions(&self, references: &[String]) -> Result<HashMap<String, TransactionLookup>> {
        if references.is_empty() { return Ok(HashMap::new()); }
        let query = references.iter().map(|r| format!("clientReferenceInformation.code:{r}")).collect::<Vec<_>>().join(" OR ");
        let body = json!({
            "save": false, "name": "pending-order-resolution", "timezone": "UTC", "query": query,
            "offset": 0, "limit": 1000, "sort": "id:asc,submitTimeUtc:asc",
        });
        let (status, payload) = self.post_json("/tss/v2/searches", &body).await?;
        if !status.is_success() {
            error!(%status, "Transaction search failed");
            return Err(EcommerceError::PaymentGateway(format!("transaction search returned {status}")));
        }
        let mut found = HashMap::new();
        let summaries = payload.pointer("/_embedded/transactionSummaries").and_then(Value::as_array).cloned().unwrap_or_default();
        for summary in summaries {
            let Some(reference) = summary.pointer("/clientReferenceInformation/code").and_then(Value::as_str) else { continue };
            let Some(transaction_id) = summary.get("id").and_then(Value::as_str) else { continue };
            let reason_code = summary
                .pointer("/applicationInformation/reasonCode")
                .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
                .unwrap_or(0) as u32;
            let data = json!({
                "req_reference_number": reference, "transaction_id": transaction_id, "reason_code": reason_code, "summary": summary,
            });
            found.insert(reference.to_string(), TransactionLookup { reference: reference.to_string(), transaction_id: transaction_id.to_string(), reason_code, data });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayItem;

    fn gateway() -> CybersourceGateway {
        let settings = CybersourceSettings {
            merchant_id: "test_merchant".into(), secure_acceptance_url: "https://sa.example/pay".into(),
            access_key: "access".into(), profile_id: "profile".into(), security_key: "secret-key".into(),
            rest_api_host: "apitest.cybersource.com".into(), rest_key_id: "key".into(), rest_shared_secret: BASE64.encode("shared"),
        };
        CybersourceGateway::new(settings, "USD")
    }

    fn order() -> GatewayOrder {
        GatewayOrder {
            username: "learner".into(), ip_address: Some("10.0.0.1".into()), reference: "uecom-test-1".into(),
            items: vec![GatewayItem {
                code: "sys!SKU".into(), name: "Course".into(), quantity: 1, sku: "sys!SKU".into(),
                unit_price: Decimal::new(9999, 2), tax_amount: Decimal::new(1000, 2),
            }],
        }
    }

    #[test]
    fn test_start_payment_signs_every_field() {
        let gw = gateway();
        let payload = gw.start_payment(&order(), "https://shop/receipt", "https://shop/cancel", &["basket".into()]).unwrap();
        assert_eq!(payload.payload["amount"], "109.99");
        assert_eq!(payload.payload["merchant_defined_data1"], "basket");
        assert!(payload.payload["signed_field_names"].contains("reference_number"));
        assert!(gw.validate_response(&payload.payload));
    }

    #[test]
    fn test_tampered_response_fails_validation() {
        let gw = gateway();
        let mut fields = Fields::new();
        fields.insert("decision".into(), "ACCEPT".into());
        fields.insert("req_reference_number".into(), "uecom-test-1".into());
        fields.insert("signed_field_names".into(), "decision,req_reference_number,signed_field_names".into());
        let signature = gw.sign(&fields).unwrap();
        fields.insert("signature".into(), signature);
        assert!(gw.validate_response(&fields));
        fields.insert("decision".into(), "DECLINE".into());
        assert!(!gw.validate_response(&fields));
        fields.remove("signature");
        assert!(!gw.validate_response(&fields));
    }

    #[test]
    fn test_decisions_map_to_states() {
        assert_eq!(decision_state("ACCEPT", Some(100)), ProcessorState::Accepted);
        assert_eq!(decision_state("decline", None), ProcessorState::Declined);
        assert_eq!(decision_state("CANCEL", None), ProcessorState::Cancelled);
        assert_eq!(decision_state("REVIEW", Some(520)), ProcessorState::Review);
        assert_eq!(decision_state("", Some(151)), ProcessorState::Error);
        assert_eq!(refund_state("PENDING"), ProcessorState::Pending);
        assert!(refund_state("PENDING").is_refund_success());
    }

    #[test]
    fn test_format_response() {
        let gw = gateway();
        let mut fields = Fields::new();
        fields.insert("decision".into(), "ACCEPT".into());
        fields.insert("reason_code".into(), "100".into());
        fields.insert("transaction_id".into(), "12345".into());
        fields.insert("req_amount".into(), "109.99".into());
        let response = gw.format_response(&fields);
        assert_eq!(response.state, ProcessorState::Accepted);
        assert_eq!(response.numeric_reason_code(), Some(100));
        assert_eq!(response.amount, Some(Decimal::new(10999, 2)));
    }

    #[test]
    fn test_rest_signature_headers() {
        let gw = gateway();
        let headers = gw.signed_headers("post", "/pts/v2/payments/1/refunds", "{}").unwrap();
        let names: Vec<_> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["host", "date", "digest", "v-c-merchant-id", "signature"]);
        assert!(headers[4].1.starts_with(r#"keyid="key""#));
    }
}
