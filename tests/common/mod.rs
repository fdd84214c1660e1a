#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use unified_ecommerce::config::Settings;
use unified_ecommerce::domain::aggregates::{IntegratedSystem, Product, User, UserInfo};
use unified_ecommerce::gateway::{
    CheckoutPayload, CybersourceGateway, Fields, GatewayOrder, PaymentGateway, ProcessorResponse, ProcessorState, RefundRequestData,
    RefundResponse, TransactionLookup,
};
use unified_ecommerce::services::events::{self, EventReceiver};
use unified_ecommerce::services::Services;
use unified_ecommerce::store::MemoryStore;
use unified_ecommerce::domain::events::DomainEvent;

pub const SECURITY_KEY: &str = "test-security-key";

/// Signs and reads hosted-page fields like the real gateway, but answers
/// REST calls from a script.
pub struct FakeGateway {
    inner: CybersourceGateway,
    pub refunds: Mutex<Vec<RefundRequestData>>,
    pub refund_state: Mutex<ProcessorState>,
    pub transactions: Mutex<HashMap<String, TransactionLookup>>,
}

impl FakeGateway {
    pub fn new(settings: &Settings) -> Self {
        Self {
            inner: CybersourceGateway::new(settings.cybersource.clone(), settings.currency.clone()),
            refunds: Mutex::new(vec![]),
            refund_state: Mutex::new(ProcessorState::Accepted),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// A signed response for `reference` as the hosted page would post it.
    pub fn response(&self, reference: &str, decision: &str, reason_code: u32, transaction_id: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("req_reference_number".into(), reference.into());
        fields.insert("decision".into(), decision.into());
        fields.insert("reason_code".into(), reason_code.to_string());
        fields.insert("transaction_id".into(), transaction_id.into());
        fields.insert("req_currency".into(), "USD".into());
        fields.insert(
            "signed_field_names".into(),
            "req_reference_number,decision,reason_code,transaction_id,req_currency,signed_field_names".into(),
        );
        let signature = self.inner.sign(&fields).unwrap();
        fields.insert("signature".into(), signature);
        fields
    }

    pub fn found(&self, reference: &str, transaction_id: &str, reason_code: u32) {
        self.transactions.lock().unwrap().insert(
            reference.to_string(),
            TransactionLookup { reference: reference.into(), transaction_id: transaction_id.into(), reason_code, data: json!({}) },
        );
    }

    pub fn refund_calls(&self) -> Vec<RefundRequestData> { self.refunds.lock().unwrap().clone() }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn start_payment(&self, order: &GatewayOrder, receipt_url: &str, cancel_url: &str, merchant_fields: &[String]) -> unified_ecommerce::Result<CheckoutPayload> {
        self.inner.start_payment(order, receipt_url, cancel_url, merchant_fields)
    }

    fn validate_response(&self, fields: &Fields) -> bool { self.inner.validate_response(fields) }

    fn format_response(&self, fields: &Fields) -> ProcessorResponse { self.inner.format_response(fields) }

    fn reference_from_response(&self, fields: &Fields) -> Option<String> { self.inner.reference_from_response(fields) }

    async fn start_refund(&self, request: &RefundRequestData) -> unified_ecommerce::Result<RefundResponse> {
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push(request.clone());
        Ok(RefundResponse {
            state: *self.refund_state.lock().unwrap(),
            transaction_id: Some(format!("refund-{}", refunds.len())),
            amount: Some(request.amount),
            message: String::new(),
            response_data: json!({ "status": "PENDING" }),
        })
    }

    async fn find_transactions(&self, references: &[String]) -> unified_ecommerce::Result<HashMap<String, TransactionLookup>> {
        let known = self.transactions.lock().unwrap();
        Ok(references.iter().filter_map(|r| known.get(r).map(|t| (r.clone(), t.clone()))).collect())
    }
}

pub struct Harness {
    pub services: Services,
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<MemoryStore>,
    pub events: EventReceiver,
    pub staff: User,
    pub system: IntegratedSystem,
}

impl Harness {
    /// A service over an in-memory store with one system ("Learning
    /// Platform") and a staff user.
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    pub async fn with_settings(tweak: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Settings::local();
        settings.cybersource.security_key = SECURITY_KEY.into();
        settings.cybersource.access_key = "access".into();
        settings.cybersource.profile_id = "profile".into();
        tweak(&mut settings);
        let gateway = Arc::new(FakeGateway::new(&settings));
        let store = Arc::new(MemoryStore::new());
        let (sender, events) = events::channel();
        let services = Services::new(store.clone(), gateway.clone(), Arc::new(settings), sender);
        let staff = services.resolve_user(&userinfo("admin", None, true)).await.unwrap();
        let system = services.create_system(&staff, "Learning Platform", None, None).await.unwrap();
        Self { services, gateway, store, events, staff, system }
    }

    pub async fn user(&self, username: &str, country: Option<&str>) -> User {
        self.services.resolve_user(&userinfo(username, country, false)).await.unwrap()
    }

    pub async fn product(&self, sku: &str, price: &str) -> Product {
        self.services.create_product(&self.staff, self.system.id, sku, sku, price.parse().unwrap(), None).await.unwrap()
    }

    /// Events queued so far.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        let mut drained = vec![];
        while let Ok(event) = self.events.try_recv() { drained.push(event); }
        drained
    }

    pub async fn call(&self, method: Method, uri: &str, claims: Option<&UserClaims>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(claims) = claims {
            request = request.header("x-userinfo", claims.header());
        }
        let request = match body {
            Some(body) => request.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        self.send(request).await
    }

    pub async fn call_with_ip(&self, method: Method, uri: &str, claims: &UserClaims, ip: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-userinfo", claims.header())
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_form(&self, uri: &str, fields: &Fields) -> (StatusCode, Value, Option<String>) {
        let body = fields.iter().map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v))).collect::<Vec<_>>().join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let response = unified_ecommerce::api::router(self.services.clone()).oneshot(request).await.unwrap();
        let location = response.headers().get(header::LOCATION).and_then(|l| l.to_str().ok()).map(str::to_string);
        let status = response.status();
        (status, json_body(response.into_body()).await, location)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = unified_ecommerce::api::router(self.services.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        (status, json_body(response.into_body()).await)
    }
}

async fn json_body(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) }
}

fn form_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Claims as the API gateway forwards them.
#[derive(Clone, Debug)]
pub struct UserClaims(pub Value);

impl UserClaims {
    pub fn new(username: &str, country: Option<&str>, staff: bool) -> Self {
        Self(json!({
            "preferred_username": username,
            "email": format!("{username}@example.com"),
            "given_name": username,
            "family_name": "Tester",
            "country_code": country,
            "is_staff": staff,
        }))
    }

    pub fn header(&self) -> String { STANDARD.encode(self.0.to_string()) }
}

pub fn userinfo(username: &str, country: Option<&str>, staff: bool) -> UserInfo {
    serde_json::from_value(UserClaims::new(username, country, staff).0).unwrap()
}

pub fn dec(value: &str) -> Decimal { value.parse().unwrap() }

/// A decimal out of a JSON body, whichever way it was written.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}
