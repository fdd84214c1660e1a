mod common;

use async_trait::async_trait;
use common::Harness;
use httpmock::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use unified_ecommerce::domain::events::SaleSource;
use unified_ecommerce::mail::{MailError, Mailer, Message};
use unified_ecommerce::services::{CheckoutResult, EventWorker};
use unified_ecommerce::store::Store;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Message>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

impl RecordingMailer {
    fn to(&self, address: &str) -> Vec<Message> {
        self.sent.lock().unwrap().iter().filter(|m| m.to == address).cloned().collect()
    }
}

async fn wait_for_hits(mock: &httpmock::Mock<'_>, hits: usize) {
    for _ in 0..100 {
        if mock.hits_async().await >= hits { return; }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_fulfilment_and_refund_fan_out() {
    let server = MockServer::start_async().await;
    let sale = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks").json_body_partial(r#"{"type": "postsale", "data": {"order": {"source": "backoffice"}}}"#);
            then.status(200);
        })
        .await;
    let refund = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks").json_body_partial(r#"{"type": "postsale", "data": {"order": {"source": "refund"}}}"#);
            then.status(200);
        })
        .await;

    let mut h = Harness::new().await;
    h.services.update_system(&h.staff, h.system.id, None, Some(server.url("/hooks")), false).await.unwrap();
    h.services.add_refund_recipient(&h.staff, h.system.id, "finance@example.com").await.unwrap();
    h.product("course-101", "100.00").await;
    let mailer = Arc::new(RecordingMailer::default());
    let worker = EventWorker::new(h.store.clone(), mailer.clone(), h.services.settings.clone());

    let learner = h.user("learner", None).await;
    h.services.add_to_basket(&learner, None, "learning-platform", "course-101", 1).await.unwrap();
    let reference = match h.services.generate_checkout_payload(&learner, "learning-platform", None).await.unwrap() {
        CheckoutResult::Redirect { reference_number, .. } => reference_number,
        other => panic!("expected a redirect, got {other:?}"),
    };
    let fields = h.gateway.response(&reference, "ACCEPT", 100, "txn-1");
    h.services.process_gateway_response(&fields, SaleSource::Backoffice).await.unwrap();
    for event in h.drain_events() {
        worker.handle(&event).await;
    }
    wait_for_hits(&sale, 1).await;
    sale.assert_hits_async(1).await;
    let receipts = mailer.to("learner@example.com");
    assert_eq!(receipts.len(), 1);
    assert!(receipts[0].subject.contains(&reference));

    let order = h.store.get_order_by_reference(&reference).await.unwrap().unwrap();
    let request = h.services.create_refund_request(&learner, order.id(), &[], None).await.unwrap();
    for event in h.drain_events() {
        worker.handle(&event).await;
    }
    let codes = mailer.to("finance@example.com");
    assert_eq!(codes.len(), 1);
    let approve = request.codes()[0].approve_code.to_string();
    assert!(codes[0].body.contains(&approve));

    h.services.process_refund_code(request.codes()[0].approve_code, "finance@example.com", "", &[]).await.unwrap();
    for event in h.drain_events() {
        worker.handle(&event).await;
    }
    wait_for_hits(&refund, 1).await;
    refund.assert_hits_async(1).await;
    let notices = mailer.to("learner@example.com");
    assert_eq!(notices.len(), 2);
    assert!(notices[1].subject.contains("has been issued"));
}

#[tokio::test]
async fn test_systems_without_webhooks_are_skipped() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(200);
        })
        .await;

    let mut h = Harness::new().await;
    h.product("free-course", "0").await;
    let mailer = Arc::new(RecordingMailer::default());
    let worker = EventWorker::new(h.store.clone(), mailer.clone(), h.services.settings.clone());
    let learner = h.user("learner", None).await;
    h.services.add_to_basket(&learner, None, "learning-platform", "free-course", 1).await.unwrap();
    h.services.generate_checkout_payload(&learner, "learning-platform", None).await.unwrap();
    for event in h.drain_events() {
        worker.handle(&event).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    hook.assert_hits_async(0).await;
    assert_eq!(mailer.to("learner@example.com").len(), 1);
}
