mod common;

use common::{dec, Harness};
use axum::http::{Method, StatusCode};
use common::UserClaims;
use unified_ecommerce::domain::aggregates::{LineApproval, Order, OrderState, RefundError, RefundRequest, RefundStatus, User};
use unified_ecommerce::domain::events::{DomainEvent, RefundEvent, SaleSource};
use unified_ecommerce::gateway::ProcessorState;
use unified_ecommerce::services::{CheckoutResult, RefundSheetRow, SheetRowResult};
use unified_ecommerce::store::Store;
use unified_ecommerce::EcommerceError;

/// A learner with a paid, fulfilled order for both courses.
async fn fulfilled_order(h: &Harness) -> (User, Order) {
    h.product("course-101", "100.00").await;
    h.product("course-102", "50.00").await;
    h.services.add_refund_recipient(&h.staff, h.system.id, "finance@example.com").await.unwrap();
    let learner = h.user("learner", None).await;
    h.services.add_to_basket(&learner, None, "learning-platform", "course-101", 1).await.unwrap();
    h.services.add_to_basket(&learner, None, "learning-platform", "course-102", 1).await.unwrap();
    let reference = match h.services.generate_checkout_payload(&learner, "learning-platform", None).await.unwrap() {
        CheckoutResult::Redirect { reference_number, .. } => reference_number,
        other => panic!("expected a redirect, got {other:?}"),
    };
    let fields = h.gateway.response(&reference, "ACCEPT", 100, "txn-1");
    h.services.process_gateway_response(&fields, SaleSource::Backoffice).await.unwrap();
    let order = h.store.get_order_by_reference(&reference).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::Fulfilled);
    (learner, order)
}

#[tokio::test]
async fn test_approve_code_refunds_everything() {
    let mut h = Harness::new().await;
    let (learner, order) = fulfilled_order(&h).await;
    h.drain_events();

    let request = h.services.create_refund_request(&learner, order.id(), &[], Some("ZD-7".into())).await.unwrap();
    assert_eq!(request.status(), RefundStatus::Created);
    assert_eq!(request.lines().len(), 2);
    assert_eq!(request.codes().len(), 1);
    assert_eq!(request.zendesk_ticket(), "ZD-7");
    assert!(h.drain_events().iter().any(|e| matches!(e, DomainEvent::Refund(RefundEvent::Created { .. }))));

    let code = request.codes()[0].approve_code;
    let processed = h.services.process_refund_code(code, "FINANCE@example.com", "approved", &[]).await.unwrap();
    assert_eq!(processed.status(), RefundStatus::ApprovedComplete);
    assert_eq!(processed.total_refunded(), dec("150.00"));
    assert!(processed.processed_date().is_some());

    let calls = h.gateway.refund_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].amount, dec("150.00"));
    assert_eq!(calls[0].reference, order.reference_number());
    let order = h.store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::Refunded);
    assert!(h.drain_events().iter().any(|e| matches!(e, DomainEvent::Refund(RefundEvent::Issued { .. }))));

    let reused = h.services.process_refund_code(code, "finance@example.com", "", &[]).await;
    assert!(matches!(reused, Err(EcommerceError::Refund(RefundError::InvalidCode))));
}

#[tokio::test]
async fn test_deny_code() {
    let h = Harness::new().await;
    let (learner, order) = fulfilled_order(&h).await;
    let request = h.services.create_refund_request(&learner, order.id(), &[], None).await.unwrap();

    let wrong_email = h.services.process_refund_code(request.codes()[0].deny_code, "someone@example.com", "", &[]).await;
    assert!(matches!(wrong_email, Err(EcommerceError::Refund(RefundError::InvalidCode))));

    let denied = h.services.process_refund_code(request.codes()[0].deny_code, "finance@example.com", "not eligible", &[]).await.unwrap();
    assert_eq!(denied.status(), RefundStatus::Denied);
    assert_eq!(denied.refund_reason(), "not eligible");
    assert!(h.gateway.refund_calls().is_empty());
    assert_eq!(h.store.get_order(order.id()).await.unwrap().unwrap().state(), OrderState::Fulfilled);

    // The approve code went with the batch.
    let late = h.services.process_refund_code(request.codes()[0].approve_code, "finance@example.com", "", &[]).await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_staff_partial_approval() {
    let h = Harness::new().await;
    let (learner, order) = fulfilled_order(&h).await;
    let line = order.lines().iter().find(|l| l.product_version.sku.as_str() == "course-101").unwrap().id;
    let request = h.services.create_refund_request(&learner, order.id(), &[line], None).await.unwrap();
    assert_eq!(request.lines().len(), 1);

    let too_much = [LineApproval { line_id: line, refunded_amount: dec("100.01") }];
    let result = h.services.approve_refund(&h.staff, request.id(), "", &too_much).await;
    assert!(matches!(result, Err(EcommerceError::Refund(RefundError::AmountOutOfRange { .. }))));

    let approvals = [LineApproval { line_id: line, refunded_amount: dec("30") }];
    let approved = h.services.approve_refund(&h.staff, request.id(), "partial", &approvals).await.unwrap();
    assert_eq!(approved.status(), RefundStatus::ApprovedComplete);
    assert_eq!(approved.total_refunded(), dec("30.00"));
    assert_eq!(approved.processed_by(), Some(h.staff.id));

    let order = h.store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::PartiallyRefunded);
    assert_eq!(order.total_refunded(), dec("30.00"));
}

#[tokio::test]
async fn test_only_purchaser_or_staff_can_request() {
    let h = Harness::new().await;
    let (_, order) = fulfilled_order(&h).await;
    let stranger = h.user("stranger", None).await;
    let result = h.services.create_refund_request(&stranger, order.id(), &[], None).await;
    assert!(matches!(result, Err(EcommerceError::PermissionDenied(_))));
    assert!(h.services.create_refund_request(&h.staff, order.id(), &[], None).await.is_ok());
}

#[tokio::test]
async fn test_gateway_failure_marks_request_failed() {
    let h = Harness::new().await;
    let (learner, order) = fulfilled_order(&h).await;
    let request = h.services.create_refund_request(&learner, order.id(), &[], None).await.unwrap();
    *h.gateway.refund_state.lock().unwrap() = ProcessorState::Declined;

    let result = h.services.approve_refund(&h.staff, request.id(), "", &[]).await;
    assert!(matches!(result, Err(EcommerceError::PaymentGateway(_))));
    let stored = h.store.get_refund_request(request.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), RefundStatus::Failed);
    assert_eq!(h.store.get_order(order.id()).await.unwrap().unwrap().state(), OrderState::Fulfilled);
}

#[tokio::test]
async fn test_failed_payout_is_retried() {
    let h = Harness::new().await;
    let (learner, order) = fulfilled_order(&h).await;
    let request = h.services.create_refund_request(&learner, order.id(), &[], None).await.unwrap();
    *h.gateway.refund_state.lock().unwrap() = ProcessorState::Declined;
    assert!(h.services.approve_refund(&h.staff, request.id(), "", &[]).await.is_err());

    *h.gateway.refund_state.lock().unwrap() = ProcessorState::Accepted;
    let learner_claims = UserClaims::new("learner", None, false);
    let uri = format!("/api/v0/refunds/{}/process", request.id());
    let (status, _) = h.call(Method::POST, &uri, Some(&learner_claims), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = UserClaims::new("admin", None, true);
    let (status, body) = h.call(Method::POST, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved-complete");

    let calls = h.gateway.refund_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].amount, dec("150.00"));
    assert_eq!(h.store.get_order(order.id()).await.unwrap().unwrap().state(), OrderState::Refunded);

    let again = h.services.process_approved_refund(request.id()).await;
    assert!(matches!(again, Err(EcommerceError::Refund(RefundError::NotApproved(RefundStatus::ApprovedComplete)))));
}

#[tokio::test]
async fn test_unsettled_approval_is_paid_out() {
    let h = Harness::new().await;
    let (learner, order) = fulfilled_order(&h).await;
    let mut approved = RefundRequest::from_order(learner.id, &order, &[]).unwrap();
    approved.approve(order.state(), "left approved", &[], Some(h.staff.id)).unwrap();
    h.store.save_refund_request(&approved).await.unwrap();

    let processed = h.services.process_approved_refund(approved.id()).await.unwrap();
    assert_eq!(processed.status(), RefundStatus::ApprovedComplete);
    assert_eq!(processed.total_refunded(), dec("150.00"));
    assert_eq!(h.gateway.refund_calls().len(), 1);

    let untouched = RefundRequest::from_order(learner.id, &order, &[]).unwrap();
    h.store.save_refund_request(&untouched).await.unwrap();
    let result = h.services.process_approved_refund(untouched.id()).await;
    assert!(matches!(result, Err(EcommerceError::Refund(RefundError::NotApproved(RefundStatus::Created)))));
}

#[tokio::test]
async fn test_sheet_rows() {
    let h = Harness::new().await;
    let (_, order) = fulfilled_order(&h).await;

    let missing = RefundSheetRow { order_reference: "uecom-test-nope".into(), sku: "course-101".into(), zendesk_ticket: None };
    assert!(matches!(h.services.process_sheet_row(&missing).await.unwrap(), SheetRowResult::Failed { .. }));

    let wrong_sku = RefundSheetRow { order_reference: order.reference_number().into(), sku: "course-999".into(), zendesk_ticket: None };
    assert!(matches!(h.services.process_sheet_row(&wrong_sku).await.unwrap(), SheetRowResult::Failed { .. }));

    let row = RefundSheetRow { order_reference: order.reference_number().into(), sku: "course-102".into(), zendesk_ticket: Some("ZD-9".into()) };
    let request_id = match h.services.process_sheet_row(&row).await.unwrap() {
        SheetRowResult::Processed { request_id } => request_id,
        other => panic!("expected the row to process, got {other:?}"),
    };
    let request = h.store.get_refund_request(request_id).await.unwrap().unwrap();
    assert_eq!(request.status(), RefundStatus::ApprovedComplete);
    assert_eq!(request.total_refunded(), dec("50.00"));
    assert_eq!(request.refund_reason(), "Approved via Google Sheets");
    assert_eq!(request.zendesk_ticket(), "ZD-9");
    assert!(request.codes().is_empty());

    let order = h.store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::PartiallyRefunded);
    assert!(matches!(h.services.process_sheet_row(&row).await.unwrap(), SheetRowResult::Failed { .. }));
}
