mod common;

use axum::http::{Method, StatusCode};
use common::{dec, money, Harness, UserClaims};
use serde_json::json;
use std::net::Ipv4Addr;
use uuid::Uuid;
use unified_ecommerce::domain::aggregates::{NetBlock, OrderState};
use unified_ecommerce::domain::value_objects::CountryCode;
use unified_ecommerce::store::Store;

#[tokio::test]
async fn test_health() {
    let h = Harness::new().await;
    let (status, body) = h.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_requires_userinfo() {
    let h = Harness::new().await;
    let (status, body) = h.call(Method::GET, "/api/v0/baskets", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_catalog_is_staff_only() {
    let h = Harness::new().await;
    let learner = UserClaims::new("learner", Some("US"), false);
    let (status, _) = h.call(Method::POST, "/api/v0/meta/integrated_systems", Some(&learner), Some(json!({"name": "Other"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = UserClaims::new("admin", None, true);
    let (status, body) = h
        .call(
            Method::POST,
            "/api/v0/meta/products",
            Some(&admin),
            Some(json!({"system_id": h.system.id, "sku": "course-101", "name": "Course 101", "price": "49.50"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sku"], "course-101");

    let (status, body) = h.call(Method::GET, "/api/v0/meta/products?system_slug=learning-platform", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_product_validation() {
    let h = Harness::new().await;
    let admin = UserClaims::new("admin", None, true);
    let (status, body) = h
        .call(Method::POST, "/api/v0/meta/products", Some(&admin), Some(json!({"system_id": h.system.id, "sku": "x", "name": "X", "price": "-1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_add_to_basket_with_tax() {
    let h = Harness::new().await;
    h.product("course-101", "100.00").await;
    h.services.set_tax_rate(&h.staff, "DE", dec("19"), "VAT").await.unwrap();
    let learner = UserClaims::new("learner", Some("DE"), false);

    let (status, body) = h.call(Method::POST, "/api/v0/baskets/create_from_product/learning-platform/course-101", Some(&learner), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(money(&body["pricing"]["subtotal"]), dec("100.00"));
    assert_eq!(money(&body["pricing"]["tax"]), dec("19.00"));
    assert_eq!(money(&body["pricing"]["total"]), dec("119.00"));

    let (status, body) = h.call(Method::GET, "/api/v0/baskets", Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_blocked_country_by_geoip() {
    let h = Harness::new().await;
    h.product("course-101", "100.00").await;
    let block = NetBlock { ip_start: Ipv4Addr::new(81, 2, 69, 0), ip_end: Ipv4Addr::new(81, 2, 69, 255), country_code: CountryCode::new("GB").unwrap() };
    h.services.add_netblock(&h.staff, block).await.unwrap();
    h.services.block_country(&h.staff, "GB", None).await.unwrap();
    let learner = UserClaims::new("learner", None, false);

    let uri = "/api/v0/baskets/create_from_product/learning-platform/course-101";
    let (status, body) = h.call_with_ip(Method::POST, uri, &learner, "81.2.69.160").await;
    assert_eq!(status, StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS);
    assert_eq!(body["error"], "product_blocked");

    let (status, _) = h.call_with_ip(Method::POST, uri, &learner, "10.1.1.1").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_discount_code() {
    let h = Harness::new().await;
    h.product("course-101", "100.00").await;
    let learner = UserClaims::new("learner", None, false);
    let (status, _) = h.call(Method::POST, "/api/v0/baskets/learning-platform/add_discount?discount_code=NOPE", Some(&learner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_and_backoffice_callback() {
    let h = Harness::new().await;
    h.product("course-101", "100.00").await;
    let learner = UserClaims::new("learner", None, false);
    h.call(Method::POST, "/api/v0/baskets/create_from_product/learning-platform/course-101", Some(&learner), None).await;

    let (status, body) = h.call(Method::POST, "/api/v0/checkout/learning-platform", Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "redirect");
    let reference = body["reference_number"].as_str().unwrap().to_string();
    assert_eq!(body["checkout"]["payload"]["reference_number"], reference.as_str());
    assert_eq!(body["checkout"]["payload"]["amount"], "100.00");

    let mut forged = h.gateway.response(&reference, "ACCEPT", 100, "txn-1");
    forged.insert("decision".into(), "DECLINE".into());
    let (status, _, _) = h.post_form("/api/v0/checkout/backoffice", &forged).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let fields = h.gateway.response(&reference, "ACCEPT", 100, "txn-1");
    let (status, body, _) = h.post_form("/api/v0/checkout/backoffice", &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "fulfilled");

    let order = h.store.get_order_by_reference(&reference).await.unwrap().unwrap();
    assert_eq!(order.state(), OrderState::Fulfilled);
    assert_eq!(order.transactions().len(), 1);
    assert!(h.store.list_baskets(order.purchaser_id()).await.unwrap().is_empty());

    // The browser arriving afterwards just sees the result.
    let (status, _, location) = h.post_form("/api/v0/checkout/result", &fields).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("http://localhost:8083/checkout/result?state=fulfilled"));

    let (status, body) = h.call(Method::GET, "/api/v0/orders/history", Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["state"], "fulfilled");
}

#[tokio::test]
async fn test_redirect_with_bad_signature_goes_to_error_page() {
    let h = Harness::new().await;
    let mut fields = h.gateway.response("uecom-test-0190a7f0-0000-7000-8000-000000000000", "ACCEPT", 100, "txn-1");
    fields.insert("signature".into(), "bm90IGl0".into());
    let (status, _, location) = h.post_form("/api/v0/checkout/result", &fields).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("http://localhost:8083/checkout/result?state=error"));
}

#[tokio::test]
async fn test_refund_requests_hide_codes() {
    let h = Harness::new().await;
    h.product("free-course", "0.00").await;
    h.services.add_refund_recipient(&h.staff, h.system.id, "finance@example.com").await.unwrap();
    let learner = UserClaims::new("learner", None, false);
    h.call(Method::POST, "/api/v0/baskets/create_from_product/learning-platform/free-course", Some(&learner), None).await;
    let (_, checkout) = h.call(Method::POST, "/api/v0/checkout/learning-platform", Some(&learner), None).await;
    assert_eq!(checkout["result"], "fulfilled");

    let (status, body) = h
        .call(Method::POST, "/api/v0/refunds/create_from_order", Some(&learner), Some(json!({"order_id": checkout["order_id"]})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "created");
    assert!(body.get("codes").is_none());

    let (_, listed) = h.call(Method::GET, "/api/v0/refunds", Some(&learner), None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert!(listed[0].get("codes").is_none());
}

#[tokio::test]
async fn test_code_link_previews_until_posted() {
    let h = Harness::new().await;
    h.product("course-101", "100.00").await;
    h.services.add_refund_recipient(&h.staff, h.system.id, "fin+refunds@example.com").await.unwrap();
    let learner = UserClaims::new("learner", None, false);
    h.call(Method::POST, "/api/v0/baskets/create_from_product/learning-platform/course-101", Some(&learner), None).await;
    let (_, checkout) = h.call(Method::POST, "/api/v0/checkout/learning-platform", Some(&learner), None).await;
    let fields = h.gateway.response(checkout["reference_number"].as_str().unwrap(), "ACCEPT", 100, "txn-1");
    h.post_form("/api/v0/checkout/backoffice", &fields).await;
    let (_, created) = h
        .call(Method::POST, "/api/v0/refunds/create_from_order", Some(&learner), Some(json!({"order_id": checkout["order_id"]})))
        .await;
    let request_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    let code = h.store.get_refund_request(request_id).await.unwrap().unwrap().codes()[0].approve_code;

    let link = format!("/api/v0/refunds/process_code?code={code}&email=fin%2Brefunds%40example.com");
    for _ in 0..2 {
        let (status, body) = h.call(Method::GET, &link, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "approve");
        assert_eq!(body["request"]["status"], "created");
        assert!(body["request"].get("codes").is_none());
        assert_eq!(body["confirm"]["method"], "POST");
        assert_eq!(body["confirm"]["body"]["email"], "fin+refunds@example.com");
    }
    assert!(h.gateway.refund_calls().is_empty());
    let stored = h.store.get_refund_request(request_id).await.unwrap().unwrap();
    assert!(stored.codes()[0].code_active);

    let (status, _) = h.call(Method::GET, &format!("/api/v0/refunds/process_code?code={code}&email=someone%40example.com"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = h
        .call(Method::POST, "/api/v0/refunds/process_code", None, Some(json!({"code": code, "email": "fin+refunds@example.com"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved-complete");
    assert_eq!(h.gateway.refund_calls().len(), 1);

    let (status, _) = h.call(Method::GET, &link, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
