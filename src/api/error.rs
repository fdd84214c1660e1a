//! Mapping errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use crate::domain::aggregates::{BasketError, RefundError};
use crate::EcommerceError;

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    Invalid(String),
    App(EcommerceError),
}

impl<E> From<E> for ApiError
where
    E: Into<EcommerceError>,
{
    fn from(e: E) -> Self { Self::App(e.into()) }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Self::Invalid(_) => (StatusCode::BAD_REQUEST, "validation"),
            Self::App(e) => match e {
                EcommerceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                EcommerceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                EcommerceError::ProductBlocked => (StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS, "product_blocked"),
                EcommerceError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
                EcommerceError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                EcommerceError::PaymentGateway(_) => (StatusCode::BAD_GATEWAY, "payment_gateway"),
                EcommerceError::PaypalRefund(_) => (StatusCode::CONFLICT, "paypal_refund"),
                EcommerceError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
                EcommerceError::Order(_) => (StatusCode::CONFLICT, "invalid_state"),
                EcommerceError::Basket(BasketError::ItemNotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
                EcommerceError::Basket(_) => (StatusCode::BAD_REQUEST, "validation"),
                EcommerceError::Discount(_) => (StatusCode::BAD_REQUEST, "invalid_discount"),
                EcommerceError::Refund(RefundError::InvalidCode) => (StatusCode::NOT_FOUND, "invalid_code"),
                EcommerceError::Refund(RefundError::UnknownLine(_) | RefundError::AmountOutOfRange { .. } | RefundError::NoLines) => {
                    (StatusCode::BAD_REQUEST, "validation")
                }
                EcommerceError::Refund(_) => (StatusCode::CONFLICT, "invalid_state"),
                EcommerceError::Product(_) | EcommerceError::System(_) => (StatusCode::BAD_REQUEST, "validation"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            Self::Unauthenticated => "Authentication required".to_string(),
            Self::Invalid(m) => m.clone(),
            Self::App(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!(%status, %message, "Request failed");
        }
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{OrderError, OrderState};

    #[test]
    fn test_status_mapping() {
        let status = |e: EcommerceError| ApiError::from(e).parts().0;
        assert_eq!(status(EcommerceError::ProductBlocked), StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS);
        assert_eq!(status(EcommerceError::NotFound("Order")), StatusCode::NOT_FOUND);
        assert_eq!(status(EcommerceError::PermissionDenied("no".into())), StatusCode::FORBIDDEN);
        assert_eq!(status(EcommerceError::PaymentGateway("down".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(OrderError::InvalidTransition { from: OrderState::Canceled, to: OrderState::Fulfilled }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(status(RefundError::InvalidCode.into()), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Unauthenticated.parts().0, StatusCode::UNAUTHORIZED);
    }
}
