//! Starting checkout and taking the gateway's answers.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use crate::domain::events::SaleSource;
use crate::gateway::Fields;
use crate::services::{CheckoutResult, PendingResolution, Services};
use super::auth::{client_ip, CurrentUser, StaffUser};
use super::ApiResult;

pub async fn start(State(s): State<Services>, CurrentUser(user): CurrentUser, headers: HeaderMap, Path(system_slug): Path<String>) -> ApiResult<Json<CheckoutResult>> {
    let ip = client_ip(&headers);
    Ok(Json(s.generate_checkout_payload(&user, &system_slug, ip.as_deref()).await?))
}

/// The customer's browser coming back from the payment page.
pub async fn result(State(s): State<Services>, Form(fields): Form<Fields>) -> Redirect {
    let base = &s.settings.public_base_url;
    match s.process_gateway_response(&fields, SaleSource::Redirect).await {
        Ok(state) => Redirect::to(&format!("{base}/checkout/result?state={state}")),
        Err(e) => {
            warn!(error = %e, "Couldn't process payment redirect");
            Redirect::to(&format!("{base}/checkout/result?state=error"))
        }
    }
}

/// Server-to-server notification from the gateway.
pub async fn backoffice(State(s): State<Services>, Form(fields): Form<Fields>) -> ApiResult<Json<Value>> {
    let state = s.process_gateway_response(&fields, SaleSource::Backoffice).await?;
    Ok(Json(json!({ "state": state })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub reference_numbers: Option<Vec<String>>,
}

pub async fn resolve_pending(State(s): State<Services>, StaffUser(_): StaffUser, body: Option<Json<ResolveRequest>>) -> ApiResult<Json<PendingResolution>> {
    let references = body.and_then(|Json(r)| r.reference_numbers);
    Ok(Json(s.check_and_process_pending_orders(references.as_deref()).await?))
}
