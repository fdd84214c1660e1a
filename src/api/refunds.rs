use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{LineApproval, RefundRequest};
use crate::services::{RefundSheetRow, Services, SheetRowResult};
use super::auth::{CurrentUser, StaffUser};
use super::{validated, ApiResult};

/// A refund request as shown to callers. Processing codes only ever travel
/// by e-mail.
fn public(request: &RefundRequest) -> ApiResult<Json<Value>> {
    let mut value = serde_json::to_value(request)?;
    if let Some(fields) = value.as_object_mut() { fields.remove("codes"); }
    Ok(Json(value))
}

pub async fn list(State(s): State<Services>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<Value>>> {
    let requests = s.list_refund_requests(&user).await?;
    Ok(Json(requests.iter().map(|r| public(r).map(|Json(v)| v)).collect::<ApiResult<_>>()?))
}

pub async fn detail(State(s): State<Services>, CurrentUser(user): CurrentUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    public(&s.refund_request_for(&user, id).await?)
}

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub order_id: Uuid,
    #[serde(default)]
    pub lines: Vec<Uuid>,
    pub zendesk_ticket: Option<String>,
}

pub async fn create_from_order(State(s): State<Services>, CurrentUser(user): CurrentUser, Json(r): Json<CreateRefundRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = s.create_refund_request(&user, r.order_id, &r.lines, r.zendesk_ticket).await?;
    Ok((StatusCode::CREATED, public(&request)?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProcessCodeRequest {
    pub code: Uuid,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub lines: Vec<LineApproval>,
}

pub async fn process_code(State(s): State<Services>, Json(r): Json<ProcessCodeRequest>) -> ApiResult<Json<Value>> {
    let r = validated(r)?;
    public(&s.process_refund_code(r.code, &r.email, &r.reason, &r.lines).await?)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CodeLink {
    pub code: Uuid,
    #[validate(email)]
    pub email: String,
}

/// The link in a processing-code e-mail. Opening it shows the request and
/// what the code would do; nothing happens until the code is POSTed back.
pub async fn process_code_link(State(s): State<Services>, Query(q): Query<CodeLink>) -> ApiResult<Json<Value>> {
    let q = validated(q)?;
    let (request, action) = s.preview_refund_code(q.code, &q.email).await?;
    let Json(request) = public(&request)?;
    Ok(Json(json!({
        "action": action,
        "request": request,
        "confirm": {
            "method": "POST",
            "url": "/api/v0/refunds/process_code",
            "body": {"code": q.code, "email": q.email},
        },
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub lines: Vec<LineApproval>,
}

pub async fn approve(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<Uuid>, Json(r): Json<DecisionRequest>) -> ApiResult<Json<Value>> {
    public(&s.approve_refund(&staff, id, &r.reason, &r.lines).await?)
}

pub async fn deny(State(s): State<Services>, StaffUser(staff): StaffUser, Path(id): Path<Uuid>, Json(r): Json<DecisionRequest>) -> ApiResult<Json<Value>> {
    public(&s.deny_refund(&staff, id, &r.reason).await?)
}

/// Pay out an approved request again, e.g. after the gateway failed it.
pub async fn process(State(s): State<Services>, StaffUser(_): StaffUser, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    public(&s.process_approved_refund(id).await?)
}

pub async fn sheet_row(State(s): State<Services>, StaffUser(_): StaffUser, Json(row): Json<RefundSheetRow>) -> ApiResult<Json<SheetRowResult>> {
    Ok(Json(s.process_sheet_row(&row).await?))
}
