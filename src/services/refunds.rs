//! Refund requests: creation, code processing, staff decisions and payout.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::domain::aggregates::{LineApproval, Order, OrderState, RefundCodeType, RefundError, RefundRequest, RefundStatus, User};
use crate::domain::value_objects::Sku;
use crate::{EcommerceError, Result};
use super::checkout::refundable_payment;
use super::locks::{order_key, refund_key};
use super::Services;

/// A ready-to-refund row from the finance spreadsheet.
#[derive(Clone, Debug, Deserialize)]
pub struct RefundSheetRow {
    pub order_reference: String,
    /// SKU of the product to refund.
    pub sku: String,
    #[serde(default)]
    pub zendesk_ticket: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SheetRowResult {
    Processed { request_id: Uuid },
    Failed { message: String },
}

impl Services {
    /// Open a refund request for some (or, with no ids, all) lines of a
    /// fulfilled order and issue processing codes to the system's recipients.
    pub async fn create_refund_request(&self, requester: &User, order_id: Uuid, line_ids: &[Uuid], zendesk_ticket: Option<String>) -> Result<RefundRequest> {
        let _guard = self.locks.lock(order_key(order_id)).await;
        let order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        if order.purchaser_id() != requester.id && !requester.is_staff {
            return Err(EcommerceError::PermissionDenied("Only the purchaser can request a refund".into()));
        }
        let mut request = RefundRequest::from_order(requester.id, &order, line_ids)?;
        if let Some(ticket) = zendesk_ticket { request.set_zendesk_ticket(ticket); }
        let recipients = self.store.list_recipients(order.integrated_system_id()).await?;
        if recipients.is_empty() {
            warn!(order = %order.reference_number(), "No refund recipients configured for system");
        }
        let batch = request.issue_codes(&recipients);
        self.store.save_refund_request(&request).await?;
        self.events.publish(request.take_events());
        info!(request = %request.id(), order = %order.reference_number(), %batch, recipients = recipients.len(), "Refund request created");
        Ok(request)
    }

    pub async fn list_refund_requests(&self, user: &User) -> Result<Vec<RefundRequest>> {
        self.store.list_refund_requests(if user.is_staff { None } else { Some(user.id) }).await
    }

    pub async fn refund_request_for(&self, user: &User, request_id: Uuid) -> Result<RefundRequest> {
        let request = self.store.get_refund_request(request_id).await?.ok_or(EcommerceError::NotFound("Refund request"))?;
        if request.requester_id() != user.id && !user.is_staff {
            return Err(EcommerceError::NotFound("Refund request"));
        }
        Ok(request)
    }

    /// Look up the request behind an e-mailed code without spending it.
    pub async fn preview_refund_code(&self, code: Uuid, email: &str) -> Result<(RefundRequest, RefundCodeType)> {
        let request = self.store.find_refund_request_by_code(code).await?.ok_or(RefundError::InvalidCode)?;
        let kind = request.code_kind(code, email)?;
        Ok((request, kind))
    }

    /// Spend an e-mailed approve or deny code. Approval pays the refund out
    /// straight away.
    pub async fn process_refund_code(&self, code: Uuid, email: &str, reason: &str, approvals: &[LineApproval]) -> Result<RefundRequest> {
        let request_id = self.store.find_refund_request_by_code(code).await?.ok_or(RefundError::InvalidCode)?.id();
        let _guard = self.locks.lock(refund_key(request_id)).await;
        let mut request = self.store.get_refund_request(request_id).await?.ok_or(RefundError::InvalidCode)?;
        let order_id = request.order_id();
        let _order_guard = self.locks.lock(order_key(order_id)).await;
        let mut order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;

        // Codes are spent even when the decision below fails.
        let kind = request.use_code(code, email, Utc::now())?;
        self.store.save_refund_request(&request).await?;
        info!(request = %request.id(), email, ?kind, "Refund processing code used");
        match kind {
            RefundCodeType::Approve => {
                request.approve(order.state(), reason, approvals, None)?;
                self.settle(&mut request, &mut order).await?;
            }
            RefundCodeType::Deny => {
                request.deny(order.state(), reason, None)?;
                self.store.save_refund_request(&request).await?;
                self.events.publish(request.take_events());
            }
        }
        Ok(request)
    }

    pub async fn approve_refund(&self, staff: &User, request_id: Uuid, reason: &str, approvals: &[LineApproval]) -> Result<RefundRequest> {
        Self::require_staff(staff)?;
        let _guard = self.locks.lock(refund_key(request_id)).await;
        let mut request = self.store.get_refund_request(request_id).await?.ok_or(EcommerceError::NotFound("Refund request"))?;
        let _order_guard = self.locks.lock(order_key(request.order_id())).await;
        let mut order = self.store.get_order(request.order_id()).await?.ok_or(EcommerceError::NotFound("Order"))?;
        request.approve(order.state(), reason, approvals, Some(staff.id))?;
        self.settle(&mut request, &mut order).await?;
        Ok(request)
    }

    pub async fn deny_refund(&self, staff: &User, request_id: Uuid, reason: &str) -> Result<RefundRequest> {
        Self::require_staff(staff)?;
        let _guard = self.locks.lock(refund_key(request_id)).await;
        let mut request = self.store.get_refund_request(request_id).await?.ok_or(EcommerceError::NotFound("Refund request"))?;
        let order = self.store.get_order(request.order_id()).await?.ok_or(EcommerceError::NotFound("Order"))?;
        request.deny(order.state(), reason, Some(staff.id))?;
        self.store.save_refund_request(&request).await?;
        self.events.publish(request.take_events());
        info!(request = %request.id(), "Refund request denied");
        Ok(request)
    }

    /// Pay out an approved request that wasn't settled when it was approved.
    /// A request whose payout failed is tried again.
    pub async fn process_approved_refund(&self, request_id: Uuid) -> Result<RefundRequest> {
        let _guard = self.locks.lock(refund_key(request_id)).await;
        let mut request = self.store.get_refund_request(request_id).await?.ok_or(EcommerceError::NotFound("Refund request"))?;
        match request.status() {
            RefundStatus::Approved => {}
            RefundStatus::Failed => {
                request.reopen()?;
                info!(request = %request.id(), "Retrying failed refund payout");
            }
            status => return Err(RefundError::NotApproved(status).into()),
        }
        let _order_guard = self.locks.lock(order_key(request.order_id())).await;
        let mut order = self.store.get_order(request.order_id()).await?.ok_or(EcommerceError::NotFound("Order"))?;
        self.settle(&mut request, &mut order).await?;
        Ok(request)
    }

    /// Refund the approved amount through the gateway and record it on both
    /// the order and the request. A zero approval completes without touching
    /// the gateway or the order; a gateway failure marks the request failed.
    async fn settle(&self, request: &mut RefundRequest, order: &mut Order) -> Result<()> {
        let amount = request.total_approved();
        if amount.is_zero() {
            request.complete(None, Decimal::ZERO, Utc::now())?;
            self.store.save_refund_request(request).await?;
            self.events.publish(request.take_events());
            info!(request = %request.id(), "Completed zero-value refund request");
            return Ok(());
        }
        if request.status() != RefundStatus::Approved {
            return Err(RefundError::NotApproved(request.status()).into());
        }
        let payment = match refundable_payment(order) {
            Ok(payment) => payment.clone(),
            Err(e) => {
                self.store.save_refund_request(request).await?;
                return Err(e);
            }
        };
        let record = match self.gateway_refund(order, &payment, amount, request.refund_reason()).await {
            Ok(record) => record,
            Err(e) => {
                error!(request = %request.id(), error = %e, "Refund request failed to process");
                request.fail();
                self.store.save_refund_request(request).await?;
                return Err(e);
            }
        };
        let transaction = order.refund(record)?;
        request.complete(Some(transaction.transaction_id.clone()), transaction.amount, transaction.created_at)?;
        self.store.save_order(order).await?;
        self.store.save_refund_request(request).await?;
        self.events.publish(order.take_events());
        self.events.publish(request.take_events());
        info!(request = %request.id(), order = %order.reference_number(), amount = %transaction.amount, "Refund issued");
        Ok(())
    }

    /// Refund one line from a spreadsheet row: the order must have a line for
    /// the SKU and that line must have cost something. No codes are issued;
    /// the row itself is the approval.
    pub async fn process_sheet_row(&self, row: &RefundSheetRow) -> Result<SheetRowResult> {
        let order = match self.store.get_order_by_reference(row.order_reference.trim()).await? {
            Some(order) => order,
            None => return Ok(failed(format!("Order {} not found", row.order_reference))),
        };
        let line = Sku::new(row.sku.as_str()).ok().and_then(|sku| order.lines().iter().find(|l| l.product_version.sku == sku).cloned());
        let Some(line) = line else {
            return Ok(failed(format!("Order {} does not contain a line with SKU {}", order.reference_number(), row.sku)));
        };
        if line.total_price().is_zero() || line.discounted_price.is_zero() {
            return Ok(failed(format!("Order {} line {} has a total price of $0.00; can't process", order.reference_number(), line.id)));
        }
        debug!(order = %order.reference_number(), sku = %row.sku, "Processing refund sheet row");

        let _guard = self.locks.lock(order_key(order.id())).await;
        let mut order = self.store.get_order(order.id()).await?.ok_or(EcommerceError::NotFound("Order"))?;
        if order.state() != OrderState::Fulfilled {
            return Ok(failed("Order must be in fulfilled state to process.".into()));
        }
        let mut request = RefundRequest::from_order(order.purchaser_id(), &order, &[line.id])?;
        request.take_events();
        if let Some(ticket) = &row.zendesk_ticket { request.set_zendesk_ticket(ticket.clone()); }
        request.approve(order.state(), "Approved via Google Sheets", &[], None)?;
        self.store.save_refund_request(&request).await?;
        match self.settle(&mut request, &mut order).await {
            Ok(()) => Ok(SheetRowResult::Processed { request_id: request.id() }),
            Err(EcommerceError::PaypalRefund(message)) => Ok(failed(message)),
            Err(EcommerceError::PaymentGateway(message)) => Ok(failed(message)),
            Err(e) => Err(e),
        }
    }
}

fn failed(message: String) -> SheetRowResult {
    warn!(%message, "Refund sheet row failed");
    SheetRowResult::Failed { message }
}
