//! Refund Request Aggregate
//!
//! A refund request covers some or all lines of a fulfilled order. Approval
//! happens out of band: every recipient registered for the order's system gets
//! its own approve/deny code pair, and the first code used settles the whole
//! batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::order::{Order, OrderState};
use crate::domain::events::{DomainEvent, RefundEvent};
use crate::domain::value_objects::quantize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefundStatus {
    #[default]
    Created,
    Pending,
    Denied,
    Approved,
    ApprovedComplete,
    Failed,
}

impl RefundStatus {
    pub fn is_processable(self) -> bool { matches!(self, Self::Created | Self::Pending) }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created", Self::Pending => "pending", Self::Denied => "denied",
            Self::Approved => "approved", Self::ApprovedComplete => "approved-complete", Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundCodeType { Approve, Deny }

/// Who gets e-mailed processing codes for a system's refund requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestRecipient {
    pub id: Uuid,
    pub email: String,
    pub integrated_system_id: Uuid,
}

impl RequestRecipient {
    pub fn new(email: impl Into<String>, integrated_system_id: Uuid) -> Self {
        Self { id: Uuid::now_v7(), email: email.into(), integrated_system_id }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestProcessingCode {
    pub id: Uuid,
    pub email: String,
    pub code_batch: Uuid,
    pub approve_code: Uuid,
    pub deny_code: Uuid,
    pub code_active: bool,
    pub code_used: Option<RefundCodeType>,
    pub code_used_on: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestLine {
    pub id: Uuid,
    pub line_id: Uuid,
    pub product_id: Uuid,
    /// What the customer paid for the line, tax excluded.
    pub line_total: Decimal,
    pub status: RefundStatus,
    pub refunded_amount: Decimal,
    pub transaction_ids: Vec<String>,
}

/// Approved amount for one line.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LineApproval {
    pub line_id: Uuid,
    pub refunded_amount: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundRequest {
    id: Uuid,
    requester_id: Uuid,
    order_id: Uuid,
    order_reference: String,
    integrated_system_id: Uuid,
    status: RefundStatus,
    processed_date: Option<DateTime<Utc>>,
    processed_by: Option<Uuid>,
    total_refunded: Decimal,
    zendesk_ticket: String,
    refund_reason: String,
    lines: Vec<RequestLine>,
    codes: Vec<RequestProcessingCode>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl RefundRequest {
    /// Open a request against a fulfilled order. An empty selection means
    /// every line; ids that aren't lines of this order are ignored.
    pub fn from_order(requester_id: Uuid, order: &Order, line_ids: &[Uuid]) -> Result<Self, RefundError> {
        if order.state() != OrderState::Fulfilled { return Err(RefundError::OrderNotFulfilled(order.state())); }
        let lines: Vec<RequestLine> = order
            .lines()
            .iter()
            .filter(|l| line_ids.is_empty() || line_ids.contains(&l.id))
            .map(|l| RequestLine {
                id: Uuid::now_v7(), line_id: l.id, product_id: l.product_id(), line_total: l.discounted_price,
                status: RefundStatus::Created, refunded_amount: Decimal::ZERO, transaction_ids: vec![],
            })
            .collect();
        if lines.is_empty() { return Err(RefundError::NoLines); }
        let now = Utc::now();
        let mut request = Self {
            id: Uuid::now_v7(), requester_id, order_id: order.id(), order_reference: order.reference_number().to_string(),
            integrated_system_id: order.integrated_system_id(), status: RefundStatus::Created, processed_date: None,
            processed_by: None, total_refunded: Decimal::ZERO, zendesk_ticket: String::new(), refund_reason: String::new(),
            lines, codes: vec![], created_at: now, updated_at: now, events: vec![],
        };
        request.raise_event(DomainEvent::Refund(RefundEvent::Created { request_id: request.id, order_id: request.order_id }));
        Ok(request)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn requester_id(&self) -> Uuid { self.requester_id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn order_reference(&self) -> &str { &self.order_reference }
    pub fn integrated_system_id(&self) -> Uuid { self.integrated_system_id }
    pub fn status(&self) -> RefundStatus { self.status }
    pub fn processed_date(&self) -> Option<DateTime<Utc>> { self.processed_date }
    pub fn processed_by(&self) -> Option<Uuid> { self.processed_by }
    pub fn total_refunded(&self) -> Decimal { self.total_refunded }
    pub fn zendesk_ticket(&self) -> &str { &self.zendesk_ticket }
    pub fn refund_reason(&self) -> &str { &self.refund_reason }
    pub fn lines(&self) -> &[RequestLine] { &self.lines }
    pub fn codes(&self) -> &[RequestProcessingCode] { &self.codes }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn total_requested(&self) -> Decimal { self.lines.iter().map(|l| l.line_total).sum() }
    pub fn total_approved(&self) -> Decimal { self.lines.iter().map(|l| l.refunded_amount).sum() }

    pub fn set_zendesk_ticket(&mut self, ticket: impl Into<String>) { self.zendesk_ticket = ticket.into(); self.touch(); }

    /// One approve/deny pair per recipient, all sharing a fresh batch id.
    pub fn issue_codes(&mut self, recipients: &[RequestRecipient]) -> Uuid {
        let batch = Uuid::new_v4();
        for recipient in recipients {
            self.codes.push(RequestProcessingCode {
                id: Uuid::now_v7(), email: recipient.email.clone(), code_batch: batch, approve_code: Uuid::new_v4(),
                deny_code: Uuid::new_v4(), code_active: true, code_used: None, code_used_on: None,
            });
        }
        self.touch();
        batch
    }

    /// Spend a processing code sent to `email`. Using any code retires every
    /// code in its batch.
    pub fn use_code(&mut self, code: Uuid, email: &str, at: DateTime<Utc>) -> Result<RefundCodeType, RefundError> {
        let (index, kind) = self.find_code(code, email)?;
        let batch = self.codes[index].code_batch;
        self.codes[index].code_used = Some(kind);
        self.codes[index].code_used_on = Some(at);
        for c in self.codes.iter_mut().filter(|c| c.code_batch == batch) {
            c.code_active = false;
        }
        self.touch();
        Ok(kind)
    }

    /// What an active code sent to `email` would do, without spending it.
    pub fn code_kind(&self, code: Uuid, email: &str) -> Result<RefundCodeType, RefundError> {
        self.find_code(code, email).map(|(_, kind)| kind)
    }

    fn find_code(&self, code: Uuid, email: &str) -> Result<(usize, RefundCodeType), RefundError> {
        self.codes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.code_active && c.email.eq_ignore_ascii_case(email))
            .find_map(|(i, c)| {
                if c.approve_code == code { Some((i, RefundCodeType::Approve)) }
                else if c.deny_code == code { Some((i, RefundCodeType::Deny)) }
                else { None }
            })
            .ok_or(RefundError::InvalidCode)
    }

    /// Approve the request. With no per-line amounts every line is approved
    /// for its full total; otherwise only the listed lines are, each for at
    /// most what was paid for it.
    pub fn approve(&mut self, order_state: OrderState, reason: impl Into<String>, approvals: &[LineApproval], processed_by: Option<Uuid>) -> Result<(), RefundError> {
        self.check_processable(order_state)?;
        for approval in approvals {
            let line = self.lines.iter().find(|l| l.line_id == approval.line_id).ok_or(RefundError::UnknownLine(approval.line_id))?;
            if approval.refunded_amount.is_sign_negative() || approval.refunded_amount > line.line_total {
                return Err(RefundError::AmountOutOfRange { line_id: approval.line_id, amount: approval.refunded_amount, max: line.line_total });
            }
        }
        if approvals.is_empty() {
            for line in &mut self.lines {
                line.status = RefundStatus::Approved;
                line.refunded_amount = line.line_total;
            }
        } else {
            for approval in approvals {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == approval.line_id) {
                    line.status = RefundStatus::Approved;
                    line.refunded_amount = quantize(approval.refunded_amount);
                }
            }
        }
        self.status = RefundStatus::Approved;
        self.refund_reason = reason.into();
        self.processed_by = processed_by;
        self.touch();
        Ok(())
    }

    pub fn deny(&mut self, order_state: OrderState, reason: impl Into<String>, processed_by: Option<Uuid>) -> Result<(), RefundError> {
        self.check_processable(order_state)?;
        self.status = RefundStatus::Denied;
        self.refund_reason = reason.into();
        self.processed_by = processed_by;
        for line in &mut self.lines { line.status = RefundStatus::Denied; }
        self.touch();
        self.raise_event(DomainEvent::Refund(RefundEvent::Denied { request_id: self.id, order_id: self.order_id }));
        Ok(())
    }

    /// Mark an approved request as paid out.
    pub fn complete(&mut self, transaction_id: Option<String>, amount: Decimal, at: DateTime<Utc>) -> Result<(), RefundError> {
        if self.status != RefundStatus::Approved { return Err(RefundError::NotApproved(self.status)); }
        self.status = RefundStatus::ApprovedComplete;
        self.processed_date = Some(at);
        self.total_refunded = quantize(amount);
        for line in &mut self.lines {
            line.status = RefundStatus::ApprovedComplete;
            if let Some(id) = &transaction_id { line.transaction_ids.push(id.clone()); }
        }
        self.touch();
        self.raise_event(DomainEvent::Refund(RefundEvent::Issued { request_id: self.id, order_id: self.order_id }));
        Ok(())
    }

    pub fn fail(&mut self) {
        self.status = RefundStatus::Failed;
        self.touch();
    }

    /// Put a failed payout back to approved so it can be tried again. The
    /// approved line amounts are kept.
    pub fn reopen(&mut self) -> Result<(), RefundError> {
        if self.status != RefundStatus::Failed { return Err(RefundError::NotApproved(self.status)); }
        self.status = RefundStatus::Approved;
        self.touch();
        Ok(())
    }

    fn check_processable(&self, order_state: OrderState) -> Result<(), RefundError> {
        if !self.status.is_processable() { return Err(RefundError::NotProcessable(self.status)); }
        if order_state != OrderState::Fulfilled { return Err(RefundError::OrderNotFulfilled(order_state)); }
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefundError {
    #[error("Order must be fulfilled to refund, it is {0}")]
    OrderNotFulfilled(OrderState),
    #[error("Refund request has no lines to refund")]
    NoLines,
    #[error("Refund request is {0} and can't be processed again")]
    NotProcessable(RefundStatus),
    #[error("Refund request must be approved to process, it is {0}")]
    NotApproved(RefundStatus),
    #[error("Line {0} is not part of this refund request")]
    UnknownLine(Uuid),
    #[error("Refund of {amount} for line {line_id} must be between 0 and {max}")]
    AmountOutOfRange { line_id: Uuid, amount: Decimal, max: Decimal },
    #[error("Invalid or expired processing code")]
    InvalidCode,
}
