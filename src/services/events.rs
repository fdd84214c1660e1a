//! Background handling of domain events: webhooks, e-mail and the message bus.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;
use crate::config::Settings;
use crate::domain::aggregates::IntegratedSystem;
use crate::domain::events::{DomainEvent, OrderEvent, RefundEvent, SaleSource};
use crate::mail::{self, Mailer};
use crate::store::Store;
use crate::webhooks::{post_sale_payloads, WebhookDispatcher};
use crate::{EcommerceError, Result};

/// Queues events for the worker. Sending never waits on delivery.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

pub type EventReceiver = mpsc::UnboundedReceiver<DomainEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            debug!(subject = %event.subject(), "Queueing event");
            if self.tx.send(event).is_err() {
                warn!("Event worker is gone, dropping event");
            }
        }
    }
}

pub struct EventWorker {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    webhooks: WebhookDispatcher,
    nats: Option<async_nats::Client>,
    settings: Arc<Settings>,
}

impl EventWorker {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, settings: Arc<Settings>) -> Self {
        let webhooks = WebhookDispatcher::new(settings.webhooks.clone());
        Self { store, mailer, webhooks, nats: None, settings }
    }

    pub fn with_nats(mut self, client: async_nats::Client) -> Self {
        self.nats = Some(client);
        self
    }

    pub fn spawn(self, rx: EventReceiver) -> tokio::task::JoinHandle<()> { tokio::spawn(self.run(rx)) }

    pub async fn run(self, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            self.handle(&event).await;
        }
        debug!("Event channel closed, worker stopping");
    }

    pub async fn handle(&self, event: &DomainEvent) {
        self.publish(event).await;
        if let Err(e) = self.dispatch(event).await {
            error!(subject = %event.subject(), error = %e, "Failed to handle event");
        }
    }

    async fn publish(&self, event: &DomainEvent) {
        let Some(nats) = &self.nats else { return };
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => { error!(error = %e, "Failed to encode event"); return; }
        };
        if let Err(e) = nats.publish(event.subject(), payload.into()).await {
            warn!(subject = %event.subject(), error = %e, "Failed to publish event");
        }
    }

    async fn dispatch(&self, event: &DomainEvent) -> Result<()> {
        match event {
            DomainEvent::Order(OrderEvent::Fulfilled { order_id, source, .. }) => {
                self.post_sale(*order_id, *source).await?;
                self.send_receipt(*order_id).await
            }
            DomainEvent::Refund(RefundEvent::Created { request_id, .. }) => self.send_refund_codes(*request_id).await,
            DomainEvent::Refund(RefundEvent::Issued { request_id, order_id }) => {
                self.notify_requester(*request_id, true).await?;
                self.post_sale(*order_id, SaleSource::Refund).await
            }
            DomainEvent::Refund(RefundEvent::Denied { request_id, .. }) => self.notify_requester(*request_id, false).await,
            _ => Ok(()),
        }
    }

    /// Webhook every system that sold something on the order. Deliveries run
    /// on their own tasks so retries don't hold up the queue.
    async fn post_sale(&self, order_id: Uuid, source: SaleSource) -> Result<()> {
        let order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        let purchaser = self.store.get_user(order.purchaser_id()).await?.ok_or(EcommerceError::NotFound("User"))?;
        let mut system_ids: Vec<Uuid> = order.lines().iter().map(|l| l.product_version.system_id).collect();
        system_ids.sort();
        system_ids.dedup();
        let mut systems: Vec<IntegratedSystem> = Vec::with_capacity(system_ids.len());
        for id in system_ids {
            match self.store.get_system(id).await? {
                Some(system) => systems.push(system),
                None => warn!(system = %id, order = %order.reference_number(), "Order line points at a missing system"),
            }
        }
        for (url, payload) in post_sale_payloads(&order, &purchaser, &systems, source) {
            let webhooks = self.webhooks.clone();
            tokio::spawn(async move { webhooks.deliver(&url, &payload).await });
        }
        Ok(())
    }

    async fn send_receipt(&self, order_id: Uuid) -> Result<()> {
        let order = self.store.get_order(order_id).await?.ok_or(EcommerceError::NotFound("Order"))?;
        let purchaser = self.store.get_user(order.purchaser_id()).await?.ok_or(EcommerceError::NotFound("User"))?;
        self.send(mail::receipt(&order, &purchaser, &self.settings.currency)).await;
        Ok(())
    }

    async fn send_refund_codes(&self, request_id: Uuid) -> Result<()> {
        let request = self.store.get_refund_request(request_id).await?.ok_or(EcommerceError::NotFound("Refund request"))?;
        for code in request.codes().iter().filter(|c| c.code_active) {
            match mail::refund_codes(&request, code, &self.settings.public_base_url) {
                Ok(message) => self.send(message).await,
                Err(e) => error!(error = %e, "Couldn't build refund code mail"),
            }
        }
        Ok(())
    }

    async fn notify_requester(&self, request_id: Uuid, issued: bool) -> Result<()> {
        let request = self.store.get_refund_request(request_id).await?.ok_or(EcommerceError::NotFound("Refund request"))?;
        let requester = self.store.get_user(request.requester_id()).await?.ok_or(EcommerceError::NotFound("User"))?;
        let message = if issued { mail::refund_issued(&request, &requester, &self.settings.currency) } else { mail::refund_denied(&request, &requester) };
        self.send(message).await;
        Ok(())
    }

    async fn send(&self, message: mail::Message) {
        if let Err(e) = self.mailer.send(message).await {
            error!(error = %e, "Mail delivery failed");
        }
    }
}
