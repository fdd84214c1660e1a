//! Application services: the basket, checkout and refund workflows, built
//! from the domain aggregates, the store and the payment gateway.

use std::sync::Arc;
use tracing::info;
use crate::config::Settings;
use crate::domain::aggregates::{IntegratedSystem, User, UserInfo};
use crate::gateway::PaymentGateway;
use crate::store::Store;
use crate::{EcommerceError, Result};

pub mod baskets;
pub mod catalog;
pub mod checkout;
pub mod events;
pub mod location;
pub mod locks;
pub mod refunds;

pub use baskets::{AppliedDiscount, BasketView};
pub use checkout::{CheckoutResult, OrderLookup, PendingResolution};
pub use events::{EventSender, EventWorker};
pub use locks::KeyedLocks;
pub use refunds::{RefundSheetRow, SheetRowResult};

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub settings: Arc<Settings>,
    events: EventSender,
    locks: Arc<KeyedLocks>,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, settings: Arc<Settings>, events: EventSender) -> Self {
        Self { store, gateway, settings, events, locks: Arc::new(KeyedLocks::new()) }
    }

    /// The user the gateway vouched for, created on first sight and kept in
    /// step with their claims afterwards.
    pub async fn resolve_user(&self, info: &UserInfo) -> Result<User> {
        if info.email.trim().is_empty() {
            return Err(EcommerceError::PermissionDenied("User info has no e-mail".into()));
        }
        match self.store.find_user_by_email(&info.email).await? {
            Some(mut user) => {
                if user.refresh(info) { self.store.save_user(&user).await?; }
                Ok(user)
            }
            None => {
                let user = User::from_userinfo(info);
                match self.store.save_user(&user).await {
                    Ok(()) => {
                        info!(user = %user.username, "Created user from gateway claims");
                        Ok(user)
                    }
                    // Lost a race with another request for the same user.
                    Err(EcommerceError::Conflict(_)) => {
                        self.store.find_user_by_email(&info.email).await?.ok_or(EcommerceError::NotFound("User"))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    pub async fn system_by_slug(&self, slug: &str) -> Result<IntegratedSystem> {
        self.store
            .get_system_by_slug(slug)
            .await?
            .filter(|s| s.is_active)
            .ok_or(EcommerceError::NotFound("Integrated system"))
    }

    pub(crate) fn require_staff(user: &User) -> Result<()> {
        if user.is_staff { Ok(()) } else { Err(EcommerceError::PermissionDenied("Staff access required".into())) }
    }
}
