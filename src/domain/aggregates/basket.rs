//! Basket Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::location::{CustomerLocationMetadata, TaxRate};
use crate::domain::aggregates::order::Order;
use crate::domain::events::{BasketEvent, DomainEvent};
use crate::domain::value_objects::Quantity;

/// A user's active basket for one integrated system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Basket {
    id: Uuid,
    user_id: Uuid,
    integrated_system_id: Uuid,
    items: Vec<BasketItem>,
    discount_ids: Vec<Uuid>,
    tax_rate: Option<TaxRate>,
    location: CustomerLocationMetadata,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasketItem {
    pub product_id: Uuid,
    pub quantity: Quantity,
    pub added_at: DateTime<Utc>,
}

impl Basket {
    pub fn new(user_id: Uuid, integrated_system_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), user_id, integrated_system_id, items: vec![], discount_ids: vec![], tax_rate: None,
            location: CustomerLocationMetadata::default(), created_at: now, updated_at: now, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn integrated_system_id(&self) -> Uuid { self.integrated_system_id }
    pub fn items(&self) -> &[BasketItem] { &self.items }
    pub fn discount_ids(&self) -> &[Uuid] { &self.discount_ids }
    pub fn tax_rate(&self) -> Option<&TaxRate> { self.tax_rate.as_ref() }
    pub fn location(&self) -> &CustomerLocationMetadata { &self.location }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn product_ids(&self) -> Vec<Uuid> { self.items.iter().map(|i| i.product_id).collect() }

    /// Set the quantity for a product, adding it if it isn't in the basket yet.
    /// Returns true when a new item was created.
    pub fn set_item(&mut self, product_id: Uuid, quantity: Quantity) -> bool {
        let created = match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(existing) => { existing.quantity = quantity; false }
            None => {
                self.items.push(BasketItem { product_id, quantity, added_at: Utc::now() });
                true
            }
        };
        self.touch();
        self.raise_event(DomainEvent::Basket(BasketEvent::ItemAdded {
            basket_id: self.id, system_id: self.integrated_system_id, user_id: self.user_id, product_id,
        }));
        created
    }

    pub fn remove_item(&mut self, product_id: Uuid) -> Result<(), BasketError> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return Err(BasketError::ItemNotFound(product_id)); }
        self.touch();
        self.raise_event(DomainEvent::Basket(BasketEvent::ItemRemoved {
            basket_id: self.id, system_id: self.integrated_system_id, user_id: self.user_id, product_id,
        }));
        Ok(())
    }

    /// Empty the basket of items and discounts.
    pub fn clear(&mut self) {
        self.items.clear();
        self.discount_ids.clear();
        self.touch();
    }

    /// Returns false if the discount was already applied.
    pub fn apply_discount(&mut self, discount_id: Uuid) -> bool {
        if self.discount_ids.contains(&discount_id) { return false; }
        self.discount_ids.push(discount_id);
        self.touch();
        true
    }

    pub fn retain_discounts(&mut self, keep: &[Uuid]) {
        self.discount_ids.retain(|id| keep.contains(id));
        self.touch();
    }

    pub fn set_location(&mut self, location: CustomerLocationMetadata) { self.location = location; self.touch(); }
    pub fn set_tax_rate(&mut self, rate: Option<TaxRate>) { self.tax_rate = rate; self.touch(); }

    /// True when `order` was built from this basket: same purchaser, same number
    /// of lines as items, and every basket product on one of its lines.
    pub fn compare_to_order(&self, order: &Order) -> bool {
        if self.user_id != order.purchaser_id() { return false; }
        if self.items.len() != order.lines().len() { return false; }
        self.items.iter().all(|item| order.lines().iter().any(|line| line.product_id() == item.product_id))
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BasketError {
    #[error("Product {0} is not in the basket")]
    ItemNotFound(Uuid),
    #[error("Basket is empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::{Line, Order};
    use crate::domain::aggregates::product::Product;
    use crate::domain::value_objects::Sku;
    use rust_decimal::Decimal;

    fn line_for(product: &Product) -> Line {
        Line::new(product.snapshot(), Quantity::ONE, product.price(), Decimal::ZERO, None)
    }

    #[test]
    fn test_set_item_updates_or_creates() {
        let mut basket = Basket::new(Uuid::from_u128(1), Uuid::from_u128(2));
        let product = Uuid::from_u128(3);
        assert!(basket.set_item(product, Quantity::ONE));
        assert!(!basket.set_item(product, Quantity::new(4).unwrap()));
        assert_eq!(basket.items().len(), 1);
        assert_eq!(basket.items()[0].quantity.value(), 4);
        assert_eq!(basket.take_events().len(), 2);
    }

    #[test]
    fn test_remove_missing_item() {
        let mut basket = Basket::new(Uuid::from_u128(1), Uuid::from_u128(2));
        assert_eq!(basket.remove_item(Uuid::from_u128(9)), Err(BasketError::ItemNotFound(Uuid::from_u128(9))));
    }

    #[test]
    fn test_apply_discount_is_idempotent() {
        let mut basket = Basket::new(Uuid::from_u128(1), Uuid::from_u128(2));
        assert!(basket.apply_discount(Uuid::from_u128(7)));
        assert!(!basket.apply_discount(Uuid::from_u128(7)));
        basket.retain_discounts(&[]);
        assert!(basket.discount_ids().is_empty());
    }

    #[test]
    fn test_compare_to_order() {
        let user = Uuid::from_u128(1);
        let system = Uuid::from_u128(2);
        let (a, _) = Product::create(system, Sku::new("A").unwrap(), "A", Decimal::new(10, 0)).unwrap();
        let (b, _) = Product::create(system, Sku::new("B").unwrap(), "B", Decimal::new(20, 0)).unwrap();
        let mut basket = Basket::new(user, system);
        basket.set_item(a.id(), Quantity::ONE);
        basket.set_item(b.id(), Quantity::ONE);

        let mut order = Order::create(user, system, "uecom", "test");
        order.replace_lines(vec![line_for(&a), line_for(&b)]).unwrap();
        assert!(basket.compare_to_order(&order));

        let mut short = Order::create(user, system, "uecom", "test");
        short.replace_lines(vec![line_for(&a)]).unwrap();
        assert!(!basket.compare_to_order(&short));

        let mut other_user = Order::create(Uuid::from_u128(5), system, "uecom", "test");
        other_user.replace_lines(vec![line_for(&a), line_for(&b)]).unwrap();
        assert!(!basket.compare_to_order(&other_user));
    }
}
