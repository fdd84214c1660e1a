//! Per-key async locks serializing changes to one basket, order or refund
//! request at a time.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self { Self::default() }

    /// Wait for exclusive access to `key`. Held until the guard drops.
    pub async fn lock(&self, key: impl Into<String>) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key.into()).or_default().clone()
        };
        entry.lock_owned().await
    }
}

pub fn basket_key(user_id: uuid::Uuid, system_id: uuid::Uuid) -> String { format!("basket:{user_id}:{system_id}") }
pub fn order_key(order_id: uuid::Uuid) -> String { format!("order:{order_id}") }
pub fn refund_key(request_id: uuid::Uuid) -> String { format!("refund:{request_id}") }

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_waits() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("order:1").await;
        let other = locks.clone();
        let waiter = tokio::spawn(async move { other.lock("order:1").await; });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("order:1").await;
        tokio::time::timeout(Duration::from_millis(100), locks.lock("order:2")).await.unwrap();
    }
}
