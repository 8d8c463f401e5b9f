//! Subscription records held by a store.

use crate::store::{Store, WeakStore};
use crate::types::{Callback, StoreId, SubscriptionToken};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A manual registration, addressed by its token.
#[derive(Clone, Debug)]
pub struct ManualSubscription {
    pub token: SubscriptionToken,
    pub key: String,
    pub callback: Callback,
}

/// A tracked dependency between one observer and one `(store, key)` pair.
///
/// Created during a build pass when a key is read for the first time and
/// discarded once a later pass stops reading it.
pub struct AutoSubscription {
    store_id: StoreId,
    store: WeakStore,
    key: String,
    callback: Callback,
    /// Scratch flag, reset before every build pass.
    used: AtomicBool,
}

impl AutoSubscription {
    pub fn new(store: &Store, key: impl Into<String>, callback: Callback) -> Arc<Self> {
        Arc::new(Self {
            store_id: store.id(),
            store: store.downgrade(),
            key: key.into(),
            callback,
            used: AtomicBool::new(true),
        })
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// The owning store, if it is still alive.
    pub fn store(&self) -> Option<Store> {
        self.store.upgrade()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    pub fn set_used(&self, used: bool) {
        self.used.store(used, Ordering::Relaxed);
    }

    /// Whether this subscription already covers a read of `key` on `store`.
    pub fn matches(&self, store: StoreId, key: &str) -> bool {
        self.store_id == store && (self.key == key || self.key == crate::keys::KEY_ALL)
    }
}

impl fmt::Debug for AutoSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSubscription")
            .field("store", &self.store_id)
            .field("key", &self.key)
            .field("used", &self.is_used())
            .finish()
    }
}

/// Lifecycle hooks a store may install.
///
/// Called when tracked interest in a key (manual or automatic) goes from zero
/// to non-zero and back. Hooks run after the store's locks are released, so
/// they may subscribe or trigger.
pub trait StoreHooks: Send + Sync {
    fn on_subscription_started(&self, _key: &str) {}

    fn on_subscription_stopped(&self, _key: &str) {}
}
