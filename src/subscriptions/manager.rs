//! Per-store subscription bookkeeping.

use crate::coordinator::QueuedCallback;
use crate::error::{Result, StoreError};
use crate::keys::KEY_ALL;
use crate::types::{Callback, SubscriptionToken};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::types::{AutoSubscription, ManualSubscription};

#[derive(Default)]
struct SubscriptionTable {
    /// Manual callbacks by key, in registration order.
    manual: HashMap<String, Vec<ManualSubscription>>,
    /// Auto-subscriptions by key. One entry per observer.
    auto: HashMap<String, Vec<Arc<AutoSubscription>>>,
    /// Token index for O(1) unsubscribe.
    tokens: HashMap<SubscriptionToken, ManualSubscription>,
    last_token: SubscriptionToken,
}

impl SubscriptionTable {
    fn is_tracking(&self, key: &str) -> bool {
        self.manual.get(key).is_some_and(|subs| !subs.is_empty())
            || self.auto.get(key).is_some_and(|subs| !subs.is_empty())
    }

    fn callbacks_for<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Callback> + 'a {
        let manual = self.manual.get(key).into_iter().flatten().map(|s| &s.callback);
        let auto = self.auto.get(key).into_iter().flatten().map(|s| s.callback());
        manual.chain(auto)
    }
}

/// Manual and automatic subscriptions of one store, keyed by normalized key.
///
/// A key counts as tracked while either list for it is non-empty. Mutating
/// operations report whether tracking of the key started or stopped so the
/// store can fire its hooks outside the lock.
pub struct SubscriptionManager {
    table: RwLock<SubscriptionTable>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(SubscriptionTable::default()),
        }
    }

    /// Register a manual callback. Returns the token and whether this is
    /// the first interest in `key`.
    pub fn subscribe(&self, key: String, callback: Callback) -> (SubscriptionToken, bool) {
        let mut table = self.table.write();
        let started = !table.is_tracking(&key);

        let token = table.last_token.next();
        table.last_token = token;

        let subscription = ManualSubscription {
            token,
            key: key.clone(),
            callback,
        };
        table.tokens.insert(token, subscription.clone());
        table.manual.entry(key).or_default().push(subscription);

        (token, started)
    }

    /// Remove a manual registration. Returns it and whether interest in its
    /// key dropped to zero.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> Result<(ManualSubscription, bool)> {
        let mut table = self.table.write();
        let subscription = table
            .tokens
            .remove(&token)
            .ok_or(StoreError::UnknownToken(token))?;

        let list = table.manual.get_mut(&subscription.key).ok_or_else(|| {
            StoreError::SubscriptionNotFound {
                key: subscription.key.clone(),
            }
        })?;
        let before = list.len();
        list.retain(|s| s.token != token);
        if list.len() + 1 != before {
            return Err(StoreError::Inconsistent(format!(
                "token {:?} removed {} entries under key {:?}",
                token,
                before - list.len(),
                subscription.key
            )));
        }
        if list.is_empty() {
            table.manual.remove(&subscription.key);
        }

        let stopped = !table.is_tracking(&subscription.key);
        Ok((subscription, stopped))
    }

    /// Add an auto-subscription. Returns whether this is the first interest
    /// in its key.
    pub fn track_auto(&self, subscription: Arc<AutoSubscription>) -> bool {
        let mut table = self.table.write();
        let key = subscription.key().to_string();
        let started = !table.is_tracking(&key);
        table.auto.entry(key).or_default().push(subscription);
        started
    }

    /// Remove an auto-subscription. Returns whether interest in its key
    /// dropped to zero.
    pub fn remove_auto(&self, subscription: &Arc<AutoSubscription>) -> Result<bool> {
        let mut table = self.table.write();
        let key = subscription.key();
        let list = table
            .auto
            .get_mut(key)
            .ok_or_else(|| StoreError::SubscriptionNotFound {
                key: key.to_string(),
            })?;

        let position = list
            .iter()
            .position(|s| Arc::ptr_eq(s, subscription))
            .ok_or_else(|| StoreError::SubscriptionNotFound {
                key: key.to_string(),
            })?;
        list.remove(position);
        if list.is_empty() {
            table.auto.remove(key);
        }

        Ok(!table.is_tracking(key))
    }

    /// One all-keys notification per distinct subscribed callback.
    pub(crate) fn collect_all(&self) -> Vec<QueuedCallback> {
        let table = self.table.read();
        let mut seen = HashSet::new();
        let manual = table.manual.values().flatten().map(|s| &s.callback);
        let auto = table.auto.values().flatten().map(|s| s.callback());

        manual
            .chain(auto)
            .filter(|callback| seen.insert(callback.id()))
            .map(|callback| QueuedCallback {
                callback: callback.clone(),
                keys: None,
            })
            .collect()
    }

    /// Notifications for a specific key list.
    ///
    /// Subscribers of a key receive that key; subscribers of [`KEY_ALL`]
    /// receive the whole list.
    pub(crate) fn collect_for_keys(&self, keys: &[String]) -> Vec<QueuedCallback> {
        let table = self.table.read();
        let mut batch = Vec::new();

        for key in keys {
            for callback in table.callbacks_for(key) {
                batch.push(QueuedCallback {
                    callback: callback.clone(),
                    keys: Some(vec![key.clone()]),
                });
            }
        }

        for callback in table.callbacks_for(KEY_ALL) {
            batch.push(QueuedCallback {
                callback: callback.clone(),
                keys: Some(keys.to_vec()),
            });
        }

        batch
    }

    pub fn is_tracking(&self, key: &str) -> bool {
        self.table.read().is_tracking(key)
    }

    /// Keys with at least one manual or automatic subscription.
    pub fn tracked_keys(&self) -> Vec<String> {
        let table = self.table.read();
        let mut keys: Vec<String> = table
            .manual
            .keys()
            .chain(table.auto.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        keys.sort();
        keys
    }

    /// Total manual plus automatic registrations.
    pub fn subscription_count(&self) -> usize {
        let table = self.table.read();
        table.tokens.len() + table.auto.values().map(Vec::len).sum::<usize>()
    }

    pub fn auto_subscription_count(&self, key: &str) -> usize {
        self.table.read().auto.get(key).map_or(0, Vec::len)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
