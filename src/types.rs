//! Core identifier and callback types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a store, stable for its lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u64);

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for a manual subscription, unique within its store.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionToken(pub u64);

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl SubscriptionToken {
    pub fn next(self) -> Self {
        SubscriptionToken(self.0 + 1)
    }
}

/// Identity of a callback. Two clones of the same [`Callback`] share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(usize);

type CallbackFn = dyn Fn(Option<&[String]>) + Send + Sync;

/// A notification target.
///
/// Receives the deduplicated keys it was triggered with, or `None` when an
/// all-keys trigger reached it. Identity is by allocation: cloning a
/// `Callback` and subscribing it under several keys still yields a single
/// invocation per flush.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<&[String]>) + Send + Sync + 'static,
    {
        Callback(Arc::new(f))
    }

    pub fn id(&self) -> CallbackId {
        CallbackId(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn call(&self, keys: Option<&[String]>) {
        (self.0)(keys)
    }

    pub fn ptr_eq(&self, other: &Callback) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:#x})", self.id().0)
    }
}
