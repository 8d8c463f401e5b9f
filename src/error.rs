//! Error types for stores and the auto-subscription protocol.

use crate::types::{StoreId, SubscriptionToken};
use thiserror::Error;

/// Main error type for store operations.
///
/// Every variant is a usage or consistency violation reported at the call
/// site that broke the invariant. None of them are meant to be retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid subscription key: {0}")]
    InvalidKey(String),

    #[error("Unknown subscription token: {0:?}")]
    UnknownToken(SubscriptionToken),

    #[error("Trigger blocks popped more times than pushed")]
    TriggerBlockOverPopped,

    #[error("Auto-subscribing read while auto-subscriptions are forbidden")]
    AutoSubscribeForbidden,

    #[error("Store {0:?} is not opted in to auto-subscriptions")]
    NotAutoSubscribeStore(StoreId),

    #[error("Subscription not found for key {key:?}")]
    SubscriptionNotFound { key: String },

    #[error("Internal inconsistency: {0}")]
    Inconsistent(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
