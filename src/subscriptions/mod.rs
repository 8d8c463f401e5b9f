//! Subscription bookkeeping for stores.
//!
//! Each store owns a [`SubscriptionManager`] holding two parallel tables:
//! - Manual subscriptions, registered and removed explicitly by token
//! - Auto-subscriptions, created and discarded by observer build passes
//!
//! Both tables feed the same trigger path and the same started/stopped
//! tracking hooks.

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{AutoSubscription, ManualSubscription, StoreHooks};
