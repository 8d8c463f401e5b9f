//! The active auto-subscribe handler.
//!
//! A per-thread stack that plays the role of a dynamically scoped variable:
//! entering a build pushes the observer, entering a forbidden section pushes
//! `Forbid`, and the guard pops it again on every exit path, panics included.
//! Nested builds of unrelated observers therefore each see their own entry.

use super::observer::ObserverInner;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Weak;

#[derive(Clone)]
pub(crate) enum ActiveHandler {
    Tracking(Weak<ObserverInner>),
    Forbid,
}

thread_local! {
    static HANDLER_STACK: RefCell<Vec<ActiveHandler>> = const { RefCell::new(Vec::new()) };
    // Depth of tracked or warning-exempt accessor calls in the current scope.
    static ACCESSOR_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Installs a handler for the lifetime of the guard.
pub(crate) struct HandlerScope {
    saved_depth: usize,
    // Tied to the thread whose stack it pushed onto.
    _not_send: PhantomData<*const ()>,
}

impl HandlerScope {
    pub(crate) fn enter(handler: ActiveHandler) -> Self {
        HANDLER_STACK.with(|stack| stack.borrow_mut().push(handler));
        let saved_depth = ACCESSOR_DEPTH.with(|depth| depth.replace(0));
        Self {
            saved_depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for HandlerScope {
    fn drop(&mut self) {
        HANDLER_STACK.with(|stack| stack.borrow_mut().pop());
        ACCESSOR_DEPTH.with(|depth| depth.set(self.saved_depth));
    }
}

/// Marks the extent of a tracked or warning-exempt accessor call.
pub(crate) struct AccessorScope {
    _not_send: PhantomData<*const ()>,
}

impl AccessorScope {
    pub(crate) fn enter() -> Self {
        ACCESSOR_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for AccessorScope {
    fn drop(&mut self) {
        ACCESSOR_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub(crate) fn current() -> Option<ActiveHandler> {
    HANDLER_STACK.with(|stack| stack.borrow().last().cloned())
}

pub(crate) fn in_accessor() -> bool {
    ACCESSOR_DEPTH.with(|depth| depth.get() > 0)
}

/// Whether an observer build is the innermost active handler on this thread.
pub fn is_building() -> bool {
    matches!(current(), Some(ActiveHandler::Tracking(_)))
}

/// Whether auto-subscribing reads are currently forbidden on this thread.
pub fn is_forbidden() -> bool {
    matches!(current(), Some(ActiveHandler::Forbid))
}

/// Run `f` with auto-subscribing reads forbidden.
///
/// Used around output phases that must only consume already-built state.
/// Any auto-subscribing accessor called inside fails with
/// [`StoreError::AutoSubscribeForbidden`](crate::StoreError::AutoSubscribeForbidden).
pub fn forbid_auto_subscribe<R>(f: impl FnOnce() -> R) -> R {
    let _scope = HandlerScope::enter(ActiveHandler::Forbid);
    f()
}
