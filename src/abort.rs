//! A minimal local `AbortController`/`AbortSignal` pair (spec §4.9).
//!
//! Spec §4.1/§4.9 are explicit that the *platform* abort controller is out
//! of scope - only the interface needs to exist so the bridge between it
//! and a [`Context`](crate::Context) has something to produce. This module
//! is that minimal local type, not a binding to any particular runtime's
//! abort machinery. Unlike [`Context`]'s own listener protocol (spec §4.4),
//! firing an `AbortSignal`'s listeners does not aggregate panics into an
//! `Aggregate` reason - there is no host to forward them to here, so a
//! panicking `on_abort` callback simply propagates.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::host::{Disposable, DisposableOnce, NoopDisposable};
use crate::reason::Reason;

type AbortListener = Box<dyn FnOnce(Reason)>;

/// A platform-style abort signal: starts unaborted, aborts at most once.
pub struct AbortSignal {
    aborted_reason: RefCell<Option<Reason>>,
    listeners: RefCell<VecDeque<Rc<RefCell<Option<AbortListener>>>>>,
}

impl AbortSignal {
    fn new() -> Self {
        AbortSignal {
            aborted_reason: RefCell::new(None),
            listeners: RefCell::new(VecDeque::new()),
        }
    }

    /// Whether this signal has been aborted yet.
    pub fn aborted(&self) -> bool {
        self.aborted_reason.borrow().is_some()
    }

    /// The reason this signal was aborted with, if it has been.
    pub fn reason(&self) -> Option<Reason> {
        self.aborted_reason.borrow().clone()
    }

    fn fire(&self, reason: Reason) {
        if self.aborted_reason.borrow().is_some() {
            return;
        }
        *self.aborted_reason.borrow_mut() = Some(reason.clone());
        loop {
            let slot = self.listeners.borrow_mut().pop_front();
            let Some(slot) = slot else { break };
            if let Some(cb) = slot.borrow_mut().take() {
                cb(reason.clone());
            }
        }
    }

    /// Register a one-shot listener, invoked at most once with the abort
    /// reason. Mirrors [`Context::on_did_cancel`](crate::Context::on_did_cancel)'s
    /// already-settled fast path: if the signal is already aborted, `cb`
    /// runs synchronously before this call returns.
    pub fn on_abort(&self, cb: impl FnOnce(Reason) + 'static) -> Box<dyn Disposable> {
        if let Some(reason) = self.reason() {
            cb(reason);
            return Box::new(NoopDisposable);
        }
        let slot: Rc<RefCell<Option<AbortListener>>> = Rc::new(RefCell::new(Some(Box::new(cb))));
        self.listeners.borrow_mut().push_back(Rc::clone(&slot));
        Box::new(DisposableOnce::new(move || {
            slot.borrow_mut().take();
        }))
    }
}

/// Owns an [`AbortSignal`] and the ability to abort it.
pub struct AbortController {
    signal: Rc<AbortSignal>,
}

impl AbortController {
    /// Construct a fresh, unaborted controller.
    pub fn new() -> Self {
        AbortController {
            signal: Rc::new(AbortSignal::new()),
        }
    }

    /// The signal this controller owns. Stable across calls.
    pub fn signal(&self) -> Rc<AbortSignal> {
        Rc::clone(&self.signal)
    }

    /// Abort the signal with `reason`. Idempotent - a second call is a
    /// no-op (matching the first-settle-wins rule every reason in this
    /// crate follows).
    pub fn abort(&self, reason: Reason) {
        self.signal.fire(reason);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_fires_listeners_once() {
        let ctl = AbortController::new();
        let signal = ctl.signal();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        signal.on_abort(move |r| s.borrow_mut().push(r));

        let reason = Reason::cancelled(Some("bye".into()), None);
        ctl.abort(reason.clone());
        ctl.abort(Reason::cancelled(Some("again".into()), None));

        assert!(signal.aborted());
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0], reason);
    }

    #[test]
    fn on_abort_after_abort_fires_synchronously() {
        let ctl = AbortController::new();
        let reason = Reason::cancelled(None, None);
        ctl.abort(reason.clone());

        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        ctl.signal().on_abort(move |r| *s.borrow_mut() = Some(r));
        assert_eq!(*seen.borrow(), Some(reason));
    }

    #[test]
    fn disposing_before_abort_prevents_invocation() {
        let ctl = AbortController::new();
        let called = Rc::new(Cell::new(false));
        let c = Rc::clone(&called);
        let d = ctl.signal().on_abort(move |_| c.set(true));
        d.dispose();
        ctl.abort(Reason::cancelled(None, None));
        assert!(!called.get());
    }
}
