//! The context tree engine (spec §3-§4.6): the node type, the cancel/notify
//! protocol, lazy deadline observation, value lookup, and the awaitable
//! bridge. This is the ~55% of the spec's budget called out as "the hard
//! part" in spec.md §2.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context as TaskContext, Poll, Waker};

use crate::abort::AbortController;
use crate::host::{Disposable, DisposableOnce, Host, NoopDisposable};
use crate::reason::Reason;

type Listener = Box<dyn FnOnce(Reason)>;
type ListenerSlot = Rc<RefCell<Option<Listener>>>;

pub(crate) struct ContextInner {
    pub(crate) host: Rc<dyn Host>,
    pub(crate) parent: Option<Context>,
    reason: RefCell<Option<Reason>>,
    pub(crate) deadline_at: Option<u64>,
    listeners: RefCell<VecDeque<ListenerSlot>>,
    kv: Option<(u64, Box<dyn Any>)>,
    abort_controller: RefCell<Option<Rc<AbortController>>>,
    parent_subscription: RefCell<Option<Box<dyn Disposable>>>,
    deadline_timer: RefCell<Option<Box<dyn Disposable>>>,
}

/// A node in a cancellation tree (spec §3).
///
/// Cheap to clone - cloning a `Context` clones an `Rc`, not the tree. There
/// is no way to construct one outside of [`background`](crate::background)
/// and the `with_*` constructors, so a `&Context` parameter is already the
/// "is this really a context" check the original spec needed a runtime
/// brand for (spec §9 "Branding").
#[derive(Clone)]
pub struct Context(pub(crate) Rc<ContextInner>);

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("reason", &self.0.reason.borrow().is_some())
            .field("deadline_at", &self.0.deadline_at)
            .finish()
    }
}

pub(crate) fn new_root(host: Rc<dyn Host>) -> Context {
    Context(Rc::new(ContextInner {
        host,
        parent: None,
        reason: RefCell::new(None),
        deadline_at: None,
        listeners: RefCell::new(VecDeque::new()),
        kv: None,
        abort_controller: RefCell::new(None),
        parent_subscription: RefCell::new(None),
        deadline_timer: RefCell::new(None),
    }))
}

/// Build a child of `parent`, registering parent-cancellation propagation
/// per spec §4.4: "Cancel propagation on construction". If `parent` is
/// already cancelled, the child is born with that reason already set and no
/// listener is registered (the "already-cancelled parent" fast path).
pub(crate) fn new_child(
    parent: &Context,
    deadline_at: Option<u64>,
    kv: Option<(u64, Box<dyn Any>)>,
) -> Context {
    let host = Rc::clone(&parent.0.host);
    if let Some(reason) = parent.error() {
        return Context(Rc::new(ContextInner {
            host,
            parent: Some(parent.clone()),
            reason: RefCell::new(Some(reason)),
            deadline_at,
            listeners: RefCell::new(VecDeque::new()),
            kv,
            abort_controller: RefCell::new(None),
            parent_subscription: RefCell::new(None),
            deadline_timer: RefCell::new(None),
        }));
    }

    let child = Context(Rc::new(ContextInner {
        host,
        parent: Some(parent.clone()),
        reason: RefCell::new(None),
        deadline_at,
        listeners: RefCell::new(VecDeque::new()),
        kv,
        abort_controller: RefCell::new(None),
        parent_subscription: RefCell::new(None),
        deadline_timer: RefCell::new(None),
    }));

    let weak = Rc::downgrade(&child.0);
    let sub = parent.on_did_cancel(move |reason| {
        if let Some(inner) = weak.upgrade() {
            Context(inner).cancel_internal(reason);
        }
    });
    *child.0.parent_subscription.borrow_mut() = Some(sub);
    child
}

impl Context {
    /// This context's cancellation reason, checking lazily for an
    /// unobserved ancestor cancellation or elapsed deadline (spec §4.6).
    ///
    /// Never panics. Returns the same [`Reason`] reference (by identity) on
    /// every subsequent call once set (invariant I1).
    pub fn error(&self) -> Option<Reason> {
        if let Some(reason) = self.0.reason.borrow().clone() {
            return Some(reason);
        }
        if let Some(parent) = &self.0.parent {
            if let Some(reason) = parent.error() {
                self.cancel_internal(reason.clone());
                return Some(reason);
            }
        }
        if let Some(deadline) = self.0.deadline_at {
            if self.0.host.now_ms() >= deadline {
                let reason = Reason::deadline_exceeded();
                self.cancel_internal(reason.clone());
                return Some(reason);
            }
        }
        None
    }

    /// The `Cancel(node, reason)` protocol (spec §4.4). Idempotent: a
    /// second call with any reason is a no-op (invariant I1, P2).
    pub(crate) fn cancel_internal(&self, reason: Reason) {
        if self.0.reason.borrow().is_some() {
            return;
        }
        *self.0.reason.borrow_mut() = Some(reason.clone());

        let mut failures: Vec<Box<dyn StdError + 'static>> = Vec::new();
        loop {
            let slot = self.0.listeners.borrow_mut().pop_front();
            let Some(slot) = slot else { break };
            let cb = slot.borrow_mut().take();
            if let Some(cb) = cb {
                let r = reason.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || cb(r)));
                if let Err(payload) = outcome {
                    failures.push(Box::new(PanicError::from_payload(payload)));
                }
            }
        }

        match failures.len() {
            0 => {}
            1 => self.0.host.on_uncaught_exception(failures.pop().unwrap()),
            _ => self
                .0
                .host
                .on_uncaught_exception(Box::new(Reason::aggregate(failures))),
        }

        if let Some(sub) = self.0.parent_subscription.borrow_mut().take() {
            sub.dispose();
        }
        if let Some(timer) = self.0.deadline_timer.borrow_mut().take() {
            timer.dispose();
        }
    }

    pub(crate) fn set_deadline_timer(&self, timer: Box<dyn Disposable>) {
        *self.0.deadline_timer.borrow_mut() = Some(timer);
    }

    /// This context tree's host, for constructors that need to schedule
    /// timers or read the current time directly.
    pub(crate) fn host_handle(&self) -> Rc<dyn Host> {
        Rc::clone(&self.0.host)
    }

    pub(crate) fn weak_inner(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.0)
    }

    /// Register a one-shot cancellation listener (spec §4.5).
    ///
    /// If this context is already cancelled, `listener` runs synchronously
    /// before this call returns and a no-op [`Disposable`] is handed back.
    /// Otherwise the listener fires at most once, the next time this
    /// context is cancelled (invariant I4); disposing the returned handle
    /// before that happens prevents it from ever firing, and disposing it
    /// afterwards is a no-op.
    pub fn on_did_cancel(&self, listener: impl FnOnce(Reason) + 'static) -> Box<dyn Disposable> {
        if let Some(reason) = self.error() {
            listener(reason);
            return Box::new(NoopDisposable);
        }
        let slot: ListenerSlot = Rc::new(RefCell::new(Some(Box::new(listener))));
        self.0.listeners.borrow_mut().push_back(Rc::clone(&slot));
        Box::new(DisposableOnce::new(move || {
            slot.borrow_mut().take();
        }))
    }

    /// Look up the nearest ancestor (inclusive) binding `key`, returning a
    /// clone of the bound value (spec §4.7, invariant I5).
    pub fn get_value<T: 'static + Clone>(&self, key: crate::key::Key<T>) -> Option<T> {
        let mut node = Some(self.clone());
        while let Some(ctx) = node {
            if let Some((id, value)) = &ctx.0.kv {
                if *id == key.id() {
                    return value.downcast_ref::<T>().cloned();
                }
            }
            node = ctx.0.parent.clone();
        }
        None
    }

    /// Whether this context or an ancestor binds `key`, regardless of the
    /// bound value (invariant I6 - presence is distinct from value).
    pub fn has_value<T: 'static>(&self, key: crate::key::Key<T>) -> bool {
        let mut node = Some(self.clone());
        while let Some(ctx) = node {
            if let Some((id, _)) = &ctx.0.kv {
                if *id == key.id() {
                    return true;
                }
            }
            node = ctx.0.parent.clone();
        }
        false
    }

    /// The effective deadline for this context, after I2's
    /// `min(parent, requested)` clamping has already been applied at
    /// construction time.
    pub fn deadline(&self) -> Option<u64> {
        self.0.deadline_at
    }

    /// A future resolving to this context's cancellation reason. Never
    /// rejects; never resolves before cancellation (spec §4.8).
    pub fn done(&self) -> Done {
        Done::new(self.clone())
    }

    /// The "reject on cancel" view of this context: a future that resolves
    /// `Err(reason)` on cancellation and is otherwise pending forever (spec
    /// §4.8).
    pub fn into_cancelled_future(&self) -> IntoCancelled {
        IntoCancelled(self.done())
    }

    /// This context's lazily-materialized abort signal (spec §4.9).
    ///
    /// The first call creates and caches an [`AbortController`]; every
    /// subsequent call returns the same signal. If this context is already
    /// cancelled, the signal is aborted immediately; otherwise it aborts
    /// the moment this context does.
    pub fn signal(&self) -> Rc<crate::abort::AbortSignal> {
        if let Some(existing) = self.0.abort_controller.borrow().as_ref() {
            return existing.signal();
        }
        let controller = self.0.host.create_abort_controller();
        match self.error() {
            Some(reason) => controller.abort(reason),
            None => {
                let controller_for_listener = Rc::clone(&controller);
                self.on_did_cancel(move |reason| controller_for_listener.abort(reason));
            }
        }
        let signal = controller.signal();
        *self.0.abort_controller.borrow_mut() = Some(controller);
        signal
    }
}

/// The cancel function returned alongside a derived [`Context`] (spec
/// §4.3's `cancel_fn`).
///
/// Holds only a [`Weak`] reference to the context it cancels - a
/// `Canceller` outliving its context (e.g. stashed in a struct after the
/// context itself was dropped) is inert rather than keeping the context
/// tree alive, matching spec §3's "not explicitly destroyed - drop
/// naturally when unreferenced".
#[derive(Clone)]
pub struct Canceller(Weak<ContextInner>);

impl Canceller {
    pub(crate) fn new(inner: &Rc<ContextInner>) -> Self {
        Canceller(Rc::downgrade(inner))
    }

    /// Cancel with no message and no cause.
    pub fn cancel(&self) {
        self.cancel_with(None, None);
    }

    /// Cancel, setting the `Cancelled` reason's message.
    pub fn cancel_with_message(&self, message: impl Into<String>) {
        self.cancel_with(Some(message.into()), None);
    }

    /// Cancel by wrapping `cause` as the `Cancelled` reason's underlying
    /// cause (spec §4.3: "propagates the given cause by wrapping it").
    pub fn cancel_with_cause(&self, cause: Box<dyn StdError + 'static>) {
        self.cancel_with(None, Some(cause));
    }

    fn cancel_with(&self, message: Option<String>, cause: Option<Box<dyn StdError + 'static>>) {
        if let Some(inner) = self.0.upgrade() {
            Context(inner).cancel_internal(Reason::cancelled(message, cause));
        }
    }
}

/// A future that resolves to a [`Context`]'s cancellation [`Reason`] (spec
/// §4.8). Built over [`Context::on_did_cancel`]; disposes its underlying
/// listener registration on drop so a `Done` abandoned before cancellation
/// doesn't keep a dead waker reachable forever (spec §3's "correct
/// unsubscription on dispose").
pub struct Done {
    ctx: Context,
    waker: Rc<RefCell<Option<Waker>>>,
    subscription: RefCell<Option<Box<dyn Disposable>>>,
}

impl Done {
    fn new(ctx: Context) -> Self {
        Done {
            ctx,
            waker: Rc::new(RefCell::new(None)),
            subscription: RefCell::new(None),
        }
    }
}

impl Future for Done {
    type Output = Reason;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Reason> {
        if let Some(reason) = self.ctx.error() {
            return Poll::Ready(reason);
        }
        *self.waker.borrow_mut() = Some(cx.waker().clone());
        if self.subscription.borrow().is_none() {
            let waker = Rc::clone(&self.waker);
            let sub = self.ctx.on_did_cancel(move |_reason| {
                if let Some(w) = waker.borrow_mut().take() {
                    w.wake();
                }
            });
            *self.subscription.borrow_mut() = Some(sub);
        }
        Poll::Pending
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.borrow_mut().take() {
            sub.dispose();
        }
    }
}

/// The "reject on cancel" wrapper around [`Done`] (spec §4.8).
pub struct IntoCancelled(Done);

impl Future for IntoCancelled {
    type Output = Result<Infallible, Reason>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.0).poll(cx).map(Err)
    }
}

/// Wraps a caught panic payload as a [`StdError`] so it can travel through
/// [`Host::on_uncaught_exception`] and an [`Aggregate`](crate::reason::ReasonKind::Aggregate)
/// reason the same way any other listener failure would (spec §4.4 step 4).
#[derive(Debug)]
struct PanicError(String);

impl PanicError {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "listener panicked with a non-string payload".to_string()
        };
        PanicError(message)
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for PanicError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::testing::TestHost;

    #[test]
    fn error_is_idempotent_and_stable() {
        let host = TestHost::new();
        let root = new_root(host);
        let child = new_child(&root, None, None);
        child.cancel_internal(Reason::cancelled(None, None));

        let first = child.error().unwrap();
        let second = child.error().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cancel_propagates_to_child_on_read() {
        let host = TestHost::new();
        let root = new_root(host);
        let child = new_child(&root, None, None);
        let grandchild = new_child(&child, None, None);

        let reason = Reason::cancelled(Some("bye".into()), None);
        root.cancel_internal(reason.clone());

        assert_eq!(child.error(), Some(reason.clone()));
        assert_eq!(grandchild.error(), Some(reason));
    }

    #[test]
    fn already_cancelled_parent_produces_cancelled_child() {
        let host = TestHost::new();
        let root = new_root(host);
        root.cancel_internal(Reason::cancelled(Some("early".into()), None));

        let child = new_child(&root, None, None);
        assert!(child.error().unwrap().is_cancelled());
    }

    #[test]
    fn listener_disposed_before_cancel_never_fires() {
        let host = TestHost::new();
        let root = new_root(host);
        let called = Rc::new(RefCell::new(false));
        let c = Rc::clone(&called);
        let d = root.on_did_cancel(move |_| *c.borrow_mut() = true);
        d.dispose();
        root.cancel_internal(Reason::cancelled(None, None));
        assert!(!*called.borrow());
    }

    #[test]
    fn listener_fires_synchronously_when_already_cancelled() {
        let host = TestHost::new();
        let root = new_root(host);
        root.cancel_internal(Reason::cancelled(None, None));

        let called = Rc::new(RefCell::new(false));
        let c = Rc::clone(&called);
        root.on_did_cancel(move |_| *c.borrow_mut() = true);
        assert!(*called.borrow());
    }

    #[test]
    fn value_shadowing_and_presence() {
        let host = TestHost::new();
        let root = new_root(host);
        let k: Key<&'static str> = Key::new();
        let with_k = new_child(&root, None, Some((k.id(), Box::new("v"))));
        let shadowed = new_child(&with_k, None, Some((k.id(), Box::new("V"))));
        let plain = new_child(&with_k, None, None);

        assert!(!root.has_value(k));
        assert_eq!(with_k.get_value(k), Some("v"));
        assert_eq!(plain.get_value(k), Some("v"));
        assert_eq!(shadowed.get_value(k), Some("V"));
        assert!(shadowed.has_value(k));
    }

    #[test]
    fn aggregate_on_multiple_panicking_listeners() {
        let host = TestHost::new();
        let root = new_root(host.clone());
        root.on_did_cancel(|_| panic!("first"));
        root.on_did_cancel(|_| panic!("second"));

        root.cancel_internal(Reason::cancelled(None, None));

        let uncaught = host.uncaught_exceptions();
        assert_eq!(uncaught.len(), 1);
        assert!(uncaught[0].contains("2 listener"));
    }

    #[test]
    fn single_panicking_listener_forwarded_as_is() {
        let host = TestHost::new();
        let root = new_root(host.clone());
        root.on_did_cancel(|_| panic!("boom"));
        root.cancel_internal(Reason::cancelled(None, None));

        let uncaught = host.uncaught_exceptions();
        assert_eq!(uncaught, vec!["boom".to_string()]);
    }
}
