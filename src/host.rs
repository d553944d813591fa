//! The pluggable host abstraction (spec §4.1).
//!
//! A [`Host`] supplies everything the context engine needs that is not pure
//! computation: the current time, one-shot timer scheduling, microtask
//! scheduling, and a sink for exceptions a listener callback couldn't handle.
//! The engine itself never touches a clock directly - it only ever goes
//! through a `Rc<dyn Host>`.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error as StdError;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::abort::AbortController;

/// An idempotent handle that releases whatever it was obtained from.
///
/// Calling [`dispose`](Disposable::dispose) more than once must be safe and
/// have no additional effect - every disposable returned by this crate (and
/// by a [`Host`] implementation) upholds that.
pub trait Disposable {
    /// Release the resource. Safe to call more than once.
    fn dispose(&self);
}

/// A [`Disposable`] that does nothing - used for already-settled
/// registrations, matching spec §4.5 ("If the context already has a reason
/// at call time... return a no-op disposable").
pub struct NoopDisposable;

impl Disposable for NoopDisposable {
    fn dispose(&self) {}
}

/// A [`Disposable`] built from a single `FnOnce`, guarded so the closure
/// runs at most once even if `dispose` is called repeatedly.
///
/// Grounded on the teacher's `Box<Fn() + Send>` cancel closures (see
/// `with_cancel.rs`), generalized into a named, reusable, idempotent type -
/// a bare closure has no way to remember it already ran.
pub struct DisposableOnce<F: FnOnce()> {
    inner: Cell<Option<F>>,
}

impl<F: FnOnce()> DisposableOnce<F> {
    /// Wrap `f` so it runs on the first `dispose()` call only.
    pub fn new(f: F) -> Self {
        DisposableOnce {
            inner: Cell::new(Some(f)),
        }
    }
}

impl<F: FnOnce()> Disposable for DisposableOnce<F> {
    fn dispose(&self) {
        if let Some(f) = self.inner.take() {
            f();
        }
    }
}

/// A one-shot callback a [`Host`] invokes when a scheduled timeout fires.
pub type TimerCallback = Box<dyn FnOnce()>;

/// A one-shot callback a [`Host`] invokes when a scheduled microtask runs.
pub type MicrotaskCallback = Box<dyn FnOnce()>;

/// The injected abstraction over time, timers, microtasks, and the
/// uncaught-exception sink (spec §4.1, §9).
///
/// A tree of contexts is always built against exactly one `Host`; `Context`
/// never reaches past it to the system clock or a runtime directly, which
/// is what makes the engine itself deterministically testable (see
/// [`crate::testing::TestHost`]).
pub trait Host {
    /// The current time, in milliseconds, in this host's own time domain.
    ///
    /// Does not need to be wall-clock time; only needs to be monotonic for
    /// the lifetime of any one timer (spec §4.1).
    fn now_ms(&self) -> u64;

    /// Schedule `cb` to run once, after `delay_ms` have elapsed. Disposing
    /// the returned handle before it fires cancels the firing.
    fn schedule_timeout(&self, delay_ms: u64, cb: TimerCallback) -> Box<dyn Disposable>;

    /// Schedule `cb` to run after the current synchronous frame, before any
    /// I/O.
    ///
    /// The default implementation runs `cb` immediately, inline - the
    /// synchronous-notify variant this crate standardizes on (see design
    /// notes "Open Questions resolved"). A host that wants the microtask
    /// variant instead may override this to defer into a queue.
    fn schedule_microtask(&self, cb: MicrotaskCallback) -> Box<dyn Disposable> {
        cb();
        Box::new(NoopDisposable)
    }

    /// Report an exception a listener callback raised that nothing else is
    /// positioned to handle (spec §4.4 step 4, §7).
    ///
    /// The default implementation logs via the `log` crate and then resumes
    /// unwinding by panicking, since - unlike JS - Rust has no ambient
    /// "rethrow from the caller" channel to fall back to.
    fn on_uncaught_exception(&self, err: Box<dyn StdError + 'static>) {
        log::error!("uncaught exception from context listener: {err}");
        panic!("uncaught exception from context listener: {err}");
    }

    /// Build a fresh, unaborted abort controller (spec §4.1).
    ///
    /// The default implementation constructs the crate's own minimal
    /// `AbortController` (spec §4.9 notes the *platform* abort controller is
    /// out of scope, but something has to exist for the bridge to produce).
    /// A host embedded in a runtime with its own abort-controller type would
    /// override this to return one backed by that runtime instead.
    fn create_abort_controller(&self) -> Rc<AbortController> {
        Rc::new(AbortController::new())
    }
}

struct PendingTimer {
    fire_at_ms: u64,
    seq: u64,
    cancelled: Rc<Cell<bool>>,
    callback: RefCell<Option<TimerCallback>>,
}

/// Orders by soonest-first, tie-broken by insertion order.
struct HeapKey {
    fire_at_ms: u64,
    seq: u64,
}

impl PartialEq for HeapKey {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.seq == other.seq
    }
}
impl Eq for HeapKey {}
impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fire_at_ms, self.seq).cmp(&(other.fire_at_ms, other.seq))
    }
}

/// The default [`Host`], backed by the system clock.
///
/// There is no ambient single-threaded timer reactor in `std`, and the
/// engine's own state (`Rc`, `RefCell`) is deliberately not `Send` (spec §5:
/// single-threaded, cooperative, no preemption). So rather than spawning an
/// OS thread per timeout - which would force every cancel closure captured
/// by `cb` to be `Send`, defeating the point of using `Rc` at all -
/// `SystemHost` keeps a min-heap of pending timers and fires the due ones
/// when the embedder calls [`pump`](SystemHost::pump). This mirrors the
/// spec's own description of deadline enforcement as "lazily re-checked on
/// every read" (§2): a `SystemHost`-backed tree observes its deadlines
/// either when something calls `pump`, or - always correctly, even if
/// nobody ever pumps - the next time `error()` is read (spec §4.6).
pub struct SystemHost {
    epoch: Instant,
    next_seq: Cell<u64>,
    timers: RefCell<BinaryHeap<Reverse<HeapKey>>>,
    by_key: RefCell<std::collections::HashMap<(u64, u64), Rc<PendingTimer>>>,
}

impl SystemHost {
    /// Construct a new host whose time domain starts now.
    pub fn new() -> Rc<Self> {
        Rc::new(SystemHost {
            epoch: Instant::now(),
            next_seq: Cell::new(0),
            timers: RefCell::new(BinaryHeap::new()),
            by_key: RefCell::new(std::collections::HashMap::new()),
        })
    }

    /// Fire every timer whose deadline is at or before the current time.
    ///
    /// Returns the number of timers fired. Call this periodically from an
    /// embedding event loop, or rely on [`Context::error`](crate::Context::error)'s
    /// own lazy re-check for correctness without ever pumping at all.
    pub fn pump(&self) -> usize {
        let now = self.now_ms();
        let mut fired = 0;
        loop {
            let due = {
                let heap = self.timers.borrow();
                match heap.peek() {
                    Some(Reverse(key)) if key.fire_at_ms <= now => {
                        Some((key.fire_at_ms, key.seq))
                    }
                    _ => None,
                }
            };
            let Some(key) = due else { break };
            self.timers.borrow_mut().pop();
            let timer = self.by_key.borrow_mut().remove(&key);
            if let Some(timer) = timer {
                if !timer.cancelled.get() {
                    if let Some(cb) = timer.callback.borrow_mut().take() {
                        cb();
                        fired += 1;
                    }
                }
            }
        }
        fired
    }

    /// Block the calling thread until the next pending timer is due, then
    /// [`pump`](Self::pump). No-op if there are no pending timers.
    pub fn sleep_until_next_and_pump(&self) -> usize {
        let next = self
            .timers
            .borrow()
            .peek()
            .map(|Reverse(key)| key.fire_at_ms);
        if let Some(fire_at_ms) = next {
            let now = self.now_ms();
            if fire_at_ms > now {
                thread::sleep(Duration::from_millis(fire_at_ms - now));
            }
        }
        self.pump()
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        SystemHost {
            epoch: Instant::now(),
            next_seq: Cell::new(0),
            timers: RefCell::new(BinaryHeap::new()),
            by_key: RefCell::new(std::collections::HashMap::new()),
        }
    }
}

impl Host for SystemHost {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn schedule_timeout(&self, delay_ms: u64, cb: TimerCallback) -> Box<dyn Disposable> {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let fire_at_ms = self.now_ms() + delay_ms;
        let cancelled = Rc::new(Cell::new(false));

        let timer = Rc::new(PendingTimer {
            fire_at_ms,
            seq,
            cancelled: Rc::clone(&cancelled),
            callback: RefCell::new(Some(cb)),
        });

        self.by_key
            .borrow_mut()
            .insert((fire_at_ms, seq), Rc::clone(&timer));
        self.timers.borrow_mut().push(Reverse(HeapKey {
            fire_at_ms,
            seq,
        }));

        struct TimerDisposable {
            cancelled: Rc<Cell<bool>>,
        }
        impl Disposable for TimerDisposable {
            fn dispose(&self) {
                self.cancelled.set(true);
            }
        }

        Box::new(TimerDisposable { cancelled })
    }
}
