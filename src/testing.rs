//! A deterministic [`Host`] for tests, with a virtual clock.
//!
//! Enabled via the `test-util` feature (and always available to this
//! crate's own `#[cfg(test)]` modules and `tests/` suite). Lets a test
//! advance time explicitly rather than sleeping real wall-clock time,
//! matching spec §8's literal scenarios (`host.advance(...)`).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::host::{Disposable, Host, MicrotaskCallback, NoopDisposable, TimerCallback};

struct TimerEntry {
    fire_at_ms: u64,
    cancelled: Rc<Cell<bool>>,
    callback: RefCell<Option<TimerCallback>>,
}

/// A [`Host`] whose clock only moves when told to.
///
/// # Example
///
/// Requires the `test-util` feature.
///
/// ```ignore
/// use ctx::testing::TestHost;
/// use ctx::{background, with_timeout};
///
/// let host = TestHost::new();
/// let (ctx, _cancel) = with_timeout(&background(host.clone()), 1);
/// assert!(ctx.error().is_none());
///
/// // suppress_timers=true: advance the clock but do not let the timer
/// // callback run. error() must still observe the deadline lazily (spec §4.6).
/// host.advance_without_firing(1);
/// assert!(ctx.error().unwrap().is_deadline_exceeded());
/// ```
pub struct TestHost {
    now_ms: Cell<u64>,
    timers: RefCell<Vec<Rc<TimerEntry>>>,
    microtasks: RefCell<VecDeque<MicrotaskCallback>>,
    uncaught: RefCell<Vec<Box<dyn std::error::Error + 'static>>>,
}

impl TestHost {
    /// Construct a host whose clock starts at `0`.
    pub fn new() -> Rc<Self> {
        Rc::new(TestHost {
            now_ms: Cell::new(0),
            timers: RefCell::new(Vec::new()),
            microtasks: RefCell::new(VecDeque::new()),
            uncaught: RefCell::new(Vec::new()),
        })
    }

    /// Move the clock forward by `delta_ms` and fire every timer now due,
    /// in the order they were scheduled.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
        self.fire_due();
    }

    /// Move the clock forward by `delta_ms` without firing any timers -
    /// used to exercise the lazy deadline re-check in
    /// [`Context::error`](crate::Context::error) independent of the timer
    /// machinery (spec §8 scenario S2: "deadline fires without timer").
    pub fn advance_without_firing(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }

    /// Move the clock to an absolute time and fire due timers.
    pub fn advance_to(&self, ms: u64) {
        self.now_ms.set(ms);
        self.fire_due();
    }

    fn fire_due(&self) {
        let now = self.now_ms.get();
        loop {
            let next = {
                let timers = self.timers.borrow();
                timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| !t.cancelled.get() && t.fire_at_ms <= now)
                    .min_by_key(|(idx, t)| (t.fire_at_ms, *idx))
                    .map(|(idx, _)| idx)
            };
            let Some(idx) = next else { break };
            let entry = self.timers.borrow_mut().remove(idx);
            if let Some(cb) = entry.callback.borrow_mut().take() {
                cb();
            }
        }
    }

    /// Run every microtask queued so far, in FIFO order. Needed only if a
    /// test exercises the microtask-notify variant explicitly (spec §9);
    /// the synchronous-notify default this crate ships never queues one.
    pub fn run_microtasks(&self) {
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(cb) = next else { break };
            cb();
        }
    }

    /// The number of timers still pending (not yet fired or disposed).
    pub fn pending_timer_count(&self) -> usize {
        self.timers
            .borrow()
            .iter()
            .filter(|t| !t.cancelled.get())
            .count()
    }

    /// Exceptions reported via [`Host::on_uncaught_exception`] so far, most
    /// recent last. `TestHost` never panics from this sink, unlike
    /// [`SystemHost`](crate::host::SystemHost) - matching spec §8 scenario
    /// S4's assertion against `host.uncaughtExceptions`.
    pub fn uncaught_exceptions(&self) -> Vec<String> {
        self.uncaught.borrow().iter().map(|e| e.to_string()).collect()
    }
}

impl Host for TestHost {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn schedule_timeout(&self, delay_ms: u64, cb: TimerCallback) -> Box<dyn Disposable> {
        let cancelled = Rc::new(Cell::new(false));
        let entry = Rc::new(TimerEntry {
            fire_at_ms: self.now_ms.get() + delay_ms,
            cancelled: Rc::clone(&cancelled),
            callback: RefCell::new(Some(cb)),
        });
        self.timers.borrow_mut().push(entry);

        struct TestDisposable {
            cancelled: Rc<Cell<bool>>,
        }
        impl Disposable for TestDisposable {
            fn dispose(&self) {
                self.cancelled.set(true);
            }
        }
        Box::new(TestDisposable { cancelled })
    }

    fn schedule_microtask(&self, cb: MicrotaskCallback) -> Box<dyn Disposable> {
        self.microtasks.borrow_mut().push_back(cb);
        Box::new(NoopDisposable)
    }

    fn on_uncaught_exception(&self, err: Box<dyn std::error::Error + 'static>) {
        self.uncaught.borrow_mut().push(err);
    }
}
