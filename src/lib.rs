//! `ctx` is a cancellation-and-deadline propagation primitive modelled on
//! Go's [`context`](https://pkg.go.dev/context) package, adapted to a
//! single-threaded cooperative scheduler instead of Go's preemptible
//! goroutines.
//!
//! A [`Context`] is an immutable handle representing a unit of ongoing
//! work. It may carry a deadline, carry a single key/value binding, and is
//! always linked to a parent; cancelling a context cancels every one of its
//! descendants. The typical shape of a call chain:
//!
//! ```
//! use ctx::{background, with_cancel, with_timeout, SystemHost};
//!
//! let host = SystemHost::new();
//! let root = background(host);
//! let (request, cancel_request) = with_cancel(&root);
//! let (attempt, _cancel_attempt) = with_timeout(&request, 30_000);
//!
//! // ... hand `attempt` down the call stack ...
//! assert!(attempt.error().is_none());
//!
//! cancel_request.cancel();
//! assert!(attempt.error().unwrap().is_cancelled());
//! ```
//!
//! Everything that touches a clock, a timer, or an uncaught-exception sink
//! goes through an injected [`Host`](host::Host) - the engine itself never
//! reaches past it, which is what makes [`testing::TestHost`] a drop-in
//! replacement for deterministic tests.

mod abort;
mod adapters;
mod background;
mod context;
mod host;
mod key;
mod reason;
mod with_cancel;
mod with_deadline;
mod with_value;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use abort::{AbortController, AbortSignal};
pub use adapters::{
    with_abort_signal, with_event_source, with_stream_completion, EventSource, StreamLike,
};
pub use background::background;
pub use context::{Canceller, Context, Done, IntoCancelled};
pub use host::{Disposable, DisposableOnce, Host, NoopDisposable, SystemHost};
pub use key::Key;
pub use reason::{Reason, ReasonKind};
pub use with_cancel::with_cancel;
pub use with_deadline::{with_deadline, with_timeout};
pub use with_value::with_value;

/// `true` if `reason.is_cancelled()` - spec §6's `isCancelledError`,
/// provided as a free function for symmetry with its sibling predicates.
pub fn is_cancelled_error(reason: &Reason) -> bool {
    reason.is_cancelled()
}

/// `true` if `reason.is_deadline_exceeded()` (spec §6's
/// `isDeadlineExceededError`).
pub fn is_deadline_exceeded_error(reason: &Reason) -> bool {
    reason.is_deadline_exceeded()
}

/// `true` if `reason.is_context_error()` (spec §6's `isContextError`).
pub fn is_context_error(reason: &Reason) -> bool {
    reason.is_context_error()
}
