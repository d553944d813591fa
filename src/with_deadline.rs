//! `with_deadline` / `with_timeout` (spec §4.3): a derived context with a
//! deadline clamped to its parent's (invariant I2), enforced by a host
//! timer when that clamping makes the child's deadline strictly sooner.

use crate::context::{new_child, Canceller, Context};
use crate::reason::Reason;

/// Derive a child of `parent` whose effective deadline is
/// `min(parent.deadline(), epoch_ms)` (invariant I2).
///
/// If the effective deadline is strictly sooner than `parent`'s own
/// deadline (or `parent` has none), a host timer is scheduled to cancel the
/// child with [`Reason::deadline_exceeded`] at that instant; the timer is
/// disposed as soon as the child is cancelled for any reason at all - by
/// that timer, an ancestor, or the returned [`Canceller`] (spec §4.3, §5).
/// When the effective deadline merely equals the parent's, no timer is
/// scheduled: the parent's own timer (or its ancestor's) will cascade down
/// to this child through the ordinary parent-cancellation listener.
pub fn with_deadline(parent: &Context, epoch_ms: u64) -> (Context, Canceller) {
    let effective = match parent.deadline() {
        Some(parent_deadline) => parent_deadline.min(epoch_ms),
        None => epoch_ms,
    };
    let needs_own_timer = match parent.deadline() {
        Some(parent_deadline) => effective < parent_deadline,
        None => true,
    };

    let child = new_child(parent, Some(effective), None);
    let canceller = Canceller::new(&child.0);

    if needs_own_timer && child.error().is_none() {
        let host = child.host_handle();
        let now = host.now_ms();
        let delay_ms = effective.saturating_sub(now);
        let weak = child.weak_inner();
        let timer = host.schedule_timeout(
            delay_ms,
            Box::new(move || {
                if let Some(target) = weak.upgrade() {
                    Context(target).cancel_internal(Reason::deadline_exceeded());
                }
            }),
        );
        child.set_deadline_timer(timer);
    }

    (child, canceller)
}

/// `with_deadline(parent, parent's host's current time + timeout_ms)`
/// (spec §4.3).
pub fn with_timeout(parent: &Context, timeout_ms: u64) -> (Context, Canceller) {
    let epoch_ms = parent.host_handle().now_ms() + timeout_ms;
    with_deadline(parent, epoch_ms)
}
