//! `with_cancel` (spec §4.3): the simplest derived context, cancellable
//! only via the returned [`Canceller`] or by an ancestor cancelling first.

use crate::context::{new_child, Canceller, Context};

/// Derive a child of `parent` plus a function that cancels it.
///
/// The child inherits `parent`'s effective deadline unchanged (it does not
/// request one of its own) and is cancelled the moment `parent` is, in
/// addition to whenever the returned [`Canceller`] is invoked.
///
/// # Example
///
/// Requires the `test-util` feature (for [`TestHost`](crate::testing::TestHost));
/// any [`Host`](crate::Host) works the same way.
///
/// ```ignore
/// use ctx::{background, with_cancel};
/// use ctx::testing::TestHost;
///
/// let host = TestHost::new();
/// let root = background(host);
/// let (ctx, cancel) = with_cancel(&root);
/// assert!(ctx.error().is_none());
///
/// cancel.cancel();
/// assert!(ctx.error().unwrap().is_cancelled());
/// ```
pub fn with_cancel(parent: &Context) -> (Context, Canceller) {
    let deadline_at = parent.deadline();
    let child = new_child(parent, deadline_at, None);
    let canceller = Canceller::new(&child.0);
    (child, canceller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background;
    use crate::testing::TestHost;

    #[test]
    fn explicit_cancel_sets_reason() {
        let host = TestHost::new();
        let root = background(host);
        let (ctx, cancel) = with_cancel(&root);
        cancel.cancel();
        assert!(ctx.error().unwrap().is_context_error());
    }

    #[test]
    fn cancel_propagates_to_grandchild() {
        let host = TestHost::new();
        let root = background(host);
        let (parent, cancel) = with_cancel(&root);
        let (child, _) = with_cancel(&parent);

        cancel.cancel();

        assert_eq!(parent.error(), child.error());
        assert!(child.error().unwrap().is_cancelled());
    }

    #[test]
    fn repeated_cancel_is_idempotent() {
        let host = TestHost::new();
        let root = background(host);
        let (ctx, cancel) = with_cancel(&root);

        cancel.cancel_with_message("first");
        let first = ctx.error().unwrap();
        cancel.cancel_with_message("second");
        let second = ctx.error().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn cancel_with_cause_is_preserved() {
        let host = TestHost::new();
        let root = background(host);
        let (ctx, cancel) = with_cancel(&root);
        cancel.cancel_with_cause(Box::new(std::io::Error::other("disk gone")));

        let reason = ctx.error().unwrap();
        let source = std::error::Error::source(&reason).expect("cause preserved");
        assert_eq!(source.to_string(), "disk gone");
    }
}
