//! `with_value` (spec §4.3, §4.7): a derived context carrying a single
//! additional key/value binding, looked up by [`Key`] identity rather than
//! by type (see `key.rs` for why that distinction matters).

use crate::context::{new_child, Context};
use crate::key::Key;

/// Derive a child of `parent` binding `key` to `value`.
///
/// The child shares `parent`'s cancellation and deadline exactly as
/// [`with_cancel`](crate::with_cancel) would, plus this one extra slot.
/// Unlike `with_cancel`/`with_deadline`, there is no [`Canceller`]
/// (crate::Canceller) to return - a value-only context cannot be cancelled
/// except through an ancestor.
///
/// # Example
///
/// Requires the `test-util` feature (for [`TestHost`](crate::testing::TestHost));
/// any [`Host`](crate::Host) works the same way.
///
/// ```ignore
/// use ctx::{background, with_value, Key};
/// use ctx::testing::TestHost;
///
/// let root = background(TestHost::new());
/// let k: Key<&'static str> = Key::new();
/// let child = with_value(&root, k, "request-id");
/// assert_eq!(child.get_value(k), Some("request-id"));
/// assert!(!root.has_value(k));
/// ```
pub fn with_value<T: 'static>(parent: &Context, key: Key<T>, value: T) -> Context {
    let deadline_at = parent.deadline();
    new_child(
        parent,
        deadline_at,
        Some((key.id(), Box::new(value) as Box<dyn std::any::Any>)),
    )
}
