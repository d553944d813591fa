//! Typed, identity-compared keys for [`with_value`](crate::with_value).
//!
//! Spec §4.7 requires key lookup "by identity comparison": two keys that
//! merely look alike (same name, same type) must not collide. The teacher
//! crate's `with_value.rs` used `Any::downcast_ref::<T>()` keyed purely by
//! *type*, which its own doc comment warns collides whenever two ancestors
//! bind values of the same type - "having values of the same data type
//! among the ancestors would always return the first hit". `Key<T>` closes
//! that gap: each call to [`Key::new`] mints a process-unique token, so two
//! `Key<String>`s are never confused with each other even though they share
//! a type.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static NEXT_KEY_ID: Cell<u64> = const { Cell::new(0) };
}

/// A unique, typed handle used to bind and look up a value on a
/// [`Context`](crate::Context) chain.
///
/// `Key<T>` is cheap (one `u64`), `Copy`, and compares by the identity of
/// the [`Key::new`] call that produced it - not by `T` or by any name.
pub struct Key<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Mint a fresh key, distinct from every other key ever created.
    pub fn new() -> Self {
        let id = NEXT_KEY_ID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            id
        });
        Key {
            id,
            _marker: PhantomData,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Key<T> {}

impl<T> std::fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("id", &self.id).finish()
    }
}

impl<T> Default for Key<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keys_of_same_type_are_not_equal() {
        let a: Key<String> = Key::new();
        let b: Key<String> = Key::new();
        assert_ne!(a, b);
    }

    #[test]
    fn a_key_equals_its_copy() {
        let a: Key<i32> = Key::new();
        let b = a;
        assert_eq!(a, b);
    }
}
