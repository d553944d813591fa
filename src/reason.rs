//! The tagged cancellation reasons a [`Context`](crate::Context) can carry.
//!
//! A [`Reason`] is a cheap, `Rc`-backed handle. Cloning it never copies the
//! underlying error data, so two reads of the same context's reason compare
//! equal by identity (`I1` in the design notes) rather than by structural
//! equality - exactly mirroring the "reads always return the same reference"
//! requirement.

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

/// Why a [`Context`](crate::Context) was cancelled.
///
/// Cheap to clone; clones share the same underlying data and compare equal
/// by identity via [`PartialEq`].
#[derive(Clone)]
pub struct Reason(Rc<ReasonKind>);

/// The tagged shapes a [`Reason`] can take.
#[derive(Debug, thiserror::Error)]
pub enum ReasonKind {
    /// Produced by an explicit `cancel()` call.
    #[error("context canceled{}", fmt_cancelled_suffix(.message))]
    Cancelled {
        /// Optional human-readable message supplied to `cancel()`.
        message: Option<String>,
        /// Optional underlying cause, preserved unchanged (see design notes
        /// on cause chaining).
        #[source]
        cause: Option<Box<dyn StdError + 'static>>,
    },

    /// Produced when a deadline elapses, either via a host timer or a lazy
    /// re-check performed by [`error()`](crate::Context::error).
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Carries more than one underlying error collected during a single
    /// listener-notification cycle (spec §4.4 step 4). The inner errors are
    /// whatever a listener callback returned as its failure - not
    /// necessarily context [`Reason`]s themselves.
    #[error("{} listener callback(s) failed during cancellation", .0.len())]
    Aggregate(Vec<Box<dyn StdError + 'static>>),
}

fn fmt_cancelled_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl Reason {
    /// Build a `Cancelled` reason with an optional message and cause.
    pub fn cancelled(message: Option<String>, cause: Option<Box<dyn StdError + 'static>>) -> Self {
        Reason(Rc::new(ReasonKind::Cancelled { message, cause }))
    }

    /// Build a `DeadlineExceeded` reason.
    pub fn deadline_exceeded() -> Self {
        Reason(Rc::new(ReasonKind::DeadlineExceeded))
    }

    /// Build an `Aggregate` reason wrapping one or more underlying errors.
    ///
    /// Panics if `errors` is empty - spec §4.2 requires a nonempty sequence.
    pub fn aggregate(errors: Vec<Box<dyn StdError + 'static>>) -> Self {
        assert!(
            !errors.is_empty(),
            "Reason::aggregate requires at least one underlying error"
        );
        Reason(Rc::new(ReasonKind::Aggregate(errors)))
    }

    /// Access the underlying tagged shape.
    pub fn kind(&self) -> &ReasonKind {
        &self.0
    }

    /// `true` for the `Cancelled` variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.0, ReasonKind::Cancelled { .. })
    }

    /// `true` for the `DeadlineExceeded` variant.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(*self.0, ReasonKind::DeadlineExceeded)
    }

    /// `true` for the `Aggregate` variant.
    pub fn is_aggregate(&self) -> bool {
        matches!(*self.0, ReasonKind::Aggregate(_))
    }

    /// `is_cancelled() || is_deadline_exceeded()`.
    pub fn is_context_error(&self) -> bool {
        self.is_cancelled() || self.is_deadline_exceeded()
    }
}

impl PartialEq for Reason {
    /// Reasons compare by identity, not by structural equality: two
    /// independently constructed `Cancelled { message: None, cause: None }`
    /// reasons are *not* equal, matching spec invariant I1.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Reason {}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for Reason {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_structural_equality() {
        let a = Reason::cancelled(None, None);
        let b = Reason::cancelled(None, None);
        assert_ne!(a, b, "independently built reasons must not compare equal");
        assert_eq!(a.clone(), a, "a clone shares identity with its source");
    }

    #[test]
    fn predicates() {
        let c = Reason::cancelled(Some("bye".into()), None);
        assert!(c.is_cancelled());
        assert!(!c.is_deadline_exceeded());
        assert!(c.is_context_error());

        let d = Reason::deadline_exceeded();
        assert!(d.is_deadline_exceeded());
        assert!(d.is_context_error());
        assert!(!d.is_cancelled());

        let agg = Reason::aggregate(vec![Box::new(c), Box::new(d)]);
        assert!(agg.is_aggregate());
        assert!(!agg.is_context_error());
    }

    #[test]
    fn display_includes_message() {
        let c = Reason::cancelled(Some("shutting down".into()), None);
        assert_eq!(c.to_string(), "context canceled: shutting down");
    }

    #[test]
    #[should_panic]
    fn aggregate_requires_nonempty() {
        Reason::aggregate(vec![]);
    }
}
