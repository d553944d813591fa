//! The literal end-to-end scenarios from spec §8 (S1-S6), run against the
//! deterministic [`TestHost`] rather than real wall-clock time.

use std::cell::RefCell;
use std::rc::Rc;

use ctx::testing::TestHost;
use ctx::{background, is_context_error, with_abort_signal, with_cancel, with_timeout, with_value, Key};

/// S1 - Explicit cancel propagates.
#[test]
fn s1_explicit_cancel_propagates() {
    let host = TestHost::new();
    let root = background(host);
    let (c, cancel) = with_cancel(&root);
    let (cc, _) = with_cancel(&c);

    cancel.cancel();

    let c_reason = c.error().unwrap();
    let cc_reason = cc.error().unwrap();
    assert_eq!(c_reason, cc_reason);
    assert!(is_context_error(&c_reason));
}

/// S2 - Deadline fires without a timer.
#[test]
fn s2_deadline_fires_without_timer() {
    let host = TestHost::new();
    let root = background(host.clone());
    let (c, _) = with_timeout(&root, 1);

    host.advance_without_firing(1);

    assert!(c.error().unwrap().is_deadline_exceeded());
}

/// S3 - Child deadline clamped to parent.
#[test]
fn s3_child_deadline_clamped_to_parent() {
    let host = TestHost::new();
    let root = background(host.clone());
    let (c, _) = with_timeout(&root, 1);
    let (cc, _) = with_timeout(&c, 3);

    host.advance(1);

    let c_reason = c.error().unwrap();
    let cc_reason = cc.error().unwrap();
    assert_eq!(c_reason, cc_reason);
    assert!(c_reason.is_deadline_exceeded());
}

/// S4 - Aggregate on multiple listener errors.
#[test]
fn s4_aggregate_on_multiple_listener_errors() {
    let host = TestHost::new();
    let root = background(host.clone());
    let (c, cancel) = with_cancel(&root);

    c.on_did_cancel(|_| panic!("E"));
    c.on_did_cancel(|_| panic!("E"));

    cancel.cancel();

    let uncaught = host.uncaught_exceptions();
    assert_eq!(uncaught.len(), 1);
    assert!(uncaught[0].contains("2 listener"));
}

/// S5 - Value shadowing.
#[test]
fn s5_value_shadowing() {
    let host = TestHost::new();
    let root = background(host);
    let k: Key<&'static str> = Key::new();

    let c = with_value(&root, k, "v");
    let g = with_value(&c, k, "V");

    assert!(!root.has_value(k));
    assert_eq!(c.get_value(k), Some("v"));
    assert_eq!(g.get_value(k), Some("V"));
}

/// S6 - Abort-signal round trip.
#[test]
fn s6_abort_signal_round_trip() {
    let host = TestHost::new();
    let root = background(host);
    let controller = ctx::AbortController::new();
    let signal = controller.signal();

    let ctx = with_abort_signal(&root, signal);

    let heard = Rc::new(RefCell::new(None));
    let h = Rc::clone(&heard);
    ctx.on_did_cancel(move |reason| *h.borrow_mut() = Some(reason));

    controller.abort(ctx::Reason::cancelled(Some("stop".into()), None));

    let reason = ctx.error().unwrap();
    assert!(is_context_error(&reason));
    assert!(ctx.signal().aborted());
    assert_eq!(*heard.borrow(), Some(reason));
}
