//! External adapters (spec §1, §6): thin wiring that derives a [`Context`]
//! from some other cancellation or completion source, consuming only the
//! [`with_cancel`] contract - never reaching into the engine directly.
//!
//! These are "out of scope" in the sense spec §1 means: they are external
//! collaborators, not part of the context tree engine itself, and a host
//! application is free to write its own instead of using these.

use std::error::Error as StdError;
use std::rc::Rc;

use crate::abort::AbortSignal;
use crate::context::Context;
use crate::reason::Reason;
use crate::with_cancel::with_cancel;

/// Something that can register a one-shot listener for a named event and
/// later remove it - the minimal shape spec §6 describes as "register
/// once, remove listener".
pub trait EventSource {
    /// Register `listener` to run the next time `event` fires, passing
    /// along whatever string arguments the event carried. Returns a
    /// disposable that removes the registration if the event hasn't fired
    /// yet.
    fn once(
        &self,
        event: &str,
        listener: Box<dyn FnOnce(Vec<String>)>,
    ) -> Box<dyn crate::host::Disposable>;
}

/// Derive a context that cancels the moment any of `events` fires on
/// `source` (spec §6's emitter/event-source adapter).
///
/// `reason_factory` receives the event name and its arguments and returns
/// the message used to build the `Cancelled` reason.
pub fn with_event_source<S: EventSource>(
    parent: &Context,
    source: &S,
    events: &[&str],
    reason_factory: impl Fn(&str, &[String]) -> String + Clone + 'static,
) -> Context {
    let (child, canceller) = with_cancel(parent);
    for &event in events {
        let canceller = canceller.clone();
        let event_name = event.to_string();
        let reason_factory = reason_factory.clone();
        source.once(
            event,
            Box::new(move |args| {
                let message = reason_factory(&event_name, &args);
                canceller.cancel_with_message(message);
            }),
        );
    }
    child
}

/// Something with "on finish"/"on error" completion hooks - the minimal
/// shape spec §6's stream-completion adapter needs.
pub trait StreamLike {
    /// Register a listener to run once the stream finishes successfully.
    fn on_finish(&self, listener: Box<dyn FnOnce()>) -> Box<dyn crate::host::Disposable>;

    /// Register a listener to run once the stream errors out.
    fn on_error(
        &self,
        listener: Box<dyn FnOnce(Box<dyn StdError + 'static>)>,
    ) -> Box<dyn crate::host::Disposable>;
}

/// Derive a context that cancels when `stream` completes or errors (spec
/// §6's stream-completion adapter). An error is passed through as the
/// `Cancelled` reason's cause; a clean finish cancels with a fixed message.
pub fn with_stream_completion<S: StreamLike>(parent: &Context, stream: &S) -> Context {
    let (child, canceller) = with_cancel(parent);

    let finish_canceller = canceller.clone();
    stream.on_finish(Box::new(move || {
        finish_canceller.cancel_with_message("stream finished");
    }));

    let error_canceller = canceller.clone();
    stream.on_error(Box::new(move |err| {
        error_canceller.cancel_with_cause(err);
    }));

    child
}

/// Derive a context that cancels when `signal` aborts (spec §4.9's inverse
/// bridge: "AbortSignal → Context").
///
/// If `signal` is already aborted, the child is born cancelled, carrying
/// `signal`'s abort reason as the `Cancelled` reason's cause when the signal
/// didn't abort with a context reason of its own. Otherwise an `on_abort`
/// listener is attached and detached the moment the child cancels for any
/// other reason (an ancestor cancelling, for instance), matching spec §4.9's
/// "on context cancellation, detach the listener".
pub fn with_abort_signal(parent: &Context, signal: Rc<AbortSignal>) -> Context {
    let (child, canceller) = with_cancel(parent);

    if let Some(reason) = signal.reason() {
        canceller.cancel_with_cause(Box::new(reason));
        return child;
    }

    let abort_canceller = canceller.clone();
    let abort_disposable = signal.on_abort(move |reason| {
        abort_canceller.cancel_with_cause(Box::new(reason));
    });

    child.on_did_cancel(move |_reason| {
        abort_disposable.dispose();
    });

    child
}
