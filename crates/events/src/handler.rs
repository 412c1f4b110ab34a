use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use pm_domain::model::Event;
use pm_domain::trace::TraceEvent;

/// A subscriber callback. Receives an immutable borrow of the event.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Registration handle returned by every `subscribe*` call.
///
/// Dropping it removes the handler. Call [`detach`](Self::detach) to keep
/// the handler registered for the lifetime of the bus.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the handler now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Leave the handler registered and forget the handle.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Invoke each handler in order. A handler that errors or panics is logged
/// and skipped. Returns the number of handlers invoked.
pub(crate) fn deliver(handlers: &[Handler], event: &Event, scope: &str) -> usize {
    for handler in handlers {
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };
        tracing::warn!(
            kind = %event.kind,
            sequence = event.sequence,
            scope,
            error = %error,
            "event subscriber failed"
        );
        TraceEvent::SubscriberFailed {
            kind: event.kind.to_string(),
            sequence: event.sequence,
            scope: scope.to_owned(),
            error,
        }
        .emit();
    }
    handlers.len()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_owned()
    }
}
