//! Routes inbound envelopes to typed handlers registered per event kind

use crate::error::HandlerError;
use log::{debug, error, trace, warn};
use shared::{Envelope, EventKind, EventPayload, ServerEvent};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub type HandlerResult = Result<(), HandlerError>;

type BoxedHandler<S> = Box<dyn FnMut(&mut S, &ServerEvent) -> HandlerResult + Send>;

/// Token returned by registration, used to deregister a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The type is not one this client understands.
    Unknown,
    /// Known type with nobody listening.
    Unhandled,
    /// Known type whose payload failed to decode.
    Malformed,
    Delivered { handlers: usize, failures: usize },
}

/// Handler table keyed by event kind. Handlers run in registration order.
pub struct Dispatcher<S> {
    handlers: HashMap<EventKind, Vec<(HandlerId, BoxedHandler<S>)>>,
    next_id: u64,
}

impl<S> Dispatcher<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a handler for the event kind carrying payload `P`.
    pub fn on<P, F>(&mut self, mut handler: F) -> HandlerId
    where
        P: EventPayload + 'static,
        F: FnMut(&mut S, &P) -> HandlerResult + Send + 'static,
    {
        self.on_event(P::KIND, move |state, event| match P::from_event(event) {
            Some(payload) => handler(state, payload),
            None => Ok(()),
        })
    }

    pub fn on_event<F>(&mut self, kind: EventKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut S, &ServerEvent) -> HandlerResult + Send + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        debug!("Registered handler {:?} for {}", id, kind);
        id
    }

    /// Returns false if `id` was not registered under `kind`.
    pub fn off(&mut self, kind: EventKind, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decodes `envelope` once and hands the payload to every handler for its kind.
    ///
    /// A handler that fails or panics is logged and skipped; the rest still run.
    pub fn dispatch(&mut self, envelope: &Envelope, state: &mut S) -> DispatchOutcome {
        let Some(kind) = EventKind::from_wire(&envelope.kind) else {
            trace!("Ignoring unknown event type {:?}", envelope.kind);
            return DispatchOutcome::Unknown;
        };

        let Some(list) = self.handlers.get_mut(&kind) else {
            trace!("No handlers for {}", kind);
            return DispatchOutcome::Unhandled;
        };

        let event = match ServerEvent::decode_as(kind, envelope.data.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping {} event: {}", kind, e);
                return DispatchOutcome::Malformed;
            }
        };

        let mut failures = 0;
        for (id, handler) in list.iter_mut() {
            let result = match catch_unwind(AssertUnwindSafe(|| handler(state, &event))) {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
            };

            if let Err(e) = result {
                failures += 1;
                error!("Handler {:?} for {} failed: {}", id, kind, e);
            }
        }

        DispatchOutcome::Delivered {
            handlers: list.len(),
            failures,
        }
    }
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
