use std::{
    collections::HashMap,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

use parking_lot::Mutex;

use crate::{
    inbox::{
        InvocationOutcome,
        ResponseSink,
    },
    metrics,
    types::CallId,
};

/// Pending remote calls: call id to the sink feeding the waiting invocation.
///
/// Ids come from a process-wide monotonic u64 starting at 1 and are never
/// reused within a process lifetime: wrapping the counter is outside
/// practical bounds (584 years at a billion allocations per second), and
/// aliasing would additionally require the colliding allocations to straddle
/// a full cluster restart.
pub struct CallRegistry {
    next_call_id: AtomicU64,
    calls: Mutex<HashMap<CallId, ResponseSink>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            next_call_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id and register `sink` to receive its response.
    pub fn register(&self, sink: ResponseSink) -> CallId {
        let call_id = CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed));
        let pending = {
            let mut calls = self.calls.lock();
            calls.insert(call_id, sink);
            calls.len()
        };
        metrics::log_pending_calls(pending);
        call_id
    }

    /// Deliver a response to the registered invocation, removing the entry.
    /// False if the id is unknown, e.g. a late response for an abandoned
    /// call.
    pub fn route(&self, call_id: CallId, outcome: InvocationOutcome) -> bool {
        let (sink, pending) = {
            let mut calls = self.calls.lock();
            (calls.remove(&call_id), calls.len())
        };
        metrics::log_pending_calls(pending);
        match sink {
            Some(sink) => {
                // Delivery must not block on consumer code; the sink send is
                // non-blocking.
                sink.deliver(outcome);
                true
            },
            None => false,
        }
    }

    /// Remove an entry without delivering anything. Called by the owning
    /// invocation when it reaches a terminal state.
    pub fn deregister(&self, call_id: CallId) {
        let pending = {
            let mut calls = self.calls.lock();
            calls.remove(&call_id);
            calls.len()
        };
        metrics::log_pending_calls(pending);
    }

    /// Remove and return every entry, e.g. to fail them out on shutdown.
    pub fn drain(&self) -> Vec<(CallId, ResponseSink)> {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        metrics::log_pending_calls(0);
        drained
    }

    pub fn pending(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::CallRegistry;
    use crate::{
        inbox::response_channel,
        types::CallId,
    };

    #[test]
    fn test_register_allocates_unique_ids() {
        let registry = CallRegistry::new();
        let (sink, _inbox) = response_channel();
        let a = registry.register(sink.clone());
        let b = registry.register(sink);
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(registry.pending(), 2);
    }

    #[test]
    fn test_route_delivers_and_removes() {
        let registry = CallRegistry::new();
        let (sink, mut inbox) = response_channel();
        let call_id = registry.register(sink);
        assert!(registry.route(call_id, Ok(Some("pong".into()))));
        assert_eq!(registry.pending(), 0);
        let outcome = inbox.try_next();
        assert!(matches!(outcome, Some(Ok(Some(v))) if v == "pong"));
        // A duplicate response for the same id has nowhere to go.
        assert!(!registry.route(call_id, Ok(None)));
    }

    #[test]
    fn test_route_unknown_id_is_noop() {
        let registry = CallRegistry::new();
        assert!(!registry.route(CallId(42), Ok(None)));
    }

    #[test]
    fn test_drain_empties_the_registry() {
        let registry = CallRegistry::new();
        let (sink, _inbox) = response_channel();
        registry.register(sink.clone());
        registry.register(sink);
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.pending(), 0);
    }
}
