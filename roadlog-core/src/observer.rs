//! Motion and session notifications
//!
//! Observers register with an [`ObserverRegistry`] and receive every
//! published notification exactly once. Observers are called without any
//! registry lock held, so a callback may register or deregister observers.
//! Such changes are queued and applied once the current fan-out finishes.

use crate::ring_buffer::SharedRingBuffer;
use crate::types::{Location, RecordingSession};
use std::sync::{Arc, Mutex, MutexGuard};

/// Payload of a "motion changed" notification.
#[derive(Debug, Clone)]
pub struct MotionUpdate {
    pub magnitude: f64,
    /// Handle to the display buffer the magnitude was appended to
    pub buffer: SharedRingBuffer,
    /// Location snapshot used for this sample, if a fix is known
    pub location: Option<Location>,
    pub timestamp_ms: i64,
}

/// Receiver of pipeline notifications. Every hook defaults to a no-op.
pub trait MotionObserver: Send + Sync {
    fn on_motion(&self, _update: &MotionUpdate) {}

    fn on_session_started(&self, _session: &RecordingSession) {}

    fn on_session_closed(&self, _session: &RecordingSession) {}
}

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

enum PendingChange {
    Register(ObserverId, Arc<dyn MotionObserver>),
    Deregister(ObserverId),
}

#[derive(Default)]
struct Registry {
    observers: Vec<(ObserverId, Arc<dyn MotionObserver>)>,
    pending: Vec<PendingChange>,
    /// Number of fan-outs currently running
    dispatching: usize,
    next_id: u64,
}

impl Registry {
    fn apply(&mut self, change: PendingChange) {
        match change {
            PendingChange::Register(id, observer) => self.observers.push((id, observer)),
            PendingChange::Deregister(id) => self.observers.retain(|(other, _)| *other != id),
        }
    }

    fn flush_pending(&mut self) {
        for change in std::mem::take(&mut self.pending) {
            self.apply(change);
        }
    }
}

/// Registered observers plus changes deferred by an in-progress fan-out.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Registry>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ObserverRegistry")
            .field("observers", &inner.observers.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an observer. Takes effect after any running fan-out completes.
    pub fn register(&self, observer: Arc<dyn MotionObserver>) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        let change = PendingChange::Register(id, observer);
        if inner.dispatching > 0 {
            inner.pending.push(change);
        } else {
            inner.apply(change);
        }
        id
    }

    /// Remove an observer. Takes effect after any running fan-out completes.
    pub fn deregister(&self, id: ObserverId) {
        let mut inner = self.lock();
        let change = PendingChange::Deregister(id);
        if inner.dispatching > 0 {
            inner.pending.push(change);
        } else {
            inner.apply(change);
        }
    }

    /// Number of active observers (pending changes excluded).
    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish_motion(&self, update: &MotionUpdate) {
        self.dispatch(|observer| observer.on_motion(update));
    }

    pub fn publish_session_started(&self, session: &RecordingSession) {
        self.dispatch(|observer| observer.on_session_started(session));
    }

    pub fn publish_session_closed(&self, session: &RecordingSession) {
        self.dispatch(|observer| observer.on_session_closed(session));
    }

    fn dispatch(&self, notify: impl Fn(&dyn MotionObserver)) {
        let snapshot: Vec<Arc<dyn MotionObserver>> = {
            let mut inner = self.lock();
            inner.dispatching += 1;
            inner.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };

        let _done = DispatchGuard { registry: self };
        for observer in &snapshot {
            notify(observer.as_ref());
        }
    }
}

/// Ends a fan-out, applying queued changes once the outermost one returns.
struct DispatchGuard<'a> {
    registry: &'a ObserverRegistry,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.registry.lock();
        inner.dispatching -= 1;
        if inner.dispatching == 0 {
            inner.flush_pending();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::RingBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    #[derive(Default)]
    struct Counter {
        motions: AtomicUsize,
    }

    impl MotionObserver for Counter {
        fn on_motion(&self, _update: &MotionUpdate) {
            self.motions.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn update() -> MotionUpdate {
        MotionUpdate {
            magnitude: 1.0,
            buffer: RingBuffer::shared(4).unwrap(),
            location: None,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_each_observer_notified_once() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        registry.register(a.clone());
        registry.register(b.clone());

        registry.publish_motion(&update());

        assert_eq!(a.motions.load(Ordering::SeqCst), 1);
        assert_eq!(b.motions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deregister_stops_notifications() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Counter::default());
        let id = registry.register(a.clone());
        registry.publish_motion(&update());
        registry.deregister(id);
        registry.publish_motion(&update());
        assert_eq!(a.motions.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    /// Deregisters itself from inside its own callback.
    struct SelfRemoving {
        registry: Arc<ObserverRegistry>,
        id: OnceLock<ObserverId>,
        calls: AtomicUsize,
    }

    impl MotionObserver for SelfRemoving {
        fn on_motion(&self, _update: &MotionUpdate) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = self.id.get() {
                self.registry.deregister(*id);
            }
        }
    }

    #[test]
    fn test_deregister_during_fanout_is_deferred() {
        let registry = Arc::new(ObserverRegistry::new());
        let remover = Arc::new(SelfRemoving {
            registry: Arc::clone(&registry),
            id: OnceLock::new(),
            calls: AtomicUsize::new(0),
        });
        let id = registry.register(remover.clone());
        remover.id.set(id).unwrap();
        let other = Arc::new(Counter::default());
        registry.register(other.clone());

        registry.publish_motion(&update());

        // Both observers saw the event the removal happened in
        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.motions.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);

        registry.publish_motion(&update());
        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.motions.load(Ordering::SeqCst), 2);
    }

    /// Registers a new counter on every callback.
    struct Spawner {
        registry: Arc<ObserverRegistry>,
        spawned: Mutex<Vec<Arc<Counter>>>,
    }

    impl MotionObserver for Spawner {
        fn on_motion(&self, _update: &MotionUpdate) {
            let counter = Arc::new(Counter::default());
            self.registry.register(counter.clone());
            self.spawned.lock().unwrap().push(counter);
        }
    }

    #[test]
    fn test_register_during_fanout_misses_current_event() {
        let registry = Arc::new(ObserverRegistry::new());
        let spawner = Arc::new(Spawner {
            registry: Arc::clone(&registry),
            spawned: Mutex::new(Vec::new()),
        });
        registry.register(spawner.clone());

        registry.publish_motion(&update());
        assert_eq!(registry.len(), 2);
        let first = spawner.spawned.lock().unwrap()[0].clone();
        assert_eq!(first.motions.load(Ordering::SeqCst), 0);

        registry.publish_motion(&update());
        assert_eq!(first.motions.load(Ordering::SeqCst), 1);
    }
}
