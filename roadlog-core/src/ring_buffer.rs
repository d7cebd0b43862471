//! Fixed-capacity circular store of motion magnitudes
//!
//! The sample path appends one value per conditioned sample while a display
//! consumer reads the most recent values. All state lives behind a single
//! mutex so every `append` and `value` call is one critical section.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Ring buffer shared between the sample writer and display readers
pub type SharedRingBuffer = Arc<RingBuffer>;

#[derive(Debug)]
struct Slots {
    data: Box<[f64]>,
    /// Index of the most recently written slot, `None` before the first append
    end: Option<usize>,
    overflowed: bool,
}

/// Circular buffer that overwrites its oldest value once full.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` values.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "ring buffer capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            slots: Mutex::new(Slots {
                data: vec![0.0; capacity].into_boxed_slice(),
                end: None,
                overflowed: false,
            }),
            capacity,
        })
    }

    /// Create a buffer already wrapped for sharing.
    pub fn shared(capacity: usize) -> Result<SharedRingBuffer> {
        Self::new(capacity).map(Arc::new)
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slot writes cannot panic mid-update, so a poisoned guard still holds consistent data.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `value` as the newest entry.
    pub fn append(&self, value: f64) {
        let mut slots = self.lock();
        let next = match slots.end {
            None => 0,
            Some(end) if end + 1 == self.capacity => {
                slots.overflowed = true;
                0
            }
            Some(end) => end + 1,
        };
        slots.data[next] = value;
        slots.end = Some(next);
    }

    /// Number of valid entries.
    pub fn actual_size(&self) -> usize {
        let slots = self.lock();
        Self::size_of(&slots, self.capacity)
    }

    fn size_of(slots: &Slots, capacity: usize) -> usize {
        if slots.overflowed {
            capacity
        } else {
            slots.end.map_or(0, |end| end + 1)
        }
    }

    /// True once the buffer has wrapped at least once.
    pub fn overflowed(&self) -> bool {
        self.lock().overflowed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The `index`-th most recent value (0 = newest).
    pub fn value(&self, index: usize) -> Result<f64> {
        let slots = self.lock();
        let size = Self::size_of(&slots, self.capacity);
        match slots.end {
            Some(end) if index < size => {
                let slot = (end + self.capacity - index) % self.capacity;
                Ok(slots.data[slot])
            }
            _ => Err(Error::IndexOutOfRange { index, size }),
        }
    }

    /// Copy of all valid entries, newest first.
    pub fn snapshot(&self) -> Vec<f64> {
        let slots = self.lock();
        let size = Self::size_of(&slots, self.capacity);
        let Some(end) = slots.end else {
            return Vec::new();
        };
        (0..size)
            .map(|i| slots.data[(end + self.capacity - i) % self.capacity])
            .collect()
    }
}

#[derive(Debug, Default)]
struct SignalState {
    generation: u64,
    closed: bool,
}

/// Edge-triggered wake-up for consumers waiting on new appends.
///
/// The writer calls [`AppendSignal::notify`] after each append. A consumer
/// remembers the last generation it rendered and blocks in
/// [`AppendSignal::wait_newer`] until the writer moves past it.
#[derive(Debug, Default)]
pub struct AppendSignal {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl AppendSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance the generation and wake every waiter.
    pub fn notify(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Current generation without waiting.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Block until the generation differs from `last_seen`.
    ///
    /// Returns the new generation, or `None` on timeout. Once [`close`](Self::close)
    /// has been called, returns `None` as soon as the caller has caught up.
    pub fn wait_newer(&self, last_seen: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.generation != last_seen {
                return Some(state.generation);
            }
            if state.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
    }

    /// Wake all waiters permanently for shutdown.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
