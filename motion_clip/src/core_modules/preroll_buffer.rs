// THEORY:
// The `PrerollBuffer` is the only piece of mutable state shared between the
// ingestion loop (the single producer) and the active clip writer (the single
// consumer). It is a bounded FIFO with drop-oldest semantics: the producer never
// blocks, and when the buffer is full the oldest frame is silently evicted. While
// no clip is being written this keeps the last few seconds of footage around, so
// a new clip can begin with the moments *before* motion was recognized.
//
// Synchronization fabric:
// 1.  **One mutex** guards the queue. Every push, pop, and stop transition
//     happens under it.
// 2.  **One condition variable** wakes a consumer that is waiting for work. The
//     producer notifies after every append; a stop request notifies all waiters.
// 3.  **Stop flags** are owned per writer (`StopSignal`). A flag is only ever
//     raised while holding the buffer mutex, so a consumer that has just checked
//     it cannot miss the wake-up that follows.
// 4.  **Stop watermark**: raising a flag also records the index of the last frame
//     pushed so far. A stopped consumer takes frames up to that index and no
//     further; anything the producer appends afterwards stays in the buffer as
//     pre-roll for the next writer.
//
// Eviction may overtake a slow consumer. That is an accepted lossy trade-off; it
// is counted, never masked.

use crate::core_modules::frame::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Cooperative stop request for one clip writer.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: AtomicBool,
    /// Frames with an index at or above this one belong to whoever comes next.
    end_index: AtomicU64,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Whether a stopped consumer may still take `frame`.
    fn admits(&self, frame: &Frame) -> bool {
        !self.is_raised() || frame.index < self.end_index.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Queue {
    frames: VecDeque<Frame>,
    last_pushed: Option<u64>,
}

/// A bounded, drop-oldest frame queue shared by one producer and one consumer.
#[derive(Debug)]
pub struct PrerollBuffer {
    capacity: usize,
    queue: Mutex<Queue>,
    frame_ready: Condvar,
    evicted: AtomicU64,
}

impl PrerollBuffer {
    /// Creates a buffer holding at most `capacity` frames. A capacity of zero is
    /// raised to one so live frames can still pass through to a writer.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(Queue {
                frames: VecDeque::with_capacity(capacity),
                last_pushed: None,
            }),
            frame_ready: Condvar::new(),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Total number of frames dropped because the buffer was full.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Appends a frame and wakes the consumer. Returns the evicted frame, if any.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut queue = self.lock();
            let evicted = if queue.frames.len() >= self.capacity {
                queue.frames.pop_front()
            } else {
                None
            };
            queue.last_pushed = Some(frame.index);
            queue.frames.push_back(frame);
            evicted
        };
        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.frame_ready.notify_all();
        evicted
    }

    /// Pops the oldest frame without waiting.
    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().frames.pop_front()
    }

    /// Pops the oldest frame without waiting, unless `stop` no longer admits it.
    pub fn try_pop_for(&self, stop: &StopSignal) -> Option<Frame> {
        let mut queue = self.lock();
        let admitted = queue.frames.front().is_some_and(|frame| stop.admits(frame));
        if admitted { queue.frames.pop_front() } else { None }
    }

    /// Blocks until a frame is available or `stop` is raised.
    ///
    /// Once `stop` is raised, frames pushed before the stop are still handed
    /// out; `None` comes back when none of those are left.
    pub fn wait_pop(&self, stop: &StopSignal) -> Option<Frame> {
        let mut queue = self.lock();
        loop {
            let admitted = queue.frames.front().map(|frame| stop.admits(frame));
            match admitted {
                Some(true) => return queue.frames.pop_front(),
                Some(false) => return None,
                None if stop.is_raised() => return None,
                None => {}
            }
            queue = self
                .frame_ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Raises `stop` under the buffer mutex, pinning it to the frames pushed so
    /// far, and wakes every waiter.
    pub fn signal_stop(&self, stop: &StopSignal) {
        {
            let queue = self.lock();
            let end_index = queue.last_pushed.map_or(0, |index| index + 1);
            stop.end_index.store(end_index, Ordering::Release);
            stop.raised.store(true, Ordering::Release);
        }
        self.frame_ready.notify_all();
    }

    // A writer that panicked never holds the lock across user code, so the queue
    // is still consistent after poisoning.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
