//! # Background Workers
//!
//! The only threads besides the tick thread.
//!
//! ```text
//!   tick thread ──push──> [WorkQueue] ──drain──> worker thread
//!        ^                                            │
//!        └────────drain── [WorkQueue] <──push─────────┘
//! ```
//!
//! Workers never touch entity or filter state. Results come back through a
//! queue the tick thread drains when it is ready.

mod decoder;
mod recorder;

pub use decoder::{Decoded, DecoderStats, InboundDecoder};
pub use recorder::{read_recording, replay_recording, FrameRecorder, RecorderStats};

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Bounded lock-guarded queue shared with one worker.
#[derive(Debug)]
pub(crate) struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    max_size: usize,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            max_size: max_size.max(1),
        }
    }

    /// Appends an item, handing it back when the queue is full.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.max_size {
            return Err(item);
        }
        items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes everything queued, waiting up to `timeout` for the first item.
    pub(crate) fn drain_wait(&self, timeout: Duration) -> Vec<T> {
        let mut items = self.items.lock();
        if items.is_empty() && !timeout.is_zero() {
            self.not_empty.wait_for(&mut items, timeout);
        }
        items.drain(..).collect()
    }

    /// Takes everything queued without waiting.
    pub(crate) fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Wakes a waiting worker.
    pub(crate) fn wake(&self) {
        let _items = self.items.lock();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_backpressure() {
        let queue = WorkQueue::new(2);
        assert!(queue.push(1).is_ok());
        assert!(queue.push(2).is_ok());
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.drain(), vec![1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_drain_wait_times_out_empty() {
        let queue: WorkQueue<u8> = WorkQueue::new(4);
        assert!(queue.drain_wait(Duration::from_millis(5)).is_empty());
    }
}
