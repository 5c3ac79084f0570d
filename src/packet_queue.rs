//! Bounded FIFO of frames awaiting user-mode reads.
//!
//! The send path pushes from host-stack callback context and must never
//! block, so the queue is a lock-free bounded ring. This is a software queue
//! with no physical wire behind it: when it fills with no reader consuming,
//! frames are dropped and counted rather than backpressured.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use tracing::trace;

use crate::frame::QueuedFrame;

pub struct PacketQueue {
    queue: ArrayQueue<QueuedFrame>,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a frame. Returns false (and counts a drop) when full.
    pub fn push(&self, frame: QueuedFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(frame) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(len = frame.len(), "outbound queue full, dropping frame");
                false
            }
        }
    }

    /// Remove and return the oldest frame.
    pub fn pop(&self) -> Option<QueuedFrame> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything queued. Used by reset and halt.
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}
