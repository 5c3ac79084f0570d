//! Per-adapter frame and byte counters.
//!
//! Updated lock-free by the translation engine, read externally as a
//! snapshot. "tx" counts frames the host stack sent toward user-mode,
//! "rx" counts frames user-mode injected toward the host stack.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::FrameClass;

#[derive(Debug, Default)]
pub struct AdapterStats {
    tx_directed_frames: AtomicU64,
    tx_broadcast_frames: AtomicU64,
    tx_multicast_frames: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,

    rx_directed_frames: AtomicU64,
    rx_broadcast_frames: AtomicU64,
    rx_multicast_frames: AtomicU64,
    rx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
}

impl AdapterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tx(&self, class: FrameClass, len: usize) {
        match class {
            FrameClass::Directed => &self.tx_directed_frames,
            FrameClass::Broadcast => &self.tx_broadcast_frames,
            FrameClass::Multicast => &self.tx_multicast_frames,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_tx_drop(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rx(&self, class: FrameClass, len: usize) {
        match class {
            FrameClass::Directed => &self.rx_directed_frames,
            FrameClass::Broadcast => &self.rx_broadcast_frames,
            FrameClass::Multicast => &self.rx_multicast_frames,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_rx_drop(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_directed_frames: self.tx_directed_frames.load(Ordering::Relaxed),
            tx_broadcast_frames: self.tx_broadcast_frames.load(Ordering::Relaxed),
            tx_multicast_frames: self.tx_multicast_frames.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            rx_directed_frames: self.rx_directed_frames.load(Ordering::Relaxed),
            rx_broadcast_frames: self.rx_broadcast_frames.load(Ordering::Relaxed),
            rx_multicast_frames: self.rx_multicast_frames.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tx_directed_frames: u64,
    pub tx_broadcast_frames: u64,
    pub tx_multicast_frames: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub rx_directed_frames: u64,
    pub rx_broadcast_frames: u64,
    pub rx_multicast_frames: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
}

impl StatsSnapshot {
    pub fn tx_frames(&self) -> u64 {
        self.tx_directed_frames + self.tx_broadcast_frames + self.tx_multicast_frames
    }

    pub fn rx_frames(&self) -> u64 {
        self.rx_directed_frames + self.rx_broadcast_frames + self.rx_multicast_frames
    }
}
