//! Host-stack send path: frames travelling toward user-mode.
//!
//! A send hands the engine a batch of scattered frames whose backing buffers
//! the caller reclaims as soon as the call returns, so every accepted frame
//! is flattened into an owned copy before queueing. The path never blocks:
//! it validates, copies, enqueues and pairs queued frames with any reads
//! already waiting.

use tracing::trace;

use crate::adapter::TapAdapter;
use crate::constants::{ETHERNET_HEADER_SIZE, IP_HEADER_SIZE, VLAN_TAG_SIZE};
use crate::error::{TapError, TapResult};
use crate::frame::{FrameClass, QueuedFrame, ScatterFrame};

/// Smallest frame the send path accepts: an Ethernet header plus a minimal
/// IP header.
pub const MIN_SEND_FRAME: usize = ETHERNET_HEADER_SIZE + IP_HEADER_SIZE;

impl TapAdapter {
    /// Accept a batch of outbound frames from the host stack.
    ///
    /// The batch succeeds or fails as a unit: a single malformed frame
    /// rejects every frame in it, and nothing is queued. When the data path
    /// is not admitting (or no device handle is open) the frames are
    /// silently discarded and the call still reports success; a virtual wire
    /// with nobody listening behaves like a real wire with no cable plugged
    /// in, and the host stack keeps its interface up.
    pub fn transmit(&self, batch: &[ScatterFrame]) -> TapResult<()> {
        // Admission and queueing share the control lock so a halt or reset
        // that flushes the queue cannot interleave with an admitted batch
        // still being pushed.
        let inner = self.inner.lock();
        if !Self::admit_locked(&inner).is_ready() || !self.is_device_open() {
            drop(inner);
            for _ in batch {
                self.stats.record_tx_drop();
            }
            trace!(frames = batch.len(), "send path closed, discarding batch");
            return Ok(());
        }

        let max_len = ETHERNET_HEADER_SIZE + VLAN_TAG_SIZE + inner.mtu;

        // Validation pass first. No frame is queued until every frame in
        // the batch has been checked.
        for frame in batch {
            let len = frame.len();
            if len < MIN_SEND_FRAME {
                return Err(TapError::FrameTooShort {
                    len,
                    min: MIN_SEND_FRAME,
                });
            }
            if len > max_len {
                return Err(TapError::FrameTooLarge { len, max: max_len });
            }
        }

        let tun = inner.tun.is_some();

        for frame in batch {
            // dst_mac cannot fail: the validation pass guaranteed at least
            // a full Ethernet header.
            let Some(dst) = frame.dst_mac() else {
                debug_assert!(false, "validated frame shorter than a MAC address");
                continue;
            };
            let class = FrameClass::of(&dst);
            let data = frame.flatten();
            let len = data.len();

            let payload = if tun {
                // User-mode sees bare IP packets in TUN mode; only IP
                // traffic crosses, everything else stops at the adapter.
                let ethertype = u16::from_be_bytes([data[12], data[13]]);
                if ethertype != crate::constants::ETHERTYPE_IPV4
                    && ethertype != crate::constants::ETHERTYPE_IPV6
                {
                    self.stats.record_tx_drop();
                    continue;
                }
                data[ETHERNET_HEADER_SIZE..].to_vec()
            } else {
                data
            };

            if self.packet_queue.push(QueuedFrame::new(payload, class)) {
                self.stats.record_tx(class, len);
            } else {
                self.stats.record_tx_drop();
            }
        }
        drop(inner);

        self.service_waiting_readers();
        Ok(())
    }

    /// Pair queued frames with reads parked in the pending queue, oldest
    /// first. Safe to call from any context; each pairing removes both the
    /// read and the frame, so concurrent callers cannot double-complete.
    pub(crate) fn service_waiting_readers(&self) {
        loop {
            let Some(read) = self.pending.pop_read() else {
                return;
            };
            match self.packet_queue.pop() {
                Some(frame) => read.complete_read(frame.data),
                None => {
                    // Nothing left to deliver; park the read again at the
                    // head so it stays the oldest. A transmit may have
                    // pushed a frame while the read was out of the queue
                    // and found nothing to wake, so re-check before
                    // stopping.
                    self.pending.requeue_front(read);
                    if self.packet_queue.is_empty() {
                        return;
                    }
                }
            }
        }
    }
}
