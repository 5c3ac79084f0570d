//! User-mode write path: frames injected toward the host stack.
//!
//! A write becomes a receive indication. The engine validates and translates
//! the frame (TAP passthrough with 802.1Q stripping, or TUN header
//! synthesis), checks it against the packet filter, then lends the resulting
//! buffer to the host stack through the [`ReceiveSink`]. The write stays
//! pending until the stack returns the buffer; the indication id is the link
//! between the two.

use tracing::{debug, trace};

use crate::adapter::TapAdapter;
use crate::constants::{ETHERNET_HEADER_SIZE, IP_HEADER_SIZE, MAC_ADDRESS_SIZE};
use crate::error::{TapError, TapResult};
use crate::filter;
use crate::frame::{pad_to_minimum, EthHeader, FrameClass, VlanTag};
use crate::pending::{HandleId, PendingRequest, WriteTicket};

/// One frame lent to the host stack's receive path.
#[derive(Debug, Clone)]
pub struct RxIndication {
    /// Links the lent buffer back to its pending write.
    pub id: u64,
    /// Complete, padded Ethernet frame.
    pub frame: Vec<u8>,
    /// 802.1Q metadata recovered during stripping, delivered out of band.
    pub vlan: Option<VlanTag>,
}

/// Receiver of indicated frames: the host stack's ingress edge.
///
/// `indicate` is called with the pending write already enqueued; the
/// implementation must eventually hand each indication id back through
/// [`TapAdapter::return_buffers`].
pub trait ReceiveSink: Send + Sync {
    fn indicate(&self, indication: RxIndication);
}

/// Sink that drops every indication. The buffers are never returned, so
/// callers pair it with manual `return_buffers` calls.
pub struct NullSink;

impl ReceiveSink for NullSink {
    fn indicate(&self, indication: RxIndication) {
        trace!(id = indication.id, len = indication.frame.len(), "indication discarded");
    }
}

/// How a write was disposed of.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The frame was consumed without reaching the host stack (filtered
    /// out). Reported as success with the full byte count, matching how a
    /// real NIC drops filtered traffic on the wire side.
    Consumed(usize),
    /// The frame is in flight; the ticket resolves when the buffer returns.
    Pending(WriteTicket),
}

impl TapAdapter {
    /// Inject one frame from user-mode into the host stack.
    ///
    /// TAP mode expects a complete Ethernet frame; TUN mode expects a bare
    /// IPv4 or IPv6 packet and synthesizes the Ethernet header around it.
    pub fn write_frame(&self, handle: HandleId, data: &[u8]) -> TapResult<WriteOutcome> {
        if data.is_empty() {
            return Err(TapError::InvalidParameter("zero-length write".into()));
        }

        // Admission, translation and the in-flight increment share one
        // critical section: a pause observing in_flight == 0 must not be
        // able to complete while an admitted write is still on its way to
        // the indication.
        let (indication, ticket, frame, vlan) = {
            let inner = self.inner.lock();
            let admission = Self::admit_locked(&inner);
            if !admission.is_ready() {
                return Err(admission.into_error());
            }

            let (frame, class, vlan) = match &inner.tun {
                Some(tun) => translate_tun(data, tun)?,
                None => translate_tap(data)?,
            };

            // The filter gates every injected frame, TAP and TUN alike.
            let mut dst = [0u8; MAC_ADDRESS_SIZE];
            dst.copy_from_slice(&frame[..MAC_ADDRESS_SIZE]);
            if !filter::admits(inner.packet_filter, class, &dst, &inner.multicast_list) {
                // Filtered out: swallow silently, report the whole frame
                // consumed.
                drop(inner);
                self.stats.record_rx_drop();
                trace!(len = data.len(), "write filtered out");
                return Ok(WriteOutcome::Consumed(data.len()));
            }

            let frame = pad_to_minimum(frame);
            let indication = self.next_indication_id();
            let (request, ticket) =
                PendingRequest::write(self.next_request_id(), handle, indication, data.len());
            self.pending.enqueue(request)?;

            self.stats.record_rx(class, frame.len());
            self.note_indicated();
            (indication, ticket, frame, vlan)
        };

        // The sink runs outside the control lock; it may call straight
        // back into return_buffers.
        self.sink.indicate(RxIndication {
            id: indication,
            frame,
            vlan,
        });

        Ok(WriteOutcome::Pending(ticket))
    }

    /// The host stack hands back buffers it was lent. Completes the matching
    /// pending writes; an id whose write was already cancelled still counts
    /// toward the drain.
    pub fn return_buffers(&self, indications: &[u64]) {
        for &id in indications {
            match self.pending.remove_matching(|r| r.indication() == Some(id)) {
                Some(request) => request.complete_write(),
                None => debug!(id, "returned buffer had no pending write (cancelled)"),
            }
            self.note_returned();
        }
    }
}

/// TAP translation: validate the Ethernet frame, strip one 802.1Q tag and
/// classify by destination.
fn translate_tap(data: &[u8]) -> TapResult<(Vec<u8>, FrameClass, Option<VlanTag>)> {
    if data.len() < ETHERNET_HEADER_SIZE {
        return Err(TapError::FrameTooShort {
            len: data.len(),
            min: ETHERNET_HEADER_SIZE,
        });
    }

    let (frame, vlan) = match crate::frame::strip_vlan_tag(data) {
        Some((stripped, tag)) => (stripped, Some(tag)),
        None => (data.to_vec(), None),
    };

    let header = EthHeader::from_bytes(&frame)?;
    Ok((frame, FrameClass::of(&header.dst), vlan))
}

/// TUN translation: pick the header template off the IP version nibble and
/// prepend it. Synthesized frames are always directed at the adapter.
fn translate_tun(
    data: &[u8],
    tun: &crate::adapter::TunConfig,
) -> TapResult<(Vec<u8>, FrameClass, Option<VlanTag>)> {
    if data.len() < IP_HEADER_SIZE {
        return Err(TapError::FrameTooShort {
            len: data.len(),
            min: IP_HEADER_SIZE,
        });
    }

    let header = match data[0] >> 4 {
        4 => &tun.user_to_host_v4,
        6 => &tun.user_to_host_v6,
        v => {
            return Err(TapError::InvalidParameter(format!(
                "unrecognized IP version {v}"
            )))
        }
    };

    let mut frame = Vec::with_capacity(ETHERNET_HEADER_SIZE + data.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(data);
    Ok((frame, FrameClass::Directed, None))
}
