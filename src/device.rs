//! User-mode device endpoint: one open handle onto an adapter.
//!
//! Wraps the adapter's data paths with per-handle accounting. Dropping the
//! device flushes its pending requests and releases its adapter reference,
//! so a crashed consumer cannot strand requests or pin the adapter alive
//! longer than the registry intends.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::debug;

use crate::adapter::TapAdapter;
use crate::constants::{DRIVER_MAJOR_VERSION, DRIVER_MINOR_VERSION};
use crate::error::{TapError, TapResult};
use crate::frame::MacAddr;
use crate::pending::{HandleId, PendingRequest, ReadTicket, RequestId};
use crate::rxpath::WriteOutcome;

/// Disposition of a read call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A frame was already queued; returned inline.
    Immediate(Vec<u8>),
    /// Nothing queued; the ticket resolves when a frame arrives or the
    /// request is cancelled.
    Pending(ReadTicket),
}

/// Control operations multiplexed over the device handle.
#[derive(Debug, Clone)]
pub enum DeviceControl {
    GetMac,
    GetVersion,
    GetMtu,
    GetInfo,
    ConfigTun {
        local_ip: Ipv4Addr,
        remote_network: Ipv4Addr,
        remote_netmask: Ipv4Addr,
    },
    ConfigPointToPoint {
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
    },
    SetMediaStatus(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Mac(MacAddr),
    Version {
        major: u16,
        minor: u16,
        debug: bool,
    },
    Mtu(usize),
    Info(String),
    Done,
}

/// An open handle. Holds a counted adapter reference for its lifetime.
pub struct TapDevice {
    adapter: Arc<TapAdapter>,
    handle: HandleId,
}

impl TapDevice {
    /// Open a handle on the adapter. Fails once the adapter is halted.
    pub fn open(adapter: &Arc<TapAdapter>) -> TapResult<Self> {
        let handle = adapter.register_handle()?;
        debug!(instance = %adapter.instance_id(), handle, "device opened");
        Ok(Self {
            adapter: adapter.acquire(),
            handle,
        })
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn adapter(&self) -> &Arc<TapAdapter> {
        &self.adapter
    }

    /// Read one outbound frame.
    ///
    /// Returns inline when a frame is already queued, otherwise parks a
    /// pending read. The park is race-free: after enqueueing, the waiting
    /// readers are serviced once more in case a frame slipped in between
    /// the empty check and the enqueue.
    pub fn read(&self) -> TapResult<ReadOutcome> {
        let admission = self.adapter.admit_data_path();
        if !admission.is_ready() {
            return Err(admission.into_error());
        }

        if let Some(frame) = self.adapter.packet_queue.pop() {
            return Ok(ReadOutcome::Immediate(frame.data));
        }

        let (request, ticket) =
            PendingRequest::read(self.adapter.next_request_id(), self.handle);
        self.adapter.pending.enqueue(request)?;
        self.adapter.service_waiting_readers();
        Ok(ReadOutcome::Pending(ticket))
    }

    /// Read, blocking until a frame arrives or the request is cancelled.
    pub fn read_blocking(&self) -> TapResult<Vec<u8>> {
        match self.read()? {
            ReadOutcome::Immediate(frame) => Ok(frame),
            ReadOutcome::Pending(ticket) => ticket.wait(),
        }
    }

    /// Read into a caller-supplied buffer. The frame is consumed either
    /// way; a buffer too small for it loses the frame, as a short read on a
    /// datagram source does.
    pub fn read_into(&self, buf: &mut [u8]) -> TapResult<usize> {
        let frame = self.read_blocking()?;
        if frame.len() > buf.len() {
            return Err(TapError::BufferTooSmall {
                required: frame.len(),
            });
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    /// Inject one frame toward the host stack.
    pub fn write(&self, data: &[u8]) -> TapResult<WriteOutcome> {
        self.adapter.write_frame(self.handle, data)
    }

    /// Write, blocking until the host stack returns the buffer.
    pub fn write_blocking(&self, data: &[u8]) -> TapResult<usize> {
        match self.write(data)? {
            WriteOutcome::Consumed(len) => Ok(len),
            WriteOutcome::Pending(ticket) => ticket.wait(),
        }
    }

    /// Cancel a specific outstanding request. False when it already
    /// completed or was cancelled.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.adapter.pending.cancel(id)
    }

    /// Dispatch a control operation.
    pub fn control(&self, op: DeviceControl) -> TapResult<ControlResponse> {
        match op {
            DeviceControl::GetMac => Ok(ControlResponse::Mac(self.adapter.current_address())),
            DeviceControl::GetVersion => Ok(ControlResponse::Version {
                major: DRIVER_MAJOR_VERSION,
                minor: DRIVER_MINOR_VERSION,
                debug: cfg!(debug_assertions),
            }),
            DeviceControl::GetMtu => Ok(ControlResponse::Mtu(self.adapter.mtu())),
            DeviceControl::GetInfo => Ok(ControlResponse::Info(self.adapter.info_string())),
            DeviceControl::ConfigTun {
                local_ip,
                remote_network,
                remote_netmask,
            } => {
                self.adapter
                    .configure_tun(local_ip, remote_network, remote_netmask)?;
                Ok(ControlResponse::Done)
            }
            DeviceControl::ConfigPointToPoint {
                local_ip,
                remote_ip,
            } => {
                self.adapter.configure_point_to_point(local_ip, remote_ip)?;
                Ok(ControlResponse::Done)
            }
            DeviceControl::SetMediaStatus(connected) => {
                self.adapter.set_media_status(connected);
                Ok(ControlResponse::Done)
            }
        }
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        debug!(instance = %self.adapter.instance_id(), handle = self.handle, "device closed");
        self.adapter.deregister_handle(self.handle);
    }
}
