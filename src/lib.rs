//! Virtual TAP/TUN Ethernet adapter engine.
//!
//! The kernel-side half of a userspace VPN stack, as a library: each
//! [`TapAdapter`] looks like a network interface to the host stack on one
//! side and like a character device to a user-mode consumer on the other.
//! Frames the host sends are queued for user-mode reads; frames user-mode
//! writes are indicated to the host as received traffic.
//!
//! Two operating modes per adapter:
//!
//! * **TAP** — user-mode exchanges complete Ethernet frames. 802.1Q tags
//!   are stripped on injection and reported out of band; the packet filter
//!   and multicast list gate what reaches the host.
//! * **TUN** — user-mode exchanges bare IP packets. The engine synthesizes
//!   Ethernet headers from precomputed templates, picked by the packet's IP
//!   version nibble.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vtap::{AdapterConfig, NullSink, TapDevice, TapDriver};
//!
//! # fn main() -> vtap::TapResult<()> {
//! let driver = TapDriver::new();
//! let adapter = driver.create_adapter(AdapterConfig::default(), Arc::new(NullSink))?;
//! let device = TapDevice::open(&adapter)?;
//! adapter.restart()?;
//!
//! let frame = device.read_blocking()?;
//! println!("outbound frame: {} bytes", frame.len());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod constants;
pub mod device;
pub mod driver;
pub mod error;
pub mod filter;
pub mod frame;
pub mod packet_queue;
pub mod pending;
pub mod rxpath;
pub mod state;
pub mod stats;
pub mod txpath;

pub use adapter::{TapAdapter, TunConfig};
pub use config::AdapterConfig;
pub use device::{ControlResponse, DeviceControl, ReadOutcome, TapDevice};
pub use driver::TapDriver;
pub use error::{TapError, TapResult};
pub use frame::{FrameClass, MacAddr, ScatterFrame, VlanTag};
pub use pending::{ReadTicket, WriteTicket};
pub use rxpath::{NullSink, ReceiveSink, RxIndication, WriteOutcome};
pub use state::{AdapterState, Admission};
pub use stats::StatsSnapshot;
