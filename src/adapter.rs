//! The per-adapter context: lifecycle, control state and teardown.
//!
//! One `TapAdapter` per virtual interface. All cross-component references are
//! counted (`Arc`); the registry, every open device handle and every
//! in-flight completion hold one. Teardown of owned resources runs exactly
//! once, when the last reference drops.
//!
//! Locking: the control lock (`inner`) covers lifecycle state and mutable
//! configuration and is only taken at normal context. The packet queue and
//! pending-request queue carry their own finer-grained synchronization and
//! are safe from host-stack callback context.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::constants::{
    ETHERTYPE_IPV4, ETHERTYPE_IPV6, MAC_ADDRESS_SIZE, MAX_MULTICAST_LIST, PACKET_QUEUE_SIZE,
    REQUEST_QUEUE_SIZE,
};
use crate::error::{TapError, TapResult};
use crate::filter::{self, FILTER_DIRECTED};
use crate::frame::{format_mac, parse_mac, random_mac, EthHeader, MacAddr};
use crate::packet_queue::PacketQueue;
use crate::pending::{HandleId, PendingQueue, RequestId};
use crate::rxpath::ReceiveSink;
use crate::state::{Admission, AdapterState, StateMachine};
use crate::stats::{AdapterStats, StatsSnapshot};

/// Point-to-point (TUN) configuration with the precomputed Ethernet header
/// templates for each direction.
#[derive(Debug, Clone)]
pub struct TunConfig {
    pub local_ip: Ipv4Addr,
    pub remote_network: Ipv4Addr,
    pub remote_netmask: Ipv4Addr,
    /// Prepended to user-mode IPv4 writes before receive indication.
    pub user_to_host_v4: EthHeader,
    /// Same as `user_to_host_v4` but proto is IPv6.
    pub user_to_host_v6: EthHeader,
    /// Header the host stack puts on outbound frames toward the peer.
    pub host_to_user: EthHeader,
}

impl TunConfig {
    fn new(
        local_mac: MacAddr,
        local_ip: Ipv4Addr,
        remote_network: Ipv4Addr,
        remote_netmask: Ipv4Addr,
    ) -> Self {
        let peer_mac = related_mac(&local_mac);
        Self {
            local_ip,
            remote_network,
            remote_netmask,
            user_to_host_v4: EthHeader::new(local_mac, peer_mac, ETHERTYPE_IPV4),
            user_to_host_v6: EthHeader::new(local_mac, peer_mac, ETHERTYPE_IPV6),
            host_to_user: EthHeader::new(peer_mac, local_mac, ETHERTYPE_IPV4),
        }
    }
}

/// Synthetic MAC for the point-to-point peer, derived from the adapter's own
/// address so it stays stable across reconfiguration.
fn related_mac(mac: &MacAddr) -> MacAddr {
    let mut out = *mac;
    out[5] = out[5].wrapping_add(1);
    out
}

/// Control-path state, guarded by the adapter control lock.
pub(crate) struct AdapterInner {
    pub(crate) state: StateMachine,
    pub(crate) current_address: MacAddr,
    pub(crate) mtu: usize,
    pub(crate) media_connected: bool,
    pub(crate) media_always_connected: bool,
    pub(crate) low_power: bool,
    pub(crate) reset_in_progress: bool,
    pub(crate) packet_filter: u32,
    pub(crate) multicast_list: Vec<MacAddr>,
    pub(crate) tun: Option<TunConfig>,
}

/// One virtual network adapter instance.
pub struct TapAdapter {
    instance_id: String,
    permanent_address: MacAddr,
    allow_non_admin: bool,

    pub(crate) inner: Mutex<AdapterInner>,
    pub(crate) packet_queue: PacketQueue,
    pub(crate) pending: PendingQueue,
    pub(crate) stats: AdapterStats,
    pub(crate) sink: Arc<dyn ReceiveSink>,

    /// Buffers currently lent to the host stack and not yet returned.
    in_flight: AtomicU64,
    drain_lock: Mutex<()>,
    drained: Condvar,

    open_handles: AtomicUsize,
    next_handle_id: AtomicU64,
    next_request_id: AtomicU64,
    next_indication_id: AtomicU64,
}

impl TapAdapter {
    /// Create an adapter from its read-once configuration.
    ///
    /// Returns in the Paused state on success. On failure the partially
    /// built context is unwound through the Halted state and dropped.
    pub fn create(config: AdapterConfig, sink: Arc<dyn ReceiveSink>) -> TapResult<Arc<Self>> {
        let mut config = config;
        config.normalize();

        let instance_id = if config.instance_id.is_empty() {
            generate_instance_id()
        } else {
            config.instance_id.clone()
        };

        let mut state = StateMachine::new();

        let permanent_address = match config.mac.as_deref() {
            Some(mac_str) => match parse_mac(mac_str) {
                Ok(mac) => mac,
                Err(e) => {
                    warn!(instance = %instance_id, "invalid configured MAC, creation fails");
                    state.fail_initialization();
                    return Err(e);
                }
            },
            None => random_mac(),
        };

        state.complete_initialization();

        let adapter = Arc::new(Self {
            instance_id: instance_id.clone(),
            permanent_address,
            allow_non_admin: config.allow_non_admin,
            inner: Mutex::new(AdapterInner {
                state,
                current_address: permanent_address,
                mtu: config.mtu,
                media_connected: config.media_always_connected,
                media_always_connected: config.media_always_connected,
                low_power: false,
                reset_in_progress: false,
                packet_filter: FILTER_DIRECTED,
                multicast_list: Vec::new(),
                tun: None,
            }),
            packet_queue: PacketQueue::new(PACKET_QUEUE_SIZE),
            pending: PendingQueue::new(REQUEST_QUEUE_SIZE),
            stats: AdapterStats::new(),
            sink,
            in_flight: AtomicU64::new(0),
            drain_lock: Mutex::new(()),
            drained: Condvar::new(),
            open_handles: AtomicUsize::new(0),
            next_handle_id: AtomicU64::new(1),
            next_request_id: AtomicU64::new(1),
            next_indication_id: AtomicU64::new(1),
        });

        info!(
            instance = %instance_id,
            mac = %format_mac(&permanent_address),
            mtu = config.mtu,
            "adapter created"
        );

        Ok(adapter)
    }

    /// Clone a counted reference. Acquiring a reference to a halted adapter
    /// is a defect in the caller ("cannot resurrect a zombie").
    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        debug_assert!(
            !self.inner.lock().state.is_halted(),
            "cannot resurrect a zombie adapter"
        );
        Arc::clone(self)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn permanent_address(&self) -> MacAddr {
        self.permanent_address
    }

    pub fn current_address(&self) -> MacAddr {
        self.inner.lock().current_address
    }

    pub fn allow_non_admin(&self) -> bool {
        self.allow_non_admin
    }

    pub fn mtu(&self) -> usize {
        self.inner.lock().mtu
    }

    pub fn state(&self) -> AdapterState {
        self.inner.lock().state.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn media_connected(&self) -> bool {
        self.inner.lock().media_connected
    }

    pub fn tun_mode(&self) -> bool {
        self.inner.lock().tun.is_some()
    }

    pub fn packet_filter(&self) -> u32 {
        self.inner.lock().packet_filter
    }

    pub fn multicast_list(&self) -> Vec<MacAddr> {
        self.inner.lock().multicast_list.clone()
    }

    /// Single gate consulted by both data paths before committing to a
    /// translation. Checked atomically under the control lock.
    pub fn admit_data_path(&self) -> Admission {
        let inner = self.inner.lock();
        Self::admit_locked(&inner)
    }

    pub(crate) fn admit_locked(inner: &AdapterInner) -> Admission {
        match inner.state.current() {
            AdapterState::Running => {}
            AdapterState::Paused | AdapterState::Pausing | AdapterState::Restarting => {
                return Admission::Paused
            }
            AdapterState::Initializing | AdapterState::Halted | AdapterState::Shutdown => {
                return Admission::InvalidState
            }
        }
        if !inner.media_connected {
            return Admission::MediaDisconnected;
        }
        if inner.low_power {
            return Admission::LowPower;
        }
        if inner.reset_in_progress {
            return Admission::ResetInProgress;
        }
        Admission::Ready
    }

    // ---- lifecycle callbacks -------------------------------------------

    /// Resume the data path. Paused -> Restarting -> Running.
    pub fn restart(&self) -> TapResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_halted() {
            return Err(TapError::InvalidState);
        }
        if inner.state.current() == AdapterState::Running {
            return Ok(());
        }
        inner.state.begin_restart();
        inner.state.complete_restart();
        debug!(instance = %self.instance_id, "adapter running");
        Ok(())
    }

    /// Quiesce the data path. Unconditionally completable: waits for every
    /// lent buffer to come back, acquires nothing that can fail.
    pub fn pause(&self) {
        {
            let mut inner = self.inner.lock();
            match inner.state.current() {
                AdapterState::Running | AdapterState::Restarting => inner.state.begin_pause(),
                // Already quiesced or tearing down; nothing to do.
                _ => return,
            }
        }

        self.wait_for_drain();

        let mut inner = self.inner.lock();
        if inner.state.current() == AdapterState::Pausing {
            inner.state.complete_pause();
        }
        debug!(instance = %self.instance_id, "adapter paused");
    }

    /// Terminal teardown. After this no send or write is admitted; pending
    /// requests complete with `Cancelled` and queued frames are discarded.
    pub fn halt(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_halted() {
                return;
            }
            inner.state.halt();
        }

        // Wait for the host stack to hand back every lent buffer before
        // tearing down what those completions touch.
        self.wait_for_drain();

        for req in self.pending.drain_matching(|_| true) {
            req.cancel();
        }
        self.packet_queue.clear();

        info!(instance = %self.instance_id, "adapter halted");
    }

    /// System shutdown notification. Best-effort state reset only; callable
    /// at arbitrary concurrency, releases nothing.
    pub fn shutdown(&self) {
        self.inner.lock().state.shutdown();
    }

    /// Host-stack-initiated reset. Flushes both queues. The addressing
    /// configuration survives, so the addressing-reset flag is false.
    pub fn reset(&self) -> TapResult<bool> {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_halted() {
                return Err(TapError::InvalidState);
            }
            inner.reset_in_progress = true;
        }

        for req in self.pending.drain_matching(|r| r.is_read()) {
            req.fail(TapError::ResetInProgress);
        }
        self.packet_queue.clear();

        self.inner.lock().reset_in_progress = false;
        Ok(false)
    }

    /// Periodic liveness query from the host stack. Nothing here blocks
    /// unboundedly, so the answer is always "not hung".
    pub fn check_hang(&self) -> bool {
        false
    }

    // ---- control-path setters ------------------------------------------

    /// Replace the packet filter. Unsupported bits are rejected outright.
    pub fn set_packet_filter(&self, mask: u32) -> TapResult<()> {
        if !filter::is_supported(mask) {
            return Err(TapError::NotSupported);
        }
        let mut inner = self.inner.lock();
        if inner.state.is_halted() {
            return Err(TapError::InvalidState);
        }
        inner.packet_filter = mask;
        debug!(instance = %self.instance_id, filter = format_args!("{mask:#x}"), "packet filter set");
        Ok(())
    }

    /// Replace the multicast list atomically. `addresses` is a packed run of
    /// 6-byte MACs; a malformed or oversized list leaves the current one in
    /// place and reports the size a maximal set would need.
    pub fn set_multicast_list(&self, addresses: &[u8]) -> TapResult<()> {
        if addresses.len() % MAC_ADDRESS_SIZE != 0 {
            return Err(TapError::InvalidParameter(format!(
                "multicast list length {} not a multiple of {}",
                addresses.len(),
                MAC_ADDRESS_SIZE
            )));
        }
        let count = addresses.len() / MAC_ADDRESS_SIZE;
        if count > MAX_MULTICAST_LIST {
            return Err(TapError::MulticastListFull {
                max: MAX_MULTICAST_LIST,
                required: MAX_MULTICAST_LIST * MAC_ADDRESS_SIZE,
            });
        }

        let mut list = Vec::with_capacity(count);
        for chunk in addresses.chunks_exact(MAC_ADDRESS_SIZE) {
            let mut mac = [0u8; MAC_ADDRESS_SIZE];
            mac.copy_from_slice(chunk);
            list.push(mac);
        }

        let mut inner = self.inner.lock();
        if inner.state.is_halted() {
            return Err(TapError::InvalidState);
        }
        inner.multicast_list = list;
        Ok(())
    }

    /// Host power transition. In low power the data path stops admitting
    /// but all state survives for the wake.
    pub fn set_low_power(&self, low_power: bool) {
        let mut inner = self.inner.lock();
        inner.low_power = low_power;
        debug!(instance = %self.instance_id, low_power, "power state changed");
    }

    /// Toggle the media-connect flag. A config with media pinned
    /// always-connected ignores attempts to disconnect.
    pub fn set_media_status(&self, connected: bool) {
        let mut inner = self.inner.lock();
        if inner.media_always_connected && !connected {
            return;
        }
        inner.media_connected = connected;
    }

    /// Switch to IP point-to-point (TUN) mode. The mode is set once;
    /// reconfiguring an adapter already in TUN mode is rejected.
    pub fn configure_tun(
        &self,
        local_ip: Ipv4Addr,
        remote_network: Ipv4Addr,
        remote_netmask: Ipv4Addr,
    ) -> TapResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_halted() {
            return Err(TapError::InvalidState);
        }
        if inner.tun.is_some() {
            return Err(TapError::InvalidParameter(
                "adapter already in TUN mode".into(),
            ));
        }
        inner.tun = Some(TunConfig::new(
            inner.current_address,
            local_ip,
            remote_network,
            remote_netmask,
        ));
        info!(
            instance = %self.instance_id,
            %local_ip, %remote_network, %remote_netmask,
            "TUN mode configured"
        );
        Ok(())
    }

    /// Older two-address form: a single remote host, /32.
    pub fn configure_point_to_point(
        &self,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
    ) -> TapResult<()> {
        self.configure_tun(local_ip, remote_ip, Ipv4Addr::new(255, 255, 255, 255))
    }

    /// Frames queued toward user-mode.
    pub fn queued_frames(&self) -> usize {
        self.packet_queue.len()
    }

    /// Frames dropped off the outbound queue since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.packet_queue.dropped()
    }

    /// Cancel one outstanding request. False when it already completed or
    /// was cancelled by the other side of the race.
    pub fn cancel_request(&self, id: RequestId) -> bool {
        self.pending.cancel(id)
    }

    /// Human-readable state line for the info query.
    pub fn info_string(&self) -> String {
        let inner = self.inner.lock();
        format!(
            "state={} media={} mtu={} filter={:#x} tun={} queued={} in_flight={}",
            inner.state.current(),
            if inner.media_connected { "connected" } else { "disconnected" },
            inner.mtu,
            inner.packet_filter,
            inner.tun.is_some(),
            self.packet_queue.len(),
            self.in_flight.load(Ordering::SeqCst),
        )
    }

    // ---- device-endpoint accounting ------------------------------------

    /// Register an opening user-mode handle.
    pub(crate) fn register_handle(&self) -> TapResult<HandleId> {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_halted() {
                return Err(TapError::InvalidState);
            }
            self.open_handles.fetch_add(1, Ordering::SeqCst);
            // The device node coming up makes the media connectable.
            if !inner.media_always_connected {
                inner.media_connected = true;
            }
        }
        Ok(self.next_handle_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Deregister a closing handle and flush its pending requests.
    pub(crate) fn deregister_handle(&self, handle: HandleId) {
        for req in self.pending.drain_matching(|r| r.handle == handle) {
            req.cancel();
        }
        let prev = self.open_handles.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "open-handle count underflow");
        if prev == 1 {
            let mut inner = self.inner.lock();
            if !inner.media_always_connected {
                inner.media_connected = false;
            }
        }
    }

    pub fn is_device_open(&self) -> bool {
        self.open_handles.load(Ordering::SeqCst) > 0
    }

    // ---- in-flight tracking --------------------------------------------

    pub(crate) fn next_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_indication_id(&self) -> u64 {
        self.next_indication_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn note_indicated(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn note_returned(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "in-flight count underflow");
        if prev == 1 {
            // Zero crossing: wake anyone waiting for the drain.
            let _guard = self.drain_lock.lock();
            self.drained.notify_all();
        }
    }

    /// Block until every buffer lent to the host stack has been returned.
    pub fn wait_for_drain(&self) {
        let mut guard = self.drain_lock.lock();
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.drained.wait(&mut guard);
        }
    }
}

impl Drop for TapAdapter {
    fn drop(&mut self) {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight != 0 {
            // Asserting here during an unwind would turn one panic into an
            // abort; the invariant check only applies to orderly drops.
            warn!(
                instance = %self.instance_id,
                in_flight,
                "adapter freed with buffers still lent to the host stack"
            );
            debug_assert!(
                std::thread::panicking(),
                "adapter dropped with buffers still lent to the host stack"
            );
        }
        info!(instance = %self.instance_id, "adapter freed");
    }
}

impl std::fmt::Debug for TapAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapAdapter")
            .field("instance_id", &self.instance_id)
            .field("state", &self.inner.lock().state.current())
            .finish()
    }
}

fn generate_instance_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{{{:08X}-{:04X}-{:04X}-{:04X}-{:012X}}}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>(),
        rng.gen::<u16>(),
        rng.gen::<u64>() & 0xFFFF_FFFF_FFFF
    )
}
