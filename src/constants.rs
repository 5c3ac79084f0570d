//! Adapter-wide constants.

/// Ethernet II header: destination MAC, source MAC, EtherType.
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Default MTU for a newly created adapter.
pub const ETHERNET_MTU: usize = 1500;

/// Minimum on-the-wire frame size (without FCS). Shorter frames handed to the
/// host stack are zero-padded up to this size.
pub const ETHERNET_MIN_FRAME: usize = 60;

/// One 802.1Q tag.
pub const VLAN_TAG_SIZE: usize = 4;

/// Minimum IPv4 header, the floor for any network-layer payload.
pub const IP_HEADER_SIZE: usize = 20;

pub const MAC_ADDRESS_SIZE: usize = 6;

/// Max length of the multicast address list.
pub const MAX_MULTICAST_LIST: usize = 32;

// MTU bounds: TCP minimum MTU up to the IP maximum.
pub const MINIMUM_MTU: usize = 576;
pub const MAXIMUM_MTU: usize = 65536;

/// Adapter -> userspace queue depth.
pub const PACKET_QUEUE_SIZE: usize = 64;

/// Max number of simultaneous outstanding I/O requests from userspace.
pub const REQUEST_QUEUE_SIZE: usize = 16;

pub const DRIVER_MAJOR_VERSION: u16 = 4;
pub const DRIVER_MINOR_VERSION: u16 = 2;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
