//! Packet-filter bitmask and admission rules.
//!
//! The filter gates which frame classes the inbound path accepts. The bit
//! values follow the conventional NIC packet-type encoding.

use crate::frame::{FrameClass, MacAddr};

pub const FILTER_DIRECTED: u32 = 0x0000_0001;
pub const FILTER_MULTICAST: u32 = 0x0000_0002;
pub const FILTER_ALL_MULTICAST: u32 = 0x0000_0004;
pub const FILTER_BROADCAST: u32 = 0x0000_0008;
pub const FILTER_PROMISCUOUS: u32 = 0x0000_0020;

pub const SUPPORTED_FILTERS: u32 = FILTER_DIRECTED
    | FILTER_MULTICAST
    | FILTER_ALL_MULTICAST
    | FILTER_BROADCAST
    | FILTER_PROMISCUOUS;

/// True if `mask` contains only supported bits.
pub fn is_supported(mask: u32) -> bool {
    mask & !SUPPORTED_FILTERS == 0
}

/// Admission decision for one frame against the current filter.
///
/// A multicast frame passes with `FILTER_MULTICAST` only when its destination
/// is on the configured multicast list; `FILTER_ALL_MULTICAST` and
/// promiscuous mode bypass the list.
pub fn admits(mask: u32, class: FrameClass, dst: &MacAddr, multicast_list: &[MacAddr]) -> bool {
    if mask & FILTER_PROMISCUOUS != 0 {
        return true;
    }
    match class {
        FrameClass::Directed => mask & FILTER_DIRECTED != 0,
        FrameClass::Broadcast => mask & FILTER_BROADCAST != 0,
        FrameClass::Multicast => {
            if mask & FILTER_ALL_MULTICAST != 0 {
                return true;
            }
            mask & FILTER_MULTICAST != 0 && multicast_list.contains(dst)
        }
    }
}
