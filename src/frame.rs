//! Ethernet frame primitives.
//!
//! MAC address helpers, the Ethernet II header used for TUN-mode header
//! synthesis, 802.1Q tag stripping, minimum-size padding and the owned frame
//! copy queued between the host stack and user-mode.

use bytes::Bytes;
use rand::RngCore;

use crate::constants::{
    ETHERNET_HEADER_SIZE, ETHERNET_MIN_FRAME, ETHERTYPE_VLAN, MAC_ADDRESS_SIZE,
};
use crate::error::{TapError, TapResult};

pub type MacAddr = [u8; MAC_ADDRESS_SIZE];

pub const BROADCAST_MAC: MacAddr = [0xFF; 6];

/// Parse a MAC address string (e.g., "00:11:22:33:44:55") into a byte array.
pub fn parse_mac(mac_str: &str) -> TapResult<MacAddr> {
    let parts: Vec<&str> = mac_str.split(':').collect();
    if parts.len() != MAC_ADDRESS_SIZE {
        return Err(TapError::InvalidParameter(format!(
            "invalid MAC address format: {mac_str}"
        )));
    }

    let mut mac = [0u8; MAC_ADDRESS_SIZE];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| {
            TapError::InvalidParameter(format!("invalid MAC address byte: {part}"))
        })?;
    }

    Ok(mac)
}

pub fn format_mac(mac: &MacAddr) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Generate a random locally-administered unicast MAC. Used when the
/// configuration store carries no (valid) address.
pub fn random_mac() -> MacAddr {
    let mut mac = [0u8; MAC_ADDRESS_SIZE];
    rand::thread_rng().fill_bytes(&mut mac);
    mac[0] |= 0x02; // locally administered
    mac[0] &= !0x01; // unicast
    mac
}

pub fn is_broadcast(mac: &MacAddr) -> bool {
    *mac == BROADCAST_MAC
}

pub fn is_multicast(mac: &MacAddr) -> bool {
    !is_broadcast(mac) && (mac[0] & 0x01) != 0
}

/// Frame class derived from the destination MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Directed,
    Broadcast,
    Multicast,
}

impl FrameClass {
    pub fn of(dst: &MacAddr) -> Self {
        if is_broadcast(dst) {
            FrameClass::Broadcast
        } else if is_multicast(dst) {
            FrameClass::Multicast
        } else {
            FrameClass::Directed
        }
    }
}

/// Ethernet II header. Precomputed instances of this serve as the synthesized
/// headers in TUN mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthHeader {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16) -> Self {
        Self { dst, src, ethertype }
    }

    pub fn to_bytes(&self) -> [u8; ETHERNET_HEADER_SIZE] {
        let mut out = [0u8; ETHERNET_HEADER_SIZE];
        out[0..6].copy_from_slice(&self.dst);
        out[6..12].copy_from_slice(&self.src);
        out[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> TapResult<Self> {
        if data.len() < ETHERNET_HEADER_SIZE {
            return Err(TapError::FrameTooShort {
                len: data.len(),
                min: ETHERNET_HEADER_SIZE,
            });
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&data[0..6]);
        src.copy_from_slice(&data[6..12]);
        Ok(Self {
            dst,
            src,
            ethertype: u16::from_be_bytes([data[12], data[13]]),
        })
    }
}

/// Priority and VLAN id recovered from a stripped 802.1Q tag, delivered out
/// of band alongside the untagged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub priority: u8,
    pub vlan_id: u16,
}

/// Strip one 802.1Q tag if present.
///
/// Returns the untagged frame (4 bytes shorter, inner EtherType exposed) and
/// the tag contents, or `None` when the frame carries no tag. Calling this on
/// an already-stripped frame is a no-op by construction: the inner EtherType
/// is not 0x8100.
pub fn strip_vlan_tag(frame: &[u8]) -> Option<(Vec<u8>, VlanTag)> {
    if frame.len() < ETHERNET_HEADER_SIZE + 4 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_VLAN {
        return None;
    }

    let tci = u16::from_be_bytes([frame[14], frame[15]]);
    let tag = VlanTag {
        priority: (tci >> 13) as u8,
        vlan_id: tci & 0x0FFF,
    };

    // Shift the payload start forward 4 bytes: MACs stay, the inner
    // EtherType takes the tag's place.
    let mut out = Vec::with_capacity(frame.len() - 4);
    out.extend_from_slice(&frame[0..12]);
    out.extend_from_slice(&frame[16..]);
    Some((out, tag))
}

/// Zero-pad a frame up to the Ethernet minimum so the host stack never
/// observes undersized frames.
pub fn pad_to_minimum(mut frame: Vec<u8>) -> Vec<u8> {
    if frame.len() < ETHERNET_MIN_FRAME {
        frame.resize(ETHERNET_MIN_FRAME, 0);
    }
    frame
}

/// One logical frame from the host stack's send path, possibly scattered
/// across non-contiguous segments. Ownership of the segments ends when the
/// send call returns, so the engine always flattens into an owned copy.
#[derive(Debug, Clone, Default)]
pub struct ScatterFrame {
    segments: Vec<Bytes>,
}

impl ScatterFrame {
    pub fn new(segments: Vec<Bytes>) -> Self {
        Self { segments }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            segments: vec![Bytes::copy_from_slice(data)],
        }
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat contiguous copy of all segments.
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
        out
    }

    /// Destination MAC, if the first 6 bytes are present.
    pub fn dst_mac(&self) -> Option<MacAddr> {
        let mut dst = [0u8; 6];
        let mut filled = 0;
        for seg in &self.segments {
            for &b in seg.iter() {
                dst[filled] = b;
                filled += 1;
                if filled == 6 {
                    return Some(dst);
                }
            }
        }
        None
    }
}

/// An owned, contiguous copy of one frame awaiting a user-mode read. Lives
/// independently of the host-stack buffers it was copied from.
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub data: Vec<u8>,
    pub class: FrameClass,
}

impl QueuedFrame {
    pub fn new(data: Vec<u8>, class: FrameClass) -> Self {
        Self { data, class }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_mac() {
        let mac = parse_mac("5e:00:53:ff:00:01").unwrap();
        assert_eq!(mac, [0x5E, 0x00, 0x53, 0xFF, 0x00, 0x01]);
        assert_eq!(format_mac(&mac), "5e:00:53:ff:00:01");
    }

    #[test]
    fn test_parse_mac_rejects_garbage() {
        assert!(parse_mac("not-a-mac").is_err());
        assert!(parse_mac("00:11:22:33:44").is_err());
        assert!(parse_mac("00:11:22:33:44:zz").is_err());
    }

    #[test]
    fn test_random_mac_is_local_unicast() {
        let mac = random_mac();
        assert_eq!(mac[0] & 0x02, 0x02);
        assert_eq!(mac[0] & 0x01, 0x00);
    }

    #[test]
    fn test_frame_class() {
        assert_eq!(FrameClass::of(&BROADCAST_MAC), FrameClass::Broadcast);
        assert_eq!(
            FrameClass::of(&[0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]),
            FrameClass::Multicast
        );
        assert_eq!(
            FrameClass::of(&[0x5E, 0x00, 0x53, 0x00, 0x00, 0x01]),
            FrameClass::Directed
        );
    }

    #[test]
    fn test_eth_header_round_trip() {
        let hdr = EthHeader::new([1; 6], [2; 6], 0x0800);
        let bytes = hdr.to_bytes();
        assert_eq!(EthHeader::from_bytes(&bytes).unwrap(), hdr);
    }

    #[test]
    fn test_strip_vlan_tag() {
        // dst, src, 0x8100, tci (prio 5, vid 0x123), inner proto 0x0800, payload
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xAA; 6]);
        frame.extend_from_slice(&[0xBB; 6]);
        frame.extend_from_slice(&0x8100u16.to_be_bytes());
        let tci: u16 = (5 << 13) | 0x123;
        frame.extend_from_slice(&tci.to_be_bytes());
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&[0u8; 20]);

        let (stripped, tag) = strip_vlan_tag(&frame).unwrap();
        assert_eq!(stripped.len(), frame.len() - 4);
        assert_eq!(tag.priority, 5);
        assert_eq!(tag.vlan_id, 0x123);
        assert_eq!(u16::from_be_bytes([stripped[12], stripped[13]]), 0x0800);

        // No double strip.
        assert!(strip_vlan_tag(&stripped).is_none());
    }

    #[test]
    fn test_pad_to_minimum() {
        let padded = pad_to_minimum(vec![1u8; 34]);
        assert_eq!(padded.len(), ETHERNET_MIN_FRAME);
        assert_eq!(&padded[0..34], &[1u8; 34][..]);
        assert!(padded[34..].iter().all(|&b| b == 0));

        let untouched = pad_to_minimum(vec![1u8; 80]);
        assert_eq!(untouched.len(), 80);
    }

    #[test]
    fn test_scatter_frame_flatten() {
        let frame = ScatterFrame::new(vec![
            Bytes::from_static(&[0xAA, 0xBB, 0xCC]),
            Bytes::from_static(&[0xDD, 0xEE, 0xFF, 0x01]),
        ]);
        assert_eq!(frame.len(), 7);
        assert_eq!(frame.flatten(), vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x01]);
    }

    #[test]
    fn test_scatter_frame_dst_mac_across_segments() {
        let frame = ScatterFrame::new(vec![
            Bytes::from_static(&[0x01, 0x02]),
            Bytes::from_static(&[0x03, 0x04, 0x05, 0x06, 0x99]),
        ]);
        assert_eq!(frame.dst_mac(), Some([1, 2, 3, 4, 5, 6]));
        assert_eq!(ScatterFrame::from_slice(&[0u8; 4]).dst_mac(), None);
    }
}
