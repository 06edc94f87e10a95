//! ICMPv6 Neighbor Advertisement observer
//!
//! Learns a client's global IPv6 address from NAs mirrored to the
//! snooping device. The hop-limit 255 check happens at dispatch, before
//! the payload reaches this observer.

use crate::protocol::icmpv6::{is_global_unicast, Icmpv6Packet, Icmpv6Type, NeighborAdvertisement};
use crate::protocol::MacAddr;
use crate::Result;
use std::net::Ipv6Addr;

/// Validate a Neighbor Advertisement and extract the learned address.
///
/// The target-link-layer option must be present and match the frame's
/// source MAC (anti-spoof), and only global unicast targets are
/// learned.
pub fn parse_na(frame_src: MacAddr, payload: &[u8]) -> Result<Option<(MacAddr, Ipv6Addr)>> {
    let packet = Icmpv6Packet::parse(payload)?;

    if packet.msg_type() != Icmpv6Type::NeighborAdvertisement as u8 {
        return Ok(None);
    }

    let na = NeighborAdvertisement::parse(packet.body())?;

    if na.target_link_addr != Some(frame_src) {
        return Ok(None);
    }
    if !is_global_unicast(&na.target_addr) {
        return Ok(None);
    }

    Ok(Some((frame_src, na.target_addr)))
}
