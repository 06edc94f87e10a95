//! DHCPv4 ACK observer
//!
//! Learns a client's IPv4 address from server ACKs mirrored to the
//! snooping device.

use crate::protocol::dhcp::{DhcpHeader, DhcpMessageType, OP_REPLY};
use crate::protocol::MacAddr;
use crate::Result;
use std::net::Ipv4Addr;

/// Validate a server-to-client DHCP payload and extract the lease.
///
/// Returns the (client MAC, offered address) pair for an ACK addressed
/// to the client whose hardware address it carries; `None` for valid
/// but uninteresting messages; an error for malformed ones.
pub fn parse_ack(frame_dest: MacAddr, payload: &[u8]) -> Result<Option<(MacAddr, Ipv4Addr)>> {
    let header = DhcpHeader::parse(payload)?;

    if header.op() != OP_REPLY || header.hlen() != 6 {
        return Ok(None);
    }

    let client_mac = MacAddr(header.client_mac());

    // Only accept replies delivered to the client itself or broadcast;
    // anything else did not come through the expected path.
    if !frame_dest.is_broadcast() && frame_dest != client_mac {
        return Ok(None);
    }

    if header.message_type() != Some(DhcpMessageType::Ack) {
        return Ok(None);
    }

    let addr = header.yiaddr();
    if addr.is_unspecified() {
        return Ok(None);
    }

    Ok(Some((client_mac, addr)))
}
