//! ICMPv6 protocol - RFC 4443, NDP - RFC 4861
//!
//! Neighbor Advertisement parsing for the IPv6 address-learning snooper.

use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv6Addr;

/// Minimum ICMPv6 header size
pub const MIN_HEADER_SIZE: usize = 4;

/// ICMPv6 message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Icmpv6Type {
    RouterSolicitation = 133,
    RouterAdvertisement = 134,
    NeighborSolicitation = 135,
    NeighborAdvertisement = 136,
}

impl Icmpv6Type {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            133 => Some(Icmpv6Type::RouterSolicitation),
            134 => Some(Icmpv6Type::RouterAdvertisement),
            135 => Some(Icmpv6Type::NeighborSolicitation),
            136 => Some(Icmpv6Type::NeighborAdvertisement),
            _ => None,
        }
    }
}

/// NDP option types
pub mod ndp_option {
    pub const SOURCE_LINK_LAYER: u8 = 1;
    pub const TARGET_LINK_LAYER: u8 = 2;
}

/// Parsed ICMPv6 header (zero-copy reference)
#[derive(Debug)]
pub struct Icmpv6Packet<'a> {
    buffer: &'a [u8],
}

impl<'a> Icmpv6Packet<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("ICMPv6 packet too short".into()));
        }

        Ok(Self { buffer })
    }

    /// Message type
    pub fn msg_type(&self) -> u8 {
        self.buffer[0]
    }

    /// Message body (after type/code/checksum)
    pub fn body(&self) -> &'a [u8] {
        &self.buffer[MIN_HEADER_SIZE..]
    }
}

/// Neighbor Advertisement message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborAdvertisement {
    pub router_flag: bool,
    pub solicited_flag: bool,
    pub override_flag: bool,
    pub target_addr: Ipv6Addr,
    pub target_link_addr: Option<MacAddr>,
}

impl NeighborAdvertisement {
    /// Parse from ICMPv6 body (after type/code/checksum)
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        // Minimum: 4 (flags/reserved) + 16 (target) = 20 bytes
        if buffer.len() < 20 {
            return Err(Error::Parse("Neighbor Advertisement too short".into()));
        }

        let flags = buffer[0];
        let target_bytes: [u8; 16] = buffer[4..20].try_into().unwrap();

        Ok(Self {
            router_flag: flags & 0x80 != 0,
            solicited_flag: flags & 0x40 != 0,
            override_flag: flags & 0x20 != 0,
            target_addr: Ipv6Addr::from(target_bytes),
            target_link_addr: parse_link_layer_option(
                &buffer[20..],
                ndp_option::TARGET_LINK_LAYER,
            ),
        })
    }
}

/// Scan NDP options for a link-layer address option of the given type.
///
/// Options are (type, length-in-8-byte-units) blocks; a zero length is
/// malformed and ends the scan.
fn parse_link_layer_option(mut opts: &[u8], wanted: u8) -> Option<MacAddr> {
    while opts.len() >= 2 {
        let opt_type = opts[0];
        let opt_len = opts[1] as usize * 8;

        if opt_len == 0 || opt_len > opts.len() {
            return None;
        }

        if opt_type == wanted && opt_len >= 8 {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&opts[2..8]);
            return Some(MacAddr(mac));
        }

        opts = &opts[opt_len..];
    }

    None
}

/// Global unicast: top three address bits are 001 (2000::/3).
pub fn is_global_unicast(addr: &Ipv6Addr) -> bool {
    addr.octets()[0] & 0xe0 == 0x20
}
