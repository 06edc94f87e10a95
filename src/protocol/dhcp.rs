//! DHCP protocol - RFC 2131, 2132
//!
//! Read-only DHCPv4 parsing for the address-learning snooper.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Fixed header size (before options)
pub const DHCP_HEADER_SIZE: usize = 236;

/// Magic cookie marking start of options
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Minimum packet size (header + magic cookie)
pub const MIN_PACKET_SIZE: usize = DHCP_HEADER_SIZE + 4;

/// BOOTP operation codes
pub const OP_REQUEST: u8 = 1;
pub const OP_REPLY: u8 = 2;

/// DHCP message types (Option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            4 => Some(DhcpMessageType::Decline),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            7 => Some(DhcpMessageType::Release),
            8 => Some(DhcpMessageType::Inform),
            _ => None,
        }
    }
}

/// DHCP option codes
pub mod options {
    pub const PAD: u8 = 0;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const END: u8 = 255;
}

/// Parsed DHCP message (zero-copy reference)
#[derive(Debug)]
pub struct DhcpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> DhcpHeader<'a> {
    /// Parse DHCP message from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_PACKET_SIZE {
            return Err(Error::Parse("DHCP message too short".into()));
        }

        if buffer[236..240] != MAGIC_COOKIE {
            return Err(Error::Parse("invalid DHCP magic cookie".into()));
        }

        Ok(Self { buffer })
    }

    /// Operation code (1=request, 2=reply)
    pub fn op(&self) -> u8 {
        self.buffer[0]
    }

    /// Hardware type (1=Ethernet)
    pub fn htype(&self) -> u8 {
        self.buffer[1]
    }

    /// Hardware address length (6 for Ethernet)
    pub fn hlen(&self) -> u8 {
        self.buffer[2]
    }

    /// Your IP address (yiaddr) - assigned to client
    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    /// Client MAC address (first 6 bytes of chaddr for Ethernet)
    pub fn client_mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[28..34]);
        mac
    }

    /// Options section (after magic cookie)
    pub fn options_raw(&self) -> &[u8] {
        &self.buffer[240..]
    }

    /// Get DHCP message type from options
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.find_option(options::MESSAGE_TYPE)
            .and_then(|data| data.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    /// Find option by code, returns option data (without code and length)
    fn find_option(&self, code: u8) -> Option<&[u8]> {
        let opts = self.options_raw();
        let mut i = 0;

        while i < opts.len() {
            let opt_code = opts[i];

            if opt_code == options::PAD {
                i += 1;
                continue;
            }
            if opt_code == options::END {
                break;
            }

            if i + 1 >= opts.len() {
                break;
            }
            let opt_len = opts[i + 1] as usize;
            let data_start = i + 2;
            let data_end = data_start + opt_len;

            if data_end > opts.len() {
                break;
            }

            if opt_code == code {
                return Some(&opts[data_start..data_end]);
            }

            i = data_end;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn make_ack_packet(mac: [u8; 6], yiaddr: Ipv4Addr) -> Vec<u8> {
        let mut packet = vec![0u8; 300];

        packet[0] = OP_REPLY;
        packet[1] = 1; // htype = Ethernet
        packet[2] = 6; // hlen

        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes()); // xid
        packet[16..20].copy_from_slice(&yiaddr.octets());
        packet[28..34].copy_from_slice(&mac);

        packet[236..240].copy_from_slice(&MAGIC_COOKIE);

        // Message Type = ACK
        packet[240] = 53;
        packet[241] = 1;
        packet[242] = DhcpMessageType::Ack as u8;
        packet[243] = 255;

        packet
    }

    #[test]
    fn test_parse_ack() {
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let yiaddr = Ipv4Addr::new(192, 168, 1, 100);
        let packet = make_ack_packet(mac, yiaddr);
        let header = DhcpHeader::parse(&packet).unwrap();

        assert_eq!(header.op(), OP_REPLY);
        assert_eq!(header.hlen(), 6);
        assert_eq!(header.client_mac(), mac);
        assert_eq!(header.yiaddr(), yiaddr);
        assert_eq!(header.message_type(), Some(DhcpMessageType::Ack));
    }

    #[test]
    fn test_parse_too_short() {
        assert!(DhcpHeader::parse(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_parse_invalid_magic() {
        let mut packet = vec![0u8; 300];
        packet[236..240].copy_from_slice(&[0, 0, 0, 0]);
        assert!(DhcpHeader::parse(&packet).is_err());
    }

    #[test]
    fn test_option_truncated_length() {
        let mut packet = make_ack_packet([0u8; 6], Ipv4Addr::UNSPECIFIED);
        // Option claiming more data than the packet holds
        packet.truncate(244);
        packet[240] = 53;
        packet[241] = 200;
        let header = DhcpHeader::parse(&packet).unwrap();
        assert_eq!(header.message_type(), None);
    }

    #[test]
    fn test_pad_options_skipped() {
        let mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let mut packet = make_ack_packet(mac, Ipv4Addr::new(10, 0, 0, 1));
        // Shift the message-type option behind a few PAD bytes
        packet[240] = 0;
        packet[241] = 0;
        packet[242] = 0;
        packet[243] = 53;
        packet[244] = 1;
        packet[245] = DhcpMessageType::Ack as u8;
        packet[246] = 255;

        let header = DhcpHeader::parse(&packet).unwrap();
        assert_eq!(header.message_type(), Some(DhcpMessageType::Ack));
    }
}
