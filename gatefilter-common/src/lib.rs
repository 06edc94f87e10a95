//! Map key/value types shared with the kernel classifier.
//!
//! The classifier program consumes these maps on every packet at the tc
//! ingress/egress hooks; the daemon is the only writer except where noted.
//! Layouts are part of the compatibility contract with the attached
//! program and must not change without rebuilding both sides.

#![cfg_attr(not(feature = "user"), no_std)]

use core::net::{Ipv4Addr, Ipv6Addr};

/// Number of slots in the class table. Class ids are dense indices
/// into this array.
pub const CLASS_COUNT: usize = 16;

/// Map names as they appear in the classifier object file.
pub mod maps {
    pub const CLASS_TABLE: &str = "CLASS_TABLE";
    pub const CLIENT_TABLE: &str = "CLIENT_TABLE";
    pub const WHITELIST_V4: &str = "WHITELIST_V4";
    pub const WHITELIST_V6: &str = "WHITELIST_V6";
}

/// Bits of [`ClassEntry::actions`].
///
/// A slot without `VALID` drops matching traffic. The remaining bits
/// select which payload fields of the entry are meaningful.
pub mod action {
    pub const VALID: u32 = 1 << 0;
    pub const SET_DEST_MAC: u32 = 1 << 1;
    pub const REDIRECT: u32 = 1 << 2;
    pub const REDIRECT_VLAN: u32 = 1 << 3;
    pub const FWMARK: u32 = 1 << 4;
}

/// Bits of [`ClientEntry::flags`].
pub mod acct {
    /// Count upload packets/bytes for this client.
    pub const UL: u8 = 1 << 0;
    /// Count download packets/bytes for this client.
    pub const DL: u8 = 1 << 1;
}

/// One slot of the class table (Array map, [`CLASS_COUNT`] entries).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassEntry {
    /// Bitmask of `action::*` flags.
    pub actions: u32,
    /// Rewritten destination MAC when `SET_DEST_MAC` is set.
    pub dest_mac: [u8; 6],
    pub _pad: [u8; 2],
    /// skb mark value/mask applied when `FWMARK` is set.
    pub fwmark_val: u32,
    pub fwmark_mask: u32,
    /// Target interface index when `REDIRECT` is set.
    pub redirect_ifindex: u32,
    /// VLAN retag applied on redirect when `REDIRECT_VLAN` is set.
    pub vlan_id: u16,
    /// TPID for the retag, e.g. 0x8100.
    pub vlan_proto: u16,
}

impl ClassEntry {
    /// The empty slot: no `VALID` bit, classifier drops matching traffic.
    pub const INVALID: ClassEntry = ClassEntry {
        actions: 0,
        dest_mac: [0; 6],
        _pad: [0; 2],
        fwmark_val: 0,
        fwmark_mask: 0,
        redirect_ifindex: 0,
        vlan_id: 0,
        vlan_proto: 0,
    };
}

/// Per-client state (HashMap keyed by 6-byte MAC).
///
/// The four counters are written by the classifier only; the daemon
/// treats them as read-only and preserves them on update.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientEntry {
    /// Learned IPv4 address in network byte order, 0 when unknown.
    pub ip4: u32,
    /// Learned IPv6 address, all-zero when unknown.
    pub ip6: [u8; 16],
    /// Class applied to data traffic.
    pub cur_class: u8,
    /// Class applied to DNS traffic, may differ from `cur_class`.
    pub dns_class: u8,
    /// Bitmask of `acct::*` flags.
    pub flags: u8,
    pub _pad: u8,
    pub packets_ul: u64,
    pub packets_dl: u64,
    pub bytes_ul: u64,
    pub bytes_dl: u64,
}

impl ClientEntry {
    pub fn ip4_addr(&self) -> Option<Ipv4Addr> {
        if self.ip4 == 0 {
            None
        } else {
            Some(Ipv4Addr::from(u32::from_be(self.ip4)))
        }
    }

    pub fn set_ip4(&mut self, addr: Ipv4Addr) {
        self.ip4 = u32::from(addr).to_be();
    }

    pub fn ip6_addr(&self) -> Option<Ipv6Addr> {
        if self.ip6 == [0u8; 16] {
            None
        } else {
            Some(Ipv6Addr::from(self.ip6))
        }
    }

    pub fn set_ip6(&mut self, addr: Ipv6Addr) {
        self.ip6 = addr.octets();
    }

    /// Zeroes the kernel-owned counters (explicit flush only).
    pub fn clear_counters(&mut self) {
        self.packets_ul = 0;
        self.packets_dl = 0;
        self.bytes_ul = 0;
        self.bytes_dl = 0;
    }
}

/// Value of the whitelist maps (HashMap keyed by 4- or 16-byte address).
///
/// `seen` is set to 1 by the classifier on any matching packet and
/// cleared by the daemon during garbage collection.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WhitelistValue {
    pub class: u8,
    pub seen: u8,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ClassEntry {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for ClientEntry {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for WhitelistValue {}
