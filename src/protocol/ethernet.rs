//! Ethernet II framing

use super::{Cursor, MacAddr};
use crate::Result;

/// Ethernet header size (no VLAN tag)
pub const HEADER_SIZE: usize = 14;

/// Parsed Ethernet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dest: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    /// Pull the Ethernet header off the front of the cursor.
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let dest = read_mac(cur)?;
        let src = read_mac(cur)?;
        let ethertype = cur.be16("ethernet header")?;
        Ok(Self {
            dest,
            src,
            ethertype,
        })
    }
}

/// 802.1Q/802.1ad tag following the Ethernet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanHeader {
    pub tci: u16,
    pub ethertype: u16,
}

impl VlanHeader {
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let tci = cur.be16("vlan tag")?;
        let ethertype = cur.be16("vlan tag")?;
        Ok(Self { tci, ethertype })
    }

    pub fn vid(&self) -> u16 {
        self.tci & 0x0fff
    }
}

fn read_mac(cur: &mut Cursor<'_>) -> Result<MacAddr> {
    let b = cur.take(6, "ethernet header")?;
    Ok(MacAddr([b[0], b[1], b[2], b[3], b[4], b[5]]))
}
