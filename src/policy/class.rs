//! Traffic class model
//!
//! A class bundles the forwarding actions the kernel classifier applies
//! to matching flows. The control plane works with the tagged
//! [`ClassAction`] form and only flattens to the kernel's bitmask slot
//! encoding at the sync boundary.

use crate::protocol::MacAddr;
use gatefilter_common::{action, ClassEntry};

/// VLAN retag applied when redirecting into another interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanRetag {
    pub id: u16,
    /// TPID, e.g. 0x8100.
    pub proto: u16,
}

/// One forwarding action of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassAction {
    /// Rewrite the destination MAC of matching frames.
    SetDestMac(MacAddr),
    /// Redirect matching frames to another kernel interface.
    Redirect {
        ifindex: u32,
        vlan: Option<VlanRetag>,
    },
    /// Apply an skb firewall mark.
    SetFwmark { val: u32, mask: u32 },
}

/// A traffic class slot. `valid == false` means matching traffic is
/// dropped by the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Class {
    pub valid: bool,
    pub actions: Vec<ClassAction>,
}

impl Class {
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Flatten to the kernel map slot encoding.
    pub fn encode(&self) -> ClassEntry {
        if !self.valid {
            return ClassEntry::INVALID;
        }

        let mut entry = ClassEntry {
            actions: action::VALID,
            ..ClassEntry::INVALID
        };

        for act in &self.actions {
            match *act {
                ClassAction::SetDestMac(mac) => {
                    entry.actions |= action::SET_DEST_MAC;
                    entry.dest_mac = mac.0;
                }
                ClassAction::Redirect { ifindex, vlan } => {
                    entry.actions |= action::REDIRECT;
                    entry.redirect_ifindex = ifindex;
                    if let Some(retag) = vlan {
                        entry.actions |= action::REDIRECT_VLAN;
                        entry.vlan_id = retag.id;
                        entry.vlan_proto = retag.proto;
                    }
                }
                ClassAction::SetFwmark { val, mask } => {
                    entry.actions |= action::FWMARK;
                    entry.fwmark_val = val;
                    entry.fwmark_mask = mask;
                }
            }
        }

        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_class_encodes_empty() {
        assert_eq!(Class::invalid().encode(), ClassEntry::INVALID);
    }

    #[test]
    fn test_valid_passthrough() {
        let class = Class {
            valid: true,
            actions: vec![],
        };
        let entry = class.encode();
        assert_eq!(entry.actions, action::VALID);
    }

    #[test]
    fn test_encode_redirect_with_vlan() {
        let class = Class {
            valid: true,
            actions: vec![ClassAction::Redirect {
                ifindex: 7,
                vlan: Some(VlanRetag {
                    id: 100,
                    proto: 0x8100,
                }),
            }],
        };
        let entry = class.encode();

        assert_eq!(
            entry.actions,
            action::VALID | action::REDIRECT | action::REDIRECT_VLAN
        );
        assert_eq!(entry.redirect_ifindex, 7);
        assert_eq!(entry.vlan_id, 100);
        assert_eq!(entry.vlan_proto, 0x8100);
    }

    #[test]
    fn test_encode_mac_and_fwmark() {
        let mac = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        let class = Class {
            valid: true,
            actions: vec![
                ClassAction::SetDestMac(mac),
                ClassAction::SetFwmark {
                    val: 0x100,
                    mask: 0xff00,
                },
            ],
        };
        let entry = class.encode();

        assert_eq!(
            entry.actions,
            action::VALID | action::SET_DEST_MAC | action::FWMARK
        );
        assert_eq!(entry.dest_mac, mac.0);
        assert_eq!(entry.fwmark_val, 0x100);
        assert_eq!(entry.fwmark_mask, 0xff00);
    }
}
