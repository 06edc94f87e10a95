//! Client records
//!
//! One record per client MAC per interface. The kernel map entry is
//! mirrored in `entry`; its counters are kernel-written and refreshed
//! on read.

use crate::{Error, Result};
use gatefilter_common::{acct, ClientEntry, CLASS_COUNT};
use serde_json::{Map, Value};

/// Tracked state for one client.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// Kernel map mirror (class, addresses, flags, counters).
    pub entry: ClientEntry,
    /// Polling ticks since the client was last seen.
    pub idle: u32,
    /// Seen by a station event since the last idle tick.
    pub refreshed: bool,
    /// Externally assigned identifier.
    pub id: Option<String>,
    /// Owning device name, when known.
    pub device: Option<String>,
    /// Arbitrary key/value metadata attached by the orchestrator.
    pub data: Map<String, Value>,
}

/// Field-wise client mutation; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub id: Option<String>,
    pub class: Option<u8>,
    pub dns_class: Option<u8>,
    pub accounting: Option<u8>,
    pub data: Option<Map<String, Value>>,
    pub device: Option<String>,
    /// Clear metadata and counters before applying the rest.
    pub flush: bool,
}

impl ClientUpdate {
    /// Reject out-of-range class values before anything is mutated.
    pub fn validate(&self) -> Result<()> {
        for class in [self.class, self.dns_class].into_iter().flatten() {
            if class as usize >= CLASS_COUNT {
                return Err(Error::InvalidClass(class));
            }
        }
        Ok(())
    }
}

/// Parse accounting flag names ("ul", "dl"); unknown names are ignored.
pub fn accounting_flags(names: &[String]) -> u8 {
    let mut flags = 0;
    for name in names {
        match name.as_str() {
            "ul" => flags |= acct::UL,
            "dl" => flags |= acct::DL,
            _ => {}
        }
    }
    flags
}

/// Render accounting flags back to names.
pub fn accounting_names(flags: u8) -> Vec<&'static str> {
    let mut names = Vec::new();
    if flags & acct::UL != 0 {
        names.push("ul");
    }
    if flags & acct::DL != 0 {
        names.push("dl");
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_in_range() {
        let update = ClientUpdate {
            class: Some(15),
            dns_class: Some(0),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_validate_out_of_range() {
        let update = ClientUpdate {
            class: Some(16),
            ..Default::default()
        };
        assert!(matches!(update.validate(), Err(Error::InvalidClass(16))));

        let update = ClientUpdate {
            dns_class: Some(200),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_accounting_flags() {
        assert_eq!(accounting_flags(&["ul".into()]), acct::UL);
        assert_eq!(
            accounting_flags(&["ul".into(), "dl".into()]),
            acct::UL | acct::DL
        );
        assert_eq!(accounting_flags(&["bogus".into()]), 0);
        assert_eq!(accounting_flags(&[]), 0);
    }

    #[test]
    fn test_accounting_names_roundtrip() {
        let flags = acct::UL | acct::DL;
        let names: Vec<String> = accounting_names(flags)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(accounting_flags(&names), flags);
    }
}
