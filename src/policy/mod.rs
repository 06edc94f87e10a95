//! Interface policy configuration
//!
//! Parses the per-interface configuration (classes, whitelist rules,
//! client defaults) into the compiled form the engine works with.
//! Malformed classes or rules degrade to absent with a warning; they
//! never abort the daemon.

mod class;
pub mod glob;

pub use class::{Class, ClassAction, VlanRetag};

use crate::protocol::MacAddr;
use gatefilter_common::CLASS_COUNT;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Raw per-interface configuration, accepted as TOML (boot file) or
/// JSON (control socket).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    #[serde(default)]
    pub client_autocreate: bool,
    #[serde(default)]
    pub client_autoremove: bool,
    /// Idle polling ticks before an auto-removable client is reaped.
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u32,
    /// Seconds a whitelist entry is extended by when still in use.
    #[serde(default = "default_active_timeout")]
    pub active_timeout: u32,
    #[serde(default)]
    pub default_class: u8,
    /// Falls back to `default_class` when unset.
    #[serde(default)]
    pub default_dns_class: Option<u8>,
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
    #[serde(default)]
    pub whitelist: Vec<WhitelistRule>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            client_autocreate: false,
            client_autoremove: false,
            client_timeout: default_client_timeout(),
            active_timeout: default_active_timeout(),
            default_class: 0,
            default_dns_class: None,
            classes: Vec::new(),
            whitelist: Vec::new(),
        }
    }
}

fn default_client_timeout() -> u32 {
    120
}

fn default_active_timeout() -> u32 {
    60
}

/// One class definition.
///
/// `dest_mac` (literal address) and `device_mac` (mirror the named
/// device's own address) are mutually exclusive encodings of the same
/// action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassConfig {
    pub index: u8,
    #[serde(default)]
    pub fwmark: Option<u32>,
    #[serde(default)]
    pub fwmark_mask: Option<u32>,
    /// Device name to redirect matching traffic to.
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default = "default_vlan_proto")]
    pub vlan_proto: u16,
    #[serde(default)]
    pub dest_mac: Option<MacAddr>,
    #[serde(default)]
    pub device_mac: Option<String>,
}

fn default_vlan_proto() -> u16 {
    0x8100
}

/// One whitelist group: hostnames granted `class` when resolved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WhitelistRule {
    pub class: u8,
    pub hosts: Vec<String>,
}

impl WhitelistRule {
    /// First matching host glob wins.
    pub fn matches(&self, name: &str) -> bool {
        self.hosts.iter().any(|h| glob::glob_match(h, name))
    }
}

/// Resolves device names to kernel state. Split out so policy
/// compilation is testable without live interfaces.
pub trait DeviceResolver {
    fn ifindex(&self, name: &str) -> Option<u32>;
    fn mac(&self, name: &str) -> Option<MacAddr>;
}

/// Resolver backed by if_nametoindex(3) and sysfs.
#[derive(Debug, Default)]
pub struct SysfsResolver;

impl DeviceResolver for SysfsResolver {
    fn ifindex(&self, name: &str) -> Option<u32> {
        let cname = std::ffi::CString::new(name).ok()?;
        let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if index == 0 {
            None
        } else {
            Some(index)
        }
    }

    fn mac(&self, name: &str) -> Option<MacAddr> {
        let path = format!("/sys/class/net/{}/address", name);
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

/// Compiled per-interface policy.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub classes: Vec<Class>,
    pub whitelist: Vec<WhitelistRule>,
    pub default_class: u8,
    pub default_dns_class: u8,
    pub client_autocreate: bool,
    pub client_autoremove: bool,
    pub client_timeout: u32,
    pub active_timeout: Duration,
}

impl Default for CompiledPolicy {
    fn default() -> Self {
        Self {
            classes: vec![Class::invalid(); CLASS_COUNT],
            whitelist: Vec::new(),
            default_class: 0,
            default_dns_class: 0,
            client_autocreate: false,
            client_autoremove: false,
            client_timeout: default_client_timeout(),
            active_timeout: Duration::from_secs(default_active_timeout() as u64),
        }
    }
}

impl CompiledPolicy {
    /// Resolve the class a hostname is whitelisted under, if any.
    /// Groups are evaluated in order; the first match wins.
    pub fn whitelist_class(&self, name: &str) -> Option<u8> {
        self.whitelist
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.class)
    }
}

/// Compile a raw configuration. Offending classes and whitelist groups
/// are dropped with a warning rather than failing the interface.
pub fn compile(cfg: &InterfaceConfig, resolver: &dyn DeviceResolver) -> CompiledPolicy {
    let mut classes = vec![Class::invalid(); CLASS_COUNT];

    for cc in &cfg.classes {
        let index = cc.index as usize;
        if index >= CLASS_COUNT {
            warn!(index = cc.index, "class index out of range, ignoring");
            continue;
        }
        match compile_class(cc, resolver) {
            Ok(class) => classes[index] = class,
            Err(reason) => {
                warn!(index = cc.index, %reason, "invalid class definition, ignoring");
            }
        }
    }

    let whitelist = cfg
        .whitelist
        .iter()
        .filter(|rule| {
            if rule.class as usize >= CLASS_COUNT {
                warn!(class = rule.class, "whitelist class out of range, ignoring group");
                return false;
            }
            if rule.hosts.is_empty() {
                warn!(class = rule.class, "whitelist group without hosts, ignoring");
                return false;
            }
            true
        })
        .cloned()
        .collect();

    let clamp_class = |c: u8, what: &str| -> u8 {
        if c as usize >= CLASS_COUNT {
            warn!(class = c, "{what} out of range, using class 0");
            0
        } else {
            c
        }
    };

    let default_class = clamp_class(cfg.default_class, "default_class");
    let default_dns_class = cfg
        .default_dns_class
        .map(|c| clamp_class(c, "default_dns_class"))
        .unwrap_or(default_class);

    CompiledPolicy {
        classes,
        whitelist,
        default_class,
        default_dns_class,
        client_autocreate: cfg.client_autocreate,
        client_autoremove: cfg.client_autoremove,
        client_timeout: cfg.client_timeout,
        active_timeout: Duration::from_secs(cfg.active_timeout as u64),
    }
}

fn compile_class(cc: &ClassConfig, resolver: &dyn DeviceResolver) -> Result<Class, String> {
    let mut actions = Vec::new();

    match (&cc.dest_mac, &cc.device_mac) {
        (Some(_), Some(_)) => {
            return Err("dest_mac and device_mac are mutually exclusive".into());
        }
        (Some(mac), None) => actions.push(ClassAction::SetDestMac(*mac)),
        (None, Some(dev)) => {
            let mac = resolver
                .mac(dev)
                .ok_or_else(|| format!("cannot read MAC of device {dev}"))?;
            actions.push(ClassAction::SetDestMac(mac));
        }
        (None, None) => {}
    }

    if let Some(target) = &cc.redirect {
        let ifindex = resolver
            .ifindex(target)
            .ok_or_else(|| format!("redirect target {target} does not exist"))?;
        let vlan = cc.vlan.map(|id| VlanRetag {
            id,
            proto: cc.vlan_proto,
        });
        actions.push(ClassAction::Redirect { ifindex, vlan });
    } else if cc.vlan.is_some() {
        return Err("vlan requires redirect".into());
    }

    if let Some(val) = cc.fwmark {
        actions.push(ClassAction::SetFwmark {
            val,
            mask: cc.fwmark_mask.unwrap_or(u32::MAX),
        });
    }

    Ok(Class {
        valid: true,
        actions,
    })
}

#[cfg(test)]
pub use tests::StubResolver;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct StubResolver {
        pub ifindexes: HashMap<String, u32>,
        pub macs: HashMap<String, MacAddr>,
    }

    impl StubResolver {
        pub fn with_device(name: &str, ifindex: u32) -> Self {
            let mut r = Self::default();
            r.ifindexes.insert(name.to_string(), ifindex);
            r
        }
    }

    impl DeviceResolver for StubResolver {
        fn ifindex(&self, name: &str) -> Option<u32> {
            self.ifindexes.get(name).copied()
        }

        fn mac(&self, name: &str) -> Option<MacAddr> {
            self.macs.get(name).copied()
        }
    }

    fn parse(json: &str) -> InterfaceConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse("{}");
        let policy = compile(&cfg, &StubResolver::default());

        assert_eq!(policy.classes.len(), CLASS_COUNT);
        assert!(policy.classes.iter().all(|c| !c.valid));
        assert_eq!(policy.client_timeout, 120);
        assert_eq!(policy.active_timeout, Duration::from_secs(60));
        assert_eq!(policy.default_class, 0);
        assert_eq!(policy.default_dns_class, 0);
    }

    #[test]
    fn test_compile_classes() {
        let cfg = parse(
            r#"{
                "default_class": 0,
                "default_dns_class": 1,
                "classes": [
                    { "index": 0, "redirect": "portal0" },
                    { "index": 1 },
                    { "index": 2, "fwmark": 256, "fwmark_mask": 65280 }
                ]
            }"#,
        );
        let resolver = StubResolver::with_device("portal0", 9);
        let policy = compile(&cfg, &resolver);

        assert!(policy.classes[0].valid);
        assert_eq!(
            policy.classes[0].actions,
            vec![ClassAction::Redirect {
                ifindex: 9,
                vlan: None
            }]
        );
        assert!(policy.classes[1].valid);
        assert!(policy.classes[1].actions.is_empty());
        assert_eq!(
            policy.classes[2].actions,
            vec![ClassAction::SetFwmark {
                val: 256,
                mask: 65280
            }]
        );
        assert_eq!(policy.default_dns_class, 1);
    }

    #[test]
    fn test_out_of_range_class_ignored() {
        let cfg = parse(r#"{ "classes": [ { "index": 16 } ] }"#);
        let policy = compile(&cfg, &StubResolver::default());
        assert!(policy.classes.iter().all(|c| !c.valid));
    }

    #[test]
    fn test_unresolved_redirect_degrades() {
        let cfg = parse(r#"{ "classes": [ { "index": 3, "redirect": "nosuch0" } ] }"#);
        let policy = compile(&cfg, &StubResolver::default());
        assert!(!policy.classes[3].valid);
    }

    #[test]
    fn test_exclusive_mac_encodings() {
        let cfg = parse(
            r#"{ "classes": [ {
                "index": 1,
                "dest_mac": "02:00:00:00:00:01",
                "device_mac": "wlan0"
            } ] }"#,
        );
        let policy = compile(&cfg, &StubResolver::default());
        assert!(!policy.classes[1].valid);
    }

    #[test]
    fn test_device_mac_mirrors_device() {
        let mac = MacAddr([0x02, 0, 0, 0, 0, 0x42]);
        let mut resolver = StubResolver::default();
        resolver.macs.insert("wlan0".into(), mac);

        let cfg = parse(r#"{ "classes": [ { "index": 2, "device_mac": "wlan0" } ] }"#);
        let policy = compile(&cfg, &resolver);

        assert_eq!(policy.classes[2].actions, vec![ClassAction::SetDestMac(mac)]);
    }

    #[test]
    fn test_whitelist_rules() {
        let cfg = parse(
            r#"{ "whitelist": [
                { "class": 1, "hosts": ["*.example.com"] },
                { "class": 2, "hosts": ["*.example.com", "cdn.net"] },
                { "class": 16, "hosts": ["dropped.invalid"] },
                { "class": 3, "hosts": [] }
            ] }"#,
        );
        let policy = compile(&cfg, &StubResolver::default());

        // Out-of-range group and empty group are dropped
        assert_eq!(policy.whitelist.len(), 2);
        // First group wins for overlapping patterns
        assert_eq!(policy.whitelist_class("www.example.com"), Some(1));
        assert_eq!(policy.whitelist_class("cdn.net"), Some(2));
        assert_eq!(policy.whitelist_class("other.org"), None);
    }

    #[test]
    fn test_out_of_range_defaults_clamped() {
        let cfg = parse(r#"{ "default_class": 99 }"#);
        let policy = compile(&cfg, &StubResolver::default());
        assert_eq!(policy.default_class, 0);
        assert_eq!(policy.default_dns_class, 0);
    }

    #[test]
    fn test_vlan_without_redirect_rejected() {
        let cfg = parse(r#"{ "classes": [ { "index": 4, "vlan": 100 } ] }"#);
        let policy = compile(&cfg, &StubResolver::default());
        assert!(!policy.classes[4].valid);
    }
}
