//! Interface state
//!
//! One `Interface` owns everything scoped to a configured gateway
//! interface: the compiled policy, the client registry, the learned
//! whitelist, the CNAME cache and the fast-path handle its state is
//! mirrored into.

use super::addr_cache::LearnedAddrs;
use super::client::{Client, ClientUpdate};
use super::whitelist::{CnameCache, WhitelistTable};
use crate::kernel::FastPath;
use crate::policy::{self, Class, CompiledPolicy, DeviceResolver, InterfaceConfig};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use gatefilter_common::{ClassEntry, CLASS_COUNT};
use serde_json::{Map, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Instant;
use tracing::{debug, warn};

/// An L2 port bound to an interface. The resolved kernel index may
/// change across reconfiguration or hot-plug; attach follows it.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub ifindex: Option<u32>,
}

/// What a `set_client` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Created,
    Updated,
}

/// Read-only view of one client, with counters freshly read back from
/// the kernel map.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub address: MacAddr,
    pub id: Option<String>,
    pub device: Option<String>,
    pub idle: u32,
    pub state: u8,
    pub dns_state: u8,
    pub ip4: Option<Ipv4Addr>,
    pub ip6: Option<Ipv6Addr>,
    pub accounting: u8,
    pub data: Map<String, Value>,
    pub packets_ul: u64,
    pub packets_dl: u64,
    pub bytes_ul: u64,
    pub bytes_dl: u64,
    pub action: Class,
    pub dns_action: Class,
}

pub struct Interface {
    name: String,
    devices: Vec<Device>,
    pub(crate) policy: CompiledPolicy,
    /// Last successfully pushed class slots, for content-diffing.
    pushed_classes: Vec<ClassEntry>,
    clients: HashMap<MacAddr, Client>,
    by_id: HashMap<String, MacAddr>,
    pub(crate) whitelist: WhitelistTable,
    pub(crate) cname_cache: CnameCache,
    pub(crate) fastpath: Box<dyn FastPath>,
}

impl Interface {
    pub fn new(name: &str, fastpath: Box<dyn FastPath>) -> Self {
        Self {
            name: name.to_string(),
            devices: Vec::new(),
            policy: CompiledPolicy::default(),
            pushed_classes: vec![ClassEntry::INVALID; CLASS_COUNT],
            clients: HashMap::new(),
            by_id: HashMap::new(),
            whitelist: WhitelistTable::new(),
            cname_cache: CnameCache::new(),
            fastpath,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &CompiledPolicy {
        &self.policy
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_client(&self, mac: &MacAddr) -> bool {
        self.clients.contains_key(mac)
    }

    pub fn client_macs(&self) -> impl Iterator<Item = &MacAddr> {
        self.clients.keys()
    }

    /// Apply a (re)configuration: compile the policy, sync changed
    /// class slots, rebind the device list.
    pub fn set_config(
        &mut self,
        cfg: &InterfaceConfig,
        devices: &[String],
        resolver: &dyn DeviceResolver,
    ) {
        self.policy = policy::compile(cfg, resolver);
        self.sync_classes();

        let mut old: HashMap<String, Option<u32>> = self
            .devices
            .drain(..)
            .map(|d| (d.name, d.ifindex))
            .collect();

        for name in devices {
            let ifindex = old.remove(name).flatten();
            self.devices.push(Device {
                name: name.clone(),
                ifindex,
            });
        }

        // Devices dropped from the configuration release their attach.
        for (name, ifindex) in old {
            if ifindex.is_some() {
                if let Err(e) = self.fastpath.detach(&name) {
                    warn!(interface = %self.name, device = %name, error = %e, "detach failed");
                }
            }
        }

        self.check_devices(resolver);
    }

    /// Push class slots whose encoding changed since the last push.
    /// Slots removed by reconfiguration fall back to the invalid entry.
    fn sync_classes(&mut self) {
        for index in 0..CLASS_COUNT {
            let desired = self.policy.classes[index].encode();
            if desired == self.pushed_classes[index] {
                continue;
            }
            match self.fastpath.push_class(index as u8, &desired) {
                // Only a confirmed write updates the diff cache, so a
                // failed push is retried on the next sync.
                Ok(()) => self.pushed_classes[index] = desired,
                Err(e) => {
                    warn!(interface = %self.name, index, error = %e, "class push failed");
                }
            }
        }
    }

    /// Re-resolve device indices and follow changes with
    /// detach/attach.
    pub fn check_devices(&mut self, resolver: &dyn DeviceResolver) {
        let fastpath = &mut self.fastpath;
        for dev in &mut self.devices {
            let new_index = resolver.ifindex(&dev.name);
            if new_index == dev.ifindex {
                continue;
            }

            if dev.ifindex.is_some() {
                if let Err(e) = fastpath.detach(&dev.name) {
                    warn!(device = %dev.name, error = %e, "detach failed");
                }
            }
            if new_index.is_some() {
                if let Err(e) = fastpath.attach(&dev.name) {
                    warn!(device = %dev.name, error = %e, "attach failed");
                    dev.ifindex = None;
                    continue;
                }
            }
            debug!(device = %dev.name, ifindex = ?new_index, "device index changed");
            dev.ifindex = new_index;
        }
    }

    /// Create or update a client. Out-of-range classes reject the whole
    /// call without touching the record. On creation, addresses are
    /// seeded from the learning cache.
    pub fn set_client(
        &mut self,
        mac: MacAddr,
        update: ClientUpdate,
        seed: Option<&LearnedAddrs>,
    ) -> Result<ClientEvent> {
        update.validate()?;
        let flush = update.flush;

        let event;
        let client = match self.clients.entry(mac) {
            Entry::Occupied(entry) => {
                event = ClientEvent::Updated;
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                event = ClientEvent::Created;
                let mut client = Client {
                    refreshed: true,
                    ..Client::default()
                };
                client.entry.cur_class = self.policy.default_class;
                client.entry.dns_class = self.policy.default_dns_class;
                if let Some(seed) = seed {
                    if let Some(ip4) = seed.ip4 {
                        client.entry.set_ip4(ip4);
                    }
                    if let Some(ip6) = seed.ip6 {
                        client.entry.set_ip6(ip6);
                    }
                }
                entry.insert(client)
            }
        };

        if update.flush {
            client.data.clear();
            client.entry.clear_counters();
        }

        if let Some(id) = update.id {
            if let Some(old) = client.id.take() {
                self.by_id.remove(&old);
            }
            self.by_id.insert(id.clone(), mac);
            client.id = Some(id);
        }
        if let Some(class) = update.class {
            client.entry.cur_class = class;
        }
        if let Some(dns_class) = update.dns_class {
            client.entry.dns_class = dns_class;
        }
        if let Some(accounting) = update.accounting {
            client.entry.flags = accounting;
        }
        if let Some(device) = update.device {
            client.device = Some(device);
        }
        if let Some(data) = update.data {
            for (key, value) in data {
                client.data.insert(key, value);
            }
        }

        self.sync_client(mac, !flush);
        Ok(event)
    }

    /// Mirror a client record into the kernel map. Counters are
    /// kernel-owned, so the live values are folded into the mirror
    /// first; an explicit flush skips that and zeroes them instead.
    fn sync_client(&mut self, mac: MacAddr, preserve_counters: bool) {
        if preserve_counters {
            self.refresh_counters(mac);
        }
        let Some(client) = self.clients.get(&mac) else {
            return;
        };
        if let Err(e) = self.fastpath.push_client(mac, &client.entry) {
            warn!(interface = %self.name, client = %mac, error = %e, "client push failed");
        }
    }

    /// Remove a client, releasing its kernel entry.
    pub fn remove_client(&mut self, mac: MacAddr) -> Result<Client> {
        let client = self.clients.remove(&mac).ok_or(Error::ClientNotFound)?;
        if let Some(id) = &client.id {
            self.by_id.remove(id);
        }
        if let Err(e) = self.fastpath.delete_client(mac) {
            warn!(interface = %self.name, client = %mac, error = %e, "client delete failed");
        }
        Ok(client)
    }

    /// Resolve a client key: an explicit address wins, otherwise the
    /// external id index is consulted.
    pub fn resolve_client(&self, addr: Option<MacAddr>, id: Option<&str>) -> Option<MacAddr> {
        addr.or_else(|| id.and_then(|i| self.by_id.get(i).copied()))
    }

    /// Pull kernel-written counters into the local record.
    fn refresh_counters(&mut self, mac: MacAddr) {
        let Some(client) = self.clients.get_mut(&mac) else {
            return;
        };
        match self.fastpath.read_client(mac) {
            Ok(Some(entry)) => {
                client.entry.packets_ul = entry.packets_ul;
                client.entry.packets_dl = entry.packets_dl;
                client.entry.bytes_ul = entry.bytes_ul;
                client.entry.bytes_dl = entry.bytes_dl;
            }
            Ok(None) => {}
            Err(e) => warn!(client = %mac, error = %e, "client read-back failed"),
        }
    }

    /// Snapshot one client, counters refreshed from the kernel first.
    pub fn client_snapshot(&mut self, mac: MacAddr) -> Option<ClientSnapshot> {
        self.refresh_counters(mac);
        let client = self.clients.get(&mac)?;
        Some(self.snapshot_of(mac, client))
    }

    /// Snapshot every client on this interface.
    pub fn list_clients(&mut self) -> Vec<ClientSnapshot> {
        let macs: Vec<MacAddr> = self.clients.keys().copied().collect();
        macs.into_iter()
            .filter_map(|mac| self.client_snapshot(mac))
            .collect()
    }

    fn snapshot_of(&self, mac: MacAddr, client: &Client) -> ClientSnapshot {
        let class_of = |index: u8| {
            self.policy
                .classes
                .get(index as usize)
                .cloned()
                .unwrap_or_default()
        };
        ClientSnapshot {
            address: mac,
            id: client.id.clone(),
            device: client.device.clone(),
            idle: client.idle,
            state: client.entry.cur_class,
            dns_state: client.entry.dns_class,
            ip4: client.entry.ip4_addr(),
            ip6: client.entry.ip6_addr(),
            accounting: client.entry.flags,
            data: client.data.clone(),
            packets_ul: client.entry.packets_ul,
            packets_dl: client.entry.packets_dl,
            bytes_ul: client.entry.bytes_ul,
            bytes_dl: client.entry.bytes_dl,
            action: class_of(client.entry.cur_class),
            dns_action: class_of(client.entry.dns_class),
        }
    }

    /// Station-dump trigger: refresh an existing client or auto-create
    /// one when the interface allows it.
    pub fn station_seen(
        &mut self,
        mac: MacAddr,
        seed: Option<&LearnedAddrs>,
    ) -> Result<Option<ClientEvent>> {
        if let Some(client) = self.clients.get_mut(&mac) {
            client.refreshed = true;
            return Ok(None);
        }
        if !self.policy.client_autocreate {
            return Ok(None);
        }
        self.set_client(mac, ClientUpdate::default(), seed).map(Some)
    }

    /// One polling tick: age every client not refreshed since the last
    /// tick, reaping the ones past the timeout when auto-remove is on.
    pub fn idle_tick(&mut self) -> Vec<(MacAddr, Client)> {
        let timeout = self.policy.client_timeout;
        let autoremove = self.policy.client_autoremove;

        let mut expired = Vec::new();
        for (mac, client) in self.clients.iter_mut() {
            if client.refreshed {
                client.refreshed = false;
                client.idle = 0;
                continue;
            }
            client.idle += 1;
            if autoremove && client.idle >= timeout {
                expired.push(*mac);
            }
        }

        let mut removed = Vec::new();
        for mac in expired {
            debug!(interface = %self.name, client = %mac, "idle timeout, removing client");
            if let Ok(client) = self.remove_client(mac) {
                removed.push((mac, client));
            }
        }
        removed
    }

    /// Fill the matching address family of a live client, if still
    /// unset; learned addresses stick until an explicit flush.
    pub fn learn_address(&mut self, mac: MacAddr, addr: IpAddr) -> bool {
        let Some(client) = self.clients.get_mut(&mac) else {
            return false;
        };

        let changed = match addr {
            IpAddr::V4(ip4) => {
                if client.entry.ip4_addr().is_some() {
                    false
                } else {
                    client.entry.set_ip4(ip4);
                    true
                }
            }
            IpAddr::V6(ip6) => {
                if client.entry.ip6_addr().is_some() {
                    false
                } else {
                    client.entry.set_ip6(ip6);
                    true
                }
            }
        };

        if changed {
            debug!(interface = %self.name, client = %mac, %addr, "address learned");
            self.sync_client(mac, true);
        }
        changed
    }

    /// Static whitelist manipulation (control surface); entries written
    /// this way carry no expiry and are never garbage collected.
    pub fn static_whitelist(&mut self, addrs: &[IpAddr], class: Option<u8>) {
        for addr in addrs {
            if let Err(e) = self.fastpath.push_whitelist(*addr, class) {
                warn!(interface = %self.name, %addr, error = %e, "whitelist write failed");
            }
        }
    }

    pub(crate) fn whitelist_grant(
        &mut self,
        addr: IpAddr,
        class: u8,
        ttl: std::time::Duration,
        now: Instant,
    ) {
        self.whitelist
            .grant(self.fastpath.as_mut(), addr, class, ttl, now);
    }

    /// Expiry sweep over the learned whitelist; returns the next
    /// deadline to arm the GC timer with.
    pub fn whitelist_gc(&mut self, now: Instant) -> Option<Instant> {
        self.whitelist
            .gc(self.fastpath.as_mut(), self.policy.active_timeout, now)
    }

    pub fn next_gc_deadline(&self) -> Option<Instant> {
        self.whitelist.next_deadline()
    }

    pub fn cname_tick(&mut self) {
        self.cname_cache.tick();
    }

    /// Tear down: remove all clients and release device attaches.
    pub fn release(&mut self) -> Vec<(MacAddr, Client)> {
        let macs: Vec<MacAddr> = self.clients.keys().copied().collect();
        let mut removed = Vec::new();
        for mac in macs {
            if let Ok(client) = self.remove_client(mac) {
                removed.push((mac, client));
            }
        }

        let fastpath = &mut self.fastpath;
        for dev in &mut self.devices {
            if dev.ifindex.take().is_some() {
                if let Err(e) = fastpath.detach(&dev.name) {
                    warn!(device = %dev.name, error = %e, "detach failed");
                }
            }
        }
        removed
    }
}
