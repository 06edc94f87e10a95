//! Process-wide engine state
//!
//! The `Context` owns every interface plus the cross-interface address
//! learning cache. It is single-threaded by design: the reactor loop in
//! `main` is its only caller, and one packet (or one control request)
//! is fully processed, kernel pushes included, before the next one.

use super::addr_cache::AddrCache;
use super::client::ClientUpdate;
use super::interface::{ClientEvent, ClientSnapshot, Interface};
use crate::kernel::FastPathProvider;
use crate::policy::{DeviceResolver, InterfaceConfig};
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use gatefilter_common::CLASS_COUNT;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Client lifecycle event published to control subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    ClientAdd {
        interface: String,
        address: MacAddr,
        id: Option<String>,
    },
    ClientRemove {
        interface: String,
        address: MacAddr,
        id: Option<String>,
    },
}

pub struct Context {
    /// Ordered so broadcast packets hit interfaces deterministically.
    interfaces: BTreeMap<String, Interface>,
    addr_cache: AddrCache,
    provider: Box<dyn FastPathProvider>,
    resolver: Box<dyn DeviceResolver>,
    metrics: Arc<MetricsRegistry>,
    notify: Option<UnboundedSender<Notification>>,
}

impl Context {
    pub fn new(
        provider: Box<dyn FastPathProvider>,
        resolver: Box<dyn DeviceResolver>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            interfaces: BTreeMap::new(),
            addr_cache: AddrCache::default(),
            provider,
            resolver,
            metrics,
            notify: None,
        }
    }

    /// Register the sink for client add/remove notifications.
    pub fn set_notify(&mut self, tx: UnboundedSender<Notification>) {
        self.notify = Some(tx);
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    fn emit(&self, notification: Notification) {
        if let Some(tx) = &self.notify {
            let _ = tx.send(notification);
        }
    }

    fn iface_mut(&mut self, name: &str) -> Result<&mut Interface> {
        self.interfaces
            .get_mut(name)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: name.to_string(),
            })
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.interfaces.keys().cloned().collect()
    }

    pub(crate) fn interfaces_mut(&mut self) -> impl Iterator<Item = &mut Interface> {
        self.interfaces.values_mut()
    }

    /// Create an interface or reconfigure an existing one.
    pub fn interface_add(
        &mut self,
        name: &str,
        config: &InterfaceConfig,
        devices: &[String],
    ) -> Result<()> {
        let iface = match self.interfaces.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let fastpath = self.provider.create(name)?;
                info!(interface = name, "interface created");
                entry.insert(Interface::new(name, fastpath))
            }
        };
        iface.set_config(config, devices, self.resolver.as_ref());
        Ok(())
    }

    /// Destroy an interface, releasing clients and kernel resources.
    pub fn interface_remove(&mut self, name: &str) -> Result<()> {
        let mut iface = self
            .interfaces
            .remove(name)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: name.to_string(),
            })?;

        for (mac, client) in iface.release() {
            self.emit(Notification::ClientRemove {
                interface: name.to_string(),
                address: mac,
                id: client.id,
            });
        }
        info!(interface = name, "interface removed");
        Ok(())
    }

    /// Re-resolve device indices on every interface.
    pub fn check_devices(&mut self) {
        let resolver = self.resolver.as_ref();
        for iface in self.interfaces.values_mut() {
            iface.check_devices(resolver);
        }
    }

    /// Create or update a client. `addr` wins over `id`; an `id`-only
    /// call can update an existing client but never create one.
    pub fn client_set(
        &mut self,
        iface_name: &str,
        addr: Option<MacAddr>,
        id: Option<&str>,
        update: ClientUpdate,
    ) -> Result<()> {
        let iface = self.iface_mut(iface_name)?;
        let mac = iface
            .resolve_client(addr, id)
            .ok_or_else(|| Error::InvalidArgument("client address required".into()))?;

        let seed = self.addr_cache.get(&mac).copied();
        let new_id = update.id.clone();
        let iface = self.iface_mut(iface_name)?;
        let event = iface.set_client(mac, update, seed.as_ref())?;

        if event == ClientEvent::Created {
            self.metrics.clients_created.inc();
            self.emit(Notification::ClientAdd {
                interface: iface_name.to_string(),
                address: mac,
                id: new_id,
            });
        }
        Ok(())
    }

    pub fn client_remove(
        &mut self,
        iface_name: &str,
        addr: Option<MacAddr>,
        id: Option<&str>,
    ) -> Result<()> {
        let iface = self.iface_mut(iface_name)?;
        let mac = iface
            .resolve_client(addr, id)
            .ok_or(Error::ClientNotFound)?;
        let client = iface.remove_client(mac)?;

        self.metrics.clients_removed.inc();
        self.emit(Notification::ClientRemove {
            interface: iface_name.to_string(),
            address: mac,
            id: client.id,
        });
        Ok(())
    }

    pub fn client_get(
        &mut self,
        iface_name: &str,
        addr: Option<MacAddr>,
        id: Option<&str>,
    ) -> Result<ClientSnapshot> {
        let iface = self.iface_mut(iface_name)?;
        let mac = iface
            .resolve_client(addr, id)
            .ok_or(Error::ClientNotFound)?;
        iface.client_snapshot(mac).ok_or(Error::ClientNotFound)
    }

    pub fn client_list(&mut self, iface_name: &str) -> Result<Vec<ClientSnapshot>> {
        Ok(self.iface_mut(iface_name)?.list_clients())
    }

    /// Static whitelist add/remove from the control surface.
    pub fn whitelist_update(
        &mut self,
        iface_name: &str,
        addrs: &[IpAddr],
        class: Option<u8>,
    ) -> Result<()> {
        if let Some(class) = class {
            if class as usize >= CLASS_COUNT {
                return Err(Error::InvalidClass(class));
            }
        }
        self.iface_mut(iface_name)?.static_whitelist(addrs, class);
        Ok(())
    }

    /// Station-dump trigger for one client.
    pub fn station_seen(&mut self, iface_name: &str, mac: MacAddr) -> Result<()> {
        let seed = self.addr_cache.get(&mac).copied();
        let iface = self.iface_mut(iface_name)?;
        if iface.station_seen(mac, seed.as_ref())? == Some(ClientEvent::Created) {
            self.metrics.clients_created.inc();
            self.emit(Notification::ClientAdd {
                interface: iface_name.to_string(),
                address: mac,
                id: None,
            });
        }
        Ok(())
    }

    /// Record a snooped address: cache first (first write wins per
    /// family), then every interface's live client for the MAC.
    pub fn learn_address(&mut self, mac: MacAddr, addr: IpAddr, now: Instant) {
        self.addr_cache.learn(mac, addr, now);
        self.metrics.addresses_learned.inc();
        debug!(client = %mac, %addr, "address observed");

        for iface in self.interfaces.values_mut() {
            iface.learn_address(mac, addr);
        }
    }

    /// One polling tick across all interfaces, plus address cache GC.
    pub fn idle_tick(&mut self, now: Instant) {
        let mut removed = Vec::new();
        for (name, iface) in self.interfaces.iter_mut() {
            for (mac, client) in iface.idle_tick() {
                removed.push((name.clone(), mac, client.id));
            }
        }
        for (interface, address, id) in removed {
            self.metrics.clients_removed.inc();
            self.emit(Notification::ClientRemove {
                interface,
                address,
                id,
            });
        }

        let in_use: HashSet<MacAddr> = self
            .interfaces
            .values()
            .flat_map(|i| i.client_macs().copied())
            .collect();
        self.addr_cache.gc(now, &in_use);
    }

    /// Age the CNAME caches (fixed 1 s cadence).
    pub fn cname_tick(&mut self) {
        for iface in self.interfaces.values_mut() {
            iface.cname_tick();
        }
    }

    /// Run the whitelist sweep on every interface with a due deadline
    /// and return the next deadline across all of them.
    pub fn whitelist_gc(&mut self, now: Instant) -> Option<Instant> {
        for iface in self.interfaces.values_mut() {
            if let Some(deadline) = iface.next_gc_deadline() {
                if deadline <= now {
                    iface.whitelist_gc(now);
                    self.metrics.whitelist_gc_runs.inc();
                }
            }
        }
        self.next_gc_deadline()
    }

    /// Earliest pending whitelist expiry across all interfaces.
    pub fn next_gc_deadline(&self) -> Option<Instant> {
        self.interfaces
            .values()
            .filter_map(|i| i.next_gc_deadline())
            .min()
    }
}
