//! In-memory fast path
//!
//! Map semantics of the kernel backend without a kernel: used by the
//! test suite and by `--no-kernel` development runs. Handles are cheap
//! clones sharing one store, so a test can keep a handle to the maps an
//! interface owns.

use super::{FastPath, FastPathProvider};
use crate::protocol::MacAddr;
use crate::Result;
use gatefilter_common::{ClassEntry, ClientEntry, WhitelistValue, CLASS_COUNT};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::rc::Rc;

/// Write counters, for observing sync traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub class_writes: u64,
    pub client_writes: u64,
    pub client_deletes: u64,
    pub whitelist_writes: u64,
    pub whitelist_deletes: u64,
}

#[derive(Default)]
struct Store {
    classes: Vec<ClassEntry>,
    clients: HashMap<[u8; 6], ClientEntry>,
    whitelist: HashMap<IpAddr, WhitelistValue>,
    attached: BTreeSet<String>,
    stats: SyncStats,
}

/// Cloneable handle on an in-memory map set.
#[derive(Clone, Default)]
pub struct MemoryFastPath {
    store: Rc<RefCell<Store>>,
}

impl MemoryFastPath {
    pub fn new() -> Self {
        let fp = Self::default();
        fp.store.borrow_mut().classes = vec![ClassEntry::INVALID; CLASS_COUNT];
        fp
    }

    pub fn stats(&self) -> SyncStats {
        self.store.borrow().stats
    }

    pub fn class(&self, index: u8) -> ClassEntry {
        self.store.borrow().classes[index as usize]
    }

    pub fn client(&self, mac: MacAddr) -> Option<ClientEntry> {
        self.store.borrow().clients.get(&mac.0).copied()
    }

    pub fn whitelist_value(&self, addr: IpAddr) -> Option<WhitelistValue> {
        self.store.borrow().whitelist.get(&addr).copied()
    }

    pub fn attached_devices(&self) -> Vec<String> {
        self.store.borrow().attached.iter().cloned().collect()
    }

    /// Simulate the classifier marking an entry as recently matched.
    pub fn mark_whitelist_seen(&self, addr: IpAddr) {
        if let Some(v) = self.store.borrow_mut().whitelist.get_mut(&addr) {
            v.seen = 1;
        }
    }

    /// Simulate the classifier accounting traffic for a client.
    pub fn account(&self, mac: MacAddr, packets_ul: u64, bytes_ul: u64) {
        if let Some(c) = self.store.borrow_mut().clients.get_mut(&mac.0) {
            c.packets_ul += packets_ul;
            c.bytes_ul += bytes_ul;
        }
    }
}

impl FastPath for MemoryFastPath {
    fn attach(&mut self, device: &str) -> Result<()> {
        self.store.borrow_mut().attached.insert(device.to_string());
        Ok(())
    }

    fn detach(&mut self, device: &str) -> Result<()> {
        self.store.borrow_mut().attached.remove(device);
        Ok(())
    }

    fn push_class(&mut self, index: u8, entry: &ClassEntry) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.classes[index as usize] = *entry;
        store.stats.class_writes += 1;
        Ok(())
    }

    fn push_client(&mut self, mac: MacAddr, entry: &ClientEntry) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.clients.insert(mac.0, *entry);
        store.stats.client_writes += 1;
        Ok(())
    }

    fn delete_client(&mut self, mac: MacAddr) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.clients.remove(&mac.0);
        store.stats.client_deletes += 1;
        Ok(())
    }

    fn read_client(&self, mac: MacAddr) -> Result<Option<ClientEntry>> {
        Ok(self.store.borrow().clients.get(&mac.0).copied())
    }

    fn push_whitelist(&mut self, addr: IpAddr, class: Option<u8>) -> Result<()> {
        let mut store = self.store.borrow_mut();
        match class {
            Some(class) => {
                // A refresh keeps the kernel-set seen flag.
                let seen = store.whitelist.get(&addr).map(|v| v.seen).unwrap_or(0);
                store.whitelist.insert(addr, WhitelistValue { class, seen });
                store.stats.whitelist_writes += 1;
            }
            None => {
                store.whitelist.remove(&addr);
                store.stats.whitelist_deletes += 1;
            }
        }
        Ok(())
    }

    fn whitelist_seen(&self, addr: IpAddr) -> Result<bool> {
        Ok(self
            .store
            .borrow()
            .whitelist
            .get(&addr)
            .map(|v| v.seen != 0)
            .unwrap_or(false))
    }

    fn clear_whitelist_seen(&mut self, addr: IpAddr) -> Result<()> {
        if let Some(v) = self.store.borrow_mut().whitelist.get_mut(&addr) {
            v.seen = 0;
        }
        Ok(())
    }
}

/// Provider handing out in-memory fast paths, keeping a handle per
/// interface for later inspection.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    created: Rc<RefCell<HashMap<String, MemoryFastPath>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the maps created for `interface`, if any.
    pub fn handle(&self, interface: &str) -> Option<MemoryFastPath> {
        self.created.borrow().get(interface).cloned()
    }
}

impl FastPathProvider for MemoryProvider {
    fn create(&self, interface: &str) -> Result<Box<dyn FastPath>> {
        let fp = MemoryFastPath::new();
        self.created
            .borrow_mut()
            .insert(interface.to_string(), fp.clone());
        Ok(Box::new(fp))
    }
}
