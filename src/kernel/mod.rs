//! Kernel fast-path synchronization
//!
//! The classifier program consumes per-interface key/value maps; this
//! module is the only writer. Every operation is a single bounded map
//! access, so the classifier may observe slightly stale state and falls
//! back to unclassified behavior for absent entries.

pub mod bpf;
pub mod memory;

pub use bpf::{BpfFastPath, BpfProvider};
pub use memory::{MemoryFastPath, MemoryProvider};

use crate::protocol::MacAddr;
use crate::Result;
use gatefilter_common::{ClassEntry, ClientEntry};
use std::net::IpAddr;

/// Per-interface handle on the kernel-resident maps.
///
/// Implementations must not block: all operations are single key/value
/// reads or writes.
pub trait FastPath {
    /// Bind the classifier to a device (tc ingress/egress).
    fn attach(&mut self, device: &str) -> Result<()>;

    /// Unbind the classifier from a device.
    fn detach(&mut self, device: &str) -> Result<()>;

    /// Write one slot of the class table.
    fn push_class(&mut self, index: u8, entry: &ClassEntry) -> Result<()>;

    /// Insert or update a client record.
    fn push_client(&mut self, mac: MacAddr, entry: &ClientEntry) -> Result<()>;

    /// Remove a client record.
    fn delete_client(&mut self, mac: MacAddr) -> Result<()>;

    /// Read back a client record; the counters in it are kernel-written.
    fn read_client(&self, mac: MacAddr) -> Result<Option<ClientEntry>>;

    /// Insert (`Some(class)`) or remove (`None`) a whitelist entry.
    fn push_whitelist(&mut self, addr: IpAddr, class: Option<u8>) -> Result<()>;

    /// Kernel-set flag: has any packet matched this entry recently?
    fn whitelist_seen(&self, addr: IpAddr) -> Result<bool>;

    /// Clear the seen flag, preserving the entry.
    fn clear_whitelist_seen(&mut self, addr: IpAddr) -> Result<()>;
}

/// Creates one [`FastPath`] per interface.
pub trait FastPathProvider {
    fn create(&self, interface: &str) -> Result<Box<dyn FastPath>>;
}
