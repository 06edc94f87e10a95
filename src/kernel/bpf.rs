//! aya-backed fast path
//!
//! Loads the externally built classifier object once per interface and
//! attaches it as a tc classifier on both directions of every bound
//! device. Map handles are re-derived per operation; each call is one
//! bpf syscall.

use super::{FastPath, FastPathProvider};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use aya::maps::{Array, HashMap as BpfHashMap};
use aya::programs::tc::{qdisc_add_clsact, SchedClassifierLinkId, TcAttachType};
use aya::programs::SchedClassifier;
use aya::Ebpf;
use gatefilter_common::{maps, ClassEntry, ClientEntry, WhitelistValue};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the classifier program inside the object file.
const PROGRAM_NAME: &str = "gatefilter_classifier";

fn kernel_err(err: impl std::fmt::Display) -> Error {
    Error::Kernel(err.to_string())
}

/// One loaded classifier instance with its maps.
pub struct BpfFastPath {
    bpf: Ebpf,
    links: HashMap<String, Vec<SchedClassifierLinkId>>,
}

impl BpfFastPath {
    /// Load the classifier object for one interface.
    pub fn load(object_path: &Path) -> Result<Self> {
        let mut bpf = Ebpf::load_file(object_path).map_err(kernel_err)?;

        let program: &mut SchedClassifier = bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| Error::Kernel(format!("program {PROGRAM_NAME} not in object")))?
            .try_into()
            .map_err(kernel_err)?;
        program.load().map_err(kernel_err)?;

        Ok(Self {
            bpf,
            links: HashMap::new(),
        })
    }

    fn program(&mut self) -> Result<&mut SchedClassifier> {
        self.bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| Error::Kernel(format!("program {PROGRAM_NAME} not in object")))?
            .try_into()
            .map_err(kernel_err)
    }

    fn client_map(&self) -> Result<BpfHashMap<&aya::maps::MapData, [u8; 6], ClientEntry>> {
        let map = self
            .bpf
            .map(maps::CLIENT_TABLE)
            .ok_or_else(|| Error::Kernel("client map missing".into()))?;
        BpfHashMap::try_from(map).map_err(kernel_err)
    }

    fn client_map_mut(
        &mut self,
    ) -> Result<BpfHashMap<&mut aya::maps::MapData, [u8; 6], ClientEntry>> {
        let map = self
            .bpf
            .map_mut(maps::CLIENT_TABLE)
            .ok_or_else(|| Error::Kernel("client map missing".into()))?;
        BpfHashMap::try_from(map).map_err(kernel_err)
    }

    fn whitelist_name(addr: IpAddr) -> &'static str {
        match addr {
            IpAddr::V4(_) => maps::WHITELIST_V4,
            IpAddr::V6(_) => maps::WHITELIST_V6,
        }
    }

    fn with_whitelist_mut<R>(
        &mut self,
        addr: IpAddr,
        op: impl FnOnce(WhitelistMapMut<'_>) -> Result<R>,
    ) -> Result<R> {
        let map = self
            .bpf
            .map_mut(Self::whitelist_name(addr))
            .ok_or_else(|| Error::Kernel("whitelist map missing".into()))?;
        match addr {
            IpAddr::V4(v4) => op(WhitelistMapMut::V4(
                BpfHashMap::try_from(map).map_err(kernel_err)?,
                v4.octets(),
            )),
            IpAddr::V6(v6) => op(WhitelistMapMut::V6(
                BpfHashMap::try_from(map).map_err(kernel_err)?,
                v6.octets(),
            )),
        }
    }

    fn read_whitelist(&self, addr: IpAddr) -> Result<Option<WhitelistValue>> {
        let map = self
            .bpf
            .map(Self::whitelist_name(addr))
            .ok_or_else(|| Error::Kernel("whitelist map missing".into()))?;
        let value = match addr {
            IpAddr::V4(v4) => BpfHashMap::<_, [u8; 4], WhitelistValue>::try_from(map)
                .map_err(kernel_err)?
                .get(&v4.octets(), 0)
                .ok(),
            IpAddr::V6(v6) => BpfHashMap::<_, [u8; 16], WhitelistValue>::try_from(map)
                .map_err(kernel_err)?
                .get(&v6.octets(), 0)
                .ok(),
        };
        Ok(value)
    }
}

enum WhitelistMapMut<'a> {
    V4(
        BpfHashMap<&'a mut aya::maps::MapData, [u8; 4], WhitelistValue>,
        [u8; 4],
    ),
    V6(
        BpfHashMap<&'a mut aya::maps::MapData, [u8; 16], WhitelistValue>,
        [u8; 16],
    ),
}

impl WhitelistMapMut<'_> {
    fn get(&self) -> Option<WhitelistValue> {
        match self {
            WhitelistMapMut::V4(map, key) => map.get(key, 0).ok(),
            WhitelistMapMut::V6(map, key) => map.get(key, 0).ok(),
        }
    }

    fn set(&mut self, value: WhitelistValue) -> Result<()> {
        match self {
            WhitelistMapMut::V4(map, key) => map.insert(*key, value, 0).map_err(kernel_err),
            WhitelistMapMut::V6(map, key) => map.insert(*key, value, 0).map_err(kernel_err),
        }
    }

    fn remove(&mut self) -> Result<()> {
        // Removing an absent key is not an error for our purposes.
        let result = match self {
            WhitelistMapMut::V4(map, key) => map.remove(key),
            WhitelistMapMut::V6(map, key) => map.remove(key),
        };
        match result {
            Ok(()) => Ok(()),
            Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(kernel_err(e)),
        }
    }
}

impl FastPath for BpfFastPath {
    fn attach(&mut self, device: &str) -> Result<()> {
        // clsact may already exist on the device.
        if let Err(e) = qdisc_add_clsact(device) {
            debug!(device, error = %e, "clsact qdisc not added");
        }

        let program = self.program()?;
        let ingress = program
            .attach(device, TcAttachType::Ingress)
            .map_err(kernel_err)?;
        let egress = match program.attach(device, TcAttachType::Egress) {
            Ok(link) => link,
            Err(e) => {
                let _ = program.detach(ingress);
                return Err(kernel_err(e));
            }
        };

        self.links
            .insert(device.to_string(), vec![ingress, egress]);
        debug!(device, "classifier attached");
        Ok(())
    }

    fn detach(&mut self, device: &str) -> Result<()> {
        let Some(links) = self.links.remove(device) else {
            return Ok(());
        };
        let program = self.program()?;
        for link in links {
            if let Err(e) = program.detach(link) {
                warn!(device, error = %e, "classifier detach failed");
            }
        }
        Ok(())
    }

    fn push_class(&mut self, index: u8, entry: &ClassEntry) -> Result<()> {
        let map = self
            .bpf
            .map_mut(maps::CLASS_TABLE)
            .ok_or_else(|| Error::Kernel("class map missing".into()))?;
        let mut array: Array<_, ClassEntry> = Array::try_from(map).map_err(kernel_err)?;
        array.set(index as u32, *entry, 0).map_err(kernel_err)
    }

    fn push_client(&mut self, mac: MacAddr, entry: &ClientEntry) -> Result<()> {
        self.client_map_mut()?
            .insert(mac.0, *entry, 0)
            .map_err(kernel_err)
    }

    fn delete_client(&mut self, mac: MacAddr) -> Result<()> {
        match self.client_map_mut()?.remove(&mac.0) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(kernel_err(e)),
        }
    }

    fn read_client(&self, mac: MacAddr) -> Result<Option<ClientEntry>> {
        Ok(self.client_map()?.get(&mac.0, 0).ok())
    }

    fn push_whitelist(&mut self, addr: IpAddr, class: Option<u8>) -> Result<()> {
        self.with_whitelist_mut(addr, |mut map| match class {
            Some(class) => {
                let seen = map.get().map(|v| v.seen).unwrap_or(0);
                map.set(WhitelistValue { class, seen })
            }
            None => map.remove(),
        })
    }

    fn whitelist_seen(&self, addr: IpAddr) -> Result<bool> {
        Ok(self
            .read_whitelist(addr)?
            .map(|v| v.seen != 0)
            .unwrap_or(false))
    }

    fn clear_whitelist_seen(&mut self, addr: IpAddr) -> Result<()> {
        self.with_whitelist_mut(addr, |mut map| match map.get() {
            Some(v) => map.set(WhitelistValue { class: v.class, seen: 0 }),
            None => Ok(()),
        })
    }
}

/// Provider loading one classifier object per interface.
pub struct BpfProvider {
    object_path: PathBuf,
}

impl BpfProvider {
    pub fn new(object_path: impl Into<PathBuf>) -> Self {
        Self {
            object_path: object_path.into(),
        }
    }
}

impl FastPathProvider for BpfProvider {
    fn create(&self, interface: &str) -> Result<Box<dyn FastPath>> {
        debug!(interface, object = %self.object_path.display(), "loading classifier");
        Ok(Box::new(BpfFastPath::load(&self.object_path)?))
    }
}
