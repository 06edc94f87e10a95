//! Dynamic whitelist and CNAME cache
//!
//! Whitelist entries are learned from DNS answers and expire on their
//! TTL, with a lazy keep-alive: an expired entry the kernel has seen
//! traffic for recently is extended by one active-timeout window
//! instead of being deleted. The CNAME cache carries a resolved class
//! across separately observed packets of one resolution chain.

use crate::kernel::FastPath;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// CNAME cache entries die after this many 1 s GC ticks.
const CNAME_MAX_AGE: u8 = 5;

/// One learned whitelist exemption.
#[derive(Debug, Clone, Copy)]
pub struct WhitelistEntry {
    pub class: u8,
    pub expires: Instant,
}

/// Per-interface table of learned whitelist entries.
#[derive(Debug, Default)]
pub struct WhitelistTable {
    entries: HashMap<IpAddr, WhitelistEntry>,
}

impl WhitelistTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: &IpAddr) -> Option<&WhitelistEntry> {
        self.entries.get(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create or refresh an entry and mirror it into the kernel map.
    /// A kernel write failure is logged; the local entry still exists
    /// and is re-pushed on the next refresh.
    pub fn grant(
        &mut self,
        fastpath: &mut dyn FastPath,
        addr: IpAddr,
        class: u8,
        ttl: Duration,
        now: Instant,
    ) {
        if let Err(e) = fastpath.push_whitelist(addr, Some(class)) {
            warn!(%addr, class, error = %e, "whitelist kernel push failed");
        }
        let expires = now + ttl;
        self.entries.insert(addr, WhitelistEntry { class, expires });
        debug!(%addr, class, ttl = ttl.as_secs(), "whitelist entry granted");
    }

    /// Expiry sweep. Expired entries the kernel has not seen traffic
    /// for are deleted; seen entries get one more `active_timeout`
    /// window and their seen flag cleared. Returns the next deadline.
    pub fn gc(
        &mut self,
        fastpath: &mut dyn FastPath,
        active_timeout: Duration,
        now: Instant,
    ) -> Option<Instant> {
        self.entries.retain(|addr, entry| {
            if entry.expires > now {
                return true;
            }

            match fastpath.whitelist_seen(*addr) {
                Ok(true) => {
                    // Still in use: keep alive for one more window.
                    if let Err(e) = fastpath.clear_whitelist_seen(*addr) {
                        warn!(addr = %addr, error = %e, "clearing seen flag failed");
                    }
                    entry.expires = now + active_timeout;
                    true
                }
                Ok(false) => {
                    if let Err(e) = fastpath.push_whitelist(*addr, None) {
                        warn!(addr = %addr, error = %e, "whitelist kernel delete failed");
                    }
                    debug!(addr = %addr, "whitelist entry expired");
                    false
                }
                Err(e) => {
                    // Unreadable flag: resolved in favor of keeping the
                    // entry; the next pass re-checks.
                    warn!(addr = %addr, error = %e, "seen flag read failed");
                    entry.expires = now + active_timeout;
                    true
                }
            }
        });

        self.next_deadline()
    }

    /// Earliest expiry across live entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.expires).min()
    }
}

#[derive(Debug)]
struct CnameEntry {
    class: u8,
    age: u8,
}

/// Hostname to class carry-over between DNS packets of one chain.
#[derive(Debug, Default)]
pub struct CnameCache {
    entries: HashMap<String, CnameEntry>,
}

impl CnameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh the class implied for a name.
    pub fn set(&mut self, name: &str, class: u8) {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.class = class;
                entry.age = 0;
            }
            None => {
                self.entries
                    .insert(name.to_string(), CnameEntry { class, age: 0 });
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<u8> {
        self.entries.get(name).map(|e| e.class)
    }

    /// Age all entries by one tick, dropping the expired ones.
    pub fn tick(&mut self) {
        self.entries.retain(|_, e| {
            if e.age >= CNAME_MAX_AGE {
                false
            } else {
                e.age += 1;
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MemoryFastPath;

    const TTL: Duration = Duration::from_secs(300);
    const ACTIVE: Duration = Duration::from_secs(60);

    fn addr() -> IpAddr {
        "93.184.216.34".parse().unwrap()
    }

    #[test]
    fn test_grant_sets_expiry() {
        let mut fp = MemoryFastPath::new();
        let mut table = WhitelistTable::new();
        let now = Instant::now();

        table.grant(&mut fp, addr(), 1, TTL, now);

        let entry = table.get(&addr()).unwrap();
        assert_eq!(entry.class, 1);
        assert_eq!(entry.expires, now + TTL);
        assert_eq!(fp.whitelist_value(addr()).unwrap().class, 1);
        assert_eq!(table.next_deadline(), Some(now + TTL));
    }

    #[test]
    fn test_gc_before_expiry_keeps_entry() {
        let mut fp = MemoryFastPath::new();
        let mut table = WhitelistTable::new();
        let now = Instant::now();

        table.grant(&mut fp, addr(), 1, TTL, now);
        let next = table.gc(&mut fp, ACTIVE, now + Duration::from_secs(10));

        assert!(table.get(&addr()).is_some());
        assert_eq!(next, Some(now + TTL));
    }

    #[test]
    fn test_gc_expired_unseen_deletes() {
        let mut fp = MemoryFastPath::new();
        let mut table = WhitelistTable::new();
        let now = Instant::now();

        table.grant(&mut fp, addr(), 1, TTL, now);
        let next = table.gc(&mut fp, ACTIVE, now + TTL);

        assert!(table.get(&addr()).is_none());
        assert!(fp.whitelist_value(addr()).is_none());
        assert_eq!(next, None);
    }

    #[test]
    fn test_gc_expired_seen_extends_and_clears() {
        let mut fp = MemoryFastPath::new();
        let mut table = WhitelistTable::new();
        let now = Instant::now();

        table.grant(&mut fp, addr(), 1, TTL, now);
        fp.mark_whitelist_seen(addr());

        let gc_time = now + TTL;
        let next = table.gc(&mut fp, ACTIVE, gc_time);

        let entry = table.get(&addr()).unwrap();
        assert_eq!(entry.expires, gc_time + ACTIVE);
        assert_eq!(next, Some(gc_time + ACTIVE));
        // Flag is consumed; entry stays in the kernel map.
        assert_eq!(fp.whitelist_value(addr()).unwrap().seen, 0);

        // Next pass without traffic deletes it.
        let next = table.gc(&mut fp, ACTIVE, gc_time + ACTIVE);
        assert_eq!(next, None);
        assert!(fp.whitelist_value(addr()).is_none());
    }

    #[test]
    fn test_refresh_moves_deadline() {
        let mut fp = MemoryFastPath::new();
        let mut table = WhitelistTable::new();
        let now = Instant::now();
        let other: IpAddr = "198.51.100.7".parse().unwrap();

        table.grant(&mut fp, addr(), 1, TTL, now);
        table.grant(&mut fp, other, 2, Duration::from_secs(30), now);

        assert_eq!(table.next_deadline(), Some(now + Duration::from_secs(30)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_cname_cache_expiry() {
        let mut cache = CnameCache::new();
        cache.set("cdn.example.net", 3);

        for _ in 0..CNAME_MAX_AGE {
            cache.tick();
            assert_eq!(cache.lookup("cdn.example.net"), Some(3));
        }
        cache.tick();
        assert_eq!(cache.lookup("cdn.example.net"), None);
    }

    #[test]
    fn test_cname_refresh_resets_age() {
        let mut cache = CnameCache::new();
        cache.set("cdn.example.net", 3);

        for _ in 0..CNAME_MAX_AGE {
            cache.tick();
        }
        cache.set("cdn.example.net", 4);
        cache.tick();
        assert_eq!(cache.lookup("cdn.example.net"), Some(4));
    }
}
