//! Engine state model
//!
//! Client registry, address learning cache, dynamic whitelist and the
//! process-wide context tying them together.

mod addr_cache;
mod client;
mod context;
mod interface;
mod whitelist;

pub use addr_cache::{AddrCache, LearnedAddrs};
pub use client::{accounting_flags, accounting_names, Client, ClientUpdate};
pub use context::{Context, Notification};
pub use interface::{ClientEvent, ClientSnapshot, Device, Interface};
pub use whitelist::{CnameCache, WhitelistEntry, WhitelistTable};
