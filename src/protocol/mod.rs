//! Wire-format parsing for the snooped protocols
//!
//! Parsers never read past the packet boundary: linear reads go through
//! [`cursor::Cursor`], which returns a typed error instead of panicking,
//! and a structural violation rejects the whole packet.

pub mod cursor;
pub mod dhcp;
pub mod dns;
pub mod ethernet;
pub mod icmpv6;
pub mod types;

pub use cursor::Cursor;
pub use types::*;
