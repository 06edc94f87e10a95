//! DNS answer observer
//!
//! Evaluates snooped DNS responses against an interface's whitelist
//! rules. The question name resolves a class (CNAME cache inheritance,
//! then glob rules, first match wins); CNAME answers can change the
//! class mid-chain and record the target for later packets; A/AAAA
//! answers with a resolved class become whitelist entries with the
//! record TTL.

use crate::engine::Interface;
use crate::protocol::dns::{DnsMessage, DnsType};
use crate::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};
use tracing::trace;

enum ParsedAnswer {
    Cname(String),
    Addr(IpAddr, u32),
}

/// Evaluate one DNS response payload against one interface.
///
/// The whole packet is structurally validated before any state is
/// touched, so a malformed record never leaves partial effects behind.
pub fn observe_dns(iface: &mut Interface, payload: &[u8], now: Instant) -> Result<()> {
    let msg = DnsMessage::parse(payload)?;

    if !msg.is_plain_response() || msg.question_count() != 1 {
        return Ok(());
    }

    let (question, answers_offset) = msg.question()?;

    let mut parsed = Vec::new();
    let mut answers = msg.answers(answers_offset);
    while let Some(answer) = answers.next_answer()? {
        match DnsType::from_u16(answer.rtype) {
            Some(DnsType::Cname) => {
                parsed.push(ParsedAnswer::Cname(msg.name_at(answer.rdata_offset)?));
            }
            Some(DnsType::A) => {
                let octets: [u8; 4] = answer
                    .rdata
                    .try_into()
                    .map_err(|_| Error::Parse("A record rdata length".into()))?;
                parsed.push(ParsedAnswer::Addr(Ipv4Addr::from(octets).into(), answer.ttl));
            }
            Some(DnsType::Aaaa) => {
                let octets: [u8; 16] = answer
                    .rdata
                    .try_into()
                    .map_err(|_| Error::Parse("AAAA record rdata length".into()))?;
                parsed.push(ParsedAnswer::Addr(Ipv6Addr::from(octets).into(), answer.ttl));
            }
            _ => {}
        }
    }

    // CNAME cache inheritance fills an unset class; a direct glob match
    // on the question overrides it.
    let mut class = iface.cname_cache.lookup(&question.name);
    if let Some(c) = iface.policy.whitelist_class(&question.name) {
        class = Some(c);
    }

    for answer in parsed {
        match answer {
            ParsedAnswer::Cname(target) => {
                if let Some(c) = iface.policy.whitelist_class(&target) {
                    class = Some(c);
                }
                if let Some(c) = class {
                    iface.cname_cache.set(&target, c);
                }
                trace!(interface = %iface.name(), name = %question.name, %target, ?class, "cname observed");
            }
            ParsedAnswer::Addr(addr, ttl) => {
                if addr_is_zero(&addr) {
                    continue;
                }
                if let Some(c) = class {
                    iface.whitelist_grant(addr, c, Duration::from_secs(ttl as u64), now);
                }
            }
        }
    }

    Ok(())
}

fn addr_is_zero(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_unspecified(),
    }
}
