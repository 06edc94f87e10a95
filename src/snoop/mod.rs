//! Protocol observers over the snooping device
//!
//! The kernel classifier mirrors control-plane-relevant packets (DNS,
//! DHCP, ND and anything unclassified) to a dedicated device; this
//! module parses those frames and feeds the engine. Each observer is
//! stateless across packets except through the shared engine state, and
//! a malformed packet is dropped without side effects.

mod dhcp;
mod dns;
mod icmpv6;

pub use dns::observe_dns;

use crate::engine::Context;
use crate::protocol::ethernet::{EthernetHeader, VlanHeader};
use crate::protocol::{ip_proto, port, Cursor, EtherType};
use crate::Result;
use std::time::Instant;
use tracing::trace;

/// Process one mirrored frame.
pub fn dispatch(ctx: &mut Context, frame: &[u8], now: Instant) {
    let metrics = ctx.metrics().clone();
    metrics.snoop_frames.inc();

    if let Err(e) = try_dispatch(ctx, frame, now) {
        metrics.parse_rejects.inc();
        trace!(error = %e, len = frame.len(), "snooped frame rejected");
    }
}

fn try_dispatch(ctx: &mut Context, frame: &[u8], now: Instant) -> Result<()> {
    let mut cur = Cursor::new(frame);
    let eth = EthernetHeader::parse(&mut cur)?;

    let mut ethertype = eth.ethertype;
    if EtherType::is_vlan(ethertype) {
        ethertype = VlanHeader::parse(&mut cur)?.ethertype;
    }

    match EtherType::from_u16(ethertype) {
        Some(EtherType::Ipv4) => dispatch_ipv4(ctx, &eth, cur, now),
        Some(EtherType::Ipv6) => dispatch_ipv6(ctx, &eth, cur, now),
        _ => Ok(()),
    }
}

fn dispatch_ipv4(
    ctx: &mut Context,
    eth: &EthernetHeader,
    mut cur: Cursor<'_>,
    now: Instant,
) -> Result<()> {
    let version_ihl = cur.u8("IPv4 header")?;
    let header_len = (version_ihl & 0x0f) as usize * 4;
    if version_ihl >> 4 != 4 || header_len < 20 {
        return Err(crate::Error::Parse("bad IPv4 header".into()));
    }

    cur.skip(8, "IPv4 header")?; // tos .. ttl
    let proto = cur.u8("IPv4 header")?;
    cur.skip(10, "IPv4 header")?; // checksum, src, dst
    cur.skip(header_len - 20, "IPv4 options")?;

    if proto != ip_proto::UDP {
        return Ok(());
    }
    dispatch_udp(ctx, eth, cur, true, now)
}

fn dispatch_ipv6(
    ctx: &mut Context,
    eth: &EthernetHeader,
    mut cur: Cursor<'_>,
    now: Instant,
) -> Result<()> {
    let header = cur.take(40, "IPv6 header")?;
    let next_header = header[6];
    let hop_limit = header[7];

    match next_header {
        ip_proto::ICMPV6 => {
            // Link-local ND anti-spoof invariant: a forwarded packet
            // cannot have hop limit 255.
            if hop_limit != 255 {
                return Ok(());
            }
            if let Some((mac, addr)) = icmpv6::parse_na(eth.src, cur.rest())? {
                ctx.metrics().na_learned.inc();
                ctx.learn_address(mac, addr.into(), now);
            }
            Ok(())
        }
        ip_proto::UDP => dispatch_udp(ctx, eth, cur, false, now),
        _ => Ok(()),
    }
}

fn dispatch_udp(
    ctx: &mut Context,
    eth: &EthernetHeader,
    mut cur: Cursor<'_>,
    is_ipv4: bool,
    now: Instant,
) -> Result<()> {
    let src_port = cur.be16("UDP header")?;
    let dst_port = cur.be16("UDP header")?;
    cur.skip(4, "UDP header")?; // length, checksum
    let payload = cur.rest();

    if is_ipv4 && src_port == port::DHCP_SERVER && dst_port == port::DHCP_CLIENT {
        if let Some((mac, addr)) = dhcp::parse_ack(eth.dest, payload)? {
            ctx.metrics().dhcp_acks.inc();
            ctx.learn_address(mac, addr.into(), now);
        }
    }

    if src_port == port::DNS {
        ctx.metrics().dns_responses.inc();
        // Broadcast semantics: one response may affect every
        // configured interface's whitelist state.
        for iface in ctx.interfaces_mut() {
            observe_dns(iface, payload, now)?;
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testpkt::*;
    use super::*;
    use crate::engine::Context;
    use crate::kernel::MemoryProvider;
    use crate::policy::{InterfaceConfig, StubResolver};
    use crate::protocol::dhcp::MAGIC_COOKIE;
    use crate::protocol::icmpv6::{ndp_option, Icmpv6Type};
    use crate::protocol::MacAddr;
    use crate::telemetry::MetricsRegistry;
    use std::net::{IpAddr, Ipv6Addr};
    use std::sync::Arc;

    const CLIENT: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    const SERVER: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);

    fn make_ctx() -> (Context, MemoryProvider) {
        let provider = MemoryProvider::new();
        let mut ctx = Context::new(
            Box::new(provider.clone()),
            Box::new(StubResolver::default()),
            Arc::new(MetricsRegistry::new()),
        );
        let cfg: InterfaceConfig = serde_json::from_str(
            r#"{
                "client_autocreate": true,
                "classes": [ { "index": 0 }, { "index": 1 } ],
                "whitelist": [ { "class": 1, "hosts": ["*.example.com"] } ]
            }"#,
        )
        .unwrap();
        ctx.interface_add("lan0", &cfg, &[]).unwrap();
        (ctx, provider)
    }

    fn dhcp_ack_payload() -> Vec<u8> {
        let mut p = vec![0u8; 300];
        p[0] = 2;
        p[1] = 1;
        p[2] = 6;
        p[16..20].copy_from_slice(&[192, 168, 1, 50]);
        p[28..34].copy_from_slice(&CLIENT.0);
        p[236..240].copy_from_slice(&MAGIC_COOKIE);
        p[240..243].copy_from_slice(&[53, 1, 5]);
        p[243] = 255;
        p
    }

    fn dns_a_payload() -> Vec<u8> {
        let mut p = vec![
            0x00, 0x01, 0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        p.extend_from_slice(b"\x03www\x07example\x03com\x00");
        p.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        p.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01]);
        p.extend_from_slice(&300u32.to_be_bytes());
        p.extend_from_slice(&[0x00, 0x04, 93, 184, 216, 34]);
        p
    }

    #[test]
    fn test_dhcp_ack_learns_address() {
        let (mut ctx, _provider) = make_ctx();
        ctx.station_seen("lan0", CLIENT).unwrap();

        let frame = eth(
            CLIENT,
            SERVER,
            0x0800,
            &ipv4_udp(67, 68, &dhcp_ack_payload()),
        );
        dispatch(&mut ctx, &frame, std::time::Instant::now());

        let snap = ctx.client_get("lan0", Some(CLIENT), None).unwrap();
        assert_eq!(snap.ip4, Some("192.168.1.50".parse().unwrap()));
    }

    #[test]
    fn test_dhcp_wrong_ports_ignored() {
        let (mut ctx, _provider) = make_ctx();
        ctx.station_seen("lan0", CLIENT).unwrap();

        let frame = eth(
            CLIENT,
            SERVER,
            0x0800,
            &ipv4_udp(68, 67, &dhcp_ack_payload()),
        );
        dispatch(&mut ctx, &frame, std::time::Instant::now());

        let snap = ctx.client_get("lan0", Some(CLIENT), None).unwrap();
        assert_eq!(snap.ip4, None);
    }

    #[test]
    fn test_dns_over_vlan_creates_whitelist_entry() {
        let (mut ctx, provider) = make_ctx();

        let inner = ipv4_udp(53, 40000, &dns_a_payload());
        let mut vlan_payload = Vec::new();
        vlan_payload.extend_from_slice(&[0x00, 0x64]); // vid 100
        vlan_payload.extend_from_slice(&0x0800u16.to_be_bytes());
        vlan_payload.extend_from_slice(&inner);
        let frame = eth(CLIENT, SERVER, 0x8100, &vlan_payload);

        dispatch(&mut ctx, &frame, std::time::Instant::now());

        let fp = provider.handle("lan0").unwrap();
        let addr: IpAddr = "93.184.216.34".parse().unwrap();
        assert_eq!(fp.whitelist_value(addr).unwrap().class, 1);
    }

    #[test]
    fn test_na_hop_limit_enforced() {
        let (mut ctx, _provider) = make_ctx();
        ctx.station_seen("lan0", CLIENT).unwrap();

        let target: Ipv6Addr = "2001:db8::77".parse().unwrap();
        let mut icmp = vec![Icmpv6Type::NeighborAdvertisement as u8, 0, 0, 0];
        let mut body = vec![0u8; 20];
        body[0] = 0x60;
        body[4..20].copy_from_slice(&target.octets());
        body.extend_from_slice(&[ndp_option::TARGET_LINK_LAYER, 1]);
        body.extend_from_slice(&CLIENT.0);
        icmp.extend_from_slice(&body);

        // Hop limit 64: spoofable, ignored.
        let frame = eth(SERVER, CLIENT, 0x86DD, &ipv6(58, 64, &icmp));
        dispatch(&mut ctx, &frame, std::time::Instant::now());
        let snap = ctx.client_get("lan0", Some(CLIENT), None).unwrap();
        assert_eq!(snap.ip6, None);

        // Hop limit 255: learned.
        let frame = eth(SERVER, CLIENT, 0x86DD, &ipv6(58, 255, &icmp));
        dispatch(&mut ctx, &frame, std::time::Instant::now());
        let snap = ctx.client_get("lan0", Some(CLIENT), None).unwrap();
        assert_eq!(snap.ip6, Some(target));
    }

    #[test]
    fn test_short_frame_counted_as_reject() {
        let (mut ctx, _provider) = make_ctx();
        let metrics = ctx.metrics().clone();

        dispatch(&mut ctx, &[0u8; 6], std::time::Instant::now());

        assert_eq!(metrics.snoop_frames.get(), 1);
        assert_eq!(metrics.parse_rejects.get(), 1);
    }

    #[test]
    fn test_non_ip_ignored() {
        let (mut ctx, _provider) = make_ctx();
        let metrics = ctx.metrics().clone();

        let frame = eth(CLIENT, SERVER, 0x0806, &[0u8; 28]); // ARP
        dispatch(&mut ctx, &frame, std::time::Instant::now());

        assert_eq!(metrics.parse_rejects.get(), 0);
    }
}
