//! Control surface
//!
//! Newline-delimited JSON requests over a Unix socket, mapping 1:1
//! onto engine operations. No request performs a multi-step
//! transaction; a rejected call leaves no partial mutation behind.

mod server;

pub use server::{serve, ControlChannel};

use crate::engine::{
    accounting_flags, accounting_names, ClientSnapshot, ClientUpdate, Context, Notification,
};
use crate::policy::{Class, ClassAction, InterfaceConfig};
use crate::protocol::MacAddr;
use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::IpAddr;

/// One control request.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    InterfaceAdd {
        name: String,
        #[serde(default)]
        config: InterfaceConfig,
        #[serde(default)]
        devices: Vec<String>,
    },
    InterfaceRemove {
        name: String,
    },
    CheckDevices,
    ClientSet {
        interface: String,
        #[serde(default)]
        address: Option<MacAddr>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        state: Option<u8>,
        #[serde(default)]
        dns_state: Option<u8>,
        #[serde(default)]
        accounting: Option<Vec<String>>,
        #[serde(default)]
        data: Option<Map<String, Value>>,
        #[serde(default)]
        device: Option<String>,
        #[serde(default)]
        flush: bool,
    },
    ClientRemove {
        interface: String,
        #[serde(default)]
        address: Option<MacAddr>,
        #[serde(default)]
        id: Option<String>,
    },
    ClientGet {
        interface: String,
        #[serde(default)]
        address: Option<MacAddr>,
        #[serde(default)]
        id: Option<String>,
    },
    ClientList {
        interface: String,
    },
    WhitelistAdd {
        interface: String,
        address: Vec<String>,
        #[serde(default)]
        state: u8,
    },
    WhitelistRemove {
        interface: String,
        address: Vec<String>,
    },
    /// Turns the connection into a notification stream.
    Subscribe,
}

/// Control response envelope.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok { data: None }
    }

    pub fn with_data(data: Value) -> Self {
        Response::Ok { data: Some(data) }
    }

    pub fn error(err: &Error) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }
}

/// Execute one request against the engine.
pub fn dispatch(ctx: &mut Context, request: Request) -> Response {
    ctx.metrics().control_requests.inc();
    match handle(ctx, request) {
        Ok(data) => match data {
            Some(data) => Response::with_data(data),
            None => Response::ok(),
        },
        Err(e) => Response::error(&e),
    }
}

fn handle(ctx: &mut Context, request: Request) -> crate::Result<Option<Value>> {
    match request {
        Request::InterfaceAdd {
            name,
            config,
            devices,
        } => {
            ctx.interface_add(&name, &config, &devices)?;
            Ok(None)
        }
        Request::InterfaceRemove { name } => {
            ctx.interface_remove(&name)?;
            Ok(None)
        }
        Request::CheckDevices => {
            ctx.check_devices();
            Ok(None)
        }
        Request::ClientSet {
            interface,
            address,
            id,
            state,
            dns_state,
            accounting,
            data,
            device,
            flush,
        } => {
            let update = ClientUpdate {
                id: id.clone(),
                class: state,
                // "state" covers DNS traffic too unless overridden.
                dns_class: dns_state.or(state),
                accounting: accounting.as_deref().map(accounting_flags),
                data,
                device,
                flush,
            };
            ctx.client_set(&interface, address, id.as_deref(), update)?;
            Ok(None)
        }
        Request::ClientRemove {
            interface,
            address,
            id,
        } => {
            ctx.client_remove(&interface, address, id.as_deref())?;
            Ok(None)
        }
        Request::ClientGet {
            interface,
            address,
            id,
        } => {
            let snapshot = ctx.client_get(&interface, address, id.as_deref())?;
            Ok(Some(dump_client(&snapshot)))
        }
        Request::ClientList { interface } => {
            let mut clients = Map::new();
            for snapshot in ctx.client_list(&interface)? {
                clients.insert(snapshot.address.to_string(), dump_client(&snapshot));
            }
            Ok(Some(Value::Object(clients)))
        }
        Request::WhitelistAdd {
            interface,
            address,
            state,
        } => {
            let addrs = parse_addrs(&address);
            ctx.whitelist_update(&interface, &addrs, Some(state))?;
            Ok(None)
        }
        Request::WhitelistRemove { interface, address } => {
            let addrs = parse_addrs(&address);
            ctx.whitelist_update(&interface, &addrs, None)?;
            Ok(None)
        }
        Request::Subscribe => Ok(None),
    }
}

/// Unparsable addresses are skipped, matching the per-address
/// best-effort semantics of the whitelist calls.
fn parse_addrs(strings: &[String]) -> Vec<IpAddr> {
    strings.iter().filter_map(|s| s.parse().ok()).collect()
}

fn dump_action(class: &Class) -> Value {
    if !class.valid {
        return json!({ "invalid": true });
    }

    let mut out = Map::new();
    for action in &class.actions {
        match action {
            ClassAction::SetFwmark { val, mask } => {
                out.insert("fwmark".into(), json!(val));
                out.insert("fwmark_mask".into(), json!(mask));
            }
            ClassAction::Redirect { ifindex, vlan } => {
                out.insert("redirect_ifindex".into(), json!(ifindex));
                if let Some(vlan) = vlan {
                    out.insert("vlan".into(), json!(vlan.id));
                    out.insert("vlan_proto".into(), json!(vlan.proto));
                }
            }
            ClassAction::SetDestMac(mac) => {
                out.insert("dest_mac".into(), json!(mac.to_string()));
            }
        }
    }
    Value::Object(out)
}

fn dump_client(snap: &ClientSnapshot) -> Value {
    let mut out = Map::new();
    out.insert("address".into(), json!(snap.address.to_string()));
    if let Some(id) = &snap.id {
        out.insert("id".into(), json!(id));
    }
    if let Some(device) = &snap.device {
        out.insert("device".into(), json!(device));
    }
    out.insert("idle".into(), json!(snap.idle));
    out.insert("state".into(), json!(snap.state));
    out.insert("dns_state".into(), json!(snap.dns_state));
    if let Some(ip4) = snap.ip4 {
        out.insert("ip4addr".into(), json!(ip4.to_string()));
    }
    if let Some(ip6) = snap.ip6 {
        out.insert("ip6addr".into(), json!(ip6.to_string()));
    }
    out.insert("accounting".into(), json!(accounting_names(snap.accounting)));
    out.insert("data".into(), Value::Object(snap.data.clone()));
    out.insert("action".into(), dump_action(&snap.action));
    out.insert("dns_action".into(), dump_action(&snap.dns_action));
    out.insert("packets_ul".into(), json!(snap.packets_ul));
    out.insert("packets_dl".into(), json!(snap.packets_dl));
    out.insert("bytes_ul".into(), json!(snap.bytes_ul));
    out.insert("bytes_dl".into(), json!(snap.bytes_dl));
    Value::Object(out)
}

/// Render a notification as a JSON line for subscribers.
pub fn notification_value(notification: &Notification) -> Value {
    match notification {
        Notification::ClientAdd {
            interface,
            address,
            id,
        } => json!({
            "notify": "client_add",
            "interface": interface,
            "address": address.to_string(),
            "id": id,
        }),
        Notification::ClientRemove {
            interface,
            address,
            id,
        } => json!({
            "notify": "client_remove",
            "interface": interface,
            "address": address.to_string(),
            "id": id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MemoryProvider;
    use crate::policy::StubResolver;
    use crate::telemetry::MetricsRegistry;
    use std::sync::Arc;

    fn make_ctx() -> (Context, MemoryProvider) {
        let provider = MemoryProvider::new();
        let ctx = Context::new(
            Box::new(provider.clone()),
            Box::new(StubResolver::default()),
            Arc::new(MetricsRegistry::new()),
        );
        (ctx, provider)
    }

    fn req(json_str: &str) -> Request {
        serde_json::from_str(json_str).unwrap()
    }

    #[test]
    fn test_interface_add_and_client_roundtrip() {
        let (mut ctx, _provider) = make_ctx();

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "interface_add", "name": "lan0",
                     "config": { "classes": [ { "index": 0 }, { "index": 1 } ] } }"#),
        );
        assert_eq!(resp, Response::ok());

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_set", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff", "state": 1,
                     "accounting": ["ul", "dl"], "id": "room-12" }"#),
        );
        assert_eq!(resp, Response::ok());

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_get", "interface": "lan0", "id": "room-12" }"#),
        );
        let Response::Ok { data: Some(data) } = resp else {
            panic!("expected data");
        };
        assert_eq!(data["address"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(data["state"], 1);
        // state also set the DNS class
        assert_eq!(data["dns_state"], 1);
        assert_eq!(data["accounting"], json!(["ul", "dl"]));
    }

    #[test]
    fn test_unknown_interface_is_error() {
        let (mut ctx, _provider) = make_ctx();
        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_list", "interface": "nope" }"#),
        );
        assert!(matches!(resp, Response::Error { .. }));
    }

    #[test]
    fn test_out_of_range_state_rejected() {
        let (mut ctx, _provider) = make_ctx();
        dispatch(
            &mut ctx,
            req(r#"{ "method": "interface_add", "name": "lan0" }"#),
        );

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_set", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff", "state": 16 }"#),
        );
        assert!(matches!(resp, Response::Error { .. }));

        // Nothing was created.
        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_get", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff" }"#),
        );
        assert!(matches!(resp, Response::Error { .. }));
    }

    #[test]
    fn test_dns_state_overrides_state() {
        let (mut ctx, _provider) = make_ctx();
        dispatch(
            &mut ctx,
            req(r#"{ "method": "interface_add", "name": "lan0",
                     "config": { "classes": [ { "index": 1 }, { "index": 2 } ] } }"#),
        );
        dispatch(
            &mut ctx,
            req(r#"{ "method": "client_set", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff", "state": 1, "dns_state": 2 }"#),
        );

        let snap = ctx
            .client_get("lan0", Some("aa:bb:cc:dd:ee:ff".parse().unwrap()), None)
            .unwrap();
        assert_eq!(snap.state, 1);
        assert_eq!(snap.dns_state, 2);
    }

    #[test]
    fn test_whitelist_add_remove() {
        let (mut ctx, provider) = make_ctx();
        dispatch(
            &mut ctx,
            req(r#"{ "method": "interface_add", "name": "lan0" }"#),
        );

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "whitelist_add", "interface": "lan0",
                     "address": ["198.51.100.1", "not-an-address", "2001:db8::7"],
                     "state": 2 }"#),
        );
        assert_eq!(resp, Response::ok());

        let fp = provider.handle("lan0").unwrap();
        assert_eq!(
            fp.whitelist_value("198.51.100.1".parse().unwrap())
                .unwrap()
                .class,
            2
        );
        assert_eq!(
            fp.whitelist_value("2001:db8::7".parse().unwrap())
                .unwrap()
                .class,
            2
        );

        dispatch(
            &mut ctx,
            req(r#"{ "method": "whitelist_remove", "interface": "lan0",
                     "address": ["198.51.100.1"] }"#),
        );
        assert!(fp.whitelist_value("198.51.100.1".parse().unwrap()).is_none());
    }

    #[test]
    fn test_client_remove_by_address() {
        let (mut ctx, _provider) = make_ctx();
        dispatch(
            &mut ctx,
            req(r#"{ "method": "interface_add", "name": "lan0" }"#),
        );
        dispatch(
            &mut ctx,
            req(r#"{ "method": "client_set", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff" }"#),
        );

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_remove", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff" }"#),
        );
        assert_eq!(resp, Response::ok());

        let resp = dispatch(
            &mut ctx,
            req(r#"{ "method": "client_remove", "interface": "lan0",
                     "address": "aa:bb:cc:dd:ee:ff" }"#),
        );
        assert!(matches!(resp, Response::Error { .. }));
    }

    #[test]
    fn test_invalid_json_shape() {
        let err = serde_json::from_str::<Request>(r#"{ "method": "bogus" }"#);
        assert!(err.is_err());
    }
}
