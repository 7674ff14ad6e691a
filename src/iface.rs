//! Network interface enumeration: the concrete `(interface, IPv4 address)`
//! list that the sender binds sockets against and the receiver joins
//! multicast groups on.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// One bound IPv4 address on a named interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceAddr {
    pub name: String,
    pub addr: Ipv4Addr,
}

/// Which interfaces to use, per the "interface set" configuration
/// parameter (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceSelector {
    /// Every non-loopback interface with an IPv4 address.
    All { include_link_local: bool },
    /// Only interfaces whose name is in this list.
    Named(Vec<String>),
}

impl Default for InterfaceSelector {
    fn default() -> Self {
        InterfaceSelector::All {
            include_link_local: false,
        }
    }
}

/// Resolve a selector to the current concrete address list. Called once at
/// sender/receiver construction, and again whenever the address monitor
/// reports a change. An empty result is not itself an error here — the
/// address monitor's polling loop needs to tolerate a transiently
/// interface-less host — but [`require_nonempty`] turns one into
/// [`crate::error::Error::NoInterfaces`] for callers that can't proceed
/// without at least one bound address.
pub fn resolve(selector: &InterfaceSelector) -> crate::error::Result<Vec<InterfaceAddr>> {
    let all = enumerate()?;

    let filtered = match selector {
        InterfaceSelector::All { include_link_local } => all
            .into_iter()
            .filter(|a| *include_link_local || !is_link_local(a.addr))
            .collect(),
        InterfaceSelector::Named(names) => all
            .into_iter()
            .filter(|a| names.iter().any(|n| n == &a.name))
            .collect(),
    };

    Ok(filtered)
}

/// Fail with [`crate::error::Error::NoInterfaces`] if `ifaces` is empty,
/// otherwise pass it through unchanged.
pub fn require_nonempty(ifaces: Vec<InterfaceAddr>) -> crate::error::Result<Vec<InterfaceAddr>> {
    if ifaces.is_empty() {
        Err(crate::error::Error::NoInterfaces)
    } else {
        Ok(ifaces)
    }
}

fn enumerate() -> crate::error::Result<Vec<InterfaceAddr>> {
    let ifaces = get_if_addrs::get_if_addrs().map_err(|e| crate::error::Error::Bind {
        addr: Ipv4Addr::UNSPECIFIED,
        source: e,
    })?;

    let mut out = Vec::new();
    for iface in ifaces {
        if iface.is_loopback() {
            continue;
        }
        if let std::net::IpAddr::V4(addr) = iface.ip() {
            out.push(InterfaceAddr {
                name: iface.name,
                addr,
            });
        }
    }
    Ok(out)
}

fn is_link_local(addr: Ipv4Addr) -> bool {
    let o = addr.octets();
    o[0] == 169 && o[1] == 254
}
