//! Interface binding enumeration and classification.
//!
//! A binding is an `(interface, ipv4)` pair the web-terminal server can
//! listen on, identified as `"interface:ip"`. Public addresses are
//! surfaced so the host can warn before exposing a terminal to them.

use serde::Serialize;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceBinding {
    pub interface: String,
    pub ip: Ipv4Addr,
    pub is_loopback: bool,
    /// Private, link-local, or CGNAT space; everything else is public.
    pub is_internal: bool,
}

impl InterfaceBinding {
    pub fn new(interface: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            interface: interface.into(),
            ip,
            is_loopback: ip.is_loopback(),
            is_internal: is_internal_ip(ip),
        }
    }

    /// Stable identifier, `"interface:ip"`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.interface, self.ip)
    }

    /// Bindings outside the internal ranges deserve a user-facing warning.
    pub fn is_public(&self) -> bool {
        !self.is_internal
    }
}

/// `10/8`, `172.16/12`, `192.168/16`, `169.254/16`, `100.64/10`, and
/// loopback count as internal.
pub fn is_internal_ip(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 169 && octets[1] == 254)
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
}

/// Every IPv4 address of every interface on this machine.
#[cfg(unix)]
pub fn enumerate_bindings() -> Vec<InterfaceBinding> {
    let Ok(addrs) = nix::ifaddrs::getifaddrs() else {
        return vec![InterfaceBinding::new("lo", Ipv4Addr::LOCALHOST)];
    };
    let mut bindings = Vec::new();
    for ifaddr in addrs {
        let Some(address) = ifaddr.address else {
            continue;
        };
        let Some(sin) = address.as_sockaddr_in() else {
            continue;
        };
        let binding = InterfaceBinding::new(ifaddr.interface_name, Ipv4Addr::from(sin.ip()));
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }
    bindings
}

#[cfg(not(unix))]
pub fn enumerate_bindings() -> Vec<InterfaceBinding> {
    vec![InterfaceBinding::new("loopback", Ipv4Addr::LOCALHOST)]
}

/// Outcome of matching saved binding ids against the live interface set.
#[derive(Debug, Default)]
pub struct ResolvedBindings {
    pub available: Vec<InterfaceBinding>,
    /// Saved ids whose interface/address no longer exists. Reported, not
    /// fatal; the remaining bindings still apply.
    pub unavailable: Vec<String>,
}

pub fn resolve_saved(saved_ids: &[String], current: &[InterfaceBinding]) -> ResolvedBindings {
    let mut resolved = ResolvedBindings::default();
    for id in saved_ids {
        match current.iter().find(|b| b.id() == *id) {
            Some(binding) => resolved.available.push(binding.clone()),
            None => resolved.unavailable.push(id.clone()),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_the_private_ranges() {
        assert!(is_internal_ip(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_internal_ip(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(is_internal_ip(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_internal_ip(Ipv4Addr::new(172, 31, 255, 1)));
        assert!(!is_internal_ip(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_internal_ip(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!is_internal_ip(Ipv4Addr::new(192, 169, 1, 1)));
        assert!(is_internal_ip(Ipv4Addr::new(169, 254, 0, 5)));
        assert!(is_internal_ip(Ipv4Addr::new(100, 64, 0, 1)));
        assert!(is_internal_ip(Ipv4Addr::new(100, 127, 255, 1)));
        assert!(!is_internal_ip(Ipv4Addr::new(100, 128, 0, 1)));
        assert!(!is_internal_ip(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn public_bindings_are_flagged() {
        let public = InterfaceBinding::new("eth0", Ipv4Addr::new(203, 0, 113, 7));
        assert!(public.is_public());
        assert!(!public.is_loopback);

        let private = InterfaceBinding::new("eth0", Ipv4Addr::new(192, 168, 1, 10));
        assert!(!private.is_public());
    }

    #[test]
    fn enumeration_includes_loopback() {
        let bindings = enumerate_bindings();
        assert!(bindings.iter().any(|b| b.is_loopback));
    }

    #[test]
    fn missing_saved_bindings_are_reported_not_fatal() {
        let current = vec![
            InterfaceBinding::new("lo", Ipv4Addr::LOCALHOST),
            InterfaceBinding::new("eth0", Ipv4Addr::new(192, 168, 1, 10)),
        ];
        let saved = vec![
            "lo:127.0.0.1".to_string(),
            "wlan0:192.168.1.20".to_string(),
        ];
        let resolved = resolve_saved(&saved, &current);
        assert_eq!(resolved.available.len(), 1);
        assert_eq!(resolved.available[0].interface, "lo");
        assert_eq!(resolved.unavailable, ["wlan0:192.168.1.20"]);
    }
}
