//! Logical rule descriptions
//!
//! A [`RuleSpec`] says what a rule should match and which target it jumps
//! to. The [`ProtocolKind`] chosen alongside it decides which match payload
//! layout the compiled entry carries.
//!
//! # Example
//!
//! ```
//! use iptacl::core::rule::{ProtocolKind, RuleSpec};
//!
//! let spec = RuleSpec::new("allow-http", ProtocolKind::Tcp, "ACCEPT").with_port(80);
//! assert_eq!(spec.protocol, "tcp");
//! assert!(spec.source.is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::core::layout::{ICMP_ANY_TYPE, ICMP_MAX_CODE, ICMP_SIZE, MAX_PORT, TCP_SIZE, UDP_SIZE};

/// Protocol selector for the match payload layout
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ProtocolKind {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
    #[strum(serialize = "icmp")]
    Icmp,
}

impl ProtocolKind {
    /// IANA protocol number written into the entry header
    pub const fn number(self) -> u16 {
        match self {
            ProtocolKind::Tcp => 6,
            ProtocolKind::Udp => 17,
            ProtocolKind::Icmp => 1,
        }
    }

    /// Unpadded size of the protocol's match payload
    pub const fn payload_size(self) -> usize {
        match self {
            ProtocolKind::Tcp => TCP_SIZE,
            ProtocolKind::Udp => UDP_SIZE,
            ProtocolKind::Icmp => ICMP_SIZE,
        }
    }

    /// Match extension name the kernel knows this payload by
    pub const fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Tcp => "tcp",
            ProtocolKind::Udp => "udp",
            ProtocolKind::Icmp => "icmp",
        }
    }
}

/// Values written into the protocol match payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPayload {
    Ports {
        source: (u16, u16),
        destination: (u16, u16),
    },
    Icmp {
        icmp_type: u8,
        codes: (u8, u8),
    },
}

impl ProtocolPayload {
    /// Payload for a rule of `kind` on destination `port`.
    ///
    /// Source ports always span the full range and ICMP always matches every
    /// type and code; only the destination port is selectable.
    pub const fn for_rule(kind: ProtocolKind, port: u16) -> Self {
        match kind {
            ProtocolKind::Tcp | ProtocolKind::Udp => {
                let destination = if port == 0 {
                    (0, MAX_PORT)
                } else {
                    (port, port)
                };
                ProtocolPayload::Ports {
                    source: (0, MAX_PORT),
                    destination,
                }
            }
            ProtocolKind::Icmp => ProtocolPayload::Icmp {
                icmp_type: ICMP_ANY_TYPE,
                codes: (0, ICMP_MAX_CODE),
            },
        }
    }
}

/// Logical description of one filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Display name; not part of the compiled entry
    pub name: String,
    /// Ingress interface to match
    #[serde(default)]
    pub physical_port: Option<String>,
    /// Target name, e.g. `ACCEPT` or `DROP`
    pub action: String,
    /// Source address; `None` matches any source
    #[serde(default)]
    pub source: Option<Ipv4Addr>,
    /// Match extension name, e.g. `tcp`
    pub protocol: String,
    /// Destination port; 0 matches every port
    #[serde(default)]
    pub port: u16,
    /// Source prefix length, only used with `source`
    #[serde(default)]
    pub prefix_len: u8,
}

impl RuleSpec {
    /// Rule matching every source, interface and port for `kind`
    pub fn new(name: impl Into<String>, kind: ProtocolKind, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            physical_port: None,
            action: action.into(),
            source: None,
            protocol: kind.as_str().to_string(),
            port: 0,
            prefix_len: 0,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_source(mut self, source: Ipv4Addr, prefix_len: u8) -> Self {
        self.source = Some(source);
        self.prefix_len = prefix_len;
        self
    }

    pub fn with_physical_port(mut self, interface: impl Into<String>) -> Self {
        self.physical_port = Some(interface.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(ProtocolKind::Tcp.number(), 6);
        assert_eq!(ProtocolKind::Udp.number(), 17);
        assert_eq!(ProtocolKind::Icmp.number(), 1);
    }

    #[test]
    fn test_protocol_from_str_is_case_insensitive() {
        assert_eq!(ProtocolKind::from_str("TCP").unwrap(), ProtocolKind::Tcp);
        assert_eq!(ProtocolKind::from_str("udp").unwrap(), ProtocolKind::Udp);
        assert!(ProtocolKind::from_str("sctp").is_err());
    }

    #[test]
    fn test_display_matches_extension_name() {
        for kind in ProtocolKind::iter() {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }

    #[test]
    fn test_port_payload_single_port() {
        let payload = ProtocolPayload::for_rule(ProtocolKind::Udp, 53);
        assert_eq!(
            payload,
            ProtocolPayload::Ports {
                source: (0, 65535),
                destination: (53, 53),
            }
        );
    }

    #[test]
    fn test_icmp_payload_ignores_port() {
        let payload = ProtocolPayload::for_rule(ProtocolKind::Icmp, 80);
        assert_eq!(
            payload,
            ProtocolPayload::Icmp {
                icmp_type: 0xFF,
                codes: (0, 0xFF),
            }
        );
    }
}
