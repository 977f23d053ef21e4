//! ACL rule files
//!
//! A rule file is a JSON object with a `rules` array. Every entry carries the
//! same six text fields an operator fills in for one access-control rule:
//!
//! ```json
//! {
//!   "rules": [
//!     { "name": "ssh-lan", "physical_port": "eth0", "action": "ACCEPT",
//!       "ip_addr": "192.168.1.0/24", "protocol": "tcp", "port": "22" },
//!     { "name": "no-ping", "action": "DROP", "protocol": "icmp", "port": "all" }
//!   ]
//! }
//! ```
//!
//! [`AclConfig::to_rule_spec`] turns an entry into the protocol selector and
//! [`RuleSpec`] the lifecycle manager compiles.

use crate::core::error::{Error, Result};
use crate::core::rule::{ProtocolKind, RuleSpec};
use crate::utils::get_config_dir;
use crate::validators;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Port value meaning "every destination port"
pub const ALL_PORTS: &str = "all";

/// One ACL rule as written in a rule file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclConfig {
    pub name: String,
    /// Ingress interface; empty for any
    #[serde(default)]
    pub physical_port: String,
    pub action: String,
    /// `a.b.c.d`, `a.b.c.d/len`, or empty for any source
    #[serde(default)]
    pub ip_addr: String,
    pub protocol: String,
    /// Destination port, `"all"`, or empty for every port
    #[serde(default)]
    pub port: String,
}

impl AclConfig {
    /// Validates the entry and converts it for compilation.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedProtocol`] if the protocol has no payload layout
    /// - [`Error::Validation`] for a bad name, interface, action, address, or port
    pub fn to_rule_spec(&self) -> Result<(ProtocolKind, RuleSpec)> {
        let name = validators::validate_rule_name(&self.name)
            .map_err(|msg| Error::validation("name", msg))?;

        let kind = ProtocolKind::from_str(self.protocol.trim())
            .map_err(|_| Error::UnsupportedProtocol(self.protocol.clone()))?;

        let action = validators::validate_extension_name(self.action.trim())
            .map_err(|msg| Error::validation("action", msg))?;
        if !validators::extension_name_fits(&action) {
            warn!(rule = %name, "Action '{action}' is longer than its field and will be truncated");
        }

        let mut spec = RuleSpec::new(name, kind, action).with_port(self.parse_port()?);

        let iface = validators::validate_interface(self.physical_port.trim())
            .map_err(|msg| Error::validation("physical_port", msg))?;
        if !iface.is_empty() {
            spec = spec.with_physical_port(iface);
        }

        if let Some((addr, prefix)) = self.parse_source()? {
            spec = spec.with_source(addr, prefix);
        }

        Ok((kind, spec))
    }

    fn parse_port(&self) -> Result<u16> {
        let port = self.port.trim();
        if port.is_empty() || port == ALL_PORTS {
            return Ok(0);
        }
        port.parse::<u16>().map_err(|_| {
            Error::validation(
                "port",
                format!("'{port}' is not a port number or '{ALL_PORTS}'"),
            )
        })
    }

    /// Bare addresses carry prefix 0, which compiles to a host mask.
    fn parse_source(&self) -> Result<Option<(Ipv4Addr, u8)>> {
        let addr = self.ip_addr.trim();
        if addr.is_empty() {
            return Ok(None);
        }
        if addr.contains('/') {
            let net = Ipv4Network::from_str(addr).map_err(|e| {
                Error::validation("ip_addr", format!("'{addr}' is not an IPv4 network: {e}"))
            })?;
            let prefix = validators::validate_prefix_len(net.prefix())
                .map_err(|msg| Error::validation("ip_addr", msg))?;
            return Ok(Some((net.ip(), prefix)));
        }
        let ip = Ipv4Addr::from_str(addr).map_err(|_| {
            Error::validation("ip_addr", format!("'{addr}' is not an IPv4 address"))
        })?;
        Ok(Some((ip, 0)))
    }
}

/// Contents of a rule file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclFile {
    #[serde(default)]
    pub rules: Vec<AclConfig>,
}

/// `acl.json` in the user's config directory.
pub fn default_acl_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("acl.json"))
}

/// Reads and parses a rule file.
///
/// Entries are not validated here; each is checked when it is converted so
/// one bad rule does not keep the others from loading.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read and
/// [`Error::Serialization`] if it is not a valid rule file.
pub fn load_acl_file(path: &Path) -> Result<AclFile> {
    let json = std::fs::read_to_string(path)?;
    let file: AclFile = serde_json::from_str(&json)?;
    tracing::info!(
        "Loaded {} ACL rule(s) from {}",
        file.rules.len(),
        path.display()
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn acl(protocol: &str, ip_addr: &str, port: &str) -> AclConfig {
        AclConfig {
            name: "test".to_string(),
            physical_port: String::new(),
            action: "ACCEPT".to_string(),
            ip_addr: ip_addr.to_string(),
            protocol: protocol.to_string(),
            port: port.to_string(),
        }
    }

    #[test]
    fn test_all_and_empty_port_mean_every_port() {
        assert_eq!(acl("tcp", "", "all").to_rule_spec().unwrap().1.port, 0);
        assert_eq!(acl("tcp", "", "").to_rule_spec().unwrap().1.port, 0);
        assert_eq!(acl("udp", "", "53").to_rule_spec().unwrap().1.port, 53);
    }

    #[test]
    fn test_bad_port_is_rejected() {
        for port in ["http", "65536", "-1", "ALL"] {
            let err = acl("tcp", "", port).to_rule_spec().unwrap_err();
            assert!(
                matches!(err, Error::Validation { ref field, .. } if field == "port"),
                "port {port}: {err}"
            );
        }
    }

    #[test]
    fn test_source_with_prefix() {
        let (_, spec) = acl("tcp", "10.1.0.0/16", "22").to_rule_spec().unwrap();
        assert_eq!(spec.source, Some(Ipv4Addr::new(10, 1, 0, 0)));
        assert_eq!(spec.prefix_len, 16);
    }

    #[test]
    fn test_bare_source_gets_prefix_zero() {
        let (_, spec) = acl("tcp", "192.168.0.7", "22").to_rule_spec().unwrap();
        assert_eq!(spec.source, Some(Ipv4Addr::new(192, 168, 0, 7)));
        assert_eq!(spec.prefix_len, 0);
    }

    #[test]
    fn test_empty_source_is_any() {
        let (_, spec) = acl("icmp", "", "all").to_rule_spec().unwrap();
        assert!(spec.source.is_none());
    }

    #[test]
    fn test_bad_source_is_rejected() {
        for addr in ["10.0.0", "10.0.0.0/33", "::1", "host.example"] {
            let err = acl("tcp", addr, "22").to_rule_spec().unwrap_err();
            assert!(
                matches!(err, Error::Validation { ref field, .. } if field == "ip_addr"),
                "addr {addr}: {err}"
            );
        }
    }

    #[test]
    fn test_protocol_mapping() {
        let (kind, spec) = acl("TCP", "", "80").to_rule_spec().unwrap();
        assert_eq!(kind, ProtocolKind::Tcp);
        assert_eq!(spec.protocol, "tcp");

        let err = acl("sctp", "", "80").to_rule_spec().unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(ref p) if p == "sctp"));
    }

    #[test]
    fn test_interface_is_carried() {
        let mut config = acl("udp", "", "161");
        config.physical_port = "eth1".to_string();
        let (_, spec) = config.to_rule_spec().unwrap();
        assert_eq!(spec.physical_port.as_deref(), Some("eth1"));

        config.physical_port = "this-name-is-too-long".to_string();
        assert!(config.to_rule_spec().is_err());
    }

    #[test]
    fn test_missing_name_or_action_rejected() {
        let mut config = acl("tcp", "", "22");
        config.name.clear();
        assert!(config.to_rule_spec().is_err());

        let mut config = acl("tcp", "", "22");
        config.action = "AC CEPT".to_string();
        assert!(config.to_rule_spec().is_err());
    }

    #[test]
    fn test_long_action_is_truncated_not_rejected() {
        use crate::core::blob::RuleBlob;

        let mut config = acl("tcp", "", "22");
        config.action = "X".repeat(40);
        let (kind, spec) = config.to_rule_spec().unwrap();
        assert_eq!(spec.action.len(), 40);

        let blob = RuleBlob::build(kind, &spec).unwrap();
        assert_eq!(blob.target_name(), "X".repeat(27));
    }

    #[test]
    fn test_load_acl_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rules": [
                {{"name": "ssh", "physical_port": "eth0", "action": "ACCEPT",
                  "ip_addr": "10.0.0.0/8", "protocol": "tcp", "port": "22"}},
                {{"name": "ping", "action": "DROP", "protocol": "icmp"}}
            ]}}"#
        )
        .unwrap();

        let loaded = load_acl_file(file.path()).unwrap();
        assert_eq!(loaded.rules.len(), 2);
        assert_eq!(loaded.rules[0].physical_port, "eth0");
        assert_eq!(loaded.rules[1].port, "");
        assert!(loaded.rules[1].ip_addr.is_empty());
    }

    #[test]
    fn test_load_acl_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_acl_file(&missing), Err(Error::Io(_))));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_acl_file(&bad), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_default_acl_path_file_name() {
        if let Some(path) = default_acl_path() {
            assert_eq!(path.file_name().unwrap(), "acl.json");
        }
    }
}
