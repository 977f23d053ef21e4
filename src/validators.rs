//! Input validation for ACL rule fields
//!
//! Everything that ends up in a fixed-width field of a compiled entry, or in
//! the log and audit trail, passes through here before a rule is built.
//! Validators return the accepted value or a human-readable reason.

use crate::core::layout::{EXTENSION_NAME_USABLE, IFNAMSIZ};

/// Longest rule name accepted
pub const MAX_RULE_NAME_LEN: usize = 64;

/// Validates a rule name.
///
/// Names are only used as registry keys and in logs, so any printable text
/// is fine.
///
/// # Errors
///
/// Returns `Err` if the name is empty, longer than 64 bytes, or contains
/// control characters.
///
/// # Examples
///
/// ```
/// use iptacl::validators::validate_rule_name;
///
/// assert!(validate_rule_name("allow ssh").is_ok());
/// assert!(validate_rule_name("bad\nname").is_err());
/// ```
pub fn validate_rule_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Rule name cannot be empty".to_string());
    }
    if name.len() > MAX_RULE_NAME_LEN {
        return Err(format!(
            "Rule name too long (max {MAX_RULE_NAME_LEN} bytes)"
        ));
    }
    if name.chars().any(char::is_control) {
        return Err("Rule name contains control characters".to_string());
    }
    Ok(name.to_string())
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// An empty name means "any interface" and is accepted.
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Ok(String::new());
    }

    if name.len() > IFNAMSIZ - 1 {
        return Err(format!(
            "Interface name too long (max {} characters)",
            IFNAMSIZ - 1
        ));
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates a match or target extension name such as `tcp` or `ACCEPT`.
///
/// Length is not checked here: the entry builder cuts long names to the
/// usable field width. Use [`extension_name_fits`] to warn about that.
///
/// # Errors
///
/// Returns `Err` if the name is empty or not printable ASCII.
pub fn validate_extension_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Extension name cannot be empty".to_string());
    }
    if !name.bytes().all(|b| b.is_ascii_graphic()) {
        return Err("Extension name must be printable ASCII without spaces".to_string());
    }
    Ok(name.to_string())
}

/// Whether `name` is stored whole in an extension name field.
pub fn extension_name_fits(name: &str) -> bool {
    name.len() <= EXTENSION_NAME_USABLE
}

/// Validates an IPv4 prefix length.
///
/// # Errors
///
/// Returns `Err` if the prefix is longer than 32 bits.
pub fn validate_prefix_len(prefix: u8) -> Result<u8, String> {
    if prefix > 32 {
        Err(format!("Prefix length {prefix} exceeds 32"))
    } else {
        Ok(prefix)
    }
}

/// Whether the host currently has an interface called `name`.
///
/// Informational only: a rule may legitimately name an interface that
/// appears later (hotplug, VPN tunnels). Returns `true` if interfaces cannot
/// be listed.
pub fn interface_exists(name: &str) -> bool {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    match NetworkInterface::show() {
        Ok(interfaces) => interfaces.iter().any(|iface| iface.name == name),
        Err(e) => {
            tracing::debug!("Cannot list interfaces: {e}");
            true
        }
    }
}
