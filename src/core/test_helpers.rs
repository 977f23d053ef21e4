//! Shared test utilities for core module tests
//!
//! Provides common rule and backend fixtures so test suites don't each
//! build their own. This module is only compiled in test mode.

use crate::core::lifecycle::{FILTER_TABLE, INPUT_CHAIN, RuleLifecycleManager};
use crate::core::memory::MemoryBackend;
use crate::core::rule::{ProtocolKind, RuleSpec};
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// Hold the guard while changing `XDG_*` or `HOME` and restore them before
/// dropping it:
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("XDG_CONFIG_HOME", dir.path());
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("XDG_CONFIG_HOME");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// TCP rule accepting `port` from anywhere.
pub fn tcp_spec(name: &str, port: u16) -> RuleSpec {
    RuleSpec::new(name, ProtocolKind::Tcp, "ACCEPT").with_port(port)
}

/// Rule with every field populated.
///
/// # Arguments
///
/// * `name` - Rule name
/// * `kind` - Protocol layout
/// * `port` - Destination port, 0 for all
/// * `source` - Optional `a.b.c.d/len`
/// * `interface` - Optional ingress interface
pub fn full_spec(
    name: &str,
    kind: ProtocolKind,
    port: u16,
    source: Option<&str>,
    interface: Option<&str>,
) -> RuleSpec {
    let mut spec = RuleSpec::new(name, kind, "DROP").with_port(port);
    if let Some(net) = source.and_then(|s| s.parse::<ipnetwork::Ipv4Network>().ok()) {
        spec = spec.with_source(net.ip(), net.prefix());
    }
    if let Some(iface) = interface {
        spec = spec.with_physical_port(iface);
    }
    spec
}

/// Memory backend with an empty filter table and a manager bound to it.
///
/// The backend is returned separately so tests can inspect the table and
/// arm failures while the manager holds its own clone.
pub fn seeded_backend() -> (MemoryBackend, RuleLifecycleManager<MemoryBackend>) {
    let backend = MemoryBackend::with_filter_table();
    let manager = RuleLifecycleManager::new(backend.clone());
    (backend, manager)
}

/// Committed entry count of `filter`/`INPUT`.
pub fn input_rules(backend: &MemoryBackend) -> usize {
    backend.rule_count(FILTER_TABLE, INPUT_CHAIN).unwrap_or(0)
}
