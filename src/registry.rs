//! Named ACL rules installed in the filter table
//!
//! [`AclRuleManager`] keeps the handle of every rule it installed under the
//! rule's name, so a later delete can present the exact entry image that was
//! appended. A handle leaves the registry only when its delete succeeds.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditLog, EventType};
use crate::config::AclConfig;
use crate::core::error::{DeleteError, Error, Result};
use crate::core::lifecycle::{RuleHandle, RuleLifecycleManager};
use crate::core::transaction::TableBackend;

/// Outcome of a bulk load
#[derive(Debug, Default)]
pub struct LoadReport {
    pub installed: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl LoadReport {
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

pub struct AclRuleManager<B: TableBackend> {
    lifecycle: RuleLifecycleManager<B>,
    rules: BTreeMap<String, RuleHandle>,
    audit: Option<AuditLog>,
}

impl<B: TableBackend> AclRuleManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            lifecycle: RuleLifecycleManager::new(backend),
            rules: BTreeMap::new(),
            audit: None,
        }
    }

    /// Records every insert and delete attempt in `audit`.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn lifecycle(&self) -> &RuleLifecycleManager<B> {
        &self.lifecycle
    }

    /// Compiles and installs `config` under its name.
    ///
    /// # Errors
    ///
    /// - [`Error::RuleExists`] if a rule with this name is already installed
    /// - [`Error::UnsupportedProtocol`] or [`Error::Validation`] for a bad entry
    /// - any table error from the insert; nothing is recorded in that case
    pub fn add_rule(&mut self, config: &AclConfig) -> Result<()> {
        if self.rules.contains_key(&config.name) {
            warn!(rule = %config.name, "Rule already installed");
            return Err(Error::RuleExists(config.name.clone()));
        }

        let (kind, spec) = config.to_rule_spec().inspect_err(|e| {
            error!(rule = %config.name, "Rejected ACL entry: {e}");
        })?;

        let details = json!({
            "protocol": kind.as_str(),
            "port": spec.port,
            "action": spec.action,
        });

        match self.lifecycle.compile_and_insert_rule(kind, &spec) {
            Ok(handle) => {
                self.audit(
                    EventType::InsertRule,
                    &spec.name,
                    with_fingerprint(details, &handle),
                    None,
                );
                self.rules.insert(spec.name, handle);
                Ok(())
            }
            Err(e) => {
                self.audit(EventType::InsertRule, &spec.name, details, Some(&e));
                Err(e)
            }
        }
    }

    /// Installed rules cannot be changed in place.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::Validation`]; delete the rule and add it again.
    pub fn update_rule(&mut self, config: &AclConfig) -> Result<()> {
        warn!(rule = %config.name, "Rule update requested");
        Err(Error::Validation {
            field: "rule".to_string(),
            message: format!(
                "Updating '{}' in place is not supported; delete and add it instead",
                config.name
            ),
        })
    }

    /// Removes the rule installed under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuleNotFound`] if no rule has this name. If the
    /// table refuses the delete the rule stays registered and the table
    /// error is returned.
    pub fn delete_rule(&mut self, name: &str) -> Result<()> {
        let Some(handle) = self.rules.remove(name) else {
            error!(rule = name, "No rule found");
            return Err(Error::RuleNotFound(name.to_string()));
        };

        let details = with_fingerprint(json!({}), &handle);
        match self.lifecycle.delete_rule(handle) {
            Ok(()) => {
                self.audit(EventType::DeleteRule, name, details, None);
                Ok(())
            }
            Err(DeleteError { handle, error }) => {
                self.audit(EventType::DeleteRule, name, details, Some(&error));
                self.rules.insert(name.to_string(), handle);
                Err(error)
            }
        }
    }

    /// Installs each entry in its own transaction.
    ///
    /// A failing entry is logged and skipped; the rest still load.
    pub fn add_all<'a, I>(&mut self, configs: I) -> LoadReport
    where
        I: IntoIterator<Item = &'a AclConfig>,
    {
        let mut report = LoadReport::default();
        for config in configs {
            match self.add_rule(config) {
                Ok(()) => report.installed.push(config.name.clone()),
                Err(e) => {
                    error!(rule = %config.name, "Failed to install rule: {e}");
                    report.failed.push((config.name.clone(), e));
                }
            }
        }
        info!(
            installed = report.installed.len(),
            failed = report.failure_count(),
            "ACL load finished"
        );
        report
    }

    /// Removes every registered rule. Rules whose delete fails stay registered.
    pub fn delete_all(&mut self) -> Vec<(String, Error)> {
        let names: Vec<String> = self.rules.keys().cloned().collect();
        let mut failed = Vec::new();
        for name in names {
            if let Err(e) = self.delete_rule(&name) {
                failed.push((name, e));
            }
        }
        failed
    }

    pub fn get(&self, name: &str) -> Option<&RuleHandle> {
        self.rules.get(name)
    }

    /// Registered rule names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn audit(
        &self,
        event_type: EventType,
        rule: &str,
        details: serde_json::Value,
        error: Option<&Error>,
    ) {
        if let Some(audit) = &self.audit {
            let event = AuditEvent::new(
                event_type,
                rule,
                error.is_none(),
                details,
                error.map(ToString::to_string),
            );
            audit.record(&event);
        }
    }
}

fn with_fingerprint(mut details: serde_json::Value, handle: &RuleHandle) -> serde_json::Value {
    details["fingerprint"] = json!(handle.blob().fingerprint());
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::{FILTER_TABLE, INPUT_CHAIN};
    use crate::core::memory::{FailPoint, MemoryBackend};

    fn acl(name: &str, protocol: &str, port: &str) -> AclConfig {
        AclConfig {
            name: name.to_string(),
            action: "ACCEPT".to_string(),
            protocol: protocol.to_string(),
            port: port.to_string(),
            ..AclConfig::default()
        }
    }

    fn setup() -> (MemoryBackend, AclRuleManager<MemoryBackend>) {
        let backend = MemoryBackend::with_filter_table();
        (backend.clone(), AclRuleManager::new(backend))
    }

    fn installed(backend: &MemoryBackend) -> usize {
        backend.rule_count(FILTER_TABLE, INPUT_CHAIN).unwrap_or(0)
    }

    #[test]
    fn test_add_and_delete_by_name() {
        let (backend, mut registry) = setup();
        registry.add_rule(&acl("ssh", "tcp", "22")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ssh").is_some());
        assert_eq!(installed(&backend), 1);

        registry.delete_rule("ssh").unwrap();
        assert!(registry.is_empty());
        assert_eq!(installed(&backend), 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (backend, mut registry) = setup();
        registry.add_rule(&acl("ssh", "tcp", "22")).unwrap();
        let err = registry.add_rule(&acl("ssh", "tcp", "2222")).unwrap_err();
        assert!(matches!(err, Error::RuleExists(ref n) if n == "ssh"));
        assert_eq!(installed(&backend), 1);
    }

    #[test]
    fn test_unsupported_protocol_touches_nothing() {
        let (backend, mut registry) = setup();
        let err = registry.add_rule(&acl("gre", "gre", "all")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(_)));
        assert_eq!(backend.sessions_opened(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete_unknown_name() {
        let (_, mut registry) = setup();
        assert!(matches!(
            registry.delete_rule("nope"),
            Err(Error::RuleNotFound(_))
        ));
    }

    #[test]
    fn test_failed_delete_keeps_registration() {
        let (backend, mut registry) = setup();
        registry.add_rule(&acl("dns", "udp", "53")).unwrap();

        backend.arm(FailPoint::Commit);
        let err = registry.delete_rule("dns").unwrap_err();
        assert!(matches!(err, Error::CommitFailed { .. }));
        assert!(registry.get("dns").is_some());
        assert_eq!(installed(&backend), 1);

        backend.disarm(FailPoint::Commit);
        registry.delete_rule("dns").unwrap();
        assert_eq!(installed(&backend), 0);
    }

    #[test]
    fn test_failed_insert_not_registered() {
        let (backend, mut registry) = setup();
        backend.arm(FailPoint::Append);
        assert!(registry.add_rule(&acl("ssh", "tcp", "22")).is_err());
        assert!(registry.is_empty());

        backend.disarm(FailPoint::Append);
        registry.add_rule(&acl("ssh", "tcp", "22")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_unsupported() {
        let (_, mut registry) = setup();
        registry.add_rule(&acl("ssh", "tcp", "22")).unwrap();
        assert!(matches!(
            registry.update_rule(&acl("ssh", "tcp", "2222")),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_add_all_continues_past_failures() {
        let (backend, mut registry) = setup();
        let configs = vec![
            acl("ssh", "tcp", "22"),
            acl("bad", "sctp", "1"),
            acl("dns", "udp", "53"),
            acl("ssh", "tcp", "23"),
            acl("ping", "icmp", "all"),
        ];

        let report = registry.add_all(&configs);
        assert_eq!(report.installed, vec!["ssh", "dns", "ping"]);
        assert_eq!(report.failure_count(), 2);
        assert_eq!(installed(&backend), 3);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["dns", "ping", "ssh"]);
    }

    #[test]
    fn test_delete_all() {
        let (backend, mut registry) = setup();
        registry.add_all(&[acl("a", "tcp", "1"), acl("b", "udp", "2")]);

        assert!(registry.delete_all().is_empty());
        assert!(registry.is_empty());
        assert_eq!(installed(&backend), 0);
        assert_eq!(backend.sessions_open(), 0);
    }

    #[test]
    fn test_delete_all_keeps_failures() {
        let (backend, mut registry) = setup();
        registry.add_all(&[acl("a", "tcp", "1"), acl("b", "udp", "2")]);

        backend.arm(FailPoint::Delete);
        let failed = registry.delete_all();
        assert_eq!(failed.len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_audit_records_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));
        let backend = MemoryBackend::with_filter_table();
        let mut registry = AclRuleManager::new(backend.clone()).with_audit(audit.clone());

        registry.add_rule(&acl("ssh", "tcp", "22")).unwrap();
        let fingerprint = registry.get("ssh").unwrap().blob().fingerprint();
        backend.arm(FailPoint::Commit);
        assert!(registry.delete_rule("ssh").is_err());

        let events = audit.read_recent(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::DeleteRule);
        assert!(!events[0].success);
        assert!(events[0].error.is_some());
        assert_eq!(events[1].event_type, EventType::InsertRule);
        assert!(events[1].success);
        assert_eq!(events[1].details["fingerprint"], fingerprint.as_str());
        assert_eq!(events[0].details["fingerprint"], fingerprint.as_str());
    }
}
