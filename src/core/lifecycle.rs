//! Insert and delete of compiled rules in `filter`/`INPUT`
//!
//! Ownership of the entry image follows the rule's kernel state:
//!
//! - insert succeeds: the image moves into the returned [`RuleHandle`]
//! - insert fails at any step: the image is dropped, nothing is retained
//! - delete succeeds: the handle is consumed and the image dropped after commit
//! - delete fails: the handle is handed back inside [`DeleteError`], the rule
//!   is still installed and the same handle can be used to retry
//!
//! # Example
//!
//! ```
//! use iptacl::core::lifecycle::RuleLifecycleManager;
//! use iptacl::core::memory::MemoryBackend;
//! use iptacl::core::rule::{ProtocolKind, RuleSpec};
//!
//! let backend = MemoryBackend::with_filter_table();
//! let manager = RuleLifecycleManager::new(backend.clone());
//!
//! let spec = RuleSpec::new("ssh", ProtocolKind::Tcp, "ACCEPT").with_port(22);
//! let handle = manager.compile_and_insert_rule(ProtocolKind::Tcp, &spec).unwrap();
//! assert_eq!(backend.rule_count("filter", "INPUT"), Some(1));
//!
//! manager.delete_rule(handle).unwrap();
//! assert_eq!(backend.rule_count("filter", "INPUT"), Some(0));
//! ```

use tracing::{info, warn};

use crate::core::blob::RuleBlob;
use crate::core::error::{DeleteError, Result};
use crate::core::rule::{ProtocolKind, RuleSpec};
use crate::core::transaction::{TableBackend, TableTransaction};

pub const FILTER_TABLE: &str = "filter";
pub const INPUT_CHAIN: &str = "INPUT";

/// An installed rule and the exact image it was installed with
#[derive(Debug)]
pub struct RuleHandle {
    name: String,
    blob: RuleBlob,
}

impl RuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blob(&self) -> &RuleBlob {
        &self.blob
    }
}

pub struct RuleLifecycleManager<B: TableBackend> {
    backend: B,
}

impl<B: TableBackend> RuleLifecycleManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Compiles `spec` and appends it to `filter`/`INPUT` in one transaction.
    ///
    /// # Errors
    ///
    /// - [`AllocationFailure`](crate::Error::AllocationFailure): no table was opened
    /// - [`TableUnavailable`](crate::Error::TableUnavailable)
    /// - [`ChainNotFound`](crate::Error::ChainNotFound)
    /// - [`AppendFailed`](crate::Error::AppendFailed)
    /// - [`CommitFailed`](crate::Error::CommitFailed)
    ///
    /// On every error the compiled image has been dropped and the session released.
    pub fn compile_and_insert_rule(
        &self,
        kind: ProtocolKind,
        spec: &RuleSpec,
    ) -> Result<RuleHandle> {
        let blob = RuleBlob::build(kind, spec)?;

        let mut tx = TableTransaction::open(&self.backend, FILTER_TABLE)?;
        tx.require_chain(INPUT_CHAIN)?;
        tx.append(INPUT_CHAIN, &blob)?;
        tx.commit()?;

        info!(
            rule = %spec.name,
            protocol = %kind,
            port = spec.port,
            action = %spec.action,
            "Rule installed"
        );
        Ok(RuleHandle {
            name: spec.name.clone(),
            blob,
        })
    }

    /// Removes the rule installed under `handle` by presenting its image.
    ///
    /// # Errors
    ///
    /// Returns [`DeleteError`] holding the unchanged handle when the table
    /// cannot be opened, the mask cannot be allocated, no matching entry is
    /// found, or the commit is refused. The rule stays installed in all cases.
    pub fn delete_rule(&self, handle: RuleHandle) -> std::result::Result<(), DeleteError> {
        match self.remove(&handle) {
            Ok(()) => {
                info!(rule = %handle.name, "Rule removed");
                Ok(())
            }
            Err(error) => {
                warn!(rule = %handle.name, "Rule still installed: {error}");
                Err(DeleteError { handle, error })
            }
        }
    }

    fn remove(&self, handle: &RuleHandle) -> Result<()> {
        let mut tx = TableTransaction::open(&self.backend, FILTER_TABLE)?;
        tx.delete_by_content(INPUT_CHAIN, &handle.blob)?;
        tx.commit()
    }
}
