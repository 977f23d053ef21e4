//! Scoped filter-table transactions
//!
//! A [`TableTransaction`] wraps one session opened from a [`TableBackend`].
//! The session is released when the transaction is dropped, so every early
//! return through `?` aborts it and frees the library handle. Changes become
//! visible only through [`TableTransaction::commit`].

use tracing::{debug, error, info};

use crate::core::blob::{RuleBlob, zeroed_bytes};
use crate::core::error::{Error, IptcFailure, Result};

/// Source of table sessions (the kernel via libiptc, or an in-memory table)
pub trait TableBackend {
    type Session: TableSession;

    /// Takes a snapshot of `table` for modification.
    fn open(&self, table: &str) -> std::result::Result<Self::Session, IptcFailure>;
}

/// One open snapshot of a table. Dropping it releases the snapshot and
/// discards uncommitted changes.
pub trait TableSession {
    fn is_chain(&self, chain: &str) -> bool;

    fn append_entry(
        &mut self,
        chain: &str,
        entry: &RuleBlob,
    ) -> std::result::Result<(), IptcFailure>;

    /// Removes the first entry of `chain` equal to `entry` under `mask`.
    fn delete_entry(
        &mut self,
        chain: &str,
        entry: &RuleBlob,
        mask: &mut [u8],
    ) -> std::result::Result<(), IptcFailure>;

    fn commit(&mut self) -> std::result::Result<(), IptcFailure>;

    /// Number of entries in `chain`, `None` if the chain does not exist.
    fn rule_count(&self, chain: &str) -> Option<usize>;
}

/// A single insert or delete against one table
pub struct TableTransaction<S: TableSession> {
    table: String,
    session: S,
}

impl<S: TableSession> TableTransaction<S> {
    /// Opens `table` on `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableUnavailable`] if the library cannot snapshot the table.
    pub fn open<B>(backend: &B, table: &str) -> Result<Self>
    where
        B: TableBackend<Session = S>,
    {
        match backend.open(table) {
            Ok(session) => {
                debug!(table, "Opened table session");
                Ok(Self {
                    table: table.to_string(),
                    session,
                })
            }
            Err(source) => {
                error!(table, "Cannot open table: {source}");
                Err(Error::TableUnavailable {
                    table: table.to_string(),
                    source,
                })
            }
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// # Errors
    ///
    /// Returns [`Error::ChainNotFound`] if `chain` is not in the table.
    pub fn require_chain(&self, chain: &str) -> Result<()> {
        if self.session.is_chain(chain) {
            Ok(())
        } else {
            error!(table = %self.table, chain, "No such chain");
            Err(Error::ChainNotFound {
                table: self.table.clone(),
                chain: chain.to_string(),
            })
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::AppendFailed`] if the library rejects the entry.
    pub fn append(&mut self, chain: &str, blob: &RuleBlob) -> Result<()> {
        self.session.append_entry(chain, blob).map_err(|source| {
            error!(chain, "Append entry failed: {source}");
            Error::AppendFailed {
                chain: chain.to_string(),
                source,
            }
        })
    }

    /// Deletes the entry whose image equals `blob`.
    ///
    /// # Errors
    ///
    /// - [`Error::AllocationFailure`] if the scratch mask cannot be allocated;
    ///   the library is not called in that case
    /// - [`Error::DeleteFailed`] if no matching entry could be removed
    pub fn delete_by_content(&mut self, chain: &str, blob: &RuleBlob) -> Result<()> {
        let mut mask = zeroed_bytes(blob.next_offset(), "delete match mask")?;

        self.session
            .delete_entry(chain, blob, &mut mask)
            .map_err(|source| {
                error!(chain, "Delete entry failed: {source}");
                Error::DeleteFailed {
                    chain: chain.to_string(),
                    source,
                }
            })
    }

    pub fn rule_count(&self, chain: &str) -> Option<usize> {
        self.session.rule_count(chain)
    }

    /// Makes the changes of this transaction visible and closes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommitFailed`] if the kernel refuses the new table.
    pub fn commit(mut self) -> Result<()> {
        match self.session.commit() {
            Ok(()) => {
                info!(table = %self.table, "Committed table transaction");
                Ok(())
            }
            Err(source) => {
                error!(table = %self.table, "Commit failed: {source}");
                Err(Error::CommitFailed {
                    table: self.table.clone(),
                    source,
                })
            }
        }
    }
}

impl<S: TableSession> Drop for TableTransaction<S> {
    fn drop(&mut self) {
        debug!(table = %self.table, "Releasing table session");
    }
}
