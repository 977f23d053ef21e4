use thiserror::Error;

use crate::core::lifecycle::RuleHandle;

/// Failure reported by the table library for a single call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (errno {errno})")]
pub struct IptcFailure {
    pub errno: i32,
    pub message: String,
}

impl IptcFailure {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }
}

/// Core error types for iptacl
#[derive(Debug, Error)]
pub enum Error {
    /// A rule or mask buffer could not be allocated
    #[error("Allocation failed: cannot reserve {size} bytes for {what}")]
    AllocationFailure { what: &'static str, size: usize },

    /// The table session could not be opened
    #[error("Table '{table}' unavailable: {source}")]
    TableUnavailable {
        table: String,
        #[source]
        source: IptcFailure,
    },

    /// The target chain does not exist in the opened table
    #[error("Chain '{chain}' not found in table '{table}'")]
    ChainNotFound { table: String, chain: String },

    /// Appending the entry to the chain was refused
    #[error("Append to chain '{chain}' failed: {source}")]
    AppendFailed {
        chain: String,
        #[source]
        source: IptcFailure,
    },

    /// No entry matching the blob could be removed from the chain
    #[error("Delete from chain '{chain}' failed: {source}")]
    DeleteFailed {
        chain: String,
        #[source]
        source: IptcFailure,
    },

    /// The transaction was not accepted by the kernel
    #[error("Commit of table '{table}' failed: {source}")]
    CommitFailed {
        table: String,
        #[source]
        source: IptcFailure,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Protocol has no payload layout
    #[error("Rule adding for protocol '{0}' is not supported")]
    UnsupportedProtocol(String),

    /// A rule with this name is already installed
    #[error("Rule '{0}' already exists")]
    RuleExists(String),

    /// No installed rule has this name
    #[error("No rule found for '{0}'")]
    RuleNotFound(String),

    /// The kernel table backend was not compiled in
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Library message behind a kernel-facing failure, if any
    pub fn iptc_failure(&self) -> Option<&IptcFailure> {
        match self {
            Self::TableUnavailable { source, .. }
            | Self::AppendFailed { source, .. }
            | Self::DeleteFailed { source, .. }
            | Self::CommitFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A delete that did not complete.
///
/// The rule is still installed, so the handle travels back to the caller
/// untouched and can be passed to another delete attempt.
#[derive(Debug, Error)]
#[error("Delete of rule '{}' failed: {error}", .handle.name())]
pub struct DeleteError {
    pub handle: RuleHandle,
    #[source]
    pub error: Error,
}

impl DeleteError {
    pub fn into_parts(self) -> (RuleHandle, Error) {
        (self.handle, self.error)
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known libiptc error messages and their translations
pub struct IptcErrorPattern;

impl IptcErrorPattern {
    /// Matches a library message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify the filter table")
                .with_suggestion("Run iptacl as root")
                .with_suggestion("Or grant CAP_NET_ADMIN to the binary: setcap cap_net_admin+ep");
        }

        if lower.contains("table does not exist") {
            return ErrorTranslation::new("The kernel has no such iptables table")
                .with_suggestion("Load the filter module: sudo modprobe iptable_filter")
                .with_suggestion("Check that the legacy iptables backend is in use");
        }

        if lower.contains("bad built-in chain name") || lower.contains("no chain/target/match") {
            return ErrorTranslation::new("Chain, target or match not found")
                .with_suggestion("Check the action name (ACCEPT, DROP, or an existing chain)")
                .with_suggestion("Check the protocol name (tcp, udp, icmp)");
        }

        if lower.contains("bad rule") || lower.contains("does a matching rule exist") {
            return ErrorTranslation::new("No installed rule matches this entry")
                .with_suggestion("The rule may have been removed by another tool")
                .with_suggestion("List the chain: iptables -S INPUT");
        }

        if lower.contains("memory allocation problem") || lower.contains("cannot allocate") {
            return ErrorTranslation::new("Out of memory while talking to the filter table")
                .with_suggestion("Retry once memory pressure is gone");
        }

        if lower.contains("module is wrong version") || lower.contains("protocol not available") {
            return ErrorTranslation::new("Kernel netfilter interface mismatch")
                .with_suggestion("Load ip_tables: sudo modprobe ip_tables")
                .with_suggestion("Check that libip4tc matches the running kernel");
        }

        if lower.contains("resource temporarily unavailable") || lower.contains("busy") {
            return ErrorTranslation::new("Filter table changed underneath the transaction")
                .with_suggestion("Another process committed in between; retry the operation");
        }

        ErrorTranslation::new(format!("Filter table error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify the table is readable: sudo iptables -L INPUT")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
