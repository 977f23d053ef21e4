//! iptacl - iptables ACL rule compiler
//!
//! Builds the binary `ipt_entry` images the kernel's iptables filter table
//! stores, installs them into `filter`/`INPUT` through libiptc, and removes
//! them again by presenting the same image.
//!
//! # Architecture
//!
//! - [`core`] - Entry layout, rule compilation, table transactions and the rule lifecycle
//! - [`registry`] - Named ACL rules and bulk load/unload
//! - [`config`] - ACL rule files and their conversion into rule specs
//! - [`validators`] - Input validation for rule fields
//! - [`audit`] - Audit trail of table changes
//! - [`utils`] - XDG directories and hex dumps
//!
//! # Resource guarantees
//!
//! - Every table session is released on every path, success or failure
//! - A compiled entry has exactly one owner until its delete commits
//! - A failed delete hands the rule handle back for a retry

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod config;
pub mod core;
pub mod registry;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::blob::RuleBlob;
pub use core::error::{DeleteError, Error, Result};
pub use core::lifecycle::{RuleHandle, RuleLifecycleManager};
pub use core::rule::{ProtocolKind, RuleSpec};
pub use registry::AclRuleManager;
