//! Rule compilation and filter-table lifecycle
//!
//! This module turns a logical rule into the binary entry the kernel's
//! iptables filter table stores, and installs or removes that entry:
//!
//! - [`rule`]: Logical rule descriptions and protocol selection
//! - [`layout`]: Field offsets and sizes of the entry ABI
//! - [`netmask`]: Prefix length to IPv4 mask conversion
//! - [`blob`]: Entry image builder
//! - [`transaction`]: Backend traits and scoped table transactions
//! - [`lifecycle`]: Insert and delete with handle ownership
//! - [`memory`]: In-process table backend
//! - `libiptc`: Kernel backend (cargo feature `libiptc`)
//! - [`error`]: Error types for compilation and table operations

pub mod blob;
pub mod error;
pub mod layout;
#[cfg(feature = "libiptc")]
pub mod libiptc;
pub mod lifecycle;
pub mod memory;
pub mod netmask;
pub mod rule;
pub mod transaction;

#[cfg(test)]
pub mod test_helpers;
