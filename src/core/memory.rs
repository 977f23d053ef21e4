//! In-process filter table
//!
//! [`MemoryBackend`] behaves like libiptc against a table that lives in this
//! process: sessions work on a private copy of the table and publish it on
//! commit. It backs `iptacl apply --dry-run` and the test suites, and can be
//! told to fail at a chosen step with [`MemoryBackend::arm`].
//!
//! Deletes compare entries the way libiptc does: the IP header, offsets,
//! match headers and target must be equal, while match payload bytes only
//! count where the caller's mask has bits set. With an all-zero mask two
//! rules that differ only in their ports are the same rule.

use nix::errno::Errno;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::core::blob::RuleBlob;
use crate::core::error::IptcFailure;
use crate::core::layout::{
    ENTRY_COMEFROM, ENTRY_NFCACHE, ENTRY_SIZE, ENTRY_TARGET_OFFSET, EXTENSION_HEADER_SIZE,
    EXTENSION_NAME, EXTENSION_NAME_LEN, IFNAMSIZ, IP_INIFACE, IP_INIFACE_MASK, IP_OUTIFACE,
    IP_OUTIFACE_MASK, IP_PROTO, IP_SIZE, IP_SRC,
};
use crate::core::transaction::{TableBackend, TableSession};

type Chains = BTreeMap<String, Vec<Vec<u8>>>;

/// Built-in chains of the filter table
pub const FILTER_CHAINS: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];

/// Step at which an armed backend reports a library failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Open,
    Append,
    Delete,
    Commit,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Chains>,
    armed: HashSet<FailPoint>,
    opened: usize,
    closed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// Backend without any table
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with an empty `filter` table and its built-in chains
    pub fn with_filter_table() -> Self {
        let backend = Self::new();
        for chain in FILTER_CHAINS {
            backend.add_chain("filter", chain);
        }
        backend
    }

    pub fn add_chain(&self, table: &str, chain: &str) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(chain.to_string())
            .or_default();
    }

    pub fn remove_chain(&self, table: &str, chain: &str) {
        if let Some(chains) = self.lock().tables.get_mut(table) {
            chains.remove(chain);
        }
    }

    /// Makes every later call at `point` fail until disarmed.
    pub fn arm(&self, point: FailPoint) {
        self.lock().armed.insert(point);
    }

    pub fn disarm(&self, point: FailPoint) {
        self.lock().armed.remove(&point);
    }

    /// Committed entry count of `chain`
    pub fn rule_count(&self, table: &str, chain: &str) -> Option<usize> {
        self.lock()
            .tables
            .get(table)
            .and_then(|chains| chains.get(chain))
            .map(Vec::len)
    }

    /// Committed entry images of `chain`
    pub fn entries(&self, table: &str, chain: &str) -> Vec<Vec<u8>> {
        self.lock()
            .tables
            .get(table)
            .and_then(|chains| chains.get(chain))
            .cloned()
            .unwrap_or_default()
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().opened
    }

    /// Sessions opened but not yet released
    pub fn sessions_open(&self) -> usize {
        let state = self.lock();
        state.opened - state.closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure(errno: Errno, message: &str) -> IptcFailure {
    IptcFailure::new(errno as i32, message)
}

fn u16_at(bytes: &[u8], offset: usize) -> usize {
    usize::from(u16::from_ne_bytes([bytes[offset], bytes[offset + 1]]))
}

fn c_name(slot: &[u8]) -> &[u8] {
    slot.iter()
        .position(|&b| b == 0)
        .map_or(slot, |end| &slot[..end])
}

/// Whether libiptc would treat `a` and `b` as the same rule under `mask`.
///
/// Counters and `comefrom` are never compared. Interface names count only
/// where the entries' own interface masks are set.
fn same_entry(a: &[u8], b: &[u8], mask: &[u8]) -> bool {
    if a.len() < ENTRY_SIZE || b.len() < ENTRY_SIZE {
        return false;
    }
    // src, dst, smsk, dmsk, then proto, flags, invflags
    if a[IP_SRC..IP_INIFACE] != b[IP_SRC..IP_INIFACE]
        || a[IP_PROTO..IP_SIZE] != b[IP_PROTO..IP_SIZE]
    {
        return false;
    }
    for (name, name_mask) in [(IP_INIFACE, IP_INIFACE_MASK), (IP_OUTIFACE, IP_OUTIFACE_MASK)] {
        for i in 0..IFNAMSIZ {
            let (ma, mb) = (a[name_mask + i], b[name_mask + i]);
            if ma != mb || a[name + i] & ma != b[name + i] & mb {
                return false;
            }
        }
    }
    // nfcache, target_offset, next_offset
    if a[ENTRY_NFCACHE..ENTRY_COMEFROM] != b[ENTRY_NFCACHE..ENTRY_COMEFROM] {
        return false;
    }

    let target_offset = u16_at(a, ENTRY_TARGET_OFFSET);
    let next_offset = u16_at(a, ENTRY_TARGET_OFFSET + 2);
    if target_offset > next_offset || next_offset > a.len() || next_offset > b.len() {
        return false;
    }

    let mut offset = ENTRY_SIZE;
    while offset < target_offset {
        let size = u16_at(a, offset);
        if size < EXTENSION_HEADER_SIZE || offset + size > target_offset {
            return false;
        }
        let name = offset + EXTENSION_NAME..offset + EXTENSION_NAME + EXTENSION_NAME_LEN;
        if u16_at(b, offset) != size || c_name(&a[name.clone()]) != c_name(&b[name]) {
            return false;
        }
        let differs = (offset + EXTENSION_HEADER_SIZE..offset + size)
            .any(|i| (a[i] ^ b[i]) & mask.get(i).copied().unwrap_or(0) != 0);
        if differs {
            return false;
        }
        offset += size;
    }

    a[target_offset..next_offset] == b[target_offset..next_offset]
}

impl TableBackend for MemoryBackend {
    type Session = MemorySession;

    fn open(&self, table: &str) -> Result<MemorySession, IptcFailure> {
        let mut state = self.lock();
        if state.armed.contains(&FailPoint::Open) {
            return Err(failure(Errno::EPERM, "Permission denied (you must be root)"));
        }
        let chains = state.tables.get(table).cloned().ok_or_else(|| {
            failure(
                Errno::ENOENT,
                "Table does not exist (do you need to insmod?)",
            )
        })?;
        state.opened += 1;
        debug!(table, "Memory table session opened");

        Ok(MemorySession {
            state: Arc::clone(&self.state),
            table: table.to_string(),
            chains,
        })
    }
}

/// Private copy of one table, published on commit
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<State>>,
    table: String,
    chains: Chains,
}

impl MemorySession {
    fn armed(&self, point: FailPoint) -> bool {
        lock_state(&self.state).armed.contains(&point)
    }
}

impl TableSession for MemorySession {
    fn is_chain(&self, chain: &str) -> bool {
        self.chains.contains_key(chain)
    }

    fn append_entry(&mut self, chain: &str, entry: &RuleBlob) -> Result<(), IptcFailure> {
        if self.armed(FailPoint::Append) {
            return Err(failure(Errno::ENOMEM, "Memory allocation problem"));
        }
        let rules = self
            .chains
            .get_mut(chain)
            .ok_or_else(|| failure(Errno::ENOENT, "No chain/target/match by that name"))?;
        rules.push(entry.as_bytes().to_vec());
        Ok(())
    }

    fn delete_entry(
        &mut self,
        chain: &str,
        entry: &RuleBlob,
        mask: &mut [u8],
    ) -> Result<(), IptcFailure> {
        if self.armed(FailPoint::Delete) {
            return Err(failure(
                Errno::ENOENT,
                "Bad rule (does a matching rule exist in that chain?)",
            ));
        }
        let rules = self
            .chains
            .get_mut(chain)
            .ok_or_else(|| failure(Errno::ENOENT, "No chain/target/match by that name"))?;
        let position = rules
            .iter()
            .position(|image| same_entry(image, entry.as_bytes(), mask))
            .ok_or_else(|| {
                failure(
                    Errno::ENOENT,
                    "Bad rule (does a matching rule exist in that chain?)",
                )
            })?;
        rules.remove(position);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IptcFailure> {
        let mut state = lock_state(&self.state);
        if state.armed.contains(&FailPoint::Commit) {
            return Err(failure(Errno::EAGAIN, "Resource temporarily unavailable"));
        }
        state
            .tables
            .insert(self.table.clone(), self.chains.clone());
        Ok(())
    }

    fn rule_count(&self, chain: &str) -> Option<usize> {
        self.chains.get(chain).map(Vec::len)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        lock_state(&self.state).closed += 1;
    }
}
