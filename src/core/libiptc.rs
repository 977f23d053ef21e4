//! Kernel filter table through libip4tc
//!
//! Each [`IptcSession`] owns one `xtc_handle`, a userspace snapshot of a
//! table. Appends and deletes edit the snapshot; `iptc_commit` swaps it into
//! the kernel in one `IPT_SO_SET_REPLACE`. The handle is freed when the
//! session is dropped, committed or not.

use nix::errno::Errno;
use std::ffi::{CStr, CString, c_char, c_int, c_uchar, c_void};
use std::ptr::NonNull;
use tracing::{debug, warn};

use crate::core::blob::RuleBlob;
use crate::core::error::IptcFailure;
use crate::core::transaction::{TableBackend, TableSession};

/// Width of `xt_chainlabel`
const CHAIN_LABEL_LEN: usize = 32;

mod ffi {
    use std::ffi::{c_char, c_int, c_uchar, c_void};

    #[repr(C)]
    pub struct XtcHandle {
        _private: [u8; 0],
    }

    #[link(name = "ip4tc")]
    unsafe extern "C" {
        pub fn iptc_init(tablename: *const c_char) -> *mut XtcHandle;
        pub fn iptc_free(handle: *mut XtcHandle);
        pub fn iptc_is_chain(chain: *const c_char, handle: *mut XtcHandle) -> c_int;
        pub fn iptc_first_rule(chain: *const c_char, handle: *mut XtcHandle) -> *const c_void;
        pub fn iptc_next_rule(prev: *const c_void, handle: *mut XtcHandle) -> *const c_void;
        pub fn iptc_append_entry(
            chain: *const c_char,
            entry: *const c_void,
            handle: *mut XtcHandle,
        ) -> c_int;
        pub fn iptc_delete_entry(
            chain: *const c_char,
            origfw: *const c_void,
            matchmask: *mut c_uchar,
            handle: *mut XtcHandle,
        ) -> c_int;
        pub fn iptc_commit(handle: *mut XtcHandle) -> c_int;
        pub fn iptc_strerror(err: c_int) -> *const c_char;
    }
}

/// Captures errno and the library's description of it.
fn last_failure() -> IptcFailure {
    let errno = Errno::last_raw();
    // SAFETY: iptc_strerror returns a pointer to a static string table entry.
    let message = unsafe {
        let text = ffi::iptc_strerror(errno as c_int);
        if text.is_null() {
            Errno::from_raw(errno).desc().to_string()
        } else {
            CStr::from_ptr(text).to_string_lossy().into_owned()
        }
    };
    IptcFailure::new(errno, message)
}

/// NUL-padded `xt_chainlabel`; longer names are rejected like libiptc does.
fn chain_label(chain: &str) -> Result<[c_char; CHAIN_LABEL_LEN], IptcFailure> {
    let bytes = chain.as_bytes();
    if bytes.len() >= CHAIN_LABEL_LEN || bytes.contains(&0) {
        return Err(IptcFailure::new(
            Errno::EINVAL as i32,
            format!("Invalid chain name '{chain}'"),
        ));
    }
    let mut label = [0 as c_char; CHAIN_LABEL_LEN];
    for (slot, &byte) in label.iter_mut().zip(bytes) {
        *slot = byte as c_char;
    }
    Ok(label)
}

/// Backend talking to the running kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct IptcBackend;

impl TableBackend for IptcBackend {
    type Session = IptcSession;

    fn open(&self, table: &str) -> Result<IptcSession, IptcFailure> {
        let name = CString::new(table)
            .map_err(|_| IptcFailure::new(Errno::EINVAL as i32, "Table name contains NUL"))?;
        // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
        let handle = unsafe { ffi::iptc_init(name.as_ptr()) };
        let handle = NonNull::new(handle).ok_or_else(last_failure)?;
        debug!(table, "libiptc handle initialised");
        Ok(IptcSession { handle })
    }
}

/// Owned `xtc_handle`
#[derive(Debug)]
pub struct IptcSession {
    handle: NonNull<ffi::XtcHandle>,
}

impl TableSession for IptcSession {
    fn is_chain(&self, chain: &str) -> bool {
        let Ok(label) = chain_label(chain) else {
            return false;
        };
        // SAFETY: the handle is live until drop and the label is NUL-terminated.
        unsafe { ffi::iptc_is_chain(label.as_ptr(), self.handle.as_ptr()) != 0 }
    }

    fn append_entry(&mut self, chain: &str, entry: &RuleBlob) -> Result<(), IptcFailure> {
        let label = chain_label(chain)?;
        // SAFETY: `entry` is an aligned, fully initialised ipt_entry image of
        // `next_offset` bytes; libiptc copies it before returning.
        let ok = unsafe {
            ffi::iptc_append_entry(
                label.as_ptr(),
                entry.as_ptr().cast::<c_void>(),
                self.handle.as_ptr(),
            )
        };
        if ok == 0 { Err(last_failure()) } else { Ok(()) }
    }

    fn delete_entry(
        &mut self,
        chain: &str,
        entry: &RuleBlob,
        mask: &mut [u8],
    ) -> Result<(), IptcFailure> {
        let label = chain_label(chain)?;
        if mask.len() < entry.next_offset() {
            return Err(IptcFailure::new(
                Errno::EINVAL as i32,
                "Match mask shorter than entry",
            ));
        }
        // SAFETY: `entry` and `mask` both cover `next_offset` bytes and stay
        // borrowed for the whole call; libiptc keeps no reference to either.
        let ok = unsafe {
            ffi::iptc_delete_entry(
                label.as_ptr(),
                entry.as_ptr().cast::<c_void>(),
                mask.as_mut_ptr().cast::<c_uchar>(),
                self.handle.as_ptr(),
            )
        };
        if ok == 0 { Err(last_failure()) } else { Ok(()) }
    }

    fn commit(&mut self) -> Result<(), IptcFailure> {
        // SAFETY: the handle is live until drop.
        let ok = unsafe { ffi::iptc_commit(self.handle.as_ptr()) };
        if ok == 0 { Err(last_failure()) } else { Ok(()) }
    }

    fn rule_count(&self, chain: &str) -> Option<usize> {
        if !self.is_chain(chain) {
            return None;
        }
        let label = chain_label(chain).ok()?;
        let mut count = 0;
        // SAFETY: rule pointers come from this handle and are only walked,
        // never dereferenced here.
        unsafe {
            let mut rule = ffi::iptc_first_rule(label.as_ptr(), self.handle.as_ptr());
            while !rule.is_null() {
                count += 1;
                rule = ffi::iptc_next_rule(rule, self.handle.as_ptr());
            }
        }
        Some(count)
    }
}

impl Drop for IptcSession {
    fn drop(&mut self) {
        // SAFETY: the handle came from iptc_init and is freed exactly once.
        unsafe { ffi::iptc_free(self.handle.as_ptr()) };
        debug!("libiptc handle freed");
    }
}

/// Whether this process may open kernel tables at all
pub fn has_table_privileges() -> bool {
    let root = nix::unistd::geteuid().is_root();
    if !root {
        warn!("Not running as root; opening kernel tables will likely fail");
    }
    root
}
