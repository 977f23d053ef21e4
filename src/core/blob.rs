//! Compilation of a [`RuleSpec`] into the entry image the filter table expects
//!
//! The image lives in a zeroed, 8-byte aligned buffer. Fields are written and
//! read through the offsets in [`crate::core::layout`]; nothing overlays typed
//! structs on the buffer.

use sha2::{Digest, Sha256};
use std::net::Ipv4Addr;
use tracing::debug;
use zerocopy::IntoBytes;

use crate::core::error::{Error, Result};
use crate::core::layout::{
    ENTRY_NEXT_OFFSET, ENTRY_SIZE, ENTRY_TARGET_OFFSET, EXTENSION_HEADER_SIZE, EXTENSION_NAME,
    EXTENSION_NAME_LEN, EXTENSION_NAME_USABLE, EXTENSION_SIZE_FIELD, ICMP_CODE, ICMP_TYPE,
    IFNAMSIZ, IP_INIFACE, IP_PROTO, IP_SMSK, IP_SRC, PORTS_DST, PORTS_SRC, STANDARD_TARGET_SIZE,
    xt_align,
};
use crate::core::netmask::netmask;
use crate::core::rule::{ProtocolKind, ProtocolPayload, RuleSpec};

/// Aligned segment sizes of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLayout {
    pub entry: usize,
    pub matcher: usize,
    pub payload: usize,
    pub target: usize,
}

impl BlobLayout {
    pub const fn for_kind(kind: ProtocolKind) -> Self {
        Self {
            entry: xt_align(ENTRY_SIZE),
            matcher: xt_align(EXTENSION_HEADER_SIZE),
            payload: xt_align(kind.payload_size()),
            target: xt_align(STANDARD_TARGET_SIZE),
        }
    }

    /// Value of the match descriptor's `match_size`
    pub const fn match_size(&self) -> usize {
        xt_align(self.matcher + self.payload)
    }

    pub const fn payload_offset(&self) -> usize {
        self.entry + self.matcher
    }

    pub const fn target_offset(&self) -> usize {
        self.entry + self.matcher + self.payload
    }

    pub const fn total(&self) -> usize {
        self.target_offset() + self.target
    }
}

/// Zeroed scratch buffer, reported as [`Error::AllocationFailure`] when the
/// allocator refuses it.
pub(crate) fn zeroed_bytes(len: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure { what, size: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

fn zeroed_words(len: usize, what: &'static str) -> Result<Vec<u64>> {
    let words = len.div_ceil(std::mem::size_of::<u64>());
    let mut buf = Vec::new();
    buf.try_reserve_exact(words)
        .map_err(|_| Error::AllocationFailure { what, size: len })?;
    buf.resize(words, 0);
    Ok(buf)
}

/// Compiled entry image of one rule
///
/// Owned by exactly one party at a time: the builder, then the
/// [`RuleHandle`](crate::core::lifecycle::RuleHandle) of the installed rule.
#[derive(Debug, PartialEq, Eq)]
pub struct RuleBlob {
    words: Vec<u64>,
    target_offset: u16,
    next_offset: u16,
}

impl RuleBlob {
    /// Builds the entry image for `spec` using the payload layout of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the buffer cannot be allocated.
    pub fn build(kind: ProtocolKind, spec: &RuleSpec) -> Result<Self> {
        let layout = BlobLayout::for_kind(kind);
        let total = layout.total();

        let words = zeroed_words(total, "rule entry")?;
        let mut blob = Self {
            words,
            target_offset: layout.target_offset() as u16,
            next_offset: total as u16,
        };

        let buf = blob.bytes_mut();

        // Entry header
        put_u16(buf, IP_PROTO, kind.number());
        if let Some(source) = spec.source {
            buf[IP_SRC..IP_SRC + 4].copy_from_slice(&source.octets());
            buf[IP_SMSK..IP_SMSK + 4].copy_from_slice(&netmask(spec.prefix_len).octets());
        }
        if let Some(iface) = spec.physical_port.as_deref() {
            put_name(buf, IP_INIFACE, iface, IFNAMSIZ);
        }

        // Match descriptor
        let matcher = layout.entry;
        put_u16(buf, matcher + EXTENSION_SIZE_FIELD, layout.match_size() as u16);
        put_name(
            buf,
            matcher + EXTENSION_NAME,
            &spec.protocol,
            EXTENSION_NAME_USABLE,
        );

        // Protocol payload
        let payload = layout.payload_offset();
        match ProtocolPayload::for_rule(kind, spec.port) {
            ProtocolPayload::Ports {
                source,
                destination,
            } => {
                put_u16(buf, payload + PORTS_SRC, source.0);
                put_u16(buf, payload + PORTS_SRC + 2, source.1);
                put_u16(buf, payload + PORTS_DST, destination.0);
                put_u16(buf, payload + PORTS_DST + 2, destination.1);
            }
            ProtocolPayload::Icmp { icmp_type, codes } => {
                buf[payload + ICMP_TYPE] = icmp_type;
                buf[payload + ICMP_CODE] = codes.0;
                buf[payload + ICMP_CODE + 1] = codes.1;
            }
        }

        // Target descriptor
        let target = layout.target_offset();
        put_u16(buf, target + EXTENSION_SIZE_FIELD, layout.target as u16);
        put_name(buf, target + EXTENSION_NAME, &spec.action, EXTENSION_NAME_USABLE);

        put_u16(buf, ENTRY_TARGET_OFFSET, layout.target_offset() as u16);
        put_u16(buf, ENTRY_NEXT_OFFSET, total as u16);

        debug!(
            rule = %spec.name,
            protocol = %kind,
            target_offset = layout.target_offset(),
            next_offset = total,
            "Compiled rule entry"
        );

        Ok(blob)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.words.as_bytes()[..self.len()]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.words.as_mut_bytes()[..len]
    }

    /// Start of the image, aligned for `struct ipt_entry`
    #[cfg_attr(not(feature = "libiptc"), allow(dead_code))]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    /// Total image length, equal to `next_offset`
    pub fn len(&self) -> usize {
        usize::from(self.next_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.next_offset == 0
    }

    pub fn target_offset(&self) -> usize {
        usize::from(self.target_offset)
    }

    pub fn next_offset(&self) -> usize {
        usize::from(self.next_offset)
    }

    pub fn protocol_number(&self) -> u16 {
        self.u16_at(IP_PROTO)
    }

    pub fn source(&self) -> Ipv4Addr {
        self.addr_at(IP_SRC)
    }

    pub fn source_mask(&self) -> Ipv4Addr {
        self.addr_at(IP_SMSK)
    }

    pub fn in_interface(&self) -> String {
        self.name_at(IP_INIFACE, IFNAMSIZ)
    }

    pub fn match_name(&self) -> String {
        self.name_at(ENTRY_SIZE + EXTENSION_NAME, EXTENSION_NAME_LEN)
    }

    pub fn match_size(&self) -> u16 {
        self.u16_at(ENTRY_SIZE + EXTENSION_SIZE_FIELD)
    }

    pub fn target_name(&self) -> String {
        self.name_at(self.target_offset() + EXTENSION_NAME, EXTENSION_NAME_LEN)
    }

    pub fn target_size(&self) -> u16 {
        self.u16_at(self.target_offset() + EXTENSION_SIZE_FIELD)
    }

    /// Decodes the protocol payload from the header's protocol number
    pub fn payload(&self) -> Option<ProtocolPayload> {
        let offset = ENTRY_SIZE + xt_align(EXTENSION_HEADER_SIZE);
        match self.protocol_number() {
            n if n == ProtocolKind::Tcp.number() || n == ProtocolKind::Udp.number() => {
                Some(ProtocolPayload::Ports {
                    source: (
                        self.u16_at(offset + PORTS_SRC),
                        self.u16_at(offset + PORTS_SRC + 2),
                    ),
                    destination: (
                        self.u16_at(offset + PORTS_DST),
                        self.u16_at(offset + PORTS_DST + 2),
                    ),
                })
            }
            n if n == ProtocolKind::Icmp.number() => {
                let bytes = self.as_bytes();
                Some(ProtocolPayload::Icmp {
                    icmp_type: bytes[offset + ICMP_TYPE],
                    codes: (bytes[offset + ICMP_CODE], bytes[offset + ICMP_CODE + 1]),
                })
            }
            _ => None,
        }
    }

    /// SHA-256 of the image, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn u16_at(&self, offset: usize) -> u16 {
        let bytes = self.as_bytes();
        u16::from_ne_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn addr_at(&self, offset: usize) -> Ipv4Addr {
        let bytes = self.as_bytes();
        Ipv4Addr::new(
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        )
    }

    fn name_at(&self, offset: usize, width: usize) -> String {
        let field = &self.as_bytes()[offset..offset + width];
        let end = field.iter().position(|&b| b == 0).unwrap_or(width);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

/// Copies at most `max` bytes of `name` (stopping at an embedded NUL); the
/// rest of the field keeps its zero fill.
fn put_name(buf: &mut [u8], offset: usize, name: &str, max: usize) {
    let bytes = name.as_bytes();
    let len = bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(bytes.len())
        .min(max);
    buf[offset..offset + len].copy_from_slice(&bytes[..len]);
}
