//! Byte layout of an IPv4 iptables entry
//!
//! Offsets and sizes of the kernel structures a single rule is made of:
//!
//! ```text
//! [ ipt_entry ][ xt_entry_match ][ xt_tcp | xt_udp | ipt_icmp ][ xt_standard_target ]
//! ^0           ^ENTRY_SIZE                                     ^target_offset       ^next_offset
//! ```
//!
//! Every segment is padded to [`XT_ALIGN`] before the next one starts.

/// Alignment unit of every segment (`XT_ALIGN` in `x_tables.h`)
pub const XT_ALIGN: usize = std::mem::align_of::<u64>();

/// Rounds `len` up to the next multiple of [`XT_ALIGN`]
pub const fn xt_align(len: usize) -> usize {
    (len + XT_ALIGN - 1) & !(XT_ALIGN - 1)
}

/// Width of an interface name field (`IFNAMSIZ`)
pub const IFNAMSIZ: usize = 16;

// struct ipt_ip
pub const IP_SRC: usize = 0;
pub const IP_DST: usize = 4;
pub const IP_SMSK: usize = 8;
pub const IP_DMSK: usize = 12;
pub const IP_INIFACE: usize = 16;
pub const IP_OUTIFACE: usize = IP_INIFACE + IFNAMSIZ;
pub const IP_INIFACE_MASK: usize = IP_OUTIFACE + IFNAMSIZ;
pub const IP_OUTIFACE_MASK: usize = IP_INIFACE_MASK + IFNAMSIZ;
pub const IP_PROTO: usize = IP_OUTIFACE_MASK + IFNAMSIZ;
pub const IP_FLAGS: usize = IP_PROTO + 2;
pub const IP_INVFLAGS: usize = IP_FLAGS + 1;
pub const IP_SIZE: usize = IP_INVFLAGS + 1;

// struct ipt_entry
pub const ENTRY_NFCACHE: usize = IP_SIZE;
pub const ENTRY_TARGET_OFFSET: usize = ENTRY_NFCACHE + 4;
pub const ENTRY_NEXT_OFFSET: usize = ENTRY_TARGET_OFFSET + 2;
pub const ENTRY_COMEFROM: usize = ENTRY_NEXT_OFFSET + 2;
pub const ENTRY_COUNTERS: usize = ENTRY_COMEFROM + 4;
/// `sizeof(struct ipt_entry)`: two u64 counters close the header
pub const ENTRY_SIZE: usize = xt_align(ENTRY_COUNTERS + 16);

/// Name slot of `xt_entry_match` / `xt_entry_target` (`XT_EXTENSION_MAXNAMELEN`)
pub const EXTENSION_NAME_LEN: usize = 29;
/// Bytes copied into a name slot; the tail always stays NUL
pub const EXTENSION_NAME_USABLE: usize = EXTENSION_NAME_LEN - 2;

// struct xt_entry_match / xt_entry_target (user view)
pub const EXTENSION_SIZE_FIELD: usize = 0;
pub const EXTENSION_NAME: usize = 2;
pub const EXTENSION_REVISION: usize = EXTENSION_NAME + EXTENSION_NAME_LEN;
/// The user view shares a union with a kernel pointer, so it is padded to 8
pub const EXTENSION_HEADER_SIZE: usize = 32;

// struct xt_tcp / xt_udp
pub const PORTS_SRC: usize = 0;
pub const PORTS_DST: usize = 4;
pub const TCP_SIZE: usize = 12;
pub const UDP_SIZE: usize = 10;

// struct ipt_icmp
pub const ICMP_TYPE: usize = 0;
pub const ICMP_CODE: usize = 1;
pub const ICMP_SIZE: usize = 4;

// struct xt_standard_target
pub const STANDARD_VERDICT: usize = EXTENSION_HEADER_SIZE;
pub const STANDARD_TARGET_SIZE: usize = EXTENSION_HEADER_SIZE + 4;

pub const MAX_PORT: u16 = u16::MAX;
/// ICMP type value meaning "any type"
pub const ICMP_ANY_TYPE: u8 = 0xFF;
pub const ICMP_MAX_CODE: u8 = 0xFF;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xt_align_rounds_up() {
        assert_eq!(xt_align(0), 0);
        assert_eq!(xt_align(1), XT_ALIGN);
        assert_eq!(xt_align(XT_ALIGN), XT_ALIGN);
        assert_eq!(xt_align(XT_ALIGN + 1), 2 * XT_ALIGN);
    }

    #[test]
    fn test_ipt_ip_field_offsets() {
        assert_eq!(IP_INIFACE_MASK, 48);
        assert_eq!(IP_PROTO, 80);
        assert_eq!(IP_SIZE, 84);
    }

    #[test]
    fn test_entry_header_offsets() {
        assert_eq!(ENTRY_TARGET_OFFSET, 88);
        assert_eq!(ENTRY_NEXT_OFFSET, 90);
        assert_eq!(ENTRY_COUNTERS, 96);
        assert_eq!(ENTRY_SIZE, 112);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_x86_64_segment_sizes() {
        assert_eq!(xt_align(EXTENSION_HEADER_SIZE), 32);
        assert_eq!(xt_align(TCP_SIZE), 16);
        assert_eq!(xt_align(UDP_SIZE), 16);
        assert_eq!(xt_align(ICMP_SIZE), 8);
        assert_eq!(xt_align(STANDARD_TARGET_SIZE), 40);
    }

    #[test]
    fn test_revision_follows_name_slot() {
        assert_eq!(EXTENSION_REVISION, EXTENSION_HEADER_SIZE - 1);
        assert_eq!(EXTENSION_NAME_USABLE, 27);
    }
}
