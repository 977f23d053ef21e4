use std::net::Ipv4Addr;

/// Network mask for a prefix length.
///
/// Prefixes above 32 are clamped. A prefix of 0 yields 255.255.255.255
/// rather than 0.0.0.0: installed rules rely on it, so a bare address with
/// no prefix still matches exactly that host.
pub const fn netmask(prefix_len: u8) -> Ipv4Addr {
    if prefix_len == 0 {
        return Ipv4Addr::BROADCAST;
    }
    let prefix_len = if prefix_len > 32 { 32 } else { prefix_len };
    Ipv4Addr::from_bits(u32::MAX << (32 - prefix_len as u32))
}
