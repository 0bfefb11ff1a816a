//! Textual address forms
//!
//! Addresses travel inside keys as 8 zero-padded hex digits. Legacy inputs
//! may also carry dotted octets (`10.1.2.3`) or, when enabled, hostnames.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use crate::Address;
use crate::encoding::CodecError;

/// Number of hex digits in an encoded address
pub const ADDRESS_HEX_LEN: usize = 8;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Append the 8-digit lowercase hex form of `addr` to `buf`
pub fn push_hex(buf: &mut String, addr: Address) {
    for shift in (0..ADDRESS_HEX_LEN).rev() {
        let nibble = (addr >> (shift * 4)) & 0xf;
        buf.push(HEX_DIGITS[nibble as usize] as char);
    }
}

/// Format `addr` as 8 lowercase hex digits
pub fn format_hex(addr: Address) -> String {
    let mut buf = String::with_capacity(ADDRESS_HEX_LEN);
    push_hex(&mut buf, addr);
    buf
}

/// Format `addr` as a dotted quad
pub fn format_dotted(addr: Address) -> String {
    Ipv4Addr::from(addr).to_string()
}

/// Unpack exactly 8 hex digits. Returns `None` if any byte is not a hex digit.
pub fn unpack_hex(bytes: &[u8]) -> Option<Address> {
    if bytes.len() != ADDRESS_HEX_LEN {
        return None;
    }
    let mut addr: Address = 0;
    for &b in bytes {
        let digit = (b as char).to_digit(16)?;
        addr = (addr << 4) | digit;
    }
    Some(addr)
}

/// Parse a 7 or 8 digit hex address
pub fn parse_hex_address(s: &str) -> Option<Address> {
    if s.len() != ADDRESS_HEX_LEN && s.len() != ADDRESS_HEX_LEN - 1 {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str_radix(s, 16).ok()
}

/// Parse four dot-separated decimal octets.
///
/// Returns `Ok(None)` when `s` is not shaped like a dotted address at all, and
/// a bounds error when it is shaped like one but an octet or the assembled
/// value falls outside the 32-bit address space.
pub fn parse_dotted_address(s: &str) -> Result<Option<Address>, CodecError> {
    let mut octets = [0u64; 4];
    let mut count = 0;
    for part in s.split('.') {
        if count == 4 || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        octets[count] = part.parse::<u64>().unwrap_or(u64::MAX);
        count += 1;
    }
    if count != 4 {
        return Ok(None);
    }

    let value = octets
        .iter()
        .fold(0u64, |acc, &octet| acc.saturating_mul(256).saturating_add(octet));
    if octets.iter().any(|&octet| octet > 0xff) || value > Address::MAX as u64 {
        return Err(CodecError::Bounds {
            text: s.to_string(),
            value,
        });
    }
    Ok(Some(value as Address))
}

/// Resolve a hostname, accepting it only if it maps to exactly one IPv4 address
pub fn resolve_host_address(host: &str) -> Option<Address> {
    let mut addrs = (host, 0u16).to_socket_addrs().ok()?;
    let first = addrs.next()?;
    if addrs.next().is_some() {
        return None;
    }
    match first.ip() {
        IpAddr::V4(v4) => Some(Address::from(v4)),
        IpAddr::V6(_) => None,
    }
}

/// Parse a single address field: hex first, then dotted octets, then
/// (only when `resolve` is set) a hostname lookup.
pub fn parse_address(s: &str, resolve: bool) -> Result<Option<Address>, CodecError> {
    if let Some(addr) = parse_hex_address(s) {
        return Ok(Some(addr));
    }
    if let Some(addr) = parse_dotted_address(s)? {
        return Ok(Some(addr));
    }
    if resolve {
        return Ok(resolve_host_address(s));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_formatting() {
        assert_eq!(format_hex(0), "00000000");
        assert_eq!(format_hex(0xdeadbeef), "deadbeef");
        assert_eq!(format_hex(Address::MAX), "ffffffff");
        assert_eq!(format_hex(0x0a000001), "0a000001");
    }

    #[test]
    fn test_unpack_hex() {
        assert_eq!(unpack_hex(b"0a000001"), Some(0x0a000001));
        assert_eq!(unpack_hex(b"DEADBEEF"), Some(0xdeadbeef));
        assert_eq!(unpack_hex(b"0a00000g"), None);
        assert_eq!(unpack_hex(b"0a00001"), None);
    }

    #[test]
    fn test_parse_hex_address_lengths() {
        assert_eq!(parse_hex_address("a000001"), Some(0x0a000001));
        assert_eq!(parse_hex_address("0a000001"), Some(0x0a000001));
        assert_eq!(parse_hex_address("000001"), None);
        assert_eq!(parse_hex_address("+a000001"), None);
    }

    #[test]
    fn test_dotted_round_trip() {
        assert_eq!(parse_dotted_address("10.0.0.1").unwrap(), Some(0x0a000001));
        assert_eq!(parse_dotted_address("255.255.255.255").unwrap(), Some(Address::MAX));
        assert_eq!(format_dotted(0x0a000001), "10.0.0.1");
        assert_eq!(format_dotted(0xc0a80101), "192.168.1.1");
    }

    #[test]
    fn test_dotted_rejects_non_addresses() {
        assert_eq!(parse_dotted_address("10.0.0").unwrap(), None);
        assert_eq!(parse_dotted_address("10.0.0.1.5").unwrap(), None);
        assert_eq!(parse_dotted_address("10.0..1").unwrap(), None);
        assert_eq!(parse_dotted_address("10.0.x.1").unwrap(), None);
        assert_eq!(parse_dotted_address("12345678x").unwrap(), None);
    }

    #[test]
    fn test_dotted_out_of_bounds() {
        let err = parse_dotted_address("256.0.0.1").unwrap_err();
        assert!(matches!(err, CodecError::Bounds { .. }), "unexpected {:?}", err);

        let err = parse_dotted_address("1.2.3.99999999999999999999999").unwrap_err();
        assert!(matches!(err, CodecError::Bounds { .. }), "unexpected {:?}", err);
    }

    #[test]
    fn test_parse_address_order() {
        // An 8 character string that is valid hex is always read as hex
        assert_eq!(parse_address("10101010", false).unwrap(), Some(0x10101010));
        assert_eq!(parse_address("1.2.3.4", false).unwrap(), Some(0x01020304));
        assert_eq!(parse_address("not-an-address", false).unwrap(), None);
    }

    #[test]
    fn test_resolve_localhost_literal() {
        assert_eq!(resolve_host_address("127.0.0.1"), Some(0x7f000001));
    }
}
