use comfig_db::AnonymizedAddr;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bits kept when anonymizing an IPv4 address.
const V4_PREFIX: u32 = 24;
/// Bits kept when anonymizing an IPv6 address.
const V6_PREFIX: u32 = 48;

/// Current Unix time in milliseconds.
pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or(0)
}

/// Zero the host part of an address: IPv4 keeps its /24, IPv6 its /48.
/// IPv4-mapped IPv6 addresses are treated as the IPv4 address they carry.
pub fn anonymize_ip(ip: IpAddr) -> AnonymizedAddr {
  let masked = match ip.to_canonical() {
    IpAddr::V4(v4) => {
      let mask = u32::MAX << (32 - V4_PREFIX);
      IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
    }
    IpAddr::V6(v6) => {
      let mask = u128::MAX << (128 - V6_PREFIX);
      IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
    }
  };

  let mut out = AnonymizedAddr::new();
  // 45 bytes fit every textual IP form
  let _ = write!(out, "{masked}");
  out
}

/// Compare a presented bearer token against the configured one.
/// Digests are compared so the comparison time doesn't depend on the secret's prefix.
pub fn token_matches(presented: &str, expected: Option<&str>) -> bool {
  match expected {
    Some(expected) if !expected.is_empty() => {
      Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
    }
    _ => false,
  }
}
