use std::collections::HashMap;

use arrayvec::ArrayString;

/// Anonymized client address (e.g. "203.0.113.0" or "2001:db8:1::").
/// Longest textual IPv6 form fits in 45 bytes, stored inline.
pub type AnonymizedAddr = ArrayString<45>;

/// Publisher-supplied metadata stored alongside a key-value entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KvMetadata {
  /// Unix timestamp (ms) until which the publisher expects the value to stay fresh.
  pub until: Option<i64>,
}

/// A value read back from the key-value store together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
  pub value: String,
  pub metadata: KvMetadata,
}

/// Durable state of a single download counter.
#[derive(Debug, Clone, Default)]
pub struct DedupRecord {
  /// Number of accepted downloads
  pub tally: i64,
  /// Last accepted download per anonymized address (Unix ms)
  pub last_seen: HashMap<AnonymizedAddr, i64>,
}

impl DedupRecord {
  /// Minimum time between two accepted downloads from the same address.
  pub const COOLDOWN_MS: i64 = 24 * 60 * 60 * 1000;

  /// Whether a download from `address` at `now` should be counted.
  pub fn accepts(&self, address: &AnonymizedAddr, now: i64) -> bool {
    match self.last_seen.get(address) {
      Some(last) => now - last >= Self::COOLDOWN_MS,
      None => true,
    }
  }

  /// Drop addresses whose cooldown has passed; they count the same as unseen ones.
  pub fn prune_expired(&mut self, now: i64) {
    self
      .last_seen
      .retain(|_, last| now - *last < Self::COOLDOWN_MS);
  }
}
