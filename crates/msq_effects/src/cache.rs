//! Per-request determinism cache.
//!
//! Key = `SHA-256(seed ‖ be64(cont_id) ‖ canonical-CBOR([effect_name, args]))`.
//! Value = canonical-JSON bytes of the effect outcome. Unbounded for the
//! lifetime of one request (gas bounds the entry count); never shared across
//! requests. The wipe stage overwrites every cached byte before release.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use msq_core::value::Value;
use msq_io::canonical_cbor;
use msq_io::hasher;

/// Compute the cache key for one effect invocation.
pub fn cache_key(seed: &[u8; 32], cont_id: u32, name: &str, args: &[Value]) -> [u8; 32] {
    let call = canonical_cbor::encode_effect_call(name, args);
    hasher::sha256_concat(&[seed, &u64::from(cont_id).to_be_bytes(), &call])
}

#[derive(Default)]
pub struct DeterminismCache {
    entries: BTreeMap<[u8; 32], Vec<u8>>,
    hits: u64,
    misses: u64,
}

impl DeterminismCache {
    pub fn new() -> DeterminismCache {
        DeterminismCache::default()
    }

    pub fn get(&mut self, key: &[u8; 32]) -> Option<&[u8]> {
        match self.entries.get(key) {
            Some(bytes) => {
                self.hits += 1;
                Some(bytes.as_slice())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: [u8; 32], canonical_json: Vec<u8>) {
        self.entries.insert(key, canonical_json);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Overwrite every cached value, then drop the map.
    pub fn wipe(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for (_, mut bytes) in entries {
            msq_io::wipe::secure_wipe(&mut bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_every_component() {
        let seed = [1u8; 32];
        let args = vec![Value::str("q")];
        let base = cache_key(&seed, 1, "DbRead", &args);
        assert_ne!(base, cache_key(&[2u8; 32], 1, "DbRead", &args));
        assert_ne!(base, cache_key(&seed, 2, "DbRead", &args));
        assert_ne!(base, cache_key(&seed, 1, "DbWrite", &args));
        assert_ne!(base, cache_key(&seed, 1, "DbRead", &[Value::str("r")]));
    }

    #[test]
    fn key_ignores_representational_noise() {
        // Records with reordered fields canonicalise to the same key.
        let seed = [0u8; 32];
        let a = vec![Value::Record(vec![
            ("url".to_string(), Value::str("http://x")),
            ("method".to_string(), Value::str("GET")),
        ])];
        let b = vec![Value::Record(vec![
            ("method".to_string(), Value::str("GET")),
            ("url".to_string(), Value::str("http://x")),
        ])];
        assert_eq!(cache_key(&seed, 3, "HttpOut", &a), cache_key(&seed, 3, "HttpOut", &b));
    }

    #[test]
    fn hit_and_miss_accounting() {
        let mut c = DeterminismCache::new();
        let k = cache_key(&[0u8; 32], 1, "Log", &[]);
        assert!(c.get(&k).is_none());
        c.insert(k, b"{\"ok\":null}".to_vec());
        assert_eq!(c.get(&k), Some(b"{\"ok\":null}".as_slice()));
        assert_eq!(c.hits(), 1);
        assert_eq!(c.misses(), 1);
    }

    #[test]
    fn wipe_empties_the_cache() {
        let mut c = DeterminismCache::new();
        c.insert([9u8; 32], b"{\"ok\":1}".to_vec());
        c.wipe();
        assert!(c.is_empty());
    }
}
