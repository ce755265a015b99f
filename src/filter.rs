//! Bloom filter policy for SSTable filter blocks.
//!
//! A filter is built per 2 KiB span of data-block offsets (see
//! `sstable::filter_block`) and probed on point lookups before the data
//! block is read. Probing uses double hashing: one 32-bit base hash and a
//! rotation-derived delta, stepped `k` times.

const HASH_SEED: u32 = 0xbc9f1d34;

/// Murmur-flavoured 32-bit hash over `data`.
pub fn bloom_hash(data: &[u8]) -> u32 {
    hash(data, HASH_SEED)
}

pub fn hash(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4a793;
    const R: u32 = 24;
    let mut h = seed ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h = h.wrapping_add(w);
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let rest = chunks.remainder();
    match rest.len() {
        3 => {
            h = h.wrapping_add((rest[2] as u32) << 16);
            h = h.wrapping_add((rest[1] as u32) << 8);
            h = h.wrapping_add(rest[0] as u32);
            h = h.wrapping_mul(M);
            h ^= h >> R;
        }
        2 => {
            h = h.wrapping_add((rest[1] as u32) << 8);
            h = h.wrapping_add(rest[0] as u32);
            h = h.wrapping_mul(M);
            h ^= h >> R;
        }
        1 => {
            h = h.wrapping_add(rest[0] as u32);
            h = h.wrapping_mul(M);
            h ^= h >> R;
        }
        _ => {}
    }
    h
}

/// Builds and probes bloom filter blobs for a fixed bits-per-key budget.
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        // ln(2) times bits per key gives the optimal probe count.
        let k = ((bits_per_key as f64) * 0.69) as usize;
        let k = k.clamp(1, 30);
        BloomFilterPolicy { bits_per_key, k }
    }

    /// Identifies the policy in the table metaindex. Changing this name
    /// invalidates persisted filters.
    pub fn name(&self) -> &'static str {
        "stratadb.BuiltinBloomFilter"
    }

    /// Appends a filter covering `keys` to `dst`.
    pub fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // Round up for short key lists to keep the false-positive rate down.
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = (bits + 7) / 8;
        let bits = bytes * 8;

        let init_size = dst.len();
        dst.resize(init_size + bytes, 0);
        dst.push(self.k as u8);

        let array = &mut dst[init_size..init_size + bytes];
        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.k {
                let bit_pos = (h as usize) % bits;
                array[bit_pos / 8] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    /// True if `key` may be present in the filter; never returns false for
    /// a key the filter was built with.
    pub fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bits = (filter.len() - 1) * 8;
        let k = filter[filter.len() - 1] as usize;
        if k > 30 {
            // Reserved for future encodings; treat as a match.
            return true;
        }
        let array = &filter[..filter.len() - 1];

        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let bit_pos = (h as usize) % bits;
            if array[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(policy: &BloomFilterPolicy, keys: &[&[u8]]) -> Vec<u8> {
        let mut filter = Vec::new();
        policy.create_filter(keys, &mut filter);
        filter
    }

    #[test]
    fn test_empty_filter() {
        let policy = BloomFilterPolicy::new(10);
        let filter = build(&policy, &[]);
        assert!(!policy.key_may_match(b"hello", &filter));
        assert!(!policy.key_may_match(b"", &filter));
    }

    #[test]
    fn test_no_false_negatives() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..1000u32).map(|i| i.to_le_bytes().to_vec()).collect();
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let filter = build(&policy, &refs);

        for key in &keys {
            assert!(policy.key_may_match(key, &filter));
        }
    }

    #[test]
    fn test_false_positive_rate() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..10_000u32).map(|i| i.to_le_bytes().to_vec()).collect();
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let filter = build(&policy, &refs);

        let mut hits = 0;
        for i in 1_000_000u32..1_010_000 {
            if policy.key_may_match(&i.to_le_bytes(), &filter) {
                hits += 1;
            }
        }
        let rate = hits as f64 / 10_000.0;
        assert!(rate < 0.02, "false positive rate too high: {rate}");
    }

    #[test]
    fn test_oversized_k_always_matches() {
        let policy = BloomFilterPolicy::new(10);
        // A filter claiming more than 30 probes is from a future encoding.
        let filter = vec![0u8, 0, 0, 0, 31];
        assert!(policy.key_may_match(b"anything", &filter));
    }

    #[test]
    fn test_k_clamped() {
        let policy = BloomFilterPolicy::new(100);
        let filter = build(&policy, &[b"a"]);
        assert!(*filter.last().unwrap() <= 30);
    }
}
