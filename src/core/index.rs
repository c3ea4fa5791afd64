//! Dense bit-matrix index over the reference fingerprints.
//!
//! Rows are reference entries packed into big-endian `u64` words. Distance
//! queries XOR a query row against every reference row and popcount the
//! result; a batch of queries is spread over the rayon pool. Batching never
//! changes results, only peak memory and throughput.

use crate::core::candidates::{CandidatePair, select_top_k};
use crate::core::fingerprint::{CorpusEntry, Fingerprint};
use crate::error::ConfigError;
use rayon::prelude::*;

pub struct HashIndex {
    entries: Vec<CorpusEntry>,
    bit_width: usize,
    words_per_row: usize,
    matrix: Vec<u64>,
}

fn pack_words(fp: &Fingerprint, words_per_row: usize) -> Vec<u64> {
    let mut words = Vec::with_capacity(words_per_row);
    for chunk in fp.as_bytes().chunks(8) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        words.push(u64::from_be_bytes(buf));
    }
    words
}

impl HashIndex {
    /// Build an index whose rows all carry `bit_width` bits.
    ///
    /// An empty entry list is allowed; every query against it yields no
    /// candidates.
    pub fn build(entries: Vec<CorpusEntry>, bit_width: usize) -> Result<Self, ConfigError> {
        let words_per_row = bit_width.div_ceil(64);
        let mut matrix = Vec::with_capacity(entries.len() * words_per_row);
        for entry in &entries {
            let found = entry.fingerprint.bit_width();
            if found != bit_width {
                return Err(ConfigError::BitWidthMismatch {
                    expected: bit_width,
                    found,
                    id: entry.id.clone(),
                });
            }
            matrix.extend(pack_words(&entry.fingerprint, words_per_row));
        }

        tracing::debug!(
            rows = entries.len(),
            bit_width,
            words_per_row,
            "built hash index"
        );

        Ok(Self {
            entries,
            bit_width,
            words_per_row,
            matrix,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bit_width(&self) -> usize {
        self.bit_width
    }

    pub fn entry(&self, row: usize) -> &CorpusEntry {
        &self.entries[row]
    }

    fn check_width(&self, fp: &Fingerprint, id: &str) -> Result<(), ConfigError> {
        if fp.bit_width() != self.bit_width {
            return Err(ConfigError::BitWidthMismatch {
                expected: self.bit_width,
                found: fp.bit_width(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Hamming distance from `query` to every row, in row order.
    fn distances(&self, query: &[u64]) -> Vec<u32> {
        if self.words_per_row == 0 {
            return vec![0; self.entries.len()];
        }
        self.matrix
            .chunks_exact(self.words_per_row)
            .map(|row| {
                row.iter()
                    .zip(query)
                    .map(|(a, b)| (a ^ b).count_ones())
                    .sum()
            })
            .collect()
    }

    /// Top-`k` references nearest to a single fingerprint.
    pub fn query_top_k(
        &self,
        fp: &Fingerprint,
        k: usize,
    ) -> Result<Vec<CandidatePair>, ConfigError> {
        self.check_width(fp, "query")?;
        let packed = pack_words(fp, self.words_per_row);
        Ok(select_top_k(0, &self.distances(&packed), k))
    }

    /// Top-`k` references for every fingerprint of a query batch.
    ///
    /// `first_query` is the position of `queries[0]` in the caller's query
    /// list and is carried into each [`CandidatePair`].
    pub fn query_batch(
        &self,
        first_query: usize,
        queries: &[&Fingerprint],
        k: usize,
    ) -> Result<Vec<Vec<CandidatePair>>, ConfigError> {
        for (i, fp) in queries.iter().enumerate() {
            self.check_width(fp, &format!("query #{}", first_query + i))?;
        }

        Ok(queries
            .par_iter()
            .enumerate()
            .map(|(i, fp)| {
                let packed = pack_words(fp, self.words_per_row);
                select_top_k(first_query + i, &self.distances(&packed), k)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(id: &str, hex: &str, bits: usize) -> CorpusEntry {
        CorpusEntry {
            id: id.to_string(),
            path: PathBuf::from(format!("{id}.jpg")),
            fingerprint: Fingerprint::from_hex(hex, bits).unwrap(),
        }
    }

    fn fp(hex: &str, bits: usize) -> Fingerprint {
        Fingerprint::from_hex(hex, bits).unwrap()
    }

    #[test]
    fn test_scenario_candidates() {
        let index = HashIndex::build(
            vec![entry("R1", "0000", 16), entry("R2", "ffff", 16)],
            16,
        )
        .unwrap();

        let picked = index.query_top_k(&fp("0001", 16), 2).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(index.entry(picked[0].reference).id, "R1");
        assert_eq!(picked[0].distance, 1);
        assert_eq!(index.entry(picked[1].reference).id, "R2");
        assert_eq!(picked[1].distance, 15);
    }

    #[test]
    fn test_matches_scalar_distance_on_wide_fingerprints() {
        let a = "0123456789abcdef0011223344556677ff";
        let b = "fedcba98765432100011223344556677f0";
        let index = HashIndex::build(vec![entry("a", a, 136), entry("b", b, 136)], 136).unwrap();

        let query = fp(b, 136);
        let picked = index.query_top_k(&query, 2).unwrap();
        assert_eq!(picked[0].reference, 1);
        assert_eq!(picked[0].distance, 0);
        assert_eq!(picked[1].distance, query.distance(&fp(a, 136)).unwrap());
    }

    #[test]
    fn test_batch_size_does_not_change_results() {
        let refs: Vec<CorpusEntry> = (0u16..40)
            .map(|i| entry(&format!("r{i}"), &format!("{:04x}", i.wrapping_mul(2654)), 16))
            .collect();
        let index = HashIndex::build(refs, 16).unwrap();
        let queries: Vec<Fingerprint> = (0u16..23)
            .map(|i| fp(&format!("{:04x}", i.wrapping_mul(40503)), 16))
            .collect();
        let query_refs: Vec<&Fingerprint> = queries.iter().collect();

        let whole = index.query_batch(0, &query_refs, 3).unwrap();
        for batch_size in [1, 4, 7, 23] {
            let mut chunked = Vec::new();
            for (n, chunk) in query_refs.chunks(batch_size).enumerate() {
                chunked.extend(index.query_batch(n * batch_size, chunk, 3).unwrap());
            }
            assert_eq!(chunked, whole, "batch size {batch_size}");
        }
        for (i, single) in queries.iter().enumerate() {
            let alone = index.query_top_k(single, 3).unwrap();
            let refs_alone: Vec<_> = alone.iter().map(|c| (c.reference, c.distance)).collect();
            let refs_batched: Vec<_> = whole[i].iter().map(|c| (c.reference, c.distance)).collect();
            assert_eq!(refs_alone, refs_batched);
        }
    }

    #[test]
    fn test_empty_index_yields_no_candidates() {
        let index = HashIndex::build(Vec::new(), 64).unwrap();
        assert!(index.is_empty());
        let picked = index.query_top_k(&fp("0000000000000000", 64), 2).unwrap();
        assert!(picked.is_empty());
    }

    #[test]
    fn test_width_mismatch_is_config_error() {
        let err = HashIndex::build(vec![entry("a", "00", 8)], 16).err().unwrap();
        assert!(matches!(err, ConfigError::BitWidthMismatch { .. }));

        let index = HashIndex::build(vec![entry("a", "0000", 16)], 16).unwrap();
        assert!(index.query_batch(0, &[&fp("00", 8)], 1).is_err());
    }
}
