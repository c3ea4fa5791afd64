/// A shortlisted (query, reference) pair with its Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePair {
    pub query: usize,
    pub reference: usize,
    pub distance: u32,
}

/// Pick the `k` smallest distances.
///
/// Output is ordered by ascending distance; equal distances keep reference
/// order, so the first-seen reference wins at the k-th boundary.
pub fn select_top_k(query: usize, distances: &[u32], k: usize) -> Vec<CandidatePair> {
    let k = k.min(distances.len());
    if k == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(u32, usize)> = distances
        .iter()
        .enumerate()
        .map(|(reference, &distance)| (distance, reference))
        .collect();
    // (distance, index) keys are unique, so the unstable variants are still deterministic.
    if k < ranked.len() {
        ranked.select_nth_unstable(k - 1);
        ranked.truncate(k);
    }
    ranked.sort_unstable();

    ranked
        .into_iter()
        .map(|(distance, reference)| CandidatePair {
            query,
            reference,
            distance,
        })
        .collect()
}
