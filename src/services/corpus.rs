use crate::core::fingerprint::{CorpusEntry, PerceptualHasher};
use crate::core::normalize::ImageLoader;
use crate::error::NormalizeError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions treated as images when walking a corpus.
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

/// Result of fingerprinting a corpus directory.
#[derive(Debug, Default)]
pub struct HashedCorpus {
    pub entries: Vec<CorpusEntry>,
    /// Images that could not be decoded and were left out.
    pub failures: Vec<(PathBuf, String)>,
}

/// Recursively walk `dir`, returning image paths sorted for a stable order.
pub fn scan_directory(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
            if IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                images.push(path.to_path_buf());
            }
        }
    }
    images.sort();
    Ok(images)
}

/// Identifier for `path` inside a corpus rooted at `root`.
pub fn entry_id(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Reproducible random subset of `limit` entries, kept in input order.
///
/// The same `seed` always picks the same entries from the same input, so a
/// sampled run can be repeated exactly.
pub fn sample_entries(entries: Vec<CorpusEntry>, limit: usize, seed: u64) -> Vec<CorpusEntry> {
    if limit >= entries.len() {
        return entries;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, entries.len(), limit).into_vec();
    picked.sort_unstable();
    tracing::debug!(from = entries.len(), kept = limit, seed, "sampled entries");

    let mut keep = vec![false; entries.len()];
    for i in picked {
        keep[i] = true;
    }
    entries
        .into_iter()
        .zip(keep)
        .filter_map(|(entry, kept)| kept.then_some(entry))
        .collect()
}

/// Normalize and fingerprint every image in parallel.
///
/// Undecodable images are reported in [`HashedCorpus::failures`] instead of
/// aborting the run. `tick` is called once per processed image.
pub fn hash_corpus<L, T>(
    root: &Path,
    paths: &[PathBuf],
    loader: &L,
    hasher: &PerceptualHasher,
    tick: T,
) -> HashedCorpus
where
    L: ImageLoader + ?Sized,
    T: Fn() + Sync,
{
    let results: Vec<Result<CorpusEntry, (PathBuf, NormalizeError)>> = paths
        .par_iter()
        .map(|path| {
            let outcome = loader
                .load(path)
                .map(|gray| CorpusEntry {
                    id: entry_id(root, path),
                    path: path.clone(),
                    fingerprint: hasher.hash(&gray),
                })
                .map_err(|e| (path.clone(), e));
            tick();
            outcome
        })
        .collect();

    let mut corpus = HashedCorpus::default();
    for result in results {
        match result {
            Ok(entry) => corpus.entries.push(entry),
            Err((path, e)) => {
                tracing::warn!(path = %path.display(), "skipping image: {e}");
                corpus.failures.push((path, e.to_string()));
            }
        }
    }
    tracing::info!(
        root = %root.display(),
        hashed = corpus.entries.len(),
        failed = corpus.failures.len(),
        "corpus fingerprinted"
    );
    corpus
}
