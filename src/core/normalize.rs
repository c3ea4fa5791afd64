//! Deterministic preprocessing shared by hashing and similarity scoring.
//!
//! Every image passes through the same three steps, in this order:
//! luminance conversion, histogram equalisation and an auto-contrast stretch.

use crate::error::NormalizeError;
use image::{DynamicImage, GrayImage, ImageReader};
use std::path::Path;

/// Anything able to produce a normalized grayscale image for a source path.
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<GrayImage, NormalizeError>;
}

/// Loads images from disk and runs them through [`normalize`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl ImageLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<GrayImage, NormalizeError> {
        let img = ImageReader::open(path)
            .map_err(|source| NormalizeError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .with_guessed_format()
            .map_err(|source| NormalizeError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .decode()
            .map_err(|source| NormalizeError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(normalize(&img))
    }
}

/// Luminance, then equalize, then auto-contrast.
pub fn normalize(img: &DynamicImage) -> GrayImage {
    let mut gray = img.to_luma8();
    equalize(&mut gray);
    autocontrast(&mut gray);
    gray
}

fn histogram(img: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in img.as_raw() {
        hist[*p as usize] += 1;
    }
    hist
}

fn apply_lut(img: &mut GrayImage, lut: &[u8; 256]) {
    for p in img.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// Histogram equalisation with the PIL bucket rule: the highest occupied
/// level is excluded from the step so the output spans 0..=255.
pub fn equalize(img: &mut GrayImage) {
    let hist = histogram(img);
    let used: Vec<u64> = hist.iter().copied().filter(|&c| c > 0).collect();
    let Some(&last) = used.last() else {
        return;
    };
    if used.len() <= 1 {
        return;
    }
    let step = (used.iter().sum::<u64>() - last) / 255;
    if step == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    let mut n = step / 2;
    for (level, count) in hist.iter().enumerate() {
        lut[level] = (n / step).min(255) as u8;
        n += count;
    }
    apply_lut(img, &lut);
}

/// Stretch the occupied intensity range onto 0..=255.
pub fn autocontrast(img: &mut GrayImage) {
    let hist = histogram(img);
    let lo = hist.iter().position(|&c| c > 0);
    let hi = hist.iter().rposition(|&c| c > 0);
    let (Some(lo), Some(hi)) = (lo, hi) else {
        return;
    };
    if hi <= lo {
        return;
    }

    let scale = 255.0 / (hi - lo) as f64;
    let offset = -(lo as f64) * scale;
    let mut lut = [0u8; 256];
    for (level, slot) in lut.iter_mut().enumerate() {
        *slot = (level as f64 * scale + offset).clamp(0.0, 255.0) as u8;
    }
    apply_lut(img, &lut);
}
