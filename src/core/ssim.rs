//! Structural similarity between two normalized grayscale images.
//!
//! Both strategies compute the same Gaussian-weighted SSIM: an 11×11 kernel
//! with σ = 1.5, zero padding at the borders, intensities on a [0, 1] scale
//! and the usual stabilizers C1 = 0.01², C2 = 0.03². The score is the mean of
//! the SSIM map clamped to [0, 1]. They differ only in how the local moments
//! are gathered.

use crate::config::DeviceMode;
use image::GrayImage;
use image::imageops::{self, FilterType};
use rayon::prelude::*;
use std::borrow::Cow;

const KERNEL_SIZE: usize = 11;
const RADIUS: isize = (KERNEL_SIZE / 2) as isize;
const SIGMA: f64 = 1.5;
const C1: f64 = 0.01 * 0.01;
const C2: f64 = 0.03 * 0.03;

pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity in [0, 1]; 1.0 means structurally identical.
    fn score(&self, a: &GrayImage, b: &GrayImage) -> f64;
}

pub fn scorer_for(mode: DeviceMode) -> Box<dyn SimilarityScorer> {
    match mode {
        DeviceMode::Scalar => Box::new(WindowedSsim),
        DeviceMode::Accelerated => Box::new(ConvolvedSsim),
    }
}

fn gaussian_kernel() -> [f64; KERNEL_SIZE] {
    let mut kernel = [0.0; KERNEL_SIZE];
    for (i, k) in kernel.iter_mut().enumerate() {
        let d = i as f64 - RADIUS as f64;
        *k = (-(d * d) / (2.0 * SIGMA * SIGMA)).exp();
    }
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);
    kernel
}

fn has_dynamic_range(img: &GrayImage) -> bool {
    let mut pixels = img.as_raw().iter();
    match pixels.next() {
        Some(&first) => pixels.any(|&p| p != first),
        None => false,
    }
}

/// Bring both images onto one shape, or `None` when either is degenerate.
///
/// The larger image is resampled onto the smaller one's shape with an
/// anti-aliasing filter. Scores across resolutions are therefore a little
/// less reliable than same-resolution ones.
fn align<'a>(
    a: &'a GrayImage,
    b: &'a GrayImage,
) -> Option<(Cow<'a, GrayImage>, Cow<'a, GrayImage>)> {
    if !has_dynamic_range(a) || !has_dynamic_range(b) {
        return None;
    }
    if a.dimensions() == b.dimensions() {
        return Some((Cow::Borrowed(a), Cow::Borrowed(b)));
    }

    let area = |img: &GrayImage| img.width() as u64 * img.height() as u64;
    if area(a) > area(b) {
        let (w, h) = b.dimensions();
        tracing::trace!(from = ?a.dimensions(), to = ?(w, h), "resampling for ssim");
        let resized = imageops::resize(a, w, h, FilterType::Lanczos3);
        Some((Cow::Owned(resized), Cow::Borrowed(b)))
    } else {
        let (w, h) = a.dimensions();
        tracing::trace!(from = ?b.dimensions(), to = ?(w, h), "resampling for ssim");
        let resized = imageops::resize(b, w, h, FilterType::Lanczos3);
        Some((Cow::Borrowed(a), Cow::Owned(resized)))
    }
}

#[inline]
fn local_ssim(mu1: f64, mu2: f64, s11: f64, s22: f64, s12: f64) -> f64 {
    let var1 = s11 - mu1 * mu1;
    let var2 = s22 - mu2 * mu2;
    let cov = s12 - mu1 * mu2;
    ((2.0 * mu1 * mu2 + C1) * (2.0 * cov + C2))
        / ((mu1 * mu1 + mu2 * mu2 + C1) * (var1 + var2 + C2))
}

/// Classical sliding-window SSIM, one window at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowedSsim;

impl SimilarityScorer for WindowedSsim {
    fn name(&self) -> &'static str {
        "windowed"
    }

    fn score(&self, a: &GrayImage, b: &GrayImage) -> f64 {
        let Some((a, b)) = align(a, b) else {
            return 0.0;
        };
        let kernel = gaussian_kernel();
        let (width, height) = (a.width() as isize, a.height() as isize);
        let pa = a.as_raw();
        let pb = b.as_raw();

        let mut total = 0.0;
        for y in 0..height {
            for x in 0..width {
                let (mut mu1, mut mu2, mut s11, mut s22, mut s12) = (0.0, 0.0, 0.0, 0.0, 0.0);
                for (ky, wy) in kernel.iter().enumerate() {
                    let sy = y + ky as isize - RADIUS;
                    if sy < 0 || sy >= height {
                        continue;
                    }
                    for (kx, wx) in kernel.iter().enumerate() {
                        let sx = x + kx as isize - RADIUS;
                        if sx < 0 || sx >= width {
                            continue;
                        }
                        let idx = (sy * width + sx) as usize;
                        let va = pa[idx] as f64 / 255.0;
                        let vb = pb[idx] as f64 / 255.0;
                        let w = wy * wx;
                        mu1 += w * va;
                        mu2 += w * vb;
                        s11 += w * va * va;
                        s22 += w * vb * vb;
                        s12 += w * va * vb;
                    }
                }
                total += local_ssim(mu1, mu2, s11, s22, s12);
            }
        }

        (total / (width * height) as f64).clamp(0.0, 1.0)
    }
}

/// SSIM from Gaussian-filtered moment planes.
///
/// The five planes (a, b, a², b², ab) are blurred with a separable
/// convolution whose rows are dispatched across the rayon pool, which is the
/// batched form of the windowed computation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvolvedSsim;

struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_fn(width: usize, height: usize, f: impl Fn(usize) -> f32 + Send + Sync) -> Self {
        let data = (0..width * height).into_par_iter().map(f).collect();
        Self { width, height, data }
    }

    fn blur(&self, kernel: &[f32; KERNEL_SIZE]) -> Plane {
        let (width, height) = (self.width, self.height);

        let mut horizontal = vec![0.0f32; self.data.len()];
        horizontal
            .par_chunks_mut(width)
            .zip(self.data.par_chunks(width))
            .for_each(|(out, row)| {
                for (x, slot) in out.iter_mut().enumerate() {
                    let mut acc = 0.0;
                    for (k, w) in kernel.iter().enumerate() {
                        let sx = x as isize + k as isize - RADIUS;
                        if sx >= 0 && (sx as usize) < width {
                            acc += w * row[sx as usize];
                        }
                    }
                    *slot = acc;
                }
            });

        let mut data = vec![0.0f32; self.data.len()];
        data.par_chunks_mut(width).enumerate().for_each(|(y, out)| {
            for (k, w) in kernel.iter().enumerate() {
                let sy = y as isize + k as isize - RADIUS;
                if sy < 0 || sy as usize >= height {
                    continue;
                }
                let src = &horizontal[sy as usize * width..(sy as usize + 1) * width];
                for (slot, v) in out.iter_mut().zip(src) {
                    *slot += w * v;
                }
            }
        });

        Plane { width, height, data }
    }
}

impl SimilarityScorer for ConvolvedSsim {
    fn name(&self) -> &'static str {
        "convolved"
    }

    fn score(&self, a: &GrayImage, b: &GrayImage) -> f64 {
        let Some((a, b)) = align(a, b) else {
            return 0.0;
        };
        let kernel = gaussian_kernel().map(|k| k as f32);
        let (width, height) = (a.width() as usize, a.height() as usize);
        let pa = a.as_raw();
        let pb = b.as_raw();
        let unit = |v: u8| v as f32 / 255.0;

        let mu1 = Plane::from_fn(width, height, |i| unit(pa[i])).blur(&kernel);
        let mu2 = Plane::from_fn(width, height, |i| unit(pb[i])).blur(&kernel);
        let s11 = Plane::from_fn(width, height, |i| unit(pa[i]).powi(2)).blur(&kernel);
        let s22 = Plane::from_fn(width, height, |i| unit(pb[i]).powi(2)).blur(&kernel);
        let s12 = Plane::from_fn(width, height, |i| unit(pa[i]) * unit(pb[i])).blur(&kernel);

        // Per-row partial sums keep the final reduction order fixed.
        let row_sums: Vec<f64> = (0..height)
            .into_par_iter()
            .map(|y| {
                (y * width..(y + 1) * width)
                    .map(|i| {
                        local_ssim(
                            mu1.data[i] as f64,
                            mu2.data[i] as f64,
                            s11.data[i] as f64,
                            s22.data[i] as f64,
                            s12.data[i] as f64,
                        )
                    })
                    .sum()
            })
            .collect();
        let total: f64 = row_sums.iter().sum();

        (total / (width * height) as f64).clamp(0.0, 1.0)
    }
}
