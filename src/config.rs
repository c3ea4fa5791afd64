use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Which SSIM strategy scores the shortlisted pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Per-pixel window sums, one pair at a time.
    Scalar,
    /// Separable convolution over whole moment planes, rows in parallel.
    #[default]
    Accelerated,
}

/// Engine configuration, validated once before any matching starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Fingerprint length in bits; must be the square of the DCT hash side.
    pub bit_width: usize,
    /// Candidates considered per query.
    pub top_k: usize,
    /// Candidates strictly below this Hamming distance are SSIM-scored.
    pub hamming_threshold: u32,
    pub device_mode: DeviceMode,
    /// Queries per batched distance computation.
    pub batch_size: usize,
    /// Minimum similarity for a scored match to count as confirmed.
    pub ssim_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            bit_width: 1024,
            top_k: 2,
            hamming_threshold: 150,
            device_mode: DeviceMode::default(),
            batch_size: 100,
            ssim_threshold: 0.70,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        hash_side(self.bit_width)?;
        if self.top_k < 1 {
            return Err(ConfigError::InvalidTopK);
        }
        if self.batch_size < 1 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if !(0.0..=1.0).contains(&self.ssim_threshold) {
            return Err(ConfigError::InvalidSsimThreshold(
                self.ssim_threshold.to_string(),
            ));
        }
        Ok(())
    }
}

/// Side length of the square DCT hash grid for `bit_width` bits.
pub fn hash_side(bit_width: usize) -> Result<u32, ConfigError> {
    let side = (bit_width as f64).sqrt().round() as usize;
    if bit_width < 4 || side * side != bit_width {
        return Err(ConfigError::InvalidBitWidth(bit_width));
    }
    Ok(side as u32)
}
