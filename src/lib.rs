//! Match raw image captures to their processed counterparts.
//!
//! Each query image is shortlisted against the reference corpus by perceptual
//! hash Hamming distance, and the shortlist is re-ranked with SSIM to decide
//! whether a structurally confirmed match exists.

pub mod config;
pub mod core;
pub mod error;
pub mod services;

pub use config::{DeviceMode, MatchConfig};
pub use error::{ConfigError, NormalizeError, RecordError};
