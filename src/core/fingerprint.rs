use crate::config::hash_side;
use crate::error::ConfigError;
use image::{DynamicImage, GrayImage};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Fixed-length perceptual fingerprint.
///
/// Two fingerprints are only comparable when they share a bit width and were
/// produced by the same normalization pipeline.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FingerprintRepr", into = "FingerprintRepr")]
pub struct Fingerprint {
    bytes: Box<[u8]>,
    bit_width: usize,
}

impl Fingerprint {
    /// Bits are packed least-significant first, so when `bit_width` is not a
    /// multiple of 8 the unused high bits of the last byte must be zero.
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>, bit_width: usize) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bit_width == 0 || bytes.len() != bit_width.div_ceil(8) {
            return Err(ConfigError::InvalidFingerprint(format!(
                "{} bytes cannot hold {} bits",
                bytes.len(),
                bit_width
            )));
        }
        let used = bit_width % 8;
        if used != 0 {
            let padding = bytes[bytes.len() - 1] & !((1u8 << used) - 1);
            if padding != 0 {
                return Err(ConfigError::InvalidFingerprint(format!(
                    "bits set past bit {bit_width} (padding {padding:#04x})"
                )));
            }
        }
        Ok(Self { bytes, bit_width })
    }

    /// Parse the hex form written by [`Fingerprint::to_hex`].
    pub fn from_hex(encoded: &str, bit_width: usize) -> Result<Self, ConfigError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| ConfigError::InvalidFingerprint(e.to_string()))?;
        Self::from_bytes(bytes, bit_width)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn bit_width(&self) -> usize {
        self.bit_width
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hamming weight of `self XOR other`.
    pub fn distance(&self, other: &Fingerprint) -> Result<u32, ConfigError> {
        if self.bit_width != other.bit_width {
            return Err(ConfigError::BitWidthMismatch {
                expected: self.bit_width,
                found: other.bit_width,
                id: other.to_hex(),
            });
        }
        Ok(self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}b:{})", self.bit_width, self.to_hex())
    }
}

#[derive(Serialize, Deserialize)]
struct FingerprintRepr {
    bits: usize,
    hex: String,
}

impl TryFrom<FingerprintRepr> for Fingerprint {
    type Error = ConfigError;

    fn try_from(repr: FingerprintRepr) -> Result<Self, Self::Error> {
        Fingerprint::from_hex(&repr.hex, repr.bits)
    }
}

impl From<Fingerprint> for FingerprintRepr {
    fn from(fp: Fingerprint) -> Self {
        FingerprintRepr {
            bits: fp.bit_width,
            hex: fp.to_hex(),
        }
    }
}

/// One image of a corpus together with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Stable identifier, the path relative to the corpus root.
    pub id: String,
    pub path: PathBuf,
    #[serde(rename = "hash")]
    pub fingerprint: Fingerprint,
}

/// DCT perceptual hasher over normalized grayscale images.
pub struct PerceptualHasher {
    hasher: Hasher,
    bit_width: usize,
}

impl PerceptualHasher {
    pub fn new(bit_width: usize) -> Result<Self, ConfigError> {
        let side = hash_side(bit_width)?;
        let hasher = HasherConfig::new()
            .hash_size(side, side)
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .to_hasher();
        Ok(Self { hasher, bit_width })
    }

    pub fn bit_width(&self) -> usize {
        self.bit_width
    }

    pub fn hash(&self, gray: &GrayImage) -> Fingerprint {
        let img = DynamicImage::ImageLuma8(gray.clone());
        let hash = self.hasher.hash_image(&img);
        Fingerprint {
            bytes: hash.as_bytes().into(),
            bit_width: self.bit_width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::normalize;
    use image::Luma;
    use proptest::prelude::*;

    fn waves(width: u32, height: u32, fx: f64, fy: f64) -> GrayImage {
        use std::f64::consts::TAU;
        GrayImage::from_fn(width, height, |x, y| {
            let u = x as f64 / width as f64;
            let v = y as f64 / height as f64;
            let value = 128.0
                + 60.0 * (TAU * u * fx).sin()
                + 45.0 * (TAU * v * fy).cos()
                + 20.0 * (TAU * (u + v) * 3.1).sin();
            Luma([value.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn test_hex_round_trip() {
        let fp = Fingerprint::from_hex("00ff", 16).unwrap();
        assert_eq!(fp.to_hex(), "00ff");
        assert_eq!(fp.bit_width(), 16);
        assert!(Fingerprint::from_hex("00ff", 64).is_err());
        assert!(Fingerprint::from_hex("zz", 8).is_err());
    }

    #[test]
    fn test_distance_rejects_mismatched_width() {
        let a = Fingerprint::from_hex("00", 8).unwrap();
        let b = Fingerprint::from_hex("0000", 16).unwrap();
        assert!(matches!(
            a.distance(&b),
            Err(ConfigError::BitWidthMismatch { expected: 8, found: 16, .. })
        ));
    }

    #[test]
    fn test_scenario_distances() {
        let r1 = Fingerprint::from_hex("0000", 16).unwrap();
        let r2 = Fingerprint::from_hex("ffff", 16).unwrap();
        let q = Fingerprint::from_hex("0001", 16).unwrap();
        assert_eq!(q.distance(&r1).unwrap(), 1);
        assert_eq!(q.distance(&r2).unwrap(), 15);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = PerceptualHasher::new(64).unwrap();
        let img = normalize(&DynamicImage::ImageLuma8(waves(96, 64, 1.5, 2.3)));
        let a = hasher.hash(&img);
        let b = hasher.hash(&img);
        assert_eq!(a, b);
        assert_eq!(a.bit_width(), 64);
        assert_eq!(a.as_bytes().len(), 8);
    }

    #[test]
    fn test_rescaled_image_stays_close() {
        let hasher = PerceptualHasher::new(64).unwrap();
        let big = waves(256, 192, 1.5, 2.3);
        let small = image::imageops::resize(&big, 128, 96, image::imageops::FilterType::Triangle);
        let far = waves(256, 192, 2.7, 0.6);

        let h_big = hasher.hash(&normalize(&DynamicImage::ImageLuma8(big)));
        let h_small = hasher.hash(&normalize(&DynamicImage::ImageLuma8(small)));
        let h_far = hasher.hash(&normalize(&DynamicImage::ImageLuma8(far)));

        let near = h_big.distance(&h_small).unwrap();
        assert!(near <= 12, "rescaled distance was {near}");
        assert!(near < h_big.distance(&h_far).unwrap());
    }

    #[test]
    fn test_serde_uses_hex() {
        let fp = Fingerprint::from_hex("0a0b", 16).unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, r#"{"bits":16,"hex":"0a0b"}"#);
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_odd_width_rejects_padding_bits() {
        assert!(Fingerprint::from_hex("ffff", 9).is_err());
        assert!(Fingerprint::from_hex("0002", 9).is_err());

        let ones = Fingerprint::from_hex("ff01", 9).unwrap();
        let zeros = Fingerprint::from_hex("0000", 9).unwrap();
        assert_eq!(ones.distance(&zeros).unwrap(), 9);

        let err = Fingerprint::from_hex("ffff", 9).unwrap_err().to_string();
        assert!(err.starts_with("Invalid fingerprint encoding: bits set past bit 9"), "{err}");
    }

    #[test]
    fn test_hasher_output_loads_back_at_odd_widths() {
        let img = normalize(&DynamicImage::ImageLuma8(waves(96, 64, 1.5, 2.3)));
        for bits in [9, 25, 49] {
            let fp = PerceptualHasher::new(bits).unwrap().hash(&img);
            let back = Fingerprint::from_hex(&fp.to_hex(), bits).unwrap();
            assert_eq!(back, fp);
        }
    }

    /// Random fingerprints at a width drawn from square and non-square sizes.
    fn fingerprint_pair() -> impl Strategy<Value = (usize, Vec<u8>, Vec<u8>)> {
        prop::sample::select(vec![9usize, 16, 25, 49, 64, 136, 1024]).prop_flat_map(|bits| {
            let len = bits.div_ceil(8);
            let mask = match bits % 8 {
                0 => 0xff,
                used => (1u8 << used) - 1,
            };
            let clear = move |mut v: Vec<u8>| {
                v[len - 1] &= mask;
                v
            };
            (
                Just(bits),
                prop::collection::vec(any::<u8>(), len).prop_map(clear),
                prop::collection::vec(any::<u8>(), len).prop_map(clear),
            )
        })
    }

    proptest! {
        #[test]
        fn distance_is_a_bounded_metric((bits, a, b) in fingerprint_pair()) {
            let fa = Fingerprint::from_bytes(a, bits).unwrap();
            let fb = Fingerprint::from_bytes(b, bits).unwrap();
            let d = fa.distance(&fb).unwrap();
            prop_assert_eq!(d, fb.distance(&fa).unwrap());
            prop_assert_eq!(fa.distance(&fa).unwrap(), 0);
            prop_assert!(d as usize <= bits);
        }
    }
}
