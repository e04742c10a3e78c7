//! Image signature derivation
//!
//! A signature is a SHA-256 digest of the raw 8-bit luma buffer of the image
//! after it has been resized to a fixed square. Normalizing before hashing
//! makes the result independent of the container format (a PNG and a BMP of
//! the same pixels yield the same signature), while any pixel change moves
//! the digest.
//!
//! Signatures carry the parameters they were derived with. Comparing two
//! signatures with different parameters is an error, not a low score.

use image::imageops::FilterType;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::{VerifyError, VerifyResult};

/// Default edge length of the normalized square
pub const DEFAULT_SIGNATURE_SIZE: u32 = 32;

/// Pixel channel layout hashed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Luma8,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Luma8 => "luma8",
        }
    }
}

/// Digest applied to the normalized pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Length of the hex-encoded digest
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

/// Derivation parameters; signatures are comparable only when these match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureParams {
    pub width: u32,
    pub height: u32,
    pub channel: Channel,
    pub algorithm: DigestAlgorithm,
}

impl SignatureParams {
    /// Square luma/SHA-256 parameters
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            channel: Channel::Luma8,
            algorithm: DigestAlgorithm::Sha256,
        }
    }
}

impl Default for SignatureParams {
    fn default() -> Self {
        Self::square(DEFAULT_SIGNATURE_SIZE)
    }
}

/// Fixed-length image fingerprint with its derivation parameters
///
/// Persisted as `<algorithm>:<w>x<h>:<channel>:<hex digest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSignature {
    params: SignatureParams,
    digest: String,
}

impl ImageSignature {
    /// Build a signature from a hex digest, validating it against `params`
    pub fn new(params: SignatureParams, digest: impl Into<String>) -> VerifyResult<Self> {
        let digest = digest.into().to_ascii_lowercase();
        if digest.len() != params.algorithm.hex_len()
            || !digest.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(VerifyError::IncompatibleSignature(format!(
                "digest is not {} hex characters",
                params.algorithm.hex_len()
            )));
        }
        Ok(Self { params, digest })
    }

    pub fn params(&self) -> &SignatureParams {
        &self.params
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Storage form
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}x{}:{}:{}",
            self.params.algorithm.as_str(),
            self.params.width,
            self.params.height,
            self.params.channel.as_str(),
            self.digest
        )
    }
}

impl FromStr for ImageSignature {
    type Err = VerifyError;

    fn from_str(s: &str) -> VerifyResult<Self> {
        let malformed = || VerifyError::IncompatibleSignature(format!("malformed signature: {}", s));

        let mut parts = s.split(':');
        let (algorithm, dims, channel, digest) =
            match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(a), Some(d), Some(c), Some(h), None) => (a, d, c, h),
                _ => return Err(malformed()),
            };

        let algorithm = match algorithm {
            "sha256" => DigestAlgorithm::Sha256,
            _ => return Err(malformed()),
        };
        let channel = match channel {
            "luma8" => Channel::Luma8,
            _ => return Err(malformed()),
        };
        let (width, height) = dims.split_once('x').ok_or_else(malformed)?;
        let width: u32 = width.parse().map_err(|_| malformed())?;
        let height: u32 = height.parse().map_err(|_| malformed())?;

        ImageSignature::new(
            SignatureParams {
                width,
                height,
                channel,
                algorithm,
            },
            digest,
        )
    }
}

/// Derives signatures with fixed parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureEngine {
    params: SignatureParams,
}

impl SignatureEngine {
    /// Engine producing `size`×`size` luma/SHA-256 signatures
    pub fn new(size: u32) -> Self {
        Self {
            params: SignatureParams::square(size),
        }
    }

    pub fn params(&self) -> &SignatureParams {
        &self.params
    }

    /// Compute the signature of encoded image bytes
    ///
    /// CPU bound; async callers should use [`compute_blocking`](Self::compute_blocking).
    pub fn compute(&self, image_bytes: &[u8]) -> VerifyResult<ImageSignature> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| VerifyError::ImageDecode(e.to_string()))?;

        let normalized = img
            .resize_exact(self.params.width, self.params.height, FilterType::Lanczos3)
            .to_luma8();

        let digest = match self.params.algorithm {
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(normalized.as_raw());
                format!("{:x}", hasher.finalize())
            }
        };

        Ok(ImageSignature {
            params: self.params,
            digest,
        })
    }

    /// Compute on the blocking thread pool
    pub async fn compute_blocking(&self, image_bytes: Vec<u8>) -> VerifyResult<ImageSignature> {
        let engine = *self;
        tokio::task::spawn_blocking(move || engine.compute(&image_bytes))
            .await
            .map_err(|e| {
                VerifyError::Common(verity_common::Error::Internal(format!(
                    "Signature task failed: {}",
                    e
                )))
            })?
    }
}

impl Default for SignatureEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE_SIZE)
    }
}

/// Compute a signature with the default parameters
pub fn compute_signature(image_bytes: &[u8]) -> VerifyResult<ImageSignature> {
    SignatureEngine::default().compute(image_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
        }))
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_deterministic() {
        let bytes = encode(&gradient(48, 40), ImageFormat::Png);
        let first = compute_signature(&bytes).unwrap();
        let second = compute_signature(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.digest().len(), 64);
    }

    #[test]
    fn test_container_format_does_not_matter() {
        let img = gradient(48, 40);
        let png = compute_signature(&encode(&img, ImageFormat::Png)).unwrap();
        let bmp = compute_signature(&encode(&img, ImageFormat::Bmp)).unwrap();
        assert_eq!(png, bmp);
    }

    #[test]
    fn test_different_pixels_differ() {
        let a = compute_signature(&encode(&gradient(48, 40), ImageFormat::Png)).unwrap();
        let inverted = DynamicImage::ImageRgb8(RgbImage::from_fn(48, 40, |x, y| {
            Rgb([255 - (x * 4) as u8, 255 - (y * 4) as u8, 7])
        }));
        let b = compute_signature(&encode(&inverted, ImageFormat::Png)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = compute_signature(b"definitely not an image");
        assert!(matches!(result, Err(VerifyError::ImageDecode(_))));
    }

    #[test]
    fn test_storage_form_round_trip() {
        let sig = compute_signature(&encode(&gradient(16, 16), ImageFormat::Png)).unwrap();
        let stored = sig.encode();
        assert!(stored.starts_with("sha256:32x32:luma8:"));
        assert_eq!(stored.parse::<ImageSignature>().unwrap(), sig);
    }

    #[test]
    fn test_malformed_storage_form_rejected() {
        for value in [
            "",
            "md5:32x32:luma8:00",
            "sha256:32:luma8:00",
            "sha256:32x32:rgb8:00",
            "sha256:32x32:luma8:zz",
        ] {
            assert!(value.parse::<ImageSignature>().is_err(), "accepted {:?}", value);
        }
    }

    #[test]
    fn test_engine_size_is_part_of_params() {
        let bytes = encode(&gradient(48, 40), ImageFormat::Png);
        let small = SignatureEngine::new(8).compute(&bytes).unwrap();
        let large = SignatureEngine::new(32).compute(&bytes).unwrap();
        assert_ne!(small.params(), large.params());
    }

    #[tokio::test]
    async fn test_compute_blocking_matches_sync() {
        let bytes = encode(&gradient(20, 20), ImageFormat::Png);
        let engine = SignatureEngine::default();
        let sync = engine.compute(&bytes).unwrap();
        let blocking = engine.compute_blocking(bytes).await.unwrap();
        assert_eq!(sync, blocking);
    }
}
