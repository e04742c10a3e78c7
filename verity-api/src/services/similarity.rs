//! Signature comparison
//!
//! Each hex digit of a digest is four bits. The score is the share of equal
//! bits, as a percentage.

use super::{ImageSignature, VerifyError, VerifyResult};

/// Similarity of two signatures in `[0, 100]`
///
/// Fails with `IncompatibleSignature` when the signatures were derived with
/// different parameters or their digests differ in length.
pub fn similarity(a: &ImageSignature, b: &ImageSignature) -> VerifyResult<f64> {
    if a.params() != b.params() {
        return Err(VerifyError::IncompatibleSignature(format!(
            "parameters differ: {:?} vs {:?}",
            a.params(),
            b.params()
        )));
    }

    let (da, db) = (a.digest().as_bytes(), b.digest().as_bytes());
    if da.len() != db.len() || da.is_empty() {
        return Err(VerifyError::IncompatibleSignature(format!(
            "digest lengths differ: {} vs {}",
            da.len(),
            db.len()
        )));
    }

    let mut differing_bits = 0u32;
    for (x, y) in da.iter().zip(db) {
        let (x, y) = (nibble(*x)?, nibble(*y)?);
        differing_bits += (x ^ y).count_ones();
    }

    let total_bits = (da.len() * 4) as f64;
    Ok(100.0 * (1.0 - differing_bits as f64 / total_bits))
}

fn nibble(c: u8) -> VerifyResult<u8> {
    (c as char)
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or_else(|| VerifyError::IncompatibleSignature(format!("non-hex digit {:?}", c as char)))
}
