//! Reed-Solomon forward error correction over GF(256).
//!
//! Thin wrappers around the `reed-solomon` crate, which implements
//! RS(255, 255 - nsym) with primitive polynomial 0x11D and corrects up to
//! `nsym / 2` unknown byte errors per block.

use reed_solomon::{Decoder, Encoder};

use crate::config::RS_MAX_BLOCK;
use crate::error::{Result, SonicTagError};

/// Compute `nsym` parity bytes over `data`.
///
/// `data.len() + nsym` must fit in one RS codeword.
pub fn parity(data: &[u8], nsym: usize) -> Result<Vec<u8>> {
    if data.len() + nsym > RS_MAX_BLOCK {
        return Err(SonicTagError::PayloadTooLarge);
    }
    let encoded = Encoder::new(nsym).encode(data);
    Ok(encoded.ecc().to_vec())
}

/// Correct up to `nsym / 2` byte errors in `block` (data followed by
/// `nsym` parity bytes) and return the data portion.
pub fn correct(block: &[u8], nsym: usize) -> Result<Vec<u8>> {
    if block.len() <= nsym || block.len() > RS_MAX_BLOCK {
        return Err(SonicTagError::UncorrectableErrors);
    }
    let corrected = Decoder::new(nsym)
        .correct(block, None)
        .map_err(|_| SonicTagError::UncorrectableErrors)?;
    let disagreements = corrected
        .iter()
        .zip(block.iter())
        .filter(|(a, b)| a != b)
        .count();
    if disagreements > nsym / 2 {
        return Err(SonicTagError::UncorrectableErrors);
    }
    Ok(corrected.data().to_vec())
}
