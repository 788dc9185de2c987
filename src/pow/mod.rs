//! Proof-of-work accounting for header chains.
//!
//! The oracle never validates proof-of-work; it only needs each header's
//! work contribution so competing chains can be compared by cumulative work.
//!
//! The contribution of a header with compact target `bits` is
//!
//!   work = 2^256 / (target + 1)
//!
//! which is the expected number of hashes needed to meet the target.
//!
//! Reference values:
//!   0x1d00ffff (mainnet minimum difficulty) = 4,295,032,833
//!   0x207fffff (regtest)                    = 2

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::core::types::Work;

/// Sign bit of the compact mantissa
const COMPACT_SIGN_BIT: u32 = 0x0080_0000;

/// Mantissa mask of the compact encoding
const COMPACT_MANTISSA: u32 = 0x007f_ffff;

/// Expand a compact ("nBits") target.
///
/// Returns `None` for negative, zero, or overflowing (> 256 bit) targets,
/// all of which are unusable for work accounting.
pub fn target_from_bits(bits: u32) -> Option<BigUint> {
    let size = bits >> 24;
    let mut word = bits & COMPACT_MANTISSA;

    if word != 0 && (bits & COMPACT_SIGN_BIT) != 0 {
        return None;
    }
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
    if overflow {
        return None;
    }

    let target = if size <= 3 {
        word >>= 8 * (3 - size);
        BigUint::from(word)
    } else {
        BigUint::from(word) << (8 * (size - 3) as usize)
    };

    if target.is_zero() {
        None
    } else {
        Some(target)
    }
}

/// Work contributed by a single header with the given compact target.
pub fn work_from_bits(bits: u32) -> Option<Work> {
    let target = target_from_bits(bits)?;
    let numerator = BigUint::one() << 256usize;
    Some(Work::from_biguint(numerator / (target + BigUint::one())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_minimum_work() {
        assert_eq!(work_from_bits(0x1d00ffff), Some(Work::from(4_295_032_833)));
    }

    #[test]
    fn test_regtest_work() {
        assert_eq!(work_from_bits(0x207fffff), Some(Work::from(2)));
    }

    #[test]
    fn test_harder_target_more_work() {
        let easy = work_from_bits(0x1d00ffff).unwrap();
        let hard = work_from_bits(0x1b0404cb).unwrap();
        assert!(hard > easy);
        assert_eq!(hard, Work::from(70_040_908_352_512));
    }

    #[test]
    fn test_rejects_negative_target() {
        assert!(target_from_bits(0x04923456).is_none());
    }

    #[test]
    fn test_rejects_zero_target() {
        assert!(target_from_bits(0x00000000).is_none());
        assert!(target_from_bits(0x01003456).is_none());
    }

    #[test]
    fn test_rejects_overflow() {
        assert!(target_from_bits(0xff123456).is_none());
    }

    #[test]
    fn test_small_size_shifts_right() {
        assert_eq!(target_from_bits(0x01123456), Some(BigUint::from(0x12u32)));
        assert_eq!(target_from_bits(0x02123456), Some(BigUint::from(0x1234u32)));
    }
}
