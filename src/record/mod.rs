//! Fixed-width record encodings.
//!
//! A record is a fixed number of 64-bit words. Width, field order and the
//! layout `KIND` tag are the wire contract between every participant attached
//! to the same ring; they never change after a buffer is created.

pub mod order;
pub mod tick;

pub use order::{DecodedOrder, Order, OrderKind, OrderRecord, OrderStatus, Side};
pub use tick::{Tick, TickRecord};

use crate::core::layout::MAX_RECORD_WIDTH;

/// A fixed-width numeric record that can live in a ring slot.
pub trait Record: Copy + Send + Sync + 'static {
    /// Layout tag checked on attach; distinct per field order.
    const KIND: u32;
    /// Number of payload words, at most 16.
    const WIDTH: usize;

    /// Writes exactly `WIDTH` words into `out`.
    fn write_fields(&self, out: &mut [u64]);

    /// Rebuilds the record from exactly `WIDTH` words.
    fn read_fields(fields: &[u64]) -> Self;

    /// True when `self` carries no economically new information over `previous`.
    fn conflates_with(&self, _previous: &Self) -> bool {
        false
    }
}

/// A record together with the sequence number its ring assigned on commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sequenced<R> {
    pub seq: u64,
    pub record: R,
}

/// Scratch buffer large enough for any record.
pub(crate) type FieldBuf = [u64; MAX_RECORD_WIDTH];

/// 64-bit FNV-1a, used for symbol and venue hashes.
pub fn fnv1a64(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub(crate) fn split_u128(value: u128) -> (u64, u64) {
    ((value >> 64) as u64, value as u64)
}

pub(crate) fn join_u128(high: u64, low: u64) -> u128 {
    ((high as u128) << 64) | low as u128
}

#[cfg(test)]
mod tests {
    use super::{fnv1a64, join_u128, split_u128};

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a64(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn u128_split_is_lossless() {
        let id = 0x0123_4567_89ab_cdef_fedc_ba98_7654_3210u128;
        let (hi, lo) = split_u128(id);
        assert_eq!(hi, 0x0123_4567_89ab_cdef);
        assert_eq!(lo, 0xfedc_ba98_7654_3210);
        assert_eq!(join_u128(hi, lo), id);
    }
}
