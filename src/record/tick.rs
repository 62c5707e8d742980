//! Market-data tick record.
//!
//! Ten 64-bit words: feed sequence, timestamp high/low halves, bid price,
//! bid size, ask price, ask size, last price, volume, flags. Prices and sizes
//! are f64 bit patterns. The timestamp halves are the upper and lower 32 bits
//! of the nanosecond timestamp, each held in an integer word, so the split is
//! lossless.

use crate::core::{Error, Result};
use crate::record::Record;

pub const TICK_RECORD_KIND: u32 = 0x5449_4B31; // 'TIK1'
pub const TICK_RECORD_WIDTH: usize = 10;

pub mod tick_flags {
    pub const SNAPSHOT: u64 = 1 << 0;
    pub const TRADE: u64 = 1 << 1;
    pub const STALE: u64 = 1 << 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tick {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub last_price: f64,
    pub volume: f64,
    pub flags: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TickRecord {
    pub sequence: u64,
    pub timestamp_high: u64,
    pub timestamp_low: u64,
    pub bid_price_bits: u64,
    pub bid_size_bits: u64,
    pub ask_price_bits: u64,
    pub ask_size_bits: u64,
    pub last_price_bits: u64,
    pub volume_bits: u64,
    pub flags: u64,
}

impl TickRecord {
    pub fn encode(tick: &Tick) -> Result<Self> {
        let numbers = [
            ("bid_price", tick.bid_price),
            ("bid_size", tick.bid_size),
            ("ask_price", tick.ask_price),
            ("ask_size", tick.ask_size),
            ("last_price", tick.last_price),
            ("volume", tick.volume),
        ];
        for (name, value) in numbers {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidRecord(format!("{name} must be finite and >= 0, got {value}")));
            }
        }
        Ok(Self {
            sequence: tick.sequence,
            timestamp_high: tick.timestamp_ns >> 32,
            timestamp_low: tick.timestamp_ns & 0xFFFF_FFFF,
            bid_price_bits: tick.bid_price.to_bits(),
            bid_size_bits: tick.bid_size.to_bits(),
            ask_price_bits: tick.ask_price.to_bits(),
            ask_size_bits: tick.ask_size.to_bits(),
            last_price_bits: tick.last_price.to_bits(),
            volume_bits: tick.volume.to_bits(),
            flags: tick.flags,
        })
    }

    pub fn decode(&self) -> Tick {
        Tick {
            sequence: self.sequence,
            timestamp_ns: self.timestamp_ns(),
            bid_price: self.bid_price(),
            bid_size: f64::from_bits(self.bid_size_bits),
            ask_price: self.ask_price(),
            ask_size: f64::from_bits(self.ask_size_bits),
            last_price: f64::from_bits(self.last_price_bits),
            volume: f64::from_bits(self.volume_bits),
            flags: self.flags,
        }
    }

    pub fn timestamp_ns(&self) -> u64 {
        (self.timestamp_high << 32) | (self.timestamp_low & 0xFFFF_FFFF)
    }

    pub fn bid_price(&self) -> f64 {
        f64::from_bits(self.bid_price_bits)
    }

    pub fn ask_price(&self) -> f64 {
        f64::from_bits(self.ask_price_bits)
    }
}

impl Record for TickRecord {
    const KIND: u32 = TICK_RECORD_KIND;
    const WIDTH: usize = TICK_RECORD_WIDTH;

    fn write_fields(&self, out: &mut [u64]) {
        out[0] = self.sequence;
        out[1] = self.timestamp_high;
        out[2] = self.timestamp_low;
        out[3] = self.bid_price_bits;
        out[4] = self.bid_size_bits;
        out[5] = self.ask_price_bits;
        out[6] = self.ask_size_bits;
        out[7] = self.last_price_bits;
        out[8] = self.volume_bits;
        out[9] = self.flags;
    }

    fn read_fields(fields: &[u64]) -> Self {
        Self {
            sequence: fields[0],
            timestamp_high: fields[1],
            timestamp_low: fields[2],
            bid_price_bits: fields[3],
            bid_size_bits: fields[4],
            ask_price_bits: fields[5],
            ask_size_bits: fields[6],
            last_price_bits: fields[7],
            volume_bits: fields[8],
            flags: fields[9],
        }
    }

    /// Same bid and ask as the previous tick.
    fn conflates_with(&self, previous: &Self) -> bool {
        self.bid_price_bits == previous.bid_price_bits
            && self.ask_price_bits == previous.ask_price_bits
    }
}
