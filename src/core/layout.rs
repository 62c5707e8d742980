//! Shared-memory layout of a ring region.
//!
//! ```text
//! offset 0    RingHeader (640 bytes, five 128-byte groups)
//! offset 640  slot 0 | slot 1 | ... | slot C-1
//! ```
//!
//! Each slot is `stride_words` 64-bit words: the record payload fields, then
//! the readiness stamp, then the assigned sequence number, padded to a
//! 64-byte multiple.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::core::{Error, Result};

pub const RING_MAGIC: u32 = 0x434E_4454; // 'CNDT'
pub const RING_VERSION: u32 = 1;

pub const INIT_UNINIT: u32 = 0;
pub const INIT_BUSY: u32 = 1;
pub const INIT_READY: u32 = 2;

pub const STATE_OPEN: u32 = 0;
pub const STATE_CLOSED: u32 = 1;
pub const STATE_POISONED: u32 = 2;

/// Upper bound on payload fields per record.
pub const MAX_RECORD_WIDTH: usize = 16;
pub const MAX_CAPACITY: u64 = 1 << 40;

/// Set on a slot stamp while a producer copies its payload in.
pub const STAMP_WRITING: u64 = 1 << 63;

const SLOT_ALIGN_WORDS: usize = 8;

#[repr(C, align(128))]
pub struct RingHeader {
    // Constant after init.
    pub magic: AtomicU32,
    pub version: AtomicU32,
    pub init_state: AtomicU32,
    pub state: AtomicU32,
    pub capacity: AtomicU64,
    pub record_width: AtomicU32,
    pub record_kind: AtomicU32,
    pub slot_words: AtomicU32,
    pub _pad0: [u8; 4],
    pub _pad1: [u8; 88],

    // Producer-hot.
    pub tail: AtomicU64,
    pub producers: AtomicU32,
    pub _pad2: [u8; 4],
    pub _pad3: [u8; 112],

    // Consumer-hot.
    pub head: AtomicU64,
    pub consumers: AtomicU32,
    pub _pad4: [u8; 4],
    pub _pad5: [u8; 112],

    // Counters.
    pub size: AtomicU64,
    pub sequence: AtomicU64,
    pub write_count: AtomicU64,
    pub read_count: AtomicU64,
    pub conflated_count: AtomicU64,
    pub evicted_count: AtomicU64,
    pub reclaimed_count: AtomicU64,
    pub _pad6: [u8; 72],

    // Producer-notify / consumer-wait. Kept apart from size so parked
    // consumers registering in waiters_pending do not bounce the counters line.
    pub notify_seq: AtomicU32,
    pub waiters_pending: AtomicU32,
    pub _pad7: [u8; 120],
}

pub const HEADER_SIZE: usize = size_of::<RingHeader>();

/// Slot geometry derived from the record width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotGeometry {
    pub width: usize,
    pub stride_words: usize,
}

impl SlotGeometry {
    pub fn for_width(width: usize) -> Result<Self> {
        if width == 0 || width > MAX_RECORD_WIDTH {
            return Err(Error::Unsupported("record width must be within 1..=16 fields"));
        }
        let words = width + 2;
        let stride_words = words.div_ceil(SLOT_ALIGN_WORDS) * SLOT_ALIGN_WORDS;
        Ok(Self {
            width,
            stride_words,
        })
    }

    pub fn stamp_word(&self) -> usize {
        self.width
    }

    pub fn sequence_word(&self) -> usize {
        self.width + 1
    }

    pub fn stride_bytes(&self) -> usize {
        self.stride_words * size_of::<u64>()
    }

    pub fn region_len(&self, capacity: u64) -> Result<usize> {
        let slots = usize::try_from(capacity)
            .ok()
            .and_then(|c| c.checked_mul(self.stride_bytes()))
            .ok_or(Error::Unsupported("capacity too large"))?;
        slots
            .checked_add(HEADER_SIZE)
            .ok_or(Error::Unsupported("capacity too large"))
    }
}

impl RingHeader {
    /// Writes every field of a freshly zeroed header, publishing it last via `init_state`.
    pub(crate) fn initialize(&self, capacity: u64, geometry: SlotGeometry, kind: u32) {
        self.init_state.store(INIT_BUSY, Ordering::Relaxed);
        self.version.store(RING_VERSION, Ordering::Relaxed);
        self.state.store(STATE_OPEN, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);
        self.record_width
            .store(geometry.width as u32, Ordering::Relaxed);
        self.record_kind.store(kind, Ordering::Relaxed);
        self.slot_words
            .store(geometry.stride_words as u32, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.head.store(0, Ordering::Relaxed);
        self.producers.store(0, Ordering::Relaxed);
        self.consumers.store(0, Ordering::Relaxed);
        self.size.store(0, Ordering::Relaxed);
        self.sequence.store(0, Ordering::Relaxed);
        self.write_count.store(0, Ordering::Relaxed);
        self.read_count.store(0, Ordering::Relaxed);
        self.conflated_count.store(0, Ordering::Relaxed);
        self.evicted_count.store(0, Ordering::Relaxed);
        self.reclaimed_count.store(0, Ordering::Relaxed);
        self.notify_seq.store(0, Ordering::Relaxed);
        self.waiters_pending.store(0, Ordering::Relaxed);
        self.magic.store(RING_MAGIC, Ordering::Relaxed);
    }

    pub(crate) fn publish_ready(&self) {
        self.init_state.store(INIT_READY, Ordering::Release);
    }

    pub fn wait_ready(&self) -> Result<()> {
        let mut spins = 0u32;
        loop {
            match self.init_state.load(Ordering::Acquire) {
                INIT_READY => break,
                INIT_UNINIT | INIT_BUSY => {}
                _ => return Err(Error::LayoutMismatch("unrecognised init state")),
            }
            spins += 1;
            if spins > 1_000_000 {
                return Err(Error::Unsupported("ring region never became ready"));
            }
            std::thread::yield_now();
        }
        self.check_identity()
    }

    pub fn check_identity(&self) -> Result<()> {
        if self.magic.load(Ordering::Acquire) != RING_MAGIC {
            return Err(Error::LayoutMismatch("ring magic mismatch"));
        }
        let version = self.version.load(Ordering::Acquire);
        if version != RING_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// Checks that an attaching participant agrees on the wire contract.
    pub fn check_contract(&self, capacity: u64, geometry: SlotGeometry, kind: u32) -> Result<()> {
        if self.capacity.load(Ordering::Acquire) != capacity {
            return Err(Error::LayoutMismatch("capacity mismatch"));
        }
        if self.record_width.load(Ordering::Acquire) as usize != geometry.width {
            return Err(Error::LayoutMismatch("record width mismatch"));
        }
        if self.record_kind.load(Ordering::Acquire) != kind {
            return Err(Error::LayoutMismatch("record field order mismatch"));
        }
        if self.slot_words.load(Ordering::Acquire) as usize != geometry.stride_words {
            return Err(Error::LayoutMismatch("slot stride mismatch"));
        }
        Ok(())
    }

    pub fn state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }
}
