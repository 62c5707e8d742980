//! Lock-free multi-producer / multi-consumer ring over a shared region.
//!
//! # Protocol
//!
//! `head` and `tail` are monotonic 64-bit positions; the slot of position `p`
//! is `p % C`. Each slot carries a stamp word that tells every participant
//! which phase the slot is in for position `p`:
//!
//! ```text
//! p              free, the producer of p may write
//! p | WRITING    producer is copying its payload in
//! p + 1          payload complete, safe to read
//! p + C          released (read, evicted or reclaimed); free for p + C
//! ```
//!
//! Producers CAS `tail` to claim a position whose slot is free, copy the
//! payload, bump `size` and publish `p + 1` with release ordering. Consumers
//! CAS `head` once `size > 0`, spin until they observe `p + 1` with acquire
//! ordering, copy the payload, drop `size` and release the slot with `p + C`.
//!
//! The sequence number of a record is its claim position plus one, so claim
//! order is total order and skipped positions show up as gaps.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::config::RingConfig;
use crate::core::backoff::Backoff;
use crate::core::layout::{
    RingHeader, SlotGeometry, HEADER_SIZE, STAMP_WRITING, STATE_CLOSED, STATE_OPEN,
    STATE_POISONED,
};
use crate::core::region::{SharedHandle, SharedRegion};
use crate::core::wait::{futex_wait, futex_wake};
use crate::core::{Error, Result};
use crate::record::{FieldBuf, Record, Sequenced};

/// What a producer does when every slot is occupied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Report FULL and leave the buffer untouched (order intake).
    #[default]
    Reject,
    /// Evict the oldest record to make room (market data).
    OverwriteOldest,
}

/// Point-in-time counters. Fields are read one by one and are not
/// consistent with each other under concurrent mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RingStats {
    pub size: u64,
    pub capacity: u64,
    pub head: u64,
    pub tail: u64,
    pub producers: u32,
    pub consumers: u32,
    pub sequence: u64,
    pub write_count: u64,
    pub read_count: u64,
    pub conflated_count: u64,
    pub evicted_count: u64,
    pub reclaimed_count: u64,
}

enum Readiness {
    Ready,
    Abandoned,
}

pub struct RingBuffer<R: Record> {
    region: Arc<SharedRegion>,
    geometry: SlotGeometry,
    capacity: u64,
    overflow: OverflowPolicy,
    ready_spin: u32,
    claim_timeout: Duration,
    _record: PhantomData<fn() -> R>,
}

/// Exclusive right to write one slot. Must be passed to
/// [`RingBuffer::commit_write`]; dropping it releases the slot unwritten.
pub struct WriteClaim<'a, R: Record> {
    ring: &'a RingBuffer<R>,
    position: u64,
    done: bool,
    _in_flight: InFlight<'a>,
}

/// Exclusive right to read one slot. Must be passed to
/// [`RingBuffer::commit_read`]; dropping it discards the record.
pub struct ReadClaim<'a, R: Record> {
    ring: &'a RingBuffer<R>,
    position: u64,
    done: bool,
    _in_flight: InFlight<'a>,
}

struct InFlight<'a> {
    counter: &'a AtomicU32,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<R: Record> RingBuffer<R> {
    /// Creates a ring in an anonymous region shared by the threads of this process.
    pub fn create(capacity: u64) -> Result<(Self, SharedHandle)> {
        Self::create_with_config(&RingConfig::with_capacity(capacity))
    }

    pub fn create_with_config(config: &RingConfig) -> Result<(Self, SharedHandle)> {
        config.validate()?;
        let geometry = SlotGeometry::for_width(R::WIDTH)?;
        let len = geometry.region_len(config.capacity)?;
        let region = SharedRegion::anonymous(len, |region| {
            initialize_region(region, config.capacity, geometry, R::KIND)
        })?;
        debug!(
            "created ring capacity={} width={} bytes={}",
            config.capacity, R::WIDTH, len
        );
        Self::finish(Arc::new(region), config, geometry)
    }

    /// Creates a file-backed ring other processes can attach to with
    /// [`SharedHandle::open`]. An existing file at `path` is replaced.
    pub fn create_file(path: impl AsRef<Path>, config: &RingConfig) -> Result<(Self, SharedHandle)> {
        config.validate()?;
        let geometry = SlotGeometry::for_width(R::WIDTH)?;
        let len = geometry.region_len(config.capacity)?;
        let region = SharedRegion::create_file(path.as_ref(), len, |region| {
            initialize_region(region, config.capacity, geometry, R::KIND)
        })?;
        debug!(
            "created ring file {} capacity={} width={}",
            path.as_ref().display(),
            config.capacity,
            R::WIDTH
        );
        Self::finish(Arc::new(region), config, geometry)
    }

    /// Attaches another participant to an existing ring. Capacity, record
    /// width and field order must match what the creator used.
    pub fn attach(handle: &SharedHandle, capacity: u64) -> Result<Self> {
        Self::attach_with_config(handle, &RingConfig::with_capacity(capacity))
    }

    pub fn attach_with_config(handle: &SharedHandle, config: &RingConfig) -> Result<Self> {
        config.validate()?;
        let geometry = SlotGeometry::for_width(R::WIDTH)?;
        let region = Arc::clone(handle.region());
        let header = region.header();
        header.wait_ready()?;
        header.check_contract(config.capacity, geometry, R::KIND)?;
        if region.len() < geometry.region_len(config.capacity)? {
            return Err(Error::LayoutMismatch("region shorter than its slot table"));
        }
        let ring = Self::from_region(region, config, geometry);
        ring.check_open()?;
        debug!("attached ring capacity={}", config.capacity);
        Ok(ring)
    }

    fn finish(
        region: Arc<SharedRegion>,
        config: &RingConfig,
        geometry: SlotGeometry,
    ) -> Result<(Self, SharedHandle)> {
        if config.memlock {
            region.lock()?;
        }
        let handle = SharedHandle::new(Arc::clone(&region));
        Ok((Self::from_region(region, config, geometry), handle))
    }

    fn from_region(region: Arc<SharedRegion>, config: &RingConfig, geometry: SlotGeometry) -> Self {
        Self {
            region,
            geometry,
            capacity: config.capacity,
            overflow: config.overflow,
            ready_spin: config.ready_spin,
            claim_timeout: config.claim_timeout(),
            _record: PhantomData,
        }
    }

    pub fn handle(&self) -> SharedHandle {
        SharedHandle::new(Arc::clone(&self.region))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> u64 {
        self.header().size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims the next slot for writing. `None` means FULL (reject policy
    /// only; the overwrite policy evicts the oldest record instead).
    pub fn claim_write(&self) -> Result<Option<WriteClaim<'_, R>>> {
        self.check_open()?;
        let in_flight = InFlight::enter(&self.header().producers);
        Ok(self.claim_tail()?.map(|position| WriteClaim {
            ring: self,
            position,
            done: false,
            _in_flight: in_flight,
        }))
    }

    /// Copies `record` into the claimed slot and publishes it. Returns the
    /// assigned sequence number, or `None` when the claim outlived the claim
    /// timeout and a consumer reclaimed the slot (the record is dropped).
    pub fn commit_write(&self, mut claim: WriteClaim<'_, R>, record: &R) -> Result<Option<u64>> {
        if !Arc::ptr_eq(&claim.ring.region, &self.region) {
            return Err(Error::Unsupported("write claim belongs to a different ring"));
        }
        claim.done = true;
        let position = claim.position;
        let stamp = self.stamp(position);
        if stamp
            .compare_exchange(
                position,
                position | STAMP_WRITING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("write claim for position {position} expired before commit; record dropped");
            return Ok(None);
        }
        fence(Ordering::Release);

        let mut fields: FieldBuf = Default::default();
        record.write_fields(&mut fields[..R::WIDTH]);
        for (index, value) in fields[..R::WIDTH].iter().enumerate() {
            self.word(position, index).store(*value, Ordering::Relaxed);
        }
        let seq = position + 1;
        self.word(position, self.geometry.sequence_word())
            .store(seq, Ordering::Relaxed);

        let header = self.header();
        let size = header.size.fetch_add(1, Ordering::AcqRel) + 1;
        if size > self.capacity {
            return Err(self.poison("size exceeded capacity"));
        }
        header.write_count.fetch_add(1, Ordering::Relaxed);
        header.sequence.fetch_max(seq, Ordering::AcqRel);
        stamp.store(position + 1, Ordering::Release);
        drop(claim);

        self.notify_one()?;
        Ok(Some(seq))
    }

    /// Claims the oldest unread slot. `None` means EMPTY.
    pub fn claim_read(&self) -> Result<Option<ReadClaim<'_, R>>> {
        self.check_open()?;
        let in_flight = InFlight::enter(&self.header().consumers);
        if self.header().size.load(Ordering::Acquire) == 0 {
            return Ok(None);
        }
        Ok(self.claim_head()?.map(|position| ReadClaim {
            ring: self,
            position,
            done: false,
            _in_flight: in_flight,
        }))
    }

    /// Waits (bounded) for the claimed slot to become ready, copies it out and
    /// frees the slot. `None` means the producer of that position never
    /// finished and the position was skipped.
    pub fn commit_read(&self, mut claim: ReadClaim<'_, R>) -> Result<Option<Sequenced<R>>> {
        if !Arc::ptr_eq(&claim.ring.region, &self.region) {
            return Err(Error::Unsupported("read claim belongs to a different ring"));
        }
        claim.done = true;
        let record = self.take(claim.position)?;
        if record.is_some() {
            self.header().read_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(record)
    }

    /// Claim + commit in one call. Retries when its claim expired.
    pub fn push(&self, record: &R) -> Result<Option<u64>> {
        loop {
            let Some(claim) = self.claim_write()? else {
                return Ok(None);
            };
            if let Some(seq) = self.commit_write(claim, record)? {
                return Ok(Some(seq));
            }
        }
    }

    /// Claim + commit in one call, skipping abandoned positions.
    pub fn pop(&self) -> Result<Option<Sequenced<R>>> {
        loop {
            let Some(claim) = self.claim_read()? else {
                return Ok(None);
            };
            if let Some(record) = self.commit_read(claim)? {
                return Ok(Some(record));
            }
        }
    }

    /// Parks the caller until a producer commits, the timeout expires or the
    /// ring closes. Returns immediately when data is already available.
    pub fn wait_for_data(&self, timeout: Duration) -> Result<()> {
        self.check_open()?;
        let header = self.header();
        header.waiters_pending.fetch_add(1, Ordering::SeqCst);
        let seq = header.notify_seq.load(Ordering::Acquire);
        if header.size.load(Ordering::SeqCst) > 0 {
            header.waiters_pending.fetch_sub(1, Ordering::SeqCst);
            return Ok(());
        }
        let res = futex_wait(&header.notify_seq, seq, Some(timeout));
        header.waiters_pending.fetch_sub(1, Ordering::SeqCst);
        res
    }

    /// Up to `count` of the newest records, newest first. Does not consume.
    /// Slots being rewritten while they are copied are left out.
    pub fn recent(&self, count: usize) -> Vec<Sequenced<R>> {
        let header = self.header();
        let tail = header.tail.load(Ordering::Acquire);
        let head = header.head.load(Ordering::Acquire);
        let mut out = Vec::with_capacity(count.min(self.capacity as usize));
        let mut position = tail;
        while position > head && out.len() < count && tail - position < self.capacity {
            position -= 1;
            if let Some(record) = self.peek(position) {
                out.push(record);
            }
        }
        out
    }

    /// The newest committed record still in the buffer.
    pub fn latest(&self) -> Option<Sequenced<R>> {
        self.recent(1).into_iter().next()
    }

    /// Counts one write suppressed by conflation.
    pub fn record_conflated(&self) {
        self.header()
            .conflated_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RingStats {
        let header = self.header();
        RingStats {
            size: header.size.load(Ordering::Acquire),
            capacity: self.capacity,
            head: header.head.load(Ordering::Acquire) % self.capacity,
            tail: header.tail.load(Ordering::Acquire) % self.capacity,
            producers: header.producers.load(Ordering::Acquire),
            consumers: header.consumers.load(Ordering::Acquire),
            sequence: header.sequence.load(Ordering::Acquire),
            write_count: header.write_count.load(Ordering::Acquire),
            read_count: header.read_count.load(Ordering::Acquire),
            conflated_count: header.conflated_count.load(Ordering::Acquire),
            evicted_count: header.evicted_count.load(Ordering::Acquire),
            reclaimed_count: header.reclaimed_count.load(Ordering::Acquire),
        }
    }

    /// Closes the ring for every attached participant and unlinks the backing
    /// file, if any. Mappings stay valid until each participant drops its own
    /// handle, so nobody touches freed memory.
    pub fn teardown(self) -> Result<()> {
        let header = self.header();
        let _ = header.state.compare_exchange(
            STATE_OPEN,
            STATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        header.notify_seq.fetch_add(1, Ordering::SeqCst);
        futex_wake(&header.notify_seq, i32::MAX)?;
        self.region.flush()?;
        if let Some(path) = self.region.path() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::Io(err)),
            }
            debug!("tore down ring file {}", path.display());
        } else {
            debug!("tore down anonymous ring");
        }
        Ok(())
    }

    fn claim_tail(&self) -> Result<Option<u64>> {
        let header = self.header();
        let mut backoff = Backoff::new();
        loop {
            if self.overflow == OverflowPolicy::Reject
                && header.size.load(Ordering::Acquire) >= self.capacity
            {
                return Ok(None);
            }
            let position = header.tail.load(Ordering::Acquire);
            self.next_lap(position)?;
            let stamp = self.stamp(position).load(Ordering::Acquire);
            if stamp == position {
                if header
                    .tail
                    .compare_exchange_weak(
                        position,
                        position + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return Ok(Some(position));
                }
                backoff.snooze();
                continue;
            }

            let base = stamp & !STAMP_WRITING;
            if base >= position {
                // Another producer took this position; our tail was stale.
                backoff.snooze();
                continue;
            }
            if base + self.capacity < position {
                return Err(self.poison("slot stamp lags tail by more than one lap"));
            }

            // The slot still belongs to position - C.
            let Some(previous) = position.checked_sub(self.capacity) else {
                return Err(self.poison("slot stamp from a lap before the first"));
            };
            if header.head.load(Ordering::Acquire) > previous {
                // A consumer is copying it out right now.
                if backoff.is_capped() {
                    self.check_open()?;
                }
                backoff.snooze();
                continue;
            }
            match self.overflow {
                OverflowPolicy::Reject => {
                    if header.tail.load(Ordering::Acquire) == position {
                        return Ok(None);
                    }
                }
                OverflowPolicy::OverwriteOldest => self.evict_oldest()?,
            }
        }
    }

    fn claim_head(&self) -> Result<Option<u64>> {
        let header = self.header();
        let mut backoff = Backoff::new();
        loop {
            let position = header.head.load(Ordering::Acquire);
            let tail = header.tail.load(Ordering::Acquire);
            if position > tail {
                return Err(self.poison("head ran past tail"));
            }
            if position == tail {
                return Ok(None);
            }
            let next_lap = self.next_lap(position)?;
            let stamp = self.stamp(position).load(Ordering::Acquire);
            let base = stamp & !STAMP_WRITING;
            if base < position {
                return Err(self.poison("slot stamp lags head"));
            }
            let claimable = stamp == position + 1 || base == position;
            let abandoned = base >= next_lap;
            if !claimable && !abandoned {
                return Err(self.poison("slot stamp outside the expected lap"));
            }
            if header
                .head
                .compare_exchange_weak(
                    position,
                    position + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                backoff.snooze();
                continue;
            }
            if claimable {
                return Ok(Some(position));
            }
            // Abandoned position: skipped, look at the next one.
            backoff.reset();
        }
    }

    fn evict_oldest(&self) -> Result<()> {
        let Some(position) = self.claim_head()? else {
            return Ok(());
        };
        if let Some(evicted) = self.take(position)? {
            self.header().evicted_count.fetch_add(1, Ordering::Relaxed);
            debug!("evicted seq {} to make room", evicted.seq);
        }
        Ok(())
    }

    /// Copies out the record at a claimed read position and frees its slot.
    fn take(&self, position: u64) -> Result<Option<Sequenced<R>>> {
        if let Readiness::Abandoned = self.await_ready(position)? {
            return Ok(None);
        }
        let mut fields: FieldBuf = Default::default();
        for (index, value) in fields[..R::WIDTH].iter_mut().enumerate() {
            *value = self.word(position, index).load(Ordering::Relaxed);
        }
        let seq = self
            .word(position, self.geometry.sequence_word())
            .load(Ordering::Relaxed);
        let record = R::read_fields(&fields[..R::WIDTH]);

        // Drop size before the slot is handed back, so a producer refilling
        // it can never push size past capacity.
        let header = self.header();
        if header
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| size.checked_sub(1))
            .is_err()
        {
            return Err(self.poison("size underflow on read"));
        }
        self.stamp(position)
            .store(position + self.capacity, Ordering::Release);
        Ok(Some(Sequenced { seq, record }))
    }

    fn await_ready(&self, position: u64) -> Result<Readiness> {
        let stamp = self.stamp(position);
        let ready = position + 1;
        let mut spins: u32 = 0;
        let mut deadline: Option<Instant> = None;
        loop {
            let current = stamp.load(Ordering::Acquire);
            if current == ready {
                return Ok(Readiness::Ready);
            }
            let base = current & !STAMP_WRITING;
            if base >= position + self.capacity {
                return Ok(Readiness::Abandoned);
            }
            if base != position {
                return Err(self.poison("slot stamp moved under a read claim"));
            }
            if spins < self.ready_spin {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }

            self.check_open()?;
            let now = Instant::now();
            let expires = *deadline.get_or_insert(now + self.claim_timeout);
            // A producer mid-copy is never reclaimed; its copy has no blocking calls.
            if now >= expires && current & STAMP_WRITING == 0 && self.reclaim(position) {
                return Ok(Readiness::Abandoned);
            }
            std::thread::yield_now();
        }
    }

    /// Releases a claimed-but-unwritten position so the slot can be reused.
    fn reclaim(&self, position: u64) -> bool {
        let released = self
            .stamp(position)
            .compare_exchange(
                position,
                position + self.capacity,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if released {
            self.header()
                .reclaimed_count
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                "reclaimed slot {} (position {position}) from a stalled producer",
                position % self.capacity
            );
        }
        released
    }

    fn peek(&self, position: u64) -> Option<Sequenced<R>> {
        let stamp = self.stamp(position);
        let ready = position + 1;
        if stamp.load(Ordering::Acquire) != ready {
            return None;
        }
        let mut fields: FieldBuf = Default::default();
        for (index, value) in fields[..R::WIDTH].iter_mut().enumerate() {
            *value = self.word(position, index).load(Ordering::Relaxed);
        }
        let seq = self
            .word(position, self.geometry.sequence_word())
            .load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        if stamp.load(Ordering::Relaxed) != ready {
            return None;
        }
        Some(Sequenced {
            seq,
            record: R::read_fields(&fields[..R::WIDTH]),
        })
    }

    fn notify_one(&self) -> Result<()> {
        let header = self.header();
        header.notify_seq.fetch_add(1, Ordering::SeqCst);
        // Only pay for the syscall when someone is parked.
        if header.waiters_pending.load(Ordering::SeqCst) > 0 {
            futex_wake(&header.notify_seq, 1)?;
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        match self.header().state() {
            STATE_OPEN => Ok(()),
            STATE_CLOSED => Err(Error::Closed),
            _ => Err(Error::CorruptedSharedState(
                "ring poisoned by an earlier invariant violation",
            )),
        }
    }

    fn poison(&self, reason: &'static str) -> Error {
        let header = self.header();
        if header.state.swap(STATE_POISONED, Ordering::AcqRel) != STATE_POISONED {
            error!("ring buffer stopped: {reason}");
            header.notify_seq.fetch_add(1, Ordering::SeqCst);
            let _ = futex_wake(&header.notify_seq, i32::MAX);
        }
        Error::CorruptedSharedState(reason)
    }

    /// Position of the same slot one lap later. Every position handed out by
    /// `claim_tail`/`claim_head` passed this check, so `position + 1` and
    /// `position + capacity` cannot overflow afterwards.
    fn next_lap(&self, position: u64) -> Result<u64> {
        position
            .checked_add(self.capacity)
            .ok_or_else(|| self.poison("position overflow"))
    }

    fn header(&self) -> &RingHeader {
        self.region.header()
    }

    fn stamp(&self, position: u64) -> &AtomicU64 {
        self.word(position, self.geometry.stamp_word())
    }

    fn word(&self, position: u64, word: usize) -> &AtomicU64 {
        let slot = (position % self.capacity) as usize;
        self.region
            .word(HEADER_SIZE + slot * self.geometry.stride_bytes() + word * 8)
    }

    fn abandon(&self, position: u64) {
        if self
            .stamp(position)
            .compare_exchange(
                position,
                position + self.capacity,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.header()
                .reclaimed_count
                .fetch_add(1, Ordering::Relaxed);
            warn!("write claim for position {position} dropped uncommitted; slot released");
        }
    }
}

impl<R: Record> WriteClaim<'_, R> {
    pub fn slot(&self) -> usize {
        (self.position % self.ring.capacity) as usize
    }

    /// Monotonic claim position; the committed record gets `position + 1` as its sequence.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Record> Drop for WriteClaim<'_, R> {
    fn drop(&mut self) {
        if !self.done {
            self.ring.abandon(self.position);
        }
    }
}

impl<R: Record> ReadClaim<'_, R> {
    pub fn slot(&self) -> usize {
        (self.position % self.ring.capacity) as usize
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Record> Drop for ReadClaim<'_, R> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        match self.ring.take(self.position) {
            Ok(Some(record)) => {
                warn!("read claim dropped uncommitted; discarded seq {}", record.seq)
            }
            Ok(None) => {}
            Err(err) => error!("failed to release dropped read claim: {err}"),
        }
    }
}

fn initialize_region(region: &SharedRegion, capacity: u64, geometry: SlotGeometry, kind: u32) {
    let header = region.header();
    header.initialize(capacity, geometry, kind);
    for slot in 0..capacity as usize {
        let offset = HEADER_SIZE + slot * geometry.stride_bytes() + geometry.stamp_word() * 8;
        region.word(offset).store(slot as u64, Ordering::Relaxed);
    }
    header.publish_ready();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{OrderRecord, TickRecord};

    fn tick(n: u64) -> TickRecord {
        TickRecord {
            sequence: n,
            bid_price_bits: (n as f64).to_bits(),
            ask_price_bits: (n as f64 + 0.5).to_bits(),
            ..TickRecord::default()
        }
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let (ring, _handle) = RingBuffer::<TickRecord>::create(8).expect("create");
        let record = tick(11);
        let claim = ring.claim_write().expect("claim").expect("not full");
        assert_eq!(claim.slot(), 0);
        let seq = ring.commit_write(claim, &record).expect("commit");
        assert_eq!(seq, Some(1));

        let claim = ring.claim_read().expect("claim").expect("not empty");
        let read = ring.commit_read(claim).expect("commit").expect("ready");
        assert_eq!(read.record, record);
        assert_eq!(read.seq, 1);
        assert!(ring.claim_read().expect("claim").is_none());
    }

    #[test]
    fn reject_policy_reports_full() {
        let (ring, _handle) = RingBuffer::<TickRecord>::create(4).expect("create");
        for n in 0..4 {
            assert!(ring.push(&tick(n)).expect("push").is_some());
        }
        assert!(ring.claim_write().expect("claim").is_none());
        assert_eq!(ring.stats().size, 4);
        assert_eq!(ring.stats().producers, 0);
    }

    #[test]
    fn overwrite_policy_evicts_oldest() {
        let config = RingConfig {
            overflow: OverflowPolicy::OverwriteOldest,
            ..RingConfig::with_capacity(4)
        };
        let (ring, _handle) = RingBuffer::<TickRecord>::create_with_config(&config).expect("create");
        for n in 1..=5 {
            ring.push(&tick(n)).expect("push").expect("always accepts");
        }
        let stats = ring.stats();
        assert_eq!(stats.size, 4);
        assert_eq!(stats.evicted_count, 1);
        assert_eq!(stats.head, 1);
        assert_eq!(stats.tail, 1);
        let recent: Vec<u64> = ring.recent(10).iter().map(|r| r.record.sequence).collect();
        assert_eq!(recent, vec![5, 4, 3, 2]);
    }

    #[test]
    fn dropped_write_claim_is_skipped_by_readers() {
        let (ring, _handle) = RingBuffer::<TickRecord>::create(4).expect("create");
        let claim = ring.claim_write().expect("claim").expect("slot");
        drop(claim);
        ring.push(&tick(2)).expect("push");

        let popped = ring.pop().expect("pop").expect("record");
        assert_eq!(popped.record.sequence, 2);
        assert_eq!(popped.seq, 2, "skipped position leaves a sequence gap");
        assert_eq!(ring.stats().reclaimed_count, 1);
    }

    #[test]
    fn stalled_producer_is_reclaimed_after_timeout() {
        let config = RingConfig {
            claim_timeout_ms: 20,
            ready_spin: 16,
            ..RingConfig::with_capacity(4)
        };
        let (ring, _handle) = RingBuffer::<TickRecord>::create_with_config(&config).expect("create");
        let stalled = ring.claim_write().expect("claim").expect("slot");
        ring.push(&tick(9)).expect("push");

        let start = Instant::now();
        let first = ring.claim_read().expect("claim").expect("size is 1");
        assert_eq!(first.position(), 0);
        assert!(ring.commit_read(first).expect("commit").is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));

        let late = ring.commit_write(stalled, &tick(1)).expect("commit");
        assert_eq!(late, None, "late producer loses its reclaimed slot");

        let next = ring.pop().expect("pop").expect("record");
        assert_eq!(next.record.sequence, 9);
        assert_eq!(ring.stats().reclaimed_count, 1);
        assert_eq!(ring.stats().size, 0);
    }

    #[test]
    fn attach_rejects_mismatched_contract() {
        let (ring, handle) = RingBuffer::<TickRecord>::create(8).expect("create");
        assert!(matches!(
            RingBuffer::<TickRecord>::attach(&handle, 16),
            Err(Error::LayoutMismatch(_))
        ));
        assert!(matches!(
            RingBuffer::<OrderRecord>::attach(&handle, 8),
            Err(Error::LayoutMismatch(_))
        ));
        let attached = RingBuffer::<TickRecord>::attach(&handle, 8).expect("attach");
        attached.push(&tick(3)).expect("push");
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn corrupted_metadata_poisons_every_participant() {
        let (ring, handle) = RingBuffer::<TickRecord>::create(4).expect("create");
        let other = RingBuffer::<TickRecord>::attach(&handle, 4).expect("attach");
        ring.push(&tick(1)).expect("push");
        // Simulate external memory corruption: head jumps past tail.
        ring.header().head.store(100, Ordering::Release);

        assert!(matches!(ring.pop(), Err(Error::CorruptedSharedState(_))));
        assert!(matches!(other.push(&tick(2)), Err(Error::CorruptedSharedState(_))));
        assert!(matches!(other.claim_read(), Err(Error::CorruptedSharedState(_))));
    }

    #[test]
    fn positions_near_the_end_of_u64_poison_instead_of_wrapping() {
        let (ring, handle) = RingBuffer::<TickRecord>::create(4).expect("create");
        let other = RingBuffer::<TickRecord>::attach(&handle, 4).expect("attach");
        ring.header().tail.store(u64::MAX - 1, Ordering::Release);
        ring.header().head.store(u64::MAX - 1, Ordering::Release);

        assert!(matches!(ring.push(&tick(1)), Err(Error::CorruptedSharedState(_))));
        assert!(matches!(other.pop(), Err(Error::CorruptedSharedState(_))));
    }

    #[test]
    fn teardown_closes_attached_instances() {
        let (ring, handle) = RingBuffer::<TickRecord>::create(4).expect("create");
        let other = RingBuffer::<TickRecord>::attach(&handle, 4).expect("attach");
        ring.teardown().expect("teardown");
        assert!(matches!(other.push(&tick(1)), Err(Error::Closed)));
        assert!(matches!(
            RingBuffer::<TickRecord>::attach(&handle, 4),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn recent_skips_nothing_and_caps_count() {
        let (ring, _handle) = RingBuffer::<TickRecord>::create(8).expect("create");
        assert!(ring.latest().is_none());
        for n in 1..=3 {
            ring.push(&tick(n)).expect("push");
        }
        let recent: Vec<u64> = ring.recent(2).iter().map(|r| r.seq).collect();
        assert_eq!(recent, vec![3, 2]);
        assert_eq!(ring.latest().map(|r| r.record.sequence), Some(3));
        assert_eq!(ring.len(), 3, "peeking does not consume");
    }
}
