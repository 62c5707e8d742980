//! Bounded order intake queue over a reject-on-full ring.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::QueueConfig;
use crate::core::{Result, RingBuffer, RingStats, SharedHandle};
use crate::record::{Order, OrderRecord, Record, Sequenced};

pub type OrderQueue = RecordQueue<OrderRecord>;

pub struct RecordQueue<R: Record> {
    ring: RingBuffer<R>,
    poll_interval: Duration,
}

impl<R: Record> RecordQueue<R> {
    pub fn new(config: &QueueConfig) -> Result<(Self, SharedHandle)> {
        let (ring, handle) = RingBuffer::create_with_config(&config.ring_config())?;
        Ok((Self::from_ring(ring, config), handle))
    }

    pub fn with_capacity(capacity: u64) -> Result<(Self, SharedHandle)> {
        Self::new(&QueueConfig::with_capacity(capacity))
    }

    /// File-backed queue other processes can attach to.
    pub fn create_file(path: impl AsRef<Path>, config: &QueueConfig) -> Result<(Self, SharedHandle)> {
        let (ring, handle) = RingBuffer::create_file(path, &config.ring_config())?;
        Ok((Self::from_ring(ring, config), handle))
    }

    pub fn attach(handle: &SharedHandle, config: &QueueConfig) -> Result<Self> {
        let ring = RingBuffer::attach_with_config(handle, &config.ring_config())?;
        Ok(Self::from_ring(ring, config))
    }

    fn from_ring(ring: RingBuffer<R>, config: &QueueConfig) -> Self {
        Self {
            ring,
            poll_interval: config.poll_interval(),
        }
    }

    /// False when the queue is full.
    pub fn enqueue(&self, record: &R) -> Result<bool> {
        Ok(self.try_enqueue(record)?.is_some())
    }

    /// Like `enqueue`, but returns the assigned sequence number.
    pub fn try_enqueue(&self, record: &R) -> Result<Option<u64>> {
        self.ring.push(record)
    }

    /// Enqueues in order and stops at the first FULL. Returns how many made it in.
    pub fn enqueue_batch(&self, records: &[R]) -> Result<usize> {
        for (count, record) in records.iter().enumerate() {
            if self.try_enqueue(record)?.is_none() {
                return Ok(count);
            }
        }
        Ok(records.len())
    }

    pub fn dequeue(&self) -> Result<Option<Sequenced<R>>> {
        self.ring.pop()
    }

    /// Blocks for up to `timeout`. `None` only once the whole budget passed
    /// without a record becoming available.
    pub fn dequeue_wait(&self, timeout: Duration) -> Result<Option<Sequenced<R>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.ring.pop()? {
                return Ok(Some(record));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.ring
                .wait_for_data((deadline - now).min(self.poll_interval))?;
        }
    }

    /// Up to `max` records, oldest first. Stops early when the queue drains.
    pub fn dequeue_batch(&self, max: usize) -> Result<Vec<Sequenced<R>>> {
        let mut out = Vec::with_capacity(max.min(self.ring.capacity() as usize));
        while out.len() < max {
            match self.ring.pop()? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> u64 {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    pub fn handle(&self) -> SharedHandle {
        self.ring.handle()
    }

    pub fn teardown(self) -> Result<()> {
        self.ring.teardown()
    }
}

impl RecordQueue<OrderRecord> {
    /// Validates and encodes `order` first; an invalid order never claims a slot.
    pub fn enqueue_order(&self, order: &Order) -> Result<bool> {
        let record = OrderRecord::encode(order)?;
        self.enqueue(&record)
    }
}
