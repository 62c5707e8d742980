//! Per-key market-data distribution.
//!
//! Each key owns an overwrite-oldest ring holding its recent history, the
//! latest true value (conflated updates included) and a set of subscribers.
//! `publish` runs conflation, writes the ring and hands the update to every
//! subscriber's worker without waiting on any of them.

pub mod fanout;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use crate::config::DistributorConfig;
use crate::conflation::ConflationPolicy;
use crate::core::{Clock, Error, QuantaClock, Result, RingBuffer, RingStats};
use crate::record::{Record, Sequenced};

use fanout::{Delivery, FanoutCounters, SubscriberWorker};

/// Receives updates for the keys it subscribed to. Callbacks run on a
/// dedicated worker thread per subscription; errors and panics are counted
/// and logged, never propagated to the publisher.
pub trait Subscriber<R>: Send + Sync {
    fn on_update(&self, key: &str, update: &Sequenced<R>) -> anyhow::Result<()>;

    /// Called once right after subscribing. `None` means the key has no value yet.
    fn on_snapshot(&self, key: &str, snapshot: Option<&Sequenced<R>>) -> anyhow::Result<()> {
        match snapshot {
            Some(snapshot) => self.on_update(key, snapshot),
            None => Ok(()),
        }
    }
}

impl<R, F> Subscriber<R> for F
where
    F: Fn(&str, &Sequenced<R>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_update(&self, key: &str, update: &Sequenced<R>) -> anyhow::Result<()> {
        self(key, update)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Written to the key's ring with this sequence number.
    Written(u64),
    /// Redundant with the previous update; only the latest value changed.
    Conflated,
}

struct KeyState<R: Record> {
    name: Arc<str>,
    ring: RingBuffer<R>,
    /// Held across the ring push so that sequence order, `latest` and the
    /// order each subscriber receives updates in all agree. Keys never share it.
    inner: Mutex<KeyInner<R>>,
}

struct KeyInner<R> {
    /// Carries the sequence of the last record that reached the ring.
    latest: Option<Sequenced<R>>,
    last_write_ns: u64,
    subscribers: Vec<SubscriberWorker<R>>,
}

impl<R: Record> KeyState<R> {
    fn lock(&self) -> MutexGuard<'_, KeyInner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Distributor<R: Record, C: Clock = QuantaClock> {
    config: DistributorConfig,
    policy: ConflationPolicy,
    conflation_enabled: AtomicBool,
    clock: C,
    keys: DashMap<String, Arc<KeyState<R>>>,
    next_subscription: AtomicU64,
    counters: Arc<FanoutCounters>,
    closed: AtomicBool,
}

impl<R: Record> Distributor<R, QuantaClock> {
    pub fn new(config: DistributorConfig) -> Result<Self> {
        Self::with_clock(config, QuantaClock::new())
    }
}

impl<R: Record, C: Clock> Distributor<R, C> {
    pub fn with_clock(config: DistributorConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let distributor = Self {
            policy: ConflationPolicy::new(config.conflation_window()),
            conflation_enabled: AtomicBool::new(config.conflation_enabled),
            clock,
            keys: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            counters: Arc::new(FanoutCounters::default()),
            closed: AtomicBool::new(false),
            config,
        };
        for key in distributor.config.keys.clone() {
            distributor.register_key(&key)?;
        }
        Ok(distributor)
    }

    /// Creates the key's ring up front. Publishing to an unknown key does the same lazily.
    pub fn register_key(&self, key: &str) -> Result<()> {
        self.key_state(key).map(|_| ())
    }

    pub fn publish(&self, key: &str, record: &R) -> Result<PublishOutcome> {
        self.check_open()?;
        let state = self.key_state(key)?;
        let mut inner = state.lock();
        let now = self.clock.now();

        if self.conflation_enabled() {
            if let Some(latest) = inner.latest {
                let elapsed = now.saturating_sub(inner.last_write_ns);
                if self
                    .policy
                    .should_conflate(record, Some(&latest.record), elapsed)
                {
                    inner.latest = Some(Sequenced {
                        seq: latest.seq,
                        record: *record,
                    });
                    state.ring.record_conflated();
                    return Ok(PublishOutcome::Conflated);
                }
            }
        }

        let seq = state
            .ring
            .push(record)?
            .ok_or(Error::CorruptedSharedState("overwrite ring reported full"))?;
        let update = Sequenced {
            seq,
            record: *record,
        };
        inner.latest = Some(update);
        inner.last_write_ns = now;
        // Fan out under the key lock so every subscriber sees one key's
        // updates in sequence order.
        for subscriber in &inner.subscribers {
            subscriber.deliver(Delivery::Update(update));
        }
        Ok(PublishOutcome::Written(seq))
    }

    /// Registers `subscriber` and queues a snapshot of the key's latest value
    /// as its first delivery.
    pub fn subscribe(&self, key: &str, subscriber: Arc<dyn Subscriber<R>>) -> Result<SubscriptionId> {
        self.check_open()?;
        let state = self.key_state(key)?;
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let worker = SubscriberWorker::spawn(
            Arc::clone(&state.name),
            id,
            subscriber,
            self.config.subscriber_queue_depth,
            Arc::clone(&self.counters),
        )?;
        let mut inner = state.lock();
        worker.deliver(Delivery::Snapshot(inner.latest));
        inner.subscribers.push(worker);
        debug!("subscriber {} joined {key}", id.0);
        Ok(id)
    }

    /// Removes a subscription. Deliveries still queued for it are discarded;
    /// a callback already running finishes on its worker thread.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let Some(state) = self.existing(key) else {
            return false;
        };
        let removed = {
            let mut inner = state.lock();
            let index = inner.subscribers.iter().position(|worker| worker.id() == id);
            index.map(|index| inner.subscribers.swap_remove(index))
        };
        match removed {
            Some(worker) => {
                worker.stop();
                debug!("subscriber {} left {key}", id.0);
                true
            }
            None => false,
        }
    }

    /// The most recent value published for `key`, conflated or not.
    pub fn get_latest(&self, key: &str) -> Option<R> {
        let state = self.existing(key)?;
        let inner = state.lock();
        inner.latest.map(|latest| latest.record)
    }

    /// Up to `count` records from the key's ring, newest first.
    pub fn get_history(&self, key: &str, count: usize) -> Vec<Sequenced<R>> {
        self.existing(key)
            .map(|state| state.ring.recent(count))
            .unwrap_or_default()
    }

    pub fn set_conflation(&self, enabled: bool) {
        self.conflation_enabled.store(enabled, Ordering::Release);
        debug!("conflation {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn conflation_enabled(&self) -> bool {
        self.conflation_enabled.load(Ordering::Acquire)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self, key: &str) -> Option<RingStats> {
        self.existing(key).map(|state| state.ring.stats())
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.existing(key)
            .map(|state| state.lock().subscribers.len())
            .unwrap_or(0)
    }

    /// Callbacks that returned an error or panicked, across all subscribers.
    pub fn delivery_failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    /// Updates dropped because a subscriber's queue was full.
    pub fn dropped_deliveries(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting publishes and subscriptions and tells every fan-out
    /// worker to exit without waiting for it. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let states: Vec<Arc<KeyState<R>>> = self
            .keys
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut stopped = 0usize;
        for state in states {
            let workers = std::mem::take(&mut state.lock().subscribers);
            stopped += workers.len();
            for worker in workers {
                worker.stop();
            }
        }
        debug!("distributor shut down; stopped {stopped} subscribers");
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn existing(&self, key: &str) -> Option<Arc<KeyState<R>>> {
        self.keys.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn key_state(&self, key: &str) -> Result<Arc<KeyState<R>>> {
        if let Some(state) = self.existing(key) {
            return Ok(state);
        }
        if key.is_empty() {
            return Err(Error::InvalidRecord("empty distribution key".to_string()));
        }
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let (ring, _handle) = RingBuffer::create_with_config(&self.config.ring_config())?;
                let state = Arc::new(KeyState {
                    name: Arc::from(key),
                    ring,
                    inner: Mutex::new(KeyInner {
                        latest: None,
                        last_write_ns: 0,
                        subscribers: Vec::new(),
                    }),
                });
                entry.insert(Arc::clone(&state));
                debug!(
                    "registered key {key} with history depth {}",
                    self.config.ring_capacity
                );
                Ok(state)
            }
        }
    }
}

impl<R: Record, C: Clock> Drop for Distributor<R, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
