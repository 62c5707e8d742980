//! One worker thread per subscriber, fed through a bounded channel.
//!
//! The publisher only ever calls `try_send`, so a slow or stuck subscriber
//! fills its own channel and loses its own deliveries; nobody else waits.
//! Stopping a worker never joins it: queued deliveries are skipped and a
//! callback already running finishes on the detached thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};

use crate::core::Result;
use crate::distribution::{Subscriber, SubscriptionId};
use crate::record::Sequenced;

pub(crate) enum Delivery<R> {
    Snapshot(Option<Sequenced<R>>),
    Update(Sequenced<R>),
}

#[derive(Debug, Default)]
pub(crate) struct FanoutCounters {
    pub failures: AtomicU64,
    pub dropped: AtomicU64,
}

pub(crate) struct SubscriberWorker<R> {
    id: SubscriptionId,
    key: Arc<str>,
    sender: Option<Sender<Delivery<R>>>,
    stop: Arc<AtomicBool>,
    dropped: AtomicU64,
    counters: Arc<FanoutCounters>,
}

impl<R: Send + 'static> SubscriberWorker<R> {
    pub(crate) fn spawn(
        key: Arc<str>,
        id: SubscriptionId,
        subscriber: Arc<dyn Subscriber<R>>,
        depth: usize,
        counters: Arc<FanoutCounters>,
    ) -> Result<Self> {
        let (sender, receiver) = bounded(depth);
        let worker_key = Arc::clone(&key);
        let worker_counters = Arc::clone(&counters);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        // Detached: the handle is dropped and the thread exits on its own.
        thread::Builder::new()
            .name(format!("conduit-fanout-{}", id.0))
            .spawn(move || run(worker_key, id, subscriber, receiver, worker_stop, worker_counters))?;
        Ok(Self {
            id,
            key,
            sender: Some(sender),
            stop,
            dropped: AtomicU64::new(0),
            counters,
        })
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Queues a delivery without blocking. Returns false if it was dropped.
    pub(crate) fn deliver(&self, delivery: Delivery<R>) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1024 == 0 {
                    warn!(
                        "subscriber {} on {} is falling behind; {} deliveries dropped",
                        self.id.0, self.key, dropped
                    );
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Discards queued deliveries and lets the worker exit. Returns immediately.
    pub(crate) fn stop(self) {
        drop(self);
    }
}

impl<R> Drop for SubscriberWorker<R> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.sender.take();
    }
}

fn run<R>(
    key: Arc<str>,
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber<R>>,
    receiver: Receiver<Delivery<R>>,
    stop: Arc<AtomicBool>,
    counters: Arc<FanoutCounters>,
) {
    for delivery in receiver.iter() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| match &delivery {
            Delivery::Snapshot(snapshot) => subscriber.on_snapshot(&key, snapshot.as_ref()),
            Delivery::Update(update) => subscriber.on_update(&key, update),
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("subscriber {} on {key} failed: {err:#}", id.0);
            }
            Err(_) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("subscriber {} on {key} panicked", id.0);
            }
        }
    }
    debug!("fan-out worker for subscriber {} on {key} stopped", id.0);
}
