use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use conduit::{
    Distributor, DistributorConfig, ManualClock, PublishOutcome, Sequenced, Subscriber, Tick,
    TickRecord,
};

fn quote(seq: u64, bid: f64, ask: f64) -> TickRecord {
    TickRecord::encode(&Tick {
        sequence: seq,
        timestamp_ns: 1_700_000_000_000_000_000 + seq,
        bid_price: bid,
        bid_size: 1.0,
        ask_price: ask,
        ask_size: 1.0,
        last_price: bid,
        volume: 10.0,
        flags: 0,
    })
    .expect("valid tick")
}

fn distributor(capacity: u64, clock: ManualClock) -> Distributor<TickRecord, ManualClock> {
    let config = DistributorConfig {
        ring_capacity: capacity,
        ..DistributorConfig::default()
    };
    Distributor::with_clock(config, clock).expect("distributor")
}

enum Event {
    Snapshot(Option<u64>),
    Update(u64),
}

struct Recorder {
    events: Sender<Event>,
}

impl Subscriber<TickRecord> for Recorder {
    fn on_update(&self, _key: &str, update: &Sequenced<TickRecord>) -> anyhow::Result<()> {
        self.events.send(Event::Update(update.record.sequence))?;
        Ok(())
    }

    fn on_snapshot(&self, _key: &str, snapshot: Option<&Sequenced<TickRecord>>) -> anyhow::Result<()> {
        self.events
            .send(Event::Snapshot(snapshot.map(|s| s.record.sequence)))?;
        Ok(())
    }
}

fn recorder() -> (Arc<Recorder>, Receiver<Event>) {
    let (tx, rx) = unbounded();
    (Arc::new(Recorder { events: tx }), rx)
}

fn next(rx: &Receiver<Event>) -> Event {
    rx.recv_timeout(Duration::from_secs(5)).expect("delivery")
}

#[test]
fn unchanged_quote_conflates_ninety_nine_of_one_hundred() -> conduit::Result<()> {
    let dist = distributor(64, ManualClock::stepping(0, 1_000));
    for n in 1..=100 {
        dist.publish("BTC-USD", &quote(n, 100.0, 100.5))?;
        let latest = dist.get_latest("BTC-USD").expect("latest");
        assert_eq!(latest.bid_price(), 100.0);
        assert_eq!(latest.ask_price(), 100.5);
        assert_eq!(latest.sequence, n, "latest tracks the newest publish");
    }
    let stats = dist.stats("BTC-USD").expect("stats");
    assert_eq!(stats.write_count, 1);
    assert_eq!(stats.conflated_count, 99);
    assert_eq!(stats.size, 1);
    Ok(())
}

#[test]
fn history_keeps_newest_four_of_five() -> conduit::Result<()> {
    let dist = distributor(4, ManualClock::new(0));
    dist.set_conflation(false);
    for n in 1..=5 {
        let outcome = dist.publish("ETH-USD", &quote(n, 3_000.0 + n as f64, 3_001.0 + n as f64))?;
        assert_eq!(outcome, PublishOutcome::Written(n));
    }
    let history: Vec<u64> = dist
        .get_history("ETH-USD", 4)
        .iter()
        .map(|entry| entry.record.sequence)
        .collect();
    assert_eq!(history, vec![5, 4, 3, 2]);
    assert_eq!(dist.get_history("ETH-USD", 10).len(), 4);
    assert_eq!(dist.get_history("ETH-USD", 2).len(), 2);
    let stats = dist.stats("ETH-USD").expect("stats");
    assert_eq!(stats.size, 4);
    assert_eq!(stats.evicted_count, 1);
    Ok(())
}

#[test]
fn burst_of_identical_quotes_is_mostly_conflated() -> conduit::Result<()> {
    // 100ns per clock read: ten thousand publishes span one millisecond.
    let dist = distributor(1024, ManualClock::stepping(0, 100));
    for n in 0..10_000 {
        dist.publish("SOL-USD", &quote(n, 150.0, 150.01))?;
    }
    let stats = dist.stats("SOL-USD").expect("stats");
    assert!(stats.conflated_count >= 9_900, "conflated {}", stats.conflated_count);
    assert_eq!(stats.conflated_count + stats.write_count, 10_000);
    Ok(())
}

#[test]
fn subscribe_delivers_snapshot_first() -> conduit::Result<()> {
    let dist = distributor(16, ManualClock::new(0));

    let (early, early_rx) = recorder();
    dist.subscribe("BTC-USD", early)?;
    assert!(matches!(next(&early_rx), Event::Snapshot(None)));

    dist.publish("BTC-USD", &quote(1, 100.0, 100.5))?;
    assert!(matches!(next(&early_rx), Event::Update(1)));

    let (late, late_rx) = recorder();
    dist.subscribe("BTC-USD", late)?;
    assert!(matches!(next(&late_rx), Event::Snapshot(Some(1))));

    dist.publish("BTC-USD", &quote(2, 100.25, 100.5))?;
    assert!(matches!(next(&early_rx), Event::Update(2)));
    assert!(matches!(next(&late_rx), Event::Update(2)));
    assert_eq!(dist.subscriber_count("BTC-USD"), 2);
    Ok(())
}

#[test]
fn failing_subscriber_does_not_affect_others() -> conduit::Result<()> {
    let dist = distributor(16, ManualClock::new(0));
    dist.set_conflation(false);

    let failing: Arc<dyn Subscriber<TickRecord>> =
        Arc::new(|_key: &str, update: &Sequenced<TickRecord>| -> anyhow::Result<()> {
            if update.record.sequence % 2 == 0 {
                panic!("subscriber bug");
            }
            anyhow::bail!("downstream unavailable")
        });
    dist.subscribe("BTC-USD", failing)?;

    let (healthy, healthy_rx) = recorder();
    dist.subscribe("BTC-USD", healthy)?;
    assert!(matches!(next(&healthy_rx), Event::Snapshot(None)));

    for n in 1..=4 {
        assert_eq!(
            dist.publish("BTC-USD", &quote(n, 100.0 + n as f64, 101.0 + n as f64))?,
            PublishOutcome::Written(n)
        );
    }
    for n in 1..=4 {
        assert!(matches!(next(&healthy_rx), Event::Update(seq) if seq == n));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while dist.delivery_failures() < 4 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(dist.delivery_failures(), 4);
    dist.shutdown();
    Ok(())
}

#[test]
fn slow_subscriber_loses_only_its_own_deliveries() -> conduit::Result<()> {
    let config = DistributorConfig {
        ring_capacity: 64,
        conflation_enabled: false,
        subscriber_queue_depth: 2,
        ..DistributorConfig::default()
    };
    let dist: Distributor<TickRecord, ManualClock> =
        Distributor::with_clock(config, ManualClock::new(0))?;

    let gate = Arc::new(Barrier::new(2));
    let slow_seen = Arc::new(AtomicUsize::new(0));
    let slow: Arc<dyn Subscriber<TickRecord>> = {
        let gate = Arc::clone(&gate);
        let slow_seen = Arc::clone(&slow_seen);
        Arc::new(move |_key: &str, _update: &Sequenced<TickRecord>| -> anyhow::Result<()> {
            if slow_seen.fetch_add(1, Ordering::SeqCst) == 0 {
                gate.wait();
            }
            Ok(())
        })
    };
    dist.subscribe("BTC-USD", slow)?;
    let (fast, fast_rx) = recorder();
    dist.subscribe("BTC-USD", fast)?;
    assert!(matches!(next(&fast_rx), Event::Snapshot(None)));

    for n in 1..=20 {
        dist.publish("BTC-USD", &quote(n, 100.0 + n as f64, 200.0))?;
        assert!(matches!(next(&fast_rx), Event::Update(seq) if seq == n));
    }
    assert!(dist.dropped_deliveries() > 0);

    gate.wait();
    dist.shutdown();
    let delivered = slow_seen.load(Ordering::SeqCst);
    assert!(delivered < 20, "slow subscriber saw {delivered}");
    Ok(())
}

#[test]
fn concurrent_publishers_get_unique_increasing_sequences() -> conduit::Result<()> {
    let dist = Arc::new(distributor(8_192, ManualClock::new(0)));
    dist.set_conflation(false);
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let dist = Arc::clone(&dist);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> conduit::Result<Vec<u64>> {
                barrier.wait();
                let mut seqs = Vec::new();
                for n in 0..1_000 {
                    let px = (t * 10_000 + n) as f64;
                    if let PublishOutcome::Written(seq) = dist.publish("ES", &quote(n, px, px + 1.0))? {
                        seqs.push(seq);
                    }
                }
                Ok(seqs)
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let seqs = handle.join().expect("publisher panicked")?;
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        all.extend(seqs);
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 4_000);
    assert_eq!(all.first(), Some(&1));
    assert_eq!(all.last(), Some(&4_000));
    Ok(())
}

fn sleepy(pause: Duration) -> (Arc<dyn Subscriber<TickRecord>>, Receiver<u64>, Arc<AtomicUsize>) {
    let (started_tx, started_rx) = unbounded();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let subscriber: Arc<dyn Subscriber<TickRecord>> =
        Arc::new(move |_key: &str, update: &Sequenced<TickRecord>| -> anyhow::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = started_tx.send(update.seq);
            thread::sleep(pause);
            Ok(())
        });
    (subscriber, started_rx, calls)
}

#[test]
fn unsubscribe_returns_while_the_subscriber_is_busy() -> conduit::Result<()> {
    let dist = distributor(16, ManualClock::new(0));
    dist.set_conflation(false);
    let (slow, started, calls) = sleepy(Duration::from_millis(300));
    let id = dist.subscribe("BTC-USD", slow)?;
    for n in 1..=5 {
        dist.publish("BTC-USD", &quote(n, 100.0 + n as f64, 200.0))?;
    }
    assert_eq!(started.recv_timeout(Duration::from_secs(5)).expect("first update"), 1);

    let begun = Instant::now();
    assert!(dist.unsubscribe("BTC-USD", id));
    let took = begun.elapsed();
    assert!(took < Duration::from_millis(100), "unsubscribe blocked for {took:?}");

    // The callback in progress finishes; the four queued behind it are discarded.
    thread::sleep(Duration::from_millis(500));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dist.subscriber_count("BTC-USD"), 0);
    Ok(())
}

#[test]
fn shutdown_and_drop_do_not_wait_for_a_stuck_subscriber() -> conduit::Result<()> {
    let dist = distributor(16, ManualClock::new(0));
    let (stuck, started, _calls) = sleepy(Duration::from_secs(2));
    dist.subscribe("BTC-USD", stuck)?;
    dist.publish("BTC-USD", &quote(1, 100.0, 100.5))?;
    started.recv_timeout(Duration::from_secs(5)).expect("first update");

    let begun = Instant::now();
    dist.shutdown();
    drop(dist);
    let took = begun.elapsed();
    assert!(took < Duration::from_millis(100), "shutdown blocked for {took:?}");
    Ok(())
}
