use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use conduit::record::{OrderKind, OrderStatus, Side};
use conduit::{Order, OrderQueue, OrderRecord};

fn order(id: u128) -> OrderRecord {
    OrderRecord::encode(&Order {
        symbol: "BTC-USD".to_string(),
        side: Side::Buy,
        kind: OrderKind::Limit,
        quantity: 1.0,
        price: 50_000.0,
        timestamp_ns: 1_700_000_000_000_000_000 + id as u64,
        status: OrderStatus::New,
        venue: "SIM".to_string(),
        order_id: id,
        client_id: 1,
    })
    .expect("valid order")
}

#[test]
fn fifth_enqueue_on_capacity_four_is_rejected() -> conduit::Result<()> {
    let (queue, _handle) = OrderQueue::with_capacity(4)?;
    for id in 0..4 {
        assert!(queue.enqueue(&order(id))?);
    }
    assert!(!queue.enqueue(&order(4))?);
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.stats().size, 4);
    Ok(())
}

#[test]
fn two_threads_fill_queue_exactly() -> conduit::Result<()> {
    let (queue, _handle) = OrderQueue::with_capacity(2_000)?;
    let queue = Arc::new(queue);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2u128)
        .map(|thread_id| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> conduit::Result<usize> {
                barrier.wait();
                let mut accepted = 0;
                for n in 0..1_000u128 {
                    if queue.enqueue(&order(thread_id * 1_000 + n))? {
                        accepted += 1;
                    }
                }
                Ok(accepted)
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        accepted += handle.join().expect("producer panicked")?;
    }
    assert_eq!(accepted, 2_000);
    assert_eq!(queue.len(), 2_000);
    assert!(!queue.enqueue(&order(9_999))?);
    Ok(())
}

#[test]
fn dequeue_wait_wakes_on_enqueue() -> conduit::Result<()> {
    let (queue, handle) = OrderQueue::with_capacity(16)?;
    let producer = OrderQueue::attach(&handle, &conduit::QueueConfig::with_capacity(16))?;
    assert!(queue.dequeue()?.is_none());

    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let consumer = thread::spawn(move || -> conduit::Result<Option<u128>> {
        let _ = started_tx.send(());
        let got = queue.dequeue_wait(Duration::from_secs(5))?;
        let _ = done_tx.send(());
        Ok(got.map(|entry| entry.record.order_id()))
    });

    started_rx.recv().unwrap();
    assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

    let start = Instant::now();
    assert!(producer.enqueue(&order(77))?);
    done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(consumer.join().unwrap()?, Some(77));
    Ok(())
}

#[test]
fn sequences_are_strictly_increasing_in_dequeue_order() -> conduit::Result<()> {
    let (queue, _handle) = OrderQueue::with_capacity(128)?;
    for id in 0..100 {
        queue.enqueue(&order(id))?;
    }
    let drained = queue.dequeue_batch(1_000)?;
    assert_eq!(drained.len(), 100);
    for pair in drained.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }
    assert_eq!(queue.stats().read_count, 100);
    Ok(())
}
