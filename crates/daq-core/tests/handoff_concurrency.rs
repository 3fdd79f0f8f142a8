//! Integration tests for HandoffQueue under concurrent access.
//!
//! These tests verify exactly-once delivery with several producers and
//! consumers, and that a consumer racing a producer relies only on the result
//! of `try_pop()`, never on a prior `is_empty()` check.

use daq_core::error::QueueError;
use daq_core::handoff::HandoffQueue;
use daq_core::router::ChannelMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PRODUCERS: usize = 4;
const CONSUMERS: usize = 3;
const ITEMS_PER_PRODUCER: usize = 2_000;

#[test]
fn test_mpmc_exactly_once_in_producer_order() {
    let queue: HandoffQueue<(usize, usize)> = HandoffQueue::with_name("mpmc");
    let cancel = CancellationToken::new();

    let popped: Vec<Vec<(usize, usize)>> = thread::scope(|s| {
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                s.spawn(|| {
                    let mut got = Vec::new();
                    while let Ok(item) = queue.pop(&cancel) {
                        got.push(item);
                    }
                    got
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = &queue;
                s.spawn(move || {
                    for seq in 0..ITEMS_PER_PRODUCER {
                        queue.push((p, seq));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        queue.close();

        consumers.into_iter().map(|c| c.join().unwrap()).collect()
    });

    // Every item exactly once
    let mut seen: HashMap<(usize, usize), usize> = HashMap::new();
    for item in popped.iter().flatten() {
        *seen.entry(*item).or_default() += 1;
    }
    assert_eq!(seen.len(), PRODUCERS * ITEMS_PER_PRODUCER);
    assert!(seen.values().all(|&n| n == 1));

    // Each consumer sees any single producer's items in push order
    for consumer in &popped {
        for p in 0..PRODUCERS {
            let seqs: Vec<usize> = consumer
                .iter()
                .filter(|(producer, _)| *producer == p)
                .map(|(_, seq)| *seq)
                .collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }
    }
    assert_eq!(queue.total_pushed(), (PRODUCERS * ITEMS_PER_PRODUCER) as u64);
}

#[test]
fn test_is_empty_then_try_pop_race() {
    let queue: HandoffQueue<u32> = HandoffQueue::new();
    let done = AtomicBool::new(false);
    const TOTAL: u32 = 5_000;

    let received = thread::scope(|s| {
        s.spawn(|| {
            for i in 0..TOTAL {
                queue.push(i);
                if i % 64 == 0 {
                    thread::yield_now();
                }
            }
            done.store(true, Ordering::Release);
        });

        let consumer = s.spawn(|| {
            let mut received = Vec::new();
            loop {
                // A push may land between this check and the pop below
                if queue.is_empty() && done.load(Ordering::Acquire) {
                    while let Ok(v) = queue.try_pop() {
                        received.push(v);
                    }
                    break;
                }
                match queue.try_pop() {
                    Ok(v) => received.push(v),
                    Err(QueueError::Empty) => thread::yield_now(),
                    Err(other) => panic!("unexpected queue error: {other}"),
                }
            }
            received
        });

        consumer.join().unwrap()
    });

    assert_eq!(received, (0..TOTAL).collect::<Vec<_>>());
    assert!(queue.is_empty());
}

#[test]
fn test_try_pop_never_blocks_while_producer_sleeps() {
    let queue: HandoffQueue<u8> = HandoffQueue::new();
    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            queue.push(1);
        });
        assert_eq!(queue.try_pop(), Err(QueueError::Empty));
        assert_eq!(
            queue.pop_timeout(Duration::from_secs(2), &CancellationToken::new()),
            Ok(1)
        );
    });
}

#[test]
fn test_close_wakes_every_blocked_consumer() {
    let queue: HandoffQueue<u8> = HandoffQueue::new();
    let cancel = CancellationToken::new();
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| queue.pop(&cancel))).collect();
        thread::sleep(Duration::from_millis(20));
        queue.close();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(|r| *r == Err(QueueError::Closed)));
}

#[test]
fn test_sixteen_channels_only_two_populated() {
    let map: ChannelMap<(u32, usize)> = ChannelMap::with_channels(16).unwrap();
    let router = map.router();

    let stream: Vec<(u32, usize)> = (0..40).map(|i| ((i % 2) as u32, i)).collect();
    for item in &stream {
        router.route_to(item.0, *item).unwrap();
    }

    for channel in 0..2u32 {
        let expected: Vec<_> = stream.iter().filter(|(c, _)| *c == channel).copied().collect();
        assert_eq!(map.queue(channel).unwrap().drain(), expected);
    }
    for channel in 2..16u32 {
        assert!(map.queue(channel).unwrap().is_empty(), "channel {channel} not empty");
    }
}
