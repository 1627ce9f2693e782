//! Fan-in and cancellation tests for the MPSC ring.
//!
//! Each producer tags its records with `(id, seq, done)`; whatever the
//! interleaving, the consumer must observe every producer's sequence
//! strictly in order with `done` appearing exactly once, at the end.

use std::thread;
use std::time::Duration;

use janus::sync::mpsc;
use janus::RingError;

const CAPACITY: usize = 128;
const PRODUCERS: usize = 10;
const PER_PRODUCER: i32 = 100_000;

#[derive(Debug, Clone, Copy, Default)]
struct Record {
    id: i32,
    seq: i32,
    done: bool,
}

fn produce(sender: &mpsc::Sender<Record, CAPACITY>, id: i32, count: i32) {
    let mut sent = 0;
    while sent < count {
        let record = Record {
            id,
            seq: sent,
            done: sent == count - 1,
        };
        if sent & 0x100 != 0 {
            thread::yield_now();
        }
        // Mix the blocking and non-blocking paths like a real producer
        // under backpressure would.
        if sent & 8 != 0 {
            sender.push(record).expect("push");
            sent += 1;
        } else if sender.try_push(record).is_ok() {
            sent += 1;
        }
    }
}

#[test]
fn fan_in_preserves_per_producer_order() {
    let (sender, mut receiver) = mpsc::channel::<Record, CAPACITY>();

    let mut handles = Vec::new();
    for id in 0..PRODUCERS as i32 {
        let sender = sender.clone();
        handles.push(thread::spawn(move || produce(&sender, id, PER_PRODUCER)));
    }
    drop(sender);

    let mut next_seq = [0i32; PRODUCERS];
    let mut finished = [false; PRODUCERS];
    let mut done_count = 0;
    let mut total = 0u64;

    while done_count < PRODUCERS {
        let batch = receiver.peek(10).expect("peek");
        let records = batch.to_vec();
        receiver.commit_pop().expect("commit_pop");

        for record in records {
            total += 1;
            let id = record.id as usize;
            assert!(id < PRODUCERS, "bogus producer id {}", record.id);
            assert!(!finished[id], "record after done from producer {id}");
            assert_eq!(
                record.seq, next_seq[id],
                "out-of-order record from producer {id}"
            );
            next_seq[id] += 1;
            if record.done {
                finished[id] = true;
                done_count += 1;
            }
        }
    }

    assert_eq!(total, (PRODUCERS as u64) * (PER_PRODUCER as u64));
    for handle in handles {
        handle.join().expect("producer thread");
    }
}

#[test]
fn exactly_once_delivery_under_try_push_mix() {
    // Smaller volume, tighter ring: try_push failures must never duplicate
    // or drop a record.
    const N: usize = 16;
    let (sender, mut receiver) = mpsc::channel::<Record, N>();
    let producers = 4;
    let per_producer = 5_000;

    let mut handles = Vec::new();
    for id in 0..producers {
        let sender = sender.clone();
        handles.push(thread::spawn(move || {
            let mut sent = 0;
            while sent < per_producer {
                let record = Record {
                    id,
                    seq: sent,
                    done: sent == per_producer - 1,
                };
                if sender.try_push(record).is_ok() {
                    sent += 1;
                } else {
                    thread::yield_now();
                }
            }
        }));
    }
    drop(sender);

    let mut next_seq = vec![0i32; producers as usize];
    let mut done_count = 0;
    while done_count < producers {
        let batch = receiver.peek(N).expect("peek");
        let records = batch.to_vec();
        receiver.commit_pop().expect("commit_pop");
        for record in records {
            assert_eq!(record.seq, next_seq[record.id as usize]);
            next_seq[record.id as usize] += 1;
            if record.done {
                done_count += 1;
            }
        }
    }

    for handle in handles {
        handle.join().expect("producer thread");
    }
    assert!(next_seq.iter().all(|&seq| seq == per_producer));
}

#[test]
fn cancel_storm_releases_every_producer() {
    // Ten producers hammering a tiny ring, consumer peeking, cancel fired
    // from outside after a moment. Every thread must come back promptly,
    // round after round.
    for round in 0..100u64 {
        let (sender, mut receiver) = mpsc::channel::<Record, 32>();
        let canceller = sender.canceller();

        let mut producers = Vec::new();
        for id in 0..10 {
            let sender = sender.clone();
            producers.push(thread::spawn(move || {
                let mut seq = 0;
                loop {
                    let record = Record {
                        id,
                        seq,
                        done: false,
                    };
                    match sender.push(record) {
                        Ok(()) => seq += 1,
                        Err(RingError::Cancelled) => return,
                        Err(err) => panic!("unexpected producer error: {err}"),
                    }
                }
            }));
        }
        drop(sender);

        let consumer = thread::spawn(move || loop {
            let peeked = receiver.peek(8).map(|batch| batch.len());
            match peeked {
                Ok(_) => match receiver.commit_pop() {
                    Ok(()) | Err(RingError::Cancelled) => {}
                    Err(err) => panic!("unexpected commit error: {err}"),
                },
                Err(RingError::Cancelled) => return,
                Err(err) => panic!("unexpected consumer error: {err}"),
            }
        });

        thread::sleep(Duration::from_micros(500 + 100 * (round % 5)));
        canceller.cancel();

        for handle in producers {
            handle.join().expect("producer thread");
        }
        consumer.join().expect("consumer thread");
    }
}
