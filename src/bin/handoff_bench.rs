//! Ring throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin handoff_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)
//!     BYTES=268435456 Bytes streamed through the SPSC ring
//!     ITEMS=4000000   Items fanned through the MPSC ring

use std::env;
use std::thread;
use std::time::Instant;

use janus::sync::{mpsc, spsc};

const SPSC_CAPACITY: usize = 1 << 16;
const SPSC_BURST: usize = 4096;
const MPSC_CAPACITY: usize = 4096;
const MPSC_PRODUCERS: u32 = 4;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_spsc(total_bytes: usize) {
    let (producer_cpu, consumer_cpu) = get_cpu_affinity();
    let (mut writer, mut reader) = spsc::channel::<u8>(SPSC_CAPACITY);

    let start = Instant::now();

    let producer = thread::spawn(move || {
        pin_to_cpu(producer_cpu);
        let mut remaining = total_bytes;
        let mut value = 0u8;
        while remaining > 0 {
            let want = SPSC_BURST.min(remaining);
            let region = writer.acquire_write(want).expect("acquire_write");
            let n = region.len().min(remaining);
            for cell in &mut region[..n] {
                *cell = value;
                value = value.wrapping_add(1);
            }
            writer.commit_write(n).expect("commit_write");
            remaining -= n;
        }
    });

    let consumer = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        let mut remaining = total_bytes;
        let mut checksum = 0u64;
        while remaining > 0 {
            let region = reader.acquire_read(1).expect("acquire_read");
            let n = region.len().min(remaining);
            for &byte in &region[..n] {
                checksum = checksum.wrapping_add(u64::from(byte));
            }
            reader.commit_read(n).expect("commit_read");
            remaining -= n;
        }
        checksum
    });

    producer.join().expect("producer thread");
    let checksum = consumer.join().expect("consumer thread");
    let elapsed = start.elapsed();

    let gib = total_bytes as f64 / (1u64 << 30) as f64;
    println!(
        "spsc: {} bytes in {:.3}s ({:.2} GiB/s, checksum {})",
        total_bytes,
        elapsed.as_secs_f64(),
        gib / elapsed.as_secs_f64(),
        checksum
    );
}

fn bench_mpsc(total_items: usize) {
    let (sender, mut receiver) = mpsc::channel::<u64, MPSC_CAPACITY>();
    let per_producer = total_items / MPSC_PRODUCERS as usize;

    let start = Instant::now();

    let mut producers = Vec::new();
    for p in 0..MPSC_PRODUCERS {
        let sender = sender.clone();
        producers.push(thread::spawn(move || {
            for i in 0..per_producer {
                sender.push(u64::from(p) << 32 | i as u64).expect("push");
            }
        }));
    }
    drop(sender);

    let consumer = thread::spawn(move || {
        let expected = per_producer * MPSC_PRODUCERS as usize;
        let mut popped = 0usize;
        while popped < expected {
            let batch = receiver.peek(256).expect("peek");
            popped += batch.len();
            receiver.commit_pop().expect("commit_pop");
        }
        popped
    });

    for handle in producers {
        handle.join().expect("producer thread");
    }
    let popped = consumer.join().expect("consumer thread");
    let elapsed = start.elapsed();

    println!(
        "mpsc: {} items from {} producers in {:.3}s ({:.1} Mitem/s)",
        popped,
        MPSC_PRODUCERS,
        elapsed.as_secs_f64(),
        popped as f64 / elapsed.as_secs_f64() / 1e6
    );
}

fn main() {
    janus::init_tracing();

    let bytes = env_usize("BYTES", 1 << 28);
    let items = env_usize("ITEMS", 4_000_000);

    bench_spsc(bytes);
    bench_mpsc(items);
}
