use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use multicopy::transfer::{read_from, write_to};
use multicopy::{
    ArbiterScope, ChannelNames, DataTransfer, Finisher, NamedSemaphore, Side, WaitOutcome,
    BLOCK_SIZE,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn fresh_names(tag: &str) -> ChannelNames {
    static RUN: AtomicUsize = AtomicUsize::new(0);
    let channel = format!(
        "bench-{}-{}-{}",
        tag,
        std::process::id(),
        RUN.fetch_add(1, Ordering::Relaxed)
    );
    ChannelNames::new(&channel, ArbiterScope::Channel).unwrap()
}

fn copy_once(input: Arc<Vec<u8>>) -> usize {
    let names = fresh_names("copy");
    let reader = {
        let names = names.clone();
        thread::spawn(move || {
            let mut finisher = Finisher::open(&names).unwrap();
            let mut ring = DataTransfer::open(&names, Side::Reader, TIMEOUT).unwrap();
            read_from(
                Path::new("bench-input"),
                || Ok(Cursor::new(&input[..])),
                &mut ring,
                &mut finisher,
            )
            .unwrap()
        })
    };
    let mut ring = DataTransfer::open(&names, Side::Writer, TIMEOUT).unwrap();
    let finisher = Finisher::open(&names).unwrap();
    let (sink, _) = write_to(
        Path::new("bench-output"),
        || Ok(Vec::new()),
        &mut ring,
        &finisher,
    )
    .unwrap();
    reader.join().unwrap();
    sink.len()
}

fn transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_throughput");
    group.sample_size(10);
    for blocks in [1usize, 8, 32] {
        let input = Arc::new(vec![0x5au8; blocks * BLOCK_SIZE + 1]);
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_function(format!("{blocks}_blocks"), |b| {
            b.iter(|| assert_eq!(copy_once(input.clone()), input.len()))
        });
    }
    group.finish();
}

fn handoff(c: &mut Criterion) {
    let n = 1000;
    let names = fresh_names("handoff");
    let ping = NamedSemaphore::open(&names.empty_blocks(), 1).unwrap();
    let pong = NamedSemaphore::open(&names.blocks_to_write(), 1).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let peer = {
        let names = names.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let ping = NamedSemaphore::open(&names.empty_blocks(), 1).unwrap();
            let pong = NamedSemaphore::open(&names.blocks_to_write(), 1).unwrap();
            while !stop.load(Ordering::Relaxed) {
                if ping.wait(Some(Duration::from_millis(50))).unwrap() == WaitOutcome::Signaled {
                    pong.post().unwrap();
                }
            }
        })
    };

    let mut group = c.benchmark_group("semaphore_handoff");
    group.throughput(Throughput::Elements(n));
    group.bench_function("ping_pong", |b| {
        b.iter(|| {
            for _ in 0..n {
                ping.post().unwrap();
                pong.wait(Some(TIMEOUT)).unwrap();
            }
        })
    });
    group.finish();

    stop.store(true, Ordering::Relaxed);
    peer.join().unwrap();
}

criterion_group!(benches, transfer, handoff);
criterion_main!(benches);
