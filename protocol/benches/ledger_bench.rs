// Ledger benchmarks for the Keel protocol.
//
// Covers block application at a few block sizes, the matching rollback, and
// the cost of signature verification that fork choice pays per block.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use keel_protocol::crypto::Keypair;
use keel_protocol::ledger::Ledger;
use keel_protocol::storage::{Block, LedgerStore};
use keel_protocol::transaction::{sign_transaction, Transaction};

/// A fresh ledger plus a block of `n` transfers from distinct funded senders.
fn fixture(n: usize) -> (Ledger, Block) {
    let gk = Keypair::generate();
    let ledger = Ledger::open(LedgerStore::open_temporary().unwrap(), &Block::genesis(&gk)).unwrap();
    let senders: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();

    // Each sender earns one block reward.
    for (i, kp) in senders.iter().enumerate() {
        let block = Block::seal(&ledger.last_header().unwrap(), vec![], kp, i as u64 + 1);
        ledger.link_block(&block).unwrap();
    }

    let recipient = Keypair::generate().address();
    let txs: Vec<Transaction> = senders
        .iter()
        .map(|kp| {
            let mut tx = Transaction::new(0, kp.address(), Some(recipient), 1, vec![]);
            sign_transaction(&mut tx, kp);
            tx
        })
        .collect();
    let block = Block::seal(&ledger.last_header().unwrap(), txs, &gk, 1_000_000);
    (ledger, block)
}

fn bench_link_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/link_block");
    for &n in &[1usize, 10, 100] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || fixture(n),
                |(ledger, block)| ledger.link_block(&block).unwrap(),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_rollback_tip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/rollback_tip");
    for &n in &[1usize, 10, 100] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let (ledger, block) = fixture(n);
                    ledger.link_block(&block).unwrap();
                    ledger
                },
                |ledger| ledger.rollback_tip().unwrap(),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_block_verify(c: &mut Criterion) {
    let (_ledger, block) = fixture(100);
    c.bench_function("block/verify_100_txs", |b| {
        b.iter(|| block.verify().unwrap());
    });
}

criterion_group!(
    benches,
    bench_link_block,
    bench_rollback_tip,
    bench_block_verify
);
criterion_main!(benches);
