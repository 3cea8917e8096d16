use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cc_core::cc::executor::Executor;
use cc_core::cc::occ_numa::OccNuma;
use cc_core::cc::romulus::Romulus;
use cc_core::cc::tpl::Tpl;
use cc_core::cc::tx_context::ThreadContext;
use cc_core::key::AbKey;
use cc_core::log::manager::LogManager;
use cc_core::mem::ring::RingAllocator;
use cc_core::mem::MemMedia;

fn new_ring(dir: &tempfile::TempDir) -> RingAllocator {
    RingAllocator::create(dir.path().join("Data_0"), 1 << 24, MemMedia::Dram).unwrap()
}

fn tpl_insert_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let tpl = Tpl::new(LogManager::new(new_ring(&dir)));
    let mut ctx = ThreadContext::new(1);
    let mut ts = 0u64;

    c.bench_function("tpl insert+commit", |b| {
        b.iter(|| {
            ts += 1;
            let mut exec = Executor::new(&tpl, &mut ctx, ts);
            black_box(exec.insert(AbKey::new(0, ts), b"benchmark-payload"));
            black_box(exec.commit());
        })
    });

    c.bench_function("tpl read hit", |b| {
        let mut exec = Executor::new(&tpl, &mut ctx, ts + 1);
        let mut out = Vec::new();
        b.iter(|| {
            black_box(exec.read(AbKey::new(0, ts), &mut out));
        })
    });
}

fn occ_numa_insert_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let occ = OccNuma::new(LogManager::new(new_ring(&dir)));
    let mut ctx = ThreadContext::new(1);
    let mut ts = 0u64;

    c.bench_function("occ-numa insert+commit", |b| {
        b.iter(|| {
            ts += 1;
            let mut exec = Executor::new(&occ, &mut ctx, ts);
            black_box(exec.insert(AbKey::new(0, ts), b"benchmark-payload"));
            black_box(exec.commit());
        })
    });
}

fn romulus_update(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let rom = Romulus::new(LogManager::new(new_ring(&dir)));
    let mut ctx = ThreadContext::new(1);
    let mut seed = Executor::new(&rom, &mut ctx, 0);
    seed.insert(AbKey::new(0, 1), b"v0");
    seed.commit();
    let mut ts = 0u64;

    c.bench_function("romulus update+commit", |b| {
        b.iter(|| {
            ts += 1;
            let mut exec = Executor::new(&rom, &mut ctx, ts);
            black_box(exec.update(AbKey::new(0, 1), 0, b"vN"));
            black_box(exec.commit());
        })
    });
}

criterion_group!(benches, tpl_insert_read, occ_numa_insert_read, romulus_update);
criterion_main!(benches);
