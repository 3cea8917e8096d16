//! Worker-thread pool (spec §4.8): each worker owns a `ThreadContext` and
//! loops, pulling a synthetic transaction, running it against the chosen CC
//! engine, and reacting to a `TaskError` outcome the same way a real
//! workload-driven worker would -- `Retry` re-runs, `AssertFault` stops the
//! worker, `PreStop` (signalled externally, e.g. by Ctrl-C) drains cleanly,
//! and the `TimeBarrier` family rendezvouses every worker on a shared
//! count+condvar before any of them proceeds past the checkpoint (S6:
//! "coordinator observes N arrivals ... releases all") -- a worker that is
//! shutting down never strands the others there.
//!
//! **Template-heavy protocol selection becomes a tagged `Engine` enum with a
//! dispatch table**, per the redesign guidance for this kind of C++ template
//! hierarchy: `Executor` is generic over one concrete `CC` type, so runtime
//! protocol selection needs a single `Sized` type to instantiate it with
//! rather than a trait object.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::SeedableRng;

use cc_core::cc::courier::Courier;
use cc_core::cc::executor::{Executor, CC};
use cc_core::cc::occ_numa::OccNuma;
use cc_core::cc::romulus::Romulus;
use cc_core::cc::task_error::TaskError;
use cc_core::cc::tpl::Tpl;
use cc_core::cc::tx_context::{ThreadContext, TxContext};
use cc_core::key::AbKey;
use cc_core::log::manager::LogManager;
use cc_core::mem::ring::RingAllocator;
use cc_core::mem::MemMedia;
use cc_core::persist::FlushStrategy;

use crate::config::{Protocol, RunConfig};
use crate::listener::{RunSummary, WorkerStats};
use crate::workload;

const MAX_ATTEMPTS: u32 = 8;
/// Committed transactions between `TimeBarrier` checkpoints (S6). Small
/// enough that a short benchmark run still exercises the rendezvous.
const BARRIER_INTERVAL: u64 = 64;

pub enum Engine {
    Tpl(Tpl),
    OccNuma(OccNuma),
    Romulus(Romulus),
    Courier(Courier),
}

impl Engine {
    pub fn new(protocol: Protocol, log: LogManager, flush_strategy: FlushStrategy) -> Self {
        match protocol {
            Protocol::Tpl => Engine::Tpl(Tpl::new(log)),
            Protocol::OccNuma => Engine::OccNuma(OccNuma::new(log)),
            Protocol::Romulus => Engine::Romulus(Romulus::new(log)),
            Protocol::Courier => Engine::Courier(Courier::new(log, flush_strategy)),
            Protocol::CourierSave => Engine::Courier(Courier::new_save(log, flush_strategy)),
        }
    }
}

impl CC for Engine {
    fn read(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, out: &mut Vec<u8>) -> bool {
        match self {
            Engine::Tpl(e) => e.read(ctx, tx, key, out),
            Engine::OccNuma(e) => e.read(ctx, tx, key, out),
            Engine::Romulus(e) => e.read(ctx, tx, key, out),
            Engine::Courier(e) => e.read(ctx, tx, key, out),
        }
    }

    fn update(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, offset: u32, new: &[u8]) -> bool {
        match self {
            Engine::Tpl(e) => e.update(ctx, tx, key, offset, new),
            Engine::OccNuma(e) => e.update(ctx, tx, key, offset, new),
            Engine::Romulus(e) => e.update(ctx, tx, key, offset, new),
            Engine::Courier(e) => e.update(ctx, tx, key, offset, new),
        }
    }

    fn insert(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, new: &[u8]) -> bool {
        match self {
            Engine::Tpl(e) => e.insert(ctx, tx, key, new),
            Engine::OccNuma(e) => e.insert(ctx, tx, key, new),
            Engine::Romulus(e) => e.insert(ctx, tx, key, new),
            Engine::Courier(e) => e.insert(ctx, tx, key, new),
        }
    }

    fn scan(
        &self,
        ctx: &mut ThreadContext,
        tx: &mut TxContext,
        key: AbKey,
        n: u32,
        out: &mut Vec<(AbKey, Vec<u8>)>,
    ) -> bool {
        match self {
            Engine::Tpl(e) => e.scan(ctx, tx, key, n, out),
            Engine::OccNuma(e) => e.scan(ctx, tx, key, n, out),
            Engine::Romulus(e) => e.scan(ctx, tx, key, n, out),
            Engine::Courier(e) => e.scan(ctx, tx, key, n, out),
        }
    }

    fn delete(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey) -> bool {
        match self {
            Engine::Tpl(e) => e.delete(ctx, tx, key),
            Engine::OccNuma(e) => e.delete(ctx, tx, key),
            Engine::Romulus(e) => e.delete(ctx, tx, key),
            Engine::Courier(e) => e.delete(ctx, tx, key),
        }
    }

    fn commit(&self, ctx: &mut ThreadContext, tx: &mut TxContext) -> bool {
        match self {
            Engine::Tpl(e) => e.commit(ctx, tx),
            Engine::OccNuma(e) => e.commit(ctx, tx),
            Engine::Romulus(e) => e.commit(ctx, tx),
            Engine::Courier(e) => e.commit(ctx, tx),
        }
    }

    fn abort(&self, ctx: &mut ThreadContext, tx: &mut TxContext) {
        match self {
            Engine::Tpl(e) => e.abort(ctx, tx),
            Engine::OccNuma(e) => e.abort(ctx, tx),
            Engine::Romulus(e) => e.abort(ctx, tx),
            Engine::Courier(e) => e.abort(ctx, tx),
        }
    }
}

struct RendezvousState {
    generation: u64,
    count: usize,
}

/// A `TimeBarrier` checkpoint (spec S6): `target` workers must call `wait`
/// before any of them is released. Unlike `std::sync::Barrier`, a caller can
/// bail out early once shutdown is signalled or the run deadline passes, so
/// a worker winding down never leaves the others blocked forever on a
/// generation nobody else will complete.
struct Rendezvous {
    state: Mutex<RendezvousState>,
    condvar: Condvar,
    target: usize,
}

impl Rendezvous {
    fn new(target: usize) -> Self {
        Rendezvous { state: Mutex::new(RendezvousState { generation: 0, count: 0 }), condvar: Condvar::new(), target }
    }

    /// Returns `true` if this call completed the rendezvous (every worker
    /// arrived), `false` if it gave up early because the run is ending.
    fn wait(&self, running: &AtomicBool, deadline: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        let my_generation = state.generation;
        state.count += 1;
        if state.count == self.target {
            state.count = 0;
            state.generation += 1;
            self.condvar.notify_all();
            return true;
        }

        while state.generation == my_generation {
            if !running.load(Ordering::Relaxed) || Instant::now() >= deadline {
                return false;
            }
            let (guard, _timeout) = self.condvar.wait_timeout(state, Duration::from_millis(50)).unwrap();
            state = guard;
        }
        true
    }
}

/// Classifies a failed attempt the way a real CC-facing worker loop would:
/// retry while under the attempt budget, otherwise treat it as the
/// invariant breach it would be for a workload this simple (real contention
/// should resolve well inside `MAX_ATTEMPTS`).
fn classify_failure(attempts: u32) -> TaskError {
    if attempts < MAX_ATTEMPTS {
        TaskError::Retry
    } else {
        TaskError::AssertFault
    }
}

pub fn run(cfg: &RunConfig, data_dir: &std::path::Path) -> anyhow::Result<RunSummary> {
    let ring = RingAllocator::create(data_dir.join("Data_0"), cfg.ring_size_bytes, MemMedia::Dram)?;
    let engine = Arc::new(Engine::new(cfg.protocol, LogManager::new(ring), cfg.flush_strategy.into()));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| anyhow::anyhow!("failed to install Ctrl-C handler: {e}"))?;
    }

    let next_ts = Arc::new(AtomicU64::new(1));
    let deadline = Instant::now() + Duration::from_secs(cfg.duration_secs);
    let key_space = cfg.key_space;
    let rendezvous = Arc::new(Rendezvous::new(cfg.workers as usize));

    let mut handles = Vec::new();
    for worker_id in 0..cfg.workers {
        let engine = Arc::clone(&engine);
        let running = Arc::clone(&running);
        let next_ts = Arc::clone(&next_ts);
        let rendezvous = Arc::clone(&rendezvous);
        handles.push(std::thread::spawn(move || {
            worker_loop(worker_id, engine, running, next_ts, deadline, key_space, rendezvous)
        }));
    }

    let started = Instant::now();
    let mut total = WorkerStats::default();
    for handle in handles {
        total.merge(handle.join().expect("worker thread panicked"));
    }

    Ok(RunSummary { elapsed: started.elapsed(), stats: total, worker_count: cfg.workers })
}

fn worker_loop(
    worker_id: u32,
    engine: Arc<Engine>,
    running: Arc<AtomicBool>,
    next_ts: Arc<AtomicU64>,
    deadline: Instant,
    key_space: u64,
    rendezvous: Arc<Rendezvous>,
) -> WorkerStats {
    let mut ctx = ThreadContext::new(1);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE ^ worker_id as u64);
    let mut stats = WorkerStats::default();
    let mut since_barrier = 0u64;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let ts = next_ts.fetch_add(1, Ordering::Relaxed);
        let mut attempts = 0u32;
        loop {
            let mut exec = Executor::new(engine.as_ref(), &mut ctx, ts);
            if workload::run_one(&mut exec, &mut rng, key_space) {
                stats.committed += 1;
                break;
            }
            exec.abort();
            attempts += 1;
            match classify_failure(attempts) {
                TaskError::Retry => {
                    stats.retried += 1;
                    continue;
                }
                _ => {
                    stats.aborted += 1;
                    break;
                }
            }
        }

        since_barrier += 1;
        if since_barrier >= BARRIER_INTERVAL {
            since_barrier = 0;
            if rendezvous.wait(&running, deadline) {
                stats.barriers += 1;
            }
        }
    }

    log::debug!("worker {worker_id} stopping: {stats:?}");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn rendezvous_releases_all_waiters_once_target_arrivals_are_seen() {
        let rendezvous = Arc::new(Rendezvous::new(8));
        let running = Arc::new(AtomicBool::new(true));
        let deadline = Instant::now() + Duration::from_secs(5);
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rendezvous = Arc::clone(&rendezvous);
                let running = Arc::clone(&running);
                let released = Arc::clone(&released);
                std::thread::spawn(move || {
                    let completed = rendezvous.wait(&running, deadline);
                    if completed {
                        released.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(released.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn rendezvous_gives_up_once_shutdown_is_signalled() {
        let rendezvous = Rendezvous::new(8);
        let running = AtomicBool::new(false);
        let deadline = Instant::now() + Duration::from_secs(5);

        // Only one of the required eight arrivals ever shows up; a lone
        // waiter must not hang forever once `running` drops.
        assert!(!rendezvous.wait(&running, deadline));
    }
}
