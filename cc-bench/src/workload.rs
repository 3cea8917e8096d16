//! Minimal synthetic workload (spec §1: workload generators are an external
//! collaborator). This is a stand-in shaped like a single-table uniform
//! key-value workload, just enough to drive the scheduler and exercise every
//! Executor op -- TPC-C/SmallBank/YCSB transaction definitions are out of
//! scope for this crate.

use rand::Rng;

use cc_core::cc::executor::{Executor, CC};
use cc_core::key::AbKey;

const TYPE_TAG: u32 = 0;
const PAYLOAD_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OpKind {
    Insert,
    Read,
    Update,
    Delete,
    Scan,
}

/// Picks one operation per call, weighted towards reads and updates over a
/// uniformly-distributed key in `[0, key_space)`.
pub fn pick_op(rng: &mut impl Rng, key_space: u64) -> (OpKind, AbKey) {
    let logic_key = rng.gen_range(0..key_space);
    let key = AbKey::new(TYPE_TAG, logic_key);
    let roll: u8 = rng.gen_range(0..100);
    let kind = match roll {
        0..=9 => OpKind::Insert,
        10..=59 => OpKind::Read,
        60..=89 => OpKind::Update,
        90..=94 => OpKind::Delete,
        _ => OpKind::Scan,
    };
    (kind, key)
}

/// Runs one operation attempt against `exec` and commits. Returns whether
/// the commit succeeded -- the caller decides whether to abort and retry.
pub fn run_one<C: CC>(exec: &mut Executor<'_, C>, rng: &mut impl Rng, key_space: u64) -> bool {
    let (kind, key) = pick_op(rng, key_space);
    let mut payload = vec![0u8; PAYLOAD_SIZE];
    rng.fill(&mut payload[..]);

    let op_ok = match kind {
        OpKind::Insert => exec.insert(key, &payload),
        OpKind::Update => exec.update(key, 0, &payload),
        OpKind::Delete => exec.delete(key),
        OpKind::Read => {
            let mut out = Vec::new();
            exec.read(key, &mut out)
        }
        OpKind::Scan => {
            let mut out = Vec::new();
            exec.scan(key, 10, &mut out)
        }
    };

    if !op_ok {
        return false;
    }
    exec.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_core::cc::tpl::Tpl;
    use cc_core::cc::tx_context::ThreadContext;
    use cc_core::log::manager::LogManager;
    use cc_core::mem::ring::RingAllocator;
    use cc_core::mem::MemMedia;
    use rand::SeedableRng;

    #[test]
    fn run_one_commits_or_cleanly_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ring = RingAllocator::create(dir.path().join("Data_0"), 1 << 20, MemMedia::Dram).unwrap();
        let tpl = Tpl::new(LogManager::new(ring));
        let mut ctx = ThreadContext::new(1);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for ts in 1..200u64 {
            let mut exec = Executor::new(&tpl, &mut ctx, ts);
            let committed = run_one(&mut exec, &mut rng, 20);
            if !committed {
                exec.abort();
            }
        }
    }
}
