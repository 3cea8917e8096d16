//! Storage substrate and concurrency-control protocols for a transactional
//! benchmark harness over persistent-memory-backed key/value records.
//!
//! [`cc`] holds the four protocol implementations (TPL, OCC-NUMA, Romulus,
//! Courier/Courier-Save) behind a common [`cc::executor::CC`] trait; [`mem`],
//! [`data`], [`index`], and [`log`] are the storage primitives they share;
//! [`recovery`] replays a log back into a fresh index after a crash.
//!
//! ## Getting started
//!
//! ```
//! use cc_core::cc::executor::Executor;
//! use cc_core::cc::tpl::Tpl;
//! use cc_core::key::AbKey;
//! use cc_core::log::manager::LogManager;
//! use cc_core::cc::tx_context::ThreadContext;
//! use cc_core::mem::ring::RingAllocator;
//! use cc_core::mem::MemMedia;
//!
//! # fn main() -> Result<(), cc_core::error::Error> {
//! let dir = tempfile::tempdir().unwrap();
//! let ring = RingAllocator::create(dir.path().join("Data_0"), 1 << 20, MemMedia::Dram)?;
//! let tpl = Tpl::new(LogManager::new(ring));
//! let mut ctx = ThreadContext::new(1);
//!
//! let mut exec = Executor::new(&tpl, &mut ctx, 1);
//! assert!(exec.insert(AbKey::new(0, 1), b"hello"));
//! assert!(exec.commit());
//!
//! let mut exec = Executor::new(&tpl, &mut ctx, 2);
//! let mut out = Vec::new();
//! assert!(exec.read(AbKey::new(0, 1), &mut out));
//! assert_eq!(out, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod cc;
pub mod data;
pub mod error;
pub mod index;
pub mod key;
pub mod log;
pub mod mem;
pub mod persist;
pub mod recovery;
