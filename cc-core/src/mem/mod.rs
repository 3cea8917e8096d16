//! Memory-mapped file binding and the two allocator families (spec §4.4).

pub mod file_descriptor;
pub mod ring;
pub mod scattered;

/// Which medium an allocator's backing file lives on. `Dram` maps a file
/// under a tmpfs-style directory (e.g. `/dev/shm/temp_log/`); `Pmem` maps a
/// file under a configured persistent-memory mount (e.g. `/mnt/pmemN/`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemMedia {
    Dram,
    Pmem,
}
