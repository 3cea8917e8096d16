//! Transaction-outcome sum type (spec §4.8/§7). In the original design this
//! was yielded from a coroutine; here a worker loop just inspects the tag a
//! transaction attempt returns and decides what to do next.

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskError {
    /// Committed (or no work to do). Move on to the next transaction.
    None,
    /// Lost a race (lock contention, OCC validation failure, allocator
    /// wrap contention). Re-run the same transaction.
    Retry,
    /// An invariant was violated. The worker logs and the process should
    /// treat this as fatal.
    AssertFault,
    /// The coordinator asked this worker to drain in-flight work and exit.
    PreStop,
    /// Rendezvous with every other worker before continuing.
    Barrier,
    /// Rendezvous, then the coordinator starts a timer.
    TimeBarrier,
    /// Rendezvous at the end of a timed phase.
    EndTimeBarrier,
    /// Rendezvous on a clock tick (periodic sampling boundary).
    ClockBarrier,
}

impl TaskError {
    pub fn is_barrier(self) -> bool {
        matches!(
            self,
            TaskError::Barrier | TaskError::TimeBarrier | TaskError::EndTimeBarrier | TaskError::ClockBarrier
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskError::AssertFault | TaskError::PreStop)
    }
}
