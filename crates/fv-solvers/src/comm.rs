//! Process communicators consumed by the solver layer.
//!
//! The solver never reaches for a process-wide communicator: every partition
//! carries its own handle, and collective reductions go through it.
//!
//! - [`SerialComm`]: one process, reductions are the identity.
//! - [`LocalGroupComm`]: `n` ranks living on threads of one process.

use std::sync::{Arc, Barrier, Mutex, MutexGuard};

/// Collective operations needed by the distributed backend.
///
/// Every rank of a group must reach each collective call in the same order.
pub trait Communicator: Send + Sync {
    fn process_id(&self) -> usize;

    fn number_of_processes(&self) -> usize;

    /// Sum of `value` over all ranks.
    fn all_reduce_sum(&self, value: f64) -> f64;

    /// Maximum of `value` over all ranks.
    fn all_reduce_max(&self, value: f64) -> f64;

    /// Concatenation of every rank's `(global id, value)` pairs, in rank order.
    fn all_gather(&self, local: &[(usize, f64)]) -> Vec<(usize, f64)>;

    fn is_parallel(&self) -> bool {
        self.number_of_processes() > 1
    }
}

/// Single-process communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn process_id(&self) -> usize {
        0
    }

    fn number_of_processes(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        value
    }

    fn all_gather(&self, local: &[(usize, f64)]) -> Vec<(usize, f64)> {
        local.to_vec()
    }
}

struct GroupShared {
    barrier: Barrier,
    scalars: Mutex<Vec<f64>>,
    pairs: Mutex<Vec<Vec<(usize, f64)>>>,
}

/// Communicator for a group of ranks running on threads of one process.
///
/// Each rank deposits its contribution in its own slot, waits at the
/// barrier, reads every slot in rank order, then waits again so no rank
/// overwrites a slot that another is still reading. Locks are released
/// before every barrier.
#[derive(Clone)]
pub struct LocalGroupComm {
    rank: usize,
    size: usize,
    shared: Arc<GroupShared>,
}

impl LocalGroupComm {
    /// Create the communicators of a `size`-rank group, one per rank.
    pub fn group(size: usize) -> Vec<LocalGroupComm> {
        let size = size.max(1);
        let shared = Arc::new(GroupShared {
            barrier: Barrier::new(size),
            scalars: Mutex::new(vec![0.0; size]),
            pairs: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalGroupComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn reduce(&self, value: f64, fold: impl Fn(f64, f64) -> f64, init: f64) -> f64 {
        lock(&self.shared.scalars)[self.rank] = value;
        self.shared.barrier.wait();
        let result = lock(&self.shared.scalars).iter().copied().fold(init, fold);
        self.shared.barrier.wait();
        result
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for LocalGroupComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGroupComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for LocalGroupComm {
    fn process_id(&self) -> usize {
        self.rank
    }

    fn number_of_processes(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        self.reduce(value, |a, b| a + b, 0.0)
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        self.reduce(value, f64::max, f64::NEG_INFINITY)
    }

    fn all_gather(&self, local: &[(usize, f64)]) -> Vec<(usize, f64)> {
        lock(&self.shared.pairs)[self.rank] = local.to_vec();
        self.shared.barrier.wait();
        let gathered = lock(&self.shared.pairs).concat();
        self.shared.barrier.wait();
        gathered
    }
}
