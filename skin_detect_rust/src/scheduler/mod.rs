//! Splits prediction work into bounded tasks and runs them on a pool of
//! worker processes.
//!
//! `workload` picks the slice size, `allocate` the number of slices per
//! dataset, `commands` turns them into task descriptors and `pool` runs them.

pub mod allocate;
pub mod commands;
pub mod pool;
pub mod workload;

pub use allocate::{allocate_tasks, Allocation, AllocationEntry, AllocationPolicy};
pub use commands::{generate_tasks, SliceEnd, TaskDescriptor};
pub use pool::{CommandLauncher, Launcher, PoolConfig, PoolReport, PoolStatus, ProcessPool, TaskReport, WorkerExit, WorkerHandle, WorkerOutcome};
pub use workload::{compute_workload, Workload, MAX_TASK_SIZE};
