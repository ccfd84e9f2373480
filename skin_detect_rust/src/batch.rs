//! Batch planning: which slices of which datasets each worker predicts.

use crate::config::Config;
use crate::dataset::{SizeSource, SplitMode};
use crate::error::{PlanError, PlanResult};
use crate::scheduler::{allocate_tasks, compute_workload, generate_tasks, Allocation, AllocationPolicy, Launcher, PoolReport, ProcessPool, TaskDescriptor, Workload, MAX_TASK_SIZE};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchKind {
    /// Each model on the testing split of its own dataset.
    Base,
    /// Each model on every row of every other dataset.
    Cross,
    /// Base, then cross.
    All,
    /// One model on one dataset, split over the workers.
    Single,
}

impl BatchKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Some(Self::Base),
            "cross" => Some(Self::Cross),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { Self::Base => "base", Self::Cross => "cross", Self::All => "all", Self::Single => "single" };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanOptions {
    pub max_task_size: usize,
    pub allocation: AllocationPolicy,
}

impl Default for PlanOptions {
    fn default() -> Self { Self { max_task_size: MAX_TASK_SIZE, allocation: AllocationPolicy::Exact } }
}

impl From<&Config> for PlanOptions {
    fn from(cfg: &Config) -> Self { Self { max_task_size: cfg.max_task_size, allocation: cfg.allocation } }
}

/// Workload and allocation of one group of tasks sharing a split mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    pub mode: SplitMode,
    pub workload: Workload,
    pub allocation: Allocation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    pub kind: BatchKind,
    pub workers: usize,
    pub stages: Vec<Stage>,
    /// Tasks in launch order.
    pub tasks: Vec<TaskDescriptor>,
}

impl BatchPlan {
    pub fn total_items(&self) -> usize { self.stages.iter().map(|s| s.workload.total_items).sum() }
}

/// Turn the `--workers` argument into a worker budget.
///
/// `-1` means one worker per physical core.
pub fn resolve_workers(workers: i64) -> PlanResult<usize> {
    match workers {
        -1 => Ok(num_cpus::get_physical().max(1)),
        0 => Err(PlanError::ZeroWorkers),
        n if n < 0 => Err(PlanError::InvalidWorkers(n)),
        n => Ok(n as usize),
    }
}

fn validate(src: &impl SizeSource, datasets: &[String]) -> PlanResult<()> {
    if datasets.is_empty() { return Err(PlanError::NoDatasets); }
    let mut seen = HashSet::new();
    for name in datasets {
        if !seen.insert(name.as_str()) { return Err(PlanError::DuplicateDataset(name.clone())); }
        if !src.contains(name) { return Err(PlanError::UnknownDataset(name.clone())); }
    }
    Ok(())
}

fn measure(src: &impl SizeSource, datasets: &[String], mode: SplitMode) -> PlanResult<Vec<(String, usize)>> {
    datasets
        .iter()
        .map(|name| {
            src.item_count(name, mode)
                .map(|n| (name.clone(), n))
                .map_err(|source| PlanError::DatasetUnreadable { name: name.clone(), source })
        })
        .collect()
}

fn stage(sizes: &[(String, usize)], mode: SplitMode, workers: usize, opts: &PlanOptions) -> PlanResult<Stage> {
    let workload = compute_workload(sizes, workers, opts.max_task_size)?;
    let allocation = allocate_tasks(sizes, workload.workload, opts.allocation);
    debug!("{:?} stage: {} items, workload {}, {} tasks", mode, workload.total_items, workload.workload, allocation.total_tasks());
    for e in allocation.entries() {
        debug!("  {}: {} items -> {} tasks", e.name, e.item_count, e.task_count);
        if e.task_count == 0 && e.item_count > 0 {
            warn!("{} gets no task: its {} items will not be predicted", e.name, e.item_count);
        }
    }
    Ok(Stage { mode, workload, allocation })
}

fn base_tasks(stage: &Stage, slot: usize) -> (Vec<TaskDescriptor>, usize) {
    let mut tasks = Vec::new();
    let mut slot = slot;
    for e in stage.allocation.entries() {
        let (t, next) = generate_tasks(&e.name, e.task_count, e.item_count, stage.workload.workload, None, slot);
        tasks.extend(t);
        slot = next;
    }
    (tasks, slot)
}

// every model against every other target, each slice sized by the target
fn cross_tasks(stage: &Stage, datasets: &[String], slot: usize) -> (Vec<TaskDescriptor>, usize) {
    let mut tasks = Vec::new();
    let mut slot = slot;
    for model in datasets {
        for e in stage.allocation.entries().iter().filter(|e| &e.name != model) {
            let (t, next) = generate_tasks(&e.name, e.task_count, e.item_count, stage.workload.workload, Some(model), slot);
            tasks.extend(t);
            slot = next;
        }
    }
    (tasks, slot)
}

/// Each model predicts the testing split of its own dataset.
pub fn plan_base(src: &impl SizeSource, datasets: &[String], workers: usize, opts: &PlanOptions) -> PlanResult<BatchPlan> {
    validate(src, datasets)?;
    let sizes = measure(src, datasets, SplitMode::Test)?;
    let stage = stage(&sizes, SplitMode::Test, workers, opts)?;
    let (tasks, _) = base_tasks(&stage, 0);
    Ok(BatchPlan { kind: BatchKind::Base, workers, stages: vec![stage], tasks })
}

/// Each model predicts every row of every other selected dataset.
pub fn plan_cross(src: &impl SizeSource, datasets: &[String], workers: usize, opts: &PlanOptions) -> PlanResult<BatchPlan> {
    validate(src, datasets)?;
    if datasets.len() < 2 { warn!("Cross predictions need at least two datasets"); }
    let sizes = measure(src, datasets, SplitMode::All)?;
    let stage = stage(&sizes, SplitMode::All, workers, opts)?;
    let (tasks, _) = cross_tasks(&stage, datasets, 0);
    Ok(BatchPlan { kind: BatchKind::Cross, workers, stages: vec![stage], tasks })
}

/// Base tasks followed by cross tasks, display slots numbered across both.
pub fn plan_all(src: &impl SizeSource, datasets: &[String], workers: usize, opts: &PlanOptions) -> PlanResult<BatchPlan> {
    validate(src, datasets)?;
    let base = stage(&measure(src, datasets, SplitMode::Test)?, SplitMode::Test, workers, opts)?;
    let cross = stage(&measure(src, datasets, SplitMode::All)?, SplitMode::All, workers, opts)?;
    let (mut tasks, slot) = base_tasks(&base, 0);
    tasks.extend(cross_tasks(&cross, datasets, slot).0);
    Ok(BatchPlan { kind: BatchKind::All, workers, stages: vec![base, cross], tasks })
}

/// One model on one dataset, split over the workers like a batch.
pub fn plan_single(src: &impl SizeSource, model: &str, predict: Option<&str>, workers: usize, opts: &PlanOptions) -> PlanResult<BatchPlan> {
    let target = predict.unwrap_or(model);
    if !src.contains(model) { return Err(PlanError::UnknownDataset(model.to_string())); }
    let targets = [target.to_string()];
    validate(src, &targets)?;

    let (mode, source) = if target == model { (SplitMode::Test, None) } else { (SplitMode::All, Some(model)) };
    let stage = stage(&measure(src, &targets, mode)?, mode, workers, opts)?;
    let mut tasks = Vec::new();
    for e in stage.allocation.entries() {
        tasks.extend(generate_tasks(&e.name, e.task_count, e.item_count, stage.workload.workload, source, 0).0);
    }
    Ok(BatchPlan { kind: BatchKind::Single, workers, stages: vec![stage], tasks })
}

/// Launch every task of the plan and wait for all of them.
pub fn run_plan<L: Launcher>(plan: &BatchPlan, pool: &mut ProcessPool<L>) -> PlanResult<PoolReport> {
    info!("{} batch: {} items in {} tasks on {} workers", plan.kind, plan.total_items(), plan.tasks.len(), plan.workers);
    if plan.tasks.is_empty() {
        warn!("Nothing to predict");
        return Ok(PoolReport::default());
    }
    pool.run(plan.tasks.clone(), plan.workers)
}
