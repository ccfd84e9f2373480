use crate::error::{PlanError, PlanResult};

/// Items a single worker task should process at most.
///
/// Sized so one task finishes in roughly ten minutes on typical dataset images.
pub const MAX_TASK_SIZE: usize = 300;

/// Per-task slice size chosen for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    /// Items per task, always positive.
    pub workload: usize,
    /// Sum of the item counts of every dataset in the run.
    pub total_items: usize,
}

/// Pick the per-task slice size for a set of datasets and a worker budget.
///
/// Starts from one task per worker and keeps splitting (two tasks per worker,
/// three, ...) until a task holds at most `max_task_size` items.
pub fn compute_workload(sizes: &[(String, usize)], worker_budget: usize, max_task_size: usize) -> PlanResult<Workload> {
    if worker_budget == 0 { return Err(PlanError::ZeroWorkers); }
    if sizes.is_empty() { return Err(PlanError::NoDatasets); }

    let total_items: usize = sizes.iter().map(|(_, n)| *n).sum();
    if total_items == 0 { return Err(PlanError::EmptyWorkload); }

    let max_task_size = max_task_size.max(1);
    let mut workload = total_items / worker_budget;
    let mut k = 2usize;
    while workload > max_task_size {
        workload = total_items / (worker_budget * k);
        k += 1;
    }
    // fewer items than workers
    let workload = workload.max(1);

    Ok(Workload { workload, total_items })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(v: &[(&str, usize)]) -> Vec<(String, usize)> {
        v.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn first_pass_already_small_enough() {
        let w = compute_workload(&sizes(&[("A", 100), ("B", 500)]), 2, MAX_TASK_SIZE).unwrap();
        assert_eq!(w, Workload { workload: 300, total_items: 600 });
    }

    #[test]
    fn shrinks_until_under_ceiling() {
        // 4000 / 4 = 1000, / 8 = 500, / 12 = 333, / 16 = 250
        let w = compute_workload(&sizes(&[("ECU", 4000)]), 4, MAX_TASK_SIZE).unwrap();
        assert_eq!(w.workload, 250);
    }

    #[test]
    fn more_workers_than_items() {
        let w = compute_workload(&sizes(&[("tiny", 3)]), 8, MAX_TASK_SIZE).unwrap();
        assert_eq!(w.workload, 1);
    }

    #[test]
    fn rejects_degenerate_input() {
        assert!(matches!(compute_workload(&sizes(&[("A", 10)]), 0, 300), Err(PlanError::ZeroWorkers)));
        assert!(matches!(compute_workload(&[], 2, 300), Err(PlanError::NoDatasets)));
        assert!(matches!(compute_workload(&sizes(&[("A", 0), ("B", 0)]), 2, 300), Err(PlanError::EmptyWorkload)));
    }
}
