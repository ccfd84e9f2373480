use std::fmt;

/// End of a task slice, exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SliceEnd {
    Index(usize),
    /// Through the last item of the dataset. Rendered as `-1` on the command line.
    ToEnd,
}

impl SliceEnd {
    pub fn as_arg(&self) -> i64 {
        match self {
            SliceEnd::Index(i) => *i as i64,
            SliceEnd::ToEnd => -1,
        }
    }

    /// Concrete end index for a dataset holding `len` items.
    pub fn resolve(&self, len: usize) -> usize {
        match self {
            SliceEnd::Index(i) => (*i).min(len),
            SliceEnd::ToEnd => len,
        }
    }
}

impl fmt::Display for SliceEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_arg()) }
}

/// One slice of one dataset, predicted by one worker process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskDescriptor {
    /// Model trained on another dataset; `None` predicts the target with its own model.
    pub source_model: Option<String>,
    pub target_dataset: String,
    pub start_index: usize,
    pub end_index: SliceEnd,
    /// Progress-bar row of the worker. Cosmetic only.
    pub display_slot: usize,
}

impl TaskDescriptor {
    pub fn model(&self) -> &str { self.source_model.as_deref().unwrap_or(&self.target_dataset) }

    pub fn is_cross(&self) -> bool { self.source_model.is_some() }

    /// Prediction folder name, e.g. `ECU_on_HGR`.
    pub fn output_name(&self) -> String { format!("{}_on_{}", self.model(), self.target_dataset) }

    /// Arguments for the `single` worker subcommand.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec!["single".to_string(), format!("--model={}", self.model())];
        if self.is_cross() {
            args.push(format!("--predict={}", self.target_dataset));
        }
        args.push(format!("--from={}", self.start_index));
        args.push(format!("--to={}", self.end_index));
        args.push(format!("--bar={}", self.display_slot));
        args
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}..{}] #{}", self.output_name(), self.start_index, self.end_index, self.display_slot)
    }
}

/// Split one target dataset into `task_count` slices of `workload` items.
///
/// The last slice always runs to the end of the dataset, absorbing any
/// remainder. Returns the descriptors and the next free display slot.
pub fn generate_tasks(
    target_dataset: &str,
    task_count: usize,
    dataset_size: usize,
    workload: usize,
    source_model: Option<&str>,
    start_display_slot: usize,
) -> (Vec<TaskDescriptor>, usize) {
    let mut tasks = Vec::with_capacity(task_count);
    let mut slot = start_display_slot;
    let mut start = 0usize;

    for i in 0..task_count {
        if start > dataset_size { break; }
        let mut end = SliceEnd::Index(start + workload);
        if i == task_count - 1 || start + workload > dataset_size {
            end = SliceEnd::ToEnd;
        }
        tasks.push(TaskDescriptor {
            source_model: source_model.map(str::to_string),
            target_dataset: target_dataset.to_string(),
            start_index: start,
            end_index: end,
            display_slot: slot,
        });
        slot += 1;
        match end {
            SliceEnd::Index(e) => start = e,
            SliceEnd::ToEnd => break,
        }
    }
    (tasks, slot)
}
