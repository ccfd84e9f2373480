use serde::{Deserialize, Serialize};

/// How many tasks each dataset receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// `ceil(size / workload)` tasks per dataset. Covers every item.
    #[default]
    Exact,
    /// Historical heuristic: spend a global budget of `total / workload` tasks
    /// in round-robin passes. Reproduces older prediction runs but may leave a
    /// dataset without tasks when there are more datasets than budget.
    Greedy,
}

impl AllocationPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" | "ceil" => Some(Self::Exact),
            "greedy" | "legacy" => Some(Self::Greedy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationEntry {
    pub name: String,
    pub item_count: usize,
    pub task_count: usize,
}

/// Task count per dataset, in dataset iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    entries: Vec<AllocationEntry>,
}

impl Allocation {
    pub fn entries(&self) -> &[AllocationEntry] { &self.entries }

    pub fn get(&self, name: &str) -> Option<&AllocationEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn tasks_for(&self, name: &str) -> usize {
        self.get(name).map(|e| e.task_count).unwrap_or(0)
    }

    pub fn total_tasks(&self) -> usize {
        self.entries.iter().map(|e| e.task_count).sum()
    }
}

fn max_tasks(size: usize, workload: usize) -> usize { (size + workload - 1) / workload }

/// Decide how many tasks each dataset needs at `workload` items per task.
pub fn allocate_tasks(sizes: &[(String, usize)], workload: usize, policy: AllocationPolicy) -> Allocation {
    let workload = workload.max(1);
    let counts = match policy {
        AllocationPolicy::Exact => sizes.iter().map(|(_, n)| max_tasks(*n, workload)).collect(),
        AllocationPolicy::Greedy => greedy_counts(sizes, workload),
    };
    let entries = sizes
        .iter()
        .zip(counts)
        .map(|((name, n), task_count)| AllocationEntry { name: name.clone(), item_count: *n, task_count })
        .collect();
    Allocation { entries }
}

fn greedy_counts(sizes: &[(String, usize)], workload: usize) -> Vec<usize> {
    let total: usize = sizes.iter().map(|(_, n)| *n).sum();
    let mut budget = total / workload;
    let mut remaining: Vec<usize> = sizes.iter().map(|(_, n)| *n).collect();
    let mut counts = vec![0usize; sizes.len()];

    while budget > 0 && remaining.iter().any(|r| *r > 0) {
        for i in 0..remaining.len() {
            if budget == 0 { break; }
            if remaining[i] == 0 { continue; }
            counts[i] += 1;
            remaining[i] = remaining[i].saturating_sub(workload);
            budget -= 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(v: &[(&str, usize)]) -> Vec<(String, usize)> {
        v.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn greedy_runs_out_of_budget() {
        let a = allocate_tasks(&sizes(&[("A", 100), ("B", 500)]), 300, AllocationPolicy::Greedy);
        assert_eq!(a.tasks_for("A"), 1);
        assert_eq!(a.tasks_for("B"), 1);
        assert_eq!(a.total_tasks(), 2);
    }

    #[test]
    fn greedy_multiple_passes() {
        // budget = 1500 / 250 = 6; pass 1: A,B,C; pass 2: B,C; pass 3: C
        let a = allocate_tasks(&sizes(&[("A", 200), ("B", 400), ("C", 900)]), 250, AllocationPolicy::Greedy);
        assert_eq!(a.tasks_for("A"), 1);
        assert_eq!(a.tasks_for("B"), 2);
        assert_eq!(a.tasks_for("C"), 3);
    }

    #[test]
    fn greedy_can_starve_a_dataset() {
        let a = allocate_tasks(&sizes(&[("A", 10), ("B", 10)]), 20, AllocationPolicy::Greedy);
        assert_eq!(a.tasks_for("A"), 1);
        assert_eq!(a.tasks_for("B"), 0);
    }

    #[test]
    fn exact_covers_every_dataset() {
        let a = allocate_tasks(&sizes(&[("A", 100), ("B", 500), ("C", 0)]), 300, AllocationPolicy::Exact);
        assert_eq!(a.tasks_for("A"), 1);
        assert_eq!(a.tasks_for("B"), 2);
        assert_eq!(a.tasks_for("C"), 0);
        assert_eq!(a.entries().iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), ["A", "B", "C"]);
    }

    #[test]
    fn greedy_never_exceeds_ceiling() {
        let s = sizes(&[("A", 301), ("B", 1), ("C", 1)]);
        let a = allocate_tasks(&s, 100, AllocationPolicy::Greedy);
        for e in a.entries() {
            assert!(e.task_count <= max_tasks(e.item_count, 100));
        }
    }

    #[test]
    fn policy_names() {
        assert_eq!(AllocationPolicy::from_str("GREEDY"), Some(AllocationPolicy::Greedy));
        assert_eq!(AllocationPolicy::from_str("exact"), Some(AllocationPolicy::Exact));
        assert_eq!(AllocationPolicy::from_str("bin-packing"), None);
    }
}
