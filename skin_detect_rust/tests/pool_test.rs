use parking_lot::Mutex;
use skin_detect_rust::scheduler::{generate_tasks, Launcher, PoolConfig, PoolStatus, ProcessPool, TaskDescriptor, WorkerExit, WorkerHandle, WorkerOutcome};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A worker that finishes after a fixed number of liveness polls.
struct Ticking {
    left: usize,
    running: Arc<Mutex<usize>>,
}

impl WorkerHandle for Ticking {
    fn id(&self) -> Option<u32> { None }

    fn poll(&mut self) -> io::Result<Option<WorkerExit>> {
        if self.left > 0 {
            self.left -= 1;
            return Ok(None);
        }
        *self.running.lock() -= 1;
        Ok(Some(WorkerExit { success: true, code: Some(0) }))
    }

    fn kill(&mut self) -> io::Result<()> { Ok(()) }
}

#[derive(Default)]
struct Ticker {
    running: Arc<Mutex<usize>>,
    peak: usize,
    launched: usize,
}

impl Launcher for Ticker {
    type Handle = Ticking;

    fn launch(&mut self, task: &TaskDescriptor) -> io::Result<Ticking> {
        let mut running = self.running.lock();
        *running += 1;
        self.peak = self.peak.max(*running);
        self.launched += 1;
        // later slots run longer so completions interleave
        Ok(Ticking { left: 2 + task.display_slot % 3, running: self.running.clone() })
    }
}

fn no_sleep() -> PoolConfig { PoolConfig { idle_sleep: Duration::ZERO, task_timeout: None } }

#[test]
fn five_tasks_on_two_workers() {
    let (tasks, _) = generate_tasks("A", 5, 1000, 200, None, 0);
    let history = Arc::new(Mutex::new(Vec::<PoolStatus>::new()));
    let sink = history.clone();
    let mut pool = ProcessPool::new(Ticker::default(), no_sleep()).on_status(move |s| sink.lock().push(*s));

    let report = pool.run(tasks, 2).unwrap();
    assert_eq!(report.launched, 5);
    assert_eq!(report.succeeded(), 5);
    assert_eq!(pool.launcher().peak, 2);
    assert_eq!(pool.launcher().launched, 5);

    let history = history.lock();
    assert!(history.iter().all(|s| s.running <= 2));
    let last = history.last().copied().unwrap();
    assert_eq!((last.pending, last.running, last.launched, last.finished), (0, 0, 5, 5));
}

#[test]
fn budget_larger_than_queue() {
    let (tasks, _) = generate_tasks("A", 3, 30, 10, None, 0);
    let mut pool = ProcessPool::new(Ticker::default(), no_sleep());
    let report = pool.run(tasks, 16).unwrap();
    assert_eq!(report.max_running, 3);
    assert!(report.is_success());
}

#[cfg(unix)]
mod real_processes {
    use super::*;
    use skin_detect_rust::scheduler::CommandLauncher;
    use std::time::Instant;

    // `sh -c <script> worker single --model=...`: the task arguments land in $1..
    fn shell(script: &str) -> CommandLauncher { CommandLauncher::new("sh").with_leading_args(["-c", script, "worker"]) }

    #[test]
    fn exit_codes_are_collected() {
        let (tasks, _) = generate_tasks("A", 4, 40, 10, None, 0);
        // the slice starting at 20 fails
        let mut pool = ProcessPool::new(shell(r#"[ "$3" != "--from=20" ] || exit 4"#), no_sleep());
        let report = pool.run(tasks, 2).unwrap();

        assert_eq!(report.launched, 4);
        assert_eq!(report.succeeded(), 3);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task.start_index, 20);
        assert_eq!(failed[0].outcome, WorkerOutcome::Failed { code: Some(4) });
    }

    #[test]
    fn missing_program_does_not_stop_the_run() {
        let (tasks, _) = generate_tasks("A", 2, 20, 10, None, 0);
        let mut pool = ProcessPool::new(CommandLauncher::new("/nonexistent/skin_detect_worker"), no_sleep());
        let report = pool.run(tasks, 2).unwrap();
        assert_eq!(report.launched, 0);
        assert_eq!(report.reports.len(), 2);
        assert!(report.reports.iter().all(|r| matches!(r.outcome, WorkerOutcome::LaunchFailed(_))));
    }

    #[test]
    fn hung_worker_is_killed() {
        let (tasks, _) = generate_tasks("A", 1, 10, 10, None, 0);
        let config = PoolConfig { idle_sleep: Duration::from_millis(10), task_timeout: Some(Duration::from_millis(200)) };
        let mut pool = ProcessPool::new(shell("exec sleep 30"), config);
        let started = Instant::now();
        let report = pool.run(tasks, 1).unwrap();
        assert_eq!(report.reports[0].outcome, WorkerOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn worker_budget_holds_for_real_processes() {
        let (tasks, _) = generate_tasks("A", 6, 60, 10, None, 0);
        let mut pool = ProcessPool::new(shell("sleep 0.2"), PoolConfig { idle_sleep: Duration::from_millis(20), task_timeout: None });
        let report = pool.run(tasks, 3).unwrap();
        assert_eq!(report.succeeded(), 6);
        assert!(report.max_running <= 3);
    }
}
