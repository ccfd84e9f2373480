//! Bounded pool of worker processes.
//!
//! The pool is a single-threaded polling loop: it never blocks on a child,
//! it only asks each one whether it has exited, admits one pending task when
//! a slot is free, and otherwise sleeps for a short while. Workers are plain
//! OS processes with inherited stdio, so their logs reach the operator's
//! terminal and a crashing worker cannot take the scheduler down.

use crate::error::{PlanError, PlanResult};
use crate::scheduler::commands::TaskDescriptor;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Exit information of a finished worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self { Self { success: status.success(), code: status.code() } }
}

/// A running worker the pool can poll and terminate.
pub trait WorkerHandle {
    fn id(&self) -> Option<u32>;
    /// Non-blocking liveness check; `Some` once the worker has exited.
    fn poll(&mut self) -> io::Result<Option<WorkerExit>>;
    /// Terminate and reap the worker.
    fn kill(&mut self) -> io::Result<()>;
}

impl WorkerHandle for Child {
    fn id(&self) -> Option<u32> { Some(Child::id(self)) }

    fn poll(&mut self) -> io::Result<Option<WorkerExit>> { Ok(self.try_wait()?.map(WorkerExit::from)) }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)?;
        self.wait().map(|_| ())
    }
}

/// Turns a task descriptor into a running worker.
pub trait Launcher {
    type Handle: WorkerHandle;
    fn launch(&mut self, task: &TaskDescriptor) -> io::Result<Self::Handle>;
}

/// Launches `<program> <leading args> single --model=.. --from=.. --to=.. --bar=..`.
#[derive(Clone, Debug)]
pub struct CommandLauncher {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self { Self { program: program.into(), leading_args: Vec::new() } }

    /// Re-executes the running binary in worker mode.
    pub fn current_exe() -> io::Result<Self> { Ok(Self::new(std::env::current_exe()?)) }

    /// Arguments placed before the task arguments (global flags such as `--config`).
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path { &self.program }

    pub fn command_for(&self, task: &TaskDescriptor) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(task.worker_args())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl Launcher for CommandLauncher {
    type Handle = Child;

    fn launch(&mut self, task: &TaskDescriptor) -> io::Result<Child> {
        let mut cmd = self.command_for(task);
        debug!("Command: {:?}", cmd);
        cmd.spawn()
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Pause taken when no task can be admitted.
    pub idle_sleep: Duration,
    /// Kill workers running longer than this. Disabled by default.
    pub task_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self { Self { idle_sleep: Duration::from_millis(1500), task_timeout: None } }
}

/// How a task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    LaunchFailed(String),
    /// The pool could not query the worker any more.
    Lost(String),
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool { matches!(self, WorkerOutcome::Succeeded) }
}

#[derive(Clone, Debug)]
pub struct TaskReport {
    pub task: TaskDescriptor,
    pub outcome: WorkerOutcome,
    pub elapsed: Duration,
}

/// Outcome of every task of a pool run, in completion order.
#[derive(Clone, Debug, Default)]
pub struct PoolReport {
    pub reports: Vec<TaskReport>,
    pub launched: usize,
    pub max_running: usize,
}

impl PoolReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> { self.reports.iter().filter(|r| !r.outcome.is_success()) }

    pub fn succeeded(&self) -> usize { self.reports.iter().filter(|r| r.outcome.is_success()).count() }

    pub fn is_success(&self) -> bool { self.failures().next().is_none() }
}

/// Snapshot of the pool taken after every scheduling decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub pending: usize,
    pub running: usize,
    pub launched: usize,
    pub finished: usize,
}

struct Running<H> {
    task: TaskDescriptor,
    handle: H,
    started: Instant,
}

pub struct ProcessPool<L: Launcher> {
    launcher: L,
    config: PoolConfig,
    observer: Option<Box<dyn FnMut(&PoolStatus)>>,
}

impl<L: Launcher> ProcessPool<L> {
    pub fn new(launcher: L, config: PoolConfig) -> Self { Self { launcher, config, observer: None } }

    /// Called with the pool status after each admission, completion or idle tick.
    pub fn on_status(mut self, observer: impl FnMut(&PoolStatus) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn launcher(&self) -> &L { &self.launcher }

    /// Run every task, at most `worker_budget` at a time, and wait for all of them.
    ///
    /// Individual task failures never abort the run; they are collected in the
    /// returned report.
    pub fn run(&mut self, tasks: Vec<TaskDescriptor>, worker_budget: usize) -> PlanResult<PoolReport> {
        if worker_budget == 0 { return Err(PlanError::ZeroWorkers); }

        let total = tasks.len();
        let mut pending: VecDeque<TaskDescriptor> = tasks.into();
        let mut running: Vec<Running<L::Handle>> = Vec::with_capacity(worker_budget);
        let mut report = PoolReport::default();
        info!("Scheduling {} tasks on {} workers", total, worker_budget);

        loop {
            let finished = self.reap(&mut running, &mut report);
            if finished > 0 { self.notify(&pending, &running, &report); }

            if pending.is_empty() && running.is_empty() { break; }

            if !pending.is_empty() && running.len() < worker_budget {
                if let Some(task) = pending.pop_front() { self.admit(task, &mut running, &mut report); }
                report.max_running = report.max_running.max(running.len());
                self.notify(&pending, &running, &report);
            } else {
                debug!("TASKS REMAINING: {}, WORKERS ALIVE: {}", pending.len(), running.len());
                if !self.config.idle_sleep.is_zero() { thread::sleep(self.config.idle_sleep); }
            }
        }

        let failed = report.failures().count();
        if failed == 0 {
            info!("All {} tasks completed", report.reports.len());
        } else {
            warn!("{} of {} tasks did not complete:", failed, report.reports.len());
            for r in report.failures() { warn!("  {} -> {:?}", r.task, r.outcome); }
        }
        Ok(report)
    }

    fn admit(&mut self, task: TaskDescriptor, running: &mut Vec<Running<L::Handle>>, report: &mut PoolReport) {
        match self.launcher.launch(&task) {
            Ok(handle) => {
                report.launched += 1;
                info!("Launched {} (pid {:?})", task, handle.id());
                running.push(Running { task, handle, started: Instant::now() });
            }
            Err(e) => {
                error!("Failed to launch {}: {}", task, e);
                report.reports.push(TaskReport { task, outcome: WorkerOutcome::LaunchFailed(e.to_string()), elapsed: Duration::ZERO });
            }
        }
    }

    /// Drop exited (or timed out) workers from the running set. Returns how many left.
    fn reap(&mut self, running: &mut Vec<Running<L::Handle>>, report: &mut PoolReport) -> usize {
        let before = running.len();
        let mut i = 0;
        while i < running.len() {
            let elapsed = running[i].started.elapsed();
            let outcome = match running[i].handle.poll() {
                Ok(Some(exit)) if exit.success => Some(WorkerOutcome::Succeeded),
                Ok(Some(exit)) => Some(WorkerOutcome::Failed { code: exit.code }),
                Ok(None) => match self.config.task_timeout {
                    Some(limit) if elapsed > limit => {
                        if let Err(e) = running[i].handle.kill() { warn!("Failed to kill {}: {}", running[i].task, e); }
                        Some(WorkerOutcome::TimedOut)
                    }
                    _ => None,
                },
                Err(e) => {
                    // the process may still be alive
                    if let Err(k) = running[i].handle.kill() { warn!("Failed to kill {}: {}", running[i].task, k); }
                    Some(WorkerOutcome::Lost(e.to_string()))
                }
            };
            match outcome {
                Some(outcome) => {
                    let Running { task, .. } = running.swap_remove(i);
                    match &outcome {
                        WorkerOutcome::Succeeded => info!("Finished {} in {:.1}s", task, elapsed.as_secs_f64()),
                        other => warn!("Task {} ended with {:?}", task, other),
                    }
                    report.reports.push(TaskReport { task, outcome, elapsed });
                }
                None => i += 1,
            }
        }
        before - running.len()
    }

    fn notify(&mut self, pending: &VecDeque<TaskDescriptor>, running: &[Running<L::Handle>], report: &PoolReport) {
        let status = PoolStatus { pending: pending.len(), running: running.len(), launched: report.launched, finished: report.reports.len() };
        debug!("{:?}", status);
        if let Some(observer) = self.observer.as_mut() { observer(&status); }
    }
}
