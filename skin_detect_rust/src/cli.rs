//! Command line of the `skin_detect` binary. Scheduled workers are started
//! with the arguments rendered by `TaskDescriptor::worker_args`, so both
//! sides live in the library.

use clap::{ArgAction, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skin_detect", version, about = "Statistical skin detector with multi-process batch predictions")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long = "config", global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Print more info
    #[arg(long = "debug", global = true, action = ArgAction::SetTrue)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Cmd,
}

/// Scheduler knobs shared by the multi-process commands.
#[derive(clap::Args, Debug)]
pub struct PoolArgs {
    /// Number of worker processes, -1 for one per physical core
    #[arg(short = 'w', long = "workers", default_value_t = -1, allow_negative_numbers = true)]
    pub workers: i64,
    /// Task allocation policy: exact or greedy
    #[arg(long = "allocation")]
    pub allocation: Option<String>,
    /// Kill workers running longer than this many seconds
    #[arg(long = "task-timeout")]
    pub task_timeout: Option<u64>,
    /// Print the worker commands without running them
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Predict one slice of a dataset with one model (worker entry point)
    Single {
        #[arg(short = 'm', long = "model")]
        model: String,
        #[arg(short = 'p', long = "predict")]
        predict: Option<String>,
        /// Slice start
        #[arg(short = 'f', long = "from", default_value_t = 0)]
        from: usize,
        /// Slice end (index excluded), -1 for the dataset end
        #[arg(short = 't', long = "to", default_value_t = -1, allow_negative_numbers = true)]
        to: i64,
        /// Progress bar position (for multiprocessing)
        #[arg(short = 'b', long = "bar", default_value_t = -1, allow_negative_numbers = true)]
        bar: i64,
    },
    /// Multiprocessing on a single prediction
    Singlem {
        #[arg(short = 'm', long = "model")]
        model: String,
        #[arg(short = 'p', long = "predict")]
        predict: Option<String>,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Multiprocessing on batch predictions (base, cross or both)
    Batch {
        #[arg(short = 't', long = "type", value_parser = ["base", "cross", "all"])]
        kind: String,
        /// Datasets to use (eg. -d ECU -d HGR_small)
        #[arg(short = 'd', long = "dataset", required = true)]
        datasets: Vec<String>,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Train the model of a dataset from its training and validation splits
    Train {
        #[arg(short = 'd', long = "dataset")]
        dataset: String,
        /// Number of threads
        #[arg(long = "threads")]
        threads: Option<usize>,
    },
    /// Evaluate a prediction folder (eg. predictions/ECU_on_HGR)
    Eval {
        #[arg(short = 'p', long = "path", value_hint = ValueHint::DirPath)]
        path: PathBuf,
    },
    /// Reassign the training/testing/validation splits of a dataset at random
    Randomize {
        #[arg(short = 'd', long = "dataset")]
        dataset: String,
        #[arg(long = "seed")]
        seed: Option<u64>,
    },
    /// Time the inference of a dataset's model on its testing images
    Bench {
        #[arg(short = 'd', long = "dataset", default_value = "ECU")]
        dataset: String,
        /// Testing images to predict, -1 for all of them
        #[arg(short = 's', long = "size", default_value_t = 15, allow_negative_numbers = true)]
        size: i64,
        /// Number of timed runs
        #[arg(short = 'o', long = "observations", default_value_t = 5)]
        observations: usize,
    },
}

impl Cli {
    /// Pool arguments of the multi-process commands.
    pub fn pool_args(&self) -> Option<&PoolArgs> {
        match &self.command {
            Cmd::Singlem { pool, .. } | Cmd::Batch { pool, .. } => Some(pool),
            _ => None,
        }
    }

    /// Arguments placed before every worker's own: the scheduler's configuration
    /// file and verbosity.
    pub fn worker_leading_args(&self) -> Vec<String> {
        let mut leading = Vec::new();
        if let Some(path) = &self.config {
            leading.push("--config".to_string());
            leading.push(path.display().to_string());
        }
        if self.debug { leading.push("--debug".to_string()); }
        leading
    }
}
