use crate::error::{PlanError, PlanResult};
use crate::scheduler::{AllocationPolicy, PoolConfig, MAX_TASK_SIZE};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One sub-directory per dataset, each holding a `data.csv`.
    pub dataset_dir: PathBuf,
    /// Trained models, `<dataset>.csv`.
    pub models_dir: PathBuf,
    /// Prediction folders, `<model>_on_<target>/{p,y,x}`.
    pub predictions_dir: PathBuf,
    pub max_task_size: usize,
    pub idle_sleep_ms: u64,
    pub task_timeout_secs: Option<u64>,
    /// Threads used by in-process work such as training.
    pub num_threads: usize,
    /// Executable launched for every task; the running binary when unset.
    pub worker_program: Option<PathBuf>,
    pub allocation: AllocationPolicy,
}

impl Default for Config {
    fn default() -> Self { default_config() }
}

pub fn default_config() -> Config {
    Config {
        dataset_dir: PathBuf::from("dataset"),
        models_dir: PathBuf::from("models"),
        predictions_dir: PathBuf::from("predictions"),
        max_task_size: MAX_TASK_SIZE,
        idle_sleep_ms: 1500,
        task_timeout_secs: None,
        num_threads: num_cpus::get().max(1),
        worker_program: None,
        allocation: AllocationPolicy::Exact,
    }
}

impl Config {
    /// Read a JSON configuration; missing keys keep their default.
    pub fn load(path: &Path) -> PlanResult<Self> {
        if !path.exists() {
            return Err(PlanError::ConfigNotFound { path: path.to_path_buf() });
        }
        let text = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&text)?;
        debug!("Loaded configuration from {}: {:?}", path.display(), cfg);
        Ok(cfg)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            task_timeout: self.task_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn model_path(&self, dataset: &str) -> PathBuf { self.models_dir.join(format!("{dataset}.csv")) }

    pub fn prediction_dir(&self, output_name: &str) -> PathBuf { self.predictions_dir.join(output_name) }
}
