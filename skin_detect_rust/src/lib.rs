//! Bayesian skin-pixel detection: training, prediction, evaluation, and a
//! scheduler that spreads batch predictions over worker processes.

pub mod batch;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod model;
pub mod predict;
pub mod scheduler;

pub use batch::{plan_all, plan_base, plan_cross, plan_single, resolve_workers, run_plan, BatchKind, BatchPlan, PlanOptions, Stage};
pub use config::{default_config, Config};
pub use dataset::{Dataset, DatasetRegistry, ImagePair, SizeSource, SplitMode, StaticSizes};
pub use error::{PlanError, PlanResult};
pub use model::SkinModel;
pub use predict::{run_bench, run_single, BenchRequest, PredictSummary, SingleRequest};
