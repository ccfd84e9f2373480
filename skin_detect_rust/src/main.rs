// CLI entry for skin_detect
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use skin_detect_rust::batch::{plan_all, plan_base, plan_cross, plan_single, resolve_workers, run_plan, BatchKind, BatchPlan, PlanOptions};
use skin_detect_rust::cli::{Cli, Cmd, PoolArgs};
use skin_detect_rust::hash::{hash_dir, hash_file};
use skin_detect_rust::metrics::evaluate_dir;
use skin_detect_rust::predict::{run_bench, BenchRequest};
use skin_detect_rust::scheduler::{AllocationPolicy, CommandLauncher, ProcessPool};
use skin_detect_rust::{default_config, run_single, Config, DatasetRegistry, SingleRequest, SkinModel};

fn build_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(pool) = cli.pool_args() {
        if let Some(v) = &pool.allocation {
            let Some(policy) = AllocationPolicy::from_str(v) else { bail!("Unknown allocation policy: {}", v) };
            cfg.allocation = policy;
        }
        if let Some(v) = pool.task_timeout { cfg.task_timeout_secs = Some(v); }
    }
    if let Cmd::Train { threads: Some(v), .. } = &cli.command { cfg.num_threads = (*v).max(1); }
    Ok(cfg)
}

fn init_logger(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

// Workers inherit the configuration file and verbosity of the scheduler.
fn launcher(cli: &Cli, cfg: &Config) -> Result<CommandLauncher> {
    let launcher = match &cfg.worker_program {
        Some(program) => CommandLauncher::new(program),
        None => CommandLauncher::current_exe().context("Cannot locate the running executable")?,
    };
    Ok(launcher.with_leading_args(cli.worker_leading_args()))
}

fn execute(cli: &Cli, cfg: &Config, plan: BatchPlan, pool_args: &PoolArgs) -> Result<()> {
    let launcher = launcher(cli, cfg)?;
    if pool_args.dry_run {
        for task in &plan.tasks {
            let cmd = launcher.command_for(task);
            let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
            println!("{} {}", launcher.program().display(), args.join(" "));
        }
        return Ok(());
    }
    let mut pool = ProcessPool::new(launcher, cfg.pool_config());
    let report = run_plan(&plan, &mut pool)?;
    if !report.is_success() {
        warn!("{} of {} tasks failed", report.failures().count(), report.reports.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug);
    let cfg = build_config(&cli)?;
    let registry = || DatasetRegistry::open(&cfg.dataset_dir);

    match &cli.command {
        Cmd::Single { model, predict, from, to, bar } => {
            let req = SingleRequest { model: model.clone(), predict: predict.clone(), from: *from, to: *to, bar: *bar };
            let summary = run_single(&cfg, &registry()?, &req)?;
            if summary.failed > 0 {
                bail!("{}: {} of {} images failed", req.output_name(), summary.failed, summary.failed + summary.predicted);
            }
        }
        Cmd::Singlem { model, predict, pool } => {
            let workers = resolve_workers(pool.workers)?;
            let plan = plan_single(&registry()?, model, predict.as_deref(), workers, &PlanOptions::from(&cfg))?;
            execute(&cli, &cfg, plan, pool)?;
        }
        Cmd::Batch { kind, datasets, pool } => {
            let workers = resolve_workers(pool.workers)?;
            let opts = PlanOptions::from(&cfg);
            let registry = registry()?;
            let plan = match BatchKind::from_str(kind) {
                Some(BatchKind::Base) => plan_base(&registry, datasets, workers, &opts)?,
                Some(BatchKind::Cross) => plan_cross(&registry, datasets, workers, &opts)?,
                Some(BatchKind::All) => plan_all(&registry, datasets, workers, &opts)?,
                _ => bail!("Unknown batch type: {}", kind),
            };
            execute(&cli, &cfg, plan, pool)?;
        }
        Cmd::Train { dataset, .. } => {
            let pairs = registry()?.require(dataset)?.train_pairs()?;
            if pairs.is_empty() { bail!("{} has no training images", dataset); }
            let model = SkinModel::train(&pairs, cfg.num_threads)?;
            let path = cfg.model_path(dataset);
            model.save(&path)?;
            info!("Model {} hash={}", path.display(), hash_file(&path)?);
        }
        Cmd::Eval { path } => {
            let evaluation = evaluate_dir(path)?;
            println!("{} with hash={}", path.display(), hash_dir(path)?);
            print!("{}", evaluation.summary());
        }
        Cmd::Randomize { dataset, seed } => {
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(*s),
                None => StdRng::from_entropy(),
            };
            registry()?.require(dataset)?.randomize(&mut rng)?;
            info!("{} splits reassigned", dataset);
        }
        Cmd::Bench { dataset, size, observations } => {
            let req = BenchRequest { dataset: dataset.clone(), size: *size, observations: *observations };
            for (k, obs) in run_bench(&cfg, &registry()?, &req)?.iter().enumerate() {
                let mean = obs.mean.map(|d| d.as_secs_f64()).unwrap_or(f64::NAN);
                println!("observation {} ({} images, {} failed): {:.6}s per image, {}", k, obs.predicted, obs.failed, mean, obs.bench_file.display());
            }
        }
    }
    Ok(())
}
