use crate::config::Config;
use crate::dataset::{DatasetRegistry, ImagePair, SplitMode};
use crate::hash::hash_dir;
use crate::model::{open_rgb, SkinModel};
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Arguments of the `single` worker subcommand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleRequest {
    pub model: String,
    /// Target dataset; the model's own dataset when `None`.
    pub predict: Option<String>,
    pub from: usize,
    /// Exclusive end index, `-1` for the end of the dataset.
    pub to: i64,
    /// Display slot given by the scheduler, `-1` when run by hand.
    pub bar: i64,
}

impl SingleRequest {
    pub fn target(&self) -> &str { self.predict.as_deref().unwrap_or(&self.model) }

    pub fn mode(&self) -> SplitMode { if self.target() == self.model { SplitMode::Test } else { SplitMode::All } }

    pub fn output_name(&self) -> String { format!("{}_on_{}", self.model, self.target()) }

    pub fn standalone(&self) -> bool { self.bar < 0 }

    /// Clamp `[from, to)` to a dataset of `len` items.
    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let end = if self.to < 0 { len } else { (self.to as usize).min(len) };
        self.from.min(end)..end
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredictSummary {
    pub out_dir: PathBuf,
    pub predicted: usize,
    pub failed: usize,
    /// Digest of the output folder, only computed for standalone runs.
    pub hash: Option<String>,
}

/// Output paths of one image: prediction and mask as PNG, original as-is.
pub fn prediction_paths(ori: &Path, out_dir: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let Some(stem) = ori.file_stem().and_then(|s| s.to_str()) else { bail!("Bad image name {}", ori.display()) };
    let Some(file) = ori.file_name() else { bail!("Bad image name {}", ori.display()) };
    Ok((
        out_dir.join("p").join(format!("{stem}.png")),
        out_dir.join("y").join(format!("{stem}.png")),
        out_dir.join("x").join(file),
    ))
}

/// Predict one image and copy its inputs next to the prediction.
///
/// Returns the time spent classifying pixels, loading and saving excluded.
pub fn predict_pair(model: &SkinModel, pair: &ImagePair, out_dir: &Path) -> Result<Duration> {
    let (out_p, out_y, out_x) = prediction_paths(&pair.ori, out_dir)?;
    let img = open_rgb(&pair.ori)?;
    let started = Instant::now();
    let prediction = model.predict_image(&img);
    let elapsed = started.elapsed();
    prediction.save(&out_p).with_context(|| format!("Cannot save {}", out_p.display()))?;
    fs::copy(&pair.ori, &out_x).with_context(|| format!("Cannot copy {}", pair.ori.display()))?;
    fs::copy(&pair.gt, &out_y).with_context(|| format!("Cannot copy {}", pair.gt.display()))?;
    Ok(elapsed)
}

/// Inference timings appended as `path,seconds` rows.
pub struct BenchLog {
    path: PathBuf,
    wtr: csv::Writer<File>,
    rows: usize,
    total: Duration,
}

impl BenchLog {
    pub fn append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() { fs::create_dir_all(parent)?; }
        let file = OpenOptions::new().create(true).append(true).open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        let wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        Ok(Self { path: path.to_path_buf(), wtr, rows: 0, total: Duration::ZERO })
    }

    pub fn record(&mut self, image: &Path, elapsed: Duration) -> Result<()> {
        self.wtr.write_record([image.display().to_string(), elapsed.as_secs_f64().to_string()])?;
        self.rows += 1;
        self.total += elapsed;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> { Ok(self.wtr.flush()?) }

    pub fn path(&self) -> &Path { &self.path }

    pub fn rows(&self) -> usize { self.rows }

    pub fn mean(&self) -> Option<Duration> { (self.rows > 0).then(|| self.total / self.rows as u32) }
}

fn progress_bar(len: usize, prefix: String, standalone: bool) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})") {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(prefix);
    // concurrent workers share one terminal; they report through the log instead
    if !standalone { pb.set_draw_target(ProgressDrawTarget::hidden()); }
    pb
}

/// Predict every pair into `out_dir`; images that fail are logged and skipped.
/// Successful inferences are timed into `bench` when given.
///
/// Returns `(predicted, failed)`.
pub fn make_predictions(pairs: &[ImagePair], model: &SkinModel, out_dir: &Path, pb: &ProgressBar, mut bench: Option<&mut BenchLog>) -> Result<(usize, usize)> {
    for sub in ["p", "y", "x"] {
        fs::create_dir_all(out_dir.join(sub)).with_context(|| format!("Cannot create {}", out_dir.display()))?;
    }
    let (mut predicted, mut failed) = (0, 0);
    let step = (pairs.len() / 10).max(1);
    for (i, pair) in pairs.iter().enumerate() {
        match predict_pair(model, pair, out_dir) {
            Ok(elapsed) => {
                predicted += 1;
                if let Some(log) = bench.as_deref_mut() { log.record(&pair.ori, elapsed)?; }
            }
            Err(e) => {
                failed += 1;
                error!("Failed to infer on image {}: {:#}", pair.ori.display(), e);
            }
        }
        pb.inc(1);
        if pb.is_hidden() && ((i + 1) % step == 0 || i + 1 == pairs.len()) {
            info!("{} {}/{}", pb.prefix(), i + 1, pairs.len());
        }
    }
    pb.finish();
    if let Some(log) = bench { log.flush()?; }
    Ok((predicted, failed))
}

/// Predict one slice of a dataset with one model: the `single` subcommand.
pub fn run_single(cfg: &Config, registry: &DatasetRegistry, req: &SingleRequest) -> Result<PredictSummary> {
    let target = registry.require(req.target())?;
    registry.require(&req.model)?;

    let pairs = target.pairs(req.mode())?;
    let range = req.range(pairs.len());
    let slice = &pairs[range.clone()];
    debug!("{}: {:?} of {} {:?} items", req.output_name(), range, pairs.len(), req.mode());

    let model_path = cfg.model_path(&req.model);
    if req.standalone() { info!("Reading model {}...", model_path.display()); }
    let model = SkinModel::load(&model_path)?;

    let out_dir = cfg.prediction_dir(&req.output_name());
    let prefix = if req.standalone() { req.output_name() } else { format!("#{} {}", req.bar, req.output_name()) };
    let pb = progress_bar(slice.len(), prefix, req.standalone());
    let (predicted, failed) = make_predictions(slice, &model, &out_dir, &pb, None)?;

    let hash = if req.standalone() {
        let h = hash_dir(&out_dir)?;
        println!("{}", h);
        Some(h)
    } else {
        None
    };
    Ok(PredictSummary { out_dir, predicted, failed, hash })
}

/// Arguments of the `bench` subcommand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchRequest {
    pub dataset: String,
    /// Leading testing images to predict, `-1` for all of them.
    pub size: i64,
    pub observations: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub out_dir: PathBuf,
    pub bench_file: PathBuf,
    pub predicted: usize,
    pub failed: usize,
    pub mean: Option<Duration>,
}

/// Time the inference of a dataset's model on its first testing images,
/// `observations` times over.
///
/// Observation `k` writes `<predictions>/bench/<timestamp>/observation<k>/`
/// and its timings to `bench<k>.txt` next to it.
pub fn run_bench(cfg: &Config, registry: &DatasetRegistry, req: &BenchRequest) -> Result<Vec<Observation>> {
    let mut pairs = registry.require(&req.dataset)?.test_pairs()?;
    if req.size >= 0 {
        let size = req.size as usize;
        if pairs.len() < size { warn!("{} has only {} testing images", req.dataset, pairs.len()); }
        pairs.truncate(size);
    }
    let model = SkinModel::load(&cfg.model_path(&req.dataset))?;
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let root = cfg.predictions_dir.join("bench").join(stamp.to_string());
    info!("Benchmarking {} on {} images, {} observations", req.dataset, pairs.len(), req.observations);

    let mut observations = Vec::with_capacity(req.observations);
    for k in 0..req.observations {
        let out_dir = root.join(format!("observation{k}"));
        let mut log = BenchLog::append(&root.join(format!("bench{k}.txt")))?;
        let pb = progress_bar(pairs.len(), format!("observation {k}"), true);
        let (predicted, failed) = make_predictions(&pairs, &model, &out_dir, &pb, Some(&mut log))?;
        if let Some(mean) = log.mean() { info!("Observation {}: {:.6}s per image", k, mean.as_secs_f64()); }
        observations.push(Observation { out_dir, bench_file: log.path().to_path_buf(), predicted, failed, mean: log.mean() });
    }
    Ok(observations)
}
