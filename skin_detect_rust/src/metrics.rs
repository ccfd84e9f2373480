//! Segmentation quality of skin maps against their ground truth.
//!
//! Scores are computed per image from a confusion matrix and then averaged
//! ("final" averaging). F1 and DPRS are additionally reported with "medium"
//! averaging: computed once from the mean precision, recall and specificity.

use crate::model::open_rgb;
use anyhow::{bail, Context, Result};
use image::GrayImage;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Guards every ratio against a zero denominator.
pub const SMOOTH: f64 = 1e-20;
/// Gray level above which a mask pixel is skin.
pub const BINARIZE_THRESHOLD: u8 = 128;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConfusionMatrix {
    pub tp: f64,
    pub fp: f64,
    pub tn: f64,
    pub fn_: f64,
}

impl ConfusionMatrix {
    pub fn from_masks(gt: &GrayImage, pred: &GrayImage, threshold: u8) -> Result<Self> {
        if gt.dimensions() != pred.dimensions() {
            bail!("ground truth is {:?} but prediction is {:?}", gt.dimensions(), pred.dimensions());
        }
        let mut cm = Self::default();
        for (y, p) in gt.pixels().zip(pred.pixels()) {
            match (y[0] > threshold, p[0] > threshold) {
                (true, true) => cm.tp += 1.0,
                (true, false) => cm.fn_ += 1.0,
                (false, true) => cm.fp += 1.0,
                (false, false) => cm.tn += 1.0,
            }
        }
        Ok(cm)
    }

    /// Actual positives (tp + fn).
    pub fn ap(&self) -> f64 { self.tp + self.fn_ }
    /// Actual negatives (tn + fp).
    pub fn an(&self) -> f64 { self.tn + self.fp }
    /// Selected elements (tp + fp).
    pub fn se(&self) -> f64 { self.tp + self.fp }
}

pub fn recall(cm: &ConfusionMatrix) -> f64 { cm.tp / (cm.ap() + SMOOTH) }

pub fn specificity(cm: &ConfusionMatrix) -> f64 { cm.tn / (cm.an() + SMOOTH) }

pub fn precision(cm: &ConfusionMatrix) -> f64 { cm.tp / (cm.se() + SMOOTH) }

pub fn iou(cm: &ConfusionMatrix) -> f64 { cm.tp / (cm.tp + cm.fp + cm.fn_ + SMOOTH) }

/// F-beta: recall weighs `b` times as much as precision.
pub fn f_beta(cm: &ConfusionMatrix, b: f64) -> f64 {
    let pr = precision(cm);
    let re = recall(cm);
    (1.0 + b * b) * ((pr * re) / ((b * b * pr) + re + SMOOTH))
}

pub fn f1(cm: &ConfusionMatrix) -> f64 { f_beta(cm, 1.0) }

pub fn f2(cm: &ConfusionMatrix) -> f64 { f_beta(cm, 2.0) }

pub fn f1_medium(pr: f64, re: f64) -> f64 { 2.0 * ((pr * re) / (pr + re + SMOOTH)) }

/// Distance from (precision, recall, specificity) to the ideal point (1, 1, 1). Lower is better.
pub fn dprs(cm: &ConfusionMatrix) -> f64 { dprs_medium(precision(cm), recall(cm), specificity(cm)) }

pub fn dprs_medium(pr: f64, re: f64, sp: f64) -> f64 { ((1.0 - pr).powi(2) + (1.0 - re).powi(2) + (1.0 - sp).powi(2)).sqrt() }

/// Matthews correlation coefficient, in [-1, 1].
pub fn mcc(cm: &ConfusionMatrix) -> f64 {
    let (mut tp, mut fn_, mut fp, mut tn) = (cm.tp, cm.fn_, cm.fp, cm.tn);
    let nz = [tp, fn_, fp, tn].iter().filter(|v| **v != 0.0).count();

    // every sample in one cell
    if nz == 1 {
        return if tp != 0.0 || tn != 0.0 { 1.0 } else { -1.0 };
    }
    // a zero row or column with both diagonals populated: 0/0 otherwise
    if nz == 2 && (tp + tn) != 0.0 && (fn_ + fp) != 0.0 {
        for v in [&mut tp, &mut fn_, &mut fp, &mut tn] {
            if *v == 0.0 { *v = SMOOTH; }
        }
    }
    let num = tp * tn - fp * fn_;
    let den = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
    num / (den + SMOOTH)
}

/// Metrics reported by `eval`, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    F1,
    F2,
    Iou,
    Dprs,
    Mcc,
    Recall,
    Precision,
    Specificity,
}

impl Metric {
    pub const ALL: [Metric; 8] = [Metric::F1, Metric::F2, Metric::Iou, Metric::Dprs, Metric::Mcc, Metric::Recall, Metric::Precision, Metric::Specificity];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::F1 => "f1",
            Metric::F2 => "f2",
            Metric::Iou => "iou",
            Metric::Dprs => "dprs",
            Metric::Mcc => "mcc",
            Metric::Recall => "recall",
            Metric::Precision => "precision",
            Metric::Specificity => "specificity",
        }
    }

    pub fn compute(&self, cm: &ConfusionMatrix) -> f64 {
        match self {
            Metric::F1 => f1(cm),
            Metric::F2 => f2(cm),
            Metric::Iou => iou(cm),
            Metric::Dprs => dprs(cm),
            Metric::Mcc => mcc(cm),
            Metric::Recall => recall(cm),
            Metric::Precision => precision(cm),
            Metric::Specificity => specificity(cm),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageScores {
    pub gt: PathBuf,
    pub pred: PathBuf,
    pub confusion: ConfusionMatrix,
    pub scores: Vec<(Metric, f64)>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> MeanStd {
    if values.is_empty() { return MeanStd { mean: f64::NAN, std: f64::NAN }; }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    MeanStd { mean, std: var.sqrt() }
}

#[derive(Clone, Debug)]
pub struct Evaluation {
    pub images: Vec<ImageScores>,
    pub means: Vec<(Metric, MeanStd)>,
    pub f1_medium: f64,
    pub dprs_medium: f64,
}

impl Evaluation {
    pub fn from_images(images: Vec<ImageScores>) -> Self {
        let means: Vec<(Metric, MeanStd)> = Metric::ALL
            .iter()
            .map(|m| {
                let values: Vec<f64> = images.iter().flat_map(|i| i.scores.iter().filter(|(k, _)| k == m).map(|(_, v)| *v)).collect();
                (*m, mean_std(&values))
            })
            .collect();
        let mean_of = |m: Metric| means.iter().find(|(k, _)| *k == m).map(|(_, v)| v.mean).unwrap_or(f64::NAN);
        let (pr, re, sp) = (mean_of(Metric::Precision), mean_of(Metric::Recall), mean_of(Metric::Specificity));
        let f1_medium = f1_medium(pr, re);
        let dprs_medium = dprs_medium(pr, re, sp);
        Self { images, means, f1_medium, dprs_medium }
    }

    pub fn mean(&self, m: Metric) -> Option<MeanStd> { self.means.iter().find(|(k, _)| *k == m).map(|(_, v)| *v) }

    pub fn summary(&self) -> String {
        let mut out = format!("{} images\n", self.images.len());
        out.push_str(&format!("{:<12} {:>8} {:>8}\n", "f1_medium", format!("{:.4}", self.f1_medium), ""));
        out.push_str(&format!("{:<12} {:>8} {:>8}\n", "dprs_medium", format!("{:.4}", self.dprs_medium), ""));
        for (m, v) in &self.means {
            out.push_str(&format!("{:<12} {:>8.4} {:>8.4}\n", m.name(), v.mean, v.std));
        }
        out
    }
}

pub fn score_pair(gt: &Path, pred: &Path) -> Result<ImageScores> {
    let gt_img = image::DynamicImage::ImageRgb8(open_rgb(gt)?).to_luma8();
    let pred_img = image::DynamicImage::ImageRgb8(open_rgb(pred)?).to_luma8();
    let confusion = ConfusionMatrix::from_masks(&gt_img, &pred_img, BINARIZE_THRESHOLD)
        .with_context(|| format!("{} vs {}", gt.display(), pred.display()))?;
    let scores = Metric::ALL.iter().map(|m| (*m, m.compute(&confusion))).collect();
    Ok(ImageScores { gt: gt.to_path_buf(), pred: pred.to_path_buf(), confusion, scores })
}

/// Score every ground truth in `<dir>/y` against the prediction of the same stem in `<dir>/p`.
pub fn evaluate_dir(dir: &Path) -> Result<Evaluation> {
    let y_dir = dir.join("y");
    let p_dir = dir.join("p");
    let mut entries: Vec<PathBuf> = fs::read_dir(&y_dir)
        .with_context(|| format!("Cannot list ground truths in {}", y_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut images = Vec::with_capacity(entries.len());
    for gt in entries {
        let Some(stem) = gt.file_stem().and_then(|s| s.to_str()) else { continue };
        let pred = p_dir.join(format!("{}.png", stem));
        if !pred.is_file() {
            warn!("No prediction for {}", gt.display());
            continue;
        }
        images.push(score_pair(&gt, &pred)?);
    }
    info!("  Found {} matches", images.len());
    Ok(Evaluation::from_images(images))
}
