use crate::dataset::ImagePair;
use anyhow::{bail, Context, Result};
use image::{io::Reader as ImageReader, ImageBuffer, Rgb, RgbImage};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Number of distinct 8-bit RGB triplets.
pub const RGB_CUBE: usize = 256 * 256 * 256;
/// Pixels with a skin probability below this are classified as background.
pub const SKIN_PROBABILITY_THRESHOLD: f32 = 0.555555;
/// A ground-truth pixel is skin when every channel is above this level.
pub const GT_SKIN_LEVEL: u8 = 150;

const SKIN: Rgb<u8> = Rgb([255, 255, 255]);
const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

#[inline]
fn cube_index(p: &Rgb<u8>) -> usize { ((p[0] as usize) << 16) | ((p[1] as usize) << 8) | p[2] as usize }

#[inline]
pub fn is_skin_mask_pixel(p: &Rgb<u8>) -> bool { p[0] > GT_SKIN_LEVEL && p[1] > GT_SKIN_LEVEL && p[2] > GT_SKIN_LEVEL }

/// Load an image as 8-bit RGB regardless of its stored color type.
pub fn open_rgb(path: &Path) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Cannot open image {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Cannot decode image {}", path.display()))?;
    Ok(img.to_rgb8())
}

/// Skin and non-skin pixel counts per RGB triplet.
pub struct Histogram {
    skin: Vec<u32>,
    non_skin: Vec<u32>,
}

impl Default for Histogram {
    fn default() -> Self { Self::new() }
}

impl Histogram {
    pub fn new() -> Self { Self { skin: vec![0; RGB_CUBE], non_skin: vec![0; RGB_CUBE] } }

    pub fn counts(&self, p: Rgb<u8>) -> (u32, u32) {
        let i = cube_index(&p);
        (self.skin[i], self.non_skin[i])
    }

    fn add(&mut self, index: u32, skin: u32, non_skin: u32) {
        let i = index as usize;
        self.skin[i] = self.skin[i].saturating_add(skin);
        self.non_skin[i] = self.non_skin[i].saturating_add(non_skin);
    }
}

/// Sparse per-image counts, merged into the shared histogram once per image.
fn count_image(ori: &RgbImage, gt: &RgbImage) -> Result<Vec<(u32, u32, u32)>> {
    if ori.dimensions() != gt.dimensions() {
        bail!("image is {:?} but its mask is {:?}", ori.dimensions(), gt.dimensions());
    }
    let mut local: HashMap<u32, (u32, u32)> = HashMap::new();
    for (p, y) in ori.pixels().zip(gt.pixels()) {
        let e = local.entry(cube_index(p) as u32).or_default();
        if is_skin_mask_pixel(y) { e.0 += 1; } else { e.1 += 1; }
    }
    Ok(local.into_iter().map(|(i, (s, n))| (i, s, n)).collect())
}

/// Build the histogram of a training set on `num_threads` threads.
pub fn train_histogram(pairs: &[ImagePair], num_threads: usize) -> Result<Histogram> {
    let hist = Arc::new(Mutex::new(Histogram::new()));
    let next = Arc::new(Mutex::new(0usize));
    let num_threads = num_threads.max(1).min(pairs.len().max(1));

    let results: Vec<Result<usize>> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let hist = hist.clone();
                let next = next.clone();
                s.spawn(move || -> Result<usize> {
                    let mut done = 0usize;
                    loop {
                        let idx = { let mut n = next.lock(); let i = *n; *n += 1; i };
                        let Some(pair) = pairs.get(idx) else { break };
                        let ori = open_rgb(&pair.ori)?;
                        let gt = open_rgb(&pair.gt)?;
                        let counts = count_image(&ori, &gt).with_context(|| format!("{}", pair.ori.display()))?;
                        let mut h = hist.lock();
                        for (i, sk, ns) in counts { h.add(i, sk, ns); }
                        done += 1;
                    }
                    Ok(done)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Err(anyhow::anyhow!("training thread panicked")))).collect()
    });

    let mut images = 0;
    for r in results { images += r?; }
    debug!("Histogram built from {} images", images);

    let hist = Arc::try_unwrap(hist).map_err(|_| anyhow::anyhow!("histogram still shared"))?;
    Ok(hist.into_inner())
}

/// Per-pixel skin probability lookup over the whole RGB cube.
#[derive(Clone)]
pub struct SkinModel {
    /// `NaN` for triplets never seen during training.
    probability: Vec<f32>,
}

impl SkinModel {
    pub fn from_histogram(h: &Histogram) -> Self {
        let probability = h
            .skin
            .iter()
            .zip(&h.non_skin)
            .map(|(&s, &n)| if s == 0 && n == 0 { f32::NAN } else { (s as f64 / (s as f64 + n as f64)) as f32 })
            .collect();
        Self { probability }
    }

    pub fn train(pairs: &[ImagePair], num_threads: usize) -> Result<Self> {
        info!("Reading {} training images...", pairs.len());
        let hist = train_histogram(pairs, num_threads)?;
        Ok(Self::from_histogram(&hist))
    }

    pub fn probability(&self, p: Rgb<u8>) -> f32 { self.probability[cube_index(&p)] }

    /// Unseen colors (`NaN`) count as skin.
    pub fn is_skin(&self, p: Rgb<u8>) -> bool {
        let p = self.probability(p);
        p.is_nan() || p >= SKIN_PROBABILITY_THRESHOLD
    }

    /// Binary skin map: white for skin, black for background.
    pub fn predict_image(&self, img: &RgbImage) -> RgbImage {
        let (w, h) = img.dimensions();
        ImageBuffer::from_fn(w, h, |x, y| if self.is_skin(*img.get_pixel(x, y)) { SKIN } else { BACKGROUND })
    }

    pub fn seen_colors(&self) -> usize { self.probability.iter().filter(|p| !p.is_nan()).count() }

    /// Write `Red,Green,Blue,Probability` rows for every color seen in training.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() { std::fs::create_dir_all(parent)?; }
        let mut wtr = csv::Writer::from_path(path).with_context(|| format!("Failed to create model file {}", path.display()))?;
        wtr.write_record(["Red", "Green", "Blue", "Probability"])?;
        for (i, p) in self.probability.iter().enumerate() {
            if p.is_nan() { continue; }
            let (r, g, b) = (i >> 16, (i >> 8) & 0xff, i & 0xff);
            wtr.write_record([r.to_string(), g.to_string(), b.to_string(), p.to_string()])?;
        }
        wtr.flush()?;
        info!("Model saved to {} ({} colors)", path.display(), self.seen_colors());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() { bail!("Model file not existing: {}", path.display()); }
        let mut rdr = csv::Reader::from_path(path).with_context(|| format!("Cannot read model {}", path.display()))?;
        let mut probability = vec![f32::NAN; RGB_CUBE];
        for (line, row) in rdr.records().enumerate() {
            let row = row?;
            if row.len() != 4 { bail!("{}: row {} has {} fields", path.display(), line + 2, row.len()); }
            let channel = |k: usize| -> Result<u8> { row[k].trim().parse::<u8>().with_context(|| format!("{}: bad channel on row {}", path.display(), line + 2)) };
            let rgb = Rgb([channel(0)?, channel(1)?, channel(2)?]);
            let p = match row[3].trim() {
                "" => f32::NAN,
                v => v.parse::<f32>().with_context(|| format!("{}: bad probability on row {}", path.display(), line + 2))?,
            };
            probability[cube_index(&rgb)] = p;
        }
        Ok(Self { probability })
    }
}
