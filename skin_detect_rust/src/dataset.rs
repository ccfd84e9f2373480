use anyhow::{bail, Context, Result};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-dataset index file.
pub const DATA_CSV: &str = "data.csv";
/// Field separator of `data.csv`. Image paths may contain commas.
pub const CSV_SEP: u8 = b'?';

/// Which rows of a dataset a prediction reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Testing split only, used when a model predicts its own dataset.
    Test,
    /// Every row, used for cross-dataset predictions.
    All,
}

/// Split note stored in the third column of `data.csv`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Note {
    Training,
    Validation,
    Testing,
    NotDefined,
}

impl Note {
    pub fn as_str(&self) -> &'static str {
        match self {
            Note::Training => "tr",
            Note::Validation => "va",
            Note::Testing => "te",
            Note::NotDefined => "nd",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "tr" => Some(Note::Training),
            "va" => Some(Note::Validation),
            "te" => Some(Note::Testing),
            "nd" => Some(Note::NotDefined),
            _ => None,
        }
    }
}

/// A `data.csv` row as written on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub ori: String,
    pub gt: String,
    pub note: Note,
}

/// An original image and its ground-truth mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePair {
    pub ori: PathBuf,
    pub gt: PathBuf,
    pub note: Note,
}

/// Item counts of a dataset, as used by the planner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    pub test_count: usize,
    pub all_count: usize,
}

impl DatasetInfo {
    pub fn count(&self, mode: SplitMode) -> usize {
        match mode {
            SplitMode::Test => self.test_count,
            SplitMode::All => self.all_count,
        }
    }
}

/// Answers "how many items would a prediction on this dataset read".
pub trait SizeSource {
    fn contains(&self, name: &str) -> bool;
    fn item_count(&self, name: &str, mode: SplitMode) -> Result<usize>;
}

#[derive(Clone, Debug)]
pub struct Dataset {
    name: String,
    dir: PathBuf,
}

impl Dataset {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self { Self { name: name.into(), dir: dir.into() } }

    pub fn name(&self) -> &str { &self.name }
    pub fn dir(&self) -> &Path { &self.dir }
    pub fn csv_path(&self) -> PathBuf { self.dir.join(DATA_CSV) }

    pub fn read_records(&self) -> Result<Vec<Record>> {
        let path = self.csv_path();
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(CSV_SEP)
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Error on accessing {}", path.display()))?;
        let mut out = Vec::new();
        for (i, row) in rdr.records().enumerate() {
            let row = row.with_context(|| format!("{}: malformed row {}", path.display(), i + 1))?;
            if row.len() < 2 { bail!("{}: row {} needs at least 2 fields", path.display(), i + 1); }
            let note = match row.get(2) {
                Some(n) => Note::from_str(n).with_context(|| format!("{}: invalid note {:?} on row {}", path.display(), n, i + 1))?,
                None => Note::NotDefined,
            };
            out.push(Record { ori: row[0].to_string(), gt: row[1].to_string(), note });
        }
        Ok(out)
    }

    pub fn write_records(&self, records: &[Record]) -> Result<()> {
        let path = self.csv_path();
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(CSV_SEP)
            .has_headers(false)
            .from_path(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        for r in records { wtr.write_record([r.ori.as_str(), r.gt.as_str(), r.note.as_str()])?; }
        wtr.flush()?;
        Ok(())
    }

    fn resolve(&self, p: &str) -> PathBuf {
        let p = Path::new(p);
        if p.is_absolute() { p.to_path_buf() } else { self.dir.join(p) }
    }

    fn matching(&self, notes: &[Note]) -> Result<Vec<ImagePair>> {
        let pairs: Vec<ImagePair> = self
            .read_records()?
            .into_iter()
            .filter(|r| notes.is_empty() || notes.contains(&r.note))
            .map(|r| ImagePair { ori: self.resolve(&r.ori), gt: self.resolve(&r.gt), note: r.note })
            .collect();
        debug!("{} Found {} paths matching {:?}", self.name, pairs.len(), notes);
        Ok(pairs)
    }

    /// Training and validation rows.
    pub fn train_pairs(&self) -> Result<Vec<ImagePair>> { self.matching(&[Note::Training, Note::Validation]) }
    pub fn test_pairs(&self) -> Result<Vec<ImagePair>> { self.matching(&[Note::Testing]) }
    pub fn all_pairs(&self) -> Result<Vec<ImagePair>> { self.matching(&[]) }

    pub fn pairs(&self, mode: SplitMode) -> Result<Vec<ImagePair>> {
        match mode {
            SplitMode::Test => self.test_pairs(),
            SplitMode::All => self.all_pairs(),
        }
    }

    pub fn info(&self) -> Result<DatasetInfo> {
        let records = self.read_records()?;
        let test_count = records.iter().filter(|r| r.note == Note::Testing).count();
        Ok(DatasetInfo { name: self.name.clone(), test_count, all_count: records.len() })
    }

    /// Reassign split notes at random: 70% training, 15% testing, 15% validation.
    pub fn randomize<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<()> {
        let mut records = self.read_records()?;
        records.shuffle(rng);
        let n = records.len();
        let train_end = (n as f64 * 0.7).floor() as usize;
        let test_end = train_end + ((n - train_end) as f64 * 0.5).floor() as usize;
        for (i, r) in records.iter_mut().enumerate() {
            r.note = if i < train_end { Note::Training } else if i < test_end { Note::Testing } else { Note::Validation };
        }
        self.write_records(&records)?;
        info!("{}: {} training, {} testing, {} validation", self.name, train_end, test_end - train_end, n - test_end);
        Ok(())
    }
}

/// Every dataset found under one root directory.
///
/// Built once at start-up and handed to whoever needs dataset sizes or paths.
#[derive(Clone, Debug, Default)]
pub struct DatasetRegistry {
    datasets: Vec<Dataset>,
}

impl DatasetRegistry {
    /// Register each subdirectory of `root` that holds a `data.csv`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).with_context(|| format!("Cannot list dataset directory {}", root.display()))?;
        let mut datasets = Vec::new();
        for entry in entries {
            let entry = entry?;
            let dir = entry.path();
            if !dir.join(DATA_CSV).is_file() { continue; }
            if let Some(name) = dir.file_name().and_then(|s| s.to_str()) {
                datasets.push(Dataset::new(name, dir.clone()));
            }
        }
        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        info!("Found {} datasets in {}", datasets.len(), root.display());
        Ok(Self { datasets })
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> { self.datasets.iter().find(|d| d.name == name) }

    pub fn require(&self, name: &str) -> Result<&Dataset> {
        match self.get(name) {
            Some(d) => Ok(d),
            None => bail!("Invalid skin database: {}", name),
        }
    }

    pub fn names(&self) -> Vec<&str> { self.datasets.iter().map(|d| d.name.as_str()).collect() }
}

impl SizeSource for DatasetRegistry {
    fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    fn item_count(&self, name: &str, mode: SplitMode) -> Result<usize> {
        Ok(self.require(name)?.info()?.count(mode))
    }
}

/// Fixed item counts, for planning without touching the filesystem.
#[derive(Clone, Debug, Default)]
pub struct StaticSizes {
    entries: Vec<DatasetInfo>,
}

impl StaticSizes {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: &str, test_count: usize, all_count: usize) -> Self {
        self.entries.push(DatasetInfo { name: name.to_string(), test_count, all_count });
        self
    }
}

impl SizeSource for StaticSizes {
    fn contains(&self, name: &str) -> bool { self.entries.iter().any(|e| e.name == name) }

    fn item_count(&self, name: &str, mode: SplitMode) -> Result<usize> {
        match self.entries.iter().find(|e| e.name == name) {
            Some(e) => Ok(e.count(mode)),
            None => bail!("Invalid skin database: {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn write_dataset(root: &Path, name: &str, rows: &[(&str, &str, &str)]) -> Dataset {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let body: String = rows.iter().map(|(o, g, n)| format!("{}?{}?{}\n", o, g, n)).collect();
        fs::write(dir.join(DATA_CSV), body).unwrap();
        Dataset::new(name, dir)
    }

    #[test]
    fn filters_by_note() {
        let tmp = tempfile::tempdir().unwrap();
        let ds = write_dataset(tmp.path(), "ECU", &[
            ("ori/a.jpg", "gt/a.png", "tr"),
            ("ori/b.jpg", "gt/b.png", "te"),
            ("ori/c.jpg", "gt/c.png", "va"),
            ("ori/d,1.jpg", "gt/d.png", "te"),
        ]);
        assert_eq!(ds.train_pairs().unwrap().len(), 2);
        assert_eq!(ds.read_records().unwrap().iter().filter(|r| r.note == Note::Validation).count(), 1);
        let test = ds.test_pairs().unwrap();
        assert_eq!(test.len(), 2);
        assert_eq!(test[0].ori, ds.dir().join("ori/b.jpg"));
        assert_eq!(test[1].ori, ds.dir().join("ori/d,1.jpg"));
        assert_eq!(ds.info().unwrap(), DatasetInfo { name: "ECU".into(), test_count: 2, all_count: 4 });
    }

    #[test]
    fn rejects_unknown_note() {
        let tmp = tempfile::tempdir().unwrap();
        let ds = write_dataset(tmp.path(), "bad", &[("a.jpg", "a.png", "xx")]);
        assert!(ds.read_records().is_err());
    }

    #[test]
    fn registry_discovers_datasets() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), "Schmugge", &[("a.jpg", "a.png", "te")]);
        write_dataset(tmp.path(), "HGR", &[("a.jpg", "a.png", "tr"), ("b.jpg", "b.png", "nd")]);
        fs::create_dir_all(tmp.path().join("not_a_dataset")).unwrap();

        let reg = DatasetRegistry::open(tmp.path()).unwrap();
        assert_eq!(reg.names(), ["HGR", "Schmugge"]);
        assert_eq!(reg.item_count("HGR", SplitMode::All).unwrap(), 2);
        assert_eq!(reg.item_count("HGR", SplitMode::Test).unwrap(), 0);
        assert!(reg.item_count("VPU", SplitMode::All).is_err());
    }

    #[test]
    fn randomize_keeps_rows_and_splits() {
        let tmp = tempfile::tempdir().unwrap();
        let rows: Vec<(String, String)> = (0..20).map(|i| (format!("o{}.jpg", i), format!("g{}.png", i))).collect();
        let refs: Vec<(&str, &str, &str)> = rows.iter().map(|(o, g)| (o.as_str(), g.as_str(), "nd")).collect();
        let ds = write_dataset(tmp.path(), "ECU", &refs);

        ds.randomize(&mut StdRng::seed_from_u64(7)).unwrap();
        let records = ds.read_records().unwrap();
        assert_eq!(records.len(), 20);
        assert_eq!(records.iter().filter(|r| r.note == Note::Training).count(), 14);
        assert_eq!(records.iter().filter(|r| r.note == Note::Testing).count(), 3);
        assert_eq!(records.iter().filter(|r| r.note == Note::Validation).count(), 3);
    }
}
