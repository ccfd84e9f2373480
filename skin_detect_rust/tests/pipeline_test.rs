use image::{ImageBuffer, Rgb, RgbImage};
use skin_detect_rust::metrics::{evaluate_dir, Metric};
use skin_detect_rust::{default_config, run_bench, run_single, BenchRequest, Config, DatasetRegistry, SingleRequest, SkinModel};
use std::fs;
use std::path::Path;

const SKIN: Rgb<u8> = Rgb([200, 150, 120]);
const WALL: Rgb<u8> = Rgb([20, 40, 60]);

// Left half skin, right half background, with the matching mask.
fn half_skin(fill: Rgb<u8>) -> (RgbImage, RgbImage) {
    let ori = ImageBuffer::from_fn(4, 4, |x, _| if x < 2 { SKIN } else { fill });
    let gt = ImageBuffer::from_fn(4, 4, |x, _| if x < 2 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) });
    (ori, gt)
}

fn write_dataset(root: &Path, name: &str, notes: &[&str], fill: Rgb<u8>) {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("ori")).unwrap();
    fs::create_dir_all(dir.join("gt")).unwrap();
    let mut rows = String::new();
    for (i, note) in notes.iter().enumerate() {
        let (ori, gt) = half_skin(fill);
        ori.save(dir.join("ori").join(format!("im{i}.png"))).unwrap();
        gt.save(dir.join("gt").join(format!("im{i}.png"))).unwrap();
        rows.push_str(&format!("ori/im{i}.png?gt/im{i}.png?{note}\n"));
    }
    fs::write(dir.join("data.csv"), rows).unwrap();
}

fn setup(root: &Path) -> (Config, DatasetRegistry) {
    write_dataset(&root.join("dataset"), "Toy", &["tr", "tr", "va", "te", "te"], WALL);
    // background color never seen by the Toy model
    write_dataset(&root.join("dataset"), "Other", &["tr", "te", "nd"], Rgb([1, 2, 3]));
    let cfg = Config {
        dataset_dir: root.join("dataset"),
        models_dir: root.join("models"),
        predictions_dir: root.join("predictions"),
        num_threads: 2,
        ..default_config()
    };
    let registry = DatasetRegistry::open(&cfg.dataset_dir).unwrap();
    (cfg, registry)
}

fn train(cfg: &Config, registry: &DatasetRegistry, name: &str) {
    let pairs = registry.require(name).unwrap().train_pairs().unwrap();
    SkinModel::train(&pairs, cfg.num_threads).unwrap().save(&cfg.model_path(name)).unwrap();
}

#[test]
fn train_predict_evaluate_on_self() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, registry) = setup(tmp.path());
    assert_eq!(registry.names(), vec!["Other", "Toy"]);
    train(&cfg, &registry, "Toy");

    let req = SingleRequest { model: "Toy".into(), predict: None, from: 0, to: -1, bar: -1 };
    let summary = run_single(&cfg, &registry, &req).unwrap();
    assert_eq!((summary.predicted, summary.failed), (2, 0));
    assert!(summary.hash.is_some());

    let out = cfg.prediction_dir("Toy_on_Toy");
    for sub in ["p/im3.png", "p/im4.png", "y/im3.png", "x/im4.png"] {
        assert!(out.join(sub).is_file(), "{sub}");
    }

    let evaluation = evaluate_dir(&out).unwrap();
    assert_eq!(evaluation.images.len(), 2);
    assert!(evaluation.mean(Metric::F1).unwrap().mean > 0.99);
    assert!(evaluation.mean(Metric::Specificity).unwrap().mean > 0.99);
    assert!(evaluation.dprs_medium < 0.01);
}

#[test]
fn sliced_cross_prediction() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, registry) = setup(tmp.path());
    train(&cfg, &registry, "Toy");

    // two workers splitting every row of Other
    for (from, to, bar) in [(0, 2, 0), (2, -1, 1)] {
        let req = SingleRequest { model: "Toy".into(), predict: Some("Other".into()), from, to, bar };
        let summary = run_single(&cfg, &registry, &req).unwrap();
        assert_eq!(summary.failed, 0);
        assert!(summary.hash.is_none());
    }

    let out = cfg.prediction_dir("Toy_on_Other");
    assert_eq!(fs::read_dir(out.join("p")).unwrap().count(), 3);

    // unseen background is classified as skin
    let pred = image::open(out.join("p").join("im0.png")).unwrap().to_rgb8();
    assert_eq!(pred.get_pixel(3, 0), &Rgb([255, 255, 255]));
    let evaluation = evaluate_dir(&out).unwrap();
    assert!(evaluation.mean(Metric::Specificity).unwrap().mean < 0.01);
    assert!(evaluation.mean(Metric::Recall).unwrap().mean > 0.99);
}

#[test]
fn broken_images_are_counted_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, registry) = setup(tmp.path());
    train(&cfg, &registry, "Toy");
    fs::write(cfg.dataset_dir.join("Toy").join("ori").join("im3.png"), b"not a png").unwrap();

    let req = SingleRequest { model: "Toy".into(), predict: None, from: 0, to: -1, bar: 0 };
    let summary = run_single(&cfg, &registry, &req).unwrap();
    assert_eq!((summary.predicted, summary.failed), (1, 1));
}

#[test]
fn missing_model_or_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, registry) = setup(tmp.path());
    let req = SingleRequest { model: "Toy".into(), predict: None, from: 0, to: -1, bar: 0 };
    assert!(run_single(&cfg, &registry, &req).is_err());

    train(&cfg, &registry, "Toy");
    let req = SingleRequest { model: "Toy".into(), predict: Some("Nope".into()), from: 0, to: -1, bar: 0 };
    assert!(run_single(&cfg, &registry, &req).is_err());
}

#[test]
fn bench_writes_one_timing_file_per_observation() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, registry) = setup(tmp.path());
    train(&cfg, &registry, "Toy");

    let req = BenchRequest { dataset: "Toy".into(), size: 1, observations: 2 };
    let observations = run_bench(&cfg, &registry, &req).unwrap();
    assert_eq!(observations.len(), 2);
    for (k, obs) in observations.iter().enumerate() {
        assert_eq!((obs.predicted, obs.failed), (1, 0));
        assert!(obs.mean.is_some());
        assert_eq!(obs.bench_file.file_name().unwrap(), format!("bench{k}.txt").as_str());
        assert!(obs.bench_file.starts_with(cfg.predictions_dir.join("bench")));
        let rows = fs::read_to_string(&obs.bench_file).unwrap();
        let row: Vec<&str> = rows.lines().next().unwrap().split(',').collect();
        assert_eq!(rows.lines().count(), 1);
        assert!(row[0].ends_with("im3.png"));
        assert!(row[1].parse::<f64>().unwrap() >= 0.0);
        assert!(obs.out_dir.join("p").join("im3.png").is_file());
    }

    // -1 takes every testing image
    let req = BenchRequest { dataset: "Toy".into(), size: -1, observations: 1 };
    assert_eq!(run_bench(&cfg, &registry, &req).unwrap()[0].predicted, 2);
}
