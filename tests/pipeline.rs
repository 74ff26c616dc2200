use std::fs;
use std::path::{Path, PathBuf};

use md_voxel_prep::packer::SeedOutcome;
use md_voxel_prep::pipeline::{PipelineOptions, TIMINGS_FILE, VOXEL_DIR, run_pipeline};
use md_voxel_prep::splitter::{SplitOptions, split_dump};
use md_voxel_prep::store::{self, PackReader, open_reader};
use md_voxel_prep::{AppState, Phase, PrepConfig, PrepError};
use ndarray::Array4;
use ndarray_npy::read_npy;

/// 2x2x2 点阵放在 [0, 2)^3 盒子里，每帧整体平移 frame * 2（周期折回后不变）
fn dump_text(frames: usize) -> String {
    let mut text = String::new();
    for f in 0..frames {
        text.push_str(&format!(
            "ITEM: TIMESTEP\n{}\nITEM: NUMBER OF ATOMS\n8\nITEM: BOX BOUNDS pp pp pp\n0.0 2.0\n0.0 2.0\n0.0 2.0\nITEM: ATOMS id type xu yu zu\n",
            f * 100
        ));
        let mut id = 8;
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..2 {
                    let shift = (f * 2) as f64;
                    text.push_str(&format!(
                        "{} 1 {} {} {}\n",
                        id,
                        i as f64 + 0.5 + shift,
                        j as f64 + 0.5,
                        k as f64 + 0.5
                    ));
                    id -= 1;
                }
            }
        }
    }
    text
}

fn write_seed(dataset: &Path, seed: &str, frames: usize) {
    let dump_dir = dataset.join(seed).join("dump");
    fs::create_dir_all(&dump_dir).unwrap();
    fs::write(dump_dir.join(format!("dump.{}.lammpstrj", seed)), dump_text(frames)).unwrap();
}

fn timing_stages(dataset: &Path) -> Vec<String> {
    let timings: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dataset.join(TIMINGS_FILE)).unwrap()).unwrap();
    timings["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["stage"].as_str().unwrap().to_string())
        .collect()
}

fn options(dataset: &Path, seeds_file: PathBuf, skip_train: bool) -> PipelineOptions {
    PipelineOptions {
        dataset_dir: dataset.to_path_buf(),
        seeds_file,
        skip_simulate: true,
        skip_train,
    }
}

fn config() -> PrepConfig {
    let mut config = PrepConfig::default();
    config.pack.skip_frames = 3;
    config.pack.chunk = 4;
    config.voxel.bins = [2, 2, 2];
    config.simulation.phase = Phase::Solid;
    config.simulation.temperature = 300.0;
    config
}

#[test]
fn pack_and_voxelize_existing_simulations() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("Na300");
    write_seed(&dataset, "11", 10);
    write_seed(&dataset, "22", 3);
    let seeds_file = dir.path().join("seeds.txt");
    fs::write(&seeds_file, "11\n22\n33\n").unwrap();

    let state = AppState::new(config());
    let report = run_pipeline(&state, &options(&dataset, seeds_file, true)).unwrap();

    assert_eq!(report.pack.frames_for("11"), Some(7));
    assert_eq!(report.pack.frames_for("22"), Some(0));
    assert!(matches!(report.pack.seeds[2].outcome, SeedOutcome::Failed { .. }));

    let reader = open_reader(&dataset.join(store::DEFAULT_OUTPUT)).unwrap();
    assert_eq!(reader.group_names().unwrap(), vec!["11", "22"]);
    assert_eq!(reader.shape("11").unwrap(), Some([7, 8, 3]));

    let voxels: Array4<f32> = read_npy(dataset.join(VOXEL_DIR).join("11_bf1_bin2.npy")).unwrap();
    assert_eq!(voxels.shape(), &[7, 2, 2, 2]);
    assert!(voxels.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    let empty: Array4<f32> = read_npy(dataset.join(VOXEL_DIR).join("22_bf1_bin2.npy")).unwrap();
    assert_eq!(empty.shape(), &[0, 2, 2, 2]);

    assert_eq!(timing_stages(&dataset), vec!["pack", "voxelize", "voxelize"]);
}

#[test]
fn repacking_clean_output_gives_identical_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("Na300");
    write_seed(&dataset, "11", 10);
    write_seed(&dataset, "22", 5);
    let seeds_file = dir.path().join("seeds.txt");
    fs::write(&seeds_file, "11\n22\n").unwrap();
    let output = dataset.join(store::DEFAULT_OUTPUT);

    let shapes = || {
        let state = AppState::new(config());
        run_pipeline(&state, &options(&dataset, seeds_file.clone(), true)).unwrap();
        let reader = open_reader(&output).unwrap();
        reader
            .group_names()
            .unwrap()
            .into_iter()
            .map(|group| (reader.shape(&group).unwrap(), group))
            .collect::<Vec<_>>()
    };
    let first = shapes();
    fs::remove_file(&output).unwrap();
    fs::remove_dir_all(dataset.join(VOXEL_DIR)).unwrap();
    let second = shapes();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(first[1], (Some([2, 8, 3]), "22".to_string()));
}

#[test]
fn every_seed_failing_stops_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("Na300");
    fs::create_dir_all(&dataset).unwrap();
    let seeds_file = dir.path().join("seeds.txt");
    fs::write(&seeds_file, "1\n2\n").unwrap();

    let state = AppState::new(config());
    let err = run_pipeline(&state, &options(&dataset, seeds_file, true)).unwrap_err();
    assert!(matches!(err, PrepError::Seed(_)));
    // 失败的运行也留下耗时记录
    assert_eq!(timing_stages(&dataset), vec!["pack"]);
}

#[test]
fn split_chunks_match_frame_arithmetic() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dump.all.lammpstrj");
    fs::write(&input, dump_text(23)).unwrap();

    let chunks = split_dump(
        &input,
        &SplitOptions {
            frames_per_chunk: 5,
            skip_frames: 3,
            out_dir: dir.path().join("chunks"),
            stem: None,
        },
    )
    .unwrap();
    // (23 - 3) / 5 = 4 个完整块
    assert_eq!(chunks.len(), 4);
    assert!(dir.path().join("chunks/dump.all_0003.lammpstrj").is_file());
}

#[cfg(unix)]
#[test]
fn training_runs_per_voxelized_seed() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("Na300");
    write_seed(&dataset, "11", 6);
    let seeds_file = dir.path().join("seeds.txt");
    fs::write(&seeds_file, "11\n").unwrap();

    // 假的训练脚本：$4 为运行名，$6 为结果目录
    let script = dir.path().join("train.sh");
    fs::write(&script, "touch \"$6/$4_metrics.npy\"\n").unwrap();

    let mut config = config();
    config.train.python = "/bin/sh".into();
    config.train.script = Some(script);
    config.train.results_dir = dir.path().join("results");

    let state = AppState::new(config);
    let report = run_pipeline(&state, &options(&dataset, seeds_file, false)).unwrap();

    assert_eq!(report.training.len(), 1);
    let run_name = &report.training[0].run_name;
    assert!(run_name.starts_with("Na_bf1.0_bin2_mice_dx16_dy16_dz16_s11_"));
    assert!(run_name.ends_with("_s42_m_Na300_S"));
    assert!(report.training[0].metrics.is_some());
}

#[cfg(unix)]
#[test]
fn each_seed_trains_into_its_own_metrics_file() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("Na300");
    write_seed(&dataset, "11", 6);
    write_seed(&dataset, "22", 6);
    let seeds_file = dir.path().join("seeds.txt");
    fs::write(&seeds_file, "11\n22\n").unwrap();

    let script = dir.path().join("train.sh");
    fs::write(&script, "touch \"$6/$4_metrics.npy\"\n").unwrap();
    let results = dir.path().join("results");

    let mut config = config();
    config.train.python = "/bin/sh".into();
    config.train.script = Some(script);
    config.train.results_dir = results.clone();

    let state = AppState::new(config);
    let report = run_pipeline(&state, &options(&dataset, seeds_file, false)).unwrap();

    let names: Vec<&str> = report.training.iter().map(|t| t.run_name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
    let metrics = fs::read_dir(&results).unwrap().count();
    assert_eq!(metrics, 2);
    assert_eq!(timing_stages(&dataset).iter().filter(|s| *s == "train").count(), 2);
}
