//! 完整流程：模拟 → 打包 → 体素化 → 训练
//!
//! 阶段严格串行，每个阶段（以及阶段内的每个种子）都记录耗时，
//! 结束时写出 `<dataset>/timings.json`。

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::app_state::AppState;
use crate::error::{PrepError, Result};
use crate::packer::{self, PackOptions, PackReport};
use crate::simulate::{self, SimulationPlan, SimulationSummary};
use crate::store::{self, StoreOptions};
use crate::train::{self, TrainJob, TrainOutcome};
use crate::voxelize::{self, VoxelParams, VoxelReport};

pub const TIMINGS_FILE: &str = "timings.json";
pub const VOXEL_DIR: &str = "voxels";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dataset_dir: PathBuf,
    pub seeds_file: PathBuf,
    /// 已有模拟结果时跳过模拟阶段
    pub skip_simulate: bool,
    /// 即使配置了训练脚本也不训练
    pub skip_train: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub simulation: Option<SimulationSummary>,
    pub pack: PackReport,
    pub voxels: Vec<VoxelReport>,
    pub training: Vec<TrainOutcome>,
    pub timings: PathBuf,
}

/// 从数据集目录名（如 `Na365`）取开头的字母作为元素符号
pub fn element_from_dataset(dataset_dir: &Path) -> Option<String> {
    let name = dataset_dir.file_name()?.to_str()?;
    let element: String = name.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    (!element.is_empty()).then_some(element)
}

/// 运行完整流程；无论成功失败都把已有的耗时记录写到 `<dataset>/timings.json`
pub fn run_pipeline(state: &AppState, options: &PipelineOptions) -> Result<PipelineReport> {
    let timings = options.dataset_dir.join(TIMINGS_FILE);
    let result = run_stages(state, options, &timings);
    let written = state.performance_store.write_json(&state.run_id, &timings);
    match (result, written) {
        (Ok(report), Ok(())) => {
            log::info!("[流程] 完成，耗时记录写入 {}", timings.display());
            Ok(report)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), written) => {
            match written {
                Ok(()) => log::info!("[流程] 失败，耗时记录写入 {}", timings.display()),
                Err(write_err) => log::warn!("[流程] 无法写出耗时记录 {}: {}", timings.display(), write_err),
            }
            Err(e)
        }
    }
}

fn run_stages(state: &AppState, options: &PipelineOptions, timings: &Path) -> Result<PipelineReport> {
    let config = &state.config;
    let perf = &state.performance_store;
    let run_id = state.run_id.as_str();
    let seeds = packer::read_seed_list(&options.seeds_file)?;
    let phase = config.simulation.phase;
    let temperature = config.simulation.temperature;

    log::info!(
        "[流程] 运行 {}：数据集 {}，{} 个种子",
        run_id,
        options.dataset_dir.display(),
        seeds.len()
    );

    let simulation = if options.skip_simulate {
        log::info!("[流程] 跳过模拟阶段");
        None
    } else {
        let plan = SimulationPlan {
            dataset_dir: options.dataset_dir.clone(),
            seeds: seeds.clone(),
            phase,
            temperature,
            sim_time: config.simulation.sim_time.clone(),
            lammps: config.simulation.lammps.clone(),
            template_dir: config.simulation.template_dir.clone(),
            jobs: config.simulation.jobs,
        };
        let summary = perf.time_stage(run_id, "simulate", "", || {
            simulate::run_simulations(&plan, &state.job_store)
        })?;
        if summary.failed > 0 {
            return Err(PrepError::Seed(format!(
                "{} 个种子模拟失败: {}",
                summary.failed,
                summary.failed_seeds.join(", ")
            )));
        }
        Some(summary)
    };

    let output = options.dataset_dir.join(&config.pack.output);
    let pack_options = PackOptions {
        skip_frames: config.pack.skip_frames,
        store: StoreOptions {
            chunk_frames: config.pack.chunk,
            compress: config.pack.compress,
        },
        phase: Some(phase),
        temperature: Some(temperature),
    };
    let pack = perf.time_stage(run_id, "pack", "", || {
        packer::pack_dataset(
            &state.parser_registry,
            &options.dataset_dir,
            &seeds,
            &output,
            &pack_options,
        )
    })?;
    if pack.packed_count() == 0 {
        return Err(PrepError::Seed("所有种子都打包失败".into()));
    }

    let params = VoxelParams::new(config.voxel.bins, config.voxel.box_fraction)?;
    let voxel_dir = options.dataset_dir.join(VOXEL_DIR);
    std::fs::create_dir_all(&voxel_dir)?;
    let reader = store::open_reader(&output)?;
    let mut voxels = Vec::new();
    for group in reader.group_names()? {
        let target = voxel_dir.join(params.output_name(&group));
        let report = perf.time_stage(run_id, "voxelize", &group, || {
            voxelize::voxelize_group(reader.as_ref(), &group, &params, &target)
        })?;
        voxels.push(report);
    }

    let mut training = Vec::new();
    match (&config.train.script, options.skip_train) {
        (Some(script), false) => {
            let element = config
                .train
                .element
                .clone()
                .or_else(|| element_from_dataset(&options.dataset_dir))
                .ok_or_else(|| {
                    PrepError::Config("无法从数据集目录名推断元素，请设置 train.element".into())
                })?;
            for report in voxels.iter().filter(|r| r.frames > 0) {
                let job = TrainJob {
                    element: element.clone(),
                    data: report.output.clone(),
                    data_seed: Some(report.group.clone()),
                    voxel: params,
                    hyper: config.train.hyper.clone(),
                    phase: Some(phase),
                    temperature: Some(temperature),
                    results_dir: config.train.results_dir.clone(),
                };
                let outcome = perf.time_stage(run_id, "train", &report.group, || {
                    train::run_training(&config.train.python, script, &job)
                })?;
                training.push(outcome);
            }
        }
        _ => log::info!("[流程] 未配置训练脚本或已要求跳过，训练阶段略过"),
    }

    Ok(PipelineReport {
        run_id: run_id.to_string(),
        simulation,
        pack,
        voxels,
        training,
        timings: timings.to_path_buf(),
    })
}
