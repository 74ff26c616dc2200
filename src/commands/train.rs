use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::config::Phase;
use md_voxel_prep::pipeline::element_from_dataset;
use md_voxel_prep::train::{TrainJob, run_training, seed_from_voxel_file};
use md_voxel_prep::voxelize::VoxelParams;

use super::parse_bins;

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 体素张量 .npy
    #[arg(long)]
    pub data: PathBuf,

    /// 元素符号，默认取配置或数据文件所在目录名
    #[arg(long, short = 'e')]
    pub element: Option<String>,

    /// 训练脚本，默认取 train.script
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Python 解释器
    #[arg(long)]
    pub python: Option<String>,

    /// 指标输出目录
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// 数据使用的分箱数，写进运行名
    #[arg(long, value_delimiter = ',')]
    pub bins: Option<Vec<usize>>,

    #[arg(long)]
    pub box_fraction: Option<f64>,

    #[arg(long, short = 'p', value_enum)]
    pub phase: Option<Phase>,

    #[arg(long, short = 't')]
    pub temp: Option<f64>,

    /// 覆盖训练随机种子
    #[arg(long)]
    pub seed: Option<u64>,

    /// 数据来自的模拟种子，默认取体素文件名开头的种子
    #[arg(long)]
    pub data_seed: Option<String>,
}

pub fn run(state: &AppState, args: &TrainArgs) -> Result<()> {
    let config = &state.config;
    let script = args
        .script
        .clone()
        .or_else(|| config.train.script.clone())
        .context("没有指定训练脚本（--script 或 train.script）")?;
    let element = args
        .element
        .clone()
        .or_else(|| config.train.element.clone())
        .or_else(|| args.data.parent().and_then(|dir| {
            let dir = if dir.ends_with("voxels") { dir.parent()? } else { dir };
            element_from_dataset(dir)
        }))
        .context("无法确定元素符号，请使用 --element")?;
    let bins = match &args.bins {
        Some(values) => parse_bins(values)?,
        None => config.voxel.bins,
    };

    let mut hyper = config.train.hyper.clone();
    if let Some(seed) = args.seed {
        hyper.seed = seed;
    }
    let job = TrainJob {
        element,
        data: args.data.clone(),
        data_seed: args
            .data_seed
            .clone()
            .or_else(|| seed_from_voxel_file(&args.data)),
        voxel: VoxelParams::new(bins, args.box_fraction.unwrap_or(config.voxel.box_fraction))?,
        hyper,
        phase: args.phase,
        temperature: args.temp,
        results_dir: args
            .results_dir
            .clone()
            .unwrap_or_else(|| config.train.results_dir.clone()),
    };

    let python = args.python.as_deref().unwrap_or(&config.train.python);
    let outcome = run_training(python, &script, &job)?;
    println!("{}", outcome.run_name);
    if let Some(metrics) = outcome.metrics {
        println!("{}", metrics.display());
    }
    Ok(())
}
