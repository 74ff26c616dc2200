use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::pipeline::{PipelineOptions, run_pipeline};

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// 数据集目录
    #[arg(long, short = 'd')]
    pub dataset: PathBuf,

    /// 种子列表文件
    #[arg(long, short = 's')]
    pub seeds_file: PathBuf,

    /// 使用已有的模拟结果
    #[arg(long)]
    pub skip_simulate: bool,

    /// 不运行训练
    #[arg(long)]
    pub skip_train: bool,
}

pub fn run(state: &AppState, args: &PipelineArgs) -> Result<()> {
    let options = PipelineOptions {
        dataset_dir: args.dataset.clone(),
        seeds_file: args.seeds_file.clone(),
        skip_simulate: args.skip_simulate,
        skip_train: args.skip_train,
    };
    let report = run_pipeline(state, &options)
        .with_context(|| format!("数据集 {} 的流程失败", args.dataset.display()))?;

    for record in state
        .performance_store
        .get_records(&state.run_id)
        .unwrap_or_default()
    {
        log::info!(
            "[流程] {:<9} {:>8} {:>8} ms  {}",
            record.stage,
            record.item,
            record.duration_ms(),
            record.msg
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
