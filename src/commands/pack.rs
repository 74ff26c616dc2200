use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::config::Phase;
use md_voxel_prep::packer::{PackOptions, SeedOutcome, pack_dataset, read_seed_list};
use md_voxel_prep::store::StoreOptions;

#[derive(Args, Debug)]
pub struct PackArgs {
    /// 数据集目录（如 Na365）
    #[arg(long, short = 'd')]
    pub dataset: PathBuf,

    /// 种子列表文件
    #[arg(long, short = 's')]
    pub seeds_file: PathBuf,

    /// 输出文件名，创建在数据集目录内；.h5 需要 hdf5 特性
    #[arg(long, short = 'o')]
    pub output: Option<String>,

    /// 写入属性的相态
    #[arg(long, short = 'p', value_enum)]
    pub phase: Option<Phase>,

    /// 写入属性的温度 (K)
    #[arg(long, short = 't')]
    pub temp: Option<f64>,

    /// 开头丢弃的帧数
    #[arg(long, short = 'k')]
    pub skip_frames: Option<usize>,

    /// 每个存储块的帧数
    #[arg(long)]
    pub chunk: Option<usize>,

    /// 关闭块压缩
    #[arg(long)]
    pub no_compress: bool,
}

pub fn run(state: &AppState, args: &PackArgs) -> Result<()> {
    let pack = &state.config.pack;
    let seeds = read_seed_list(&args.seeds_file)?;
    let output = args
        .dataset
        .join(args.output.as_deref().unwrap_or(&pack.output));
    let options = PackOptions {
        skip_frames: args.skip_frames.unwrap_or(pack.skip_frames),
        store: StoreOptions {
            chunk_frames: args.chunk.unwrap_or(pack.chunk).max(1),
            compress: pack.compress && !args.no_compress,
        },
        phase: args.phase,
        temperature: args.temp,
    };

    let report = pack_dataset(
        &state.parser_registry,
        &args.dataset,
        &seeds,
        &output,
        &options,
    )
    .with_context(|| format!("打包到 {} 失败", output.display()))?;

    for seed in &report.seeds {
        match &seed.outcome {
            SeedOutcome::Packed { frames, source } => {
                println!("{:>10}  {:>8} 帧  {}", seed.seed, frames, source.display())
            }
            SeedOutcome::Failed { error } => println!("{:>10}  失败    {}", seed.seed, error),
        }
    }
    if report.packed_count() == 0 {
        bail!("所有 {} 个种子都打包失败", report.seeds.len());
    }
    log::info!(
        "[打包] {} 个种子共 {} 帧写入 {}（失败 {} 个）",
        report.packed_count(),
        report.total_frames(),
        output.display(),
        report.failed().len()
    );
    Ok(())
}
