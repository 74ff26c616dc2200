use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::voxelize::{VoxelParams, voxelize_file};

use super::parse_bins;

#[derive(Args, Debug)]
pub struct VoxelizeArgs {
    /// 打包后的容器文件
    #[arg(long, short = 'i')]
    pub input: PathBuf,

    /// 输出目录
    #[arg(long, short = 'o', default_value = "voxels")]
    pub out_dir: PathBuf,

    /// 只处理指定的组（种子），可重复
    #[arg(long, short = 'g')]
    pub group: Vec<String>,

    /// 分箱数：一个值或 bx,by,bz
    #[arg(long, value_delimiter = ',')]
    pub bins: Option<Vec<usize>>,

    /// 参与分箱的盒子边长比例 (0, 1]
    #[arg(long)]
    pub box_fraction: Option<f64>,
}

pub fn run(state: &AppState, args: &VoxelizeArgs) -> Result<()> {
    let voxel = &state.config.voxel;
    let bins = match &args.bins {
        Some(values) => parse_bins(values)?,
        None => voxel.bins,
    };
    let params = VoxelParams::new(bins, args.box_fraction.unwrap_or(voxel.box_fraction))?;

    let reports = voxelize_file(&args.input, &args.group, &params, &args.out_dir)
        .with_context(|| format!("体素化 {} 失败", args.input.display()))?;
    for report in &reports {
        println!(
            "{:>10}  {:?}  {}",
            report.group,
            report.shape,
            report.output.display()
        );
    }
    Ok(())
}
