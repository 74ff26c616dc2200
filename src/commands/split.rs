use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::splitter::{SplitOptions, split_dump};

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// 输入 dump 文件
    pub input: PathBuf,

    /// 每个输出文件包含的帧数
    #[arg(long, short = 'n')]
    pub frames_per_chunk: usize,

    /// 开头丢弃的平衡帧数，默认取 pack.skip_frames
    #[arg(long, short = 'k')]
    pub skip_frames: Option<usize>,

    /// 输出目录
    #[arg(long, short = 'o', default_value = "chunks")]
    pub out_dir: PathBuf,

    /// 输出文件名前缀，默认使用输入文件名
    #[arg(long)]
    pub stem: Option<String>,
}

pub fn run(state: &AppState, args: &SplitArgs) -> Result<()> {
    let options = SplitOptions {
        frames_per_chunk: args.frames_per_chunk,
        skip_frames: args.skip_frames.unwrap_or(state.config.pack.skip_frames),
        out_dir: args.out_dir.clone(),
        stem: args.stem.clone(),
    };
    let chunks = split_dump(&args.input, &options)
        .with_context(|| format!("切分 {} 失败", args.input.display()))?;
    for chunk in &chunks {
        log::debug!("[切分] 块 {}: 帧 {}..{}", chunk.index, chunk.start, chunk.end);
    }
    println!("{}", serde_json::to_string_pretty(&chunks)?);
    Ok(())
}
