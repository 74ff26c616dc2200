use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::results::{COLUMNS, parse_results_folder, summarize, write_csv};

#[derive(Args, Debug)]
pub struct ParseResultsArgs {
    /// 指标文件所在目录，默认取 train.results_dir
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// 保存 CSV 的路径
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// 计算平均互信息使用的末尾样本数
    #[arg(long, short = 'k')]
    pub k: Option<usize>,

    /// 不打印汇总
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub fn run(state: &AppState, args: &ParseResultsArgs) -> Result<()> {
    let folder = args
        .folder
        .clone()
        .unwrap_or_else(|| state.config.train.results_dir.clone());
    let k = args.k.unwrap_or(state.config.results.k);
    let rows = parse_results_folder(&folder, k)
        .with_context(|| format!("解析 {} 失败", folder.display()))?;

    if !args.quiet {
        println!("共 {} 行，来自 {} 个文件", rows.len(), rows.len() / 2);
        println!("列: {}", COLUMNS.join(", "));
        println!();
        println!(
            "{:<6} {:>6} {:>12} {:>12} {:>12} {:>12}",
            "style", "count", "mean", "std", "min", "max"
        );
        for s in summarize(&rows) {
            println!(
                "{:<6} {:>6} {:>12.6} {:>12.6} {:>12.6} {:>12.6}",
                s.style, s.count, s.mean, s.std, s.min, s.max
            );
        }
    }

    if let Some(output) = &args.output {
        write_csv(&rows, output)
            .with_context(|| format!("写出 {} 失败", output.display()))?;
        if !args.quiet {
            println!("\n已保存到 {}", output.display());
        }
    }
    Ok(())
}
