use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{
    pack::PackArgs, pipeline::PipelineArgs, results::ParseResultsArgs, simulate::SimulateArgs,
    split::SplitArgs, train::TrainArgs, voxelize::VoxelizeArgs,
};

/// 分子动力学轨迹 → 体素张量的数据准备工具
#[derive(Parser, Debug)]
#[command(name = "md-voxel-prep")]
#[command(version)]
#[command(about = "LAMMPS 轨迹的模拟、打包、体素化与训练结果汇总", long_about = None)]
pub struct Cli {
    /// TOML 配置文件
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 为每个种子运行 LAMMPS + PLUMED 模拟
    Simulate(SimulateArgs),

    /// 把单个 dump 文件按帧数切分
    Split(SplitArgs),

    /// 把各种子的 dump 打包进一个分块容器
    Pack(PackArgs),

    /// 把打包的坐标体素化为 .npy 张量
    Voxelize(VoxelizeArgs),

    /// 调用外部训练脚本
    Train(TrainArgs),

    /// 汇总训练指标文件为 CSV
    ParseResults(ParseResultsArgs),

    /// 依次运行 simulate → pack → voxelize → train
    Pipeline(PipelineArgs),
}
