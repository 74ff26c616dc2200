pub mod pack;
pub mod pipeline;
pub mod results;
pub mod simulate;
pub mod split;
pub mod train;
pub mod voxelize;

use anyhow::{Result, bail};
use md_voxel_prep::AppState;

use crate::cli::Commands;

pub fn run(state: &AppState, command: &Commands) -> Result<()> {
    match command {
        Commands::Simulate(args) => simulate::run(state, args),
        Commands::Split(args) => split::run(state, args),
        Commands::Pack(args) => pack::run(state, args),
        Commands::Voxelize(args) => voxelize::run(state, args),
        Commands::Train(args) => train::run(state, args),
        Commands::ParseResults(args) => results::run(state, args),
        Commands::Pipeline(args) => pipeline::run(state, args),
    }
}

/// `--bins 32` 表示三个方向相同，`--bins 16,16,8` 分别指定
pub fn parse_bins(values: &[usize]) -> Result<[usize; 3]> {
    match values {
        [b] => Ok([*b; 3]),
        [bx, by, bz] => Ok([*bx, *by, *bz]),
        other => bail!("--bins 需要 1 个或 3 个值，得到 {}", other.len()),
    }
}
