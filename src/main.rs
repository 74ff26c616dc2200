mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use md_voxel_prep::{AppState, PrepConfig};

use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    let config = PrepConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    let state = AppState::new(config);

    log::debug!("已注册的解析器:");
    for ext in state.parser_registry.supported_extensions() {
        log::debug!("  - .{}", ext);
    }
    log::debug!("运行 id: {}", state.run_id);

    commands::run(&state, &cli.command)
}
