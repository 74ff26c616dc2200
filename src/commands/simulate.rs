use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use md_voxel_prep::AppState;
use md_voxel_prep::config::Phase;
use md_voxel_prep::packer::read_seed_list;
use md_voxel_prep::simulate::{SimulationPlan, run_simulations};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// 数据集目录，每个种子一个子目录
    #[arg(long, short = 'd')]
    pub dataset: PathBuf,

    /// 种子列表文件，每行一个种子
    #[arg(long, short = 's')]
    pub seeds_file: PathBuf,

    #[arg(long, short = 'p', value_enum)]
    pub phase: Option<Phase>,

    /// 温度 (K)
    #[arg(long, short = 't')]
    pub temp: Option<f64>,

    /// 模拟时长（步数）
    #[arg(long)]
    pub sim_time: Option<String>,

    /// 最大并发进程数
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// LAMMPS 可执行文件
    #[arg(long)]
    pub lammps: Option<String>,

    /// 模板目录（in.solid.lmp / in.liquid.lmp / plumed.dat）
    #[arg(long)]
    pub template_dir: Option<PathBuf>,
}

pub fn run(state: &AppState, args: &SimulateArgs) -> Result<()> {
    let sim = &state.config.simulation;
    let plan = SimulationPlan {
        dataset_dir: args.dataset.clone(),
        seeds: read_seed_list(&args.seeds_file)?,
        phase: args.phase.unwrap_or(sim.phase),
        temperature: args.temp.unwrap_or(sim.temperature),
        sim_time: args.sim_time.clone().unwrap_or_else(|| sim.sim_time.clone()),
        lammps: args.lammps.clone().unwrap_or_else(|| sim.lammps.clone()),
        template_dir: args
            .template_dir
            .clone()
            .unwrap_or_else(|| sim.template_dir.clone()),
        jobs: args.jobs.unwrap_or(sim.jobs),
    };
    if plan.jobs == 0 {
        bail!("--jobs 必须至少为 1");
    }

    let summary = run_simulations(&plan, &state.job_store).context("模拟阶段失败")?;
    for job in state.job_store.summaries() {
        log::info!(
            "[模拟] 种子 {:>8}  {:?}  退出码 {:?}  {} ms",
            job.seed,
            job.status,
            job.exit_code,
            job.elapsed_ms.unwrap_or_default()
        );
    }
    if summary.failed > 0 {
        bail!(
            "{} 个种子模拟失败: {}",
            summary.failed,
            summary.failed_seeds.join(", ")
        );
    }
    log::info!("[模拟] {} 个种子全部完成", summary.succeeded);
    Ok(())
}
