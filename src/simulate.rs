//! 外部模拟任务启动器
//!
//! 每个种子在 `<dataset>/<seed>/` 下渲染相态模板并调用 LAMMPS（PLUMED 通过
//! 输入文件中的 fix plumed 加载）。并发数由 `jobs` 限制，所有种子结束后才返回。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::{ENV_PHASE, ENV_SIM_TIME, ENV_TEMP, Phase};
use crate::error::{PrepError, Result};
use crate::task::{JobStatus, JobStore, SimJob};

pub const PLUMED_FILE: &str = "plumed.dat";
pub const LOG_FILE: &str = "log.lammps.out";

#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub dataset_dir: PathBuf,
    pub seeds: Vec<String>,
    pub phase: Phase,
    pub temperature: f64,
    pub sim_time: String,
    /// LAMMPS 可执行文件（名称或路径）
    pub lammps: String,
    pub template_dir: PathBuf,
    pub jobs: usize,
}

impl SimulationPlan {
    pub fn template_path(&self) -> PathBuf {
        self.template_dir.join(template_name(self.phase))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub failed_seeds: Vec<String>,
}

pub fn template_name(phase: Phase) -> String {
    format!("in.{}.lmp", phase.as_str())
}

/// 替换模板中的 {{SEED}} / {{TEMP}} / {{SIM_TIME}} / {{PHASE}} 占位符
pub fn render_template(template: &str, seed: &str, plan: &SimulationPlan) -> String {
    template
        .replace("{{SEED}}", seed)
        .replace("{{TEMP}}", &plan.temperature.to_string())
        .replace("{{SIM_TIME}}", &plan.sim_time)
        .replace("{{PHASE}}", plan.phase.as_str())
}

/// 在 PATH 中查找可执行文件；带路径的名称直接检查该文件
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|e| {
        log::debug!("[模拟] 查找 {} 失败: {}", name, e);
        PrepError::MissingBinary(name.to_string())
    })
}

/// 准备种子目录：写入渲染后的输入文件，复制 plumed.dat，创建 dump/
pub fn prepare_seed_dir(
    plan: &SimulationPlan,
    seed: &str,
    template: &str,
    plumed: Option<&Path>,
) -> Result<PathBuf> {
    let seed_dir = plan.dataset_dir.join(seed);
    fs::create_dir_all(seed_dir.join("dump"))?;
    fs::write(
        seed_dir.join(template_name(plan.phase)),
        render_template(template, seed, plan),
    )?;
    if let Some(plumed) = plumed {
        fs::copy(plumed, seed_dir.join(PLUMED_FILE))?;
    }
    Ok(seed_dir)
}

fn run_job(
    plan: &SimulationPlan,
    lammps: &Path,
    job: &SimJob,
    template: &str,
    plumed: Option<&Path>,
) -> Result<()> {
    prepare_seed_dir(plan, &job.seed, template, plumed)?;

    let log = File::create(job.work_dir.join(LOG_FILE))?;
    let log_err = log.try_clone()?;

    job.mark_running();
    log::info!("[模拟] 种子 {} 开始运行 ({})", job.seed, job.work_dir.display());
    let status = Command::new(lammps)
        .current_dir(&job.work_dir)
        .arg("-in")
        .arg(template_name(plan.phase))
        .args(["-var", "seed", job.seed.as_str()])
        .args(["-var", "temp"])
        .arg(plan.temperature.to_string())
        .args(["-var", "simtime", plan.sim_time.as_str()])
        .env(ENV_PHASE, plan.phase.as_str())
        .env(ENV_TEMP, plan.temperature.to_string())
        .env(ENV_SIM_TIME, &plan.sim_time)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()?;
    job.mark_exited(status.code());

    if status.success() {
        log::info!(
            "[模拟] 种子 {} 完成，耗时 {:.1}s",
            job.seed,
            job.elapsed().map(|d| d.as_secs_f64()).unwrap_or_default()
        );
    } else {
        log::error!(
            "[模拟] 种子 {} 失败，退出码 {:?}，详见 {}",
            job.seed,
            status.code(),
            job.work_dir.join(LOG_FILE).display()
        );
    }
    Ok(())
}

/// 运行所有种子的模拟，最多同时运行 `plan.jobs` 个进程
///
/// 模板或可执行文件缺失时在启动任何任务之前返回错误；
/// 单个任务失败会记录在 `job_store` 中并体现在返回的汇总里。
pub fn run_simulations(plan: &SimulationPlan, job_store: &JobStore) -> Result<SimulationSummary> {
    if plan.seeds.is_empty() {
        return Err(PrepError::Seed("没有需要模拟的种子".into()));
    }
    let lammps = find_executable(&plan.lammps)?;
    let template_path = plan.template_path();
    let template = fs::read_to_string(&template_path).map_err(|e| {
        PrepError::Config(format!("缺少模拟模板 {}: {}", template_path.display(), e))
    })?;
    let plumed_path = plan.template_dir.join(PLUMED_FILE);
    let plumed = plumed_path.is_file().then_some(plumed_path.as_path());
    fs::create_dir_all(&plan.dataset_dir)?;

    let jobs: Vec<Arc<SimJob>> = plan
        .seeds
        .iter()
        .filter_map(|seed| {
            let id = job_store.insert(SimJob::new(seed.clone(), plan.dataset_dir.join(seed)));
            job_store.get(&id)
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(plan.jobs.max(1))
        .build()
        .map_err(|e| PrepError::Config(format!("无法创建线程池: {}", e)))?;

    log::info!(
        "[模拟] {} 个种子，相态 {}，温度 {} K，并发 {}",
        jobs.len(),
        plan.phase,
        plan.temperature,
        plan.jobs
    );
    pool.install(|| {
        jobs.par_iter().for_each(|job| {
            if let Err(e) = run_job(plan, &lammps, job, &template, plumed) {
                log::error!("[模拟] 种子 {} 无法启动: {}", job.seed, e);
                job.mark_failed(e.to_string());
            }
        });
    });

    let failed_seeds: Vec<String> = jobs
        .iter()
        .filter(|job| job.status() != JobStatus::Succeeded)
        .map(|job| job.seed.clone())
        .collect();
    Ok(SimulationSummary {
        succeeded: jobs.len() - failed_seeds.len(),
        failed: failed_seeds.len(),
        failed_seeds,
    })
}
