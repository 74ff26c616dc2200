//! 流程配置
//!
//! 所有参数都有默认值，可以通过 `--config <file.toml>` 覆盖，
//! 再由环境变量 `PHASE` / `TEMP` / `SIM_TIME` 覆盖模拟相关的设置。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::store;
use crate::train::Hyperparams;

pub const ENV_PHASE: &str = "PHASE";
pub const ENV_TEMP: &str = "TEMP";
pub const ENV_SIM_TIME: &str = "SIM_TIME";

/// 热力学相态，决定使用哪个模拟模板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Solid,
    Liquid,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Solid => "solid",
            Phase::Liquid => "liquid",
        }
    }

    /// 运行名中使用的单字母标签
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Solid => "S",
            Phase::Liquid => "L",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solid" | "s" => Ok(Phase::Solid),
            "liquid" | "l" => Ok(Phase::Liquid),
            other => Err(PrepError::Config(format!(
                "未知相态 '{}'，应为 solid 或 liquid",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub pack: PackConfig,
    #[serde(default)]
    pub voxel: VoxelConfig,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub results: ResultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// LAMMPS 可执行文件（名称或路径）
    pub lammps: String,
    /// 存放 in.solid.lmp / in.liquid.lmp / plumed.dat 的目录
    pub template_dir: PathBuf,
    pub phase: Phase,
    /// 温度 (K)
    pub temperature: f64,
    /// 模拟时长，原样传给模板和环境变量
    pub sim_time: String,
    /// 同时运行的最大进程数
    pub jobs: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            lammps: "lmp".to_string(),
            template_dir: PathBuf::from("templates"),
            phase: Phase::Solid,
            temperature: 300.0,
            sim_time: "1000000".to_string(),
            jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// 开头丢弃的平衡帧数
    pub skip_frames: usize,
    /// 每个存储块包含的帧数
    pub chunk: usize,
    pub compress: bool,
    pub output: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            skip_frames: 200,
            chunk: 128,
            compress: true,
            output: store::DEFAULT_OUTPUT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelConfig {
    /// 每个方向的分箱数 [bx, by, bz]
    pub bins: [usize; 3],
    /// 参与分箱的盒子边长比例，取值 (0, 1]
    pub box_fraction: f64,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            bins: [32, 32, 32],
            box_fraction: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub python: String,
    /// 训练脚本路径；为空时流水线跳过训练阶段
    pub script: Option<PathBuf>,
    pub results_dir: PathBuf,
    /// 运行名中的元素符号；为空时取数据集目录名开头的字母
    pub element: Option<String>,
    pub hyper: Hyperparams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            script: None,
            results_dir: PathBuf::from("results/mice"),
            element: None,
            hyper: Hyperparams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// 计算平均互信息时使用的末尾样本数
    pub k: usize,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self { k: 10000 }
    }
}

impl PrepConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PrepError::Config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        content.parse()
    }

    /// 加载配置（可选文件）并应用环境变量覆盖
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖模拟参数
    /// `lookup` 便于测试时注入，不直接读取进程环境
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(phase) = lookup(ENV_PHASE) {
            self.simulation.phase = phase.parse()?;
        }
        if let Some(temp) = lookup(ENV_TEMP) {
            self.simulation.temperature = temp.trim().parse().map_err(|_| {
                PrepError::Config(format!("{} 不是有效温度: '{}'", ENV_TEMP, temp))
            })?;
        }
        if let Some(time) = lookup(ENV_SIM_TIME) {
            self.simulation.sim_time = time.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.simulation.jobs == 0 {
            return Err(PrepError::Config("simulation.jobs 必须至少为 1".into()));
        }
        if self.pack.chunk == 0 {
            return Err(PrepError::Config("pack.chunk 必须至少为 1".into()));
        }
        if self.voxel.bins.iter().any(|&b| b == 0) {
            return Err(PrepError::Config(format!(
                "voxel.bins 不能包含 0: {:?}",
                self.voxel.bins
            )));
        }
        if !(self.voxel.box_fraction > 0.0 && self.voxel.box_fraction <= 1.0) {
            return Err(PrepError::Config(format!(
                "voxel.box_fraction 应在 (0, 1] 内，得到 {}",
                self.voxel.box_fraction
            )));
        }
        Ok(())
    }
}

impl FromStr for PrepConfig {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PrepError::Config(format!("TOML 解析失败: {}", e)))
    }
}
