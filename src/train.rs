//! 训练脚本驱动
//!
//! 运行名把所有超参数编码进去，训练脚本按运行名写出 `<run>_metrics.npy`，
//! 结果解析阶段再从文件名还原超参数。

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::config::Phase;
use crate::error::{PrepError, Result};
use crate::simulate::find_executable;
use crate::voxelize::VoxelParams;

pub const METHOD: &str = "mice";
pub const METRICS_SUFFIX: &str = "_metrics.npy";

/// 训练超参数，字段名与运行名中的标记一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    /// 网络输入尺寸 dx/dy/dz
    pub dims: [usize; 3],
    pub seed: u64,
    pub w: usize,
    pub b: usize,
    pub lr: f64,
    pub ma: f64,
    /// batch size
    pub bs: usize,
    pub width: usize,
    pub m: f64,
    /// 全连接层 dropout
    pub dfc: f64,
    /// 卷积层 dropout
    pub dconv: f64,
    pub init: String,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            dims: [16, 16, 16],
            seed: 42,
            w: 16,
            b: 20,
            lr: 3e-5,
            ma: 3e-7,
            bs: 500,
            width: 20,
            m: 2.5,
            dfc: 0.3,
            dconv: 0.15,
            init: "xavier".to_string(),
        }
    }
}

/// 按 Python `str(float)` 的写法格式化：很小或很大的数用科学计数法，指数至少两位，
/// 整数值保留 `.0`
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let abs = value.abs();
    if value != 0.0 && value.is_finite() && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", value);
        if let Some((mantissa, exponent)) = text.split_once('e') {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            return format!("{}e{}{:0>2}", mantissa, sign, digits);
        }
        return text;
    }
    if value.is_finite() && value.fract() == 0.0 {
        return format!("{:.1}", value);
    }
    format!("{}", value)
}

/// 体素文件名 `<seed>_bf..._bin....npy` 开头的数据种子
pub fn seed_from_voxel_file(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (seed, _) = stem.split_once('_')?;
    (!seed.is_empty() && seed.bytes().all(|b| b.is_ascii_digit())).then(|| seed.to_string())
}

#[derive(Debug, Clone)]
pub struct TrainJob {
    /// 元素符号，运行名的第一个标记
    pub element: String,
    /// 体素张量 `.npy`
    pub data: PathBuf,
    /// 数据来自的模拟种子，写进运行名的第一个 `s` 标记；未知时使用训练种子
    pub data_seed: Option<String>,
    pub voxel: VoxelParams,
    pub hyper: Hyperparams,
    pub phase: Option<Phase>,
    pub temperature: Option<f64>,
    pub results_dir: PathBuf,
}

impl TrainJob {
    /// 运行名，例如
    /// `Na_bf0.4_bin32_mice_dx16_dy16_dz16_s11_w16_b20_lr3e-05_ma3e-07_bs500_width20_m2.5_dfc0.3_dconv0.15_initxavier_s42`；
    /// 第一个 `s` 标记是数据种子，最后一个是训练种子；
    /// 已知相态和温度时追加 `_m_<El><T>_<S|L>`
    pub fn run_name(&self) -> String {
        let h = &self.hyper;
        let [dx, dy, dz] = h.dims;
        let data_seed = self
            .data_seed
            .clone()
            .unwrap_or_else(|| h.seed.to_string());
        let mut name = format!(
            "{}_bf{}_bin{}_{}_dx{}_dy{}_dz{}_s{}_w{}_b{}_lr{}_ma{}_bs{}_width{}_m{}_dfc{}_dconv{}_init{}_s{}",
            self.element,
            format_float(self.voxel.box_fraction),
            self.voxel.bins[0],
            METHOD,
            dx,
            dy,
            dz,
            data_seed,
            h.w,
            h.b,
            format_float(h.lr),
            format_float(h.ma),
            h.bs,
            h.width,
            format_float(h.m),
            format_float(h.dfc),
            format_float(h.dconv),
            h.init,
            h.seed
        );
        if let (Some(phase), Some(temperature)) = (self.phase, self.temperature) {
            name.push_str(&format!(
                "_m_{}{:.0}_{}",
                self.element,
                temperature,
                phase.label()
            ));
        }
        name
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.results_dir
            .join(format!("{}{}", self.run_name(), METRICS_SUFFIX))
    }

    /// 训练脚本的命令行参数
    pub fn script_args(&self) -> Vec<String> {
        let h = &self.hyper;
        let [dx, dy, dz] = h.dims;
        let pairs: Vec<(&str, String)> = vec![
            ("--data", self.data.to_string_lossy().into_owned()),
            ("--name", self.run_name()),
            ("--out", self.results_dir.to_string_lossy().into_owned()),
            ("--bf", format_float(self.voxel.box_fraction)),
            ("--bin", self.voxel.bins[0].to_string()),
            ("--dx", dx.to_string()),
            ("--dy", dy.to_string()),
            ("--dz", dz.to_string()),
            ("--seed", h.seed.to_string()),
            ("--w", h.w.to_string()),
            ("--b", h.b.to_string()),
            ("--lr", format_float(h.lr)),
            ("--ma", format_float(h.ma)),
            ("--bs", h.bs.to_string()),
            ("--width", h.width.to_string()),
            ("--m", format_float(h.m)),
            ("--dfc", format_float(h.dfc)),
            ("--dconv", format_float(h.dconv)),
            ("--init", h.init.clone()),
        ];
        pairs
            .into_iter()
            .flat_map(|(flag, value)| [flag.to_string(), value])
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainOutcome {
    pub run_name: String,
    /// 训练脚本写出的指标文件；脚本没有写出时为 None
    pub metrics: Option<PathBuf>,
}

/// 调用外部训练脚本，等待其结束
pub fn run_training(python: &str, script: &Path, job: &TrainJob) -> Result<TrainOutcome> {
    if !script.is_file() {
        return Err(PrepError::Config(format!(
            "找不到训练脚本 {}",
            script.display()
        )));
    }
    if !job.data.is_file() {
        return Err(PrepError::Config(format!(
            "找不到训练数据 {}",
            job.data.display()
        )));
    }
    let python_path = find_executable(python)?;
    fs::create_dir_all(&job.results_dir)?;

    let run_name = job.run_name();
    log::info!("[训练] 开始 {}", run_name);
    let status = Command::new(&python_path)
        .arg(script)
        .args(job.script_args())
        .status()?;
    if !status.success() {
        return Err(PrepError::Process {
            program: format!("{} {}", python, script.display()),
            code: status.code(),
        });
    }

    let metrics_path = job.metrics_path();
    let metrics = if metrics_path.is_file() {
        log::info!("[训练] {} 完成，指标文件 {}", run_name, metrics_path.display());
        Some(metrics_path)
    } else {
        log::warn!(
            "[训练] {} 结束但没有找到指标文件 {}",
            run_name,
            metrics_path.display()
        );
        None
    };
    Ok(TrainOutcome { run_name, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &Path) -> TrainJob {
        TrainJob {
            element: "Na".into(),
            data: dir.join("42_bf0.4_bin32.npy"),
            data_seed: None,
            voxel: VoxelParams::new([32, 32, 32], 0.4).unwrap(),
            hyper: Hyperparams::default(),
            phase: None,
            temperature: None,
            results_dir: dir.join("results"),
        }
    }

    #[test]
    fn floats_follow_python_formatting() {
        assert_eq!(format_float(3e-5), "3e-05");
        assert_eq!(format_float(3e-7), "3e-07");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(0.15), "0.15");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn data_seed_comes_from_voxel_file_name() {
        assert_eq!(seed_from_voxel_file(Path::new("v/11_bf1_bin2.npy")), Some("11".into()));
        assert_eq!(seed_from_voxel_file(Path::new("v/run_bf1_bin2.npy")), None);
        assert_eq!(seed_from_voxel_file(Path::new("v/11.npy")), None);
    }

    #[test]
    fn data_seed_distinguishes_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = job(dir.path());
        first.data_seed = Some("11".into());
        let mut second = job(dir.path());
        second.data_seed = Some("22".into());
        assert_ne!(first.run_name(), second.run_name());
        assert!(first.run_name().contains("_dz16_s11_w16_"));
        assert!(first.run_name().ends_with("_initxavier_s42"));

        // 结果解析取最后一个 s 标记，即训练种子
        let parsed = crate::results::FilenameParser::new()
            .unwrap()
            .parse(&first.run_name());
        assert_eq!(parsed.seed, Some(42));
    }

    #[test]
    fn run_name_encodes_default_hyperparameters() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            job(dir.path()).run_name(),
            "Na_bf0.4_bin32_mice_dx16_dy16_dz16_s42_w16_b20_lr3e-05_ma3e-07_bs500_width20_m2.5_dfc0.3_dconv0.15_initxavier_s42"
        );
    }

    #[test]
    fn run_name_carries_phase_and_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path());
        job.phase = Some(Phase::Solid);
        job.temperature = Some(365.0);
        assert!(job.run_name().ends_with("_s42_m_Na365_S"));
    }

    #[test]
    fn script_args_are_flag_value_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let args = job(dir.path()).script_args();
        assert_eq!(args.len() % 2, 0);
        let lr = args.iter().position(|a| a == "--lr").unwrap();
        assert_eq!(args[lr + 1], "3e-05");
    }

    #[test]
    fn missing_script_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_training("python3", &dir.path().join("train.py"), &job(dir.path())).unwrap_err();
        assert!(matches!(err, PrepError::Config(_)));
    }

    #[cfg(unix)]
    #[test]
    fn script_is_run_and_metrics_located() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        fs::write(&job.data, b"").unwrap();
        // 假的训练脚本：$4 为运行名，$6 为结果目录
        let script = dir.path().join("train.sh");
        fs::write(&script, "touch \"$6/$4_metrics.npy\"\n").unwrap();

        let outcome = run_training("/bin/sh", &script, &job).unwrap();
        assert_eq!(outcome.metrics, Some(job.metrics_path()));
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        fs::write(&job.data, b"").unwrap();
        let script = dir.path().join("train.sh");
        fs::write(&script, "exit 3\n").unwrap();

        let err = run_training("/bin/sh", &script, &job).unwrap_err();
        assert!(matches!(err, PrepError::Process { code: Some(3), .. }));
    }
}
