//! 训练结果汇总
//!
//! 从 `*_metrics.npy` 文件名还原超参数，读取指标数组末尾 k 个值的平均互信息，
//! 每个文件生成 train / val 两行，写成 CSV。

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView1};
use ndarray_npy::{ReadNpyError, read_npy};
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{PrepError, Result};
use crate::train::{METHOD, METRICS_SUFFIX};

/// CSV 列顺序
pub const COLUMNS: [&str; 22] = [
    "bf",
    "bin",
    "binx",
    "biny",
    "binz",
    "dims",
    "w",
    "bs",
    "lr",
    "ma",
    "m",
    "d_fc",
    "d_conv",
    "width",
    "seed",
    "init",
    "method",
    "MI",
    "style",
    "phase",
    "element",
    "temperature",
];

/// 至少解析出这么多字段的文件才被当作训练结果
const MIN_FIELDS: usize = 6;

/// 从文件名解析出的超参数，缺失的字段为 None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunParams {
    pub element: Option<String>,
    pub temperature: Option<u64>,
    pub bf: Option<f64>,
    pub d_conv: Option<f64>,
    pub d_fc: Option<f64>,
    pub bin: Option<u64>,
    pub binx: Option<u64>,
    pub biny: Option<u64>,
    pub binz: Option<u64>,
    pub dims: Option<u64>,
    pub phase: Option<String>,
    pub width: Option<u64>,
    pub bs: Option<u64>,
    pub w: Option<u64>,
    pub ma: Option<f64>,
    pub lr: Option<f64>,
    pub m: Option<f64>,
    pub seed: Option<u64>,
    pub init: Option<String>,
    pub method: Option<String>,
}

impl RunParams {
    /// 已解析出的字段数
    pub fn field_count(&self) -> usize {
        let numeric = [
            self.bf, self.d_conv, self.d_fc, self.ma, self.lr, self.m,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count();
        let integer = [
            self.temperature,
            self.bin,
            self.binx,
            self.biny,
            self.binz,
            self.dims,
            self.width,
            self.bs,
            self.w,
            self.seed,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count();
        let text = [&self.element, &self.phase, &self.init, &self.method]
            .iter()
            .filter(|v| v.is_some())
            .count();
        numeric + integer + text
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_float(s: &str) -> Option<f64> {
    s.parse().ok()
}

/// 文件名解析器
pub struct FilenameParser {
    /// 数据集标签 `m_<El><T>_`，给出元素和温度
    dataset_tag: Regex,
}

impl FilenameParser {
    pub fn new() -> Result<Self> {
        let dataset_tag = Regex::new(r"m_([A-Za-z]+)(\d+)_")
            .map_err(|e| PrepError::Config(format!("正则表达式无效: {}", e)))?;
        Ok(Self { dataset_tag })
    }

    /// 解析文件名（可带扩展名）中的超参数
    pub fn parse(&self, filename: &str) -> RunParams {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        let parts: Vec<&str> = stem.split('_').collect();
        let mut parsed = RunParams::default();

        // 第一个标记是 1-3 个字母时视为元素符号
        if let Some(first) = parts.first() {
            let len = first.chars().count();
            if (1..=3).contains(&len) && first.chars().all(char::is_alphabetic) {
                parsed.element = Some(first.to_string());
            }
        }

        if let Some(caps) = self.dataset_tag.captures(stem) {
            if parsed.element.is_none() {
                parsed.element = Some(caps[1].to_string());
            }
            parsed.temperature = caps[2].parse().ok();
        }

        // 前缀更具体的标记先判断
        for part in &parts {
            if let Some(v) = part.strip_prefix("bf") {
                parsed.bf = parse_float(v);
            } else if let Some(v) = part.strip_prefix("dconv") {
                parsed.d_conv = parse_float(v);
            } else if let Some(v) = part.strip_prefix("dfc") {
                parsed.d_fc = parse_float(v);
            } else if let Some(n) = part.strip_prefix("bin").and_then(parse_digits) {
                parsed.bin = Some(n);
            } else if let Some(v) = part.strip_prefix("dx") {
                parsed.binx = parse_digits(v);
            } else if let Some(v) = part.strip_prefix("dy") {
                parsed.biny = parse_digits(v);
            } else if let Some(v) = part.strip_prefix("dz") {
                parsed.binz = parse_digits(v);
            } else if *part == "S" || *part == "L" {
                parsed.phase = Some(part.to_string());
            } else if let Some(v) = part.strip_prefix("width") {
                parsed.width = parse_digits(v);
            } else if let Some(v) = part.strip_prefix("bs") {
                parsed.bs = parse_digits(v);
            } else if let Some(n) = part.strip_prefix('w').and_then(parse_digits) {
                parsed.w = Some(n);
            } else if let Some(v) = part.strip_prefix("ma") {
                parsed.ma = parse_float(v);
            } else if let Some(v) = part.strip_prefix("lr") {
                parsed.lr = parse_float(v);
            } else if *part == METHOD {
                parsed.method = Some(METHOD.to_string());
            } else if let Some(v) = part.strip_prefix('m').and_then(parse_float) {
                parsed.m = Some(v);
            } else if let Some(n) = part.strip_prefix('s').and_then(parse_digits) {
                parsed.seed = Some(n);
            } else if let Some(v) = part.strip_prefix("init") {
                parsed.init = Some(v.to_string());
            }
        }

        if let (Some(x), Some(y), Some(z)) = (parsed.binx, parsed.biny, parsed.binz) {
            parsed.dims = Some(x * y * z);
        }
        parsed
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn tail_mean(row: ArrayView1<f64>, k: usize) -> f64 {
    let values: Vec<f64> = row.iter().copied().collect();
    if k == 0 || values.len() < k {
        mean(&values)
    } else {
        mean(&values[values.len() - k..])
    }
}

/// 读取二维指标数组；float32 保存的文件转换为 f64
fn read_metrics_array(path: &Path) -> Result<Array2<f64>> {
    match read_npy::<_, Array2<f64>>(path) {
        Ok(array) => Ok(array),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let array: Array2<f32> = read_npy(path)?;
            Ok(array.mapv(f64::from))
        }
        Err(e) => Err(e.into()),
    }
}

/// 读取指标数组，返回 (train, val) 互信息的末尾 k 个值平均
///
/// 数组形状为 (rows, n)：第 0 行是训练集，第 1 行是验证集；
/// 只有一行时验证集为 NaN，没有行时两者都是 NaN。
pub fn load_metrics(path: &Path, k: usize) -> Result<(f64, f64)> {
    let array = read_metrics_array(path)?;
    Ok(match array.nrows() {
        0 => (f64::NAN, f64::NAN),
        1 => (tail_mean(array.row(0), k), f64::NAN),
        _ => (tail_mean(array.row(0), k), tail_mean(array.row(1), k)),
    })
}

/// NaN 写成空字段
fn nan_as_empty<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_none()
    } else {
        serializer.serialize_f64(*value)
    }
}

/// 汇总表中的一行
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub bf: Option<f64>,
    pub bin: Option<u64>,
    pub binx: Option<u64>,
    pub biny: Option<u64>,
    pub binz: Option<u64>,
    pub dims: Option<u64>,
    pub w: Option<u64>,
    pub bs: Option<u64>,
    pub lr: Option<f64>,
    pub ma: Option<f64>,
    pub m: Option<f64>,
    pub d_fc: Option<f64>,
    pub d_conv: Option<f64>,
    pub width: Option<u64>,
    pub seed: Option<u64>,
    pub init: Option<String>,
    pub method: String,
    #[serde(rename = "MI", serialize_with = "nan_as_empty")]
    pub mi: f64,
    pub style: String,
    pub phase: Option<String>,
    pub element: Option<String>,
    pub temperature: Option<u64>,
}

impl ResultRow {
    fn new(params: &RunParams, mi: f64, style: &str) -> Self {
        Self {
            bf: params.bf,
            bin: params.bin,
            binx: params.binx,
            biny: params.biny,
            binz: params.binz,
            dims: params.dims,
            w: params.w,
            bs: params.bs,
            lr: params.lr,
            ma: params.ma,
            m: params.m,
            d_fc: params.d_fc,
            d_conv: params.d_conv,
            width: params.width,
            seed: params.seed,
            init: params.init.clone(),
            method: params.method.clone().unwrap_or_else(|| METHOD.to_string()),
            mi,
            style: style.to_string(),
            phase: params.phase.clone(),
            element: params.element.clone(),
            temperature: params.temperature,
        }
    }
}

/// 解析目录下所有 `*_metrics.npy`，按文件名顺序生成结果行
pub fn parse_results_folder(folder: &Path, k: usize) -> Result<Vec<ResultRow>> {
    if !folder.is_dir() {
        return Err(PrepError::Config(format!(
            "结果目录不存在: {}",
            folder.display()
        )));
    }
    let parser = FilenameParser::new()?;

    let mut names: Vec<String> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(METRICS_SUFFIX))
        .collect();
    names.sort();

    let mut rows = Vec::new();
    for name in &names {
        let params = parser.parse(name);
        if params.field_count() < MIN_FIELDS {
            log::debug!("[结果] 跳过 {}：只解析出 {} 个字段", name, params.field_count());
            continue;
        }
        match load_metrics(&folder.join(name), k) {
            Ok((train, val)) => {
                rows.push(ResultRow::new(&params, train, "train"));
                rows.push(ResultRow::new(&params, val, "val"));
            }
            Err(e) => log::warn!("[结果] 读取 {} 失败: {}", name, e),
        }
    }
    log::info!(
        "[结果] 从 {} 个文件解析出 {} 行",
        rows.len() / 2,
        rows.len()
    );
    Ok(rows)
}

/// 写出 CSV，没有结果时只写表头
pub fn write_csv(rows: &[ResultRow], path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// 某个 style 下 MI 的统计量，忽略 NaN
#[derive(Debug, Clone, Serialize)]
pub struct StyleSummary {
    pub style: String,
    pub count: usize,
    pub mean: f64,
    /// 样本标准差 (n - 1)
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

pub fn summarize(rows: &[ResultRow]) -> Vec<StyleSummary> {
    let mut styles: Vec<&str> = rows.iter().map(|r| r.style.as_str()).collect();
    styles.sort_unstable();
    styles.dedup();

    styles
        .into_iter()
        .map(|style| {
            let values: Vec<f64> = rows
                .iter()
                .filter(|r| r.style == style && !r.mi.is_nan())
                .map(|r| r.mi)
                .collect();
            let count = values.len();
            let mean = mean(&values);
            let std = if count > 1 {
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
                var.sqrt()
            } else {
                f64::NAN
            };
            let min = values.iter().copied().fold(f64::NAN, f64::min);
            let max = values.iter().copied().fold(f64::NAN, f64::max);
            StyleSummary {
                style: style.to_string(),
                count,
                mean,
                std,
                min,
                max,
            }
        })
        .collect()
}
