//! 按种子分组的可增长帧数组存储
//!
//! 每个种子一个组，组内一个 `positions` 数据集，形状 (frames, atoms, 3)，f32，
//! 沿帧轴按块追加。`.h5` / `.hdf5` 扩展名写出 HDF5 文件（默认启用的 `hdf5` 特性），
//! 其他扩展名写出自带的分块容器格式（.mdpk）。

mod native;

#[cfg(feature = "hdf5")]
mod h5;

use std::path::Path;

use serde_json::Value;

use crate::error::{PrepError, Result};

pub use native::{NativeReader, NativeWriter};

/// 文件级和组级属性
pub type Attributes = serde_json::Map<String, Value>;

pub const POSITIONS_DATASET: &str = "positions";

/// 默认输出文件名；关闭 `hdf5` 特性时退回自带容器
#[cfg(feature = "hdf5")]
pub const DEFAULT_OUTPUT: &str = "positions.h5";
#[cfg(not(feature = "hdf5"))]
pub const DEFAULT_OUTPUT: &str = "positions.mdpk";

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// 每个块包含的帧数
    pub chunk_frames: usize,
    pub compress: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            chunk_frames: 128,
            compress: true,
        }
    }
}

/// 写入端：一次只有一个组处于打开状态，组之间互不影响
pub trait PackWriter {
    fn set_file_attr(&mut self, key: &str, value: Value) -> Result<()>;

    /// 打开新组，组名重复时报错
    fn begin_group(&mut self, name: &str) -> Result<()>;

    fn set_group_attr(&mut self, key: &str, value: Value) -> Result<()>;

    /// 追加一帧 (atoms * 3) 坐标；第一帧决定该组的原子数
    fn append_frame(&mut self, positions: &[f32]) -> Result<()>;

    /// 关闭当前组，返回写入的帧数
    fn end_group(&mut self) -> Result<usize>;

    /// 放弃当前组，已写入的数据不会出现在索引中
    fn abort_group(&mut self) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<()>;
}

/// 读取端
pub trait PackReader {
    fn file_attrs(&self) -> Result<Attributes>;

    fn group_names(&self) -> Result<Vec<String>>;

    fn group_attrs(&self, group: &str) -> Result<Attributes>;

    /// 组内数据集形状；零帧的组没有数据集，返回 None
    fn shape(&self, group: &str) -> Result<Option<[usize; 3]>>;

    /// 读取 [start, end) 帧，按 C 顺序展开
    fn read_frames(&self, group: &str, start: usize, end: usize) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Native,
    Hdf5,
}

impl StoreFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("h5") || ext.eq_ignore_ascii_case("hdf5") => {
                StoreFormat::Hdf5
            }
            _ => StoreFormat::Native,
        }
    }
}

/// 根据扩展名创建写入端
pub fn create_writer(path: &Path, options: StoreOptions) -> Result<Box<dyn PackWriter>> {
    match StoreFormat::from_path(path) {
        StoreFormat::Native => Ok(Box::new(NativeWriter::create(path, options)?)),
        StoreFormat::Hdf5 => create_hdf5_writer(path, options),
    }
}

/// 根据扩展名打开读取端
pub fn open_reader(path: &Path) -> Result<Box<dyn PackReader>> {
    match StoreFormat::from_path(path) {
        StoreFormat::Native => Ok(Box::new(NativeReader::open(path)?)),
        StoreFormat::Hdf5 => open_hdf5_reader(path),
    }
}

#[cfg(feature = "hdf5")]
fn create_hdf5_writer(path: &Path, options: StoreOptions) -> Result<Box<dyn PackWriter>> {
    Ok(Box::new(h5::Hdf5Writer::create(path, options)?))
}

#[cfg(feature = "hdf5")]
fn open_hdf5_reader(path: &Path) -> Result<Box<dyn PackReader>> {
    Ok(Box::new(h5::Hdf5Reader::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
fn create_hdf5_writer(path: &Path, _options: StoreOptions) -> Result<Box<dyn PackWriter>> {
    Err(hdf5_disabled(path))
}

#[cfg(not(feature = "hdf5"))]
fn open_hdf5_reader(path: &Path) -> Result<Box<dyn PackReader>> {
    Err(hdf5_disabled(path))
}

#[cfg(not(feature = "hdf5"))]
fn hdf5_disabled(path: &Path) -> PrepError {
    PrepError::Config(format!(
        "{} 需要 HDF5 支持，请启用 `hdf5` 特性重新编译，或改用 .mdpk 输出",
        path.display()
    ))
}

/// 从属性中读取无符号整数
pub fn attr_usize(attrs: &Attributes, key: &str) -> Option<usize> {
    attrs.get(key)?.as_u64().map(|v| v as usize)
}

/// 从属性中读取 6 元素盒子边界 [xlo, xhi, ylo, yhi, zlo, zhi]
pub fn attr_box_bounds(attrs: &Attributes) -> Option<[[f64; 2]; 3]> {
    let values: Vec<f64> = attrs
        .get("box_bounds")?
        .as_array()?
        .iter()
        .filter_map(Value::as_f64)
        .collect();
    match values.as_slice() {
        [xlo, xhi, ylo, yhi, zlo, zhi] => Some([[*xlo, *xhi], [*ylo, *yhi], [*zlo, *zhi]]),
        _ => None,
    }
}

pub(crate) fn check_frame_len(len: usize) -> Result<usize> {
    if len == 0 || len % 3 != 0 {
        return Err(PrepError::Store(format!(
            "帧数据长度 {} 不是 3 的正整数倍",
            len
        )));
    }
    Ok(len / 3)
}
