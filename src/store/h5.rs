//! HDF5 后端（`hdf5` 特性，默认启用）
//!
//! 布局与自带容器一致：每个种子一个组，组内 `positions` 数据集
//! (frames, atoms, 3) f32，块大小 (chunk, atoms, 3)，沿帧轴可增长。

use std::path::Path;

use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File as H5File, Group, Location};
use ndarray::{ArrayView3, Ix3, s};
use serde_json::Value;

use super::{Attributes, POSITIONS_DATASET, PackReader, PackWriter, StoreOptions, check_frame_len};
use crate::error::{PrepError, Result};

const DEFLATE_LEVEL: u8 = 4;

fn write_attr(loc: &Location, key: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(text) => {
            let text: VarLenUnicode = text
                .parse()
                .map_err(|e| PrepError::Store(format!("属性 '{}' 不是有效字符串: {:?}", key, e)))?;
            loc.new_attr::<VarLenUnicode>()
                .shape(())
                .create(key)?
                .write_scalar(&text)?;
        }
        Value::Number(n) if n.is_u64() => {
            let v = n.as_u64().unwrap_or_default();
            loc.new_attr::<u64>().shape(()).create(key)?.write_scalar(&v)?;
        }
        Value::Number(n) => {
            let v = n.as_f64().unwrap_or(f64::NAN);
            loc.new_attr::<f64>().shape(()).create(key)?.write_scalar(&v)?;
        }
        Value::Array(items) => {
            let values: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            loc.new_attr::<f64>()
                .shape(values.len())
                .create(key)?
                .write_raw(&values)?;
        }
        other => {
            log::warn!("[HDF5] 跳过无法表示的属性 {}={}", key, other);
        }
    }
    Ok(())
}

fn read_attrs(loc: &Location) -> Result<Attributes> {
    let mut attrs = Attributes::new();
    for name in loc.attr_names()? {
        let attr = loc.attr(&name)?;
        let value = match attr.dtype()?.to_descriptor()? {
            TypeDescriptor::Unsigned(_) if attr.is_scalar() => Value::from(attr.read_scalar::<u64>()?),
            TypeDescriptor::Integer(_) if attr.is_scalar() => Value::from(attr.read_scalar::<i64>()?),
            TypeDescriptor::Float(_) if attr.is_scalar() => Value::from(attr.read_scalar::<f64>()?),
            TypeDescriptor::Float(_) => Value::from(attr.read_raw::<f64>()?),
            TypeDescriptor::VarLenUnicode => {
                Value::from(attr.read_scalar::<VarLenUnicode>()?.as_str())
            }
            _ => continue,
        };
        attrs.insert(name, value);
    }
    Ok(attrs)
}

struct OpenGroup {
    name: String,
    group: Group,
    dataset: Option<Dataset>,
    n_atoms: usize,
    frames: usize,
}

pub struct Hdf5Writer {
    file: H5File,
    options: StoreOptions,
    current: Option<OpenGroup>,
}

impl Hdf5Writer {
    pub fn create(path: &Path, options: StoreOptions) -> Result<Self> {
        Ok(Self {
            file: H5File::create(path)?,
            options: StoreOptions {
                chunk_frames: options.chunk_frames.max(1),
                ..options
            },
            current: None,
        })
    }

    fn current_mut(&mut self) -> Result<&mut OpenGroup> {
        self.current
            .as_mut()
            .ok_or_else(|| PrepError::Store("没有打开的组".into()))
    }
}

impl PackWriter for Hdf5Writer {
    fn set_file_attr(&mut self, key: &str, value: Value) -> Result<()> {
        write_attr(&self.file, key, &value)
    }

    fn begin_group(&mut self, name: &str) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(PrepError::Store(format!(
                "组 '{}' 尚未关闭，无法打开 '{}'",
                open.name, name
            )));
        }
        let group = self.file.create_group(name)?;
        self.current = Some(OpenGroup {
            name: name.to_string(),
            group,
            dataset: None,
            n_atoms: 0,
            frames: 0,
        });
        Ok(())
    }

    fn set_group_attr(&mut self, key: &str, value: Value) -> Result<()> {
        let open = self.current_mut()?;
        write_attr(&open.group, key, &value)
    }

    fn append_frame(&mut self, positions: &[f32]) -> Result<()> {
        let options = self.options;
        let n_atoms = check_frame_len(positions.len())?;
        let open = self.current_mut()?;

        if open.dataset.is_none() {
            let mut builder = open
                .group
                .new_dataset::<f32>()
                .chunk((options.chunk_frames, n_atoms, 3));
            if options.compress {
                builder = builder.deflate(DEFLATE_LEVEL);
            }
            open.dataset = Some(builder.shape((0.., n_atoms, 3)).create(POSITIONS_DATASET)?);
            open.n_atoms = n_atoms;
        } else if open.n_atoms != n_atoms {
            return Err(PrepError::Store(format!(
                "组 '{}' 原子数不一致: 期望 {}，第 {} 帧为 {}",
                open.name, open.n_atoms, open.frames, n_atoms
            )));
        }

        let Some(dataset) = &open.dataset else {
            return Err(PrepError::Store("数据集创建失败".into()));
        };
        let row = open.frames;
        dataset.resize((row + 1, n_atoms, 3))?;
        let view = ArrayView3::from_shape((1, n_atoms, 3), positions)
            .map_err(|e| PrepError::Store(format!("帧形状错误: {}", e)))?;
        dataset.write_slice(view, s![row..row + 1, .., ..])?;
        open.frames += 1;
        Ok(())
    }

    fn end_group(&mut self) -> Result<usize> {
        let open = self
            .current
            .take()
            .ok_or_else(|| PrepError::Store("没有打开的组".into()))?;
        Ok(open.frames)
    }

    fn abort_group(&mut self) -> Result<()> {
        if let Some(open) = self.current.take() {
            drop(open.group);
            self.file.unlink(&open.name)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.current = None;
        self.file.flush()?;
        Ok(())
    }
}

pub struct Hdf5Reader {
    file: H5File,
}

impl Hdf5Reader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: H5File::open(path)?,
        })
    }
}

impl PackReader for Hdf5Reader {
    fn file_attrs(&self) -> Result<Attributes> {
        read_attrs(&self.file)
    }

    fn group_names(&self) -> Result<Vec<String>> {
        Ok(self
            .file
            .member_names()?
            .into_iter()
            .filter(|name| self.file.group(name).is_ok())
            .collect())
    }

    fn group_attrs(&self, group: &str) -> Result<Attributes> {
        read_attrs(&self.file.group(group)?)
    }

    fn shape(&self, group: &str) -> Result<Option<[usize; 3]>> {
        let group = self.file.group(group)?;
        if !group.link_exists(POSITIONS_DATASET) {
            return Ok(None);
        }
        match group.dataset(POSITIONS_DATASET)?.shape().as_slice() {
            [frames, atoms, 3] => Ok(Some([*frames, *atoms, 3])),
            other => Err(PrepError::Store(format!("positions 形状错误: {:?}", other))),
        }
    }

    fn read_frames(&self, group: &str, start: usize, end: usize) -> Result<Vec<f32>> {
        if start == end {
            return Ok(Vec::new());
        }
        let dataset = self.file.group(group)?.dataset(POSITIONS_DATASET)?;
        let block = dataset.read_slice::<f32, _, Ix3>(s![start..end, .., ..])?;
        Ok(block.iter().copied().collect())
    }
}
