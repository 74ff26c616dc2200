//! 自带的分块容器格式（.mdpk）
//!
//! 文件布局（小端）:
//! - 0..8   魔数 `MDPACK\0\x01`
//! - 8..16  索引偏移 (u64)，写完索引后回填；为 0 表示文件未正常关闭
//! - 16..   各组的数据块，按写入顺序依次排列，可选 zlib 压缩
//! - 索引   u64 长度 + JSON 索引（组名、属性、形状、块偏移）

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression as DeflateLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Attributes, POSITIONS_DATASET, PackReader, PackWriter, StoreOptions, check_frame_len};
use crate::error::{PrepError, Result};

const MAGIC: &[u8; 8] = b"MDPACK\x00\x01";
const HEADER_LEN: u64 = 16;
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Compression {
    None,
    Deflate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkEntry {
    offset: u64,
    stored_len: u64,
    frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetIndex {
    name: String,
    /// [frames, atoms, 3]
    shape: [usize; 3],
    chunk_frames: usize,
    compression: Compression,
    chunks: Vec<ChunkEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupIndex {
    name: String,
    attrs: Attributes,
    dataset: Option<DatasetIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerIndex {
    version: u32,
    attrs: Attributes,
    groups: Vec<GroupIndex>,
}

/// 正在写入的组
struct GroupBuilder {
    name: String,
    attrs: Attributes,
    n_atoms: Option<usize>,
    buffer: Vec<f32>,
    buffered_frames: usize,
    frames: usize,
    chunks: Vec<ChunkEntry>,
}

pub struct NativeWriter {
    path: PathBuf,
    file: BufWriter<File>,
    pos: u64,
    options: StoreOptions,
    index: ContainerIndex,
    current: Option<GroupBuilder>,
}

impl NativeWriter {
    /// 创建（覆盖）容器文件
    pub fn create(path: &Path, options: StoreOptions) -> Result<Self> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(MAGIC)?;
        file.write_u64::<LittleEndian>(0)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            pos: HEADER_LEN,
            options: StoreOptions {
                chunk_frames: options.chunk_frames.max(1),
                ..options
            },
            index: ContainerIndex {
                version: INDEX_VERSION,
                attrs: Attributes::new(),
                groups: Vec::new(),
            },
            current: None,
        })
    }

    fn current_mut(&mut self) -> Result<&mut GroupBuilder> {
        self.current
            .as_mut()
            .ok_or_else(|| PrepError::Store("没有打开的组".into()))
    }

    /// 把缓冲区中的帧写成一个块
    fn flush_chunk(&mut self) -> Result<()> {
        let compress = self.options.compress;
        let Some(group) = self.current.as_mut() else {
            return Ok(());
        };
        if group.buffered_frames == 0 {
            return Ok(());
        }

        let mut raw = vec![0u8; group.buffer.len() * 4];
        LittleEndian::write_f32_into(&group.buffer, &mut raw);
        let stored = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), DeflateLevel::default());
            encoder.write_all(&raw)?;
            encoder.finish()?
        } else {
            raw
        };

        self.file.write_all(&stored)?;
        group.chunks.push(ChunkEntry {
            offset: self.pos,
            stored_len: stored.len() as u64,
            frames: group.buffered_frames,
        });
        self.pos += stored.len() as u64;
        group.buffer.clear();
        group.buffered_frames = 0;
        Ok(())
    }
}

impl PackWriter for NativeWriter {
    fn set_file_attr(&mut self, key: &str, value: Value) -> Result<()> {
        self.index.attrs.insert(key.to_string(), value);
        Ok(())
    }

    fn begin_group(&mut self, name: &str) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(PrepError::Store(format!(
                "组 '{}' 尚未关闭，无法打开 '{}'",
                open.name, name
            )));
        }
        if self.index.groups.iter().any(|g| g.name == name) {
            return Err(PrepError::Store(format!("组 '{}' 已存在", name)));
        }
        self.current = Some(GroupBuilder {
            name: name.to_string(),
            attrs: Attributes::new(),
            n_atoms: None,
            buffer: Vec::new(),
            buffered_frames: 0,
            frames: 0,
            chunks: Vec::new(),
        });
        Ok(())
    }

    fn set_group_attr(&mut self, key: &str, value: Value) -> Result<()> {
        self.current_mut()?.attrs.insert(key.to_string(), value);
        Ok(())
    }

    fn append_frame(&mut self, positions: &[f32]) -> Result<()> {
        let chunk_frames = self.options.chunk_frames;
        let n_atoms = check_frame_len(positions.len())?;
        let group = self.current_mut()?;
        match group.n_atoms {
            None => {
                group.n_atoms = Some(n_atoms);
                group.buffer.reserve(chunk_frames * n_atoms * 3);
            }
            Some(expected) if expected != n_atoms => {
                return Err(PrepError::Store(format!(
                    "组 '{}' 原子数不一致: 期望 {}，第 {} 帧为 {}",
                    group.name, expected, group.frames, n_atoms
                )));
            }
            Some(_) => {}
        }

        group.buffer.extend_from_slice(positions);
        group.buffered_frames += 1;
        group.frames += 1;
        if group.buffered_frames >= chunk_frames {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn end_group(&mut self) -> Result<usize> {
        self.flush_chunk()?;
        let group = self
            .current
            .take()
            .ok_or_else(|| PrepError::Store("没有打开的组".into()))?;

        let dataset = group.n_atoms.map(|n_atoms| DatasetIndex {
            name: POSITIONS_DATASET.to_string(),
            shape: [group.frames, n_atoms, 3],
            chunk_frames: self.options.chunk_frames,
            compression: if self.options.compress {
                Compression::Deflate
            } else {
                Compression::None
            },
            chunks: group.chunks,
        });
        self.index.groups.push(GroupIndex {
            name: group.name,
            attrs: group.attrs,
            dataset,
        });
        Ok(group.frames)
    }

    fn abort_group(&mut self) -> Result<()> {
        if let Some(group) = self.current.take() {
            log::debug!(
                "[容器] 放弃组 '{}'，已写入的 {} 个块不会被索引",
                group.name,
                group.chunks.len()
            );
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        if self.current.is_some() {
            self.end_group()?;
        }

        let NativeWriter {
            path,
            mut file,
            pos: index_offset,
            index,
            ..
        } = *self;
        let json = serde_json::to_vec(&index)?;
        file.write_u64::<LittleEndian>(json.len() as u64)?;
        file.write_all(&json)?;

        let mut file = file.into_inner().map_err(|e| PrepError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(MAGIC.len() as u64))?;
        file.write_u64::<LittleEndian>(index_offset)?;
        file.sync_all()?;

        log::debug!(
            "[容器] {} 写入完成，共 {} 个组",
            path.display(),
            index.groups.len()
        );
        Ok(())
    }
}

pub struct NativeReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    index: ContainerIndex,
}

impl NativeReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)
            .map_err(|_| PrepError::Store(format!("{} 太短，不是容器文件", path.display())))?;
        if &magic != MAGIC {
            return Err(PrepError::Store(format!(
                "{} 魔数不匹配，不是容器文件",
                path.display()
            )));
        }
        let index_offset = file.read_u64::<LittleEndian>()?;
        if index_offset < HEADER_LEN {
            return Err(PrepError::Store(format!(
                "{} 没有索引，文件可能未正常关闭",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let len = file.read_u64::<LittleEndian>()?;
        let mut json = vec![0u8; len as usize];
        file.read_exact(&mut json)
            .map_err(|e| PrepError::Store(format!("索引不完整: {}", e)))?;
        let index: ContainerIndex = serde_json::from_slice(&json)?;
        if index.version != INDEX_VERSION {
            return Err(PrepError::Store(format!(
                "不支持的索引版本 {}",
                index.version
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
        })
    }

    fn group(&self, name: &str) -> Result<&GroupIndex> {
        self.index
            .groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| {
                PrepError::Store(format!("{} 中不存在组 '{}'", self.path.display(), name))
            })
    }

    fn read_chunk(&self, dataset: &DatasetIndex, chunk: &ChunkEntry) -> Result<Vec<f32>> {
        let mut stored = vec![0u8; chunk.stored_len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(chunk.offset))?;
            file.read_exact(&mut stored)?;
        }

        let raw = match dataset.compression {
            Compression::None => stored,
            Compression::Deflate => {
                let mut raw = Vec::new();
                ZlibDecoder::new(stored.as_slice()).read_to_end(&mut raw)?;
                raw
            }
        };

        let expected = chunk.frames * dataset.shape[1] * 3;
        if raw.len() != expected * 4 {
            return Err(PrepError::Store(format!(
                "块 @{} 长度错误: 期望 {} 字节，实际 {} 字节",
                chunk.offset,
                expected * 4,
                raw.len()
            )));
        }
        let mut values = vec![0f32; expected];
        LittleEndian::read_f32_into(&raw, &mut values);
        Ok(values)
    }
}

impl PackReader for NativeReader {
    fn file_attrs(&self) -> Result<Attributes> {
        Ok(self.index.attrs.clone())
    }

    fn group_names(&self) -> Result<Vec<String>> {
        Ok(self.index.groups.iter().map(|g| g.name.clone()).collect())
    }

    fn group_attrs(&self, group: &str) -> Result<Attributes> {
        Ok(self.group(group)?.attrs.clone())
    }

    fn shape(&self, group: &str) -> Result<Option<[usize; 3]>> {
        Ok(self.group(group)?.dataset.as_ref().map(|d| d.shape))
    }

    fn read_frames(&self, group: &str, start: usize, end: usize) -> Result<Vec<f32>> {
        let group_index = self.group(group)?;
        let Some(dataset) = &group_index.dataset else {
            if start == end {
                return Ok(Vec::new());
            }
            return Err(PrepError::Store(format!("组 '{}' 没有数据", group)));
        };
        let [frames, n_atoms, _] = dataset.shape;
        if start > end || end > frames {
            return Err(PrepError::Store(format!(
                "帧范围 {}..{} 超出组 '{}' 的 {} 帧",
                start, end, group, frames
            )));
        }

        let frame_len = n_atoms * 3;
        let mut out = Vec::with_capacity((end - start) * frame_len);
        let mut chunk_start = 0usize;
        for chunk in &dataset.chunks {
            let chunk_end = chunk_start + chunk.frames;
            if chunk_end > start && chunk_start < end {
                let values = self.read_chunk(dataset, chunk)?;
                let from = start.max(chunk_start) - chunk_start;
                let to = end.min(chunk_end) - chunk_start;
                out.extend_from_slice(&values[from * frame_len..to * frame_len]);
            }
            if chunk_end >= end {
                break;
            }
            chunk_start = chunk_end;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: f32, atoms: usize) -> Vec<f32> {
        vec![value; atoms * 3]
    }

    fn write_container(path: &Path, options: StoreOptions) {
        let mut writer: Box<dyn PackWriter> = Box::new(NativeWriter::create(path, options).unwrap());
        writer.set_file_attr("format", json!("positions")).unwrap();

        writer.begin_group("42").unwrap();
        for i in 0..5 {
            writer.append_frame(&frame(i as f32, 2)).unwrap();
        }
        writer.set_group_attr("frames", json!(5)).unwrap();
        assert_eq!(writer.end_group().unwrap(), 5);

        writer.begin_group("7").unwrap();
        writer.append_frame(&frame(100.0, 3)).unwrap();
        writer.end_group().unwrap();

        writer.finish().unwrap();
    }

    #[test]
    fn groups_are_independent_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.mdpk");
        write_container(&path, StoreOptions { chunk_frames: 2, compress: true });

        let reader = NativeReader::open(&path).unwrap();
        assert_eq!(reader.group_names().unwrap(), vec!["42", "7"]);
        assert_eq!(reader.shape("42").unwrap(), Some([5, 2, 3]));
        assert_eq!(reader.shape("7").unwrap(), Some([1, 3, 3]));
        assert_eq!(reader.file_attrs().unwrap()["format"], json!("positions"));

        let all = reader.read_frames("42", 0, 5).unwrap();
        let firsts: Vec<f32> = all.chunks(6).map(|f| f[0]).collect();
        assert_eq!(firsts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

        // 跨块读取
        let middle = reader.read_frames("42", 1, 4).unwrap();
        assert_eq!(middle.len(), 3 * 6);
        assert_eq!(middle[0], 1.0);
        assert_eq!(middle[17], 3.0);
    }

    #[test]
    fn uncompressed_chunks_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.mdpk");
        write_container(&path, StoreOptions { chunk_frames: 128, compress: false });
        let reader = NativeReader::open(&path).unwrap();
        assert_eq!(reader.read_frames("7", 0, 1).unwrap(), frame(100.0, 3));
    }

    #[test]
    fn atom_count_change_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = NativeWriter::create(&dir.path().join("x.mdpk"), StoreOptions::default()).unwrap();
        writer.begin_group("1").unwrap();
        writer.append_frame(&frame(0.0, 4)).unwrap();
        assert!(writer.append_frame(&frame(0.0, 5)).is_err());
    }

    #[test]
    fn aborted_group_is_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abort.mdpk");
        let mut writer: Box<dyn PackWriter> =
            Box::new(NativeWriter::create(&path, StoreOptions { chunk_frames: 1, compress: true }).unwrap());
        writer.begin_group("bad").unwrap();
        writer.append_frame(&frame(1.0, 2)).unwrap();
        writer.abort_group().unwrap();
        writer.begin_group("good").unwrap();
        writer.append_frame(&frame(2.0, 2)).unwrap();
        writer.end_group().unwrap();
        writer.finish().unwrap();

        let reader = NativeReader::open(&path).unwrap();
        assert_eq!(reader.group_names().unwrap(), vec!["good"]);
        assert_eq!(reader.read_frames("good", 0, 1).unwrap(), frame(2.0, 2));
    }

    #[test]
    fn duplicate_group_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = NativeWriter::create(&dir.path().join("d.mdpk"), StoreOptions::default()).unwrap();
        writer.begin_group("1").unwrap();
        writer.end_group().unwrap();
        assert!(writer.begin_group("1").is_err());
    }

    #[test]
    fn empty_group_has_no_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mdpk");
        let mut writer: Box<dyn PackWriter> =
            Box::new(NativeWriter::create(&path, StoreOptions::default()).unwrap());
        writer.begin_group("empty").unwrap();
        writer.set_group_attr("frames", json!(0)).unwrap();
        assert_eq!(writer.end_group().unwrap(), 0);
        writer.finish().unwrap();

        let reader = NativeReader::open(&path).unwrap();
        assert_eq!(reader.shape("empty").unwrap(), None);
        assert!(reader.read_frames("empty", 0, 0).unwrap().is_empty());
        assert_eq!(reader.group_attrs("empty").unwrap()["frames"], json!(0));
    }

    #[test]
    fn unfinished_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.mdpk");
        {
            let mut writer = NativeWriter::create(&path, StoreOptions::default()).unwrap();
            writer.begin_group("1").unwrap();
            writer.append_frame(&frame(0.0, 1)).unwrap();
        }
        assert!(matches!(NativeReader::open(&path), Err(PrepError::Store(_))));
    }
}
