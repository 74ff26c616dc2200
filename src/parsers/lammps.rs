use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{PrepError, Result};
use crate::utils::frame::Frame;
use crate::utils::parser::{FrameStream, TrajectoryParser};

const HDR_TS: &str = "ITEM: TIMESTEP";
const HDR_N: &str = "ITEM: NUMBER OF ATOMS";
const HDR_BB: &str = "ITEM: BOX BOUNDS";
const HDR_AT: &str = "ITEM: ATOMS";

/// LAMMPS 文本 dump（lammpstrj）解析器
pub struct LammpsDumpParser;

impl LammpsDumpParser {
    pub fn new() -> Self {
        LammpsDumpParser
    }
}

impl Default for LammpsDumpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TrajectoryParser for LammpsDumpParser {
    fn supported_extensions(&self) -> Vec<&'static str> {
        vec!["lammpstrj", "dump"]
    }

    fn name(&self) -> &'static str {
        "LAMMPS dump 解析器"
    }

    fn open_frames(&self, path: &Path, skip_frames: usize) -> Result<FrameStream> {
        let file = File::open(path)?;
        Ok(Box::new(DumpFrames::new(
            BufReader::new(file),
            path,
            skip_frames,
        )))
    }

    fn peek_atom_count(&self, path: &Path) -> Result<usize> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        while let Some(line) = lines.next() {
            if line?.starts_with(HDR_N) {
                let value = lines
                    .next()
                    .transpose()?
                    .ok_or_else(|| PrepError::dump(path, "NUMBER OF ATOMS 之后文件结束"))?;
                return value.trim().parse().map_err(|_| {
                    PrepError::dump(path, format!("无法解析原子数 '{}'", value.trim()))
                });
            }
        }
        Err(PrepError::dump(path, "文件中没有 NUMBER OF ATOMS 头"))
    }
}

/// 原子列在 ATOMS 行中的位置（已扣除 "ITEM: ATOMS" 两个词）
#[derive(Debug, Clone, Copy)]
struct AtomColumns {
    id: usize,
    x: usize,
    y: usize,
    z: usize,
}

impl AtomColumns {
    fn from_header(line: &str) -> Option<Self> {
        let cols: Vec<&str> = line.split_whitespace().skip(2).collect();
        let find = |names: &[&str]| names.iter().find_map(|n| cols.iter().position(|c| c == n));
        Some(AtomColumns {
            id: find(&["id"])?,
            x: find(&["x", "xu"])?,
            y: find(&["y", "yu"])?,
            z: find(&["z", "zu"])?,
        })
    }

    fn max_index(&self) -> usize {
        self.id.max(self.x).max(self.y).max(self.z)
    }
}

/// 逐帧读取 dump 的迭代器
///
/// 帧计数在每个 TIMESTEP 头处递增；前 `skip_frames` 帧只消费行、不产出，
/// 产出帧的 `index` 从 0 重新开始。每帧原子按 id 稳定排序。
pub struct DumpFrames<R> {
    reader: R,
    path: PathBuf,
    skip_frames: usize,
    frames_seen: usize,
    timestep: u64,
    n_atoms: Option<usize>,
    box_bounds: [[f64; 2]; 3],
    line: String,
    finished: bool,
}

impl<R: BufRead> DumpFrames<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>, skip_frames: usize) -> Self {
        Self {
            reader,
            path: path.into(),
            skip_frames,
            frames_seen: 0,
            timestep: 0,
            n_atoms: None,
            box_bounds: [[0.0; 2]; 3],
            line: String::new(),
            finished: false,
        }
    }

    fn error(&self, message: impl Into<String>) -> PrepError {
        PrepError::dump(&self.path, message)
    }

    /// 读取下一行到内部缓冲区，文件结束时返回 false
    fn advance(&mut self) -> Result<bool> {
        self.line.clear();
        Ok(self.reader.read_line(&mut self.line)? > 0)
    }

    fn expect_line(&mut self, what: &str) -> Result<()> {
        if self.advance()? {
            Ok(())
        } else {
            Err(self.error(format!("读取{}时文件意外结束", what)))
        }
    }

    fn parse_box_line(&self) -> Result<[f64; 2]> {
        let mut values = self.line.split_whitespace().map(str::parse::<f64>);
        match (values.next(), values.next()) {
            (Some(Ok(lo)), Some(Ok(hi))) => Ok([lo, hi]),
            _ => Err(self.error(format!("无效的盒子边界行 '{}'", self.line.trim()))),
        }
    }

    fn read_atoms(&mut self, columns: AtomColumns, n_atoms: usize, keep: bool) -> Result<Vec<[f32; 3]>> {
        let frame = self.frames_seen - 1;
        let mut atoms: Vec<(i64, [f32; 3])> = Vec::with_capacity(if keep { n_atoms } else { 0 });

        for _ in 0..n_atoms {
            if !self.advance()? || self.line.trim().is_empty() {
                return Err(self.error(format!("读取第 {} 帧原子时文件意外结束", frame)));
            }
            if !keep {
                continue;
            }

            let parts: Vec<&str> = self.line.split_whitespace().collect();
            if parts.len() <= columns.max_index() {
                return Err(self.error(format!(
                    "第 {} 帧原子行列数不足: '{}'",
                    frame,
                    self.line.trim()
                )));
            }
            let id: i64 = parts[columns.id]
                .parse()
                .map_err(|_| self.error(format!("无法解析原子 id '{}'", parts[columns.id])))?;
            let coord = |idx: usize| {
                parts[idx]
                    .parse::<f32>()
                    .map_err(|_| self.error(format!("无法解析坐标 '{}'", parts[idx])))
            };
            atoms.push((id, [coord(columns.x)?, coord(columns.y)?, coord(columns.z)?]));
        }

        atoms.sort_by_key(|(id, _)| *id);
        Ok(atoms.into_iter().map(|(_, pos)| pos).collect())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if !self.advance()? {
                return Ok(None);
            }
            if !self.line.starts_with("ITEM:") {
                continue;
            }

            if self.line.starts_with(HDR_TS) {
                self.expect_line("时间步")?;
                self.timestep = self.line.trim().parse().map_err(|_| {
                    self.error(format!("无法解析时间步 '{}'", self.line.trim()))
                })?;
                self.frames_seen += 1;
            } else if self.line.starts_with(HDR_N) {
                self.expect_line("原子数")?;
                let n = self.line.trim().parse().map_err(|_| {
                    self.error(format!("无法解析原子数 '{}'", self.line.trim()))
                })?;
                self.n_atoms = Some(n);
            } else if self.line.starts_with(HDR_BB) {
                for axis in 0..3 {
                    self.expect_line("盒子边界")?;
                    self.box_bounds[axis] = self.parse_box_line()?;
                }
            } else if self.line.starts_with(HDR_AT) {
                let columns = AtomColumns::from_header(&self.line).ok_or_else(|| {
                    self.error(format!("ATOMS 头缺少 id/x/y/z 列: {}", self.line.trim()))
                })?;
                let n_atoms = self
                    .n_atoms
                    .ok_or_else(|| self.error("ATOMS 块之前缺少 NUMBER OF ATOMS 头"))?;
                if self.frames_seen == 0 {
                    return Err(self.error("ATOMS 块之前缺少 TIMESTEP 头"));
                }

                let frame = self.frames_seen - 1;
                let keep = frame >= self.skip_frames;
                let positions = self.read_atoms(columns, n_atoms, keep)?;
                if keep {
                    return Ok(Some(Frame {
                        index: frame - self.skip_frames,
                        timestep: self.timestep,
                        box_bounds: self.box_bounds,
                        positions,
                    }));
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for DumpFrames<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame_text(timestep: u64, atoms: &[(i64, f32)]) -> String {
        let mut text = format!(
            "ITEM: TIMESTEP\n{}\nITEM: NUMBER OF ATOMS\n{}\nITEM: BOX BOUNDS pp pp pp\n0.0 10.0\n0.0 10.0\n-5.0 5.0\nITEM: ATOMS id type x y z\n",
            timestep,
            atoms.len()
        );
        for (id, x) in atoms {
            text.push_str(&format!("{} 1 {} {} {}\n", id, x, x + 1.0, x + 2.0));
        }
        text
    }

    fn parse(text: &str, skip: usize) -> Vec<Result<Frame>> {
        DumpFrames::new(Cursor::new(text.to_string()), "test.lammpstrj", skip).collect()
    }

    #[test]
    fn atoms_are_reordered_by_id() {
        let text = frame_text(0, &[(3, 30.0), (1, 10.0), (2, 20.0)]);
        let frames = parse(&text, 0);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.positions[0], [10.0, 11.0, 12.0]);
        assert_eq!(frame.positions[2], [30.0, 31.0, 32.0]);
        assert_eq!(frame.box_bounds[2], [-5.0, 5.0]);
    }

    #[test]
    fn skipped_frames_are_not_yielded_and_indices_rebase() {
        let text: String = (0..5).map(|t| frame_text(t * 100, &[(1, t as f32)])).collect();
        let frames: Vec<Frame> = parse(&text, 2).into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].index, 0);
        assert_eq!(frames[0].timestep, 200);
        assert_eq!(frames[2].positions[0][0], 4.0);
    }

    #[test]
    fn skip_larger_than_total_yields_nothing() {
        let text: String = (0..3).map(|t| frame_text(t, &[(1, 0.0)])).collect();
        assert!(parse(&text, 10).is_empty());
    }

    #[test]
    fn truncated_atoms_block_is_an_error() {
        let mut text = frame_text(0, &[(1, 0.0), (2, 1.0)]);
        text.truncate(text.rfind("2 1").unwrap());
        let frames = parse(&text, 0);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(PrepError::Dump { .. })));
    }

    #[test]
    fn missing_coordinate_columns_is_an_error() {
        let text = "ITEM: TIMESTEP\n0\nITEM: NUMBER OF ATOMS\n1\nITEM: ATOMS id type vx vy vz\n1 1 0 0 0\n";
        let frames = parse(text, 0);
        assert!(frames[0].is_err());
    }

    #[test]
    fn atoms_before_count_header_is_an_error() {
        let text = "ITEM: TIMESTEP\n0\nITEM: ATOMS id x y z\n1 0 0 0\n";
        assert!(parse(text, 0)[0].is_err());
    }

    #[test]
    fn unwrapped_columns_are_accepted() {
        let text = "ITEM: TIMESTEP\n7\nITEM: NUMBER OF ATOMS\n1\nITEM: ATOMS id xu yu zu\n1 1.5 2.5 3.5\n";
        let frames = parse(text, 0);
        assert_eq!(frames[0].as_ref().unwrap().positions[0], [1.5, 2.5, 3.5]);
    }
}
