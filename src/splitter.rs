//! 按行数切分单个 dump 文件
//!
//! 每帧固定 9 + N 行（N 取自第一帧头部），丢弃开头的平衡帧后，
//! 每 `frames_per_chunk` 帧写出一个文件。文件末尾不完整的帧会被丢弃。

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{PrepError, Result};
use crate::utils::chunks::ChunkDescriptor;

/// dump 每帧的固定头部行数（TIMESTEP/NUMBER OF ATOMS/BOX BOUNDS/ATOMS 及其数值行）
pub const HEADER_LINES: usize = 9;

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub frames_per_chunk: usize,
    /// 开头丢弃的平衡帧数
    pub skip_frames: usize,
    pub out_dir: PathBuf,
    /// 输出文件名前缀，默认使用输入文件名
    pub stem: Option<String>,
}

/// 读取第一帧头部中的原子数
fn read_atom_count(path: &Path) -> Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let head: Vec<String> = reader.lines().take(4).collect::<std::io::Result<_>>()?;
    if head.len() < 4 || !head[0].starts_with("ITEM: TIMESTEP") || !head[2].starts_with("ITEM: NUMBER OF ATOMS") {
        return Err(PrepError::dump(path, "文件开头不是标准的 TIMESTEP / NUMBER OF ATOMS 头"));
    }
    head[3]
        .trim()
        .parse()
        .map_err(|_| PrepError::dump(path, format!("无法解析原子数 '{}'", head[3].trim())))
}

pub fn chunk_file_name(stem: &str, index: usize) -> String {
    format!("{}_{:04}.lammpstrj", stem, index)
}

/// 切分 dump，返回每个输出块覆盖的原始帧区间
pub fn split_dump(input: &Path, options: &SplitOptions) -> Result<Vec<ChunkDescriptor>> {
    if options.frames_per_chunk == 0 {
        return Err(PrepError::Config("frames_per_chunk 必须至少为 1".into()));
    }
    let n_atoms = read_atom_count(input)?;
    let lines_per_frame = HEADER_LINES + n_atoms;
    let stem = match &options.stem {
        Some(stem) => stem.clone(),
        None => input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("chunk")
            .to_string(),
    };
    fs::create_dir_all(&options.out_dir)?;

    let mut lines = BufReader::new(File::open(input)?).lines();
    let mut chunks: Vec<ChunkDescriptor> = Vec::new();
    let mut writer: Option<BufWriter<File>> = None;
    let mut frame_text = String::new();
    let mut frame = 0usize;

    loop {
        frame_text.clear();
        let mut read = 0usize;
        for line in lines.by_ref().take(lines_per_frame) {
            let line = line?;
            if read == 0 && !line.starts_with("ITEM: TIMESTEP") {
                return Err(PrepError::dump(
                    input,
                    format!("第 {} 帧没有从 TIMESTEP 开始，原子数可能在轨迹中变化", frame),
                ));
            }
            frame_text.push_str(&line);
            frame_text.push('\n');
            read += 1;
        }

        if read == 0 {
            break;
        }
        if read < lines_per_frame {
            log::warn!(
                "[切分] 第 {} 帧不完整（{}/{} 行），已丢弃",
                frame,
                read,
                lines_per_frame
            );
            break;
        }

        if frame >= options.skip_frames {
            let kept = frame - options.skip_frames;
            if kept % options.frames_per_chunk == 0 {
                if let Some(mut done) = writer.take() {
                    done.flush()?;
                }
                let index = chunks.len();
                let path = options.out_dir.join(chunk_file_name(&stem, index));
                writer = Some(BufWriter::new(File::create(&path)?));
                chunks.push(ChunkDescriptor {
                    index,
                    start: frame,
                    end: frame,
                });
            }
            if let (Some(out), Some(chunk)) = (writer.as_mut(), chunks.last_mut()) {
                out.write_all(frame_text.as_bytes())?;
                chunk.end = frame + 1;
            }
        }
        frame += 1;
    }

    if let Some(mut done) = writer.take() {
        done.flush()?;
    }
    if frame <= options.skip_frames {
        log::warn!(
            "[切分] {} 只有 {} 帧，不足以跳过 {} 帧",
            input.display(),
            frame,
            options.skip_frames
        );
    }
    log::info!(
        "[切分] {} 共 {} 帧，写出 {} 个块到 {}",
        input.display(),
        frame,
        chunks.len(),
        options.out_dir.display()
    );
    Ok(chunks)
}
