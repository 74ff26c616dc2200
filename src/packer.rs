//! 流式帧打包
//!
//! 每个种子的 dump 逐帧读取、跳过前 K 帧后按到达顺序追加到同一容器文件中
//! 以种子命名的组里。单个种子失败只放弃该种子的组，不影响其他种子。

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::config::Phase;
use crate::error::{PrepError, Result};
use crate::store::{self, PackWriter, StoreOptions};
use crate::utils::parser_registry::ParserRegistry;

#[derive(Debug, Clone)]
pub struct PackOptions {
    /// 开头丢弃的平衡帧数 K
    pub skip_frames: usize,
    pub store: StoreOptions,
    pub phase: Option<Phase>,
    pub temperature: Option<f64>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            skip_frames: 200,
            store: StoreOptions::default(),
            phase: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeedOutcome {
    Packed { frames: usize, source: PathBuf },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    pub seed: String,
    pub outcome: SeedOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackReport {
    pub output: PathBuf,
    pub seeds: Vec<SeedReport>,
}

impl PackReport {
    pub fn packed_count(&self) -> usize {
        self.seeds
            .iter()
            .filter(|s| matches!(s.outcome, SeedOutcome::Packed { .. }))
            .count()
    }

    pub fn failed(&self) -> Vec<&SeedReport> {
        self.seeds
            .iter()
            .filter(|s| matches!(s.outcome, SeedOutcome::Failed { .. }))
            .collect()
    }

    pub fn total_frames(&self) -> usize {
        self.seeds
            .iter()
            .map(|s| match s.outcome {
                SeedOutcome::Packed { frames, .. } => frames,
                SeedOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn frames_for(&self, seed: &str) -> Option<usize> {
        self.seeds.iter().find(|s| s.seed == seed).and_then(|s| match s.outcome {
            SeedOutcome::Packed { frames, .. } => Some(frames),
            SeedOutcome::Failed { .. } => None,
        })
    }
}

/// 读取种子列表：每行一个种子，去掉首尾空白，忽略空行
pub fn read_seed_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| PrepError::Seed(format!("无法读取种子列表 {}: {}", path.display(), e)))?;
    let seeds: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if seeds.is_empty() {
        return Err(PrepError::Seed(format!("种子列表 {} 为空", path.display())));
    }
    Ok(seeds)
}

/// 查找种子的 dump 文件：<dataset>/<seed>/dump/dump*.lammpstrj，取排序后的第一个
pub fn find_seed_dump(dataset_dir: &Path, seed: &str) -> Result<PathBuf> {
    let dump_dir = dataset_dir.join(seed).join("dump");
    let pattern = dump_dir.join("dump*.lammpstrj");
    let pattern = pattern.to_string_lossy();
    let mut matches: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| PrepError::Seed(format!("无效的路径模式 {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect();
    matches.sort();
    matches
        .into_iter()
        .next()
        .ok_or_else(|| PrepError::Seed(format!("种子 {} 没有找到 dump 文件 ({})", seed, pattern)))
}

fn group_metadata(writer: &mut dyn PackWriter, options: &PackOptions) -> Result<()> {
    if let Some(temperature) = options.temperature {
        writer.set_group_attr("temperature_K", json!(temperature))?;
    }
    if let Some(phase) = options.phase {
        writer.set_group_attr("phase", json!(phase.as_str()))?;
    }
    Ok(())
}

fn stream_seed(
    writer: &mut dyn PackWriter,
    registry: &ParserRegistry,
    dump_path: &Path,
    options: &PackOptions,
) -> Result<usize> {
    let parser = registry.find_parser_for_file(dump_path).ok_or_else(|| {
        PrepError::dump(
            dump_path,
            format!(
                "不支持的文件格式，支持的扩展名: {:?}",
                registry.supported_extensions()
            ),
        )
    })?;

    // 原子数取自第一帧头部，跳过全部帧的组也保留该属性
    let n_atoms = parser.peek_atom_count(dump_path)?;
    writer.set_group_attr("n_atoms", json!(n_atoms))?;
    group_metadata(writer, options)?;

    let mut frames_written = 0usize;
    for frame in parser.open_frames(dump_path, options.skip_frames)? {
        let frame = frame?;
        if frame.atom_count() != n_atoms {
            return Err(PrepError::dump(
                dump_path,
                format!(
                    "第 {} 帧原子数 {} 与文件头 {} 不一致",
                    frame.index,
                    frame.atom_count(),
                    n_atoms
                ),
            ));
        }
        if frames_written == 0 {
            writer.set_group_attr("box_bounds", json!(frame.flat_box_bounds()))?;
        }
        writer.append_frame(frame.flat_positions())?;
        frames_written += 1;
    }
    writer.set_group_attr("frames", json!(frames_written))?;
    Ok(frames_written)
}

/// 把一个种子的 dump 打包成一个组；出错时放弃该组
pub fn pack_seed(
    writer: &mut dyn PackWriter,
    registry: &ParserRegistry,
    seed: &str,
    dump_path: &Path,
    options: &PackOptions,
) -> Result<usize> {
    writer.begin_group(seed)?;
    match stream_seed(writer, registry, dump_path, options) {
        Ok(_) => writer.end_group(),
        Err(e) => {
            writer.abort_group()?;
            Err(e)
        }
    }
}

/// 打包整个数据集：每个种子一个组，写入同一个输出文件
pub fn pack_dataset(
    registry: &ParserRegistry,
    dataset_dir: &Path,
    seeds: &[String],
    output: &Path,
    options: &PackOptions,
) -> Result<PackReport> {
    if !dataset_dir.is_dir() {
        return Err(PrepError::Seed(format!(
            "数据集目录不存在: {}",
            dataset_dir.display()
        )));
    }

    let mut writer = store::create_writer(output, options.store)?;
    writer.set_file_attr("format", json!("positions"))?;
    writer.set_file_attr("skip_frames", json!(options.skip_frames))?;
    if let Some(phase) = options.phase {
        writer.set_file_attr("phase", json!(phase.as_str()))?;
    }
    if let Some(temperature) = options.temperature {
        writer.set_file_attr("temperature_K", json!(temperature))?;
    }

    let mut reports = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let seed = seed.trim();
        if seed.is_empty() {
            continue;
        }

        let outcome = match find_seed_dump(dataset_dir, seed) {
            Ok(dump_path) => match pack_seed(writer.as_mut(), registry, seed, &dump_path, options) {
                Ok(frames) => {
                    if frames == 0 {
                        log::warn!("[打包] 种子 {} 跳过 {} 帧后没有剩余帧", seed, options.skip_frames);
                    } else {
                        log::info!("[打包] 种子 {} 写入 {} 帧", seed, frames);
                    }
                    SeedOutcome::Packed {
                        frames,
                        source: dump_path,
                    }
                }
                Err(e) => {
                    log::error!("[打包] 种子 {} 打包失败: {}", seed, e);
                    SeedOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            },
            Err(e) => {
                log::warn!("[打包] {}", e);
                SeedOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        reports.push(SeedReport {
            seed: seed.to_string(),
            outcome,
        });
    }

    writer.finish()?;
    Ok(PackReport {
        output: output.to_path_buf(),
        seeds: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NativeReader, PackReader};

    fn write_dump(dataset: &Path, seed: &str, frames: usize, atoms: usize) {
        let dir = dataset.join(seed).join("dump");
        fs::create_dir_all(&dir).unwrap();
        let mut text = String::new();
        for f in 0..frames {
            text.push_str(&format!(
                "ITEM: TIMESTEP\n{}\nITEM: NUMBER OF ATOMS\n{}\nITEM: BOX BOUNDS pp pp pp\n0 8\n0 8\n0 8\nITEM: ATOMS id type x y z\n",
                f * 10,
                atoms
            ));
            for a in (1..=atoms).rev() {
                text.push_str(&format!("{} 1 {} {} {}\n", a, f, a, 0.5));
            }
        }
        fs::write(dir.join(format!("dump.{}.lammpstrj", seed)), text).unwrap();
    }

    #[test]
    fn seed_list_ignores_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "  11 \n\n22\n   \n33").unwrap();
        assert_eq!(read_seed_list(&path).unwrap(), vec!["11", "22", "33"]);
    }

    #[test]
    fn empty_seed_list_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "\n \n").unwrap();
        assert!(matches!(read_seed_list(&path), Err(PrepError::Seed(_))));
    }

    #[test]
    fn packs_total_minus_skip_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(dir.path(), "1", 6, 4);
        let output = dir.path().join("positions.mdpk");
        let options = PackOptions {
            skip_frames: 2,
            store: StoreOptions { chunk_frames: 3, compress: true },
            phase: Some(Phase::Liquid),
            temperature: Some(365.0),
        };

        let report = pack_dataset(
            &ParserRegistry::new(),
            dir.path(),
            &["1".to_string()],
            &output,
            &options,
        )
        .unwrap();
        assert_eq!(report.frames_for("1"), Some(4));

        let reader = NativeReader::open(&output).unwrap();
        assert_eq!(reader.shape("1").unwrap(), Some([4, 4, 3]));
        let data = reader.read_frames("1", 0, 4).unwrap();
        // 每帧第一个原子的 x 等于原始帧号
        let xs: Vec<f32> = data.chunks(12).map(|f| f[0]).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0, 5.0]);
        // 原子按 id 排序，y 等于 id
        assert_eq!(data[1], 1.0);
        assert_eq!(data[4], 2.0);

        let attrs = reader.group_attrs("1").unwrap();
        assert_eq!(attrs["n_atoms"], json!(4));
        assert_eq!(attrs["frames"], json!(4));
        assert_eq!(attrs["phase"], json!("liquid"));
        assert_eq!(reader.file_attrs().unwrap()["temperature_K"], json!(365.0));
    }

    #[test]
    fn skip_beyond_total_writes_empty_group() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(dir.path(), "5", 3, 2);
        let output = dir.path().join("p.mdpk");
        let options = PackOptions {
            skip_frames: 10,
            ..PackOptions::default()
        };
        let report =
            pack_dataset(&ParserRegistry::new(), dir.path(), &["5".to_string()], &output, &options)
                .unwrap();
        assert_eq!(report.frames_for("5"), Some(0));

        let reader = NativeReader::open(&output).unwrap();
        assert_eq!(reader.shape("5").unwrap(), None);
        let attrs = reader.group_attrs("5").unwrap();
        assert_eq!(attrs["frames"], json!(0));
        assert_eq!(attrs["n_atoms"], json!(2));
    }

    #[test]
    fn failing_seed_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(dir.path(), "1", 4, 2);
        write_dump(dir.path(), "3", 4, 2);
        // 种子 2 的 dump 被截断
        let bad_dir = dir.path().join("2").join("dump");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(
            bad_dir.join("dump.2.lammpstrj"),
            "ITEM: TIMESTEP\n0\nITEM: NUMBER OF ATOMS\n5\nITEM: BOX BOUNDS pp pp pp\n0 1\n0 1\n0 1\nITEM: ATOMS id x y z\n1 0 0 0\n",
        )
        .unwrap();

        let output = dir.path().join("p.mdpk");
        let seeds: Vec<String> = ["1", "2", "3", "4"].iter().map(|s| s.to_string()).collect();
        let options = PackOptions {
            skip_frames: 1,
            ..PackOptions::default()
        };
        let report = pack_dataset(&ParserRegistry::new(), dir.path(), &seeds, &output, &options).unwrap();

        assert_eq!(report.packed_count(), 2);
        assert_eq!(report.failed().len(), 2);
        assert_eq!(report.total_frames(), 6);

        let reader = NativeReader::open(&output).unwrap();
        assert_eq!(reader.group_names().unwrap(), vec!["1", "3"]);
        assert_eq!(reader.shape("3").unwrap(), Some([3, 2, 3]));
    }

    #[test]
    fn missing_dataset_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = pack_dataset(
            &ParserRegistry::new(),
            &dir.path().join("missing"),
            &["1".to_string()],
            &dir.path().join("p.mdpk"),
            &PackOptions::default(),
        );
        assert!(result.is_err());
    }
}
