//! 原子坐标体素化
//!
//! 每帧把原子坐标按周期边界折回盒子，取每个方向前 `box_fraction` 的区域，
//! 落在区域内的原子计入对应体素，再除以平均占据数（区域内原子数 / 体素数），
//! 理想均匀密度下每个体素为 1。输出 `.npy`，形状 (frames, nz, ny, nx)，x 变化最快。
//! 帧按窗口从容器读取，整个组的张量在内存中组装后一次写出。

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array4, Axis};
use ndarray_npy::write_npy;
use serde::Serialize;

use crate::error::{PrepError, Result};
use crate::store::{self, PackReader};
use crate::utils::chunks::plan_chunks;
use crate::utils::voxel_grid::VoxelGrid;

/// 一次从容器中读取的帧数
pub const READ_CHUNK_FRAMES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelParams {
    /// 每个方向的分箱数 [bx, by, bz]
    pub bins: [usize; 3],
    /// 参与分箱的盒子边长比例，取值 (0, 1]
    pub box_fraction: f64,
}

impl VoxelParams {
    pub fn new(bins: [usize; 3], box_fraction: f64) -> Result<Self> {
        if bins.iter().any(|&b| b == 0) {
            return Err(PrepError::Config(format!("分箱数不能为 0: {:?}", bins)));
        }
        if !(box_fraction > 0.0 && box_fraction <= 1.0) {
            return Err(PrepError::Config(format!(
                "box_fraction 应在 (0, 1] 内，得到 {}",
                box_fraction
            )));
        }
        Ok(Self { bins, box_fraction })
    }

    /// 每帧的体素数
    pub fn voxel_count(&self) -> usize {
        self.bins.iter().product()
    }

    /// 输出文件名：`<stem>_bf<bf>_bin<b>.npy`，三个方向分箱数不同时写成 `bin<bx>x<by>x<bz>`
    pub fn output_name(&self, stem: &str) -> String {
        let [bx, by, bz] = self.bins;
        let bins = if bx == by && by == bz {
            bx.to_string()
        } else {
            format!("{}x{}x{}", bx, by, bz)
        };
        format!("{}_bf{}_bin{}.npy", stem, self.box_fraction, bins)
    }
}

/// 没有盒子信息时用坐标范围代替，上界略微放宽使最大坐标落在盒内
pub fn bounds_from_positions(positions: &[f32]) -> Option<[[f64; 2]; 3]> {
    let mut bounds = [[f64::INFINITY, f64::NEG_INFINITY]; 3];
    for atom in positions.chunks_exact(3) {
        for (axis, &x) in atom.iter().enumerate() {
            let x = x as f64;
            bounds[axis][0] = bounds[axis][0].min(x);
            bounds[axis][1] = bounds[axis][1].max(x);
        }
    }
    if !bounds[0][0].is_finite() {
        return None;
    }
    for [lo, hi] in &mut bounds {
        let pad = ((*hi - *lo).abs() * 1e-6).max(1e-6);
        *hi += pad;
    }
    Some(bounds)
}

/// 单帧体素化
pub fn voxelize_frame(positions: &[f32], bounds: &[[f64; 2]; 3], params: &VoxelParams) -> Result<VoxelGrid> {
    let lengths = bounds.map(|[lo, hi]| hi - lo);
    if lengths.iter().any(|&l| !(l > 0.0) || !l.is_finite()) {
        return Err(PrepError::Config(format!("无效的盒子边界: {:?}", bounds)));
    }

    let mut grid = VoxelGrid::zeros(params.bins);
    let mut in_region = 0usize;
    'atoms: for atom in positions.chunks_exact(3) {
        let mut cell = [0usize; 3];
        for axis in 0..3 {
            let length = lengths[axis];
            let region = params.box_fraction * length;
            let wrapped = (atom[axis] as f64 - bounds[axis][0]).rem_euclid(length);
            if wrapped >= region {
                continue 'atoms;
            }
            let bins = params.bins[axis];
            cell[axis] = ((wrapped / region * bins as f64) as usize).min(bins - 1);
        }
        grid.increment(cell[0], cell[1], cell[2]);
        in_region += 1;
    }

    if in_region > 0 {
        grid.scale(params.voxel_count() as f32 / in_region as f32);
    }
    Ok(grid)
}

#[derive(Debug, Clone, Serialize)]
pub struct VoxelReport {
    pub group: String,
    pub frames: usize,
    /// (frames, nz, ny, nx)
    pub shape: [usize; 4],
    pub output: PathBuf,
}

/// 体素化一个组，按块读取帧，写出 (frames, nz, ny, nx) float32 张量
pub fn voxelize_group(
    reader: &dyn PackReader,
    group: &str,
    params: &VoxelParams,
    output: &Path,
) -> Result<VoxelReport> {
    let attrs = reader.group_attrs(group)?;
    let box_bounds = store::attr_box_bounds(&attrs);
    let (frames, atoms) = match reader.shape(group)? {
        Some([frames, atoms, _]) => (frames, atoms),
        None => (0, 0),
    };
    if box_bounds.is_none() && frames > 0 {
        log::warn!("[体素化] 组 {} 没有 box_bounds 属性，使用每帧坐标范围", group);
    }

    let [bx, by, bz] = params.bins;
    let shape = [frames, bz, by, bx];
    let mut tensor = Array4::<f32>::zeros((frames, bz, by, bx));
    let stride = atoms * 3;

    for window in plan_chunks(frames, READ_CHUNK_FRAMES) {
        let data = reader.read_frames(group, window.start, window.end)?;
        for (offset, positions) in data.chunks_exact(stride).enumerate() {
            let bounds = match box_bounds.or_else(|| bounds_from_positions(positions)) {
                Some(bounds) => bounds,
                None => {
                    return Err(PrepError::Store(format!(
                        "组 {} 第 {} 帧无法确定盒子边界",
                        group,
                        window.start + offset
                    )));
                }
            };
            let grid = voxelize_frame(positions, &bounds, params)?;
            tensor
                .index_axis_mut(Axis(0), window.start + offset)
                .assign(&grid.view()?);
        }
        log::debug!(
            "[体素化] 组 {} 帧 {}..{} 完成 ({} 帧)",
            group,
            window.start,
            window.end,
            window.len()
        );
    }
    write_npy(output, &tensor)?;

    log::info!("[体素化] 组 {} 共 {} 帧 → {}", group, frames, output.display());
    Ok(VoxelReport {
        group: group.to_string(),
        frames,
        shape,
        output: output.to_path_buf(),
    })
}

/// 体素化容器中的组；`groups` 为空时处理全部组
pub fn voxelize_file(
    input: &Path,
    groups: &[String],
    params: &VoxelParams,
    out_dir: &Path,
) -> Result<Vec<VoxelReport>> {
    let reader = store::open_reader(input)?;
    let available = reader.group_names()?;
    let selected: Vec<String> = if groups.is_empty() {
        available
    } else {
        for group in groups {
            if !available.contains(group) {
                return Err(PrepError::Seed(format!(
                    "{} 中没有组 {}",
                    input.display(),
                    group
                )));
            }
        }
        groups.to_vec()
    };

    fs::create_dir_all(out_dir)?;
    selected
        .iter()
        .map(|group| {
            let output = out_dir.join(params.output_name(group));
            voxelize_group(reader.as_ref(), group, params, &output)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NativeWriter, PackWriter, StoreOptions};
    use ndarray_npy::read_npy;
    use serde_json::json;

    /// 4x4x4 简单立方点阵，格点位于体素中心
    fn lattice(shift: f32) -> Vec<f32> {
        let mut positions = Vec::new();
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    positions.extend([i as f32 + 0.5 + shift, j as f32 + 0.5, k as f32 + 0.5]);
                }
            }
        }
        positions
    }

    const BOX: [[f64; 2]; 3] = [[0.0, 4.0], [0.0, 4.0], [0.0, 4.0]];

    #[test]
    fn uniform_lattice_gives_all_ones() {
        for bins in [[4, 4, 4], [2, 2, 2], [4, 2, 1]] {
            let params = VoxelParams::new(bins, 1.0).unwrap();
            let grid = voxelize_frame(&lattice(0.0), &BOX, &params).unwrap();
            assert!(grid.data.iter().all(|&v| (v - 1.0).abs() < 1e-6), "bins {:?}", bins);
        }
    }

    #[test]
    fn box_fraction_keeps_only_leading_region() {
        let params = VoxelParams::new([2, 2, 2], 0.5).unwrap();
        let grid = voxelize_frame(&lattice(0.0), &BOX, &params).unwrap();
        assert!(grid.data.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn positions_are_wrapped_into_the_box() {
        let params = VoxelParams::new([4, 4, 4], 1.0).unwrap();
        // 整体平移一个盒长，结果不变
        let shifted = voxelize_frame(&lattice(4.0), &BOX, &params).unwrap();
        let plain = voxelize_frame(&lattice(0.0), &BOX, &params).unwrap();
        assert_eq!(shifted, plain);
    }

    #[test]
    fn empty_region_gives_zeros() {
        let params = VoxelParams::new([2, 2, 2], 0.1).unwrap();
        let grid = voxelize_frame(&[3.5, 3.5, 3.5], &BOX, &params).unwrap();
        assert!(grid.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn fallback_bounds_cover_all_atoms() {
        let bounds = bounds_from_positions(&[0.0, 1.0, 2.0, 4.0, 3.0, 2.0]).unwrap();
        assert_eq!(bounds[0][0], 0.0);
        assert!(bounds[0][1] > 4.0);
        // z 方向所有原子相同，范围退化时也要有正宽度
        assert!(bounds[2][1] > bounds[2][0]);
        assert!(bounds_from_positions(&[]).is_none());
    }

    #[test]
    fn output_name_encodes_parameters() {
        let params = VoxelParams::new([32, 32, 32], 0.4).unwrap();
        assert_eq!(params.output_name("42"), "42_bf0.4_bin32.npy");
        let params = VoxelParams::new([16, 16, 8], 1.0).unwrap();
        assert_eq!(params.output_name("7"), "7_bf1_bin16x16x8.npy");
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(VoxelParams::new([0, 1, 1], 1.0).is_err());
        assert!(VoxelParams::new([1, 1, 1], 0.0).is_err());
        assert!(VoxelParams::new([1, 1, 1], 1.5).is_err());
    }

    #[test]
    fn file_voxelization_writes_frames_by_bins() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("positions.mdpk");
        let mut writer = NativeWriter::create(&input, StoreOptions { chunk_frames: 2, compress: true }).unwrap();
        writer.begin_group("42").unwrap();
        writer
            .set_group_attr("box_bounds", json!([0.0, 4.0, 0.0, 4.0, 0.0, 4.0]))
            .unwrap();
        for _ in 0..(READ_CHUNK_FRAMES + 3) {
            writer.append_frame(&lattice(0.0)).unwrap();
        }
        writer.end_group().unwrap();
        Box::new(writer).finish().unwrap();

        let params = VoxelParams::new([4, 2, 1], 1.0).unwrap();
        let out_dir = dir.path().join("voxels");
        let reports = voxelize_file(&input, &[], &params, &out_dir).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].shape, [READ_CHUNK_FRAMES + 3, 1, 2, 4]);

        let array: Array4<f32> = read_npy(out_dir.join("42_bf1_bin4x2x1.npy")).unwrap();
        assert_eq!(array.shape(), &[READ_CHUNK_FRAMES + 3, 1, 2, 4]);
        assert!(array.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn tensor_axes_are_frame_z_y_x() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("one.mdpk");
        let mut writer = NativeWriter::create(&input, StoreOptions::default()).unwrap();
        writer.begin_group("1").unwrap();
        writer
            .set_group_attr("box_bounds", json!([0.0, 4.0, 0.0, 4.0, 0.0, 4.0]))
            .unwrap();
        writer.append_frame(&[0.5, 0.5, 0.5]).unwrap();
        writer.append_frame(&[2.5, 3.5, 0.5]).unwrap();
        writer.end_group().unwrap();
        Box::new(writer).finish().unwrap();

        let params = VoxelParams::new([4, 2, 1], 1.0).unwrap();
        let out_dir = dir.path().join("voxels");
        voxelize_file(&input, &[], &params, &out_dir).unwrap();

        let array: Array4<f32> = read_npy(out_dir.join("1_bf1_bin4x2x1.npy")).unwrap();
        // 单个原子占满 8 个体素的平均占据数
        assert_eq!(array[[0, 0, 0, 0]], 8.0);
        assert_eq!(array[[1, 0, 1, 2]], 8.0);
        assert_eq!(array.sum(), 16.0);
    }

    #[test]
    fn unknown_group_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("p.mdpk");
        let writer = NativeWriter::create(&input, StoreOptions::default()).unwrap();
        Box::new(writer).finish().unwrap();
        let params = VoxelParams::new([2, 2, 2], 1.0).unwrap();
        let result = voxelize_file(&input, &["9".to_string()], &params, dir.path());
        assert!(matches!(result, Err(PrepError::Seed(_))));
    }
}
