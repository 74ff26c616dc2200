use ndarray::ArrayView3;

use crate::error::{PrepError, Result};

/// 体素网格数据结构
/// 表示单帧原子坐标分箱后的三维标量场
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    /// 网格维度 [nx, ny, nz]
    pub shape: [usize; 3],
    /// 数据数组，x 变化最快，y 其次，z 最慢
    /// 索引计算: index = k * nx * ny + j * nx + i
    pub data: Vec<f32>,
}

impl VoxelGrid {
    /// 创建全零网格
    pub fn zeros(shape: [usize; 3]) -> Self {
        VoxelGrid {
            shape,
            data: vec![0.0; shape[0] * shape[1] * shape[2]],
        }
    }

    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.shape;
        k * nx * ny + j * nx + i
    }

    pub fn increment(&mut self, i: usize, j: usize, k: usize) {
        let idx = self.index(i, j, k);
        self.data[idx] += 1.0;
    }

    /// 所有体素乘以同一个系数
    pub fn scale(&mut self, factor: f32) {
        for value in &mut self.data {
            *value *= factor;
        }
    }

    /// 按 (nz, ny, nx) 轴序查看数据
    pub fn view(&self) -> Result<ArrayView3<'_, f32>> {
        let [nx, ny, nz] = self.shape;
        ArrayView3::from_shape((nz, ny, nx), &self.data).map_err(|e| {
            PrepError::Config(format!("体素网格形状 {:?} 与数据不匹配: {}", self.shape, e))
        })
    }
}
