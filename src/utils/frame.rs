/// 单个模拟时间步的原子快照
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 跳过平衡帧之后的帧序号（从 0 开始）
    pub index: usize,
    /// dump 中记录的时间步
    pub timestep: u64,
    /// 盒子边界 [[xlo, xhi], [ylo, yhi], [zlo, zhi]]
    pub box_bounds: [[f64; 2]; 3],
    /// 按原子 id 排序后的坐标
    pub positions: Vec<[f32; 3]>,
}

impl Frame {
    pub fn atom_count(&self) -> usize {
        self.positions.len()
    }

    /// 以 (atoms * 3) 的扁平切片访问坐标
    pub fn flat_positions(&self) -> &[f32] {
        self.positions.as_flattened()
    }

    /// 盒子边界的扁平形式 [xlo, xhi, ylo, yhi, zlo, zhi]，作为组属性保存
    pub fn flat_box_bounds(&self) -> [f64; 6] {
        let [x, y, z] = self.box_bounds;
        [x[0], x[1], y[0], y[1], z[0], z[1]]
    }
}
