use std::path::Path;

use crate::error::Result;
use crate::utils::frame::Frame;

/// 按时间顺序逐帧产出的轨迹流
pub type FrameStream = Box<dyn Iterator<Item = Result<Frame>> + Send>;

/// 轨迹文件解析器 trait
/// 不同的轨迹格式需要实现这个 trait
pub trait TrajectoryParser: Send + Sync {
    /// 获取支持的文件扩展名（不含点号），例如: "lammpstrj"
    fn supported_extensions(&self) -> Vec<&'static str>;

    /// 检查文件扩展名是否被支持
    fn supports(&self, extension: &str) -> bool {
        self.supported_extensions()
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    /// 以流的方式打开轨迹，前 `skip_frames` 帧只消费不产出
    fn open_frames(&self, path: &Path, skip_frames: usize) -> Result<FrameStream>;

    /// 快速获取原子数（只读取第一帧的头部）
    fn peek_atom_count(&self, path: &Path) -> Result<usize>;

    /// 获取解析器名称（用于日志和错误信息）
    fn name(&self) -> &'static str;
}
