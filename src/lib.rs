//! 分子动力学轨迹到体素张量的数据准备流程
//!
//! 模拟、切分、打包、体素化、训练与结果汇总各自是独立的批处理阶段，
//! 由 `pipeline` 按顺序串联。

pub mod app_state;
pub mod config;
pub mod error;
pub mod packer;
pub mod parsers;
pub mod performance;
pub mod pipeline;
pub mod results;
pub mod simulate;
pub mod splitter;
pub mod store;
pub mod task;
pub mod train;
pub mod utils;
pub mod voxelize;

pub use app_state::AppState;
pub use config::{Phase, PrepConfig};
pub use error::{PrepError, Result};
