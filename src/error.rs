use std::path::PathBuf;

use thiserror::Error;

/// 数据准备流程中可能出现的错误
#[derive(Error, Debug)]
pub enum PrepError {
    /// 底层文件系统错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// LAMMPS dump 文件格式错误
    #[error("dump 格式错误 ({path}): {message}")]
    Dump { path: PathBuf, message: String },

    /// 打包容器文件格式错误
    #[error("容器格式错误: {0}")]
    Store(String),

    /// 配置文件或参数错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 种子列表问题（文件缺失、为空、种子数据缺失）
    #[error("种子错误: {0}")]
    Seed(String),

    /// 找不到外部可执行文件（lmp、python 等）
    #[error("找不到外部程序: {0}")]
    MissingBinary(String),

    /// 外部进程以非零状态退出
    #[error("外部进程失败: {program} 退出码 {code:?}")]
    Process { program: String, code: Option<i32> },

    /// .npy 文件读取失败（格式、维度或数据类型不符）
    #[error("npy 读取失败: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("npy 写出失败: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("CSV 错误: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 错误: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl PrepError {
    pub fn dump(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PrepError::Dump {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
