use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 阶段耗时记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// 开始时间 (Unix 时间戳，毫秒)
    pub start_time: u64,
    /// 结束时间 (Unix 时间戳，毫秒)
    pub end_time: u64,
    /// 阶段名，如 "simulate"、"pack"
    pub stage: String,
    /// 阶段内的条目，如种子号；整阶段记录为空字符串
    pub item: String,
    /// 附加说明（帧数、失败原因等）
    pub msg: String,
}

impl StageRecord {
    pub fn duration_ms(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// 性能数据存储
/// 按 run_id 存储各阶段的耗时记录
pub struct PerformanceStore {
    records: RwLock<HashMap<String, Vec<StageRecord>>>,
}

impl PerformanceStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// 添加性能记录
    pub fn add_record(&self, run_id: &str, record: StageRecord) {
        self.records
            .write()
            .entry(run_id.to_string())
            .or_default()
            .push(record);
    }

    /// 计时执行 `f`，无论成功失败都会留下记录
    pub fn time_stage<T, E, F>(&self, run_id: &str, stage: &str, item: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: std::fmt::Display,
    {
        let start_time = get_unix_timestamp_ms();
        let result = f();
        let msg = match &result {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("失败: {}", e),
        };
        self.add_record(
            run_id,
            StageRecord {
                start_time,
                end_time: get_unix_timestamp_ms(),
                stage: stage.to_string(),
                item: item.to_string(),
                msg,
            },
        );
        result
    }

    /// 获取指定运行的所有记录
    pub fn get_records(&self, run_id: &str) -> Option<Vec<StageRecord>> {
        self.records.read().get(run_id).cloned()
    }

    /// 把某次运行的记录写成 JSON 文件
    pub fn write_json(&self, run_id: &str, path: &Path) -> Result<()> {
        let records = self.get_records(run_id).unwrap_or_default();
        let body = serde_json::json!({
            "run_id": run_id,
            "records": records,
        });
        std::fs::write(path, serde_json::to_vec_pretty(&body)?)?;
        Ok(())
    }
}

impl Default for PerformanceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 获取 Unix 时间戳（毫秒）
pub fn get_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
