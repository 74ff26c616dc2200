use std::sync::Arc;

use uuid::Uuid;

use crate::config::PrepConfig;
use crate::performance::PerformanceStore;
use crate::task::JobStore;
use crate::utils::parser_registry::ParserRegistry;

/// 一次命令运行期间共享的状态：解析器、配置、任务与计时存储
pub struct AppState {
    pub parser_registry: Arc<ParserRegistry>,
    pub config: PrepConfig,
    pub job_store: Arc<JobStore>,
    pub performance_store: Arc<PerformanceStore>,
    /// 本次运行的 id，用于区分计时记录
    pub run_id: String,
}

impl AppState {
    pub fn new(config: PrepConfig) -> Self {
        Self {
            parser_registry: Arc::new(ParserRegistry::new()),
            config,
            job_store: Arc::new(JobStore::new()),
            performance_store: Arc::new(PerformanceStore::new()),
            run_id: Uuid::new_v4().to_string(),
        }
    }
}
