use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    exit_code: Option<i32>,
    error: Option<String>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

/// 单个种子的外部模拟任务
pub struct SimJob {
    pub seed: String,
    /// 任务工作目录 <dataset>/<seed>
    pub work_dir: PathBuf,
    /// 任务创建时间
    pub created_at: Instant,
    state: RwLock<JobState>,
}

/// 任务状态快照，用于汇总输出
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub seed: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    /// 运行耗时（毫秒），未开始时为 None
    pub elapsed_ms: Option<u128>,
}

impl SimJob {
    pub fn new(seed: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed: seed.into(),
            work_dir: work_dir.into(),
            created_at: Instant::now(),
            state: RwLock::new(JobState {
                status: JobStatus::Pending,
                exit_code: None,
                error: None,
                started_at: None,
                finished_at: None,
            }),
        }
    }

    pub fn mark_running(&self) {
        let mut state = self.state.write();
        state.status = JobStatus::Running;
        state.started_at = Some(Instant::now());
    }

    /// 进程结束，按退出码判定成功与否
    pub fn mark_exited(&self, exit_code: Option<i32>) {
        let mut state = self.state.write();
        state.exit_code = exit_code;
        state.finished_at = Some(Instant::now());
        state.status = if exit_code == Some(0) {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
    }

    /// 进程没能启动或准备阶段出错
    pub fn mark_failed(&self, error: impl Into<String>) {
        let mut state = self.state.write();
        state.status = JobStatus::Failed;
        state.error = Some(error.into());
        state.finished_at = Some(Instant::now());
    }

    pub fn status(&self) -> JobStatus {
        self.state.read().status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.read().exit_code
    }

    /// 运行耗时；仍在运行时返回到目前为止的耗时
    pub fn elapsed(&self) -> Option<Duration> {
        let state = self.state.read();
        let started = state.started_at?;
        Some(state.finished_at.unwrap_or_else(Instant::now) - started)
    }

    fn summary(&self, job_id: &str) -> JobSummary {
        let state = self.state.read().clone();
        JobSummary {
            job_id: job_id.to_string(),
            seed: self.seed.clone(),
            status: state.status,
            exit_code: state.exit_code,
            error: state.error,
            elapsed_ms: self.elapsed().map(|d| d.as_millis()),
        }
    }
}

/// 模拟任务存储，多个工作线程并发更新各自的任务
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<SimJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// 登记任务，返回任务 id
    pub fn insert(&self, job: SimJob) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.write().insert(job_id.clone(), Arc::new(job));
        job_id
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<SimJob>> {
        self.jobs.read().get(job_id).cloned()
    }

    /// 获取当前任务数量
    pub fn task_count(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status() == status)
            .count()
    }

    /// 所有任务的快照，按种子排序
    pub fn summaries(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self
            .jobs
            .read()
            .iter()
            .map(|(id, job)| job.summary(id))
            .collect();
        summaries.sort_by(|a, b| a.seed.cmp(&b.seed));
        summaries
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_decides_status() {
        let store = JobStore::new();
        let ok = store.insert(SimJob::new("1", "/tmp/1"));
        let bad = store.insert(SimJob::new("2", "/tmp/2"));

        let job = store.get(&ok).unwrap();
        assert_eq!(job.status(), JobStatus::Pending);
        job.mark_running();
        assert!(job.elapsed().is_some());
        job.mark_exited(Some(0));
        assert_eq!(job.status(), JobStatus::Succeeded);

        let job = store.get(&bad).unwrap();
        job.mark_running();
        job.mark_exited(Some(1));
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.exit_code(), Some(1));

        assert_eq!(store.count_with_status(JobStatus::Failed), 1);
        assert_eq!(store.task_count(), 2);
    }

    #[test]
    fn summaries_are_sorted_by_seed() {
        let store = JobStore::new();
        store.insert(SimJob::new("b", "/tmp/b"));
        let id = store.insert(SimJob::new("a", "/tmp/a"));
        store.get(&id).unwrap().mark_failed("模板缺失");

        let summaries = store.summaries();
        assert_eq!(summaries[0].seed, "a");
        assert_eq!(summaries[0].status, JobStatus::Failed);
        assert_eq!(summaries[0].error.as_deref(), Some("模板缺失"));
        assert_eq!(summaries[1].elapsed_ms, None);
        assert_eq!(store.task_count(), 2);
    }
}
