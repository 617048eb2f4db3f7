use crate::backtest::cache::{Acquire, BacktestFingerprintCache, Resolution};
use crate::backtest::context::IsolatedContext;
use crate::backtest::fingerprint::Fingerprint;
use crate::backtest::model::{
    ArtifactRef, ArtifactStatus, BacktestArtifact, BacktestError, BacktestErrorType,
    BacktestRequest, BacktestTask, BatchOptions, BatchStats, TaskState,
};
use crate::backtest::worker::{EngineOutput, StrategyEngine};
use crate::storage::ResultStore;
use chrono::Utc;
use log::{error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub enum TaskOutcome {
    /// 本批次实际执行产生
    Executed(ArtifactRef),
    /// 产物已存在（本进程或存储层）
    CacheHit(ArtifactRef),
    /// 等待同指纹的其他执行者得到
    Shared(ArtifactRef),
    Failed(BacktestError),
}

impl TaskOutcome {
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        match self {
            TaskOutcome::Executed(a) | TaskOutcome::CacheHit(a) | TaskOutcome::Shared(a) => {
                Some(a)
            }
            TaskOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&BacktestError> {
        match self {
            TaskOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.artifact().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub index: usize,
    pub symbol: String,
    pub fingerprint: Fingerprint,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    pub context_ids: Vec<String>,
    /// 从开始查缓存到得出结果的耗时
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// 与输入顺序一致
    pub tasks: Vec<TaskReport>,
    pub stats: BatchStats,
    /// continue_on_error = false 时触发整体取消的错误
    pub aborted_by: Option<BacktestError>,
}

impl BatchReport {
    /// 按标的归集；同一标的出现多次时取输入顺序中的第一条
    pub fn by_symbol(&self) -> BTreeMap<String, &TaskReport> {
        let mut map = BTreeMap::new();
        for t in &self.tasks {
            map.entry(t.symbol.clone()).or_insert(t);
        }
        map
    }

    pub fn successes(&self) -> impl Iterator<Item = (&TaskReport, &ArtifactRef)> {
        self.tasks
            .iter()
            .filter_map(|t| t.outcome.artifact().map(|a| (t, a)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TaskReport, &BacktestError)> {
        self.tasks
            .iter()
            .filter_map(|t| t.outcome.error().map(|e| (t, e)))
    }
}

/// 并行回测调度器
///
/// 并发由信号量限制；缓存查询在取得许可之前进行，命中不占用执行槽位。
pub struct ParallelBacktestScheduler {
    engine: Arc<dyn StrategyEngine>,
    store: Arc<dyn ResultStore>,
    cache: Arc<BacktestFingerprintCache>,
    work_root: PathBuf,
    results_dir: PathBuf,
}

impl ParallelBacktestScheduler {
    pub fn new(
        engine: Arc<dyn StrategyEngine>,
        store: Arc<dyn ResultStore>,
        work_root: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        let cache = Arc::new(BacktestFingerprintCache::new(store.clone()));
        Self {
            engine,
            store,
            cache,
            work_root: work_root.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn cache(&self) -> &Arc<BacktestFingerprintCache> {
        &self.cache
    }

    pub async fn run_batch(
        &self,
        requests: Vec<BacktestRequest>,
        options: &BatchOptions,
    ) -> Result<BatchReport, BacktestError> {
        options.validate()?;
        for r in &requests {
            r.validate()?;
        }

        let total = requests.len();
        info!(
            "▶ 开始回测批次: {} 个请求, 并发={}, 超时={}s, 重试={}",
            total,
            options.max_parallel,
            options.timeout_per_task.as_secs(),
            options.retry_attempts
        );

        let runner = Arc::new(TaskRunner {
            engine: self.engine.clone(),
            store: self.store.clone(),
            cache: self.cache.clone(),
            work_root: self.work_root.clone(),
            results_dir: self.results_dir.clone(),
            options: options.clone(),
            permits: Arc::new(Semaphore::new(options.max_parallel)),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        });

        let mut meta = Vec::with_capacity(total);
        let mut set = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let fingerprint = Fingerprint::of(&request);
            meta.push((request.normalized_symbol(), fingerprint.clone()));
            let runner = runner.clone();
            set.spawn(async move { runner.run_task(index, fingerprint, request).await });
        }

        let mut slots: Vec<Option<TaskReport>> = (0..total).map(|_| None).collect();
        let mut aborted_by: Option<BacktestError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => {
                    if !options.continue_on_error && aborted_by.is_none() {
                        if let TaskOutcome::Failed(err) = &report.outcome {
                            error!(
                                "✗ {} 最终失败，取消批次内其余任务: {}",
                                report.symbol, err
                            );
                            aborted_by = Some(err.clone());
                            set.abort_all();
                        }
                    }
                    let index = report.index;
                    slots[index] = Some(report);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("回测任务异常退出: {}", e),
            }
        }

        let tasks: Vec<TaskReport> = slots
            .into_iter()
            .zip(meta)
            .enumerate()
            .map(|(index, (slot, (symbol, fingerprint)))| {
                slot.unwrap_or_else(|| {
                    let err = if aborted_by.is_some() {
                        BacktestError::cancelled("批次已因其他任务失败而取消")
                    } else {
                        BacktestError::infra("回测任务异常退出")
                    };
                    TaskReport {
                        index,
                        symbol,
                        fingerprint,
                        outcome: TaskOutcome::Failed(err),
                        attempts: 0,
                        context_ids: Vec::new(),
                        elapsed: Duration::ZERO,
                    }
                })
            })
            .collect();

        let stats = summarize(
            &tasks,
            runner.executions.load(Ordering::SeqCst),
            runner.peak_running.load(Ordering::SeqCst),
        );
        info!(
            "✓ 回测批次结束: 成功 {} / 失败 {} / 超时 {} / 取消 {} (执行 {}, 命中 {}, 共享 {}, 峰值并发 {})",
            stats.succeeded,
            stats.failed,
            stats.timed_out,
            stats.cancelled,
            stats.executions,
            stats.cache_hits,
            stats.shared,
            stats.peak_running
        );

        Ok(BatchReport {
            tasks,
            stats,
            aborted_by,
        })
    }
}

fn summarize(tasks: &[TaskReport], executions: usize, peak_running: usize) -> BatchStats {
    let mut stats = BatchStats {
        total: tasks.len(),
        executions,
        peak_running,
        ..Default::default()
    };
    for t in tasks {
        match &t.outcome {
            TaskOutcome::Executed(_) => stats.succeeded += 1,
            TaskOutcome::CacheHit(_) => {
                stats.succeeded += 1;
                stats.cache_hits += 1;
            }
            TaskOutcome::Shared(_) => {
                stats.succeeded += 1;
                stats.shared += 1;
            }
            TaskOutcome::Failed(e) => match e.error_type {
                BacktestErrorType::Timeout => stats.timed_out += 1,
                BacktestErrorType::Cancelled => stats.cancelled += 1,
                _ => stats.failed += 1,
            },
        }
    }
    stats
}

/// 指数退避，带 0~20% 抖动
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let exp = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
    let capped = exp.min(MAX_BACKOFF.max(base));
    let jitter_pct: u32 = rand::thread_rng().gen_range(0..=20);
    capped + capped * jitter_pct / 100
}

/// 运行中计数，离开作用域即归还
struct RunningSlot<'a>(&'a AtomicUsize);

impl<'a> RunningSlot<'a> {
    fn enter(running: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(running)
    }
}

impl Drop for RunningSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct TaskRunner {
    engine: Arc<dyn StrategyEngine>,
    store: Arc<dyn ResultStore>,
    cache: Arc<BacktestFingerprintCache>,
    work_root: PathBuf,
    results_dir: PathBuf,
    options: BatchOptions,
    permits: Arc<Semaphore>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    executions: AtomicUsize,
}

impl TaskRunner {
    async fn run_task(
        &self,
        index: usize,
        fingerprint: Fingerprint,
        request: BacktestRequest,
    ) -> TaskReport {
        let started = Instant::now();
        let mut task = BacktestTask::new(fingerprint, request);
        let outcome = self.drive(&mut task).await;
        TaskReport {
            index,
            symbol: task.request.normalized_symbol(),
            fingerprint: task.fingerprint,
            outcome,
            attempts: task.attempt_count,
            context_ids: task.context_ids,
            elapsed: started.elapsed(),
        }
    }

    async fn drive(&self, task: &mut BacktestTask) -> TaskOutcome {
        loop {
            let acquired = match self.cache.acquire(&task.fingerprint).await {
                Ok(a) => a,
                Err(e) => {
                    return TaskOutcome::Failed(BacktestError::infra(format!(
                        "查询已有产物失败: {}",
                        e
                    )))
                }
            };
            match acquired {
                Acquire::AlreadyCompleted(artifact) => {
                    info!(
                        "↺ {} 命中已有回测 {} ({})",
                        task.request.symbol,
                        artifact.backtest_id,
                        task.fingerprint.short()
                    );
                    return TaskOutcome::CacheHit(artifact);
                }
                Acquire::AlreadyRunning(waiter) => match waiter.wait().await {
                    Resolution::Completed(artifact) => return TaskOutcome::Shared(artifact),
                    Resolution::Failed(err) => return TaskOutcome::Failed(err),
                    Resolution::Abandoned => continue,
                },
                Acquire::NewlyClaimed(guard) => {
                    let result = self.execute_claimed(task).await;
                    guard.complete(result.clone());
                    return match result {
                        Ok(artifact) => TaskOutcome::Executed(artifact),
                        Err(err) => TaskOutcome::Failed(err),
                    };
                }
            }
        }
    }

    async fn execute_claimed(&self, task: &mut BacktestTask) -> Result<ArtifactRef, BacktestError> {
        let max_attempts = self.options.max_attempts();
        loop {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| BacktestError::cancelled("调度器已关闭"))?;

            let attempt = task.begin_attempt();
            let ctx = match IsolatedContext::allocate_off_runtime(
                self.work_root.clone(),
                task.fingerprint.clone(),
                attempt,
                task.request.clone(),
            )
            .await
            {
                Ok(ctx) => ctx,
                Err(e) => {
                    task.finish(TaskState::Failed);
                    return Err(BacktestError::infra(format!("分配执行上下文失败: {}", e)));
                }
            };
            task.record_context(ctx.id());
            self.executions.fetch_add(1, Ordering::SeqCst);

            let result = {
                let _running = RunningSlot::enter(&self.running, &self.peak_running);
                tokio::time::timeout(
                    self.options.timeout_per_task,
                    self.engine.execute(&ctx, &task.request),
                )
                .await
            };
            ctx.discard();
            drop(permit);

            let err = match result {
                Ok(Ok(output)) => {
                    return match self.persist(task, output).await {
                        Ok(artifact) => {
                            task.finish(TaskState::Succeeded);
                            info!(
                                "✓ {} 回测完成 [{}] 第 {} 次尝试",
                                task.request.symbol, artifact.backtest_id, attempt
                            );
                            Ok(artifact)
                        }
                        Err(err) => {
                            task.finish(TaskState::Failed);
                            error!("✗ {} 回测结果保存失败: {}", task.request.symbol, err);
                            Err(err)
                        }
                    };
                }
                Ok(Err(failure)) => {
                    task.finish(TaskState::Failed);
                    BacktestError::execution(failure.to_string())
                }
                Err(_) => {
                    task.finish(TaskState::TimedOut);
                    BacktestError::timeout(self.options.timeout_per_task)
                }
            };

            if !task.requeue(max_attempts) {
                warn!(
                    "✗ {} 回测最终失败 ({}/{}): {}",
                    task.request.symbol, attempt, max_attempts, err
                );
                return Err(err);
            }
            let delay = backoff_delay(self.options.retry_backoff, attempt);
            warn!(
                "⚠ {} 回测重试 [{}/{}] {}ms 后: {}",
                task.request.symbol,
                attempt + 1,
                max_attempts,
                delay.as_millis(),
                err
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn persist(
        &self,
        task: &BacktestTask,
        output: EngineOutput,
    ) -> Result<ArtifactRef, BacktestError> {
        let infra = |what: &str, e: &dyn std::fmt::Display| {
            BacktestError::infra(format!("{}: {}", what, e))
        };

        tokio::fs::create_dir_all(&self.results_dir)
            .await
            .map_err(|e| infra("创建结果目录失败", &e))?;
        let path = self.results_dir.join(format!("{}.json", task.fingerprint));
        let body = serde_json::to_vec_pretty(&serde_json::json!({
            "fingerprint": task.fingerprint,
            "request": task.request,
            "statistics": output.statistics,
            "trades": output.trades,
        }))
        .map_err(|e| infra("序列化结果失败", &e))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| infra("写入结果文件失败", &e))?;

        let req = &task.request;
        let artifact = BacktestArtifact {
            backtest_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: task.fingerprint.clone(),
            symbol: req.normalized_symbol(),
            strategy_name: req.strategy_name.clone(),
            start_date: req.start_date,
            end_date: req.end_date,
            resolution: req.resolution.clone(),
            parameters: req.parameters.clone(),
            statistics: output.statistics,
            trades: output.trades,
            result_path: path.display().to_string(),
            created_at: Utc::now(),
            status: ArtifactStatus::Completed,
        };
        let saved = self
            .store
            .save_artifact(&artifact)
            .await
            .map_err(|e| infra("保存回测产物失败", &e))?;
        Ok(Arc::new(saved))
    }
}
