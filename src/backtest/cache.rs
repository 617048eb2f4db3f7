use crate::backtest::fingerprint::Fingerprint;
use crate::backtest::model::{ArtifactRef, BacktestError, BacktestRequest};
use crate::storage::{ResultStore, StoreError};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// 一次 in-flight 回测的最终结果
#[derive(Debug, Clone)]
pub enum Resolution {
    Completed(ArtifactRef),
    Failed(BacktestError),
    /// 持有者被取消/超时后放弃了认领，等待方可重新认领
    Abandoned,
}

enum Slot {
    Running(watch::Sender<Option<Resolution>>),
    Completed(ArtifactRef),
}

type SlotTable = Arc<Mutex<HashMap<Fingerprint, Slot>>>;

fn lock(slots: &SlotTable) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub enum Acquire {
    NewlyClaimed(ClaimGuard),
    AlreadyRunning(Waiter),
    AlreadyCompleted(ArtifactRef),
}

impl std::fmt::Debug for Acquire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquire::NewlyClaimed(g) => write!(f, "NewlyClaimed({})", g.fingerprint.short()),
            Acquire::AlreadyRunning(w) => write!(f, "AlreadyRunning({})", w.fingerprint.short()),
            Acquire::AlreadyCompleted(a) => write!(f, "AlreadyCompleted({})", a.backtest_id),
        }
    }
}

/// 指纹级去重：同一指纹同一时刻最多一个执行者
///
/// 认领表只在短暂的同步临界区内访问，锁从不跨越 `.await`。
pub struct BacktestFingerprintCache {
    slots: SlotTable,
    store: Arc<dyn ResultStore>,
}

impl BacktestFingerprintCache {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            store,
        }
    }

    pub fn fingerprint(request: &BacktestRequest) -> Fingerprint {
        Fingerprint::of(request)
    }

    pub async fn acquire(&self, fingerprint: &Fingerprint) -> Result<Acquire, StoreError> {
        if let Some(found) = self.try_local(fingerprint) {
            return Ok(found);
        }

        // 之前进程留下的产物
        let persisted = self.store.find_artifact(fingerprint).await?.map(Arc::new);

        let mut slots = lock(&self.slots);
        match slots.get(fingerprint) {
            Some(Slot::Completed(artifact)) => {
                return Ok(Acquire::AlreadyCompleted(artifact.clone()));
            }
            Some(Slot::Running(tx)) => {
                return Ok(Acquire::AlreadyRunning(Waiter {
                    fingerprint: fingerprint.clone(),
                    rx: tx.subscribe(),
                }));
            }
            None => {}
        }

        if let Some(artifact) = persisted {
            debug!("指纹 {} 命中已持久化产物 {}", fingerprint.short(), artifact.backtest_id);
            slots.insert(fingerprint.clone(), Slot::Completed(artifact.clone()));
            return Ok(Acquire::AlreadyCompleted(artifact));
        }

        let (tx, _rx) = watch::channel(None);
        slots.insert(fingerprint.clone(), Slot::Running(tx));
        Ok(Acquire::NewlyClaimed(ClaimGuard {
            fingerprint: fingerprint.clone(),
            slots: self.slots.clone(),
            resolved: false,
        }))
    }

    fn try_local(&self, fingerprint: &Fingerprint) -> Option<Acquire> {
        let slots = lock(&self.slots);
        match slots.get(fingerprint)? {
            Slot::Completed(artifact) => Some(Acquire::AlreadyCompleted(artifact.clone())),
            Slot::Running(tx) => Some(Acquire::AlreadyRunning(Waiter {
                fingerprint: fingerprint.clone(),
                rx: tx.subscribe(),
            })),
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|s| matches!(s, Slot::Running(_)))
            .count()
    }

    /// 丢弃本地已完成条目，之后的查询回落到存储层
    pub fn forget_completed(&self) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, s| matches!(s, Slot::Running(_)));
        before - slots.len()
    }
}

/// 认领凭证；未完成即被丢弃时按 Abandoned 释放
pub struct ClaimGuard {
    fingerprint: Fingerprint,
    slots: SlotTable,
    resolved: bool,
}

impl ClaimGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn complete(mut self, outcome: Result<ArtifactRef, BacktestError>) {
        self.resolved = true;
        let mut slots = lock(&self.slots);
        let slot = slots.remove(&self.fingerprint);
        let resolution = match outcome {
            Ok(artifact) => {
                slots.insert(self.fingerprint.clone(), Slot::Completed(artifact.clone()));
                Resolution::Completed(artifact)
            }
            // 失败不缓存，后续调用方可以重新认领
            Err(err) => Resolution::Failed(err),
        };
        drop(slots);
        if let Some(Slot::Running(tx)) = slot {
            tx.send_replace(Some(resolution));
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        warn!("⚠ 指纹 {} 的认领被放弃", self.fingerprint.short());
        let slot = lock(&self.slots).remove(&self.fingerprint);
        if let Some(Slot::Running(tx)) = slot {
            tx.send_replace(Some(Resolution::Abandoned));
        }
    }
}

pub struct Waiter {
    fingerprint: Fingerprint,
    rx: watch::Receiver<Option<Resolution>>,
}

impl Waiter {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub async fn wait(mut self) -> Resolution {
        let resolution = match self.rx.wait_for(|r| r.is_some()).await {
            Ok(r) => r.clone().unwrap_or(Resolution::Abandoned),
            // 发送端已不存在且未写入结果
            Err(_) => Resolution::Abandoned,
        };
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::model::{ArtifactStatus, BacktestArtifact};
    use crate::linkage::{Link, ScreenSession};
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeSet;

    struct EmptyStore;

    #[async_trait]
    impl ResultStore for EmptyStore {
        async fn find_artifact(
            &self,
            _fingerprint: &Fingerprint,
        ) -> Result<Option<BacktestArtifact>, StoreError> {
            Ok(None)
        }
        async fn save_artifact(
            &self,
            artifact: &BacktestArtifact,
        ) -> Result<BacktestArtifact, StoreError> {
            Ok(artifact.clone())
        }
        async fn insert_link(&self, _link: &Link) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn find_link(
            &self,
            _session_id: &str,
            _symbol: &str,
            _data_date: NaiveDate,
        ) -> Result<Option<Link>, StoreError> {
            Ok(None)
        }
        async fn linked_symbols(
            &self,
            _session_id: &str,
            _data_date: NaiveDate,
        ) -> Result<BTreeSet<String>, StoreError> {
            Ok(BTreeSet::new())
        }
        async fn record_session(&self, _session: &ScreenSession) -> Result<bool, StoreError> {
            Ok(true)
        }
    }

    fn request() -> BacktestRequest {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        BacktestRequest::new("QQQ", "mean_revert", d(1, 2), d(3, 29)).with_param("z", 2)
    }

    fn artifact(fp: &Fingerprint) -> ArtifactRef {
        let req = request();
        Arc::new(BacktestArtifact {
            backtest_id: "bt-1".into(),
            fingerprint: fp.clone(),
            symbol: req.symbol.clone(),
            strategy_name: req.strategy_name.clone(),
            start_date: req.start_date,
            end_date: req.end_date,
            resolution: req.resolution.clone(),
            parameters: req.parameters.clone(),
            statistics: serde_json::json!({"sharpe": 1.2}),
            trades: vec![],
            result_path: "results/x.json".into(),
            created_at: Utc::now(),
            status: ArtifactStatus::Completed,
        })
    }

    #[tokio::test]
    async fn second_caller_waits_for_first() {
        let cache = BacktestFingerprintCache::new(Arc::new(EmptyStore));
        let fp = BacktestFingerprintCache::fingerprint(&request());

        let Acquire::NewlyClaimed(guard) = cache.acquire(&fp).await.unwrap() else {
            panic!("first caller must claim");
        };
        let Acquire::AlreadyRunning(waiter) = cache.acquire(&fp).await.unwrap() else {
            panic!("second caller must wait");
        };
        assert_eq!(cache.in_flight(), 1);

        let pending = tokio::spawn(waiter.wait());
        guard.complete(Ok(artifact(&fp)));

        match pending.await.unwrap() {
            Resolution::Completed(a) => assert_eq!(a.backtest_id, "bt-1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            cache.acquire(&fp).await.unwrap(),
            Acquire::AlreadyCompleted(_)
        ));
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.forget_completed(), 1);
    }

    #[tokio::test]
    async fn dropped_guard_releases_claim() {
        let cache = BacktestFingerprintCache::new(Arc::new(EmptyStore));
        let fp = BacktestFingerprintCache::fingerprint(&request());

        let Acquire::NewlyClaimed(guard) = cache.acquire(&fp).await.unwrap() else {
            panic!("first caller must claim");
        };
        let Acquire::AlreadyRunning(waiter) = cache.acquire(&fp).await.unwrap() else {
            panic!("second caller must wait");
        };
        drop(guard);

        assert!(matches!(waiter.wait().await, Resolution::Abandoned));
        assert!(matches!(
            cache.acquire(&fp).await.unwrap(),
            Acquire::NewlyClaimed(_)
        ));
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let cache = BacktestFingerprintCache::new(Arc::new(EmptyStore));
        let fp = BacktestFingerprintCache::fingerprint(&request());

        let Acquire::NewlyClaimed(guard) = cache.acquire(&fp).await.unwrap() else {
            panic!("first caller must claim");
        };
        let Acquire::AlreadyRunning(waiter) = cache.acquire(&fp).await.unwrap() else {
            panic!("second caller must wait");
        };
        guard.complete(Err(BacktestError::execution("exit 1")));

        match waiter.wait().await {
            Resolution::Failed(e) => assert_eq!(e.message, "exit 1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            cache.acquire(&fp).await.unwrap(),
            Acquire::NewlyClaimed(_)
        ));
    }
}
