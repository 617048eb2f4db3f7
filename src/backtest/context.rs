use crate::backtest::fingerprint::Fingerprint;
use crate::backtest::model::BacktestRequest;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const REQUEST_FILE: &str = "request.json";
pub const RESULT_FILE: &str = "result.json";

/// 单次尝试独占的执行上下文
///
/// 每次尝试一个私有临时目录，内含请求配置快照；释放即删除目录。
#[derive(Debug)]
pub struct IsolatedContext {
    id: String,
    dir: TempDir,
}

impl IsolatedContext {
    pub fn allocate(
        work_root: &Path,
        fingerprint: &Fingerprint,
        attempt: u32,
        request: &BacktestRequest,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let id = format!(
            "{}-a{}-{}",
            fingerprint.short(),
            attempt,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", id))
            .tempdir_in(work_root)?;

        let snapshot = serde_json::to_vec_pretty(request)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(dir.path().join(REQUEST_FILE), snapshot)?;

        Ok(Self { id, dir })
    }

    /// 在阻塞线程池上分配，避免文件操作占用运行时工作线程
    pub async fn allocate_off_runtime(
        work_root: PathBuf,
        fingerprint: Fingerprint,
        attempt: u32,
        request: BacktestRequest,
    ) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || {
            Self::allocate(&work_root, &fingerprint, attempt, &request)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn request_path(&self) -> PathBuf {
        self.path().join(REQUEST_FILE)
    }

    pub fn result_path(&self) -> PathBuf {
        self.path().join(RESULT_FILE)
    }

    /// 显式释放；失败仅记录日志
    pub fn discard(self) {
        let id = self.id;
        if let Err(e) = self.dir.close() {
            log::warn!("⚠ 清理执行上下文 {} 失败: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn each_attempt_gets_private_directory() {
        let root = tempfile::tempdir().unwrap();
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let req = BacktestRequest::new("IWM", "gap_fade", d(2, 1), d(2, 29));
        let fp = Fingerprint::of(&req);

        let a = IsolatedContext::allocate(root.path(), &fp, 1, &req).unwrap();
        let b = IsolatedContext::allocate(root.path(), &fp, 2, &req).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());

        let snapshot: BacktestRequest =
            serde_json::from_slice(&std::fs::read(a.request_path()).unwrap()).unwrap();
        assert_eq!(snapshot, req);

        let path = a.path().to_path_buf();
        a.discard();
        assert!(!path.exists());

        let path = b.path().to_path_buf();
        drop(b);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn allocation_runs_on_blocking_pool() {
        let root = tempfile::tempdir().unwrap();
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let req = BacktestRequest::new("QQQ", "sma_cross", d(3, 1), d(3, 28));
        let fp = Fingerprint::of(&req);

        let work = root.path().join("nested").join("work");
        let ctx = IsolatedContext::allocate_off_runtime(work.clone(), fp.clone(), 3, req.clone())
            .await
            .unwrap();
        assert!(ctx.path().starts_with(&work));
        assert!(ctx.id().contains("-a3-"));
        assert!(ctx.request_path().exists());

        // 工作根是普通文件时报 IO 错误
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(IsolatedContext::allocate_off_runtime(blocker, fp, 1, req)
            .await
            .is_err());
    }
}
