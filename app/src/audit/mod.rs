use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{PathFilter, PermissionBackend, TreeWalker, WalkEntry, WalkEvent};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::AuditError;
use crate::exclude::ExclusionMatcher;
use crate::identity::IdentitySet;

mod classify;
mod remediate;
mod report;

pub use classify::classify;
pub use remediate::{Preview, Remediator};
pub use report::{AuditReport, EntryFailure, EntryRecord, EntryResult, FailureKind, Reporter};

/// 遍历事件通道的缓冲区大小
const WALK_BUFFER: usize = 1000;

// ============================================================================
// 类型定义
// ============================================================================

/// 运行模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditMode {
    #[default]
    Audit,
    /// 预览修复：判断每个命中条目能否被精确修复，但不做修改
    DryRun,
    Remediate,
}

impl fmt::Display for AuditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditMode::Audit => write!(f, "audit"),
            AuditMode::DryRun => write!(f, "dry-run"),
            AuditMode::Remediate => write!(f, "remediate"),
        }
    }
}

/// 审计参数 - 来自CLI与配置文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditParams {
    /// 审计根目录
    pub root: PathBuf,

    pub mode: AuditMode,

    /// 并发检查/修复的工作线程数
    pub concurrency: usize,

    /// 是否跟随目录符号链接（仅限根目录之内）
    pub follow_symlinks: bool,
}

impl Default for AuditParams {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            mode: AuditMode::default(),
            concurrency: 8,
            follow_symlinks: false,
        }
    }
}

/// 运行结果状态，由调用方映射为进程退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStatus {
    Clean,
    MatchesFound,
    Aborted,
}

impl AuditStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            AuditStatus::Clean => 0,
            AuditStatus::MatchesFound => 2,
            AuditStatus::Aborted => 1,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Clean => write!(f, "clean"),
            AuditStatus::MatchesFound => write!(f, "matches-found"),
            AuditStatus::Aborted => write!(f, "aborted"),
        }
    }
}

// ============================================================================
// 取消信号
// ============================================================================

/// 运行级取消信号，在条目之间检查
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

pub fn cancellation() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    /// 永远不会被取消的信号
    pub fn never() -> Self {
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // 发送端已释放且未取消
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// 审计引擎
// ============================================================================

struct Worker {
    backend: Arc<dyn PermissionBackend>,
    identities: Arc<IdentitySet>,
    remediator: Remediator,
    mode: AuditMode,
}

impl Worker {
    fn process(&self, entry: WalkEntry) -> EntryResult {
        let snapshot = match self.backend.inspect(&entry.path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("{}", e);
                return EntryResult::Failed(EntryFailure::inspection(&entry.path, &e));
            }
        };

        let grants = classify(&snapshot, &self.identities);
        if grants.is_empty() {
            return EntryResult::Clean {
                path: entry.path,
                kind: snapshot.kind,
            };
        }
        log::info!("Matched {} ({} grant(s))", entry.relative, grants.len());

        let mut record = EntryRecord {
            path: entry.path,
            kind: snapshot.kind,
            grants,
            outcome: None,
            preview: None,
        };
        match self.mode {
            AuditMode::Audit => {}
            AuditMode::DryRun => {
                record.preview = Some(self.remediator.preview(&snapshot, &record.grants));
            }
            AuditMode::Remediate => {
                record.outcome = Some(self.remediator.remediate(&record.path, &record.grants));
            }
        }
        EntryResult::Matched(record)
    }
}

/// 按遍历顺序排队的结果；检查任务可能乱序完成
enum Pending {
    Ready(EntryResult),
    Task(JoinHandle<EntryResult>, PathBuf),
}

async fn deliver(pending: Pending, reporter: &mut dyn Reporter, matched: &mut usize) {
    let result = match pending {
        Pending::Ready(result) => result,
        Pending::Task(handle, path) => match handle.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Worker for {} failed: {}", path.display(), e);
                EntryResult::Failed(EntryFailure {
                    path,
                    kind: FailureKind::Inspection,
                    reason: format!("worker failed: {}", e),
                })
            }
        },
    };
    if matches!(result, EntryResult::Matched(_)) {
        *matched += 1;
    }
    reporter.record(result);
}

/// 把队首已完成的结果交给 Reporter
async fn flush_ready(
    pending: &mut VecDeque<Pending>, reporter: &mut dyn Reporter, matched: &mut usize,
) {
    while let Some(front) = pending.front() {
        if let Pending::Task(handle, _) = front {
            if !handle.is_finished() {
                break;
            }
        }
        if let Some(item) = pending.pop_front() {
            deliver(item, reporter, matched).await;
        }
    }
}

/// 主审计函数 - 入口点
///
/// 启动阶段的错误（根目录无效等）在遍历前返回；单个条目的错误只记录到
/// Reporter，不会中断运行。
pub async fn run_audit(
    params: &AuditParams, backend: Arc<dyn PermissionBackend>, identities: Arc<IdentitySet>,
    exclusions: Arc<ExclusionMatcher>, mut cancel: CancelToken, reporter: &mut dyn Reporter,
) -> Result<AuditStatus, AuditError> {
    let walker = TreeWalker::new(&params.root)?.follow_symlinks(params.follow_symlinks);
    let concurrency = params.concurrency.max(1);

    log::info!(
        "Starting {} of {} with {} backend ({} identities, {} workers)",
        params.mode,
        walker.root().display(),
        backend.name(),
        identities.len(),
        concurrency
    );
    reporter.begin(walker.root(), params.mode);

    let worker = Arc::new(Worker {
        backend: backend.clone(),
        identities,
        remediator: Remediator::new(backend, exclusions.clone(), walker.root()),
        mode: params.mode,
    });

    let filter: Arc<dyn PathFilter> = exclusions;
    let mut events = walker.walk_channel(filter, WALK_BUFFER).await;
    let permits = Arc::new(Semaphore::new(concurrency));
    let backlog = concurrency * 4;

    let mut seen = HashSet::new();
    let mut pending = VecDeque::new();
    let mut matched = 0usize;
    let mut cancelled = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::warn!("Audit cancelled, finishing in-flight entries");
                cancelled = true;
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WalkEvent::Entry(entry) => {
                // 同一路径在一次运行中只处理一次
                if !seen.insert(entry.path.clone()) {
                    continue;
                }
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let worker = worker.clone();
                let path = entry.path.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    worker.process(entry)
                });
                pending.push_back(Pending::Task(handle, path));
            }
            WalkEvent::Excluded { path, .. } => {
                pending.push_back(Pending::Ready(EntryResult::Excluded { path }));
            }
            WalkEvent::Failed { path, error } => {
                pending.push_back(Pending::Ready(EntryResult::Failed(EntryFailure::walk(
                    &path, &error,
                ))));
            }
        }

        flush_ready(&mut pending, reporter, &mut matched).await;
        while pending.len() > backlog {
            if let Some(item) = pending.pop_front() {
                deliver(item, reporter, &mut matched).await;
            }
        }
    }

    // 停止遍历，等待已提交的条目完成
    drop(events);
    while let Some(item) = pending.pop_front() {
        deliver(item, reporter, &mut matched).await;
    }
    reporter.finish(cancelled);

    let status = if matched > 0 {
        AuditStatus::MatchesFound
    } else {
        AuditStatus::Clean
    };
    log::info!("Audit finished: {} ({} matched)", status, matched);
    Ok(status)
}
