use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use storage::{EntryKind, Grant, InspectionError, RemediationOutcome, WalkError};

use super::remediate::Preview;
use super::AuditMode;

// ============================================================================
// 单条目结果
// ============================================================================

/// 命中条目的明细记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryRecord {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub grants: Vec<Grant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RemediationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Inspection,
    Unreadable,
    Cycle,
}

/// 无法处理的条目及原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

impl EntryFailure {
    pub fn inspection(path: &Path, err: &InspectionError) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: FailureKind::Inspection,
            reason: err.to_string(),
        }
    }

    pub fn walk(path: &Path, err: &WalkError) -> Self {
        let kind = match err {
            WalkError::CycleDetected { .. } => FailureKind::Cycle,
            _ => FailureKind::Unreadable,
        };
        Self {
            path: path.to_path_buf(),
            kind,
            reason: err.to_string(),
        }
    }
}

/// 引擎按遍历顺序交给 Reporter 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResult {
    Clean { path: PathBuf, kind: EntryKind },
    Matched(EntryRecord),
    Excluded { path: PathBuf },
    Failed(EntryFailure),
}

/// 结果汇总接口，只做聚合不做输出
pub trait Reporter: Send {
    fn begin(&mut self, _root: &Path, _mode: AuditMode) {}

    fn record(&mut self, result: EntryResult);

    fn finish(&mut self, _cancelled: bool) {}
}

// ============================================================================
// 审计报告
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub root: PathBuf,
    pub mode: AuditMode,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,

    /// 已检查的条目数，包含检查失败的条目
    pub scanned: usize,
    pub excluded: usize,
    pub matched: usize,
    pub failed: usize,
    pub cycles: usize,

    /// 按修复结果统计
    pub outcomes: BTreeMap<String, usize>,

    pub entries: Vec<EntryRecord>,
    pub failures: Vec<EntryFailure>,
}

impl AuditReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome_count(&self, label: &str) -> usize {
        self.outcomes.get(label).copied().unwrap_or(0)
    }

    fn tally(&mut self, label: &str) {
        *self.outcomes.entry(label.to_string()).or_insert(0) += 1;
    }
}

impl Reporter for AuditReport {
    fn begin(&mut self, root: &Path, mode: AuditMode) {
        self.root = root.to_path_buf();
        self.mode = mode;
        self.started_at = Some(Utc::now());
    }

    fn record(&mut self, result: EntryResult) {
        match result {
            EntryResult::Clean { .. } => self.scanned += 1,
            EntryResult::Matched(record) => {
                self.scanned += 1;
                self.matched += 1;
                if let Some(outcome) = &record.outcome {
                    self.tally(outcome.label());
                }
                if let Some(preview) = record.preview {
                    self.tally(&preview.to_string());
                }
                self.entries.push(record);
            }
            EntryResult::Excluded { .. } => self.excluded += 1,
            EntryResult::Failed(failure) => {
                match failure.kind {
                    FailureKind::Cycle => self.cycles += 1,
                    FailureKind::Inspection | FailureKind::Unreadable => {
                        self.scanned += 1;
                        self.failed += 1;
                    }
                }
                self.failures.push(failure);
            }
        }
    }

    fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_time = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                format!("{:.2}s", (end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => String::from("-"),
        };

        writeln!(
            f,
            "=================================================================="
        )?;
        writeln!(
            f,
            "                         Permission Audit                         "
        )?;
        writeln!(
            f,
            "=================================================================="
        )?;
        writeln!(f)?;
        writeln!(f, "   Root       :    {}", self.root.display())?;
        writeln!(f, "   Mode       :    {}", self.mode)?;
        writeln!(f, "   Total time :    {}", total_time)?;
        if self.cancelled {
            writeln!(f, "   Status     :    cancelled (partial report)")?;
        }
        writeln!(f)?;
        writeln!(
            f,
            " ---------------------------- Counts ------------------------------"
        )?;
        writeln!(f, "   Scanned:                                     {}", self.scanned)?;
        writeln!(f, "   Excluded:                                    {}", self.excluded)?;
        writeln!(f, "   Matched:                                     {}", self.matched)?;
        writeln!(f, "   Failed:                                      {}", self.failed)?;
        writeln!(f, "   Cycles:                                      {}", self.cycles)?;

        if !self.outcomes.is_empty() {
            writeln!(
                f,
                " --------------------------- Outcomes -----------------------------"
            )?;
            for (label, count) in &self.outcomes {
                writeln!(f, "   {:<45}{}", format!("{}:", label), count)?;
            }
        }

        if !self.entries.is_empty() {
            writeln!(
                f,
                " ------------------------ Matched Entries -------------------------"
            )?;
            for record in &self.entries {
                let grants = record
                    .grants
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "   [{}] {}  {}", record.kind, record.path.display(), grants)?;
                if let Some(outcome) = &record.outcome {
                    write!(f, "  => {}", outcome)?;
                }
                if let Some(preview) = &record.preview {
                    write!(f, "  => {}", preview)?;
                }
                writeln!(f)?;
            }
        }

        if !self.failures.is_empty() {
            writeln!(
                f,
                " --------------------------- Failures -----------------------------"
            )?;
            for failure in &self.failures {
                writeln!(f, "   {}: {}", failure.path.display(), failure.reason)?;
            }
        }

        writeln!(
            f,
            "=================================================================="
        )
    }
}
