mod common;

use std::fs;
use std::sync::Arc;

use app::audit::{EntryResult, FailureKind, Preview};
use app::prelude::*;
use common::{alice_bob_tree, FakeBackend, ALICE_UID, ROOT_UID};
use storage::{PermissionBackend, PermissionKind, RemediationOutcome};
use utils::error::Result;

fn params(root: &std::path::Path, mode: AuditMode) -> AuditParams {
    AuditParams {
        root: root.to_path_buf(),
        mode,
        concurrency: 4,
        follow_symlinks: false,
    }
}

fn alice() -> Arc<IdentitySet> {
    Arc::new(IdentitySet::new(["alice"]).unwrap())
}

/// 场景：alice 拥有 alice_owned.txt，bob 拥有 other.txt，只报告一处命中
#[tokio::test]
async fn test_audit_reports_only_revoked_owner() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = alice_bob_tree();
    let root = temp_dir.path();
    let backend = Arc::new(FakeBackend::new().owned_by(root.join("alice_owned.txt"), ALICE_UID));

    let mut report = AuditReport::new();
    let status = run_audit(
        &params(root, AuditMode::Audit),
        backend,
        alice(),
        Arc::new(ExclusionMatcher::empty()),
        CancelToken::never(),
        &mut report,
    )
    .await?;

    assert_eq!(status, AuditStatus::MatchesFound);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.entries[0].path, root.join("alice_owned.txt"));
    assert_eq!(report.entries[0].grants[0].kind, PermissionKind::Owner);
    assert!(report.entries[0].outcome.is_none());
    Ok(())
}

/// 场景：排除 *.tmp 后 alice.tmp 只计入 excluded
#[tokio::test]
async fn test_excluded_entry_is_never_matched() -> Result<()> {
    let temp_dir = tempfile::TempDir::new()?;
    let root = temp_dir.path();
    fs::write(root.join("alice.tmp"), b"tmp")?;
    let backend = Arc::new(FakeBackend::new().owned_by(root.join("alice.tmp"), ALICE_UID));

    let mut report = AuditReport::new();
    let status = run_audit(
        &params(root, AuditMode::Audit),
        backend,
        alice(),
        Arc::new(ExclusionMatcher::new(["*.tmp"])?),
        CancelToken::never(),
        &mut report,
    )
    .await?;

    assert_eq!(status, AuditStatus::Clean);
    assert_eq!(report.matched, 0);
    assert_eq!(report.excluded, 1);
    assert_eq!(report.scanned, 0);
    Ok(())
}

/// 场景：修复后第二次修复返回 not-found
#[tokio::test]
async fn test_remediate_twice() -> Result<()> {
    let temp_dir = alice_bob_tree();
    let root = temp_dir.path();
    let target = root.join("alice_owned.txt");
    let backend = Arc::new(FakeBackend::new().owned_by(&target, ALICE_UID));
    let exclusions = Arc::new(ExclusionMatcher::empty());

    let mut first = AuditReport::new();
    run_audit(
        &params(root, AuditMode::Remediate),
        backend.clone(),
        alice(),
        exclusions.clone(),
        CancelToken::never(),
        &mut first,
    )
    .await?;

    assert_eq!(first.entries[0].outcome, Some(RemediationOutcome::Removed));
    assert_eq!(first.outcome_count("removed"), 1);
    assert_eq!(backend.owner_of(&target), ROOT_UID);

    // 直接重放同一组授权
    let grants = first.entries[0].grants.clone();
    let remediator = Remediator::new(backend.clone(), exclusions.clone(), root);
    assert_eq!(
        remediator.remediate(&target, &grants),
        RemediationOutcome::NotFound
    );

    // 再次整体运行不再命中
    let mut second = AuditReport::new();
    let status = run_audit(
        &params(root, AuditMode::Remediate),
        backend.clone(),
        alice(),
        exclusions,
        CancelToken::never(),
        &mut second,
    )
    .await?;
    assert_eq!(status, AuditStatus::Clean);
    assert_eq!(*backend.removals.lock().unwrap(), 1);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_changes_nothing() -> Result<()> {
    let temp_dir = alice_bob_tree();
    let root = temp_dir.path();
    let target = root.join("alice_owned.txt");
    let backend = Arc::new(FakeBackend::new().owned_by(&target, ALICE_UID));

    let mut report = AuditReport::new();
    let status = run_audit(
        &params(root, AuditMode::DryRun),
        backend.clone(),
        alice(),
        Arc::new(ExclusionMatcher::empty()),
        CancelToken::never(),
        &mut report,
    )
    .await?;

    assert_eq!(status, AuditStatus::MatchesFound);
    assert_eq!(report.entries[0].preview, Some(Preview::WouldRemove));
    assert_eq!(report.outcome_count("would-remove"), 1);
    assert_eq!(backend.owner_of(&target), ALICE_UID);
    assert_eq!(*backend.removals.lock().unwrap(), 0);
    Ok(())
}

#[tokio::test]
async fn test_excluded_path_is_skipped_by_remediator() -> Result<()> {
    let temp_dir = tempfile::TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("cache"))?;
    fs::write(root.join("cache/alice.bin"), b"x")?;
    let target = root.join("cache/alice.bin");
    let backend = Arc::new(FakeBackend::new().owned_by(&target, ALICE_UID));

    let entry = backend.inspect(&target).unwrap();
    let grants = app::audit::classify(&entry, &alice());
    assert_eq!(grants.len(), 1);

    let remediator = Remediator::new(backend.clone(), Arc::new(ExclusionMatcher::new(["cache/"])?), root);
    assert_eq!(
        remediator.remediate(&target, &grants),
        RemediationOutcome::SkippedExcluded
    );
    assert_eq!(backend.owner_of(&target), ALICE_UID);
    Ok(())
}

/// 单个条目检查失败只被记录，不中断运行
#[tokio::test]
async fn test_inspection_failure_is_recorded() -> Result<()> {
    let temp_dir = alice_bob_tree();
    let root = temp_dir.path();
    fs::write(root.join("secret.txt"), b"s")?;
    let backend = Arc::new(
        FakeBackend::new()
            .owned_by(root.join("alice_owned.txt"), ALICE_UID)
            .unreadable(root.join("secret.txt")),
    );

    let mut report = AuditReport::new();
    let status = run_audit(
        &params(root, AuditMode::Audit),
        backend,
        alice(),
        Arc::new(ExclusionMatcher::empty()),
        CancelToken::never(),
        &mut report,
    )
    .await?;

    assert_eq!(status, AuditStatus::MatchesFound);
    assert_eq!(report.scanned, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].kind, FailureKind::Inspection);
    assert_eq!(report.failures[0].path, root.join("secret.txt"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_root_aborts_before_walk() {
    let temp_dir = alice_bob_tree();
    let mut report = AuditReport::new();
    let result = run_audit(
        &params(&temp_dir.path().join("alice_owned.txt"), AuditMode::Remediate),
        Arc::new(FakeBackend::new()),
        alice(),
        Arc::new(ExclusionMatcher::empty()),
        CancelToken::never(),
        &mut report,
    )
    .await;

    assert!(matches!(result, Err(AuditError::InvalidRoot { .. })));
    assert_eq!(report.scanned, 0);
}

/// 取消后得到带标记的部分报告
#[tokio::test]
async fn test_cancelled_run_is_partial() -> Result<()> {
    let temp_dir = alice_bob_tree();
    let root = temp_dir.path();
    let backend = Arc::new(FakeBackend::new().owned_by(root.join("alice_owned.txt"), ALICE_UID));

    let (canceller, token) = cancellation();
    canceller.cancel();

    let mut report = AuditReport::new();
    let status = run_audit(
        &params(root, AuditMode::Remediate),
        backend.clone(),
        alice(),
        Arc::new(ExclusionMatcher::empty()),
        token,
        &mut report,
    )
    .await?;

    assert!(report.cancelled);
    assert_eq!(status, AuditStatus::Clean);
    assert_eq!(report.scanned, 0);
    assert_eq!(*backend.removals.lock().unwrap(), 0);
    Ok(())
}

/// 并发处理下结果仍按遍历顺序交付，且 matched ⊆ scanned
#[tokio::test]
async fn test_results_follow_walk_order() -> Result<()> {
    let temp_dir = tempfile::TempDir::new()?;
    let root = temp_dir.path();
    let mut backend = FakeBackend::new();
    for i in 0..40 {
        let path = root.join(format!("file_{:02}.txt", i));
        fs::write(&path, b"x")?;
        if i % 3 == 0 {
            backend = backend.owned_by(&path, ALICE_UID);
        }
    }

    struct Collect(Vec<std::path::PathBuf>);
    impl Reporter for Collect {
        fn record(&mut self, result: EntryResult) {
            match result {
                EntryResult::Clean { path, .. } => self.0.push(path),
                EntryResult::Matched(record) => self.0.push(record.path),
                _ => {}
            }
        }
    }

    let mut collected = Collect(Vec::new());
    let mut audit_params = params(root, AuditMode::Audit);
    audit_params.concurrency = 8;
    run_audit(
        &audit_params,
        Arc::new(backend),
        alice(),
        Arc::new(ExclusionMatcher::empty()),
        CancelToken::never(),
        &mut collected,
    )
    .await?;

    let mut sorted = collected.0.clone();
    sorted.sort();
    assert_eq!(collected.0.len(), 40);
    assert_eq!(collected.0, sorted);
    Ok(())
}
