use std::fs;
use std::path::Path;
use std::sync::Arc;

use app::prelude::*;
use storage::RemediationPolicy;
use utils::app_config::AppConfig;
use utils::error::{Error, Result};

use crate::TargetArgs;

pub async fn audit_cmd(target: TargetArgs, mode: AuditMode) -> Result<AuditStatus> {
    let config = AppConfig::fetch()?;

    let identities = load_identities(&target.users)?;
    let exclusions = load_exclusions(target.exclude.as_deref())?;

    let params = AuditParams {
        root: target.directory,
        mode,
        concurrency: target.concurrency.unwrap_or(config.audit.concurrency),
        follow_symlinks: target.follow_symlinks || config.audit.follow_symlinks,
    };

    // 纯审计不需要接管账户，避免因回退账户不存在而无法运行
    let policy = match mode {
        AuditMode::Audit => RemediationPolicy::default(),
        AuditMode::DryRun | AuditMode::Remediate => RemediationPolicy::from_config(
            &config.remediation.fallback_owner,
            &config.remediation.fallback_group,
        ),
    };
    let backend = storage::default_backend(&policy).map_err(AuditError::from)?;

    let (canceller, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after in-flight entries");
            canceller.cancel();
        }
    });

    let mut report = AuditReport::new();
    let status = run_audit(
        &params,
        backend,
        Arc::new(identities),
        Arc::new(exclusions),
        token,
        &mut report,
    )
    .await?;

    if target.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::with_source("Failed to serialize report", Box::new(e)))?;
        println!("{}", json);
    } else {
        println!("{}", report);
    }

    Ok(status)
}

fn read_list(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Error::with_source(
            &format!("Failed to read {} {}", what, path.display()),
            Box::new(e),
        )
    })
}

fn load_identities(path: &Path) -> Result<IdentitySet> {
    let text = read_list(path, "identity list")?;
    Ok(IdentitySet::from_lines(&text)?)
}

fn load_exclusions(path: Option<&Path>) -> Result<ExclusionMatcher> {
    match path {
        Some(path) => {
            let text = read_list(path, "exclusion file")?;
            let matcher = ExclusionMatcher::from_lines(&text)?;
            log::debug!("Loaded exclusions from {}", path.display());
            Ok(matcher)
        }
        None => Ok(ExclusionMatcher::empty()),
    }
}
