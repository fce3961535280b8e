use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

use super::error::Result;

// 全局配置构建器，所有层（默认值、配置文件、环境变量、命令行覆盖）都合并到这里
lazy_static! {
    pub static ref BUILDER: RwLock<ConfigBuilder<DefaultState>> = RwLock::new(Config::builder());
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// debug, info, warn, error
    pub level: String,
    /// 日志文件路径，为空时不写文件
    #[serde(default)]
    pub file: String,
}

/// 审计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Number of entries inspected in parallel.
    pub concurrency: usize,
    /// Descend into symlinked directories whose target stays under the root.
    pub follow_symlinks: bool,
}

/// 修复配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Account that takes over files owned by a revoked user. Empty disables owner reassignment.
    pub fallback_owner: String,
    /// Group that takes over files whose owning group is revoked. Empty disables it.
    pub fallback_group: String,
}

/// `PERMSWEEP_AUDIT__CONCURRENCY=4` style overrides.
fn environment() -> Environment {
    Environment::with_prefix("PERMSWEEP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub log: LogConfig,
    pub audit: AuditConfig,
    pub remediation: RemediationConfig,
}

impl AppConfig {
    /// Initialize AppConfig from the embedded defaults plus `PERMSWEEP_*` environment variables.
    pub fn init(default_config: Option<&str>) -> Result<()> {
        let mut builder = Config::builder();

        if let Some(config_contents) = default_config {
            builder = builder.add_source(File::from_str(config_contents, FileFormat::Toml));
        }

        builder = builder.add_source(environment());

        {
            let mut w = BUILDER.write()?;
            *w = builder;
        }

        Ok(())
    }

    /// Layer a user supplied configuration file over the current settings.
    pub fn merge_config(config_file: Option<&Path>) -> Result<()> {
        if let Some(config_file_path) = config_file {
            let mut w = BUILDER.write()?;
            // 环境变量优先于配置文件
            *w = w
                .to_owned()
                .add_source(File::from(config_file_path))
                .add_source(environment());
        }
        Ok(())
    }

    /// Apply the global flags shared by every subcommand.
    pub fn merge_args(app: &clap::ArgMatches) -> Result<()> {
        if let Ok(Some(level)) = app.try_get_one::<String>("log_level") {
            AppConfig::set("log.level", level)?;
        }
        if let Ok(Some(file)) = app.try_get_one::<String>("log_file") {
            AppConfig::set("log.file", file)?;
        }
        Ok(())
    }

    /// Set a configuration override.
    pub fn set(key: &str, value: &str) -> Result<()> {
        {
            let mut w = BUILDER.write()?;
            *w = w.to_owned().set_override(key, value)?;
        }
        Ok(())
    }

    /// Get a single value.
    pub fn get<'de, T>(key: &'de str) -> Result<T>
    where
        T: serde::Deserialize<'de>,
    {
        Ok(BUILDER.read()?.to_owned().build()?.get::<T>(key)?)
    }

    /// Build the typed configuration from every layer.
    pub fn fetch() -> Result<AppConfig> {
        let cfg = BUILDER.read()?.to_owned().build()?;
        let app_config: AppConfig = cfg.try_deserialize()?;
        Ok(app_config)
    }
}
