//! gitignore 风格的排除规则匹配器
//!
//! 规则按顺序编译为一个 `GlobSet`，最后一条命中的规则决定结果。
//! 被排除目录下的路径始终被排除，与 git 的行为一致。

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use storage::PathFilter;

use crate::error::AuditError;

#[derive(Debug, Clone, Copy)]
struct Rule {
    negated: bool,
    dir_only: bool,
}

#[derive(Debug, Clone)]
pub struct ExclusionMatcher {
    set: GlobSet,
    rules: Vec<Rule>,
}

impl Default for ExclusionMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

impl ExclusionMatcher {
    /// 不排除任何路径
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            rules: Vec::new(),
        }
    }

    pub fn new<I, S>(patterns: I) -> Result<Self, AuditError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut rules = Vec::new();

        for line in patterns {
            let line = line.as_ref();
            let Some((glob, rule)) = parse_pattern(line) else {
                continue;
            };
            let compiled = GlobBuilder::new(&glob)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    AuditError::InvalidInput(format!(
                        "invalid exclusion pattern '{}': {}",
                        line.trim(),
                        e
                    ))
                })?;
            log::debug!("Exclusion pattern '{}' compiled as '{}'", line.trim(), glob);
            builder.add(compiled);
            rules.push(rule);
        }

        let set = builder
            .build()
            .map_err(|e| AuditError::InvalidInput(format!("exclusion set build error: {}", e)))?;
        Ok(Self { set, rules })
    }

    /// 每行一条规则的排除文件内容
    pub fn from_lines(text: &str) -> Result<Self, AuditError> {
        Self::new(text.lines())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `true` 表示排除。目录以结尾的 `/` 标识。
    pub fn matches(&self, relative_path: &str) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let normalized = relative_path.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./").trim_start_matches('/');
        let is_dir = normalized.ends_with('/');
        let path = normalized.trim_end_matches('/');
        if path.is_empty() {
            return false;
        }

        // 任一父目录被排除，则整个子树被排除
        for (idx, _) in path.match_indices('/') {
            if self.decide(&path[..idx], true) == Some(true) {
                return true;
            }
        }

        self.decide(path, is_dir).unwrap_or(false)
    }

    /// 最后一条适用规则的结论；没有规则命中时返回 `None`
    fn decide(&self, path: &str, is_dir: bool) -> Option<bool> {
        self.set
            .matches(path)
            .into_iter()
            .filter(|&idx| is_dir || !self.rules[idx].dir_only)
            .max()
            .map(|idx| !self.rules[idx].negated)
    }
}

impl PathFilter for ExclusionMatcher {
    fn is_excluded(&self, relative: &str) -> bool {
        self.matches(relative)
    }
}

/// 将一行 gitignore 规则转换为 glob；空行和注释返回 `None`
fn parse_pattern(line: &str) -> Option<(String, Rule)> {
    let mut pattern = line.trim();
    if pattern.is_empty() || pattern.starts_with('#') {
        return None;
    }

    let mut negated = false;
    if let Some(rest) = pattern.strip_prefix('\\') {
        // \# 与 \! 表示字面量
        pattern = rest;
    } else if let Some(rest) = pattern.strip_prefix('!') {
        negated = true;
        pattern = rest;
    }

    let dir_only = pattern.ends_with('/');
    let pattern = pattern.trim_end_matches('/');
    if pattern.is_empty() {
        return None;
    }

    // 开头或中间出现 `/` 时锚定到根目录
    let glob = if pattern.contains('/') {
        pattern.trim_start_matches('/').to_string()
    } else {
        format!("**/{}", pattern)
    };

    Some((glob, Rule { negated, dir_only }))
}
