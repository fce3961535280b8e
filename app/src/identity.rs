use std::collections::BTreeSet;

use crate::error::AuditError;

/// 被吊销的身份集合，构建后不可变，大小写敏感
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    identities: BTreeSet<String>,
}

impl IdentitySet {
    /// 每个值去除首尾空白后不能为空，重复值自动去重
    pub fn new<I, S>(values: I) -> Result<Self, AuditError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut identities = BTreeSet::new();
        for (index, value) in values.into_iter().enumerate() {
            let value = value.as_ref().trim();
            if value.is_empty() {
                return Err(AuditError::InvalidInput(format!(
                    "identity #{} is empty",
                    index + 1
                )));
            }
            identities.insert(value.to_string());
        }
        Ok(Self { identities })
    }

    /// 解析每行一个身份的列表，跳过空行
    pub fn from_lines(text: &str) -> Result<Self, AuditError> {
        let set = Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))?;
        if set.is_empty() {
            return Err(AuditError::InvalidInput(
                "identity list contains no entries".to_string(),
            ));
        }
        log::debug!("Loaded {} revoked identities", set.len());
        Ok(set)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(String::as_str)
    }
}
