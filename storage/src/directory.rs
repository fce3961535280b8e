use std::collections::HashMap;

/// Resolves numeric ids to principal names and back.
pub trait PrincipalDirectory: Send + Sync {
    fn user_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;
    /// Supplementary members listed for the group.
    fn group_members(&self, gid: u32) -> Vec<String>;
    fn user_id(&self, name: &str) -> Option<u32>;
    fn group_id(&self, name: &str) -> Option<u32>;
}

/// `(uid_t)-1` tells chown to leave the id unchanged, so it never names a
/// real fallback principal.
const UNCHANGED_ID: u32 = u32::MAX;

/// Resolve a configured user, accepting either a name or a numeric uid.
pub fn resolve_user(directory: &dyn PrincipalDirectory, name: &str) -> Option<u32> {
    let uid = match name.parse::<u32>() {
        Ok(uid) => Some(uid),
        Err(_) => directory.user_id(name),
    };
    uid.filter(|uid| *uid != UNCHANGED_ID)
}

/// Resolve a configured group, accepting either a name or a numeric gid.
pub fn resolve_group(directory: &dyn PrincipalDirectory, name: &str) -> Option<u32> {
    let gid = match name.parse::<u32>() {
        Ok(gid) => Some(gid),
        Err(_) => directory.group_id(name),
    };
    gid.filter(|gid| *gid != UNCHANGED_ID)
}

/// Supplementary members followed by primary members not already listed.
fn merge_members(mut members: Vec<String>, primary: &[String]) -> Vec<String> {
    for name in primary {
        if !members.contains(name) {
            members.push(name.clone());
        }
    }
    members
}

/// Fixed principal table, used in place of the system database.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<u32, String>,
    groups: HashMap<u32, (String, Vec<String>)>,
    /// uid -> primary gid
    primary: HashMap<u32, u32>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, uid: u32, name: &str) -> Self {
        self.users.insert(uid, name.to_string());
        self
    }

    /// A user whose primary group is `gid`.
    pub fn with_user_in(mut self, uid: u32, name: &str, gid: u32) -> Self {
        self.users.insert(uid, name.to_string());
        self.primary.insert(uid, gid);
        self
    }

    pub fn with_group(mut self, gid: u32, name: &str, members: &[&str]) -> Self {
        self.groups.insert(
            gid,
            (
                name.to_string(),
                members.iter().map(|m| m.to_string()).collect(),
            ),
        );
        self
    }
}

impl PrincipalDirectory for StaticDirectory {
    fn user_name(&self, uid: u32) -> Option<String> {
        self.users.get(&uid).cloned()
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        self.groups.get(&gid).map(|(name, _)| name.clone())
    }

    fn group_members(&self, gid: u32) -> Vec<String> {
        let supplementary = self
            .groups
            .get(&gid)
            .map(|(_, members)| members.clone())
            .unwrap_or_default();
        let mut primary: Vec<String> = self
            .primary
            .iter()
            .filter(|(_, g)| **g == gid)
            .filter_map(|(uid, _)| self.users.get(uid).cloned())
            .collect();
        primary.sort();
        merge_members(supplementary, &primary)
    }

    fn user_id(&self, name: &str) -> Option<u32> {
        self.users
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(uid, _)| *uid)
    }

    fn group_id(&self, name: &str) -> Option<u32> {
        self.groups
            .iter()
            .find(|(_, (n, _))| n.as_str() == name)
            .map(|(gid, _)| *gid)
    }
}

#[cfg(unix)]
pub use system::SystemDirectory;

#[cfg(unix)]
mod system {
    use super::{merge_members, PrincipalDirectory};
    use dashmap::DashMap;
    use nix::unistd::{Gid, Group, Uid, User};
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    const PASSWD_FILE: &str = "/etc/passwd";

    /// The host's user and group database (passwd/group via NSS), cached
    /// per id for the lifetime of a run.
    ///
    /// Group membership also counts users whose primary gid is the group.
    /// NSS has no safe enumeration API, so that index is read from the
    /// local passwd file.
    pub struct SystemDirectory {
        users: DashMap<u32, Option<String>>,
        groups: DashMap<u32, Option<(String, Vec<String>)>>,
        passwd_file: PathBuf,
        primary: OnceLock<HashMap<u32, Vec<String>>>,
    }

    impl Default for SystemDirectory {
        fn default() -> Self {
            Self::with_passwd_file(PASSWD_FILE)
        }
    }

    impl SystemDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Read primary group memberships from `path` instead of `/etc/passwd`.
        pub fn with_passwd_file(path: impl Into<PathBuf>) -> Self {
            Self {
                users: DashMap::new(),
                groups: DashMap::new(),
                passwd_file: path.into(),
                primary: OnceLock::new(),
            }
        }

        fn primary_members(&self, gid: u32) -> &[String] {
            self.primary
                .get_or_init(|| match fs::read_to_string(&self.passwd_file) {
                    Ok(text) => parse_primary_groups(&text),
                    Err(e) => {
                        log::warn!(
                            "Cannot read {}: {}, primary group members are not resolved",
                            self.passwd_file.display(),
                            e
                        );
                        HashMap::new()
                    }
                })
                .get(&gid)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        }

        fn group(&self, gid: u32) -> Option<(String, Vec<String>)> {
            if let Some(hit) = self.groups.get(&gid) {
                return hit.value().clone();
            }

            let resolved = match Group::from_gid(Gid::from_raw(gid)) {
                Ok(Some(group)) => Some((group.name, group.mem)),
                Ok(None) => None,
                Err(e) => {
                    log::warn!("Group lookup for gid {} failed: {}", gid, e);
                    None
                }
            };
            self.groups.insert(gid, resolved.clone());
            resolved
        }
    }

    impl PrincipalDirectory for SystemDirectory {
        fn user_name(&self, uid: u32) -> Option<String> {
            if let Some(hit) = self.users.get(&uid) {
                return hit.value().clone();
            }

            let name = match User::from_uid(Uid::from_raw(uid)) {
                Ok(Some(user)) => Some(user.name),
                Ok(None) => None,
                Err(e) => {
                    log::warn!("User lookup for uid {} failed: {}", uid, e);
                    None
                }
            };
            self.users.insert(uid, name.clone());
            name
        }

        fn group_name(&self, gid: u32) -> Option<String> {
            self.group(gid).map(|(name, _)| name)
        }

        fn group_members(&self, gid: u32) -> Vec<String> {
            let supplementary = self.group(gid).map(|(_, members)| members).unwrap_or_default();
            merge_members(supplementary, self.primary_members(gid))
        }

        fn user_id(&self, name: &str) -> Option<u32> {
            User::from_name(name).ok().flatten().map(|u| u.uid.as_raw())
        }

        fn group_id(&self, name: &str) -> Option<u32> {
            Group::from_name(name).ok().flatten().map(|g| g.gid.as_raw())
        }
    }

    /// `name:passwd:uid:gid:gecos:home:shell` lines, indexed by gid.
    pub(super) fn parse_primary_groups(text: &str) -> HashMap<u32, Vec<String>> {
        let mut index: HashMap<u32, Vec<String>> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 || fields[0].is_empty() {
                continue;
            }
            // NIS compat entries (+name, -name) carry no usable gid
            let Ok(gid) = fields[3].parse::<u32>() else { continue };
            index.entry(gid).or_default().push(fields[0].to_string());
        }
        index
    }
}
