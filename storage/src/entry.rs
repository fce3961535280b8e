use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::FileType;
use std::path::PathBuf;

/// Filesystem node type as seen by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::Regular
        } else {
            EntryKind::Other
        }
    }

    /// Only regular files and directories carry POSIX ACLs.
    pub fn carries_acl(self) -> bool {
        matches!(self, EntryKind::Regular | EntryKind::Directory)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Regular => write!(f, "file"),
            EntryKind::Directory => write!(f, "dir"),
            EntryKind::Symlink => write!(f, "symlink"),
            EntryKind::Other => write!(f, "other"),
        }
    }
}

/// A numeric user or group id together with its resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: u32,
    pub name: Option<String>,
}

impl Principal {
    pub fn new(id: u32, name: Option<String>) -> Self {
        Self { id, name }
    }

    /// Identity key used for matching: the name when it resolves, the
    /// decimal id for orphaned ids.
    pub fn key(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}({})", name, self.id),
            None => write!(f, "#{}", self.id),
        }
    }
}

/// Which ACL an entry belongs to. Default ACLs only exist on directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclScope {
    Access,
    Default,
}

/// Class of a named ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclClass {
    User,
    Group,
}

/// A named (qualified) ACL entry after principal resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedAclEntry {
    pub scope: AclScope,
    pub class: AclClass,
    pub principal: Principal,
    /// rwx bits, read = 4, write = 2, execute = 1
    pub perms: u16,
}

/// Read-only snapshot of an entry's access-control state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub owner: Principal,
    pub group: Principal,
    /// Members of the owning group: supplementary members and users whose
    /// primary group it is.
    pub group_members: Vec<String>,
    pub mode: u32,
    /// `group::` entry of the access ACL, when one exists. The mode's group
    /// bits are then the ACL mask.
    #[serde(default)]
    pub acl_group_obj: Option<u16>,
    pub acl: Vec<NamedAclEntry>,
}

impl FileEntry {
    /// Effective rwx bits of the owning group.
    pub fn group_bits(&self) -> u32 {
        let class = (self.mode >> 3) & 0o7;
        match self.acl_group_obj {
            Some(perms) => u32::from(perms) & 0o7 & class,
            None => class,
        }
    }

    /// Whether `grant` is still attached to this snapshot.
    pub fn has_grant(&self, grant: &Grant) -> bool {
        match grant.slot {
            GrantSlot::Owner { uid } => self.owner.id == uid,
            GrantSlot::OwningGroup {
                gid,
                via_member: false,
            } => self.group.id == gid,
            GrantSlot::OwningGroup {
                gid,
                via_member: true,
            } => {
                self.group.id == gid
                    && self.group_bits() != 0
                    && self.group_members.iter().any(|m| *m == grant.principal)
            }
            GrantSlot::AclUser { scope, uid } => {
                self.acl_perms(scope, AclClass::User, uid) & grant.kind.acl_bits() != 0
            }
            GrantSlot::AclGroup { scope, gid } => {
                self.acl_perms(scope, AclClass::Group, gid) & grant.kind.acl_bits() != 0
            }
        }
    }

    fn acl_perms(&self, scope: AclScope, class: AclClass, id: u32) -> u16 {
        self.acl
            .iter()
            .find(|e| e.scope == scope && e.class == class && e.principal.id == id)
            .map(|e| e.perms)
            .unwrap_or(0)
    }
}

/// Permission kind of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionKind {
    Owner,
    GroupMember,
    AclRead,
    AclWrite,
    AclExecute,
    AclFull,
}

impl PermissionKind {
    /// ACL permission bits covered by this kind; zero for non-ACL kinds.
    pub fn acl_bits(self) -> u16 {
        match self {
            PermissionKind::AclRead => 0o4,
            PermissionKind::AclWrite => 0o2,
            PermissionKind::AclExecute => 0o1,
            PermissionKind::AclFull => 0o7,
            PermissionKind::Owner | PermissionKind::GroupMember => 0,
        }
    }

    /// Split an ACL permission set into grant kinds.
    pub fn for_acl_perms(perms: u16) -> Vec<PermissionKind> {
        let perms = perms & 0o7;
        if perms == 0o7 {
            return vec![PermissionKind::AclFull];
        }
        [
            PermissionKind::AclRead,
            PermissionKind::AclWrite,
            PermissionKind::AclExecute,
        ]
        .into_iter()
        .filter(|kind| perms & kind.acl_bits() != 0)
        .collect()
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionKind::Owner => "owner",
            PermissionKind::GroupMember => "group-member",
            PermissionKind::AclRead => "acl-read",
            PermissionKind::AclWrite => "acl-write",
            PermissionKind::AclExecute => "acl-execute",
            PermissionKind::AclFull => "acl-full",
        };
        f.write_str(s)
    }
}

/// The metadata slot carrying a grant, precise enough to remove only it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "slot", rename_all = "snake_case")]
pub enum GrantSlot {
    Owner { uid: u32 },
    /// `via_member` is set when the revoked principal is a member of the
    /// owning group rather than the group itself.
    OwningGroup { gid: u32, via_member: bool },
    AclUser { scope: AclScope, uid: u32 },
    AclGroup { scope: AclScope, gid: u32 },
}

/// A permission attributable to a revoked identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    /// The revoked identity this grant matched.
    pub principal: String,
    pub kind: PermissionKind,
    pub slot: GrantSlot,
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            GrantSlot::AclUser {
                scope: AclScope::Default,
                ..
            }
            | GrantSlot::AclGroup {
                scope: AclScope::Default,
                ..
            } => write!(f, "{}:{} (default)", self.principal, self.kind),
            GrantSlot::OwningGroup {
                via_member: true, ..
            } => write!(f, "{}:{} (via membership)", self.principal, self.kind),
            _ => write!(f, "{}:{}", self.principal, self.kind),
        }
    }
}

/// Result of a single remediation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "kebab-case")]
pub enum RemediationOutcome {
    Removed,
    NotFound,
    PermissionDenied,
    UnsupportedFilesystem,
    SkippedExcluded,
    Failed(String),
}

impl RemediationOutcome {
    /// Stable tally key, without the failure reason.
    pub fn label(&self) -> &'static str {
        match self {
            RemediationOutcome::Removed => "removed",
            RemediationOutcome::NotFound => "not-found",
            RemediationOutcome::PermissionDenied => "permission-denied",
            RemediationOutcome::UnsupportedFilesystem => "unsupported-filesystem",
            RemediationOutcome::SkippedExcluded => "skipped-excluded",
            RemediationOutcome::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for RemediationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> FileEntry {
        FileEntry {
            path: PathBuf::from("/srv/data/report.txt"),
            kind: EntryKind::Regular,
            owner: Principal::new(1001, Some("alice".into())),
            group: Principal::new(2000, Some("staff".into())),
            group_members: vec!["alice".into(), "carol".into()],
            mode: 0o640,
            acl_group_obj: None,
            acl: vec![NamedAclEntry {
                scope: AclScope::Access,
                class: AclClass::User,
                principal: Principal::new(1002, Some("bob".into())),
                perms: 0o5,
            }],
        }
    }

    #[test]
    fn acl_perms_split_into_kinds() {
        assert_eq!(PermissionKind::for_acl_perms(0o7), vec![PermissionKind::AclFull]);
        assert_eq!(
            PermissionKind::for_acl_perms(0o5),
            vec![PermissionKind::AclRead, PermissionKind::AclExecute]
        );
        assert!(PermissionKind::for_acl_perms(0).is_empty());
    }

    #[test]
    fn principal_key_falls_back_to_id() {
        assert_eq!(Principal::new(1001, Some("alice".into())).key(), "alice");
        assert_eq!(Principal::new(4242, None).key(), "4242");
    }

    #[test]
    fn has_grant_tracks_slots() {
        let e = entry();
        let owner = Grant {
            principal: "alice".into(),
            kind: PermissionKind::Owner,
            slot: GrantSlot::Owner { uid: 1001 },
        };
        assert!(e.has_grant(&owner));

        let member = Grant {
            principal: "carol".into(),
            kind: PermissionKind::GroupMember,
            slot: GrantSlot::OwningGroup {
                gid: 2000,
                via_member: true,
            },
        };
        assert!(e.has_grant(&member));

        let acl_read = Grant {
            principal: "bob".into(),
            kind: PermissionKind::AclRead,
            slot: GrantSlot::AclUser {
                scope: AclScope::Access,
                uid: 1002,
            },
        };
        let acl_write = Grant {
            kind: PermissionKind::AclWrite,
            ..acl_read.clone()
        };
        assert!(e.has_grant(&acl_read));
        assert!(!e.has_grant(&acl_write));

        let mut no_group_bits = e.clone();
        no_group_bits.mode = 0o600;
        assert!(!no_group_bits.has_grant(&member));
    }

    #[test]
    fn group_bits_use_group_entry_under_acl() {
        let mut e = entry();
        assert_eq!(e.group_bits(), 0o4);

        // group::--- with mask rwx
        e.mode = 0o670;
        e.acl_group_obj = Some(0);
        assert_eq!(e.group_bits(), 0);

        // group::rwx limited by mask r--
        e.mode = 0o640;
        e.acl_group_obj = Some(0o7);
        assert_eq!(e.group_bits(), 0o4);
    }

    #[test]
    fn outcome_serializes_kebab_case() {
        let json = serde_json::to_string(&RemediationOutcome::UnsupportedFilesystem).unwrap();
        assert_eq!(json, r#"{"outcome":"unsupported-filesystem"}"#);
    }
}
