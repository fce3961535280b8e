use nix::errno::Errno;
use nix::sys::stat::{fchmodat, FchmodatFlags, Mode};
use nix::unistd::{fchownat, FchownatFlags, Gid, Uid};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::acl::{AclTag, PosixAcl};
use crate::backend::{PermissionBackend, RemediationPolicy};
use crate::directory::{resolve_group, resolve_user, PrincipalDirectory};
use crate::entry::{
    AclClass, AclScope, EntryKind, FileEntry, Grant, GrantSlot, NamedAclEntry, Principal,
    RemediationOutcome,
};
use crate::error::{BackendError, InspectionError};

/// Owner, group, mode bits and (on Linux) POSIX ACLs.
pub struct PosixBackend {
    directory: Arc<dyn PrincipalDirectory>,
    fallback_uid: Option<u32>,
    fallback_gid: Option<u32>,
}

/// Raw metadata read in one pass, before principal resolution.
struct RawState {
    path: PathBuf,
    kind: EntryKind,
    uid: u32,
    gid: u32,
    mode: u32,
    access: Option<PosixAcl>,
    default: Option<PosixAcl>,
}

impl PosixBackend {
    pub fn new(
        directory: Arc<dyn PrincipalDirectory>, policy: &RemediationPolicy,
    ) -> Result<Self, BackendError> {
        let fallback_uid = match &policy.fallback_owner {
            Some(name) => Some(resolve_user(directory.as_ref(), name).ok_or_else(|| {
                BackendError::UnknownPrincipal {
                    kind: "user",
                    name: name.clone(),
                }
            })?),
            None => None,
        };
        let fallback_gid = match &policy.fallback_group {
            Some(name) => Some(resolve_group(directory.as_ref(), name).ok_or_else(|| {
                BackendError::UnknownPrincipal {
                    kind: "group",
                    name: name.clone(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            directory,
            fallback_uid,
            fallback_gid,
        })
    }

    fn read_raw(&self, path: &Path) -> Result<RawState, InspectionError> {
        let meta = fs::symlink_metadata(path).map_err(|e| InspectionError::from_io(path, e))?;
        let kind = EntryKind::from_file_type(meta.file_type());

        let (access, default) = if kind.carries_acl() {
            let access = read_acl(path, crate::acl::ACL_ACCESS_XATTR)?;
            let default = if kind == EntryKind::Directory {
                read_acl(path, crate::acl::ACL_DEFAULT_XATTR)?
            } else {
                None
            };
            (access, default)
        } else {
            (None, None)
        };

        Ok(RawState {
            path: path.to_path_buf(),
            kind,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & 0o7777,
            access,
            default,
        })
    }

    fn snapshot(&self, raw: &RawState) -> FileEntry {
        let mut acl = Vec::new();
        for (scope, source) in [
            (AclScope::Access, &raw.access),
            (AclScope::Default, &raw.default),
        ] {
            let Some(source) = source else { continue };
            for entry in source.named() {
                let id = entry.id.unwrap_or(u32::MAX);
                let (class, name) = match entry.tag {
                    AclTag::User => (AclClass::User, self.directory.user_name(id)),
                    _ => (AclClass::Group, self.directory.group_name(id)),
                };
                acl.push(NamedAclEntry {
                    scope,
                    class,
                    principal: Principal::new(id, name),
                    perms: entry.perm,
                });
            }
        }

        FileEntry {
            path: raw.path.clone(),
            kind: raw.kind,
            owner: Principal::new(raw.uid, self.directory.user_name(raw.uid)),
            group: Principal::new(raw.gid, self.directory.group_name(raw.gid)),
            group_members: self.directory.group_members(raw.gid),
            mode: raw.mode,
            acl_group_obj: raw.access.as_ref().and_then(PosixAcl::group_obj),
            acl,
        }
    }
}

impl PermissionBackend for PosixBackend {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn inspect(&self, path: &Path) -> Result<FileEntry, InspectionError> {
        let raw = self.read_raw(path)?;
        Ok(self.snapshot(&raw))
    }

    fn supports(&self, entry: &FileEntry, grant: &Grant) -> bool {
        match grant.slot {
            GrantSlot::Owner { .. } => self.fallback_uid.is_some_and(|uid| uid != entry.owner.id),
            GrantSlot::OwningGroup {
                via_member: false, ..
            } => self.fallback_gid.is_some_and(|gid| gid != entry.group.id),
            // Dropping one member from a group cannot be expressed on a single file.
            GrantSlot::OwningGroup {
                via_member: true, ..
            } => false,
            GrantSlot::AclUser { .. } | GrantSlot::AclGroup { .. } => {
                cfg!(target_os = "linux") && entry.kind.carries_acl()
            }
        }
    }

    fn remove_grants(&self, path: &Path, grants: &[Grant]) -> RemediationOutcome {
        // Fresh read inside the call; nothing from the walk phase is reused.
        let raw = match self.read_raw(path) {
            Ok(raw) => raw,
            Err(e) => return outcome_for_inspection(&e),
        };
        let fresh = self.snapshot(&raw);

        let present: Vec<&Grant> = grants.iter().filter(|g| fresh.has_grant(g)).collect();
        if present.is_empty() {
            log::debug!("No targeted grant left on {}", path.display());
            return RemediationOutcome::NotFound;
        }

        if let Some(grant) = present.iter().find(|g| !self.supports(&fresh, g)) {
            log::warn!(
                "Cannot remove {} from {} precisely, leaving entry untouched",
                grant,
                path.display()
            );
            return RemediationOutcome::UnsupportedFilesystem;
        }

        let mut access = raw.access.clone();
        let mut default = raw.default.clone();
        let mut new_uid = None;
        let mut new_gid = None;

        for grant in &present {
            match grant.slot {
                GrantSlot::Owner { .. } => new_uid = self.fallback_uid,
                GrantSlot::OwningGroup { .. } => new_gid = self.fallback_gid,
                GrantSlot::AclUser { scope, uid } => {
                    let acl = if scope == AclScope::Access { &mut access } else { &mut default };
                    if let Some(acl) = acl.as_mut() {
                        acl.revoke(AclTag::User, uid, grant.kind.acl_bits());
                    }
                }
                GrantSlot::AclGroup { scope, gid } => {
                    let acl = if scope == AclScope::Access { &mut access } else { &mut default };
                    if let Some(acl) = acl.as_mut() {
                        acl.revoke(AclTag::Group, gid, grant.kind.acl_bits());
                    }
                }
            }
        }

        let plan = Plan {
            owner: (new_uid.is_some() || new_gid.is_some()).then_some((new_uid, new_gid)),
            access: access.filter(|acl| raw.access.as_ref() != Some(acl)),
            default: default.filter(|acl| raw.default.as_ref() != Some(acl)),
        };

        let outcome = apply(&NativeWriter, &raw, &plan);
        if outcome == RemediationOutcome::Removed {
            log::info!("Removed {} grant(s) from {}", present.len(), path.display());
        }
        outcome
    }
}

/// Metadata changes for one entry, computed from a fresh read.
#[derive(Debug, Default)]
struct Plan {
    owner: Option<(Option<u32>, Option<u32>)>,
    access: Option<PosixAcl>,
    default: Option<PosixAcl>,
}

/// The metadata writes `apply` performs.
trait MetadataWriter {
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<(), Errno>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<(), Errno>;
    fn write_acl(&self, path: &Path, attr: &str, acl: &PosixAcl) -> io::Result<()>;
}

struct NativeWriter;

impl MetadataWriter for NativeWriter {
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<(), Errno> {
        fchownat(
            None,
            path,
            uid.map(Uid::from_raw),
            gid.map(Gid::from_raw),
            FchownatFlags::NoFollowSymlink,
        )
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), Errno> {
        fchmodat(
            None,
            path,
            Mode::from_bits_truncate(mode as nix::sys::stat::mode_t),
            FchmodatFlags::FollowSymlink,
        )
    }

    fn write_acl(&self, path: &Path, attr: &str, acl: &PosixAcl) -> io::Result<()> {
        write_acl(path, attr, acl)
    }
}

/// Apply `plan` all-or-nothing.
///
/// Ownership changes first: chown is the write most likely to be refused,
/// and a refusal there leaves the entry untouched. When a later ACL write
/// fails, the writes already made are restored before returning.
fn apply(writer: &dyn MetadataWriter, raw: &RawState, plan: &Plan) -> RemediationOutcome {
    if let Some((uid, gid)) = plan.owner {
        if let Err(errno) = writer.chown(&raw.path, uid, gid) {
            return outcome_for_errno(errno);
        }
    }

    let mut written: Vec<(&str, &PosixAcl)> = Vec::new();
    for (attr, target, original) in [
        (crate::acl::ACL_ACCESS_XATTR, &plan.access, &raw.access),
        (crate::acl::ACL_DEFAULT_XATTR, &plan.default, &raw.default),
    ] {
        let (Some(target), Some(original)) = (target, original) else {
            continue;
        };
        if let Err(e) = writer.write_acl(&raw.path, attr, target) {
            let outcome = outcome_for_io(&e);
            return match rollback(writer, raw, plan, &written) {
                Ok(()) => outcome,
                Err(reason) => RemediationOutcome::Failed(format!(
                    "{} after a partial change, restore failed: {}",
                    outcome, reason
                )),
            };
        }
        written.push((attr, original));
    }

    RemediationOutcome::Removed
}

fn rollback(
    writer: &dyn MetadataWriter, raw: &RawState, plan: &Plan, written: &[(&str, &PosixAcl)],
) -> Result<(), String> {
    let mut errors = Vec::new();

    for (attr, original) in written.iter().rev() {
        if let Err(e) = writer.write_acl(&raw.path, attr, original) {
            errors.push(format!("{}: {}", attr, e));
        }
    }

    if plan.owner.is_some() {
        match writer.chown(&raw.path, Some(raw.uid), Some(raw.gid)) {
            // chown drops setuid/setgid bits
            Ok(()) if raw.mode & 0o6000 != 0 && raw.kind != EntryKind::Symlink => {
                if let Err(errno) = writer.chmod(&raw.path, raw.mode) {
                    errors.push(format!("mode: {}", errno.desc()));
                }
            }
            Ok(()) => {}
            Err(errno) => errors.push(format!("owner: {}", errno.desc())),
        }
    }

    if errors.is_empty() {
        log::warn!("Restored {} after a failed rewrite", raw.path.display());
        Ok(())
    } else {
        log::error!(
            "Could not restore {} after a failed rewrite: {}",
            raw.path.display(),
            errors.join(", ")
        );
        Err(errors.join(", "))
    }
}

#[cfg(target_os = "linux")]
fn read_acl(path: &Path, attr: &str) -> Result<Option<PosixAcl>, InspectionError> {
    match xattr::get(path, attr) {
        Ok(Some(bytes)) => PosixAcl::decode(&bytes)
            .map(Some)
            .map_err(|e| InspectionError::Io {
                path: path.to_path_buf(),
                reason: format!("malformed {}: {}", attr, e),
            }),
        Ok(None) => Ok(None),
        // Filesystem without ACL support: nothing to inspect.
        Err(e) if is_unsupported(&e) => Ok(None),
        Err(e) => Err(InspectionError::from_io(path, e)),
    }
}

#[cfg(not(target_os = "linux"))]
fn read_acl(_path: &Path, _attr: &str) -> Result<Option<PosixAcl>, InspectionError> {
    Ok(None)
}

#[cfg(target_os = "linux")]
fn write_acl(path: &Path, attr: &str, acl: &PosixAcl) -> io::Result<()> {
    xattr::set(path, attr, &acl.encode())
}

#[cfg(not(target_os = "linux"))]
fn write_acl(_path: &Path, _attr: &str, _acl: &PosixAcl) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

fn is_unsupported(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => {
            let errno = Errno::from_i32(code);
            errno == Errno::EOPNOTSUPP || errno == Errno::ENOTSUP
        }
        None => err.kind() == io::ErrorKind::Unsupported,
    }
}

fn outcome_for_errno(errno: Errno) -> RemediationOutcome {
    if errno == Errno::ENOENT {
        RemediationOutcome::NotFound
    } else if errno == Errno::EPERM || errno == Errno::EACCES || errno == Errno::EROFS {
        RemediationOutcome::PermissionDenied
    } else if errno == Errno::EOPNOTSUPP || errno == Errno::ENOTSUP {
        RemediationOutcome::UnsupportedFilesystem
    } else {
        RemediationOutcome::Failed(errno.desc().to_string())
    }
}

fn outcome_for_io(err: &io::Error) -> RemediationOutcome {
    match err.raw_os_error() {
        Some(code) => outcome_for_errno(Errno::from_i32(code)),
        None if err.kind() == io::ErrorKind::Unsupported => RemediationOutcome::UnsupportedFilesystem,
        None => RemediationOutcome::Failed(err.to_string()),
    }
}

fn outcome_for_inspection(err: &InspectionError) -> RemediationOutcome {
    match err {
        InspectionError::Vanished { .. } => RemediationOutcome::NotFound,
        InspectionError::PermissionDenied { .. } => RemediationOutcome::PermissionDenied,
        InspectionError::Unsupported { .. } => RemediationOutcome::UnsupportedFilesystem,
        InspectionError::Io { reason, .. } => RemediationOutcome::Failed(reason.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AclEntry, ACL_ACCESS_XATTR, ACL_DEFAULT_XATTR};
    use std::cell::RefCell;

    /// Records every write; refuses the ones it is told to.
    #[derive(Default)]
    struct RecordingWriter {
        calls: RefCell<Vec<String>>,
        refuse_chown: Option<Errno>,
        refuse_attr: Option<&'static str>,
        refuse_restore: bool,
        acls: RefCell<Vec<(String, PosixAcl)>>,
    }

    impl MetadataWriter for RecordingWriter {
        fn chown(&self, _path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<(), Errno> {
            self.calls.borrow_mut().push(format!("chown {:?} {:?}", uid, gid));
            match self.refuse_chown {
                Some(errno) => Err(errno),
                None => Ok(()),
            }
        }

        fn chmod(&self, _path: &Path, mode: u32) -> Result<(), Errno> {
            self.calls.borrow_mut().push(format!("chmod {:o}", mode));
            Ok(())
        }

        fn write_acl(&self, _path: &Path, attr: &str, acl: &PosixAcl) -> io::Result<()> {
            let restoring = self.acls.borrow().iter().any(|(a, _)| a == attr);
            self.calls.borrow_mut().push(format!("write {}", attr));
            if self.refuse_attr == Some(attr) || (restoring && self.refuse_restore) {
                return Err(io::Error::from_raw_os_error(Errno::EPERM as i32));
            }
            self.acls.borrow_mut().push((attr.to_string(), acl.clone()));
            Ok(())
        }
    }

    fn acl_with(uid: u32) -> PosixAcl {
        PosixAcl::from_entries(vec![
            AclEntry::new(AclTag::UserObj, 0o6, None),
            AclEntry::new(AclTag::User, 0o7, Some(uid)),
            AclEntry::new(AclTag::GroupObj, 0o4, None),
            AclEntry::new(AclTag::Mask, 0o7, None),
            AclEntry::new(AclTag::Other, 0, None),
        ])
    }

    fn stripped() -> PosixAcl {
        let mut acl = acl_with(4242);
        acl.revoke(AclTag::User, 4242, 0o7);
        acl
    }

    fn raw_dir(mode: u32) -> RawState {
        RawState {
            path: PathBuf::from("/srv/share"),
            kind: EntryKind::Directory,
            uid: 1000,
            gid: 1000,
            mode,
            access: Some(acl_with(4242)),
            default: Some(acl_with(4242)),
        }
    }

    fn full_plan() -> Plan {
        Plan {
            owner: Some((Some(0), None)),
            access: Some(stripped()),
            default: Some(stripped()),
        }
    }

    #[test]
    fn refused_chown_changes_nothing() {
        let writer = RecordingWriter {
            refuse_chown: Some(Errno::EPERM),
            ..Default::default()
        };
        let outcome = apply(&writer, &raw_dir(0o750), &full_plan());

        assert_eq!(outcome, RemediationOutcome::PermissionDenied);
        assert_eq!(*writer.calls.borrow(), vec!["chown Some(0) None"]);
        assert!(writer.acls.borrow().is_empty());
    }

    #[test]
    fn all_writes_succeed() {
        let writer = RecordingWriter::default();
        assert_eq!(
            apply(&writer, &raw_dir(0o750), &full_plan()),
            RemediationOutcome::Removed
        );
        assert_eq!(
            *writer.calls.borrow(),
            vec![
                "chown Some(0) None".to_string(),
                format!("write {}", ACL_ACCESS_XATTR),
                format!("write {}", ACL_DEFAULT_XATTR),
            ]
        );
    }

    #[test]
    fn failed_default_acl_restores_earlier_writes() {
        let writer = RecordingWriter {
            refuse_attr: Some(ACL_DEFAULT_XATTR),
            ..Default::default()
        };
        let raw = raw_dir(0o2750);
        let outcome = apply(&writer, &raw, &full_plan());

        assert_eq!(outcome, RemediationOutcome::PermissionDenied);
        assert_eq!(
            *writer.calls.borrow(),
            vec![
                "chown Some(0) None".to_string(),
                format!("write {}", ACL_ACCESS_XATTR),
                format!("write {}", ACL_DEFAULT_XATTR),
                format!("write {}", ACL_ACCESS_XATTR),
                "chown Some(1000) Some(1000)".to_string(),
                "chmod 2750".to_string(),
            ]
        );
        // last access ACL written is the original one
        let acls = writer.acls.borrow();
        let (attr, last) = acls.last().unwrap();
        assert_eq!(attr, ACL_ACCESS_XATTR);
        assert_eq!(Some(last), raw.access.as_ref());
    }

    #[test]
    fn failed_restore_is_reported() {
        let writer = RecordingWriter {
            refuse_attr: Some(ACL_DEFAULT_XATTR),
            refuse_restore: true,
            ..Default::default()
        };
        let plan = Plan {
            owner: None,
            ..full_plan()
        };
        match apply(&writer, &raw_dir(0o750), &plan) {
            RemediationOutcome::Failed(reason) => {
                assert!(reason.contains("permission-denied"));
                assert!(reason.contains("restore failed"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(outcome_for_errno(Errno::ENOENT), RemediationOutcome::NotFound);
        assert_eq!(outcome_for_errno(Errno::EPERM), RemediationOutcome::PermissionDenied);
        assert_eq!(outcome_for_errno(Errno::EROFS), RemediationOutcome::PermissionDenied);
        assert_eq!(
            outcome_for_errno(Errno::EOPNOTSUPP),
            RemediationOutcome::UnsupportedFilesystem
        );
        assert!(matches!(
            outcome_for_errno(Errno::EIO),
            RemediationOutcome::Failed(_)
        ));
    }

    #[test]
    fn unknown_fallback_is_a_setup_error() {
        let directory = Arc::new(crate::directory::StaticDirectory::new());
        let policy = RemediationPolicy {
            fallback_owner: Some("nobody-here".into()),
            fallback_group: None,
        };
        assert!(matches!(
            PosixBackend::new(directory, &policy),
            Err(BackendError::UnknownPrincipal { kind: "user", .. })
        ));
    }
}
