#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use storage::{
    EntryKind, FileEntry, Grant, GrantSlot, InspectionError, PermissionBackend, Principal,
    RemediationOutcome,
};

pub const ROOT_UID: u32 = 0;
pub const ALICE_UID: u32 = 1001;
pub const BOB_UID: u32 = 1002;

/// 基于真实目录树的假后端：文件类型来自 lstat，属主由测试指定
pub struct FakeBackend {
    owners: Mutex<HashMap<PathBuf, u32>>,
    unreadable: HashSet<PathBuf>,
    names: HashMap<u32, String>,
    pub removals: Mutex<usize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let names = [(ROOT_UID, "root"), (ALICE_UID, "alice"), (BOB_UID, "bob")]
            .into_iter()
            .map(|(uid, name)| (uid, name.to_string()))
            .collect();
        Self {
            owners: Mutex::new(HashMap::new()),
            unreadable: HashSet::new(),
            names,
            removals: Mutex::new(0),
        }
    }

    /// 未指定属主的条目默认属于 bob
    pub fn owned_by(self, path: impl AsRef<Path>, uid: u32) -> Self {
        self.owners
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), uid);
        self
    }

    pub fn unreadable(mut self, path: impl AsRef<Path>) -> Self {
        self.unreadable.insert(path.as_ref().to_path_buf());
        self
    }

    pub fn owner_of(&self, path: &Path) -> u32 {
        self.owners
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(BOB_UID)
    }

    fn principal(&self, uid: u32) -> Principal {
        Principal::new(uid, self.names.get(&uid).cloned())
    }
}

impl PermissionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn inspect(&self, path: &Path) -> Result<FileEntry, InspectionError> {
        if self.unreadable.contains(path) {
            return Err(InspectionError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        let meta = fs::symlink_metadata(path).map_err(|e| InspectionError::from_io(path, e))?;
        Ok(FileEntry {
            path: path.to_path_buf(),
            kind: EntryKind::from_file_type(meta.file_type()),
            owner: self.principal(self.owner_of(path)),
            group: Principal::new(100, Some("users".to_string())),
            group_members: Vec::new(),
            mode: 0o640,
            acl_group_obj: None,
            acl: Vec::new(),
        })
    }

    fn supports(&self, _entry: &FileEntry, grant: &Grant) -> bool {
        matches!(grant.slot, GrantSlot::Owner { .. })
    }

    fn remove_grants(&self, path: &Path, grants: &[Grant]) -> RemediationOutcome {
        let fresh = match self.inspect(path) {
            Ok(entry) => entry,
            Err(InspectionError::Vanished { .. }) => return RemediationOutcome::NotFound,
            Err(_) => return RemediationOutcome::PermissionDenied,
        };
        let present: Vec<_> = grants.iter().filter(|g| fresh.has_grant(g)).collect();
        if present.is_empty() {
            return RemediationOutcome::NotFound;
        }
        if present.iter().any(|g| !self.supports(&fresh, g)) {
            return RemediationOutcome::UnsupportedFilesystem;
        }

        self.owners
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), ROOT_UID);
        *self.removals.lock().unwrap() += 1;
        RemediationOutcome::Removed
    }
}

/// root/alice_owned.txt (alice), root/other.txt (bob)
pub fn alice_bob_tree() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("alice_owned.txt"), b"alice").unwrap();
    fs::write(temp_dir.path().join("other.txt"), b"bob").unwrap();
    temp_dir
}
