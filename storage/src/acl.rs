//! POSIX ACL extended-attribute codec.
//!
//! Linux stores access and default ACLs in the `system.posix_acl_access`
//! and `system.posix_acl_default` attributes as a little-endian blob: a
//! `u32` version header followed by 8-byte entries of
//! `(u16 tag, u16 perm, u32 id)`.

use thiserror::Error;

pub const ACL_ACCESS_XATTR: &str = "system.posix_acl_access";
pub const ACL_DEFAULT_XATTR: &str = "system.posix_acl_default";

const ACL_EA_VERSION: u32 = 0x0002;
const ACL_UNDEFINED_ID: u32 = u32::MAX;
const HEADER_LEN: usize = 4;
const ENTRY_LEN: usize = 8;

pub const ACL_READ: u16 = 0x04;
pub const ACL_WRITE: u16 = 0x02;
pub const ACL_EXECUTE: u16 = 0x01;

/// ACL entry tag, in the order the kernel requires entries to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AclTag {
    UserObj,
    User,
    GroupObj,
    Group,
    Mask,
    Other,
}

impl AclTag {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0x01 => Some(AclTag::UserObj),
            0x02 => Some(AclTag::User),
            0x04 => Some(AclTag::GroupObj),
            0x08 => Some(AclTag::Group),
            0x10 => Some(AclTag::Mask),
            0x20 => Some(AclTag::Other),
            _ => None,
        }
    }

    fn raw(self) -> u16 {
        match self {
            AclTag::UserObj => 0x01,
            AclTag::User => 0x02,
            AclTag::GroupObj => 0x04,
            AclTag::Group => 0x08,
            AclTag::Mask => 0x10,
            AclTag::Other => 0x20,
        }
    }

    /// Named entries carry a uid/gid qualifier.
    pub fn is_named(self) -> bool {
        matches!(self, AclTag::User | AclTag::Group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclEntry {
    pub tag: AclTag,
    pub perm: u16,
    pub id: Option<u32>,
}

impl AclEntry {
    pub fn new(tag: AclTag, perm: u16, id: Option<u32>) -> Self {
        Self { tag, perm, id }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AclDecodeError {
    #[error("ACL attribute is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("unsupported ACL attribute version {0}")]
    Version(u32),
    #[error("unknown ACL tag {0:#x}")]
    UnknownTag(u16),
}

/// A decoded POSIX ACL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PosixAcl {
    entries: Vec<AclEntry>,
}

impl PosixAcl {
    pub fn from_entries(entries: Vec<AclEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    /// Entries qualified by a user or group id.
    pub fn named(&self) -> impl Iterator<Item = &AclEntry> {
        self.entries.iter().filter(|e| e.tag.is_named())
    }

    /// Permissions of the `group::` entry.
    pub fn group_obj(&self) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.tag == AclTag::GroupObj)
            .map(|e| e.perm)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AclDecodeError> {
        if bytes.len() < HEADER_LEN || (bytes.len() - HEADER_LEN) % ENTRY_LEN != 0 {
            return Err(AclDecodeError::Truncated(bytes.len()));
        }

        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version != ACL_EA_VERSION {
            return Err(AclDecodeError::Version(version));
        }

        let mut entries = Vec::with_capacity((bytes.len() - HEADER_LEN) / ENTRY_LEN);
        for chunk in bytes[HEADER_LEN..].chunks_exact(ENTRY_LEN) {
            let raw_tag = u16::from_le_bytes([chunk[0], chunk[1]]);
            let perm = u16::from_le_bytes([chunk[2], chunk[3]]);
            let raw_id = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

            let tag = AclTag::from_raw(raw_tag).ok_or(AclDecodeError::UnknownTag(raw_tag))?;
            let id = if tag.is_named() { Some(raw_id) } else { None };
            entries.push(AclEntry { tag, perm, id });
        }

        Ok(Self { entries })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.entries.len() * ENTRY_LEN);
        out.extend_from_slice(&ACL_EA_VERSION.to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.tag.raw().to_le_bytes());
            out.extend_from_slice(&entry.perm.to_le_bytes());
            out.extend_from_slice(&entry.id.unwrap_or(ACL_UNDEFINED_ID).to_le_bytes());
        }
        out
    }

    /// Clear `bits` on the named entry `(tag, id)`, dropping the entry once
    /// no bits remain. The mask and every other entry are left as they are.
    /// Returns whether the ACL changed.
    pub fn revoke(&mut self, tag: AclTag, id: u32, bits: u16) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.tag == tag && e.id == Some(id))
        else {
            return false;
        };

        let entry = &mut self.entries[pos];
        let remaining = entry.perm & !bits;
        if remaining == entry.perm {
            return false;
        }

        if remaining & (ACL_READ | ACL_WRITE | ACL_EXECUTE) == 0 {
            self.entries.remove(pos);
        } else {
            entry.perm = remaining;
        }
        true
    }
}
