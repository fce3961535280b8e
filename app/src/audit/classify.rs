use std::collections::BTreeSet;
use storage::{AclClass, FileEntry, Grant, GrantSlot, PermissionKind};

use crate::identity::IdentitySet;

/// 返回条目上所有归属于被吊销身份的授权，按确定顺序排列
pub fn classify(entry: &FileEntry, identities: &IdentitySet) -> Vec<Grant> {
    let mut grants = BTreeSet::new();

    let owner = entry.owner.key();
    if identities.contains(&owner) {
        grants.insert(Grant {
            principal: owner,
            kind: PermissionKind::Owner,
            slot: GrantSlot::Owner {
                uid: entry.owner.id,
            },
        });
    }

    let group = entry.group.key();
    if identities.contains(&group) {
        grants.insert(Grant {
            principal: group,
            kind: PermissionKind::GroupMember,
            slot: GrantSlot::OwningGroup {
                gid: entry.group.id,
                via_member: false,
            },
        });
    }

    // 组权限位为空时，组成员身份不带来任何访问权
    if entry.group_bits() != 0 {
        for member in entry.group_members.iter().filter(|m| identities.contains(m)) {
            grants.insert(Grant {
                principal: member.clone(),
                kind: PermissionKind::GroupMember,
                slot: GrantSlot::OwningGroup {
                    gid: entry.group.id,
                    via_member: true,
                },
            });
        }
    }

    for acl in &entry.acl {
        let key = acl.principal.key();
        if !identities.contains(&key) {
            continue;
        }
        let slot = match acl.class {
            AclClass::User => GrantSlot::AclUser {
                scope: acl.scope,
                uid: acl.principal.id,
            },
            AclClass::Group => GrantSlot::AclGroup {
                scope: acl.scope,
                gid: acl.principal.id,
            },
        };
        for kind in PermissionKind::for_acl_perms(acl.perms) {
            grants.insert(Grant {
                principal: key.clone(),
                kind,
                slot,
            });
        }
    }

    grants.into_iter().collect()
}
