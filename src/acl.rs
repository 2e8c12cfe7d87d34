use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use crate::identifier::ObjectIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRole {
    Owner,
    Reader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub user_id: String,
    pub role: ObjectRole,
}

/// Authorization collaborator consulted when entities appear or disappear.
pub trait AclManager: Send + Sync {
    fn create_acl_entry(&self, entity: &ObjectIdentifier, user_id: &str, role: ObjectRole);

    fn delete_acl_entries_for_entity(&self, entity: &ObjectIdentifier);

    fn acl_entries(&self, entity: &ObjectIdentifier) -> Vec<AclEntry>;
}

#[derive(Default)]
pub struct InMemoryAclManager {
    entries: DashMap<ObjectIdentifier, Vec<AclEntry>>,
}

impl InMemoryAclManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AclManager for InMemoryAclManager {
    fn create_acl_entry(&self, entity: &ObjectIdentifier, user_id: &str, role: ObjectRole) {
        let mut entries = self.entries.entry(entity.clone()).or_default();
        if !entries.iter().any(|e| e.user_id == user_id && e.role == role) {
            entries.push(AclEntry {
                user_id: user_id.to_string(),
                role,
            });
        }
    }

    fn delete_acl_entries_for_entity(&self, entity: &ObjectIdentifier) {
        self.entries.remove(entity);
    }

    fn acl_entries(&self, entity: &ObjectIdentifier) -> Vec<AclEntry> {
        self.entries
            .get(entity)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

enum AclChange {
    Create {
        entity: ObjectIdentifier,
        user_id: String,
        role: ObjectRole,
    },
    DeleteAll {
        entity: ObjectIdentifier,
    },
}

/// Records ACL changes made inside a transaction; they reach the real manager only through
/// [`PendingAcl::commit`], so a rolled back transaction leaves no ACL trace.
#[derive(Default)]
pub struct PendingAcl {
    changes: Mutex<Vec<AclChange>>,
}

impl PendingAcl {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, change: AclChange) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change);
    }

    /// Apply the recorded changes in order.
    pub fn commit(self, acl: &dyn AclManager) {
        let changes = self.changes.into_inner().unwrap_or_else(PoisonError::into_inner);
        for change in changes {
            match change {
                AclChange::Create { entity, user_id, role } => acl.create_acl_entry(&entity, &user_id, role),
                AclChange::DeleteAll { entity } => acl.delete_acl_entries_for_entity(&entity),
            }
        }
    }
}

impl AclManager for PendingAcl {
    fn create_acl_entry(&self, entity: &ObjectIdentifier, user_id: &str, role: ObjectRole) {
        self.push(AclChange::Create {
            entity: entity.clone(),
            user_id: user_id.to_string(),
            role,
        });
    }

    fn delete_acl_entries_for_entity(&self, entity: &ObjectIdentifier) {
        self.push(AclChange::DeleteAll { entity: entity.clone() });
    }

    /// Pending changes are not visible here.
    fn acl_entries(&self, _entity: &ObjectIdentifier) -> Vec<AclEntry> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_type::ObjectType;

    fn reservation(id: u64) -> ObjectIdentifier {
        ObjectIdentifier::new("cesnet.cz", Some(ObjectType::Reservation), Some(id))
    }

    #[test]
    fn entries_are_deduplicated() {
        let acl = InMemoryAclManager::new();
        acl.create_acl_entry(&reservation(1), "u1", ObjectRole::Owner);
        acl.create_acl_entry(&reservation(1), "u1", ObjectRole::Owner);
        acl.create_acl_entry(&reservation(1), "u2", ObjectRole::Reader);
        assert_eq!(acl.acl_entries(&reservation(1)).len(), 2);
        assert_eq!(acl.len(), 2);
    }

    #[test]
    fn delete_for_entity() {
        let acl = InMemoryAclManager::new();
        acl.create_acl_entry(&reservation(1), "u1", ObjectRole::Owner);
        acl.create_acl_entry(&reservation(2), "u1", ObjectRole::Owner);
        acl.delete_acl_entries_for_entity(&reservation(1));
        assert!(acl.acl_entries(&reservation(1)).is_empty());
        assert_eq!(acl.acl_entries(&reservation(2)).len(), 1);
    }

    #[test]
    fn pending_changes_apply_only_on_commit() {
        let acl = InMemoryAclManager::new();
        acl.create_acl_entry(&reservation(1), "u1", ObjectRole::Owner);

        let pending = PendingAcl::new();
        pending.delete_acl_entries_for_entity(&reservation(1));
        pending.create_acl_entry(&reservation(2), "u2", ObjectRole::Owner);
        assert_eq!(acl.acl_entries(&reservation(1)).len(), 1);
        assert!(acl.acl_entries(&reservation(2)).is_empty());

        pending.commit(&acl);
        assert!(acl.acl_entries(&reservation(1)).is_empty());
        assert_eq!(acl.acl_entries(&reservation(2)).len(), 1);
    }

    #[test]
    fn dropped_pending_changes_are_lost() {
        let acl = InMemoryAclManager::new();
        {
            let pending = PendingAcl::new();
            pending.create_acl_entry(&reservation(3), "u1", ObjectRole::Owner);
        }
        assert!(acl.is_empty());
    }
}
