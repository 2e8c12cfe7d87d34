use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::ResourceId;

/// Values that can be diffed against a newer revision of themselves.
pub trait Synchronizable: Sized {
    /// Copy every field of `other` into `self`; returns whether anything changed.
    /// Identity is left untouched.
    fn synchronize_from(&mut self, other: &Self) -> bool;

    /// Drop the persistence identity so the value is stored as a new entity.
    fn clear_identity(&mut self);

    /// New value synchronized from `self` with identity cleared.
    fn clone_fresh(&self) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Technology {
    H323,
    Sip,
    Adobe,
    SkypeForBusiness,
    FreePbx,
    WebRtc,
    Rtmp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: Option<String>,
    pub organization: Option<String>,
    /// Set for persons known to the identity provider.
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRole {
    Participant,
    Presenter,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantKind {
    Person {
        person: Person,
    },
    InvitedPerson {
        person: Person,
        endpoint: Option<ResourceId>,
    },
    ExistingEndpoint {
        resource: ResourceId,
    },
    ExternalEndpoint {
        technologies: BTreeSet<Technology>,
        alias: Option<String>,
        count: u32,
    },
    LookupEndpoint {
        technologies: BTreeSet<Technology>,
    },
}

impl ParticipantKind {
    fn same_variant(&self, other: &ParticipantKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Option<u64>,
    pub role: ParticipantRole,
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn new(role: ParticipantRole, kind: ParticipantKind) -> Self {
        Self {
            id: None,
            role,
            kind,
        }
    }

    pub fn person(name: impl Into<String>, role: ParticipantRole) -> Self {
        Self::new(
            role,
            ParticipantKind::Person {
                person: Person {
                    name: name.into(),
                    email: None,
                    organization: None,
                    user_id: None,
                },
            },
        )
    }
}

impl Synchronizable for Participant {
    fn synchronize_from(&mut self, other: &Self) -> bool {
        let modified = self.role != other.role || self.kind != other.kind;
        self.role = other.role;
        self.kind = other.kind.clone();
        modified
    }

    fn clear_identity(&mut self) {
        self.id = None;
    }

    fn clone_fresh(&self) -> Self {
        let mut fresh = Participant::new(self.role, self.kind.clone());
        fresh.synchronize_from(self);
        fresh.clear_identity();
        fresh
    }
}

/// Bring `current` in line with `newer`.
///
/// A participant keeps its identity when its position and kind are unchanged; every other
/// position is replaced by a fresh clone and surplus entries are dropped.
pub fn synchronize_participants(current: &mut Vec<Participant>, newer: &[Participant]) -> bool {
    let mut modified = current.len() != newer.len();
    let mut result = Vec::with_capacity(newer.len());
    let mut old = std::mem::take(current).into_iter();
    for incoming in newer {
        match old.next() {
            Some(mut existing) if existing.kind.same_variant(&incoming.kind) => {
                modified |= existing.synchronize_from(incoming);
                result.push(existing);
            }
            _ => {
                result.push(incoming.clone_fresh());
                modified = true;
            }
        }
    }
    *current = result;
    modified
}
