//! What a reservation request asks for.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{ExecutableId, ResourceId};
use crate::participant::{Participant, Synchronizable, Technology, synchronize_participants};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Specification {
    Resource {
        resource: ResourceId,
    },
    Value {
        value_provider: ResourceId,
        values: Vec<String>,
    },
    Alias {
        alias_provider: Option<ResourceId>,
        technologies: BTreeSet<Technology>,
        value: Option<String>,
    },
    Room {
        technologies: BTreeSet<Technology>,
        participant_count: u32,
        device_resource: Option<ResourceId>,
        reused_room: bool,
        meeting_name: Option<String>,
        participants: Vec<Participant>,
    },
    RecordingService {
        executable: Option<ExecutableId>,
        enabled: bool,
    },
    Compartment {
        technologies: BTreeSet<Technology>,
        participants: Vec<Participant>,
    },
}

/// Assign `value` to `slot` and report whether it differed.
fn assign<T: PartialEq + Clone>(slot: &mut T, value: &T) -> bool {
    if slot == value {
        return false;
    }
    *slot = value.clone();
    true
}

impl Specification {
    pub fn resource(resource: ResourceId) -> Self {
        Specification::Resource { resource }
    }

    pub fn value(value_provider: ResourceId, value: impl Into<String>) -> Self {
        Specification::Value {
            value_provider,
            values: vec![value.into()],
        }
    }

    pub fn room(technologies: impl IntoIterator<Item = Technology>, participant_count: u32) -> Self {
        Specification::Room {
            technologies: technologies.into_iter().collect(),
            participant_count,
            device_resource: None,
            reused_room: false,
            meeting_name: None,
            participants: Vec::new(),
        }
    }

    pub fn technologies(&self) -> BTreeSet<Technology> {
        match self {
            Specification::Alias { technologies, .. }
            | Specification::Room { technologies, .. }
            | Specification::Compartment { technologies, .. } => technologies.clone(),
            _ => BTreeSet::new(),
        }
    }

    pub fn participants(&self) -> &[Participant] {
        match self {
            Specification::Room { participants, .. }
            | Specification::Compartment { participants, .. } => participants,
            _ => &[],
        }
    }
}

impl Synchronizable for Specification {
    fn synchronize_from(&mut self, other: &Self) -> bool {
        use Specification::*;
        match (self, other) {
            (Resource { resource }, Resource { resource: r }) => assign(resource, r),
            (
                Value { value_provider, values },
                Value { value_provider: p, values: v },
            ) => assign(value_provider, p) | assign(values, v),
            (
                Alias { alias_provider, technologies, value },
                Alias { alias_provider: p, technologies: t, value: v },
            ) => assign(alias_provider, p) | assign(technologies, t) | assign(value, v),
            (
                Room {
                    technologies,
                    participant_count,
                    device_resource,
                    reused_room,
                    meeting_name,
                    participants,
                },
                Room {
                    technologies: t,
                    participant_count: c,
                    device_resource: d,
                    reused_room: r,
                    meeting_name: m,
                    participants: p,
                },
            ) => {
                assign(technologies, t)
                    | assign(participant_count, c)
                    | assign(device_resource, d)
                    | assign(reused_room, r)
                    | assign(meeting_name, m)
                    | synchronize_participants(participants, p)
            }
            (
                RecordingService { executable, enabled },
                RecordingService { executable: x, enabled: e },
            ) => assign(executable, x) | assign(enabled, e),
            (
                Compartment { technologies, participants },
                Compartment { technologies: t, participants: p },
            ) => assign(technologies, t) | synchronize_participants(participants, p),
            (this, other) => {
                *this = other.clone_fresh();
                true
            }
        }
    }

    fn clear_identity(&mut self) {
        if let Specification::Room { participants, .. } | Specification::Compartment { participants, .. } = self {
            participants.iter_mut().for_each(Participant::clear_identity);
        }
    }

    fn clone_fresh(&self) -> Self {
        let mut fresh = self.clone();
        fresh.clear_identity();
        fresh
    }
}
