use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Public object types; each one owns a short lowercase code used in identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Resource,
    ReservationRequest,
    Reservation,
    Executable,
    Tag,
    Domain,
    ForeignResources,
}

impl ObjectType {
    pub const ALL: [ObjectType; 7] = [
        ObjectType::Resource,
        ObjectType::ReservationRequest,
        ObjectType::Reservation,
        ObjectType::Executable,
        ObjectType::Tag,
        ObjectType::Domain,
        ObjectType::ForeignResources,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ObjectType::Resource => "resource",
            ObjectType::ReservationRequest => "reservationrequest",
            ObjectType::Reservation => "reservation",
            ObjectType::Executable => "executable",
            ObjectType::Tag => "tag",
            ObjectType::Domain => "domain",
            ObjectType::ForeignResources => "foreignresources",
        }
    }

    pub fn from_code(code: &str) -> Option<ObjectType> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Concrete entity kinds known to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Resource,
    DeviceResource,
    ForeignResources,
    Tag,
    Domain,
    AbstractReservationRequest,
    ReservationRequest,
    ReservationRequestSet,
    Reservation,
    ResourceReservation,
    RoomReservation,
    ValueReservation,
    AliasReservation,
    RecordingServiceReservation,
    ExistingReservation,
    Executable,
    RoomEndpoint,
    ResourceRoomEndpoint,
    UsedRoomEndpoint,
    Compartment,
    /// Internal aggregate, never exposed through identifiers.
    Allocation,
}

impl EntityKind {
    /// Closest ancestor kind.
    pub fn parent(self) -> Option<EntityKind> {
        use EntityKind::*;
        match self {
            DeviceResource => Some(Resource),
            ReservationRequest | ReservationRequestSet => Some(AbstractReservationRequest),
            ResourceReservation | RoomReservation | ValueReservation | AliasReservation
            | RecordingServiceReservation | ExistingReservation => Some(Reservation),
            RoomEndpoint | Compartment => Some(Executable),
            ResourceRoomEndpoint | UsedRoomEndpoint => Some(RoomEndpoint),
            Resource | ForeignResources | Tag | Domain | AbstractReservationRequest
            | Reservation | Executable | Allocation => None,
        }
    }
}

const ROOT_KINDS: [(ObjectType, EntityKind); 7] = [
    (ObjectType::Resource, EntityKind::Resource),
    (ObjectType::ReservationRequest, EntityKind::AbstractReservationRequest),
    (ObjectType::Reservation, EntityKind::Reservation),
    (ObjectType::Executable, EntityKind::Executable),
    (ObjectType::Tag, EntityKind::Tag),
    (ObjectType::Domain, EntityKind::Domain),
    (ObjectType::ForeignResources, EntityKind::ForeignResources),
];

/// Maps object types to their root entity kinds and back.
///
/// Root kinds are registered up front; sub-kinds resolve through their closest registered
/// ancestor and the answer is memoized, so concurrent first lookups of the same kind are safe.
pub struct TypeRegistry {
    root_by_type: HashMap<ObjectType, EntityKind>,
    type_by_kind: DashMap<EntityKind, ObjectType>,
}

static GLOBAL: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let root_by_type: HashMap<_, _> = ROOT_KINDS.into_iter().collect();
        let type_by_kind = DashMap::new();
        for (object_type, kind) in ROOT_KINDS {
            type_by_kind.insert(kind, object_type);
        }
        Self {
            root_by_type,
            type_by_kind,
        }
    }

    /// Process-wide registry.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    /// Object type of `kind`, resolved by exact or closest-ancestor match.
    pub fn object_type(&self, kind: EntityKind) -> Option<ObjectType> {
        if let Some(found) = self.type_by_kind.get(&kind) {
            return Some(*found.value());
        }
        let mut current = kind.parent();
        while let Some(ancestor) = current {
            if let Some(found) = self.type_by_kind.get(&ancestor) {
                let object_type = *found.value();
                drop(found);
                self.type_by_kind.insert(kind, object_type);
                return Some(object_type);
            }
            current = ancestor.parent();
        }
        None
    }

    /// Root entity kind registered for `object_type`.
    pub fn root_kind(&self, object_type: ObjectType) -> EntityKind {
        self.root_by_type[&object_type]
    }

    pub fn is_available(&self, kind: EntityKind) -> bool {
        self.object_type(kind).is_some()
    }

    pub(crate) fn cached_len(&self) -> usize {
        self.type_by_kind.len()
    }
}
