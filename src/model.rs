use std::fmt;

use serde::{Deserialize, Serialize};

use crate::executable::Executable;
use crate::object_type::EntityKind;
use crate::participant::Synchronizable;
use crate::specification::Specification;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Strict overlap: touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Persistence id of a [`Reservation`].
    ReservationId
);
entity_id!(
    /// Persistence id of an [`Allocation`].
    AllocationId
);
entity_id!(
    /// Persistence id of a [`ReservationRequest`] revision.
    ReservationRequestId
);
entity_id!(
    /// Persistence id of an [`Executable`].
    ExecutableId
);
entity_id!(
    /// Id of a resource (room, device, value or recording provider) held by the resource layer.
    ResourceId
);

// ── Allocation ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationState {
    /// Holds no child reservation requests; its reservations must not overlap.
    ActiveWithoutChildReservationRequests,
    /// Holds no reservations (set requests allocate through child requests).
    ActiveWithoutReservations,
    /// Pending physical deletion together with everything it owns.
    Deleted,
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationState::ActiveWithoutChildReservationRequests => {
                "ACTIVE_WITHOUT_CHILD_RESERVATION_REQUESTS"
            }
            AllocationState::ActiveWithoutReservations => "ACTIVE_WITHOUT_RESERVATIONS",
            AllocationState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Stable aggregate shared by every revision of one reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub state: AllocationState,
    pub notified: bool,
    /// Latest revision of the owning request.
    pub reservation_request: Option<ReservationRequestId>,
    pub child_reservation_requests: Vec<ReservationRequestId>,
    /// Sorted by slot start.
    pub reservations: Vec<ReservationId>,
}

impl Allocation {
    pub fn new(id: AllocationId) -> Self {
        Self {
            id,
            state: AllocationState::ActiveWithoutChildReservationRequests,
            notified: false,
            reservation_request: None,
            child_reservation_requests: Vec::new(),
            reservations: Vec::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state == AllocationState::Deleted
    }

    /// The most recently allocated reservation: none, the only one, or the last in slot order.
    pub fn current_reservation(&self) -> Option<ReservationId> {
        self.reservations.last().copied()
    }
}

// ── Reservation ──────────────────────────────────────────────────

/// What a reservation actually grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationKind {
    /// Grouping node without a target of its own.
    Plain,
    Resource { resource: ResourceId },
    Room { room_provider: ResourceId, license_count: u32 },
    Value { value_provider: ResourceId, value: String },
    Alias { alias_provider: ResourceId, aliases: Vec<String> },
    RecordingService { recording_capability: ResourceId },
    /// Reuses the grant of another reservation.
    Existing { reused_reservation: ReservationId },
}

/// Fieldless tag of [`ReservationKind`], used for per-kind queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationType {
    Plain,
    Resource,
    Room,
    Value,
    Alias,
    RecordingService,
    Existing,
}

impl ReservationKind {
    pub fn reservation_type(&self) -> ReservationType {
        match self {
            ReservationKind::Plain => ReservationType::Plain,
            ReservationKind::Resource { .. } => ReservationType::Resource,
            ReservationKind::Room { .. } => ReservationType::Room,
            ReservationKind::Value { .. } => ReservationType::Value,
            ReservationKind::Alias { .. } => ReservationType::Alias,
            ReservationKind::RecordingService { .. } => ReservationType::RecordingService,
            ReservationKind::Existing { .. } => ReservationType::Existing,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ReservationKind::Plain => EntityKind::Reservation,
            ReservationKind::Resource { .. } => EntityKind::ResourceReservation,
            ReservationKind::Room { .. } => EntityKind::RoomReservation,
            ReservationKind::Value { .. } => EntityKind::ValueReservation,
            ReservationKind::Alias { .. } => EntityKind::AliasReservation,
            ReservationKind::RecordingService { .. } => EntityKind::RecordingServiceReservation,
            ReservationKind::Existing { .. } => EntityKind::ExistingReservation,
        }
    }

    /// Key under which the granted target is indexed for overlap queries.
    pub fn target_key(&self) -> Option<TargetKey> {
        match self {
            ReservationKind::Plain => None,
            ReservationKind::Resource { resource } => Some(TargetKey::Resource(*resource)),
            ReservationKind::Room { room_provider, .. } => {
                Some(TargetKey::RoomProvider(*room_provider))
            }
            ReservationKind::Value { value_provider, .. } => {
                Some(TargetKey::ValueProvider(*value_provider))
            }
            ReservationKind::Alias { alias_provider, .. } => {
                Some(TargetKey::AliasProvider(*alias_provider))
            }
            ReservationKind::RecordingService {
                recording_capability,
            } => Some(TargetKey::RecordingCapability(*recording_capability)),
            ReservationKind::Existing { reused_reservation } => {
                Some(TargetKey::Reused(*reused_reservation))
            }
        }
    }

    /// The concrete resource occupied by this node, if it occupies one itself.
    pub fn allocated_resource(&self) -> Option<ResourceId> {
        match self {
            ReservationKind::Resource { resource } => Some(*resource),
            ReservationKind::Room { room_provider, .. } => Some(*room_provider),
            ReservationKind::RecordingService {
                recording_capability,
            } => Some(*recording_capability),
            _ => None,
        }
    }
}

/// Index key of an allocation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKey {
    Resource(ResourceId),
    RoomProvider(ResourceId),
    ValueProvider(ResourceId),
    AliasProvider(ResourceId),
    RecordingCapability(ResourceId),
    Reused(ReservationId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: String,
    pub slot: Span,
    pub parent_reservation: Option<ReservationId>,
    pub child_reservations: Vec<ReservationId>,
    pub executable: Option<ExecutableId>,
    pub allocation: Option<AllocationId>,
    pub kind: ReservationKind,
}

impl Reservation {
    pub fn new(id: ReservationId, user_id: impl Into<String>, slot: Span, kind: ReservationKind) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            slot,
            parent_reservation: None,
            child_reservations: Vec::new(),
            executable: None,
            allocation: None,
            kind,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_reservation.is_none()
    }
}

// ── Reservation request ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Active,
    /// Superseded by a newer revision.
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    Science,
    Education,
    Owner,
    Maintenance,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// One slot; children of a set point back to the set's allocation.
    Single {
        slot: Span,
        parent_allocation: Option<AllocationId>,
    },
    /// Recurring request, allocated through child requests.
    Set { slots: Vec<Span> },
}

impl RequestKind {
    pub fn is_set(&self) -> bool {
        matches!(self, RequestKind::Set { .. })
    }

    pub fn parent_allocation(&self) -> Option<AllocationId> {
        match self {
            RequestKind::Single {
                parent_allocation, ..
            } => *parent_allocation,
            RequestKind::Set { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub id: ReservationRequestId,
    pub kind: RequestKind,
    pub state: RequestState,
    pub allocation: AllocationId,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub purpose: Purpose,
    pub priority: i32,
    pub description: Option<String>,
    pub reused_allocation: Option<AllocationId>,
    pub reused_allocation_mandatory: bool,
    pub specification: Specification,
    /// Revision this one replaced.
    pub modified_reservation_request: Option<ReservationRequestId>,
}

impl ReservationRequest {
    pub fn entity_kind(&self) -> EntityKind {
        match self.kind {
            RequestKind::Single { .. } => EntityKind::ReservationRequest,
            RequestKind::Set { .. } => EntityKind::ReservationRequestSet,
        }
    }

    /// Copy every user-editable property from `other`; returns whether anything changed.
    /// Identity, allocation and state are left alone.
    pub fn synchronize_from(&mut self, other: &ReservationRequest) -> bool {
        let mut modified = self.created_by != other.created_by
            || self.updated_by != other.updated_by
            || self.purpose != other.purpose
            || self.priority != other.priority
            || self.description != other.description
            || self.reused_allocation != other.reused_allocation
            || self.reused_allocation_mandatory != other.reused_allocation_mandatory;
        self.created_by = other.created_by.clone();
        self.updated_by = other.updated_by.clone();
        self.purpose = other.purpose;
        self.priority = other.priority;
        self.description = other.description.clone();
        self.reused_allocation = other.reused_allocation;
        self.reused_allocation_mandatory = other.reused_allocation_mandatory;

        match (&mut self.kind, &other.kind) {
            (RequestKind::Single { slot, .. }, RequestKind::Single { slot: other_slot, .. }) => {
                if slot != other_slot {
                    *slot = *other_slot;
                    modified = true;
                }
            }
            (RequestKind::Set { slots }, RequestKind::Set { slots: other_slots }) => {
                if slots != other_slots {
                    *slots = other_slots.clone();
                    modified = true;
                }
            }
            (kind, other_kind) => {
                *kind = other_kind.clone();
                modified = true;
            }
        }

        modified |= self.specification.synchronize_from(&other.specification);
        modified
    }
}

/// Caller-supplied content of a reservation request revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequestDraft {
    pub kind: RequestKind,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub purpose: Purpose,
    pub priority: i32,
    pub description: Option<String>,
    pub reused_allocation: Option<AllocationId>,
    pub reused_allocation_mandatory: bool,
    pub specification: Specification,
}

impl ReservationRequestDraft {
    pub fn single(slot: Span, created_by: impl Into<String>, specification: Specification) -> Self {
        Self::with_kind(
            RequestKind::Single {
                slot,
                parent_allocation: None,
            },
            created_by,
            specification,
        )
    }

    pub fn set(slots: Vec<Span>, created_by: impl Into<String>, specification: Specification) -> Self {
        Self::with_kind(RequestKind::Set { slots }, created_by, specification)
    }

    fn with_kind(kind: RequestKind, created_by: impl Into<String>, specification: Specification) -> Self {
        Self {
            kind,
            created_by: created_by.into(),
            updated_by: None,
            purpose: Purpose::User,
            priority: 0,
            description: None,
            reused_allocation: None,
            reused_allocation_mandatory: false,
            specification,
        }
    }

    pub fn reusing(mut self, allocation: AllocationId, mandatory: bool) -> Self {
        self.reused_allocation = Some(allocation);
        self.reused_allocation_mandatory = mandatory;
        self
    }

    pub(crate) fn into_request(
        self,
        id: ReservationRequestId,
        allocation: AllocationId,
    ) -> ReservationRequest {
        ReservationRequest {
            id,
            kind: self.kind,
            state: RequestState::Active,
            allocation,
            created_by: self.created_by,
            updated_by: self.updated_by,
            purpose: self.purpose,
            priority: self.priority,
            description: self.description,
            reused_allocation: self.reused_allocation,
            reused_allocation_mandatory: self.reused_allocation_mandatory,
            specification: self.specification,
            modified_reservation_request: None,
        }
    }
}

/// Journal record format: one entity-level change per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequestStored { request: ReservationRequest },
    RequestRemoved { id: ReservationRequestId },
    AllocationStored { allocation: Allocation },
    AllocationRemoved { id: AllocationId },
    ReservationStored { reservation: Reservation },
    ReservationRemoved { id: ReservationId },
    ExecutableStored { executable: Executable },
    ExecutableRemoved { id: ExecutableId },
    SequenceAdvanced { next_id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::Specification;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_is_strict() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn inverted_span_is_invalid() {
        let s = Span { start: 10, end: 5 };
        assert!(!s.is_valid());
        assert!(Span::new(5, 5).is_valid());
    }

    #[test]
    fn current_reservation_is_last() {
        let mut a = Allocation::new(AllocationId(1));
        assert_eq!(a.current_reservation(), None);
        a.reservations.push(ReservationId(7));
        assert_eq!(a.current_reservation(), Some(ReservationId(7)));
        a.reservations.push(ReservationId(3));
        assert_eq!(a.current_reservation(), Some(ReservationId(3)));
    }

    #[test]
    fn kind_targets() {
        let existing = ReservationKind::Existing {
            reused_reservation: ReservationId(4),
        };
        assert_eq!(existing.target_key(), Some(TargetKey::Reused(ReservationId(4))));
        assert_eq!(existing.allocated_resource(), None);
        assert_eq!(ReservationKind::Plain.target_key(), None);

        let room = ReservationKind::Room {
            room_provider: ResourceId(9),
            license_count: 5,
        };
        assert_eq!(room.reservation_type(), ReservationType::Room);
        assert_eq!(room.allocated_resource(), Some(ResourceId(9)));
        assert_eq!(room.entity_kind(), EntityKind::RoomReservation);
    }

    fn request(slot: Span) -> ReservationRequest {
        ReservationRequestDraft::single(slot, "user-1", Specification::resource(ResourceId(1)))
            .into_request(ReservationRequestId(1), AllocationId(2))
    }

    #[test]
    fn request_synchronize_reports_changes() {
        let mut current = request(Span::new(0, 100));
        let same = request(Span::new(0, 100));
        assert!(!current.synchronize_from(&same));

        let mut moved = request(Span::new(50, 150));
        moved.description = Some("weekly".into());
        assert!(current.synchronize_from(&moved));
        assert_eq!(current.description.as_deref(), Some("weekly"));
        assert_eq!(
            current.kind,
            RequestKind::Single {
                slot: Span::new(50, 150),
                parent_allocation: None
            }
        );
        // identity is untouched
        assert_eq!(current.id, ReservationRequestId(1));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AllocationStored {
            allocation: Allocation::new(AllocationId(5)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
