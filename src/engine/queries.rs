use std::collections::{BTreeSet, HashSet};

use crate::executable::{ExecutableKind, ExecutableSummary};
use crate::model::*;
use crate::object_type::ObjectType;

use super::store::Store;
use super::{Engine, EngineError};

fn by_slot_start(mut reservations: Vec<&Reservation>) -> Vec<&Reservation> {
    reservations.sort_by_key(|r| (r.slot.start, r.id));
    reservations
}

impl Store {
    pub fn get_reservation(&self, id: ReservationId) -> Result<&Reservation, EngineError> {
        self.reservation(id).ok_or_else(|| {
            EngineError::NotFound(self.domain().format_id(ObjectType::Reservation, id.get()))
        })
    }

    /// Known reservations among `ids`, ordered by slot start.
    pub fn list_by_ids(&self, ids: &[ReservationId]) -> Vec<&Reservation> {
        by_slot_start(ids.iter().filter_map(|id| self.reservation(*id)).collect())
    }

    /// Reservations of the request's allocation and of its child requests' allocations.
    pub fn list_by_reservation_request(
        &self,
        id: ReservationRequestId,
    ) -> Result<Vec<&Reservation>, EngineError> {
        let request = self.request(id).ok_or_else(|| {
            EngineError::NotFound(
                self.domain()
                    .format_id(ObjectType::ReservationRequest, id.get()),
            )
        })?;
        let allocation = self.alloc(request.allocation);
        let mut reservations: Vec<&Reservation> = allocation
            .reservations
            .iter()
            .filter_map(|r| self.reservation(*r))
            .collect();
        for child in &allocation.child_reservation_requests {
            if let Some(child_allocation) = self.request(*child).and_then(|c| self.allocation(c.allocation)) {
                reservations.extend(
                    child_allocation
                        .reservations
                        .iter()
                        .filter_map(|r| self.reservation(*r)),
                );
            }
        }
        Ok(by_slot_start(reservations))
    }

    /// Reservations of one kind whose slot starts inside `[interval.start, interval.end]`.
    pub fn list_by_interval(&self, interval: Span, reservation_type: ReservationType) -> Vec<&Reservation> {
        by_slot_start(
            self.reservations()
                .filter(|r| r.kind.reservation_type() == reservation_type)
                .filter(|r| interval.start <= r.slot.start && r.slot.start <= interval.end)
                .collect(),
        )
    }

    fn by_target(&self, key: TargetKey, slot: Span) -> Vec<&Reservation> {
        by_slot_start(
            self.index
                .overlapping(key, slot)
                .filter_map(|id| self.reservation(id))
                .collect(),
        )
    }

    pub fn existing_reservations(&self, reused: ReservationId, slot: Span) -> Vec<&Reservation> {
        self.by_target(TargetKey::Reused(reused), slot)
    }

    pub fn resource_reservations(&self, resource: ResourceId, slot: Span) -> Vec<&Reservation> {
        self.by_target(TargetKey::Resource(resource), slot)
    }

    pub fn room_reservations(&self, room_provider: ResourceId, slot: Span) -> Vec<&Reservation> {
        self.by_target(TargetKey::RoomProvider(room_provider), slot)
    }

    /// Room reservations running inside the already allocated room `room_endpoint`.
    pub fn room_reservations_by_reused_room_endpoint(
        &self,
        room_endpoint: ExecutableId,
        slot: Span,
    ) -> Vec<&Reservation> {
        by_slot_start(
            self.reservations()
                .filter(|r| r.kind.reservation_type() == ReservationType::Room && r.slot.overlaps(&slot))
                .filter(|r| {
                    r.executable
                        .and_then(|e| self.executable(e))
                        .is_some_and(|e| {
                            e.kind
                                == ExecutableKind::UsedRoomEndpoint {
                                    reused_room_endpoint: room_endpoint,
                                }
                        })
                })
                .collect(),
        )
    }

    pub fn recording_service_reservations(&self, capability: ResourceId, slot: Span) -> Vec<&Reservation> {
        self.by_target(TargetKey::RecordingCapability(capability), slot)
    }

    pub fn value_reservations(&self, value_provider: ResourceId, slot: Span) -> Vec<&Reservation> {
        self.by_target(TargetKey::ValueProvider(value_provider), slot)
    }

    pub fn alias_reservations(&self, alias_provider: ResourceId, slot: Span) -> Vec<&Reservation> {
        self.by_target(TargetKey::AliasProvider(alias_provider), slot)
    }

    /// Resource reservations holding `resource`, at any time.
    pub fn count_resource_reservations(&self, resource: ResourceId) -> usize {
        self.index.count(TargetKey::Resource(resource))
    }

    /// Roots whose allocation is gone, deleted, or must not hold reservations.
    pub fn reservations_for_deletion(&self) -> Vec<&Reservation> {
        self.reservations()
            .filter(|r| r.is_root())
            .filter(|r| match r.allocation.and_then(|a| self.allocation(a)) {
                None => true,
                Some(a) => matches!(
                    a.state,
                    AllocationState::Deleted | AllocationState::ActiveWithoutReservations
                ),
            })
            .collect()
    }

    /// Roots without any allocation.
    pub fn orphan_reservations_for_deletion(&self) -> Vec<&Reservation> {
        self.reservations()
            .filter(|r| r.is_root() && r.allocation.is_none())
            .collect()
    }

    /// Allocations whose reservations must be purged next.
    pub fn allocations_reservations_for_deletion(&self) -> Vec<&Allocation> {
        self.allocations()
            .filter(|a| {
                a.state == AllocationState::Deleted
                    || (a.state == AllocationState::ActiveWithoutReservations && !a.reservations.is_empty())
            })
            .filter(|a| a.reservation_request.is_none() || !a.reservations.is_empty())
            .collect()
    }

    /// Child requests whose parent allocation is deleted or must not hold children.
    pub fn orphan_reservation_requests_for_deletion(&self) -> Vec<&ReservationRequest> {
        self.requests()
            .filter(|r| r.state != RequestState::Modified)
            .filter(|r| {
                r.kind
                    .parent_allocation()
                    .and_then(|a| self.allocation(a))
                    .is_some_and(|a| {
                        matches!(
                            a.state,
                            AllocationState::Deleted | AllocationState::ActiveWithoutChildReservationRequests
                        )
                    })
            })
            .collect()
    }

    pub fn is_allocation_reused(&self, allocation: AllocationId) -> bool {
        !self.reservation_requests_with_reused_allocation(allocation).is_empty()
    }

    /// Top-level requests depending on `allocation`: active requests reusing it directly
    /// (children of a set report the set), and live requests whose `Existing` reservations
    /// reuse anything the allocation owns.
    pub fn reservation_requests_with_reused_allocation(
        &self,
        allocation: AllocationId,
    ) -> BTreeSet<ReservationRequestId> {
        let mut requests = BTreeSet::new();
        for request in self.requests() {
            if request.reused_allocation != Some(allocation) || request.state != RequestState::Active {
                continue;
            }
            let top = request
                .kind
                .parent_allocation()
                .and_then(|a| self.allocation(a))
                .and_then(|a| a.reservation_request)
                .unwrap_or(request.id);
            requests.insert(top);
        }

        let Some(owner) = self.allocation(allocation) else {
            return requests;
        };
        let owned: HashSet<ReservationId> = owner
            .reservations
            .iter()
            .flat_map(|r| self.all_reservations(*r))
            .collect();
        if owned.is_empty() {
            return requests;
        }
        for reservation in self.reservations() {
            let ReservationKind::Existing { reused_reservation } = reservation.kind else {
                continue;
            };
            if !owned.contains(&reused_reservation) {
                continue;
            }
            if let Some(top) = self.reservation_top_request(reservation.id)
                && self.req(top).state != RequestState::Deleted
            {
                requests.insert(top);
            }
        }
        requests
    }
}

impl Engine {
    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.read(|s| s.get_reservation(id).cloned()).await
    }

    pub async fn get_request(&self, id: ReservationRequestId) -> Result<ReservationRequest, EngineError> {
        self.read(|s| {
            s.request(id).cloned().ok_or_else(|| {
                EngineError::NotFound(s.domain().format_id(ObjectType::ReservationRequest, id.get()))
            })
        })
        .await
    }

    pub async fn get_allocation(&self, id: AllocationId) -> Option<Allocation> {
        self.read(|s| s.allocation(id).cloned()).await
    }

    pub async fn get_executable_summary(&self, id: ExecutableId) -> Option<ExecutableSummary> {
        self.read(|s| s.executable_summary(id).cloned()).await
    }

    pub async fn list_by_ids(&self, ids: &[ReservationId]) -> Vec<Reservation> {
        self.read(|s| s.list_by_ids(ids).into_iter().cloned().collect()).await
    }

    pub async fn list_by_reservation_request(
        &self,
        id: ReservationRequestId,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.read(|s| Ok(s.list_by_reservation_request(id)?.into_iter().cloned().collect()))
            .await
    }

    pub async fn list_by_interval(&self, interval: Span, reservation_type: ReservationType) -> Vec<Reservation> {
        self.read(|s| {
            s.list_by_interval(interval, reservation_type)
                .into_iter()
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn resource_reservations(&self, resource: ResourceId, slot: Span) -> Vec<Reservation> {
        self.read(|s| s.resource_reservations(resource, slot).into_iter().cloned().collect())
            .await
    }

    pub async fn reservations_for_deletion(&self) -> Vec<ReservationId> {
        self.read(|s| s.reservations_for_deletion().iter().map(|r| r.id).collect())
            .await
    }

    pub async fn reservation_requests_with_reused_allocation(
        &self,
        allocation: AllocationId,
    ) -> BTreeSet<ReservationRequestId> {
        self.read(|s| s.reservation_requests_with_reused_allocation(allocation))
            .await
    }
}
