use std::collections::{BTreeMap, HashMap, HashSet};

use crate::acl::AclManager;
use crate::executable::{Executable, ExecutableKind, ExecutableService, ExecutableSummary};
use crate::identifier::{LocalDomain, ObjectIdentifier};
use crate::model::*;

use super::conflict::SlotIndex;

/// Entity arena. Every association is kept in sync on both sides by the mutators below;
/// violated tree or allocation invariants panic.
#[derive(Debug, Clone)]
pub struct Store {
    domain: LocalDomain,
    next_id: u64,
    pub(super) requests: BTreeMap<ReservationRequestId, ReservationRequest>,
    pub(super) allocations: BTreeMap<AllocationId, Allocation>,
    pub(super) reservations: BTreeMap<ReservationId, Reservation>,
    pub(super) executables: BTreeMap<ExecutableId, Executable>,
    pub(super) index: SlotIndex,
    summaries: HashMap<ExecutableId, ExecutableSummary>,
}

impl Store {
    pub fn new(domain: LocalDomain) -> Self {
        Self {
            domain,
            next_id: 1,
            requests: BTreeMap::new(),
            allocations: BTreeMap::new(),
            reservations: BTreeMap::new(),
            executables: BTreeMap::new(),
            index: SlotIndex::default(),
            summaries: HashMap::new(),
        }
    }

    pub fn domain(&self) -> &LocalDomain {
        &self.domain
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn request(&self, id: ReservationRequestId) -> Option<&ReservationRequest> {
        self.requests.get(&id)
    }

    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.allocations.get(&id)
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    pub fn executable(&self, id: ExecutableId) -> Option<&Executable> {
        self.executables.get(&id)
    }

    pub fn executable_summary(&self, id: ExecutableId) -> Option<&ExecutableSummary> {
        self.summaries.get(&id)
    }

    pub fn requests(&self) -> impl Iterator<Item = &ReservationRequest> {
        self.requests.values()
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub(crate) fn req(&self, id: ReservationRequestId) -> &ReservationRequest {
        self.requests
            .get(&id)
            .unwrap_or_else(|| panic!("Reservation request '{id}' does not exist."))
    }

    pub(crate) fn req_mut(&mut self, id: ReservationRequestId) -> &mut ReservationRequest {
        self.requests
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Reservation request '{id}' does not exist."))
    }

    pub(crate) fn alloc(&self, id: AllocationId) -> &Allocation {
        self.allocations
            .get(&id)
            .unwrap_or_else(|| panic!("Allocation '{id}' does not exist."))
    }

    pub(crate) fn alloc_mut(&mut self, id: AllocationId) -> &mut Allocation {
        self.allocations
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Allocation '{id}' does not exist."))
    }

    pub(crate) fn res(&self, id: ReservationId) -> &Reservation {
        self.reservations
            .get(&id)
            .unwrap_or_else(|| panic!("Reservation '{id}' does not exist."))
    }

    fn res_mut(&mut self, id: ReservationId) -> &mut Reservation {
        self.reservations
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Reservation '{id}' does not exist."))
    }

    pub(crate) fn exe_mut(&mut self, id: ExecutableId) -> &mut Executable {
        self.executables
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Executable '{id}' does not exist."))
    }

    pub fn reservation_identifier(&self, id: ReservationId) -> ObjectIdentifier {
        ObjectIdentifier::of(&self.domain, self.res(id).kind.entity_kind(), id.get())
    }

    pub fn request_identifier(&self, id: ReservationRequestId) -> ObjectIdentifier {
        ObjectIdentifier::of(&self.domain, self.req(id).entity_kind(), id.get())
    }

    // ── Requests & allocations ───────────────────────────────

    /// Store a new request revision together with a fresh allocation.
    pub fn insert_request(&mut self, draft: ReservationRequestDraft) -> ReservationRequestId {
        let allocation = AllocationId(self.allocate_id());
        self.allocations.insert(allocation, Allocation::new(allocation));
        let id = ReservationRequestId(self.allocate_id());
        self.requests.insert(id, draft.into_request(id, allocation));
        self.alloc_mut(allocation).reservation_request = Some(id);
        self.update_allocation_state(allocation);
        id
    }

    /// Store `revision` as the newest revision of `previous`, sharing its allocation.
    pub fn insert_revision(
        &mut self,
        previous: ReservationRequestId,
        mut revision: ReservationRequest,
    ) -> ReservationRequestId {
        let id = ReservationRequestId(self.allocate_id());
        let allocation = self.req(previous).allocation;
        revision.id = id;
        revision.allocation = allocation;
        revision.state = RequestState::Active;
        revision.modified_reservation_request = Some(previous);
        self.req_mut(previous).state = RequestState::Modified;
        if let Some(parent) = revision.kind.parent_allocation() {
            for child in &mut self.alloc_mut(parent).child_reservation_requests {
                if *child == previous {
                    *child = id;
                }
            }
        }
        self.requests.insert(id, revision);
        self.alloc_mut(allocation).reservation_request = Some(id);
        self.update_allocation_state(allocation);
        id
    }

    /// Re-derive the state from the governing request; a deleted allocation stays deleted.
    pub fn update_allocation_state(&mut self, id: AllocationId) {
        let allocation = self.alloc(id);
        if allocation.is_deleted() {
            return;
        }
        let request = allocation.reservation_request.unwrap_or_else(|| {
            panic!("Allocation '{id}' must reference a reservation request unless it is deleted.")
        });
        let state = if self.req(request).kind.is_set() {
            AllocationState::ActiveWithoutReservations
        } else {
            AllocationState::ActiveWithoutChildReservationRequests
        };
        self.alloc_mut(id).state = state;
    }

    pub fn mark_allocation_deleted(&mut self, id: AllocationId) {
        self.alloc_mut(id).state = AllocationState::Deleted;
    }

    /// Attach `reservation` to `allocation`, detaching it from any previous allocation.
    ///
    /// In `ActiveWithoutChildReservationRequests` an overlapping slot is a scheduler bug.
    pub fn allocation_add_reservation(&mut self, allocation_id: AllocationId, reservation_id: ReservationId) {
        let allocation = self.alloc(allocation_id);
        if allocation.reservations.contains(&reservation_id) {
            return;
        }
        let slot = self.res(reservation_id).slot;
        if allocation.state == AllocationState::ActiveWithoutChildReservationRequests {
            for existing in &allocation.reservations {
                let existing_slot = self.res(*existing).slot;
                assert!(
                    !existing_slot.overlaps(&slot),
                    "Allocation '{allocation_id}' already contains reservation '{existing}' with slot \
                     {existing_slot} overlapping slot {slot} of reservation '{reservation_id}'."
                );
            }
        }
        if let Some(previous) = self.res(reservation_id).allocation
            && previous != allocation_id
        {
            self.allocation_remove_reservation(previous, reservation_id);
        }
        let pos = self
            .alloc(allocation_id)
            .reservations
            .partition_point(|r| self.res(*r).slot.start <= slot.start);
        self.alloc_mut(allocation_id).reservations.insert(pos, reservation_id);
        self.res_mut(reservation_id).allocation = Some(allocation_id);
    }

    pub fn allocation_remove_reservation(&mut self, allocation_id: AllocationId, reservation_id: ReservationId) {
        let allocation = self.alloc_mut(allocation_id);
        let Some(pos) = allocation.reservations.iter().position(|r| *r == reservation_id) else {
            return;
        };
        allocation.reservations.remove(pos);
        if let Some(reservation) = self.reservations.get_mut(&reservation_id)
            && reservation.allocation == Some(allocation_id)
        {
            reservation.allocation = None;
        }
    }

    /// Reassign the allocation of a reservation, clearing the old link first.
    pub fn set_reservation_allocation(&mut self, reservation_id: ReservationId, allocation: Option<AllocationId>) {
        let current = self.res(reservation_id).allocation;
        if current == allocation {
            return;
        }
        if let Some(old) = current {
            self.allocation_remove_reservation(old, reservation_id);
        }
        if let Some(new) = allocation {
            self.allocation_add_reservation(new, reservation_id);
        }
    }

    pub fn allocation_add_child_request(&mut self, allocation_id: AllocationId, child: ReservationRequestId) {
        if self.alloc(allocation_id).child_reservation_requests.contains(&child) {
            return;
        }
        let previous = match &self.req(child).kind {
            RequestKind::Single { parent_allocation, .. } => *parent_allocation,
            RequestKind::Set { .. } => {
                panic!("Reservation request set '{child}' cannot be a child reservation request.")
            }
        };
        if let Some(previous) = previous {
            self.allocation_remove_child_request(previous, child);
        }
        self.alloc_mut(allocation_id).child_reservation_requests.push(child);
        if let RequestKind::Single { parent_allocation, .. } = &mut self.req_mut(child).kind {
            *parent_allocation = Some(allocation_id);
        }
    }

    pub fn allocation_remove_child_request(&mut self, allocation_id: AllocationId, child: ReservationRequestId) {
        let children = &mut self.alloc_mut(allocation_id).child_reservation_requests;
        let Some(pos) = children.iter().position(|c| *c == child) else {
            return;
        };
        children.remove(pos);
        if let Some(request) = self.requests.get_mut(&child)
            && let RequestKind::Single { parent_allocation, .. } = &mut request.kind
            && *parent_allocation == Some(allocation_id)
        {
            *parent_allocation = None;
        }
    }

    pub fn current_reservation(&self, allocation: AllocationId) -> Option<ReservationId> {
        self.alloc(allocation).current_reservation()
    }

    /// Hard-delete every revision of `id` (and, recursively, its child requests).
    ///
    /// The allocation is marked deleted and loses its request; its reservations are detached
    /// and returned so the caller can decide where they go.
    pub fn hard_delete_request(&mut self, id: ReservationRequestId, acl: &dyn AclManager) -> Vec<ReservationId> {
        let allocation = self.req(id).allocation;
        self.mark_allocation_deleted(allocation);
        for child in self.alloc(allocation).child_reservation_requests.clone() {
            self.allocation_remove_child_request(allocation, child);
            for detached in self.hard_delete_request(child, acl) {
                self.allocation_add_reservation(allocation, detached);
            }
        }
        let detached = self.alloc(allocation).reservations.clone();
        for reservation in &detached {
            self.allocation_remove_reservation(allocation, *reservation);
        }
        acl.delete_acl_entries_for_entity(&self.request_identifier(id));
        self.requests.retain(|_, r| r.allocation != allocation);
        self.alloc_mut(allocation).reservation_request = None;
        detached
    }

    /// Remove a deleted allocation holding nothing, with all its request revisions.
    pub fn remove_allocation(&mut self, id: AllocationId) {
        let allocation = self.alloc(id);
        assert!(
            allocation.is_deleted()
                && allocation.reservations.is_empty()
                && allocation.child_reservation_requests.is_empty(),
            "Allocation '{id}' can be removed only when deleted and empty."
        );
        self.allocations.remove(&id);
        self.requests.retain(|_, r| r.allocation != id);
    }

    // ── Reservation tree ─────────────────────────────────────

    pub fn create_reservation(&mut self, user_id: &str, slot: Span, kind: ReservationKind) -> ReservationId {
        let id = ReservationId(self.allocate_id());
        if let Some(key) = kind.target_key() {
            self.index.insert(key, slot, id);
        }
        self.reservations.insert(id, Reservation::new(id, user_id, slot, kind));
        id
    }

    fn remove_reservation_entity(&mut self, id: ReservationId) -> Option<Reservation> {
        let reservation = self.reservations.remove(&id)?;
        if let Some(key) = reservation.kind.target_key() {
            self.index.remove(key, id);
        }
        Some(reservation)
    }

    /// Move a reservation, its whole subtree and every attached executable to `slot`.
    pub fn set_slot(&mut self, id: ReservationId, slot: Span) {
        let mut stack = vec![id];
        let mut touched_allocations = Vec::new();
        while let Some(current) = stack.pop() {
            let reservation = self.res_mut(current);
            let previous = reservation.slot;
            reservation.slot = slot;
            stack.extend(reservation.child_reservations.iter().copied());
            let key = reservation.kind.target_key();
            let executable = reservation.executable;
            touched_allocations.extend(reservation.allocation);
            if let Some(key) = key
                && previous != slot
            {
                self.index.remove(key, current);
                self.index.insert(key, slot, current);
            }
            if let Some(executable) = executable {
                self.set_executable_slot(executable, slot);
                self.refresh_summary(executable, Some(current));
            }
        }
        for allocation in touched_allocations {
            self.sort_allocation_reservations(allocation);
        }
    }

    fn sort_allocation_reservations(&mut self, id: AllocationId) {
        let mut reservations = std::mem::take(&mut self.alloc_mut(id).reservations);
        reservations.sort_by_key(|r| self.reservations.get(r).map_or(Ms::MIN, |r| r.slot.start));
        self.alloc_mut(id).reservations = reservations;
    }

    /// Ownership is tree-wide: every descendant takes the new owner.
    pub fn set_user_id(&mut self, id: ReservationId, user_id: &str) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let reservation = self.res_mut(current);
            reservation.user_id = user_id.to_string();
            stack.extend(reservation.child_reservations.iter().copied());
        }
    }

    pub fn set_parent_reservation(&mut self, child: ReservationId, parent: Option<ReservationId>) {
        let previous = self.res(child).parent_reservation;
        if previous == parent {
            return;
        }
        if let Some(parent) = parent {
            assert!(
                !self.all_reservations(child).contains(&parent),
                "Reservation '{parent}' cannot become the parent of its own descendant '{child}'."
            );
        }
        if let Some(previous) = previous {
            self.res_mut(previous).child_reservations.retain(|c| *c != child);
        }
        self.res_mut(child).parent_reservation = parent;
        if let Some(parent) = parent {
            self.res_mut(parent).child_reservations.push(child);
        }
    }

    pub fn add_child_reservation(&mut self, parent: ReservationId, child: ReservationId) {
        if !self.res(parent).child_reservations.contains(&child) {
            self.set_parent_reservation(child, Some(parent));
        }
    }

    pub fn remove_child_reservation(&mut self, parent: ReservationId, child: ReservationId) {
        if self.res(parent).child_reservations.contains(&child) {
            self.set_parent_reservation(child, None);
        }
    }

    pub fn clear_child_reservations(&mut self, parent: ReservationId) {
        for child in self.res(parent).child_reservations.clone() {
            self.set_parent_reservation(child, None);
        }
    }

    pub fn top_reservation(&self, id: ReservationId) -> ReservationId {
        let mut current = id;
        while let Some(parent) = self.res(current).parent_reservation {
            current = parent;
        }
        current
    }

    /// The reservation actually granting the target; reused reservations point elsewhere.
    pub fn allocation_reservation(&self, id: ReservationId) -> ReservationId {
        match self.res(id).kind {
            ReservationKind::Existing { reused_reservation } => reused_reservation,
            _ => id,
        }
    }

    /// Follow reuse links until a reservation resolves to itself. A link to a reservation
    /// that was already purged ends the chain.
    pub fn target_reservation(&self, id: ReservationId) -> ReservationId {
        let mut visited = HashSet::from([id]);
        let mut current = id;
        loop {
            let next = self.allocation_reservation(current);
            if next == current || !self.reservations.contains_key(&next) {
                return current;
            }
            assert!(
                visited.insert(next),
                "Reservation '{id}' reuses itself through reservation '{next}'."
            );
            current = next;
        }
    }

    /// `id` and every descendant.
    pub fn all_reservations(&self, id: ReservationId) -> HashSet<ReservationId> {
        let mut all = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if all.insert(current) {
                stack.extend(self.res(current).child_reservations.iter().copied());
            }
        }
        all
    }

    /// Descendants of `id` in pre-order, `id` itself excluded.
    pub fn nested_reservations(&self, id: ReservationId) -> Vec<ReservationId> {
        let mut nested = Vec::new();
        let mut stack: Vec<_> = self.res(id).child_reservations.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            nested.push(current);
            stack.extend(self.res(current).child_reservations.iter().rev().copied());
        }
        nested
    }

    /// Whether the subtree already began or has a session running on a device.
    pub fn is_history(&self, id: ReservationId, now: Ms) -> bool {
        self.all_reservations(id).into_iter().any(|node| {
            let reservation = self.res(node);
            reservation.slot.start < now
                || reservation
                    .executable
                    .and_then(|e| self.executables.get(&e))
                    .is_some_and(|e| e.state.is_started())
        })
    }

    /// Request owning the tree `id` belongs to, resolved up to a set's parent request.
    pub fn reservation_top_request(&self, id: ReservationId) -> Option<ReservationRequestId> {
        let top = self.res(self.top_reservation(id));
        let request = self.allocations.get(&top.allocation?)?.reservation_request?;
        Some(self.top_reservation_request(request))
    }

    /// A child of a set resolves to the set's current revision.
    pub fn top_reservation_request(&self, id: ReservationRequestId) -> ReservationRequestId {
        self.req(id)
            .kind
            .parent_allocation()
            .and_then(|a| self.allocations.get(&a))
            .and_then(|a| a.reservation_request)
            .unwrap_or(id)
    }

    // ── Executables ──────────────────────────────────────────

    pub fn create_executable(&mut self, slot: Span, kind: ExecutableKind) -> ExecutableId {
        let id = ExecutableId(self.allocate_id());
        self.executables.insert(id, Executable::new(id, slot, kind));
        id
    }

    pub fn add_child_executable(&mut self, parent: ExecutableId, child: ExecutableId) {
        let children = &mut self.exe_mut(parent).child_executables;
        if !children.contains(&child) {
            children.push(child);
        }
    }

    pub fn add_executable_service(&mut self, executable: ExecutableId, slot: Span, active: bool) -> u64 {
        let id = self.allocate_id();
        self.exe_mut(executable).services.push(ExecutableService { id, slot, active });
        id
    }

    pub fn set_reservation_executable(&mut self, reservation: ReservationId, executable: Option<ExecutableId>) {
        let previous = std::mem::replace(&mut self.res_mut(reservation).executable, executable);
        if let Some(previous) = previous {
            self.refresh_summary(previous, None);
        }
        if let Some(executable) = executable {
            self.refresh_summary(executable, Some(reservation));
        }
    }

    fn set_executable_slot(&mut self, id: ExecutableId, slot: Span) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let executable = self.exe_mut(current);
            if executable.slot != slot {
                executable.slot = slot;
                executable.modified = true;
            }
            stack.extend(executable.child_executables.iter().copied());
        }
    }

    /// Clamp `id` and its child executables at `now`; returns how many moved.
    fn clamp_executable(&mut self, id: ExecutableId, now: Ms) -> usize {
        let mut clamped = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let executable = self.exe_mut(current);
            if executable.clamp_to(now) {
                clamped += 1;
            }
            stack.extend(executable.child_executables.iter().copied());
        }
        clamped
    }

    pub(crate) fn refresh_summary(&mut self, id: ExecutableId, reservation: Option<ReservationId>) {
        if let Some(executable) = self.executables.get(&id) {
            self.summaries.insert(id, ExecutableSummary::of(executable, reservation));
        }
    }

    pub(crate) fn owning_reservation(&self, executable: ExecutableId) -> Option<ReservationId> {
        self.reservations
            .values()
            .find(|r| r.executable == Some(executable))
            .map(|r| r.id)
    }

    // ── Deletion ─────────────────────────────────────────────

    /// Delete `id` with its subtree: detach every node, drop their ACL entries, clamp running
    /// executables at `now`, then physically remove the nodes. Executables outlive their
    /// reservations so the executor can still stop them.
    pub fn delete_reservation(&mut self, id: ReservationId, now: Ms, acl: &dyn AclManager) -> DeletedTree {
        let root_executable = self.res(id).executable;
        let mut nodes = vec![id];
        nodes.extend(self.nested_reservations(id));

        for node in &nodes {
            self.set_parent_reservation(*node, None);
        }
        for node in &nodes {
            acl.delete_acl_entries_for_entity(&self.reservation_identifier(*node));
        }
        let mut executables_clamped = 0;
        for node in &nodes {
            if let Some(executable) = self.res(*node).executable {
                executables_clamped += self.clamp_executable(executable, now);
            }
        }
        for node in &nodes {
            if let Some(allocation) = self.res(*node).allocation {
                self.allocation_remove_reservation(allocation, *node);
            }
            if let Some(removed) = self.remove_reservation_entity(*node)
                && let Some(executable) = removed.executable
                && Some(executable) != root_executable
            {
                self.refresh_summary(executable, None);
            }
        }
        if let Some(executable) = root_executable {
            self.refresh_summary(executable, None);
        }
        DeletedTree {
            reservations: nodes,
            executables_clamped,
        }
    }

    // ── Persistence ──────────────────────────────────────────

    /// Fatal check run before every commit.
    pub fn validate(&self) {
        for reservation in self.reservations.values() {
            assert!(
                reservation.slot.is_valid(),
                "Reservation '{}' has slot start after slot end {}.",
                reservation.id,
                reservation.slot
            );
        }
        for executable in self.executables.values() {
            assert!(
                executable.slot.is_valid(),
                "Executable '{}' has slot start after slot end {}.",
                executable.id,
                executable.slot
            );
        }
        for allocation in self.allocations.values() {
            assert!(
                allocation.is_deleted() || allocation.reservation_request.is_some(),
                "Allocation '{}' must reference a reservation request unless it is deleted.",
                allocation.id
            );
        }
    }

    /// Journal records turning `before` into `self`.
    pub(crate) fn changes_since(&self, before: &Store) -> Vec<Event> {
        let mut events = Vec::new();
        if self.next_id != before.next_id {
            events.push(Event::SequenceAdvanced { next_id: self.next_id });
        }
        diff_map(&before.executables, &self.executables, &mut events,
            |e| Event::ExecutableStored { executable: e.clone() },
            |id| Event::ExecutableRemoved { id });
        diff_map(&before.requests, &self.requests, &mut events,
            |r| Event::RequestStored { request: r.clone() },
            |id| Event::RequestRemoved { id });
        diff_map(&before.allocations, &self.allocations, &mut events,
            |a| Event::AllocationStored { allocation: a.clone() },
            |id| Event::AllocationRemoved { id });
        diff_map(&before.reservations, &self.reservations, &mut events,
            |r| Event::ReservationStored { reservation: r.clone() },
            |id| Event::ReservationRemoved { id });
        events
    }

    /// Minimal journal recreating the current state.
    pub(crate) fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::SequenceAdvanced { next_id: self.next_id }];
        events.extend(self.executables.values().map(|e| Event::ExecutableStored { executable: e.clone() }));
        events.extend(self.requests.values().map(|r| Event::RequestStored { request: r.clone() }));
        events.extend(self.allocations.values().map(|a| Event::AllocationStored { allocation: a.clone() }));
        events.extend(self.reservations.values().map(|r| Event::ReservationStored { reservation: r.clone() }));
        events
    }

    pub(crate) fn apply_event(&mut self, event: Event) {
        match event {
            Event::RequestStored { request } => {
                self.requests.insert(request.id, request);
            }
            Event::RequestRemoved { id } => {
                self.requests.remove(&id);
            }
            Event::AllocationStored { allocation } => {
                self.allocations.insert(allocation.id, allocation);
            }
            Event::AllocationRemoved { id } => {
                self.allocations.remove(&id);
            }
            Event::ReservationStored { reservation } => {
                self.reservations.insert(reservation.id, reservation);
            }
            Event::ReservationRemoved { id } => {
                self.reservations.remove(&id);
            }
            Event::ExecutableStored { executable } => {
                self.executables.insert(executable.id, executable);
            }
            Event::ExecutableRemoved { id } => {
                self.executables.remove(&id);
            }
            Event::SequenceAdvanced { next_id } => {
                self.next_id = self.next_id.max(next_id);
            }
        }
    }

    /// Fold replayed events and rebuild the slot index and executable summaries.
    pub(crate) fn from_events(domain: LocalDomain, events: Vec<Event>) -> Self {
        let mut store = Store::new(domain);
        for event in events {
            store.apply_event(event);
        }
        store.rebuild_derived();
        store
    }

    fn rebuild_derived(&mut self) {
        self.index.clear();
        self.summaries.clear();
        for reservation in self.reservations.values() {
            if let Some(key) = reservation.kind.target_key() {
                self.index.insert(key, reservation.slot, reservation.id);
            }
        }
        let owners: HashMap<ExecutableId, ReservationId> = self
            .reservations
            .values()
            .filter_map(|r| r.executable.map(|e| (e, r.id)))
            .collect();
        for executable in self.executables.values() {
            self.summaries.insert(
                executable.id,
                ExecutableSummary::of(executable, owners.get(&executable.id).copied()),
            );
        }
    }
}

/// Outcome of [`Store::delete_reservation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedTree {
    /// Deleted nodes, subtree root first.
    pub reservations: Vec<ReservationId>,
    pub executables_clamped: usize,
}

fn diff_map<K: Ord + Copy, V: PartialEq>(
    before: &BTreeMap<K, V>,
    after: &BTreeMap<K, V>,
    events: &mut Vec<Event>,
    stored: impl Fn(&V) -> Event,
    removed: impl Fn(K) -> Event,
) {
    for (id, value) in after {
        if before.get(id) != Some(value) {
            events.push(stored(value));
        }
    }
    for id in before.keys() {
        if !after.contains_key(id) {
            events.push(removed(*id));
        }
    }
}
