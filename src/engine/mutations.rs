use std::collections::HashSet;
use std::time::Instant;

use crate::acl::{AclManager, ObjectRole, PendingAcl};
use crate::executable::{Executable, ExecutableState, Executor};
use crate::model::*;
use crate::object_type::ObjectType;
use crate::observability;
use crate::participant::Synchronizable;

use super::conflict::{now_ms, validate_slot};
use super::store::{DeletedTree, Store};
use super::tasks::{ReservationTask, SchedulerContext};
use super::{Engine, EngineError};

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub requests_deleted: usize,
    pub allocations_purged: usize,
    pub reservations_deleted: usize,
    pub executables_clamped: usize,
    pub allocations_removed: usize,
}

fn validate_kind(kind: &RequestKind) -> Result<(), EngineError> {
    match kind {
        RequestKind::Single { slot, .. } => validate_slot(slot),
        RequestKind::Set { slots } => slots.iter().try_for_each(validate_slot),
    }
}

fn request_not_found(store: &Store, id: ReservationRequestId) -> EngineError {
    EngineError::NotFound(store.domain().format_id(ObjectType::ReservationRequest, id.get()))
}

fn active_request(store: &Store, id: ReservationRequestId) -> Result<&ReservationRequest, EngineError> {
    let request = store.request(id).ok_or_else(|| request_not_found(store, id))?;
    match request.state {
        RequestState::Active => Ok(request),
        RequestState::Modified => Err(EngineError::InvalidState {
            id: store.request_identifier(id).to_string(),
            reason: "has been replaced by a newer revision",
        }),
        RequestState::Deleted => Err(EngineError::InvalidState {
            id: store.request_identifier(id).to_string(),
            reason: "is deleted",
        }),
    }
}

fn record_deleted(deleted: &DeletedTree) {
    metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(deleted.reservations.len() as u64);
    metrics::counter!(observability::EXECUTABLES_CLAMPED_TOTAL).increment(deleted.executables_clamped as u64);
}

impl Engine {
    pub async fn create_reservation_request(
        &self,
        draft: ReservationRequestDraft,
    ) -> Result<ReservationRequestId, EngineError> {
        validate_kind(&draft.kind)?;
        let id = self
            .transaction("create_request", |store| Ok(store.insert_request(draft)))
            .await?;
        metrics::counter!(observability::REQUESTS_CREATED_TOTAL).increment(1);
        tracing::debug!(request = %id, "reservation request created");
        Ok(id)
    }

    /// Add a child request for `slot` to the active set `parent`. The child inherits the
    /// parent's specification (with fresh identity), author, purpose, priority and reuse.
    pub async fn create_child_reservation_request(
        &self,
        parent: ReservationRequestId,
        slot: Span,
    ) -> Result<ReservationRequestId, EngineError> {
        validate_slot(&slot)?;
        let id = self
            .transaction("create_child_request", |store| {
                let set = active_request(store, parent)?;
                if !set.kind.is_set() {
                    return Err(EngineError::InvalidState {
                        id: store.request_identifier(parent).to_string(),
                        reason: "is not a reservation request set",
                    });
                }
                let parent_allocation = set.allocation;
                let mut draft = ReservationRequestDraft::single(
                    slot,
                    set.created_by.clone(),
                    set.specification.clone_fresh(),
                );
                draft.updated_by = set.updated_by.clone();
                draft.purpose = set.purpose;
                draft.priority = set.priority;
                draft.reused_allocation = set.reused_allocation;
                draft.reused_allocation_mandatory = set.reused_allocation_mandatory;
                let child = store.insert_request(draft);
                store.allocation_add_child_request(parent_allocation, child);
                Ok(child)
            })
            .await?;
        metrics::counter!(observability::REQUESTS_CREATED_TOTAL).increment(1);
        Ok(id)
    }

    /// Apply `draft` to the active request `id`.
    ///
    /// Returns the id of the new revision and `true`, or `id` and `false` when the draft
    /// matches the current revision and nothing was stored.
    pub async fn modify_reservation_request(
        &self,
        id: ReservationRequestId,
        draft: ReservationRequestDraft,
    ) -> Result<(ReservationRequestId, bool), EngineError> {
        validate_kind(&draft.kind)?;
        self.transaction("modify_request", |store| {
            let current = active_request(store, id)?;
            if current.kind.parent_allocation().is_some() && draft.kind.is_set() {
                return Err(EngineError::InvalidState {
                    id: store.request_identifier(id).to_string(),
                    reason: "is a child request and cannot become a set",
                });
            }
            let mut revision = current.clone();
            let incoming = draft.into_request(id, current.allocation);
            if !revision.synchronize_from(&incoming) {
                return Ok((id, false));
            }
            let revised = store.insert_revision(id, revision);
            tracing::debug!(previous = %id, revision = %revised, "reservation request modified");
            Ok((revised, true))
        })
        .await
    }

    /// Soft-delete the request: its allocation is marked deleted and its child requests are
    /// hard-deleted, their reservations moving to the parent allocation for purging.
    ///
    /// Fails when any other request still depends on the allocation. Child requests of a set
    /// go away with their set and cannot be deleted on their own.
    pub async fn delete_reservation_request(&self, id: ReservationRequestId) -> Result<(), EngineError> {
        let acl = PendingAcl::new();
        self.transaction("delete_request", |store| {
            let request = active_request(store, id)?;
            if request.kind.parent_allocation().is_some() {
                return Err(EngineError::InvalidState {
                    id: store.request_identifier(id).to_string(),
                    reason: "is a child request and is deleted with its set",
                });
            }
            let allocation = request.allocation;
            let reused_by: Vec<String> = store
                .reservation_requests_with_reused_allocation(allocation)
                .into_iter()
                .filter(|r| store.req(*r).allocation != allocation)
                .map(|r| store.request_identifier(r).to_string())
                .collect();
            if !reused_by.is_empty() {
                return Err(EngineError::AllocationReused {
                    request: store.request_identifier(id).to_string(),
                    reused_by,
                });
            }
            store.mark_allocation_deleted(allocation);
            for child in store.alloc(allocation).child_reservation_requests.clone() {
                store.allocation_remove_child_request(allocation, child);
                for detached in store.hard_delete_request(child, &acl) {
                    store.allocation_add_reservation(allocation, detached);
                }
            }
            store.req_mut(id).state = RequestState::Deleted;
            Ok(())
        })
        .await?;
        acl.commit(self.acl.as_ref());
        tracing::info!(request = %id, "reservation request deleted");
        Ok(())
    }

    /// Allocate the slot of the active single request `request_id` by running `task`.
    ///
    /// Reservations the allocation already holds in that slot are replaced. On success every
    /// node of the new tree is owned by the requesting user; on failure nothing changes.
    pub async fn allocate(
        &self,
        request_id: ReservationRequestId,
        task: &mut dyn ReservationTask,
    ) -> Result<ReservationId, EngineError> {
        let acl = PendingAcl::new();
        let result = self
            .transaction("allocate", |store| {
                let request = active_request(store, request_id)?.clone();
                let RequestKind::Single { slot, .. } = request.kind else {
                    return Err(EngineError::InvalidState {
                        id: store.request_identifier(request_id).to_string(),
                        reason: "is a set and is allocated through its child requests",
                    });
                };
                let allocation = request.allocation;
                if store.alloc(allocation).state != AllocationState::ActiveWithoutChildReservationRequests {
                    return Err(EngineError::InvalidState {
                        id: store.request_identifier(request_id).to_string(),
                        reason: "has an allocation which cannot hold reservations",
                    });
                }
                // child requests left over from a former set are adopted by the next cleanup
                if !store.alloc(allocation).child_reservation_requests.is_empty() {
                    return Err(EngineError::InvalidState {
                        id: store.request_identifier(request_id).to_string(),
                        reason: "still has child requests awaiting cleanup",
                    });
                }
                let now = now_ms();
                let replaced: Vec<ReservationId> = store
                    .alloc(allocation)
                    .reservations
                    .iter()
                    .copied()
                    .filter(|r| store.res(*r).slot.overlaps(&slot))
                    .collect();
                let replaced: Vec<DeletedTree> = replaced
                    .into_iter()
                    .map(|previous| store.delete_reservation(previous, now, &acl))
                    .collect();

                let user_id = request.updated_by.clone().unwrap_or_else(|| request.created_by.clone());
                let mut ctx = SchedulerContext {
                    store: &mut *store,
                    request: &request,
                    user_id: &user_id,
                    now,
                };
                let reservation = task.perform(&mut ctx, slot)?;
                store.set_user_id(reservation, &user_id);
                store.allocation_add_reservation(allocation, reservation);
                for node in store.all_reservations(reservation) {
                    acl.create_acl_entry(&store.reservation_identifier(node), &user_id, ObjectRole::Owner);
                }
                Ok((reservation, replaced))
            })
            .await;
        match result {
            Ok((reservation, replaced)) => {
                acl.commit(self.acl.as_ref());
                replaced.iter().for_each(record_deleted);
                metrics::counter!(observability::RESERVATIONS_ALLOCATED_TOTAL).increment(1);
                tracing::info!(
                    request = %request_id,
                    reservation = %reservation,
                    replaced = replaced.len(),
                    "reservation allocated"
                );
                Ok(reservation)
            }
            Err(e) => {
                metrics::counter!(observability::ALLOCATION_FAILURES_TOTAL, "reason" => e.kind()).increment(1);
                tracing::warn!(request = %request_id, error = %e, "allocation failed");
                Err(e)
            }
        }
    }

    /// Delete the reservation `id` with its whole subtree at time `now`.
    pub async fn delete_reservation(&self, id: ReservationId, now: Ms) -> Result<DeletedTree, EngineError> {
        let acl = PendingAcl::new();
        let deleted = self
            .transaction("delete_reservation", |store| {
                store.get_reservation(id)?;
                Ok(store.delete_reservation(id, now, &acl))
            })
            .await?;
        acl.commit(self.acl.as_ref());
        record_deleted(&deleted);
        Ok(deleted)
    }

    /// One cleanup pass:
    /// 1. hard-delete child requests whose parent allocation no longer accepts them,
    /// 2. purge the reservations of deleted allocations and of allocations that must hold none
    ///    (allocations reused by others in the same pass go last),
    /// 3. delete roots that belong to no live allocation,
    /// 4. drop deleted allocations left with nothing.
    pub async fn run_cleanup(&self, now: Ms) -> Result<CleanupReport, EngineError> {
        let started = Instant::now();
        let pending = PendingAcl::new();
        let report = self
            .transaction("cleanup", |store| {
                let acl: &dyn AclManager = &pending;
                let mut report = CleanupReport::default();
                let delete_tree = |store: &mut Store, root: ReservationId, report: &mut CleanupReport| {
                    let tree = store.delete_reservation(root, now, acl);
                    report.reservations_deleted += tree.reservations.len();
                    report.executables_clamped += tree.executables_clamped;
                };

                let orphans: Vec<ReservationRequestId> = store
                    .orphan_reservation_requests_for_deletion()
                    .iter()
                    .map(|r| r.id)
                    .collect();
                for request in orphans {
                    let Some(parent) = store.request(request).and_then(|r| r.kind.parent_allocation()) else {
                        continue;
                    };
                    store.allocation_remove_child_request(parent, request);
                    let detached = store.hard_delete_request(request, acl);
                    report.requests_deleted += 1;
                    if store.alloc(parent).state == AllocationState::ActiveWithoutChildReservationRequests {
                        for reservation in detached {
                            store.allocation_add_reservation(parent, reservation);
                        }
                    }
                }

                let mut allocations: Vec<AllocationId> = store
                    .allocations_reservations_for_deletion()
                    .iter()
                    .map(|a| a.id)
                    .collect();
                let referenced = referenced_allocations(store, &allocations);
                allocations.sort_by_key(|a| referenced.contains(a));
                for allocation in allocations {
                    for reservation in store.alloc(allocation).reservations.clone() {
                        if store.reservation(reservation).is_some() {
                            delete_tree(store, reservation, &mut report);
                        }
                    }
                    report.allocations_purged += 1;
                    let purged = store.alloc(allocation);
                    if purged.is_deleted()
                        && purged.reservation_request.is_none()
                        && purged.child_reservation_requests.is_empty()
                    {
                        store.remove_allocation(allocation);
                        report.allocations_removed += 1;
                    }
                }

                let roots: Vec<ReservationId> = store.reservations_for_deletion().iter().map(|r| r.id).collect();
                for root in roots {
                    if store.reservation(root).is_some() {
                        delete_tree(store, root, &mut report);
                    }
                }

                let empty: Vec<AllocationId> = store
                    .allocations()
                    .filter(|a| a.is_deleted() && a.reservations.is_empty() && a.child_reservation_requests.is_empty())
                    .map(|a| a.id)
                    .collect();
                for allocation in empty {
                    store.remove_allocation(allocation);
                    report.allocations_removed += 1;
                }
                Ok(report)
            })
            .await?;
        pending.commit(self.acl.as_ref());
        metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(report.reservations_deleted as u64);
        metrics::counter!(observability::EXECUTABLES_CLAMPED_TOTAL).increment(report.executables_clamped as u64);
        metrics::histogram!(observability::CLEANUP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    pub async fn start_executable(
        &self,
        id: ExecutableId,
        executor: &mut dyn Executor,
    ) -> Result<ExecutableState, EngineError> {
        self.executable_transition("start_executable", id, |e| e.start(executor))
            .await
    }

    /// Returns `None` when the executor had nothing to update with, `Some(false)` when the
    /// update must be retried.
    pub async fn update_executable(
        &self,
        id: ExecutableId,
        executor: &mut dyn Executor,
    ) -> Result<Option<bool>, EngineError> {
        self.executable_transition("update_executable", id, |e| e.update(executor))
            .await
    }

    pub async fn stop_executable(
        &self,
        id: ExecutableId,
        executor: &mut dyn Executor,
    ) -> Result<ExecutableState, EngineError> {
        self.executable_transition("stop_executable", id, |e| e.stop(executor))
            .await
    }

    pub async fn finalize_executable(
        &self,
        id: ExecutableId,
        executor: &mut dyn Executor,
    ) -> Result<ExecutableState, EngineError> {
        self.executable_transition("finalize_executable", id, |e| e.finalize(executor))
            .await
    }

    async fn executable_transition<T>(
        &self,
        operation: &'static str,
        id: ExecutableId,
        f: impl FnOnce(&mut Executable) -> T,
    ) -> Result<T, EngineError> {
        self.transaction(operation, |store| {
            if store.executable(id).is_none() {
                return Err(EngineError::NotFound(
                    store.domain().format_id(ObjectType::Executable, id.get()),
                ));
            }
            let value = f(store.exe_mut(id));
            let owner = store.owning_reservation(id);
            store.refresh_summary(id, owner);
            Ok(value)
        })
        .await
    }

    /// Global identifier of an existing reservation.
    pub async fn format_reservation_id(&self, id: ReservationId) -> Result<String, EngineError> {
        self.read(|s| {
            s.get_reservation(id)?;
            Ok(s.reservation_identifier(id).to_string())
        })
        .await
    }

    /// Resolve a local or global reservation identifier of this domain.
    ///
    /// A missing reservation is reported with `identifier` exactly as given.
    pub async fn get_reservation_by_identifier(&self, identifier: &str) -> Result<Reservation, EngineError> {
        let Some(id) = self.domain.parse_local_id(identifier, ObjectType::Reservation)? else {
            return Err(EngineError::NotFound(identifier.to_string()));
        };
        self.read(|s| {
            s.reservation(ReservationId(id))
                .cloned()
                .ok_or_else(|| EngineError::NotFound(identifier.to_string()))
        })
        .await
    }
}

/// Allocations among `allocations` owning a reservation that an `Existing` reservation of
/// another listed allocation reuses.
fn referenced_allocations(store: &Store, allocations: &[AllocationId]) -> HashSet<AllocationId> {
    let listed: HashSet<AllocationId> = allocations.iter().copied().collect();
    let mut referenced = HashSet::new();
    for allocation in allocations {
        for root in &store.alloc(*allocation).reservations {
            for node in store.all_reservations(*root) {
                let ReservationKind::Existing { reused_reservation } = store.res(node).kind else {
                    continue;
                };
                let Some(owner) = store
                    .reservation(reused_reservation)
                    .and_then(|r| store.reservation(store.top_reservation(r.id)))
                    .and_then(|top| top.allocation)
                else {
                    continue;
                };
                if owner != *allocation && listed.contains(&owner) {
                    referenced.insert(owner);
                }
            }
        }
    }
    referenced
}
