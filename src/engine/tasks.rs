use std::collections::BTreeSet;

use thiserror::Error;

use crate::executable::ExecutableKind;
use crate::model::*;
use crate::participant::Technology;

use super::store::Store;

/// Typed allocation failures reported back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("resource {resource} is not an endpoint")]
    ResourceNotEndpoint { resource: ResourceId },
    #[error("no endpoint supports technologies {technologies:?}")]
    EndpointNotFound { technologies: Vec<Technology> },
    #[error("resource {resource} is already allocated in {slot}")]
    ResourceAlreadyAllocated { resource: ResourceId, slot: Span },
    #[error("value '{value}' of provider {value_provider} is already allocated in {slot}")]
    ValueAlreadyAllocated {
        value_provider: ResourceId,
        value: String,
        slot: Span,
    },
    #[error("reservation {reservation} is not available in {slot}")]
    ReservationNotAvailable { reservation: ReservationId, slot: Span },
    #[error("reservation {reservation} is already reused in {slot}")]
    ReservationAlreadyReused { reservation: ReservationId, slot: Span },
}

impl SchedulerError {
    pub fn reason(&self) -> &'static str {
        match self {
            SchedulerError::ResourceNotEndpoint { .. } => "resource_not_endpoint",
            SchedulerError::EndpointNotFound { .. } => "endpoint_not_found",
            SchedulerError::ResourceAlreadyAllocated { .. } => "resource_already_allocated",
            SchedulerError::ValueAlreadyAllocated { .. } => "value_already_allocated",
            SchedulerError::ReservationNotAvailable { .. } => "reservation_not_available",
            SchedulerError::ReservationAlreadyReused { .. } => "reservation_already_reused",
        }
    }
}

/// What a task sees while it runs inside an allocation transaction.
pub struct SchedulerContext<'a> {
    pub store: &'a mut Store,
    pub request: &'a ReservationRequest,
    pub user_id: &'a str,
    pub now: Ms,
}

/// Produces the reservation tree for one slot of a request, or a typed failure.
///
/// Overlap queries made through `ctx.store` run in the same transaction that stores the
/// result, so two tasks can never both observe a free target.
pub trait ReservationTask: Send {
    fn perform(&mut self, ctx: &mut SchedulerContext<'_>, slot: Span) -> Result<ReservationId, SchedulerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub technologies: BTreeSet<Technology>,
    pub is_endpoint: bool,
}

/// Books one fixed resource, optionally materializing an executable for it.
pub struct ResourceReservationTask {
    resource: ResourceDescriptor,
    technologies: BTreeSet<Technology>,
    executable: Option<ExecutableKind>,
}

impl ResourceReservationTask {
    pub fn new(resource: ResourceDescriptor) -> Self {
        Self {
            resource,
            technologies: BTreeSet::new(),
            executable: None,
        }
    }

    /// Require an endpoint supporting all of `technologies`.
    pub fn requiring(mut self, technologies: impl IntoIterator<Item = Technology>) -> Self {
        self.technologies = technologies.into_iter().collect();
        self
    }

    pub fn with_executable(mut self, kind: ExecutableKind) -> Self {
        self.executable = Some(kind);
        self
    }
}

impl ReservationTask for ResourceReservationTask {
    fn perform(&mut self, ctx: &mut SchedulerContext<'_>, slot: Span) -> Result<ReservationId, SchedulerError> {
        let resource = self.resource.id;
        if !self.technologies.is_empty() {
            if !self.resource.is_endpoint {
                return Err(SchedulerError::ResourceNotEndpoint { resource });
            }
            if !self.technologies.is_subset(&self.resource.technologies) {
                return Err(SchedulerError::EndpointNotFound {
                    technologies: self.technologies.iter().copied().collect(),
                });
            }
        }
        if !ctx.store.resource_reservations(resource, slot).is_empty() {
            return Err(SchedulerError::ResourceAlreadyAllocated { resource, slot });
        }
        let reservation = ctx
            .store
            .create_reservation(ctx.user_id, slot, ReservationKind::Resource { resource });
        if let Some(kind) = self.executable.clone() {
            let executable = ctx.store.create_executable(slot, kind);
            ctx.store.set_reservation_executable(reservation, Some(executable));
        }
        Ok(reservation)
    }
}

/// Books a concrete value (e.g. a room number) from a value provider.
pub struct ValueReservationTask {
    value_provider: ResourceId,
    value: String,
}

impl ValueReservationTask {
    pub fn new(value_provider: ResourceId, value: impl Into<String>) -> Self {
        Self {
            value_provider,
            value: value.into(),
        }
    }
}

impl ReservationTask for ValueReservationTask {
    fn perform(&mut self, ctx: &mut SchedulerContext<'_>, slot: Span) -> Result<ReservationId, SchedulerError> {
        let taken = ctx
            .store
            .value_reservations(self.value_provider, slot)
            .into_iter()
            .any(|r| matches!(&r.kind, ReservationKind::Value { value, .. } if *value == self.value));
        if taken {
            return Err(SchedulerError::ValueAlreadyAllocated {
                value_provider: self.value_provider,
                value: self.value.clone(),
                slot,
            });
        }
        Ok(ctx.store.create_reservation(
            ctx.user_id,
            slot,
            ReservationKind::Value {
                value_provider: self.value_provider,
                value: self.value.clone(),
            },
        ))
    }
}

/// Reuses the grant of an already allocated reservation.
pub struct ReuseReservationTask {
    reused: ReservationId,
}

impl ReuseReservationTask {
    pub fn new(reused: ReservationId) -> Self {
        Self { reused }
    }
}

impl ReservationTask for ReuseReservationTask {
    fn perform(&mut self, ctx: &mut SchedulerContext<'_>, slot: Span) -> Result<ReservationId, SchedulerError> {
        let reservation = self.reused;
        let available = ctx
            .store
            .reservation(reservation)
            .is_some_and(|r| r.slot.contains_span(&slot));
        if !available {
            return Err(SchedulerError::ReservationNotAvailable { reservation, slot });
        }
        if !ctx.store.existing_reservations(reservation, slot).is_empty() {
            return Err(SchedulerError::ReservationAlreadyReused { reservation, slot });
        }
        Ok(ctx.store.create_reservation(
            ctx.user_id,
            slot,
            ReservationKind::Existing {
                reused_reservation: reservation,
            },
        ))
    }
}
