use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{ExecutableId, Ms, ReservationId, ResourceId, Span};
use crate::object_type::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutableState {
    NotAllocated,
    ToDelete,
    NotStarted,
    Skipped,
    Started,
    PartiallyStarted,
    StartingFailed,
    Stopped,
    StoppingFailed,
    Finalized,
    FinalizationFailed,
}

impl ExecutableState {
    /// Whether the session is (at least partly) running on a device.
    pub fn is_started(self) -> bool {
        matches!(
            self,
            ExecutableState::Started
                | ExecutableState::PartiallyStarted
                | ExecutableState::StoppingFailed
        )
    }

    /// State of a composite executable derived from its children; `Skipped` when there is
    /// nothing to derive from.
    pub fn aggregate(children: impl IntoIterator<Item = ExecutableState>) -> ExecutableState {
        use ExecutableState::*;
        let mut state = Skipped;
        for child in children {
            state = match (state, child) {
                (Skipped, Started | StartingFailed | Stopped | StoppingFailed) => child,
                (Started, StartingFailed | Stopped) => PartiallyStarted,
                (StartingFailed, Started | StoppingFailed) => PartiallyStarted,
                (StartingFailed, Stopped) => Stopped,
                (Stopped, Started | StoppingFailed) => PartiallyStarted,
                (current, _) => current,
            };
        }
        state
    }
}

impl fmt::Display for ExecutableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutableState::NotAllocated => "NOT_ALLOCATED",
            ExecutableState::ToDelete => "TO_DELETE",
            ExecutableState::NotStarted => "NOT_STARTED",
            ExecutableState::Skipped => "SKIPPED",
            ExecutableState::Started => "STARTED",
            ExecutableState::PartiallyStarted => "PARTIALLY_STARTED",
            ExecutableState::StartingFailed => "STARTING_FAILED",
            ExecutableState::Stopped => "STOPPED",
            ExecutableState::StoppingFailed => "STOPPING_FAILED",
            ExecutableState::Finalized => "FINALIZED",
            ExecutableState::FinalizationFailed => "FINALIZATION_FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutableKind {
    Plain,
    RoomEndpoint { resource: ResourceId, licenses: u32 },
    /// Room endpoint running inside another, already allocated room.
    UsedRoomEndpoint { reused_room_endpoint: ExecutableId },
    Compartment,
}

impl ExecutableKind {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ExecutableKind::Plain => EntityKind::Executable,
            ExecutableKind::RoomEndpoint { .. } => EntityKind::ResourceRoomEndpoint,
            ExecutableKind::UsedRoomEndpoint { .. } => EntityKind::UsedRoomEndpoint,
            ExecutableKind::Compartment => EntityKind::Compartment,
        }
    }
}

/// Auxiliary service (recording, streaming) attached to an executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableService {
    pub id: u64,
    pub slot: Span,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    pub id: ExecutableId,
    pub slot: Span,
    pub state: ExecutableState,
    pub modified: bool,
    pub kind: ExecutableKind,
    pub child_executables: Vec<ExecutableId>,
    pub services: Vec<ExecutableService>,
}

/// Device-side collaborator that carries out executable transitions.
///
/// Defaults mirror an executable with nothing to run.
pub trait Executor: Send {
    fn on_start(&mut self, _executable: &Executable) -> ExecutableState {
        ExecutableState::Skipped
    }

    /// `None` means no change was needed; `Some(false)` keeps the executable marked modified.
    fn on_update(&mut self, _executable: &Executable) -> Option<bool> {
        Some(true)
    }

    fn on_stop(&mut self, _executable: &Executable) -> ExecutableState {
        ExecutableState::Skipped
    }

    fn on_finalize(&mut self, _executable: &Executable) -> ExecutableState {
        ExecutableState::Finalized
    }
}

impl Executable {
    pub fn new(id: ExecutableId, slot: Span, kind: ExecutableKind) -> Self {
        Self {
            id,
            slot,
            state: ExecutableState::NotStarted,
            modified: false,
            kind,
            child_executables: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn start(&mut self, executor: &mut dyn Executor) -> ExecutableState {
        assert!(
            !self.state.is_started(),
            "Executable '{}' can be started only if it is not started yet.",
            self.id
        );
        self.state = executor.on_start(self);
        self.state
    }

    pub fn update(&mut self, executor: &mut dyn Executor) -> Option<bool> {
        assert!(
            self.modified,
            "Executable '{}' can be updated only if it is modified.",
            self.id
        );
        let result = executor.on_update(self);
        if result != Some(false) {
            self.modified = false;
        }
        result
    }

    pub fn stop(&mut self, executor: &mut dyn Executor) -> ExecutableState {
        assert!(
            self.state.is_started(),
            "Executable '{}' can be stopped only if it is started.",
            self.id
        );
        self.state = executor.on_stop(self);
        self.state
    }

    pub fn finalize(&mut self, executor: &mut dyn Executor) -> ExecutableState {
        assert!(
            !self.state.is_started(),
            "Executable '{}' can be finalized only if it is stopped.",
            self.id
        );
        self.state = executor.on_finalize(self);
        self.state
    }

    /// End a running or currently scheduled session at `now` instead of severing it.
    ///
    /// Applies when the slot contains `now` or the executable is started. The slot and every
    /// service extending past `now` end at `max(now, start)`. Returns whether anything moved.
    pub fn clamp_to(&mut self, now: Ms) -> bool {
        if !self.slot.contains_instant(now) && !self.state.is_started() {
            return false;
        }
        let mut clamped = false;
        if self.slot.end > now {
            self.slot.end = now.max(self.slot.start);
            clamped = true;
        }
        for service in &mut self.services {
            if service.slot.end > now {
                service.slot.end = now.max(service.slot.start);
                clamped = true;
            }
        }
        clamped
    }

    pub fn active_services(&self) -> usize {
        self.services.iter().filter(|s| s.active).count()
    }
}

/// Flattened view of an executable, refreshed whenever its owning reservation changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableSummary {
    pub executable: ExecutableId,
    pub reservation: Option<ReservationId>,
    pub kind: EntityKind,
    pub slot: Span,
    pub state: ExecutableState,
    pub active_services: usize,
}

impl ExecutableSummary {
    pub fn of(executable: &Executable, reservation: Option<ReservationId>) -> Self {
        Self {
            executable: executable.id,
            reservation,
            kind: executable.kind.entity_kind(),
            slot: executable.slot,
            state: executable.state,
            active_services: executable.active_services(),
        }
    }
}
