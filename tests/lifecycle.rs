use std::collections::BTreeSet;
use std::sync::Arc;

use shongo_booking::acl::{AclManager, InMemoryAclManager, ObjectRole};
use shongo_booking::engine::{
    now_ms, Engine, EngineError, ResourceDescriptor, ResourceReservationTask, ReuseReservationTask,
    SchedulerError,
};
use shongo_booking::executable::{Executable, ExecutableKind, ExecutableState, Executor};
use shongo_booking::identifier::LocalDomain;
use shongo_booking::model::*;
use shongo_booking::participant::Technology;
use shongo_booking::reaper;
use shongo_booking::specification::Specification;

const HOUR: Ms = 3_600_000;

fn mcu() -> ResourceDescriptor {
    ResourceDescriptor {
        id: ResourceId(1),
        technologies: [Technology::H323, Technology::Sip].into_iter().collect(),
        is_endpoint: true,
    }
}

fn room_task() -> ResourceReservationTask {
    ResourceReservationTask::new(mcu())
        .requiring([Technology::H323])
        .with_executable(ExecutableKind::RoomEndpoint {
            resource: ResourceId(1),
            licenses: 10,
        })
}

struct Mcu;

impl Executor for Mcu {
    fn on_start(&mut self, _executable: &Executable) -> ExecutableState {
        ExecutableState::Started
    }

    fn on_stop(&mut self, _executable: &Executable) -> ExecutableState {
        ExecutableState::Stopped
    }
}

/// A booking is requested, allocated, reused, started, cancelled and garbage collected, with
/// the journal reopened in between.
#[tokio::test]
async fn booking_survives_restart_and_is_collected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("controller.wal");
    let acl = Arc::new(InMemoryAclManager::new());
    let domain = LocalDomain::new("cz.cesnet");
    let start = now_ms() + HOUR;
    let meeting = Span::new(start, start + 2 * HOUR);

    let (request, room, global_id) = {
        let engine = Engine::open(&path, domain.clone(), acl.clone()).unwrap();
        let draft = ReservationRequestDraft::single(
            meeting,
            "alice",
            Specification::room([Technology::H323], 10),
        );
        let request = engine.create_reservation_request(draft).await.unwrap();
        let room = engine.allocate(request, &mut room_task()).await.unwrap();

        // nobody else gets the device for an overlapping hour
        let other = engine
            .create_reservation_request(ReservationRequestDraft::single(
                Span::new(start + HOUR, start + 3 * HOUR),
                "bob",
                Specification::resource(ResourceId(1)),
            ))
            .await
            .unwrap();
        let err = engine.allocate(other, &mut room_task()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Scheduler(SchedulerError::ResourceAlreadyAllocated { .. })
        ));
        engine.delete_reservation_request(other).await.unwrap();

        let global_id = engine.format_reservation_id(room).await.unwrap();
        (request, room, global_id)
    };

    let engine = Engine::open(&path, domain.clone(), acl.clone()).unwrap();
    let restored = engine.get_reservation_by_identifier(&global_id).await.unwrap();
    assert_eq!(restored.id, room);
    assert_eq!(restored.user_id, "alice");
    assert_eq!(restored.slot, meeting);

    let identifier = engine.read(|s| s.reservation_identifier(room)).await;
    let owners: BTreeSet<_> = acl
        .acl_entries(&identifier)
        .into_iter()
        .filter(|e| e.role == ObjectRole::Owner)
        .map(|e| e.user_id)
        .collect();
    assert_eq!(owners, ["alice".to_string()].into_iter().collect());

    // a second booking reuses the room for its first hour
    let guest = engine
        .create_reservation_request(ReservationRequestDraft::single(
            Span::new(start, start + HOUR),
            "carol",
            Specification::resource(ResourceId(1)),
        ))
        .await
        .unwrap();
    engine
        .allocate(guest, &mut ReuseReservationTask::new(room))
        .await
        .unwrap();
    assert!(matches!(
        engine.delete_reservation_request(request).await,
        Err(EngineError::AllocationReused { .. })
    ));

    let executable = restored.executable.unwrap();
    assert_eq!(
        engine.start_executable(executable, &mut Mcu).await.unwrap(),
        ExecutableState::Started
    );
    assert_eq!(
        engine.stop_executable(executable, &mut Mcu).await.unwrap(),
        ExecutableState::Stopped
    );

    engine.delete_reservation_request(guest).await.unwrap();
    engine.delete_reservation_request(request).await.unwrap();
    let report = reaper::cleanup_once(&engine).await.unwrap();
    assert_eq!(report.reservations_deleted, 2);
    assert_eq!(engine.read(|s| s.reservation_count()).await, 0);
    assert!(acl.is_empty());

    // the device is free again
    let again = engine
        .create_reservation_request(ReservationRequestDraft::single(
            meeting,
            "dave",
            Specification::resource(ResourceId(1)),
        ))
        .await
        .unwrap();
    engine.allocate(again, &mut room_task()).await.unwrap();

    engine.compact().await.unwrap();
    drop(engine);
    let engine = Engine::open(&path, domain, acl).unwrap();
    assert_eq!(engine.read(|s| s.reservation_count()).await, 1);
    assert!(matches!(
        engine.get_reservation(room).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_allocations_never_double_book() {
    let engine = Arc::new(Engine::in_memory(
        LocalDomain::new("cz.cesnet"),
        Arc::new(InMemoryAclManager::new()),
    ));
    let start = now_ms() + HOUR;
    let slot = Span::new(start, start + HOUR);

    let mut handles = Vec::new();
    for user in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let request = engine
                .create_reservation_request(ReservationRequestDraft::single(
                    slot,
                    format!("user-{user}"),
                    Specification::resource(ResourceId(7)),
                ))
                .await
                .unwrap();
            let mut task = ResourceReservationTask::new(ResourceDescriptor {
                id: ResourceId(7),
                technologies: BTreeSet::new(),
                is_endpoint: false,
            });
            engine.allocate(request, &mut task).await.is_ok()
        }));
    }

    let mut booked = 0;
    for handle in handles {
        if handle.await.unwrap() {
            booked += 1;
        }
    }
    assert_eq!(booked, 1);
    assert_eq!(
        engine.read(|s| s.count_resource_reservations(ResourceId(7))).await,
        1
    );
}
