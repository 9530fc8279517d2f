use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use ulid::Ulid;

use motorpool::clock::ManualClock;
use motorpool::engine::{Engine, EngineError};
use motorpool::model::*;
use motorpool::notify::NotifyHub;

const H: Ms = 3_600_000;
const MONDAY: Ms = 1_767_571_200_000; // 2026-01-05T00:00Z

// ── Test infrastructure ──────────────────────────────────────

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("motorpool_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("motorpool.wal")
}

fn start(now: Ms) -> (Arc<Engine>, Arc<ManualClock>, Arc<NotifyHub>) {
    let clock = Arc::new(ManualClock::new(now));
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::with_clock(wal_path(), hub.clone(), clock.clone()).unwrap();
    (Arc::new(engine), clock, hub)
}

fn drain(rx: &mut broadcast::Receiver<StatusChange>) -> Vec<StatusChange> {
    let mut out = Vec::new();
    while let Ok(change) = rx.try_recv() {
        out.push(change);
    }
    out
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn a_day_in_the_motor_pool() {
    let (engine, clock, hub) = start(MONDAY + 7 * H);
    let van = Ulid::new();
    engine.create_resource(van, Some("van 3".into())).await.unwrap();
    let mut feed = hub.subscribe(van);

    let alice = Ulid::new();
    let bob = Ulid::new();
    let manager = Ulid::new();
    let mechanic = Ulid::new();

    // Morning: Alice books 9-11, Bob tries 10-12 and is refused.
    let trip = engine
        .create_reservation(van, Span::new(MONDAY + 9 * H, MONDAY + 11 * H), alice, "site visit".into())
        .await
        .unwrap();
    let refused = engine
        .create_reservation(van, Span::new(MONDAY + 10 * H, MONDAY + 12 * H), bob, "depot run".into())
        .await;
    assert!(matches!(refused, Err(EngineError::Conflict(c)) if c.id == trip.id));

    // Bob books the afternoon instead; the manager approves both.
    let afternoon = engine
        .create_reservation(van, Span::new(MONDAY + 13 * H, MONDAY + 15 * H), bob, "depot run".into())
        .await
        .unwrap();
    engine.approve_reservation(trip.id, manager).await.unwrap();
    engine.approve_reservation(afternoon.id, manager).await.unwrap();
    assert_eq!(engine.get_resource(van).await.unwrap().status, ResourceStatus::Available);

    // A mechanic schedules an open-ended inspection from 16:00.
    let inspection = engine
        .create_service_window(van, Window::open(MONDAY + 16 * H), mechanic, "brake noise".into(), None)
        .await
        .unwrap();
    assert_eq!(inspection.status, ServiceStatus::Reported);

    // Time passes; each sweep moves the van through its day.
    clock.set(MONDAY + 10 * H);
    engine.reconcile(engine.now()).await;
    assert_eq!(engine.get_resource(van).await.unwrap().status, ResourceStatus::Reserved);

    clock.set(MONDAY + 12 * H);
    engine.reconcile(engine.now()).await;
    assert_eq!(engine.get_resource(van).await.unwrap().status, ResourceStatus::Available);

    clock.set(MONDAY + 14 * H);
    engine.reconcile(engine.now()).await;
    assert_eq!(engine.get_resource(van).await.unwrap().status, ResourceStatus::Reserved);

    clock.set(MONDAY + 17 * H);
    let report = engine.reconcile(engine.now()).await;
    assert_eq!(report.windows_started, 1);
    assert_eq!(engine.get_resource(van).await.unwrap().status, ResourceStatus::UnderService);

    // Nobody can book the van until the inspection is signed off.
    let next_week = MONDAY + 7 * 24 * H;
    let blocked = engine
        .create_reservation(van, Span::new(next_week, next_week + H), alice, "site visit".into())
        .await;
    assert!(matches!(blocked, Err(EngineError::Conflict(c)) if c.kind == ClaimKind::ServiceWindow));

    engine
        .set_service_window_status(inspection.id, ServiceStatus::Completed)
        .await
        .unwrap();
    assert_eq!(engine.get_resource(van).await.unwrap().status, ResourceStatus::Available);
    engine
        .create_reservation(van, Span::new(next_week, next_week + H), alice, "site visit".into())
        .await
        .unwrap();

    // The van's feed saw every resource status move, in order.
    let moves: Vec<Option<StatusValue>> = drain(&mut feed)
        .into_iter()
        .filter(|c| c.kind == EntityKind::Resource)
        .map(|c| c.new_status)
        .collect();
    assert_eq!(
        moves,
        vec![
            Some(StatusValue::Resource(ResourceStatus::Reserved)),
            Some(StatusValue::Resource(ResourceStatus::Available)),
            Some(StatusValue::Resource(ResourceStatus::Reserved)),
            Some(StatusValue::Resource(ResourceStatus::UnderService)),
            Some(StatusValue::Resource(ResourceStatus::Available)),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_and_windows_never_double_book() {
    let (engine, _clock, _hub) = start(MONDAY);
    let fleet: Vec<Ulid> = (0..4).map(|_| Ulid::new()).collect();
    for &rid in &fleet {
        engine.create_resource(rid, None).await.unwrap();
    }

    // Every resource gets 24 overlapping requests at once, plus a service
    // window racing them for the same afternoon.
    let mut attempts = Vec::new();
    for &rid in &fleet {
        for i in 0..24 {
            let engine = engine.clone();
            attempts.push(tokio::spawn(async move {
                let s = MONDAY + 12 * H + i * 60_000;
                engine
                    .create_reservation(rid, Span::new(s, s + 2 * H), Ulid::new(), "race".into())
                    .await
                    .map(|_| ())
            }));
        }
        let engine = engine.clone();
        attempts.push(tokio::spawn(async move {
            engine
                .create_service_window(rid, Window::bounded(MONDAY + 13 * H, MONDAY + 14 * H), Ulid::new(), "race".into(), None)
                .await
                .map(|_| ())
        }));
    }
    for result in join_all(attempts).await {
        match result.unwrap() {
            Ok(()) | Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // Whatever won, active claims on each resource are pairwise disjoint,
    // except service windows among themselves.
    for &rid in &fleet {
        let reservations = engine
            .list_reservations(&ReservationFilter {
                resource_id: Some(rid),
                ..Default::default()
            })
            .await;
        let windows = engine
            .list_service_windows(&ServiceWindowFilter {
                resource_id: Some(rid),
                ..Default::default()
            })
            .await;
        assert_eq!(reservations.len() + windows.len(), 1, "resource {rid}");
    }

    // Approvals racing on the winners all see a single PENDING → APPROVED.
    let pending = engine.list_reservations(&ReservationFilter::default()).await;
    let approvals = pending.iter().flat_map(|r| {
        let engine = engine.clone();
        let id = r.id;
        (0..4).map(move |_| {
            let engine = engine.clone();
            async move { engine.approve_reservation(id, Ulid::new()).await }
        })
    });
    let results = join_all(approvals).await;
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, pending.len());
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::InvalidTransition { from: "APPROVED", .. }))
    );
}

#[tokio::test]
async fn restart_replays_then_catches_up() {
    let path = wal_path();
    let clock = Arc::new(ManualClock::new(MONDAY + 8 * H));
    let van = Ulid::new();
    let window_id;
    {
        let engine = Engine::with_clock(path.clone(), Arc::new(NotifyHub::new()), clock.clone()).unwrap();
        engine.create_resource(van, None).await.unwrap();
        let w = engine
            .create_service_window(van, Window::bounded(MONDAY + 9 * H, MONDAY + 10 * H), Ulid::new(), "tyres".into(), None)
            .await
            .unwrap();
        window_id = w.id;
        engine.compact_wal().await.unwrap();
    }

    // Down for the whole window: the first sweep after restart starts and
    // completes it in one pass.
    clock.set(MONDAY + 11 * H);
    let engine = Engine::with_clock(path, Arc::new(NotifyHub::new()), clock.clone()).unwrap();
    let report = engine.reconcile(engine.now()).await;
    assert_eq!((report.windows_started, report.windows_completed), (1, 1));
    assert_eq!(report.status_changes, 0);
    assert_eq!(
        engine.get_service_window(window_id).await.unwrap().status,
        ServiceStatus::Completed
    );
    assert_eq!(engine.resource_status(van).await.unwrap(), ResourceStatus::Available);
}

#[tokio::test]
async fn abandoned_requests_never_double_book_across_restart() {
    let path = wal_path();
    let clock = Arc::new(ManualClock::new(MONDAY));
    let engine = Engine::with_clock(path.clone(), Arc::new(NotifyHub::new()), clock.clone()).unwrap();
    let van = Ulid::new();
    engine.create_resource(van, None).await.unwrap();

    // Overlapping requests whose callers time out on the first poll.
    for i in 0..10 {
        let s = MONDAY + 9 * H + i * 30 * 60_000;
        let request = engine.create_reservation(van, Span::new(s, s + H), Ulid::new(), "late".into());
        let _ = tokio::time::timeout(Duration::ZERO, request).await;
    }
    // And some that wait it out.
    for i in 0..10 {
        let s = MONDAY + 9 * H + i * 30 * 60_000;
        let _ = engine
            .create_reservation(van, Span::new(s, s + H), Ulid::new(), "patient".into())
            .await;
    }

    let filter = ReservationFilter {
        resource_id: Some(van),
        ..Default::default()
    };
    let live = engine.list_reservations(&filter).await;
    assert!(!live.is_empty());
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(
                !a.span.overlaps(&b.span),
                "overlapping reservations {a:?} and {b:?}"
            );
        }
    }

    let restored = Engine::with_clock(path, Arc::new(NotifyHub::new()), clock).unwrap();
    assert_eq!(restored.list_reservations(&filter).await, live);
}
