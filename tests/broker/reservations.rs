use crate::support::{connect, Recorder, TestBroker};
use pihive::protocol::BrokerRecord;

#[tokio::test]
async fn conflicting_reserve_names_the_owner() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;

    scout
        .reserve(&["/repo/file.ts".to_string()], Some("editing".to_string()))
        .await
        .expect("first reserve should succeed");

    let err = hub
        .reserve(&["/repo/file.ts".to_string()], None)
        .await
        .expect_err("overlapping reserve must fail");
    let message = err.to_string();
    assert!(message.contains("scout"));
    assert!(message.contains("editing"));
}

#[tokio::test]
async fn directory_reservation_blocks_nested_file_until_released() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;

    scout
        .reserve(&["/repo/dir/".to_string()], None)
        .await
        .expect("directory reserve should succeed");

    let err = hub
        .reserve(&["/repo/dir/sub/file.ts".to_string()], None)
        .await
        .expect_err("nested reserve must conflict with the directory claim");
    assert!(err.to_string().contains("scout"));

    // Release everything; the same reserve now succeeds.
    scout.release(None).await.expect("release-all");
    hub.reserve(&["/repo/dir/sub/file.ts".to_string()], None)
        .await
        .expect("reserve after release should succeed");
}

#[tokio::test]
async fn release_of_never_reserved_path_is_acknowledged() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;

    // A no-op release still produces the reservations_updated broadcast the
    // client awaits.
    hub.release(Some(vec!["/never/reserved.ts".to_string()]))
        .await
        .expect("no-op release should be acknowledged");
    assert!(hub.reservations().is_empty());
}

#[tokio::test]
async fn reserve_release_round_trip_restores_the_map() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    let mut hub_records = Recorder::attach(&hub);

    scout
        .reserve(&["/repo/base.ts".to_string()], None)
        .await
        .expect("baseline reserve");
    let scout_id = scout.id().to_string();
    hub_records
        .expect(|r| matches!(r, BrokerRecord::ReservationsUpdated { reservations } if reservations.contains_key(&scout_id)))
        .await;
    let baseline = hub.reservations();

    hub.reserve(&["/repo/mine.ts".to_string()], None)
        .await
        .expect("reserve");
    hub.release(Some(vec!["/repo/mine.ts".to_string()]))
        .await
        .expect("release");

    assert_eq!(hub.reservations(), baseline);
}

#[tokio::test]
async fn reservations_auto_clear_on_disconnect() {
    let broker = TestBroker::start().await;
    let locker = connect(&broker, "locker").await;
    let watcher = connect(&broker, "watcher").await;
    let mut watcher_records = Recorder::attach(&watcher);

    locker
        .reserve(&["/repo/locker.ts".to_string()], None)
        .await
        .expect("reserve");
    let locker_id = locker.id().to_string();

    watcher_records
        .expect(|r| matches!(r, BrokerRecord::ReservationsUpdated { reservations } if reservations.contains_key(&locker_id)))
        .await;

    locker.close();

    watcher_records
        .expect(|r| matches!(r, BrokerRecord::ReservationsUpdated { reservations } if !reservations.contains_key(&locker_id)))
        .await;
    watcher_records
        .expect(|r| matches!(r, BrokerRecord::AgentLeft { name, .. } if name == "locker"))
        .await;

    assert!(watcher.reservations().is_empty());
}

#[tokio::test]
async fn write_guard_blocks_paths_reserved_by_others() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    let mut hub_records = Recorder::attach(&hub);

    scout
        .reserve(&["/repo/dir/".to_string()], Some("refactor".to_string()))
        .await
        .expect("reserve");

    // Wait for the map to reach hub's replica before consulting the guard.
    hub_records
        .expect(|r| matches!(r, BrokerRecord::ReservationsUpdated { reservations } if !reservations.is_empty()))
        .await;

    let err = hub
        .check_write("/repo/dir/sub/file.ts")
        .expect_err("write into a directory reserved by another agent must be blocked");
    let message = err.to_string();
    assert!(message.contains("scout"));
    assert!(message.contains("refactor"));

    // The owner itself is never blocked, and unrelated paths pass.
    scout
        .check_write("/repo/dir/sub/file.ts")
        .expect("own reservation must not block");
    hub.check_write("/elsewhere/file.ts")
        .expect("unrelated path must pass");
}

#[tokio::test]
async fn relative_reserve_paths_resolve_against_cwd() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;

    hub.reserve(&["src/lib.rs".to_string()], None)
        .await
        .expect("reserve");

    let reservations = hub.reservations();
    let entry = reservations.get(hub.id()).expect("own entry");
    // The harness connects every client with cwd /repo.
    assert_eq!(entry.paths, vec!["/repo/src/lib.rs".to_string()]);
}
