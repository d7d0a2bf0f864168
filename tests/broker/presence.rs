use crate::support::{auto_responder, connect, Recorder, TestBroker};
use pihive::protocol::{AgentStatus, BrokerRecord};

#[tokio::test]
async fn rename_keeps_the_agent_reachable_under_the_new_name() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    auto_responder(&scout, "still me");

    scout.rename("scout-renamed").await.expect("rename");
    assert_eq!(scout.name(), "scout-renamed");

    let reply = hub
        .dm("scout-renamed", "you there?")
        .await
        .expect("dm to the new name should reach the renamed agent");
    assert_eq!(reply, "still me");

    let err = hub
        .dm("scout", "old name")
        .await
        .expect_err("dm to the old name must fail");
    assert!(err.to_string().contains("not online"));
}

#[tokio::test]
async fn rename_to_taken_name_fails() {
    let broker = TestBroker::start().await;
    let _worker = connect(&broker, "worker").await;
    let scout = connect(&broker, "scout").await;

    let err = scout
        .rename("worker")
        .await
        .expect_err("renaming onto a live name must fail");
    assert!(err.to_string().contains("taken"));
    assert_eq!(scout.name(), "scout");
}

#[tokio::test]
async fn noop_rename_is_still_acknowledged() {
    let broker = TestBroker::start().await;
    let scout = connect(&broker, "scout").await;
    let watcher = connect(&broker, "watcher").await;
    let mut watcher_records = Recorder::attach(&watcher);

    scout.rename("scout").await.expect("no-op rename");

    watcher_records
        .expect(|r| matches!(
            r,
            BrokerRecord::AgentRenamed { old_name, new_name, .. }
                if old_name == "scout" && new_name == "scout"
        ))
        .await;

    // Watchers must tolerate the no-op without double-accounting.
    let roster = watcher.agents();
    assert_eq!(roster.iter().filter(|a| a.name == "scout").count(), 1);
}

#[tokio::test]
async fn rename_round_trip_restores_reachability() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    auto_responder(&scout, "back again");

    scout.rename("explorer").await.expect("rename away");
    scout.rename("scout").await.expect("rename back");

    let reply = hub.dm("scout", "hello").await.expect("dm after round trip");
    assert_eq!(reply, "back again");
}

#[tokio::test]
async fn status_updates_fan_out_to_everyone_else() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    let mut hub_records = Recorder::attach(&hub);
    let mut scout_records = Recorder::attach(&scout);
    scout_records.drain();

    scout
        .set_status(AgentStatus::Busy)
        .expect("status update should queue");

    let record = hub_records
        .expect(|r| matches!(r, BrokerRecord::StatusChanged { .. }))
        .await;
    match record {
        BrokerRecord::StatusChanged { name, status, .. } => {
            assert_eq!(name, "scout");
            assert_eq!(status, AgentStatus::Busy);
        }
        _ => unreachable!(),
    }

    // The sender does not hear its own status change.
    let scout_extra = scout_records.settle_and_drain().await;
    assert!(!scout_extra
        .iter()
        .any(|r| matches!(r, BrokerRecord::StatusChanged { .. })));

    // And the hub's replica tracks it.
    let scout_info = hub.agent_by_name("scout").expect("scout in replica");
    assert_eq!(scout_info.status, AgentStatus::Busy);
}

#[tokio::test]
async fn presence_update_carries_message_and_activity() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    let mut hub_records = Recorder::attach(&hub);

    scout
        .update_presence(Some("exploring".to_string()))
        .expect("presence update should queue");

    let record = hub_records
        .expect(|r| matches!(r, BrokerRecord::StatusChanged { .. }))
        .await;
    match record {
        BrokerRecord::StatusChanged {
            status,
            status_message,
            last_activity_at,
            ..
        } => {
            // Presence does not touch the coarse status.
            assert_eq!(status, AgentStatus::Idle);
            assert_eq!(status_message.as_deref(), Some("exploring"));
            assert!(last_activity_at.is_some());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn done_hook_fires_for_non_interactive_agents() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let broker = TestBroker::start().await;
    let scout = connect(&broker, "scout").await;

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    scout.on_done(move || flag.store(true, Ordering::SeqCst));

    scout.set_status(AgentStatus::Busy).expect("busy");
    assert!(!fired.load(Ordering::SeqCst));

    scout.set_status(AgentStatus::Done).expect("done");
    assert!(fired.load(Ordering::SeqCst));
}
