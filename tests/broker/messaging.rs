use crate::support::{auto_responder, connect, connect_as, Recorder, TestBroker};
use pihive::protocol::BrokerRecord;

#[tokio::test]
async fn correlated_dm_round_trip() {
    let broker = TestBroker::start().await;
    let hub = connect_as(&broker, "hub-001", "hub").await;
    let scout = connect_as(&broker, "scout-001", "scout").await;

    auto_responder(&scout, "Found 12 files");

    let reply = hub
        .dm("scout", "What did you find?")
        .await
        .expect("correlated dm should get exactly one response");
    assert_eq!(reply, "Found 12 files");
}

#[tokio::test]
async fn dm_carries_sender_identity_to_receiver() {
    let broker = TestBroker::start().await;
    let hub = connect_as(&broker, "hub-001", "hub").await;
    let scout = connect(&broker, "scout").await;
    let mut scout_records = Recorder::attach(&scout);

    hub.send(pihive::AgentRecord::Dm {
        to: "scout".to_string(),
        content: "ping".to_string(),
        correlation_id: None,
    })
    .expect("send should queue");

    let record = scout_records
        .expect(|r| matches!(r, BrokerRecord::Dm { .. }))
        .await;
    match record {
        BrokerRecord::Dm {
            from,
            from_name,
            content,
            correlation_id,
        } => {
            assert_eq!(from, "hub-001");
            assert_eq!(from_name, "hub");
            assert_eq!(content, "ping");
            assert!(correlation_id.is_none());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn dm_to_offline_agent_fails_with_not_online() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let bystander = connect(&broker, "bystander").await;
    let mut bystander_records = Recorder::attach(&bystander);
    bystander_records.drain();

    let err = hub
        .dm("nonexistent", "anyone there?")
        .await
        .expect_err("dm to an unknown name must fail");
    assert!(err.to_string().contains("not online"));

    // Nobody else was touched.
    assert!(bystander_records.settle_and_drain().await.is_empty());
}

#[tokio::test]
async fn broadcast_reaches_everyone_else_exactly_once() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    let worker = connect(&broker, "worker").await;

    let mut hub_records = Recorder::attach(&hub);
    let mut scout_records = Recorder::attach(&scout);
    let mut worker_records = Recorder::attach(&worker);

    hub.broadcast("Everyone report status!")
        .expect("broadcast should queue");

    for records in [&mut scout_records, &mut worker_records] {
        records
            .expect(|r| {
                matches!(r, BrokerRecord::Broadcast { content, .. } if content == "Everyone report status!")
            })
            .await;
    }

    // Exactly once per receiver, and never echoed to the sender.
    let scout_extra = scout_records.settle_and_drain().await;
    assert!(!scout_extra
        .iter()
        .any(|r| matches!(r, BrokerRecord::Broadcast { .. })));
    let hub_all = hub_records.settle_and_drain().await;
    assert!(!hub_all
        .iter()
        .any(|r| matches!(r, BrokerRecord::Broadcast { .. })));
}

#[tokio::test]
async fn dm_response_to_vanished_requester_is_silently_dropped() {
    let broker = TestBroker::start().await;
    let scout = connect(&broker, "scout").await;
    let watcher = connect(&broker, "watcher").await;
    let mut watcher_records = Recorder::attach(&watcher);
    watcher_records.drain();

    scout
        .dm_response("gone", "c9", "too late")
        .expect("send should queue");

    let quiet = watcher_records.settle_and_drain().await;
    assert!(!quiet
        .iter()
        .any(|r| matches!(r, BrokerRecord::DmResponse { .. } | BrokerRecord::Error { .. })));
}
