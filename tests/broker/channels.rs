use crate::support::{connect, Recorder, TestBroker};
use pihive::protocol::BrokerRecord;

#[tokio::test]
async fn create_join_send_flow() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;
    let outsider = connect(&broker, "outsider").await;

    let mut scout_records = Recorder::attach(&scout);
    let mut outsider_records = Recorder::attach(&outsider);

    hub.create_channel("dev")
        .await
        .expect("create should be acknowledged");

    // Creation is announced to every agent, members or not.
    scout_records
        .expect(|r| matches!(r, BrokerRecord::ChannelCreated { channel, by } if channel == "dev" && by == "hub"))
        .await;
    outsider_records
        .expect(|r| matches!(r, BrokerRecord::ChannelCreated { channel, .. } if channel == "dev"))
        .await;

    scout
        .join_channel("dev")
        .await
        .expect("join should be acknowledged");

    hub.send_to_channel("dev", "standup in 5")
        .await
        .expect("send should be acknowledged with channel_sent");

    let message = scout_records
        .expect(|r| matches!(r, BrokerRecord::ChannelMessage { .. }))
        .await;
    match message {
        BrokerRecord::ChannelMessage {
            channel,
            from_name,
            content,
            ..
        } => {
            assert_eq!(channel, "dev");
            assert_eq!(from_name, "hub");
            assert_eq!(content, "standup in 5");
        }
        _ => unreachable!(),
    }

    // Non-members never see channel traffic.
    let outsider_rest = outsider_records.settle_and_drain().await;
    assert!(!outsider_rest
        .iter()
        .any(|r| matches!(r, BrokerRecord::ChannelMessage { .. })));
}

#[tokio::test]
async fn duplicate_create_fails() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;

    hub.create_channel("dev").await.expect("first create");

    let err = scout
        .create_channel("dev")
        .await
        .expect_err("second create must fail");
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn join_and_send_against_unknown_channel_fail() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;

    let err = hub
        .join_channel("ghost")
        .await
        .expect_err("joining a non-existent channel must fail");
    assert!(err.to_string().contains("does not exist"));

    let err = hub
        .send_to_channel("ghost", "hello?")
        .await
        .expect_err("sending to a non-existent channel must fail");
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn send_from_non_member_fails() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;

    hub.create_channel("dev").await.expect("create");

    let err = scout
        .send_to_channel("dev", "hi")
        .await
        .expect_err("non-member send must fail");
    assert!(err.to_string().contains("Not a member"));
}

#[tokio::test]
async fn channel_dies_with_its_last_member() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;

    hub.create_channel("dev").await.expect("create");
    hub.leave_channel("dev").await.expect("leave");

    let err = hub
        .send_to_channel("dev", "anyone?")
        .await
        .expect_err("sending to an auto-deleted channel must fail");
    assert!(err.to_string().contains("does not exist"));

    // The name is free again.
    hub.create_channel("dev")
        .await
        .expect("recreate after auto-delete");
}

#[tokio::test]
async fn channel_is_deleted_when_last_member_disconnects() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let loner = connect(&broker, "loner").await;
    let mut hub_records = Recorder::attach(&hub);

    loner.create_channel("private").await.expect("create");
    loner.close();

    hub_records
        .expect(|r| matches!(r, BrokerRecord::AgentLeft { name, .. } if name == "loner"))
        .await;

    let channels = hub.list_channels().await.expect("list");
    assert!(channels.iter().all(|c| c.name != "private"));
}

#[tokio::test]
async fn list_channels_reports_members_and_creator() {
    let broker = TestBroker::start().await;
    let hub = connect(&broker, "hub").await;
    let scout = connect(&broker, "scout").await;

    hub.create_channel("dev").await.expect("create");
    scout.join_channel("dev").await.expect("join");

    let channels = hub.list_channels().await.expect("list");
    assert_eq!(channels.len(), 1);
    let dev = &channels[0];
    assert_eq!(dev.name, "dev");
    assert_eq!(dev.created_by, "hub");
    let mut members = dev.members.clone();
    members.sort();
    assert_eq!(members, vec!["hub".to_string(), "scout".to_string()]);
}
