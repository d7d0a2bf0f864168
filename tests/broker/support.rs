//! Shared harness for broker end-to-end tests: an ephemeral broker, client
//! connectors and a record recorder for ordered assertions.

use pihive::protocol::BrokerRecord;
use pihive::{broker, AgentIdentity, BrokerConfig, ClientConfig, HiveClient};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

pub struct TestBroker {
    pub handle: broker::BrokerHandle,
}

impl TestBroker {
    pub async fn start() -> Self {
        Self::start_with(BrokerConfig::default()).await
    }

    pub async fn start_with(config: BrokerConfig) -> Self {
        let handle = broker::start(config)
            .await
            .expect("broker should bind an ephemeral loopback port");
        Self { handle }
    }

    pub fn url(&self) -> String {
        self.handle.url()
    }
}

pub async fn connect_as(broker: &TestBroker, id: &str, name: &str) -> HiveClient {
    let identity = AgentIdentity::new(name, "tester")
        .with_id(id)
        .with_cwd("/repo")
        .with_broker_url(broker.url());
    HiveClient::connect(identity)
        .await
        .expect("client should connect and register")
}

/// Connect with a custom heartbeat cadence, for reaper tests that need one
/// client chatty and another silent.
pub async fn connect_with_heartbeat(
    broker: &TestBroker,
    name: &str,
    heartbeat_interval: Duration,
) -> HiveClient {
    let identity = AgentIdentity::new(name, "tester")
        .with_id(format!("{name}-{}", uuid_suffix()))
        .with_cwd("/repo")
        .with_broker_url(broker.url());
    let config = ClientConfig {
        heartbeat_interval,
        ..ClientConfig::default()
    };
    HiveClient::connect_with_config(identity, config)
        .await
        .expect("client should connect and register")
}

pub async fn connect(broker: &TestBroker, name: &str) -> HiveClient {
    let id = format!("{name}-{}", uuid_suffix());
    connect_as(broker, &id, name).await
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Tap on a client that records every inbound broker record for assertions.
pub struct Recorder {
    rx: UnboundedReceiver<BrokerRecord>,
}

impl Recorder {
    pub fn attach(client: &HiveClient) -> Self {
        let (tx, rx) = unbounded_channel();
        client.add_listener(move |record| {
            let _ = tx.send(record.clone());
        });
        Self { rx }
    }

    /// Await the first record matching `pred`, discarding everything before
    /// it. Panics after [`EXPECT_TIMEOUT`].
    pub async fn expect(&mut self, pred: impl Fn(&BrokerRecord) -> bool) -> BrokerRecord {
        let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
        loop {
            let record = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .expect("timed out waiting for a matching record")
                .expect("recorder channel closed");
            if pred(&record) {
                return record;
            }
        }
    }

    /// Everything received so far, without waiting.
    pub fn drain(&mut self) -> Vec<BrokerRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.rx.try_recv() {
            records.push(record);
        }
        records
    }

    /// Let in-flight fanout settle, then return everything received.
    pub async fn settle_and_drain(&mut self) -> Vec<BrokerRecord> {
        tokio::time::sleep(QUIET_PERIOD).await;
        self.drain()
    }
}

/// Make `client` answer every correlated DM with `reply`.
pub fn auto_responder(client: &HiveClient, reply: &'static str) {
    let responder = client.clone();
    client.add_listener(move |record| {
        if let BrokerRecord::Dm {
            from_name,
            correlation_id: Some(correlation_id),
            ..
        } = record
        {
            let _ = responder.dm_response(from_name, correlation_id, reply);
        }
    });
}
