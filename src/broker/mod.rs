//! The coordination broker: accepts loopback WebSocket sessions, owns the
//! agent registry, channel table and reservation table, routes records and
//! reaps dead sessions.
//!
//! All cross-agent state lives behind one mutex; routing snapshots recipients
//! under the lock and writes through per-session outbound queues, so no
//! network write ever blocks another session's progress.

mod handlers;
mod reaper;
mod session;
mod state;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use anyhow::Context;
use axum::routing::get;
use axum::Router;
use state::BrokerState;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub(crate) struct Shared {
    state: Mutex<BrokerState>,
    config: BrokerConfig,
}

/// Cheap-clone handle over the shared broker state. One instance per hub
/// process; sessions and the reaper all clone this.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                config,
            }),
        }
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, BrokerState>> {
        self.shared
            .state
            .lock()
            .map_err(|err| BrokerError::Lock(err.to_string()).into())
    }

    /// Administrative hook for the hub: forcibly evict an agent by display
    /// name. Returns false when no such agent is connected.
    pub fn disconnect_agent_by_name(&self, name: &str) -> bool {
        let Ok(mut state) = self.lock_state() else {
            return false;
        };
        let Some(id) = state.id_of(name).map(str::to_owned) else {
            return false;
        };
        state.disconnect(&id)
    }

    pub(crate) fn disconnect_id(&self, id: &str) -> bool {
        match self.lock_state() {
            Ok(mut state) => state.disconnect(id),
            Err(err) => {
                tracing::warn!("disconnect of {id} skipped: {err}");
                false
            }
        }
    }

    /// Serve sessions on a pre-bound listener until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tokio::spawn(reaper::run_reaper(Arc::downgrade(&self.shared)));

        let app = Router::new()
            .route("/", get(session::ws_handler))
            .with_state(self);
        axum::serve(listener, app)
            .await
            .context("serve broker sessions")?;
        Ok(())
    }
}

/// Running broker plus its bound address. Dropping the handle stops the
/// accept loop; live sessions die with their tasks.
pub struct BrokerHandle {
    broker: Broker,
    addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl BrokerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Loopback WebSocket URL clients connect to.
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.addr.port())
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn disconnect_agent_by_name(&self, name: &str) -> bool {
        self.broker.disconnect_agent_by_name(name)
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind `host:port` (port 0 = kernel-chosen), start serving in a background
/// task and return the handle.
pub async fn start(config: BrokerConfig) -> Result<BrokerHandle> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| BrokerError::Bind(format!("{bind_addr}: {err}")))?;
    let addr = listener
        .local_addr()
        .map_err(|err| BrokerError::Bind(err.to_string()))?;

    let broker = Broker::new(config);
    let task = tokio::spawn(broker.clone().serve(listener));

    tracing::info!("broker listening on ws://{addr}");
    Ok(BrokerHandle { broker, addr, task })
}
