//! Client session library: the connection handler every agent embeds.
//!
//! Hides WebSocket framing, keeps a read-only replica of the broker's roster
//! and reservation table, emits periodic heartbeats, and exposes a raw send
//! primitive plus listener registration. Awaitable request wrappers live in
//! `requests`.

mod replica;
mod requests;

pub use requests::AbortHandle;

use crate::config::ClientConfig;
use crate::discovery;
use crate::error::{ReservationError, Result, SessionError};
use crate::identity::AgentIdentity;
use crate::protocol::{
    decode_frame, AgentInfo, AgentRecord, AgentStatus, BrokerRecord, Decoded, ReservationMap,
};
use crate::reservation;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use replica::Replica;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type ListenerFn = Arc<dyn Fn(&BrokerRecord) + Send + Sync>;
type DoneHook = Box<dyn Fn() + Send + Sync>;

/// Handle returned by [`HiveClient::add_listener`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

pub(crate) struct ClientInner {
    outbox: UnboundedSender<AgentRecord>,
    replica: Mutex<Replica>,
    listeners: Mutex<Vec<(u64, ListenerFn)>>,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
    /// Set when the session is over, whether by [`HiveClient::close`] or the
    /// broker ending the transport (eviction, heartbeat timeout, shutdown).
    ended: AtomicBool,
    ended_notify: Notify,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    pub(crate) config: ClientConfig,
    identity: AgentIdentity,
    own_id: String,
    own_name: Mutex<String>,
    done_hook: Mutex<Option<DoneHook>>,
}

/// One agent's session with the broker. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct HiveClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl HiveClient {
    /// Connect with default tuning. When the identity carries no broker URL
    /// the discovery sidecar is consulted.
    pub async fn connect(identity: AgentIdentity) -> Result<Self> {
        Self::connect_with_config(identity, ClientConfig::default()).await
    }

    pub async fn connect_with_config(
        identity: AgentIdentity,
        config: ClientConfig,
    ) -> Result<Self> {
        let url = match &identity.broker_url {
            Some(url) => url.clone(),
            None => discovery::read_sidecar()
                .map_err(|_| SessionError::NoBroker)?
                .url(),
        };

        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SessionError::Connect {
            url: url.clone(),
            message: err.to_string(),
        })?;
        let (mut sink, mut stream) = socket.split();

        let register = AgentRecord::Register {
            id: identity.id.clone(),
            name: identity.name.clone(),
            role: identity.role.clone(),
            parent_id: identity.parent_id.clone(),
            cwd: identity.cwd.clone(),
            interactive: identity.interactive,
        };
        sink.send(Message::Text(register.to_json().into()))
            .await
            .map_err(|err| SessionError::Connect {
                url: url.clone(),
                message: err.to_string(),
            })?;

        let (own_id, agents, reservations) =
            tokio::time::timeout(config.register_timeout, await_registered(&mut stream))
                .await
                .map_err(|_| SessionError::Timeout(config.register_timeout))??;

        let own_name = agents
            .iter()
            .find(|a| a.id == own_id)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| identity.name.clone());

        let (outbox, mut outbox_rx) = unbounded_channel::<AgentRecord>();
        let inner = Arc::new(ClientInner {
            outbox,
            replica: Mutex::new(Replica::new(own_id.clone(), agents, reservations)),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            ended_notify: Notify::new(),
            tasks: Mutex::new(Vec::new()),
            config: config.clone(),
            identity,
            own_id,
            own_name: Mutex::new(own_name),
            done_hook: Mutex::new(None),
        });

        let writer = tokio::spawn(async move {
            while let Some(record) = outbox_rx.recv().await {
                if sink
                    .send(Message::Text(record.to_json().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        let reader = tokio::spawn(run_reader(stream, Arc::downgrade(&inner)));
        let heartbeat = tokio::spawn(run_heartbeat(Arc::downgrade(&inner)));

        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.extend([writer, reader, heartbeat]);
        }

        Ok(Self { inner })
    }

    // ── Identity ────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.inner.own_id
    }

    /// Current display name, tracking renames (including broker-resolved
    /// `-2` suffixes at registration).
    pub fn name(&self) -> String {
        self.inner
            .own_name
            .lock()
            .map(|name| name.clone())
            .unwrap_or_default()
    }

    pub fn cwd(&self) -> &str {
        &self.inner.identity.cwd
    }

    // ── Raw send / listeners ────────────────────────────────────────────

    /// Queue one record for the broker. A no-op after [`close`](Self::close);
    /// an error once the transport is gone.
    pub fn send(&self, record: AgentRecord) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner
            .outbox
            .send(record)
            .map_err(|_| SessionError::Closed.into())
    }

    /// Register a listener invoked, in registration order, for every inbound
    /// record after the replica has been updated.
    pub fn add_listener(
        &self,
        listener: impl Fn(&BrokerRecord) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id.0);
        }
    }

    // ── Replica access ──────────────────────────────────────────────────

    pub fn agents(&self) -> Vec<AgentInfo> {
        self.inner
            .replica
            .lock()
            .map(|replica| replica.roster())
            .unwrap_or_default()
    }

    pub fn agent_by_name(&self, name: &str) -> Option<AgentInfo> {
        self.inner
            .replica
            .lock()
            .ok()
            .and_then(|replica| replica.agent_by_name(name).cloned())
    }

    pub fn reservations(&self) -> ReservationMap {
        self.inner
            .replica
            .lock()
            .map(|replica| replica.reservations.clone())
            .unwrap_or_default()
    }

    // ── Presence / status ───────────────────────────────────────────────

    pub fn update_presence(&self, status_message: Option<String>) -> Result<()> {
        self.send(AgentRecord::PresenceUpdate {
            status_message,
            last_activity_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Report a status change. A non-interactive agent reaching `done` fires
    /// the hook installed with [`on_done`](Self::on_done) so the host process
    /// can exit.
    pub fn set_status(&self, status: AgentStatus) -> Result<()> {
        self.send(AgentRecord::StatusUpdate { status })?;
        if status == AgentStatus::Done && !self.inner.identity.interactive {
            if let Ok(hook) = self.inner.done_hook.lock() {
                if let Some(hook) = hook.as_ref() {
                    hook();
                }
            }
        }
        Ok(())
    }

    pub fn on_done(&self, hook: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.inner.done_hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    // ── Write guard ─────────────────────────────────────────────────────

    /// Pre-flight guard for file-writing tool calls: blocks when another
    /// agent's cached reservation overlaps `path`.
    pub fn check_write(&self, path: &str) -> Result<()> {
        let normalized = reservation::normalize_path_with_base(path, self.cwd());
        if normalized.is_empty() {
            return Err(ReservationError::InvalidPath(path.to_string()).into());
        }

        let replica = self
            .inner
            .replica
            .lock()
            .map_err(|_| SessionError::Closed)?;
        let candidates = [normalized];
        if let Some((path, owner_id, owned)) =
            reservation::find_conflict(&candidates, &replica.reservations, &self.inner.own_id)
        {
            let owner = replica.name_of(owner_id).unwrap_or(owner_id).to_string();
            return Err(ReservationError::Conflict {
                path,
                owner,
                reason: owned.reason.clone(),
            }
            .into());
        }
        Ok(())
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Stop the heartbeat and close the transport. Further sends become
    /// no-ops.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.inner.mark_ended();
    }

    /// True until the session ends, by [`close`](Self::close) or because the
    /// broker closed the transport.
    pub fn is_connected(&self) -> bool {
        !self.inner.ended.load(Ordering::SeqCst)
    }

    /// Resolves once the session is over. Hosts use this to notice being
    /// evicted by the hub or reaped after missed heartbeats.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.inner.ended_notify.notified();
            if self.inner.ended.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl ClientInner {
    fn mark_ended(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.ended_notify.notify_waiters();
    }

    fn dispatch_frame(&self, text: &str) {
        let record = match decode_frame::<BrokerRecord>(text, BrokerRecord::TAGS) {
            Decoded::Record(record) => record,
            Decoded::UnknownTag(tag) => {
                tracing::debug!("ignoring unknown record tag {tag:?}");
                return;
            }
            Decoded::Malformed { tag, message } => {
                tracing::debug!("malformed {tag} record from broker: {message}");
                return;
            }
            Decoded::InvalidJson(error) => {
                tracing::debug!("undecodable frame from broker: {error}");
                return;
            }
        };

        // Replica first, listeners second: callbacks observe consistent state.
        if let Ok(mut replica) = self.replica.lock() {
            replica.apply(&record);
        }
        if let BrokerRecord::AgentRenamed { id, new_name, .. } = &record {
            if *id == self.own_id {
                if let Ok(mut own_name) = self.own_name.lock() {
                    *own_name = new_name.clone();
                }
            }
        }

        let snapshot: Vec<ListenerFn> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, f)| Arc::clone(f)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(&record);
        }
    }
}

async fn await_registered(
    stream: &mut SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
) -> std::result::Result<(String, Vec<AgentInfo>, ReservationMap), SessionError> {
    while let Some(frame) = stream.next().await {
        let Ok(message) = frame else { break };
        let Message::Text(text) = message else {
            continue;
        };
        match decode_frame::<BrokerRecord>(text.as_str(), BrokerRecord::TAGS) {
            Decoded::Record(BrokerRecord::Registered {
                id,
                agents,
                reservations,
            }) => return Ok((id, agents, reservations)),
            Decoded::Record(BrokerRecord::Error { message, .. }) => {
                return Err(SessionError::Register(message));
            }
            _ => {}
        }
    }
    Err(SessionError::Register(
        "connection closed before registered".to_string(),
    ))
}

async fn run_reader(
    mut stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    inner: Weak<ClientInner>,
) {
    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!("session receive error: {error}");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch_frame(text.as_str());
    }
    if let Some(inner) = inner.upgrade() {
        inner.mark_ended();
    }
    tracing::debug!("session reader finished");
}

async fn run_heartbeat(inner: Weak<ClientInner>) {
    let interval = {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.config.heartbeat_interval
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        if inner.outbox.send(AgentRecord::Heartbeat).is_err() {
            break;
        }
    }
}
