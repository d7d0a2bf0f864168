//! Awaitable operations over the raw send primitive.
//!
//! Each operation registers a matching listener before sending, then awaits
//! the broker's acknowledgement under a per-kind timeout. The listener is
//! removed when the future completes or is dropped, so cancellation never
//! leaks a matcher. The broker keeps no per-request state.

use super::{HiveClient, ListenerId};
use crate::error::{Result, SessionError};
use crate::protocol::{AgentInfo, AgentRecord, BrokerRecord, ChannelSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Host-provided abort signal. Aborting fails the pending operation promptly
/// and deregisters its listener.
#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Removes the matcher listener however the awaiting future ends.
struct ListenerGuard {
    client: HiveClient,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.client.remove_listener(self.id);
    }
}

type Matcher<T> = dyn Fn(&BrokerRecord) -> Option<std::result::Result<T, SessionError>>
    + Send
    + Sync;

impl HiveClient {
    async fn await_response<T: Send + 'static>(
        &self,
        request: AgentRecord,
        timeout: Duration,
        abort: Option<&AbortHandle>,
        matcher: Box<Matcher<T>>,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.add_listener(move |record| {
            if let Some(outcome) = matcher(record) {
                if let Ok(mut slot) = slot.lock() {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(outcome);
                    }
                }
            }
        });
        let _guard = ListenerGuard {
            client: self.clone(),
            id,
        };

        self.send(request)?;

        let received = match abort {
            None => tokio::time::timeout(timeout, rx).await,
            Some(handle) => tokio::select! {
                received = tokio::time::timeout(timeout, rx) => received,
                () = handle.wait() => return Err(SessionError::Aborted.into()),
            },
        };

        match received {
            Err(_) => Err(SessionError::Timeout(timeout).into()),
            Ok(Err(_)) => Err(SessionError::Closed.into()),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err.into()),
        }
    }

    // ── Direct messages ─────────────────────────────────────────────────

    /// Send a correlated DM and await the paired `dm_response` content.
    pub async fn dm(&self, to: &str, content: &str) -> Result<String> {
        self.dm_inner(to, content, None).await
    }

    /// Like [`dm`](Self::dm), failing early when `abort` fires.
    pub async fn dm_with_abort(
        &self,
        to: &str,
        content: &str,
        abort: &AbortHandle,
    ) -> Result<String> {
        self.dm_inner(to, content, Some(abort)).await
    }

    async fn dm_inner(
        &self,
        to: &str,
        content: &str,
        abort: Option<&AbortHandle>,
    ) -> Result<String> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let expected = correlation_id.clone();
        self.await_response(
            AgentRecord::Dm {
                to: to.to_string(),
                content: content.to_string(),
                correlation_id: Some(correlation_id),
            },
            self.inner.config.dm_timeout,
            abort,
            Box::new(move |record| match record {
                BrokerRecord::DmResponse {
                    correlation_id,
                    content,
                    ..
                } if *correlation_id == expected => Some(Ok(content.clone())),
                BrokerRecord::Error {
                    message,
                    correlation_id,
                } if correlation_id.as_deref() == Some(expected.as_str()) => {
                    Some(Err(SessionError::Remote(message.clone())))
                }
                _ => None,
            }),
        )
        .await
    }

    /// Reply to a correlated DM. Fire-and-forget by design: the broker drops
    /// responses whose requester vanished.
    pub fn dm_response(&self, to: &str, correlation_id: &str, content: &str) -> Result<()> {
        self.send(AgentRecord::DmResponse {
            to: to.to_string(),
            correlation_id: correlation_id.to_string(),
            content: content.to_string(),
        })
    }

    pub fn broadcast(&self, content: &str) -> Result<()> {
        self.send(AgentRecord::Broadcast {
            content: content.to_string(),
        })
    }

    // ── Channels ────────────────────────────────────────────────────────

    pub async fn create_channel(&self, channel: &str) -> Result<()> {
        let expected = channel.to_string();
        self.await_response(
            AgentRecord::ChannelCreate {
                channel: channel.to_string(),
            },
            self.inner.config.channel_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::ChannelCreated { channel, .. } if *channel == expected => {
                    Some(Ok(()))
                }
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    pub async fn join_channel(&self, channel: &str) -> Result<()> {
        let expected = channel.to_string();
        let own_id = self.id().to_string();
        self.await_response(
            AgentRecord::ChannelJoin {
                channel: channel.to_string(),
            },
            self.inner.config.channel_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::ChannelJoined {
                    channel, agent_id, ..
                } if *channel == expected && *agent_id == own_id => Some(Ok(())),
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    pub async fn leave_channel(&self, channel: &str) -> Result<()> {
        let expected = channel.to_string();
        let own_id = self.id().to_string();
        self.await_response(
            AgentRecord::ChannelLeave {
                channel: channel.to_string(),
            },
            self.inner.config.channel_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::ChannelLeft {
                    channel, agent_id, ..
                } if *channel == expected && *agent_id == own_id => Some(Ok(())),
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    /// Send to a channel and await the local `channel_sent` acknowledgement.
    pub async fn send_to_channel(&self, channel: &str, content: &str) -> Result<()> {
        let expected = channel.to_string();
        self.await_response(
            AgentRecord::ChannelSend {
                channel: channel.to_string(),
                content: content.to_string(),
            },
            self.inner.config.channel_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::ChannelSent { channel } if *channel == expected => Some(Ok(())),
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    // ── Reservations ────────────────────────────────────────────────────

    /// Reserve paths, resolving relative inputs against this agent's cwd.
    /// Acknowledged by the first `reservations_updated` broadcast that shows
    /// the caller's entry covering every requested path, so a stale broadcast
    /// from someone else's operation cannot acknowledge early.
    pub async fn reserve(&self, paths: &[String], reason: Option<String>) -> Result<()> {
        let resolved: Vec<String> = paths
            .iter()
            .map(|p| crate::reservation::normalize_path_with_base(p, self.cwd()))
            .collect();
        let own_id = self.id().to_string();
        let expected = resolved.clone();
        self.await_response(
            AgentRecord::Reserve {
                paths: resolved,
                reason,
            },
            self.inner.config.reservation_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::ReservationsUpdated { reservations } => {
                    let mine = reservations.get(&own_id)?;
                    expected
                        .iter()
                        .all(|path| mine.paths.contains(path))
                        .then_some(Ok(()))
                }
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    /// Release some paths, or everything when `paths` is `None`. Even a no-op
    /// release is acknowledged: the matcher fires on the first broadcast in
    /// which the released paths are gone from the caller's entry.
    pub async fn release(&self, paths: Option<Vec<String>>) -> Result<()> {
        let resolved: Option<Vec<String>> = paths.map(|paths| {
            paths
                .iter()
                .map(|p| crate::reservation::normalize_path_with_base(p, self.cwd()))
                .collect()
        });
        let own_id = self.id().to_string();
        let released = resolved.clone();
        self.await_response(
            AgentRecord::Release { paths: resolved },
            self.inner.config.reservation_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::ReservationsUpdated { reservations } => {
                    let done = match (&released, reservations.get(&own_id)) {
                        // Release-all: acknowledged once the entry is gone.
                        (None, mine) => mine.is_none(),
                        (Some(_), None) => true,
                        (Some(released), Some(mine)) => released
                            .iter()
                            .all(|path| !mine.paths.contains(path)),
                    };
                    done.then_some(Ok(()))
                }
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    // ── Rename / listings ───────────────────────────────────────────────

    pub async fn rename(&self, new_name: &str) -> Result<()> {
        let own_id = self.id().to_string();
        let expected = new_name.trim().to_string();
        self.await_response(
            AgentRecord::Rename {
                name: new_name.to_string(),
            },
            self.inner.config.channel_timeout,
            None,
            Box::new(move |record| match record {
                BrokerRecord::AgentRenamed { id, new_name, .. }
                    if *id == own_id && *new_name == expected =>
                {
                    Some(Ok(()))
                }
                BrokerRecord::Error {
                    message,
                    correlation_id: None,
                } => Some(Err(SessionError::Remote(message.clone()))),
                _ => None,
            }),
        )
        .await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        self.await_response(
            AgentRecord::ListAgents,
            self.inner.config.list_timeout,
            None,
            Box::new(|record| match record {
                BrokerRecord::AgentList { agents } => Some(Ok(agents.clone())),
                _ => None,
            }),
        )
        .await
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelSummary>> {
        self.await_response(
            AgentRecord::ListChannels,
            self.inner.config.list_timeout,
            None,
            Box::new(|record| match record {
                BrokerRecord::ChannelList { channels } => Some(Ok(channels.clone())),
                _ => None,
            }),
        )
        .await
    }
}
