//! Per-agent inbox: funnels inbound direct, broadcast and channel messages
//! into the agent's LLM conversation one at a time.
//!
//! The host runtime is not safe to interrupt mid-turn, so the inbox holds a
//! FIFO queue, dispatches only between turns after a short settle delay, and
//! binds a correlated DM to the reply produced by the very next turn.

use crate::client::HiveClient;
use crate::protocol::{AgentRecord, BrokerRecord};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Quiet period between a turn ending and the next dispatch.
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Reply sent when the turn produced no non-empty text.
pub const NO_TEXT_FALLBACK: &str = "(agent processing — no text response produced)";

/// Reply sent when both injection attempts fail.
pub const DELIVERY_FAILED_FALLBACK: &str = "(failed to deliver message to agent)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    System,
    User,
    Assistant,
}

/// One conversation-log entry as handed to [`Inbox::agent_end`]. Blocks are
/// the message's text blocks in order.
#[derive(Debug, Clone)]
pub struct TranscriptMessage {
    pub role: TranscriptRole,
    pub blocks: Vec<String>,
}

impl TranscriptMessage {
    pub fn assistant(blocks: &[&str]) -> Self {
        Self {
            role: TranscriptRole::Assistant,
            blocks: blocks.iter().map(|b| (*b).to_string()).collect(),
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: TranscriptRole::User,
            blocks: vec![text.to_string()],
        }
    }
}

/// Seam to the LLM conversation hosting this agent.
#[async_trait]
pub trait ConversationRuntime: Send + Sync {
    /// Inject a synthetic user turn.
    async fn inject(&self, text: &str) -> anyhow::Result<()>;

    /// Fallback injection path, tried once when [`inject`](Self::inject)
    /// fails.
    async fn inject_followup(&self, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
enum Inbound {
    Dm {
        from_name: String,
        content: String,
        correlation_id: Option<String>,
    },
    Broadcast {
        from_name: String,
        content: String,
    },
    Channel {
        channel: String,
        from_name: String,
        content: String,
    },
}

impl Inbound {
    fn from_record(record: &BrokerRecord) -> Option<Self> {
        match record {
            BrokerRecord::Dm {
                from_name,
                content,
                correlation_id,
                ..
            } => Some(Self::Dm {
                from_name: from_name.clone(),
                content: content.clone(),
                correlation_id: correlation_id.clone(),
            }),
            BrokerRecord::Broadcast {
                from_name, content, ..
            } => Some(Self::Broadcast {
                from_name: from_name.clone(),
                content: content.clone(),
            }),
            BrokerRecord::ChannelMessage {
                channel,
                from_name,
                content,
                ..
            } => Some(Self::Channel {
                channel: channel.clone(),
                from_name: from_name.clone(),
                content: content.clone(),
            }),
            _ => None,
        }
    }

    fn formatted(&self) -> String {
        match self {
            Self::Dm {
                from_name, content, ..
            } => format!("[From {from_name}]: {content}"),
            Self::Broadcast { from_name, content } => {
                format!("[Broadcast from {from_name}]: {content}")
            }
            Self::Channel {
                channel,
                from_name,
                content,
            } => format!("[#{channel} from {from_name}]: {content}"),
        }
    }
}

struct PendingReply {
    to: String,
    correlation_id: String,
}

#[derive(Default)]
struct InboxState {
    queue: VecDeque<Inbound>,
    turn_active: bool,
    in_flight: bool,
    /// Bumped on every `agent_start`; a scheduled dispatch only fires if the
    /// generation it captured is still current.
    generation: u64,
    pending_reply: Option<PendingReply>,
}

type SendFn = Box<dyn Fn(AgentRecord) + Send + Sync>;

struct InboxInner {
    state: Mutex<InboxState>,
    runtime: Arc<dyn ConversationRuntime>,
    send: SendFn,
    settle_delay: Duration,
}

#[derive(Clone)]
pub struct Inbox {
    inner: Arc<InboxInner>,
}

impl Inbox {
    pub fn new(
        runtime: Arc<dyn ConversationRuntime>,
        send: impl Fn(AgentRecord) + Send + Sync + 'static,
    ) -> Self {
        Self::with_settle_delay(runtime, send, SETTLE_DELAY)
    }

    pub fn with_settle_delay(
        runtime: Arc<dyn ConversationRuntime>,
        send: impl Fn(AgentRecord) + Send + Sync + 'static,
        settle_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(InboxInner {
                state: Mutex::new(InboxState::default()),
                runtime,
                send: Box::new(send),
                settle_delay,
            }),
        }
    }

    /// Wire an inbox to a client session: conversational records flow in,
    /// `dm_response` records flow back out through the session.
    pub fn attach(client: &HiveClient, runtime: Arc<dyn ConversationRuntime>) -> Self {
        let sender = client.clone();
        let inbox = Self::new(runtime, move |record| {
            if let Err(err) = sender.send(record) {
                tracing::warn!("inbox failed to send reply: {err}");
            }
        });
        let tap = inbox.clone();
        client.add_listener(move |record| tap.on_record(record));
        inbox
    }

    /// Feed one inbound broker record. Non-conversational records are
    /// ignored.
    pub fn on_record(&self, record: &BrokerRecord) {
        let Some(message) = Inbound::from_record(record) else {
            return;
        };
        let schedule = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.queue.push_back(message);
            (!state.turn_active && !state.in_flight).then_some(state.generation)
        };
        if let Some(generation) = schedule {
            self.schedule(generation);
        }
    }

    /// The host runtime began an LLM turn. Cancels any scheduled dispatch.
    pub fn agent_start(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.turn_active = true;
            state.generation += 1;
        }
    }

    /// The host runtime finished a turn. Emits the pending `dm_response` (if
    /// a correlated DM was in flight) and schedules the next dispatch.
    pub fn agent_end(&self, messages: &[TranscriptMessage]) {
        let schedule = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.turn_active = false;
            state.in_flight = false;
            if let Some(pending) = state.pending_reply.take() {
                let content =
                    extract_reply(messages).unwrap_or_else(|| NO_TEXT_FALLBACK.to_string());
                (self.inner.send)(AgentRecord::DmResponse {
                    to: pending.to,
                    correlation_id: pending.correlation_id,
                    content,
                });
            }
            (!state.queue.is_empty()).then_some(state.generation)
        };
        if let Some(generation) = schedule {
            self.schedule(generation);
        }
    }

    fn schedule(&self, generation: u64) {
        let inbox = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inbox.inner.settle_delay).await;
            inbox.try_dispatch(generation).await;
        });
    }

    async fn try_dispatch(&self, generation: u64) {
        let message = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if state.generation != generation || state.turn_active || state.in_flight {
                return;
            }
            let Some(message) = state.queue.pop_front() else {
                return;
            };
            state.in_flight = true;
            if let Inbound::Dm {
                from_name,
                correlation_id: Some(correlation_id),
                ..
            } = &message
            {
                state.pending_reply = Some(PendingReply {
                    to: from_name.clone(),
                    correlation_id: correlation_id.clone(),
                });
            }
            message
        };

        let text = message.formatted();
        if let Err(first) = self.inner.runtime.inject(&text).await {
            tracing::warn!("injection failed, retrying as follow-up: {first}");
            if let Err(second) = self.inner.runtime.inject_followup(&text).await {
                tracing::warn!("follow-up injection failed, dropping message: {second}");
                self.fail_delivery();
            }
        }
    }

    /// Both injection attempts failed: answer a pending correlated DM with
    /// the failure literal and move on to the next queued message.
    fn fail_delivery(&self) {
        let schedule = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.in_flight = false;
            if let Some(pending) = state.pending_reply.take() {
                (self.inner.send)(AgentRecord::DmResponse {
                    to: pending.to,
                    correlation_id: pending.correlation_id,
                    content: DELIVERY_FAILED_FALLBACK.to_string(),
                });
            }
            (!state.queue.is_empty()).then_some(state.generation)
        };
        if let Some(generation) = schedule {
            self.schedule(generation);
        }
    }
}

fn extract_reply(messages: &[TranscriptMessage]) -> Option<String> {
    let last_assistant = messages
        .iter()
        .rev()
        .find(|m| m.role == TranscriptRole::Assistant)?;
    last_assistant
        .blocks
        .iter()
        .rev()
        .map(|block| block.trim())
        .find(|block| !block.is_empty())
        .map(str::to_string)
}
