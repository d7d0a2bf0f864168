//! Broker-owned tables: the agent registry, channel table and reservation
//! table, plus the fanout primitives every routing path uses.
//!
//! All mutation happens under the single broker lock; sends push onto
//! per-session unbounded outboxes so no network write ever happens while the
//! lock is held.

use crate::protocol::{AgentInfo, AgentStatus, BrokerRecord, ReservationMap};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

/// Registry entry: the public AgentInfo plus the session handles and liveness
/// bookkeeping.
pub(crate) struct ConnectedAgent {
    pub info: AgentInfo,
    pub outbox: UnboundedSender<BrokerRecord>,
    /// Fired by disconnect cleanup; the session read loop exits on it so an
    /// evicted agent's transport actually closes.
    pub close: Arc<Notify>,
    pub last_heartbeat_at: Instant,
}

pub(crate) struct ChannelEntry {
    pub members: BTreeSet<String>,
    pub created_by: String,
}

#[derive(Default)]
pub(crate) struct BrokerState {
    /// id → connected agent. Key set always equals `names` value set.
    pub agents: HashMap<String, ConnectedAgent>,
    /// display name → id. Bijective with the registry.
    pub names: HashMap<String, String>,
    /// Channels exist iff they have at least one member.
    pub channels: HashMap<String, ChannelEntry>,
    pub reservations: ReservationMap,
}

pub(crate) struct RegisterRequest {
    pub id: String,
    pub name: String,
    pub role: String,
    pub parent_id: Option<String>,
    pub cwd: String,
    pub interactive: bool,
}

impl BrokerState {
    // ── Fanout ──────────────────────────────────────────────────────────

    pub fn send_to(&self, id: &str, record: BrokerRecord) {
        if let Some(agent) = self.agents.get(id) {
            // A full or closed outbox means the session is going away; the
            // disconnect path owns the cleanup.
            let _ = agent.outbox.send(record);
        }
    }

    pub fn broadcast_except(&self, exclude: Option<&str>, record: &BrokerRecord) {
        for (id, agent) in &self.agents {
            if Some(id.as_str()) == exclude {
                continue;
            }
            let _ = agent.outbox.send(record.clone());
        }
    }

    pub fn broadcast_all(&self, record: &BrokerRecord) {
        self.broadcast_except(None, record);
    }

    // ── Lookups ─────────────────────────────────────────────────────────

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.agents.get(id).map(|a| a.info.name.as_str())
    }

    /// Roster snapshot, name-ordered for stable listings.
    pub fn roster(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> =
            self.agents.values().map(|a| a.info.clone()).collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Smallest free display name: the requested name, else `name-2`,
    /// `name-3`, … A blank request falls back to `agent`.
    fn resolve_unique_name(&self, requested: &str) -> String {
        let base = {
            let trimmed = requested.trim();
            if trimmed.is_empty() { "agent" } else { trimmed }
        };
        if !self.names.contains_key(base) {
            return base.to_string();
        }
        let mut k = 2u32;
        loop {
            let candidate = format!("{base}-{k}");
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            k += 1;
        }
    }

    /// Install a newcomer, reply `registered` on its outbox and announce
    /// `agent_joined` to everyone else.
    pub fn register(
        &mut self,
        request: RegisterRequest,
        outbox: UnboundedSender<BrokerRecord>,
        close: Arc<Notify>,
    ) -> Result<AgentInfo, String> {
        if self.agents.contains_key(&request.id) {
            return Err(format!("Agent id \"{}\" is already connected", request.id));
        }

        let name = self.resolve_unique_name(&request.name);
        let info = AgentInfo {
            id: request.id.clone(),
            name: name.clone(),
            role: request.role,
            parent_id: request.parent_id,
            cwd: request.cwd,
            status: AgentStatus::Idle,
            channels: BTreeSet::new(),
            interactive: request.interactive,
            status_message: None,
            last_activity_at: chrono::Utc::now().to_rfc3339(),
        };

        self.names.insert(name, request.id.clone());
        self.agents.insert(
            request.id.clone(),
            ConnectedAgent {
                info: info.clone(),
                outbox,
                close,
                last_heartbeat_at: Instant::now(),
            },
        );

        self.send_to(
            &request.id,
            BrokerRecord::Registered {
                id: request.id.clone(),
                agents: self.roster(),
                reservations: self.reservations.clone(),
            },
        );
        self.broadcast_except(
            Some(&request.id),
            &BrokerRecord::AgentJoined { agent: info.clone() },
        );

        Ok(info)
    }

    // ── Disconnect ──────────────────────────────────────────────────────

    /// Full disconnect cleanup. Idempotent: a second call for the same id is
    /// a no-op returning false.
    ///
    /// Also signals the session to close its transport, so administrative
    /// eviction and heartbeat reaping tear the connection down rather than
    /// leaving a deregistered-but-open socket behind.
    pub fn disconnect(&mut self, id: &str) -> bool {
        let Some(removed) = self.agents.remove(id) else {
            return false;
        };
        self.names.remove(&removed.info.name);
        removed.close.notify_one();

        self.channels.retain(|_, entry| {
            entry.members.remove(id);
            !entry.members.is_empty()
        });

        let had_reservation = self.reservations.remove(id).is_some();
        if had_reservation {
            self.broadcast_all(&BrokerRecord::ReservationsUpdated {
                reservations: self.reservations.clone(),
            });
        }

        self.broadcast_all(&BrokerRecord::AgentLeft {
            id: removed.info.id,
            name: removed.info.name,
        });
        true
    }

    // ── Liveness ────────────────────────────────────────────────────────

    pub fn refresh_heartbeat(&mut self, id: &str) {
        if let Some(agent) = self.agents.get_mut(id) {
            agent.last_heartbeat_at = Instant::now();
        }
    }

    /// Agents whose last heartbeat is older than `timeout`.
    pub fn expired_ids(&self, timeout: Duration) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(_, agent)| agent.last_heartbeat_at.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
