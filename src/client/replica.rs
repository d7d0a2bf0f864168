//! Read-only mirror of the broker's registry and reservation table.
//!
//! Snapshot records (`registered`, `agent_list`, `reservations_updated`)
//! replace whole tables; delta records refine the last snapshot. The mirror
//! is always updated before user listeners observe the record.

use crate::protocol::{AgentInfo, BrokerRecord, ReservationMap};
use std::collections::HashMap;

pub(crate) struct Replica {
    pub own_id: String,
    pub agents: HashMap<String, AgentInfo>,
    pub reservations: ReservationMap,
}

impl Replica {
    pub fn new(own_id: String, agents: Vec<AgentInfo>, reservations: ReservationMap) -> Self {
        Self {
            own_id,
            agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
            reservations,
        }
    }

    pub fn roster(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn agent_by_name(&self, name: &str) -> Option<&AgentInfo> {
        self.agents.values().find(|a| a.name == name)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.agents.get(id).map(|a| a.name.as_str())
    }

    pub fn apply(&mut self, record: &BrokerRecord) {
        match record {
            BrokerRecord::Registered {
                agents,
                reservations,
                ..
            } => {
                self.agents = agents.iter().map(|a| (a.id.clone(), a.clone())).collect();
                self.reservations = reservations.clone();
            }
            BrokerRecord::AgentJoined { agent } => {
                self.agents.insert(agent.id.clone(), agent.clone());
            }
            BrokerRecord::AgentLeft { id, .. } => {
                self.agents.remove(id);
            }
            BrokerRecord::AgentRenamed { id, new_name, .. } => {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.name = new_name.clone();
                }
            }
            BrokerRecord::AgentList { agents } => {
                self.agents = agents.iter().map(|a| (a.id.clone(), a.clone())).collect();
            }
            BrokerRecord::ReservationsUpdated { reservations } => {
                self.reservations = reservations.clone();
            }
            BrokerRecord::StatusChanged {
                id,
                status,
                status_message,
                last_activity_at,
                ..
            } => {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.status = *status;
                    agent.status_message = status_message.clone();
                    if let Some(at) = last_activity_at {
                        agent.last_activity_at = at.clone();
                    }
                }
            }
            BrokerRecord::ChannelCreated { channel, by } => {
                if let Some(agent) = self.agents.values_mut().find(|a| &a.name == by) {
                    agent.channels.insert(channel.clone());
                }
            }
            BrokerRecord::ChannelJoined {
                channel, agent_id, ..
            } => {
                if let Some(agent) = self.agents.get_mut(agent_id) {
                    agent.channels.insert(channel.clone());
                }
            }
            BrokerRecord::ChannelLeft {
                channel, agent_id, ..
            } => {
                if let Some(agent) = self.agents.get_mut(agent_id) {
                    agent.channels.remove(channel);
                }
            }
            _ => {}
        }
    }
}
