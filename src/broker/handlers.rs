//! Per-record routing against the broker tables. Every function here runs
//! under the broker state lock; outbound records only ever touch session
//! outboxes, never the network.

use super::state::{BrokerState, ChannelEntry};
use crate::error::{BrokerError, ReservationError};
use crate::protocol::{AgentRecord, BrokerRecord, ChannelSummary};
use crate::reservation;

/// Apply one record from a registered agent. `register` is handled by the
/// session layer before an agent id exists; a stray one here is ignored.
pub(crate) fn handle_record(state: &mut BrokerState, sender_id: &str, record: AgentRecord) {
    match record {
        AgentRecord::Register { .. } => {
            tracing::debug!("ignoring duplicate register from {sender_id}");
        }
        AgentRecord::Dm {
            to,
            content,
            correlation_id,
        } => handle_dm(state, sender_id, &to, content, correlation_id),
        AgentRecord::DmResponse {
            to,
            correlation_id,
            content,
        } => handle_dm_response(state, sender_id, &to, correlation_id, content),
        AgentRecord::Broadcast { content } => handle_broadcast(state, sender_id, content),
        AgentRecord::ChannelCreate { channel } => handle_channel_create(state, sender_id, channel),
        AgentRecord::ChannelJoin { channel } => handle_channel_join(state, sender_id, &channel),
        AgentRecord::ChannelLeave { channel } => handle_channel_leave(state, sender_id, &channel),
        AgentRecord::ChannelSend { channel, content } => {
            handle_channel_send(state, sender_id, &channel, content);
        }
        AgentRecord::ListAgents => {
            let agents = state.roster();
            state.send_to(sender_id, BrokerRecord::AgentList { agents });
        }
        AgentRecord::ListChannels => {
            let channels = channel_summaries(state);
            state.send_to(sender_id, BrokerRecord::ChannelList { channels });
        }
        AgentRecord::Reserve { paths, reason } => handle_reserve(state, sender_id, &paths, reason),
        AgentRecord::Release { paths } => handle_release(state, sender_id, paths),
        AgentRecord::Rename { name } => handle_rename(state, sender_id, &name),
        AgentRecord::PresenceUpdate {
            status_message,
            last_activity_at,
        } => handle_presence_update(state, sender_id, status_message, last_activity_at),
        AgentRecord::StatusUpdate { status } => {
            if let Some(agent) = state.agents.get_mut(sender_id) {
                agent.info.status = status;
            }
            emit_status_changed(state, sender_id);
        }
        AgentRecord::Heartbeat => {
            state.refresh_heartbeat(sender_id);
            state.send_to(sender_id, BrokerRecord::HeartbeatAck);
        }
    }
}

fn error_to(state: &BrokerState, id: &str, message: String, correlation_id: Option<String>) {
    state.send_to(id, BrokerRecord::error_with_correlation(message, correlation_id));
}

// ─── Messaging ──────────────────────────────────────────────────────────────

fn handle_dm(
    state: &mut BrokerState,
    sender_id: &str,
    to: &str,
    content: String,
    correlation_id: Option<String>,
) {
    let Some(from_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    let Some(target_id) = state.id_of(to).map(str::to_owned) else {
        error_to(
            state,
            sender_id,
            BrokerError::AgentNotOnline(to.to_string()).to_string(),
            correlation_id,
        );
        return;
    };
    state.send_to(
        &target_id,
        BrokerRecord::Dm {
            from: sender_id.to_string(),
            from_name,
            content,
            correlation_id,
        },
    );
}

fn handle_dm_response(
    state: &mut BrokerState,
    sender_id: &str,
    to: &str,
    correlation_id: String,
    content: String,
) {
    let Some(from_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    let Some(target_id) = state.id_of(to).map(str::to_owned) else {
        // The requester vanished; a reply has nowhere to go.
        tracing::debug!("dropping dm_response to offline agent \"{to}\"");
        return;
    };
    state.send_to(
        &target_id,
        BrokerRecord::DmResponse {
            from: sender_id.to_string(),
            from_name,
            correlation_id,
            content,
        },
    );
}

fn handle_broadcast(state: &mut BrokerState, sender_id: &str, content: String) {
    let Some(from_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    state.broadcast_except(
        Some(sender_id),
        &BrokerRecord::Broadcast {
            from: sender_id.to_string(),
            from_name,
            content,
        },
    );
}

// ─── Channels ───────────────────────────────────────────────────────────────

fn handle_channel_create(state: &mut BrokerState, sender_id: &str, channel: String) {
    let Some(creator_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    if state.channels.contains_key(&channel) {
        error_to(
            state,
            sender_id,
            format!("Channel \"{channel}\" already exists"),
            None,
        );
        return;
    }

    // A channel exists iff it has members; the creator is the first one.
    state.channels.insert(
        channel.clone(),
        ChannelEntry {
            members: [sender_id.to_string()].into(),
            created_by: creator_name.clone(),
        },
    );
    if let Some(agent) = state.agents.get_mut(sender_id) {
        agent.info.channels.insert(channel.clone());
    }

    state.broadcast_all(&BrokerRecord::ChannelCreated {
        channel,
        by: creator_name,
    });
}

fn handle_channel_join(state: &mut BrokerState, sender_id: &str, channel: &str) {
    let Some(joiner_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    let Some(entry) = state.channels.get_mut(channel) else {
        error_to(
            state,
            sender_id,
            format!("Channel \"{channel}\" does not exist"),
            None,
        );
        return;
    };

    entry.members.insert(sender_id.to_string());
    let members: Vec<String> = entry.members.iter().cloned().collect();
    if let Some(agent) = state.agents.get_mut(sender_id) {
        agent.info.channels.insert(channel.to_string());
    }

    let record = BrokerRecord::ChannelJoined {
        channel: channel.to_string(),
        agent_id: sender_id.to_string(),
        agent_name: joiner_name,
    };
    for member in members {
        state.send_to(&member, record.clone());
    }
}

fn handle_channel_leave(state: &mut BrokerState, sender_id: &str, channel: &str) {
    let Some(leaver_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    let Some(entry) = state.channels.get_mut(channel) else {
        error_to(
            state,
            sender_id,
            format!("Channel \"{channel}\" does not exist"),
            None,
        );
        return;
    };
    if !entry.members.remove(sender_id) {
        error_to(
            state,
            sender_id,
            format!("Not a member of channel \"{channel}\""),
            None,
        );
        return;
    }

    let remaining: Vec<String> = entry.members.iter().cloned().collect();
    if remaining.is_empty() {
        state.channels.remove(channel);
    }
    if let Some(agent) = state.agents.get_mut(sender_id) {
        agent.info.channels.remove(channel);
    }

    let record = BrokerRecord::ChannelLeft {
        channel: channel.to_string(),
        agent_id: sender_id.to_string(),
        agent_name: leaver_name,
    };
    state.send_to(sender_id, record.clone());
    for member in remaining {
        state.send_to(&member, record.clone());
    }
}

fn handle_channel_send(state: &mut BrokerState, sender_id: &str, channel: &str, content: String) {
    let Some(from_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    let Some(entry) = state.channels.get(channel) else {
        error_to(
            state,
            sender_id,
            format!("Channel \"{channel}\" does not exist"),
            None,
        );
        return;
    };
    if !entry.members.contains(sender_id) {
        error_to(
            state,
            sender_id,
            format!("Not a member of channel \"{channel}\""),
            None,
        );
        return;
    }

    let members: Vec<String> = entry.members.iter().cloned().collect();
    let record = BrokerRecord::ChannelMessage {
        channel: channel.to_string(),
        from: sender_id.to_string(),
        from_name,
        content,
    };
    for member in members {
        if member != sender_id {
            state.send_to(&member, record.clone());
        }
    }
    state.send_to(
        sender_id,
        BrokerRecord::ChannelSent {
            channel: channel.to_string(),
        },
    );
}

fn channel_summaries(state: &BrokerState) -> Vec<ChannelSummary> {
    let mut channels: Vec<ChannelSummary> = state
        .channels
        .iter()
        .map(|(name, entry)| ChannelSummary {
            name: name.clone(),
            members: entry
                .members
                .iter()
                .filter_map(|id| state.name_of(id).map(str::to_owned))
                .collect(),
            created_by: entry.created_by.clone(),
        })
        .collect();
    channels.sort_by(|a, b| a.name.cmp(&b.name));
    channels
}

// ─── Reservations ───────────────────────────────────────────────────────────

fn handle_reserve(
    state: &mut BrokerState,
    sender_id: &str,
    paths: &[String],
    reason: Option<String>,
) {
    let normalized = match reservation::normalize_paths(paths) {
        Ok(normalized) => normalized,
        Err(err) => {
            error_to(state, sender_id, err.to_string(), None);
            return;
        }
    };

    if let Some((path, owner_id, owned)) =
        reservation::find_conflict(&normalized, &state.reservations, sender_id)
    {
        let owner = state
            .name_of(owner_id)
            .unwrap_or(owner_id)
            .to_string();
        let conflict = ReservationError::Conflict {
            path,
            owner,
            reason: owned.reason.clone(),
        };
        error_to(state, sender_id, conflict.to_string(), None);
        return;
    }

    let entry = state.reservations.entry(sender_id.to_string()).or_default();
    for path in normalized {
        if !entry.paths.contains(&path) {
            entry.paths.push(path);
        }
    }
    if reason.is_some() {
        entry.reason = reason;
    }

    state.broadcast_all(&BrokerRecord::ReservationsUpdated {
        reservations: state.reservations.clone(),
    });
}

fn handle_release(state: &mut BrokerState, sender_id: &str, paths: Option<Vec<String>>) {
    match paths {
        None => {
            state.reservations.remove(sender_id);
        }
        Some(paths) if paths.is_empty() => {
            state.reservations.remove(sender_id);
        }
        Some(paths) => {
            if let Some(entry) = state.reservations.get_mut(sender_id) {
                for raw in &paths {
                    let normalized = reservation::normalize_path(raw);
                    entry.paths.retain(|held| held != &normalized);
                }
                if entry.paths.is_empty() {
                    state.reservations.remove(sender_id);
                }
            }
        }
    }

    // Even a no-op release re-broadcasts; clients use the broadcast to
    // conclude the release was observed.
    state.broadcast_all(&BrokerRecord::ReservationsUpdated {
        reservations: state.reservations.clone(),
    });
}

// ─── Rename / presence ──────────────────────────────────────────────────────

fn handle_rename(state: &mut BrokerState, sender_id: &str, requested: &str) {
    let Some(old_name) = state.name_of(sender_id).map(str::to_owned) else {
        return;
    };
    let new_name = requested.trim().to_string();

    if new_name.is_empty() {
        error_to(state, sender_id, "Name cannot be empty".to_string(), None);
        return;
    }

    if new_name == old_name {
        // No state change, but callers still await the acknowledgement.
        state.broadcast_all(&BrokerRecord::AgentRenamed {
            id: sender_id.to_string(),
            old_name: old_name.clone(),
            new_name,
        });
        return;
    }

    if state.names.contains_key(&new_name) {
        error_to(
            state,
            sender_id,
            format!("Name \"{new_name}\" is already taken"),
            None,
        );
        return;
    }

    state.names.remove(&old_name);
    state.names.insert(new_name.clone(), sender_id.to_string());
    if let Some(agent) = state.agents.get_mut(sender_id) {
        agent.info.name = new_name.clone();
    }
    // createdBy is display attribution, so it follows the rename.
    for entry in state.channels.values_mut() {
        if entry.created_by == old_name {
            entry.created_by = new_name.clone();
        }
    }

    state.broadcast_all(&BrokerRecord::AgentRenamed {
        id: sender_id.to_string(),
        old_name,
        new_name,
    });
}

fn handle_presence_update(
    state: &mut BrokerState,
    sender_id: &str,
    status_message: Option<String>,
    last_activity_at: String,
) {
    if let Some(agent) = state.agents.get_mut(sender_id) {
        agent.info.status_message = status_message;
        agent.info.last_activity_at = last_activity_at;
    }
    emit_status_changed(state, sender_id);
}

/// Fan out the full (status, statusMessage, lastActivityAt) triple so
/// listeners get a self-sufficient snapshot.
fn emit_status_changed(state: &BrokerState, sender_id: &str) {
    let Some(agent) = state.agents.get(sender_id) else {
        return;
    };
    let record = BrokerRecord::StatusChanged {
        id: agent.info.id.clone(),
        name: agent.info.name.clone(),
        status: agent.info.status,
        status_message: agent.info.status_message.clone(),
        last_activity_at: Some(agent.info.last_activity_at.clone()),
    };
    state.broadcast_except(Some(sender_id), &record);
}
