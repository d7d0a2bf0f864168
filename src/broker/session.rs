//! Per-connection WebSocket handling: the read loop, the writer task that
//! drains the session outbox, and register-first enforcement.

use super::state::RegisterRequest;
use super::Broker;
use crate::protocol::{decode_frame, AgentRecord, BrokerRecord, Decoded};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Notify;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broker): State<Broker>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

async fn handle_socket(socket: WebSocket, broker: Broker) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outbox_rx) = unbounded_channel::<BrokerRecord>();
    let close = Arc::new(Notify::new());

    // Writer task: the only place this session's sink is touched. Routing
    // pushes onto the outbox under the broker lock; actual writes happen
    // here, outside it.
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

    let mut agent_id: Option<String> = None;

    loop {
        tokio::select! {
            // Disconnect cleanup (administrative eviction, heartbeat reaping)
            // fires this; break so the transport closes too.
            () = close.notified() => break,
            frame = stream.next() => {
                let Some(result) = frame else { break };
                let message = match result {
                    Ok(message) => message,
                    Err(error) => {
                        tracing::debug!("session receive error: {error}");
                        break;
                    }
                };

                match message {
                    Message::Text(text) => {
                        handle_frame(&broker, &outbox, &close, &mut agent_id, text.as_str());
                    }
                    Message::Close(_) => break,
                    // Ping/pong is answered by the protocol layer.
                    _ => {}
                }
            }
        }
    }

    if let Some(id) = agent_id {
        broker.disconnect_id(&id);
    }
    drop(outbox);
    let _ = writer.await;
}

fn handle_frame(
    broker: &Broker,
    outbox: &UnboundedSender<BrokerRecord>,
    close: &Arc<Notify>,
    agent_id: &mut Option<String>,
    text: &str,
) {
    let record = match decode_frame::<AgentRecord>(text, AgentRecord::TAGS) {
        Decoded::Record(record) => record,
        Decoded::UnknownTag(tag) => {
            tracing::debug!("ignoring unknown record tag {tag:?}");
            return;
        }
        Decoded::Malformed { tag, message } => {
            tracing::debug!("malformed {tag} record: {message}");
            let _ = outbox.send(BrokerRecord::error(format!("Malformed {tag} record")));
            return;
        }
        Decoded::InvalidJson(error) => {
            tracing::debug!("undecodable frame: {error}");
            let _ = outbox.send(BrokerRecord::error("Invalid JSON"));
            return;
        }
    };

    match (agent_id.as_deref(), record) {
        (
            None,
            AgentRecord::Register {
                id,
                name,
                role,
                parent_id,
                cwd,
                interactive,
            },
        ) => {
            let request = RegisterRequest {
                id,
                name,
                role,
                parent_id,
                cwd,
                interactive,
            };
            let Ok(mut state) = broker.lock_state() else {
                return;
            };
            match state.register(request, outbox.clone(), Arc::clone(close)) {
                Ok(info) => {
                    tracing::info!("agent {} registered as {:?}", info.id, info.name);
                    *agent_id = Some(info.id);
                }
                Err(message) => {
                    let _ = outbox.send(BrokerRecord::error(message));
                }
            }
        }
        (None, _) => {
            let _ = outbox.send(BrokerRecord::error(
                "Not registered: the first record must be register",
            ));
        }
        (Some(id), record) => {
            let id = id.to_string();
            match broker.lock_state() {
                Ok(mut state) => super::handlers::handle_record(&mut state, &id, record),
                Err(err) => tracing::warn!("dropping record from {id}: {err}"),
            }
        }
    }
}
