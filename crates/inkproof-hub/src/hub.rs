use crate::manager::HubManager;
use axum::extract::ws::Message;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

const EVENT_QUEUE: usize = 256;

/// A registration request: a new client joining the hub.
struct RegisterMsg {
    client_id: String,
    display_name: String,
    send: mpsc::Sender<Message>,
}

/// Everything the event loop reacts to, funneled through a single channel so
/// that a client's register and its later unregister — sent from the same
/// task, in that order — are guaranteed to be observed in that order. Two
/// separate channels gave no such guarantee: `select!` could dequeue an
/// unregister before the register it was meant to follow.
enum HubEvent {
    Register(RegisterMsg),
    Unregister(String),
    Broadcast { sender: String, payload: Message },
}

/// The per-room in-memory broker: one event-loop task owns all client state
/// and is the only code path that ever touches it. Every public method here
/// is a non-blocking (or best-effort) send into that loop's channel.
pub struct Hub {
    room_id: String,
    events_tx: mpsc::Sender<HubEvent>,
}

impl Hub {
    /// Spawn a hub's event loop and return a handle to it. `manager` is used
    /// only to report eviction when the room empties out; the hub holds no
    /// other reference back to the manager that owns it.
    pub(crate) fn spawn(room_id: String, manager: HubManager) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let hub = Arc::new(Self {
            room_id: room_id.clone(),
            events_tx,
        });

        tokio::spawn(run_event_loop(room_id, manager, events_rx));

        hub
    }

    /// Room this hub serves.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Register a new client, handing the hub ownership of its send queue.
    /// Awaits (rather than drops) because registration must not be lost —
    /// the event queue is large enough that backpressure here is a sign of a
    /// stuck event loop, not ordinary load.
    pub async fn register(&self, client_id: String, display_name: String, send: mpsc::Sender<Message>) {
        let _ = self
            .events_tx
            .send(HubEvent::Register(RegisterMsg {
                client_id,
                display_name,
                send,
            }))
            .await;
    }

    /// Remove a client from the room.
    pub async fn unregister(&self, client_id: String) {
        let _ = self.events_tx.send(HubEvent::Unregister(client_id)).await;
    }

    /// Fan a frame out to every client in the room except `sender`.
    /// Non-blocking: a full event queue means the hub's loop is saturated,
    /// in which case the frame is dropped and logged here rather than
    /// stalling the caller's read loop.
    pub fn broadcast(&self, sender: String, payload: Message) {
        if self
            .events_tx
            .try_send(HubEvent::Broadcast { sender, payload })
            .is_err()
        {
            warn!(room_id = %self.room_id, "hub event queue full, dropping broadcast frame");
        }
    }
}

async fn run_event_loop(room_id: String, manager: HubManager, mut events_rx: mpsc::Receiver<HubEvent>) {
    let mut clients: HashMap<String, mpsc::Sender<Message>> = HashMap::new();
    let mut names: HashMap<String, String> = HashMap::new();

    while let Some(event) = events_rx.recv().await {
        match event {
            HubEvent::Unregister(client_id) => {
                if clients.remove(&client_id).is_none() {
                    continue;
                }
                let name = names_get(&names, &client_id);
                names.remove(&client_id);
                fan_out(&clients, None, leave_event(&client_id, &name, &room_id));

                if clients.is_empty() {
                    manager.evict(&room_id).await;
                    return;
                }
            }

            HubEvent::Register(RegisterMsg { client_id, display_name, send }) => {
                // Snapshot reflects the room as it was before this client joined —
                // the new client's own join arrives separately via the broadcast below.
                let snapshot = presence_snapshot(&room_id, &clients, &names);

                clients.insert(client_id.clone(), send);
                names.insert(client_id.clone(), display_name.clone());

                if let Some(s) = clients.get(&client_id) {
                    let _ = s.try_send(snapshot);
                }
                fan_out(&clients, None, join_event(&client_id, &display_name, &room_id));
            }

            HubEvent::Broadcast { sender, payload } => {
                fan_out(&clients, Some(&sender), payload);
            }
        }
    }
}

fn names_get(names: &HashMap<String, String>, id: &str) -> String {
    names.get(id).cloned().unwrap_or_default()
}

fn fan_out(clients: &HashMap<String, mpsc::Sender<Message>>, exclude: Option<&str>, payload: Message) {
    for (id, send) in clients {
        if exclude == Some(id.as_str()) {
            continue;
        }
        if send.try_send(payload.clone()).is_err() {
            warn!(client_id = %id, "client send queue full, dropping frame");
        }
    }
}

/// A client's entry in a presence snapshot roster.
#[derive(Serialize)]
struct ClientInfo {
    client_id: String,
    name: String,
}

/// The hub's system messages, typed so they're checked at compile time
/// instead of assembled as ad hoc JSON. `type` is always `"system"`;
/// `event` discriminates the payload shape.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SystemEvent {
    Join { client_id: String, name: String, room: String, time: String },
    Leave { client_id: String, name: String, room: String, time: String },
    PresenceSnapshot { room: String, clients: Vec<ClientInfo>, time: String },
}

#[derive(Serialize)]
struct SystemEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    event: SystemEvent,
}

fn to_message(event: SystemEvent) -> Message {
    let envelope = SystemEnvelope { kind: "system", event };
    Message::Text(serde_json::to_string(&envelope).expect("system event always serializes").into())
}

fn join_event(client_id: &str, name: &str, room: &str) -> Message {
    to_message(SystemEvent::Join {
        client_id: client_id.to_string(),
        name: name.to_string(),
        room: room.to_string(),
        time: Utc::now().to_rfc3339(),
    })
}

fn leave_event(client_id: &str, name: &str, room: &str) -> Message {
    to_message(SystemEvent::Leave {
        client_id: client_id.to_string(),
        name: name.to_string(),
        room: room.to_string(),
        time: Utc::now().to_rfc3339(),
    })
}

fn presence_snapshot(
    room: &str,
    clients: &HashMap<String, mpsc::Sender<Message>>,
    names: &HashMap<String, String>,
) -> Message {
    let mut roster: Vec<ClientInfo> = clients
        .keys()
        .map(|id| ClientInfo { client_id: id.clone(), name: names_get(names, id) })
        .collect();
    roster.sort_by(|a, b| a.client_id.cmp(&b.client_id));
    to_message(SystemEvent::PresenceSnapshot {
        room: room.to_string(),
        clients: roster,
        time: Utc::now().to_rfc3339(),
    })
}
