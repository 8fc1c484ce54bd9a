use crate::client;
use crate::manager::HubManager;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{Sink, Stream};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use uuid::Uuid;

#[derive(Clone)]
pub struct CollabState {
    pub hubs: HubManager,
}

#[derive(Deserialize)]
struct JoinQuery {
    name: Option<String>,
}

/// Router exposing the websocket collaboration endpoint at
/// `/ws/rooms/{room_id}`. Mount this alongside the compile intake router on
/// the same Axum app.
pub fn collab_router(state: Arc<CollabState>) -> Router {
    Router::new()
        .route("/ws/rooms/{room_id}", get(upgrade))
        .with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<JoinQuery>,
    State(state): State<Arc<CollabState>>,
) -> Response {
    let display_name = query.name.unwrap_or_else(|| "anonymous".to_string());
    let client_id = Uuid::new_v4().to_string();

    ws.on_upgrade(move |socket| async move {
        let hub = state.hubs.get_or_create(&room_id).await;
        client::run(WebSocketAdapter(socket), hub, client_id, display_name).await;
    })
}

/// Bridges `axum`'s websocket frame type to the generic `Message` type
/// `client::run` is written against, so production code and tests share one
/// read/write loop implementation.
struct WebSocketAdapter(WebSocket);

impl Stream for WebSocketAdapter {
    type Item = Result<AxumMessage, axum::Error>;
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}

impl Sink<AxumMessage> for WebSocketAdapter {
    type Error = axum::Error;
    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_ready(cx)
    }
    fn start_send(mut self: Pin<&mut Self>, item: AxumMessage) -> Result<(), Self::Error> {
        Pin::new(&mut self.0).start_send(item)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_close(cx)
    }
}
