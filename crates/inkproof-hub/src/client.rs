use crate::heartbeat::{MAX_FRAME_BYTES, PING_PERIOD, PONG_WAIT, SEND_QUEUE_CAPACITY, WRITE_WAIT};
use crate::hub::Hub;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Drives one client's websocket connection: forwards inbound text/binary
/// frames to the hub as broadcasts, and relays everything the hub sends this
/// client back out over the socket. Runs until the socket closes, a pong
/// deadline is missed, or the hub's send queue for this client is dropped.
///
/// Generic over the socket type so tests can drive it with an in-memory
/// duplex instead of a real `axum::extract::ws::WebSocket`.
async fn write<W>(sink: &mut W, frame: Message) -> Result<(), ()>
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(WRITE_WAIT, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}

pub async fn run<S>(socket: S, hub: Arc<Hub>, client_id: String, display_name: String)
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Send + Unpin + 'static,
{
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Message>(SEND_QUEUE_CAPACITY);

    hub.register(client_id.clone(), display_name, send_tx).await;

    let write_client_id = client_id.clone();
    let write_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_PERIOD);
        ticker.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if write(&mut ws_tx, frame).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write(&mut ws_tx, Message::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if write(&mut ws_tx, Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(client_id = %write_client_id, "client write loop exiting");
    });

    loop {
        let next = tokio::time::timeout(PONG_WAIT, ws_rx.next()).await;
        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                warn!(client_id = %client_id, error = %err, "client read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!(client_id = %client_id, "client read deadline exceeded, closing");
                break;
            }
        };

        match frame {
            Message::Text(ref text) if text.len() > MAX_FRAME_BYTES => {
                warn!(client_id = %client_id, len = text.len(), "inbound frame exceeds max size, closing");
                break;
            }
            Message::Binary(ref bytes) if bytes.len() > MAX_FRAME_BYTES => {
                warn!(client_id = %client_id, len = bytes.len(), "inbound frame exceeds max size, closing");
                break;
            }
            Message::Text(_) | Message::Binary(_) => {
                hub.broadcast(client_id.clone(), frame);
            }
            Message::Close(_) => break,
            // Axum answers pings automatically; pongs just reset the read
            // deadline on the next loop iteration, nothing else to do.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    write_task.abort();
    hub.unregister(client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::HubManager;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// An in-memory duplex standing in for a real websocket: reads come from
    /// an `mpsc::Receiver` wrapped as a `Stream`, writes go out over an
    /// `mpsc::Sender`.
    struct FakeSocket {
        inbound: mpsc::Receiver<Result<Message, axum::Error>>,
        outbound: mpsc::Sender<Message>,
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, axum::Error>;
        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_recv(cx)
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = axum::Error;
        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.outbound
                .try_send(item)
                .map_err(|e| axum::Error::new(std::io::Error::other(e.to_string())))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn fake_socket() -> (mpsc::Sender<Result<Message, axum::Error>>, mpsc::Receiver<Message>, FakeSocket) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        (
            in_tx,
            out_rx,
            FakeSocket {
                inbound: in_rx,
                outbound: out_tx,
            },
        )
    }

    async fn recv_one(rx: &mut mpsc::Receiver<Message>) -> Message {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("message within deadline")
            .expect("channel open")
    }

    fn text(msg: &Message) -> String {
        match msg {
            Message::Text(t) => t.to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inbound_text_frame_is_broadcast_to_other_clients() {
        let manager = HubManager::new();
        let hub = manager.get_or_create("room").await;

        let (other_tx, mut other_rx) = mpsc::channel(8);
        hub.register("other".into(), "Other".into(), other_tx).await;
        let _ = recv_one(&mut other_rx).await; // snapshot
        let _ = recv_one(&mut other_rx).await; // join(other), self-announced

        let (in_tx, mut _out_rx, socket) = fake_socket();
        let run_handle = tokio::spawn(run(socket, hub.clone(), "me".into(), "Me".into()));

        let _ = recv_one(&mut other_rx).await; // join(me)

        in_tx
            .send(Ok(Message::Text("hello".into())))
            .await
            .unwrap();
        let got = recv_one(&mut other_rx).await;
        assert_eq!(got, Message::Text("hello".into()));

        drop(in_tx);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), run_handle).await;
    }

    #[tokio::test]
    async fn hub_broadcasts_are_relayed_out_over_the_socket() {
        let manager = HubManager::new();
        let hub = manager.get_or_create("room").await;

        let (in_tx, mut out_rx, socket) = fake_socket();
        let run_handle = tokio::spawn(run(socket, hub.clone(), "me".into(), "Me".into()));
        let _ = recv_one(&mut out_rx).await; // presence snapshot
        let _ = recv_one(&mut out_rx).await; // join(me)

        let (other_tx, mut _other_rx) = mpsc::channel(8);
        hub.register("other".into(), "Other".into(), other_tx).await;
        let _ = recv_one(&mut out_rx).await; // join(other)

        hub.broadcast("other".to_string(), Message::Text("hi".into()));
        let got = recv_one(&mut out_rx).await;
        assert_eq!(got, Message::Text("hi".into()));

        drop(in_tx);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), run_handle).await;
    }

    #[tokio::test]
    async fn socket_close_unregisters_the_client() {
        let manager = HubManager::new();
        let hub = manager.get_or_create("room").await;

        let (in_tx, mut out_rx, socket) = fake_socket();
        let run_handle = tokio::spawn(run(socket, hub.clone(), "me".into(), "Me".into()));
        let _ = recv_one(&mut out_rx).await;
        let _ = recv_one(&mut out_rx).await;

        in_tx.send(Ok(Message::Close(None))).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), run_handle)
            .await
            .expect("run task completes")
            .expect("run task does not panic");

        assert_eq!(manager.get_or_create("room").await.room_id(), "room");
    }

    #[tokio::test]
    async fn oversized_frame_closes_the_connection_without_reaching_the_hub() {
        let manager = HubManager::new();
        let hub = manager.get_or_create("room").await;

        let (other_tx, mut other_rx) = mpsc::channel(8);
        hub.register("other".into(), "Other".into(), other_tx).await;
        let _ = recv_one(&mut other_rx).await; // snapshot
        let _ = recv_one(&mut other_rx).await; // join(other)

        let (in_tx, mut _out_rx, socket) = fake_socket();
        let run_handle = tokio::spawn(run(socket, hub.clone(), "me".into(), "Me".into()));
        let _ = recv_one(&mut other_rx).await; // join(me)

        let oversized = "x".repeat(MAX_FRAME_BYTES + 1);
        in_tx.send(Ok(Message::Text(oversized.into()))).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), run_handle)
            .await
            .expect("run task completes")
            .expect("run task does not panic");

        // "me" is unregistered after the oversized frame closes its
        // connection; "other" legitimately sees that leave notification, but
        // never the oversized payload itself.
        let leave = recv_one(&mut other_rx).await;
        assert!(text(&leave).contains("\"event\":\"leave\""));
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), other_rx.recv())
                .await
                .is_err(),
            "oversized frame must never reach other clients"
        );
    }
}
