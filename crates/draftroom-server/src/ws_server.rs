// WebSocket server: one task per connected client, each running a Session
// against the shared draft room.

use std::sync::Arc;

use anyhow::Context;
use draftroom_core::protocol::{Reply, ServerMessage};
use draftroom_core::DraftHandle;
use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::session::Session;

/// Inbound frames per connection buffered ahead of the session.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Events read off one client connection.
#[derive(Debug, PartialEq)]
pub enum WsEvent {
    /// A text message was received from the client (raw JSON string).
    Message(String),
    /// The client closed the connection or the socket failed.
    Disconnected,
}

/// Bind the listener. Port 0 picks a free port; see `local_addr`.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {addr}"))
}

/// Accept connections forever, spawning a session task for each.
pub async fn run(
    listener: TcpListener,
    handle: DraftHandle,
    admin_password: Option<String>,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");
    let admin_password: Option<Arc<str>> = admin_password.map(Arc::from);

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("Accepted TCP connection from {addr_str}");

        let handle = handle.clone();
        let admin_password = admin_password.clone();
        tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {addr_str}: {e}");
                    return;
                }
            };
            let session = Session::new(handle, admin_password, addr_str.clone());
            if let Err(e) = serve_connection(ws_stream, session, &addr_str).await {
                warn!("Connection {addr_str} ended with error: {e:#}");
            }
            info!("Client {addr_str} disconnected");
        });
    }
}

/// Drive one client: push the current snapshot, then answer each intent and
/// push every later snapshot until either side goes away.
pub async fn serve_connection<S>(
    ws_stream: WebSocketStream<S>,
    mut session: Session,
    addr: &str,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, read) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

    let reader_addr = addr.to_string();
    let reader = tokio::spawn(async move {
        if process_message_stream(read, &tx, &reader_addr).await.is_ok() {
            let _ = tx.send(WsEvent::Disconnected).await;
        }
    });

    let mut snapshots = session.subscribe();
    let initial = snapshots.borrow_and_update().clone();
    session.observe(&initial);
    send_message(
        &mut write,
        &ServerMessage::push(Reply::Snapshot {
            snapshot: (*initial).clone(),
        }),
    )
    .await?;

    let result = loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(WsEvent::Message(text)) => {
                        debug!("{addr} -> {text}");
                        let reply = session.handle_text(&text).await;
                        if let Err(e) = send_message(&mut write, &reply).await {
                            break Err(e);
                        }
                    }
                    Some(WsEvent::Disconnected) | None => break Ok(()),
                }
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    info!("Draft room stopped; closing connection to {addr}");
                    break Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                session.observe(&snapshot);
                let push = ServerMessage::push(Reply::Snapshot {
                    snapshot: (*snapshot).clone(),
                });
                if let Err(e) = send_message(&mut write, &push).await {
                    break Err(e);
                }
            }
        }
    };

    reader.abort();
    let _ = write.close().await;
    result
}

async fn send_message<W>(write: &mut W, msg: &ServerMessage) -> anyhow::Result<()>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(msg).context("failed to serialize server message")?;
    write
        .send(Message::Text(json.into()))
        .await
        .context("failed to send WebSocket message")
}

/// Process raw WebSocket [`Message`] items from any [`Stream`], forwarding
/// text payloads through `tx`. Returns `Err(())` if the channel is closed
/// (receiver dropped), signalling the caller to stop.
///
/// Generic over the stream so it can be tested with in-memory streams
/// without opening TCP ports.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if tx.send(WsEvent::Message(text.to_string())).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong and raw frames carry no intents.
            }
        }
    }
    Ok(())
}
