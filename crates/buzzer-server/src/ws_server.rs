// WebSocket server: accepts browser clients and bridges them to the game loop.

use std::io;
use std::time::Duration;

use buzzer_core::session::ClientId;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::clients::Outbound;

/// Pause before accepting again after a listener-level failure (fd
/// exhaustion and the like), so a persistent error cannot spin the loop.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug)]
pub enum WsEvent {
    /// A client finished the WebSocket handshake. `outbound` feeds its socket.
    Connected {
        client: ClientId,
        addr: String,
        outbound: Outbound,
    },
    /// The client's socket closed or failed.
    Disconnected { client: ClientId },
    /// A text frame from the client (raw JSON string).
    Message { client: ClientId, text: String },
}

/// Bind the TCP listener for the server. Pass port 0 for an ephemeral port.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections forever, forwarding their events through `tx`.
///
/// Each connection gets the next [`ClientId`] and runs in its own task, so a
/// slow handshake never holds up other clients. Returns once the application
/// side of `tx` has been dropped.
pub async fn run(listener: TcpListener, tx: mpsc::Sender<WsEvent>) -> anyhow::Result<()> {
    let mut next_id: u64 = 0;

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_connection_error(&e) => {
                debug!("Dropped connection during accept: {e}");
                continue;
            }
            Err(e) => {
                warn!("Failed to accept TCP connection, retrying in {ACCEPT_RETRY_DELAY:?}: {e}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        if tx.is_closed() {
            break;
        }

        next_id += 1;
        let client = ClientId(next_id);
        let addr = addr.to_string();
        debug!("Accepted TCP connection from {addr} as {client}");

        let tx = tx.clone();
        tokio::spawn(async move {
            handle_connection(stream, addr, client, tx).await;
        });
    }

    info!("WebSocket server stopping: application channel closed");
    Ok(())
}

/// Whether an `accept()` failure concerns only the connection being accepted.
/// Anything else (out of file descriptors, out of memory) is a listener-level
/// condition that gets the retry delay.
pub fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

/// Drive one connection: handshake, announce it, pump frames in both
/// directions, then announce the disconnect.
///
/// Generic over the byte stream so tests can use in-memory duplex pipes.
pub async fn handle_connection<S>(
    stream: S,
    addr: String,
    client: ClientId,
    tx: mpsc::Sender<WsEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    info!("{client} connected from {addr}");

    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    if tx
        .send(WsEvent::Connected {
            client,
            addr: addr.clone(),
            outbound: out_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = write.send(Message::Text(text.into())).await {
                debug!("Write to {client} failed: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    if process_message_stream(read, client, &tx, &addr).await.is_ok() {
        let _ = tx.send(WsEvent::Disconnected { client }).await;
    }
    writer.abort();
    debug!("Connection task for {client} finished");
}

/// Process raw WebSocket [`Message`] items from any [`Stream`], forwarding
/// text payloads through `tx`. This is a pure-logic function that requires
/// no I/O and is the primary unit-test target.
///
/// Returns `Err(())` if the channel is closed (receiver dropped), signalling
/// the caller to stop.
pub async fn process_message_stream<St>(
    mut stream: St,
    client: ClientId,
    tx: &mpsc::Sender<WsEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    client,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
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
                // Binary, Ping, Pong and raw frames carry no game events.
            }
        }
    }
    Ok(())
}
