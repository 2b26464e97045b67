// Application state and the game event loop.
//
// A single task owns the buzzer session and the client registry. Transport
// tasks only forward events here, so every state transition is applied one
// message at a time without locks.

use buzzer_core::protocol::{ClientMessage, ServerMessage};
use buzzer_core::session::{BuzzerSession, ClientId};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::clients::{ClientRegistry, Outbound};
use crate::ws_server::WsEvent;

/// Out-of-band requests to the event loop from the process itself.
#[derive(Debug)]
pub enum ControlCommand {
    /// Stop the loop.
    Shutdown,
    /// Reply with a copy of the current session.
    Snapshot(oneshot::Sender<BuzzerSession>),
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AppState {
    pub session: BuzzerSession,
    pub clients: ClientRegistry,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Greet a new connection with its id and the full session so late
    /// joiners see the round in progress.
    pub fn handle_connected(&mut self, client: ClientId, addr: String, outbound: Outbound) {
        self.clients.insert(client, addr, outbound);
        self.send_to(client, &ServerMessage::Connected { id: client });
        self.send_to(client, &ServerMessage::CurrentState(self.session.clone()));
        debug!("{} clients connected", self.clients.len());
    }

    pub fn handle_disconnected(&mut self, client: ClientId) {
        match self.clients.remove(client) {
            Some(addr) => info!(
                "{client} ({addr}) disconnected; {} clients remain",
                self.clients.len()
            ),
            None => debug!("Disconnect for unknown {client}"),
        }
        if self.session.remove_participant(client) {
            info!("{client} left; {} participants remain", self.session.participants().len());
            self.broadcast(&ServerMessage::UpdateParticipants(
                self.session.participants().to_vec(),
            ));
        }
    }

    /// Apply one decoded client event and fan out whatever it changed.
    pub fn handle_client_message(&mut self, client: ClientId, msg: ClientMessage, now: DateTime<Utc>) {
        match msg {
            ClientMessage::Register { name } => {
                if let Some(participant) = self.session.register(client, &name, now) {
                    self.broadcast(&ServerMessage::ParticipantJoined(participant));
                    self.broadcast(&ServerMessage::UpdateParticipants(
                        self.session.participants().to_vec(),
                    ));
                }
            }
            ClientMessage::BuzzerPressed => {
                if let Some(result) = self.session.press(client, now) {
                    self.broadcast(&ServerMessage::BuzzerResult(result));
                    self.broadcast(&ServerMessage::UpdateResults(
                        self.session.current_round_results(),
                    ));
                }
            }
            ClientMessage::StartBuzzer => {
                let round = self.session.start();
                self.broadcast(&ServerMessage::BuzzerStarted { round });
            }
            ClientMessage::StopBuzzer => {
                self.session.stop();
                self.broadcast(&ServerMessage::BuzzerStopped);
            }
            ClientMessage::ResetBuzzer => {
                self.session.reset();
                self.broadcast(&ServerMessage::BuzzerReset);
            }
        }
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        match msg.to_json() {
            Ok(json) => {
                self.clients.broadcast(&json);
            }
            Err(e) => warn!("Failed to serialize outgoing event: {e}"),
        }
    }

    fn send_to(&mut self, client: ClientId, msg: &ServerMessage) {
        match msg.to_json() {
            Ok(json) => {
                self.clients.send_to(client, &json);
            }
            Err(e) => warn!("Failed to serialize outgoing event: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the game loop until shutdown.
///
/// Listens on two channels using `tokio::select!`:
/// 1. Connection events from the WebSocket server
/// 2. Control commands from the process
///
/// Exits on [`ControlCommand::Shutdown`] or when the WebSocket channel closes.
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut ctl_rx: mpsc::Receiver<ControlCommand>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    // Once every control sender is gone, stop polling that channel instead of
    // spinning on a closed receiver.
    let mut ctl_open = true;

    loop {
        tokio::select! {
            // Connection events first: a control command observes every event
            // queued before it.
            biased;

            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(WsEvent::Connected { client, addr, outbound }) => {
                        state.handle_connected(client, addr, outbound);
                    }
                    Some(WsEvent::Disconnected { client }) => {
                        state.handle_disconnected(client);
                    }
                    Some(WsEvent::Message { client, text }) => {
                        handle_ws_message(&mut state, client, &text);
                    }
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            cmd = ctl_rx.recv(), if ctl_open => {
                match cmd {
                    Some(ControlCommand::Shutdown) => {
                        info!("Shutdown requested");
                        break;
                    }
                    Some(ControlCommand::Snapshot(reply)) => {
                        let _ = reply.send(state.session.clone());
                    }
                    None => {
                        debug!("Control channel closed");
                        ctl_open = false;
                    }
                }
            }
        }
    }

    info!("Application event loop exiting");
    Ok(())
}

/// Decode a text frame and apply it. Malformed frames are dropped.
fn handle_ws_message(state: &mut AppState, client: ClientId, text: &str) {
    match ClientMessage::parse(text) {
        Ok(msg) => {
            debug!("{client} -> {}", msg.event_name());
            state.handle_client_message(client, msg, Utc::now());
        }
        Err(e) => {
            warn!("Ignoring malformed message from {client}: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
