// Buzzer session state: rounds, registered participants, and press results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Identifiers and records
// ---------------------------------------------------------------------------

/// Identifier of a single client connection, assigned by the transport in
/// accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A connection that has registered a display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Connection the participant registered from.
    pub id: ClientId,
    /// Display name, already trimmed.
    pub name: String,
    /// When the participant first registered.
    pub joined_at: DateTime<Utc>,
}

/// One accepted buzzer press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerResult {
    /// Round the press belongs to.
    pub round: u32,
    pub participant_id: ClientId,
    /// Name at the time of the press; later renames do not rewrite history.
    pub participant_name: String,
    /// 1-based arrival rank within the round.
    pub position: u32,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BuzzerSession
// ---------------------------------------------------------------------------

/// The complete, process-lifetime state of the buzzer game.
///
/// Serializes to the `currentState` payload sent to newly connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerSession {
    is_active: bool,
    current_round: u32,
    has_started_before: bool,
    participants: Vec<Participant>,
    results: Vec<BuzzerResult>,
}

impl Default for BuzzerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BuzzerSession {
    /// Create a session in its initial state: inactive, round 1, never
    /// started, nobody registered.
    pub fn new() -> Self {
        BuzzerSession {
            is_active: false,
            current_round: 1,
            has_started_before: false,
            participants: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn has_started_before(&self) -> bool {
        self.has_started_before
    }

    /// Registered participants in registration order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Every retained result across rounds, in arrival order.
    pub fn results(&self) -> &[BuzzerResult] {
        &self.results
    }

    pub fn participant(&self, id: ClientId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Results of the current round ordered by position.
    pub fn current_round_results(&self) -> Vec<BuzzerResult> {
        let mut results: Vec<BuzzerResult> = self
            .results
            .iter()
            .filter(|r| r.round == self.current_round)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.position);
        results
    }

    /// Register `id` under `name`.
    ///
    /// Blank names (after trimming) are rejected with `None`. Registering
    /// again from the same connection renames the existing participant and
    /// keeps its original join time.
    pub fn register(
        &mut self,
        id: ClientId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Option<Participant> {
        let name = name.trim();
        if name.is_empty() {
            debug!("Ignoring registration with blank name from {id}");
            return None;
        }

        if let Some(existing) = self.participants.iter_mut().find(|p| p.id == id) {
            info!("{id} renamed from {:?} to {:?}", existing.name, name);
            existing.name = name.to_string();
            return Some(existing.clone());
        }

        let participant = Participant {
            id,
            name: name.to_string(),
            joined_at: now,
        };
        info!("{id} registered as {:?}", participant.name);
        self.participants.push(participant.clone());
        Some(participant)
    }

    /// Remove the participant registered from `id`. Returns whether anyone
    /// was removed. Results already recorded for that participant stay.
    pub fn remove_participant(&mut self, id: ClientId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        before != self.participants.len()
    }

    /// Record a buzzer press from `id`.
    ///
    /// Returns the new result, or `None` when the round is not active, the
    /// sender never registered, or the sender already pressed this round.
    pub fn press(&mut self, id: ClientId, now: DateTime<Utc>) -> Option<BuzzerResult> {
        if !self.is_active {
            debug!("Ignoring press from {id}: buzzer not active");
            return None;
        }

        let Some(participant) = self.participant(id) else {
            debug!("Ignoring press from unregistered {id}");
            return None;
        };
        let participant_name = participant.name.clone();

        let round = self.current_round;
        let mut pressed_this_round = 0u32;
        for r in self.results.iter().filter(|r| r.round == round) {
            if r.participant_id == id {
                debug!("Ignoring repeat press from {id} in round {round}");
                return None;
            }
            pressed_this_round += 1;
        }

        let result = BuzzerResult {
            round,
            participant_id: id,
            participant_name,
            position: pressed_this_round + 1,
            timestamp: now,
        };
        info!(
            "Round {round}: {:?} buzzed in at position {}",
            result.participant_name, result.position
        );
        self.results.push(result.clone());
        Some(result)
    }

    /// Open the buzzer for a round and return the round number.
    ///
    /// The very first start keeps round 1; every later start advances the
    /// round. Results at or beyond the (new) current round are discarded so
    /// the round always begins empty.
    pub fn start(&mut self) -> u32 {
        self.is_active = true;
        if self.has_started_before {
            self.current_round += 1;
        } else {
            self.has_started_before = true;
        }

        let round = self.current_round;
        self.results.retain(|r| r.round < round);
        info!("Buzzer started for round {round}");
        round
    }

    /// Close the buzzer. The round number and its results are kept.
    pub fn stop(&mut self) {
        self.is_active = false;
        info!("Buzzer stopped in round {}", self.current_round);
    }

    /// Return to the initial state, forgetting participants and results.
    pub fn reset(&mut self) {
        *self = BuzzerSession::new();
        info!("Buzzer session reset");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
