//! Folding transcription and content deltas into conversation turns.
//!
//! User speech-to-text, agent speech-to-text and agent content converge into
//! one ordered [`Transcript`]. Turns are only ever appended or mutated in
//! place; a delta extends the open tail turn of its role, or the most recent
//! turn of its role when only system turns were recorded after it, and
//! otherwise starts a new turn.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

use crate::client::NORMAL_CLOSE;
use crate::events::{FunctionResponse, GroundingReference, SessionEvent, SessionListener, ToolCallRequest};

/// Who a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person in the cabin.
    User,
    /// The remote agent.
    Agent,
    /// Diagnostics and tool activity.
    System,
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    /// When the turn was started.
    pub timestamp: DateTime<Utc>,
    /// Owner of the turn.
    pub role: Role,
    /// Accumulated text.
    pub text: String,
    /// Whether the turn is settled.
    pub is_final: bool,
    /// Tool call this turn records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_request: Option<ToolCallRequest>,
    /// Tool result this turn records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_response: Option<FunctionResponse>,
    /// Sources cited in this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_references: Option<Vec<GroundingReference>>,
    /// Host-defined payload for rendering tool output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_render_payload: Option<Value>,
}

impl ConversationTurn {
    /// A bare turn.
    pub fn new(role: Role, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            text: text.into(),
            is_final,
            tool_use_request: None,
            tool_use_response: None,
            grounding_references: None,
            tool_render_payload: None,
        }
    }

    /// A final system turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text, true)
    }
}

/// Shared, observable list of turns.
///
/// Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct Transcript {
    turns: Arc<Mutex<Vec<ConversationTurn>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// An empty transcript.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { turns: Arc::new(Mutex::new(Vec::new())), revision: Arc::new(tx) }
    }

    /// Apply a delta for `role`, returning the index of the turn it landed in.
    ///
    /// An agent delta that opens a new turn also settles the user's open turn,
    /// since the user has stopped speaking by the time the agent answers.
    ///
    /// Returns `None` when the delta carried nothing and had no turn to
    /// finalize.
    pub fn apply_delta(
        &self,
        role: Role,
        text: &str,
        is_final: bool,
        grounding: &[GroundingReference],
    ) -> Option<usize> {
        let index = {
            let mut turns = self.turns.lock();
            match merge_target(&turns, role) {
                Some(index) => {
                    let turn = &mut turns[index];
                    turn.text.push_str(text);
                    turn.is_final = is_final;
                    if !grounding.is_empty() {
                        turn.grounding_references.get_or_insert_with(Vec::new).extend_from_slice(grounding);
                    }
                    index
                }
                None => {
                    if text.is_empty() && grounding.is_empty() {
                        return None;
                    }
                    if role == Role::Agent {
                        settle_open_user_turn(&mut turns);
                    }
                    let mut turn = ConversationTurn::new(role, text, is_final);
                    if !grounding.is_empty() {
                        turn.grounding_references = Some(grounding.to_vec());
                    }
                    turns.push(turn);
                    turns.len() - 1
                }
            }
        };
        self.bump();
        Some(index)
    }

    /// Settle the open conversational turn, if any, without touching its text.
    ///
    /// The candidate is the last user or agent turn; it is only eligible when
    /// nothing but system turns follow it.
    pub fn finalize(&self) -> Option<usize> {
        let index = {
            let mut turns = self.turns.lock();
            let index = turns.iter().rposition(|t| t.role != Role::System)?;
            if turns[index].is_final {
                return None;
            }
            turns[index].is_final = true;
            index
        };
        self.bump();
        Some(index)
    }

    /// Append a turn.
    pub fn push(&self, turn: ConversationTurn) -> usize {
        let index = {
            let mut turns = self.turns.lock();
            turns.push(turn);
            turns.len() - 1
        };
        self.bump();
        index
    }

    /// Append a final system turn.
    pub fn push_system(&self, text: impl Into<String>) -> usize {
        self.push(ConversationTurn::system(text))
    }

    /// Copy of all turns.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.lock().clone()
    }

    /// Copy of one turn.
    pub fn get(&self, index: usize) -> Option<ConversationTurn> {
        self.turns.lock().get(index).cloned()
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    /// Whether there are no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    /// Remove every turn.
    pub fn reset(&self) {
        self.turns.lock().clear();
        self.bump();
    }

    /// Revision counter that ticks on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript").field("turns", &self.len()).finish()
    }
}

fn settle_open_user_turn(turns: &mut [ConversationTurn]) {
    if let Some(user) = turns.iter_mut().rev().find(|t| t.role == Role::User) {
        user.is_final = true;
    }
}

fn merge_target(turns: &[ConversationTurn], role: Role) -> Option<usize> {
    let last = turns.last()?;
    if last.role == role && !last.is_final {
        return Some(turns.len() - 1);
    }
    let index = turns.iter().rposition(|t| t.role == role)?;
    let after = &turns[index + 1..];
    (!after.is_empty() && after.iter().all(|t| t.role == Role::System)).then_some(index)
}

/// Listener that feeds session events into a [`Transcript`].
#[derive(Debug, Clone)]
pub struct TranscriptAssembler {
    transcript: Transcript,
}

impl TranscriptAssembler {
    /// Assemble into `transcript`.
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }

    /// The transcript being assembled.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

impl SessionListener for TranscriptAssembler {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::InputTranscription { text, is_final } => {
                self.transcript.apply_delta(Role::User, text, *is_final, &[]);
            }
            SessionEvent::OutputTranscription { text, is_final } => {
                self.transcript.apply_delta(Role::Agent, text, *is_final, &[]);
            }
            SessionEvent::Content(content) => {
                self.transcript.apply_delta(Role::Agent, &content.text(), false, &content.grounding);
            }
            SessionEvent::TurnComplete
            | SessionEvent::GenerationComplete
            | SessionEvent::Interrupted => {
                self.transcript.finalize();
            }
            SessionEvent::Error(message) => {
                self.transcript.push_system(format!("Error: {message}"));
            }
            SessionEvent::Close { code, reason } if *code != NORMAL_CLOSE => {
                self.transcript.finalize();
                let text = if reason.is_empty() {
                    format!("Connection closed (code {code})")
                } else {
                    format!("Connection closed (code {code}): {reason}")
                };
                self.transcript.push_system(text);
            }
            _ => {}
        }
    }
}
