use crate::screencapture::ScreenCapture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnContent {
    /// Text fragments from the model's text modality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Speech-to-text fragments, space-joined in arrival order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    pub turn_complete: bool,
    pub interrupted: bool,
}

/// One contiguous utterance by a single speaker, bounded by a turn-complete
/// signal, an interruption, or the other speaker starting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: TurnContent,
    pub metadata: TurnMetadata,
}

/// The open-turn slot. A tagged variant rather than a nullable pointer so
/// the "at most one open turn" invariant is structural.
#[derive(Debug, Clone, Default)]
pub enum TurnState {
    Open(ConversationTurn),
    #[default]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    pub total_turns: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub user_speaking_time_ms: u64,
    pub ai_speaking_time_ms: u64,
    pub average_response_time_ms: f64,
    pub interruption_count: usize,
}

/// The conversation aggregate. Exclusively owned by the orchestrator while
/// live; becomes an immutable return value once the session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub model: String,
    pub turns: Vec<ConversationTurn>,
    pub screen_captures: Vec<ScreenCapture>,
    pub analytics: SessionAnalytics,
    #[serde(skip)]
    turn_state: TurnState,
}

impl ConversationSession {
    pub fn new(session_id: String, model: String) -> Self {
        Self {
            session_id,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            model,
            turns: Vec::new(),
            screen_captures: Vec::new(),
            analytics: SessionAnalytics::default(),
            turn_state: TurnState::Closed,
        }
    }

    /// Route a transcript fragment into the turn machine: same speaker and
    /// still open appends (space-joined); anything else closes the open
    /// turn and starts a new one.
    pub fn append_transcript(&mut self, role: Role, text: &str, timestamp: DateTime<Utc>) {
        self.append_fragment(role, text, timestamp, false);
    }

    /// Same machine as `append_transcript`, filling `content.text` instead
    /// (non-audio text fragments).
    pub fn append_text(&mut self, role: Role, text: &str, timestamp: DateTime<Utc>) {
        self.append_fragment(role, text, timestamp, true);
    }

    fn append_fragment(
        &mut self,
        role: Role,
        text: &str,
        timestamp: DateTime<Utc>,
        is_text: bool,
    ) {
        match std::mem::take(&mut self.turn_state) {
            TurnState::Open(mut turn) if turn.role == role => {
                let field = if is_text {
                    &mut turn.content.text
                } else {
                    &mut turn.content.transcript
                };
                match field {
                    Some(existing) => {
                        existing.push(' ');
                        existing.push_str(text);
                    }
                    None => *field = Some(text.to_string()),
                }
                self.turn_state = TurnState::Open(turn);
            }
            TurnState::Open(turn) => {
                // Speaker changed; the open turn is final as-is
                self.turns.push(turn);
                self.open_turn(role, text, timestamp, is_text);
            }
            TurnState::Closed => {
                self.open_turn(role, text, timestamp, is_text);
            }
        }
    }

    fn open_turn(&mut self, role: Role, text: &str, timestamp: DateTime<Utc>, is_text: bool) {
        let mut content = TurnContent::default();
        if is_text {
            content.text = Some(text.to_string());
        } else {
            content.transcript = Some(text.to_string());
        }

        self.turn_state = TurnState::Open(ConversationTurn {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            role,
            content,
            metadata: TurnMetadata::default(),
        });

        // Turn/role counters advance as turns are created; the rest of the
        // analytics wait for finalize()
        self.analytics.total_turns += 1;
        match role {
            Role::User => self.analytics.user_turns += 1,
            Role::Assistant => self.analytics.assistant_turns += 1,
        }
    }

    /// Close the open turn as cleanly completed.
    pub fn complete_turn(&mut self) {
        if let TurnState::Open(mut turn) = std::mem::take(&mut self.turn_state) {
            turn.metadata.turn_complete = true;
            self.turns.push(turn);
        }
    }

    /// Close the open turn as voided by barge-in.
    pub fn interrupt_turn(&mut self) {
        if let TurnState::Open(mut turn) = std::mem::take(&mut self.turn_state) {
            turn.metadata.interrupted = true;
            self.turns.push(turn);
        }
    }

    pub fn add_screen_capture(&mut self, capture: ScreenCapture) {
        self.screen_captures.push(capture);
    }

    pub fn has_open_turn(&self) -> bool {
        matches!(self.turn_state, TurnState::Open(_))
    }

    pub fn open_turn_role(&self) -> Option<Role> {
        match &self.turn_state {
            TurnState::Open(turn) => Some(turn.role),
            TurnState::Closed => None,
        }
    }

    /// Close out the session: flush the open turn, stamp the end time, and
    /// compute the derived analytics from the turns sequence.
    pub fn finalize(&mut self, end_time: DateTime<Utc>) {
        if let TurnState::Open(turn) = std::mem::take(&mut self.turn_state) {
            self.turns.push(turn);
        }

        self.end_time = Some(end_time);
        self.duration_ms = Some(duration_ms(self.start_time, end_time));
        self.compute_analytics(end_time);
    }

    fn compute_analytics(&mut self, end_time: DateTime<Utc>) {
        // Speaking time: each turn runs until the next turn starts, the
        // last one until the session ends
        for (i, turn) in self.turns.iter().enumerate() {
            let turn_end = self
                .turns
                .get(i + 1)
                .map(|next| next.timestamp)
                .unwrap_or(end_time);
            let spoken = duration_ms(turn.timestamp, turn_end);

            match turn.role {
                Role::User => self.analytics.user_speaking_time_ms += spoken,
                Role::Assistant => self.analytics.ai_speaking_time_ms += spoken,
            }
        }

        // Response time: each user turn pairs with the next assistant turn
        let mut response_times_ms: Vec<u64> = Vec::new();
        let mut pending_user: Option<DateTime<Utc>> = None;
        for turn in &self.turns {
            match turn.role {
                Role::User => pending_user = Some(turn.timestamp),
                Role::Assistant => {
                    if let Some(user_ts) = pending_user.take() {
                        response_times_ms.push(duration_ms(user_ts, turn.timestamp));
                    }
                }
            }
        }

        self.analytics.average_response_time_ms = if response_times_ms.is_empty() {
            0.0
        } else {
            response_times_ms.iter().sum::<u64>() as f64 / response_times_ms.len() as f64
        };

        self.analytics.interruption_count = self
            .turns
            .iter()
            .filter(|t| t.metadata.interrupted)
            .count();
    }
}

fn duration_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    to.signed_duration_since(from).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn consecutive_fragments_same_role_join_one_turn() {
        let mut session = ConversationSession::new("s".into(), "m".into());
        let t0 = Utc::now();

        session.append_transcript(Role::User, "tell me", t0);
        session.append_transcript(Role::User, "about yourself", t0 + Duration::seconds(1));
        session.complete_turn();

        assert_eq!(session.turns.len(), 1);
        assert_eq!(
            session.turns[0].content.transcript.as_deref(),
            Some("tell me about yourself")
        );
        assert!(session.turns[0].metadata.turn_complete);
        assert_eq!(session.turns[0].timestamp, t0);
    }

    #[test]
    fn role_change_closes_open_turn() {
        let mut session = ConversationSession::new("s".into(), "m".into());
        let t0 = Utc::now();

        session.append_transcript(Role::User, "hello", t0);
        session.append_transcript(Role::Assistant, "hi there", t0 + Duration::seconds(1));

        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].role, Role::User);
        assert!(!session.turns[0].metadata.turn_complete);
        assert_eq!(session.open_turn_role(), Some(Role::Assistant));
    }

    #[test]
    fn average_response_time_pairs_user_and_assistant() {
        let mut session = ConversationSession::new("s".into(), "m".into());
        let t0 = Utc::now();

        session.append_transcript(Role::User, "q1", t0);
        session.append_transcript(Role::Assistant, "a1", t0 + Duration::seconds(2));
        session.append_transcript(Role::User, "q2", t0 + Duration::seconds(5));
        session.append_transcript(Role::Assistant, "a2", t0 + Duration::seconds(6));
        session.finalize(t0 + Duration::seconds(10));

        assert_eq!(session.analytics.average_response_time_ms, 1500.0);
        assert_eq!(session.analytics.total_turns, 4);
        assert_eq!(session.analytics.user_turns, 2);
        assert_eq!(session.analytics.assistant_turns, 2);
    }

    #[test]
    fn interrupted_turns_are_counted() {
        let mut session = ConversationSession::new("s".into(), "m".into());
        let t0 = Utc::now();

        session.append_transcript(Role::Assistant, "as I was saying", t0);
        session.interrupt_turn();
        session.finalize(t0 + Duration::seconds(1));

        assert_eq!(session.analytics.interruption_count, 1);
        assert!(session.turns[0].metadata.interrupted);
    }

    #[test]
    fn finalize_flushes_open_turn_and_stamps_duration() {
        let mut session = ConversationSession::new("s".into(), "m".into());
        let t0 = session.start_time;

        session.append_transcript(Role::User, "unclosed", t0 + Duration::seconds(1));
        session.finalize(t0 + Duration::seconds(4));

        assert!(!session.has_open_turn());
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.duration_ms, Some(4000));
    }
}
