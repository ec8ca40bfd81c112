//! Session model — ordered turn log plus the active-specialist pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{HandoffRecord, InputVerdict, OutputVerdict};

/// Conversation identifier. Also used as the turn-log file stem.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Specialist,
    SystemNote,
}

/// Structured annotations attached to a turn at append time.
/// Verdicts and handoff records live only here once the turn is committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_verdict: Option<InputVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_verdict: Option<OutputVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffRecord>,
}

impl TurnAnnotations {
    pub fn is_empty(&self) -> bool {
        self.specialist.is_none()
            && self.input_verdict.is_none()
            && self.output_verdict.is_none()
            && self.handoff.is_none()
    }
}

/// One entry in the session's append-only turn log. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: uuid::Uuid,
    pub role: TurnRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "TurnAnnotations::is_empty")]
    pub annotations: TurnAnnotations,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            text: text.into(),
            annotations: TurnAnnotations::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_annotations(mut self, annotations: TurnAnnotations) -> Self {
        self.annotations = annotations;
        self
    }
}

/// Persistent per-session metadata kept in the store index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: SessionId,
    /// Name of the specialist that handles the next turn. Starts as the
    /// triage router and follows successful handoffs.
    pub active_specialist: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(id: SessionId, default_specialist: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            active_specialist: default_specialist.into(),
            created_at: now,
            last_updated_at: now,
        }
    }
}

/// In-memory view of a session: metadata plus the ordered turn log.
#[derive(Debug, Clone)]
pub struct Session {
    pub meta: SessionMeta,
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: SessionId, default_specialist: impl Into<String>) -> Self {
        Self {
            meta: SessionMeta::new(id, default_specialist),
            turns: Vec::new(),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.meta.last_updated_at = Utc::now();
    }
}

/// Durable session persistence, keyed by session id.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, or create it with the given default specialist if it
    /// does not exist yet.
    async fn load_or_create(
        &self,
        id: &SessionId,
        default_specialist: &str,
    ) -> Result<Session>;

    /// Append a turn to the session's log.
    async fn append_turn(&self, id: &SessionId, turn: &Turn) -> Result<()>;

    /// The ordered turn log for a session. Empty if the session is unknown.
    async fn list_turns(&self, id: &SessionId) -> Result<Vec<Turn>>;

    /// Persist a new active specialist after a handoff.
    async fn set_active_specialist(&self, id: &SessionId, specialist: &str) -> Result<()>;

    /// Destroy all turns and reset the active specialist to the default.
    async fn clear(&self, id: &SessionId, default_specialist: &str) -> Result<()>;

    /// All known sessions.
    async fn list_sessions(&self) -> Result<Vec<SessionMeta>>;
}
