use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoicedeskError {
    /// Invalid or inconsistent configuration, including a handoff target or
    /// tool named in a descriptor that does not exist in the registry.
    /// Raised at startup validation, never during a turn.
    #[error("Config error: {0}")]
    Config(String),

    /// The guardrail classification backend failed. The turn fails closed;
    /// text is never passed through unchecked.
    #[error("Guardrail unavailable: {0}")]
    GuardrailUnavailable(String),

    /// The triage classification backend failed or produced a reply the
    /// router cannot act on.
    #[error("Classification unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("Specialist execution error: {0}")]
    SpecialistExecution(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    /// A turn is already running for this session id.
    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoicedeskError>;
