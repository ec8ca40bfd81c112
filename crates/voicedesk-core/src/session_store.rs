//! JSONL-based session store — append-only turn logs, one file per session.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, VoicedeskError};
use crate::session::{Session, SessionId, SessionMeta, SessionStore, Turn};

/// File-based session store.
///
/// Layout:
/// - `<base>/sessions.json` — array of `SessionMeta`
/// - `<base>/turns/<id>.jsonl` — one turn per line, append-only
pub struct JsonlSessionStore {
    base: PathBuf,
}

impl JsonlSessionStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// Default store location: `~/.local/share/voicedesk/sessions/`.
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("sessions")
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("sessions.json")
    }

    fn turns_dir(&self) -> PathBuf {
        self.base.join("turns")
    }

    fn turns_path(&self, id: &SessionId) -> PathBuf {
        self.turns_dir().join(format!("{}.jsonl", id.as_str()))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::create_dir_all(self.turns_dir()).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<SessionMeta>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let metas: Vec<SessionMeta> = serde_json::from_str(&data)?;
        Ok(metas)
    }

    async fn save_index(&self, metas: &[SessionMeta]) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(metas)?;
        let path = self.index_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_turns(&self, id: &SessionId) -> Result<Vec<Turn>> {
        let path = self.turns_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut turns = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let turn: Turn = serde_json::from_str(line)
                .map_err(|e| VoicedeskError::Session(format!("corrupt turn line: {e}")))?;
            turns.push(turn);
        }
        Ok(turns)
    }

    async fn touch_index(&self, id: &SessionId) -> Result<()> {
        let mut metas = self.load_index().await?;
        if let Some(meta) = metas.iter_mut().find(|m| &m.id == id) {
            meta.last_updated_at = chrono::Utc::now();
            self.save_index(&metas).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonlSessionStore {
    async fn load_or_create(
        &self,
        id: &SessionId,
        default_specialist: &str,
    ) -> Result<Session> {
        let mut metas = self.load_index().await?;
        if let Some(meta) = metas.iter().find(|m| &m.id == id) {
            let turns = self.load_turns(id).await?;
            debug!(session = %id, turns = turns.len(), "Loaded session");
            return Ok(Session {
                meta: meta.clone(),
                turns,
            });
        }

        let meta = SessionMeta::new(id.clone(), default_specialist);
        metas.push(meta.clone());
        self.save_index(&metas).await?;
        debug!(session = %id, "Created session");
        Ok(Session {
            meta,
            turns: Vec::new(),
        })
    }

    async fn append_turn(&self, id: &SessionId, turn: &Turn) -> Result<()> {
        self.ensure_dirs().await?;

        let path = self.turns_path(id);
        let line = serde_json::to_string(turn)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        self.touch_index(id).await
    }

    async fn list_turns(&self, id: &SessionId) -> Result<Vec<Turn>> {
        self.load_turns(id).await
    }

    async fn set_active_specialist(&self, id: &SessionId, specialist: &str) -> Result<()> {
        let mut metas = self.load_index().await?;
        let meta = metas
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| VoicedeskError::Session(format!("unknown session: {id}")))?;
        meta.active_specialist = specialist.to_string();
        meta.last_updated_at = chrono::Utc::now();
        self.save_index(&metas).await?;
        debug!(session = %id, specialist, "Active specialist updated");
        Ok(())
    }

    async fn clear(&self, id: &SessionId, default_specialist: &str) -> Result<()> {
        let path = self.turns_path(id);
        if path.exists() {
            tokio::fs::write(&path, b"").await?;
        }

        let mut metas = self.load_index().await?;
        if let Some(meta) = metas.iter_mut().find(|m| &m.id == id) {
            meta.active_specialist = default_specialist.to_string();
            meta.last_updated_at = chrono::Utc::now();
            self.save_index(&metas).await?;
        }

        debug!(session = %id, "Cleared session");
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        self.load_index().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TurnRole;

    const TRIAGE: &str = "Triage";

    fn test_id() -> SessionId {
        SessionId::new("conv-1")
    }

    #[tokio::test]
    async fn create_append_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path().to_path_buf());

        store.load_or_create(&test_id(), TRIAGE).await.unwrap();
        let first = Turn::new(TurnRole::User, "What's your refund policy?");
        let second = Turn::new(TurnRole::Specialist, "Refunds take 5 days.");
        store.append_turn(&test_id(), &first).await.unwrap();
        store.append_turn(&test_id(), &second).await.unwrap();

        let turns = store.list_turns(&test_id()).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].text, "What's your refund policy?");
        assert_eq!(turns[1].text, "Refunds take 5 days.");
        assert_eq!(turns[0].id, first.id);
    }

    #[tokio::test]
    async fn active_specialist_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path().to_path_buf());

        let session = store.load_or_create(&test_id(), TRIAGE).await.unwrap();
        assert_eq!(session.meta.active_specialist, TRIAGE);

        store
            .set_active_specialist(&test_id(), "Billing Support")
            .await
            .unwrap();
        let session = store.load_or_create(&test_id(), TRIAGE).await.unwrap();
        assert_eq!(session.meta.active_specialist, "Billing Support");
    }

    #[tokio::test]
    async fn clear_empties_log_and_resets_specialist() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path().to_path_buf());

        store.load_or_create(&test_id(), TRIAGE).await.unwrap();
        store
            .append_turn(&test_id(), &Turn::new(TurnRole::User, "hello"))
            .await
            .unwrap();
        store
            .set_active_specialist(&test_id(), "Order Management")
            .await
            .unwrap();

        store.clear(&test_id(), TRIAGE).await.unwrap();

        let turns = store.list_turns(&test_id()).await.unwrap();
        assert!(turns.is_empty());
        let session = store.load_or_create(&test_id(), TRIAGE).await.unwrap();
        assert_eq!(session.meta.active_specialist, TRIAGE);
    }

    #[tokio::test]
    async fn set_specialist_on_unknown_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path().to_path_buf());
        let err = store
            .set_active_specialist(&SessionId::new("nope"), "Billing Support")
            .await
            .unwrap_err();
        assert!(matches!(err, VoicedeskError::Session(_)));
    }

    #[tokio::test]
    async fn annotations_survive_round_trip() {
        use crate::types::{HandoffRecord, IssueCategory};

        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path().to_path_buf());
        store.load_or_create(&test_id(), TRIAGE).await.unwrap();

        let turn = Turn::new(TurnRole::SystemNote, "handoff to Billing Support")
            .with_annotations(crate::session::TurnAnnotations {
                handoff: Some(HandoffRecord {
                    target: "Billing Support".into(),
                    issue_type: IssueCategory::Billing,
                    issue_description: "refund question".into(),
                    reason: "billing desk owns refunds".into(),
                }),
                ..Default::default()
            });
        store.append_turn(&test_id(), &turn).await.unwrap();

        let turns = store.list_turns(&test_id()).await.unwrap();
        let handoff = turns[0].annotations.handoff.as_ref().unwrap();
        assert_eq!(handoff.target, "Billing Support");
        assert_eq!(handoff.issue_type, IssueCategory::Billing);
    }
}
