//! Guardrail stage — policy checks on user input and specialist output.
//!
//! Each check is a single structured completion parsed into a verdict.
//! A tripwire is a value, not an error; only a backend failure raises
//! `GuardrailUnavailable`, which the orchestrator treats as a failed turn
//! (fail closed — text never passes through unchecked).

use std::sync::Arc;

use tracing::{debug, warn};

use voicedesk_core::error::{Result, VoicedeskError};
use voicedesk_core::types::{InputVerdict, OutputVerdict, UserContext};
use voicedesk_providers::{messages, CompletionClient, CompletionRequest};

use crate::prompt;

pub struct GuardrailStage {
    client: Arc<dyn CompletionClient>,
    model: String,
    max_tokens: u32,
}

impl GuardrailStage {
    pub fn new(client: Arc<dyn CompletionClient>, model: String, max_tokens: u32) -> Self {
        Self {
            client,
            model,
            max_tokens,
        }
    }

    async fn classify(&self, system: String, text: &str) -> Result<String> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![messages::user(text)],
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
            tools: None,
            system: Some(system),
            json_mode: true,
        };

        let completion = self
            .client
            .complete(&request)
            .await
            .map_err(|e| VoicedeskError::GuardrailUnavailable(e.to_string()))?;
        Ok(completion.text)
    }

    /// Topic-scope check on recognized user text.
    pub async fn check_input(&self, text: &str, _user: &UserContext) -> Result<InputVerdict> {
        let raw = self
            .classify(prompt::input_guardrail_instructions(), text)
            .await?;

        let verdict: InputVerdict = serde_json::from_str(raw.trim()).map_err(|e| {
            warn!(%e, raw, "Input guardrail returned a malformed verdict");
            VoicedeskError::GuardrailUnavailable(format!("malformed input verdict: {e}"))
        })?;

        debug!(tripwire = verdict.tripwire(), reason = %verdict.reason, "Input guardrail verdict");
        Ok(verdict)
    }

    /// Sensitive-category leakage check on a draft specialist reply.
    pub async fn check_output(&self, text: &str, _user: &UserContext) -> Result<OutputVerdict> {
        let raw = self
            .classify(prompt::output_guardrail_instructions(), text)
            .await?;

        let verdict: OutputVerdict = serde_json::from_str(raw.trim()).map_err(|e| {
            warn!(%e, raw, "Output guardrail returned a malformed verdict");
            VoicedeskError::GuardrailUnavailable(format!("malformed output verdict: {e}"))
        })?;

        debug!(tripwire = verdict.tripwire(), reason = %verdict.reason, "Output guardrail verdict");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use serde_json::json;
    use voicedesk_core::types::ServiceTier;

    fn test_user() -> UserContext {
        UserContext {
            customer_id: 1,
            name: "Sam".into(),
            tier: ServiceTier::Basic,
            email: "sam@example.com".into(),
        }
    }

    #[tokio::test]
    async fn clean_input_verdict_parses() {
        let client = ScriptedClient::completing(vec![
            json!({"is_off_topic": false, "reason": "billing question"}).to_string(),
        ]);
        let stage = GuardrailStage::new(Arc::new(client), "test-model".into(), 256);

        let verdict = stage
            .check_input("What's your refund policy?", &test_user())
            .await
            .unwrap();
        assert!(!verdict.tripwire());
    }

    #[tokio::test]
    async fn tripwire_is_a_verdict_not_an_error() {
        let client = ScriptedClient::completing(vec![
            json!({"is_off_topic": true, "reason": "joke request"}).to_string(),
        ]);
        let stage = GuardrailStage::new(Arc::new(client), "test-model".into(), 256);

        let verdict = stage.check_input("Tell me a joke", &test_user()).await.unwrap();
        assert!(verdict.tripwire());
        assert!(!verdict.reason.is_empty());
    }

    #[tokio::test]
    async fn backend_error_is_guardrail_unavailable() {
        let client = ScriptedClient::failing("connection refused");
        let stage = GuardrailStage::new(Arc::new(client), "test-model".into(), 256);

        let err = stage.check_input("anything", &test_user()).await.unwrap_err();
        assert!(matches!(err, VoicedeskError::GuardrailUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_verdict_is_guardrail_unavailable() {
        let client = ScriptedClient::completing(vec!["not json at all".into()]);
        let stage = GuardrailStage::new(Arc::new(client), "test-model".into(), 256);

        let err = stage.check_input("anything", &test_user()).await.unwrap_err();
        assert!(matches!(err, VoicedeskError::GuardrailUnavailable(_)));
    }

    #[tokio::test]
    async fn output_verdict_flags_billing_data() {
        let client = ScriptedClient::completing(vec![json!({
            "contains_off_topic": false,
            "contains_billing_data": true,
            "contains_account_data": false,
            "reason": "reply quotes charge identifiers"
        })
        .to_string()]);
        let stage = GuardrailStage::new(Arc::new(client), "test-model".into(), 256);

        let verdict = stage
            .check_output("Your card 4242... was charged", &test_user())
            .await
            .unwrap();
        assert!(verdict.tripwire());
        assert!(verdict.contains_billing_data);
    }
}
