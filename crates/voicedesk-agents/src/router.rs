//! Triage router — classifies a turn and selects a specialist.
//!
//! The classification backend must pick exactly one category or ask one
//! clarifying question (a direct response with no handoff). The router
//! enforces what it can: at most one handoff per turn, and only to targets
//! the triage descriptor actually lists.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use voicedesk_core::error::{Result, VoicedeskError};
use voicedesk_core::types::{HandoffRecord, IssueCategory, UserContext};
use voicedesk_providers::{messages, CompletionClient, CompletionRequest};

use crate::{prompt, SpecialistDescriptor, SpecialistRegistry};

/// Outcome of a classification call.
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    /// Answer directly: a greeting, or the one allowed clarifying question.
    Respond(String),
    /// Transfer the session to the named specialist.
    Handoff(HandoffRecord),
}

#[derive(Debug, Deserialize)]
struct RoutingReply {
    action: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    issue_description: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct TriageRouter {
    client: Arc<dyn CompletionClient>,
    model: String,
    max_tokens: u32,
}

impl TriageRouter {
    pub fn new(client: Arc<dyn CompletionClient>, model: String, max_tokens: u32) -> Self {
        Self {
            client,
            model,
            max_tokens,
        }
    }

    /// Classify the turn's text in the context of the conversation so far.
    pub async fn classify(
        &self,
        text: &str,
        user: &UserContext,
        triage: &SpecialistDescriptor,
        registry: &SpecialistRegistry,
        history: Vec<serde_json::Value>,
    ) -> Result<RoutingDecision> {
        let mut msgs = history;
        msgs.push(messages::user(text));

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: msgs,
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
            tools: None,
            system: Some(prompt::triage_instructions(user, triage, registry)),
            json_mode: true,
        };

        let completion = self
            .client
            .complete(&request)
            .await
            .map_err(|e| VoicedeskError::ClassificationUnavailable(e.to_string()))?;

        let reply: RoutingReply = serde_json::from_str(completion.text.trim()).map_err(|e| {
            warn!(%e, raw = %completion.text, "Router returned a malformed reply");
            VoicedeskError::ClassificationUnavailable(format!("malformed routing reply: {e}"))
        })?;

        match reply.action.as_str() {
            "respond" => {
                let response = reply.response.filter(|r| !r.is_empty()).ok_or_else(|| {
                    VoicedeskError::ClassificationUnavailable(
                        "respond action carried no response text".into(),
                    )
                })?;
                debug!("Router answered directly");
                Ok(RoutingDecision::Respond(response))
            }
            "handoff" => {
                let target = reply.target.unwrap_or_default();
                if !triage.handoffs.iter().any(|t| t == &target) {
                    return Err(VoicedeskError::ClassificationUnavailable(format!(
                        "router selected a target outside the handoff list: '{target}'"
                    )));
                }

                let issue_type: IssueCategory = reply
                    .issue_type
                    .as_deref()
                    .unwrap_or_default()
                    .parse()
                    .map_err(VoicedeskError::ClassificationUnavailable)?;

                let record = HandoffRecord {
                    target: target.clone(),
                    issue_type,
                    issue_description: reply.issue_description.unwrap_or_default(),
                    reason: reply.reason.unwrap_or_default(),
                };
                debug!(target = %record.target, category = record.issue_type.as_str(), "Router selected a handoff");
                Ok(RoutingDecision::Handoff(record))
            }
            other => Err(VoicedeskError::ClassificationUnavailable(format!(
                "unknown routing action: '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use crate::{default_support_registry, BILLING_NAME, TRIAGE_NAME};
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

    async fn classify_with(reply: serde_json::Value, text: &str) -> Result<RoutingDecision> {
        let registry = default_support_registry().unwrap();
        let triage = registry.get(TRIAGE_NAME).unwrap();
        let client = ScriptedClient::completing(vec![reply.to_string()]);
        let router = TriageRouter::new(Arc::new(client), "test-model".into(), 256);
        router
            .classify(text, &test_user(), triage, &registry, vec![])
            .await
    }

    #[tokio::test]
    async fn refund_question_routes_to_billing() {
        let decision = classify_with(
            json!({
                "action": "handoff",
                "target": BILLING_NAME,
                "issue_type": "billing",
                "issue_description": "refund policy question",
                "reason": "refunds belong to the billing desk",
            }),
            "What's your refund policy?",
        )
        .await
        .unwrap();

        match decision {
            RoutingDecision::Handoff(record) => {
                assert_eq!(record.target, BILLING_NAME);
                assert_eq!(record.issue_type, IssueCategory::Billing);
            }
            other => panic!("expected handoff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clarifying_question_is_a_direct_response() {
        let decision = classify_with(
            json!({
                "action": "respond",
                "response": "Is this about a charge on your card or about an order?",
            }),
            "There is a problem with my payment for the order",
        )
        .await
        .unwrap();

        assert!(matches!(decision, RoutingDecision::Respond(_)));
    }

    #[tokio::test]
    async fn target_outside_handoff_list_is_rejected() {
        let err = classify_with(
            json!({
                "action": "handoff",
                "target": "Ghost Desk",
                "issue_type": "billing",
            }),
            "refund please",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VoicedeskError::ClassificationUnavailable(_)));
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let err = classify_with(
            json!({
                "action": "handoff",
                "target": BILLING_NAME,
                "issue_type": "astrology",
            }),
            "refund please",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VoicedeskError::ClassificationUnavailable(_)));
    }

    #[tokio::test]
    async fn backend_failure_is_classification_unavailable() {
        let registry = default_support_registry().unwrap();
        let triage = registry.get(TRIAGE_NAME).unwrap();
        let client = Arc::new(ScriptedClient::failing("timeout"));
        let router = TriageRouter::new(client.clone(), "test-model".into(), 256);

        let err = router
            .classify("hello", &test_user(), triage, &registry, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, VoicedeskError::ClassificationUnavailable(_)));
        assert_eq!(client.remaining(), 0);
    }
}
