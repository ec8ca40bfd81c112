//! Specialist registry, guardrail stage, triage router, and the turn
//! orchestrator state machine.
//!
//! A turn enters as recognized text, passes the input guardrail, is routed
//! to (or continues with) a specialist, runs the specialist's tool loop,
//! passes the output guardrail for sensitive specialists, and leaves as a
//! sequence of text chunks for the audio pipeline.

use serde::{Deserialize, Serialize};

use voicedesk_core::error::{Result, VoicedeskError};
use voicedesk_core::types::HandoffRecord;

pub mod guardrail;
pub mod orchestrator;
pub mod prompt;
pub mod router;
pub mod specialist;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::Orchestrator;

/// Name of the default routing specialist every session starts with.
pub const TRIAGE_NAME: &str = "Triage";

pub const TECHNICAL_NAME: &str = "Technical Support";
pub const BILLING_NAME: &str = "Billing Support";
pub const ORDER_NAME: &str = "Order Management";
pub const ACCOUNT_NAME: &str = "Account Management";

/// Static description of one response-generating unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistDescriptor {
    pub name: String,
    /// Capability summary; feeds the triage classification prompt.
    pub capabilities: String,
    /// Sensitive specialists get their output guardrail-checked.
    pub sensitive: bool,
    /// Names of tools from the tool registry this specialist may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Outbound handoff targets. Only the triage router carries any in the
    /// default deployment.
    #[serde(default)]
    pub handoffs: Vec<String>,
}

/// Immutable registry of specialists, validated once at startup.
pub struct SpecialistRegistry {
    default_name: String,
    specialists: Vec<SpecialistDescriptor>,
}

impl SpecialistRegistry {
    /// Build a registry, failing closed on any dangling handoff target or
    /// a missing default.
    pub fn new(
        default_name: impl Into<String>,
        specialists: Vec<SpecialistDescriptor>,
    ) -> Result<Self> {
        let default_name = default_name.into();
        if !specialists.iter().any(|s| s.name == default_name) {
            return Err(VoicedeskError::Config(format!(
                "default specialist '{default_name}' is not in the registry"
            )));
        }
        for descriptor in &specialists {
            for target in &descriptor.handoffs {
                if !specialists.iter().any(|s| &s.name == target) {
                    return Err(VoicedeskError::Config(format!(
                        "specialist '{}' hands off to unknown target '{target}'",
                        descriptor.name
                    )));
                }
            }
        }
        Ok(Self {
            default_name,
            specialists,
        })
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn get(&self, name: &str) -> Option<&SpecialistDescriptor> {
        self.specialists.iter().find(|s| s.name == name)
    }

    pub fn list(&self) -> &[SpecialistDescriptor] {
        &self.specialists
    }

    /// Verify every tool a descriptor names exists in the tool registry.
    pub fn validate_tools(&self, tools: &tools::ToolRegistry) -> Result<()> {
        for descriptor in &self.specialists {
            for tool in &descriptor.tools {
                if tools.get(tool).is_none() {
                    return Err(VoicedeskError::Config(format!(
                        "specialist '{}' references unknown tool '{tool}'",
                        descriptor.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The registry of the reference deployment: a triage router fanning out
/// to four issue-category specialists.
pub fn default_support_registry() -> Result<SpecialistRegistry> {
    SpecialistRegistry::new(
        TRIAGE_NAME,
        vec![
            SpecialistDescriptor {
                name: TRIAGE_NAME.into(),
                capabilities: "Classifies incoming support requests and routes them to the \
                               right specialist, asking one clarifying question when the \
                               category is unclear."
                    .into(),
                sensitive: false,
                tools: vec![],
                handoffs: vec![
                    TECHNICAL_NAME.into(),
                    BILLING_NAME.into(),
                    ORDER_NAME.into(),
                    ACCOUNT_NAME.into(),
                ],
            },
            SpecialistDescriptor {
                name: TECHNICAL_NAME.into(),
                capabilities: "Product errors, crashes, loading and performance problems, \
                               feature questions, integration and setup help."
                    .into(),
                sensitive: false,
                tools: vec!["run_diagnostic_check".into()],
                handoffs: vec![],
            },
            SpecialistDescriptor {
                name: BILLING_NAME.into(),
                capabilities: "Payment issues, failed charges, refunds, subscription and \
                               plan changes, invoices, payment method updates."
                    .into(),
                sensitive: true,
                tools: vec![
                    "lookup_billing_history".into(),
                    "process_refund_request".into(),
                ],
                handoffs: vec![],
            },
            SpecialistDescriptor {
                name: ORDER_NAME.into(),
                capabilities: "Order status, shipping and delivery questions, returns, \
                               exchanges, missing items, tracking numbers."
                    .into(),
                sensitive: false,
                tools: vec!["check_order_status".into()],
                handoffs: vec![],
            },
            SpecialistDescriptor {
                name: ACCOUNT_NAME.into(),
                capabilities: "Login problems, password resets, profile and email changes, \
                               account security and two-factor authentication."
                    .into(),
                sensitive: true,
                tools: vec!["reset_account_access".into()],
                handoffs: vec![],
            },
        ],
    )
}

/// Events emitted while a turn runs, for observers (UI, logs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    /// Streaming text delta from the active specialist.
    #[serde(rename = "partial_reply")]
    PartialReply { delta: String },

    /// A tool call is being made.
    #[serde(rename = "tool_call")]
    ToolCall {
        tool: String,
        params: serde_json::Value,
    },

    /// A tool call has completed.
    #[serde(rename = "tool_result")]
    ToolResult {
        tool: String,
        content: String,
        is_error: bool,
    },

    /// The session was handed to another specialist.
    #[serde(rename = "handoff")]
    Handoff { record: HandoffRecord },

    /// A guardrail tripwire ended the turn.
    #[serde(rename = "rejected")]
    Rejected { stage: String, reason: String },

    /// An external collaborator failed; the turn ends in Failed.
    #[serde(rename = "failure")]
    Failure { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_validates() {
        let registry = default_support_registry().unwrap();
        assert_eq!(registry.default_name(), TRIAGE_NAME);
        assert_eq!(registry.list().len(), 5);
        assert!(registry.get(BILLING_NAME).unwrap().sensitive);
        assert!(!registry.get(ORDER_NAME).unwrap().sensitive);
        assert_eq!(registry.get(TRIAGE_NAME).unwrap().handoffs.len(), 4);
    }

    #[test]
    fn dangling_handoff_target_fails_closed() {
        let result = SpecialistRegistry::new(
            "Triage",
            vec![SpecialistDescriptor {
                name: "Triage".into(),
                capabilities: "routing".into(),
                sensitive: false,
                tools: vec![],
                handoffs: vec!["Ghost Desk".into()],
            }],
        );
        let err = result.err().expect("dangling target must fail");
        assert!(matches!(err, VoicedeskError::Config(_)));
        assert!(err.to_string().contains("Ghost Desk"));
    }

    #[test]
    fn missing_default_fails_closed() {
        let result = SpecialistRegistry::new("Concierge", vec![]);
        assert!(matches!(result, Err(VoicedeskError::Config(_))));
    }

    #[test]
    fn unknown_tool_reference_fails_closed() {
        let registry = SpecialistRegistry::new(
            "Triage",
            vec![SpecialistDescriptor {
                name: "Triage".into(),
                capabilities: "routing".into(),
                sensitive: false,
                tools: vec!["warp_drive".into()],
                handoffs: vec![],
            }],
        )
        .unwrap();
        let tools = tools::ToolRegistry::new();
        assert!(matches!(
            registry.validate_tools(&tools),
            Err(VoicedeskError::Config(_))
        ));
    }
}
