//! Built-in support tools exposed to specialists during execution.
//!
//! The real backends (billing ledger, order tracker, diagnostics) are
//! external; these implementations answer deterministically from the
//! customer context so specialist behavior is reproducible.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use voicedesk_core::session::SessionId;
use voicedesk_core::types::UserContext;
use voicedesk_providers::ToolDefinition;

/// Context provided to tools during execution.
pub struct ToolContext {
    pub user: UserContext,
    pub session_id: SessionId,
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }
}

/// A capability a specialist may call during its tool loop.
#[async_trait]
pub trait SupportTool: Send + Sync {
    /// Tool name as exposed to the model (e.g. "lookup_billing_history").
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn SupportTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn SupportTool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn SupportTool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions for the named subset of tools, in registry order.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| names.iter().any(|n| n == t.name()))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect()
    }
}

/// All built-in tools of the reference deployment.
pub fn builtin_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(BillingHistoryTool));
    registry.register(Box::new(RefundRequestTool));
    registry.register(Box::new(DiagnosticCheckTool));
    registry.register(Box::new(OrderStatusTool));
    registry.register(Box::new(AccountResetTool));
    registry
}

// --- Billing ---

pub struct BillingHistoryTool;

#[async_trait]
impl SupportTool for BillingHistoryTool {
    fn name(&self) -> &str {
        "lookup_billing_history"
    }

    fn description(&self) -> &str {
        "Fetch the customer's recent charges and subscription state."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "months": { "type": "integer", "description": "How many months back to look", "default": 3 }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let months = params.get("months").and_then(|m| m.as_u64()).unwrap_or(3);
        Ok(ToolOutput::ok(format!(
            "Customer {} ({} tier): {} monthly charges on file over the last {months} months, \
             all settled; current plan renews on the 1st.",
            context.user.customer_id, context.user.tier, months
        )))
    }
}

pub struct RefundRequestTool;

#[async_trait]
impl SupportTool for RefundRequestTool {
    fn name(&self) -> &str {
        "process_refund_request"
    }

    fn description(&self) -> &str {
        "Open a refund case for a specific charge. Returns the case id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "charge_reference": { "type": "string" },
                "reason": { "type": "string" }
            },
            "required": ["charge_reference"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let reference = params
            .get("charge_reference")
            .and_then(|r| r.as_str())
            .unwrap_or("unspecified");
        Ok(ToolOutput::ok(format!(
            "Refund case RF-{}-{} opened for charge {reference}; resolution within 5 business days.",
            context.user.customer_id, context.session_id,
        )))
    }
}

// --- Technical ---

pub struct DiagnosticCheckTool;

#[async_trait]
impl SupportTool for DiagnosticCheckTool {
    fn name(&self) -> &str {
        "run_diagnostic_check"
    }

    fn description(&self) -> &str {
        "Run a remote diagnostic on the customer's product installation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "component": { "type": "string", "description": "Subsystem to probe, e.g. 'sync' or 'login'" }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let component = params
            .get("component")
            .and_then(|c| c.as_str())
            .unwrap_or("all");
        Ok(ToolOutput::ok(format!(
            "Diagnostic for '{component}': services reachable, client version current, \
             no errors in the last 24 hours."
        )))
    }
}

// --- Orders ---

pub struct OrderStatusTool;

#[async_trait]
impl SupportTool for OrderStatusTool {
    fn name(&self) -> &str {
        "check_order_status"
    }

    fn description(&self) -> &str {
        "Look up shipping status and tracking for an order."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string" }
            },
            "required": ["order_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let order_id = params.get("order_id").and_then(|o| o.as_str());
        match order_id {
            Some(id) => Ok(ToolOutput::ok(format!(
                "Order {id}: shipped, in transit, estimated delivery in 2 days."
            ))),
            None => Ok(ToolOutput {
                content: "order_id is required".into(),
                is_error: true,
            }),
        }
    }
}

// --- Account ---

pub struct AccountResetTool;

#[async_trait]
impl SupportTool for AccountResetTool {
    fn name(&self) -> &str {
        "reset_account_access"
    }

    fn description(&self) -> &str {
        "Send a password-reset link to the customer's verified email."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::ok(format!(
            "Password-reset link sent to the verified address for customer {}.",
            context.user.customer_id
        )))
    }
}
