use serde::{Deserialize, Serialize};

/// Service tier of a customer account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    #[default]
    Basic,
    Premium,
    Enterprise,
}

impl std::fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceTier::Basic => write!(f, "basic"),
            ServiceTier::Premium => write!(f, "premium"),
            ServiceTier::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Read-only customer identity passed by reference through every stage of
/// a turn. Owned by the calling application; the orchestrator never
/// mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub customer_id: u64,
    pub name: String,
    #[serde(default)]
    pub tier: ServiceTier,
    pub email: String,
}

/// Fixed issue category enumeration used by the triage router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Technical,
    Billing,
    Order,
    Account,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Technical => "technical",
            IssueCategory::Billing => "billing",
            IssueCategory::Order => "order",
            IssueCategory::Account => "account",
        }
    }
}

impl std::str::FromStr for IssueCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "technical" => Ok(IssueCategory::Technical),
            "billing" => Ok(IssueCategory::Billing),
            "order" => Ok(IssueCategory::Order),
            "account" => Ok(IssueCategory::Account),
            other => Err(format!("unknown issue category: {other}")),
        }
    }
}

/// Input-side guardrail verdict: is the request in scope for support?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputVerdict {
    pub is_off_topic: bool,
    pub reason: String,
}

impl InputVerdict {
    pub fn tripwire(&self) -> bool {
        self.is_off_topic
    }
}

/// Output-side guardrail verdict: does the reply leak sensitive data?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputVerdict {
    pub contains_off_topic: bool,
    pub contains_billing_data: bool,
    pub contains_account_data: bool,
    pub reason: String,
}

impl OutputVerdict {
    pub fn tripwire(&self) -> bool {
        self.contains_off_topic || self.contains_billing_data || self.contains_account_data
    }
}

/// Audit record of a specialist transfer, produced by the triage router
/// and consumed by the orchestrator. At most one per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub target: String,
    pub issue_type: IssueCategory,
    pub issue_description: String,
    pub reason: String,
}
