//! System prompt builders for the guardrails, the triage router, and the
//! specialists.

use voicedesk_core::types::UserContext;

use crate::{SpecialistDescriptor, SpecialistRegistry};

/// Instructions for the input-side guardrail classifier.
///
/// The classifier must return strict JSON matching `InputVerdict`.
pub fn input_guardrail_instructions() -> String {
    concat!(
        "You screen incoming customer-support requests. A request is in scope if it \
         concerns the customer's account, billing, orders, or technical support for \
         our product. Brief greetings and small talk are in scope. Anything else \
         (jokes, general knowledge, unrelated tasks) is off-topic.\n\n",
        "Reply with strict JSON only: \
         {\"is_off_topic\": <bool>, \"reason\": \"<one sentence>\"}"
    )
    .to_string()
}

/// Instructions for the output-side guardrail classifier.
pub fn output_guardrail_instructions() -> String {
    concat!(
        "You screen a draft support reply before it is read aloud to the customer. \
         Flag it if it strays off support topics, or if it discloses billing data \
         (card numbers, charge amounts tied to identifiers, invoice line items) or \
         account data (passwords, account numbers, security settings).\n\n",
        "Reply with strict JSON only: \
         {\"contains_off_topic\": <bool>, \"contains_billing_data\": <bool>, \
         \"contains_account_data\": <bool>, \"reason\": \"<one sentence>\"}"
    )
    .to_string()
}

/// Instructions for the triage router's classification call.
pub fn triage_instructions(
    user: &UserContext,
    triage: &SpecialistDescriptor,
    registry: &SpecialistRegistry,
) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "You are the triage desk of a customer-support line. You classify the \
         customer's issue and route it to exactly one specialist, or answer \
         directly.\n\nThe customer's name is {name}. Their email is {email}. \
         Their service tier is {tier}. Premium and enterprise customers should \
         hear their priority status mentioned when routed.",
        name = user.name,
        email = user.email,
        tier = user.tier,
    ));

    let mut targets = Vec::new();
    for target in &triage.handoffs {
        if let Some(descriptor) = registry.get(target) {
            targets.push(format!("- {}: {}", descriptor.name, descriptor.capabilities));
        }
    }
    parts.push(format!("Specialists you can route to:\n{}", targets.join("\n")));

    parts.push(
        "Rules:\n\
         1. Classify into exactly one issue category: technical, billing, order, account.\n\
         2. If the request plausibly fits more than one category, do NOT guess. Ask one \
            clarifying question instead (action \"respond\").\n\
         3. Greet and answer trivial pleasantries yourself (action \"respond\").\n\n\
         Reply with strict JSON only, one of:\n\
         {\"action\": \"respond\", \"response\": \"<what to say>\"}\n\
         {\"action\": \"handoff\", \"target\": \"<specialist name>\", \
          \"issue_type\": \"<category>\", \"issue_description\": \"<short summary>\", \
          \"reason\": \"<why this specialist>\"}"
            .to_string(),
    );

    parts.join("\n\n")
}

/// System prompt for a specialist's reply generation.
pub fn specialist_instructions(descriptor: &SpecialistDescriptor, user: &UserContext) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "You are the {name} desk of a customer-support line. Your scope: {scope}",
        name = descriptor.name,
        scope = descriptor.capabilities,
    ));

    parts.push(format!(
        "The customer's name is {name}; address them by it. Their service tier is {tier}.",
        name = user.name,
        tier = user.tier,
    ));

    parts.push(
        "Keep replies short and speakable: they are synthesized to audio. Use your \
         tools to look up facts instead of inventing them. Stay inside your scope."
            .to_string(),
    );

    parts.join("\n\n")
}
