//! Turn orchestrator — drives one recognized utterance through guardrails,
//! routing, specialist execution, output validation, and chunked streaming.
//!
//! A turn has exactly one terminal: `Done`, `Rejected`, or `Failed`.
//! External-collaborator failures come back as an `Ok` report with a
//! `Failed` outcome so already-committed session state stays committed;
//! only local problems (store IO, broken configuration) surface as `Err`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voicedesk_core::config::Config;
use voicedesk_core::error::{Result, VoicedeskError};
use voicedesk_core::session::{SessionId, SessionStore, Turn, TurnAnnotations, TurnRole};
use voicedesk_core::types::{HandoffRecord, UserContext};
use voicedesk_providers::{messages, CompletionClient};

use crate::guardrail::GuardrailStage;
use crate::router::{RoutingDecision, TriageRouter};
use crate::specialist::SpecialistRuntime;
use crate::tools::{self, ToolContext, ToolRegistry};
use crate::{SpecialistRegistry, TurnEvent};

/// Spoken when the input guardrail trips.
pub const REFUSAL_MESSAGE: &str = "I can't help you with that.";

/// Spoken in place of a reply the output guardrail withheld.
pub const REDACTION_MESSAGE: &str = "I can't share that information here.";

/// Generic notice carried by a failed turn's report.
pub const FAILURE_NOTICE: &str =
    "Sorry, something went wrong on our side. Please try again in a moment.";

/// Phases a turn passes through, in order, for the report's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    InputValidating,
    Routing,
    Executing,
    OutputValidating,
    Streaming,
    Done,
    Rejected,
    Failed,
}

/// Terminal outcome of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Done,
    Rejected,
    Failed { error: String },
}

/// What the caller gets back from [`Orchestrator::run_turn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// The spoken reply: specialist text, or a fixed refusal/redaction/
    /// failure message.
    pub reply_text: String,
    pub handoff: Option<HandoffRecord>,
    pub phase_trace: Vec<TurnPhase>,
}

pub struct Orchestrator {
    registry: Arc<SpecialistRegistry>,
    store: Arc<dyn SessionStore>,
    guardrail: GuardrailStage,
    router: TriageRouter,
    runtime: SpecialistRuntime,
    tools: ToolRegistry,
    in_flight: Mutex<HashSet<SessionId>>,
}

/// Removes the session id from the in-flight set when the turn ends,
/// whichever way it ends.
struct TurnGuard<'a> {
    orchestrator: &'a Orchestrator,
    id: SessionId,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.lock_in_flight().remove(&self.id);
    }
}

impl Orchestrator {
    /// Build an orchestrator over the given registry, store, and completion
    /// client. Fails closed on a registry that references unknown tools.
    pub fn new(
        registry: SpecialistRegistry,
        store: Arc<dyn SessionStore>,
        client: Arc<dyn CompletionClient>,
        config: &Config,
    ) -> Result<Self> {
        let tools = tools::builtin_tools();
        registry.validate_tools(&tools)?;

        let guardrail = GuardrailStage::new(
            client.clone(),
            config.guardrail_model(),
            config.max_tokens(),
        );
        let router = TriageRouter::new(client.clone(), config.router_model(), config.max_tokens());
        let runtime = SpecialistRuntime::new(
            client,
            config.specialist_model(),
            config.max_tokens(),
            config.max_tool_iterations(),
            config.max_reply_chars(),
        );

        Ok(Self {
            registry: Arc::new(registry),
            store,
            guardrail,
            router,
            runtime,
            tools,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<SessionId>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn begin_turn(&self, id: &SessionId) -> Result<TurnGuard<'_>> {
        let mut in_flight = self.lock_in_flight();
        if !in_flight.insert(id.clone()) {
            return Err(VoicedeskError::SessionBusy(id.to_string()));
        }
        Ok(TurnGuard {
            orchestrator: self,
            id: id.clone(),
        })
    }

    /// Run one turn for a session. Text chunks of the validated reply are
    /// sent through `chunk_tx`, which is dropped on completion so the
    /// downstream pipeline sees end-of-stream.
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        recognized_text: &str,
        user: &UserContext,
        chunk_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<TurnReport> {
        let _guard = self.begin_turn(session_id)?;

        // Turn events are consumed by observers where one is attached; the
        // orchestrator itself only needs them for the specialist runtime.
        let (event_tx, _event_rx) = mpsc::unbounded_channel::<TurnEvent>();

        let mut trace = vec![TurnPhase::Idle];

        let session = self
            .store
            .load_or_create(session_id, self.registry.default_name())
            .await?;

        if cancel.is_cancelled() {
            return Ok(failed(trace, None, "turn cancelled"));
        }

        // --- Input validation ---
        trace.push(TurnPhase::InputValidating);
        let input_verdict = match self.guardrail.check_input(recognized_text, user).await {
            Ok(verdict) => verdict,
            Err(e) => return Ok(failed(trace, None, e)),
        };

        if input_verdict.tripwire() {
            info!(session = %session_id, reason = %input_verdict.reason, "Input rejected");
            let note = Turn::new(
                TurnRole::SystemNote,
                format!("Input rejected: {}", input_verdict.reason),
            )
            .with_annotations(TurnAnnotations {
                input_verdict: Some(input_verdict.clone()),
                ..Default::default()
            });
            self.store.append_turn(session_id, &note).await?;
            let _ = event_tx.send(TurnEvent::Rejected {
                stage: "input".into(),
                reason: input_verdict.reason,
            });

            trace.push(TurnPhase::Rejected);
            if !cancel.is_cancelled() {
                let _ = chunk_tx.send(REFUSAL_MESSAGE.to_string()).await;
            }
            return Ok(TurnReport {
                outcome: TurnOutcome::Rejected,
                reply_text: REFUSAL_MESSAGE.into(),
                handoff: None,
                phase_trace: trace,
            });
        }

        let user_turn =
            Turn::new(TurnRole::User, recognized_text).with_annotations(TurnAnnotations {
                input_verdict: Some(input_verdict),
                ..Default::default()
            });
        self.store.append_turn(session_id, &user_turn).await?;

        // History for the backends is the log as it stood before this turn.
        let history = session_messages(&session.turns);

        // --- Routing ---
        trace.push(TurnPhase::Routing);
        let mut active = session.meta.active_specialist.clone();
        let mut handoff: Option<HandoffRecord> = None;
        let mut direct_reply: Option<String> = None;

        if active == self.registry.default_name() {
            let triage = self.lookup(&active)?;
            match self
                .router
                .classify(recognized_text, user, triage, &self.registry, history.clone())
                .await
            {
                Ok(RoutingDecision::Respond(text)) => direct_reply = Some(text),
                Ok(RoutingDecision::Handoff(record)) => {
                    info!(session = %session_id, target = %record.target, "Session handed off");
                    self.store
                        .set_active_specialist(session_id, &record.target)
                        .await?;
                    let note = Turn::new(
                        TurnRole::SystemNote,
                        format!("Transferred to {}", record.target),
                    )
                    .with_annotations(TurnAnnotations {
                        handoff: Some(record.clone()),
                        ..Default::default()
                    });
                    self.store.append_turn(session_id, &note).await?;
                    let _ = event_tx.send(TurnEvent::Handoff {
                        record: record.clone(),
                    });
                    active = record.target.clone();
                    handoff = Some(record);
                }
                Err(e) => return Ok(failed(trace, None, e)),
            }
        } else {
            debug!(session = %session_id, specialist = %active, "Continuing with active specialist");
        }

        let descriptor = self.lookup(&active)?;

        // --- Execution ---
        trace.push(TurnPhase::Executing);
        let reply = match direct_reply {
            Some(text) => text,
            None => {
                let context = ToolContext {
                    user: user.clone(),
                    session_id: session_id.clone(),
                };
                match self
                    .runtime
                    .run(
                        descriptor,
                        user,
                        &self.tools,
                        &context,
                        history,
                        recognized_text,
                        &event_tx,
                    )
                    .await
                {
                    Ok(text) => text,
                    Err(e) => return Ok(failed(trace, handoff, e)),
                }
            }
        };

        // --- Output validation (sensitive specialists only) ---
        trace.push(TurnPhase::OutputValidating);
        let mut output_verdict = None;
        if descriptor.sensitive {
            match self.guardrail.check_output(&reply, user).await {
                Ok(verdict) if verdict.tripwire() => {
                    info!(session = %session_id, reason = %verdict.reason, "Output withheld");
                    let note = Turn::new(
                        TurnRole::SystemNote,
                        format!("Output withheld: {}", verdict.reason),
                    )
                    .with_annotations(TurnAnnotations {
                        specialist: Some(descriptor.name.clone()),
                        output_verdict: Some(verdict.clone()),
                        ..Default::default()
                    });
                    self.store.append_turn(session_id, &note).await?;
                    let _ = event_tx.send(TurnEvent::Rejected {
                        stage: "output".into(),
                        reason: verdict.reason,
                    });

                    trace.push(TurnPhase::Rejected);
                    if !cancel.is_cancelled() {
                        let _ = chunk_tx.send(REDACTION_MESSAGE.to_string()).await;
                    }
                    return Ok(TurnReport {
                        outcome: TurnOutcome::Rejected,
                        reply_text: REDACTION_MESSAGE.into(),
                        handoff,
                        phase_trace: trace,
                    });
                }
                Ok(verdict) => output_verdict = Some(verdict),
                Err(e) => return Ok(failed(trace, handoff, e)),
            }
        }

        if cancel.is_cancelled() {
            return Ok(failed(trace, handoff, "turn cancelled before streaming"));
        }

        let specialist_turn = Turn::new(TurnRole::Specialist, &reply).with_annotations(
            TurnAnnotations {
                specialist: Some(descriptor.name.clone()),
                output_verdict,
                ..Default::default()
            },
        );
        self.store.append_turn(session_id, &specialist_turn).await?;

        // --- Streaming ---
        trace.push(TurnPhase::Streaming);
        for chunk in chunk_text(&reply) {
            if cancel.is_cancelled() {
                debug!(session = %session_id, "Cancelled during streaming; closing the chunk channel");
                break;
            }
            if chunk_tx.send(chunk).await.is_err() {
                return Ok(failed(
                    trace,
                    handoff,
                    VoicedeskError::Synthesis("chunk receiver closed mid-turn".into()),
                ));
            }
        }
        drop(chunk_tx);

        trace.push(TurnPhase::Done);
        Ok(TurnReport {
            outcome: TurnOutcome::Done,
            reply_text: reply,
            handoff,
            phase_trace: trace,
        })
    }

    fn lookup(&self, name: &str) -> Result<&crate::SpecialistDescriptor> {
        self.registry.get(name).ok_or_else(|| {
            VoicedeskError::Config(format!("active specialist '{name}' is not registered"))
        })
    }
}

fn failed(
    mut trace: Vec<TurnPhase>,
    handoff: Option<HandoffRecord>,
    error: impl std::fmt::Display,
) -> TurnReport {
    warn!(%error, "Turn failed");
    trace.push(TurnPhase::Failed);
    TurnReport {
        outcome: TurnOutcome::Failed {
            error: error.to_string(),
        },
        reply_text: FAILURE_NOTICE.into(),
        handoff,
        phase_trace: trace,
    }
}

/// Convert the committed turn log into backend wire messages. System notes
/// are bookkeeping; only spoken turns go to the model.
fn session_messages(turns: &[Turn]) -> Vec<serde_json::Value> {
    turns
        .iter()
        .filter_map(|turn| match turn.role {
            TurnRole::User => Some(messages::user(&turn.text)),
            TurnRole::Specialist => Some(messages::assistant(&turn.text)),
            TurnRole::SystemNote => None,
        })
        .collect()
}

/// Split a reply into sentence-sized chunks for incremental synthesis.
fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
