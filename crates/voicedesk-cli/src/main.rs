use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicedesk_agents::orchestrator::TurnOutcome;
use voicedesk_agents::{default_support_registry, Orchestrator, TRIAGE_NAME};
use voicedesk_core::config::Config;
use voicedesk_core::session::{SessionId, SessionStore, TurnRole};
use voicedesk_core::session_store::JsonlSessionStore;
use voicedesk_core::types::{ServiceTier, UserContext};
use voicedesk_media::pipeline::{run_pipeline, PipelineOptions, WavFileSink};
use voicedesk_media::stt::Transcriber;
use voicedesk_media::synthesis::HttpSynthesizer;
use voicedesk_providers::openai::OpenAiClient;

#[derive(Parser)]
#[command(
    name = "voicedesk",
    about = "Voice customer-support orchestration — guardrailed routing, specialists, and spoken replies",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one support turn and synthesize the reply to a WAV file
    Turn {
        /// Session id (created on first use)
        #[arg(long)]
        session: String,

        /// The user's utterance as text
        #[arg(long, conflicts_with = "audio")]
        text: Option<String>,

        /// A WAV recording of the user's utterance (transcribed first)
        #[arg(long)]
        audio: Option<String>,

        /// Where to write the synthesized reply (default: reply.wav)
        #[arg(long)]
        out: Option<String>,

        /// Skip synthesis; print the reply text only
        #[arg(long)]
        no_audio: bool,

        #[arg(long, default_value_t = 0)]
        customer_id: u64,

        #[arg(long, default_value = "Customer")]
        name: String,

        /// Service tier: basic, premium, or enterprise
        #[arg(long, default_value = "basic")]
        tier: String,

        #[arg(long, default_value = "")]
        email: String,
    },

    /// Clear a session's turn log and reset it to the triage router
    Reset {
        #[arg(long)]
        session: String,
    },

    /// Print a session's metadata and turn log
    Inspect {
        #[arg(long)]
        session: String,
    },
}

fn parse_tier(raw: &str) -> anyhow::Result<ServiceTier> {
    match raw {
        "basic" => Ok(ServiceTier::Basic),
        "premium" => Ok(ServiceTier::Premium),
        "enterprise" => Ok(ServiceTier::Enterprise),
        other => anyhow::bail!("unknown service tier: {other} (expected basic|premium|enterprise)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    let store = Arc::new(JsonlSessionStore::new(config.session_dir()));

    match cli.command {
        Commands::Turn {
            session,
            text,
            audio,
            out,
            no_audio,
            customer_id,
            name,
            tier,
            email,
        } => {
            let user = UserContext {
                customer_id,
                name,
                tier: parse_tier(&tier)?,
                email,
            };

            let api_key = config
                .provider
                .as_ref()
                .and_then(|p| p.resolve_api_key())
                .ok_or_else(|| anyhow::anyhow!("no API key configured (provider.api_key or provider.api_key_env)"))?;
            let base_url = config.provider.as_ref().and_then(|p| p.base_url.clone());
            let client = Arc::new(OpenAiClient::new(api_key.clone(), base_url.as_deref()));

            let recognized_text = match (text, audio) {
                (Some(text), _) => text,
                (None, Some(path)) => {
                    let transcription_base = config
                        .transcription
                        .as_ref()
                        .and_then(|t| t.base_url.clone())
                        .or_else(|| base_url.clone())
                        .unwrap_or_else(|| "https://api.openai.com".to_string());
                    let model = config
                        .transcription
                        .as_ref()
                        .and_then(|t| t.model.clone())
                        .unwrap_or_else(|| "whisper-1".to_string());
                    let transcriber =
                        Transcriber::new(transcription_base, Some(api_key.clone()), model);
                    let text = transcriber
                        .transcribe_wav_file(std::path::Path::new(&path))
                        .await?;
                    tracing::info!(text = %text, "Transcribed utterance");
                    text
                }
                (None, None) => anyhow::bail!("either --text or --audio is required"),
            };

            let orchestrator = Orchestrator::new(
                default_support_registry()?,
                store.clone(),
                client,
                &config,
            )?;

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupt received, cancelling the turn");
                        cancel.cancel();
                    }
                });
            }

            let (chunk_tx, chunk_rx) = mpsc::channel::<String>(64);

            let pipeline = if no_audio {
                // Drain the chunks without synthesizing.
                let mut chunk_rx = chunk_rx;
                tokio::spawn(async move {
                    while chunk_rx.recv().await.is_some() {}
                    Ok::<Option<(String, voicedesk_media::pipeline::PipelineStats)>, voicedesk_core::error::VoicedeskError>(None)
                })
            } else {
                let out_path = out.unwrap_or_else(|| "reply.wav".to_string());
                let synthesis_base = config
                    .synthesis
                    .as_ref()
                    .and_then(|s| s.base_url.clone())
                    .or_else(|| base_url.clone())
                    .unwrap_or_else(|| "https://api.openai.com".to_string());
                let model = config
                    .synthesis
                    .as_ref()
                    .and_then(|s| s.model.clone())
                    .unwrap_or_else(|| "gpt-4o-mini-tts".to_string());
                let synthesizer = Arc::new(HttpSynthesizer::new(
                    synthesis_base,
                    Some(api_key),
                    model,
                    config.voice(),
                    config.sample_rate(),
                    config.frame_samples(),
                ));
                let options = PipelineOptions {
                    buffer_frames: config.buffer_frames(),
                };
                let sample_rate = config.sample_rate();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut sink = WavFileSink::new(&out_path, sample_rate);
                    let stats =
                        run_pipeline(chunk_rx, synthesizer, &mut sink, options, cancel).await?;
                    Ok::<_, voicedesk_core::error::VoicedeskError>(Some((out_path, stats)))
                })
            };

            let report = orchestrator
                .run_turn(
                    &SessionId::new(&session),
                    &recognized_text,
                    &user,
                    chunk_tx,
                    cancel,
                )
                .await?;
            let pipeline_result = pipeline.await??;

            match &report.outcome {
                TurnOutcome::Done => println!("{}", report.reply_text),
                TurnOutcome::Rejected => println!("{}", report.reply_text),
                TurnOutcome::Failed { error } => {
                    eprintln!("{}", report.reply_text);
                    tracing::error!(%error, "Turn failed");
                }
            }
            if let Some(record) = &report.handoff {
                println!("[transferred to {} — {}]", record.target, record.issue_type.as_str());
            }
            if let Some((path, stats)) = pipeline_result {
                println!(
                    "[audio: {path}, {} frames, {} samples]",
                    stats.frames_played, stats.samples_played
                );
            }
        }

        Commands::Reset { session } => {
            store.clear(&SessionId::new(&session), TRIAGE_NAME).await?;
            println!("Session {session} reset to {TRIAGE_NAME}");
        }

        Commands::Inspect { session } => {
            let id = SessionId::new(&session);
            let metas = store.list_sessions().await?;
            let Some(meta) = metas.into_iter().find(|m| m.id == id) else {
                anyhow::bail!("unknown session: {session}");
            };
            println!("Session:    {}", meta.id);
            println!("Specialist: {}", meta.active_specialist);
            println!("Created:    {}", meta.created_at.to_rfc3339());
            println!("Updated:    {}", meta.last_updated_at.to_rfc3339());

            for turn in store.list_turns(&id).await? {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Specialist => "specialist",
                    TurnRole::SystemNote => "note",
                };
                let who = turn
                    .annotations
                    .specialist
                    .as_deref()
                    .map(|s| format!(" ({s})"))
                    .unwrap_or_default();
                println!("[{}] {role}{who}: {}", turn.timestamp.to_rfc3339(), turn.text);
                if let Some(record) = &turn.annotations.handoff {
                    println!(
                        "    handoff -> {} [{}] {}",
                        record.target,
                        record.issue_type.as_str(),
                        record.issue_description
                    );
                }
            }
        }
    }

    Ok(())
}
