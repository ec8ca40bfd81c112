//! Configuration loading and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Voicedesk configuration, loaded once at startup from a JSON5
/// file and treated as immutable for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<StageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<StageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialist: Option<StageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Connection settings for the completion/classification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: explicit value first, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Per-stage model override (router, guardrail, specialist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_samples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_frames: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reply_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Resolve a secret: direct value wins over the environment variable.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

impl Config {
    /// Load config from a JSON5 file. A missing file yields defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoicedeskError::Io)?;
        let config: Config = json5::from_str(&raw)
            .map_err(|e| crate::error::VoicedeskError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Default config file location: `~/.voicedesk/config.json5`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json5")
    }

    pub fn default_model(&self) -> String {
        self.provider
            .as_ref()
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    pub fn router_model(&self) -> String {
        self.router
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or_else(|| self.default_model())
    }

    pub fn guardrail_model(&self) -> String {
        self.guardrail
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or_else(|| self.default_model())
    }

    pub fn specialist_model(&self) -> String {
        self.specialist
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or_else(|| self.default_model())
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.limits
            .as_ref()
            .and_then(|l| l.max_tool_iterations)
            .unwrap_or(5)
    }

    pub fn max_reply_chars(&self) -> usize {
        self.limits
            .as_ref()
            .and_then(|l| l.max_reply_chars)
            .unwrap_or(4_000)
    }

    pub fn max_tokens(&self) -> u32 {
        self.limits.as_ref().and_then(|l| l.max_tokens).unwrap_or(1_024)
    }

    pub fn sample_rate(&self) -> u32 {
        self.synthesis
            .as_ref()
            .and_then(|s| s.sample_rate)
            .unwrap_or(24_000)
    }

    pub fn frame_samples(&self) -> usize {
        self.synthesis
            .as_ref()
            .and_then(|s| s.frame_samples)
            .unwrap_or(4_800)
    }

    pub fn buffer_frames(&self) -> usize {
        self.synthesis
            .as_ref()
            .and_then(|s| s.buffer_frames)
            .unwrap_or(32)
    }

    pub fn voice(&self) -> String {
        self.synthesis
            .as_ref()
            .and_then(|s| s.voice.clone())
            .unwrap_or_else(|| "alloy".to_string())
    }

    pub fn session_dir(&self) -> PathBuf {
        self.session
            .as_ref()
            .and_then(|s| s.dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("sessions"))
    }
}

/// Base directory for Voicedesk data: `~/.voicedesk/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voicedesk")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_model(), "gpt-4o-mini");
        assert_eq!(config.sample_rate(), 24_000);
        assert_eq!(config.frame_samples(), 4_800);
        assert_eq!(config.buffer_frames(), 32);
        assert_eq!(config.max_tool_iterations(), 5);
    }

    #[test]
    fn test_stage_model_fallback() {
        let config: Config = json5::from_str(
            r#"{
                provider: { model: "gpt-4o" },
                guardrail: { model: "gpt-4o-mini" },
            }"#,
        )
        .unwrap();
        assert_eq!(config.guardrail_model(), "gpt-4o-mini");
        // router falls back to the provider default
        assert_eq!(config.router_model(), "gpt-4o");
    }

    #[test]
    fn test_resolve_api_key_priority() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_VD_API_KEY", "from-env") };
        let provider = ProviderConfig {
            base_url: None,
            api_key: None,
            api_key_env: Some("TEST_VD_API_KEY".into()),
            model: None,
        };
        assert_eq!(provider.resolve_api_key(), Some("from-env".into()));

        let direct = ProviderConfig {
            api_key: Some("direct-key".into()),
            ..provider
        };
        assert_eq!(direct.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_VD_API_KEY") };
    }

    #[test]
    fn test_json5_comments_allowed() {
        let config: Config = json5::from_str(
            r#"{
                // reference deployment runs at 24kHz
                synthesis: { sample_rate: 24000, voice: "coral" },
            }"#,
        )
        .unwrap();
        assert_eq!(config.voice(), "coral");
    }
}
