//! Console configuration: TOML file, then environment, then flags.

use anyhow::{Context, Result};
use cabin_live::{ClientSettings, ReconnectPolicy, SessionConfig};
use cabin_telemetry::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::ConsoleArgs;

const API_KEY_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// API key. Prefer the environment; a key here is used only as a fallback.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Endpoint URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub log_format: LogFormat,

    pub session: SessionConfig,

    pub client: ClientSettings,
}

impl CliConfig {
    /// Load `path`, or the default config file if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply command-line flags on top of the file values.
    pub fn apply(&mut self, args: &ConsoleArgs) {
        if let Some(model) = &args.model {
            self.session.model = model.clone();
        }
        if let Some(voice) = &args.voice {
            self.session.voice = Some(voice.clone());
        }
        if let Some(instruction) = &args.instruction {
            self.session.instruction = Some(instruction.clone());
        }
        if args.text_only {
            self.session = std::mem::take(&mut self.session).with_text_only();
        }
        if args.reconnect && self.client.reconnect.is_none() {
            self.client.reconnect = Some(ReconnectPolicy::default());
        }
    }

    /// The API key from `GOOGLE_API_KEY`, `GEMINI_API_KEY`, or the file.
    pub fn api_key(&self) -> Result<String> {
        resolve_api_key(self.api_key.as_deref(), |name| std::env::var(name).ok())
    }

    /// The configuration as TOML, without the key.
    pub fn render(&self) -> Result<String> {
        let key_state = match self.api_key() {
            Ok(_) => "set",
            Err(_) => "missing",
        };
        Ok(format!("# api key: {key_state}\n{}", toml::to_string_pretty(self)?))
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cabin").join("config.toml"))
}

fn resolve_api_key(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| env(name))
        .chain(file.map(str::to_string))
        .find(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("GOOGLE_API_KEY or GEMINI_API_KEY environment variable not set"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let config = CliConfig::parse(
            r#"
            log_format = "json"

            [session]
            model = "models/gemini-2.0-flash-live-001"
            voice = "Kore"

            [client]
            playback_lead_ms = 150

            [client.reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.session.model, "models/gemini-2.0-flash-live-001");
        assert_eq!(config.session.voice.as_deref(), Some("Kore"));
        assert!(config.session.input_transcription);
        assert_eq!(config.client.playback_lead_ms, 150);
        assert_eq!(config.client.input_chunk_ms, 100);
        assert_eq!(config.client.reconnect.as_ref().unwrap().max_attempts, 3);
        assert_eq!(config.client.reconnect.as_ref().unwrap().initial_delay_ms, 500);
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = CliConfig::parse("[session]\nvoice = \"Kore\"\n").unwrap();
        config.apply(&ConsoleArgs {
            voice: Some("Puck".into()),
            instruction: Some("Be brief.".into()),
            text_only: true,
            reconnect: true,
            ..Default::default()
        });

        assert_eq!(config.session.voice.as_deref(), Some("Puck"));
        assert_eq!(config.session.instruction.as_deref(), Some("Be brief."));
        assert_eq!(config.session.response_modalities, vec!["TEXT".to_string()]);
        assert!(config.client.reconnect.is_some());
    }

    #[test]
    fn test_api_key_precedence() {
        let env = |name: &str| match name {
            "GEMINI_API_KEY" => Some("from-gemini".to_string()),
            _ => None,
        };
        assert_eq!(resolve_api_key(Some("from-file"), env).unwrap(), "from-gemini");
        assert_eq!(resolve_api_key(Some("from-file"), |_| None).unwrap(), "from-file");
        assert!(resolve_api_key(Some("  "), |_| Some(String::new())).is_err());
    }

    #[test]
    fn test_render_hides_key() {
        let config = CliConfig { api_key: Some("secret-value".into()), ..Default::default() };
        let rendered = config.render().unwrap();
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("[session]"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(CliConfig::load(Some(Path::new("/nonexistent/cabin.toml"))).is_err());
    }
}
