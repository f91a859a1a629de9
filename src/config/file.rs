//! TOML configuration file loading
//!
//! Supports `~/.config/roomey/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RoomeyConfigFile {
    /// Realtime model provider
    #[serde(default)]
    pub provider: ProviderFileConfig,

    /// Microphone and speaker settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Integration toggles
    #[serde(default)]
    pub integrations: IntegrationsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Home Assistant connection
    #[serde(default)]
    pub home_assistant: HomeAssistantFileConfig,

    /// Google Calendar settings
    #[serde(default)]
    pub calendar: CalendarFileConfig,

    /// Social-post generator settings
    #[serde(default)]
    pub post_generator: PostGeneratorFileConfig,

    /// MCP server launching
    #[serde(default)]
    pub mcp: McpFileConfig,

    /// Session timing and push-to-talk
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Conversation transcript
    #[serde(default)]
    pub logging: LoggingFileConfig,
}

/// Provider configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProviderFileConfig {
    /// Model identifier (e.g. "models/gemini-2.0-flash-live-001")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,

    /// Personalised system prompt prefix
    pub system_prompt: Option<String>,

    /// Advertise the provider's built-in web search tool
    pub google_search: Option<bool>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AudioFileConfig {
    /// Enable microphone and speaker
    pub enabled: Option<bool>,

    /// Microphone sample rate sent to the provider
    pub send_sample_rate: Option<u32>,

    /// Sample rate of provider audio
    pub receive_sample_rate: Option<u32>,

    /// Samples per captured frame
    pub chunk_size: Option<usize>,
}

/// Integration toggles
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IntegrationsFileConfig {
    pub calendar: Option<bool>,
    pub home_assistant: Option<bool>,
    pub post_generator: Option<bool>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openrouter: Option<String>,
    pub secret_key: Option<String>,
}

/// Home Assistant connection
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HomeAssistantFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

/// Google Calendar settings
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CalendarFileConfig {
    /// Authorized-user token file (client id/secret + refresh token)
    pub token_path: Option<String>,

    /// Calendar to read (defaults to "primary")
    pub calendar_id: Option<String>,
}

/// Post generator settings
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PostGeneratorFileConfig {
    pub model: Option<String>,
    pub posts_dir: Option<String>,
}

/// MCP launching
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct McpFileConfig {
    pub enabled: Option<bool>,
    pub config_path: Option<String>,
    pub handshake_timeout_secs: Option<u64>,
}

/// Session settings
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SessionFileConfig {
    pub tool_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub toggle_key: Option<char>,
}

/// Transcript settings
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingFileConfig {
    pub log_conversation: Option<bool>,
    pub log_dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RoomeyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RoomeyConfigFile {
    config_file_path().map_or_else(RoomeyConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Same fallback rules as [`load_config_file`].
pub fn load_config_from(path: &Path) -> RoomeyConfigFile {
    if !path.exists() {
        return RoomeyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RoomeyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RoomeyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/roomey/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Return the config directory: `~/.config/roomey`
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("roomey"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let toml = r#"
            [provider]
            voice = "Puck"

            [integrations]
            home_assistant = true

            [home_assistant]
            url = "http://homeassistant.local:8123"

            [session]
            toggle_key = "r"
        "#;

        let file: RoomeyConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.provider.voice.as_deref(), Some("Puck"));
        assert_eq!(file.integrations.home_assistant, Some(true));
        assert!(file.integrations.calendar.is_none());
        assert_eq!(file.session.toggle_key, Some('r'));
        assert!(file.mcp.config_path.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config_from(&dir.path().join("absent.toml"));
        assert!(file.provider.model.is_none());
    }

    #[test]
    fn unparsable_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[provider\nvoice = ").unwrap();

        let file = load_config_from(&path);
        assert!(file.provider.voice.is_none());
    }
}
