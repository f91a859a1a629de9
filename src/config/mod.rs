//! Configuration management for Roomey
//!
//! A [`Config`] is built once at startup (env > TOML file > defaults) and
//! handed to component constructors. Nothing reads process-wide settings
//! after that point.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use file::RoomeyConfigFile;

/// Default realtime model
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-preview-native-audio-dialog";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Default system prompt prefix
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Default post generation model (via `OpenRouter`)
pub const DEFAULT_POST_MODEL: &str = "google/gemini-2.5-flash-preview";

/// Roomey configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Realtime provider settings
    pub provider: ProviderConfig,

    /// Audio devices
    pub audio: AudioConfig,

    /// Enabled integrations
    pub integrations: IntegrationsConfig,

    /// MCP server launching
    pub mcp: McpConfig,

    /// Session timing and push-to-talk
    pub session: SessionConfig,

    /// Conversation transcript
    pub logging: LoggingConfig,

    /// Data directory (reminders, saved posts)
    pub data_dir: PathBuf,
}

/// Realtime provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Gemini API key
    pub api_key: Option<String>,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// System prompt prefix; tool descriptions are appended at connect time
    pub system_prompt: String,

    /// Advertise the provider's built-in web search
    pub google_search: bool,
}

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Open microphone and speaker
    pub enabled: bool,

    /// Microphone sample rate sent to the provider (Hz)
    pub send_sample_rate: u32,

    /// Provider audio sample rate (Hz)
    pub receive_sample_rate: u32,

    /// Samples per captured frame
    pub chunk_size: usize,

    /// Audio chunks buffered between provider reader and playback writer
    pub playback_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            send_sample_rate: 16_000,
            receive_sample_rate: 24_000,
            chunk_size: 1024,
            playback_queue: 64,
        }
    }
}

/// Integration configuration; `None` means disabled
#[derive(Debug, Clone, Default)]
pub struct IntegrationsConfig {
    /// Google Calendar
    pub calendar: Option<CalendarConfig>,

    /// Home Assistant
    pub home_assistant: Option<HomeAssistantConfig>,

    /// Social-post generator
    pub post_generator: Option<PostGeneratorConfig>,

    /// Reminders JSON store
    pub reminders_path: PathBuf,

    /// Value returned by the `get_secret_key` diagnostic tool
    pub secret_key: Option<String>,
}

/// Google Calendar configuration
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    /// Authorized-user token file
    pub token_path: PathBuf,

    /// Calendar identifier
    pub calendar_id: String,
}

/// Home Assistant configuration
#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    /// Base URL (e.g. `<http://homeassistant.local:8123>`)
    pub url: String,

    /// Long-lived access token
    pub token: String,
}

/// Post generator configuration
#[derive(Debug, Clone)]
pub struct PostGeneratorConfig {
    /// `OpenRouter` API key
    pub api_key: String,

    /// Model routed through `OpenRouter`
    pub model: String,

    /// Directory to save generated posts as JSON
    pub posts_dir: Option<PathBuf>,
}

/// MCP configuration
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Launch configured MCP servers
    pub enabled: bool,

    /// Path to the `mcpServers` JSON document
    pub config_path: PathBuf,

    /// Bound on spawn + handshake + tool listing per server
    pub handshake_timeout: Duration,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on a single tool invocation
    pub tool_timeout: Duration,

    /// Bound on task cancellation and subprocess exit at shutdown
    pub shutdown_grace: Duration,

    /// Key that toggles recording
    pub toggle_key: char,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(3),
            toggle_key: 't',
        }
    }
}

/// Transcript configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Append a per-day transcript
    pub log_conversation: bool,

    /// Directory for transcript files
    pub log_dir: PathBuf,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Load configuration from the environment and an explicit config file
    #[must_use]
    pub fn load_from(path: &Path) -> Self {
        let fc = file::load_config_from(path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > file > default for every field.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn from_sources<F>(fc: RoomeyConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = env("ROOMEY_DATA_DIR").map_or_else(
            || {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("roomey"))
            },
            PathBuf::from,
        );
        let config_dir = file::config_dir().unwrap_or_else(|| PathBuf::from("."));

        let provider = ProviderConfig {
            api_key: env("GEMINI_API_KEY").or(fc.api_keys.gemini),
            model: env("ROOMEY_MODEL")
                .or(fc.provider.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env("VOICE_NAME")
                .or(fc.provider.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            system_prompt: env("PERSONALIZED_PROMPT")
                .or(fc.provider.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            google_search: env_flag(&env, "ROOMEY_GOOGLE_SEARCH")
                .or(fc.provider.google_search)
                .unwrap_or(true),
        };

        let defaults = AudioConfig::default();
        let audio = AudioConfig {
            enabled: env_flag(&env, "ROOMEY_AUDIO")
                .or(fc.audio.enabled)
                .unwrap_or(defaults.enabled),
            send_sample_rate: env_parse(&env, "SEND_SAMPLE_RATE")
                .or(fc.audio.send_sample_rate)
                .unwrap_or(defaults.send_sample_rate),
            receive_sample_rate: env_parse(&env, "RECEIVE_SAMPLE_RATE")
                .or(fc.audio.receive_sample_rate)
                .unwrap_or(defaults.receive_sample_rate),
            chunk_size: env_parse(&env, "CHUNK_SIZE")
                .or(fc.audio.chunk_size)
                .unwrap_or(defaults.chunk_size),
            playback_queue: defaults.playback_queue,
        };

        // Calendar (env flag > toml flag > off)
        let calendar = env_flag(&env, "GOOGLE_CALENDAR_INTEGRATION")
            .or(fc.integrations.calendar)
            .unwrap_or(false)
            .then(|| CalendarConfig {
                token_path: env("GOOGLE_CALENDAR_TOKEN_PATH")
                    .or(fc.calendar.token_path)
                    .map_or_else(|| config_dir.join("calendar_token.json"), PathBuf::from),
                calendar_id: env("GOOGLE_CALENDAR_ID")
                    .or(fc.calendar.calendar_id)
                    .unwrap_or_else(|| "primary".to_string()),
            });

        // Home Assistant needs both URL and token
        let home_assistant = if env_flag(&env, "HASS_INTEGRATION")
            .or(fc.integrations.home_assistant)
            .unwrap_or(false)
        {
            let url = env("HASS_URL").or(fc.home_assistant.url);
            let token = env("HASS_TOKEN").or(fc.home_assistant.token);
            match (url, token) {
                (Some(url), Some(token)) => Some(HomeAssistantConfig {
                    url: url.trim_end_matches('/').to_string(),
                    token,
                }),
                _ => {
                    tracing::warn!("home assistant enabled but URL or token missing, disabling");
                    None
                }
            }
        } else {
            None
        };

        let openrouter_key = env("OPENROUTER_API_KEY").or(fc.api_keys.openrouter);
        let post_generator = if env_flag(&env, "LINKEDIN_FORMATTER_INTEGRATION")
            .or(fc.integrations.post_generator)
            .unwrap_or(false)
        {
            if let Some(api_key) = openrouter_key {
                Some(PostGeneratorConfig {
                    api_key,
                    model: env("ROOMEY_POST_MODEL")
                        .or(fc.post_generator.model)
                        .unwrap_or_else(|| DEFAULT_POST_MODEL.to_string()),
                    posts_dir: env("ROOMEY_POSTS_DIR")
                        .or(fc.post_generator.posts_dir)
                        .map(PathBuf::from),
                })
            } else {
                tracing::warn!("post generator enabled but OPENROUTER_API_KEY missing, disabling");
                None
            }
        } else {
            None
        };

        let integrations = IntegrationsConfig {
            calendar,
            home_assistant,
            post_generator,
            reminders_path: env("ROOMEY_REMINDERS_PATH")
                .map_or_else(|| data_dir.join("reminders.json"), PathBuf::from),
            secret_key: env("SECRET_KEY").or(fc.api_keys.secret_key),
        };

        let mcp = McpConfig {
            enabled: env_flag(&env, "MCP_ENABLED")
                .or(fc.mcp.enabled)
                .unwrap_or(false),
            config_path: env("MCP_CONFIG_PATH")
                .or(fc.mcp.config_path)
                .map_or_else(|| config_dir.join("mcp_servers.json"), PathBuf::from),
            handshake_timeout: Duration::from_secs(
                env_parse(&env, "ROOMEY_MCP_HANDSHAKE_TIMEOUT")
                    .or(fc.mcp.handshake_timeout_secs)
                    .unwrap_or(30),
            ),
        };

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            tool_timeout: env_parse(&env, "ROOMEY_TOOL_TIMEOUT")
                .or(fc.session.tool_timeout_secs)
                .map_or(session_defaults.tool_timeout, Duration::from_secs),
            shutdown_grace: env_parse(&env, "ROOMEY_SHUTDOWN_GRACE")
                .or(fc.session.shutdown_grace_secs)
                .map_or(session_defaults.shutdown_grace, Duration::from_secs),
            toggle_key: env("ROOMEY_TOGGLE_KEY")
                .and_then(|s| s.chars().next())
                .or(fc.session.toggle_key)
                .unwrap_or(session_defaults.toggle_key),
        };

        let logging = LoggingConfig {
            log_conversation: env_flag(&env, "LOG_CONVERSATION")
                .or(fc.logging.log_conversation)
                .unwrap_or(false),
            log_dir: env("ROOMEY_LOG_DIR")
                .or(fc.logging.log_dir)
                .map_or_else(|| data_dir.join("logs"), PathBuf::from),
        };

        Self {
            provider,
            audio,
            integrations,
            mcp,
            session,
            logging,
            data_dir,
        }
    }
}

/// Parse a boolean flag the way `.env` files write them
fn env_flag<F>(env: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    env(key).map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
}

/// Parse a numeric variable, ignoring malformed values
fn env_parse<F, T>(env: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    env(key).and_then(|v| v.trim().parse().ok())
}
