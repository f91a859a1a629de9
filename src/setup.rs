//! Interactive first-run setup wizard (`roomey setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Confirm, Input, Select};

use crate::config::file::{self, RoomeyConfigFile};
use crate::config::DEFAULT_VOICE;

/// Prebuilt voices offered by the wizard
const VOICES: [&str; 8] = [
    "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr",
];

/// Run the interactive setup wizard
///
/// Answers are merged into the existing config file, so settings the wizard
/// does not ask about are kept.
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Roomey Setup\n");

    let mut config = file::load_config_file();
    let config_path = file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/roomey/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Gemini API key
    config.api_keys.gemini = ask_secret(
        "Gemini API key (GEMINI_API_KEY)",
        config.api_keys.gemini.take(),
    )?;

    // 2. Voice and personality
    let current_voice = config.provider.voice.as_deref().unwrap_or(DEFAULT_VOICE);
    let voice_idx = Select::new()
        .with_prompt("Select a voice")
        .items(&VOICES)
        .default(VOICES.iter().position(|v| *v == current_voice).unwrap_or(2))
        .interact()?;
    config.provider.voice = Some(VOICES[voice_idx].to_string());

    let prompt: String = Input::new()
        .with_prompt("Personalized prompt (leave blank for the default)")
        .default(config.provider.system_prompt.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    config.provider.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);

    // 3. Integrations
    setup_calendar(&mut config)?;
    setup_home_assistant(&mut config)?;
    setup_post_generator(&mut config)?;

    // 4. MCP servers
    let mcp = Confirm::new()
        .with_prompt("Launch MCP servers from mcp_servers.json?")
        .default(config.mcp.enabled.unwrap_or(false))
        .interact()?;
    config.mcp.enabled = Some(mcp);

    // 5. Transcript
    let log = Confirm::new()
        .with_prompt("Save conversation transcripts?")
        .default(config.logging.log_conversation.unwrap_or(false))
        .interact()?;
    config.logging.log_conversation = Some(log);

    write_config(&config_path, &config)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `roomey -v` to start.");

    Ok(())
}

fn setup_calendar(config: &mut RoomeyConfigFile) -> anyhow::Result<()> {
    let enabled = Confirm::new()
        .with_prompt("Enable Google Calendar?")
        .default(config.integrations.calendar.unwrap_or(false))
        .interact()?;
    config.integrations.calendar = Some(enabled);

    if enabled {
        let default_path = file::config_dir()
            .map(|d| d.join("calendar_token.json").display().to_string())
            .unwrap_or_default();
        let token_path: String = Input::new()
            .with_prompt("Authorized-user token file")
            .default(config.calendar.token_path.clone().unwrap_or(default_path))
            .interact_text()?;
        config.calendar.token_path = Some(token_path);
    }
    Ok(())
}

fn setup_home_assistant(config: &mut RoomeyConfigFile) -> anyhow::Result<()> {
    let enabled = Confirm::new()
        .with_prompt("Enable Home Assistant?")
        .default(config.integrations.home_assistant.unwrap_or(false))
        .interact()?;
    config.integrations.home_assistant = Some(enabled);

    if enabled {
        let url: String = Input::new()
            .with_prompt("Home Assistant URL")
            .default(
                config
                    .home_assistant
                    .url
                    .clone()
                    .unwrap_or_else(|| "http://homeassistant.local:8123".to_string()),
            )
            .interact_text()?;
        config.home_assistant.url = Some(url);
        config.home_assistant.token = ask_secret(
            "Long-lived access token (HASS_TOKEN)",
            config.home_assistant.token.take(),
        )?;
    }
    Ok(())
}

fn setup_post_generator(config: &mut RoomeyConfigFile) -> anyhow::Result<()> {
    let enabled = Confirm::new()
        .with_prompt("Enable the LinkedIn post formatter?")
        .default(config.integrations.post_generator.unwrap_or(false))
        .interact()?;
    config.integrations.post_generator = Some(enabled);

    if enabled {
        config.api_keys.openrouter = ask_secret(
            "OpenRouter API key (OPENROUTER_API_KEY)",
            config.api_keys.openrouter.take(),
        )?;
    }
    Ok(())
}

/// Mask a secret for display, keeping the first and last four characters
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Prompt for a secret; blank input keeps the current value
fn ask_secret(label: &str, current: Option<String>) -> anyhow::Result<Option<String>> {
    let prompt = current.as_deref().map_or_else(
        || label.to_string(),
        |key| format!("{label} (current: {}, leave blank to keep)", mask(key)),
    );

    let input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    let input = input.trim();
    Ok(if input.is_empty() {
        current
    } else {
        Some(input.to_string())
    })
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &RoomeyConfigFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}
