use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use roomey::audio::{
    AudioSink, FrameSource, MicCapture, NoInput, NoOutput, SpeakerPlayback, pcm16_to_f32, tone,
};
use roomey::keys::{Crlf, KeyListener};
use roomey::tools::build_registry;
use roomey::{
    Config, GeminiConnector, McpLauncher, Session, SessionOptions, ToolRegistry, TranscriptLog,
};

/// Roomey - push-to-talk voice assistant
#[derive(Parser)]
#[command(name = "roomey", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/roomey/config.toml)
    #[arg(short, long, env = "ROOMEY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run without microphone and speaker (typed input only)
    #[arg(long, env = "ROOMEY_DISABLE_AUDIO")]
    no_audio: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List the tools advertised to the model, including MCP tools
    Tools,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Interactive first-run setup
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,roomey=info",
        1 => "info,roomey=debug",
        2 => "debug",
        _ => "trace",
    };

    // Logs go to stderr; stdout carries model text
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(|| Crlf(std::io::stderr()))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Some(Command::Setup)) {
        return roomey::setup::run_setup();
    }

    let config = cli
        .config
        .as_deref()
        .map_or_else(Config::load, Config::load_from);
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::Tools) => list_tools(&config).await,
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::TestSpeaker) => test_speaker(&config).await,
        Some(Command::Setup) | None => run_assistant(config, cli.no_audio).await,
    }
}

/// Build the registry, launching MCP servers when enabled
async fn build_tools(config: &Config) -> anyhow::Result<(ToolRegistry, Option<Arc<McpLauncher>>)> {
    let mut registry = build_registry(config)?;

    if !config.mcp.enabled {
        return Ok((registry, None));
    }

    let launcher = McpLauncher::start(&config.mcp.config_path, config.mcp.handshake_timeout).await;
    let count = launcher.register_tools(&mut registry, config.session.tool_timeout)?;
    tracing::info!(
        servers = ?launcher.server_names(),
        tools = count,
        "registered MCP tools"
    );
    Ok((registry, Some(Arc::new(launcher))))
}

async fn run_assistant(config: Config, no_audio: bool) -> anyhow::Result<()> {
    let api_key = config
        .provider
        .api_key
        .clone()
        .context("GEMINI_API_KEY is not set (run `roomey setup`)")?;

    let (registry, launcher) = build_tools(&config).await?;
    tracing::info!(tools = registry.len(), "tool registry ready");

    let cancel = CancellationToken::new();
    let mut session = Session::new(
        Arc::new(GeminiConnector::new(api_key)),
        registry,
        SessionOptions::from_config(&config),
    )
    .with_cancel(cancel.clone());

    if let Some(launcher) = launcher {
        session = session.with_launcher(launcher);
    }
    if config.logging.log_conversation {
        tracing::info!(dir = %config.logging.log_dir.display(), "logging conversation");
        session = session.with_transcript(Arc::new(TranscriptLog::new(&config.logging.log_dir)));
    }

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            ctrl_c.cancel();
        }
    });

    let (source, sink): (Box<dyn FrameSource>, Box<dyn AudioSink>) =
        if config.audio.enabled && !no_audio {
            (
                Box::new(MicCapture::start(
                    config.audio.send_sample_rate,
                    config.audio.chunk_size,
                )?),
                Box::new(SpeakerPlayback::start(config.audio.receive_sample_rate)?),
            )
        } else {
            tracing::info!("audio disabled, typed input only");
            (Box::new(NoInput), Box::new(NoOutput))
        };

    let (line_tx, line_rx) = mpsc::channel(16);
    let keys = if std::io::stdin().is_terminal() {
        let toggle = config.session.toggle_key;
        tracing::info!("roomey ready: press '{toggle}' to talk, '/' to type, 'q' to quit");
        Some(KeyListener::spawn(
            toggle,
            session.recording(),
            line_tx,
            cancel.clone(),
        )?)
    } else {
        spawn_stdin_reader(line_tx);
        None
    };

    let result = session.run(source, sink, Some(line_rx)).await;
    drop(keys);
    result?;
    Ok(())
}

/// Forward piped stdin lines as typed turns
///
/// A plain thread, so a blocked read never holds up runtime shutdown.
fn spawn_stdin_reader(lines: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines.blocking_send(line).is_err() {
                break;
            }
        }
    });
}

async fn list_tools(config: &Config) -> anyhow::Result<()> {
    let (registry, launcher) = build_tools(config).await?;

    for declaration in registry.declarations() {
        println!("{}", declaration.name);
        println!("    {}", declaration.description);
        if let Some(props) = declaration
            .parameters
            .get("properties")
            .and_then(|p| p.as_object())
            .filter(|p| !p.is_empty())
        {
            let names: Vec<&str> = props.keys().map(String::as_str).collect();
            println!("    parameters: {}", names.join(", "));
        }
    }
    println!("\n{} tools", registry.len());

    if let Some(launcher) = launcher {
        launcher.shutdown(config.session.shutdown_grace).await;
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let rate = config.audio.send_sample_rate;
    let mut capture = MicCapture::start(rate, config.audio.chunk_size)?;
    println!("Sample rate: {rate} Hz");
    println!("---");

    for i in 0..duration {
        let mut samples = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while let Ok(Ok(Some(frame))) =
            tokio::time::timeout_at(deadline, capture.next_frame()).await
        {
            samples.extend(pcm16_to_f32(&frame));
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    drop(capture);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Does the input device support {rate} Hz?");
    println!("  3. Linux: pactl info | grep 'Default Source'");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let rate = config.audio.receive_sample_rate;
    let mut playback = SpeakerPlayback::start(rate)?;

    // Fed in 100ms chunks, the way model audio arrives
    for _ in 0..20 {
        playback.play(tone(440.0, 100, rate)).await?;
    }
    playback.drain().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Does the output device support {rate} Hz?");
    println!("  2. Linux: pactl list sinks short");

    Ok(())
}
