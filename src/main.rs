use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxchat::api::{Backend, HttpBackend, UploadFile};
use voxchat::app::{App, Services, MICROPHONE_ALERT};
use voxchat::audio::{AudioClip, ProcessMicrophone};
use voxchat::config::Config;
use voxchat::conversation::Conversation;
use voxchat::message::InputType;
use voxchat::notify::Notifier;
use voxchat::playback::{Player, ProcessPlayer};
use voxchat::recorder::VoiceRecorder;
use voxchat::tui::{self, EventHandler, Tui};
use voxchat::{handler, render};

#[derive(Parser)]
#[command(name = "voxchat")]
#[command(about = "Chat with an AI assistant by text, voice or CSV upload")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides config and VOXCHAT_API_URL
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat screen (default)
    Chat,
    /// Send one message and print the reply
    Send {
        message: String,
        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,
        /// Tag the message as a voice transcript
        #[arg(long)]
        voice: bool,
    },
    /// Upload a file (normally CSV) to the backend
    Upload { file: PathBuf },
    /// Show the backend's upload status
    UploadStatus,
    /// Show the backend's history for a session
    History { session_id: String },
    /// Transcribe a WAV file
    Transcribe { file: PathBuf },
    /// Synthesize speech and play it or save it
    Speak {
        text: String,
        #[arg(short, long)]
        language: Option<String>,
        /// Write the audio here instead of playing it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Record until Enter, transcribe, and send as a voice message
    Record,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let interactive = matches!(cli.command, None | Some(Commands::Chat));
    init_logging(interactive);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The chat screen owns the terminal, so its logs go to a file.
fn init_logging(interactive: bool) {
    if !interactive {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    match open_log_file() {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::sink)
            .init(),
    }
}

fn open_log_file() -> Result<std::fs::File> {
    let dir = dirs::data_dir()
        .map(|d| d.join("voxchat"))
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("voxchat.log"))?;
    Ok(file)
}

async fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| dirs::config_dir().map(|d| d.join("voxchat/config.toml")))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;

    let mut config = Config::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(url) = &cli.api_url {
        config.backend.base_url = url.clone();
    }
    config.validate()?;

    info!("Using backend at {}", config.backend.base_url);
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli).await?;

    match cli.command {
        None | Some(Commands::Chat) => run_chat(config).await,
        Some(Commands::Send {
            message,
            session,
            voice,
        }) => {
            let input_type = if voice { InputType::Voice } else { InputType::Text };
            send_once(&config, &message, session.as_deref(), input_type).await
        }
        Some(Commands::Upload { file }) => upload_once(&config, &file).await,
        Some(Commands::UploadStatus) => {
            let backend = HttpBackend::new(&config.backend)?;
            let status = backend.upload_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Some(Commands::History { session_id }) => {
            let backend = HttpBackend::new(&config.backend)?;
            let history = backend.history(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
        Some(Commands::Transcribe { file }) => transcribe_file(&config, &file).await,
        Some(Commands::Speak {
            text,
            language,
            output,
        }) => speak_once(&config, &text, language, output).await,
        Some(Commands::Record) => record_once(&config).await,
    }
}

async fn run_chat(config: Config) -> Result<()> {
    let services = Services {
        backend: Arc::new(HttpBackend::new(&config.backend)?),
        player: Arc::new(ProcessPlayer::new(&config.playback, &config.audio)),
        microphone: Box::new(ProcessMicrophone::new(&config.audio)),
        notifier: Notifier::new(&config.ui),
    };

    let mut events = EventHandler::new();
    let mut app = App::new(&config, services, events.sender());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    info!("Chat screen started");

    let result = event_loop(&mut terminal, &mut app, &mut events).await;

    app.recorder.shutdown().await;
    tui::restore()?;
    info!("Chat screen closed");
    result
}

async fn event_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| render::render(app, frame))?;
        match events.next().await {
            Some(event) => handler::handle_event(app, event).await?,
            None => break,
        }
    }
    Ok(())
}

/// Print the conversation's latest reply and session.
fn print_reply(conversation: &Conversation) {
    if let Some(reply) = conversation.last_reply() {
        println!("{}", reply.text);
    }
    if let Some(id) = conversation.session().id() {
        println!("session: {}", id);
    }
}

async fn send_once(
    config: &Config,
    message: &str,
    session: Option<&str>,
    input_type: InputType,
) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let mut conversation = Conversation::new(config.backend.user_id.clone());
    if let Some(id) = session {
        conversation.resume(id);
    }

    let Some(exchange) = conversation.begin_exchange(message, input_type) else {
        warn!("Message is blank, nothing sent");
        return Ok(());
    };
    let outcome = backend.send_message(exchange.request.clone()).await;
    let failure = outcome.as_ref().err().map(|e| e.to_string());
    conversation.finish_exchange(exchange, outcome);

    print_reply(&conversation);
    match failure {
        Some(e) => anyhow::bail!(e),
        None => Ok(()),
    }
}

async fn upload_once(config: &Config, path: &Path) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let file = UploadFile::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut conversation = Conversation::new(config.backend.user_id.clone());
    let ticket = conversation.begin_upload(&file.file_name);
    let outcome = backend.upload_file(file).await;
    let failure = outcome.as_ref().err().map(|e| e.to_string());
    conversation.finish_upload(ticket, outcome);

    print_reply(&conversation);
    match failure {
        Some(e) => anyhow::bail!(e),
        None => Ok(()),
    }
}

async fn transcribe_file(config: &Config, path: &Path) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio.wav".to_string());

    let transcription = backend
        .transcribe(AudioClip {
            bytes,
            file_name,
            mime: "audio/wav",
        })
        .await?;
    if !transcription.success {
        warn!("Backend reported an unsuccessful transcription");
    }
    println!("{}", transcription.text);
    Ok(())
}

async fn speak_once(
    config: &Config,
    text: &str,
    language: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let language = language.unwrap_or_else(|| config.playback.language.clone());
    let audio = backend.synthesize(text, &language).await?;
    info!("Received {} bytes of speech", audio.len());

    match output {
        Some(path) => {
            tokio::fs::write(&path, &audio)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved speech to {}", path.display());
        }
        None => {
            let player = ProcessPlayer::new(&config.playback, &config.audio);
            player.play(&audio).await?;
        }
    }
    Ok(())
}

async fn record_once(config: &Config) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let notifier = Notifier::new(&config.ui);
    let mut recorder = VoiceRecorder::new(Box::new(ProcessMicrophone::new(&config.audio)));

    if let Err(e) = recorder.start().await {
        if let Err(notify_err) = notifier.alert("voxchat", MICROPHONE_ALERT).await {
            warn!("Failed to deliver alert: {}", notify_err);
        }
        return Err(anyhow::anyhow!("{} ({})", MICROPHONE_ALERT, e));
    }

    println!("Recording... press Enter to stop");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    println!("Transcribing...");
    let Some(transcript) = recorder.stop_and_transcribe(&backend).await else {
        return Ok(());
    };
    println!("You said: {}", transcript);

    let mut conversation = Conversation::new(config.backend.user_id.clone());
    conversation.submit_voice(&backend, &transcript).await;
    print_reply(&conversation);
    Ok(())
}
