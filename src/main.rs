//! Terminal driver for the companion chat session.
//!
//! Reads prompts and `/commands` from stdin and prints streamed replies.
//! Pass `--speak-log` to log what would be spoken aloud.

use std::io::Write;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use companion_chat::adapters::{
    FileBlobStore, GeminiConfig, GeminiProvider, MockAIProvider, RecordingSynthesizer,
};
use companion_chat::application::{ChatError, SessionEvent, SessionOrchestrator};
use companion_chat::config::{AiProvider, AppConfig, LoggingConfig};
use companion_chat::domain::user::{Mood, User};
use companion_chat::ports::AIProvider;

const HELP: &str = "\
Commands:
  /login <name> <email>   sign in
  /logout                 sign out and forget conversations
  /new                    start a new conversation
  /list                   list conversations
  /select <n>             switch to conversation n
  /delete <n>             delete conversation n
  /voices                 list voices
  /voice <id>             choose a voice
  /rate <x>               set speech rate (0.5 - 2.0)
  /mood <happy|sad|surprised|neutral|off>
  /chips                  show suggestions
  /quit                   exit
Anything else is sent as a message.";

#[tokio::main]
async fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    let speak_log = std::env::args().any(|arg| arg == "--speak-log");
    let orchestrator = build_orchestrator(&config, speak_log);

    let events = orchestrator.subscribe();
    tokio::spawn(print_events(events));

    if !orchestrator.restore().await {
        println!("Not signed in. Use /login <name> <email>.");
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if !run_command(&orchestrator, line.trim()).await {
            break;
        }
    }

    orchestrator.settle().await;
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_orchestrator(config: &AppConfig, speak_log: bool) -> SessionOrchestrator {
    let blobs = Arc::new(FileBlobStore::new(&config.storage.data_dir));
    let mut synthesizer = RecordingSynthesizer::new();
    if speak_log {
        synthesizer = synthesizer.logging();
    }

    let mut builder = SessionOrchestrator::builder(blobs)
        .synthesizer(Arc::new(synthesizer))
        .system_prompt(config.ai.system_prompt.clone())
        .chat_config(config.chat.clone());

    let validation = config.validate();
    if let Err(e) = &validation {
        tracing::error!(error = %e, "Invalid configuration");
    } else {
        match build_provider(config) {
            Ok(provider) => builder = builder.provider(provider),
            Err(e) => tracing::error!(error = %e, "Failed to create AI provider"),
        }
    }

    let orchestrator = builder.build();
    if let Err(e) = validation {
        orchestrator.fail_configuration(ChatError::Configuration(e.to_string()));
    }
    orchestrator
}

fn build_provider(config: &AppConfig) -> Result<Arc<dyn AIProvider>, ChatError> {
    match config.ai.provider {
        AiProvider::Mock => Ok(Arc::new(MockAIProvider::new())),
        AiProvider::Gemini => {
            let key = config
                .ai
                .gemini_api_key
                .as_ref()
                .map(|k| k.expose_secret().clone())
                .unwrap_or_default();
            let gemini = GeminiProvider::new(
                GeminiConfig::new(key)
                    .with_model(&config.ai.model)
                    .with_base_url(&config.ai.base_url)
                    .with_timeout(config.ai.timeout())
                    .with_max_retries(config.ai.max_retries),
            )
            .map_err(|e| ChatError::Configuration(e.to_string()))?;
            Ok(Arc::new(gemini))
        }
    }
}

/// Runs one line of input. Returns false when the user asked to quit.
async fn run_command(orchestrator: &SessionOrchestrator, line: &str) -> bool {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/help" => println!("{}", HELP),
        "/login" => match rest.split_once(' ') {
            Some((name, email)) => match User::new(name, email.trim()) {
                Ok(user) => orchestrator.login(user).await,
                Err(e) => println!("{}", e),
            },
            None => println!("Usage: /login <name> <email>"),
        },
        "/logout" => orchestrator.logout().await,
        "/new" => {
            orchestrator.new_chat().await;
        }
        "/list" => list_conversations(orchestrator),
        "/select" | "/delete" => {
            let Some(id) = rest
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| orchestrator.conversations().get(i).map(|c| c.id()))
            else {
                println!("No such conversation");
                return true;
            };
            if command == "/select" {
                orchestrator.select_chat(id).await;
            } else {
                orchestrator.delete_chat(id).await;
            }
        }
        "/voices" => {
            orchestrator.refresh_voices().await;
            let selected = orchestrator.settings().voice_id;
            for voice in orchestrator.voices() {
                let marker = if selected.as_deref() == Some(voice.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {} ({}, {})", marker, voice.id, voice.name, voice.lang);
            }
        }
        "/voice" => {
            if !orchestrator.set_voice(rest).await {
                println!("Unknown voice");
            }
        }
        "/rate" => match rest.parse::<f32>() {
            Ok(rate) => {
                let rate = orchestrator.set_rate(rate).await;
                println!("Speech rate {:.2}", rate.value());
            }
            Err(_) => println!("Usage: /rate <number>"),
        },
        "/mood" => orchestrator.set_mood(parse_mood(rest)),
        "/chips" => {
            for chip in orchestrator.suggestions() {
                println!("  {}", chip);
            }
        }
        _ if command.starts_with('/') => println!("Unknown command. /help lists them."),
        _ => match orchestrator.send_message(line).await {
            Ok(_) => {}
            Err(e) => println!("\n[{}]", e.user_message()),
        },
    }
    true
}

fn list_conversations(orchestrator: &SessionOrchestrator) {
    let active = orchestrator.active_id();
    for (i, conversation) in orchestrator.conversations().iter().enumerate() {
        let marker = if Some(conversation.id()) == active { "*" } else { " " };
        println!(
            "{} {}. {} ({} messages)",
            marker,
            i + 1,
            conversation.title(),
            conversation.messages().len()
        );
    }
}

fn parse_mood(raw: &str) -> Option<Mood> {
    match raw {
        "happy" => Some(Mood::Happy),
        "sad" => Some(Mood::Sad),
        "surprised" => Some(Mood::Surprised),
        "neutral" => Some(Mood::Neutral),
        _ => None,
    }
}

/// Prints reply text as it streams in.
async fn print_events(mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
    let mut printed = 0usize;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::TurnStarted { .. } => printed = 0,
            SessionEvent::ReplyUpdated { text, .. } => {
                if let Some(fresh) = text.get(printed..) {
                    print!("{}", fresh);
                    let _ = std::io::stdout().flush();
                }
                printed = text.len();
            }
            SessionEvent::TurnCompleted { .. } => println!(),
            SessionEvent::TitleChanged { title, .. } => tracing::debug!(%title, "Title changed"),
            SessionEvent::ConversationsChanged { active: Some(id) } => {
                tracing::debug!(conversation_id = %id, "Active conversation");
            }
            _ => {}
        }
    }
}
