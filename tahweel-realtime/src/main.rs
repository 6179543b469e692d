//! `tahweel-realtime`: presence and typing indicators from the terminal.
//!
//! Connects to a hub, tracks who is online, and watches one conversation's
//! typing channel. Every line typed on stdin counts as typing activity.
//!
//! ```bash
//! cargo run --bin tahweel-realtime -- --hub-url ws://127.0.0.1:9100/ws \
//!     --user-id layla --conversation dm-42
//! ```
//!
//! Commands: `/stop`, `/online <user>`, `/who`, `/quit`.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use tahweel_realtime::config::{CliArgs, ClientConfig};
use tahweel_realtime::presence::{self, PresenceRegistry, PresenceTracker};
use tahweel_realtime::transport::ws::WsTransport;
use tahweel_realtime::transport::{Listener, RealtimeTransport};
use tahweel_realtime::typing::{ConversationTyping, TypingRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (Some(hub_url), Some(user_id)) = (config.hub_url.clone(), config.user_id.clone()) else {
        eprintln!("Error: --hub-url and --user-id are required");
        return ExitCode::FAILURE;
    };

    let transport = match WsTransport::connect(&hub_url, &user_id, &config.to_ws_options()).await
    {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("Error: could not connect to {hub_url}: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%hub_url, %user_id, "connected");
    println!("Connected to {hub_url} as {user_id}");

    run(&transport, &config, &user_id).await;

    transport.disconnect();
    tracing::info!("tahweel-realtime exiting");
    ExitCode::SUCCESS
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for file logging that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Interactive loop: stdin lines drive typing, presence changes are printed.
async fn run(transport: &Arc<WsTransport>, config: &ClientConfig, user_id: &str) {
    let shared: Arc<dyn RealtimeTransport> = Arc::clone(transport) as Arc<dyn RealtimeTransport>;

    let registry = PresenceRegistry::new(Arc::clone(&shared));
    if !registry.install_global() {
        tracing::warn!("global presence registry already installed");
    }
    let mut tracker = PresenceTracker::mount(&registry);

    let typing = TypingRegistry::new(Arc::clone(&shared), user_id, config.typing);
    let display_name = config.effective_display_name().unwrap_or(user_id);
    let mut conversation = config
        .conversation
        .as_deref()
        .map(|id| ConversationTyping::mount(&typing, id, display_name));
    let _typing_listeners = conversation
        .as_ref()
        .map(|_| print_typing_changes(&typing));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(line.trim(), &tracker, conversation.as_mut()) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
            alive = tracker.changed() => {
                if !alive {
                    break;
                }
                println!("* online: {}", tracker.online_user_ids().join(", "));
            }
            () = transport.closed() => {
                println!("Disconnected from hub");
                break;
            }
        }
    }

    if let Some(conversation) = conversation.as_mut() {
        conversation.stop_typing();
    }
}

/// Handle one stdin line. Returns `false` to quit.
fn handle_line(
    line: &str,
    tracker: &PresenceTracker,
    conversation: Option<&mut ConversationTyping>,
) -> bool {
    match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return false,
        ("/who", _) => {
            let ready = if tracker.is_ready() { "" } else { " (waiting for snapshot)" };
            println!("online{ready}: {}", tracker.online_user_ids().join(", "));
        }
        ("/online", user) if !user.trim().is_empty() => {
            let user = user.trim();
            // Goes through the global lookup path, same as non-mounted callers.
            let online = presence::is_user_online_global(user);
            println!("{user} is {}", if online { "online" } else { "offline" });
        }
        ("/online", _) => println!("usage: /online <user>"),
        ("/stop", _) => match conversation {
            Some(c) => c.stop_typing(),
            None => println!("no conversation selected"),
        },
        _ => match conversation {
            Some(c) => c.handle_typing(),
            None => println!("no conversation selected (use --conversation)"),
        },
    }
    true
}

fn print_typing_changes(typing: &TypingRegistry) -> [Listener; 2] {
    let start = typing.on_typing_start(|event| {
        println!("* {} is typing in {}", event.username, event.channel);
    });
    let stop = typing.on_typing_stop(|channel, user_id| {
        println!("* {user_id} stopped typing in {channel}");
    });
    [start, stop]
}
