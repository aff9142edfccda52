//! threat-chat: terminal client for the threat-intel chat server.
//! With a question argument, sends it once and prints the streamed reply.
//! Otherwise reads stdin line by line; `/new`, `/chats`, `/switch <id>` and
//! `/quit` manage conversations, any other line is sent on the active one.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use threat_chat_client::config::{self, Config};
use threat_chat_client::{ChatId, ChatSessionStore, ClientError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "threat-chat", version, about = "Chat with the threat-intel assistant")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", env = "THREAT_CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket URL; overrides the configured endpoint.
    #[arg(long = "url")]
    url: Option<String>,

    /// Question to ask once. Reads stdin interactively when omitted.
    question: Vec<String>,
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let mut cfg = match &cli.config {
        Some(path) => config::load(path)
            .map_err(|e| format!("failed to load config from {}: {}", path.display(), e))?,
        None => {
            let path = config::resolve_config_path(None);
            config::load_or_default(path.as_deref()).map_err(|e| e.to_string())?
        }
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}

/// Send `text` on the active conversation and print the reply as it streams.
async fn send_turn(
    store: &mut ChatSessionStore,
    url: &str,
    text: &str,
) -> Result<(), ClientError> {
    let Some(pending) = store.send(text) else {
        return Ok(());
    };

    let mut client = match threat_chat_client::connect(url).await {
        Ok(c) => c,
        Err(e) => {
            store.on_connection_closed(pending.chat_id);
            return Err(e);
        }
    };
    if let Err(e) = client.send(&pending.request).await {
        store.on_connection_closed(pending.chat_id);
        return Err(e);
    }

    let stdout = io::stdout();
    let reply = client
        .stream_into(store, pending.chat_id, |delta| {
            let mut out = stdout.lock();
            let _ = write!(out, "{}", delta);
            let _ = out.flush();
        })
        .await;
    let _ = writeln!(stdout.lock());

    match reply.error {
        Some(message) => Err(ClientError::Protocol(format!("server error: {}", message))),
        None => Ok(()),
    }
}

fn print_chats(store: &ChatSessionStore) {
    let active = store.active_id();
    for chat in store.chats() {
        let marker = if Some(chat.id()) == active { '*' } else { ' ' };
        let title = chat.title(40);
        let title = if title.is_empty() { "(empty)".to_string() } else { title };
        println!("{} {:>3}  {}", marker, chat.id(), title);
    }
}

/// Handle one stdin line. Returns false when the user asked to quit.
async fn handle_line(
    store: &mut ChatSessionStore,
    url: &str,
    line: &str,
    failed: &mut bool,
) -> bool {
    let line = line.trim();
    match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
        ("/quit", _) | ("/exit", _) => return false,
        ("/new", _) => match store.new_chat() {
            Some(id) => println!("started conversation {}", id),
            None => eprintln!("finish the current empty conversation first"),
        },
        ("/chats", _) => print_chats(store),
        ("/switch", arg) => match arg.parse::<ChatId>() {
            Ok(id) if store.select_chat(id) => println!("switched to conversation {}", id),
            _ => eprintln!("no conversation {:?}", arg),
        },
        _ => {
            if let Err(e) = send_turn(store, url, line).await {
                eprintln!("Error: {}", e);
                *failed = true;
            }
        }
    }
    true
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let url = cli.url.clone().unwrap_or_else(|| cfg.endpoint());

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut store = ChatSessionStore::with_options(cfg.chat.max_tokens, cfg.chat.temperature);
    store.ensure_chat();

    rt.block_on(async {
        if !cli.question.is_empty() {
            let question = cli.question.join(" ");
            return match send_turn(&mut store, &url, &question).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            };
        }

        let mut failed = false;
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("Error: failed to read stdin: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if !handle_line(&mut store, &url, &line, &mut failed).await {
                break;
            }
        }
        if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    })
}
