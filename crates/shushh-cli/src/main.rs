//! Shushh CLI
//!
//! Terminal client for end-to-end encrypted chats through a Shushh relay.

mod cache;
mod commands;

use anyhow::{Context, Result};
use cache::FileKeyCache;
use clap::Parser;
use colored::Colorize;
use commands::Command;
use futures::{Sink, SinkExt, StreamExt};
use shushh_core::ports::KeyCache;
use shushh_core::{
    ClientMessage, ClientSession, Output, ServerMessage, SessionEvent, CLOSE_INVALID_CREDENTIAL,
    CLOSE_NO_CREDENTIAL,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "shushh")]
#[command(author, version, about = "Shushh - end-to-end encrypted terminal chat", long_about = None)]
struct Cli {
    /// Relay WebSocket URL
    #[arg(
        short,
        long,
        env = "SHUSHH_SERVER",
        default_value = "ws://127.0.0.1:4000/ws"
    )]
    server: String,

    /// Access token for your identity
    #[arg(short, long, env = "SHUSHH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Key cache file (default: ~/.shushh/keys.json)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cache_path = match cli.cache {
        Some(path) => path,
        None => FileKeyCache::default_path()?,
    };
    let cache = FileKeyCache::open(&cache_path)?;
    debug!("Using key cache {:?}", cache.path());
    let mut session = ClientSession::new(cache);

    let url = connect_url(&cli.server, cli.token.as_deref());
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.server))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    session.connected();
    println!("{}", format!("Connected to {}", cli.server).dimmed());
    println!("{}", "Type /help for commands".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut focus: Option<String> = None;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        session.disconnected();
                        return Err(e).context("WebSocket receive error");
                    }
                    None => {
                        session.disconnected();
                        println!("{}", "Connection closed".yellow());
                        return Ok(());
                    }
                };
                match msg {
                    Message::Text(text) => {
                        let server_msg = match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                warn!("Invalid message from relay: {}", e);
                                continue;
                            }
                        };
                        match session.handle(server_msg) {
                            Ok(out) => deliver(&mut ws_tx, out).await?,
                            Err(e) => println!("{} {}", "Dropped:".yellow(), e),
                        }
                    }
                    Message::Close(frame) => {
                        session.disconnected();
                        return closed(frame);
                    }
                    _ => {}
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match commands::parse(&line, focus.as_deref()) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e.to_string().yellow());
                        continue;
                    }
                };
                if command == Command::Quit {
                    break;
                }
                match execute(&mut session, command, &mut focus) {
                    Ok(out) => deliver(&mut ws_tx, out).await?,
                    Err(e) => println!("{} {}", "✗".red(), e),
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
    Ok(())
}

fn connect_url(server: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => {
            let separator = if server.contains('?') { '&' } else { '?' };
            format!("{}{}token={}", server, separator, token)
        }
        None => server.to_string(),
    }
}

/// Run one local command against the session
fn execute<C: KeyCache>(
    session: &mut ClientSession<C>,
    command: Command,
    focus: &mut Option<String>,
) -> shushh_core::Result<Output> {
    match command {
        Command::Chat(peer) => {
            let out = session.request_peer(&peer)?;
            if !out.outgoing.is_empty() {
                println!(
                    "{}",
                    format!("Requested a secret chat with {}, waiting for an answer", peer)
                        .dimmed()
                );
            }
            *focus = Some(peer);
            Ok(out)
        }
        Command::Accept(peer) => {
            let out = session.accept(&peer)?;
            *focus = Some(peer);
            Ok(out)
        }
        Command::Decline(peer) => {
            let out = session.decline(&peer)?;
            println!("{}", format!("Declined {}", peer).dimmed());
            Ok(out)
        }
        Command::Logout(peer) => {
            if focus.as_deref() == Some(peer.as_str()) {
                *focus = None;
            }
            println!("{}", format!("Left the secret chat with {}", peer).dimmed());
            Ok(session.logout_peer(&peer))
        }
        Command::Send { peer, text } => {
            let msg = session.send_text(&peer, &text)?;
            Ok(Output {
                outgoing: vec![msg],
                events: Vec::new(),
            })
        }
        Command::Focus(peer) => {
            println!("{}", format!("Bare lines now go to {}", peer).dimmed());
            *focus = Some(peer);
            Ok(Output::default())
        }
        Command::Pending => {
            let pending = session.pending_requests();
            if pending.is_empty() {
                println!("{}", "No pending requests".dimmed());
            }
            for peer in pending {
                println!("  {} {}", "•".cyan(), peer);
            }
            Ok(Output::default())
        }
        Command::History(peer) => {
            for line in session.history(&peer) {
                println!("  {} {}", format!("{}:", line.from).cyan(), line.text);
            }
            Ok(Output::default())
        }
        Command::Whoami => {
            match session.identity() {
                Some(id) => println!("You are {}", id.cyan().bold()),
                None => println!("{}", "Not signed in yet".dimmed()),
            }
            Ok(Output::default())
        }
        Command::Help => {
            println!("{}", commands::HELP);
            Ok(Output::default())
        }
        Command::Quit => Ok(Output::default()),
    }
}

/// Send what the session produced and show what it reported
async fn deliver<S>(sink: &mut S, out: Output) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    for event in &out.events {
        render(event);
    }
    for msg in out.outgoing {
        send(sink, &msg).await?;
    }
    Ok(())
}

async fn send<S>(sink: &mut S, msg: &ClientMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    debug!("Sending {}", msg.kind());
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json))
        .await
        .context("Failed to send to relay")
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::Welcomed { id } => {
            println!("{} {}", "Signed in as".green(), id.cyan().bold())
        }
        SessionEvent::TransportKeyed { reused: true } => {
            println!("{}", "🔐 Reusing cached transport key".dimmed())
        }
        SessionEvent::TransportKeyed { reused: false } => {
            println!("{}", "🔐 Transport key established".dimmed())
        }
        SessionEvent::PeerRequested { from } => println!(
            "{} {} wants a secret chat: /accept {} or /decline {}",
            "🔔".yellow(),
            from.cyan().bold(),
            from,
            from
        ),
        SessionEvent::PeerKeyed { peer, reused } => {
            let how = if *reused { " (cached key)" } else { "" };
            println!(
                "{}",
                format!("✅ Secret chat with {} ready{}", peer, how).green()
            )
        }
        SessionEvent::PeerDeclined { peer } => {
            println!("{}", format!("{} declined the secret chat", peer).yellow())
        }
        SessionEvent::PeerLoggedOut { peer } => {
            println!("{}", format!("{} left the secret chat", peer).yellow())
        }
        SessionEvent::Message { from, text } => {
            println!("{} {}", format!("{}:", from).cyan().bold(), text)
        }
        SessionEvent::RelayError { code, message } => {
            println!("{} {} ({})", "Relay error:".red(), message, code)
        }
    }
}

fn closed(frame: Option<CloseFrame<'static>>) -> Result<()> {
    let Some(frame) = frame else {
        println!("{}", "Connection closed".yellow());
        return Ok(());
    };

    match u16::from(frame.code) {
        CLOSE_NO_CREDENTIAL => {
            anyhow::bail!("relay requires a token (--token or SHUSHH_TOKEN)")
        }
        CLOSE_INVALID_CREDENTIAL => {
            anyhow::bail!("relay rejected the token: {}", frame.reason)
        }
        code => {
            println!(
                "{}",
                format!("Connection closed ({} {})", code, frame.reason).yellow()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shushh_core::ports::MemoryKeyCache;

    #[test]
    fn test_connect_url() {
        assert_eq!(
            connect_url("ws://relay/ws", Some("abc")),
            "ws://relay/ws?token=abc"
        );
        assert_eq!(
            connect_url("ws://relay/ws?v=1", Some("abc")),
            "ws://relay/ws?v=1&token=abc"
        );
        assert_eq!(connect_url("ws://relay/ws", None), "ws://relay/ws");
    }

    #[test]
    fn test_send_requires_peer_key() {
        let mut session = ClientSession::new(MemoryKeyCache::new());
        let mut focus = None;
        let err = execute(
            &mut session,
            Command::Send {
                peer: "2".into(),
                text: "hi".into(),
            },
            &mut focus,
        )
        .unwrap_err();
        assert!(err.is_missing_key());
    }

    #[test]
    fn test_focus_and_logout() {
        let mut session = ClientSession::new(MemoryKeyCache::new());
        let mut focus = None;

        execute(&mut session, Command::Focus("2".into()), &mut focus).unwrap();
        assert_eq!(focus.as_deref(), Some("2"));

        let out = execute(&mut session, Command::Logout("2".into()), &mut focus).unwrap();
        assert_eq!(
            out.outgoing,
            vec![ClientMessage::PeerLogout { to: "2".into() }]
        );
        assert!(focus.is_none());
    }

    #[test]
    fn test_close_codes() {
        let frame = |code: u16| {
            Some(CloseFrame {
                code: code.into(),
                reason: "nope".into(),
            })
        };
        assert!(closed(frame(CLOSE_NO_CREDENTIAL)).is_err());
        assert!(closed(frame(CLOSE_INVALID_CREDENTIAL)).is_err());
        assert!(closed(frame(1000)).is_ok());
        assert!(closed(None).is_ok());
    }
}
