//! Interactive input commands

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open (or reuse) a secret chat
    Chat(String),
    Accept(String),
    Decline(String),
    /// Leave a secret chat, discarding its key and history
    Logout(String),
    Send { peer: String, text: String },
    /// Switch the default recipient for bare lines
    Focus(String),
    Pending,
    History(String),
    Whoami,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(String);

pub const HELP: &str = "\
/chat <id>          start a secret chat (reuses a cached key)
/accept <id>        accept a pending request
/decline <id>       decline a pending request
/logout <id>        leave a secret chat
/msg <id> <text>    send a message
/to <id>            send bare lines to <id>
/pending            list pending requests
/history <id>       show this session's messages with <id>
/whoami             show your identity
/quit               exit";

/// Parse one input line. Bare text goes to `focus`, if any.
pub fn parse(line: &str, focus: Option<&str>) -> Result<Command, ParseError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return match focus {
            Some(peer) => Ok(Command::Send {
                peer: peer.to_string(),
                text: line.to_string(),
            }),
            None => Err(ParseError(
                "no chat selected, use /to <id> or /msg <id> <text>".to_string(),
            )),
        };
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "chat" | "dh" => peer_arg(name, args).map(Command::Chat),
        "accept" => peer_arg(name, args).map(Command::Accept),
        "decline" => peer_arg(name, args).map(Command::Decline),
        "logout" => peer_arg(name, args).map(Command::Logout),
        "to" => peer_arg(name, args).map(Command::Focus),
        "history" => peer_arg(name, args).map(Command::History),
        "msg" => {
            let (peer, text) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| ParseError("usage: /msg <id> <text>".to_string()))?;
            Ok(Command::Send {
                peer: peer.to_string(),
                text: text.trim_start().to_string(),
            })
        }
        "pending" => Ok(Command::Pending),
        "whoami" => Ok(Command::Whoami),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError(format!("unknown command /{}", other))),
    }
}

fn peer_arg(name: &str, args: &str) -> Result<String, ParseError> {
    let mut parts = args.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(peer), None) => Ok(peer.to_string()),
        _ => Err(ParseError(format!("usage: /{} <id>", name))),
    }
}
