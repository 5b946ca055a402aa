//! Interactive commands read from stdin while a transfer runs.

use tokio::io::{AsyncBufReadExt, BufReader};
use trickle_protocol::ResumeTransferRequest;
use trickle_transfer::{CommandDispatcher, TransferError};

use crate::progress::render;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pause,
    Resume(Option<i64>),
    Cancel,
    Status,
    List,
    Help,
}

pub const HELP: &str = "commands: p[ause] | r[esume] [rate] | c[ancel] | s[tatus] | l[ist] | h[elp]";

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(format!("too many arguments: {line}"));
    }

    let cmd = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("p" | "pause", None) => Command::Pause,
        ("r" | "resume", None) => Command::Resume(None),
        ("r" | "resume", Some(rate)) => {
            let rate = rate
                .parse::<i64>()
                .map_err(|_| format!("invalid rate: {rate}"))?;
            Command::Resume(Some(rate))
        }
        ("c" | "cancel", None) => Command::Cancel,
        ("s" | "status", None) => Command::Status,
        ("l" | "list", None) => Command::List,
        ("h" | "help" | "?", None) => Command::Help,
        _ => return Err(format!("unknown command: {line}")),
    };
    Ok(Some(cmd))
}

/// Applies `cmd` to transfer `id` and returns a line to show the user.
pub fn apply(
    dispatcher: &CommandDispatcher,
    id: &str,
    cmd: Command,
) -> Result<String, TransferError> {
    let out = match cmd {
        Command::Pause => format!("status: {}", dispatcher.pause(id)?.status),
        Command::Resume(target_rate) => {
            let resp = dispatcher.resume(id, ResumeTransferRequest { target_rate })?;
            format!("status: {} (target {} B/s)", resp.status, resp.target_rate)
        }
        Command::Cancel => format!("status: {}", dispatcher.cancel(id)?.status),
        Command::Status => render(&dispatcher.status(id)?),
        Command::List => dispatcher
            .list()
            .transfers
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join("\n"),
        Command::Help => HELP.to_string(),
    };
    Ok(out)
}

/// Reads commands from stdin until EOF.
pub async fn read_commands(dispatcher: CommandDispatcher, id: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => match apply(&dispatcher, &id, cmd) {
                Ok(out) => eprintln!("{out}"),
                Err(e) => eprintln!("error: {e}"),
            },
            Ok(None) => {}
            Err(msg) => eprintln!("{msg}\n{HELP}"),
        }
    }
}
