//! Console command parsing.

use mobilelink_protocol::constants::DEFAULT_PORT;

pub const HELP: &str = "\
commands:
  connect [host] [port]  connect to a hub (defaults: last address, port 11011)
  files                  request every file the hub serves
  chat <text>            send a chat message
  quality <0.0-1.0>      report network quality
  status                 show the session state
  exit                   close the session and quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `None` fields fall back to the saved address, then the default port.
    Connect {
        host: Option<String>,
        port: Option<u16>,
    },
    Files,
    Chat(String),
    Quality(f64),
    Status,
    Help,
    Exit,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid port: {0}")]
    Port(String),

    #[error("invalid quality: {0}")]
    Quality(String),
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "connect" => {
            let mut args = rest.split_whitespace();
            let host = args.next().map(str::to_string);
            let port = match args.next() {
                Some(p) => Some(p.parse().map_err(|_| ParseError::Port(p.to_string()))?),
                None => None,
            };
            if args.next().is_some() {
                return Err(ParseError::Usage("connect [host] [port]"));
            }
            Command::Connect { host, port }
        }
        "files" => Command::Files,
        "chat" => {
            if rest.is_empty() {
                return Err(ParseError::Usage("chat <text>"));
            }
            Command::Chat(rest.to_string())
        }
        "quality" => {
            let q: f64 = rest
                .parse()
                .map_err(|_| ParseError::Quality(rest.to_string()))?;
            if !q.is_finite() {
                return Err(ParseError::Quality(rest.to_string()));
            }
            Command::Quality(q)
        }
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Formats a hub address for the address store. IPv6 hosts are bracketed.
pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Splits a stored address into host and port. A missing port means
/// [`DEFAULT_PORT`].
pub fn parse_address(address: &str) -> (String, u16) {
    if let Some(rest) = address.strip_prefix('[')
        && let Some((host, tail)) = rest.split_once(']')
    {
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        return (host.to_string(), port);
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), DEFAULT_PORT),
        },
        _ => (address.to_string(), DEFAULT_PORT),
    }
}
