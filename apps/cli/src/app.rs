//! Console loop: reads commands from stdin and drains session events
//! into the file assembler.

use std::sync::Arc;

use mobilelink_client::{
    AddressStore, ConnectionSession, DirectorySink, FileTransferAssembler, SessionConfig,
    SessionEvent, Sink, TransferEvent,
};
use mobilelink_protocol::constants::{DEFAULT_PORT, MessageType};
use mobilelink_protocol::envelope::Envelope;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::command::{self, Command, HELP};

const DOWNLOAD_DIR: &str = "./Downloads";

pub async fn run() -> anyhow::Result<()> {
    let session = Arc::new(ConnectionSession::new(SessionConfig::default()));
    let store = AddressStore::open_default();

    let events = session
        .take_events()
        .await
        .ok_or_else(|| anyhow::anyhow!("session events already taken"))?;
    let assembler = FileTransferAssembler::new(DirectorySink::new(DOWNLOAD_DIR));
    let drain = tokio::spawn(drain_events(events, assembler));

    println!("MobileLink console. {HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            Command::Connect { host, port } => {
                let (host, port) = match host {
                    Some(host) => (host, port.unwrap_or(DEFAULT_PORT)),
                    None => match saved_address(store.as_ref()) {
                        Some((saved_host, saved_port)) => (saved_host, port.unwrap_or(saved_port)),
                        None => {
                            println!("no saved address; use `connect <host> [port]`");
                            continue;
                        }
                    },
                };
                spawn_connect(Arc::clone(&session), store.clone(), host, port);
            }
            Command::Files => report(session.request_files().await, "file request sent"),
            Command::Chat(text) => report(session.send_chat(&text).await, "sent"),
            Command::Quality(q) => report(
                session.report_network_quality(q).await,
                "network quality reported",
            ),
            Command::Status => {
                let state = session.state().await;
                match session.target() {
                    Some((host, port)) => println!("{state:?} ({host}:{port})"),
                    None => println!("{state:?}"),
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Exit => break,
        }
    }

    session.close().await;
    // The channel closes once every sender is gone; don't wait on pumps.
    drain.abort();
    Ok(())
}

fn saved_address(store: Option<&AddressStore>) -> Option<(String, u16)> {
    match store?.load() {
        Ok(address) => address.as_deref().map(command::parse_address),
        Err(e) => {
            tracing::warn!("failed to load saved address: {e}");
            None
        }
    }
}

fn spawn_connect(
    session: Arc<ConnectionSession>,
    store: Option<AddressStore>,
    host: String,
    port: u16,
) {
    println!("connecting to {host}:{port}...");
    tokio::spawn(async move {
        match session.connect(&host, port).await {
            Ok(()) => {
                println!("connected to {host}:{port}");
                if let Some(store) = store
                    && let Err(e) = store.save(&command::format_address(&host, port))
                {
                    tracing::warn!("failed to save address: {e}");
                }
            }
            Err(e) => println!("connect failed: {e}"),
        }
    });
}

fn report<T, E: std::fmt::Display>(result: Result<T, E>, ok: &str) {
    match result {
        Ok(_) => println!("{ok}"),
        Err(e) => println!("send failed: {e}"),
    }
}

async fn drain_events(
    mut events: mpsc::Receiver<SessionEvent>,
    mut assembler: FileTransferAssembler<DirectorySink>,
) {
    let mut last_tenth = 0u32;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(envelope) => {
                if envelope.msg_type.is_file_transfer() {
                    let (returned, transfer) = match handle_transfer(assembler, envelope).await {
                        Ok(handled) => handled,
                        Err(e) => {
                            tracing::error!("file handling task failed: {e}");
                            (
                                FileTransferAssembler::new(DirectorySink::new(DOWNLOAD_DIR)),
                                None,
                            )
                        }
                    };
                    assembler = returned;
                    if let Some(transfer) = transfer {
                        print_transfer(&transfer, &mut last_tenth);
                    }
                } else if envelope.msg_type == MessageType::Chat {
                    println!("hub: {}", envelope.content_str().unwrap_or_default());
                } else {
                    tracing::debug!(msg_type = %envelope.msg_type, "message");
                }
            }
            SessionEvent::Disconnected => println!("connection lost"),
            SessionEvent::Reconnecting => println!("reconnecting..."),
            SessionEvent::ConnectAttemptFailed { attempt, error } => {
                println!("attempt {attempt} failed: {error}");
            }
            SessionEvent::StateChanged(state) => tracing::debug!(?state, "state changed"),
            SessionEvent::Connected | SessionEvent::SendComplete { .. } => {}
        }
    }
}

/// Feeds one envelope to the assembler.
///
/// `file_end` hands the whole file to the synchronous sink, so it runs on
/// the blocking pool.
async fn handle_transfer<S>(
    mut assembler: FileTransferAssembler<S>,
    envelope: Envelope,
) -> Result<(FileTransferAssembler<S>, Option<TransferEvent>), tokio::task::JoinError>
where
    S: Sink + Send + 'static,
{
    if envelope.msg_type != MessageType::FileEnd {
        let transfer = assembler.handle(&envelope);
        return Ok((assembler, transfer));
    }
    tokio::task::spawn_blocking(move || {
        let transfer = assembler.handle(&envelope);
        (assembler, transfer)
    })
    .await
}

fn print_transfer(event: &TransferEvent, last_tenth: &mut u32) {
    match event {
        TransferEvent::Started { filename, size } => {
            *last_tenth = 0;
            println!("receiving {filename} ({size} bytes)");
        }
        TransferEvent::Progress { filename, .. } => {
            let tenth = (event.fraction().unwrap_or(0.0) * 10.0).floor() as u32;
            if tenth > *last_tenth {
                *last_tenth = tenth;
                println!("  {filename}: {}%", tenth.min(10) * 10);
            }
        }
        TransferEvent::Completed {
            filename,
            size,
            verified,
        } => {
            if *verified {
                println!("saved {filename} ({size} bytes)");
            } else {
                println!("saved {filename} ({size} bytes, size mismatch)");
            }
        }
        TransferEvent::Rejected { filename, size } => {
            println!("refused {filename}: {size} bytes is over the limit");
        }
        TransferEvent::Discarded { filename, reason } => {
            println!("discarded {filename}: {reason}");
        }
        TransferEvent::ChunkDropped { reason } => tracing::warn!("chunk dropped: {reason}"),
        TransferEvent::SinkFailed { filename, error } => {
            println!("could not save {filename}: {error}");
        }
    }
}
