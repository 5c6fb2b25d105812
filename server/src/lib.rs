//! Line-delimited JSON front end over stdio.
//!
//! This is the transport-facing edge of the service: an upstream bridge
//! (websocket terminator, HTTP gateway) authenticates actors and speaks
//! this protocol one JSON object per line. Room events fan out as
//! `{to, event}` lines so the bridge can route them to the right
//! connection.

#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::io::Result as IoResult;
use std::sync::Arc;

use huddle_core::ExecutionManager;
use huddle_core::RoomCoordinator;
use huddle_core::chat_log::MemoryChatLog;
use huddle_core::config::Config;
use huddle_core::config::ConfigOverrides;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;

mod message_processor;
mod outgoing_message;

use crate::message_processor::MessageProcessor;
use crate::outgoing_message::OutgoingMessage;
use crate::outgoing_message::OutgoingMessageSender;

/// Size of the bounded channels used to communicate between tasks.
const CHANNEL_CAPACITY: usize = 128;

pub async fn run_main() -> IoResult<()> {
    // Install a simple subscriber so `tracing` output is visible. Users
    // can control the log level with `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_with_overrides(ConfigOverrides::default())?;
    run_with_config(config).await
}

pub async fn run_with_config(config: Config) -> IoResult<()> {
    let rooms = Arc::new(RoomCoordinator::new(Arc::new(MemoryChatLog::new())));
    let manager = Arc::new(ExecutionManager::new(config, rooms.clone()));

    let (incoming_tx, mut incoming_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OutgoingMessage>(CHANNEL_CAPACITY);

    // Task: read lines from stdin, push to `incoming_tx`.
    let stdin_reader_handle = tokio::spawn(async move {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await.unwrap_or_default() {
            if line.trim().is_empty() {
                continue;
            }
            if incoming_tx.send(line).await.is_err() {
                // Receiver gone; nothing left to do.
                break;
            }
        }

        debug!("stdin reader finished (EOF)");
    });

    // Task: process incoming messages.
    let processor_handle = tokio::spawn({
        let processor = MessageProcessor::new(
            Arc::new(OutgoingMessageSender::new(outgoing_tx.clone())),
            manager,
            rooms,
        );
        async move {
            while let Some(line) = incoming_rx.recv().await {
                processor.process(&line).await;
            }

            info!("processor task exited (channel closed)");
        }
    });

    // Task: write outgoing messages to stdout.
    let stdout_writer_handle = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(message) = outgoing_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if let Err(e) = stdout.write_all(json.as_bytes()).await {
                        error!("failed to write to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.write_all(b"\n").await {
                        error!("failed to write newline to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.flush().await {
                        error!("failed to flush stdout: {e}");
                        break;
                    }
                }
                Err(e) => error!("failed to serialize outgoing message: {e}"),
            }
        }

        info!("stdout writer exited (channel closed)");
    });

    // The typical exit path is the stdin reader hitting EOF which, once it
    // drops `incoming_tx`, propagates shutdown to the processor and then
    // to the stdout task.
    let _ = tokio::join!(stdin_reader_handle, processor_handle, stdout_writer_handle);

    Ok(())
}
