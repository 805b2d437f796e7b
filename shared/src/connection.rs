//! Framed message transport over one TCP stream.
//!
//! A [`Connection`] hides partial reads and writes behind whole-message
//! `send`/`receive` calls. Peer resets and broken pipes surface as
//! [`ConnectionError::Lost`] so callers can route them into their disconnect
//! handling instead of treating them as generic I/O failures.

use crate::{decode, encode, Message, ProtocolError};
use log::{debug, warn};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer reset or abandoned the stream. A normal lifecycle event,
    /// not a bug.
    #[error("connection lost")]
    Lost,
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

fn classify(err: io::Error) -> ConnectionError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ConnectionError::Lost,
        _ => ConnectionError::Io(err),
    }
}

/// Receiving half of a connection. Owned by exactly one task.
pub struct ConnectionReader {
    reader: BufReader<OwnedReadHalf>,
}

impl ConnectionReader {
    /// Blocks until one whole decodable frame is available.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream. Malformed lines are
    /// logged and discarded without dropping the stream; frames with an
    /// unrecognized `type` are skipped the same way.
    pub async fn receive(&mut self) -> Result<Option<Message>, ConnectionError> {
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await.map_err(classify)?;
            if read == 0 {
                return Ok(None);
            }

            match decode(&line) {
                Ok(Message::Unknown) => {
                    debug!("Ignoring frame with unknown message type");
                }
                Ok(message) => return Ok(Some(message)),
                Err(err) => warn!("Discarding malformed frame: {}", err),
            }
        }
    }
}

/// Sending half of a connection. Owned by exactly one task, which serializes
/// all writes and keeps message boundaries intact.
pub struct ConnectionWriter {
    writer: OwnedWriteHalf,
}

impl ConnectionWriter {
    /// Encodes and transmits one whole frame.
    pub async fn send(&mut self, message: &Message) -> Result<(), ConnectionError> {
        let line = encode(message)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(classify)?;
        self.writer.flush().await.map_err(classify)?;
        Ok(())
    }

    /// Closes the write direction. Idempotent; errors are ignored because the
    /// peer may already be gone.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// One bidirectional message stream over TCP.
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        Connection {
            reader: ConnectionReader {
                reader: BufReader::new(read_half),
            },
            writer: ConnectionWriter { writer: write_half },
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ConnectionError> {
        self.writer.send(message).await
    }

    pub async fn receive(&mut self) -> Result<Option<Message>, ConnectionError> {
        self.reader.receive().await
    }

    /// Splits into independently owned halves so sending and receiving can
    /// run concurrently on separate tasks.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}
