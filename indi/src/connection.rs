//! Socket lifecycle for one INDI server connection
//!
//! Writes go through an mpsc channel drained by a single writer task, so
//! commands from any context reach the socket whole and in order. A reader
//! task forwards raw bytes to the owner as [`ConnectionEvent`]s.

use crate::config::ClientConfig;
use crate::error::{IndiError, IndiResult};
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// What the reader task observed on the socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Bytes as received, not aligned to message boundaries
    Data(Vec<u8>),
    /// The socket is gone; no further events follow
    Closed(IndiError),
}

/// Cloneable handle to the writer task of a [`Connection`]
///
/// Holding one does not borrow the client, so commands can be queued while
/// another task waits in the read loop.
#[derive(Debug, Clone)]
pub struct IndiSender {
    tx: mpsc::Sender<String>,
}

impl IndiSender {
    /// Queue one complete command for the writer task
    pub async fn send_command(&self, command: String) -> IndiResult<()> {
        self.tx.send(command).await.map_err(|e| {
            IndiError::ChannelClosed(format!(
                "Failed to send INDI command: {}. The connection may have been lost.",
                e
            ))
        })
    }

    /// True once the writer task has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct Connection {
    sender: IndiSender,
    events: mpsc::Receiver<ConnectionEvent>,
    reader: Option<JoinHandle<()>>,
    /// Dropping this stops the writer task even while senders are alive
    _stop_writer: Option<oneshot::Sender<()>>,
}

impl Connection {
    /// Connect within the configured timeout and start the I/O tasks
    pub async fn open(config: &ClientConfig) -> IndiResult<Self> {
        let addr = config.address();
        let stream = connect_within(config, TcpStream::connect(&addr)).await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY on {}: {}", addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let queue_depth = config.command_queue_depth.max(1);

        let (tx, rx) = mpsc::channel::<String>(queue_depth);
        let (stop_writer, stop_rx) = oneshot::channel();
        tokio::spawn(writer_task(write_half, rx, stop_rx));

        let (event_tx, events) = mpsc::channel(queue_depth);
        let reader = tokio::spawn(reader_task(
            read_half,
            event_tx,
            config.read_buffer_size.max(1),
        ));

        tracing::info!("Connected to INDI server at {}", addr);
        Ok(Self {
            sender: IndiSender { tx },
            events,
            reader: Some(reader),
            _stop_writer: Some(stop_writer),
        })
    }

    /// Connection over caller-supplied channels, with no socket behind it
    pub fn from_channels(
        tx: mpsc::Sender<String>,
        events: mpsc::Receiver<ConnectionEvent>,
    ) -> Self {
        Self {
            sender: IndiSender { tx },
            events,
            reader: None,
            _stop_writer: None,
        }
    }

    pub fn sender(&self) -> &IndiSender {
        &self.sender
    }

    /// Queue one complete command for the writer task
    pub async fn send(&self, command: String) -> IndiResult<()> {
        self.sender.send_command(command).await
    }

    /// Next event from the reader task, `None` once it has stopped
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // dropping `_stop_writer` ends the writer task
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Await `connect` for at most the configured connection timeout
async fn connect_within<F>(config: &ClientConfig, connect: F) -> IndiResult<TcpStream>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    let connection_timeout = config.connection_timeout();
    match timeout(connection_timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(IndiError::ConnectionFailed(format!(
            "Failed to connect to INDI server at {}: {}",
            config.address(),
            e
        ))),
        Err(_) => Err(IndiError::ConnectionTimeout {
            host: config.host.clone(),
            port: config.port,
            duration: connection_timeout,
        }),
    }
}

/// Writer task - sends commands to INDI server
async fn writer_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<String>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let cmd = tokio::select! {
            cmd = rx.recv() => cmd,
            _ = &mut stop => None,
        };
        let Some(cmd) = cmd else {
            break;
        };
        if let Err(e) = writer.write_all(cmd.as_bytes()).await {
            tracing::error!("INDI write error: {}", e);
            break;
        }
        if let Err(e) = writer.write_all(b"\n").await {
            tracing::error!("INDI write error: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Reader task - forwards socket bytes until EOF or error
async fn reader_task<R: AsyncRead + Unpin>(
    mut reader: R,
    events: mpsc::Sender<ConnectionEvent>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("INDI connection closed (EOF)");
                let _ = events
                    .send(ConnectionEvent::Closed(IndiError::ConnectionFailed(
                        "connection closed by server".to_string(),
                    )))
                    .await;
                break;
            }
            Ok(n) => {
                if events.send(ConnectionEvent::Data(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("INDI read error: {}", e);
                let _ = events.send(ConnectionEvent::Closed(e.into())).await;
                break;
            }
        }
    }
}
