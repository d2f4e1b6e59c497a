//! Peer side of the connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec;
use crate::error::NetworkError;
use crate::protocol::SessionEvent;

/// What the reader task delivers to the control loop.
#[derive(Debug)]
pub enum Inbound {
    Event(SessionEvent),
    /// The connection ended. Nothing follows.
    Closed(NetworkError),
}

/// A live connection to the hub.
///
/// Dropping it, or calling [`disconnect`](Self::disconnect), cancels both
/// tasks. No [`Inbound::Closed`] is delivered for a cancelled connection.
pub struct Connection {
    outbound: UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Dial `addr`, giving up after `timeout`.
///
/// Returns the connection and the stream of events from the hub.
pub async fn connect(
    addr: &str,
    timeout: Duration,
) -> Result<(Connection, UnboundedReceiver<Inbound>), NetworkError> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(NetworkError::Connect {
                addr: addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(NetworkError::Timeout {
                addr: addr.to_string(),
            })
        }
    };
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "could not disable nagle");
    }
    info!(%addr, "connected to hub");

    let (read, write) = stream.into_split();
    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(read_loop(
        FramedRead::new(read, codec()),
        inbound_tx.clone(),
        cancel.clone(),
    ));
    let writer = tokio::spawn(write_loop(
        FramedWrite::new(write, codec()),
        outbound_rx,
        inbound_tx,
        cancel.clone(),
    ));

    Ok((
        Connection {
            outbound,
            cancel,
            reader,
            writer,
        },
        inbound_rx,
    ))
}

async fn read_loop<R>(
    mut lines: FramedRead<R, tokio_util::codec::LinesCodec>,
    inbound: UnboundedSender<Inbound>,
    cancel: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = lines.next() => match next {
                Some(Ok(line)) => match SessionEvent::from_line(&line) {
                    Ok(event) => {
                        if inbound.send(Inbound::Event(event)).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(%err, "skipping malformed message"),
                },
                Some(Err(err)) => break NetworkError::Codec(err),
                None => break NetworkError::Closed,
            },
        }
    };
    if !cancel.is_cancelled() {
        let _ = inbound.send(Inbound::Closed(reason));
    }
}

async fn write_loop<W>(
    mut lines: FramedWrite<W, tokio_util::codec::LinesCodec>,
    mut outbound: UnboundedReceiver<SessionEvent>,
    inbound: UnboundedSender<Inbound>,
    cancel: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = outbound.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        let line = match event.to_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, kind = %event.kind(), "could not encode event");
                continue;
            }
        };
        if let Err(err) = lines.send(line).await {
            if !cancel.is_cancelled() {
                let _ = inbound.send(Inbound::Closed(NetworkError::Codec(err)));
            }
            return;
        }
    }
}

impl Connection {
    /// Where the session queues events for the hub.
    pub fn sender(&self) -> UnboundedSender<SessionEvent> {
        self.outbound.clone()
    }

    /// Queue one event for the hub.
    pub fn send(&self, event: SessionEvent) -> Result<(), NetworkError> {
        self.outbound.send(event).map_err(|_| NetworkError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_finished() || self.writer.is_finished()
    }

    /// Close the connection and wait for both tasks to stop.
    pub async fn disconnect(mut self) {
        self.cancel.cancel();
        let reader = &mut self.reader;
        let writer = &mut self.writer;
        let _ = tokio::join!(reader, writer);
        info!("disconnected from hub");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
