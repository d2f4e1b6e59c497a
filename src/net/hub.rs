//! The relay hub.
//!
//! A single task owns the roster; connection tasks talk to it over a
//! command channel, so no lock is ever taken. Every relayed event carries
//! the id of the connection it arrived on, whatever id the peer put in it.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec;
use crate::error::NetworkError;
use crate::protocol::{Hello, ParticipantId, Pose, RosterEntry, SessionEvent};
use crate::session::DEFAULT_CODE;

enum Command {
    Register {
        outbound: UnboundedSender<SessionEvent>,
        reply: oneshot::Sender<ParticipantId>,
    },
    Relay {
        from: ParticipantId,
        event: SessionEvent,
    },
    Unregister {
        id: ParticipantId,
    },
}

struct Peer {
    outbound: UnboundedSender<SessionEvent>,
    code: String,
    pose: Pose,
}

/// Roster and clock of the hub.
struct HubState {
    next_id: u32,
    peers: BTreeMap<ParticipantId, Peer>,
    epoch: Instant,
}

impl HubState {
    fn new() -> Self {
        Self {
            next_id: 0,
            peers: BTreeMap::new(),
            epoch: Instant::now(),
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { outbound, reply } => {
                let id = self.register(outbound);
                let _ = reply.send(id);
            }
            Command::Relay { from, event } => self.relay(from, event),
            Command::Unregister { id } => self.unregister(id),
        }
    }

    fn register(&mut self, outbound: UnboundedSender<SessionEvent>) -> ParticipantId {
        let id = ParticipantId(self.next_id);
        self.next_id += 1;

        let hello = Hello {
            assigned_id: id,
            roster: self
                .peers
                .iter()
                .map(|(&id, peer)| RosterEntry {
                    id,
                    code: peer.code.clone(),
                    pose: peer.pose,
                })
                .collect(),
            clock_elapsed: self.epoch.elapsed().as_secs_f64(),
        };
        let _ = outbound.send(SessionEvent::Hello(hello));
        self.broadcast(Some(id), &SessionEvent::Join { id });

        self.peers.insert(
            id,
            Peer {
                outbound,
                code: DEFAULT_CODE.to_string(),
                pose: Pose::default(),
            },
        );
        info!(%id, peers = self.peers.len(), "peer joined");
        id
    }

    fn unregister(&mut self, id: ParticipantId) {
        if self.peers.remove(&id).is_some() {
            self.broadcast(Some(id), &SessionEvent::Leave { id });
            info!(%id, peers = self.peers.len(), "peer left");
        }
    }

    fn relay(&mut self, from: ParticipantId, event: SessionEvent) {
        let event = event.with_participant(from);
        match &event {
            SessionEvent::Code { text, .. } => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.code = text.clone();
                }
                debug!(%from, "code");
                self.broadcast(Some(from), &event);
            }
            SessionEvent::SpeakerPose { pose, .. } => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.pose = *pose;
                }
                self.broadcast(Some(from), &event);
            }
            SessionEvent::EditorState { .. } => self.broadcast(Some(from), &event),
            SessionEvent::Reset => {
                self.epoch = Instant::now();
                info!(%from, "clock reset");
                self.broadcast(None, &event);
            }
            SessionEvent::Hello(_) | SessionEvent::Join { .. } | SessionEvent::Leave { .. } => {
                warn!(%from, kind = %event.kind(), "ignoring hub-only event from peer");
            }
        }
    }

    /// Send `event` to every peer except `skip`.
    fn broadcast(&self, skip: Option<ParticipantId>, event: &SessionEvent) {
        for (&id, peer) in &self.peers {
            if Some(id) == skip {
                continue;
            }
            if peer.outbound.send(event.clone()).is_err() {
                debug!(%id, "peer writer gone");
            }
        }
    }
}

/// A running hub.
pub struct Hub {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Hub {
    /// Listen on `addr` and start accepting peers.
    pub async fn bind(addr: &str) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| NetworkError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(%local_addr, "hub listening");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(listener, cancel.clone()));
        Ok(Self {
            local_addr,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
        info!("hub stopped");
    }
}

async fn run(listener: TcpListener, cancel: CancellationToken) {
    let (commands, mut command_rx) = mpsc::unbounded_channel();
    let mut state = HubState::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(command) = command_rx.recv() => state.handle(command),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!(%peer_addr, "accepted connection");
                    tokio::spawn(serve_peer(stream, commands.clone(), cancel.child_token()));
                }
                Err(err) => warn!(%err, "accept failed"),
            },
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    commands: UnboundedSender<Command>,
    cancel: CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "could not disable nagle");
    }
    let (read, write) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    let (reply, id) = oneshot::channel();
    if commands.send(Command::Register { outbound, reply }).is_err() {
        return;
    }
    let Ok(id) = id.await else {
        return;
    };

    let writer = tokio::spawn(write_peer(FramedWrite::new(write, codec()), outbound_rx, cancel.clone()));

    let mut lines = FramedRead::new(read, codec());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => match next {
                Some(Ok(line)) => match SessionEvent::from_line(&line) {
                    Ok(event) => {
                        if commands.send(Command::Relay { from: id, event }).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%id, %err, "skipping malformed message"),
                },
                Some(Err(err)) => {
                    warn!(%id, %err, "connection error");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = commands.send(Command::Unregister { id });
    cancel.cancel();
    let _ = writer.await;
}

async fn write_peer<W>(
    mut lines: FramedWrite<W, tokio_util::codec::LinesCodec>,
    mut outbound: UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = outbound.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        match event.to_line() {
            Ok(line) => {
                if lines.send(line).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(%err, "could not encode event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn peer(state: &mut HubState) -> (ParticipantId, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (state.register(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn hello_carries_roster_and_clock() {
        let mut state = HubState::new();
        let (a, mut a_rx) = peer(&mut state);
        state.relay(
            a,
            SessionEvent::Code {
                id: ParticipantId(42),
                text: "t".into(),
            },
        );
        tokio::time::advance(std::time::Duration::from_secs(3)).await;

        let (b, mut b_rx) = peer(&mut state);
        assert_eq!(a, ParticipantId(0));
        assert_eq!(b, ParticipantId(1));

        let hello = match drain(&mut b_rx).remove(0) {
            SessionEvent::Hello(hello) => hello,
            other => panic!("expected hello, got {other:?}"),
        };
        assert_eq!(hello.assigned_id, b);
        assert_eq!(hello.roster.len(), 1);
        assert_eq!(hello.roster[0].code, "t");
        assert_eq!(hello.clock_elapsed, 3.0);

        let a_events = drain(&mut a_rx);
        assert_eq!(a_events.last(), Some(&SessionEvent::Join { id: b }));
    }

    #[test]
    fn relay_stamps_sender_and_skips_it() {
        let mut state = HubState::new();
        let (a, mut a_rx) = peer(&mut state);
        let (_b, mut b_rx) = peer(&mut state);
        drain(&mut a_rx);
        drain(&mut b_rx);

        let pose = Pose { x: 0.1, y: 0.2, angle: 0.3 };
        state.relay(a, SessionEvent::SpeakerPose { id: ParticipantId(7), pose });
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec![SessionEvent::SpeakerPose { id: a, pose }]);
        assert_eq!(state.peers[&a].pose, pose);
    }

    #[test]
    fn reset_is_echoed_to_everyone() {
        let mut state = HubState::new();
        let (a, mut a_rx) = peer(&mut state);
        let (_b, mut b_rx) = peer(&mut state);
        drain(&mut a_rx);
        drain(&mut b_rx);

        state.relay(a, SessionEvent::Reset);
        assert_eq!(drain(&mut a_rx), vec![SessionEvent::Reset]);
        assert_eq!(drain(&mut b_rx), vec![SessionEvent::Reset]);
    }

    #[test]
    fn leave_is_broadcast_and_ids_are_not_reused() {
        let mut state = HubState::new();
        let (a, _a_rx) = peer(&mut state);
        let (_b, mut b_rx) = peer(&mut state);
        drain(&mut b_rx);

        state.unregister(a);
        assert_eq!(drain(&mut b_rx), vec![SessionEvent::Leave { id: a }]);
        let (c, _c_rx) = peer(&mut state);
        assert_eq!(c, ParticipantId(2));
    }
}
