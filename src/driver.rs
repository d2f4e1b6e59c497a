//! The control loop.
//!
//! A [`Driver`] owns the [`Session`] and runs everything that touches it on
//! one task: user commands, events from the hub, the outbound sync tick,
//! playback deadlines and the audio pump that keeps the router a few blocks
//! ahead of the output device.
//!
//! ```no_run
//! # async fn demo() {
//! use kilobeat::{driver::{Command, Driver}, KilobeatConfig, Router, Session};
//!
//! let config = KilobeatConfig::default();
//! let session = Session::new(Router::new(config.audio.sample_rate));
//! let (commands, rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! commands.send(Command::SetCode("sin(2*pi*440*t)".into())).unwrap();
//! commands.send(Command::Run).unwrap();
//! Driver::new(session, config).run(rx).await;
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use dasp_graph::Buffer;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::KilobeatConfig;
use crate::error::{NetworkError, SessionError};
use crate::net::{self, Connection, Inbound};
use crate::protocol::{ParticipantId, Pose};
use crate::recording::Recording;
use crate::session::Session;

/// Blocks rendered ahead of the wall clock.
pub const LOOKAHEAD_BLOCKS: u64 = 4;

/// Most blocks rendered in one pump. Beyond this the pump skips ahead.
pub const MAX_CATCH_UP_BLOCKS: u64 = 64;

const PUMP_PERIOD: Duration = Duration::from_millis(2);

/// Something the user asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Replace the selected participant's editor text.
    SetCode(String),
    /// Run what the selected participant's editor holds.
    Run,
    /// Load a preset into the selected editor.
    Preset(String),
    Select(ParticipantId),
    AddLocal,
    /// Move the selected participant's speaker.
    Pose(Pose),
    Reset,
    Volume(f64),
    Record,
    /// Stop recording and save it.
    Stop(PathBuf),
    Play(PathBuf),
    /// Connect to the given hub, or the configured one.
    Connect(Option<String>),
    Disconnect,
    Shutdown,
}

type ConnectResult = Result<(Connection, UnboundedReceiver<Inbound>), NetworkError>;

struct Link {
    connection: Connection,
    inbound: UnboundedReceiver<Inbound>,
}

/// Runs a session against real time.
pub struct Driver {
    session: Session,
    config: KilobeatConfig,

    link: Option<Link>,
    connecting: Option<oneshot::Receiver<ConnectResult>>,

    pump_start: Instant,
    skipped_blocks: u64,
}

impl Driver {
    pub fn new(session: Session, config: KilobeatConfig) -> Self {
        Self {
            session,
            config,
            link: None,
            connecting: None,
            pump_start: Instant::now(),
            skipped_blocks: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Render every block that is due and pick up any faults.
    ///
    /// Returns the number of blocks rendered.
    pub fn pump(&mut self) -> u64 {
        let rate = f64::from(self.session.router().sample_rate());
        let due = (self.pump_start.elapsed().as_secs_f64() * rate / Buffer::LEN as f64) as u64
            + LOOKAHEAD_BLOCKS;
        let done = self.session.router().blocks_processed() + self.skipped_blocks;

        let mut todo = due.saturating_sub(done);
        if todo > MAX_CATCH_UP_BLOCKS {
            warn!(behind = todo, "audio fell behind, skipping ahead");
            self.skipped_blocks += todo - MAX_CATCH_UP_BLOCKS;
            todo = MAX_CATCH_UP_BLOCKS;
        }
        for _ in 0..todo {
            self.session.router_mut().process();
        }
        if todo > 0 {
            self.session.check_faults();
        }
        todo
    }

    /// Apply one command. Returns `false` once the loop should stop.
    pub async fn apply(&mut self, command: Command) -> Result<bool, SessionError> {
        debug!(?command, "command");
        match command {
            Command::SetCode(text) => {
                let id = self.session.selected();
                self.session.edit(id)?.set_value(&text);
            }
            Command::Run => {
                let id = self.session.selected();
                self.session.run(id)?;
            }
            Command::Preset(name) => self.session.apply_preset(&name)?,
            Command::Select(id) => self.session.select(id)?,
            Command::AddLocal => {
                let id = self.session.add_local_participant()?;
                self.session.select(id)?;
            }
            Command::Pose(pose) => self.session.pointer_moved(pose),
            Command::Reset => self.session.request_reset(),
            Command::Volume(frac) => self.session.set_volume(frac),
            Command::Record => self.session.start_recording()?,
            Command::Stop(path) => match self.session.stop_recording() {
                Some(recording) => {
                    recording.save(&path)?;
                    info!(path = %path.display(), events = recording.events.len(), "recording saved");
                }
                None => warn!("not recording"),
            },
            Command::Play(path) => {
                let recording = Recording::load(&path)?;
                self.session.play(recording)?;
            }
            Command::Connect(addr) => self.start_connect(addr)?,
            Command::Disconnect => self.disconnect().await,
            Command::Shutdown => {
                self.disconnect().await;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn start_connect(&mut self, addr: Option<String>) -> Result<(), SessionError> {
        self.session.begin_connect()?;
        let addr = addr.unwrap_or_else(|| self.config.network.server.clone());
        let timeout = self.config.sync.connect_timeout();
        info!(%addr, "connecting to hub");

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(net::connect(&addr, timeout).await);
        });
        self.connecting = Some(rx);
        Ok(())
    }

    fn connect_finished(&mut self, result: ConnectResult) {
        match result {
            Ok((connection, inbound)) => {
                self.session.connected(connection.sender());
                self.link = Some(Link { connection, inbound });
            }
            Err(err) => self.session.connect_failed(&err),
        }
    }

    fn inbound(&mut self, inbound: Option<Inbound>) {
        match inbound {
            Some(Inbound::Event(event)) => self.session.handle_network(event),
            Some(Inbound::Closed(err)) => {
                self.link = None;
                self.session.connect_failed(&err);
            }
            None => {
                self.link = None;
                self.session.connect_failed(&NetworkError::Closed);
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connecting = None;
        if let Some(link) = self.link.take() {
            link.connection.disconnect().await;
        }
        if self.session.connection() != crate::session::ConnectionState::Disconnected {
            self.session.disconnect();
        }
    }

    /// Run until [`Command::Shutdown`] or until every command sender is gone.
    pub async fn run(mut self, mut commands: UnboundedReceiver<Command>) -> Session {
        let mut sync = tokio::time::interval(self.config.sync.interval());
        sync.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pump = tokio::time::interval(PUMP_PERIOD);
        pump.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(sample_rate = self.session.router().sample_rate(), "control loop started");
        loop {
            let deadline = self.session.next_playback_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.disconnect().await;
                        break;
                    };
                    match self.apply(command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => warn!(%err, "command failed"),
                    }
                }
                result = connect_result(&mut self.connecting) => {
                    self.connecting = None;
                    self.connect_finished(result);
                }
                inbound = next_inbound(&mut self.link) => self.inbound(inbound),
                _ = sleep_until(deadline) => {
                    self.session.poll_playback();
                }
                _ = sync.tick() => {
                    self.session.sync_tick();
                }
                _ = pump.tick() => {
                    self.pump();
                }
            }
        }
        info!("control loop stopped");
        self.session
    }
}

/// A command channel and the loop future that serves it.
pub fn command_channel(
    driver: Driver,
) -> (UnboundedSender<Command>, impl std::future::Future<Output = Session>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (tx, driver.run(rx))
}

async fn connect_result(pending: &mut Option<oneshot::Receiver<ConnectResult>>) -> ConnectResult {
    match pending {
        Some(rx) => rx.await.unwrap_or(Err(NetworkError::Closed)),
        None => std::future::pending().await,
    }
}

async fn next_inbound(link: &mut Option<Link>) -> Option<Inbound> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
