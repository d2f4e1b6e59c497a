//! Event-sourced session state.
//!
//! A [`Session`] owns every participant, the router that plays them, the
//! shared clock, the connection state and any running recording or
//! playback. Everything that changes a participant goes through
//! [`Session::dispatch`] as a [`SessionEvent`], whether it was typed locally,
//! received from the hub, or replayed from a recording. Local actions are
//! applied at once and additionally forwarded to the hub while connected, so
//! the local participant behaves the same online and offline.

mod editor;
mod participant;

use core::fmt;
use std::collections::BTreeMap;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::clock::SessionClock;
use crate::config::DisplayConfig;
use crate::error::{NetworkError, RecordingError, SessionError};
use crate::nodes::GeneratorUnit;
use crate::program;
use crate::protocol::{EditorState, Hello, ParticipantId, Pose, SessionEvent};
use crate::recording::{Playback, Recorder, Recording};
use crate::router::Router;

pub use editor::{EditorSurface, TextBuffer};
pub use participant::{Locality, Participant, DEFAULT_CODE};

/// Builds the editor for each new participant.
pub type EditorFactory = Box<dyn Fn(ParticipantId) -> Box<dyn EditorSurface> + Send>;

type Observer = Box<dyn FnMut(&SessionEvent) + Send>;

/// What the connection indicator shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Offline,
    Connecting,
    Connected(ParticipantId),
    Timeout,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Offline => f.write_str("You are offline. To play with others, join a server."),
            Status::Connecting => f.write_str("Connecting..."),
            Status::Connected(id) => write!(f, "Connected. You are player {}.", id.0),
            Status::Timeout => f.write_str("Connection timed out."),
            Status::Error => f.write_str("Connection error."),
        }
    }
}

/// Where the session is in its connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Joined(ParticipantId),
}

/// A short-lived per-participant indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flash {
    /// Code compiled and is now playing.
    Ran,
    /// Code failed to compile, or the running unit faulted.
    Error,
}

/// The session coordinator. Lives on the control thread.
pub struct Session {
    local_id: ParticipantId,
    next_local_id: u32,
    participants: BTreeMap<ParticipantId, Participant>,
    selected: ParticipantId,

    router: Router,
    clock: SessionClock,

    connection: ConnectionState,
    status: Status,
    link: Option<UnboundedSender<SessionEvent>>,

    recorder: Option<Recorder>,
    playback: Option<Playback>,

    flashes: HashMap<ParticipantId, (Flash, Instant)>,
    display: DisplayConfig,
    observers: Vec<Observer>,
    editor_factory: Option<EditorFactory>,
}

impl Session {
    /// A fresh offline session with one local participant.
    pub fn new(router: Router) -> Self {
        let mut session = Self {
            local_id: ParticipantId(0),
            next_local_id: 0,
            participants: BTreeMap::new(),
            selected: ParticipantId(0),
            router,
            clock: SessionClock::new(),
            connection: ConnectionState::Disconnected,
            status: Status::Offline,
            link: None,
            recorder: None,
            playback: None,
            flashes: HashMap::new(),
            display: DisplayConfig::default(),
            observers: Vec::new(),
            editor_factory: None,
        };
        session.reset_players(ParticipantId(0));
        session
    }

    pub fn with_display(mut self, display: DisplayConfig) -> Self {
        self.display = display;
        self
    }

    /// Use `factory` for every participant created from now on, and rebuild
    /// the current roster with it.
    pub fn with_editor_factory(mut self, factory: EditorFactory) -> Self {
        self.editor_factory = Some(factory);
        let local = self.local_id;
        self.reset_players(local);
        self
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// All participants, ordered by id.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Call `observer` after every dispatched event has been applied.
    pub fn on_dispatch(&mut self, observer: impl FnMut(&SessionEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    // -- roster ------------------------------------------------------------

    fn create_participant(&mut self, id: ParticipantId, locality: Locality) -> &mut Participant {
        if !self.participants.contains_key(&id) {
            self.router.add_voice(id, Pose::default());
            debug!(%id, ?locality, "participant created");
        }
        let factory = &self.editor_factory;
        self.participants.entry(id).or_insert_with(|| match factory {
            Some(factory) => Participant::with_editor(id, locality, factory(id)),
            None => Participant::new(id, locality),
        })
    }

    fn delete_participant(&mut self, id: ParticipantId) -> bool {
        self.flashes.remove(&id);
        self.router.remove_voice(id);
        let removed = self.participants.remove(&id).is_some();
        if removed {
            debug!(%id, "participant removed");
        }
        removed
    }

    /// Tear every participant down and start over with one blank local one.
    fn reset_players(&mut self, local: ParticipantId) {
        let ids: Vec<_> = self.participants.keys().copied().collect();
        for id in ids {
            self.delete_participant(id);
        }
        self.local_id = local;
        self.selected = local;
        self.next_local_id = local.0 + 1;
        self.create_participant(local, Locality::Local);
    }

    /// Add another local participant. Only while offline.
    pub fn add_local_participant(&mut self) -> Result<ParticipantId, SessionError> {
        if self.connection != ConnectionState::Disconnected {
            return Err(SessionError::OfflineOnly);
        }
        if self.is_playing() {
            return Err(SessionError::Busy("playback in progress"));
        }
        while self.participants.contains_key(&ParticipantId(self.next_local_id)) {
            self.next_local_id += 1;
        }
        let id = ParticipantId(self.next_local_id);
        self.next_local_id += 1;
        self.create_participant(id, Locality::Local);
        Ok(id)
    }

    /// Remove an extra local participant. Remote ones leave through the hub.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Result<(), SessionError> {
        let participant = self
            .participants
            .get(&id)
            .ok_or(SessionError::UnknownParticipant(id))?;
        if id == self.local_id {
            return Err(SessionError::Busy("the primary local participant cannot be removed"));
        }
        if !participant.is_local() {
            return Err(SessionError::Busy("remote participants leave through the hub"));
        }
        self.delete_participant(id);
        if self.selected == id {
            self.selected = self.local_id;
        }
        Ok(())
    }

    /// Choose the participant that pointer and preset actions act on.
    pub fn select(&mut self, id: ParticipantId) -> Result<(), SessionError> {
        if !self.participants.contains_key(&id) {
            return Err(SessionError::UnknownParticipant(id));
        }
        self.selected = id;
        Ok(())
    }

    pub fn selected(&self) -> ParticipantId {
        self.selected
    }

    /// The editor of `id`.
    pub fn edit(&mut self, id: ParticipantId) -> Result<&mut dyn EditorSurface, SessionError> {
        self.participants
            .get_mut(&id)
            .map(|p| p.editor_mut())
            .ok_or(SessionError::UnknownParticipant(id))
    }

    /// Load a preset into the selected participant's editor. Does not run it.
    pub fn apply_preset(&mut self, name: &str) -> Result<(), SessionError> {
        let preset =
            program::preset(name).ok_or_else(|| SessionError::UnknownPreset(name.to_string()))?;
        let selected = self.selected;
        self.edit(selected)?.set_value(preset.code);
        Ok(())
    }

    // -- local actions -----------------------------------------------------

    /// The Run action: send whatever `id`'s editor holds as its new code.
    pub fn run(&mut self, id: ParticipantId) -> Result<(), SessionError> {
        let text = self
            .participants
            .get(&id)
            .ok_or(SessionError::UnknownParticipant(id))?
            .editor()
            .content();
        self.emit(SessionEvent::Code { id, text });
        Ok(())
    }

    /// Move the selected participant's speaker.
    ///
    /// The pose is applied at once and sent by the next [`sync_tick`](Self::sync_tick).
    pub fn pointer_moved(&mut self, pose: Pose) {
        let id = self.selected;
        let Some(participant) = self.participants.get_mut(&id) else {
            return;
        };
        participant.pose = pose;
        self.router.set_pose(id, pose);
    }

    /// Re-zero the shared clock everywhere.
    ///
    /// Offline the reset applies at once. While connected it only goes to the
    /// hub, which echoes it to every peer including this one.
    pub fn request_reset(&mut self) {
        match &self.link {
            Some(link) => {
                if link.send(SessionEvent::Reset).is_err() {
                    warn!("connection writer gone, reset dropped");
                }
            }
            None => self.dispatch(SessionEvent::Reset),
        }
    }

    pub fn set_volume(&mut self, frac: f64) {
        self.router.set_volume(frac);
    }

    /// The outbound sync loop body. Sends every changed editor and pose of
    /// the locally driven participants and returns how many events went out.
    pub fn sync_tick(&mut self) -> usize {
        if self.is_playing() {
            return 0;
        }
        let mut changes = Vec::new();
        for (&id, participant) in self.participants.iter_mut() {
            if !participant.is_local() {
                continue;
            }
            if let Some(state) = participant.take_editor_change() {
                changes.push(SessionEvent::EditorState { id, state });
            }
            if let Some(pose) = participant.take_pose_change() {
                changes.push(SessionEvent::SpeakerPose { id, pose });
            }
        }
        let sent = changes.len();
        for event in changes {
            self.emit(event);
        }
        if sent > 0 {
            trace!(sent, "sync tick");
        }
        sent
    }

    /// Apply a locally originated event and forward it if it concerns the
    /// participant this host speaks for.
    fn emit(&mut self, event: SessionEvent) {
        let forward = event.participant() == Some(self.local_id);
        if forward {
            if let Some(link) = &self.link {
                if link.send(event.clone()).is_err() {
                    warn!(kind = %event.kind(), "connection writer gone, event not sent");
                }
            }
        }
        self.dispatch(event);
    }

    // -- dispatch ----------------------------------------------------------

    /// Apply `event`, record it if recording, then notify observers.
    pub fn dispatch(&mut self, event: SessionEvent) {
        trace!(kind = %event.kind(), participant = ?event.participant(), "dispatch");
        if let Some(recorder) = &mut self.recorder {
            recorder.record(&event);
        }

        match &event {
            SessionEvent::Hello(hello) => self.apply_hello(hello),
            SessionEvent::Join { id } => {
                self.create_participant(*id, Locality::Remote);
                info!(%id, "peer joined");
            }
            SessionEvent::Leave { id } => self.apply_leave(*id),
            SessionEvent::Code { id, text } => self.apply_code(*id, text),
            SessionEvent::EditorState { id, state } => self.apply_editor_state(*id, state),
            SessionEvent::SpeakerPose { id, pose } => self.apply_pose(*id, *pose),
            SessionEvent::Reset => self.reset_clock(),
        }

        for observer in self.observers.iter_mut() {
            observer(&event);
        }
    }

    /// Whether a mirrored update should overwrite `participant`'s surfaces.
    ///
    /// Local participants produced the update themselves, so their editor and
    /// pose are left alone, except during playback when nobody is typing.
    fn mirrors(&self, participant: &Participant) -> bool {
        !participant.is_local() || self.is_playing()
    }

    fn apply_hello(&mut self, hello: &Hello) {
        let id = hello.assigned_id;
        self.reset_players(id);
        self.clock.adopt(hello.clock_elapsed);

        for entry in &hello.roster {
            if entry.id == id {
                continue;
            }
            let participant = self.create_participant(entry.id, Locality::Remote);
            participant.code = entry.code.clone();
            participant.editor.set_value(&entry.code);
            participant.pose = entry.pose;
            self.router.set_pose(entry.id, entry.pose);
            self.compile_and_attach(entry.id);
        }

        self.connection = ConnectionState::Joined(id);
        self.status = Status::Connected(id);
        info!(%id, peers = hello.roster.len(), elapsed = hello.clock_elapsed, "joined session");
    }

    fn apply_leave(&mut self, id: ParticipantId) {
        if id == self.local_id {
            warn!(%id, "ignoring leave for the local participant");
            return;
        }
        if self.delete_participant(id) {
            if self.selected == id {
                self.selected = self.local_id;
            }
            info!(%id, "peer left");
        }
    }

    fn apply_code(&mut self, id: ParticipantId, text: &str) {
        let mirrors = match self.participants.get(&id) {
            Some(p) => self.mirrors(p),
            None => {
                warn!(%id, "code for unknown participant");
                return;
            }
        };
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.code = text.to_string();
            if mirrors {
                participant.editor.set_value(text);
            }
        }
        self.compile_and_attach(id);
    }

    fn apply_editor_state(&mut self, id: ParticipantId, state: &EditorState) {
        let Some(participant) = self.participants.get(&id) else {
            warn!(%id, "editor state for unknown participant");
            return;
        };
        if !self.mirrors(participant) {
            return;
        }
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.editor.apply(state);
        }
    }

    fn apply_pose(&mut self, id: ParticipantId, pose: Pose) {
        let Some(participant) = self.participants.get(&id) else {
            warn!(%id, "pose for unknown participant");
            return;
        };
        if !self.mirrors(participant) {
            return;
        }
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.pose = pose;
        }
        self.router.set_pose(id, pose);
    }

    /// Compile `id`'s stored code and swap it in. A failed compile keeps the
    /// previous unit playing and flashes the error.
    fn compile_and_attach(&mut self, id: ParticipantId) {
        let Some(participant) = self.participants.get_mut(&id) else {
            return;
        };
        let bindings = self.router.bindings_for(id);
        match GeneratorUnit::compile(&participant.code, &bindings, self.clock.elapsed()) {
            Ok(unit) => {
                participant.last_error = None;
                let channel = self.router.attach(id, unit);
                debug!(%id, ?channel, "code running");
                self.set_flash(id, Flash::Ran);
            }
            Err(err) => {
                warn!(%id, %err, "compile failed");
                participant.last_error = Some(err.to_string());
                self.set_flash(id, Flash::Error);
            }
        }
    }

    /// Re-zero the clock and move every unit's time to the new origin.
    /// Scratch variables and oscillator phases are untouched.
    fn reset_clock(&mut self) {
        self.clock.reset();
        self.router.broadcast_time(0.0);
        info!("clock reset");
    }

    // -- faults and indicators ---------------------------------------------

    /// Collect runtime faults from the router and flag the participants.
    pub fn check_faults(&mut self) -> usize {
        let faults = self.router.drain_faults();
        for &(id, fault) in &faults {
            warn!(%id, %fault, "unit faulted");
            if let Some(participant) = self.participants.get_mut(&id) {
                participant.last_error = Some(fault.to_string());
            }
            self.set_flash(id, Flash::Error);
        }
        faults.len()
    }

    fn set_flash(&mut self, id: ParticipantId, flash: Flash) {
        let ms = match flash {
            Flash::Ran => self.display.run_flash_ms,
            Flash::Error => self.display.error_flash_ms,
        };
        let until = Instant::now() + Duration::from_millis(ms);
        self.flashes.insert(id, (flash, until));
    }

    /// The indicator `id` currently shows, if it has not expired.
    pub fn flash(&self, id: ParticipantId) -> Option<Flash> {
        let &(flash, until) = self.flashes.get(&id)?;
        (Instant::now() < until).then_some(flash)
    }

    // -- connection ----------------------------------------------------------

    /// Enter `Connecting`. Fails during playback or when already connected.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        if self.is_playing() {
            return Err(SessionError::Busy("playback in progress"));
        }
        if self.connection != ConnectionState::Disconnected {
            return Err(SessionError::Busy("already connected"));
        }
        self.connection = ConnectionState::Connecting;
        self.status = Status::Connecting;
        info!("connecting");
        Ok(())
    }

    /// The transport is up; outbound events go to `link` from now on.
    /// The session joins when the hub's hello arrives.
    pub fn connected(&mut self, link: UnboundedSender<SessionEvent>) {
        self.link = Some(link);
        debug!("transport connected, waiting for hello");
    }

    /// Connecting failed or an open connection broke.
    ///
    /// The session drops to offline mode. Remote participants are removed;
    /// local ones keep playing.
    pub fn connect_failed(&mut self, err: &NetworkError) {
        warn!(%err, "connection lost");
        self.link = None;
        self.connection = ConnectionState::Disconnected;
        self.status = match err {
            NetworkError::Timeout { .. } => Status::Timeout,
            _ => Status::Error,
        };
        let remote: Vec<_> = self
            .participants
            .values()
            .filter(|p| !p.is_local())
            .map(Participant::id)
            .collect();
        for id in remote {
            self.delete_participant(id);
        }
        self.selected = self.local_id;
    }

    /// Apply an event received from the hub.
    pub fn handle_network(&mut self, event: SessionEvent) {
        if self.connection == ConnectionState::Disconnected {
            debug!(kind = %event.kind(), "dropping network event while offline");
            return;
        }
        self.dispatch(event);
    }

    /// Leave the hub: tear down every participant and return to a blank
    /// offline session.
    pub fn disconnect(&mut self) {
        self.link = None;
        self.connection = ConnectionState::Disconnected;
        self.status = Status::Offline;
        self.reset_players(ParticipantId(0));
        self.clock.reset();
        info!("disconnected");
    }

    // -- recording and playback ----------------------------------------------

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Start capturing dispatched events.
    ///
    /// Offline the session is first reset to one blank local participant so
    /// the recording starts from a reproducible state. Online the live
    /// session is kept and its current code and poses are captured at time 0.
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        if self.is_playing() {
            return Err(SessionError::Busy("playback in progress"));
        }
        if self.is_recording() {
            return Err(SessionError::Busy("already recording"));
        }

        if self.connection == ConnectionState::Disconnected {
            self.clock.reset();
            self.reset_players(ParticipantId(0));
            self.recorder = Some(Recorder::new([self.local_id]));
        } else {
            let mut recorder = Recorder::new(self.participants.keys().copied());
            for (&id, participant) in &self.participants {
                recorder.seed(&SessionEvent::Code {
                    id,
                    text: participant.code.clone(),
                });
                recorder.seed(&SessionEvent::SpeakerPose {
                    id,
                    pose: participant.pose,
                });
            }
            self.recorder = Some(recorder);
        }
        info!("recording started");
        Ok(())
    }

    /// Stop capturing and return the recording, local participant first.
    pub fn stop_recording(&mut self) -> Option<Recording> {
        let recorder = self.recorder.take()?;
        Some(recorder.finish(self.local_id))
    }

    /// Replay `recording` from a blank local-only state.
    ///
    /// The first roster entry takes the place of the local participant; the
    /// others are created up front. Events fire from
    /// [`poll_playback`](Self::poll_playback).
    pub fn play(&mut self, recording: Recording) -> Result<(), SessionError> {
        let Some(&first) = recording.players.first() else {
            return Err(RecordingError::EmptyRoster.into());
        };
        if self.is_playing() {
            return Err(SessionError::Busy("playback in progress"));
        }
        if self.is_recording() {
            return Err(SessionError::Busy("recording in progress"));
        }
        if self.connection != ConnectionState::Disconnected {
            return Err(SessionError::Busy("cannot play back while connected"));
        }

        self.clock.reset();
        self.reset_players(first);
        for &id in &recording.players[1..] {
            self.create_participant(id, Locality::Local);
        }
        info!(
            players = recording.players.len(),
            events = recording.events.len(),
            "playback started"
        );
        self.playback = Some(Playback::new(recording.events, Instant::now()));
        Ok(())
    }

    /// Fire every due playback event. After the last one the temporary
    /// roster is torn down. Returns how many events fired.
    pub fn poll_playback(&mut self) -> usize {
        let Some(playback) = &mut self.playback else {
            return 0;
        };
        let due = playback.due(Instant::now());
        let finished = playback.is_finished();

        let fired = due.len();
        for event in due {
            self.dispatch(event);
        }

        if finished {
            self.playback = None;
            self.reset_players(ParticipantId(0));
            info!("playback finished");
        }
        fired
    }

    /// When [`poll_playback`](Self::poll_playback) next has work to do.
    pub fn next_playback_deadline(&self) -> Option<Instant> {
        let playback = self.playback.as_ref()?;
        Some(playback.next_deadline().unwrap_or_else(Instant::now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RosterEntry;

    fn session() -> Session {
        Session::new(Router::new(48_000))
    }

    #[test]
    fn starts_offline_with_one_local_participant() {
        let s = session();
        assert_eq!(s.status(), Status::Offline);
        assert_eq!(s.local_id(), ParticipantId(0));
        assert_eq!(s.participants().count(), 1);
        assert_eq!(s.participant(ParticipantId(0)).map(Participant::code), Some(DEFAULT_CODE));
    }

    #[test]
    fn run_compiles_and_flashes() {
        let mut s = session();
        s.edit(ParticipantId(0)).unwrap().set_value("sin(2*pi*440*t)");
        s.run(ParticipantId(0)).unwrap();
        assert_eq!(s.router().unit_count(), 1);
        assert_eq!(s.flash(ParticipantId(0)), Some(Flash::Ran));
        assert_eq!(s.router().unit_source(ParticipantId(0)), Some("sin(2*pi*440*t)"));
    }

    #[test]
    fn bad_code_keeps_previous_unit() {
        let mut s = session();
        s.edit(ParticipantId(0)).unwrap().set_value("0.1");
        s.run(ParticipantId(0)).unwrap();
        s.edit(ParticipantId(0)).unwrap().set_value("sin(");
        s.run(ParticipantId(0)).unwrap();
        assert_eq!(s.flash(ParticipantId(0)), Some(Flash::Error));
        assert_eq!(s.router().unit_source(ParticipantId(0)), Some("0.1"));
        assert!(s.participant(ParticipantId(0)).unwrap().last_error().is_some());
    }

    #[test]
    fn local_participants_only_offline() {
        let mut s = session();
        let extra = s.add_local_participant().unwrap();
        assert_eq!(extra, ParticipantId(1));
        s.select(extra).unwrap();
        s.apply_preset("sine").unwrap();
        assert_eq!(s.edit(extra).unwrap().content(), "sin(2 * pi * 400 * t)");
        assert!(matches!(s.apply_preset("nope"), Err(SessionError::UnknownPreset(_))));

        s.remove_participant(extra).unwrap();
        assert_eq!(s.selected(), ParticipantId(0));
        assert!(s.remove_participant(ParticipantId(0)).is_err());

        s.begin_connect().unwrap();
        assert!(matches!(s.add_local_participant(), Err(SessionError::OfflineOnly)));
    }

    #[test]
    fn hello_bootstraps_roster() {
        let mut s = session();
        s.begin_connect().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        s.connected(tx);
        s.handle_network(SessionEvent::Hello(Hello {
            assigned_id: ParticipantId(3),
            roster: vec![
                RosterEntry {
                    id: ParticipantId(1),
                    code: "0.5".into(),
                    pose: Pose { x: 0.25, y: 0.0, angle: 0.0 },
                },
                RosterEntry {
                    id: ParticipantId(2),
                    code: "0".into(),
                    pose: Pose::default(),
                },
            ],
            clock_elapsed: 10.0,
        }));

        assert_eq!(s.status(), Status::Connected(ParticipantId(3)));
        assert_eq!(s.local_id(), ParticipantId(3));
        assert_eq!(s.participants().count(), 3);
        assert_eq!(s.router().unit_count(), 2);
        let p1 = s.participant(ParticipantId(1)).unwrap();
        assert!(!p1.is_local());
        assert_eq!(p1.pose().x, 0.25);
        assert_eq!(p1.editor().content(), "0.5");
        assert!(s.clock().elapsed() >= 10.0);
    }

    #[test]
    fn remote_editor_state_is_mirrored_but_local_is_not() {
        let mut s = session();
        s.begin_connect().unwrap();
        s.handle_network(SessionEvent::Hello(Hello {
            assigned_id: ParticipantId(0),
            roster: vec![],
            clock_elapsed: 0.0,
        }));
        s.handle_network(SessionEvent::Join { id: ParticipantId(5) });

        let state = EditorState {
            content: "t".into(),
            ..EditorState::default()
        };
        s.handle_network(SessionEvent::EditorState {
            id: ParticipantId(5),
            state: state.clone(),
        });
        s.dispatch(SessionEvent::EditorState {
            id: ParticipantId(0),
            state,
        });
        assert_eq!(s.edit(ParticipantId(5)).unwrap().content(), "t");
        assert_eq!(s.edit(ParticipantId(0)).unwrap().content(), DEFAULT_CODE);
    }

    #[test]
    fn failure_keeps_local_participants() {
        let mut s = session();
        s.begin_connect().unwrap();
        s.handle_network(SessionEvent::Hello(Hello {
            assigned_id: ParticipantId(2),
            roster: vec![RosterEntry {
                id: ParticipantId(1),
                code: "0".into(),
                pose: Pose::default(),
            }],
            clock_elapsed: 0.0,
        }));
        s.edit(ParticipantId(2)).unwrap().set_value("0.3");
        s.run(ParticipantId(2)).unwrap();

        s.connect_failed(&NetworkError::Closed);
        assert_eq!(s.status(), Status::Error);
        assert_eq!(s.connection(), ConnectionState::Disconnected);
        assert!(s.participant(ParticipantId(1)).is_none());
        assert_eq!(s.router().unit_source(ParticipantId(2)), Some("0.3"));

        s.handle_network(SessionEvent::Join { id: ParticipantId(9) });
        assert!(s.participant(ParticipantId(9)).is_none());
    }

    #[test]
    fn playback_excludes_connecting_and_recording() {
        let mut s = session();
        let recording = Recording {
            players: vec![ParticipantId(0)],
            events: vec![],
        };
        s.start_recording().unwrap();
        assert!(matches!(s.play(recording.clone()), Err(SessionError::Busy(_))));
        s.stop_recording();

        s.play(recording).unwrap();
        assert!(s.begin_connect().is_err());
        assert!(s.start_recording().is_err());
        assert!(s.next_playback_deadline().is_some());
        assert_eq!(s.poll_playback(), 0);
        assert!(!s.is_playing());
        assert!(matches!(
            s.play(Recording::default()),
            Err(SessionError::Recording(RecordingError::EmptyRoster))
        ));
    }
}
