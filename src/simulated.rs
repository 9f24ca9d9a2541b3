//! In-process engines with no real media pipeline behind them.
//!
//! They record every transport call and hold seek completions until a probe
//! releases them, in any order. The demo binary and the test suite drive
//! sessions through them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};

use crate::engine::{
    EventSink, PlaybackEngine, RemoteCastSession, SeekCompletion, TransportEngine,
};
use crate::error::{Result, SessionError};
use crate::protocol::{
    EngineSignal, ItemReadiness, LocalBufferSignal, PlaybackRoute, RemotePlayerState,
};
use crate::video::VideoDescriptor;

struct PendingSeek {
    target_s: f64,
    completion: SeekCompletion,
}

struct SimulatedState {
    route: PlaybackRoute,
    sink: Option<EventSink>,
    duration_s: Option<f64>,
    position_s: f64,
    playing: bool,
    muted: bool,
    readiness: ItemReadiness,
    seek_calls: Vec<f64>,
    pending_seeks: VecDeque<PendingSeek>,
    max_outstanding_seeks: usize,
    play_calls: usize,
    pause_calls: usize,
    released: bool,
    loaded_url: Option<String>,
    // Remote-only fields.
    loaded_content_type: Option<&'static str>,
    session_active: bool,
    load_calls: Vec<(f64, bool)>,
    fail_next_load: bool,
    last_known_valid: bool,
    ended_sessions: usize,
}

impl SimulatedState {
    fn new(route: PlaybackRoute, duration_s: Option<f64>) -> Self {
        Self {
            route,
            sink: None,
            duration_s,
            position_s: 0.0,
            playing: false,
            muted: false,
            readiness: ItemReadiness::Unknown,
            seek_calls: Vec::new(),
            pending_seeks: VecDeque::new(),
            max_outstanding_seeks: 0,
            play_calls: 0,
            pause_calls: 0,
            released: false,
            loaded_url: None,
            loaded_content_type: None,
            session_active: false,
            load_calls: Vec::new(),
            fail_next_load: false,
            last_known_valid: true,
            ended_sessions: 0,
        }
    }

    fn emit(&self, signal: EngineSignal) {
        if let Some(sink) = self.sink.as_ref() {
            let _ = sink.post_engine(self.route, signal);
        }
    }
}

/// Shared view into a simulated engine, used to inspect calls and inject signals.
#[derive(Clone)]
pub struct EngineProbe {
    state: Arc<Mutex<SimulatedState>>,
}

impl EngineProbe {
    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn seek_calls(&self) -> Vec<f64> {
        self.lock().seek_calls.clone()
    }

    pub fn outstanding_seeks(&self) -> usize {
        self.lock().pending_seeks.len()
    }

    /// Highest number of seeks that were outstanding at the same time.
    pub fn max_outstanding_seeks(&self) -> usize {
        self.lock().max_outstanding_seeks
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn position(&self) -> f64 {
        self.lock().position_s
    }

    pub fn play_calls(&self) -> usize {
        self.lock().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.lock().pause_calls
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub fn loaded_url(&self) -> Option<String> {
        self.lock().loaded_url.clone()
    }

    /// Content type the receiver was last asked to load.
    pub fn loaded_content_type(&self) -> Option<&'static str> {
        self.lock().loaded_content_type
    }

    pub fn load_calls(&self) -> Vec<(f64, bool)> {
        self.lock().load_calls.clone()
    }

    pub fn ended_sessions(&self) -> usize {
        self.lock().ended_sessions
    }

    pub fn set_position(&self, position_s: f64) {
        self.lock().position_s = position_s;
    }

    pub fn set_session_active(&self, active: bool) {
        self.lock().session_active = active;
    }

    pub fn fail_next_load(&self) {
        self.lock().fail_next_load = true;
    }

    /// Makes `last_known_position` report no meaningful position.
    pub fn invalidate_last_known_position(&self) {
        self.lock().last_known_valid = false;
    }

    /// Changes readiness and reports it on the subscribed sink.
    pub fn emit_readiness(&self, readiness: ItemReadiness) {
        let mut state = self.lock();
        state.readiness = readiness;
        state.emit(EngineSignal::ReadinessChanged(readiness));
    }

    pub fn emit_local_buffer(&self, signal: LocalBufferSignal) {
        self.lock().emit(EngineSignal::LocalBuffer(signal));
    }

    pub fn emit_player_state(&self, player_state: RemotePlayerState) {
        let mut state = self.lock();
        match player_state {
            RemotePlayerState::Playing => state.playing = true,
            RemotePlayerState::Paused | RemotePlayerState::Idle => state.playing = false,
            RemotePlayerState::Loading | RemotePlayerState::Buffering => {}
        }
        state.emit(EngineSignal::RemotePlayerState(player_state));
    }

    /// Applies the oldest outstanding seek and returns its completion without firing it.
    pub fn take_next_completion(&self) -> Option<SeekCompletion> {
        self.take_completion_at(0)
    }

    /// Applies the newest outstanding seek and returns its completion without firing it.
    pub fn take_latest_completion(&self) -> Option<SeekCompletion> {
        let index = self.outstanding_seeks().checked_sub(1)?;
        self.take_completion_at(index)
    }

    fn take_completion_at(&self, index: usize) -> Option<SeekCompletion> {
        let mut state = self.lock();
        let pending = state.pending_seeks.remove(index)?;
        state.position_s = pending.target_s;
        Some(pending.completion)
    }

    /// Applies the oldest outstanding seek and posts its completion.
    pub fn complete_next_seek(&self, reached: bool) -> bool {
        match self.take_next_completion() {
            Some(completion) => {
                completion.complete(reached);
                true
            }
            None => false,
        }
    }
}

struct SimulatedCore {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedCore {
    fn new(route: PlaybackRoute, duration_s: Option<f64>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedState::new(route, duration_s))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn probe(&self) -> EngineProbe {
        EngineProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn subscribe(&self, sink: EventSink) {
        self.lock().sink = Some(sink);
    }

    fn play(&self) {
        let mut state = self.lock();
        state.play_calls += 1;
        state.playing = true;
    }

    fn pause(&self) {
        let mut state = self.lock();
        state.pause_calls += 1;
        state.playing = false;
    }

    fn seek(&self, target_s: f64, completion: SeekCompletion) {
        let mut state = self.lock();
        trace!("Simulated {:?}: seek to {:.3}s", state.route, target_s);
        state.seek_calls.push(target_s);
        state.pending_seeks.push_back(PendingSeek {
            target_s,
            completion,
        });
        state.max_outstanding_seeks = state.max_outstanding_seeks.max(state.pending_seeks.len());
    }

    fn release(&self) {
        let mut state = self.lock();
        state.released = true;
        state.playing = false;
        state.sink = None;
        state.pending_seeks.clear();
    }
}

/// Simulated local decode/render engine.
pub struct SimulatedLocalEngine {
    core: SimulatedCore,
}

impl SimulatedLocalEngine {
    pub fn new(duration_s: f64) -> Self {
        Self {
            core: SimulatedCore::new(PlaybackRoute::Local, Some(duration_s)),
        }
    }

    pub fn probe(&self) -> EngineProbe {
        self.core.probe()
    }

    /// Sets readiness without reporting it.
    pub fn set_readiness(&mut self, readiness: ItemReadiness) {
        self.core.lock().readiness = readiness;
    }
}

impl TransportEngine for SimulatedLocalEngine {
    fn subscribe(&mut self, sink: EventSink) {
        self.core.subscribe(sink);
    }

    fn play(&mut self) {
        self.core.play();
    }

    fn pause(&mut self) {
        self.core.pause();
    }

    fn seek(&mut self, target_s: f64, completion: SeekCompletion) {
        self.core.seek(target_s, completion);
    }

    fn current_position(&self) -> f64 {
        self.core.lock().position_s
    }

    fn duration(&self) -> Option<f64> {
        self.core.lock().duration_s
    }

    fn item_readiness(&self) -> ItemReadiness {
        self.core.lock().readiness
    }

    fn rate(&self) -> f32 {
        if self.core.lock().playing {
            1.0
        } else {
            0.0
        }
    }

    fn release(&mut self) {
        self.core.release();
    }
}

impl PlaybackEngine for SimulatedLocalEngine {
    fn load_item(&mut self, descriptor: &VideoDescriptor) {
        let mut state = self.core.lock();
        debug!("SimulatedLocalEngine: loading '{}'", descriptor.title());
        state.loaded_url = Some(descriptor.stream_url().to_string());
        state.position_s = 0.0;
        if !descriptor.is_live_stream() && descriptor.duration_s() > 0.0 {
            state.duration_s = Some(descriptor.duration_s());
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.core.lock().muted = muted;
    }
}

/// Simulated remote receiver session.
pub struct SimulatedCastSession {
    core: SimulatedCore,
}

impl SimulatedCastSession {
    pub fn new() -> Self {
        Self {
            core: SimulatedCore::new(PlaybackRoute::Remote, None),
        }
    }

    pub fn probe(&self) -> EngineProbe {
        self.core.probe()
    }
}

impl Default for SimulatedCastSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportEngine for SimulatedCastSession {
    fn subscribe(&mut self, sink: EventSink) {
        self.core.subscribe(sink);
    }

    fn play(&mut self) {
        self.core.play();
    }

    fn pause(&mut self) {
        self.core.pause();
    }

    fn seek(&mut self, target_s: f64, completion: SeekCompletion) {
        self.core.seek(target_s, completion);
    }

    fn current_position(&self) -> f64 {
        self.core.lock().position_s
    }

    fn duration(&self) -> Option<f64> {
        self.core.lock().duration_s
    }

    fn item_readiness(&self) -> ItemReadiness {
        self.core.lock().readiness
    }

    fn rate(&self) -> f32 {
        if self.core.lock().playing {
            1.0
        } else {
            0.0
        }
    }

    fn release(&mut self) {
        self.core.release();
    }
}

impl RemoteCastSession for SimulatedCastSession {
    fn has_active_session(&self) -> bool {
        self.core.lock().session_active
    }

    fn load_media(
        &mut self,
        descriptor: &VideoDescriptor,
        start_position_s: f64,
        autoplay: bool,
    ) -> Result<()> {
        let mut state = self.core.lock();
        if !state.session_active {
            return Err(SessionError::RemoteLoad("no active cast session".to_string()));
        }
        if state.fail_next_load {
            state.fail_next_load = false;
            return Err(SessionError::RemoteLoad(
                "receiver rejected media".to_string(),
            ));
        }
        debug!(
            "SimulatedCastSession: loading '{}' ({}) at {:.3}s (autoplay {})",
            descriptor.title(),
            descriptor.content_type(),
            start_position_s,
            autoplay
        );
        state.load_calls.push((start_position_s, autoplay));
        state.loaded_content_type = Some(descriptor.content_type());
        state.loaded_url = Some(descriptor.stream_url().to_string());
        state.position_s = start_position_s;
        state.playing = autoplay;
        state.readiness = ItemReadiness::Ready;
        if !descriptor.is_live_stream() && descriptor.duration_s() > 0.0 {
            state.duration_s = Some(descriptor.duration_s());
        }
        state.emit(EngineSignal::RemotePlayerState(RemotePlayerState::Loading));
        state.emit(EngineSignal::RemotePlayerState(if autoplay {
            RemotePlayerState::Playing
        } else {
            RemotePlayerState::Paused
        }));
        Ok(())
    }

    fn approximate_position(&self) -> f64 {
        self.core.lock().position_s
    }

    fn last_known_position(&self) -> Option<f64> {
        let state = self.core.lock();
        if state.last_known_valid && state.loaded_url.is_some() {
            Some(state.position_s)
        } else {
            None
        }
    }

    fn end_session(&mut self) {
        let mut state = self.core.lock();
        state.ended_sessions += 1;
        state.session_active = false;
        state.playing = false;
    }
}
