//! Playback session controller.
//!
//! Single writer of all session state. Every input, whether a host command,
//! a route change, an engine signal, or a seek completion, arrives as a
//! [`Message`] on the bus and is applied by [`PlaybackSessionController::handle_message`]
//! on the controller's own thread.

use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

use crate::buffer_health::BufferHealthMonitor;
use crate::config::SessionConfig;
use crate::engine::{
    EventSink, PlaybackEngine, RemoteCastSession, SeekCompletion, Subscription, TransportEngine,
};
use crate::error::{Result, SessionError};
use crate::protocol::{
    CastEvent, EngineEvent, EngineSignal, ExternalState, ItemReadiness, Message, PlaybackProgress,
    PlaybackRoute, RemotePlayerState, RouteEvent, SeekTicket, SessionCommand, SessionEvent,
};
use crate::route_monitor::RouteMonitor;
use crate::seek_coordinator::{SeekCoordinator, SeekRequestOutcome, SeekSettlement};
use crate::ticker::ProgressTicker;
use crate::time_format::{format_clock, format_remaining};
use crate::video::VideoDescriptor;

/// Receives the one-time notification that a session finished tearing down.
pub trait SessionDismissListener: Send {
    fn session_dismissed(&mut self, controller: &PlaybackSessionController);
}

impl<F> SessionDismissListener for F
where
    F: FnMut(&PlaybackSessionController) + Send,
{
    fn session_dismissed(&mut self, controller: &PlaybackSessionController) {
        self(controller)
    }
}

/// Everything a controller is built from besides the bus.
pub struct SessionParts {
    pub descriptor: VideoDescriptor,
    pub config: SessionConfig,
    pub local_engine: Box<dyn PlaybackEngine>,
    pub remote_session: Box<dyn RemoteCastSession>,
    pub route_monitor: RouteMonitor,
}

/// Cloneable host-side handle that posts commands to a running controller.
#[derive(Clone)]
pub struct SessionHandle {
    bus_producer: Sender<Message>,
}

impl SessionHandle {
    pub fn new(bus_producer: Sender<Message>) -> Self {
        Self { bus_producer }
    }

    pub fn play(&self) {
        self.send(SessionCommand::Play);
    }

    pub fn pause(&self) {
        self.send(SessionCommand::Pause);
    }

    pub fn toggle_play_pause(&self) {
        self.send(SessionCommand::TogglePlayPause);
    }

    pub fn request_seek(&self, target_s: f64) {
        self.send(SessionCommand::RequestSeek(target_s));
    }

    /// Seeks to a slider position in `[0, 1]`.
    pub fn request_seek_fraction(&self, fraction: f32) {
        self.send(SessionCommand::RequestSeekFraction(fraction));
    }

    pub fn teardown(&self) {
        self.send(SessionCommand::Teardown);
    }

    pub fn report_memory_pressure(&self) {
        self.send(SessionCommand::MemoryPressure);
    }

    fn send(&self, command: SessionCommand) {
        if self.bus_producer.send(Message::Session(command)).is_err() {
            debug!("SessionHandle: no controller listening");
        }
    }
}

/// Engine selected by the current route.
enum ActiveEngine<'a> {
    Local(&'a mut dyn PlaybackEngine),
    Remote(&'a mut dyn RemoteCastSession),
}

impl TransportEngine for ActiveEngine<'_> {
    fn subscribe(&mut self, sink: EventSink) {
        match self {
            ActiveEngine::Local(engine) => engine.subscribe(sink),
            ActiveEngine::Remote(engine) => engine.subscribe(sink),
        }
    }

    fn play(&mut self) {
        match self {
            ActiveEngine::Local(engine) => engine.play(),
            ActiveEngine::Remote(engine) => engine.play(),
        }
    }

    fn pause(&mut self) {
        match self {
            ActiveEngine::Local(engine) => engine.pause(),
            ActiveEngine::Remote(engine) => engine.pause(),
        }
    }

    fn seek(&mut self, target_s: f64, completion: SeekCompletion) {
        match self {
            ActiveEngine::Local(engine) => engine.seek(target_s, completion),
            ActiveEngine::Remote(engine) => engine.seek(target_s, completion),
        }
    }

    fn current_position(&self) -> f64 {
        match self {
            ActiveEngine::Local(engine) => engine.current_position(),
            ActiveEngine::Remote(engine) => engine.approximate_position(),
        }
    }

    fn duration(&self) -> Option<f64> {
        match self {
            ActiveEngine::Local(engine) => engine.duration(),
            ActiveEngine::Remote(engine) => engine.duration(),
        }
    }

    fn item_readiness(&self) -> ItemReadiness {
        match self {
            ActiveEngine::Local(engine) => engine.item_readiness(),
            ActiveEngine::Remote(engine) => engine.item_readiness(),
        }
    }

    fn rate(&self) -> f32 {
        match self {
            ActiveEngine::Local(engine) => engine.rate(),
            ActiveEngine::Remote(engine) => engine.rate(),
        }
    }

    fn release(&mut self) {
        match self {
            ActiveEngine::Local(engine) => engine.release(),
            ActiveEngine::Remote(engine) => engine.release(),
        }
    }
}

struct EngineSlots {
    local: Box<dyn PlaybackEngine>,
    remote: Box<dyn RemoteCastSession>,
}

impl EngineSlots {
    fn active(&mut self, route: PlaybackRoute) -> ActiveEngine<'_> {
        match route {
            PlaybackRoute::Local => ActiveEngine::Local(self.local.as_mut()),
            PlaybackRoute::Remote => ActiveEngine::Remote(self.remote.as_mut()),
        }
    }

    fn readiness(&self, route: PlaybackRoute) -> ItemReadiness {
        match route {
            PlaybackRoute::Local => self.local.item_readiness(),
            PlaybackRoute::Remote => self.remote.item_readiness(),
        }
    }
}

/// Owns one video playback session across the local and remote routes.
pub struct PlaybackSessionController {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    descriptor: VideoDescriptor,
    config: SessionConfig,
    engines: EngineSlots,
    route_monitor: RouteMonitor,
    route: PlaybackRoute,
    wireless_mirror_active: bool,
    cast_active: bool,
    external_state: ExternalState,
    remote_playing: bool,
    seek_coordinator: SeekCoordinator,
    buffer_health: BufferHealthMonitor,
    session_sink: EventSink,
    session_subscription: Subscription,
    local_subscription: Subscription,
    remote_subscription: Subscription,
    route_subscription: Option<Subscription>,
    ticker: Option<ProgressTicker>,
    dismiss_listener: Option<Box<dyn SessionDismissListener>>,
    torn_down: bool,
}

impl PlaybackSessionController {
    /// Subscribes to the engines and route monitor, then loads the item locally.
    pub fn new(
        parts: SessionParts,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
    ) -> Self {
        let SessionParts {
            descriptor,
            config,
            mut local_engine,
            mut remote_session,
            route_monitor,
        } = parts;

        let (local_sink, local_subscription) = EventSink::new(bus_producer.clone());
        local_engine.subscribe(local_sink);
        let (remote_sink, remote_subscription) = EventSink::new(bus_producer.clone());
        remote_session.subscribe(remote_sink);
        let route_subscription = route_monitor.subscribe(bus_producer.clone());
        let (session_sink, session_subscription) = EventSink::new(bus_producer.clone());

        if config.end_existing_cast_on_load && remote_session.has_active_session() {
            info!("PlaybackSessionController: ending cast session left over from a previous video");
            remote_session.end_session();
        }

        local_engine.load_item(&descriptor);
        local_engine.set_muted(false);
        if config.autoplay_on_load {
            local_engine.play();
        }
        info!(
            "PlaybackSessionController: loaded '{}' ({}, live: {})",
            descriptor.title(),
            descriptor.stream_url(),
            descriptor.is_live_stream()
        );

        Self {
            bus_consumer,
            bus_producer,
            descriptor,
            config,
            engines: EngineSlots {
                local: local_engine,
                remote: remote_session,
            },
            route_monitor,
            route: PlaybackRoute::Local,
            wireless_mirror_active: false,
            cast_active: false,
            external_state: ExternalState::None,
            remote_playing: false,
            seek_coordinator: SeekCoordinator::new(session_sink.clone()),
            buffer_health: BufferHealthMonitor::new(PlaybackRoute::Local),
            session_sink,
            session_subscription,
            local_subscription,
            remote_subscription,
            route_subscription: Some(route_subscription),
            ticker: None,
            dismiss_listener: None,
            torn_down: false,
        }
    }

    pub fn descriptor(&self) -> &VideoDescriptor {
        &self.descriptor
    }

    pub fn route(&self) -> PlaybackRoute {
        self.route
    }

    pub fn external_state(&self) -> ExternalState {
        self.external_state
    }

    pub fn is_buffering_visible(&self) -> bool {
        self.buffer_health.is_visible()
    }

    pub fn pending_seek_target(&self) -> Option<f64> {
        self.seek_coordinator.pending_target()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Registers the dismissal listener. Only one may be registered per session.
    pub fn set_dismiss_listener(
        &mut self,
        listener: Box<dyn SessionDismissListener>,
    ) -> Result<()> {
        if self.dismiss_listener.is_some() {
            return Err(SessionError::ListenerAlreadyRegistered);
        }
        self.dismiss_listener = Some(listener);
        Ok(())
    }

    /// A handle that posts commands onto this controller's bus.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.bus_producer.clone())
    }

    /// Starts the blocking controller loop. Returns once the session is torn down.
    pub fn run(&mut self) {
        info!(
            "PlaybackSessionController: started for '{}'",
            self.descriptor.title()
        );
        self.start_progress_ticker();
        while !self.torn_down {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "PlaybackSessionController: bus lagged by {} messages",
                        skipped
                    );
                }
                Err(RecvError::Closed) => {
                    warn!("PlaybackSessionController: bus closed, tearing down");
                    self.teardown();
                }
            }
        }
        info!("PlaybackSessionController: stopped");
    }

    /// Applies one bus message. Does nothing once the session is torn down.
    pub fn handle_message(&mut self, message: Message) {
        if self.torn_down {
            trace!("PlaybackSessionController: dropping message after teardown");
            return;
        }
        match message {
            Message::Session(command) => self.handle_command(command),
            Message::Route(RouteEvent::MirrorChanged(active)) => self.on_mirror_changed(active),
            Message::Route(RouteEvent::Cast(CastEvent::Started | CastEvent::Resumed)) => {
                self.switch_to_remote()
            }
            Message::Route(RouteEvent::Cast(CastEvent::Ended { error })) => {
                if let Some(error) = error {
                    warn!("PlaybackSessionController: cast session ended with error: {}", error);
                }
                self.switch_to_local();
            }
            Message::Engine(event) => self.handle_engine_event(event),
            Message::Output(_) => {}
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Play => self.play(),
            SessionCommand::Pause => self.pause(),
            SessionCommand::TogglePlayPause => self.toggle_play_pause(),
            SessionCommand::RequestSeek(target_s) => self.request_seek(target_s),
            SessionCommand::RequestSeekFraction(fraction) => {
                self.request_seek_fraction(fraction)
            }
            SessionCommand::Tick => self.publish_progress(),
            SessionCommand::Teardown => self.teardown(),
            SessionCommand::MemoryPressure => {
                warn!("PlaybackSessionController: memory pressure, tearing down session");
                self.teardown();
            }
        }
    }

    pub fn play(&mut self) {
        self.set_playing(true);
    }

    pub fn pause(&mut self) {
        self.set_playing(false);
    }

    /// While a seek runs the engine stays paused; the command only decides
    /// whether playback resumes once the seek settles.
    fn set_playing(&mut self, playing: bool) {
        if self.torn_down || self.active_item_failed() {
            return;
        }
        if self.seek_coordinator.is_seeking() {
            self.seek_coordinator
                .set_resume_rate(if playing { 1.0 } else { 0.0 });
        } else if playing {
            self.engines.active(self.route).play();
        } else {
            self.engines.active(self.route).pause();
        }
        if self.route == PlaybackRoute::Remote {
            self.remote_playing = playing;
        }
    }

    pub fn toggle_play_pause(&mut self) {
        if self.torn_down {
            return;
        }
        let playing = if self.seek_coordinator.is_seeking() {
            self.seek_coordinator.rate_before_seek() > 0.0
        } else {
            self.engines.active(self.route).rate() > 0.0
        };
        if playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Seeks the active engine to `target_s`, coalescing with any seek already running.
    pub fn request_seek(&mut self, target_s: f64) {
        if self.torn_down {
            return;
        }
        if self.descriptor.is_live_stream() {
            debug!("PlaybackSessionController: ignoring seek on live stream");
            return;
        }
        if !target_s.is_finite() {
            warn!("PlaybackSessionController: ignoring non-finite seek target");
            return;
        }
        if self.active_item_failed() {
            return;
        }

        let route = self.route;
        let mut engine = self.engines.active(route);
        let target_s = match engine.duration() {
            Some(duration) if duration.is_finite() && duration > 0.0 => {
                target_s.clamp(0.0, duration)
            }
            _ => target_s.max(0.0),
        };
        let outcome = self
            .seek_coordinator
            .request_seek(target_s, &mut engine, route);
        trace!(
            "PlaybackSessionController: seek to {:.3}s on {:?}: {:?}",
            target_s,
            route,
            outcome
        );
        self.after_seek_request(outcome);
    }

    /// Seeks to a slider position in `[0, 1]` of the item duration.
    pub fn request_seek_fraction(&mut self, fraction: f32) {
        if self.torn_down || !fraction.is_finite() {
            return;
        }
        let Some(duration) = self.effective_duration() else {
            debug!("PlaybackSessionController: no duration yet, ignoring slider seek");
            return;
        };
        self.request_seek(f64::from(fraction.clamp(0.0, 1.0)) * duration);
    }

    /// Releases every resource and notifies the dismissal listener once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            debug!("PlaybackSessionController: already torn down");
            return;
        }
        self.torn_down = true;

        if let Some(mut ticker) = self.ticker.take() {
            ticker.cancel();
        }
        if let Some(route_subscription) = self.route_subscription.take() {
            self.route_monitor.unsubscribe(&route_subscription);
        }
        self.local_subscription.cancel();
        self.remote_subscription.cancel();
        self.session_subscription.cancel();
        self.seek_coordinator.reset();

        if self.engines.readiness(PlaybackRoute::Local) != ItemReadiness::Failed {
            self.engines.local.pause();
        }
        self.engines.local.release();
        self.engines.remote.release();
        info!(
            "PlaybackSessionController: session for '{}' torn down",
            self.descriptor.title()
        );

        if let Some(mut listener) = self.dismiss_listener.take() {
            listener.session_dismissed(self);
        }
        self.emit(SessionEvent::Dismissed);
    }

    fn start_progress_ticker(&mut self) {
        if self.torn_down || self.ticker.is_some() {
            return;
        }
        self.ticker = Some(ProgressTicker::spawn(
            self.session_sink.clone(),
            Duration::from_millis(self.config.progress_interval_ms),
        ));
    }

    fn on_mirror_changed(&mut self, active: bool) {
        debug!("PlaybackSessionController: wireless mirror active={}", active);
        self.wireless_mirror_active = active;
        self.recompute_external_state();
    }

    fn switch_to_remote(&mut self) {
        if self.route == PlaybackRoute::Remote {
            debug!("PlaybackSessionController: already casting, ignoring cast start");
            return;
        }
        if !self.engines.remote.has_active_session() {
            warn!("PlaybackSessionController: cast started without a connected receiver");
            return;
        }

        let (start_position_s, autoplay) = if self.seek_coordinator.is_seeking() {
            (
                self.seek_coordinator
                    .pending_target()
                    .unwrap_or_else(|| self.engines.local.current_position()),
                self.seek_coordinator.rate_before_seek() > 0.0,
            )
        } else {
            (
                self.engines.local.current_position(),
                self.engines.local.rate() > 0.0,
            )
        };

        if let Err(err) =
            self.engines
                .remote
                .load_media(&self.descriptor, start_position_s, autoplay)
        {
            warn!(
                "PlaybackSessionController: staying local, cast load failed: {}",
                err
            );
            return;
        }

        let local_failed = self.engines.readiness(PlaybackRoute::Local) == ItemReadiness::Failed;
        if !local_failed {
            self.engines.local.pause();
            self.engines.local.set_muted(true);
        }
        self.seek_coordinator.reset();
        self.route = PlaybackRoute::Remote;
        self.remote_playing = autoplay;
        self.cast_active = true;
        info!(
            "PlaybackSessionController: casting from {:.3}s (autoplay {})",
            start_position_s, autoplay
        );

        let remote_failed = self.engines.readiness(PlaybackRoute::Remote) == ItemReadiness::Failed;
        let buffering = self
            .buffer_health
            .set_route(PlaybackRoute::Remote, remote_failed);
        self.emit_buffering(buffering);
        self.emit(SessionEvent::RouteChanged(PlaybackRoute::Remote));
        self.recompute_external_state();
    }

    fn switch_to_local(&mut self) {
        if self.route != PlaybackRoute::Remote {
            debug!("PlaybackSessionController: cast ended while playing locally");
            if self.cast_active {
                self.cast_active = false;
                self.recompute_external_state();
            }
            return;
        }

        let handoff_target = if self.descriptor.is_live_stream() {
            None
        } else {
            self.seek_coordinator.pending_target().or_else(|| {
                self.engines
                    .remote
                    .last_known_position()
                    .filter(|position| position.is_finite() && *position >= 0.0)
            })
        };
        let was_playing = if self.seek_coordinator.is_seeking() {
            self.seek_coordinator.rate_before_seek() > 0.0
        } else {
            self.remote_playing
        };

        let local_failed = self.engines.readiness(PlaybackRoute::Local) == ItemReadiness::Failed;
        self.seek_coordinator.reset();
        if !local_failed {
            self.engines.local.set_muted(false);
        }
        self.route = PlaybackRoute::Local;
        self.remote_playing = false;
        self.cast_active = false;
        info!(
            "PlaybackSessionController: back to local at {:?} (resume {})",
            handoff_target, was_playing
        );

        let buffering = self
            .buffer_health
            .set_route(PlaybackRoute::Local, local_failed);
        self.emit_buffering(buffering);
        self.emit(SessionEvent::RouteChanged(PlaybackRoute::Local));
        self.recompute_external_state();

        if self.active_item_failed() {
            return;
        }
        match handoff_target {
            Some(target_s) => {
                let rate = if was_playing { 1.0 } else { 0.0 };
                let mut engine = self.engines.active(PlaybackRoute::Local);
                let outcome = self.seek_coordinator.request_seek_with_rate(
                    target_s,
                    rate,
                    &mut engine,
                    PlaybackRoute::Local,
                );
                self.after_seek_request(outcome);
            }
            None if was_playing => self.engines.local.play(),
            None => {}
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        let EngineEvent { route, signal } = event;
        match signal {
            EngineSignal::ReadinessChanged(readiness) => self.on_readiness_changed(route, readiness),
            EngineSignal::LocalBuffer(signal) => {
                if route == PlaybackRoute::Local {
                    let buffering = self.buffer_health.on_local_signal(signal);
                    self.emit_buffering(buffering);
                }
            }
            EngineSignal::RemotePlayerState(player_state) => {
                if route != PlaybackRoute::Remote {
                    return;
                }
                if self.route == PlaybackRoute::Remote && !self.seek_coordinator.is_seeking() {
                    match player_state {
                        RemotePlayerState::Playing => self.remote_playing = true,
                        RemotePlayerState::Paused | RemotePlayerState::Idle => {
                            self.remote_playing = false
                        }
                        RemotePlayerState::Loading | RemotePlayerState::Buffering => {}
                    }
                }
                let buffering = self.buffer_health.on_remote_player_state(player_state);
                self.emit_buffering(buffering);
            }
            EngineSignal::SeekCompleted { ticket, reached } => {
                self.on_seek_completed(route, ticket, reached)
            }
        }
    }

    fn on_readiness_changed(&mut self, route: PlaybackRoute, readiness: ItemReadiness) {
        if readiness == ItemReadiness::Failed {
            error!("PlaybackSessionController: {:?} item failed to load", route);
            self.emit(SessionEvent::PlaybackError {
                route,
                message: format!("{:?} engine could not load '{}'", route, self.descriptor.title()),
            });
            let buffering = self.buffer_health.mark_item_failed(route);
            self.emit_buffering(buffering);
        }
        if route != self.route {
            trace!(
                "PlaybackSessionController: readiness {:?} from inactive {:?} engine",
                readiness,
                route
            );
            return;
        }

        let mut engine = self.engines.active(route);
        let outcome = self
            .seek_coordinator
            .on_readiness_changed(readiness, &mut engine, route);
        if let Some(outcome) = outcome {
            self.after_seek_request(outcome);
        }
    }

    fn on_seek_completed(&mut self, route: PlaybackRoute, ticket: SeekTicket, reached: bool) {
        if route != self.route {
            trace!("PlaybackSessionController: completion from inactive {:?} engine", route);
            return;
        }
        let mut engine = self.engines.active(route);
        let settlement = self
            .seek_coordinator
            .on_seek_completed(ticket, reached, &mut engine, route);
        match settlement {
            SeekSettlement::Settled { resumed } => {
                if route == PlaybackRoute::Remote {
                    self.remote_playing = resumed;
                }
                let buffering = self.buffer_health.set_seek_hold(false);
                self.emit_buffering(buffering);
                self.publish_progress();
            }
            SeekSettlement::Reissued | SeekSettlement::AwaitingReadiness => {}
            SeekSettlement::Stale => {
                if !self.seek_coordinator.is_seeking() {
                    let buffering = self.buffer_health.set_seek_hold(false);
                    self.emit_buffering(buffering);
                }
            }
        }
    }

    fn after_seek_request(&mut self, outcome: SeekRequestOutcome) {
        let held = match outcome {
            SeekRequestOutcome::Dropped => false,
            _ => self.seek_coordinator.is_seeking(),
        };
        let buffering = self.buffer_health.set_seek_hold(held);
        self.emit_buffering(buffering);
    }

    fn publish_progress(&mut self) {
        let route = self.route;
        let elapsed_s = self.engines.active(route).current_position();
        let duration_s = self.effective_duration().unwrap_or(0.0);

        let progress = if self.descriptor.is_live_stream() {
            PlaybackProgress {
                route,
                elapsed_s,
                duration_s,
                slider_fraction: 0.0,
                elapsed_label: None,
                remaining_label: None,
                scrubbable: false,
            }
        } else {
            let slider_position_s = self.seek_coordinator.pending_target().unwrap_or(elapsed_s);
            let slider_fraction = if duration_s > 0.0 {
                (slider_position_s / duration_s).clamp(0.0, 1.0) as f32
            } else {
                0.0
            };
            PlaybackProgress {
                route,
                elapsed_s,
                duration_s,
                slider_fraction,
                elapsed_label: format_clock(elapsed_s),
                remaining_label: format_remaining(elapsed_s, duration_s),
                scrubbable: duration_s > 0.0,
            }
        };
        self.emit(SessionEvent::Progress(progress));
    }

    fn effective_duration(&mut self) -> Option<f64> {
        self.engines
            .active(self.route)
            .duration()
            .filter(|duration| duration.is_finite() && *duration > 0.0)
            .or_else(|| Some(self.descriptor.duration_s()).filter(|duration| *duration > 0.0))
    }

    fn active_item_failed(&self) -> bool {
        let failed = self.engines.readiness(self.route) == ItemReadiness::Failed;
        if failed {
            debug!(
                "PlaybackSessionController: {:?} item failed, skipping transport call",
                self.route
            );
        }
        failed
    }

    fn recompute_external_state(&mut self) {
        let next = ExternalState::combine(self.wireless_mirror_active, self.cast_active);
        if next == self.external_state {
            return;
        }
        info!(
            "PlaybackSessionController: external state {:?} -> {:?}",
            self.external_state, next
        );
        self.external_state = next;
        self.emit(SessionEvent::ExternalStateChanged(next));
    }

    fn emit_buffering(&self, change: Option<bool>) {
        if let Some(visible) = change {
            self.emit(SessionEvent::BufferingChanged(visible));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.bus_producer.send(Message::Output(event));
    }
}

#[cfg(test)]
mod tests {
    use super::{PlaybackSessionController, SessionParts};
    use crate::config::SessionConfig;
    use crate::error::SessionError;
    use crate::protocol::{
        CastEvent, EngineEvent, EngineSignal, ExternalState, ItemReadiness, LocalBufferSignal,
        Message, PlaybackRoute, RemotePlayerState, SeekTicket, SessionCommand, SessionEvent,
    };
    use crate::route_monitor::RouteMonitor;
    use crate::simulated::{EngineProbe, SimulatedCastSession, SimulatedLocalEngine};
    use crate::video::VideoDescriptor;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver};

    struct ControllerHarness {
        controller: PlaybackSessionController,
        receiver: Receiver<Message>,
        local: EngineProbe,
        remote: EngineProbe,
        monitor: RouteMonitor,
    }

    impl ControllerHarness {
        fn new() -> Self {
            Self::with_descriptor(descriptor(false))
        }

        fn live() -> Self {
            Self::with_descriptor(descriptor(true))
        }

        fn with_descriptor(descriptor: VideoDescriptor) -> Self {
            let (bus_sender, _) = broadcast::channel(1024);
            let receiver = bus_sender.subscribe();
            let local_engine = SimulatedLocalEngine::new(600.0);
            let remote_session = SimulatedCastSession::new();
            let local = local_engine.probe();
            let remote = remote_session.probe();
            let monitor = RouteMonitor::new();

            let controller = PlaybackSessionController::new(
                SessionParts {
                    descriptor,
                    config: SessionConfig::default(),
                    local_engine: Box::new(local_engine),
                    remote_session: Box::new(remote_session),
                    route_monitor: monitor.clone(),
                },
                bus_sender.subscribe(),
                bus_sender,
            );

            let mut harness = Self {
                controller,
                receiver,
                local,
                remote,
                monitor,
            };
            harness.local.emit_readiness(ItemReadiness::Ready);
            harness.remote.set_session_active(true);
            harness.pump();
            harness
        }

        /// Feeds every queued bus message to the controller and returns the outputs seen.
        fn pump(&mut self) -> Vec<SessionEvent> {
            let mut outputs = Vec::new();
            loop {
                match self.receiver.try_recv() {
                    Ok(Message::Output(event)) => outputs.push(event),
                    Ok(message) => self.controller.handle_message(message),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
            outputs
        }

        fn command(&mut self, command: SessionCommand) -> Vec<SessionEvent> {
            self.controller.handle_message(Message::Session(command));
            self.pump()
        }

        fn cast(&mut self, event: CastEvent) -> Vec<SessionEvent> {
            self.monitor.notify_cast_event(event);
            self.pump()
        }

        fn mirror(&mut self, active: bool) -> Vec<SessionEvent> {
            self.monitor.notify_mirror_changed(active);
            self.pump()
        }
    }

    fn descriptor(live: bool) -> VideoDescriptor {
        VideoDescriptor::new(
            "Harbour at Dusk",
            "Coastlines",
            600.0,
            "https://media.example.com/harbour/master.m3u8",
            "https://media.example.com/harbour/thumb.jpg",
            live,
        )
        .expect("valid descriptor")
    }

    fn external_states(events: &[SessionEvent]) -> Vec<ExternalState> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ExternalStateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn buffering_changes(events: &[SessionEvent]) -> Vec<bool> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::BufferingChanged(visible) => Some(*visible),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_load_starts_local_playback_and_ends_leftover_cast() {
        let (bus_sender, _) = broadcast::channel(64);
        let local_engine = SimulatedLocalEngine::new(600.0);
        let remote_session = SimulatedCastSession::new();
        let local = local_engine.probe();
        let remote = remote_session.probe();
        remote.set_session_active(true);

        let controller = PlaybackSessionController::new(
            SessionParts {
                descriptor: descriptor(false),
                config: SessionConfig::default(),
                local_engine: Box::new(local_engine),
                remote_session: Box::new(remote_session),
                route_monitor: RouteMonitor::new(),
            },
            bus_sender.subscribe(),
            bus_sender,
        );

        assert_eq!(remote.ended_sessions(), 1);
        assert_eq!(
            local.loaded_url().as_deref(),
            Some("https://media.example.com/harbour/master.m3u8")
        );
        assert!(local.is_playing());
        assert!(!local.is_muted());
        assert_eq!(controller.route(), PlaybackRoute::Local);
        assert_eq!(controller.external_state(), ExternalState::None);
    }

    #[test]
    fn test_external_state_follows_mirror_and_cast_flags() {
        let mut harness = ControllerHarness::new();

        assert_eq!(
            external_states(&harness.mirror(true)),
            vec![ExternalState::Mirror]
        );
        assert_eq!(
            external_states(&harness.cast(CastEvent::Started)),
            vec![ExternalState::Both]
        );
        assert_eq!(
            external_states(&harness.mirror(false)),
            vec![ExternalState::Cast]
        );
        assert_eq!(
            external_states(&harness.cast(CastEvent::Ended { error: None })),
            vec![ExternalState::None]
        );
        assert!(external_states(&harness.mirror(false)).is_empty());
    }

    #[test]
    fn test_mirroring_never_switches_engines() {
        let mut harness = ControllerHarness::new();

        harness.mirror(true);

        assert_eq!(harness.controller.route(), PlaybackRoute::Local);
        assert!(harness.local.is_playing());
        assert!(!harness.local.is_muted());
        assert!(harness.remote.load_calls().is_empty());
    }

    #[test]
    fn test_cast_round_trip_preserves_position_and_rate() {
        let mut harness = ControllerHarness::new();
        harness.local.set_position(72.0);

        let events = harness.cast(CastEvent::Started);
        assert!(events.contains(&SessionEvent::RouteChanged(PlaybackRoute::Remote)));
        assert_eq!(harness.remote.load_calls(), vec![(72.0, true)]);
        assert_eq!(
            harness.remote.loaded_content_type(),
            Some("application/x-mpegURL")
        );
        assert!(!harness.local.is_playing());
        assert!(harness.local.is_muted());
        assert_eq!(harness.controller.route(), PlaybackRoute::Remote);

        harness.remote.set_position(72.3);
        let events = harness.cast(CastEvent::Ended { error: None });
        assert!(events.contains(&SessionEvent::RouteChanged(PlaybackRoute::Local)));
        assert_eq!(harness.controller.route(), PlaybackRoute::Local);
        assert!(!harness.local.is_muted());
        assert_eq!(harness.local.seek_calls(), vec![72.3]);
        assert!(harness.controller.is_buffering_visible());

        assert!(harness.local.complete_next_seek(true));
        let events = harness.pump();
        assert_eq!(harness.local.position(), 72.3);
        assert!(harness.local.is_playing());
        assert_eq!(buffering_changes(&events), vec![false]);
    }

    #[test]
    fn test_paused_cast_hands_back_paused() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::Pause);
        harness.local.set_position(10.0);

        harness.cast(CastEvent::Started);
        assert_eq!(harness.remote.load_calls(), vec![(10.0, false)]);

        harness.remote.set_position(14.0);
        harness.cast(CastEvent::Ended { error: None });
        assert!(harness.local.complete_next_seek(true));
        harness.pump();

        assert_eq!(harness.local.position(), 14.0);
        assert!(!harness.local.is_playing());
    }

    #[test]
    fn test_remote_pause_is_carried_back_to_local() {
        let mut harness = ControllerHarness::new();
        harness.cast(CastEvent::Started);

        harness.remote.emit_player_state(RemotePlayerState::Paused);
        harness.pump();
        harness.remote.set_position(30.0);
        harness.cast(CastEvent::Ended { error: None });
        assert!(harness.local.complete_next_seek(true));
        harness.pump();

        assert!(!harness.local.is_playing());
    }

    #[test]
    fn test_local_buffer_signals_ignored_while_casting() {
        let mut harness = ControllerHarness::new();
        harness.cast(CastEvent::Started);

        harness.local.emit_local_buffer(LocalBufferSignal::BufferEmpty(true));
        let events = harness.pump();

        assert!(buffering_changes(&events).is_empty());
        assert!(!harness.controller.is_buffering_visible());

        harness.remote.emit_player_state(RemotePlayerState::Buffering);
        assert_eq!(buffering_changes(&harness.pump()), vec![true]);
    }

    #[test]
    fn test_overlapping_seeks_issue_one_at_a_time() {
        let mut harness = ControllerHarness::new();

        let events = harness.command(SessionCommand::RequestSeek(30.0));
        assert_eq!(buffering_changes(&events), vec![true]);
        harness.command(SessionCommand::RequestSeek(45.0));
        assert_eq!(harness.local.seek_calls(), vec![30.0]);

        assert!(harness.local.complete_next_seek(true));
        harness.pump();
        assert_eq!(harness.local.seek_calls(), vec![30.0, 45.0]);

        assert!(harness.local.complete_next_seek(true));
        let events = harness.pump();
        assert_eq!(harness.local.position(), 45.0);
        assert!(harness.local.is_playing());
        assert_eq!(harness.local.max_outstanding_seeks(), 1);
        assert_eq!(harness.controller.pending_seek_target(), None);
        assert_eq!(buffering_changes(&events), vec![false]);
    }

    #[test]
    fn test_seek_waits_for_readiness() {
        let (bus_sender, _) = broadcast::channel(256);
        let mut receiver = bus_sender.subscribe();
        let local_engine = SimulatedLocalEngine::new(600.0);
        let local = local_engine.probe();
        let mut controller = PlaybackSessionController::new(
            SessionParts {
                descriptor: descriptor(false),
                config: SessionConfig::default(),
                local_engine: Box::new(local_engine),
                remote_session: Box::new(SimulatedCastSession::new()),
                route_monitor: RouteMonitor::new(),
            },
            bus_sender.subscribe(),
            bus_sender,
        );

        controller.request_seek(20.0);
        assert!(local.seek_calls().is_empty());
        assert_eq!(controller.pending_seek_target(), Some(20.0));

        local.emit_readiness(ItemReadiness::Ready);
        while let Ok(message) = receiver.try_recv() {
            controller.handle_message(message);
        }
        assert_eq!(local.seek_calls(), vec![20.0]);
    }

    #[test]
    fn test_seek_targets_are_clamped_to_duration() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::RequestSeek(9_000.0));
        assert_eq!(harness.local.seek_calls(), vec![600.0]);
    }

    #[test]
    fn test_slider_fraction_maps_onto_duration() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::RequestSeekFraction(0.25));
        assert_eq!(harness.local.seek_calls(), vec![150.0]);
    }

    #[test]
    fn test_seeks_go_to_remote_while_casting() {
        let mut harness = ControllerHarness::new();
        harness.cast(CastEvent::Started);

        let events = harness.command(SessionCommand::RequestSeek(90.0));
        assert!(buffering_changes(&events).is_empty());
        assert!(harness.local.seek_calls().is_empty());
        assert_eq!(harness.remote.seek_calls(), vec![90.0]);

        assert!(harness.remote.complete_next_seek(true));
        harness.pump();
        assert!(harness.remote.is_playing());
        assert_eq!(harness.controller.pending_seek_target(), None);
    }

    #[test]
    fn test_completion_from_previous_route_is_ignored() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::RequestSeek(30.0));
        let completion = harness.local.take_next_completion().expect("local seek");

        harness.cast(CastEvent::Started);
        let pause_calls = harness.local.pause_calls();
        completion.complete(true);
        harness.pump();

        assert!(!harness.local.is_playing());
        assert_eq!(harness.local.pause_calls(), pause_calls);
        assert_eq!(harness.remote.load_calls(), vec![(30.0, true)]);
    }

    #[test]
    fn test_failed_cast_load_leaves_session_unchanged() {
        let mut harness = ControllerHarness::new();
        harness.remote.fail_next_load();

        let events = harness.cast(CastEvent::Started);

        assert!(events.is_empty());
        assert_eq!(harness.controller.route(), PlaybackRoute::Local);
        assert_eq!(harness.controller.external_state(), ExternalState::None);
        assert!(harness.local.is_playing());
        assert!(!harness.local.is_muted());
    }

    #[test]
    fn test_cast_start_without_receiver_stays_local() {
        let mut harness = ControllerHarness::new();
        harness.remote.set_session_active(false);

        harness.cast(CastEvent::Started);

        assert_eq!(harness.controller.route(), PlaybackRoute::Local);
        assert!(harness.remote.load_calls().is_empty());
    }

    #[test]
    fn test_repeated_cast_start_loads_once() {
        let mut harness = ControllerHarness::new();
        harness.cast(CastEvent::Started);
        harness.cast(CastEvent::Resumed);
        assert_eq!(harness.remote.load_calls().len(), 1);
    }

    #[test]
    fn test_live_stream_resumes_without_seeking() {
        let mut harness = ControllerHarness::live();
        harness.cast(CastEvent::Started);

        harness.cast(CastEvent::Ended { error: None });

        assert!(harness.local.seek_calls().is_empty());
        assert!(harness.local.is_playing());
        assert!(harness
            .command(SessionCommand::RequestSeek(10.0))
            .is_empty());
        assert!(harness.local.seek_calls().is_empty());
    }

    #[test]
    fn test_missing_remote_position_resumes_in_place() {
        let mut harness = ControllerHarness::new();
        harness.cast(CastEvent::Started);
        harness.remote.invalidate_last_known_position();

        harness.cast(CastEvent::Ended {
            error: Some("receiver went away".to_string()),
        });

        assert!(harness.local.seek_calls().is_empty());
        assert!(harness.local.is_playing());
    }

    #[test]
    fn test_item_failure_reports_error_and_blocks_transport() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::Pause);
        let play_calls = harness.local.play_calls();

        harness.local.emit_readiness(ItemReadiness::Failed);
        let events = harness.pump();
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::PlaybackError {
                route: PlaybackRoute::Local,
                ..
            }
        )));
        assert_eq!(buffering_changes(&events), vec![true]);

        harness.command(SessionCommand::Play);
        harness.command(SessionCommand::RequestSeek(12.0));
        assert_eq!(harness.local.play_calls(), play_calls);
        assert!(harness.local.seek_calls().is_empty());
    }

    #[test]
    fn test_toggle_flips_playback() {
        let mut harness = ControllerHarness::new();

        harness.command(SessionCommand::TogglePlayPause);
        assert!(!harness.local.is_playing());
        harness.command(SessionCommand::TogglePlayPause);
        assert!(harness.local.is_playing());
    }

    #[test]
    fn test_pause_during_seek_holds_after_settle() {
        let mut harness = ControllerHarness::new();

        harness.command(SessionCommand::RequestSeek(30.0));
        harness.command(SessionCommand::Pause);
        assert!(harness.local.complete_next_seek(true));
        harness.pump();

        assert_eq!(harness.local.position(), 30.0);
        assert!(!harness.local.is_playing());
    }

    #[test]
    fn test_toggle_during_seek_decides_resume() {
        let mut harness = ControllerHarness::new();

        harness.command(SessionCommand::RequestSeek(30.0));
        harness.command(SessionCommand::TogglePlayPause);
        assert!(harness.local.complete_next_seek(true));
        harness.pump();
        assert!(!harness.local.is_playing());

        harness.command(SessionCommand::RequestSeek(60.0));
        harness.command(SessionCommand::TogglePlayPause);
        assert!(!harness.local.is_playing());
        assert!(harness.local.complete_next_seek(true));
        harness.pump();
        assert!(harness.local.is_playing());
    }

    #[test]
    fn test_failed_local_item_stays_asserted_after_cast() {
        let mut harness = ControllerHarness::new();
        harness.cast(CastEvent::Started);
        harness.local.emit_readiness(ItemReadiness::Failed);
        harness.pump();
        let play_calls = harness.local.play_calls();

        harness.remote.set_position(50.0);
        let events = harness.cast(CastEvent::Ended { error: None });

        assert_eq!(harness.controller.route(), PlaybackRoute::Local);
        assert!(harness.controller.is_buffering_visible());
        assert_eq!(buffering_changes(&events), vec![true]);
        assert!(harness.local.seek_calls().is_empty());
        assert_eq!(harness.local.play_calls(), play_calls);
    }

    #[test]
    fn test_cast_start_leaves_failed_local_engine_alone() {
        let mut harness = ControllerHarness::new();
        harness.local.emit_readiness(ItemReadiness::Failed);
        harness.pump();
        let pause_calls = harness.local.pause_calls();

        harness.cast(CastEvent::Started);

        assert_eq!(harness.controller.route(), PlaybackRoute::Remote);
        assert_eq!(harness.local.pause_calls(), pause_calls);
        assert!(!harness.local.is_muted());
        assert!(!harness.controller.is_buffering_visible());
    }

    #[test]
    fn test_progress_snapshot_labels_and_slider() {
        let mut harness = ControllerHarness::new();
        harness.local.set_position(30.0);

        let events = harness.command(SessionCommand::Tick);
        let progress = events
            .iter()
            .find_map(|event| match event {
                SessionEvent::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .expect("progress event");
        assert_eq!(progress.elapsed_label.as_deref(), Some("0:30"));
        assert_eq!(progress.remaining_label.as_deref(), Some("-9:30"));
        assert!((progress.slider_fraction - 0.05).abs() < 1e-6);
        assert!(progress.scrubbable);

        harness.command(SessionCommand::RequestSeek(300.0));
        let events = harness.command(SessionCommand::Tick);
        let slider = events.iter().find_map(|event| match event {
            SessionEvent::Progress(progress) => Some(progress.slider_fraction),
            _ => None,
        });
        assert_eq!(slider, Some(0.5));
    }

    #[test]
    fn test_live_progress_is_not_scrubbable() {
        let mut harness = ControllerHarness::live();
        let events = harness.command(SessionCommand::Tick);
        let progress = events
            .iter()
            .find_map(|event| match event {
                SessionEvent::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .expect("progress event");
        assert!(!progress.scrubbable);
        assert_eq!(progress.elapsed_label, None);
    }

    #[test]
    fn test_teardown_during_seek_ignores_late_completion() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::RequestSeek(30.0));
        let completion = harness.local.take_next_completion().expect("seek in flight");
        let ticket = completion.ticket();

        harness.command(SessionCommand::Teardown);
        let play_calls = harness.local.play_calls();
        completion.complete(true);
        harness.controller.handle_message(Message::Engine(EngineEvent {
            route: PlaybackRoute::Local,
            signal: EngineSignal::SeekCompleted {
                ticket,
                reached: true,
            },
        }));
        harness.pump();

        assert!(harness.controller.is_torn_down());
        assert!(harness.local.is_released());
        assert!(harness.remote.is_released());
        assert_eq!(harness.local.play_calls(), play_calls);
    }

    #[test]
    fn test_route_events_after_teardown_are_not_delivered() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::Teardown);

        harness.monitor.notify_cast_event(CastEvent::Started);
        assert!(matches!(harness.receiver.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(harness.controller.route(), PlaybackRoute::Local);
    }

    #[test]
    fn test_double_teardown_dismisses_once() {
        let mut harness = ControllerHarness::new();
        let dismissals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dismissals);
        harness
            .controller
            .set_dismiss_listener(Box::new(move |controller: &PlaybackSessionController| {
                assert!(controller.is_torn_down());
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("first listener");

        let first = harness.command(SessionCommand::Teardown);
        let second = harness.command(SessionCommand::Teardown);
        harness.controller.teardown();

        assert_eq!(dismissals.load(Ordering::SeqCst), 1);
        assert_eq!(
            first
                .iter()
                .filter(|event| **event == SessionEvent::Dismissed)
                .count(),
            1
        );
        assert!(second.is_empty());
    }

    #[test]
    fn test_memory_pressure_tears_down() {
        let mut harness = ControllerHarness::new();
        let events = harness.command(SessionCommand::MemoryPressure);
        assert!(harness.controller.is_torn_down());
        assert!(events.contains(&SessionEvent::Dismissed));
    }

    #[test]
    fn test_second_listener_is_rejected() {
        let mut harness = ControllerHarness::new();
        harness
            .controller
            .set_dismiss_listener(Box::new(|_: &PlaybackSessionController| {}))
            .expect("first listener");

        let result = harness
            .controller
            .set_dismiss_listener(Box::new(|_: &PlaybackSessionController| {}));
        assert!(matches!(result, Err(SessionError::ListenerAlreadyRegistered)));
    }

    #[test]
    fn test_stale_ticket_does_not_settle_current_seek() {
        let mut harness = ControllerHarness::new();
        harness.command(SessionCommand::RequestSeek(30.0));

        harness.controller.handle_message(Message::Engine(EngineEvent {
            route: PlaybackRoute::Local,
            signal: EngineSignal::SeekCompleted {
                ticket: SeekTicket {
                    epoch: 99,
                    target_s: 30.0,
                },
                reached: true,
            },
        }));

        assert_eq!(harness.controller.pending_seek_target(), Some(30.0));
        assert!(harness.controller.is_buffering_visible());
    }
}
