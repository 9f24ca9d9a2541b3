//! Event-bus protocol shared by the session controller and its collaborators.
//!
//! Every component talks over a single broadcast bus. Hosts post
//! [`SessionCommand`]s, the route monitor posts [`RouteEvent`]s, engines post
//! [`EngineEvent`]s, and the controller answers with [`SessionEvent`]s.

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Session(SessionCommand),
    Route(RouteEvent),
    Engine(EngineEvent),
    Output(SessionEvent),
}

/// Which engine is authoritative for transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackRoute {
    Local,
    Remote,
}

/// UI-facing combination of mirroring and casting activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalState {
    None,
    Mirror,
    Cast,
    Both,
}

impl ExternalState {
    /// Combines the two independent route inputs into one displayable state.
    pub fn combine(wireless_mirror_active: bool, cast_active: bool) -> Self {
        match (wireless_mirror_active, cast_active) {
            (false, false) => ExternalState::None,
            (true, false) => ExternalState::Mirror,
            (false, true) => ExternalState::Cast,
            (true, true) => ExternalState::Both,
        }
    }
}

/// Buffer health of the currently active route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    #[default]
    Unknown,
    Buffering,
    Ready,
}

/// Readiness of an engine's current media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemReadiness {
    #[default]
    Unknown,
    Ready,
    Failed,
}

/// Remote cast session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum CastEvent {
    Started,
    Resumed,
    Ended { error: Option<String> },
}

/// Notifications produced by the route monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    MirrorChanged(bool),
    Cast(CastEvent),
}

/// Buffer signals reported by the local engine's current item.
///
/// Each variant carries the new value of the observed flag; a `false` value
/// never drives a transition on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalBufferSignal {
    LikelyToKeepUp(bool),
    BufferFull(bool),
    BufferEmpty(bool),
}

/// Player state reported by a remote receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePlayerState {
    Idle,
    Loading,
    Buffering,
    Playing,
    Paused,
}

/// Identifies one issued engine seek.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekTicket {
    /// Coordinator epoch at issue time. Bumped whenever the active engine changes.
    pub epoch: u64,
    /// Target position in seconds the seek was issued for.
    pub target_s: f64,
}

/// Engine-originated signal payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    ReadinessChanged(ItemReadiness),
    LocalBuffer(LocalBufferSignal),
    RemotePlayerState(RemotePlayerState),
    SeekCompleted { ticket: SeekTicket, reached: bool },
}

/// An engine signal tagged with the route of the engine that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub route: PlaybackRoute,
    pub signal: EngineSignal,
}

/// Host-to-controller commands.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Play,
    Pause,
    TogglePlayPause,
    /// Absolute seek target in seconds.
    RequestSeek(f64),
    /// Slider position in `[0, 1]`.
    RequestSeekFraction(f32),
    /// Periodic position refresh.
    Tick,
    Teardown,
    MemoryPressure,
}

/// Elapsed/duration snapshot for label and slider rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackProgress {
    pub route: PlaybackRoute,
    pub elapsed_s: f64,
    pub duration_s: f64,
    /// Slider position in `[0, 1]`. Tracks the pending seek target while a seek is active.
    pub slider_fraction: f32,
    pub elapsed_label: Option<String>,
    pub remaining_label: Option<String>,
    /// False for live streams, which have no meaningful scrub position.
    pub scrubbable: bool,
}

/// Controller-to-host notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ExternalStateChanged(ExternalState),
    BufferingChanged(bool),
    RouteChanged(PlaybackRoute),
    Progress(PlaybackProgress),
    PlaybackError {
        route: PlaybackRoute,
        message: String,
    },
    Dismissed,
}

#[cfg(test)]
mod tests {
    use super::ExternalState;

    #[test]
    fn test_combine_matches_fixed_table() {
        assert_eq!(ExternalState::combine(false, false), ExternalState::None);
        assert_eq!(ExternalState::combine(true, false), ExternalState::Mirror);
        assert_eq!(ExternalState::combine(false, true), ExternalState::Cast);
        assert_eq!(ExternalState::combine(true, true), ExternalState::Both);
    }
}
