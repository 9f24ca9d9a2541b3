//! Buffering-indicator reconciler.
//!
//! Keeps one [`BufferState`] for the active route only and folds it, together
//! with seek holds and item failures, into the single boolean the UI renders.

use log::debug;

use crate::protocol::{BufferState, LocalBufferSignal, PlaybackRoute, RemotePlayerState};

/// Merges route-dependent readiness signals into one visibility flag.
#[derive(Debug)]
pub struct BufferHealthMonitor {
    route: PlaybackRoute,
    state: BufferState,
    seek_hold: bool,
    item_failed: bool,
    last_visible: bool,
}

impl BufferHealthMonitor {
    pub fn new(route: PlaybackRoute) -> Self {
        Self {
            route,
            state: BufferState::Unknown,
            seek_hold: false,
            item_failed: false,
            last_visible: false,
        }
    }

    pub fn route(&self) -> PlaybackRoute {
        self.route
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Whether the buffering indicator should currently be shown.
    pub fn is_visible(&self) -> bool {
        self.item_failed || self.seek_hold || self.state == BufferState::Buffering
    }

    /// Switches the monitored route. State from the previous route is discarded;
    /// `item_failed` carries the new route's engine failure over.
    pub fn set_route(&mut self, route: PlaybackRoute, item_failed: bool) -> Option<bool> {
        if self.route == route {
            return None;
        }
        debug!(
            "BufferHealthMonitor: now tracking {:?} (item failed: {})",
            route, item_failed
        );
        self.route = route;
        self.state = BufferState::Unknown;
        self.seek_hold = false;
        self.item_failed = item_failed;
        self.publish()
    }

    /// Applies a local-engine signal. Ignored unless the local route is active.
    pub fn on_local_signal(&mut self, signal: LocalBufferSignal) -> Option<bool> {
        if self.route != PlaybackRoute::Local {
            return None;
        }
        let next = match signal {
            LocalBufferSignal::LikelyToKeepUp(true) | LocalBufferSignal::BufferFull(true) => {
                BufferState::Ready
            }
            LocalBufferSignal::BufferEmpty(true) => BufferState::Buffering,
            LocalBufferSignal::LikelyToKeepUp(false)
            | LocalBufferSignal::BufferFull(false)
            | LocalBufferSignal::BufferEmpty(false) => return None,
        };
        self.state = next;
        self.publish()
    }

    /// Applies a remote player-state update. Ignored unless the remote route is active.
    pub fn on_remote_player_state(&mut self, player_state: RemotePlayerState) -> Option<bool> {
        if self.route != PlaybackRoute::Remote {
            return None;
        }
        self.state = match player_state {
            RemotePlayerState::Loading | RemotePlayerState::Buffering => BufferState::Buffering,
            RemotePlayerState::Idle | RemotePlayerState::Playing | RemotePlayerState::Paused => {
                BufferState::Ready
            }
        };
        self.publish()
    }

    /// Holds the indicator while a seek session runs on the local route.
    pub fn set_seek_hold(&mut self, held: bool) -> Option<bool> {
        let held = held && self.route == PlaybackRoute::Local;
        if self.seek_hold == held {
            return None;
        }
        self.seek_hold = held;
        self.publish()
    }

    /// Keeps the indicator asserted after the active item failed.
    pub fn mark_item_failed(&mut self, route: PlaybackRoute) -> Option<bool> {
        if route != self.route {
            return None;
        }
        self.item_failed = true;
        self.publish()
    }

    fn publish(&mut self) -> Option<bool> {
        let visible = self.is_visible();
        if visible == self.last_visible {
            return None;
        }
        self.last_visible = visible;
        Some(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::BufferHealthMonitor;
    use crate::protocol::{BufferState, LocalBufferSignal, PlaybackRoute, RemotePlayerState};

    #[test]
    fn test_local_signals_drive_visibility() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Local);

        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::BufferEmpty(true)),
            Some(true)
        );
        assert_eq!(monitor.state(), BufferState::Buffering);
        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::BufferEmpty(true)),
            None
        );
        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::LikelyToKeepUp(true)),
            Some(false)
        );
        assert_eq!(monitor.state(), BufferState::Ready);
    }

    #[test]
    fn test_false_flags_are_ignored() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Local);
        monitor.on_local_signal(LocalBufferSignal::BufferEmpty(true));

        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::LikelyToKeepUp(false)),
            None
        );
        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::BufferFull(false)),
            None
        );
        assert!(monitor.is_visible());
    }

    #[test]
    fn test_local_signals_ignored_while_remote() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Remote);

        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::BufferEmpty(true)),
            None
        );
        assert!(!monitor.is_visible());
        assert_eq!(
            monitor.on_remote_player_state(RemotePlayerState::Buffering),
            Some(true)
        );
        assert_eq!(
            monitor.on_remote_player_state(RemotePlayerState::Playing),
            Some(false)
        );
    }

    #[test]
    fn test_remote_states_ignored_while_local() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Local);
        assert_eq!(
            monitor.on_remote_player_state(RemotePlayerState::Loading),
            None
        );
    }

    #[test]
    fn test_route_switch_discards_previous_state() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Local);
        monitor.on_local_signal(LocalBufferSignal::BufferEmpty(true));

        assert_eq!(monitor.set_route(PlaybackRoute::Remote, false), Some(false));
        assert_eq!(monitor.state(), BufferState::Unknown);
        assert_eq!(monitor.set_route(PlaybackRoute::Remote, false), None);
    }

    #[test]
    fn test_route_switch_onto_failed_item_stays_asserted() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Remote);
        assert_eq!(monitor.mark_item_failed(PlaybackRoute::Local), None);

        assert_eq!(monitor.set_route(PlaybackRoute::Local, true), Some(true));
        assert!(monitor.is_visible());
        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::BufferFull(true)),
            None
        );
        assert!(monitor.is_visible());
    }

    #[test]
    fn test_seek_hold_only_applies_on_local_route() {
        let mut local = BufferHealthMonitor::new(PlaybackRoute::Local);
        assert_eq!(local.set_seek_hold(true), Some(true));
        assert_eq!(local.set_seek_hold(false), Some(false));

        let mut remote = BufferHealthMonitor::new(PlaybackRoute::Remote);
        assert_eq!(remote.set_seek_hold(true), None);
        assert!(!remote.is_visible());
    }

    #[test]
    fn test_item_failure_keeps_indicator_asserted() {
        let mut monitor = BufferHealthMonitor::new(PlaybackRoute::Local);
        assert_eq!(monitor.mark_item_failed(PlaybackRoute::Remote), None);
        assert_eq!(monitor.mark_item_failed(PlaybackRoute::Local), Some(true));
        assert_eq!(
            monitor.on_local_signal(LocalBufferSignal::LikelyToKeepUp(true)),
            None
        );
        assert!(monitor.is_visible());
    }
}
