//! Chase-time seek coalescing.
//!
//! Only the latest requested target is tracked. At most one engine seek is
//! outstanding at any instant; when a completion arrives for a target that is
//! no longer current, the engine is re-seeked to the current one. Superseded
//! targets are discarded, never queued.

use log::{debug, trace, warn};

use crate::engine::{EventSink, SeekCompletion, TransportEngine};
use crate::protocol::{ItemReadiness, PlaybackRoute, SeekTicket};

/// Consecutive unreached completions for the current target before giving up on it.
const MAX_UNREACHED_REISSUES: u32 = 3;

/// What a seek request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekRequestOutcome {
    /// Same target is already in flight.
    Ignored,
    /// Engine not ready yet; the target stays pending until readiness arrives.
    Deferred,
    /// An engine seek was issued for the target.
    Issued,
    /// A seek is already in flight; the target will be chased on its completion.
    Coalesced,
    /// Engine item has failed; the target was dropped.
    Dropped,
}

/// What a seek completion resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekSettlement {
    /// The last requested target was applied. `resumed` tells whether playback restarted.
    Settled { resumed: bool },
    /// A newer target was pending; the engine was seeked again.
    Reissued,
    /// A newer target is pending but the engine is not ready; it waits for readiness.
    AwaitingReadiness,
    /// Completion belongs to an old engine epoch or a dropped target.
    Stale,
}

/// Coalesces seek requests against whichever engine is currently active.
pub struct SeekCoordinator {
    completion_sink: EventSink,
    epoch: u64,
    pending_target: Option<f64>,
    in_flight: Option<SeekTicket>,
    rate_before_seek: f32,
    unreached_reissues: u32,
}

impl SeekCoordinator {
    pub fn new(completion_sink: EventSink) -> Self {
        Self {
            completion_sink,
            epoch: 0,
            pending_target: None,
            in_flight: None,
            rate_before_seek: 0.0,
            unreached_reissues: 0,
        }
    }

    pub fn pending_target(&self) -> Option<f64> {
        self.pending_target
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True from the first request of a seek session until it settles or is dropped.
    pub fn is_seeking(&self) -> bool {
        self.pending_target.is_some() || self.in_flight.is_some()
    }

    pub fn rate_before_seek(&self) -> f32 {
        self.rate_before_seek
    }

    /// Overrides the rate restored when the running seek session settles.
    /// No-op while idle.
    pub fn set_resume_rate(&mut self, rate: f32) {
        if !self.is_seeking() {
            return;
        }
        debug!("SeekCoordinator: resume rate now {}", rate);
        self.rate_before_seek = rate;
    }

    /// Requests a seek, capturing the engine's rate if this starts a new seek session.
    pub fn request_seek(
        &mut self,
        target_s: f64,
        engine: &mut dyn TransportEngine,
        route: PlaybackRoute,
    ) -> SeekRequestOutcome {
        let rate = engine.rate();
        self.request_seek_with_rate(target_s, rate, engine, route)
    }

    /// Requests a seek, using `rate_before_seek` instead of the engine's own rate
    /// if this starts a new seek session. Used for position handoff between engines.
    pub fn request_seek_with_rate(
        &mut self,
        target_s: f64,
        rate_before_seek: f32,
        engine: &mut dyn TransportEngine,
        route: PlaybackRoute,
    ) -> SeekRequestOutcome {
        if self.in_flight.is_some() && self.pending_target == Some(target_s) {
            trace!("SeekCoordinator: {:.3}s already in flight", target_s);
            return SeekRequestOutcome::Ignored;
        }

        if !self.is_seeking() {
            self.rate_before_seek = rate_before_seek;
            engine.pause();
            debug!(
                "SeekCoordinator: seek session started on {:?} (rate before seek {})",
                route, self.rate_before_seek
            );
        }
        self.pending_target = Some(target_s);
        self.unreached_reissues = 0;

        if self.in_flight.is_some() {
            return SeekRequestOutcome::Coalesced;
        }
        self.try_issue(engine, route)
    }

    /// Re-checks a deferred target after the active engine's readiness changed.
    pub fn on_readiness_changed(
        &mut self,
        readiness: ItemReadiness,
        engine: &mut dyn TransportEngine,
        route: PlaybackRoute,
    ) -> Option<SeekRequestOutcome> {
        match readiness {
            ItemReadiness::Unknown => None,
            ItemReadiness::Failed => {
                if !self.is_seeking() {
                    return None;
                }
                warn!(
                    "SeekCoordinator: {:?} item failed, dropping pending seek to {:?}",
                    route, self.pending_target
                );
                self.drop_session();
                Some(SeekRequestOutcome::Dropped)
            }
            ItemReadiness::Ready => {
                if self.pending_target.is_none() || self.in_flight.is_some() {
                    return None;
                }
                Some(self.try_issue(engine, route))
            }
        }
    }

    /// Reconciles an engine completion against the current pending target.
    pub fn on_seek_completed(
        &mut self,
        ticket: SeekTicket,
        reached: bool,
        engine: &mut dyn TransportEngine,
        route: PlaybackRoute,
    ) -> SeekSettlement {
        if ticket.epoch != self.epoch || self.in_flight != Some(ticket) {
            trace!(
                "SeekCoordinator: ignoring stale completion for {:.3}s (epoch {})",
                ticket.target_s,
                ticket.epoch
            );
            return SeekSettlement::Stale;
        }
        self.in_flight = None;

        let Some(pending) = self.pending_target else {
            return SeekSettlement::Stale;
        };

        if pending == ticket.target_s {
            if !reached && self.unreached_reissues < MAX_UNREACHED_REISSUES {
                self.unreached_reissues += 1;
                debug!(
                    "SeekCoordinator: seek to {:.3}s not reached, retry {}",
                    pending, self.unreached_reissues
                );
                return match self.try_issue(engine, route) {
                    SeekRequestOutcome::Issued => SeekSettlement::Reissued,
                    SeekRequestOutcome::Dropped => SeekSettlement::Stale,
                    _ => SeekSettlement::AwaitingReadiness,
                };
            }
            if !reached {
                warn!(
                    "SeekCoordinator: giving up on reaching {:.3}s after {} retries",
                    pending, self.unreached_reissues
                );
            }
            self.pending_target = None;
            self.unreached_reissues = 0;
            let resumed = self.rate_before_seek > 0.0;
            if resumed {
                engine.play();
            }
            debug!(
                "SeekCoordinator: settled at {:.3}s on {:?} (resumed: {})",
                pending, route, resumed
            );
            return SeekSettlement::Settled { resumed };
        }

        debug!(
            "SeekCoordinator: stale completion for {:.3}s, chasing {:.3}s",
            ticket.target_s, pending
        );
        match self.try_issue(engine, route) {
            SeekRequestOutcome::Issued => SeekSettlement::Reissued,
            SeekRequestOutcome::Dropped => SeekSettlement::Stale,
            _ => SeekSettlement::AwaitingReadiness,
        }
    }

    /// Forgets all seek state and invalidates outstanding completions.
    /// Called whenever the active engine changes.
    pub fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.drop_session();
    }

    fn drop_session(&mut self) {
        self.pending_target = None;
        self.in_flight = None;
        self.unreached_reissues = 0;
    }

    fn try_issue(
        &mut self,
        engine: &mut dyn TransportEngine,
        route: PlaybackRoute,
    ) -> SeekRequestOutcome {
        let Some(target_s) = self.pending_target else {
            return SeekRequestOutcome::Ignored;
        };
        match engine.item_readiness() {
            ItemReadiness::Unknown => {
                debug!(
                    "SeekCoordinator: {:?} not ready, deferring seek to {:.3}s",
                    route, target_s
                );
                SeekRequestOutcome::Deferred
            }
            ItemReadiness::Failed => {
                warn!(
                    "SeekCoordinator: {:?} item failed, dropping seek to {:.3}s",
                    route, target_s
                );
                self.drop_session();
                SeekRequestOutcome::Dropped
            }
            ItemReadiness::Ready => {
                let ticket = SeekTicket {
                    epoch: self.epoch,
                    target_s,
                };
                self.in_flight = Some(ticket);
                trace!("SeekCoordinator: issuing seek to {:.3}s on {:?}", target_s, route);
                engine.seek(
                    target_s,
                    SeekCompletion::new(self.completion_sink.clone(), route, ticket),
                );
                SeekRequestOutcome::Issued
            }
        }
    }
}
