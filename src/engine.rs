//! Capability interfaces for the local and remote playback engines.
//!
//! Engines never mutate session state directly. They report everything by
//! posting onto the bus through an [`EventSink`], which the controller can
//! close at teardown so late deliveries become no-ops.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast::Sender;

use crate::error::Result;
use crate::protocol::{
    EngineEvent, EngineSignal, ItemReadiness, Message, PlaybackRoute, SeekTicket,
};
use crate::video::VideoDescriptor;

/// Gated producer handle onto the session bus.
#[derive(Clone)]
pub struct EventSink {
    bus_producer: Sender<Message>,
    open: Arc<AtomicBool>,
}

/// Cancellation handle paired with one [`EventSink`].
#[derive(Debug)]
pub struct Subscription {
    open: Arc<AtomicBool>,
}

impl EventSink {
    /// Creates an open sink and the handle that closes it.
    pub fn new(bus_producer: Sender<Message>) -> (Self, Subscription) {
        let open = Arc::new(AtomicBool::new(true));
        (
            Self {
                bus_producer,
                open: Arc::clone(&open),
            },
            Subscription { open },
        )
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Posts a message unless the subscription was cancelled. Returns whether it was sent.
    pub fn post(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        self.bus_producer.send(message).is_ok()
    }

    /// Posts an engine signal tagged with `route`.
    pub fn post_engine(&self, route: PlaybackRoute, signal: EngineSignal) -> bool {
        self.post(Message::Engine(EngineEvent { route, signal }))
    }
}

impl Subscription {
    /// Closes the paired sink. Safe to call more than once.
    pub fn cancel(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }
}

/// One-shot completion for an engine seek.
///
/// The engine calls [`SeekCompletion::complete`] from whatever thread its seek
/// finishes on; the result is re-posted onto the controller's bus.
pub struct SeekCompletion {
    sink: EventSink,
    route: PlaybackRoute,
    ticket: SeekTicket,
}

impl SeekCompletion {
    pub fn new(sink: EventSink, route: PlaybackRoute, ticket: SeekTicket) -> Self {
        Self {
            sink,
            route,
            ticket,
        }
    }

    pub fn ticket(&self) -> SeekTicket {
        self.ticket
    }

    pub fn complete(self, reached: bool) {
        let _ = self.sink.post_engine(
            self.route,
            EngineSignal::SeekCompleted {
                ticket: self.ticket,
                reached,
            },
        );
    }
}

/// Transport primitives shared by both engines.
pub trait TransportEngine: Send {
    /// Starts delivering readiness, buffering, and player-state signals into `sink`.
    fn subscribe(&mut self, sink: EventSink);
    fn play(&mut self);
    fn pause(&mut self);
    /// Starts an asynchronous seek. Completion order across back-to-back seeks is not guaranteed.
    fn seek(&mut self, target_s: f64, completion: SeekCompletion);
    fn current_position(&self) -> f64;
    /// Item duration in seconds, or `None` while unknown.
    fn duration(&self) -> Option<f64>;
    fn item_readiness(&self) -> ItemReadiness;
    /// Current playback rate. Anything above zero means playing.
    fn rate(&self) -> f32;
    /// Releases engine resources. Called once during teardown.
    fn release(&mut self);
}

/// Local decode/render engine.
pub trait PlaybackEngine: TransportEngine {
    fn load_item(&mut self, descriptor: &VideoDescriptor);
    fn set_muted(&mut self, muted: bool);
}

/// Remote casting engine.
pub trait RemoteCastSession: TransportEngine {
    /// True when a receiver session is connected and can accept media.
    fn has_active_session(&self) -> bool;
    fn load_media(
        &mut self,
        descriptor: &VideoDescriptor,
        start_position_s: f64,
        autoplay: bool,
    ) -> Result<()>;
    /// Position estimate extrapolated from the last status update.
    fn approximate_position(&self) -> f64;
    /// Last position reported by the receiver, if it is meaningful.
    fn last_known_position(&self) -> Option<f64>;
    /// Stops casting and disconnects from the receiver.
    fn end_session(&mut self);
}
