//! External route observer.
//!
//! Platform glue calls [`RouteMonitor::notify_mirror_changed`] and
//! [`RouteMonitor::notify_cast_event`] from any thread. The monitor forwards
//! them onto the subscribed controller's bus; it keeps no route state itself.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::broadcast::Sender;

use crate::engine::{EventSink, Subscription};
use crate::protocol::{CastEvent, Message, RouteEvent};

/// Cloneable route observer scoped to one controller's lifetime.
#[derive(Clone, Default)]
pub struct RouteMonitor {
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl RouteMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes future notifications onto `bus_producer`. Returns the handle that
    /// [`RouteMonitor::unsubscribe`] consumes.
    pub fn subscribe(&self, bus_producer: Sender<Message>) -> Subscription {
        let (sink, subscription) = EventSink::new(bus_producer);
        let mut slot = match self.sink.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(EventSink::is_open) {
            warn!("RouteMonitor: replacing a live subscription");
        }
        *slot = Some(sink);
        subscription
    }

    /// Detaches the subscriber. Every notification after this call is a no-op,
    /// including ones already racing on other threads.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.cancel();
        let mut slot = match self.sink.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }

    pub fn notify_mirror_changed(&self, active: bool) {
        self.forward(RouteEvent::MirrorChanged(active));
    }

    pub fn notify_cast_event(&self, event: CastEvent) {
        self.forward(RouteEvent::Cast(event));
    }

    fn forward(&self, event: RouteEvent) {
        let sink = match self.sink.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sink) = sink else {
            debug!("RouteMonitor: dropping {:?} (no subscriber)", event);
            return;
        };
        if !sink.post(Message::Route(event)) {
            debug!("RouteMonitor: subscriber gone, notification dropped");
        }
    }
}
