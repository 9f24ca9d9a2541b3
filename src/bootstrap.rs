use std::{
    any::Any,
    thread::{self, JoinHandle},
};

use tokio::sync::broadcast;

use crate::{
    error::Result,
    protocol::Message,
    session_controller::{
        PlaybackSessionController, SessionDismissListener, SessionHandle, SessionParts,
    },
};

/// A controller running on its own thread.
pub struct RunningSession {
    pub handle: SessionHandle,
    pub worker: JoinHandle<()>,
}

pub fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// Builds a controller on `bus_sender` and runs it on a dedicated thread until teardown.
pub fn spawn_session(
    parts: SessionParts,
    bus_sender: broadcast::Sender<Message>,
    dismiss_listener: Option<Box<dyn SessionDismissListener>>,
) -> Result<RunningSession> {
    let controller_bus_receiver = bus_sender.subscribe();
    let controller_bus_sender = bus_sender.clone();
    let mut controller =
        PlaybackSessionController::new(parts, controller_bus_receiver, controller_bus_sender);
    if let Some(listener) = dismiss_listener {
        controller.set_dismiss_listener(listener)?;
    }
    let handle = controller.handle();

    let worker = thread::Builder::new()
        .name("castlane-session".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                controller.run();
            }));
            if let Err(payload) = run_result {
                log::error!(
                    "PlaybackSessionController thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    Ok(RunningSession { handle, worker })
}
