//! Video playback session controller that hands one session back and forth
//! between a local engine and a remote cast receiver.

pub mod bootstrap;
pub mod buffer_health;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod route_monitor;
pub mod seek_coordinator;
pub mod session_controller;
pub mod simulated;
pub mod ticker;
pub mod time_format;
pub mod video;

pub use bootstrap::{spawn_session, RunningSession};
pub use config::Config;
pub use error::{Result, SessionError};
pub use protocol::{ExternalState, Message, PlaybackRoute, SessionEvent};
pub use route_monitor::RouteMonitor;
pub use session_controller::{
    PlaybackSessionController, SessionDismissListener, SessionHandle, SessionParts,
};
pub use video::VideoDescriptor;
