use std::{thread, time::Duration};

use castlane::{
    config::Config,
    protocol::{CastEvent, ItemReadiness, Message, RemotePlayerState, SessionEvent},
    simulated::{SimulatedCastSession, SimulatedLocalEngine},
    spawn_session, PlaybackSessionController, RouteMonitor, SessionDismissListener, SessionParts,
    VideoDescriptor,
};
use log::{info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

const STEP: Duration = Duration::from_millis(250);

fn load_config() -> Config {
    let Some(path) = Config::default_path() else {
        warn!("No config directory available, using defaults");
        return Config::default();
    };
    match Config::load_or_create(&path) {
        Ok(config) => config,
        Err(err) => {
            warn!("Failed to load config from {}: {}", path.display(), err);
            Config::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = load_config();
    log::set_max_level(config.logging.level_filter());

    let descriptor = VideoDescriptor::new(
        "Harbour at Dusk",
        "Coastlines",
        1_342.0,
        "https://media.example.com/harbour/master.m3u8",
        "https://media.example.com/harbour/thumb.jpg",
        false,
    )?;

    let (bus_sender, _) = broadcast::channel(config.session.bus_capacity);
    let mut output_receiver = bus_sender.subscribe();
    let printer = thread::Builder::new()
        .name("castlane-output".to_string())
        .spawn(move || loop {
            match output_receiver.blocking_recv() {
                Ok(Message::Output(SessionEvent::Progress(progress))) => info!(
                    "progress {:?}: {} / {} (slider {:.2})",
                    progress.route,
                    progress.elapsed_label.as_deref().unwrap_or("--:--"),
                    progress.remaining_label.as_deref().unwrap_or("--:--"),
                    progress.slider_fraction
                ),
                Ok(Message::Output(SessionEvent::Dismissed)) => {
                    info!("session dismissed");
                    break;
                }
                Ok(Message::Output(event)) => info!("session event: {:?}", event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("output lagged by {} messages", skipped),
                Err(RecvError::Closed) => break,
            }
        })?;

    let local_engine = SimulatedLocalEngine::new(descriptor.duration_s());
    let remote_session = SimulatedCastSession::new();
    let local = local_engine.probe();
    let remote = remote_session.probe();
    let route_monitor = RouteMonitor::new();

    let listener: Box<dyn SessionDismissListener> =
        Box::new(|controller: &PlaybackSessionController| {
            info!(
                "'{}' released, returning to the video list",
                controller.descriptor().title()
            );
        });
    let session = spawn_session(
        SessionParts {
            descriptor,
            config: config.session.clone(),
            local_engine: Box::new(local_engine),
            remote_session: Box::new(remote_session),
            route_monitor: route_monitor.clone(),
        },
        bus_sender,
        Some(listener),
    )?;
    let handle = session.handle.clone();

    local.emit_readiness(ItemReadiness::Ready);
    thread::sleep(STEP);

    info!("Scrubbing locally");
    handle.request_seek(120.0);
    handle.request_seek(185.0);
    thread::sleep(STEP);
    local.complete_next_seek(true);
    thread::sleep(STEP);
    local.complete_next_seek(true);
    thread::sleep(STEP);

    info!("Mirroring display");
    route_monitor.notify_mirror_changed(true);
    thread::sleep(STEP);

    info!("Casting to receiver");
    remote.set_session_active(true);
    route_monitor.notify_cast_event(CastEvent::Started);
    thread::sleep(STEP * 4);

    handle.request_seek_fraction(0.5);
    thread::sleep(STEP);
    remote.complete_next_seek(true);
    thread::sleep(STEP);
    remote.emit_player_state(RemotePlayerState::Playing);
    thread::sleep(STEP * 4);

    info!("Receiver disconnected");
    route_monitor.notify_cast_event(CastEvent::Ended { error: None });
    thread::sleep(STEP);
    local.complete_next_seek(true);
    route_monitor.notify_mirror_changed(false);
    thread::sleep(STEP * 4);

    handle.toggle_play_pause();
    thread::sleep(STEP);
    handle.teardown();

    if session.worker.join().is_err() {
        warn!("session thread panicked");
    }
    if printer.join().is_err() {
        warn!("output thread panicked");
    }
    Ok(())
}
