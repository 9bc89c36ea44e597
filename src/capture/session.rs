//! Capture session manager
//!
//! Owns the capture session: its single camera input, the frame output
//! sink and the running flag. Every mutation runs on the `capture-control`
//! thread, one command at a time. Frames are pulled on a separate
//! `capture-frames` thread so analysis never stalls session control.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::device::{CameraDevice, DeviceProvider, Facing, SessionPreset};
use super::frame::Frame;
use super::preview::PreviewSurface;
use super::CaptureConfig;
use crate::error::CaptureError;

/// Commands processed by the control thread
enum SessionCommand {
    Configure,
    Start,
    Stop,
    SwitchCamera,
    RuntimeError(String),
    Flush(Sender<()>),
    Shutdown,
}

/// Mutable session state, guarded by one lock
///
/// Holding the lock for a whole mutation is the configuration
/// transaction: the delivery thread cannot read from a half-swapped input.
#[derive(Default)]
struct Session {
    input: Option<Box<dyn CameraDevice>>,
    output_attached: bool,
    preset: Option<SessionPreset>,
    running: bool,
    /// Set when a runtime fault stopped the session behind our back
    interrupted: bool,
    configured: bool,
    next_sequence: u64,
}

struct Shared {
    session: Mutex<Session>,
    shutdown: AtomicBool,
    setups: AtomicUsize,
    restarts: AtomicUsize,
}

/// Handle to the capture session and its two background threads
pub struct CaptureSessionManager {
    commands: Sender<SessionCommand>,
    frames: watch::Receiver<Option<Frame>>,
    preview: watch::Receiver<Option<PreviewSurface>>,
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureSessionManager {
    /// Spawn the control and delivery threads
    pub fn new(provider: Arc<dyn DeviceProvider>, config: CaptureConfig) -> Result<Self, CaptureError> {
        let (commands, command_rx) = unbounded();
        let (frames_tx, frames) = watch::channel(None);
        let (preview_tx, preview) = watch::channel(None);

        let shared = Arc::new(Shared {
            session: Mutex::new(Session::default()),
            shutdown: AtomicBool::new(false),
            setups: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
        });

        let control = Control {
            shared: shared.clone(),
            provider,
            config: config.clone(),
            preview_tx,
            frames_rx: frames.clone(),
            next_surface_id: 1,
        };
        let control_handle = std::thread::Builder::new()
            .name("capture-control".to_string())
            .spawn(move || control.run(command_rx))?;

        let delivery_shared = shared.clone();
        let delivery_commands = commands.clone();
        let interval = Duration::from_secs_f64(1.0 / config.max_fps.max(1) as f64);
        let delivery_handle = std::thread::Builder::new()
            .name("capture-frames".to_string())
            .spawn(move || deliver_frames(delivery_shared, delivery_commands, frames_tx, interval))?;

        Ok(Self {
            commands,
            frames,
            preview,
            shared,
            threads: Mutex::new(vec![control_handle, delivery_handle]),
        })
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            warn!("Capture control thread has exited, command dropped");
        }
    }

    /// Set up input, output and preset. No-op once configured.
    pub fn configure(&self) {
        self.send(SessionCommand::Configure);
    }

    /// Start streaming if not already running
    pub fn start(&self) {
        self.send(SessionCommand::Start);
    }

    /// Stop streaming if running
    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    /// Swap the input for the camera facing the other way
    pub fn switch_camera(&self) {
        self.send(SessionCommand::SwitchCamera);
    }

    /// Report an asynchronous hardware fault; triggers one restart attempt
    /// when it hit a running session. Faults on a stopped session are only
    /// logged.
    pub fn report_runtime_error(&self, reason: impl Into<String>) {
        {
            let mut session = self.shared.session.lock();
            if session.running {
                session.interrupted = true;
            }
        }
        self.send(SessionCommand::RuntimeError(reason.into()));
    }

    /// Block until every command issued before this call has been applied
    pub fn flush(&self) -> Result<(), CaptureError> {
        let (tx, rx) = bounded(1);
        self.commands
            .send(SessionCommand::Flush(tx))
            .map_err(|_| CaptureError::Disconnected)?;
        rx.recv().map_err(|_| CaptureError::Disconnected)
    }

    /// Subscribe to delivered frames. Only the newest frame is retained.
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        let mut rx = self.frames.clone();
        rx.mark_unchanged();
        rx
    }

    /// Subscribe to preview surface publication
    pub fn preview(&self) -> watch::Receiver<Option<PreviewSurface>> {
        self.preview.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.session.lock().running
    }

    pub fn is_configured(&self) -> bool {
        self.shared.session.lock().configured
    }

    /// Facing of the attached input, if any
    pub fn current_facing(&self) -> Option<Facing> {
        self.shared.session.lock().input.as_ref().map(|d| d.facing())
    }

    /// Name of the attached input, if any
    pub fn input_name(&self) -> Option<String> {
        self.shared
            .session
            .lock()
            .input
            .as_ref()
            .map(|d| d.name().to_string())
    }

    /// Preset chosen during configuration
    pub fn preset(&self) -> Option<SessionPreset> {
        self.shared.session.lock().preset
    }

    /// Number of completed hardware setups
    pub fn setup_count(&self) -> usize {
        self.shared.setups.load(Ordering::SeqCst)
    }

    /// Number of automatic restarts after runtime faults
    pub fn restart_count(&self) -> usize {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    /// Stop the session and join both threads
    pub fn shutdown(&self) {
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        let _ = self.commands.send(SessionCommand::Shutdown);
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for handle in handles {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
        info!("Capture session shut down");
    }
}

impl Drop for CaptureSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the control thread
struct Control {
    shared: Arc<Shared>,
    provider: Arc<dyn DeviceProvider>,
    config: CaptureConfig,
    preview_tx: watch::Sender<Option<PreviewSurface>>,
    frames_rx: watch::Receiver<Option<Frame>>,
    next_surface_id: u64,
}

impl Control {
    fn run(mut self, commands: Receiver<SessionCommand>) {
        debug!("Capture control thread started");
        while let Ok(command) = commands.recv() {
            match command {
                SessionCommand::Configure => self.configure(),
                SessionCommand::Start => self.start(),
                SessionCommand::Stop => self.stop(),
                SessionCommand::SwitchCamera => self.switch_camera(),
                SessionCommand::RuntimeError(reason) => self.recover(&reason),
                SessionCommand::Flush(reply) => {
                    let _ = reply.send(());
                }
                SessionCommand::Shutdown => break,
            }
        }

        let mut session = self.shared.session.lock();
        stop_session(&mut session);
        session.input = None;
        session.output_attached = false;
        debug!("Capture control thread exiting");
    }

    fn configure(&mut self) {
        let mut session = self.shared.session.lock();
        if session.configured {
            debug!("Capture session already configured, skipping");
            return;
        }

        stop_session(&mut session);
        session.input = None;
        session.output_attached = false;
        session.preset = None;

        let facing = self.config.default_facing;
        let mut device = match self.provider.acquire(facing) {
            Ok(device) => device,
            Err(e) => {
                warn!("Capture configuration failed: {}", e);
                return;
            }
        };

        let preset = pick_preset(device.as_mut());
        info!("Attached {} ({:?} preset)", device.name(), preset);

        session.input = Some(device);
        session.output_attached = true;
        session.preset = preset;
        session.configured = true;
        self.shared.setups.fetch_add(1, Ordering::SeqCst);
        drop(session);

        let surface = PreviewSurface::new(self.next_surface_id, self.frames_rx.clone());
        self.next_surface_id += 1;
        self.preview_tx.send_replace(Some(surface));
        debug!("Preview surface published");
    }

    fn start(&mut self) {
        let mut session = self.shared.session.lock();
        session.interrupted = false;
        start_session(&mut session);
    }

    fn stop(&mut self) {
        let mut session = self.shared.session.lock();
        session.interrupted = false;
        stop_session(&mut session);
    }

    fn switch_camera(&mut self) {
        let mut session = self.shared.session.lock();
        let was_running = session.running;
        stop_session(&mut session);

        let Some(current) = session.input.take() else {
            warn!("Cannot switch camera: session has no input");
            return;
        };
        let target = current.facing().opposite();

        let previous = match self.provider.acquire(target) {
            Ok(mut device) => {
                let preset = pick_preset(device.as_mut());
                info!("Switched camera to {}", device.name());
                session.input = Some(device);
                (current, std::mem::replace(&mut session.preset, preset))
            }
            Err(e) => {
                warn!("Camera switch failed, keeping {}: {}", current.name(), e);
                session.input = Some(current);
                if was_running {
                    start_session(&mut session);
                }
                return;
            }
        };
        drop(session);

        // Give the new device a moment before streaming from it
        if !self.config.switch_settle.is_zero() {
            std::thread::sleep(self.config.switch_settle);
        }

        if was_running {
            let mut session = self.shared.session.lock();
            if !start_session(&mut session) {
                warn!("New camera failed to start, restoring {}", previous.0.name());
                session.input = Some(previous.0);
                session.preset = previous.1;
                start_session(&mut session);
            }
        }
    }

    fn recover(&mut self, reason: &str) {
        warn!("Capture runtime error: {}", reason);
        let mut session = self.shared.session.lock();
        if !session.interrupted {
            debug!("Session was stopped deliberately, not restarting");
            return;
        }
        session.interrupted = false;
        self.shared.restarts.fetch_add(1, Ordering::SeqCst);
        stop_session(&mut session);
        if start_session(&mut session) {
            info!("Capture session restarted after runtime error");
        } else {
            error!("Capture session restart failed");
        }
    }
}

/// Highest preset the device supports, applied to it
fn pick_preset(device: &mut dyn CameraDevice) -> Option<SessionPreset> {
    let preset = SessionPreset::DESCENDING
        .into_iter()
        .find(|p| device.supports_preset(*p))?;
    device.set_preset(preset);
    Some(preset)
}

/// Returns whether the session is running afterwards
fn start_session(session: &mut Session) -> bool {
    if session.running {
        return true;
    }
    let Some(device) = session.input.as_mut() else {
        warn!("Cannot start capture session: no input attached");
        return false;
    };
    match device.start() {
        Ok(()) => {
            session.running = true;
            info!("Capture session started");
            true
        }
        Err(e) => {
            warn!("Failed to start {}: {}", device.name(), e);
            false
        }
    }
}

fn stop_session(session: &mut Session) {
    if !session.running {
        return;
    }
    if let Some(device) = session.input.as_mut() {
        device.stop();
    }
    session.running = false;
    info!("Capture session stopped");
}

/// Frame delivery loop, paced at the configured frame interval
fn deliver_frames(
    shared: Arc<Shared>,
    commands: Sender<SessionCommand>,
    sink: watch::Sender<Option<Frame>>,
    interval: Duration,
) {
    debug!("Frame delivery thread started ({:?} per frame)", interval);
    while !shared.shutdown.load(Ordering::SeqCst) {
        let tick = Instant::now();

        let outcome = {
            let mut session = shared.session.lock();
            if session.running && session.output_attached {
                let sequence = session.next_sequence;
                session.next_sequence += 1;
                let read = session.input.as_mut().map(|d| d.read_frame(sequence));
                if let Some(Err(_)) = &read {
                    // The device faulted mid-stream; the control thread
                    // decides whether to bring it back.
                    if let Some(device) = session.input.as_mut() {
                        device.stop();
                    }
                    session.running = false;
                    session.interrupted = true;
                }
                read
            } else {
                None
            }
        };

        match outcome {
            Some(Ok(frame)) => {
                sink.send_replace(Some(frame));
            }
            Some(Err(e)) => {
                if commands.send(SessionCommand::RuntimeError(e.to_string())).is_err() {
                    break;
                }
            }
            None => {}
        }

        if let Some(rest) = interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    debug!("Frame delivery thread exiting");
}
