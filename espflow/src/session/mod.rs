//! Session controller: connect, load, flash, disconnect.
//!
//! The [`Controller`] owns everything a flashing session needs: the host, the
//! image registry, the active [`DeviceSession`] and the [`SessionLog`]. Its
//! state is the product of a connection state and a flash state:
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Connected
//!      ^                           |                          |
//!      +------- error -------------+                   start_flash()
//!      |                                                      v
//!      +------------ disconnect() ----------- Flashing -> FlashSucceeded
//!                                                     \-> FlashFailed
//! ```
//!
//! Actions requested in the wrong state are ignored or rejected without a
//! transition; none of them panic. Errors are caught where the action was
//! triggered, logged and returned to the caller.

pub mod log;

use ::log::debug;

use crate::device::DetectedPort;
use crate::engine::{FlashEngine, FlashSegment, WriteOptions};
use crate::error::{Error, Result};
use crate::host::SerialHost;
use crate::image::loader::{ImageSource, LoadReport};
use crate::image::{ImageLayout, ImageRegistry, ImageRole};
use crate::progress::{DEFAULT_CHECKPOINT, ProgressEvent, ProgressReporter};

pub use self::log::{LogEntry, SessionLog, Severity};

/// Default serial baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Line logged after a successful write.
pub const SUCCESS_MESSAGE: &str = "Flash complete! Reset your ESP32.";

/// State of the serial connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device session.
    Disconnected,
    /// Waiting for the picker or the handshake.
    Connecting,
    /// Handshake done, chip identified.
    Connected,
}

/// State of the current write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Nothing written yet on this connection.
    Idle,
    /// Write pass running.
    InProgress,
    /// Last write pass finished.
    Succeeded,
    /// Last write pass failed.
    Failed,
}

/// Combined session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device session.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected and idle.
    Connected,
    /// Writing images.
    Flashing,
    /// Connected, last write succeeded.
    FlashSucceeded,
    /// Connected, last write failed.
    FlashFailed,
}

/// The three steps shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    /// Connect to a board.
    Connect,
    /// Provide every image.
    LoadFiles,
    /// Write the images.
    Flash,
}

impl WorkflowStep {
    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connect => "Connect",
            Self::LoadFiles => "Load Files",
            Self::Flash => "Flash",
        }
    }
}

/// Marker of a [`WorkflowStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Not reachable yet.
    Pending,
    /// Waiting for the user.
    Active,
    /// Finished.
    Done,
}

/// Why [`Controller::start_flash`] refused to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No connected device.
    NotConnected,
    /// These roles have no image yet.
    ImagesIncomplete(Vec<ImageRole>),
}

/// Result of a [`Controller::start_flash`] call that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOutcome {
    /// Every image was written.
    Completed,
    /// Refused without a state change.
    Rejected(Rejection),
}

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Transfer baud rate.
    pub baud_rate: u32,
    /// Progress log checkpoint step, in percent.
    pub checkpoint: u8,
    /// Options passed to every write pass.
    pub write: WriteOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            checkpoint: DEFAULT_CHECKPOINT,
            write: WriteOptions::default(),
        }
    }
}

/// One live connection: the port plus the engine bound to it.
///
/// Both are released together by [`DeviceSession::release`].
pub struct DeviceSession {
    port: DetectedPort,
    chip: String,
    engine: Box<dyn FlashEngine>,
}

impl DeviceSession {
    /// Port the session is bound to.
    pub fn port(&self) -> &DetectedPort {
        &self.port
    }

    /// Chip identification string from the handshake.
    pub fn chip(&self) -> &str {
        &self.chip
    }

    /// Close the engine and transport. Shutdown errors are swallowed.
    pub fn release(mut self) {
        if let Err(e) = self.engine.disconnect() {
            debug!("Ignoring error while releasing {}: {e}", self.port.name);
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("port", &self.port.name)
            .field("chip", &self.chip)
            .finish_non_exhaustive()
    }
}

fn kilobytes(size: usize) -> String {
    let tenths = (size * 10 + 512) / 1024;
    format!("{}.{} KB", tenths / 10, tenths % 10)
}

fn as_connection_error(error: Error) -> Error {
    match error {
        Error::ConnectionFailed(_)
        | Error::NoSerialSupport
        | Error::UserCancelled
        | Error::PortSelection(_)
        | Error::DeviceNotFound(_) => error,
        other => Error::ConnectionFailed(other.to_string()),
    }
}

fn as_write_error(error: Error) -> Error {
    match error {
        Error::FlashWrite(_) => error,
        other => Error::FlashWrite(other.to_string()),
    }
}

/// Drives the whole workflow against a [`SerialHost`].
pub struct Controller<H> {
    host: H,
    registry: ImageRegistry,
    session: Option<DeviceSession>,
    connection: ConnectionState,
    flash: FlashState,
    options: SessionOptions,
    log: SessionLog,
    percent: u8,
}

impl<H: SerialHost> Controller<H> {
    /// Create a disconnected controller with an empty registry.
    pub fn new(host: H, layout: ImageLayout, options: SessionOptions) -> Self {
        Self {
            host,
            registry: ImageRegistry::new(layout),
            session: None,
            connection: ConnectionState::Disconnected,
            flash: FlashState::Idle,
            options,
            log: SessionLog::new(),
            percent: 0,
        }
    }

    /// Forward every new log entry to `listener`.
    pub fn set_log_listener(&mut self, listener: impl FnMut(&LogEntry) + 'static) {
        self.log.set_listener(listener);
    }

    /// Combined state.
    pub fn state(&self) -> SessionState {
        match (self.connection, self.flash) {
            (ConnectionState::Disconnected, _) => SessionState::Disconnected,
            (ConnectionState::Connecting, _) => SessionState::Connecting,
            (ConnectionState::Connected, FlashState::Idle) => SessionState::Connected,
            (ConnectionState::Connected, FlashState::InProgress) => SessionState::Flashing,
            (ConnectionState::Connected, FlashState::Succeeded) => SessionState::FlashSucceeded,
            (ConnectionState::Connected, FlashState::Failed) => SessionState::FlashFailed,
        }
    }

    /// Connection half of the state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Flash half of the state.
    pub fn flash_state(&self) -> FlashState {
        self.flash
    }

    /// Chip identified by the current session.
    pub fn chip(&self) -> Option<&str> {
        self.session.as_ref().map(DeviceSession::chip)
    }

    /// Port of the current session.
    pub fn port(&self) -> Option<&DetectedPort> {
        self.session.as_ref().map(DeviceSession::port)
    }

    /// Image registry.
    pub fn registry(&self) -> &ImageRegistry {
        &self.registry
    }

    /// Session options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Session log.
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Progress bar value, 0..=100.
    pub fn progress_percent(&self) -> u8 {
        self.percent
    }

    /// Whether a connect action would do anything.
    pub fn can_connect(&self) -> bool {
        self.connection == ConnectionState::Disconnected
    }

    /// Whether a flash action would start.
    pub fn can_flash(&self) -> bool {
        self.connection == ConnectionState::Connected
            && self.flash != FlashState::InProgress
            && self.registry.is_complete()
    }

    /// Markers for the three workflow steps.
    pub fn steps(&self) -> [(WorkflowStep, StepStatus); 3] {
        let connected = self.connection == ConnectionState::Connected;
        let complete = self.registry.is_complete();

        let connect = if connected { StepStatus::Done } else { StepStatus::Active };
        let load = if complete {
            StepStatus::Done
        } else if connected {
            StepStatus::Active
        } else {
            StepStatus::Pending
        };
        let flash = if connected && self.flash == FlashState::Succeeded {
            StepStatus::Done
        } else if connected && complete {
            StepStatus::Active
        } else {
            StepStatus::Pending
        };

        [
            (WorkflowStep::Connect, connect),
            (WorkflowStep::LoadFiles, load),
            (WorkflowStep::Flash, flash),
        ]
    }

    fn log_error(&mut self, error: &Error) {
        self.log.error(format!("{}: {error}", error.kind()));
    }

    /// Store one image directly.
    pub fn load_image(
        &mut self,
        role: ImageRole,
        bytes: Vec<u8>,
        source: impl Into<String>,
    ) -> Result<()> {
        let source = source.into();
        let size = bytes.len();
        match self.registry.set_image(role, bytes, source.clone()) {
            Ok(image) => {
                let address = image.address();
                self.log.success(format!(
                    "Loaded [0x{address:X}] {source} ({})",
                    kilobytes(size)
                ));
                Ok(())
            },
            Err(e) => {
                self.log_error(&e);
                Err(e)
            },
        }
    }

    /// Load images through a loader strategy.
    ///
    /// Missing bundle entries are logged as errors; the report is still
    /// returned so the caller can show which roles are absent.
    pub fn load(&mut self, source: &dyn ImageSource) -> Result<LoadReport> {
        debug!("Loading images from {}", source.describe());
        match source.load_into(&mut self.registry) {
            Ok(report) => {
                for image in &report.loaded {
                    self.log.success(format!(
                        "Loaded [0x{:X}] {} ({})",
                        image.address,
                        image.source,
                        kilobytes(image.size)
                    ));
                }
                if let Some(missing) = report.missing_error() {
                    self.log_error(&missing);
                }
                Ok(report)
            },
            Err(e) => {
                self.log_error(&e);
                Err(e)
            },
        }
    }

    /// Switch input mode; every image is cleared.
    pub fn switch_layout(&mut self, layout: ImageLayout) {
        self.registry.switch_layout(layout);
        self.log.info("Input mode changed, images cleared.");
    }

    /// Request a device, open it and perform the handshake.
    ///
    /// Ignored unless disconnected. On any failure the controller returns to
    /// [`SessionState::Disconnected`] and the error is logged.
    pub fn connect(&mut self) -> Result<()> {
        if self.connection != ConnectionState::Disconnected {
            debug!("connect() ignored in state {:?}", self.state());
            return Ok(());
        }

        if !self.host.is_supported() {
            let error = Error::NoSerialSupport;
            self.log_error(&error);
            return Err(error);
        }

        self.connection = ConnectionState::Connecting;
        self.log.info("Connecting...");

        match self.open_session() {
            Ok(session) => {
                self.log
                    .success(format!("Connected! Chip detected: {}", session.chip()));
                self.connection = ConnectionState::Connected;
                self.flash = FlashState::Idle;
                self.percent = 0;
                self.session = Some(session);
                Ok(())
            },
            Err(e) => {
                self.connection = ConnectionState::Disconnected;
                self.log_error(&e);
                Err(e)
            },
        }
    }

    fn open_session(&mut self) -> Result<DeviceSession> {
        let port = self.host.request_port()?;
        debug!("Selected port {}", port.name);

        let mut engine = self
            .host
            .open(&port, self.options.baud_rate)
            .map_err(as_connection_error)?;

        match engine.connect() {
            Ok(chip) => Ok(DeviceSession { port, chip, engine }),
            Err(e) => {
                if let Err(close) = engine.disconnect() {
                    debug!("Ignoring error while closing {}: {close}", port.name);
                }
                Err(as_connection_error(e))
            },
        }
    }

    /// Release the device session. Safe to call at any time.
    pub fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("disconnect() without a session");
            self.connection = ConnectionState::Disconnected;
            return;
        };

        session.release();
        self.connection = ConnectionState::Disconnected;
        self.flash = FlashState::Idle;
        self.percent = 0;
        self.log.info("Disconnected.");
    }

    /// Write every loaded image to the connected device.
    ///
    /// Returns [`FlashOutcome::Rejected`] without touching any state when
    /// there is no connection or an image is missing. A write error leaves
    /// the session connected in [`SessionState::FlashFailed`]; calling again
    /// retries.
    pub fn start_flash(
        &mut self,
        on_progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<FlashOutcome> {
        if self.connection != ConnectionState::Connected || self.session.is_none() {
            self.log.warn("Flash refused: no device connected.");
            return Ok(FlashOutcome::Rejected(Rejection::NotConnected));
        }
        if !self.registry.is_complete() {
            let missing = self.registry.missing_roles();
            let names: Vec<&str> = missing.iter().map(ImageRole::label).collect();
            self.log
                .warn(format!("Flash refused: missing {}.", names.join(", ")));
            return Ok(FlashOutcome::Rejected(Rejection::ImagesIncomplete(missing)));
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(FlashOutcome::Rejected(Rejection::NotConnected));
        };

        self.flash = FlashState::InProgress;
        self.percent = 0;
        self.log.info("Starting flash...");

        let segments = self.registry.to_ordered_list();
        let result = write_pass(
            session.engine.as_mut(),
            &segments,
            &self.options,
            &mut self.log,
            &mut self.percent,
            on_progress,
        );

        match result {
            Ok(()) => {
                self.flash = FlashState::Succeeded;
                self.percent = 100;
                self.log.success(SUCCESS_MESSAGE);
                Ok(FlashOutcome::Completed)
            },
            Err(e) => {
                self.flash = FlashState::Failed;
                self.percent = 0;
                self.log_error(&e);
                Err(e)
            },
        }
    }
}

fn write_pass(
    engine: &mut dyn FlashEngine,
    segments: &[FlashSegment<'_>],
    options: &SessionOptions,
    log: &mut SessionLog,
    percent: &mut u8,
    on_progress: &mut dyn FnMut(&ProgressEvent),
) -> Result<()> {
    let flash_size = engine.flash_id().map_err(as_write_error)?;
    log.info(format!("Flash size: {flash_size}"));

    let labels = segments.iter().map(|s| s.role.label().to_string()).collect();
    let mut reporter = ProgressReporter::new(labels, options.checkpoint);

    engine
        .write_flash(segments, &options.write, &mut |index, written, total| {
            let event = reporter.report(index, written, total);
            *percent = event.percent;
            if event.checkpoint {
                log.info(event.line());
            }
            on_progress(&event);
        })
        .map_err(as_write_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullEngine;

    impl FlashEngine for NullEngine {
        fn connect(&mut self) -> Result<String> {
            Ok("ESP32".into())
        }

        fn flash_id(&mut self) -> Result<String> {
            Ok("4MB".into())
        }

        fn write_flash(
            &mut self,
            segments: &[FlashSegment<'_>],
            _options: &WriteOptions,
            progress: &mut crate::engine::WriteProgress<'_>,
        ) -> Result<()> {
            for (i, s) in segments.iter().enumerate() {
                progress(i, s.data.len(), s.data.len());
            }
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            Err(Error::Io(std::io::Error::other("already closed")))
        }
    }

    struct NullHost;

    impl SerialHost for NullHost {
        fn request_port(&mut self) -> Result<DetectedPort> {
            Ok(DetectedPort::from_name("/dev/null0"))
        }

        fn open(&mut self, _port: &DetectedPort, _baud: u32) -> Result<Box<dyn FlashEngine>> {
            Ok(Box::new(NullEngine))
        }
    }

    fn controller() -> Controller<NullHost> {
        Controller::new(NullHost, ImageLayout::single(0x0), SessionOptions::default())
    }

    #[test]
    fn test_kilobytes() {
        assert_eq!(kilobytes(0), "0.0 KB");
        assert_eq!(kilobytes(2048), "2.0 KB");
        assert_eq!(kilobytes(1536), "1.5 KB");
    }

    #[test]
    fn test_steps_follow_state() {
        let mut c = controller();
        assert_eq!(
            c.steps().map(|(_, s)| s),
            [StepStatus::Active, StepStatus::Pending, StepStatus::Pending]
        );

        c.connect().unwrap();
        assert_eq!(
            c.steps().map(|(_, s)| s),
            [StepStatus::Done, StepStatus::Active, StepStatus::Pending]
        );

        c.load_image(ImageRole::Application, vec![1; 64], "app.bin").unwrap();
        assert_eq!(
            c.steps().map(|(_, s)| s),
            [StepStatus::Done, StepStatus::Done, StepStatus::Active]
        );

        c.start_flash(&mut |_| {}).unwrap();
        assert_eq!(c.steps()[2].1, StepStatus::Done);
    }

    #[test]
    fn test_connect_twice_is_noop() {
        let mut c = controller();
        c.connect().unwrap();
        let entries = c.log().len();
        c.connect().unwrap();
        assert_eq!(c.log().len(), entries);
        assert_eq!(c.state(), SessionState::Connected);
    }

    #[test]
    fn test_disconnect_swallows_release_errors() {
        let mut c = controller();
        c.disconnect();
        assert_eq!(c.state(), SessionState::Disconnected);

        c.connect().unwrap();
        c.disconnect();
        assert_eq!(c.state(), SessionState::Disconnected);
        assert!(c.chip().is_none());
        assert!(c.log().contains(Severity::Info, "Disconnected."));
    }

    #[test]
    fn test_reflash_after_success() {
        let mut c = controller();
        c.connect().unwrap();
        c.load_image(ImageRole::Application, vec![1; 8], "app.bin").unwrap();
        assert_eq!(c.start_flash(&mut |_| {}).unwrap(), FlashOutcome::Completed);
        assert_eq!(c.state(), SessionState::FlashSucceeded);
        assert!(c.can_flash());
        assert_eq!(c.start_flash(&mut |_| {}).unwrap(), FlashOutcome::Completed);
    }

    #[test]
    fn test_log_listener_sees_connect_sequence() {
        use std::{cell::RefCell, rc::Rc};

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut c = controller();
        c.set_log_listener(move |entry| sink.borrow_mut().push(entry.severity));

        c.connect().unwrap();
        assert_eq!(*seen.borrow(), [Severity::Info, Severity::Success]);
    }

    #[test]
    fn test_load_image_outside_layout_is_logged() {
        let mut c = controller();
        assert!(c.load_image(ImageRole::Bootloader, vec![0; 4], "b.bin").is_err());
        assert!(c.log().contains(Severity::Error, "UnknownRole"));
    }
}
