//! End-to-end workflow scenarios against an in-memory host and engine.

use std::cell::RefCell;
use std::fs;
use std::io::{Cursor, Write};
use std::rc::Rc;

use espflow::engine::WriteProgress;
use espflow::{
    ArchiveBundle, Controller, DetectedPort, Error, FlashEngine, FlashOutcome, FlashSegment,
    ImageLayout, ImageRole, ManualFiles, ProgressEvent, Rejection, Result, SerialHost,
    SessionOptions, SessionState, Severity, WriteOptions,
};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

/// What the fake board should do and what it saw.
#[derive(Default)]
struct Board {
    fail_handshake: bool,
    fail_writes: usize,
    written: Vec<(u32, usize)>,
    releases: usize,
}

struct FakeEngine {
    board: Rc<RefCell<Board>>,
}

impl FlashEngine for FakeEngine {
    fn connect(&mut self) -> Result<String> {
        if self.board.borrow().fail_handshake {
            return Err(Error::ConnectionFailed("Failed to connect to the device".into()));
        }
        Ok("ESP32".into())
    }

    fn flash_id(&mut self) -> Result<String> {
        Ok("4MB".into())
    }

    fn write_flash(
        &mut self,
        segments: &[FlashSegment<'_>],
        _options: &WriteOptions,
        progress: &mut WriteProgress<'_>,
    ) -> Result<()> {
        let mut board = self.board.borrow_mut();
        if board.fail_writes > 0 {
            board.fail_writes -= 1;
            progress(0, 512, segments[0].data.len());
            return Err(Error::FlashWrite("Timeout waiting for write".into()));
        }
        for (index, segment) in segments.iter().enumerate() {
            let total = segment.data.len();
            let mut written = 0;
            while written < total {
                written = (written + 1024).min(total);
                progress(index, written, total);
            }
            board.written.push((segment.address, total));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.board.borrow_mut().releases += 1;
        Ok(())
    }
}

enum Picker {
    Port,
    Cancel,
}

struct FakeHost {
    supported: bool,
    picker: Picker,
    board: Rc<RefCell<Board>>,
}

impl FakeHost {
    fn new(board: &Rc<RefCell<Board>>) -> Self {
        // RUST_LOG=espflow=debug shows the controller transitions.
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            supported: true,
            picker: Picker::Port,
            board: Rc::clone(board),
        }
    }
}

impl SerialHost for FakeHost {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn request_port(&mut self) -> Result<DetectedPort> {
        match self.picker {
            Picker::Port => Ok(DetectedPort::from_name("/dev/ttyUSB0")),
            Picker::Cancel => Err(Error::UserCancelled),
        }
    }

    fn open(&mut self, _port: &DetectedPort, _baud_rate: u32) -> Result<Box<dyn FlashEngine>> {
        Ok(Box::new(FakeEngine {
            board: Rc::clone(&self.board),
        }))
    }
}

fn three_part(host: FakeHost) -> Controller<FakeHost> {
    Controller::new(host, ImageLayout::three_part(), SessionOptions::default())
}

fn load_sizes(controller: &mut Controller<FakeHost>, sizes: [usize; 3]) {
    let roles = [
        ImageRole::Bootloader,
        ImageRole::PartitionTable,
        ImageRole::Application,
    ];
    for (role, size) in roles.into_iter().zip(sizes) {
        controller
            .load_image(role, vec![0xA5; size], role.bundle_file_name())
            .unwrap();
    }
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn three_images_flash_successfully() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));

    load_sizes(&mut controller, [2 * 1024, 4 * 1024, 1024 * 1024]);
    assert!(controller.registry().is_complete());

    controller.connect().unwrap();
    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(controller.chip(), Some("ESP32"));
    assert!(controller.log().contains(Severity::Success, "Chip detected: ESP32"));

    let mut events = Vec::new();
    let outcome = controller
        .start_flash(&mut |e: &ProgressEvent| events.push(e.clone()))
        .unwrap();

    assert_eq!(outcome, FlashOutcome::Completed);
    assert_eq!(controller.state(), SessionState::FlashSucceeded);
    assert_eq!(controller.progress_percent(), 100);
    assert!(controller.log().contains(Severity::Success, espflow::session::SUCCESS_MESSAGE));
    assert_eq!(
        board.borrow().written,
        vec![(0x0, 2048), (0x8000, 4096), (0x10000, 1024 * 1024)]
    );
    assert!(!events.is_empty());
}

#[test]
fn images_are_written_in_address_order() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));

    controller.load_image(ImageRole::Application, vec![3; 100], "fw").unwrap();
    controller.load_image(ImageRole::PartitionTable, vec![2; 100], "pt").unwrap();
    controller.load_image(ImageRole::Bootloader, vec![1; 100], "bl").unwrap();
    controller.connect().unwrap();
    controller.start_flash(&mut |_| {}).unwrap();

    let addresses: Vec<u32> = board.borrow().written.iter().map(|(a, _)| *a).collect();
    assert_eq!(addresses, vec![0x0, 0x8000, 0x10000]);
}

#[test]
fn progress_is_monotonic_and_resets_per_image() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));
    load_sizes(&mut controller, [8 * 1024, 3 * 1024, 60 * 1024]);
    controller.connect().unwrap();

    let mut events: Vec<ProgressEvent> = Vec::new();
    controller
        .start_flash(&mut |e: &ProgressEvent| events.push(e.clone()))
        .unwrap();

    for pair in events.windows(2) {
        if pair[0].image_index == pair[1].image_index {
            assert!(pair[1].percent >= pair[0].percent);
        } else {
            assert!(pair[1].image_index > pair[0].image_index);
            assert!(pair[1].percent < pair[0].percent || pair[1].percent == 100);
        }
    }

    let labels: Vec<&str> = events
        .iter()
        .filter(|e| e.checkpoint && e.percent == 100)
        .map(|e| e.label.as_str())
        .collect();
    assert_eq!(labels, vec!["Bootloader", "Partitions", "Firmware"]);
    assert!(controller.log().contains(Severity::Info, "Firmware: 40%"));
    assert!(!controller.log().contains(Severity::Info, "Firmware: 50%"));
}

#[test]
fn bundle_missing_firmware_keeps_flash_disabled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle.zip");
    fs::write(
        &path,
        build_zip(&[("bootloader.bin", &[1u8; 64]), ("partitions.bin", &[2u8; 64])]),
    )
    .unwrap();

    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));
    controller.connect().unwrap();

    let report = controller.load(&ArchiveBundle::new(&path)).unwrap();
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].entry, "firmware.bin");
    assert!(!controller.registry().is_complete());
    assert!(!controller.can_flash());
    assert!(controller.log().contains(Severity::Error, "ArchiveEntryMissing"));

    let outcome = controller.start_flash(&mut |_| {}).unwrap();
    assert_eq!(
        outcome,
        FlashOutcome::Rejected(Rejection::ImagesIncomplete(vec![ImageRole::Application]))
    );
    assert_eq!(controller.state(), SessionState::Connected);
    assert!(board.borrow().written.is_empty());
}

#[test]
fn complete_bundle_flashes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle.zip");
    fs::write(
        &path,
        build_zip(&[
            ("out/bootloader.bin", &[1u8; 300]),
            ("out/partitions.bin", &[2u8; 200]),
            ("out/firmware.bin", &[3u8; 5000]),
        ]),
    )
    .unwrap();

    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));
    controller.load(&ArchiveBundle::new(&path)).unwrap();
    controller.connect().unwrap();

    assert_eq!(
        controller.start_flash(&mut |_| {}).unwrap(),
        FlashOutcome::Completed
    );
    assert_eq!(board.borrow().written[2], (0x10000, 5000));
}

#[test]
fn cancelled_picker_stays_disconnected() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut host = FakeHost::new(&board);
    host.picker = Picker::Cancel;
    let mut controller = three_part(host);

    let err = controller.connect().unwrap_err();
    assert!(matches!(err, Error::UserCancelled));
    assert!(err.is_recoverable());
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert!(controller.log().contains(Severity::Error, "UserCancelled"));
    assert!(controller.can_connect());
}

#[test]
fn start_flash_rejected_when_disconnected() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));
    load_sizes(&mut controller, [16, 16, 16]);

    let outcome = controller.start_flash(&mut |_| {}).unwrap();
    assert_eq!(outcome, FlashOutcome::Rejected(Rejection::NotConnected));
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert!(board.borrow().written.is_empty());
}

#[test]
fn no_serial_support_blocks_connect() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut host = FakeHost::new(&board);
    host.supported = false;
    let mut controller = three_part(host);

    let err = controller.connect().unwrap_err();
    assert!(matches!(err, Error::NoSerialSupport));
    assert!(!err.is_recoverable());
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert!(controller.log().contains(Severity::Error, "NoSerialSupport"));
}

#[test]
fn failed_handshake_releases_engine() {
    let board = Rc::new(RefCell::new(Board {
        fail_handshake: true,
        ..Board::default()
    }));
    let mut controller = three_part(FakeHost::new(&board));

    let err = controller.connect().unwrap_err();
    assert!(matches!(err, Error::ConnectionFailed(_)));
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert_eq!(board.borrow().releases, 1);

    board.borrow_mut().fail_handshake = false;
    controller.connect().unwrap();
    assert_eq!(controller.state(), SessionState::Connected);
}

#[test]
fn write_failure_allows_retry_without_reconnect() {
    let board = Rc::new(RefCell::new(Board {
        fail_writes: 1,
        ..Board::default()
    }));
    let mut controller = three_part(FakeHost::new(&board));
    load_sizes(&mut controller, [2048, 2048, 2048]);
    controller.connect().unwrap();

    let err = controller.start_flash(&mut |_| {}).unwrap_err();
    assert!(matches!(err, Error::FlashWrite(_)));
    assert_eq!(controller.state(), SessionState::FlashFailed);
    assert_eq!(controller.progress_percent(), 0);
    assert!(controller.log().contains(Severity::Error, "FlashWriteError"));

    assert_eq!(
        controller.start_flash(&mut |_| {}).unwrap(),
        FlashOutcome::Completed
    );
    assert_eq!(controller.state(), SessionState::FlashSucceeded);
}

#[test]
fn disconnect_releases_session_once() {
    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = three_part(FakeHost::new(&board));
    controller.connect().unwrap();

    controller.disconnect();
    controller.disconnect();
    assert_eq!(board.borrow().releases, 1);
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert!(controller.can_connect());
}

#[test]
fn manual_files_from_disk() {
    let dir = tempdir().unwrap();
    let app = dir.path().join("app.bin");
    fs::write(&app, vec![7u8; 3000]).unwrap();

    let board = Rc::new(RefCell::new(Board::default()));
    let mut controller = Controller::new(
        FakeHost::new(&board),
        ImageLayout::single(0x1000),
        SessionOptions::default(),
    );
    controller
        .load(&ManualFiles::new().with(ImageRole::Application, &app))
        .unwrap();
    assert!(controller.log().contains(Severity::Success, "Loaded [0x1000]"));
    assert!(controller.log().contains(Severity::Success, "2.9 KB"));

    controller.connect().unwrap();
    controller.start_flash(&mut |_| {}).unwrap();
    assert_eq!(board.borrow().written, vec![(0x1000, 3000)]);
}
