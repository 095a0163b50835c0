//! Turns per-image byte counters into percentage updates.
//!
//! Every callback produces a [`ProgressEvent`] for the progress bar. Log
//! lines are throttled to checkpoints: a checkpoint fires on the first
//! update of an image, whenever the percentage passes another multiple of
//! the configured step, and at 100%.

use log::info;

/// Default checkpoint step, in percent.
pub const DEFAULT_CHECKPOINT: u8 = 20;

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Index of the image being written (address order).
    pub image_index: usize,
    /// Label of the image ("Bootloader", "Partitions", ...).
    pub label: String,
    /// Bytes written so far for this image.
    pub bytes_written: usize,
    /// Size of this image.
    pub bytes_total: usize,
    /// Rounded percentage of this image, never decreasing within it.
    pub percent: u8,
    /// Whether this update crossed a logging checkpoint.
    pub checkpoint: bool,
}

impl ProgressEvent {
    /// Log line for a checkpoint, e.g. `Firmware: 40%`.
    pub fn line(&self) -> String {
        format!("{}: {}%", self.label, self.percent)
    }
}

/// Rounded `written / total * 100`, clamped to 100. An empty image counts as
/// done.
pub fn percent_of(written: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let written = written.min(total) as u128;
    let pct = (written * 200 + total as u128) / (total as u128 * 2);
    u8::try_from(pct).unwrap_or(100)
}

/// Aggregates engine callbacks into [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    labels: Vec<String>,
    step: u8,
    current: Option<usize>,
    percent: u8,
    last_checkpoint: Option<u8>,
}

impl ProgressReporter {
    /// Create a reporter for images labelled `labels`, logging every `step`
    /// percent. A step of 0 is treated as 1.
    pub fn new(labels: Vec<String>, step: u8) -> Self {
        Self {
            labels,
            step: step.clamp(1, 100),
            current: None,
            percent: 0,
            last_checkpoint: None,
        }
    }

    /// Checkpoint step in percent.
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Percentage of the image currently being written.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Feed one engine callback.
    pub fn report(&mut self, image_index: usize, written: usize, total: usize) -> ProgressEvent {
        if self.current != Some(image_index) {
            self.current = Some(image_index);
            self.percent = 0;
            self.last_checkpoint = None;
        }

        self.percent = self.percent.max(percent_of(written, total));

        let (percent, step) = (self.percent, self.step);
        let checkpoint = self.last_checkpoint.is_none_or(|last| {
            percent / step > last / step || (percent == 100 && last < 100)
        });
        if checkpoint {
            self.last_checkpoint = Some(self.percent);
        }

        let event = ProgressEvent {
            image_index,
            label: self
                .labels
                .get(image_index)
                .cloned()
                .unwrap_or_else(|| format!("Image {}", image_index + 1)),
            bytes_written: written.min(total),
            bytes_total: total,
            percent: self.percent,
            checkpoint,
        };
        if checkpoint {
            info!("{}", event.line());
        }
        event
    }
}
