//! `flash`: load images, connect, write and disconnect.
//!
//! The session log is rendered live on stderr, the three workflow steps as a
//! single status line and the write progress as an `indicatif` bar.

use {
    super::ImageArgs,
    crate::{
        Cli, CliError,
        config::Config,
        serial::{self, SerialOptions},
        use_fancy_output,
    },
    anyhow::Result,
    console::style,
    espflow::{
        Controller, FlashOutcome, ImageRole, LogEntry, NativeHost, Rejection, SerialHost,
        SessionOptions, Severity, StepStatus, WorkflowStep, WriteOptions,
        progress::DEFAULT_CHECKPOINT, session::DEFAULT_BAUD,
    },
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    rust_i18n::t,
};

/// Flash-specific command line options.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FlashFlags {
    pub(crate) checkpoint: Option<u8>,
    pub(crate) erase_all: bool,
}

/// Merge CLI flags over config values.
fn session_options(cli: &Cli, config: &Config, flags: FlashFlags) -> SessionOptions {
    SessionOptions {
        baud_rate: cli
            .baud
            .or(config.port.connection.baud)
            .unwrap_or(DEFAULT_BAUD),
        checkpoint: flags
            .checkpoint
            .or(config.flash.checkpoint)
            .unwrap_or(DEFAULT_CHECKPOINT),
        write: WriteOptions {
            erase_all: flags.erase_all || config.flash.erase_all,
            ..WriteOptions::default()
        },
    }
}

fn render_entry(entry: &LogEntry) -> String {
    let time = style(format!("[{}]", entry.timestamp.format("%H:%M:%S"))).dim();
    let message = match entry.severity {
        Severity::Info => style(entry.message.as_str()),
        Severity::Success => style(entry.message.as_str()).green(),
        Severity::Warning => style(entry.message.as_str()).yellow(),
        Severity::Error => style(entry.message.as_str()).red().bold(),
    };
    format!("{time} {message}")
}

fn step_label(step: WorkflowStep) -> String {
    match step {
        WorkflowStep::Connect => t!("steps.connect").to_string(),
        WorkflowStep::LoadFiles => t!("steps.load_files").to_string(),
        WorkflowStep::Flash => t!("steps.flash").to_string(),
    }
}

fn render_steps(steps: &[(WorkflowStep, StepStatus)]) -> String {
    let parts: Vec<String> = steps
        .iter()
        .enumerate()
        .map(|(i, (step, status))| {
            let text = format!("{} {}", i + 1, step_label(*step));
            match status {
                StepStatus::Done => format!("{} {}", style("✓").green(), style(text).green()),
                StepStatus::Active => format!("{} {}", style("●").cyan(), style(text).cyan().bold()),
                StepStatus::Pending => format!("{} {}", style("○").dim(), style(text).dim()),
            }
        })
        .collect();
    let separator = format!(" {} ", style("─").dim());
    parts.join(separator.as_str())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

struct StepLine {
    quiet: bool,
    last: Option<String>,
}

impl StepLine {
    fn show<H: SerialHost>(&mut self, controller: &Controller<H>) {
        if self.quiet {
            return;
        }
        let line = render_steps(&controller.steps());
        if self.last.as_deref() != Some(line.as_str()) {
            eprintln!("{line}");
            self.last = Some(line);
        }
    }
}

fn missing_roles_error(roles: &[ImageRole]) -> anyhow::Error {
    let names: Vec<&str> = roles.iter().map(ImageRole::label).collect();
    CliError::Usage(t!("flash.missing_images", roles = names.join(", ")).to_string()).into()
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    images: &ImageArgs,
    flags: FlashFlags,
) -> Result<()> {
    let selection = images.select(config)?;
    let options = session_options(cli, config, flags);
    let serial_options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let host = NativeHost::new(|| serial::pick_port(&serial_options, config));
    let mut controller = Controller::new(host, selection.layout, options);

    let pb = progress_bar(cli.quiet);
    let printer = pb.clone();
    let quiet = cli.quiet;
    controller.set_log_listener(move |entry| {
        if quiet && matches!(entry.severity, Severity::Info | Severity::Success) {
            return;
        }
        printer.suspend(|| eprintln!("{}", render_entry(entry)));
    });

    let mut steps = StepLine { quiet, last: None };
    steps.show(&controller);

    let report = controller.load(selection.source.as_ref())?;
    // The missing entries are already in the session log
    if report.missing_error().is_some() {
        return Err(CliError::Usage(t!("flash.bundle_incomplete").to_string()).into());
    }
    if !controller.registry().is_complete() {
        return Err(missing_roles_error(&controller.registry().missing_roles()));
    }
    steps.show(&controller);

    controller.connect()?;
    steps.show(&controller);

    let outcome = controller.start_flash(&mut |event| {
        if pb.message() != event.label {
            pb.set_message(event.label.clone());
        }
        pb.set_position(u64::from(event.percent));
    });

    match &outcome {
        Ok(FlashOutcome::Completed) => pb.finish_with_message(t!("common.complete").to_string()),
        _ => {
            pb.set_position(u64::from(controller.progress_percent()));
            pb.abandon();
        },
    }
    steps.show(&controller);
    controller.disconnect();

    match outcome? {
        FlashOutcome::Completed => Ok(()),
        FlashOutcome::Rejected(Rejection::ImagesIncomplete(roles)) => {
            Err(missing_roles_error(&roles))
        },
        FlashOutcome::Rejected(Rejection::NotConnected) => {
            Err(espflow::Error::ConnectionFailed(t!("flash.not_connected").to_string()).into())
        },
    }
}
