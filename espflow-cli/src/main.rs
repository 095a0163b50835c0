//! espflow CLI - Command-line tool for flashing ESP32 boards.
//!
//! ## Features
//!
//! - Flash bootloader, partition table and firmware in one pass
//! - Zip bundles or a single application image as alternative inputs
//! - Inspect images without a device
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support
//! - Internationalization (i18n) support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    commands::ImageArgs,
    config::Config,
    console::style,
    env_logger::Env,
    log::debug,
    rust_i18n::t,
    std::{env, path::PathBuf},
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// espflow - Flash bootloader, partition table and firmware to ESP32 boards.
///
/// Environment variables:
///   ESPFLOW_PORT              - Default serial port
///   ESPFLOW_BAUD              - Default baud rate (default: 115200)
///   ESPFLOW_LANG              - Language/locale (en, fr)
///   ESPFLOW_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "espflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (picked interactively if not specified).
    #[arg(short, long, global = true, env = "ESPFLOW_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate for data transfer [default: 115200].
    #[arg(short, long, global = true, env = "ESPFLOW_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Language/locale for messages (e.g., en, fr).
    #[arg(long, global = true, env = "ESPFLOW_LANG")]
    pub(crate) lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ESPFLOW_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Confirm port selection even for recognized ports.
    #[arg(long, global = true)]
    pub(crate) confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    pub(crate) list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Connect to a board and write the images.
    Flash {
        #[command(flatten)]
        images: ImageArgs,

        /// Log progress every N percent.
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(1..=100))]
        checkpoint: Option<u8>,

        /// Erase the whole flash before writing.
        #[arg(long)]
        erase_all: bool,
    },

    /// Load images without a device and show what would be flashed.
    Inspect {
        #[command(flatten)]
        images: ImageArgs,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors raised by the CLI itself, each mapped to an exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid arguments or an impossible selection.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// The user backed out of a prompt.
    #[error("{0}")]
    Cancelled(String),
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
pub(crate) fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x01_00_00
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Process exit code for an error.
///
/// 1 generic, 2 usage, 3 config, 4 device or connection, 130 cancelled.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }

    match err.downcast_ref::<espflow::Error>() {
        Some(espflow::Error::UserCancelled) => 130,
        Some(espflow::Error::PortSelection(_)) => 2,
        Some(
            espflow::Error::ConnectionFailed(_)
            | espflow::Error::DeviceNotFound(_)
            | espflow::Error::NoSerialSupport
            | espflow::Error::Serial(_),
        ) => 4,
        _ => 1,
    }
}

/// Supported locales for i18n
const SUPPORTED_LOCALES: &[&str] = &["en", "fr"];

/// Map a system locale string to a supported locale.
///
/// - `fr_FR.UTF-8` -> `fr`
/// - `fr-CA` -> `fr`
/// - `en_US.UTF-8` -> `en`
/// - `C` or `POSIX` -> `en`
fn match_locale(system_locale: &str) -> String {
    // Remove encoding suffix (e.g., .UTF-8)
    let locale = system_locale.split('.').next().unwrap_or(system_locale);
    let locale = locale.replace('_', "-");

    if SUPPORTED_LOCALES.contains(&locale.as_str()) {
        return locale;
    }

    let lang_code = locale.split('-').next().unwrap_or(&locale).to_lowercase();
    if SUPPORTED_LOCALES.contains(&lang_code.as_str()) {
        lang_code
    } else {
        "en".to_string()
    }
}

/// Detect the best matching locale from system settings.
fn detect_locale() -> String {
    let system_locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    match_locale(&system_locale)
}

/// Extract `--lang` before clap runs so parse errors are localized too.
fn early_lang(args: &[String]) -> Option<String> {
    let mut lang = None;
    for (i, arg) in args.iter().enumerate() {
        if let Some(val) = arg.strip_prefix("--lang=") {
            lang = Some(val.to_string());
        } else if arg == "--lang" {
            lang = args.get(i + 1).cloned();
        }
    }
    lang.or_else(|| env::var("ESPFLOW_LANG").ok())
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    // The session log already shows library progress; keep its records out
    // of the default output.
    let filter = if cli.verbose == 0 {
        format!("{log_level},espflow=warn")
    } else {
        log_level.to_string()
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run() -> Result<()> {
    let raw_args: Vec<String> = env::args().collect();
    let locale = early_lang(&raw_args)
        .map(|lang| match_locale(&lang))
        .unwrap_or_else(detect_locale);
    rust_i18n::set_locale(&locale);

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "espflow v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let mut config = if let Some(ref path) = cli.config_path {
        if !path.exists() {
            return Err(CliError::Config(
                t!("error.config_not_found", path = path.display().to_string()).to_string(),
            )
            .into());
        }
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            images,
            checkpoint,
            erase_all,
        } => {
            let flags = commands::flash::FlashFlags {
                checkpoint: *checkpoint,
                erase_all: *erase_all,
            };
            commands::flash::cmd_flash(&cli, &mut config, images, flags)?;
        },
        Commands::Inspect { images, json } => {
            commands::inspect::cmd_inspect(&config, images, *json)?;
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {err:#}", style(t!("common.error_prefix")).red().bold());
        std::process::exit(exit_code(&err));
    }
}
