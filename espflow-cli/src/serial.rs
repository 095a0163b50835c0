//! Interactive serial port selection.
//!
//! This is the device picker of the flashing workflow:
//! - Auto-detection of known USB bridges and Espressif native USB
//! - Interactive selection via dialoguer
//! - Remembering selected ports in configuration
//! - Non-interactive mode for CI/CD

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    espflow::{DetectedPort, device::format_port_list, discover_ports},
    log::{debug, error, info},
    rust_i18n::t,
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled_err() -> anyhow::Error {
    CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    // Exactly one candidate or a usage error; never prompt.
    let mut ports = selection_ports.into_iter();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(SelectedPort {
            is_known: is_known_device(&port, config),
            port,
        }),
        (Some(_), Some(_)) => Err(usage_err(t!("serial.multiple_ports").as_ref())),
        (None, _) => Err(usage_err(t!("serial.no_ports_available").as_ref())),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = discover_ports();
    if ports.is_empty() {
        return Err(usage_err(t!("serial.no_ports_found").as_ref()));
    }
    debug!("Detected ports: {}", format_port_list(&ports).join(", "));

    // Known devices first unless the user asks for all
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    let mut candidates = selection_ports.into_iter();
    match (candidates.next(), candidates.next()) {
        (Some(port), None) => {
            let is_known = is_known_device(&port, config);
            if is_known && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        (Some(first), Some(second)) => {
            ensure_interactive_terminal()?;
            let ports = [first, second].into_iter().chain(candidates).collect();
            select_port_interactive(ports, config)
        },
        (None, _) => Err(usage_err(t!("serial.no_ports_available").as_ref())),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(t!("serial.interactive_requires_tty").as_ref()))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled_err()
            } else {
                usage_err(t!("serial.prompt_failed").as_ref())
            }
        },
    }
}

/// Find a port by name, keeping the user's choice even when undetected.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = discover_ports();

    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    match found {
        Some(port) => SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        },
        None => SelectedPort {
            port: DetectedPort::from_name(name),
            is_known: false,
        },
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config
            .port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid)),
        _ => false,
    }
}

fn port_label(port: &DetectedPort, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} {}",
        style("ℹ").blue(),
        t!("serial.detected_ports", count = ports.len())
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep labels on one line in narrow terminals
    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p, config), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.select_prompt").to_string())
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    let Some(index) = selection else {
        return Err(cancelled_err());
    };
    let port = ports
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
    let is_known = is_known_device(&port, config);
    Ok(SelectedPort { port, is_known })
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(
            t!(
                "serial.confirm_use",
                port = port.name.clone(),
                info = product_info
            )
            .to_string(),
        )
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(cancelled_err())
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.remember_prompt").to_string())
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

/// Run the picker and translate its failures into workflow errors.
///
/// A dismissed prompt becomes [`espflow::Error::UserCancelled`]; every other
/// selection failure becomes [`espflow::Error::PortSelection`].
pub fn pick_port(options: &SerialOptions, config: &mut Config) -> espflow::Result<DetectedPort> {
    let selected = select_serial_port(options, config).map_err(into_workflow_error)?;

    if !selected.is_known && !options.non_interactive && selected.port.vid.is_some() {
        ask_remember_port(&selected.port, config).map_err(into_workflow_error)?;
    }

    Ok(selected.port)
}

fn into_workflow_error(err: anyhow::Error) -> espflow::Error {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Cancelled(_)) => espflow::Error::UserCancelled,
        Some(CliError::Usage(message) | CliError::Config(message)) => {
            espflow::Error::PortSelection(message.clone())
        },
        None => espflow::Error::PortSelection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::config::UsbDevice,
        console::{measure_text_width, truncate_str},
        espflow::DeviceKind,
    };

    fn usb_port(name: &str, device: DeviceKind, vid: u16, pid: u16) -> DetectedPort {
        DetectedPort {
            device,
            vid: Some(vid),
            pid: Some(pid),
            ..DetectedPort::from_name(name)
        }
    }

    #[test]
    fn test_serial_options_default() {
        let opts = SerialOptions::default();
        assert!(opts.port.is_none());
        assert!(!opts.list_all_ports);
        assert!(!opts.non_interactive);
        assert!(!opts.confirm_port);
    }

    #[test]
    fn test_port_label_truncates_to_width() {
        let port = DetectedPort {
            product: Some("A very long product string from the USB descriptor".to_string()),
            ..usb_port("/dev/ttyUSB0", DeviceKind::Cp210x, 0x10C4, 0xEA60)
        };
        let label = port_label(&port, &Config::default());
        let truncated = truncate_str(&label, 24, "\u{2026}");
        assert!(measure_text_width(&truncated) <= 24);
        assert!(console::strip_ansi_codes(&truncated).starts_with("/dev/ttyUSB0"));
    }

    #[test]
    fn test_is_known_device_builtin() {
        let port = usb_port("/dev/ttyACM0", DeviceKind::Espressif, 0x303A, 0x1001);
        assert!(is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let port = usb_port("/dev/ttyUSB0", DeviceKind::Unknown, 0x1234, 0x5678);
        let mut config = Config::default();
        assert!(!is_known_device(&port, &config));

        config.port.usb_device.push(UsbDevice {
            vid: 0x1234,
            pid: 0x5678,
        });
        assert!(is_known_device(&port, &config));
    }

    #[test]
    fn test_is_known_device_no_vid_pid() {
        assert!(!is_known_device(&DetectedPort::from_name("/dev/ttyS0"), &Config::default()));
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![
            DetectedPort::from_name("/dev/ttyUSB0"),
            DetectedPort::from_name("/dev/ttyUSB1"),
        ];

        let err = select_non_interactive_port(ports, &Config::default())
            .err()
            .expect("expected error");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default())
            .err()
            .expect("expected error");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_single_port_returns_selected_port() {
        let ports = vec![usb_port("/dev/ttyUSB0", DeviceKind::Ch340, 0x1A86, 0x7523)];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_cancelled_prompt_maps_to_user_cancelled() {
        let err = into_workflow_error(CliError::Cancelled("x".into()).into());
        assert!(matches!(err, espflow::Error::UserCancelled));

        let err = into_workflow_error(CliError::Usage("no ports".into()).into());
        assert!(matches!(err, espflow::Error::PortSelection(ref m) if m == "no ports"));
    }

    #[test]
    fn test_explicit_port_is_kept_when_not_detected() {
        let options = SerialOptions {
            port: Some("/dev/does-not-exist".to_string()),
            non_interactive: true,
            ..SerialOptions::default()
        };
        let selected = select_serial_port(&options, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/does-not-exist");
        assert!(!selected.is_known);
    }
}
