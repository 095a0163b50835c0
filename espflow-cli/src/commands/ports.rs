//! `list-ports`: serial port discovery.

use {
    console::style,
    espflow::{DetectedPort, auto_detect_port, discover_ports},
    rust_i18n::t,
};

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "likely_esp": port.is_likely_esp(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = discover_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style(t!("list_ports.header")).bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return;
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} {}",
            style("→").green().bold(),
            t!(
                "list_ports.auto_detected",
                port = style(&auto_port.name).cyan().bold().to_string()
            )
        );
    }
}
