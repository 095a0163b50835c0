//! `inspect`: load images without a device and show what would be flashed.

use {
    super::ImageArgs,
    crate::config::Config,
    anyhow::Result,
    console::style,
    espflow::{ImageRegistry, LoadReport},
    rust_i18n::t,
};

fn inspect_json(registry: &ImageRegistry, report: &LoadReport) -> serde_json::Value {
    let images: Vec<serde_json::Value> = registry
        .images()
        .iter()
        .map(|image| {
            serde_json::json!({
                "role": image.role().label(),
                "address": format!("0x{:X}", image.address()),
                "size": image.len(),
                "loaded": image.is_loaded(),
                "source": image.source(),
            })
        })
        .collect();
    let missing: Vec<&str> = report.missing.iter().map(|m| m.entry.as_str()).collect();

    serde_json::json!({
        "complete": registry.is_complete(),
        "total_bytes": registry.total_bytes(),
        "images": images,
        "missing_entries": missing,
    })
}

/// Inspect command implementation.
pub(crate) fn cmd_inspect(config: &Config, args: &ImageArgs, json: bool) -> Result<()> {
    let selection = args.select(config)?;
    let mut registry = ImageRegistry::new(selection.layout);
    let report = selection.source.load_into(&mut registry)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&inspect_json(&registry, &report))?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style(t!("inspect.header", source = selection.source.describe()))
            .bold()
            .underlined()
    );
    for image in registry.images() {
        let status = if image.is_loaded() {
            style(t!("inspect.loaded").to_string()).green()
        } else {
            style(t!("inspect.missing").to_string()).red()
        };
        eprintln!(
            "  {} {:<11} @ 0x{:08X} {:>9} bytes  {}  {}",
            style("•").dim(),
            image.role().label(),
            image.address(),
            image.len(),
            status,
            style(image.source().unwrap_or("-")).dim()
        );
    }
    for missing in &report.missing {
        eprintln!(
            "  {} {}",
            style("⚠").yellow(),
            t!("inspect.entry_missing", entry = missing.entry.clone())
        );
    }

    let summary = if registry.is_complete() {
        style(t!("inspect.ready", bytes = registry.total_bytes()).to_string()).green()
    } else {
        style(t!("inspect.incomplete").to_string()).yellow()
    };
    eprintln!("\n{summary}");

    Ok(())
}
