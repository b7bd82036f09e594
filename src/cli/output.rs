//! CLI output formatting
//!
//! Renders ports, device tables and scanner events either as human-readable
//! lines or as one JSON document per line for scripting.

use crate::core::connection::{ConnectionKind, ConnectionState, ScannerEvent};
use crate::core::parser::{Barcode, ParseResult};
use crate::core::registry::{DeviceRegistry, DeviceTable};
use crate::core::transport::PortInfo;
use clap::ValueEnum;
use serde_json::json;

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON lines
    Json,
}

/// Render a scanner event
pub fn format_event(event: &ScannerEvent, format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string(event);
    }

    Ok(match event {
        ScannerEvent::Data(scan) => format!(
            "[{}] {}",
            scan.timestamp.format("%H:%M:%S%.3f"),
            format_parse_result(&scan.result, &scan.text)
        ),
        ScannerEvent::Status(status) => match status.kind {
            Some(ConnectionKind::Connected) => format!("+ {}", status.message),
            Some(ConnectionKind::Disconnected) => format!("- {}", status.message),
            None => format!("* {}", status.message),
        },
        ScannerEvent::DevicesUpdated(table) => {
            let count: usize = table.values().map(|v| v.devices.len()).sum();
            format!("* User devices updated ({count} entries)")
        }
    })
}

/// Whether a manual monitor session is over after `event`
///
/// A read failure reports a status without a kind, so the manager state
/// decides in that case.
pub fn ends_manual_session(event: &ScannerEvent, state: ConnectionState) -> bool {
    match event {
        ScannerEvent::Status(status) => match status.kind {
            Some(ConnectionKind::Disconnected) => true,
            Some(ConnectionKind::Connected) => false,
            None => state == ConnectionState::Disconnected,
        },
        _ => false,
    }
}

/// One-line summary of a classification
pub fn format_parse_result(result: &ParseResult, text: &str) -> String {
    match result {
        ParseResult::Parsed { barcode } => match barcode {
            Barcode::Sscc { sscc } => format!("SSCC {sscc}"),
            Barcode::Ean13 { ean13 } => format!("EAN13 {ean13}"),
            Barcode::Prescription { prescription } => format!("Prescription {prescription}"),
            Barcode::Mdlp { gtin, packid, .. } => format!("MDLP gtin={gtin} packid={packid}"),
            Barcode::Omc(data) => format!("OMC {}", hex::encode(&data.payload)),
        },
        ParseResult::Error { kind: Some(kind), message } => format!("{kind} error: {message}"),
        ParseResult::Error { kind: None, message } => format!("error: {message}"),
        ParseResult::UnknownFormat => format!("Unknown format: {text}"),
    }
}

/// Render a serial port with its registry match
pub fn format_port(port: &PortInfo, registry: &DeviceRegistry, format: OutputFormat) -> serde_json::Result<String> {
    let device = port.usb_ids().and_then(|(vid, pid)| registry.lookup_ids(vid, pid));

    match format {
        OutputFormat::Json => serde_json::to_string(&json!({
            "port": port.port_name,
            "vid": port.vid_hex(),
            "pid": port.pid_hex(),
            "manufacturer": port.manufacturer,
            "product": port.product,
            "device": device,
        })),
        OutputFormat::Text => Ok(match device {
            Some(d) => format!("{port}  {} / {}", d.vendor_name, d.device_name),
            None => format!("{port}  (unknown device)"),
        }),
    }
}

/// Render a device table, one product per line in text mode
pub fn format_device_table(table: &DeviceTable, format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(table);
    }

    let mut lines = Vec::new();
    for (vid, vendor) in table {
        let vendor_name = vendor.vendor_name.as_deref().unwrap_or("-");
        for (pid, device) in &vendor.devices {
            lines.push(format!(
                "{vid}:{pid}  {vendor_name} / {}",
                device.name.as_deref().unwrap_or("-")
            ));
        }
    }
    Ok(lines.join("\n"))
}
