//! Ports command handler.

use serde::Serialize;
use tabled::Tabled;

use zwlink_api::ports::{compile_patterns, scan_serial_ports};
use zwlink_config::Config;

use crate::cli::{GlobalOpts, PortsArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize, Tabled)]
struct PortRow {
    #[tabled(rename = "Port")]
    port: String,
}

pub fn handle(args: &PortsArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let patterns = if args.patterns.is_empty() {
        config.port_patterns()
    } else {
        args.patterns.clone()
    };
    let compiled = compile_patterns(&patterns).map_err(|e| CliError::Validation {
        field: "pattern".into(),
        reason: e.to_string(),
    })?;

    let ports: Vec<PortRow> = scan_serial_ports(&args.dir, &compiled)
        .map_err(|e| CliError::Driver {
            message: e.to_string(),
        })?
        .into_iter()
        .map(|port| PortRow { port })
        .collect();
    tracing::debug!(count = ports.len(), dir = %args.dir.display(), "ports scanned");

    let out = output::render_list(
        &global.output,
        &ports,
        |p| PortRow {
            port: p.port.clone(),
        },
        |p| p.port.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
