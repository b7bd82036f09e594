//! CLI Module
//!
//! Provides command-line interface support:
//! - Exit codes for automation
//! - Text/JSON rendering of ports, devices and scanner events

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, CliResult, ExitCodes};
pub use output::{ends_manual_session, format_device_table, format_event, format_parse_result, format_port, OutputFormat};
