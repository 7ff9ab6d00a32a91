//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Reading formatting (text, JSON lines, hex)

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, exit_code_for, print_exit_codes, CliResult, ExitCodes};
pub use output::{Interpretation, OutputFormat, Reading};
