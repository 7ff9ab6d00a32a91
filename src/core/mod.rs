//! Core module containing the main functionality of hwprobe
//!
//! This module provides:
//! - Protocol layer: declarative frame layouts, checksums, status tables and
//!   the built-in device families
//! - Transport layer: serial channels and reply collection
//! - Command dispatch with one command in flight per device
//! - Baud rate discovery
//! - Virtual devices for tests and `--simulate`

pub mod dispatch;
pub mod protocol;
pub mod scan;
pub mod simulator;
pub mod transport;
