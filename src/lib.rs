//! # hwprobe Core Library
//!
//! Binary frame codec and adaptive serial transport for command/response
//! devices such as thermal cameras, laser rangefinders and PTZ heads.
//!
//! ## Features
//!
//! - One declarative [`FrameSpec`] per wire format (sum8 or CRC-16/CCITT,
//!   fixed length, length field or terminator)
//! - Reply collection by idle timeout or fixed-length read
//! - Status byte classification into shared [`DeviceStatus`] categories
//! - One command in flight per device, cancellable waits
//! - Virtual devices for deterministic tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use hwprobe_core::core::protocol::devices::tau2;
//! use hwprobe_core::{Dispatcher, SerialConfig, SerialPortChannel};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let channel = SerialPortChannel::open(SerialConfig::new("/dev/ttyUSB0", tau2::BAUD_RATE))?;
//!     let dispatcher = Dispatcher::from_channel(channel);
//!
//!     let frame = dispatcher
//!         .execute(&tau2::profile(), &tau2::read_temperature(), &CancellationToken::new())
//!         .await?;
//!     println!("FPA: {:?}", tau2::fpa_temperature(&frame.payload));
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat, Reading};
pub use crate::config::{ConfigError, DeviceConfig, ProbeConfig};
pub use crate::core::dispatch::{DispatchError, Dispatcher, RetryPolicy};
pub use crate::core::protocol::{
    decode, encode, ChecksumAlgorithm, Command, DecodedFrame, DeviceFamily, DeviceProfile, DeviceStatus, FrameSpec,
    StatusTable, ValidationFailure,
};
pub use crate::core::scan::{scan_baud_rates, RateOutcome, RateReport};
pub use crate::core::simulator::{DeviceTemplates, VirtualDevice};
pub use crate::core::transport::{SerialChannel, SerialConfig, SerialPortChannel, Transport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
