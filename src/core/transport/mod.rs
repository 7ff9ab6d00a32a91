//! Transport layer for command/response serial devices
//!
//! A [`SerialChannel`] is the raw byte pipe (a serial port or a simulated
//! device). [`Transport`] owns one channel plus the receive buffer for the
//! exchange in progress, and implements the two reply collection strategies:
//! - idle accumulation ([`Transport::receive_until_idle`])
//! - fixed-length reads ([`Transport::read_exact`])
//!
//! All waits run on the tokio clock and take a [`CancellationToken`].

mod serial;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialPortChannel};

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::protocol::{RawFrame, ValidationFailure};

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// No reply before the deadline
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// Channel did not accept the whole frame in time
    #[error("Write timeout: {written} of {total} bytes sent")]
    WriteTimeout {
        /// Bytes accepted
        written: usize,
        /// Frame size
        total: usize,
    },

    /// Reply too short
    #[error("Incomplete frame: need {needed} bytes, have {got}")]
    Incomplete {
        /// Bytes required
        needed: usize,
        /// Bytes received
        got: usize,
    },

    /// Reply header or length field invalid
    #[error("Malformed frame header")]
    MalformedHeader,

    /// Reply checksum wrong
    #[error("Checksum {0} mismatch")]
    ChecksumMismatch(usize),

    /// Wait aborted by the caller
    #[error("Cancelled")]
    Cancelled,

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Channel closed
    #[error("Disconnected")]
    Disconnected,
}

impl From<ValidationFailure> for TransportError {
    fn from(failure: ValidationFailure) -> Self {
        match failure {
            ValidationFailure::Incomplete { needed, got } => Self::Incomplete { needed, got },
            ValidationFailure::MalformedHeader => Self::MalformedHeader,
            ValidationFailure::ChecksumMismatch { index, .. } => Self::ChecksumMismatch(index),
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Reads that returned data
    pub chunks_received: u64,
    /// Stale bytes dropped by [`Transport::reset`]
    pub bytes_discarded: u64,
    /// Errors count
    pub errors: u64,
    /// Time since the transport was created, in seconds
    pub uptime_secs: u64,
}

/// Raw byte channel to one device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialChannel: Send {
    /// Write as much of `data` as the channel accepts right now
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Number of bytes ready to read
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Take every byte that is ready, possibly none
    async fn read_available(&mut self) -> Result<Bytes, TransportError>;

    /// Drop pending input and output
    fn clear(&mut self) -> Result<(), TransportError>;

    /// Close the channel
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Description for logs
    fn describe(&self) -> String {
        "channel".to_string()
    }
}

#[async_trait]
impl SerialChannel for Box<dyn SerialChannel> {
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data).await
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        (**self).bytes_available()
    }

    async fn read_available(&mut self) -> Result<Bytes, TransportError> {
        (**self).read_available().await
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        (**self).clear()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// One open channel and its receive buffer
pub struct Transport<C> {
    channel: C,
    buffer: BytesMut,
    last_activity: Option<Instant>,
    poll_interval: Duration,
    stats: TransportStats,
    opened_at: Instant,
}

impl<C: SerialChannel> Transport<C> {
    /// Default interval between channel polls
    pub const DEFAULT_POLL: Duration = Duration::from_millis(10);

    /// Wrap an open channel
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            buffer: BytesMut::with_capacity(256),
            last_activity: None,
            poll_interval: Self::DEFAULT_POLL,
            stats: TransportStats::default(),
            opened_at: Instant::now(),
        }
    }

    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.set_poll_interval(interval);
        self
    }

    /// Change the poll interval
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval.max(Duration::from_millis(1));
    }

    /// Underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Underlying channel, mutably
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Bytes received but not yet consumed
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop `n` consumed bytes from the front of the buffer
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.advance(n);
    }

    /// When bytes last arrived
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Get statistics
    pub fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        stats.uptime_secs = self.opened_at.elapsed().as_secs();
        stats
    }

    /// Discard stale bytes in the buffer and in the channel
    ///
    /// # Errors
    ///
    /// Fails if the channel cannot be cleared.
    pub fn reset(&mut self) -> Result<(), TransportError> {
        let pending = match self.channel.bytes_available() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "cannot query pending bytes before reset");
                self.stats.errors += 1;
                0
            }
        };
        let stale = self.buffer.len() + pending;
        if stale > 0 {
            tracing::debug!(stale, "discarding stale bytes before send");
            self.stats.bytes_discarded += stale as u64;
        }
        self.buffer.clear();
        self.last_activity = None;
        self.channel.clear()
    }

    /// Write a whole frame
    ///
    /// # Errors
    ///
    /// [`TransportError::WriteTimeout`] if the channel does not take the
    /// frame within `write_timeout`, [`TransportError::Cancelled`] if the
    /// token fires first, or the channel's own error.
    pub async fn send(
        &mut self,
        frame: &RawFrame,
        write_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + write_timeout;
        let total = frame.len();
        let mut written = 0;

        tracing::debug!(frame = %frame, channel = %self.channel.describe(), "TX");

        while written < total {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let attempt = tokio::time::timeout_at(deadline, self.channel.write(&frame[written..])).await;
            let accepted = match attempt {
                Ok(result) => result.inspect_err(|_| self.stats.errors += 1)?,
                Err(_) => 0,
            };
            written += accepted;
            if written >= total {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats.errors += 1;
                return Err(TransportError::WriteTimeout { written, total });
            }
            if accepted == 0 {
                let wake = (now + self.poll_interval).min(deadline);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(TransportError::Cancelled),
                    () = sleep_until(wake) => {}
                }
            }
        }

        self.stats.bytes_sent += total as u64;
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Collect a reply whose end is signalled by silence
    ///
    /// Returns once `idle_quiet` has passed without new bytes after at least
    /// one byte arrived, or once `max_wait` has elapsed. The result is the
    /// whole receive buffer and may be empty.
    ///
    /// # Errors
    ///
    /// [`TransportError::Cancelled`] or a channel error.
    pub async fn receive_until_idle(
        &mut self,
        max_wait: Duration,
        idle_quiet: Duration,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + max_wait;
        let mut received_any = false;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            received_any |= self.poll_channel().await? > 0;

            let now = Instant::now();
            let quiet_until = match self.last_activity {
                Some(last) if received_any => Some(last + idle_quiet),
                _ => None,
            };
            if quiet_until.is_some_and(|t| now >= t) || now >= deadline {
                break;
            }

            let mut wake = (now + self.poll_interval).min(deadline);
            if let Some(t) = quiet_until {
                wake = wake.min(t);
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                () = sleep_until(wake) => {}
            }
        }

        Ok(Bytes::copy_from_slice(&self.buffer))
    }

    /// Read until `len` bytes are buffered or `timeout` expires
    ///
    /// Returns at most `len` bytes; extra bytes stay buffered. A short
    /// result means the deadline passed.
    ///
    /// # Errors
    ///
    /// [`TransportError::Cancelled`] or a channel error.
    pub async fn read_exact(
        &mut self,
        len: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            self.poll_channel().await?;

            let now = Instant::now();
            if self.buffer.len() >= len || now >= deadline {
                break;
            }
            let wake = (now + self.poll_interval).min(deadline);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                () = sleep_until(wake) => {}
            }
        }

        let take = len.min(self.buffer.len());
        Ok(Bytes::copy_from_slice(&self.buffer[..take]))
    }

    /// Close the channel
    ///
    /// # Errors
    ///
    /// Propagates the channel's close error.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.buffer.clear();
        self.channel.close().await
    }

    async fn poll_channel(&mut self) -> Result<usize, TransportError> {
        if self.channel.bytes_available().inspect_err(|_| self.stats.errors += 1)? == 0 {
            return Ok(0);
        }
        let chunk = self.channel.read_available().await.inspect_err(|_| self.stats.errors += 1)?;
        if chunk.is_empty() {
            return Ok(0);
        }

        tracing::trace!(len = chunk.len(), chunk = %hex::encode(&chunk), "RX chunk");
        self.buffer.extend_from_slice(&chunk);
        self.last_activity = Some(Instant::now());
        self.stats.bytes_received += chunk.len() as u64;
        self.stats.chunks_received += 1;
        Ok(chunk.len())
    }
}
