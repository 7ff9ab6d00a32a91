//! Command dispatch
//!
//! A [`Dispatcher`] runs one request/response exchange at a time over a
//! shared [`Transport`]: discard stale input, send the encoded request,
//! collect the reply with the profile's read strategy, validate it and
//! classify its status byte.
//!
//! Failed exchanges are never repeated implicitly. Callers that want retries
//! go through [`Dispatcher::execute_with_retry`] with an explicit
//! [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::protocol::{
    decode, encode, Command, DecodedFrame, DeviceProfile, DeviceStatus, ReadStrategy, ResponseTiming, StatusClass,
};
use crate::core::transport::{SerialChannel, Transport, TransportError, TransportStats};

/// Outcome of a failed exchange
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The device answered and reported a failure
    #[error("device reported failure: {0}")]
    Device(DeviceStatus),

    /// No valid answer was obtained
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Device status, if the device itself reported the failure
    #[must_use]
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            DispatchError::Device(status) => Some(*status),
            DispatchError::Transport(_) => None,
        }
    }

    /// The exchange ended because nothing came back
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Transport(TransportError::Timeout(_)))
    }
}

impl From<DeviceStatus> for DispatchError {
    fn from(status: DeviceStatus) -> Self {
        DispatchError::Device(status)
    }
}

/// Explicit retry settings for [`Dispatcher::execute_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause before the second attempt
    pub backoff: Duration,
    /// Growth factor of the pause for each further attempt
    pub multiplier: f64,
    /// Longest pause between attempts
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(50),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Up to `max_attempts` attempts with the default backoff
    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Set the initial backoff
    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the backoff multiplier
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the longest pause
    #[must_use]
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Pause after failed attempt number `attempt` (1-based), capped at
    /// `max_backoff`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff.as_secs_f64() * multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether repeating the exchange could help
    ///
    /// Lost or damaged replies are worth another try. Device-reported
    /// failures, write stalls, cancellation and port errors are not.
    #[must_use]
    pub fn is_retryable(error: &DispatchError) -> bool {
        matches!(
            error,
            DispatchError::Transport(
                TransportError::Timeout(_)
                    | TransportError::Incomplete { .. }
                    | TransportError::ChecksumMismatch(_)
                    | TransportError::MalformedHeader
            )
        )
    }
}

/// Serialises exchanges over one transport
///
/// Clones share the transport. The lock is held for the whole exchange, so
/// at most one command is in flight per device.
pub struct Dispatcher<C> {
    transport: Arc<Mutex<Transport<C>>>,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<C: SerialChannel> Dispatcher<C> {
    /// Take ownership of a transport
    pub fn new(transport: Transport<C>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    /// Wrap a channel in a default transport
    pub fn from_channel(channel: C) -> Self {
        Self::new(Transport::new(channel))
    }

    /// Run one exchange with the profile's timing
    ///
    /// # Errors
    ///
    /// [`DispatchError::Device`] when the reply carries a failure status,
    /// [`DispatchError::Transport`] when no valid reply was obtained.
    pub async fn execute(
        &self,
        profile: &DeviceProfile,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<DecodedFrame, DispatchError> {
        self.execute_with_timing(profile, command, &profile.timing, cancel)
            .await
    }

    /// Run one exchange with explicit timing
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::execute`].
    pub async fn execute_with_timing(
        &self,
        profile: &DeviceProfile,
        command: &Command,
        timing: &ResponseTiming,
        cancel: &CancellationToken,
    ) -> Result<DecodedFrame, DispatchError> {
        let mut transport = self.transport.lock().await;
        transport.set_poll_interval(timing.poll_interval);
        transport.reset()?;

        let request = encode(&profile.request, command);
        transport.send(&request, timing.write_timeout, cancel).await?;

        let strategy = command
            .expected_response_len
            .map_or_else(|| profile.read_strategy(), ReadStrategy::Exact);
        let reply = match strategy {
            ReadStrategy::Exact(len) => transport.read_exact(len, timing.max_wait, cancel).await?,
            ReadStrategy::UntilIdle => {
                transport
                    .receive_until_idle(timing.max_wait, timing.idle_quiet, cancel)
                    .await?
            }
        };

        if reply.is_empty() {
            tracing::debug!(family = %profile.family, function = command.function, "no reply");
            return Err(TransportError::Timeout(timing.max_wait).into());
        }
        tracing::debug!(frame = %hex::encode_upper(&reply), "RX");

        let decoded = decode(&profile.response, &reply).map_err(|failure| {
            tracing::warn!(family = %profile.family, %failure, "invalid reply");
            TransportError::from(failure)
        })?;
        transport.consume(decoded.raw_len);

        match profile
            .status
            .classify_reply(decoded.status_code, decoded.payload.first().copied())
        {
            StatusClass::Success => Ok(decoded),
            StatusClass::Failure(status) => {
                tracing::warn!(family = %profile.family, code = decoded.status_code, %status, "device error");
                Err(DispatchError::Device(status))
            }
        }
    }

    /// Run an exchange, repeating retryable failures per `policy`
    ///
    /// # Errors
    ///
    /// The error of the last attempt, or [`TransportError::Cancelled`] if the
    /// token fires during a backoff pause.
    pub async fn execute_with_retry(
        &self,
        profile: &DeviceProfile,
        command: &Command,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<DecodedFrame, DispatchError> {
        let mut attempt = 1;
        loop {
            match self.execute(profile, command, cancel).await {
                Ok(frame) => return Ok(frame),
                Err(e) if attempt < policy.max_attempts && RetryPolicy::is_retryable(&e) => {
                    let delay = policy.delay_for(attempt);
                    tracing::info!(attempt, error = %e, ?delay, "retrying command");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(TransportError::Cancelled.into()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Transport statistics
    pub async fn stats(&self) -> TransportStats {
        self.transport.lock().await.stats()
    }

    /// Run `f` with exclusive access to the transport
    pub async fn with_transport<R>(&self, f: impl FnOnce(&mut Transport<C>) -> R) -> R {
        let mut transport = self.transport.lock().await;
        f(&mut transport)
    }

    /// Close the underlying channel
    ///
    /// # Errors
    ///
    /// Propagates the channel's close error.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.lock().await.close().await
    }
}
