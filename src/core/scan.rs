//! Baud rate discovery
//!
//! Opens the line at each candidate rate, sends the family's harmless
//! query and checks whether the answer starts like a reply frame. A device
//! heard at the wrong rate answers with framing noise or not at all.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::protocol::devices::{lrf, pelco_d, tau2, visca};
use crate::core::protocol::{encode, Command, DeviceFamily, DeviceProfile};
use crate::core::transport::{SerialChannel, Transport, TransportError};

/// Rates tried when none are given
pub const COMMON_BAUD_RATES: [u32; 8] = [9600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600];

/// Pause after opening the port before the query is sent
pub const SETTLE_TIME: Duration = Duration::from_millis(200);

/// What one rate produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum RateOutcome {
    /// Reply starts like a frame of the family
    Found {
        /// Raw reply, hex
        reply: String,
    },
    /// Bytes came back but do not look like a frame
    Garbled {
        /// Raw reply, hex
        reply: String,
    },
    /// Nothing came back
    Silent,
    /// The port could not be used at this rate
    Failed {
        /// Error text
        error: String,
    },
}

/// Result for one baud rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateReport {
    /// Baud rate tried
    pub baud_rate: u32,
    /// What happened
    #[serde(flatten)]
    pub outcome: RateOutcome,
}

impl RateReport {
    /// Whether the device answered sensibly at this rate
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self.outcome, RateOutcome::Found { .. })
    }
}

/// Query that every device of `family` answers without side effects
#[must_use]
pub fn query_command(family: DeviceFamily) -> Command {
    match family {
        DeviceFamily::Tau2 => Command::new(tau2::STATUS_REQUEST, vec![0x00, 0x00]),
        DeviceFamily::Lrf => lrf::command(lrf::SELF_CHECK),
        DeviceFamily::Visca => visca::zoom_inquiry(),
        DeviceFamily::PelcoD => pelco_d::command(pelco_d::QUERY_ZOOM, 0x00, 0x00),
    }
}

/// Whether `reply` could be the start of a frame of `profile`
///
/// Only length and header are checked. A wrong rate rarely produces
/// even that much.
#[must_use]
pub fn looks_like_reply(profile: &DeviceProfile, reply: &[u8]) -> bool {
    reply.len() >= profile.response.min_len && reply.starts_with(&profile.response.header)
}

/// Try every rate in `rates`
///
/// `open` opens the line at one rate. Open failures are recorded per rate
/// and the scan moves on.
///
/// # Errors
///
/// [`TransportError::Cancelled`] if the token fires.
pub async fn scan_baud_rates<C, F>(
    profile: &DeviceProfile,
    rates: &[u32],
    mut open: F,
    cancel: &CancellationToken,
) -> Result<Vec<RateReport>, TransportError>
where
    C: SerialChannel,
    F: FnMut(u32) -> Result<C, TransportError>,
{
    let command = query_command(profile.family);
    let request = encode(&profile.request, &command);
    let timing = profile.timing;
    let mut results = Vec::with_capacity(rates.len());

    for &baud_rate in rates {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let channel = match open(baud_rate) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::debug!(baud_rate, error = %e, "cannot open port");
                results.push(RateReport {
                    baud_rate,
                    outcome: RateOutcome::Failed { error: e.to_string() },
                });
                continue;
            }
        };
        let mut transport = Transport::new(channel).with_poll_interval(timing.poll_interval);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            () = tokio::time::sleep(SETTLE_TIME) => {}
        }

        let reply = exchange(&mut transport, &request, profile, cancel).await;
        if let Err(e) = transport.close().await {
            tracing::debug!(baud_rate, error = %e, "close failed");
        }

        let outcome = match reply {
            Ok(reply) if reply.is_empty() => RateOutcome::Silent,
            Ok(reply) if looks_like_reply(profile, &reply) => RateOutcome::Found {
                reply: hex::encode_upper(&reply),
            },
            Ok(reply) => RateOutcome::Garbled {
                reply: hex::encode_upper(&reply),
            },
            Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
            Err(e) => RateOutcome::Failed { error: e.to_string() },
        };
        tracing::info!(baud_rate, ?outcome, "rate tried");
        results.push(RateReport { baud_rate, outcome });
    }

    Ok(results)
}

async fn exchange<C: SerialChannel>(
    transport: &mut Transport<C>,
    request: &crate::core::protocol::RawFrame,
    profile: &DeviceProfile,
    cancel: &CancellationToken,
) -> Result<Bytes, TransportError> {
    let timing = profile.timing;
    transport.reset()?;
    transport.send(request, timing.write_timeout, cancel).await?;
    transport
        .receive_until_idle(timing.max_wait, timing.idle_quiet, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::{DeviceTemplates, VirtualDevice};

    fn camera_at(actual: u32) -> impl FnMut(u32) -> Result<VirtualDevice, TransportError> {
        move |rate| match rate {
            r if r == actual => Ok(DeviceTemplates::tau2()),
            19_200 => Err(TransportError::ConnectionFailed("rate not supported".into())),
            57_600 => Ok(VirtualDevice::new("silent")),
            _ => Ok(DeviceTemplates::line_noise()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_the_real_rate_is_found() {
        let results = scan_baud_rates(
            &tau2::profile(),
            &COMMON_BAUD_RATES,
            camera_at(tau2::BAUD_RATE),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), COMMON_BAUD_RATES.len());
        let found: Vec<u32> = results.iter().filter(|r| r.is_found()).map(|r| r.baud_rate).collect();
        assert_eq!(found, vec![tau2::BAUD_RATE]);

        let by_rate = |rate: u32| results.iter().find(|r| r.baud_rate == rate).map(|r| &r.outcome);
        assert!(matches!(by_rate(9600), Some(RateOutcome::Garbled { .. })));
        assert!(matches!(by_rate(19_200), Some(RateOutcome::Failed { .. })));
        assert_eq!(by_rate(57_600), Some(&RateOutcome::Silent));
        match by_rate(tau2::BAUD_RATE) {
            Some(RateOutcome::Found { reply }) => assert!(reply.starts_with("6E00")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_the_status_query() {
        let device = DeviceTemplates::tau2();
        let log = device.written();
        let mut device = Some(device);

        let results = scan_baud_rates(
            &tau2::profile(),
            &[tau2::BAUD_RATE],
            |_| device.take().ok_or(TransportError::Disconnected),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(results[0].is_found());
        assert_eq!(
            log.last().as_deref(),
            Some(&[0x6E, 0x00, 0x00, 0x06, 0x00, 0x02, 0x4D, 0x59, 0x00, 0x00, 0x00, 0x00][..])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_scan() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scan_baud_rates(&lrf::profile(), &COMMON_BAUD_RATES, camera_at(lrf::BAUD_RATE), &cancel).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[test]
    fn test_reply_shape() {
        let profile = tau2::profile();
        assert!(looks_like_reply(&profile, &[0x6E; 10]));
        assert!(!looks_like_reply(&profile, &[0x6E; 9]));
        assert!(!looks_like_reply(&profile, &[0x00; 12]));
    }
}
