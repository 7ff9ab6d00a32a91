//! Virtual Device Simulator
//!
//! Scriptable stand-ins for real hardware. A [`VirtualDevice`] implements
//! [`SerialChannel`]: every write is matched against its response rules and
//! the resulting reply bytes are released on the tokio clock, so a paused
//! test runtime replays an exchange with exact timing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::protocol::devices::{lrf, pelco_d, tau2, visca};
use crate::core::protocol::{encode_reply, Command, DeviceFamily, FrameSpec};
use crate::core::transport::{SerialChannel, TransportError};

/// Response rule condition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MatchCondition {
    /// Match exact bytes
    Exact { bytes: Vec<u8> },
    /// Match hex pattern (wildcards with *)
    HexPattern { pattern: String },
    /// Match one byte at an offset, e.g. a function code
    Byte { offset: usize, value: u8 },
    /// Match any input
    Any,
    /// Combined conditions (all must match)
    All { conditions: Vec<MatchCondition> },
}

impl MatchCondition {
    /// Check if data matches this condition
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            Self::Exact { bytes } => data == bytes.as_slice(),
            Self::HexPattern { pattern } => Self::match_hex_pattern(data, pattern),
            Self::Byte { offset, value } => data.get(*offset) == Some(value),
            Self::Any => true,
            Self::All { conditions } => conditions.iter().all(|c| c.matches(data)),
        }
    }

    fn match_hex_pattern(data: &[u8], pattern: &str) -> bool {
        let parts: Vec<&str> = pattern.split_whitespace().collect();
        if data.len() < parts.len() {
            return false;
        }

        parts.iter().zip(data).all(|(part, byte)| {
            *part == "*" || *part == "??" || u8::from_str_radix(part, 16).is_ok_and(|expected| expected == *byte)
        })
    }
}

/// Response action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseAction {
    /// Send fixed bytes
    Send { data: Vec<u8> },
    /// Send hex string
    SendHex { hex: String },
    /// Echo input back
    Echo,
    /// Delay before next action
    Delay { ms: u64 },
    /// Execute multiple actions in sequence
    Sequence { actions: Vec<ResponseAction> },
    /// No response
    None,
}

impl ResponseAction {
    /// Reply after `delay`
    #[must_use]
    pub fn delayed(delay: Duration, data: impl Into<Vec<u8>>) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self::Sequence {
            actions: vec![Self::Delay { ms }, Self::Send { data: data.into() }],
        }
    }

    /// Expand into `(offset from the write, bytes)` chunks
    fn plan(&self, input: &[u8], offset: &mut Duration, out: &mut Vec<(Duration, Bytes)>) {
        match self {
            Self::Send { data } => out.push((*offset, Bytes::copy_from_slice(data))),
            Self::SendHex { hex: text } => match hex::decode(text.replace(' ', "")) {
                Ok(data) => out.push((*offset, Bytes::from(data))),
                Err(e) => tracing::warn!(hex = %text, error = %e, "invalid hex in simulator rule"),
            },
            Self::Echo => out.push((*offset, Bytes::copy_from_slice(input))),
            Self::Delay { ms } => *offset += Duration::from_millis(*ms),
            Self::Sequence { actions } => {
                for action in actions {
                    action.plan(input, offset, out);
                }
            }
            Self::None => {}
        }
    }
}

/// Response rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    /// Rule name
    pub name: String,
    /// Match condition
    pub condition: MatchCondition,
    /// Response action
    pub action: ResponseAction,
    /// Enabled
    pub enabled: bool,
    /// One-shot (disable after first match)
    pub one_shot: bool,
    /// Match count
    #[serde(default)]
    pub match_count: u64,
}

impl ResponseRule {
    /// Create an enabled rule
    pub fn new(name: &str, condition: MatchCondition, action: ResponseAction) -> Self {
        Self {
            name: name.to_string(),
            condition,
            action,
            enabled: true,
            one_shot: false,
            match_count: 0,
        }
    }

    /// Create a simple echo rule
    pub fn echo(name: &str) -> Self {
        Self::new(name, MatchCondition::Any, ResponseAction::Echo)
    }

    /// Disable the rule after its first match
    #[must_use]
    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }
}

/// Frames written to a virtual device, shared with the test that owns it
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Bytes>>>);

impl WriteLog {
    /// Every frame written so far
    pub fn frames(&self) -> Vec<Bytes> {
        self.0.lock().clone()
    }

    /// Number of writes
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Nothing written yet
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Most recent write
    pub fn last(&self) -> Option<Bytes> {
        self.0.lock().last().cloned()
    }

    fn push(&self, frame: Bytes) {
        self.0.lock().push(frame);
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    data: Bytes,
}

/// Simulated device behind a [`SerialChannel`]
pub struct VirtualDevice {
    name: String,
    rules: Vec<ResponseRule>,
    // Sorted by due time
    outgoing: Vec<Scheduled>,
    written: WriteLog,
    stalled: bool,
    closed: bool,
}

impl VirtualDevice {
    /// Create a device that never answers
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
            outgoing: Vec::new(),
            written: WriteLog::default(),
            stalled: false,
            closed: false,
        }
    }

    /// Append a rule
    #[must_use]
    pub fn with_rule(mut self, rule: ResponseRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Put a rule in front of the existing ones
    #[must_use]
    pub fn with_first_rule(mut self, rule: ResponseRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Append a rule; rules are tried in order and the first match answers
    pub fn add_rule(&mut self, rule: ResponseRule) {
        self.rules.push(rule);
    }

    /// Remove a rule by name
    pub fn remove_rule(&mut self, name: &str) {
        self.rules.retain(|r| r.name != name);
    }

    /// Get all rules
    pub fn rules(&self) -> &[ResponseRule] {
        &self.rules
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Refuse (or accept again) every write
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Queue unsolicited bytes, released `after` from now
    pub fn inject(&mut self, after: Duration, data: impl Into<Bytes>) {
        self.schedule(Instant::now() + after, data.into());
    }

    /// Handle on the write log
    pub fn written(&self) -> WriteLog {
        self.written.clone()
    }

    /// Bytes queued but not yet read, released or not
    pub fn queued(&self) -> usize {
        self.outgoing.iter().map(|s| s.data.len()).sum()
    }

    fn schedule(&mut self, due: Instant, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let at = self.outgoing.partition_point(|s| s.due <= due);
        self.outgoing.insert(at, Scheduled { due, data });
    }

    fn ready(&self) -> usize {
        let now = Instant::now();
        self.outgoing.partition_point(|s| s.due <= now)
    }

    fn respond(&mut self, input: &[u8]) {
        let Some(rule) = self
            .rules
            .iter_mut()
            .find(|r| r.enabled && r.condition.matches(input))
        else {
            tracing::trace!(device = %self.name, "no rule matched");
            return;
        };

        rule.match_count += 1;
        if rule.one_shot {
            rule.enabled = false;
        }
        tracing::trace!(device = %self.name, rule = %rule.name, "rule matched");

        let mut chunks = Vec::new();
        let mut offset = Duration::ZERO;
        rule.action.plan(input, &mut offset, &mut chunks);

        let now = Instant::now();
        for (offset, data) in chunks {
            self.schedule(now + offset, data);
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SerialChannel for VirtualDevice {
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        if self.stalled {
            return Ok(0);
        }
        self.written.push(Bytes::copy_from_slice(data));
        self.respond(data);
        Ok(data.len())
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let ready = self.ready();
        Ok(self.outgoing[..ready].iter().map(|s| s.data.len()).sum())
    }

    async fn read_available(&mut self) -> Result<Bytes, TransportError> {
        self.ensure_open()?;
        let ready = self.ready();
        let mut out = BytesMut::new();
        for chunk in self.outgoing.drain(..ready) {
            out.extend_from_slice(&chunk.data);
        }
        Ok(out.freeze())
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        // Bytes still "on the wire" survive a clear
        let ready = self.ready();
        self.outgoing.drain(..ready);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.outgoing.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("virtual:{}", self.name)
    }
}

/// Pre-built devices that answer like the real hardware
pub struct DeviceTemplates;

impl DeviceTemplates {
    /// Reply latency of the templates
    pub const LATENCY: Duration = Duration::from_millis(5);

    /// Device for a family
    pub fn for_family(family: DeviceFamily, address: u8) -> VirtualDevice {
        match family {
            DeviceFamily::Tau2 => Self::tau2(),
            DeviceFamily::Lrf => Self::lrf(),
            DeviceFamily::Visca => Self::visca(address),
            DeviceFamily::PelcoD => Self::pelco_d(address),
        }
    }

    /// Echo device
    pub fn echo() -> VirtualDevice {
        VirtualDevice::new("echo").with_rule(ResponseRule::echo("echo"))
    }

    /// Device heard at the wrong baud rate: every request gets line noise
    pub fn line_noise() -> VirtualDevice {
        VirtualDevice::new("line-noise").with_rule(ResponseRule::new(
            "noise",
            MatchCondition::Any,
            ResponseAction::delayed(Self::LATENCY, [0x00, 0xF8, 0x80, 0x78, 0x00, 0xFE]),
        ))
    }

    /// TAU2 thermal core at 30.0 C
    ///
    /// Setters are acknowledged by echoing the request, unknown function
    /// codes get status 0x06.
    pub fn tau2() -> VirtualDevice {
        let spec = tau2::frame_spec();
        let reply = |function: u8, payload: &[u8]| -> Vec<u8> {
            encode_reply(&spec, 0x00, &Command::new(function, payload.to_vec())).to_vec()
        };
        let on = |function: u8| MatchCondition::Byte { offset: 3, value: function };

        let mut device = VirtualDevice::new("tau2");
        for (name, function, payload) in [
            ("temperature", tau2::READ_TEMP_SENSOR, &[0x01, 0x2C][..]),
            ("status", tau2::STATUS_REQUEST, &[0x00, 0x01][..]),
            ("revision", tau2::GET_REVISION, &[0x00, 0x02, 0x00, 0x07][..]),
            ("ffc", tau2::DO_FFC, &[][..]),
            ("no-op", tau2::NO_OP, &[][..]),
        ] {
            device.add_rule(ResponseRule::new(
                name,
                on(function),
                ResponseAction::delayed(Self::LATENCY, reply(function, payload)),
            ));
        }
        for (name, function) in [
            ("video-mode", tau2::VIDEO_MODE),
            ("video-lut", tau2::VIDEO_LUT),
            ("pan-tilt", tau2::PAN_AND_TILT),
        ] {
            device.add_rule(ResponseRule::new(
                name,
                on(function),
                ResponseAction::Sequence {
                    actions: vec![ResponseAction::Delay { ms: 5 }, ResponseAction::Echo],
                },
            ));
        }
        device.with_rule(ResponseRule::new(
            "undefined",
            MatchCondition::Any,
            ResponseAction::delayed(
                Self::LATENCY,
                encode_reply(&spec, 0x06, &Command::bare(tau2::NO_OP)).to_vec(),
            ),
        ))
    }

    /// Rangefinder seeing a target at 500 m
    pub fn lrf() -> VirtualDevice {
        let spec = lrf::frame_spec();
        let mut device = VirtualDevice::new("lrf");
        for (name, code, params) in [
            ("self-check", lrf::SELF_CHECK, [0x00; 5]),
            ("single", lrf::SINGLE_RANGING, [0x00, 0x00, 0x01, 0xF4, 0x03]),
            ("continuous", lrf::CONTINUOUS_RANGING, [0x00, 0x00, 0x01, 0xF4, 0x03]),
            ("stop", lrf::STOP_RANGING, [0x00; 5]),
            ("temperature", lrf::TEMPERATURE, [0x00, 0x19, 0x00, 0x00, 0x00]),
            ("laser-count", lrf::LASER_COUNT, [0x00, 0x00, 0x10, 0x27, 0x00]),
            ("product", lrf::PRODUCT_INFO, [0x07, 0x12, 0x00, 0x00, 0x00]),
        ] {
            device.add_rule(ResponseRule::new(
                name,
                MatchCondition::Byte { offset: 2, value: code },
                ResponseAction::delayed(Self::LATENCY, frame(&spec, code, &params)),
            ));
        }
        device
    }

    /// VISCA camera answering with ACK then completion
    pub fn visca(address: u8) -> VirtualDevice {
        let reply = visca::response_spec(address).header[0];
        let request = visca::request_spec(address).header[0];
        VirtualDevice::new("visca")
            .with_rule(ResponseRule::new(
                "zoom-inquiry",
                MatchCondition::Exact {
                    bytes: vec![request, visca::CATEGORY_INQUIRY, 0x04, 0x47, visca::TERMINATOR],
                },
                ResponseAction::delayed(
                    Duration::from_millis(10),
                    [reply, 0x50, 0x01, 0x02, 0x03, 0x04, visca::TERMINATOR],
                ),
            ))
            .with_rule(ResponseRule::new(
                "command",
                MatchCondition::Byte {
                    offset: 1,
                    value: visca::CATEGORY_COMMAND,
                },
                ResponseAction::Sequence {
                    actions: vec![
                        ResponseAction::Delay { ms: 10 },
                        ResponseAction::Send {
                            data: vec![reply, visca::ACK | 0x01, visca::TERMINATOR],
                        },
                        ResponseAction::Delay { ms: 30 },
                        ResponseAction::Send {
                            data: vec![reply, visca::COMPLETION | 0x01, visca::TERMINATOR],
                        },
                    ],
                },
            ))
            .with_rule(ResponseRule::new(
                "syntax-error",
                MatchCondition::Any,
                ResponseAction::delayed(Duration::from_millis(10), [reply, 0x60, 0x02, visca::TERMINATOR]),
            ))
    }

    /// Pelco-D head at zoom position 0x2000
    pub fn pelco_d(address: u8) -> VirtualDevice {
        let response = pelco_d::profile(address).response;
        VirtualDevice::new("pelco-d")
            .with_rule(ResponseRule::new(
                "zoom-query",
                MatchCondition::Byte {
                    offset: 3,
                    value: pelco_d::QUERY_ZOOM,
                },
                ResponseAction::delayed(Self::LATENCY, frame(&response, pelco_d::ZOOM_REPLY, &[0x20, 0x00])),
            ))
            .with_rule(ResponseRule::new(
                "ack",
                MatchCondition::Any,
                ResponseAction::Sequence {
                    actions: vec![ResponseAction::Delay { ms: 5 }, ResponseAction::Echo],
                },
            ))
    }
}

fn frame(spec: &FrameSpec, function: u8, payload: &[u8]) -> Vec<u8> {
    encode_reply(spec, 0x00, &Command::new(function, payload.to_vec())).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::Transport;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_idle_accumulation() {
        let mut device = VirtualDevice::new("chunks");
        device.inject(Duration::ZERO, vec![0xAA]);
        device.inject(Duration::from_millis(50), vec![0xBB, 0xCC]);
        let mut transport = Transport::new(device);

        let start = Instant::now();
        let data = transport
            .receive_until_idle(Duration::from_secs(1), Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(&data[..], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exact_leaves_extra_bytes() {
        let mut device = VirtualDevice::new("burst");
        device.inject(Duration::from_millis(20), vec![1, 2, 3, 4, 5, 6]);
        let mut transport = Transport::new(device);

        let data = transport
            .read_exact(4, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&data[..], &[1, 2, 3, 4]);
        assert_eq!(transport.pending(), &[1, 2, 3, 4, 5, 6]);
        transport.consume(4);
        assert_eq!(transport.pending(), &[5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exact_short_at_deadline() {
        let mut device = VirtualDevice::new("short");
        device.inject(Duration::ZERO, vec![0xEE, 0x07]);
        let mut transport = Transport::new(device);

        let start = Instant::now();
        let data = transport
            .read_exact(9, Duration::from_millis(300), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&data[..], &[0xEE, 0x07]);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rules_and_write_log() {
        let mut device = DeviceTemplates::echo();
        let log = device.written();

        assert_eq!(device.write(&[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(device.bytes_available().unwrap(), 3);
        assert_eq!(&device.read_available().await.unwrap()[..], &[1, 2, 3]);
        assert_eq!(log.last().as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_rule() {
        let mut device = VirtualDevice::new("once").with_rule(
            ResponseRule::new("hello", MatchCondition::Any, ResponseAction::SendHex { hex: "AB CD".into() }).one_shot(),
        );
        device.write(&[0x00]).await.unwrap();
        device.write(&[0x00]).await.unwrap();

        assert_eq!(&device.read_available().await.unwrap()[..], &[0xAB, 0xCD]);
        assert_eq!(device.rules()[0].match_count, 1);
        assert!(!device.rules()[0].enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_keeps_bytes_in_flight() {
        let mut device = VirtualDevice::new("late");
        device.inject(Duration::ZERO, vec![0x01]);
        device.inject(Duration::from_millis(40), vec![0x02]);

        device.clear().unwrap();
        assert_eq!(device.bytes_available().unwrap(), 0);
        assert_eq!(device.queued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_and_closed() {
        let mut device = VirtualDevice::new("stuck");
        device.set_stalled(true);
        assert_eq!(device.write(&[1, 2]).await.unwrap(), 0);
        assert!(device.written().is_empty());

        device.close().await.unwrap();
        assert!(matches!(device.write(&[1]).await, Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_match_conditions() {
        let cond = MatchCondition::HexPattern {
            pattern: "6E * * 20".to_string(),
        };
        assert!(cond.matches(&[0x6E, 0x00, 0x00, 0x20, 0x00]));
        assert!(!cond.matches(&[0x6E, 0x00, 0x00, 0x06]));

        let cond = MatchCondition::All {
            conditions: vec![
                MatchCondition::Byte { offset: 0, value: 0xEE },
                MatchCondition::Byte { offset: 2, value: 0x02 },
            ],
        };
        assert!(cond.matches(&[0xEE, 0x07, 0x02]));
        assert!(!cond.matches(&[0xEE, 0x07]));
    }
}
