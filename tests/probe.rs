//! End-to-end probing against simulated devices

use std::time::Duration;

use hwprobe_core::core::protocol::devices::{lrf, pelco_d, tau2, visca};
use hwprobe_core::core::simulator::{MatchCondition, ResponseAction, ResponseRule};
use hwprobe_core::{
    DeviceFamily, DeviceTemplates, DispatchError, Dispatcher, OutputFormat, ProbeConfig, Reading, RetryPolicy,
    SerialChannel, TransportError, VirtualDevice,
};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn simulated(config: &ProbeConfig, name: &str) -> (hwprobe_core::DeviceConfig, Dispatcher<Box<dyn SerialChannel>>) {
    let device = assert_ok!(config.device(name)).clone();
    let channel: Box<dyn SerialChannel> =
        Box::new(DeviceTemplates::for_family(device.family, device.wire_address()));
    (device, Dispatcher::from_channel(channel))
}

#[tokio::test(start_paused = true)]
async fn test_default_table_probes_every_device() {
    let config = ProbeConfig::default();
    assert_ok!(config.validate());
    let cancel = CancellationToken::new();

    let (camera, dispatcher) = simulated(&config, "night-camera");
    let frame = assert_ok!(dispatcher.execute(&camera.profile(), &tau2::read_temperature(), &cancel).await);
    let reading = Reading::new("night-camera", camera.family, &frame);
    assert!(reading.render(OutputFormat::Text).ends_with("FPA 30.0 C"));

    let (rangefinder, dispatcher) = simulated(&config, "lrf");
    let frame = assert_ok!(
        dispatcher
            .execute(&rangefinder.profile(), &lrf::command(lrf::SINGLE_RANGING), &cancel)
            .await
    );
    match lrf::parse_reply(lrf::SINGLE_RANGING, &frame.payload) {
        Some(lrf::LrfReading::Range { distance_m, valid, .. }) => {
            assert!(valid);
            assert!(rangefinder.in_range(distance_m));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let (day, dispatcher) = simulated(&config, "day-camera");
    let frame = assert_ok!(dispatcher.execute(&day.profile(), &visca::zoom_inquiry(), &cancel).await);
    assert_eq!(visca::zoom_position(&frame.payload), Some(0x1234));
}

#[tokio::test(start_paused = true)]
async fn test_visca_unknown_command_is_device_error() {
    let dispatcher = Dispatcher::from_channel(DeviceTemplates::visca(1));
    let odd = hwprobe_core::Command::new(0x7E, vec![0x01]);

    let err = assert_err!(dispatcher.execute(&visca::profile(1), &odd, &CancellationToken::new()).await);
    assert_eq!(err.device_status(), Some(hwprobe_core::DeviceStatus::UndefinedFunctionCode));
}

#[tokio::test(start_paused = true)]
async fn test_pelco_zoom_query() {
    let dispatcher = Dispatcher::from_channel(DeviceTemplates::pelco_d(1));
    let frame = assert_ok!(
        dispatcher
            .execute(
                &pelco_d::profile(1),
                &pelco_d::command(pelco_d::QUERY_ZOOM, 0, 0),
                &CancellationToken::new()
            )
            .await
    );

    assert_eq!(frame.function_code, Some(pelco_d::ZOOM_REPLY));
    let reading = Reading::new("head", DeviceFamily::PelcoD, &frame);
    assert_eq!(reading.render(OutputFormat::Hex), "20 00");
}

#[tokio::test(start_paused = true)]
async fn test_slow_reply_is_collected_whole() {
    // Two halves 60 ms apart stay within one idle window
    let spec = tau2::frame_spec();
    let reply = hwprobe_core::core::protocol::encode_reply(
        &spec,
        0x00,
        &hwprobe_core::Command::new(tau2::READ_TEMP_SENSOR, vec![0x00, 0xFA]),
    )
    .to_vec();
    let (head, tail) = reply.split_at(5);
    let device = VirtualDevice::new("slow").with_rule(ResponseRule::new(
        "split",
        MatchCondition::Any,
        ResponseAction::Sequence {
            actions: vec![
                ResponseAction::Send { data: head.to_vec() },
                ResponseAction::Delay { ms: 60 },
                ResponseAction::Send { data: tail.to_vec() },
            ],
        },
    ));

    let dispatcher = Dispatcher::from_channel(device);
    let frame = assert_ok!(
        dispatcher
            .execute(&tau2::profile(), &tau2::read_temperature(), &CancellationToken::new())
            .await
    );
    assert_eq!(tau2::fpa_temperature(&frame.payload), Some(25.0));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_spent_on_silence() {
    let device = VirtualDevice::new("silent");
    let log = device.written();
    let dispatcher = Dispatcher::from_channel(device);
    let profile = lrf::profile();
    let policy = RetryPolicy::attempts(3).backoff(Duration::from_millis(100));

    let start = Instant::now();
    let err = assert_err!(
        dispatcher
            .execute_with_retry(&profile, &lrf::command(lrf::SELF_CHECK), &policy, &CancellationToken::new())
            .await
    );

    assert!(err.is_timeout());
    assert_eq!(log.len(), 3);
    // Three waits plus 100 ms and 200 ms of backoff
    assert_eq!(
        start.elapsed(),
        profile.timing.max_wait * 3 + Duration::from_millis(300)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_wait() {
    let dispatcher = Dispatcher::from_channel(VirtualDevice::new("silent"));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = assert_err!(
        dispatcher
            .execute(&tau2::profile(), &tau2::status_request(), &cancel)
            .await
    );
    assert!(matches!(err, DispatchError::Transport(TransportError::Cancelled)));
    assert!(start.elapsed() < tau2::profile().timing.max_wait);
}

#[tokio::test(start_paused = true)]
async fn test_closed_device_reports_disconnect() {
    let dispatcher = Dispatcher::from_channel(DeviceTemplates::lrf());
    assert_ok!(dispatcher.close().await);

    let err = assert_err!(
        dispatcher
            .execute(&lrf::profile(), &lrf::command(lrf::SELF_CHECK), &CancellationToken::new())
            .await
    );
    assert!(matches!(err, DispatchError::Transport(TransportError::Disconnected)));
}
