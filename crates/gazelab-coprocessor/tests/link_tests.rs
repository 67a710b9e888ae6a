// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CoprocessorLink against the loopback firmware

use crossbeam::channel::{unbounded, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use gazelab_config::CoprocessorConfig;
use gazelab_coprocessor::{
    CommandOutcome, CoprocessorLink, DeviceCommand, EdgeKind, InputEvent, InputSource, LedState,
    LoopbackDevice, LoopbackSerial,
};

fn config() -> CoprocessorConfig {
    CoprocessorConfig {
        open_settle_ms: 0,
        ack_timeout_ms: 150,
        init_ack_timeout_ms: 150,
        brightness: 1.0,
        heartbeat_timeout_ms: 300,
        ..CoprocessorConfig::default()
    }
}

fn start() -> (CoprocessorLink, LoopbackDevice, Receiver<InputEvent>) {
    let (host, device) = LoopbackSerial::pair(Duration::from_millis(10));
    let (tx, rx) = unbounded();
    let link = CoprocessorLink::start_with_transport(&config(), Box::new(host), tx).unwrap();
    (link, device, rx)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_startup_sends_init_then_blanks() {
    let (link, device, _rx) = start();
    assert_eq!(device.written_lines(), vec!["INIT:4:255", "ALL:OFF"]);
    assert_eq!(link.led_state(), LedState::Off);
    assert_eq!(link.port_name(), "loopback");
}

#[test]
fn test_led_updates_are_idempotent() {
    let (link, device, _rx) = start();
    device.take_written();

    assert!(link.set_led(1, [0, 0, 255]));
    assert!(link.set_led(1, [0, 0, 255]));
    assert!(link.set_led(2, [0, 0, 255]));
    assert!(link.all_off());
    assert!(link.all_off());
    assert!(link.all_on([9, 9, 9]));
    assert!(link.all_on([9, 9, 9]));

    assert_eq!(
        device.written_lines(),
        vec![
            "ALL:OFF",
            "PIXEL:1:0:0:255",
            "ALL:OFF",
            "PIXEL:2:0:0:255",
            "ALL:OFF",
            "ALL:ON:9:9:9",
        ]
    );
}

#[test]
fn test_display_values_are_sent_once() {
    let (link, device, _rx) = start();
    device.take_written();

    assert!(link.set_screen("POSITION"));
    assert!(link.set_screen("POSITION"));
    assert!(link.set_str("msg", "a\nb"));
    assert!(link.set_str("msg", "a\nb"));
    assert!(link.set_u8("pct", 70));
    assert!(link.set_bool("ok", true));
    assert!(link.set_bool("ok", true));

    assert_eq!(
        device.written_lines(),
        vec![
            "OLED:UI:SCREEN:POSITION",
            "OLED:UI:SET:STR:msg:a\\nb",
            "OLED:UI:SET:U8:pct:70",
            "OLED:UI:SET:BOOL:ok:1",
        ]
    );
}

#[test]
fn test_error_reply_is_reported_and_not_cached() {
    let (link, device, _rx) = start();
    device.fail_commands(Some("PIXEL"));

    assert!(!link.set_led(3, [255, 0, 0]));
    assert_ne!(link.led_state(), LedState::Single { index: 3, rgb: [255, 0, 0] });
    assert!(matches!(
        link.send_command(&DeviceCommand::Pixel { index: 3, rgb: [1, 1, 1] }),
        CommandOutcome::Error(_)
    ));
    assert!(link.stats().errors >= 2);

    device.fail_commands(None);
    assert!(link.set_led(3, [255, 0, 0]));
}

#[test]
fn test_silent_device_times_out_but_keeps_going() {
    let (link, device, _rx) = start();
    device.set_auto_reply(false);

    let started = Instant::now();
    assert_eq!(link.send_command(&DeviceCommand::AllOff), CommandOutcome::NoReply);
    assert!(started.elapsed() >= Duration::from_millis(150));
    // Written is treated as applied
    assert!(link.all_on([1, 2, 3]));
    assert!(link.stats().replies_missed >= 2);
}

#[test]
fn test_buttons_arrive_as_events() {
    let (_link, device, rx) = start();
    device.press("btn_up");
    device.release("BTN_UP");

    let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    match (first, second) {
        (InputEvent::Button(press), InputEvent::Button(release)) => {
            assert_eq!(press.kind, EdgeKind::Press);
            assert_eq!(press.button, "BTN_UP");
            assert_eq!(press.source, InputSource::Coprocessor);
            assert_eq!(release.kind, EdgeKind::Release);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[test]
fn test_heartbeats_track_liveness() {
    let (link, device, rx) = start();
    assert!(!link.is_alive());

    device.emit_heartbeat(5, 10);
    assert!(wait_until(Duration::from_secs(1), || link.is_alive()));
    assert_eq!(link.boot_epoch(), Some(5));
    assert_eq!(link.uptime_s(), 10);
    // First sighting of an epoch is reported
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        InputEvent::Boot { epoch: 5, uptime_s: 10 }
    );

    device.emit_heartbeat(5, 11);
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());

    assert!(wait_until(Duration::from_secs(2), || !link.is_alive()));
}

#[test]
fn test_reboot_without_ack_invalidates_and_reasserts() {
    let (link, device, rx) = start();
    assert!(link.set_screen("POSITION"));
    assert!(link.set_u8("pct", 42));
    assert!(link.set_led(0, [0, 255, 0]));

    device.emit_boot(7, 1);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        InputEvent::Boot { epoch: 7, uptime_s: 1 }
    );

    // Device reboots again before the host acknowledged epoch 7
    device.emit_heartbeat(8, 0);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        InputEvent::Boot { epoch: 8, uptime_s: 0 }
    );
    assert_eq!(link.stats().reboots, 2);

    device.take_written();
    assert!(link.ack_boot(8));
    assert!(link.reassert(None));
    assert_eq!(device.acked_boot(), Some(8));
    assert_eq!(
        device.written_lines(),
        vec![
            "ACK:BOOT:8",
            "INIT:4:255",
            "ALL:OFF",
            "OLED:INIT",
            "OLED:UI:SCREEN:POSITION",
            "OLED:UI:SET:U8:pct:42",
        ]
    );

    // After re-assertion the first LED update is always sent
    device.take_written();
    assert!(link.set_led(0, [0, 255, 0]));
    assert_eq!(device.written_lines(), vec!["ALL:OFF", "PIXEL:0:0:255:0"]);
}

#[test]
fn test_cache_is_invalidated_by_reboot_alone() {
    let (link, device, rx) = start();
    assert!(link.all_on([5, 5, 5]));
    device.emit_boot(3, 0);
    rx.recv_timeout(Duration::from_secs(1)).unwrap();

    device.take_written();
    assert!(link.all_on([5, 5, 5]));
    assert_eq!(device.written_lines(), vec!["ALL:ON:5:5:5"]);
}

#[test]
fn test_simulated_device_boots_and_accepts_ack() {
    let (tx, rx) = unbounded();
    let (link, device) = CoprocessorLink::simulated(&config(), tx).unwrap();

    let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event, InputEvent::Boot { epoch: 1, uptime_s: 0 });
    assert!(link.ack_boot(1));
    assert_eq!(device.acked_boot(), Some(1));
    assert!(link.is_alive());

    link.stop();
    assert!(!link.is_running());
    assert_eq!(device.written_lines().last().map(String::as_str), Some("ACK:BOOT:1"));
}
