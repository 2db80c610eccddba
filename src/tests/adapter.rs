use crate::adapter::{Adapter, CommandError};
use crate::commands::Command;
use crate::links::LinkState;
use crate::tests::mock::{MockSerial, MockTimer};
use crate::wifi::ConnectionState;

type TestAdapter = Adapter<MockSerial, MockTimer, 1_000_000, 256>;

#[test]
fn test_execute_collects_lines_and_filters_echo() {
    let mut serial = MockSerial::new();
    serial.add_line("AT+GMR");
    serial.add_line("AT version:1.7.4.0");
    serial.add_line("SDK version:3.0.4");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let lines = adapter.execute(&Command::firmware_version()).unwrap();

    assert_eq!(adapter.serial.sent(), "AT+GMR\r\n");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "AT version:1.7.4.0");
    assert_eq!(lines[1], "SDK version:3.0.4");
}

#[test]
fn test_execute_rejected_on_error_token() {
    let mut serial = MockSerial::new();
    serial.add_error_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::Rejected);
    // a rejection is not retried
    assert_eq!(adapter.serial.sent(), "AT\r\n");
}

#[test]
fn test_execute_rejected_on_fail_token() {
    let mut serial = MockSerial::new();
    serial.add_fail_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::Rejected);
}

#[test]
fn test_execute_retries_timeout_once() {
    let mut adapter = TestAdapter::new(MockSerial::new(), MockTimer::expiring());
    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::Timeout);
    // same command written twice, then given up
    assert_eq!(adapter.serial.sent(), "AT\r\nAT\r\n");
}

#[test]
fn test_unexpected_ready_resets_driver_state() {
    let mut serial = MockSerial::new();
    serial.add_ready();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.joined = true;
    adapter.wifi.connection = ConnectionState::Connected;
    adapter.multiplexing_enabled = true;
    adapter.links[2].peer_connected();

    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::DeviceReset);
    assert!(!adapter.wifi.joined);
    assert_eq!(adapter.connection_state(), ConnectionState::Uninitialized);
    assert!(!adapter.multiplexing_enabled);
    assert_eq!(adapter.link_status(2).unwrap().state, LinkState::Idle);
}

#[test]
fn test_malformed_data_header_fails_with_desync() {
    let mut serial = MockSerial::new();
    serial.add_rx(b"+IPD,0,abc:garbage\r\n");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::Desync);
}

#[test]
fn test_notifications_are_dispatched_during_command() {
    let mut serial = MockSerial::new();
    serial.add_wifi_connected();
    serial.add_link_connected(0);
    serial.add_data(0, b"pushed");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.execute(&Command::probe()).unwrap();

    assert!(adapter.wifi.joined);
    let status = adapter.link_status(0).unwrap();
    assert_eq!(status.state, LinkState::Open);
    assert_eq!(status.buffered, 6);
}

#[test]
fn test_wifi_disconnect_notification_updates_state() {
    let mut serial = MockSerial::new();
    serial.add_wifi_disconnect();
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.joined = true;
    adapter.wifi.ip_assigned = true;
    adapter.wifi.connection = ConnectionState::Connected;

    adapter.execute(&Command::probe()).unwrap();

    assert!(!adapter.wifi.joined);
    assert!(!adapter.wifi.ip_assigned);
    assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn test_transaction_deadline_matches_command_timeout() {
    let mut serial = MockSerial::new();
    serial.add_ok_response();

    let mut timer = MockTimer::new();
    timer.expect_start().times(1).returning(|duration| {
        assert_eq!(duration, MockTimer::duration_ms(1_000));
        Ok(())
    });

    let mut adapter = TestAdapter::new(serial, timer);
    adapter.execute(&Command::probe()).unwrap();
}

#[test]
fn test_timer_start_error() {
    let mut timer = MockTimer::new();
    timer.expect_start().returning(|_| Err(1));

    let mut adapter = TestAdapter::new(MockSerial::new(), timer);
    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::TimerError);
}

#[test]
fn test_serial_read_failure() {
    let mut serial = MockSerial::new();
    serial.fail_reads();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let result = adapter.execute(&Command::probe());

    assert_eq!(result.unwrap_err(), CommandError::SerialError);
}
