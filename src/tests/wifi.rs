use crate::adapter::{Adapter, CommandError};
use crate::tests::mock::{MockSerial, MockTimer};
use crate::wifi::{
    ApEncryption, ConnectionState, DhcpScope, SleepMode, WifiError, WifiMode,
};
use core::net::Ipv4Addr;

type TestAdapter = Adapter<MockSerial, MockTimer, 1_000_000, 256>;

#[test]
fn test_initialize_full_sequence() {
    let mut serial = MockSerial::new();
    serial.add_ready();
    serial.add_ok_response(); // AT
    serial.add_line("AT version:1.7.4.0");
    serial.add_ok_response(); // AT+GMR
    serial.add_line("+CWMODE:1");
    serial.add_ok_response(); // AT+CWMODE?

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.initialize().unwrap();

    assert_eq!(adapter.serial.sent(), "AT+RST\r\nAT\r\nAT+GMR\r\nAT+CWMODE?\r\n");
    assert_eq!(adapter.connection_state(), ConnectionState::ModeKnown);
    assert_eq!(adapter.mode(), WifiMode::Station);
}

#[test]
fn test_initialize_tolerates_silent_reset() {
    // no boot marker at all, the probe then fails too
    let mut adapter = TestAdapter::new(MockSerial::new(), MockTimer::expiring());
    let result = adapter.initialize();

    assert_eq!(result.unwrap_err(), WifiError::ResetFailed(CommandError::Timeout));
    // reset and probe each retried once before giving up
    assert_eq!(adapter.serial.sent(), "AT+RST\r\nAT+RST\r\nAT\r\nAT\r\n");
}

#[test]
fn test_initialize_skips_boot_noise() {
    let mut serial = MockSerial::new();
    serial.add_rx(&[0xFF, 0xFE, 0x00]); // baud garbage from the boot ROM
    serial.add_rx(b"\r\n");
    serial.add_ready();
    serial.add_ok_response();
    serial.add_ok_response();
    serial.add_line("+CWMODE:3");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.initialize().unwrap();

    assert_eq!(adapter.mode(), WifiMode::Both);
}

#[test]
fn test_connect_forces_station_mode() {
    let mut serial = MockSerial::new();
    serial.add_ok_response(); // AT+CWMODE=1
    serial.add_wifi_connected();
    serial.add_wifi_got_ip();
    serial.add_ok_response(); // AT+CWJAP
    serial.add_line("+CIFSR:STAIP,\"192.168.2.51\"");
    serial.add_line("+CIFSR:STAMAC,\"5c:cf:7f:11:22:33\"");
    serial.add_ok_response(); // AT+CIFSR

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.mode = WifiMode::AccessPoint;

    let state = adapter.connect("Home", "secret123", 20_000).unwrap();

    assert!(state.connected);
    assert!(state.ip_assigned);
    assert_eq!(adapter.connection_state(), ConnectionState::Connected);
    assert_eq!(adapter.mode(), WifiMode::Station);

    let sent = adapter.serial.sent();
    assert!(sent.starts_with("AT+CWMODE=1\r\nAT+CWJAP=\"Home\",\"secret123\"\r\n"));
}

#[test]
fn test_connect_rejected() {
    let mut serial = MockSerial::new();
    serial.add_line("+CWJAP:1"); // reason code: connect timeout
    serial.add_fail_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.mode = WifiMode::Station;

    let result = adapter.connect("Home", "wrong-password", 20_000);

    assert_eq!(result.unwrap_err(), WifiError::JoinFailed(CommandError::Rejected));
    assert_eq!(adapter.connection_state(), ConnectionState::Failed);
    assert_eq!(adapter.last_join_error(), Some(CommandError::Rejected));
}

#[test]
fn test_connect_rejects_overlong_ssid() {
    let mut adapter = TestAdapter::new(MockSerial::new(), MockTimer::expiring());
    let result = adapter.connect("a-network-name-well-over-32-chars-long", "pw", 1_000);

    assert_eq!(result.unwrap_err(), WifiError::InvalidSsidLength);
    assert!(adapter.serial.sent().is_empty());
}

#[test]
fn test_disconnect_clears_state() {
    let mut serial = MockSerial::new();
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.joined = true;
    adapter.wifi.ip_assigned = true;
    adapter.wifi.connection = ConnectionState::Connected;

    adapter.disconnect().unwrap();

    assert_eq!(adapter.serial.sent(), "AT+CWQAP\r\n");
    assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
    assert!(!adapter.join_status().connected);
    assert!(!adapter.join_status().ip_assigned);
}

#[test]
fn test_create_access_point_switches_mode() {
    let mut serial = MockSerial::new();
    serial.add_ok_response(); // AT+CWMODE=2
    serial.add_ok_response(); // AT+CWSAP

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.mode = WifiMode::Station;

    adapter
        .create_access_point("net", "password1", 5, ApEncryption::Wpa2Psk)
        .unwrap();

    assert_eq!(
        adapter.serial.sent(),
        "AT+CWMODE=2\r\nAT+CWSAP=\"net\",\"password1\",5,3\r\n"
    );
    assert_eq!(adapter.mode(), WifiMode::AccessPoint);
}

#[test]
fn test_create_access_point_keeps_station_link() {
    let mut serial = MockSerial::new();
    serial.add_ok_response(); // AT+CWMODE=3
    serial.add_ok_response(); // AT+CWSAP

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.mode = WifiMode::Station;
    adapter.wifi.joined = true;

    adapter
        .create_access_point("net", "password1", 5, ApEncryption::Wpa2Psk)
        .unwrap();

    assert_eq!(adapter.mode(), WifiMode::Both);
    assert!(adapter.serial.sent().starts_with("AT+CWMODE=3\r\n"));
}

#[test]
fn test_create_access_point_combined_mode_unsupported() {
    let mut serial = MockSerial::new();
    serial.add_error_response(); // AT+CWMODE=3 bounces

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.mode = WifiMode::Station;
    adapter.wifi.joined = true;

    let result = adapter.create_access_point("net", "password1", 5, ApEncryption::Wpa2Psk);

    assert_eq!(result.unwrap_err(), WifiError::Unsupported);
}

#[test]
fn test_create_access_point_rejects_short_password() {
    let mut adapter = TestAdapter::new(MockSerial::new(), MockTimer::expiring());
    let result = adapter.create_access_point("net", "short", 5, ApEncryption::Wpa2Psk);

    assert_eq!(result.unwrap_err(), WifiError::InvalidPasswordLength);
    assert!(adapter.serial.sent().is_empty());
}

#[test]
fn test_create_open_access_point_without_password() {
    let mut serial = MockSerial::new();
    serial.add_ok_response();
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.mode = WifiMode::Station;

    adapter.create_access_point("net", "", 1, ApEncryption::Open).unwrap();

    assert!(adapter.serial.sent().ends_with("AT+CWSAP=\"net\",\"\",1,0\r\n"));
}

#[test]
fn test_scan_parses_networks() {
    let mut serial = MockSerial::new();
    serial.add_line("+CWLAP:(3,\"Home\",-52,\"5c:cf:7f:aa:bb:cc\",6)");
    serial.add_line("+CWLAP:(0,\"Cafe, Open\",-70,\"aa:bb:cc:dd:ee:ff\",11)");
    serial.add_line("+CWLAP:(garbled");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let networks = adapter.scan().unwrap();

    assert_eq!(networks.len(), 2);
    assert_eq!(networks[0].ssid, "Home");
    assert_eq!(networks[0].rssi, -52);
    assert_eq!(networks[0].channel, 6);
    assert_eq!(networks[0].encryption, 3);
    assert_eq!(networks[0].mac, "5c:cf:7f:aa:bb:cc");
    // quoted SSIDs may contain commas
    assert_eq!(networks[1].ssid, "Cafe, Open");
}

#[test]
fn test_scan_empty_result() {
    let mut serial = MockSerial::new();
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let networks = adapter.scan().unwrap();

    assert!(networks.is_empty());
}

#[test]
fn test_status_reports_joined_network() {
    let mut serial = MockSerial::new();
    serial.add_line("+CWJAP:\"Home\",\"5c:cf:7f:aa:bb:cc\",6,-52");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let state = adapter.status().unwrap();

    assert_eq!(state, ConnectionState::Connected);
    assert!(adapter.join_status().connected);
}

#[test]
fn test_status_detects_lost_connection() {
    let mut serial = MockSerial::new();
    serial.add_line("No AP");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.wifi.joined = true;
    adapter.wifi.connection = ConnectionState::Connected;

    let state = adapter.status().unwrap();

    assert_eq!(state, ConnectionState::Disconnected);
    assert!(!adapter.join_status().connected);
}

#[test]
fn test_ip_info_parses_addresses() {
    let mut serial = MockSerial::new();
    serial.add_line("+CIFSR:APIP,\"192.168.4.1\"");
    serial.add_line("+CIFSR:APMAC,\"5e:cf:7f:aa:bb:cc\"");
    serial.add_line("+CIFSR:STAIP,\"192.168.2.51\"");
    serial.add_line("+CIFSR:STAMAC,\"5c:cf:7f:aa:bb:cc\"");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let info = adapter.ip_info().unwrap();

    assert_eq!(info.station, Some(Ipv4Addr::new(192, 168, 2, 51)));
    assert_eq!(info.access_point, Some(Ipv4Addr::new(192, 168, 4, 1)));
    assert_eq!(info.station_mac.as_deref(), Some("5c:cf:7f:aa:bb:cc"));
    assert_eq!(info.access_point_mac.as_deref(), Some("5e:cf:7f:aa:bb:cc"));
}

#[test]
fn test_station_ip_config_parses_interface() {
    let mut serial = MockSerial::new();
    serial.add_line("+CIPSTA:ip:\"192.168.2.51\"");
    serial.add_line("+CIPSTA:gateway:\"192.168.2.1\"");
    serial.add_line("+CIPSTA:netmask:\"255.255.255.0\"");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let config = adapter.station_ip_config().unwrap();

    assert_eq!(config.ip, Some(Ipv4Addr::new(192, 168, 2, 51)));
    assert_eq!(config.gateway, Some(Ipv4Addr::new(192, 168, 2, 1)));
    assert_eq!(config.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
}

#[test]
fn test_set_mode_unknown_is_invalid() {
    let mut adapter = TestAdapter::new(MockSerial::new(), MockTimer::expiring());
    let result = adapter.set_mode(WifiMode::Unknown);

    assert_eq!(result.unwrap_err(), WifiError::InvalidMode);
    assert!(adapter.serial.sent().is_empty());
}

#[test]
fn test_set_dhcp_station() {
    let mut serial = MockSerial::new();
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.set_dhcp(DhcpScope::Station, true).unwrap();

    assert_eq!(adapter.serial.sent(), "AT+CWDHCP=1,1\r\n");
}

#[test]
fn test_ping_returns_round_trip_time() {
    let mut serial = MockSerial::new();
    serial.add_line("+32");
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let time = adapter.ping("192.168.2.1").unwrap();

    assert_eq!(adapter.serial.sent(), "AT+PING=\"192.168.2.1\"\r\n");
    assert_eq!(time, 32);
}

#[test]
fn test_ping_unreachable_host() {
    let mut serial = MockSerial::new();
    serial.add_error_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    let result = adapter.ping("203.0.113.200");

    assert_eq!(result.unwrap_err(), WifiError::PingFailed(CommandError::Rejected));
}

#[test]
fn test_set_sleep_mode_modem() {
    let mut serial = MockSerial::new();
    serial.add_ok_response();

    let mut adapter = TestAdapter::new(serial, MockTimer::expiring());
    adapter.set_sleep_mode(SleepMode::Modem).unwrap();

    assert_eq!(adapter.serial.sent(), "AT+SLEEP=2\r\n");
}
