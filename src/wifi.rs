//! # WiFi state machine
//!
//! Mode switching, station join/leave, access point creation, scanning and
//! address queries. All device-wide state lives in the driver instance and
//! mirrors the coprocessor: it is set by successful command completion and
//! the unsolicited `WIFI ...` notifications, never silently assumed, and
//! snaps back to unknown when a reboot is detected.
//!
//! One firmware quirk is load-bearing here: the ESP8285 AT firmware cannot
//! join a station network while the access point is active. [Adapter::connect]
//! therefore forces station-only mode first, which drops any AP clients. This
//! is a required precondition of the join, not a hidden side effect.
use crate::adapter::{Adapter, CommandError, ResponseLines};
use crate::commands::Command;
use crate::parser::split_fields;
use crate::transport::SerialLink;
use core::net::Ipv4Addr;
use fugit_timer::Timer;
use heapless::{String, Vec};

/// Maximum networks returned by one scan
pub const MAX_SCAN_ENTRIES: usize = 16;

/// WiFi operating mode of the coprocessor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WifiMode {
    Station,
    AccessPoint,
    Both,
    /// Not queried yet, or lost through a device reset
    Unknown,
}

impl WifiMode {
    pub(crate) fn code(&self) -> Option<usize> {
        match self {
            WifiMode::Station => Some(1),
            WifiMode::AccessPoint => Some(2),
            WifiMode::Both => Some(3),
            WifiMode::Unknown => None,
        }
    }

    fn from_code(code: usize) -> Self {
        match code {
            1 => WifiMode::Station,
            2 => WifiMode::AccessPoint,
            3 => WifiMode::Both,
            _ => WifiMode::Unknown,
        }
    }

    fn includes_access_point(&self) -> bool {
        matches!(self, WifiMode::AccessPoint | WifiMode::Both)
    }
}

/// Station connectivity lifecycle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Driver created or device reset detected, nothing queried yet
    Uninitialized,
    /// Initialization completed, mode queried
    ModeKnown,
    /// Join command in flight
    Connecting,
    /// Joined a station network
    Connected,
    /// Last join attempt failed, see [Adapter::last_join_error]
    Failed,
    /// Left the network, or connectivity was lost
    Disconnected,
}

/// Encryption scheme for a created access point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApEncryption {
    Open,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
}

impl ApEncryption {
    pub(crate) fn code(&self) -> usize {
        match self {
            ApEncryption::Open => 0,
            ApEncryption::WpaPsk => 2,
            ApEncryption::Wpa2Psk => 3,
            ApEncryption::WpaWpa2Psk => 4,
        }
    }
}

/// Target interface of a DHCP toggle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DhcpScope {
    SoftAp,
    Station,
    Both,
}

impl DhcpScope {
    pub(crate) fn code(&self) -> usize {
        match self {
            DhcpScope::SoftAp => 0,
            DhcpScope::Station => 1,
            DhcpScope::Both => 2,
        }
    }
}

/// Radio sleep mode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SleepMode {
    Disabled,
    Light,
    Modem,
}

impl SleepMode {
    pub(crate) fn code(&self) -> usize {
        match self {
            SleepMode::Disabled => 0,
            SleepMode::Light => 1,
            SleepMode::Modem => 2,
        }
    }
}

/// Device-wide WiFi state owned by the driver
pub(crate) struct WifiState {
    pub(crate) mode: WifiMode,
    pub(crate) connection: ConnectionState,

    /// Joined to a station network? Updated by 'WIFI ...' notifications.
    pub(crate) joined: bool,

    /// An IP was assigned by the access point
    pub(crate) ip_assigned: bool,

    /// Last queried address information
    pub(crate) ip: Option<IpInfo>,

    /// Error of the last failed join, kept for inspection
    pub(crate) last_error: Option<CommandError>,
}

impl WifiState {
    pub(crate) fn new() -> Self {
        Self {
            mode: WifiMode::Unknown,
            connection: ConnectionState::Uninitialized,
            joined: false,
            ip_assigned: false,
            ip: None,
            last_error: None,
        }
    }
}

/// Station connection state after a join
#[derive(Copy, Clone, Debug)]
pub struct JoinState {
    /// True if connected to an access point
    pub connected: bool,

    /// True if an IP was assigned
    pub ip_assigned: bool,
}

/// One network found by a scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: String<32>,

    /// Signal strength in dBm
    pub rssi: i16,

    pub channel: u8,

    /// Raw firmware encryption code: 0 open, 1 WEP, 2 WPA-PSK, 3 WPA2-PSK,
    /// 4 WPA/WPA2-PSK
    pub encryption: u8,

    pub mac: String<17>,
}

/// Local IPv4 and MAC addresses (AT+CIFSR)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IpInfo {
    pub station: Option<Ipv4Addr>,
    pub station_mac: Option<String<17>>,
    pub access_point: Option<Ipv4Addr>,
    pub access_point_mac: Option<String<17>>,
}

/// Station interface configuration (AT+CIPSTA?)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StationIpConfig {
    pub ip: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
}

/// WiFi related errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WifiError {
    /// Given SSID is longer than the maximum of 32 chars
    InvalidSsidLength,

    /// Given password is outside the firmware limits (max. 63 chars, min. 8
    /// for an encrypted access point)
    InvalidPasswordLength,

    /// Operation needs a concrete mode, but the mode is unknown
    InvalidMode,

    /// The firmware lacks the requested capability, e.g. SoftAP+Station mode
    Unsupported,

    /// Reset or liveness probe failed
    ResetFailed(CommandError),

    /// CWMODE command failed
    ModeFailed(CommandError),

    /// CWJAP command failed
    JoinFailed(CommandError),

    /// CWQAP command failed
    LeaveFailed(CommandError),

    /// CWSAP command failed
    ApConfigFailed(CommandError),

    /// CWLAP command failed
    ScanFailed(CommandError),

    /// A status or address query failed
    QueryFailed(CommandError),

    /// CWDHCP command failed
    DhcpFailed(CommandError),

    /// PING command failed or the target is unreachable
    PingFailed(CommandError),

    /// SLEEP command failed
    SleepFailed(CommandError),
}

impl<S: SerialLink, T: Timer<TIMER_HZ>, const TIMER_HZ: u32, const RX_CAP: usize>
    Adapter<S, T, TIMER_HZ, RX_CAP>
{
    /// Resets the coprocessor and brings the driver to a known state.
    ///
    /// Waits for the boot marker (older firmware boots silently, so a quiet
    /// reset is tolerated), probes the command interface, queries the
    /// firmware version and the current mode.
    pub fn initialize(&mut self) -> Result<(), WifiError> {
        match self.execute(&Command::reset()) {
            Ok(_) => {}
            Err(CommandError::Timeout) => {}
            Err(error) => return Err(WifiError::ResetFailed(error)),
        }

        self.on_device_reset();

        self.execute(&Command::probe()).map_err(WifiError::ResetFailed)?;
        self.execute(&Command::firmware_version())
            .map_err(WifiError::QueryFailed)?;
        self.refresh_mode()?;

        self.wifi.connection = ConnectionState::ModeKnown;
        Ok(())
    }

    /// Joins a station network and waits up to `timeout_ms` for the result.
    ///
    /// If the current mode includes the access point, the mode is forced to
    /// station-only first — the firmware cannot join otherwise. Any AP
    /// clients are dropped by that switch.
    pub fn connect(&mut self, ssid: &str, password: &str, timeout_ms: u32) -> Result<JoinState, WifiError> {
        if ssid.len() > 32 {
            return Err(WifiError::InvalidSsidLength);
        }

        if password.len() > 63 {
            return Err(WifiError::InvalidPasswordLength);
        }

        // The mode is read, never assumed
        if self.wifi.mode == WifiMode::Unknown {
            self.refresh_mode()?;
        }

        if self.wifi.mode != WifiMode::Station {
            self.set_mode(WifiMode::Station)?;
        }

        self.wifi.connection = ConnectionState::Connecting;
        if let Err(error) = self.execute(&Command::join(ssid, password, timeout_ms)) {
            self.wifi.connection = ConnectionState::Failed;
            self.wifi.last_error = Some(error);
            return Err(WifiError::JoinFailed(error));
        }

        self.wifi.connection = ConnectionState::Connected;
        self.wifi.last_error = None;

        // Address information is queried right away, a best-effort refresh
        let _ = self.ip_info();

        Ok(self.join_status())
    }

    /// Leaves the station network
    pub fn disconnect(&mut self) -> Result<(), WifiError> {
        self.execute(&Command::leave()).map_err(WifiError::LeaveFailed)?;

        self.wifi.connection = ConnectionState::Disconnected;
        self.wifi.joined = false;
        self.wifi.ip_assigned = false;
        self.wifi.ip = None;
        Ok(())
    }

    /// Configures the coprocessor as an access point.
    ///
    /// If the device is in station mode with an active connection, the
    /// combined SoftAP+Station mode is used so the station link survives.
    /// Firmware without that mode rejects the switch, which surfaces as
    /// [WifiError::Unsupported] instead of silently dropping the station.
    pub fn create_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        channel: u8,
        encryption: ApEncryption,
    ) -> Result<(), WifiError> {
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(WifiError::InvalidSsidLength);
        }

        if password.len() > 63 || (encryption != ApEncryption::Open && password.len() < 8) {
            return Err(WifiError::InvalidPasswordLength);
        }

        if self.wifi.mode == WifiMode::Unknown {
            self.refresh_mode()?;
        }

        if !self.wifi.mode.includes_access_point() {
            let target = if self.wifi.joined || self.wifi.connection == ConnectionState::Connected {
                WifiMode::Both
            } else {
                WifiMode::AccessPoint
            };

            match self.set_mode(target) {
                Ok(()) => {}
                Err(WifiError::ModeFailed(CommandError::Rejected)) if target == WifiMode::Both => {
                    return Err(WifiError::Unsupported)
                }
                Err(error) => return Err(error),
            }
        }

        self.execute(&Command::configure_ap(ssid, password, channel, encryption))
            .map_err(WifiError::ApConfigFailed)?;
        Ok(())
    }

    /// Scans for visible networks. An empty list is a normal outcome for a
    /// quiet channel. Results are never cached, every call re-scans.
    pub fn scan(&mut self) -> Result<Vec<ScanEntry, MAX_SCAN_ENTRIES>, WifiError> {
        let lines = self.execute(&Command::scan()).map_err(WifiError::ScanFailed)?;

        let mut networks = Vec::new();
        for line in &lines {
            let Some(record) = line.strip_prefix("+CWLAP:") else {
                continue;
            };

            // Malformed records are skipped, not fatal
            if let Some(entry) = parse_scan_entry(record) {
                let _ = networks.push(entry);
            }
        }

        Ok(networks)
    }

    /// Queries the actual join state from the coprocessor and reconciles the
    /// local connection state with it
    pub fn status(&mut self) -> Result<ConnectionState, WifiError> {
        let lines = self.execute(&Command::query_join()).map_err(WifiError::QueryFailed)?;

        let joined = lines.iter().any(|line| line.starts_with("+CWJAP:"));
        if joined {
            self.wifi.joined = true;
            self.wifi.connection = ConnectionState::Connected;
        } else {
            self.wifi.joined = false;
            if self.wifi.connection == ConnectionState::Connected {
                self.wifi.connection = ConnectionState::Disconnected;
            }
        }

        Ok(self.wifi.connection)
    }

    /// Queries local IPv4 and MAC addresses (AT+CIFSR)
    pub fn ip_info(&mut self) -> Result<IpInfo, WifiError> {
        let lines = self
            .execute(&Command::local_addresses())
            .map_err(WifiError::QueryFailed)?;

        let mut info = IpInfo::default();
        for line in &lines {
            let Some(record) = line.strip_prefix("+CIFSR:") else {
                continue;
            };

            let fields = split_fields(record);
            if fields.len() < 2 {
                continue;
            }

            match fields[0] {
                "STAIP" => info.station = parse_ipv4(fields[1]),
                "APIP" => info.access_point = parse_ipv4(fields[1]),
                "STAMAC" => info.station_mac = String::try_from(fields[1]).ok(),
                "APMAC" => info.access_point_mac = String::try_from(fields[1]).ok(),
                _ => {}
            }
        }

        self.wifi.ip = Some(info.clone());
        Ok(info)
    }

    /// Queries IP, gateway and netmask of the station interface (AT+CIPSTA?)
    pub fn station_ip_config(&mut self) -> Result<StationIpConfig, WifiError> {
        let lines = self
            .execute(&Command::query_station_config())
            .map_err(WifiError::QueryFailed)?;

        let mut config = StationIpConfig::default();
        for line in &lines {
            let Some(record) = line.strip_prefix("+CIPSTA:") else {
                continue;
            };

            let Some((key, value)) = record.split_once(':') else {
                continue;
            };

            let address = parse_ipv4(value.trim_matches('"'));
            match key {
                "ip" => config.ip = address,
                "gateway" => config.gateway = address,
                "netmask" => config.netmask = address,
                _ => {}
            }
        }

        Ok(config)
    }

    /// Switches the WiFi operating mode
    pub fn set_mode(&mut self, mode: WifiMode) -> Result<(), WifiError> {
        let code = mode.code().ok_or(WifiError::InvalidMode)?;

        self.execute(&Command::set_mode(code)).map_err(WifiError::ModeFailed)?;
        self.wifi.mode = mode;
        Ok(())
    }

    /// Returns the last known mode without touching the wire
    pub fn mode(&self) -> WifiMode {
        self.wifi.mode
    }

    /// Returns the local connection state snapshot
    pub fn connection_state(&self) -> ConnectionState {
        self.wifi.connection
    }

    /// Returns the notification-derived join flags
    pub fn join_status(&self) -> JoinState {
        JoinState {
            connected: self.wifi.joined,
            ip_assigned: self.wifi.ip_assigned,
        }
    }

    /// Error of the last failed join attempt
    pub fn last_join_error(&self) -> Option<CommandError> {
        self.wifi.last_error
    }

    /// Raw AT+GMR output
    pub fn firmware_version(&mut self) -> Result<ResponseLines, WifiError> {
        self.execute(&Command::firmware_version())
            .map_err(WifiError::QueryFailed)
    }

    /// Toggles the DHCP client/server of the given interface
    pub fn set_dhcp(&mut self, scope: DhcpScope, enabled: bool) -> Result<(), WifiError> {
        self.execute(&Command::dhcp(scope, enabled))
            .map_err(WifiError::DhcpFailed)?;
        Ok(())
    }

    /// Pings a host and returns the round-trip time in milliseconds
    pub fn ping(&mut self, host: &str) -> Result<u32, WifiError> {
        let lines = self.execute(&Command::ping(host)).map_err(WifiError::PingFailed)?;

        for line in &lines {
            if let Some(value) = line.strip_prefix('+') {
                if let Ok(time) = value.trim().parse() {
                    return Ok(time);
                }
            }
        }

        Err(WifiError::PingFailed(CommandError::Rejected))
    }

    /// Sets the radio sleep mode
    pub fn set_sleep_mode(&mut self, mode: SleepMode) -> Result<(), WifiError> {
        self.execute(&Command::sleep(mode)).map_err(WifiError::SleepFailed)?;
        Ok(())
    }

    /// Queries the current mode from the coprocessor (AT+CWMODE?)
    fn refresh_mode(&mut self) -> Result<(), WifiError> {
        let lines = self.execute(&Command::query_mode()).map_err(WifiError::ModeFailed)?;

        for line in &lines {
            let Some(code) = line.strip_prefix("+CWMODE:") else {
                continue;
            };

            if let Ok(code) = code.trim().parse() {
                self.wifi.mode = WifiMode::from_code(code);
                return Ok(());
            }
        }

        Err(WifiError::InvalidMode)
    }
}

/// Parses one '+CWLAP:(<enc>,"<ssid>",<rssi>,"<mac>",<channel>)' record
fn parse_scan_entry(record: &str) -> Option<ScanEntry> {
    let record = record.strip_prefix('(')?.strip_suffix(')')?;

    let fields = split_fields(record);
    if fields.len() < 5 {
        return None;
    }

    Some(ScanEntry {
        encryption: fields[0].parse().ok()?,
        ssid: String::try_from(fields[1]).ok()?,
        rssi: fields[2].parse().ok()?,
        mac: String::try_from(fields[3]).ok()?,
        channel: fields[4].parse().ok()?,
    })
}

fn parse_ipv4(value: &str) -> Option<Ipv4Addr> {
    value.parse().ok()
}
