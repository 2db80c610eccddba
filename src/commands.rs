//! AT command constructors.
//!
//! Each constructor fixes the command text, the transaction timeout and the
//! terminal condition that completes it. Callers validate argument lengths
//! before constructing, so the text buffer never overflows.
use crate::links::LinkKind;
use crate::wifi::{ApEncryption, DhcpScope, SleepMode};
use core::fmt::Write;
use heapless::String;

/// Maximum length of one encoded command line
pub(crate) const COMMAND_SIZE: usize = 128;

/// Maximum payload bytes accepted by a single CIPSEND transmission
pub(crate) const MAX_SEND_CHUNK: usize = 2048;

/// Terminal condition completing a command transaction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Expect {
    /// Plain 'OK'
    Ok,
    /// 'OK', or 'ALREADY CONNECTED' which also counts as acceptance
    OkOrAlreadyConnected,
    /// The '>' transmission prompt. The preceding 'OK' is not terminal here:
    /// payload bytes must not be written before the prompt.
    Prompt,
    /// The boot 'ready' marker. 'OK' and boot noise preceding it are skipped.
    Ready,
}

/// One fully specified request to the coprocessor
pub(crate) struct Command {
    pub(crate) text: String<COMMAND_SIZE>,
    pub(crate) timeout_ms: u32,
    pub(crate) expect: Expect,
}

impl Command {
    fn new(timeout_ms: u32, expect: Expect) -> Self {
        Self {
            text: String::new(),
            timeout_ms,
            expect,
        }
    }

    /// Soft-resets the coprocessor, completes on the boot marker
    pub(crate) fn reset() -> Self {
        let mut command = Self::new(5_000, Expect::Ready);
        let _ = command.text.push_str("AT+RST");
        command
    }

    /// Bare liveness probe
    pub(crate) fn probe() -> Self {
        let mut command = Self::new(1_000, Expect::Ok);
        let _ = command.text.push_str("AT");
        command
    }

    pub(crate) fn firmware_version() -> Self {
        let mut command = Self::new(2_000, Expect::Ok);
        let _ = command.text.push_str("AT+GMR");
        command
    }

    pub(crate) fn set_mode(code: usize) -> Self {
        let mut command = Self::new(1_000, Expect::Ok);
        let _ = write!(command.text, "AT+CWMODE={}", code);
        command
    }

    pub(crate) fn query_mode() -> Self {
        let mut command = Self::new(1_000, Expect::Ok);
        let _ = command.text.push_str("AT+CWMODE?");
        command
    }

    /// Joins a station network. The radio may take many seconds to associate
    /// and obtain a DHCP lease, so the timeout is caller-provided.
    pub(crate) fn join(ssid: &str, password: &str, timeout_ms: u32) -> Self {
        let mut command = Self::new(timeout_ms, Expect::Ok);
        let _ = write!(command.text, "AT+CWJAP=\"{}\",\"{}\"", ssid, password);
        command
    }

    pub(crate) fn query_join() -> Self {
        let mut command = Self::new(2_000, Expect::Ok);
        let _ = command.text.push_str("AT+CWJAP?");
        command
    }

    pub(crate) fn leave() -> Self {
        let mut command = Self::new(2_000, Expect::Ok);
        let _ = command.text.push_str("AT+CWQAP");
        command
    }

    pub(crate) fn configure_ap(ssid: &str, password: &str, channel: u8, encryption: ApEncryption) -> Self {
        let mut command = Self::new(3_000, Expect::Ok);
        let _ = write!(
            command.text,
            "AT+CWSAP=\"{}\",\"{}\",{},{}",
            ssid,
            password,
            channel,
            encryption.code()
        );
        command
    }

    /// Scans for visible networks, the radio needs several seconds
    pub(crate) fn scan() -> Self {
        let mut command = Self::new(10_000, Expect::Ok);
        let _ = command.text.push_str("AT+CWLAP");
        command
    }

    pub(crate) fn local_addresses() -> Self {
        let mut command = Self::new(2_000, Expect::Ok);
        let _ = command.text.push_str("AT+CIFSR");
        command
    }

    pub(crate) fn query_station_config() -> Self {
        let mut command = Self::new(2_000, Expect::Ok);
        let _ = command.text.push_str("AT+CIPSTA?");
        command
    }

    pub(crate) fn enable_multiplexing() -> Self {
        let mut command = Self::new(1_000, Expect::Ok);
        let _ = command.text.push_str("AT+CIPMUX=1");
        command
    }

    pub(crate) fn open_link(
        link_id: usize,
        kind: LinkKind,
        host: &str,
        port: u16,
        local_port: Option<u16>,
    ) -> Self {
        let mut command = Self::new(10_000, Expect::OkOrAlreadyConnected);
        let _ = write!(
            command.text,
            "AT+CIPSTART={},\"{}\",\"{}\",{}",
            link_id,
            kind.at_type(),
            host,
            port
        );

        if let Some(local_port) = local_port {
            let _ = write!(command.text, ",{}", local_port);
        }

        command
    }

    pub(crate) fn prepare_send(link_id: usize, length: usize) -> Self {
        let mut command = Self::new(1_000, Expect::Prompt);
        let _ = write!(command.text, "AT+CIPSEND={},{}", link_id, length);
        command
    }

    pub(crate) fn close_link(link_id: usize) -> Self {
        let mut command = Self::new(5_000, Expect::Ok);
        let _ = write!(command.text, "AT+CIPCLOSE={}", link_id);
        command
    }

    pub(crate) fn connection_status() -> Self {
        let mut command = Self::new(2_000, Expect::Ok);
        let _ = command.text.push_str("AT+CIPSTATUS");
        command
    }

    pub(crate) fn dhcp(scope: DhcpScope, enabled: bool) -> Self {
        let mut command = Self::new(1_000, Expect::Ok);
        let _ = write!(command.text, "AT+CWDHCP={},{}", scope.code(), enabled as usize);
        command
    }

    pub(crate) fn ping(host: &str) -> Self {
        let mut command = Self::new(5_000, Expect::Ok);
        let _ = write!(command.text, "AT+PING=\"{}\"", host);
        command
    }

    pub(crate) fn sleep(mode: SleepMode) -> Self {
        let mut command = Self::new(1_000, Expect::Ok);
        let _ = write!(command.text, "AT+SLEEP={}", mode.code());
        command
    }
}
