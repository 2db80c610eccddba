//! # Connection link manager
//!
//! The coprocessor multiplexes up to five TCP/UDP/TLS connections over the
//! single serial channel, addressed by link ids 0-4. Each id maps to one
//! fixed slot here: a slot is claimed by [Adapter::open_link], carries a
//! bounded inbound buffer filled from `+IPD` data events, and returns to
//! `Idle` on close, peer close or device reset.
//!
//! Inbound data is pushed by the coprocessor whenever it likes, so buffers
//! fill even while unrelated commands are in flight. When a buffer is full,
//! the newest bytes are dropped and counted — blocking would stall the whole
//! serial channel for all five links.
use crate::adapter::{Adapter, CommandError};
use crate::commands::{Command, MAX_SEND_CHUNK};
use crate::parser::{split_fields, Token};
use crate::transport::SerialLink;
use crate::wifi::{ConnectionState, WifiMode};
use fugit::ExtU32;
use fugit_timer::Timer;
use heapless::{Deque, String, Vec};

/// Number of fixed connection slots
pub const LINK_COUNT: usize = 5;

/// Connection type of a link
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Tcp,
    Udp,
    /// TLS terminated by the coprocessor, payload is opaque bytes here
    Tls,
}

impl LinkKind {
    pub(crate) fn at_type(&self) -> &'static str {
        match self {
            LinkKind::Tcp => "TCP",
            LinkKind::Udp => "UDP",
            LinkKind::Tls => "SSL",
        }
    }

    fn from_at_type(value: &str) -> Option<Self> {
        match value {
            "TCP" => Some(LinkKind::Tcp),
            "UDP" => Some(LinkKind::Udp),
            "SSL" => Some(LinkKind::Tls),
            _ => None,
        }
    }
}

/// Lifecycle state of a link slot
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Slot is free and may be claimed
    #[default]
    Idle,
    /// Open command accepted, connect notification pending
    Opening,
    /// Connection fully established
    Open,
    /// Close requested, confirmation pending
    Closing,
}

/// Internal state of a single link slot
pub(crate) struct LinkSlot<const RX_CAP: usize> {
    pub(crate) state: LinkState,
    pub(crate) kind: Option<LinkKind>,
    pub(crate) remote_host: String<64>,
    pub(crate) remote_port: u16,
    pub(crate) local_port: Option<u16>,

    /// Inbound bytes awaiting consumption, oldest first
    pub(crate) inbound: Deque<u8, RX_CAP>,

    /// Bytes dropped because the buffer was at capacity
    pub(crate) overflow: u32,
}

impl<const RX_CAP: usize> LinkSlot<RX_CAP> {
    pub(crate) fn new() -> Self {
        Self {
            state: LinkState::Idle,
            kind: None,
            remote_host: String::new(),
            remote_port: 0,
            local_port: None,
            inbound: Deque::new(),
            overflow: 0,
        }
    }

    /// Claims the slot for a new connection attempt
    fn begin_open(&mut self, kind: LinkKind, host: &str, port: u16, local_port: Option<u16>) {
        self.state = LinkState::Opening;
        self.kind = Some(kind);
        self.remote_host = String::try_from(host).unwrap_or_default();
        self.remote_port = port;
        self.local_port = local_port;
        self.inbound.clear();
        self.overflow = 0;
    }

    /// Connect notification: also covers inbound connections on a listening
    /// coprocessor, which arrive for an idle slot
    pub(crate) fn peer_connected(&mut self) {
        self.state = LinkState::Open;
    }

    /// Peer closed the connection. The slot is free again, buffered bytes
    /// stay readable until drained or the slot is reopened.
    pub(crate) fn peer_closed(&mut self) {
        self.state = LinkState::Idle;
        self.kind = None;
    }

    fn finish_close(&mut self) {
        self.state = LinkState::Idle;
        self.kind = None;
    }

    /// Device reset: connection and buffered data are gone
    pub(crate) fn force_idle(&mut self) {
        self.state = LinkState::Idle;
        self.kind = None;
        self.local_port = None;
        self.inbound.clear();
        self.overflow = 0;
    }

    /// Appends a data event payload, dropping the newest bytes once the
    /// buffer is at capacity. Previously buffered bytes are never displaced
    /// or reordered.
    pub(crate) fn push_data(&mut self, payload: &[u8], dropped: usize) {
        self.overflow += dropped as u32;

        for &byte in payload {
            if self.inbound.push_back(byte).is_err() {
                self.overflow += 1;
            }
        }
    }
}

/// Caller-visible snapshot of a link slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub kind: Option<LinkKind>,
    pub remote_host: String<64>,
    pub remote_port: u16,
    pub local_port: Option<u16>,

    /// Inbound bytes currently buffered
    pub buffered: usize,

    /// Inbound bytes dropped since the slot was (re)opened
    pub overflow: u32,
}

/// One row of the coprocessor's own connection table (AT+CIPSTATUS)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLinkStatus {
    pub link_id: usize,
    pub kind: Option<LinkKind>,
    pub remote_host: String<64>,
    pub remote_port: u16,
    pub local_port: u16,

    /// 0 = client role, 1 = server role
    pub role: u8,
}

/// Link related errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    /// Link id outside 0-4
    InvalidLink,

    /// Operation is not valid in the link's current state, e.g. opening a
    /// busy slot or sending on an idle one
    InvalidState,

    /// No network path: station not connected and no access point active
    NotConnected,

    /// Error while sending the CIPMUX command for enabling multiple links
    EnablingMultiplexingFailed(CommandError),

    /// CIPSTART command failed
    ConnectFailed(CommandError),

    /// Transmission failed. `accepted` is the number of bytes confirmed
    /// before the failure, so the caller can resume deterministically.
    SendFailed { accepted: usize, error: CommandError },

    /// Coprocessor confirmed a different byte count than transmitted
    PartialSend { accepted: usize },

    /// The peer closed the link while a transmission was in progress.
    /// `accepted` is the number of bytes confirmed before the close.
    LinkClosed { accepted: usize },

    /// CIPCLOSE command failed
    CloseFailed(CommandError),

    /// Polling for inbound data failed
    ReceiveFailed(CommandError),

    /// CIPSTATUS command failed
    StatusFailed(CommandError),
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            LinkError::InvalidLink => defmt::write!(f, "LinkError::InvalidLink"),
            LinkError::InvalidState => defmt::write!(f, "LinkError::InvalidState"),
            LinkError::NotConnected => defmt::write!(f, "LinkError::NotConnected"),
            LinkError::EnablingMultiplexingFailed(e) => {
                defmt::write!(f, "LinkError::EnablingMultiplexingFailed({})", e)
            }
            LinkError::ConnectFailed(e) => defmt::write!(f, "LinkError::ConnectFailed({})", e),
            LinkError::SendFailed { accepted, error } => {
                defmt::write!(f, "LinkError::SendFailed({}, {})", accepted, error)
            }
            LinkError::PartialSend { accepted } => defmt::write!(f, "LinkError::PartialSend({})", accepted),
            LinkError::LinkClosed { accepted } => defmt::write!(f, "LinkError::LinkClosed({})", accepted),
            LinkError::CloseFailed(e) => defmt::write!(f, "LinkError::CloseFailed({})", e),
            LinkError::ReceiveFailed(e) => defmt::write!(f, "LinkError::ReceiveFailed({})", e),
            LinkError::StatusFailed(e) => defmt::write!(f, "LinkError::StatusFailed({})", e),
        }
    }
}

impl<S: SerialLink, T: Timer<TIMER_HZ>, const TIMER_HZ: u32, const RX_CAP: usize>
    Adapter<S, T, TIMER_HZ, RX_CAP>
{
    /// Opens a connection on the given link id.
    ///
    /// Requires the slot to be idle and a network path to exist (joined
    /// station network, or an active access point). On first use the
    /// coprocessor is switched to multiple-connection mode.
    pub fn open_link(
        &mut self,
        link_id: usize,
        kind: LinkKind,
        host: &str,
        port: u16,
        local_port: Option<u16>,
    ) -> Result<(), LinkError> {
        let slot = self.links.get(link_id).ok_or(LinkError::InvalidLink)?;
        if slot.state != LinkState::Idle {
            return Err(LinkError::InvalidState);
        }

        if !self.has_network_path() {
            return Err(LinkError::NotConnected);
        }

        self.enable_multiplexing()?;

        self.links[link_id].begin_open(kind, host, port, local_port);

        let command = Command::open_link(link_id, kind, host, port, local_port);
        if let Err(error) = self.execute(&command) {
            self.links[link_id].force_idle();
            return Err(LinkError::ConnectFailed(error));
        }

        // The '<id>,CONNECT' notification usually precedes the OK and has
        // already moved the slot to Open. Some firmware acknowledges UDP
        // links with a bare OK, which counts as immediate acceptance.
        self.links[link_id].state = LinkState::Open;
        Ok(())
    }

    /// Sends a payload on an open link and returns the number of bytes
    /// accepted by the coprocessor.
    ///
    /// The payload is divided into chunks of at most 2048 bytes, each
    /// transmitted and confirmed separately. A failure mid-sequence reports
    /// the bytes accepted so far, so the caller can resume or abort without
    /// duplicating data of unknown length.
    pub fn send(&mut self, link_id: usize, data: &[u8]) -> Result<usize, LinkError> {
        if link_id >= LINK_COUNT {
            return Err(LinkError::InvalidLink);
        }

        if self.links[link_id].state != LinkState::Open {
            return Err(LinkError::InvalidState);
        }

        let mut accepted = 0;
        for chunk in data.chunks(MAX_SEND_CHUNK) {
            // The peer may close the link between chunks, its close
            // notification is processed while waiting for confirmations
            if self.links[link_id].state != LinkState::Open {
                return Err(LinkError::LinkClosed { accepted });
            }

            self.send_chunk(link_id, chunk, accepted)?;
            accepted += chunk.len();
        }

        Ok(accepted)
    }

    /// Drains the inbound buffers of all links, polling the serial channel
    /// up to the given deadline for new data events.
    ///
    /// This is a fan-in across all links: data events arrive asynchronously
    /// and unattributed to any caller request. Returns as soon as buffered
    /// data is available and the channel goes quiet, or when the deadline
    /// elapses. An empty result is a normal outcome, not a failure.
    pub fn receive(
        &mut self,
        timeout_ms: u32,
    ) -> Result<Vec<(usize, Vec<u8, RX_CAP>), LINK_COUNT>, LinkError> {
        self.timer
            .start(timeout_ms.millis())
            .map_err(|_| LinkError::ReceiveFailed(CommandError::TimerError))?;

        loop {
            match self.serial.read_byte() {
                Ok(byte) => {
                    if let Some(token) = self.tokenizer.push(byte) {
                        if token == Token::Ready {
                            self.on_device_reset();
                            return Err(LinkError::ReceiveFailed(CommandError::DeviceReset));
                        }
                        self.dispatch_event(token);
                    }
                }
                Err(nb::Error::WouldBlock) => {
                    if self.buffered_data_available() {
                        break;
                    }

                    match self.timer.wait() {
                        Ok(()) => break,
                        Err(nb::Error::WouldBlock) => {}
                        Err(nb::Error::Other(_)) => {
                            return Err(LinkError::ReceiveFailed(CommandError::TimerError))
                        }
                    }
                }
                Err(nb::Error::Other(_)) => {
                    return Err(LinkError::ReceiveFailed(CommandError::SerialError))
                }
            }
        }

        Ok(self.drain_buffers())
    }

    /// Requests termination of a link. Idempotent: closing an idle link is a
    /// no-op, and a link already closed by the peer converges on the same
    /// idle state without a wire command.
    pub fn close(&mut self, link_id: usize) -> Result<(), LinkError> {
        if link_id >= LINK_COUNT {
            return Err(LinkError::InvalidLink);
        }

        match self.links[link_id].state {
            LinkState::Idle => Ok(()),
            LinkState::Closing => {
                self.links[link_id].finish_close();
                Ok(())
            }
            LinkState::Opening | LinkState::Open => {
                self.links[link_id].state = LinkState::Closing;
                let result = self.execute(&Command::close_link(link_id));

                // The slot must not be lost even on failure, otherwise the
                // id could never be reused
                self.links[link_id].finish_close();

                match result {
                    Ok(_) => Ok(()),
                    // The peer won the race and the link was already gone
                    Err(CommandError::Rejected) => Ok(()),
                    Err(error) => Err(LinkError::CloseFailed(error)),
                }
            }
        }
    }

    /// Closes all links. Every slot is visited even when one close fails,
    /// so after completion all slots report idle; the first error is
    /// reported at the end.
    pub fn close_all(&mut self) -> Result<(), LinkError> {
        let mut result = Ok(());
        for link_id in 0..LINK_COUNT {
            if let Err(error) = self.close(link_id) {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }

        result
    }

    /// Returns a read-only snapshot of a link slot
    pub fn link_status(&self, link_id: usize) -> Result<LinkStatus, LinkError> {
        let slot = self.links.get(link_id).ok_or(LinkError::InvalidLink)?;

        Ok(LinkStatus {
            state: slot.state,
            kind: slot.kind,
            remote_host: slot.remote_host.clone(),
            remote_port: slot.remote_port,
            local_port: slot.local_port,
            buffered: slot.inbound.len(),
            overflow: slot.overflow,
        })
    }

    /// Queries the coprocessor's own connection table (AT+CIPSTATUS)
    pub fn connection_status(&mut self) -> Result<Vec<RemoteLinkStatus, LINK_COUNT>, LinkError> {
        let lines = self
            .execute(&Command::connection_status())
            .map_err(LinkError::StatusFailed)?;

        let mut statuses = Vec::new();
        for line in &lines {
            let Some(record) = line.strip_prefix("+CIPSTATUS:") else {
                continue; // the leading 'STATUS:<n>' summary line
            };

            if let Some(status) = parse_remote_status(record) {
                let _ = statuses.push(status);
            }
        }

        Ok(statuses)
    }

    /// Transmits one chunk: prepare command, prompt, raw payload, then the
    /// SEND OK confirmation with its byte count check
    fn send_chunk(&mut self, link_id: usize, chunk: &[u8], accepted: usize) -> Result<(), LinkError> {
        self.send_confirmed = None;
        self.recv_byte_count = None;

        self.execute(&Command::prepare_send(link_id, chunk.len()))
            .map_err(|error| LinkError::SendFailed { accepted, error })?;
        self.write_raw(chunk)
            .map_err(|error| LinkError::SendFailed { accepted, error })?;

        self.timer.start(self.send_timeout).map_err(|_| LinkError::SendFailed {
            accepted,
            error: CommandError::TimerError,
        })?;

        loop {
            let token = match self.poll_token() {
                Ok(Some(token)) => token,
                Ok(None) => {
                    return Err(LinkError::SendFailed {
                        accepted,
                        error: CommandError::Timeout,
                    })
                }
                Err(error) => return Err(LinkError::SendFailed { accepted, error }),
            };

            match token {
                Token::Ready => {
                    self.on_device_reset();
                    return Err(LinkError::SendFailed {
                        accepted,
                        error: CommandError::DeviceReset,
                    });
                }
                other => self.dispatch_event(other),
            }

            match self.send_confirmed {
                Some(true) => {
                    // Older firmware omits the 'Recv N bytes' line entirely
                    if self.recv_byte_count.is_some_and(|count| count != chunk.len()) {
                        return Err(LinkError::PartialSend { accepted });
                    }

                    return Ok(());
                }
                Some(false) => {
                    return Err(LinkError::SendFailed {
                        accepted,
                        error: CommandError::Rejected,
                    })
                }
                None => {}
            }
        }
    }

    /// Switches the coprocessor to multiple-connection mode once
    fn enable_multiplexing(&mut self) -> Result<(), LinkError> {
        if self.multiplexing_enabled {
            return Ok(());
        }

        self.execute(&Command::enable_multiplexing())
            .map_err(LinkError::EnablingMultiplexingFailed)?;
        self.multiplexing_enabled = true;
        Ok(())
    }

    fn has_network_path(&self) -> bool {
        if self.wifi.joined || self.wifi.connection == ConnectionState::Connected {
            return true;
        }

        matches!(self.wifi.mode, WifiMode::AccessPoint | WifiMode::Both)
    }

    fn buffered_data_available(&self) -> bool {
        self.links.iter().any(|slot| !slot.inbound.is_empty())
    }

    fn drain_buffers(&mut self) -> Vec<(usize, Vec<u8, RX_CAP>), LINK_COUNT> {
        let mut drained = Vec::new();

        for (link_id, slot) in self.links.iter_mut().enumerate() {
            if slot.inbound.is_empty() {
                continue;
            }

            let mut bytes = Vec::new();
            while let Some(byte) = slot.inbound.pop_front() {
                let _ = bytes.push(byte);
            }

            let _ = drained.push((link_id, bytes));
        }

        drained
    }
}

/// Parses one '+CIPSTATUS:<id>,"<type>","<ip>",<rport>,<lport>,<role>' record
fn parse_remote_status(record: &str) -> Option<RemoteLinkStatus> {
    let fields = split_fields(record);
    if fields.len() < 6 {
        return None;
    }

    Some(RemoteLinkStatus {
        link_id: fields[0].parse().ok()?,
        kind: LinkKind::from_at_type(fields[1]),
        remote_host: String::try_from(fields[2]).ok()?,
        remote_port: fields[3].parse().ok()?,
        local_port: fields[4].parse().ok()?,
        role: fields[5].parse().ok()?,
    })
}
