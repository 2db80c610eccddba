//! Central driver instance and command dispatcher.
//!
//! The AT protocol is strictly half-duplex at the command layer: replies carry
//! no request id, so only one command may be in flight at a time. The
//! dispatcher enforces this through exclusive ownership — every operation
//! takes `&mut self` and runs to completion (terminal token, rejection or
//! timeout) before the next can start.
//!
//! Unsolicited notifications legitimately interleave with command replies.
//! While a transaction polls for its terminal token, every connect/close/data
//! notification encountered is forwarded to the link table immediately rather
//! than discarded.
use crate::commands::{Command, Expect};
use crate::links::LinkSlot;
use crate::parser::{Token, Tokenizer};
use crate::transport::SerialLink;
use crate::wifi::{ConnectionState, WifiState};
use fugit::{ExtU32, TimerDurationU32};
use fugit_timer::Timer;
use heapless::{String, Vec};

/// Maximum length of one response line
pub const LINE_SIZE: usize = 128;

/// Maximum number of payload lines collected per command
pub const MAX_LINES: usize = 16;

/// Plain-output lines collected before a command's terminal token
pub type ResponseLines = Vec<String<LINE_SIZE>, MAX_LINES>;

/// Outcome of a failed command transaction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// No terminal token arrived before the deadline, even after the one
    /// automatic retry
    Timeout,
    /// The coprocessor answered with an explicit failure token. Not retried:
    /// a semantic refusal cannot succeed on a second attempt.
    Rejected,
    /// The byte stream could not be attributed to any known frame type and
    /// the in-flight command was abandoned during resynchronization
    Desync,
    /// An unexpected boot marker was seen. All driver state was reset,
    /// callers should re-run initialization instead of retrying.
    DeviceReset,
    /// Serial transport failure
    SerialError,
    /// Upstream timer error
    TimerError,
}

#[cfg(feature = "defmt")]
impl defmt::Format for CommandError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            CommandError::Timeout => defmt::write!(f, "CommandError::Timeout"),
            CommandError::Rejected => defmt::write!(f, "CommandError::Rejected"),
            CommandError::Desync => defmt::write!(f, "CommandError::Desync"),
            CommandError::DeviceReset => defmt::write!(f, "CommandError::DeviceReset"),
            CommandError::SerialError => defmt::write!(f, "CommandError::SerialError"),
            CommandError::TimerError => defmt::write!(f, "CommandError::TimerError"),
        }
    }
}

/// Driver for an AT-command WiFi coprocessor behind a serial link
///
/// RX_CAP: Inbound buffer capacity in bytes per link. Data arriving for a
/// link whose buffer is full is dropped and counted, never blocking the
/// serial channel.
pub struct Adapter<S: SerialLink, T: Timer<TIMER_HZ>, const TIMER_HZ: u32, const RX_CAP: usize> {
    /// Serial channel to the coprocessor
    pub(crate) serial: S,

    /// Timer used for deadline measurement
    pub(crate) timer: T,

    /// Response stream tokenizer, stateful across polls
    pub(crate) tokenizer: Tokenizer<RX_CAP>,

    /// The five fixed connection slots, array index = link id
    pub(crate) links: [LinkSlot<RX_CAP>; 5],

    /// Device-wide WiFi state, mirrors the coprocessor
    pub(crate) wifi: WifiState,

    /// True once AT+CIPMUX=1 was accepted
    pub(crate) multiplexing_enabled: bool,

    /// Timeout for the SEND OK confirmation of one payload chunk
    pub(crate) send_timeout: TimerDurationU32<TIMER_HZ>,

    /// Transmission outcome signaled by SEND OK / SEND FAIL
    pub(crate) send_confirmed: Option<bool>,

    /// Byte count confirmed by the 'Recv N bytes' line
    pub(crate) recv_byte_count: Option<usize>,
}

impl<S: SerialLink, T: Timer<TIMER_HZ>, const TIMER_HZ: u32, const RX_CAP: usize>
    Adapter<S, T, TIMER_HZ, RX_CAP>
{
    pub fn new(serial: S, timer: T) -> Self {
        Self {
            serial,
            timer,
            tokenizer: Tokenizer::new(),
            links: core::array::from_fn(|_| LinkSlot::new()),
            wifi: WifiState::new(),
            multiplexing_enabled: false,
            send_timeout: 5_000.millis(),
            send_confirmed: None,
            recv_byte_count: None,
        }
    }

    /// Sets the timeout for the confirmation of transmitted payload chunks
    pub fn set_send_timeout_ms(&mut self, timeout: u32) {
        self.send_timeout = TimerDurationU32::millis(timeout);
    }

    /// Runs a command transaction. A timeout is retried once with the same
    /// command text: transient UART noise and a slow radio are common and
    /// indistinguishable from a hang at this layer. All other failures
    /// surface immediately.
    pub(crate) fn execute(&mut self, command: &Command) -> Result<ResponseLines, CommandError> {
        match self.transact(command) {
            Err(CommandError::Timeout) => self.transact(command),
            result => result,
        }
    }

    /// Writes the command and polls the tokenizer until a terminal condition
    /// or the deadline. Notifications seen along the way are forwarded to the
    /// link table, plain output is collected for the caller.
    fn transact(&mut self, command: &Command) -> Result<ResponseLines, CommandError> {
        self.write_line(command.text.as_str())?;
        self.timer
            .start(command.timeout_ms.millis())
            .map_err(|_| CommandError::TimerError)?;

        let mut lines = ResponseLines::new();
        loop {
            let token = match self.poll_token()? {
                Some(token) => token,
                None => return Err(CommandError::Timeout),
            };

            match token {
                Token::Ok => match command.expect {
                    Expect::Ok | Expect::OkOrAlreadyConnected => return Ok(lines),
                    // CIPSEND acknowledges before the prompt, RST before 'ready'
                    Expect::Prompt | Expect::Ready => {}
                },
                Token::SendPrompt if command.expect == Expect::Prompt => return Ok(lines),
                Token::AlreadyConnected if command.expect == Expect::OkOrAlreadyConnected => {
                    return Ok(lines)
                }
                Token::Ready => {
                    if command.expect == Expect::Ready {
                        // boot noise may have left partial state behind
                        self.tokenizer.reset();
                        return Ok(lines);
                    }

                    self.on_device_reset();
                    return Err(CommandError::DeviceReset);
                }
                Token::Error | Token::Fail => return Err(CommandError::Rejected),
                Token::Desync => {
                    // The non-ASCII boot banner regularly trips the tokenizer
                    // while waiting for 'ready', keep going in that case
                    if command.expect != Expect::Ready {
                        return Err(CommandError::Desync);
                    }
                }
                Token::Line(line) => {
                    if line.as_slice() == command.text.as_bytes() {
                        continue; // command echo
                    }

                    if let Ok(text) = core::str::from_utf8(&line) {
                        let _ = lines.push(String::try_from(text).unwrap_or_default());
                    }
                }
                other => self.dispatch_event(other),
            }
        }
    }

    /// Reads bytes until the tokenizer yields a token or the running timer
    /// expires. `Ok(None)` means the deadline elapsed.
    pub(crate) fn poll_token(&mut self) -> Result<Option<Token<RX_CAP>>, CommandError> {
        loop {
            match self.serial.read_byte() {
                Ok(byte) => {
                    if let Some(token) = self.tokenizer.push(byte) {
                        #[cfg(feature = "log")]
                        log::trace!("RX {:?}", token);
                        return Ok(Some(token));
                    }
                }
                Err(nb::Error::WouldBlock) => match self.timer.wait() {
                    Ok(()) => return Ok(None),
                    Err(nb::Error::WouldBlock) => {}
                    Err(nb::Error::Other(_)) => return Err(CommandError::TimerError),
                },
                Err(nb::Error::Other(_)) => return Err(CommandError::SerialError),
            }
        }
    }

    /// Applies an unsolicited notification to the link table and WiFi flags
    pub(crate) fn dispatch_event(&mut self, token: Token<RX_CAP>) {
        match token {
            Token::WifiConnected => self.wifi.joined = true,
            Token::WifiDisconnected => {
                self.wifi.joined = false;
                self.wifi.ip_assigned = false;
                self.wifi.ip = None;
                if self.wifi.connection == ConnectionState::Connected {
                    self.wifi.connection = ConnectionState::Disconnected;
                }
            }
            Token::WifiGotIp => self.wifi.ip_assigned = true,
            Token::LinkConnected(link_id) => {
                if let Some(slot) = self.links.get_mut(link_id) {
                    slot.peer_connected();
                }
            }
            Token::LinkClosed(link_id) => {
                if let Some(slot) = self.links.get_mut(link_id) {
                    slot.peer_closed();
                }
            }
            Token::Data {
                link_id,
                payload,
                dropped,
            } => {
                if let Some(slot) = self.links.get_mut(link_id) {
                    slot.push_data(&payload, dropped);
                }
            }
            Token::RecvBytes(count) => self.recv_byte_count = Some(count),
            Token::SendOk => self.send_confirmed = Some(true),
            Token::SendFail => self.send_confirmed = Some(false),
            // Late replies of an abandoned transaction have no pending
            // command to match against and are dropped as strays
            Token::Ok
            | Token::Error
            | Token::Fail
            | Token::SendPrompt
            | Token::AlreadyConnected
            | Token::Line(_) => {}
            // Resynchronization is handled inside the tokenizer
            Token::Desync => {}
            // Intercepted by the polling operation before dispatching
            Token::Ready => {}
        }
    }

    /// Snaps all driver state back to power-on defaults after a detected
    /// coprocessor reboot
    pub(crate) fn on_device_reset(&mut self) {
        for link in &mut self.links {
            link.force_idle();
        }

        self.wifi = WifiState::new();
        self.multiplexing_enabled = false;
        self.send_confirmed = None;
        self.recv_byte_count = None;
        self.tokenizer.reset();
    }

    fn write_line(&mut self, text: &str) -> Result<(), CommandError> {
        #[cfg(feature = "log")]
        log::trace!("TX {}", text);

        self.serial
            .write_all(text.as_bytes())
            .map_err(|_| CommandError::SerialError)?;
        self.serial.write_all(b"\r\n").map_err(|_| CommandError::SerialError)
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CommandError> {
        self.serial.write_all(bytes).map_err(|_| CommandError::SerialError)
    }
}
