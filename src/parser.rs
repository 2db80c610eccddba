//! Response tokenizer for the AT byte stream.
//!
//! The stream is line-oriented (CRLF separated) except for two spots: the `>`
//! transmission prompt, which arrives without a terminator, and `+IPD` data
//! notifications, which declare a byte count and are followed by exactly that
//! many raw payload bytes. Payload bytes may contain CRLF and must never be
//! line-split, so the tokenizer switches into a counted raw-read mode for the
//! declared length and back to line mode afterwards.
//!
//! Classification is done by fixed-prefix comparison on a small fixed
//! vocabulary. The firmware never tags replies, so there is nothing to gain
//! from a pattern-matching engine, and a predictable parser footprint matters
//! more than matching flexibility here.
use crate::adapter::LINE_SIZE;
use heapless::Vec;

/// One logical unit of the response stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Token<const RX_CAP: usize> {
    /// 'OK' terminal
    Ok,
    /// 'ERROR' terminal
    Error,
    /// 'FAIL' terminal (join refused)
    Fail,
    /// 'SEND OK' transmission confirmation
    SendOk,
    /// 'SEND FAIL' transmission failure
    SendFail,
    /// '>' prompt requesting the payload of a prepared transmission
    SendPrompt,
    /// 'ALREADY CONNECTED' reply to a connect on a busy link
    AlreadyConnected,
    /// 'ready' boot marker
    Ready,
    /// 'WIFI CONNECTED'
    WifiConnected,
    /// 'WIFI DISCONNECT'
    WifiDisconnected,
    /// 'WIFI GOT IP'
    WifiGotIp,
    /// '<id>,CONNECT' notification
    LinkConnected(usize),
    /// '<id>,CLOSED' notification
    LinkClosed(usize),
    /// 'Recv <n> bytes' transmission byte count confirmation
    RecvBytes(usize),
    /// Completed `+IPD` data event. `dropped` counts payload bytes beyond
    /// the tokenizer capacity which were consumed to stay in sync.
    Data {
        link_id: usize,
        payload: Vec<u8, RX_CAP>,
        dropped: usize,
    },
    /// Anything else: echo, diagnostics or command-specific payload
    Line(Vec<u8, LINE_SIZE>),
    /// The stream could not be attributed to any known frame type
    Desync,
}

/// Pending raw read of a `+IPD` payload
struct RawRead<const RX_CAP: usize> {
    link_id: usize,
    remaining: usize,
    payload: Vec<u8, RX_CAP>,
    dropped: usize,
}

/// Stateful byte-at-a-time tokenizer. Partial lines and partial `+IPD`
/// payloads carry over between polls.
pub(crate) struct Tokenizer<const RX_CAP: usize> {
    line: Vec<u8, LINE_SIZE>,
    raw: Option<RawRead<RX_CAP>>,
    resyncing: bool,
}

impl<const RX_CAP: usize> Tokenizer<RX_CAP> {
    pub(crate) fn new() -> Self {
        Self {
            line: Vec::new(),
            raw: None,
            resyncing: false,
        }
    }

    /// Discards all carried-over state, e.g. after a coprocessor reboot
    pub(crate) fn reset(&mut self) {
        self.line.clear();
        self.raw = None;
        self.resyncing = false;
    }

    /// Consumes one byte and returns a token once a complete unit was seen
    pub(crate) fn push(&mut self, byte: u8) -> Option<Token<RX_CAP>> {
        if let Some(raw) = &mut self.raw {
            if raw.payload.push(byte).is_err() {
                raw.dropped += 1;
            }

            raw.remaining -= 1;
            if raw.remaining > 0 {
                return None;
            }

            return self.raw.take().map(|raw| Token::Data {
                link_id: raw.link_id,
                payload: raw.payload,
                dropped: raw.dropped,
            });
        }

        if self.resyncing {
            if byte == b'\n' {
                self.resyncing = false;
                self.line.clear();
            }
            return None;
        }

        // The prompt arrives without a line terminator
        if byte == b'>' && self.line.is_empty() {
            return Some(Token::SendPrompt);
        }

        // The colon ends a data event header, the payload follows immediately
        if byte == b':' && self.line.starts_with(b"+IPD,") {
            return self.start_raw_read();
        }

        if byte == b'\n' {
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }

            let token = Self::classify(&self.line);
            self.line.clear();
            return token;
        }

        if self.line.push(byte).is_err() {
            // No protocol frame is this long, drop bytes until the next line start
            self.resyncing = true;
            self.line.clear();
            return Some(Token::Desync);
        }

        None
    }

    /// Parses the `+IPD,<id>,<len>` header and switches to raw-read mode.
    /// A malformed header desynchronizes the stream: the payload length is
    /// unknown and every following byte is unattributable.
    fn start_raw_read(&mut self) -> Option<Token<RX_CAP>> {
        let header = &self.line[5..];
        let comma = header.iter().position(|&byte| byte == b',');

        let event = comma.and_then(|comma| {
            let link_id = parse_decimal(&header[..comma])?;
            let length = parse_decimal(&header[comma + 1..])?;
            Some((link_id, length))
        });

        self.line.clear();
        match event {
            Some((link_id, 0)) => Some(Token::Data {
                link_id,
                payload: Vec::new(),
                dropped: 0,
            }),
            Some((link_id, length)) => {
                self.raw = Some(RawRead {
                    link_id,
                    remaining: length,
                    payload: Vec::new(),
                    dropped: 0,
                });
                None
            }
            None => {
                self.resyncing = true;
                Some(Token::Desync)
            }
        }
    }

    /// Classifies a complete line by fixed-prefix comparison. Leading spaces
    /// are ignored: the untagged `>` prompt leaves its trailing space in the
    /// buffer, which would otherwise shift the following line.
    fn classify(line: &[u8]) -> Option<Token<RX_CAP>> {
        let start = line.iter().position(|&byte| byte != b' ')?;
        let line = &line[start..];

        match line {
            b"OK" => return Some(Token::Ok),
            b"ERROR" => return Some(Token::Error),
            b"FAIL" => return Some(Token::Fail),
            b"SEND OK" => return Some(Token::SendOk),
            b"SEND FAIL" => return Some(Token::SendFail),
            b"ALREADY CONNECTED" => return Some(Token::AlreadyConnected),
            b"ready" => return Some(Token::Ready),
            b"WIFI CONNECTED" => return Some(Token::WifiConnected),
            b"WIFI DISCONNECT" => return Some(Token::WifiDisconnected),
            b"WIFI GOT IP" => return Some(Token::WifiGotIp),
            _ => {}
        }

        if line.len() > 2 && line[1] == b',' {
            match (&line[2..], parse_link_id(line[0])) {
                (b"CONNECT", Some(link_id)) => return Some(Token::LinkConnected(link_id)),
                (b"CLOSED", Some(link_id)) => return Some(Token::LinkClosed(link_id)),
                _ => {}
            }
        }

        if let Some(count) = parse_recv_confirmation(line) {
            return Some(Token::RecvBytes(count));
        }

        let mut copy = Vec::new();
        let _ = copy.extend_from_slice(line);
        Some(Token::Line(copy))
    }
}

/// Parses the link id digit of a connect/close notification, ids 0-4
fn parse_link_id(byte: u8) -> Option<usize> {
    match byte {
        b'0' => Some(0),
        b'1' => Some(1),
        b'2' => Some(2),
        b'3' => Some(3),
        b'4' => Some(4),
        _ => None,
    }
}

/// Tries to parse the N of a 'Recv N bytes' confirmation line
fn parse_recv_confirmation(line: &[u8]) -> Option<usize> {
    if line.len() < 12 || !line.starts_with(b"Recv ") || !line.ends_with(b" bytes") {
        return None;
    }

    parse_decimal(&line[5..line.len() - 6])
}

fn parse_decimal(bytes: &[u8]) -> Option<usize> {
    core::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Splits a comma separated response record, honoring quoted fields and
/// stripping their quotes. SSIDs may contain commas, so a plain split would
/// mis-align the fields.
pub(crate) fn split_fields(data: &str) -> heapless::Vec<&str, 8> {
    let mut fields = heapless::Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (index, byte) in data.bytes().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                let _ = fields.push(data[start..index].trim_matches('"'));
                start = index + 1;
            }
            _ => {}
        }
    }

    let _ = fields.push(data[start..].trim_matches('"'));
    fields
}
