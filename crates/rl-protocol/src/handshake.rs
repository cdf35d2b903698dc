//! Handshake line emitted by the remote transport server
//!
//! The server prints a single line of the form
//!
//! ```text
//! MOSH CONNECT <port> <key>
//! ```
//!
//! somewhere in its output, possibly surrounded by other log lines and with
//! CR/LF line endings. The key is at least 22 characters of the base64
//! alphabet and is secret material. A line only counts once its terminator
//! has arrived, so a key split across two output chunks is never accepted
//! half-read.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::discovery::{parse_port, Recognizer};

/// Marker that introduces the handshake line
pub const HANDSHAKE_MARKER: &str = "MOSH CONNECT";

/// Minimum length of a session key
pub const MIN_KEY_LENGTH: usize = 22;

/// Number of key characters kept when a secret is shown in logs
const REDACTED_PREFIX_LEN: usize = 4;

static HANDSHAKE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{} (\d+) ([A-Za-z0-9+/]+={{0,2}})\s",
        regex::escape(HANDSHAKE_MARKER)
    ))
    .expect("handshake pattern is valid")
});

/// Shorten a secret to a prefix that is safe to log
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(REDACTED_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

/// Session key handed out by the transport server
///
/// `Debug` and `Display` only show a short prefix; use [`SessionKey::expose`]
/// to obtain the full value for the codec.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    /// Validate and wrap a key token
    pub fn parse(token: &str) -> Option<Self> {
        let body = token.trim_end_matches('=');
        let padding = token.len() - body.len();
        let valid = token.len() >= MIN_KEY_LENGTH
            && padding <= 2
            && !body.is_empty()
            && body
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/');
        valid.then(|| Self(token.to_string()))
    }

    /// The full key, for handing to a codec
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted form for logs and error messages
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.redacted())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Parameters recovered from the handshake line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// UDP port the transport server listens on
    pub udp_port: u16,
    /// Session key for the codec
    pub session_key: SessionKey,
}

impl HandshakeResult {
    /// Find the first valid handshake line in accumulated output
    ///
    /// Lines with a port outside 1-65535 or a key shorter than 22 characters
    /// are skipped rather than treated as errors.
    pub fn parse(buffer: &str) -> Option<Self> {
        HANDSHAKE_LINE.captures_iter(buffer).find_map(|caps| {
            let udp_port = parse_port(caps.get(1)?.as_str())?;
            let session_key = SessionKey::parse(caps.get(2)?.as_str())?;
            Some(Self {
                udp_port,
                session_key,
            })
        })
    }
}

/// Recognizer for the handshake line
#[derive(Debug, Default, Clone, Copy)]
pub struct HandshakeRecognizer;

impl Recognizer for HandshakeRecognizer {
    type Output = HandshakeResult;

    fn recognize(&self, buffer: &str) -> Option<HandshakeResult> {
        HandshakeResult::parse(buffer)
    }
}
