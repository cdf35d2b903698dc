//! Connection target parsing
//!
//! Remote authorities arrive as `prefix+[user@]host[:port]`, for example
//! `ssh-udp+alice@build.example.com:2222`. The prefix names the resolver and
//! is ignored here.

use std::fmt;
use std::str::FromStr;

use crate::error::TargetParseError;

/// Default SSH port
pub const DEFAULT_CONTROL_PORT: u16 = 22;

/// Default first UDP port offered to the handshake service
pub const DEFAULT_HANDSHAKE_PORT: u16 = 60001;

/// Where to connect, parsed from an authority string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    /// Explicit user, if the authority named one
    pub user: Option<String>,
    /// Host name or address (IPv6 without brackets)
    pub host: String,
    /// SSH port
    pub control_port: u16,
    /// First UDP port offered to the handshake service
    pub handshake_port: u16,
}

impl ConnectionTarget {
    /// Parse an authority, with an explicit handshake port
    pub fn parse(authority: &str, handshake_port: u16) -> Result<Self, TargetParseError> {
        let rest = match authority.split_once('+') {
            Some((_prefix, rest)) => rest,
            None => authority,
        };
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(TargetParseError::Empty);
        }

        let (user, host_port) = match rest.rsplit_once('@') {
            Some((user, _)) if user.is_empty() => {
                return Err(TargetParseError::EmptyUser(authority.to_string()))
            }
            Some((user, host_port)) => (Some(user.to_string()), host_port),
            None => (None, rest),
        };

        let (host, port) = split_host_port(host_port, authority)?;
        if host.is_empty() {
            return Err(TargetParseError::MissingHost(authority.to_string()));
        }

        let control_port = match port {
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| TargetParseError::InvalidPort(p.to_string()))?,
            None => DEFAULT_CONTROL_PORT,
        };

        Ok(Self {
            user,
            host: host.to_string(),
            control_port,
            handshake_port,
        })
    }

    /// Replace the handshake port
    pub fn with_handshake_port(mut self, port: u16) -> Self {
        self.handshake_port = port;
        self
    }

    /// User to log in as, falling back to `default`
    pub fn user_or(&self, default: &str) -> String {
        self.user.clone().unwrap_or_else(|| default.to_string())
    }
}

impl FromStr for ConnectionTarget {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_HANDSHAKE_PORT)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if self.control_port != DEFAULT_CONTROL_PORT {
            write!(f, ":{}", self.control_port)?;
        }
        Ok(())
    }
}

/// Split `host[:port]`, accepting `[v6]:port`
fn split_host_port<'a>(
    input: &'a str,
    authority: &str,
) -> Result<(&'a str, Option<&'a str>), TargetParseError> {
    if let Some(bracketed) = input.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| TargetParseError::UnterminatedBracket(authority.to_string()))?;
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| TargetParseError::InvalidPort(p.to_string()))?,
            ),
        };
        return Ok((host, port));
    }

    // A bare IPv6 literal has several colons and no port
    if input.matches(':').count() > 1 {
        return Ok((input, None));
    }

    Ok(match input.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (input, None),
    })
}
