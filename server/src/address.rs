//! Validated address types.
//!
//! Raw strings from JSON bodies, YAML inventories and CLI arguments are turned
//! into these types before any socket is opened. Nothing downstream accepts a
//! bare `String` where one of these exists.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ActionError;

/// A 6-octet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for HardwareAddress {
    type Err = ActionError;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `aa-bb-cc-dd-ee-ff`. The separator must
    /// be the same throughout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ActionError::validation(format!("invalid MAC address '{s}'"));
        let sep = if s.contains(':') { ':' } else { '-' };
        let mut octets = [0u8; 6];
        let mut groups = s.split(sep);
        for octet in &mut octets {
            let group = groups.next().ok_or_else(invalid)?;
            if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }
        if groups.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// One `(ip, port)` destination for a magic packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub ip: IpAddr,
    pub port: u16,
}

impl BroadcastTarget {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Validate a raw `(ip, port)` pair as it arrives from JSON or YAML.
    pub fn parse(ip: &str, port: i64) -> Result<Self, ActionError> {
        let ip = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ActionError::validation(format!("invalid ip '{ip}'")))?;
        let port = u16::try_from(port)
            .map_err(|_| ActionError::validation(format!("port {port} is out of range")))?;
        Ok(Self { ip, port })
    }
}

impl fmt::Display for BroadcastTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

/// A non-empty SSH password.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(raw: impl Into<String>) -> Result<Self, ActionError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ActionError::validation("password must not be empty"));
        }
        Ok(Self(raw))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Check that `host` is an IP literal or a syntactically valid DNS name.
///
/// Resolution happens later, at dial or probe time.
pub fn validate_host(host: &str) -> Result<(), ActionError> {
    if host.is_empty() {
        return Err(ActionError::validation("host must not be empty"));
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let invalid = || ActionError::validation(format!("invalid host '{host}'"));
    if host.len() > 253 {
        return Err(invalid());
    }
    for label in host.trim_end_matches('.').split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(invalid());
        }
    }
    Ok(())
}
