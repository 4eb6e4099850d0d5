//! The `Via` header (RFC 3261 Section 20.42).
//!
//! Only the parts the transaction layer depends on are modelled: the sent
//! protocol, the sent-by host/port and the parameter list. The `branch`
//! parameter is the primary transaction identifier.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Magic cookie that marks an RFC 3261 compliant branch.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    /// Transport token, e.g. `UDP`, `TCP`, `TLS`
    pub transport: String,
    /// `host[:port]` as written by the sender
    pub sent_by: String,
    /// Parameters in wire order; valueless parameters (like `rport`) hold `None`
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    /// Creates a `SIP/2.0/<transport>` Via carrying the given branch.
    pub fn new(transport: impl Into<String>, sent_by: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            sent_by: sent_by.into(),
            params: vec![("branch".to_string(), Some(branch.into()))],
        }
    }

    /// Looks up a parameter by case-insensitive name.
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    /// The branch parameter; `None` when missing or empty.
    pub fn branch(&self) -> Option<&str> {
        match self.param("branch") {
            Some(Some(b)) if !b.is_empty() => Some(b),
            _ => None,
        }
    }

    /// True when the branch carries the RFC 3261 magic cookie.
    pub fn has_rfc3261_branch(&self) -> bool {
        self.branch().map_or(false, |b| b.starts_with(BRANCH_MAGIC_COOKIE))
    }

    pub fn received(&self) -> Option<&str> {
        self.param("received").flatten()
    }

    /// `Some(None)` when `rport` is present without a value.
    pub fn rport(&self) -> Option<Option<u16>> {
        self.param("rport").map(|v| v.and_then(|p| p.parse().ok()))
    }

    /// Sets or replaces a parameter.
    pub fn set_param(&mut self, name: &str, value: Option<String>) {
        match self.params.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    /// True for transports that are connection-oriented.
    pub fn is_reliable_transport(&self) -> bool {
        !self.transport.eq_ignore_ascii_case("UDP")
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidHeader { name: "Via", value: s.to_string() };
        let s = s.trim();

        let (protocol, rest) = s.split_once(char::is_whitespace).ok_or_else(invalid)?;
        let mut parts = protocol.split('/');
        let (name, version, transport) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(v), Some(t), None) => (n.trim(), v.trim(), t.trim()),
            _ => return Err(invalid()),
        };
        if !name.eq_ignore_ascii_case("SIP") || version != "2.0" || transport.is_empty() {
            return Err(invalid());
        }

        let mut segments = rest.split(';');
        let sent_by = segments.next().map(str::trim).filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let params = segments
            .map(|p| {
                let p = p.trim();
                match p.split_once('=') {
                    Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                    None => (p.to_string(), None),
                }
            })
            .filter(|(k, _)| !k.is_empty())
            .collect();

        Ok(Via {
            transport: transport.to_ascii_uppercase(),
            sent_by: sent_by.to_string(),
            params,
        })
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}
