//! Session request types.

use std::fmt;

use url::Url;

use crate::error::{BrokerError, BrokerResult};

/// Syntactically validated session endpoint.
///
/// Accepts absolute URLs (`https://host:port/path`) and bare authorities
/// (`host`, `host:port`), the latter interpreted as `https://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    url: Url,
}

impl SessionTarget {
    pub fn parse(raw: &str) -> BrokerResult<Self> {
        if raw.is_empty() {
            return Err(BrokerError::InvalidArgument("empty session URL".into()));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(BrokerError::InvalidArgument(format!(
                "session URL contains whitespace or control characters: {raw:?}"
            )));
        }

        let parsed = if raw.contains("://") {
            Url::parse(raw)
        } else {
            Url::parse(&format!("https://{raw}"))
        };
        let url = parsed
            .map_err(|e| BrokerError::InvalidArgument(format!("invalid session URL {raw:?}: {e}")))?;

        if url.host_str().is_none_or(str::is_empty) {
            return Err(BrokerError::InvalidArgument(format!(
                "session URL has no host: {raw:?}"
            )));
        }

        Ok(Self { url })
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Security principal on whose behalf the session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub origin: String,
}

impl Principal {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    /// Principal without an origin (null security context).
    pub fn anonymous() -> Self {
        Self {
            origin: String::new(),
        }
    }
}

/// Congestion control preference forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionControl {
    #[default]
    Default,
    Throughput,
    LowLatency,
}

impl CongestionControl {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Throughput => "throughput",
            Self::LowLatency => "low-latency",
        }
    }
}

/// Per-session options supplied by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Refuse connection pooling with other sessions.
    pub dedicated: bool,
    /// Fail unless the session can carry unreliable traffic.
    pub require_unreliable: bool,
    pub congestion_control: CongestionControl,
    /// Opaque description of the requesting client.
    pub client_info: Option<String>,
}

/// Reliability negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityMode {
    /// Not negotiated yet; reported alongside failures.
    Pending,
    SupportsUnreliable,
}

/// Direction of a WebTransport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Unidirectional,
    Bidirectional,
}

impl StreamDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unidirectional => "unidirectional",
            Self::Bidirectional => "bidirectional",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn bare_host_is_accepted() {
        let target = SessionTarget::parse("example").unwrap();
        assert_eq!(target.host(), "example");
        assert_eq!(target.url().scheme(), "https");
    }

    #[test]
    fn absolute_url_is_kept() {
        let target = SessionTarget::parse("https://relay.example.com:4433/wt").unwrap();
        assert_eq!(target.url().port(), Some(4433));
        assert_eq!(target.url().path(), "/wt");
    }

    #[test]
    fn host_with_port_is_not_mistaken_for_a_scheme() {
        let target = SessionTarget::parse("localhost:4433").unwrap();
        assert_eq!(target.host(), "localhost");
        assert_eq!(target.url().port(), Some(4433));
    }

    #[test]
    fn malformed_targets_are_invalid_arguments() {
        for raw in ["", "exa mple", "https://[::1", "https://", "line\nbreak"] {
            let err = SessionTarget::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{raw:?}");
        }
    }
}
