use std::fmt;
use thiserror::Error;

/// Why a call stopped before it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled the signal
    Cancelled,
    /// The signal's deadline passed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "operation cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Retry classification used by the readiness poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Tunnel exists but is not routable yet
    Tunnel,
    /// Tunnel is routable but does not know the target host
    HostNotFound,
    /// Everything else
    Fatal,
}

/// Errors produced while talking to the agent daemon
#[derive(Debug, Error)]
pub enum AgentError {
    /// The daemon endpoint could not be reached at all
    #[error("failed to connect to agent at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or truncated frame, or an undecodable response body
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The tunnel for an organization is not routable yet
    #[error("tunnel unavailable for organization {slug}: {message}")]
    Tunnel { slug: String, message: String },

    /// The tunnel does not know the requested host
    #[error(
        "host {} not found in organization {}: {}",
        .host.as_deref().unwrap_or("(unnamed)"),
        .slug,
        .message
    )]
    HostNotFound {
        slug: String,
        host: Option<String>,
        message: String,
    },

    /// Failure text reported by the daemon for a verb
    #[error("{0}")]
    Remote(String),

    /// A mismatched daemon could not be stopped
    #[error("kill failed: {0}")]
    Kill(#[source] Box<AgentError>),

    /// The caller gave up, either explicitly or through a deadline
    #[error("{0}")]
    Cancelled(CancelReason),

    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    /// The daemon process could not be launched
    #[error("failed to launch agent: {0}")]
    Launch(String),

    /// A freshly launched daemon never answered a ping
    #[error("agent did not become reachable within {0:?}")]
    StartTimeout(std::time::Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn classification(&self) -> Classification {
        match self {
            AgentError::Tunnel { .. } => Classification::Tunnel,
            AgentError::HostNotFound { .. } => Classification::HostNotFound,
            _ => Classification::Fatal,
        }
    }

    pub fn is_tunnel(&self) -> bool {
        self.classification() == Classification::Tunnel
    }

    pub fn is_host_not_found(&self) -> bool {
        self.classification() == Classification::HostNotFound
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled(_))
    }
}

const HOST_NOT_FOUND_MARKERS: &[&str] = &["no such host", "host not found", "DNS name does not exist"];
const TUNNEL_MARKERS: &[&str] = &["tunnel unavailable", "tunnel not ready", "i/o timeout"];

/// Map failure text reported by the daemon onto the error taxonomy.
///
/// `target` is the host or address the verb was about, if any. It is used
/// only for the error message.
pub fn classify_remote(
    message: impl Into<String>,
    slug: &str,
    target: Option<&str>,
) -> AgentError {
    let message = message.into();

    if HOST_NOT_FOUND_MARKERS.iter().any(|m| message.contains(m)) {
        AgentError::HostNotFound {
            slug: slug.to_string(),
            host: target.map(str::to_string),
            message,
        }
    } else if TUNNEL_MARKERS.iter().any(|m| message.contains(m)) {
        AgentError::Tunnel {
            slug: slug.to_string(),
            message,
        }
    } else {
        AgentError::Remote(message)
    }
}
