use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding the daemon socket path
pub const SOCKET_ENV: &str = "TUNNEL_AGENT_SOCKET";

/// Transport family used to reach the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Local domain socket, address is a filesystem path
    Unix,
    /// TCP, address is `host:port`
    Tcp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Unix => write!(f, "unix"),
            Network::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unix" => Ok(Network::Unix),
            "tcp" => Ok(Network::Tcp),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// Where the daemon listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub network: Network,
    pub address: String,
}

impl Endpoint {
    pub fn new(network: Network, address: impl Into<String>) -> Self {
        Self {
            network,
            address: address.into(),
        }
    }

    /// Endpoint for a local domain socket at `path`
    pub fn unix(path: impl AsRef<Path>) -> Self {
        Self::new(Network::Unix, path.as_ref().to_string_lossy().into_owned())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

/// Organization metadata as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub slug: String,
    pub name: String,
}

/// Body of a `pong` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(rename = "PID")]
    pub pid: u32,
    #[serde(rename = "Version")]
    pub version: semver::Version,
    /// Whether the daemon was launched detached from a terminal
    #[serde(rename = "Background")]
    pub background: bool,
}

impl PingResponse {
    /// Compare the daemon's version with ours, ignoring build metadata
    pub fn matches_version(&self, ours: &semver::Version) -> bool {
        self.version.cmp_precedence(ours).is_eq()
    }
}

/// Body of a successful `establish` reply.
///
/// Both members are opaque to the client and handed on untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstablishResponse {
    #[serde(rename = "WireGuardState")]
    pub wire_guard_state: serde_json::Value,
    #[serde(rename = "TunnelConfig")]
    pub tunnel_config: serde_json::Value,
}

impl EstablishResponse {
    pub fn is_complete(&self) -> bool {
        !self.wire_guard_state.is_null() && !self.tunnel_config.is_null()
    }
}

/// One running instance of an app, reachable through the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub label: String,
    pub address: String,
}

/// Client-side agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path to the daemon's Unix socket (default: ~/.tunnel-agent/agent.sock)
    pub socket_path: PathBuf,
    /// Timeout for short local calls: ping, kill, probe, resolve, connect (default: 2s)
    pub call_timeout: Duration,
    /// Delay between readiness polls (default: 100ms)
    pub poll_interval: Duration,
    /// How long to wait for a killed daemon to exit (default: 1s)
    pub restart_grace: Duration,
    /// How long a freshly launched daemon has to answer a ping (default: 10s)
    pub start_timeout: Duration,
    /// Per-dial timeout handed to the daemon by tunnel dialers (default: 10s)
    pub dial_timeout: Duration,
}

impl AgentConfig {
    /// Load the configuration, apply the socket override and make sure the
    /// socket directory exists
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(SOCKET_ENV) {
            config.socket_path = PathBuf::from(path);
        }
        config.ensure_directories()?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create agent socket directory")?;
        }
        Ok(())
    }

    /// The daemon endpoint described by this configuration
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::unix(&self.socket_path)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".tunnel-agent");
        Self {
            socket_path: base.join("agent.sock"),
            call_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            restart_grace: Duration::from_secs(1),
            start_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_network_parse_and_display() {
        assert_eq!("unix".parse::<Network>().unwrap(), Network::Unix);
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert!("udp".parse::<Network>().is_err());
        assert_eq!(Network::Unix.to_string(), "unix");
    }

    #[test]
    fn test_endpoint_unix() {
        let endpoint = Endpoint::unix("/tmp/agent.sock");
        assert_eq!(endpoint.network, Network::Unix);
        assert_eq!(endpoint.address, "/tmp/agent.sock");
        assert_eq!(endpoint.to_string(), "unix:///tmp/agent.sock");
    }

    #[test]
    fn test_ping_response_deserialization() {
        let json = r#"{"PID":4242,"Version":"0.1.0","Background":true}"#;
        let resp: PingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.pid, 4242);
        assert_eq!(resp.version, semver::Version::new(0, 1, 0));
        assert!(resp.background);
    }

    #[test]
    fn test_version_match_ignores_build_metadata() {
        let resp = PingResponse {
            pid: 1,
            version: semver::Version::parse("1.2.3+abc").unwrap(),
            background: false,
        };
        assert!(resp.matches_version(&semver::Version::new(1, 2, 3)));
        assert!(!resp.matches_version(&semver::Version::new(1, 2, 4)));
    }

    #[test]
    fn test_establish_response_completeness() {
        let json = r#"{"WireGuardState":{"peer":"abc"},"TunnelConfig":{"dns":"fdaa::3"}}"#;
        let resp: EstablishResponse = serde_json::from_str(json).unwrap();
        assert!(resp.is_complete());
        assert_eq!(resp.tunnel_config["dns"], "fdaa::3");

        let partial: EstablishResponse =
            serde_json::from_str(r#"{"WireGuardState":null,"TunnelConfig":{}}"#).unwrap();
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_instance_deserialization() {
        let json = r#"[{"Label":"web","Address":"fdaa::1"}]"#;
        let instances: Vec<Instance> = serde_json::from_str(json).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].label, "web");
        assert_eq!(instances[0].address, "fdaa::1");
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert!(config.socket_path.ends_with(".tunnel-agent/agent.sock"));
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.endpoint().network, Network::Unix);
    }

    #[test]
    fn test_ensure_directories_creates_socket_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = AgentConfig {
            socket_path: temp_dir.path().join("nested").join("agent.sock"),
            ..AgentConfig::default()
        };
        assert!(config.ensure_directories().is_ok());
        assert!(temp_dir.path().join("nested").exists());
    }
}
