//! Data channels through an established tunnel.
use std::time::Duration;

use tracing::debug;
use tunnel_agent_common::protocol;
use tunnel_agent_common::{classify_remote, AgentError, EstablishResponse};

use crate::client::Client;
use crate::executor;
use crate::signal::Signal;
use crate::stream::AgentStream;

/// Where a `connect` connection is in its life.
///
/// `Opened -> HandshakeSent -> Acked(ok) -> DataChannel`, or
/// `Acked(failure) -> Closed`. I/O failures and cancellation at any step
/// go straight to `Closed`.
#[derive(Debug)]
enum ConnState {
    Opened(AgentStream),
    HandshakeSent(AgentStream),
    Acked(AgentStream, Result<(), String>),
    DataChannel(AgentStream),
    Closed(AgentError),
}

/// A `connect` handshake on a freshly opened connection
pub(crate) struct Handshake {
    state: ConnState,
    slug: String,
    addr: String,
    timeout_ms: String,
}

impl Handshake {
    pub(crate) fn new(conn: AgentStream, slug: &str, addr: &str, timeout: Duration) -> Self {
        Self {
            state: ConnState::Opened(conn),
            slug: slug.to_string(),
            addr: addr.to_string(),
            timeout_ms: timeout.as_millis().to_string(),
        }
    }

    /// Drive the handshake to a terminal state
    pub(crate) async fn complete(self, signal: &Signal) -> Result<AgentStream, AgentError> {
        let Handshake {
            mut state,
            slug,
            addr,
            timeout_ms,
        } = self;

        loop {
            state = match state {
                ConnState::Opened(conn) => {
                    let args = [slug.clone(), addr.clone(), timeout_ms.clone()];
                    let sent = executor::run_and_keep(conn, signal, move |conn| {
                        Box::pin(async move {
                            let args: Vec<&str> = args.iter().map(String::as_str).collect();
                            protocol::write(conn, "connect", &args).await
                        })
                    })
                    .await;
                    match sent {
                        Ok((conn, ())) => ConnState::HandshakeSent(conn),
                        Err(err) => ConnState::Closed(err),
                    }
                }
                ConnState::HandshakeSent(conn) => {
                    let acked = executor::run_and_keep(conn, signal, |conn| {
                        Box::pin(async move { protocol::read(conn).await })
                    })
                    .await;
                    match acked {
                        Ok((conn, reply)) => ConnState::Acked(conn, protocol::expect_ok(&reply)),
                        Err(err) => ConnState::Closed(err),
                    }
                }
                ConnState::Acked(conn, Ok(())) => ConnState::DataChannel(conn),
                ConnState::Acked(conn, Err(text)) => {
                    let _ = executor::close(conn).await;
                    ConnState::Closed(classify_remote(text, &slug, Some(addr.as_str())))
                }
                ConnState::DataChannel(conn) => {
                    debug!("Data channel open to {} via {}", addr, slug);
                    return Ok(conn);
                }
                ConnState::Closed(err) => {
                    debug!("Connect to {} via {} failed: {}", addr, slug, err);
                    return Err(err);
                }
            };
        }
    }
}

const TCP_NETWORKS: &[&str] = &["tcp", "tcp4", "tcp6"];

/// Opens data channels through an organization's tunnel.
///
/// Only built from a successful establish, so the tunnel state and config
/// are always present. Cheap to clone and safe to share between tasks.
#[derive(Debug, Clone)]
pub struct Dialer {
    slug: String,
    timeout: Duration,
    state: serde_json::Value,
    config: serde_json::Value,
    client: Client,
}

impl Dialer {
    pub(crate) fn new(
        client: Client,
        slug: &str,
        timeout: Duration,
        established: EstablishResponse,
    ) -> Self {
        Self {
            slug: slug.to_string(),
            timeout,
            state: established.wire_guard_state,
            config: established.tunnel_config,
            client,
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// WireGuard state returned by establish
    pub fn state(&self) -> &serde_json::Value {
        &self.state
    }

    /// Tunnel configuration returned by establish
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a raw connection to `addr` inside the tunnel
    pub async fn dial(
        &self,
        signal: &Signal,
        network: &str,
        addr: &str,
    ) -> Result<AgentStream, AgentError> {
        if !TCP_NETWORKS.contains(&network) {
            return Err(AgentError::UnsupportedNetwork(network.to_string()));
        }
        self.client
            .connect(signal, &self.slug, addr, self.timeout)
            .await
    }
}
