//! Session client issuing verbs to the agent daemon.
use std::time::Duration;

use tracing::debug;
use tunnel_agent_common::protocol;
use tunnel_agent_common::{
    classify_remote, AgentConfig, AgentError, Endpoint, EstablishResponse, Instance,
    Organization, PingResponse,
};

use crate::dialer::{Dialer, Handshake};
use crate::executor::{self, BoxFuture};
use crate::signal::Signal;
use crate::stream::AgentStream;

/// Client bound to one daemon endpoint.
///
/// Holds no per-call state: every call opens its own connection, so a
/// single client can be shared freely between concurrent callers.
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Endpoint,
    call_timeout: Duration,
    poll_interval: Duration,
    dial_timeout: Duration,
}

impl Client {
    /// Create a client without contacting the daemon
    pub fn new(endpoint: Endpoint, config: &AgentConfig) -> Self {
        Self {
            endpoint,
            call_timeout: config.call_timeout,
            poll_interval: config.poll_interval,
            dial_timeout: config.dial_timeout,
        }
    }

    /// Create a client and confirm the daemon answers a ping
    pub async fn open(
        endpoint: Endpoint,
        config: &AgentConfig,
        signal: &Signal,
    ) -> Result<Self, AgentError> {
        let client = Self::new(endpoint, config);
        client.ping(signal).await?;
        Ok(client)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Open a fresh connection to the daemon
    pub async fn dial(&self, signal: &Signal) -> Result<AgentStream, AgentError> {
        executor::open(&self.endpoint, signal).await
    }

    async fn call<T, F>(&self, signal: &Signal, f: F) -> Result<T, AgentError>
    where
        F: for<'c> FnOnce(&'c mut AgentStream) -> BoxFuture<'c, Result<T, AgentError>>,
    {
        let conn = self.dial(signal).await?;
        executor::run(conn, signal, f).await
    }

    /// Run one request and return the raw reply payload
    async fn request(
        &self,
        signal: &Signal,
        verb: &'static str,
        args: Vec<String>,
    ) -> Result<Vec<u8>, AgentError> {
        debug!("Agent request: {} {:?}", verb, args);
        self.call(signal, move |conn| {
            Box::pin(async move {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                protocol::write(conn, verb, &args).await?;
                protocol::read(conn).await
            })
        })
        .await
    }

    fn short(&self, signal: &Signal) -> Signal {
        signal.with_timeout(self.call_timeout)
    }

    pub async fn ping(&self, signal: &Signal) -> Result<PingResponse, AgentError> {
        let data = self.request(&self.short(signal), "ping", vec![]).await?;
        let body = protocol::strip_pong(&data).map_err(AgentError::Remote)?;
        protocol::parse_json(body)
    }

    /// Ask the daemon to exit; no reply is awaited
    pub async fn kill(&self, signal: &Signal) -> Result<(), AgentError> {
        self.call(&self.short(signal), |conn| {
            Box::pin(async move { protocol::write(conn, "kill", &[]).await })
        })
        .await
    }

    /// Bring up the tunnel for an organization.
    ///
    /// The daemon may go out to the API for this, so only the caller's
    /// signal bounds it.
    pub async fn establish(
        &self,
        signal: &Signal,
        slug: &str,
    ) -> Result<EstablishResponse, AgentError> {
        let data = self
            .request(signal, "establish", vec![slug.to_string()])
            .await?;
        let body = protocol::strip_ok(&data).map_err(AgentError::Remote)?;

        let resp: EstablishResponse = protocol::parse_json(body)?;
        if !resp.is_complete() {
            return Err(AgentError::Protocol(
                "establish reply is missing tunnel state or config".to_string(),
            ));
        }
        Ok(resp)
    }

    /// Check whether the organization's tunnel is routable
    pub async fn probe(&self, signal: &Signal, slug: &str) -> Result<(), AgentError> {
        let data = self
            .request(&self.short(signal), "probe", vec![slug.to_string()])
            .await?;
        protocol::expect_ok(&data).map_err(|text| classify_remote(text, slug, None))
    }

    /// Resolve a host name inside the organization's private network
    pub async fn resolve(
        &self,
        signal: &Signal,
        slug: &str,
        host: &str,
    ) -> Result<String, AgentError> {
        let data = self
            .request(
                &self.short(signal),
                "resolve",
                vec![slug.to_string(), host.to_string()],
            )
            .await?;
        let addr = protocol::strip_ok(&data).map_err(|text| classify_remote(text, slug, Some(host)))?;
        Ok(protocol::reply_text(addr))
    }

    /// List the running instances of an app; may take a network round trip
    pub async fn instances(
        &self,
        signal: &Signal,
        slug: &str,
        app: &str,
    ) -> Result<Vec<Instance>, AgentError> {
        let data = self
            .request(signal, "instances", vec![slug.to_string(), app.to_string()])
            .await?;
        let body = protocol::strip_ok(&data).map_err(AgentError::Remote)?;
        protocol::parse_json(body)
    }

    /// Open a data channel to `addr` through the tunnel.
    ///
    /// The handshake runs on a freshly opened connection which, once the
    /// daemon acknowledges it, is returned as the channel itself. The
    /// caller owns and must close it.
    pub async fn connect(
        &self,
        signal: &Signal,
        slug: &str,
        addr: &str,
        timeout: Duration,
    ) -> Result<AgentStream, AgentError> {
        let handshake_signal = self.short(signal);
        let conn = self.dial(&handshake_signal).await?;
        Handshake::new(conn, slug, addr, timeout)
            .complete(&handshake_signal)
            .await
    }

    /// Establish the organization's tunnel and return a dialer for it
    pub async fn dialer(
        &self,
        signal: &Signal,
        org: &Organization,
    ) -> Result<Dialer, AgentError> {
        let resp = self.establish(signal, &org.slug).await?;
        Ok(Dialer::new(self.clone(), &org.slug, self.dial_timeout, resp))
    }
}
