//! Readiness polling for tunnels and hosts.
use std::future::Future;
use std::time::Duration;

use tracing::debug;
use tunnel_agent_common::{AgentError, Organization};

use crate::client::Client;
use crate::signal::Signal;

/// Call `op` every `interval` while it fails with an error `retryable`
/// accepts. The first other outcome, success included, is returned as is.
///
/// The signal is checked before every retry, so a cancelled wait returns
/// without another call.
pub async fn retry_while<T, Op, Fut, R>(
    signal: &Signal,
    interval: Duration,
    retryable: R,
    mut op: Op,
) -> Result<T, AgentError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
    R: Fn(&AgentError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Err(err) if retryable(&err) => {
                debug!("Attempt {} not ready: {}", attempt, err);
            }
            outcome => return outcome,
        }

        signal.check()?;
        signal.pause(interval).await?;
    }
}

impl Client {
    /// Wait until the organization's tunnel answers a probe
    pub async fn wait_for_tunnel(
        &self,
        signal: &Signal,
        org: &Organization,
    ) -> Result<(), AgentError> {
        retry_while(signal, self.poll_interval(), AgentError::is_tunnel, || {
            self.probe(signal, &org.slug)
        })
        .await
    }

    /// Wait until `host` resolves inside the organization's tunnel
    pub async fn wait_for_host(
        &self,
        signal: &Signal,
        org: &Organization,
        host: &str,
    ) -> Result<String, AgentError> {
        retry_while(
            signal,
            self.poll_interval(),
            |err| err.is_tunnel() || err.is_host_not_found(),
            || self.resolve(signal, &org.slug, host),
        )
        .await
    }
}
