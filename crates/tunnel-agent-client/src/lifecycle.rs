//! Deciding whether to reuse, replace or start the agent daemon.
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};
use tunnel_agent_common::{AgentConfig, AgentError, Endpoint};

use crate::client::Client;
use crate::signal::Signal;

/// Starts a daemon process listening on an endpoint
pub trait DaemonLauncher {
    fn launch(&self, endpoint: &Endpoint) -> Result<(), AgentError>;
}

/// Launches the daemon by running a program detached from our stdio.
///
/// The endpoint address is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Launch the current executable with the given arguments
    pub fn current_exe<I, S>(args: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exe = std::env::current_exe()
            .map_err(|e| AgentError::Launch(format!("cannot locate current executable: {}", e)))?;
        Ok(Self {
            program: exe,
            args: args.into_iter().map(Into::into).collect(),
        })
    }
}

impl DaemonLauncher for CommandLauncher {
    fn launch(&self, endpoint: &Endpoint) -> Result<(), AgentError> {
        info!("Spawning agent {:?} on {}", self.program, endpoint);
        Command::new(&self.program)
            .args(&self.args)
            .arg(&endpoint.address)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AgentError::Launch(format!("{}: {}", self.program.display(), e)))?;
        Ok(())
    }
}

/// Version this crate was built as
pub fn build_version() -> semver::Version {
    semver::Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| semver::Version::new(0, 0, 0))
}

/// What negotiation did to get a usable client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// A daemon with our version was already running
    Reused,
    /// A foreground daemon with another version was kept after a warning
    KeptMismatched { daemon_version: semver::Version },
    /// A background daemon with another version was killed and replaced
    Restarted { previous_version: semver::Version },
    /// No daemon was reachable, so one was started
    Started,
}

/// Return a client for a daemon running our version, starting one if needed
pub async fn establish<L: DaemonLauncher>(
    config: &AgentConfig,
    launcher: &L,
    version: &semver::Version,
    signal: &Signal,
) -> Result<Client, AgentError> {
    negotiate(config, launcher, version, signal)
        .await
        .map(|(client, _)| client)
}

/// Like [`establish`], also reporting which path was taken
pub async fn negotiate<L: DaemonLauncher>(
    config: &AgentConfig,
    launcher: &L,
    version: &semver::Version,
    signal: &Signal,
) -> Result<(Client, Negotiation), AgentError> {
    let endpoint = config.endpoint();
    let client = Client::new(endpoint.clone(), config);

    let outcome = match client.ping(signal).await {
        Ok(pong) if pong.matches_version(version) => {
            debug!("Agent {} (pid {}) matches our version", pong.version, pong.pid);
            return Ok((client, Negotiation::Reused));
        }
        Ok(pong) => {
            let msg = format!(
                "client version {} does not match agent version {}",
                version, pong.version
            );

            if !pong.background {
                warn!("{}", msg);
                return Ok((
                    client,
                    Negotiation::KeptMismatched {
                        daemon_version: pong.version,
                    },
                ));
            }

            info!("{}; stopping agent (pid {})", msg, pong.pid);
            if let Err(e) = client.kill(signal).await {
                warn!("{}; kill failed: {}", msg, e);
                if e.is_cancelled() && signal.reason().is_some() {
                    return Err(e);
                }
                return Err(AgentError::Kill(Box::new(e)));
            }
            signal.pause(config.restart_grace).await?;

            Negotiation::Restarted {
                previous_version: pong.version,
            }
        }
        // only the caller's own signal stops us; a hung daemon is replaced
        Err(e) if signal.reason().is_some() => return Err(e),
        Err(e) => {
            debug!("No usable agent at {}: {}", endpoint, e);
            Negotiation::Started
        }
    };

    let client = start(config, launcher, signal).await?;
    Ok((client, outcome))
}

/// Launch a daemon and ping it until it answers or the start timeout passes
async fn start<L: DaemonLauncher>(
    config: &AgentConfig,
    launcher: &L,
    signal: &Signal,
) -> Result<Client, AgentError> {
    let endpoint = config.endpoint();
    launcher.launch(&endpoint)?;

    let deadline = signal.with_timeout(config.start_timeout);
    let client = Client::new(endpoint, config);
    loop {
        match client.ping(&deadline).await {
            Ok(pong) => {
                info!("Agent {} started (pid {})", pong.version, pong.pid);
                return Ok(client);
            }
            Err(e) => debug!("Agent not reachable yet: {}", e),
        }

        // the caller's own cancellation wins over the start timeout
        signal.check()?;
        if deadline.pause(config.poll_interval).await.is_err() {
            signal.check()?;
            return Err(AgentError::StartTimeout(config.start_timeout));
        }
    }
}
