//! Client for the local tunnel agent daemon.
//!
//! The daemon owns an encrypted private-network tunnel per organization and
//! speaks a small framed command protocol over a local socket. This crate
//! provides:
//! - A session client issuing the daemon's verbs (`Client`)
//! - Cancellable execution of protocol exchanges (`executor`, `Signal`)
//! - Readiness polling for tunnels and hosts
//! - Tunnel dialers handing out raw data channels (`Dialer`)
//! - Daemon version negotiation and restart (`lifecycle`)

pub mod client;
pub mod dialer;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod poll;
pub mod signal;
pub mod stream;

pub use client::Client;
pub use dialer::Dialer;
pub use lifecycle::{
    build_version, establish, negotiate, CommandLauncher, DaemonLauncher, Negotiation,
};
pub use signal::Signal;
pub use stream::AgentStream;
pub use tunnel_agent_common::{
    AgentConfig, AgentError, CancelReason, Classification, Endpoint, EstablishResponse, Instance,
    Network, Organization, PingResponse,
};
