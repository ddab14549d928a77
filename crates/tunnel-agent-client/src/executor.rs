//! Runs blocking protocol exchanges on a connection while honouring a
//! cancellation signal.
//!
//! The exchange and a watcher on the signal run concurrently. When the
//! signal fires first the exchange is dropped mid-flight and the connection
//! is shut down, and the caller sees a cancellation error instead of
//! whatever I/O error the aborted exchange would have produced. Both
//! branches have finished by the time `run` returns.
use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tracing::debug;
use tunnel_agent_common::{AgentError, Endpoint};

use crate::signal::Signal;
use crate::stream::AgentStream;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Open a connection, giving up when the signal fires
pub async fn open(endpoint: &Endpoint, signal: &Signal) -> Result<AgentStream, AgentError> {
    signal.check()?;
    tokio::select! {
        biased;
        reason = signal.fired() => Err(AgentError::Cancelled(reason)),
        conn = AgentStream::open(endpoint) => conn,
    }
}

/// Run `f` on `conn` and close the connection before returning.
///
/// A failure to close is reported only when `f` itself succeeded.
pub async fn run<T, F>(mut conn: AgentStream, signal: &Signal, f: F) -> Result<T, AgentError>
where
    F: for<'c> FnOnce(&'c mut AgentStream) -> BoxFuture<'c, Result<T, AgentError>>,
{
    let result = drive(&mut conn, signal, f).await;
    let closed = close(conn).await;

    let value = result?;
    closed?;
    Ok(value)
}

/// Run `f` on `conn` and hand the connection back on success.
///
/// On failure the connection is closed and only the error is returned.
pub async fn run_and_keep<T, F>(
    mut conn: AgentStream,
    signal: &Signal,
    f: F,
) -> Result<(AgentStream, T), AgentError>
where
    F: for<'c> FnOnce(&'c mut AgentStream) -> BoxFuture<'c, Result<T, AgentError>>,
{
    match drive(&mut conn, signal, f).await {
        Ok(value) => Ok((conn, value)),
        Err(err) => {
            let _ = close(conn).await;
            Err(err)
        }
    }
}

async fn drive<T, F>(conn: &mut AgentStream, signal: &Signal, f: F) -> Result<T, AgentError>
where
    F: for<'c> FnOnce(&'c mut AgentStream) -> BoxFuture<'c, Result<T, AgentError>>,
{
    let worker = f(conn);

    tokio::select! {
        biased;
        result = worker => match result {
            // an error racing a fired signal is almost always the fallout of it
            Err(err) => Err(signal.reason().map(AgentError::Cancelled).unwrap_or(err)),
            ok => ok,
        },
        reason = signal.fired() => {
            debug!("Call aborted: {}", reason);
            Err(AgentError::Cancelled(reason))
        }
    }
}

pub(crate) async fn close(mut conn: AgentStream) -> Result<(), AgentError> {
    match conn.shutdown().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(AgentError::Io(e)),
    }
}
