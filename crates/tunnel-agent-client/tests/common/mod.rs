// Scripted stand-in for the agent daemon, listening on a Unix socket
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tunnel_agent_client::{AgentConfig, Endpoint};
use tunnel_agent_common::protocol;

/// How the stub answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send this payload and close
    Payload(Vec<u8>),
    /// Wait, then send this payload
    Delayed(Duration, Vec<u8>),
    /// Never answer, keep the connection open
    Silent,
    /// Answer `ok`, then echo everything back on the same connection
    Echo,
    /// Close the connection and stop listening
    Exit,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Payload(text.as_bytes().to_vec())
    }

    pub fn pong(version: &str, background: bool) -> Self {
        Reply::text(&format!(
            r#"pong {{"PID":4242,"Version":"{}","Background":{}}}"#,
            version, background
        ))
    }
}

type Handler = dyn Fn(&str, &[String]) -> Reply + Send + Sync;

pub struct StubDaemon {
    pub endpoint: Endpoint,
    requests: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
    _dir: Option<TempDir>,
}

impl StubDaemon {
    /// Start a stub in a fresh temp directory
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> Reply + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let mut stub = Self::bind(&dir.path().join("agent.sock"), handler);
        stub._dir = Some(dir);
        stub
    }

    /// Start a stub that answers requests in order from `replies`
    pub fn scripted(replies: Vec<Reply>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::start(move |_, _| {
            replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Reply::text("script exhausted"))
        })
    }

    /// Start a stub at `path`, replacing any stale socket file
    pub fn bind<F>(path: &Path, handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> Reply + Send + Sync + 'static,
    {
        if path.exists() {
            std::fs::remove_file(path).unwrap();
        }
        let listener = UnixListener::bind(path).unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Arc<Handler> = Arc::new(handler);
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(serve(
            listener,
            handler,
            requests.clone(),
            connections.clone(),
            shutdown,
        ));

        Self {
            endpoint: Endpoint::unix(path),
            requests,
            connections,
            task,
            _dir: None,
        }
    }

    pub fn requests(&self) -> Vec<(String, Vec<String>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.requests().into_iter().map(|(verb, _)| verb).collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Config pointing at this stub with short timings
    pub fn config(&self) -> AgentConfig {
        fast_config(PathBuf::from(&self.endpoint.address))
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Collects formatted tracing output for the current thread
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route WARN and above to this capture until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn fast_config(socket_path: PathBuf) -> AgentConfig {
    AgentConfig {
        socket_path,
        call_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        restart_grace: Duration::from_millis(10),
        start_timeout: Duration::from_secs(2),
        dial_timeout: Duration::from_millis(5000),
    }
}

async fn serve(
    listener: UnixListener,
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
) {
    let mut handlers = tokio::task::JoinSet::new();
    loop {
        let stream = tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => stream,
                Err(_) => break,
            },
        };
        connections.fetch_add(1, Ordering::SeqCst);

        let handler = handler.clone();
        let requests = requests.clone();
        let shutdown = shutdown.clone();
        handlers.spawn(async move {
            handle_connection(stream, handler, requests, shutdown).await;
        });
    }
    handlers.abort_all();
}

async fn handle_connection(
    mut stream: UnixStream,
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    shutdown: Arc<Notify>,
) {
    let payload = match protocol::read(&mut stream).await {
        Ok(payload) => payload,
        Err(_) => return,
    };
    let (verb, args) = match protocol::decode_command(&payload) {
        Ok(command) => command,
        Err(_) => return,
    };
    requests.lock().unwrap().push((verb.clone(), args.clone()));

    match (*handler)(verb.as_str(), args.as_slice()) {
        Reply::Payload(data) => {
            let _ = protocol::write_payload(&mut stream, &data).await;
        }
        Reply::Delayed(delay, data) => {
            tokio::time::sleep(delay).await;
            let _ = protocol::write_payload(&mut stream, &data).await;
        }
        Reply::Silent => {
            std::future::pending::<()>().await;
        }
        Reply::Echo => {
            if protocol::write_payload(&mut stream, b"ok").await.is_ok() {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            }
        }
        Reply::Exit => {
            shutdown.notify_one();
        }
    }
}
