//! Scripted control daemon.
//!
//! Answers each request line with the next scripted step, or with the default
//! reply once the script runs out. Every request is recorded.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use eswitch_types::protocol::Reply;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Reply),
    /// Sent verbatim, newline appended.
    Raw(String),
    /// Read the request and never answer it.
    Silence,
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<Step>,
    default: Step,
    requests: Vec<Value>,
    connections: usize,
}

pub struct MockDaemon {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    task: JoinHandle<()>,
}

impl MockDaemon {
    /// Starts on an ephemeral localhost port; unscripted requests get `OK`.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(MockState {
            script: VecDeque::new(),
            default: Step::Reply(Reply::ok_empty()),
            requests: Vec::new(),
            connections: 0,
        }));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                accept_state.lock().connections += 1;
                debug!(%peer, "mock daemon accepted connection");
                tokio::spawn(serve_peer(stream, Arc::clone(&accept_state)));
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub fn push(&self, step: Step) -> &Self {
        self.state.lock().script.push_back(step);
        self
    }

    pub fn set_default(&self, step: Step) {
        self.state.lock().default = step;
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().requests.clone()
    }

    /// `action` of every request received so far.
    pub fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.get("action").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_peer(stream: TcpStream, state: Arc<Mutex<MockState>>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let step = {
            let mut state = state.lock();
            let request: Value = serde_json::from_str(&line).unwrap_or(Value::String(line));
            state.requests.push(request);
            state.script.pop_front().unwrap_or_else(|| state.default.clone())
        };

        let frame = match step {
            Step::Reply(reply) => match serde_json::to_string(&reply) {
                Ok(frame) => frame,
                Err(_) => break,
            },
            Step::Raw(raw) => raw,
            Step::Silence => continue,
        };
        if write.write_all(format!("{frame}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}
