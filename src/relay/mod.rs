//! Real-time container telemetry relay.
//!
//! One client connection maps to one [`session::Session`] bound to a single
//! container and relay kind. The transport (WebSocket framing) lives in the
//! router; handlers only see a [`ClientChannel`].

pub mod exec;
pub mod logs;
pub mod pull;
pub mod session;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::docker::engine::Engine;

pub use self::stats::StatsSample;

/// Close code sent when the connection path names no relay.
pub const INVALID_PATH_CLOSE_CODE: u16 = 4000;

lazy_static::lazy_static! {
    static ref RELAY_PATH: regex::Regex =
        regex::Regex::new(r"^/ws/containers/([^/]+)/(logs|stats|exec)$")
            .expect("relay path pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Logs,
    Stats,
    Exec,
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logs => write!(f, "logs"),
            Self::Stats => write!(f, "stats"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// What a connection path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub container_id: String,
    pub kind: RelayKind,
}

impl RelayTarget {
    /// Parse `/ws/containers/{id}/{logs|stats|exec}`. Anything else is `None`.
    pub fn from_path(path: &str) -> Option<Self> {
        let caps = RELAY_PATH.captures(path)?;
        let kind = match &caps[2] {
            "logs" => RelayKind::Logs,
            "stats" => RelayKind::Stats,
            "exec" => RelayKind::Exec,
            _ => return None,
        };
        Some(Self {
            container_id: caps[1].to_string(),
            kind,
        })
    }
}

/// Typed messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Log { data: String },
    Stats { data: StatsSample },
    Connected,
    Output { data: String },
    Exit,
    Error { message: String },
}

/// The client hung up; nothing more can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientClosed;

/// Handler-side view of one client connection.
///
/// `recv` yields raw text frames and returns `None` once the client has
/// closed or errored; both end the session the same way.
pub struct ClientChannel {
    outbound: mpsc::Sender<ServerMessage>,
    inbound: mpsc::Receiver<String>,
}

impl ClientChannel {
    pub fn new(outbound: mpsc::Sender<ServerMessage>, inbound: mpsc::Receiver<String>) -> Self {
        Self { outbound, inbound }
    }

    pub async fn send(&self, message: ServerMessage) -> Result<(), ClientClosed> {
        self.outbound.send(message).await.map_err(|_| ClientClosed)
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

/// Run the single handler matching `target` until the client goes away.
pub async fn run_session<E: Engine + ?Sized>(engine: &E, target: RelayTarget, client: ClientChannel) {
    tracing::info!(
        container_id = %target.container_id,
        kind = %target.kind,
        "Relay session dispatched"
    );

    match target.kind {
        RelayKind::Logs => logs::relay_logs(engine, &target.container_id, client).await,
        RelayKind::Stats => stats::relay_stats(engine, &target.container_id, client).await,
        RelayKind::Exec => exec::relay_exec(engine, &target.container_id, client).await,
    }

    tracing::debug!(
        container_id = %target.container_id,
        kind = %target.kind,
        "Relay session ended"
    );
}
