//! The streaming surface of the engine, as consumed by the relay.
//!
//! Handlers are generic over [`Engine`] so sessions can run against the real
//! daemon or an in-memory fake.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    #[error("{0}")]
    Stream(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Decoded log text, one item per engine frame.
pub type LogStream = BoxStream<'static, EngineResult<String>>;
/// Raw newline-delimited JSON stats snapshots, chunked arbitrarily.
pub type StatsStream = BoxStream<'static, EngineResult<Bytes>>;
pub type PullStream = BoxStream<'static, EngineResult<PullProgressEvent>>;

/// Parameters of a followed log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFollowOptions {
    pub tail: usize,
    pub follow: bool,
    pub timestamps: bool,
}

impl LogFollowOptions {
    /// What every log session opens with, including after a restart.
    pub const SESSION: Self = Self {
        tail: 100,
        follow: true,
        timestamps: true,
    };
}

/// A hijacked interactive exec channel.
pub struct ExecChannel {
    pub output: BoxStream<'static, EngineResult<Bytes>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Progress of one layer during an image pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullProgressEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_detail: Option<ProgressDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    fn follow_logs(&self, container_id: &str, options: LogFollowOptions) -> LogStream;

    fn stream_stats(&self, container_id: &str) -> StatsStream;

    /// Create a `/bin/sh` exec with a TTY and attach to it.
    async fn open_shell(&self, container_id: &str) -> EngineResult<ExecChannel>;

    fn pull_image(&self, image: &str) -> PullStream;
}
