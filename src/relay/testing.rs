//! In-memory engine and client plumbing for relay tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ClientChannel, ServerMessage};
use crate::docker::engine::{
    Engine, EngineError, EngineResult, ExecChannel, LogFollowOptions, LogStream,
    PullProgressEvent, PullStream, StatsStream,
};

/// What a scripted upstream does after its items run out.
#[derive(Clone, Copy)]
pub enum Tail {
    /// Stay open, like a followed stream with nothing new.
    Hang,
    /// End of stream.
    End,
}

pub struct Script<T> {
    items: Vec<EngineResult<T>>,
    tail: Tail,
}

impl<T> Script<T> {
    pub fn new(items: Vec<EngineResult<T>>, tail: Tail) -> Self {
        Self { items, tail }
    }

    pub fn ok(items: Vec<T>, tail: Tail) -> Self {
        Self::new(items.into_iter().map(Ok).collect(), tail)
    }
}

pub fn upstream_error(message: &str) -> EngineError {
    EngineError::Stream(message.to_string())
}

/// Counts how many times an upstream was dropped.
struct Tracked<T> {
    inner: BoxStream<'static, EngineResult<T>>,
    released: Arc<AtomicUsize>,
}

impl<T> Stream for Tracked<T> {
    type Item = EngineResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn scripted<T: Send + 'static>(
    script: Option<Script<T>>,
    released: Arc<AtomicUsize>,
) -> BoxStream<'static, EngineResult<T>> {
    let Script { items, tail } = script.unwrap_or(Script {
        items: Vec::new(),
        tail: Tail::Hang,
    });
    let head = stream::iter(items);
    let inner = match tail {
        Tail::Hang => head.chain(stream::pending()).boxed(),
        Tail::End => head.boxed(),
    };
    Tracked { inner, released }.boxed()
}

/// Test side of an attached fake shell.
pub struct ShellControl {
    pub output: mpsc::UnboundedSender<EngineResult<Bytes>>,
    pub input: DuplexStream,
}

#[derive(Default)]
pub struct FakeEngine {
    pub log_calls: Mutex<Vec<(String, LogFollowOptions)>>,
    pub logs_released: Arc<AtomicUsize>,
    pub stats_released: Arc<AtomicUsize>,
    pub shell_calls: AtomicUsize,
    log_scripts: Mutex<VecDeque<Script<String>>>,
    stats_scripts: Mutex<VecDeque<Script<Bytes>>>,
    pull_scripts: Mutex<VecDeque<Script<PullProgressEvent>>>,
    shell: Mutex<Option<EngineResult<ExecChannel>>>,
    shell_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeEngine {
    pub fn push_logs(&self, script: Script<String>) {
        self.log_scripts.lock().unwrap().push_back(script);
    }

    pub fn push_stats(&self, script: Script<Bytes>) {
        self.stats_scripts.lock().unwrap().push_back(script);
    }

    pub fn push_pull(&self, script: Script<PullProgressEvent>) {
        self.pull_scripts.lock().unwrap().push_back(script);
    }

    /// Prepare the next shell; the returned control drives its output and
    /// reads what the relay writes to its input.
    pub fn prepare_shell(&self) -> ShellControl {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (relay_side, test_side) = tokio::io::duplex(4096);
        *self.shell.lock().unwrap() = Some(Ok(ExecChannel {
            output: UnboundedReceiverStream::new(output_rx).boxed(),
            input: Box::pin(relay_side),
        }));
        ShellControl {
            output: output_tx,
            input: test_side,
        }
    }

    pub fn fail_shell(&self, message: &str) {
        *self.shell.lock().unwrap() = Some(Err(upstream_error(message)));
    }

    /// Hold the next attach until the returned sender fires.
    pub fn gate_shell(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.shell_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn logs_released(&self) -> usize {
        self.logs_released.load(Ordering::SeqCst)
    }

    pub fn stats_released(&self) -> usize {
        self.stats_released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn follow_logs(&self, container_id: &str, options: LogFollowOptions) -> LogStream {
        self.log_calls
            .lock()
            .unwrap()
            .push((container_id.to_string(), options));
        let script = self.log_scripts.lock().unwrap().pop_front();
        scripted(script, self.logs_released.clone())
    }

    fn stream_stats(&self, _container_id: &str) -> StatsStream {
        let script = self.stats_scripts.lock().unwrap().pop_front();
        scripted(script, self.stats_released.clone())
    }

    async fn open_shell(&self, _container_id: &str) -> EngineResult<ExecChannel> {
        self.shell_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.shell_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.shell
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(upstream_error("no shell prepared")))
    }

    fn pull_image(&self, _image: &str) -> PullStream {
        let script = self.pull_scripts.lock().unwrap().pop_front();
        scripted(script, Arc::new(AtomicUsize::new(0)))
    }
}

/// Test side of a client connection.
pub struct FakeClient {
    pub outbound: mpsc::Receiver<ServerMessage>,
    pub inbound: mpsc::Sender<String>,
}

impl FakeClient {
    pub fn new() -> (Self, ClientChannel) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        (
            Self {
                outbound: out_rx,
                inbound: in_tx,
            },
            ClientChannel::new(out_tx, in_rx),
        )
    }

    pub async fn send(&self, text: &str) {
        self.inbound.send(text.to_string()).await.unwrap();
    }

    /// Next message the relay sent, failing the test after a second.
    pub async fn next(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
            .await
            .expect("relay sent nothing")
            .expect("relay dropped the client")
    }

    /// Assert nothing arrives for a short while.
    pub async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.outbound.recv()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
