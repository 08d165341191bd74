mod containers;
pub mod engine;
mod images;
mod networks;
mod system;
mod volumes;

pub use containers::{ContainerDetails, ContainerInfo, LogsQuery};
pub use images::{ImageInfo, PruneReport};
pub use networks::{CreateNetworkRequest, NetworkDetails, NetworkPruneReport};
pub use system::{DockerVersion, SystemInfo};
pub use volumes::{CreateVolumeRequest, VolumeInfo};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{LogsOptions, StatsOptions};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Serialize;

use self::engine::{
    Engine, EngineError, EngineResult, ExecChannel, LogFollowOptions, LogStream, ProgressDetail,
    PullProgressEvent, PullStream, StatsStream,
};

/// Streams stay open until one side hangs up; this only bounds the underlying client.
const STREAM_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct Clients {
    client: Docker,
    streaming: Docker,
}

/// Shared handle to the Docker Engine.
///
/// Cloned into every handler. The underlying clients are created on first
/// use so the server starts even when the socket is not there yet; bollard
/// pools connections internally, so concurrent use is safe.
#[derive(Clone)]
pub struct DockerService {
    socket_path: Arc<str>,
    timeout_secs: u64,
    clients: Arc<OnceLock<Clients>>,
}

impl DockerService {
    pub fn new(socket_path: &str, timeout_secs: u64) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout_secs,
            clients: Arc::new(OnceLock::new()),
        }
    }

    fn clients(&self) -> Result<&Clients, bollard::errors::Error> {
        if let Some(clients) = self.clients.get() {
            return Ok(clients);
        }
        let client = Docker::connect_with_socket(
            &self.socket_path,
            self.timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )?;
        let streaming = client.clone().with_timeout(STREAM_TIMEOUT);
        tracing::debug!(socket = %self.socket_path, "Docker client created");
        Ok(self.clients.get_or_init(|| Clients { client, streaming }))
    }

    /// Client for request/response calls, bounded by the configured timeout.
    fn client(&self) -> Result<&Docker, bollard::errors::Error> {
        self.clients().map(|c| &c.client)
    }

    fn streaming(&self) -> Result<&Docker, bollard::errors::Error> {
        self.clients().map(|c| &c.streaming)
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Check whether the engine answers.
    pub async fn ping(&self) -> bool {
        let result = match self.client() {
            Ok(client) => client.ping().await.map(drop),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Docker ping failed: {e}");
                false
            }
        }
    }
}

/// A stream that fails once with `err`.
fn failed<T: Send + 'static>(err: bollard::errors::Error) -> BoxStream<'static, EngineResult<T>> {
    stream::once(async move { Err(EngineError::from(err)) }).boxed()
}

#[async_trait]
impl Engine for DockerService {
    fn follow_logs(&self, container_id: &str, options: LogFollowOptions) -> LogStream {
        let options = LogsOptions::<String> {
            follow: options.follow,
            stdout: true,
            stderr: true,
            tail: options.tail.to_string(),
            timestamps: options.timestamps,
            ..Default::default()
        };

        let docker = match self.streaming() {
            Ok(docker) => docker,
            Err(e) => return failed(e),
        };
        docker
            .logs(container_id, Some(options))
            .map(|chunk| chunk.map(|output| output.to_string()).map_err(EngineError::from))
            .boxed()
    }

    fn stream_stats(&self, container_id: &str) -> StatsStream {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };

        let docker = match self.streaming() {
            Ok(docker) => docker,
            Err(e) => return failed(e),
        };
        // Re-framed as NDJSON so the relay decodes the same wire shape the engine emits.
        docker
            .stats(container_id, Some(options))
            .map(|snapshot| -> EngineResult<Bytes> {
                let mut line = serde_json::to_vec(&snapshot?)
                    .map_err(|e| EngineError::Stream(e.to_string()))?;
                line.push(b'\n');
                Ok(Bytes::from(line))
            })
            .boxed()
    }

    async fn open_shell(&self, container_id: &str) -> EngineResult<ExecChannel> {
        let exec = self
            .streaming()?
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec!["/bin/sh"]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let started = self
            .streaming()?
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    ..Default::default()
                }),
            )
            .await?;

        match started {
            StartExecResults::Attached { output, input } => Ok(ExecChannel {
                output: output
                    .map(|chunk| chunk.map(|out| out.into_bytes()).map_err(EngineError::from))
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => Err(EngineError::Stream(
                "exec session started detached".into(),
            )),
        }
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let (from_image, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let docker = match self.streaming() {
            Ok(docker) => docker,
            Err(e) => return failed(e),
        };
        docker
            .create_image(Some(options), None, None)
            .map(|info| -> EngineResult<PullProgressEvent> {
                let info = info?;
                if let Some(error) = info.error {
                    return Err(EngineError::Stream(error));
                }
                Ok(PullProgressEvent {
                    id: info.id,
                    status: info.status.unwrap_or_default(),
                    progress: info.progress,
                    progress_detail: info.progress_detail.map(|d| ProgressDetail {
                        current: d.current,
                        total: d.total,
                    }),
                })
            })
            .boxed()
    }
}

/// Split `repo[:tag]` into the pair the create-image call expects.
/// Untagged references pull `latest`; digest references pass through whole.
fn split_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }

    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

/// Render a generated engine enum as its wire string.
fn enum_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

fn strip_leading_slash(name: &str) -> String {
    name.strip_prefix('/').unwrap_or(name).to_string()
}
