use std::collections::HashMap;

use bollard::container::{
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary, MountPoint};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{DockerService, enum_name, strip_leading_slash};
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub command: String,
    /// Unix seconds.
    pub created: i64,
    pub state: String,
    pub status: String,
    pub ports: Vec<PortBinding>,
    pub labels: HashMap<String, String>,
    pub network_mode: String,
    pub mounts: Vec<MountInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub private_port: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u32>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub rw: bool,
}

/// Inspect view: the list fields plus config, networks and host settings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetails {
    #[serde(flatten)]
    pub summary: ContainerInfo,
    pub config: ContainerConfigView,
    pub network_settings: NetworkSettingsView,
    pub host_config: HostConfigView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfigView {
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub entrypoint: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSettingsView {
    pub networks: HashMap<String, EndpointView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointView {
    pub network_id: String,
    pub ip_address: String,
    pub gateway: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfigView {
    pub memory: i64,
    pub cpu_shares: i64,
    pub restart_policy: RestartPolicyView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicyView {
    pub name: String,
    pub maximum_retry_count: i64,
}

/// Query of the one-shot (non-following) logs endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u64>,
    pub since: Option<i64>,
    pub timestamps: Option<bool>,
}

impl From<ContainerSummary> for ContainerInfo {
    fn from(c: ContainerSummary) -> Self {
        Self {
            id: c.id.unwrap_or_default(),
            names: c
                .names
                .unwrap_or_default()
                .iter()
                .map(|n| strip_leading_slash(n))
                .collect(),
            image: c.image.unwrap_or_default(),
            image_id: c.image_id.unwrap_or_default(),
            command: c.command.unwrap_or_default(),
            created: c.created.unwrap_or_default(),
            state: c.state.map(|s| enum_name(&s)).unwrap_or_default(),
            status: c.status.unwrap_or_default(),
            ports: c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| PortBinding {
                    ip: p.ip,
                    private_port: p.private_port as u32,
                    public_port: p.public_port.map(|port| port as u32),
                    kind: p.typ.map(|t| enum_name(&t)).unwrap_or_default(),
                })
                .collect(),
            labels: c.labels.unwrap_or_default(),
            network_mode: c
                .host_config
                .and_then(|h| h.network_mode)
                .unwrap_or_else(|| "default".into()),
            mounts: c.mounts.unwrap_or_default().into_iter().map(mount_info).collect(),
        }
    }
}

fn mount_info(m: MountPoint) -> MountInfo {
    MountInfo {
        kind: m.typ.map(|t| enum_name(&t)).unwrap_or_default(),
        name: m.name,
        source: m.source.unwrap_or_default(),
        destination: m.destination.unwrap_or_default(),
        mode: m.mode.unwrap_or_default(),
        rw: m.rw.unwrap_or(false),
    }
}

impl From<ContainerInspectResponse> for ContainerDetails {
    fn from(info: ContainerInspectResponse) -> Self {
        let config = info.config.unwrap_or_default();
        let host = info.host_config.unwrap_or_default();
        let settings = info.network_settings.unwrap_or_default();
        let state = info
            .state
            .and_then(|s| s.status)
            .map(|s| enum_name(&s))
            .unwrap_or_default();

        let ports = settings
            .ports
            .clone()
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(port, bindings)| {
                let (private_port, kind) = match port.split_once('/') {
                    Some((p, k)) => (p.parse().unwrap_or(0), k.to_string()),
                    None => (port.parse().unwrap_or(0), "tcp".to_string()),
                };
                match bindings {
                    Some(bindings) if !bindings.is_empty() => bindings
                        .into_iter()
                        .map(|b| PortBinding {
                            ip: b.host_ip,
                            private_port,
                            public_port: b.host_port.and_then(|p| p.parse().ok()),
                            kind: kind.clone(),
                        })
                        .collect::<Vec<_>>(),
                    _ => vec![PortBinding {
                        ip: None,
                        private_port,
                        public_port: None,
                        kind,
                    }],
                }
            })
            .collect();

        let created = info
            .created
            .as_deref()
            .and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.timestamp())
            .unwrap_or_default();

        let restart = host.restart_policy.unwrap_or_default();

        Self {
            summary: ContainerInfo {
                id: info.id.unwrap_or_default(),
                names: vec![strip_leading_slash(info.name.as_deref().unwrap_or_default())],
                image: config.image.clone().unwrap_or_default(),
                image_id: info.image.unwrap_or_default(),
                command: config.cmd.clone().unwrap_or_default().join(" "),
                created,
                status: state.clone(),
                state,
                ports,
                labels: config.labels.clone().unwrap_or_default(),
                network_mode: host.network_mode.unwrap_or_else(|| "default".into()),
                mounts: info.mounts.unwrap_or_default().into_iter().map(mount_info).collect(),
            },
            config: ContainerConfigView {
                env: config.env.unwrap_or_default(),
                cmd: config.cmd.unwrap_or_default(),
                working_dir: config.working_dir.unwrap_or_default(),
                entrypoint: config.entrypoint.unwrap_or_default(),
            },
            network_settings: NetworkSettingsView {
                networks: settings
                    .networks
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(name, net)| {
                        (
                            name,
                            EndpointView {
                                network_id: net.network_id.unwrap_or_default(),
                                ip_address: net.ip_address.unwrap_or_default(),
                                gateway: net.gateway.unwrap_or_default(),
                                mac_address: net.mac_address.unwrap_or_default(),
                            },
                        )
                    })
                    .collect(),
            },
            host_config: HostConfigView {
                memory: host.memory.unwrap_or(0),
                cpu_shares: host.cpu_shares.unwrap_or(0),
                restart_policy: RestartPolicyView {
                    name: restart
                        .name
                        .map(|n| enum_name(&n))
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "no".into()),
                    maximum_retry_count: restart.maximum_retry_count.unwrap_or(0),
                },
            },
        }
    }
}

impl DockerService {
    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, ApiError> {
        let containers = self
            .client()?
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await?;

        Ok(containers.into_iter().map(Into::into).collect())
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, ApiError> {
        let info = self
            .client()?
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(info.into())
    }

    pub async fn start_container(&self, id: &str) -> Result<(), ApiError> {
        self.client()?
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        tracing::info!(container_id = id, "Container started");
        Ok(())
    }

    pub async fn stop_container(&self, id: &str) -> Result<(), ApiError> {
        self.client()?
            .stop_container(id, None::<StopContainerOptions>)
            .await?;
        tracing::info!(container_id = id, "Container stopped");
        Ok(())
    }

    pub async fn restart_container(&self, id: &str) -> Result<(), ApiError> {
        self.client()?
            .restart_container(id, None::<RestartContainerOptions>)
            .await?;
        tracing::info!(container_id = id, "Container restarted");
        Ok(())
    }

    pub async fn kill_container(&self, id: &str) -> Result<(), ApiError> {
        self.client()?
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        tracing::info!(container_id = id, "Container killed");
        Ok(())
    }

    pub async fn remove_container(&self, id: &str, force: bool) -> Result<(), ApiError> {
        self.client()?
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await?;
        tracing::info!(container_id = id, force, "Container removed");
        Ok(())
    }

    /// Fetch recent logs without following.
    pub async fn container_logs(&self, id: &str, query: &LogsQuery) -> Result<String, ApiError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: query.tail.filter(|t| *t > 0).unwrap_or(100).to_string(),
            since: query.since.unwrap_or(0),
            timestamps: query.timestamps.unwrap_or(true),
            ..Default::default()
        };

        let mut stream = self.client()?.logs(id, Some(options));
        let mut logs = String::new();

        while let Some(chunk) = stream.next().await {
            logs.push_str(&chunk?.to_string());
        }

        Ok(logs)
    }
}
