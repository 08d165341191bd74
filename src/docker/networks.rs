use std::collections::HashMap;

use bollard::models::{EndpointSettings, Ipam, IpamConfig, Network};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions,
    ListNetworksOptions, PruneNetworksOptions,
};
use serde::{Deserialize, Serialize};

use super::DockerService;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkDetails {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub ipam: IpamView,
    pub internal: bool,
    pub attachable: bool,
    pub containers: HashMap<String, NetworkEndpoint>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpamView {
    pub driver: String,
    pub config: Vec<IpamEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpamEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEndpoint {
    pub name: String,
    pub endpoint_id: String,
    pub mac_address: String,
    pub ipv4_address: String,
    pub ipv6_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkPruneReport {
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub driver: Option<String>,
    pub internal: Option<bool>,
    pub attachable: Option<bool>,
    pub labels: Option<HashMap<String, String>>,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

impl CreateNetworkRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::validation("name must not be empty"));
        }
        Ok(())
    }

    /// An IPAM block is only sent when an address setting was given.
    fn ipam(&self) -> Ipam {
        if self.subnet.is_none() && self.gateway.is_none() {
            return Ipam::default();
        }
        Ipam {
            config: Some(vec![IpamConfig {
                subnet: self.subnet.clone(),
                gateway: self.gateway.clone(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

impl From<Network> for NetworkDetails {
    fn from(net: Network) -> Self {
        let ipam = net.ipam.unwrap_or_default();
        Self {
            id: net.id.unwrap_or_default(),
            name: net.name.unwrap_or_default(),
            driver: net.driver.unwrap_or_else(|| "bridge".into()),
            scope: net.scope.unwrap_or_default(),
            ipam: IpamView {
                driver: ipam.driver.unwrap_or_else(|| "default".into()),
                config: ipam
                    .config
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| IpamEntry {
                        subnet: c.subnet,
                        gateway: c.gateway,
                    })
                    .collect(),
            },
            internal: net.internal.unwrap_or(false),
            attachable: net.attachable.unwrap_or(false),
            containers: net
                .containers
                .unwrap_or_default()
                .into_iter()
                .map(|(id, c)| {
                    (
                        id,
                        NetworkEndpoint {
                            name: c.name.unwrap_or_default(),
                            endpoint_id: c.endpoint_id.unwrap_or_default(),
                            mac_address: c.mac_address.unwrap_or_default(),
                            ipv4_address: c.ipv4_address.unwrap_or_default(),
                            ipv6_address: c.ipv6_address.unwrap_or_default(),
                        },
                    )
                })
                .collect(),
            labels: net.labels.unwrap_or_default(),
        }
    }
}

impl DockerService {
    pub async fn list_networks(&self) -> Result<Vec<NetworkDetails>, ApiError> {
        let networks = self
            .client()?
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;
        Ok(networks.into_iter().map(Into::into).collect())
    }

    pub async fn inspect_network(&self, id: &str) -> Result<NetworkDetails, ApiError> {
        let network = self
            .client()?
            .inspect_network(id, None::<InspectNetworkOptions<String>>)
            .await?;
        Ok(network.into())
    }

    pub async fn create_network(
        &self,
        req: &CreateNetworkRequest,
    ) -> Result<NetworkDetails, ApiError> {
        let options = CreateNetworkOptions {
            name: req.name.clone(),
            driver: req.driver.clone().unwrap_or_else(|| "bridge".into()),
            internal: req.internal.unwrap_or(false),
            attachable: req.attachable.unwrap_or(true),
            labels: req.labels.clone().unwrap_or_default(),
            ipam: req.ipam(),
            ..Default::default()
        };
        self.client()?.create_network(options).await?;
        tracing::info!(network = %req.name, "Network created");

        let mut created = self.inspect_network(&req.name).await?;
        created.containers.clear();
        Ok(created)
    }

    pub async fn remove_network(&self, id: &str) -> Result<(), ApiError> {
        self.client()?.remove_network(id).await?;
        tracing::info!(network = id, "Network removed");
        Ok(())
    }

    pub async fn connect_container(
        &self,
        network_id: &str,
        container_id: &str,
    ) -> Result<(), ApiError> {
        self.client()?
            .connect_network(
                network_id,
                ConnectNetworkOptions {
                    container: container_id,
                    endpoint_config: EndpointSettings::default(),
                },
            )
            .await?;
        tracing::info!(network = network_id, container_id, "Container connected");
        Ok(())
    }

    pub async fn disconnect_container(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), ApiError> {
        self.client()?
            .disconnect_network(
                network_id,
                DisconnectNetworkOptions {
                    container: container_id,
                    force,
                },
            )
            .await?;
        tracing::info!(network = network_id, container_id, force, "Container disconnected");
        Ok(())
    }

    pub async fn prune_networks(&self) -> Result<NetworkPruneReport, ApiError> {
        let result = self
            .client()?
            .prune_networks(None::<PruneNetworksOptions<String>>)
            .await?;

        let deleted = result.networks_deleted.unwrap_or_default();
        tracing::info!(count = deleted.len(), "Networks pruned");
        Ok(NetworkPruneReport { deleted })
    }
}
