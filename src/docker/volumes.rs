use std::collections::HashMap;

use bollard::models::Volume;
use bollard::volume::{
    CreateVolumeOptions, ListVolumesOptions, PruneVolumesOptions, RemoveVolumeOptions,
};
use serde::{Deserialize, Serialize};

use super::images::PruneReport;
use super::{DockerService, enum_name};
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub created_at: String,
    pub labels: HashMap<String, String>,
    pub scope: String,
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub driver: Option<String>,
    pub labels: Option<HashMap<String, String>>,
}

impl CreateVolumeRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::validation("name must not be empty"));
        }
        Ok(())
    }
}

impl From<Volume> for VolumeInfo {
    fn from(vol: Volume) -> Self {
        Self {
            name: vol.name,
            driver: vol.driver,
            mountpoint: vol.mountpoint,
            created_at: vol.created_at.unwrap_or_default(),
            labels: vol.labels,
            scope: vol.scope.map(|s| enum_name(&s)).unwrap_or_default(),
            options: vol.options,
        }
    }
}

impl DockerService {
    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, ApiError> {
        let result = self
            .client()?
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await?;
        Ok(result
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, ApiError> {
        Ok(self.client()?.inspect_volume(name).await?.into())
    }

    /// Create a volume and return it as the engine reports it afterwards.
    pub async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<VolumeInfo, ApiError> {
        let options = CreateVolumeOptions {
            name: req.name.clone(),
            driver: req.driver.clone().unwrap_or_else(|| "local".into()),
            labels: req.labels.clone().unwrap_or_default(),
            ..Default::default()
        };
        self.client()?.create_volume(options).await?;
        tracing::info!(volume = %req.name, "Volume created");

        self.inspect_volume(&req.name).await
    }

    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<(), ApiError> {
        self.client()?
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await?;
        tracing::info!(volume = name, force, "Volume removed");
        Ok(())
    }

    pub async fn prune_volumes(&self) -> Result<PruneReport, ApiError> {
        let result = self
            .client()?
            .prune_volumes(None::<PruneVolumesOptions<String>>)
            .await?;

        let deleted = result.volumes_deleted.unwrap_or_default();
        let space_reclaimed = result.space_reclaimed.unwrap_or(0);
        tracing::info!(count = deleted.len(), space_reclaimed, "Volumes pruned");

        Ok(PruneReport {
            deleted,
            space_reclaimed,
        })
    }
}
