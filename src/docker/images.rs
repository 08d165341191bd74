use std::collections::HashMap;

use bollard::image::{ListImagesOptions, PruneImagesOptions, RemoveImageOptions, TagImageOptions};
use bollard::models::{ImageInspect, ImageSummary};
use serde::Serialize;

use super::DockerService;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    /// Unix seconds.
    pub created: i64,
    pub size: i64,
    pub virtual_size: i64,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: i64,
}

impl From<ImageSummary> for ImageInfo {
    fn from(img: ImageSummary) -> Self {
        Self {
            id: img.id,
            repo_tags: img.repo_tags,
            repo_digests: img.repo_digests,
            created: img.created,
            size: img.size,
            virtual_size: img.virtual_size.unwrap_or(img.size),
            labels: img.labels,
        }
    }
}

impl From<ImageInspect> for ImageInfo {
    fn from(info: ImageInspect) -> Self {
        let size = info.size.unwrap_or(0);
        Self {
            id: info.id.unwrap_or_default(),
            repo_tags: info.repo_tags.unwrap_or_default(),
            repo_digests: info.repo_digests.unwrap_or_default(),
            created: info
                .created
                .as_deref()
                .and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.timestamp())
                .unwrap_or_default(),
            size,
            virtual_size: info.virtual_size.unwrap_or(size),
            labels: info.config.and_then(|c| c.labels).unwrap_or_default(),
        }
    }
}

impl DockerService {
    pub async fn list_images(&self) -> Result<Vec<ImageInfo>, ApiError> {
        let images = self
            .client()?
            .list_images(None::<ListImagesOptions<String>>)
            .await?;
        Ok(images.into_iter().map(Into::into).collect())
    }

    pub async fn inspect_image(&self, id: &str) -> Result<ImageInfo, ApiError> {
        Ok(self.client()?.inspect_image(id).await?.into())
    }

    pub async fn remove_image(&self, id: &str, force: bool) -> Result<(), ApiError> {
        self.client()?
            .remove_image(
                id,
                Some(RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await?;
        tracing::info!(image = id, force, "Image removed");
        Ok(())
    }

    /// Remove every unused image, not only dangling ones.
    pub async fn prune_images(&self) -> Result<PruneReport, ApiError> {
        let filters = HashMap::from([("dangling", vec!["false"])]);
        let result = self
            .client()?
            .prune_images(Some(PruneImagesOptions { filters }))
            .await?;

        let deleted: Vec<String> = result
            .images_deleted
            .unwrap_or_default()
            .into_iter()
            .map(|item| item.deleted.or(item.untagged).unwrap_or_default())
            .collect();
        let space_reclaimed = result.space_reclaimed.unwrap_or(0);

        tracing::info!(count = deleted.len(), space_reclaimed, "Images pruned");
        Ok(PruneReport {
            deleted,
            space_reclaimed,
        })
    }

    pub async fn tag_image(&self, id: &str, repo: &str, tag: &str) -> Result<(), ApiError> {
        self.client()?
            .tag_image(id, Some(TagImageOptions { repo, tag }))
            .await?;
        tracing::info!(image = id, repo, tag, "Image tagged");
        Ok(())
    }
}
