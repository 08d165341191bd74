use serde::Serialize;

use super::DockerService;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub id: String,
    pub containers: i64,
    pub containers_running: i64,
    pub containers_paused: i64,
    pub containers_stopped: i64,
    pub images: i64,
    pub driver: String,
    pub memory_limit: bool,
    pub swap_limit: bool,
    pub cpu_cfs_period: bool,
    pub cpu_cfs_quota: bool,
    pub cpu_shares: bool,
    pub cpu_set: bool,
    pub oom_kill_disable: bool,
    pub operating_system: String,
    pub os_type: String,
    pub architecture: String,
    pub ncpu: i64,
    pub mem_total: i64,
    pub docker_root_dir: String,
    pub name: String,
    pub server_version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerVersion {
    pub version: String,
    pub api_version: String,
    #[serde(rename = "minAPIVersion")]
    pub min_api_version: String,
    pub git_commit: String,
    pub go_version: String,
    pub os: String,
    pub arch: String,
    pub kernel_version: String,
    pub build_time: String,
}

impl DockerService {
    pub async fn system_info(&self) -> Result<SystemInfo, ApiError> {
        let info = self.client()?.info().await?;

        Ok(SystemInfo {
            id: info.id.unwrap_or_default(),
            containers: info.containers.unwrap_or(0),
            containers_running: info.containers_running.unwrap_or(0),
            containers_paused: info.containers_paused.unwrap_or(0),
            containers_stopped: info.containers_stopped.unwrap_or(0),
            images: info.images.unwrap_or(0),
            driver: info.driver.unwrap_or_default(),
            memory_limit: info.memory_limit.unwrap_or(false),
            swap_limit: info.swap_limit.unwrap_or(false),
            cpu_cfs_period: info.cpu_cfs_period.unwrap_or(false),
            cpu_cfs_quota: info.cpu_cfs_quota.unwrap_or(false),
            cpu_shares: info.cpu_shares.unwrap_or(false),
            cpu_set: info.cpu_set.unwrap_or(false),
            oom_kill_disable: info.oom_kill_disable.unwrap_or(false),
            operating_system: info.operating_system.unwrap_or_default(),
            os_type: info.os_type.unwrap_or_default(),
            architecture: info.architecture.unwrap_or_default(),
            ncpu: info.ncpu.unwrap_or(0),
            mem_total: info.mem_total.unwrap_or(0),
            docker_root_dir: info.docker_root_dir.unwrap_or_default(),
            name: info.name.unwrap_or_default(),
            server_version: info.server_version.unwrap_or_default(),
        })
    }

    pub async fn version(&self) -> Result<DockerVersion, ApiError> {
        let version = self.client()?.version().await?;

        Ok(DockerVersion {
            version: version.version.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
            min_api_version: version.min_api_version.unwrap_or_default(),
            git_commit: version.git_commit.unwrap_or_default(),
            go_version: version.go_version.unwrap_or_default(),
            os: version.os.unwrap_or_default(),
            arch: version.arch.unwrap_or_default(),
            kernel_version: version.kernel_version.unwrap_or_default(),
            build_time: version.build_time.unwrap_or_default(),
        })
    }
}
