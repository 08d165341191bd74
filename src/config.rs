use std::env;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Path to the Docker Engine control socket (e.g. /var/run/docker.sock)
    pub docker_socket: String,
    /// Origins allowed by the CORS layer
    pub cors_origins: Vec<String>,
    /// Max image pulls per client per rolling minute (0 = unlimited)
    pub pull_rate_limit: u32,
    /// Max prune calls per client per rolling minute, shared by all resource kinds
    pub prune_rate_limit: u32,
    /// Built UI assets served as the SPA fallback
    pub static_dir: String,
    /// Timeout for non-streaming engine requests
    pub engine_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".into())
                .parse()
                .context("PORT must be a valid u16")?,
            docker_socket: env::var("DOCKER_SOCKET")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/var/run/docker.sock".into()),
            cors_origins: parse_origins(
                &env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".into()),
            ),
            pull_rate_limit: env::var("PULL_RATE_LIMIT")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
            prune_rate_limit: env::var("PRUNE_RATE_LIMIT")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "frontend/dist".into()),
            engine_timeout_secs: env::var("ENGINE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".into())
                .parse()
                .unwrap_or(120),
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
