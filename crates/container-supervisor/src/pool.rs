//! The persistent container pool: image pulls, container lifecycle (reuse/restart/recreate),
//! and teardown. Grounded on the pack's `bollard`-based container orchestration manifests
//! (`other_examples/manifests/{vhqtvn-revela,aptos-labs-aptos-core,Galxe-gravity-sdk}`) for the
//! dependency choice; the reuse-or-recreate decision tree is this crate's own rendering of
//! spec §4.3's persistent-container model, since none of those repos manage a long-lived
//! compute container pool themselves.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceRequest, HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use agent_core::ContainerMetadata;

use crate::error::{Result, SupervisorError};

/// Prefix applied to every container this supervisor manages, so they're identifiable (and
/// collectable) alongside unrelated containers on the host.
const NAME_PREFIX: &str = "noosphere-";

/// Default HTTP port assumed inside a container when `ContainerMetadata::port` is unset.
const DEFAULT_CONTAINER_PORT: u16 = 8080;

/// Grace period given to a container on `docker stop` before it is killed (spec §4.3).
const STOP_GRACE: Duration = Duration::from_secs(10);

/// How the supervisor reaches containers: by publishing host ports (single-host / local
/// development) or by joining a named virtual network (orchestrated deployments where the
/// agent itself runs containerized alongside its workers).
#[derive(Debug, Clone)]
pub enum NetworkMode {
    /// Publish each container's port to the host and connect via `127.0.0.1:<port>`.
    Local,
    /// Join `network_name`; connect via the container's name on that network.
    Orchestrated {
        /// The Docker network all managed containers join.
        network_name: String,
    },
}

impl NetworkMode {
    /// Select the mode from `NOOSPHERE_CONTAINER_NETWORK`: unset or empty means [`Self::Local`],
    /// otherwise its value names the network to join.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("NOOSPHERE_CONTAINER_NETWORK") {
            Ok(name) if !name.trim().is_empty() => Self::Orchestrated { network_name: name },
            _ => Self::Local,
        }
    }
}

/// Where and how to reach a prepared container.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// The Docker container name (`"noosphere-<id>"`).
    pub container_name: String,
    /// Host (or network-local name) to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
}

/// Manages the lifecycle of the agent's persistent compute containers.
#[derive(Debug)]
pub struct ContainerSupervisor {
    docker: Docker,
    pub(crate) http: reqwest::Client,
    mode: NetworkMode,
    pub(crate) handles: tokio::sync::RwLock<HashMap<String, ContainerHandle>>,
}

impl ContainerSupervisor {
    /// Connect to the local Docker daemon using its platform-default transport.
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| SupervisorError::DockerUnavailable(e.to_string()))?;
        Ok(Self {
            docker,
            http: reqwest::Client::new(),
            mode: NetworkMode::from_env(),
            handles: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Verify the Docker daemon is reachable.
    pub async fn check_docker_available(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| SupervisorError::DockerUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Resolve the address to invoke a prepared container at.
    pub async fn handle_for(&self, container_id: &str) -> Result<ContainerHandle> {
        self.handles
            .read()
            .await
            .get(container_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotPrepared(container_id.to_string()))
    }

    /// Pull images and ensure every declared container is running, reusing already-running
    /// instances and restarting or recreating stopped ones (spec §4.3).
    pub async fn prepare(&self, containers: &HashMap<String, ContainerMetadata>) -> Result<()> {
        for metadata in containers.values() {
            self.pull_if_missing(&metadata.image).await?;
            let handle = self.ensure_container(metadata).await?;
            self.handles.write().await.insert(metadata.id.clone(), handle);
        }
        Ok(())
    }

    async fn pull_if_missing(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "pulling container image");
        let options = CreateImageOptions { from_image: image, ..Default::default() };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                return Err(SupervisorError::Docker(e));
            }
        }
        Ok(())
    }

    async fn ensure_container(&self, metadata: &ContainerMetadata) -> Result<ContainerHandle> {
        let name = format!("{NAME_PREFIX}{}", metadata.id);
        let port = metadata.port.unwrap_or(DEFAULT_CONTAINER_PORT);

        let existing = self.find_existing(&name).await?;
        match existing {
            Some(summary) if summary.state.as_deref() == Some("running") => {
                debug!(name, "reusing running container");
                return Ok(self.handle_from_mode(&name, port));
            }
            Some(_) => {
                info!(name, "container exists but is stopped, attempting restart");
                if self.docker.start_container(&name, None::<StartContainerOptions<String>>).await.is_ok() {
                    return Ok(self.handle_from_mode(&name, port));
                }
                warn!(name, "restart failed, recreating container");
                let _ = self
                    .docker
                    .remove_container(&name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
                    .await;
            }
            None => {}
        }

        self.create_container(&name, metadata, port).await?;
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(SupervisorError::Docker)?;
        Ok(self.handle_from_mode(&name, port))
    }

    async fn find_existing(&self, name: &str) -> Result<Option<bollard::models::ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let options = ListContainersOptions { all: true, filters, ..Default::default() };
        let containers = self.docker.list_containers(Some(options)).await.map_err(SupervisorError::Docker)?;
        Ok(containers.into_iter().find(|c| {
            c.names.as_ref().is_some_and(|names| names.iter().any(|n| n.trim_start_matches('/') == name))
        }))
    }

    async fn create_container(&self, name: &str, metadata: &ContainerMetadata, port: u16) -> Result<()> {
        let env: Vec<String> = metadata.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let memory = metadata.memory_limit.as_deref().map(parse_memory_bytes).transpose()?;
        let nano_cpus = metadata.cpu_limit.map(|cpus| i64::from(cpus) * 1_000_000_000);
        let device_requests = metadata.gpu.then(|| {
            vec![DeviceRequest {
                driver: Some("nvidia".to_string()),
                count: Some(-1),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }]
        });

        let port_key = format!("{port}/tcp");
        let (exposed_ports, host_config) = match &self.mode {
            NetworkMode::Local => {
                let mut exposed = HashMap::new();
                exposed.insert(port_key.clone(), HashMap::new());
                let mut bindings = HashMap::new();
                bindings.insert(
                    port_key,
                    Some(vec![PortBinding { host_ip: Some("127.0.0.1".to_string()), host_port: Some(port.to_string()) }]),
                );
                (
                    Some(exposed),
                    HostConfig {
                        port_bindings: Some(bindings),
                        memory,
                        nano_cpus,
                        device_requests,
                        ..Default::default()
                    },
                )
            }
            NetworkMode::Orchestrated { network_name } => (
                None,
                HostConfig {
                    network_mode: Some(network_name.clone()),
                    memory,
                    nano_cpus,
                    device_requests,
                    ..Default::default()
                },
            ),
        };

        let config = Config {
            image: Some(metadata.image.clone()),
            env: Some(env),
            exposed_ports,
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(Some(CreateContainerOptions { name: name.to_string(), platform: None }), config)
            .await
            .map_err(SupervisorError::Docker)?;
        Ok(())
    }

    fn handle_from_mode(&self, name: &str, port: u16) -> ContainerHandle {
        match &self.mode {
            NetworkMode::Local => ContainerHandle { container_name: name.to_string(), host: "127.0.0.1".to_string(), port },
            NetworkMode::Orchestrated { .. } => {
                ContainerHandle { container_name: name.to_string(), host: name.to_string(), port }
            }
        }
    }

    /// Stop and force-remove every container this supervisor created this run. Idempotent:
    /// already-gone containers are treated as success.
    pub async fn cleanup(&self) -> Result<()> {
        let handles = self.handles.read().await.clone();
        for handle in handles.values() {
            self.stop_and_remove(&handle.container_name).await;
        }
        Ok(())
    }

    /// Stop and remove persistent containers (an explicit operator-triggered teardown, distinct
    /// from transient `cleanup()`). Idempotent.
    pub async fn stop_persistent(&self) -> Result<()> {
        self.cleanup().await
    }

    async fn stop_and_remove(&self, name: &str) {
        let stop_options = StopContainerOptions { t: i64::try_from(STOP_GRACE.as_secs()).unwrap_or(10) };
        if let Err(e) = self.docker.stop_container(name, Some(stop_options)).await {
            debug!(name, error = %e, "stop_container failed (likely already stopped)");
        }
        if let Err(e) =
            self.docker.remove_container(name, Some(RemoveContainerOptions { force: true, ..Default::default() })).await
        {
            debug!(name, error = %e, "remove_container failed (likely already gone)");
        }
    }
}

/// Parse a `"<n><unit>"` memory limit (`b`, `k`, `m`, `g`, case-insensitive) into bytes.
fn parse_memory_bytes(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    let (digits, unit) = raw.split_at(raw.len() - raw.chars().last().map_or(0, |c| usize::from(c.is_alphabetic())));
    let n: i64 = digits.parse().map_err(|_| SupervisorError::InvalidResourceLimit(raw.to_string()))?;
    let multiplier: i64 = match unit.to_lowercase().as_str() {
        "" | "b" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => return Err(SupervisorError::InvalidResourceLimit(raw.to_string())),
    };
    Ok(n * multiplier)
}
