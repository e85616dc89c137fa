//! Docker engine adapter
//!
//! Wraps the bollard Docker API. Environment and host configuration (binds,
//! `volumes_from`, links, port bindings) are applied when a container is
//! created. A start asking for settings the container was not created with
//! is rejected.

use super::{
    dispose, ContainerState, CreateOutcome, Engine, RemoveOutcome, StartOutcome, StopOutcome,
};
use crate::error::{MapError, Result};
use crate::resolver::{ContainerParams, VolumeParams};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding as DockerPortBinding};
use bollard::Docker;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT: u64 = 120;

/// How to reach the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Local socket or named pipe, or `DOCKER_HOST` when set
    Local,
    /// Unix socket path
    Socket(String),
    /// TCP address
    Http(String),
}

impl Endpoint {
    /// Parse an engine address: `unix://`, `tcp://` or `http://`
    pub fn parse(host: &str) -> Result<Self> {
        if host.starts_with("unix://") {
            Ok(Endpoint::Socket(host.to_string()))
        } else if let Some(rest) = host.strip_prefix("tcp://") {
            Ok(Endpoint::Http(format!("http://{}", rest.trim_end_matches('/'))))
        } else if host.starts_with("http://") {
            Ok(Endpoint::Http(host.trim_end_matches('/').to_string()))
        } else {
            Err(MapError::InvalidConfig(format!(
                "Unsupported engine address '{}'",
                host
            )))
        }
    }
}

/// Docker engine configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub endpoint: Endpoint,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Pull missing images on create
    pub auto_pull: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Local,
            timeout: DEFAULT_TIMEOUT,
            auto_pull: true,
        }
    }
}

impl DockerConfig {
    /// Set endpoint
    pub fn endpoint(mut self, host: &str) -> Result<Self> {
        self.endpoint = Endpoint::parse(host)?;
        Ok(self)
    }
}

/// Engine backed by a Docker-compatible daemon
pub struct DockerEngine {
    docker: Docker,
    config: DockerConfig,
}

impl DockerEngine {
    /// Connect to the engine
    pub fn new(config: DockerConfig) -> Result<Self> {
        let connected = match config.endpoint {
            Endpoint::Local => Docker::connect_with_local_defaults(),
            Endpoint::Socket(ref path) => {
                Docker::connect_with_socket(path, config.timeout, bollard::API_DEFAULT_VERSION)
            }
            Endpoint::Http(ref addr) => {
                Docker::connect_with_http(addr, config.timeout, bollard::API_DEFAULT_VERSION)
            }
        };

        let docker = connected.map_err(|e| {
            MapError::Network(format!(
                "Failed to connect to container engine at {:?}: {}",
                config.endpoint, e
            ))
        })?;
        debug!("Connected to container engine via {:?}", config.endpoint);

        Ok(Self { docker, config })
    }

    /// Connect through the local socket, or `DOCKER_HOST` when set
    pub fn local() -> Result<Self> {
        Self::new(DockerConfig::default())
    }

    /// Pull an image
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let (repository, tag) = split_image(image);
        info!("Pulling image {}:{}", repository, tag);

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: repository,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull: {}", status);
            }
            if let Some(error) = info.error {
                return Err(MapError::Engine(format!("Pull of {} failed: {}", image, error)));
            }
        }

        Ok(())
    }

    /// Create a container, pulling its image once if missing
    async fn create(&self, name: Option<&str>, config: Config<String>) -> Result<CreateOutcome> {
        let image = config.image.clone().unwrap_or_default();
        let mut pulled = false;

        loop {
            let options = name.map(|name| CreateContainerOptions {
                name: name.to_string(),
                ..Default::default()
            });

            match self.docker.create_container(options, config.clone()).await {
                Ok(response) => return Ok(CreateOutcome::Created(response.id)),
                Err(DockerError::DockerResponseServerError {
                    status_code: 409, ..
                }) => return Ok(CreateOutcome::AlreadyExists),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) if self.config.auto_pull && !pulled => {
                    self.pull_image(&image).await?;
                    pulled = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run a command in a throw-away container sharing the volumes of another
    async fn run_and_dispose(&self, image: &str, cmd: &[&str], volumes_from: &str) -> Result<()> {
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(cmd.iter().map(|c| c.to_string()).collect()),
            user: Some("root".to_string()),
            host_config: Some(HostConfig {
                volumes_from: Some(vec![volumes_from.to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let id = match self.create(None, config).await? {
            CreateOutcome::Created(id) => id,
            CreateOutcome::AlreadyExists => {
                return Err(MapError::Engine(format!(
                    "Unnamed helper container for {} reported a conflict",
                    volumes_from
                )))
            }
        };

        let result: Result<()> = async {
            self.docker
                .start_container(&id, None::<StartContainerOptions<String>>)
                .await?;

            let mut wait = self
                .docker
                .wait_container(&id, None::<WaitContainerOptions<String>>);
            while let Some(waited) = wait.next().await {
                match waited {
                    Ok(response) if response.status_code == 0 => {}
                    Ok(response) => return Err(exit_error(cmd, response.status_code, volumes_from)),
                    Err(DockerError::DockerContainerWaitError { code, .. }) => {
                        return Err(exit_error(cmd, code, volumes_from))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
        .await;

        dispose(self, &id, result).await
    }

    /// Apply owner and mode of an attached volume
    async fn initialize_volume(&self, name: &str, params: &VolumeParams) -> Result<()> {
        self.start_container(name, None).await?;

        if let Some(owner) = params.owner() {
            info!("Adjusting owner of {} in {} to {}", params.path, name, owner);
            self.run_and_dispose(
                &params.core_image,
                &["chown", "-R", owner.as_str(), params.path.as_str()],
                name,
            )
            .await?;
        }

        if let Some(ref permissions) = params.permissions {
            info!("Adjusting permissions of {} in {} to {}", params.path, name, permissions);
            self.run_and_dispose(
                &params.core_image,
                &["chmod", "-R", permissions.as_str(), params.path.as_str()],
                name,
            )
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        match self
            .docker
            .inspect_container(name, None::<bollard::container::InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(ContainerState {
                exists: true,
                running: inspect.state.and_then(|s| s.running).unwrap_or(false),
            }),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(ContainerState::absent()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_container(
        &self,
        name: &str,
        params: &ContainerParams,
    ) -> Result<CreateOutcome> {
        debug!("Creating container {} from {}", name, params.image);
        self.create(Some(name), container_config(params)).await
    }

    async fn create_volume_container(
        &self,
        name: &str,
        params: &VolumeParams,
    ) -> Result<CreateOutcome> {
        let config = Config {
            image: Some(params.base_image.clone()),
            volumes: Some(HashMap::from([(params.path.clone(), HashMap::new())])),
            ..Default::default()
        };

        let id = match self.create(Some(name), config).await? {
            CreateOutcome::Created(id) => id,
            CreateOutcome::AlreadyExists => return Ok(CreateOutcome::AlreadyExists),
        };

        // A half-initialized container would later count as already created
        if let Err(e) = self.initialize_volume(name, params).await {
            return dispose(self, name, Err(e)).await;
        }

        Ok(CreateOutcome::Created(id))
    }

    async fn start_container(
        &self,
        name: &str,
        params: Option<&ContainerParams>,
    ) -> Result<StartOutcome> {
        if let Some(params) = params {
            let inspect = self
                .docker
                .inspect_container(name, None::<bollard::container::InspectContainerOptions>)
                .await?;
            let env = inspect.config.and_then(|c| c.env).unwrap_or_default();
            let missing =
                unapplied_settings(params, &inspect.host_config.unwrap_or_default(), &env);
            if !missing.is_empty() {
                return Err(MapError::InvalidConfig(format!(
                    "Container {} was created without {}; remove and create it again to apply",
                    name,
                    missing.join(", ")
                )));
            }
        }

        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(StartOutcome::Started),
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(StartOutcome::AlreadyRunning),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_container(&self, name: &str, timeout: Option<Duration>) -> Result<StopOutcome> {
        let options = timeout.map(|t| StopContainerOptions {
            t: t.as_secs() as i64,
        });

        match self.docker.stop_container(name, options).await {
            Ok(()) => Ok(StopOutcome::Stopped),
            Err(DockerError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => Ok(StopOutcome::NotRunning),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<RemoveOutcome> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(RemoveOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

fn exit_error(cmd: &[&str], code: i64, volumes_from: &str) -> MapError {
    MapError::Engine(format!(
        "{} exited with status {} on {}",
        cmd.join(" "),
        code,
        volumes_from
    ))
}

/// Split an image reference into repository and tag, defaulting to `latest`
fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, tag),
        _ => (image, "latest"),
    }
}

fn port_key(port: &crate::map::PortBinding) -> String {
    format!("{}/{}", port.container_port, port.protocol)
}

/// Container create configuration
fn container_config(params: &ContainerParams) -> Config<String> {
    let volumes: HashMap<String, HashMap<(), ()>> = params
        .volumes
        .iter()
        .map(|path| (path.clone(), HashMap::new()))
        .collect();

    let env: Vec<String> = params
        .environment
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    let mut exposed: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();
    for port in &params.ports {
        let key = port_key(port);
        exposed.insert(key.clone(), HashMap::new());
        if let Some(host_port) = port.host_port {
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(DockerPortBinding {
                    host_ip: port.interface.clone(),
                    host_port: Some(host_port.to_string()),
                });
        }
    }

    Config {
        image: Some(params.image.clone()),
        user: params.user.clone(),
        env: Some(env),
        volumes: Some(volumes),
        exposed_ports: Some(exposed),
        host_config: Some(HostConfig {
            binds: Some(params.binds.iter().map(ToString::to_string).collect()),
            volumes_from: Some(params.volumes_from.clone()),
            links: Some(params.links.iter().map(ToString::to_string).collect()),
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment, binds, `volumes_from` entries and published ports in
/// `params` that the created container does not have
fn unapplied_settings(
    params: &ContainerParams,
    host_config: &HostConfig,
    env: &[String],
) -> Vec<String> {
    let mut missing = Vec::new();

    for (key, value) in &params.environment {
        let variable = format!("{}={}", key, value);
        if !env.contains(&variable) {
            missing.push(format!("environment {}", variable));
        }
    }

    let binds = host_config.binds.as_deref().unwrap_or_default();
    for bind in &params.binds {
        let bind = bind.to_string();
        if !binds.contains(&bind) {
            missing.push(format!("bind {}", bind));
        }
    }

    let volumes_from = host_config.volumes_from.as_deref().unwrap_or_default();
    for provider in &params.volumes_from {
        if !volumes_from.contains(provider) {
            missing.push(format!("volumes from {}", provider));
        }
    }

    for port in params.ports.iter().filter(|p| p.host_port.is_some()) {
        let published = host_config
            .port_bindings
            .as_ref()
            .and_then(|bindings| bindings.get(&port_key(port)))
            .and_then(Option::as_ref)
            .map(|bindings| {
                bindings.iter().any(|b| {
                    b.host_port == port.host_port.map(|p| p.to_string())
                        && (port.interface.is_none() || b.host_ip == port.interface)
                })
            })
            .unwrap_or(false);
        if !published {
            missing.push(format!("port {}", port));
        }
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::PortBinding;
    use crate::resolver::{Bind, Link};

    fn params() -> ContainerParams {
        let mut params = ContainerParams {
            image: "nginx".to_string(),
            volumes: vec!["/data".to_string()],
            binds: vec![Bind {
                host_path: "/srv/data".to_string(),
                container_path: "/data".to_string(),
                read_only: true,
            }],
            volumes_from: vec!["app.log".to_string()],
            links: vec![Link {
                container: "app.db".to_string(),
                alias: "db".to_string(),
            }],
            ports: vec![PortBinding::new(8080, 80)],
            ..Default::default()
        };
        params.environment.insert("MODE".to_string(), "prod".to_string());
        params
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.1:2375").unwrap(),
            Endpoint::Http("http://10.0.0.1:2375".to_string())
        );
        assert_eq!(
            Endpoint::parse("http://engine:2375/").unwrap(),
            Endpoint::Http("http://engine:2375".to_string())
        );
        assert_eq!(
            Endpoint::parse("unix:///var/run/docker.sock").unwrap(),
            Endpoint::Socket("unix:///var/run/docker.sock".to_string())
        );
        assert!(Endpoint::parse("ssh://engine").is_err());
        assert!(Endpoint::parse("https://engine:2376").is_err());
    }

    #[test]
    fn test_split_image() {
        assert_eq!(split_image("nginx"), ("nginx", "latest"));
        assert_eq!(split_image("nginx:1.25"), ("nginx", "1.25"));
        assert_eq!(split_image("registry:5000/app"), ("registry:5000/app", "latest"));
        assert_eq!(split_image("registry:5000/app:2"), ("registry:5000/app", "2"));
    }

    #[test]
    fn test_container_config() {
        let config = container_config(&params());
        assert_eq!(config.image.as_deref(), Some("nginx"));
        assert_eq!(config.env, Some(vec!["MODE=prod".to_string()]));
        assert!(config.volumes.unwrap().contains_key("/data"));
        assert!(config.exposed_ports.unwrap().contains_key("80/tcp"));

        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.binds, Some(vec!["/srv/data:/data:ro".to_string()]));
        assert_eq!(host_config.volumes_from, Some(vec!["app.log".to_string()]));
        assert_eq!(host_config.links, Some(vec!["app.db:db".to_string()]));

        let bindings = host_config.port_bindings.unwrap();
        let published = bindings["80/tcp"].as_ref().unwrap();
        assert_eq!(published[0].host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn test_start_params_match_created() {
        let params = params();
        let config = container_config(&params);
        let env = config.env.unwrap();
        let created = config.host_config.unwrap();
        assert!(unapplied_settings(&params, &created, &env).is_empty());
    }

    #[test]
    fn test_start_params_not_created() {
        let created = container_config(&ContainerParams {
            image: "nginx".to_string(),
            ..Default::default()
        })
        .host_config
        .unwrap();

        let env = vec!["PATH=/usr/bin".to_string()];
        let missing = unapplied_settings(&params(), &created, &env);
        assert_eq!(
            missing,
            vec![
                "environment MODE=prod",
                "bind /srv/data:/data:ro",
                "volumes from app.log",
                "port 8080:80",
            ]
        );

        // Exposed-only ports need no host binding
        let mut exposed = ContainerParams::default();
        exposed.ports.push(PortBinding::exposed(9000));
        assert!(unapplied_settings(&exposed, &created, &env).is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker engine
    async fn test_inspect_missing_container() {
        let engine = DockerEngine::local().unwrap();
        let state = engine.inspect("dockmap-test-missing").await.unwrap();
        assert!(!state.exists);
    }
}
