//! Docker-backed sandboxes.
//!
//! Each sandbox is a long-lived, labelled container started from the
//! template's image. Commands run through `docker exec`; killing a sandbox
//! force-removes its container.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    CommandOutput, CreateOptions, FileInfo, FileKind, Provisioner, Sandbox, SandboxError,
    SandboxRef,
};
use crate::config::DockerConfig;
use crate::templates::TemplateCatalog;

/// Label marking containers owned by sandpool.
const MANAGED_LABEL: &str = "sandpool.managed";
/// Label recording the template a container was created from.
const TEMPLATE_LABEL: &str = "sandpool.template";
/// Prefix for metadata labels.
const METADATA_PREFIX: &str = "sandpool.meta.";

/// Provisions sandboxes as local Docker containers.
pub struct DockerProvisioner {
    docker: Docker,
    catalog: Arc<TemplateCatalog>,
    config: DockerConfig,
}

impl DockerProvisioner {
    /// Connects to the local Docker daemon.
    pub async fn connect_local(
        catalog: Arc<TemplateCatalog>,
        config: DockerConfig,
    ) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::unavailable(format!("Failed to connect to Docker: {e}")))?;

        docker.ping().await.map_err(|e| {
            SandboxError::unavailable(format!("Cannot ping Docker daemon. Is Docker running? {e}"))
        })?;

        Ok(Self {
            docker,
            catalog,
            config,
        })
    }

    fn build_container_config(
        &self,
        template_id: &str,
        image: &str,
        options: &CreateOptions,
    ) -> Result<ContainerConfig<String>, SandboxError> {
        let memory = parse_memory_limit(&self.config.memory)?;
        let cpus = self.config.cpus.parse::<f64>().unwrap_or(1.0);
        #[allow(clippy::cast_possible_truncation)]
        let nano_cpus = (cpus * 1_000_000_000.0) as i64;

        Ok(ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(self.config.keepalive.clone()),
            working_dir: Some("/home/user".to_string()),
            labels: Some(container_labels(template_id, options)),
            host_config: Some(bollard::service::HostConfig {
                memory: Some(memory),
                nano_cpus: Some(nano_cpus),
                network_mode: Some(self.config.network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        info!(image = %image, "Pulling sandbox image");

        let pull_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(pull_options), None, None);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(SandboxError::image_not_found(format!("{image}: {error}")));
                    }
                }
                Err(e) => return Err(map_docker_error(e, image)),
            }
        }

        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        config: ContainerConfig<String>,
    ) -> Result<String, DockerError> {
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                config,
            )
            .await?;
        Ok(response.id)
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(
        &self,
        template_id: &str,
        options: &CreateOptions,
    ) -> Result<SandboxRef, SandboxError> {
        let template = self.catalog.resolve(template_id);
        let image = template.image();
        let name = container_name();
        let config = self.build_container_config(template_id, image, options)?;

        debug!(container = %name, image = %image, "Creating sandbox container");
        let id = match self.create_container(&name, config.clone()).await {
            Ok(id) => id,
            Err(e) if is_status(&e, 404) => {
                // Image is missing locally; pull once and retry
                self.pull_image(image).await?;
                self.create_container(&name, config)
                    .await
                    .map_err(|e| SandboxError::create_failed(template_id, e.to_string()))?
            }
            Err(e) => return Err(SandboxError::create_failed(template_id, e.to_string())),
        };

        if let Err(e) = self.docker.start_container::<String>(&id, None).await {
            let removed = self
                .docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            cleanup_succeeded(&id, removed);
            return Err(SandboxError::create_failed(template_id, e.to_string()));
        }

        info!(sandbox_id = %id, template = %template_id, "Started sandbox container");
        Ok(Arc::new(DockerSandbox {
            docker: self.docker.clone(),
            id,
        }))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxRef, SandboxError> {
        let info = self
            .docker
            .inspect_container(sandbox_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_docker_error(e, sandbox_id))?;

        let running = info
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        if !running {
            return Err(SandboxError::connect_failed(
                sandbox_id,
                "container is not running",
            ));
        }

        Ok(Arc::new(DockerSandbox {
            docker: self.docker.clone(),
            id: info.id.unwrap_or_else(|| sandbox_id.to_string()),
        }))
    }
}

/// A running sandbox container.
pub struct DockerSandbox {
    docker: Docker,
    id: String,
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        debug!(sandbox_id = %self.id, "Removing sandbox container");
        self.docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_docker_error(e, &self.id))
    }

    async fn run_command(&self, cmd: &str) -> Result<CommandOutput, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", cmd]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_docker_error(e, &self.id))?;

        let mut output = CommandOutput::default();

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::command_failed(e.to_string()))?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => {
                        warn!(sandbox_id = %self.id, "Error reading exec output: {}", e);
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::command_failed(e.to_string()))?;
        output.exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(output)
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        let output = self.run_command(&list_command(path)).await?;
        if !output.success() {
            return Err(SandboxError::command_failed(format!(
                "ls {path} exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(parse_listing(path, &output.stdout))
    }
}

/// Unique container name for a new sandbox.
fn container_name() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("sandpool-{}", &uuid[..12])
}

fn container_labels(template_id: &str, options: &CreateOptions) -> HashMap<String, String> {
    let mut labels: HashMap<String, String> = options
        .metadata
        .iter()
        .map(|(k, v)| (format!("{METADATA_PREFIX}{k}"), v.clone()))
        .collect();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(TEMPLATE_LABEL.to_string(), template_id.to_string());
    labels.insert(
        format!("{METADATA_PREFIX}timeout_secs"),
        options.timeout.as_secs().to_string(),
    );
    labels
}

/// Logs a failed removal of a container that never started. A container
/// that is already gone counts as cleaned up.
fn cleanup_succeeded(container: &str, result: Result<(), DockerError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if is_status(&e, 404) => true,
        Err(e) => {
            warn!(container = %container, error = %e, "Failed to remove container after start failure, it may be orphaned");
            false
        }
    }
}

fn is_status(err: &DockerError, status: u16) -> bool {
    matches!(err, DockerError::DockerResponseServerError { status_code, .. } if *status_code == status)
}

fn map_docker_error(err: DockerError, subject: &str) -> SandboxError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => SandboxError::not_found(subject),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => SandboxError::request(format!("Docker returned {status_code}: {message}")),
        other => SandboxError::unavailable(other.to_string()),
    }
}

/// Shell command listing one directory, one entry per line, dirs suffixed with `/`.
fn list_command(path: &str) -> String {
    format!("ls -1Ap -- {}", shell_words::quote(path))
}

/// Parse `ls -1Ap` output into directory entries.
fn parse_listing(dir: &str, stdout: &str) -> Vec<FileInfo> {
    let base = dir.trim_end_matches('/');
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, kind) = match line.strip_suffix('/') {
                Some(name) => (name, FileKind::Dir),
                None => (line, FileKind::File),
            };
            FileInfo {
                name: name.to_string(),
                path: format!("{base}/{name}"),
                kind,
            }
        })
        .collect()
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64, SandboxError> {
    let limit = limit.to_lowercase();
    let invalid = |_| SandboxError::create_failed("*", format!("Invalid memory limit: {limit}"));

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().map_err(invalid)?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().map_err(invalid)?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().map_err(invalid)
    }
}
