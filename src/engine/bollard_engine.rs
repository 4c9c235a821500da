//! `Engine` implementation on top of `bollard`, grounded in the teacher's
//! `docker/containers.rs` and `docker/images.rs` (list/create/start/stop,
//! tar build context, streamed build/pull) but reshaped to the opaque
//! `Engine` trait rather than a bespoke manager per resource kind.

use std::collections::HashMap;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RenameContainerOptions, RestartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions, ListImagesOptions};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use futures_util::StreamExt;
use regex::Regex;
use tracing::{info, warn};

use super::{CreateContainerParams, Engine};
use crate::error::{EngineCoreError, Result};
use crate::model::Container as CoreContainer;

pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect_with_local_defaults() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(to_engine_error)?;
        Ok(Self::new(docker))
    }
}

fn to_engine_error(e: BollardError) -> EngineCoreError {
    match e {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineCoreError::Engine {
            status: status_code,
            explanation: message,
        },
        other => EngineCoreError::Engine {
            status: 0,
            explanation: other.to_string(),
        },
    }
}

fn to_core_container(summary: bollard::models::ContainerSummary) -> CoreContainer {
    let id = summary.id.unwrap_or_default();
    let name = summary
        .names
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or_default();
    let labels = summary.labels.unwrap_or_default();
    let is_running = summary.state.as_deref() == Some("running");
    CoreContainer {
        id,
        name,
        labels,
        is_running,
    }
}

#[async_trait::async_trait]
impl Engine for BollardEngine {
    async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<CoreContainer>> {
        let filters: HashMap<String, Vec<String>> = [(
            "label".to_string(),
            label_filter
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
        )]
        .into_iter()
        .collect();

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(to_engine_error)?;

        Ok(containers.into_iter().map(to_core_container).collect())
    }

    async fn inspect(&self, id: &str) -> Result<CoreContainer> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(to_engine_error)?;

        Ok(CoreContainer {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            name: inspect.name.unwrap_or_default(),
            labels: inspect
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
            is_running: inspect
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
        })
    }

    async fn create(&self, params: CreateContainerParams) -> Result<String> {
        let host_config = build_host_config(&params);

        let exposed_ports = if params.exposed_ports.is_empty() {
            None
        } else {
            Some(
                params
                    .exposed_ports
                    .iter()
                    .map(|p| (p.clone(), HashMap::new()))
                    .collect(),
            )
        };

        let volumes = if params.volumes.is_empty() {
            None
        } else {
            Some(
                params
                    .volumes
                    .iter()
                    .map(|v| (v.clone(), HashMap::new()))
                    .collect(),
            )
        };

        let config = Config {
            image: Some(params.image.clone()),
            hostname: params.hostname.clone(),
            domainname: params.domainname.clone(),
            exposed_ports,
            volumes,
            env: if params.env.is_empty() {
                None
            } else {
                Some(params.env.clone())
            },
            labels: Some(params.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: params.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(to_engine_error)?;

        info!(name = %params.name, id = %response.id, "container created");
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(to_engine_error)?;
        info!(id, "container started");
        Ok(())
    }

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<()> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: timeout_secs as i64,
                }),
            )
            .await
            .map_err(to_engine_error)?;
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(to_engine_error)
    }

    async fn restart(&self, id: &str) -> Result<()> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(to_engine_error)
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        self.docker
            .rename_container(
                id,
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await
            .map_err(to_engine_error)
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(to_engine_error)?;
        info!(id, "container removed");
        Ok(())
    }

    async fn pull(&self, repo: &str, tag: &str, insecure: bool) -> Result<()> {
        if insecure {
            warn!(repo, "pulling from an insecure registry");
        }

        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(event) = stream.next().await {
            event.map_err(to_engine_error)?;
        }
        info!(repo, tag, "pull complete");
        Ok(())
    }

    async fn build(
        &self,
        context_path: &str,
        tag: &str,
        nocache: bool,
        dockerfile: Option<&str>,
    ) -> Result<String> {
        let tar_bytes = build_context_tar(context_path).map_err(|e| EngineCoreError::Build {
            service: tag.to_string(),
            reason: e.to_string(),
        })?;

        let options = BuildImageOptions {
            t: tag,
            rm: true,
            nocache,
            dockerfile: dockerfile.unwrap_or("Dockerfile"),
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(tar_bytes.into()));

        let built_id_re = Regex::new(r"Successfully built ([0-9a-f]+)").unwrap();
        let mut image_id = None;
        while let Some(event) = stream.next().await {
            let output = event.map_err(to_engine_error)?;
            if let Some(stream_msg) = &output.stream {
                if let Some(caps) = built_id_re.captures(stream_msg) {
                    image_id = Some(caps[1].to_string());
                }
            }
            if let Some(error) = &output.error {
                return Err(EngineCoreError::Build {
                    service: tag.to_string(),
                    reason: error.clone(),
                });
            }
        }

        image_id.ok_or_else(|| EngineCoreError::Build {
            service: tag.to_string(),
            reason: "no \"Successfully built\" line in build output".to_string(),
        })
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        let filters: HashMap<String, Vec<String>> =
            [("reference".to_string(), vec![reference.to_string()])]
                .into_iter()
                .collect();

        let images = self
            .docker
            .list_images(Some(ListImagesOptions {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(to_engine_error)?;

        Ok(!images.is_empty())
    }

    async fn version(&self) -> Result<String> {
        let version = self.docker.version().await.map_err(to_engine_error)?;
        Ok(version.version.unwrap_or_default())
    }
}

fn build_host_config(params: &CreateContainerParams) -> HostConfig {
    let hc = &params.host_config;

    let port_bindings = if hc.port_bindings.is_empty() {
        None
    } else {
        Some(
            hc.port_bindings
                .iter()
                .map(|(port, bindings)| {
                    let bindings = bindings
                        .iter()
                        .map(|b| PortBinding {
                            host_ip: b.host_ip.clone(),
                            host_port: b.host_port.clone(),
                        })
                        .collect();
                    (port.clone(), Some(bindings))
                })
                .collect(),
        )
    };

    let restart_policy = hc.restart_policy.as_ref().map(|r| RestartPolicy {
        name: restart_policy_name(&r.name),
        maximum_retry_count: Some(r.max_retry as i64),
    });

    HostConfig {
        links: if hc.links.is_empty() {
            None
        } else {
            Some(
                hc.links
                    .iter()
                    .map(|(container, alias)| format!("{container}:{alias}"))
                    .collect(),
            )
        },
        port_bindings,
        binds: if hc.binds.is_empty() {
            None
        } else {
            Some(hc.binds.clone())
        },
        volumes_from: if hc.volumes_from.is_empty() {
            None
        } else {
            Some(hc.volumes_from.clone())
        },
        network_mode: hc.network_mode.clone(),
        dns: if hc.dns.is_empty() {
            None
        } else {
            Some(hc.dns.clone())
        },
        dns_search: if hc.dns_search.is_empty() {
            None
        } else {
            Some(hc.dns_search.clone())
        },
        restart_policy,
        cap_add: if hc.cap_add.is_empty() {
            None
        } else {
            Some(hc.cap_add.clone())
        },
        cap_drop: if hc.cap_drop.is_empty() {
            None
        } else {
            Some(hc.cap_drop.clone())
        },
        extra_hosts: if hc.extra_hosts.is_empty() {
            None
        } else {
            Some(
                hc.extra_hosts
                    .iter()
                    .map(|(host, ip)| format!("{host}:{ip}"))
                    .collect(),
            )
        },
        read_only_rootfs: Some(hc.read_only),
        pid_mode: hc.pid_mode.clone(),
        privileged: Some(hc.privileged),
        log_config: Some(bollard::models::HostConfigLogConfig {
            typ: Some(hc.log_driver.clone()),
            config: None,
        }),
        ..Default::default()
    }
}

fn restart_policy_name(name: &str) -> Option<RestartPolicyNameEnum> {
    match name {
        "always" => Some(RestartPolicyNameEnum::ALWAYS),
        "on-failure" => Some(RestartPolicyNameEnum::ON_FAILURE),
        "unless-stopped" => Some(RestartPolicyNameEnum::UNLESS_STOPPED),
        "no" | "" => Some(RestartPolicyNameEnum::NO),
        _ => None,
    }
}

/// Packs a build context directory into an in-memory tar archive, the way
/// the teacher's `ImageBuilder::create_build_context` does for a rendered
/// Dockerfile and extra files, generalized to an arbitrary directory tree.
fn build_context_tar(context_path: &str) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.append_dir_all(".", context_path)?;
    archive.finish()?;
    archive.into_inner()
}
