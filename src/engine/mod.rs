//! The Engine Client Interface (spec §4.A): the capability set the core
//! requires from a container engine, kept intentionally opaque — callers
//! never inspect transport-level detail, only the `EngineCoreError::Engine`
//! taxonomy on failure.

pub mod bollard_engine;
pub mod dummy;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::Container;
use crate::parsers::{HostBinding, RestartSpec};

/// The host-config-only parameters (spec §4.D: keys that apply at start
/// time, not create time). Transmitted as part of one create call by
/// `BollardEngine` since the modern Docker Engine API has no separate
/// start-time host config, but kept as a distinct type so `Service`
/// continues to assemble "create options" and "host config" the way
/// spec §4.D describes, and so the start-key-stripping invariant stays
/// type-checked rather than stringly-enforced.
#[derive(Debug, Clone, Default)]
pub struct HostConfigParams {
    pub links: Vec<(String, String)>,
    pub port_bindings: HashMap<String, Vec<HostBinding>>,
    pub binds: Vec<String>,
    pub volumes_from: Vec<String>,
    pub network_mode: Option<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub restart_policy: Option<RestartSpec>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub log_driver: String,
    pub extra_hosts: HashMap<String, String>,
    pub read_only: bool,
    pub pid_mode: Option<String>,
    pub privileged: bool,
}

/// The full set of parameters for a container-create call (spec §4.D
/// parameter assembly).
#[derive(Debug, Clone, Default)]
pub struct CreateContainerParams {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub exposed_ports: Vec<String>,
    pub volumes: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub host_config: HostConfigParams,
}

/// A streamed pull/build event (spec §5: "streaming operations emit a
/// sequence of events; consumers must drain them to completion").
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Progress(String),
    Error(String),
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<Container>>;

    async fn inspect(&self, id: &str) -> Result<Container>;

    async fn create(&self, params: CreateContainerParams) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<()>;

    async fn kill(&self, id: &str) -> Result<()>;

    async fn restart(&self, id: &str) -> Result<()>;

    async fn rename(&self, id: &str, new_name: &str) -> Result<()>;

    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Pulls `repo:tag`, draining the event stream to completion (spec §5).
    async fn pull(&self, repo: &str, tag: &str, insecure: bool) -> Result<()>;

    /// Builds the image at `context_path` tagged `tag`, draining the build
    /// stream and returning the built image id parsed from a
    /// `Successfully built <hex>` line (spec §4.D `build`).
    async fn build(
        &self,
        context_path: &str,
        tag: &str,
        nocache: bool,
        dockerfile: Option<&str>,
    ) -> Result<String>;

    async fn image_exists(&self, reference: &str) -> Result<bool>;

    async fn version(&self) -> Result<String>;
}
