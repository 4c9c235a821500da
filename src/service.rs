//! The `Service` aggregate (spec §4.D): a declared desired state plus the
//! resolved cross-service references needed to converge it against the
//! engine.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::{CreateContainerParams, Engine, HostConfigParams};
use crate::error::{EngineCoreError, Result};
use crate::identity;
use crate::model::{
    Container, ExternalLinkSpec, LinkSpec, NetRef, ServiceDeclaration, ServiceOrContainer,
};
use crate::parsers;

/// A resolved link target: either one of this project's own services (by
/// name, looked up through the engine at container-build time so `Service`
/// never has to hold a reference to its siblings) or a pre-existing
/// container supplied verbatim.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub target: ServiceOrContainer,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedExternalLink {
    pub container_name: String,
    pub alias: String,
}

const DEFAULT_STOP_TIMEOUT: u32 = 10;
const SCALE_STOP_TIMEOUT: u32 = 1;

pub struct Service {
    pub name: String,
    pub project: String,
    pub declaration: ServiceDeclaration,
    pub links: Vec<ResolvedLink>,
    pub external_links: Vec<ResolvedExternalLink>,
    pub volumes_from: Vec<ServiceOrContainer>,
    pub net: Option<NetRef>,
    pub(crate) engine: Arc<dyn Engine>,
}

impl Service {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        project: String,
        declaration: ServiceDeclaration,
        links: Vec<ResolvedLink>,
        external_links: Vec<ResolvedExternalLink>,
        volumes_from: Vec<ServiceOrContainer>,
        net: Option<NetRef>,
        engine: Arc<dyn Engine>,
    ) -> Result<Self> {
        crate::model::validate_name("service", &name)?;
        crate::model::validate_name("project", &project)?;

        match (&declaration.image, &declaration.build) {
            (Some(_), None) | (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(EngineCoreError::Config(format!(
                    "service \"{name}\" has both image and build declared"
                )));
            }
            (None, None) => {
                return Err(EngineCoreError::Config(format!(
                    "service \"{name}\" has neither image nor build declared"
                )));
            }
        }

        Ok(Self {
            name,
            project,
            declaration,
            links,
            external_links,
            volumes_from,
            net,
            engine,
        })
    }

    pub fn can_be_built(&self) -> bool {
        self.declaration.can_be_built()
    }

    pub fn can_be_scaled(&self) -> bool {
        self.declaration.can_be_scaled()
    }

    /// The image this service's containers run, substituting the project's
    /// build-tag convention when the declaration has `build` rather than
    /// `image` (spec §4.D parameter assembly).
    pub fn full_name(&self) -> String {
        match &self.declaration.image {
            Some(image) => image.clone(),
            None => format!("{}_{}", self.project, self.name),
        }
    }

    pub fn labels(&self, one_off: bool) -> HashMap<String, String> {
        identity::labels_for(&self.project, &self.name, one_off)
    }

    /// Containers carrying this service's three base labels (spec §4.D).
    /// Emits a non-fatal warning if none are found but a legacy-named
    /// container matching this service exists.
    pub async fn containers(&self, include_stopped: bool, one_off: bool) -> Result<Vec<Container>> {
        let labels = self.labels(one_off);
        let mut containers = self.engine.list_containers(true, &labels).await?;
        if !include_stopped {
            containers.retain(|c| c.is_running);
        }

        if containers.is_empty() {
            let all = self.engine.list_containers(true, &HashMap::new()).await?;
            if all
                .iter()
                .any(|c| identity::matches_legacy_name(&c.name, &self.project, &[&self.name]))
            {
                warn!(
                    service = %self.name,
                    project = %self.project,
                    "found containers matching the legacy naming convention but without \
                     compose labels; they are not managed and will be ignored"
                );
            }
        }

        Ok(containers)
    }

    pub async fn next_container_number(&self, one_off: bool) -> Result<u32> {
        let containers = self.containers(true, one_off).await?;
        Ok(containers
            .iter()
            .filter_map(|c| c.number())
            .max()
            .map_or(1, |n| n + 1))
    }

    /// Resolves this service's `links`/`link_to_self`/`external_links` into
    /// the `(container_name, alias)` triples the host config needs (spec
    /// §4.D "Link resolution").
    pub async fn build_links(&self, link_to_self: bool) -> Result<Vec<(String, String)>> {
        let mut links = Vec::new();

        for link in &self.links {
            let containers = match &link.target {
                ServiceOrContainer::Service(name) => self.sibling_containers(name, false).await?,
                ServiceOrContainer::Container(id) => {
                    vec![self.engine.inspect(id).await?]
                }
            };
            let fallback_name = match &link.target {
                ServiceOrContainer::Service(name) => name.clone(),
                ServiceOrContainer::Container(id) => id.clone(),
            };
            for container in &containers {
                let alias = link.alias.clone().unwrap_or_else(|| fallback_name.clone());
                links.push((container.name.clone(), alias));
                links.push((container.name.clone(), container.name.clone()));
                links.push((
                    container.name.clone(),
                    container.name_without_project().to_string(),
                ));
            }
        }

        if link_to_self {
            for container in self.containers(false, true).await? {
                links.push((container.name.clone(), self.name.clone()));
                links.push((container.name.clone(), container.name.clone()));
                links.push((
                    container.name.clone(),
                    container.name_without_project().to_string(),
                ));
            }
        }

        for external in &self.external_links {
            links.push((external.container_name.clone(), external.alias.clone()));
        }

        Ok(links)
    }

    async fn sibling_containers(&self, service_name: &str, _one_off: bool) -> Result<Vec<Container>> {
        let labels = identity::labels_for(&self.project, service_name, false);
        self.engine.list_containers(false, &labels).await
    }

    /// Resolves `volumes_from` to container ids, appending `previous_container`
    /// last so its anonymous volumes are inherited on recreate (spec §4.D.1).
    ///
    /// A source service with no containers yet is a `ConfigurationError`
    /// rather than auto-created (DESIGN.md "volumes_from auto-create"
    /// divergence): `Service` has no handle to sibling `Service`s (only to
    /// their containers, by label), so it cannot assemble a sibling's create
    /// parameters here. `Project::up` never hits this, since dependency
    /// order always brings a `volumes_from` source up first.
    async fn resolve_volumes_from(&self, previous_container: Option<&Container>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for source in &self.volumes_from {
            match source {
                ServiceOrContainer::Service(name) => {
                    let containers = self.sibling_containers(name, false).await?;
                    if containers.is_empty() {
                        return Err(EngineCoreError::Configuration(format!(
                            "service \"{}\" wants volumes_from \"{}\", which has no containers",
                            self.name, name
                        )));
                    }
                    ids.extend(containers.into_iter().map(|c| c.id));
                }
                ServiceOrContainer::Container(id) => ids.push(id.clone()),
            }
        }
        if let Some(previous) = previous_container {
            ids.push(previous.id.clone());
        }
        Ok(ids)
    }

    /// Resolves `net` to the engine's `network_mode` string (spec §4.D
    /// "Network mode resolution").
    async fn resolve_network_mode(&self) -> Result<Option<String>> {
        match &self.net {
            None => Ok(Some("bridge".to_string())),
            Some(NetRef::Bridge) => Ok(Some("bridge".to_string())),
            Some(NetRef::Host) => Ok(Some("host".to_string())),
            Some(NetRef::None) => Ok(Some("none".to_string())),
            Some(NetRef::Container(id)) => Ok(Some(format!("container:{id}"))),
            Some(NetRef::Service(name)) => {
                let containers = self.sibling_containers(name, false).await?;
                match containers.first() {
                    Some(c) => Ok(Some(format!("container:{}", c.id))),
                    None => {
                        warn!(
                            service = %self.name,
                            net_service = %name,
                            "wants to reuse the network stack of a service that is not running"
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    fn hostname_domainname(&self) -> (Option<String>, Option<String>) {
        match (&self.declaration.hostname, &self.declaration.domainname) {
            (Some(hostname), None) if hostname.contains('.') => {
                let mut parts = hostname.splitn(2, '.');
                let host = parts.next().unwrap_or_default().to_string();
                let domain = parts.next().map(str::to_string);
                (Some(host), domain)
            }
            (hostname, domainname) => (hostname.clone(), domainname.clone()),
        }
    }

    fn exposed_ports(&self) -> Result<Vec<String>> {
        let mut ports: Vec<String> = self
            .declaration
            .ports
            .iter()
            .map(|p| parsers::split_port(p).map(|(container_port, _)| container_port))
            .collect::<Result<Vec<_>>>()?;
        ports.extend(self.declaration.expose.iter().cloned());
        ports.sort();
        ports.dedup();
        Ok(ports)
    }

    async fn assemble_create_params(
        &self,
        number: u32,
        one_off: bool,
        previous_container: Option<&Container>,
        name_override: Option<String>,
    ) -> Result<CreateContainerParams> {
        let (hostname, domainname) = self.hostname_domainname();

        let volume_specs: Vec<parsers::VolumeSpec> = self
            .declaration
            .volumes
            .iter()
            .map(|v| parsers::parse_volume_spec(v))
            .collect::<Result<Vec<_>>>()?;

        let volumes: Vec<String> = volume_specs.iter().map(|v| v.internal.clone()).collect();

        let binds: Vec<String> = volume_specs
            .iter()
            .filter(|v| v.external.is_some())
            .map(|v| v.to_string())
            .collect();

        let port_bindings = parsers::build_port_bindings(&self.declaration.ports)?;
        let extra_hosts = parsers::build_extra_hosts(&self.declaration.extra_hosts)?;
        let restart_policy = self
            .declaration
            .restart
            .as_deref()
            .map(parsers::parse_restart_spec)
            .transpose()?;

        let links = self.build_links(one_off).await?;
        let volumes_from = self.resolve_volumes_from(previous_container).await?;
        let network_mode = self.resolve_network_mode().await?;

        let name = name_override.unwrap_or_else(|| {
            identity::container_name(&self.project, &self.name, number, one_off)
        });

        let mut labels = identity::build_container_labels(
            &self.declaration.labels,
            &self.project,
            &self.name,
            one_off,
            number,
        );
        labels.insert(
            identity::CONFIG_HASH_LABEL.to_string(),
            crate::fingerprint::fingerprint(&self.declaration),
        );

        let host_config = HostConfigParams {
            links,
            port_bindings,
            binds,
            volumes_from,
            network_mode,
            dns: self.declaration.dns.clone(),
            dns_search: self.declaration.dns_search.clone(),
            restart_policy,
            cap_add: self.declaration.cap_add.clone(),
            cap_drop: self.declaration.cap_drop.clone(),
            log_driver: self
                .declaration
                .log_driver
                .clone()
                .unwrap_or_else(|| "json-file".to_string()),
            extra_hosts,
            read_only: self.declaration.read_only,
            pid_mode: self.declaration.pid.clone(),
            privileged: self.declaration.privileged,
        };

        Ok(CreateContainerParams {
            name,
            image: self.full_name(),
            hostname,
            domainname,
            exposed_ports: self.exposed_ports()?,
            volumes,
            env: self.declaration.environment.clone(),
            labels,
            host_config,
        })
    }

    /// Creates a container for this service (spec §4.D `create_container`).
    pub async fn create_container(
        &self,
        one_off: bool,
        do_build: bool,
        insecure_registry: bool,
        previous_container: Option<&Container>,
        number: Option<u32>,
    ) -> Result<Container> {
        let number = match number {
            Some(n) => n,
            None => self.next_container_number(one_off).await?,
        };

        let params = self
            .assemble_create_params(number, one_off, previous_container, None)
            .await?;

        if do_build && self.can_be_built() && !self.engine.image_exists(&self.full_name()).await? {
            self.build(false).await?;
        }

        let id = match self.engine.create(params.clone()).await {
            Ok(id) => id,
            Err(e) if e.is_no_such_image() => {
                self.pull(insecure_registry).await?;
                self.engine.create(params).await?
            }
            Err(e) => return Err(e),
        };

        self.engine.inspect(&id).await
    }

    pub async fn start_container_if_stopped(&self, container: &Container) -> Result<()> {
        if !container.is_running {
            info!(name = %container.name, "starting");
            self.engine.start(&container.id).await?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<Vec<Container>> {
        let containers = self.containers(true, false).await?;
        if containers.is_empty() {
            let container = self.create_container(false, true, false, None, None).await?;
            self.engine.start(&container.id).await?;
            return Ok(vec![self.engine.inspect(&container.id).await?]);
        }
        for c in &containers {
            self.start_container_if_stopped(c).await?;
        }
        self.containers(true, false).await
    }

    pub async fn stop(&self, timeout: u32) -> Result<()> {
        for container in self.containers(false, false).await? {
            self.engine.stop(&container.id, timeout).await?;
        }
        Ok(())
    }

    pub async fn kill(&self) -> Result<()> {
        for container in self.containers(false, false).await? {
            self.engine.kill(&container.id).await?;
        }
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        for container in self.containers(true, false).await? {
            self.engine.restart(&container.id).await?;
        }
        Ok(())
    }

    pub async fn remove_stopped(&self) -> Result<()> {
        for container in self.containers(true, false).await? {
            if !container.is_running {
                info!(name = %container.name, "removing");
                self.engine.remove(&container.id, false).await?;
            }
        }
        Ok(())
    }

    /// `convergence_plan(allow_recreate, smart_recreate)` (spec §4.G): the
    /// per-service decision the planner folds into a project-wide plan map.
    /// A container "needs recreation" when `allow_recreate` is set and
    /// either `smart_recreate` wasn't requested or its stamped config-hash
    /// label doesn't match the current declaration's fingerprint (a missing
    /// label, e.g. from a pre-fingerprint container, counts as a mismatch).
    pub async fn convergence_plan(
        &self,
        allow_recreate: bool,
        smart_recreate: bool,
    ) -> Result<(crate::convergence::PlanAction, Vec<Container>)> {
        use crate::convergence::PlanAction;

        let containers = self.containers(true, false).await?;
        if containers.is_empty() {
            return Ok((PlanAction::Create, containers));
        }

        let current_fingerprint = crate::fingerprint::fingerprint(&self.declaration);
        let needs_recreate = |c: &Container| {
            allow_recreate
                && (!smart_recreate || c.config_hash() != Some(current_fingerprint.as_str()))
        };

        let all_running = containers.iter().all(|c| c.is_running);
        let any_needs_recreate = containers.iter().any(needs_recreate);

        if all_running && !any_needs_recreate {
            return Ok((PlanAction::Noop, containers));
        }
        if !any_needs_recreate {
            return Ok((PlanAction::Start, containers));
        }
        if allow_recreate {
            Ok((PlanAction::Recreate, containers))
        } else {
            Ok((PlanAction::Start, containers))
        }
    }

    /// `scale(desired)` (spec §4.D): create up to `desired`, then shuffle
    /// running/stopped state so exactly `desired` end up running, then drop
    /// every remaining stopped container.
    pub async fn scale(&self, desired: u32) -> Result<()> {
        if !self.can_be_scaled() {
            return Err(EngineCoreError::CannotBeScaled(self.name.clone()));
        }

        let mut containers = self.containers(true, false).await?;
        while (containers.len() as u32) < desired {
            let container = self.create_container(false, true, false, None, None).await?;
            containers.push(container);
        }

        let (mut running, mut stopped): (Vec<Container>, Vec<Container>) =
            containers.into_iter().partition(|c| c.is_running);
        running.sort_by_key(|c| c.number().unwrap_or(0));
        stopped.sort_by_key(|c| c.number().unwrap_or(0));

        while running.len() as u32 > desired {
            if let Some(c) = running.pop() {
                info!(name = %c.name, "stopping");
                self.engine.stop(&c.id, SCALE_STOP_TIMEOUT).await?;
                stopped.push(c);
            }
        }

        while (running.len() as u32) < desired {
            if stopped.is_empty() {
                break;
            }
            let c = stopped.remove(0);
            info!(name = %c.name, "starting");
            self.engine.start(&c.id).await?;
            running.push(c);
        }

        self.remove_stopped().await
    }

    /// `recreate_container` (spec §4.D, S4): stop → rename → create with
    /// `previous_container` → start → remove the renamed predecessor.
    pub async fn recreate_container(&self, existing: &Container) -> Result<Container> {
        info!(name = %existing.name, "recreating");

        match self.engine.stop(&existing.id, DEFAULT_STOP_TIMEOUT).await {
            Ok(()) => {}
            Err(e) if e.is_no_such_process() => {}
            Err(e) => return Err(e),
        }

        let renamed = format!(
            "{}_{}",
            existing.short_id(),
            existing.name.trim_start_matches('/')
        );
        self.engine.rename(&existing.id, &renamed).await?;

        let number = existing.number();
        let new_container = self
            .create_container(false, false, false, Some(existing), number)
            .await?;
        self.engine.start(&new_container.id).await?;
        self.engine.remove(&existing.id, false).await?;

        self.engine.inspect(&new_container.id).await
    }

    /// `build(no_cache)` (spec §4.D): streams the build, returning the
    /// image id parsed by the engine from the `Successfully built` line.
    pub async fn build(&self, no_cache: bool) -> Result<String> {
        let context = self.declaration.build.clone().ok_or_else(|| {
            EngineCoreError::Config(format!("service \"{}\" has no build context", self.name))
        })?;
        self.engine
            .build(
                &context,
                &self.full_name(),
                no_cache,
                self.declaration.dockerfile.as_deref(),
            )
            .await
            .map(|id| id.to_string())
    }

    /// `pull(insecure)` (spec §4.D): a no-op for build-only services.
    pub async fn pull(&self, insecure: bool) -> Result<()> {
        let Some(image) = &self.declaration.image else {
            return Ok(());
        };
        let (repo, tag) = parsers::parse_repository_tag(image);
        let tag = if tag.is_empty() {
            "latest".to_string()
        } else {
            tag
        };
        self.engine.pull(&repo, &tag, insecure).await
    }
}

pub fn parse_declared_links(decl: &ServiceDeclaration) -> Vec<LinkSpec> {
    decl.links
        .iter()
        .map(|s| crate::model::parse_link(s))
        .collect()
}

pub fn parse_declared_external_links(decl: &ServiceDeclaration) -> Vec<ExternalLinkSpec> {
    decl.external_links
        .iter()
        .map(|s| crate::model::parse_external_link(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dummy::DummyEngine;
    use std::sync::Arc;

    fn decl_with_image(image: &str) -> ServiceDeclaration {
        ServiceDeclaration {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn make_service(name: &str, decl: ServiceDeclaration, engine: Arc<dyn Engine>) -> Service {
        Service::new(
            name.to_string(),
            "test".to_string(),
            decl,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            engine,
        )
        .unwrap()
    }

    #[test]
    fn rejects_both_image_and_build() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let decl = ServiceDeclaration {
            image: Some("busybox".to_string()),
            build: Some(".".to_string()),
            ..Default::default()
        };
        let result = Service::new(
            "web".to_string(),
            "test".to_string(),
            decl,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            engine,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_neither_image_nor_build() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let result = Service::new(
            "web".to_string(),
            "test".to_string(),
            ServiceDeclaration::default(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            engine,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn next_container_number_starts_at_one() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let service = make_service("web", decl_with_image("busybox"), engine);
        assert_eq!(service.next_container_number(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn next_container_number_is_max_plus_one() {
        let dummy = DummyEngine::new();
        dummy.seed_container(Container {
            id: "a".to_string(),
            name: "/test_web_1".to_string(),
            labels: {
                let mut l = identity::labels_for("test", "web", false);
                l.insert(identity::CONTAINER_NUMBER_LABEL.to_string(), "3".to_string());
                l
            },
            is_running: true,
        });
        let engine: Arc<dyn Engine> = Arc::new(dummy);
        let service = make_service("web", decl_with_image("busybox"), engine);
        assert_eq!(service.next_container_number(false).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn create_container_start_and_inspect() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let service = make_service("web", decl_with_image("busybox"), engine);
        let container = service
            .create_container(false, false, false, None, None)
            .await
            .unwrap();
        assert_eq!(container.number(), Some(1));
    }

    #[tokio::test]
    async fn create_container_rejects_malformed_volume() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let mut decl = decl_with_image("busybox");
        decl.volumes = vec!["/host:/data:oops".to_string()];
        let service = make_service("web", decl, engine);
        let err = service
            .create_container(false, false, false, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid mode"));
    }

    #[tokio::test]
    async fn scale_rejects_host_port_publishing_service() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let mut decl = decl_with_image("busybox");
        decl.ports = vec!["8080:80".to_string()];
        let service = make_service("web", decl, engine);
        assert!(service.scale(2).await.is_err());
    }

    #[tokio::test]
    async fn scale_up_creates_and_starts_containers() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let service = make_service("web", decl_with_image("busybox"), engine);
        service.scale(3).await.unwrap();
        let containers = service.containers(true, false).await.unwrap();
        assert_eq!(containers.len(), 3);
        assert!(containers.iter().all(|c| c.is_running));
    }

    #[tokio::test]
    async fn recreate_container_s4() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let service = make_service("web", decl_with_image("busybox"), engine.clone());
        let old = service
            .create_container(false, false, false, None, None)
            .await
            .unwrap();
        engine.start(&old.id).await.unwrap();
        let old = engine.inspect(&old.id).await.unwrap();

        let new_container = service.recreate_container(&old).await.unwrap();

        assert_ne!(new_container.id, old.id);
        assert_eq!(new_container.number(), old.number());
        let remaining = engine.list_containers(true, &HashMap::new()).await.unwrap();
        assert!(remaining.iter().all(|c| c.id != old.id));
    }
}
