//! The `Project` aggregate (spec §4.F): a named collection of services,
//! resolved from declarations, with project-wide lifecycle operations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::dependency::{self, NamedDeclaration};
use crate::engine::Engine;
use crate::error::{EngineCoreError, Result};
use crate::identity;
use crate::model::{self, Container, NetRef, ServiceOrContainer};
use crate::service::{ResolvedExternalLink, ResolvedLink, Service};

const DEFAULT_STOP_TIMEOUT: u32 = 10;

pub struct Project {
    pub name: String,
    pub namespace: String,
    pub services: Vec<Service>,
    pub external_projects: Vec<Project>,
}

impl Project {
    /// Sorts `declarations` via [`dependency::sort`], then constructs a
    /// `Service` per declaration in that order, resolving `links` /
    /// `volumes_from` / `net` against the services already constructed (own
    /// project first, falling back to `externals`) plus bare container ids
    /// supplied out of band (spec §4.F).
    pub fn from_declarations(
        name: String,
        decls: Vec<NamedDeclaration>,
        engine: Arc<dyn Engine>,
        namespace: Option<String>,
        externals: Vec<Project>,
    ) -> Result<Self> {
        let namespace = namespace.unwrap_or_else(|| name.clone());
        let sorted = dependency::sort(decls)?;

        let mut project = Project {
            name,
            namespace,
            services: Vec::new(),
            external_projects: externals,
        };

        for named in sorted {
            let service_name = named.name.clone();
            let decl = named.declaration;

            let links = project.resolve_links(&service_name, &decl.links)?;
            let external_links = project.resolve_external_links(&decl.external_links);
            let volumes_from =
                project.resolve_volumes_from(&service_name, &decl.volumes_from)?;
            let net = project.resolve_net(&service_name, decl.net.as_deref())?;

            let service = Service::new(
                service_name,
                project.name.clone(),
                decl,
                links,
                external_links,
                volumes_from,
                net,
                engine.clone(),
            )?;
            project.services.push(service);
        }

        Ok(project)
    }

    fn resolve_links(&self, owner: &str, raw_links: &[String]) -> Result<Vec<ResolvedLink>> {
        raw_links
            .iter()
            .map(|raw| {
                let link = model::parse_link(raw);
                if self.find_own_service(&link.target).is_none() {
                    return Err(EngineCoreError::Configuration(format!(
                        "Service \"{owner}\" has a link to service \"{}\" which does not exist.",
                        link.target
                    )));
                }
                Ok(ResolvedLink {
                    target: ServiceOrContainer::Service(link.target),
                    alias: link.alias,
                })
            })
            .collect()
    }

    fn resolve_external_links(&self, raw: &[String]) -> Vec<ResolvedExternalLink> {
        raw.iter()
            .map(|s| {
                let link = model::parse_external_link(s);
                ResolvedExternalLink {
                    container_name: link.container,
                    alias: link.alias,
                }
            })
            .collect()
    }

    fn resolve_volumes_from(
        &self,
        owner: &str,
        raw: &[String],
    ) -> Result<Vec<ServiceOrContainer>> {
        raw.iter()
            .map(|source| {
                if self.find_own_service(source).is_some() {
                    Ok(ServiceOrContainer::Service(source.clone()))
                } else {
                    // Not a known service in this project: treated as a bare
                    // container id. Whether it actually exists is validated
                    // lazily by the engine at create time (spec §4.F:
                    // "Reference-resolution errors produce ConfigurationError
                    // naming both sides" covers the service case; an
                    // unresolvable container id surfaces as an engine error).
                    Ok(ServiceOrContainer::Container(source.clone()))
                }
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e: EngineCoreError| {
                EngineCoreError::Configuration(format!(
                    "Service \"{owner}\" mounts volumes from a reference that does not resolve: {e}"
                ))
            })
    }

    fn resolve_net(&self, owner: &str, raw: Option<&str>) -> Result<Option<NetRef>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let net = model::parse_net_spec(raw);
        if let NetRef::Service(name) = &net {
            if self.find_own_service(name).is_none() {
                return Err(EngineCoreError::Configuration(format!(
                    "Service \"{owner}\" is trying to use the network of \"{name}\", which is not the name of a service or container."
                )));
            }
        }
        Ok(Some(net))
    }

    fn find_own_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// `get_service(name)` (spec §4.F): `project_service` lookups split at
    /// the last `_`, own project first, else namespace-qualified external
    /// projects.
    pub fn get_service(&self, name: &str) -> Result<&Service> {
        if let Some((project_ref, service_part)) = name.rsplit_once('_') {
            let project_ref = if project_ref == self.namespace {
                self.namespace.clone()
            } else {
                format!("{}{}", self.namespace, project_ref)
            };

            if project_ref == self.name {
                if let Some(service) = self.find_own_service(service_part) {
                    return Ok(service);
                }
            }

            for external in &self.external_projects {
                if external.name == project_ref {
                    return external.get_service(service_part);
                }
            }

            return Err(EngineCoreError::NoSuchService(name.to_string()));
        }

        self.find_own_service(name)
            .ok_or_else(|| EngineCoreError::NoSuchService(name.to_string()))
    }

    fn validate_service_names(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.get_service(name)?;
        }
        Ok(())
    }

    /// `get_services(names, include_deps)` (spec §4.F): preserves original
    /// ordering, optionally folding in each service's dependencies
    /// recursively before itself, deduplicated by first occurrence.
    pub fn get_services(
        &self,
        service_names: Option<&[String]>,
        include_deps: bool,
    ) -> Result<Vec<&Service>> {
        let names: Vec<String> = match service_names {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => self.services.iter().map(|s| s.name.clone()).collect(),
        };

        for name in &names {
            self.get_service(name)?;
        }

        let selected: Vec<&Service> = self
            .services
            .iter()
            .filter(|s| names.iter().any(|n| n == &s.name))
            .collect();

        let ordered = if include_deps {
            let mut acc: Vec<&Service> = Vec::new();
            for service in selected {
                self.inject_deps(service, &mut acc)?;
            }
            acc
        } else {
            selected
        };

        let mut uniques: Vec<&Service> = Vec::new();
        for service in ordered {
            if !uniques.iter().any(|s| s.name == service.name) {
                uniques.push(service);
            }
        }
        Ok(uniques)
    }

    fn inject_deps<'a>(&'a self, service: &'a Service, acc: &mut Vec<&'a Service>) -> Result<()> {
        for dep_name in self.dependency_names(service) {
            if let Some(dep) = self.find_own_service(&dep_name) {
                self.inject_deps(dep, acc)?;
            }
        }
        acc.push(service);
        Ok(())
    }

    fn dependency_names(&self, service: &Service) -> Vec<String> {
        let mut names = Vec::new();
        for link in &service.links {
            if let ServiceOrContainer::Service(name) = &link.target {
                names.push(name.clone());
            }
        }
        for source in &service.volumes_from {
            if let ServiceOrContainer::Service(name) = source {
                names.push(name.clone());
            }
        }
        if let Some(NetRef::Service(name)) = &service.net {
            names.push(name.clone());
        }
        names
    }

    /// `containers(service_names, stopped, one_off)` (spec §4.F): engine
    /// listing filtered by project labels, then by service-name membership.
    pub async fn containers(
        &self,
        service_names: Option<&[String]>,
        stopped: bool,
        one_off: bool,
    ) -> Result<Vec<Container>> {
        if let Some(names) = service_names {
            self.validate_service_names(names)?;
        }

        let labels = identity::project_labels_for(&self.name, one_off);

        let mut containers = self.engine().list_containers(stopped, &labels).await?;
        if let Some(names) = service_names {
            containers.retain(|c| c.service().is_some_and(|s| names.iter().any(|n| n == s)));
        }
        Ok(containers)
    }

    fn engine(&self) -> &Arc<dyn Engine> {
        // Every service shares the same engine handle; borrowed from the
        // first service for project-wide listing calls.
        self.services
            .first()
            .map(|s| &s.engine)
            .expect("a project with no services has nothing to list")
    }

    pub async fn start(&self, service_names: Option<&[String]>) -> Result<()> {
        for service in self.get_services(service_names, false)? {
            service.start().await?;
        }
        Ok(())
    }

    pub async fn stop(&self, service_names: Option<&[String]>, timeout: u32) -> Result<()> {
        for service in self.get_services(service_names, false)?.into_iter().rev() {
            service.stop(timeout).await?;
        }
        Ok(())
    }

    pub async fn kill(&self, service_names: Option<&[String]>) -> Result<()> {
        for service in self.get_services(service_names, false)?.into_iter().rev() {
            service.kill().await?;
        }
        Ok(())
    }

    pub async fn restart(&self, service_names: Option<&[String]>) -> Result<()> {
        for service in self.get_services(service_names, false)? {
            service.restart().await?;
        }
        Ok(())
    }

    pub async fn build(&self, service_names: Option<&[String]>, no_cache: bool) -> Result<()> {
        for service in self.get_services(service_names, false)? {
            if service.can_be_built() {
                service.build(no_cache).await?;
            } else {
                info!(service = %service.name, "uses an image, skipping build");
            }
        }
        Ok(())
    }

    pub async fn pull(&self, service_names: Option<&[String]>, insecure: bool) -> Result<()> {
        for service in self.get_services(service_names, true)? {
            service.pull(insecure).await?;
        }
        Ok(())
    }

    pub async fn remove_stopped(&self, service_names: Option<&[String]>) -> Result<()> {
        for service in self.get_services(service_names, false)? {
            service.remove_stopped().await?;
        }
        Ok(())
    }

    /// `up` (spec §4.F): plan then execute convergence over the selected
    /// services (plus their dependencies, unless `start_deps` is false).
    pub async fn up(
        &self,
        service_names: Option<&[String]>,
        options: &ProjectUpOptions,
    ) -> Result<Vec<Container>> {
        let services = self.get_services(service_names, options.start_deps)?;

        let plans = crate::convergence::plan(
            &services,
            options.allow_recreate,
            options.smart_recreate,
            options.fresh_start,
        )
        .await?;

        crate::convergence::execute(&services, &plans, options.insecure_registry, options.do_build)
            .await
    }
}

impl Default for ProjectUpOptions {
    fn default() -> Self {
        Self {
            start_deps: true,
            allow_recreate: true,
            smart_recreate: false,
            insecure_registry: false,
            do_build: true,
            fresh_start: false,
            timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Options for `Project::up` (spec §4.F `up`, §9 `fresh_start` resolution).
#[derive(Debug, Clone)]
pub struct ProjectUpOptions {
    pub start_deps: bool,
    pub allow_recreate: bool,
    pub smart_recreate: bool,
    pub insecure_registry: bool,
    pub do_build: bool,
    pub fresh_start: bool,
    pub timeout: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dummy::DummyEngine;
    use crate::model::ServiceDeclaration;

    fn decl(image: &str) -> ServiceDeclaration {
        ServiceDeclaration {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn build_test_project(engine: Arc<dyn Engine>) -> Project {
        let declarations = vec![
            NamedDeclaration {
                name: "web".to_string(),
                declaration: ServiceDeclaration {
                    links: vec!["db".to_string()],
                    ..decl("busybox")
                },
            },
            NamedDeclaration {
                name: "db".to_string(),
                declaration: decl("busybox"),
            },
        ];
        Project::from_declarations("test".to_string(), declarations, engine, None, Vec::new())
            .unwrap()
    }

    #[test]
    fn from_declarations_orders_db_before_web() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = build_test_project(engine);
        let names: Vec<&str> = project.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["db", "web"]);
    }

    #[test]
    fn unresolvable_link_is_configuration_error() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let declarations = vec![NamedDeclaration {
            name: "web".to_string(),
            declaration: ServiceDeclaration {
                links: vec!["missing".to_string()],
                ..decl("busybox")
            },
        }];
        let result =
            Project::from_declarations("test".to_string(), declarations, engine, None, Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn get_service_by_bare_name() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = build_test_project(engine);
        assert!(project.get_service("web").is_ok());
        assert!(project.get_service("nope").is_err());
    }

    #[test]
    fn get_services_include_deps_prepends_dependency() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = build_test_project(engine);
        let names = vec!["web".to_string()];
        let services = project.get_services(Some(&names), true).unwrap();
        let order: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["db", "web"]);
    }

    #[tokio::test]
    async fn start_brings_up_all_services() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = build_test_project(engine);
        project.start(None).await.unwrap();
        let containers = project.containers(None, true, false).await.unwrap();
        assert_eq!(containers.len(), 2);
    }
}
