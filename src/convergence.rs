//! The convergence planner and executor (spec §4.G/H): decide, then apply,
//! a per-service action from its existing containers and its dependencies'
//! already-computed plans.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::model::{Container, ServiceOrContainer};
use crate::service::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Noop,
    Start,
    Recreate,
    Create,
}

#[derive(Debug, Clone)]
pub struct ConvergencePlan {
    pub action: PlanAction,
    pub containers: Vec<Container>,
}

/// Computes a `{service_name -> plan}` map for `services`, in the order
/// given (expected to already be dependency order). A dependency whose plan
/// is `recreate` forces `smart_recreate` off for anything depending on it,
/// since its upstream identity is about to change (spec §4.G).
pub async fn plan(
    services: &[&Service],
    allow_recreate: bool,
    smart_recreate: bool,
    fresh_start: bool,
) -> Result<HashMap<String, ConvergencePlan>> {
    let mut plans: HashMap<String, ConvergencePlan> = HashMap::new();

    for service in services {
        if fresh_start {
            let containers = service.containers(true, false).await?;
            let action = if containers.is_empty() {
                PlanAction::Create
            } else {
                PlanAction::Recreate
            };
            debug!(service = %service.name, ?action, "fresh_start forces recreate");
            plans.insert(service.name.clone(), ConvergencePlan { action, containers });
            continue;
        }

        let dependency_names = service_dependency_names(service);
        let has_upstream_changes = dependency_names.iter().any(|name| {
            plans
                .get(name)
                .is_some_and(|p| p.action == PlanAction::Recreate)
        });

        let effective_smart_recreate = smart_recreate && !has_upstream_changes;
        if has_upstream_changes {
            debug!(service = %service.name, "has upstream changes, disabling smart_recreate");
        }

        let (action, containers) = service
            .convergence_plan(allow_recreate, effective_smart_recreate)
            .await?;
        debug!(service = %service.name, ?action, "convergence plan decided");

        plans.insert(service.name.clone(), ConvergencePlan { action, containers });
    }

    Ok(plans)
}

fn service_dependency_names(service: &Service) -> Vec<String> {
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
    if let Some(crate::model::NetRef::Service(name)) = &service.net {
        names.push(name.clone());
    }
    names
}

/// Executes `plans` against `services`, in the order given, returning the
/// union of resulting containers in that same order (spec §4.H).
pub async fn execute(
    services: &[&Service],
    plans: &HashMap<String, ConvergencePlan>,
    insecure_registry: bool,
    do_build: bool,
) -> Result<Vec<Container>> {
    let mut result = Vec::new();

    for service in services {
        let plan = plans
            .get(&service.name)
            .expect("plan map covers every service passed to execute");

        let containers = match plan.action {
            PlanAction::Create => {
                let container = service
                    .create_container(false, do_build, insecure_registry, None, None)
                    .await?;
                service.start_container_if_stopped(&container).await?;
                vec![container]
            }
            PlanAction::Start => {
                for container in &plan.containers {
                    service.start_container_if_stopped(container).await?;
                }
                service.containers(true, false).await?
            }
            PlanAction::Recreate => {
                let mut recreated = Vec::with_capacity(plan.containers.len());
                for container in &plan.containers {
                    recreated.push(service.recreate_container(container).await?);
                }
                recreated
            }
            PlanAction::Noop => plan.containers.clone(),
        };

        result.extend(containers);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::NamedDeclaration;
    use crate::engine::dummy::DummyEngine;
    use crate::engine::Engine;
    use crate::model::ServiceDeclaration;
    use crate::project::Project;
    use std::sync::Arc;

    fn decl(image: &str) -> ServiceDeclaration {
        ServiceDeclaration {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn single_service_project(engine: Arc<dyn Engine>) -> Project {
        let declarations = vec![NamedDeclaration {
            name: "web".to_string(),
            declaration: decl("busybox"),
        }];
        Project::from_declarations("test".to_string(), declarations, engine, None, Vec::new())
            .unwrap()
    }

    #[tokio::test]
    async fn empty_project_plans_create() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = single_service_project(engine);
        let services: Vec<&Service> = project.services.iter().collect();
        let plans = plan(&services, true, false, false).await.unwrap();
        assert_eq!(plans["web"].action, PlanAction::Create);
    }

    #[tokio::test]
    async fn execute_create_then_plan_is_noop() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = single_service_project(engine);
        let services: Vec<&Service> = project.services.iter().collect();

        let plans = plan(&services, true, false, false).await.unwrap();
        let containers = execute(&services, &plans, false, true).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert!(containers[0].is_running);

        let plans = plan(&services, true, true, false).await.unwrap();
        assert_eq!(plans["web"].action, PlanAction::Noop);
    }

    #[tokio::test]
    async fn fresh_start_forces_recreate_on_existing_containers() {
        let engine: Arc<dyn Engine> = Arc::new(DummyEngine::new());
        let project = single_service_project(engine);
        let services: Vec<&Service> = project.services.iter().collect();

        let plans = plan(&services, true, false, false).await.unwrap();
        execute(&services, &plans, false, true).await.unwrap();

        let plans = plan(&services, true, false, true).await.unwrap();
        assert_eq!(plans["web"].action, PlanAction::Recreate);
    }
}
