mod cli;
mod config;
mod convergence;
mod dependency;
mod engine;
mod error;
mod fingerprint;
mod identity;
mod model;
mod parsers;
mod project;
mod service;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cli::{Cli, Command};
use dependency::NamedDeclaration;
use engine::bollard_engine::BollardEngine;
use engine::Engine;
use model::Container;
use project::{Project, ProjectUpOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let project_file = cli
        .file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("compose.toml"));

    let (project_name, declarations) =
        config::load_project_file(&project_file, cli.project_name.as_deref())
            .with_context(|| format!("loading project file {}", project_file.display()))?;

    let engine: Arc<dyn Engine> = Arc::new(
        BollardEngine::connect_with_local_defaults().context("connecting to the container engine")?,
    );

    let named_declarations: Vec<NamedDeclaration> = declarations
        .into_iter()
        .map(|(name, declaration)| NamedDeclaration { name, declaration })
        .collect();

    let project = Project::from_declarations(project_name, named_declarations, engine, None, Vec::new())
        .context("constructing project from declarations")?;

    let containers = dispatch(&project, cli.command).await?;
    print_containers(&containers);

    Ok(())
}

async fn dispatch(project: &Project, command: Command) -> Result<Vec<Container>> {
    match command {
        Command::Up {
            services,
            no_deps,
            no_recreate,
            no_build,
            fresh_start,
            smart_recreate,
        } => {
            let options = ProjectUpOptions {
                start_deps: !no_deps,
                allow_recreate: !no_recreate,
                smart_recreate,
                insecure_registry: false,
                do_build: !no_build,
                fresh_start,
                timeout: 10,
            };
            let containers = project
                .up(cli::service_filter(&services), &options)
                .await
                .context("bringing services up")?;
            info!(count = containers.len(), "converged");
            Ok(containers)
        }
        Command::Down => {
            project.stop(None, 10).await.context("stopping services")?;
            project.remove_stopped(None).await.context("removing containers")?;
            Ok(Vec::new())
        }
        Command::Start { services } => {
            project
                .start(cli::service_filter(&services))
                .await
                .context("starting services")?;
            project.containers(cli::service_filter(&services), true, false).await.map_err(Into::into)
        }
        Command::Stop { services, timeout } => {
            project
                .stop(cli::service_filter(&services), timeout)
                .await
                .context("stopping services")?;
            Ok(Vec::new())
        }
        Command::Kill { services } => {
            project
                .kill(cli::service_filter(&services))
                .await
                .context("killing services")?;
            Ok(Vec::new())
        }
        Command::Restart { services } => {
            project
                .restart(cli::service_filter(&services))
                .await
                .context("restarting services")?;
            project.containers(cli::service_filter(&services), true, false).await.map_err(Into::into)
        }
        Command::Scale { service, count } => {
            project
                .get_service(&service)
                .context("looking up service")?
                .scale(count)
                .await
                .context("scaling service")?;
            let names = vec![service];
            project.containers(Some(&names), true, false).await.map_err(Into::into)
        }
        Command::Rm { services, force } => {
            let names = cli::service_filter(&services);
            if force {
                project.kill(names).await.context("killing services before removal")?;
            }
            project.remove_stopped(names).await.context("removing containers")?;
            Ok(Vec::new())
        }
        Command::Build { services, no_cache } => {
            project
                .build(cli::service_filter(&services), no_cache)
                .await
                .context("building services")?;
            Ok(Vec::new())
        }
        Command::Pull { services } => {
            project
                .pull(cli::service_filter(&services), false)
                .await
                .context("pulling images")?;
            Ok(Vec::new())
        }
        Command::Ps { all } => project
            .containers(None, all, false)
            .await
            .map_err(Into::into),
    }
}

fn print_containers(containers: &[Container]) {
    if containers.is_empty() {
        return;
    }
    println!("{:<30} {:>6}  {}", "NAME", "NUMBER", "STATUS");
    for container in containers {
        let number = container.number().map_or("-".to_string(), |n| n.to_string());
        let status = if container.is_running { "running" } else { "stopped" };
        println!(
            "{:<30} {:>6}  {}",
            container.name.trim_start_matches('/'),
            number,
            status
        );
    }
}
