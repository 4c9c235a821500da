//! Command-line surface (SPEC_FULL.md §4.J, ambient): thin dispatch onto
//! `Project` operations, matching how little the teacher's own dispatchers
//! do beyond wiring flags through.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "flotilla", about = "Declarative multi-container convergence engine")]
pub struct Cli {
    /// Path to the project file (default: compose.toml in the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub file: Option<String>,

    /// Overrides project name resolution (env vars, directory basename)
    #[arg(long = "project-name", global = true, value_name = "NAME")]
    pub project_name: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Converge every (or named) service to its declared state
    Up {
        services: Vec<String>,

        /// Do not start dependency services
        #[arg(long)]
        no_deps: bool,

        /// Never recreate existing containers, only start them
        #[arg(long)]
        no_recreate: bool,

        /// Skip building images with a `build` declaration
        #[arg(long)]
        no_build: bool,

        /// Force-recreate every container regardless of config changes
        #[arg(long)]
        fresh_start: bool,

        /// Skip recreation when the stamped config fingerprint is unchanged
        #[arg(long)]
        smart_recreate: bool,
    },

    /// Stop and remove every container (equivalent to `stop` + `rm`)
    Down,

    /// Start existing containers without creating new ones
    Start { services: Vec<String> },

    /// Stop running containers
    Stop {
        services: Vec<String>,

        #[arg(long, default_value_t = 10)]
        timeout: u32,
    },

    /// Kill running containers without a graceful stop
    Kill { services: Vec<String> },

    /// Restart containers
    Restart { services: Vec<String> },

    /// Scale a service to a fixed container count
    Scale { service: String, count: u32 },

    /// Remove stopped containers
    Rm {
        services: Vec<String>,

        #[arg(long)]
        force: bool,
    },

    /// Build images for services with a `build` declaration
    Build {
        services: Vec<String>,

        #[arg(long)]
        no_cache: bool,
    },

    /// Pull images for services with an `image` declaration
    Pull { services: Vec<String> },

    /// List this project's containers
    Ps {
        #[arg(long)]
        all: bool,
    },
}

fn non_empty(names: &[String]) -> Option<&[String]> {
    if names.is_empty() { None } else { Some(names) }
}

pub fn service_filter(names: &[String]) -> Option<&[String]> {
    non_empty(names)
}
