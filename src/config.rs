//! The declarations loader (SPEC_FULL.md §4.I, ambient): parses a project
//! file into `ServiceDeclaration` records and resolves the project name,
//! mirroring the teacher's `config.rs` TOML-loading style and
//! `compose/cli/command.py::get_project_name` precedence.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{EngineCoreError, Result};
use crate::model::{self, ServiceDeclaration};

/// The on-disk shape of a project file: a `[project]` table plus one
/// `[services.<name>]` table per service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectFile {
    pub project: ProjectTable,
    pub services: HashMap<String, ServiceDeclaration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectTable {
    pub name: Option<String>,
}

/// Parses `path` and resolves the project name from (in precedence order):
/// an explicit `project_name_override`, `COMPOSE_PROJECT_NAME`, the legacy
/// `FIG_PROJECT_NAME` (warned), or the normalized basename of `path`'s
/// parent directory (spec.md §6).
pub fn load_project_file(
    path: &Path,
    project_name_override: Option<&str>,
) -> Result<(String, Vec<(String, ServiceDeclaration)>)> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        EngineCoreError::Config(format!("could not read project file {}: {e}", path.display()))
    })?;

    let parsed: ProjectFile = toml::from_str(&contents)
        .map_err(|e| EngineCoreError::Config(format!("invalid project file {}: {e}", path.display())))?;

    for (name, decl) in &parsed.services {
        if decl.image.is_none() && decl.build.is_none() {
            return Err(EngineCoreError::Config(format!(
                "service \"{name}\" has neither image nor build declared"
            )));
        }
    }

    let project_name = resolve_project_name(project_name_override, parsed.project.name.as_deref(), path);

    let mut declarations: Vec<(String, ServiceDeclaration)> = parsed.services.into_iter().collect();
    declarations.sort_by(|a, b| a.0.cmp(&b.0));

    Ok((project_name, declarations))
}

fn resolve_project_name(
    override_name: Option<&str>,
    file_name: Option<&str>,
    path: &Path,
) -> String {
    if let Some(name) = override_name {
        return model::normalize_project_name(name);
    }
    if let Some(name) = file_name {
        return model::normalize_project_name(name);
    }
    if let Ok(name) = std::env::var("COMPOSE_PROJECT_NAME") {
        if !name.is_empty() {
            return model::normalize_project_name(&name);
        }
    }
    if let Ok(name) = std::env::var("FIG_PROJECT_NAME") {
        if !name.is_empty() {
            warn!("FIG_PROJECT_NAME is deprecated, use COMPOSE_PROJECT_NAME instead");
            return model::normalize_project_name(&name);
        }
    }

    let basename = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");
    model::normalize_project_name(basename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_services_and_sorts_by_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [services.web]
            image = "nginx"
            links = ["db"]

            [services.db]
            image = "postgres"
            "#
        )
        .unwrap();

        let (_, declarations) = load_project_file(file.path(), Some("test")).unwrap();
        let names: Vec<&str> = declarations.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["db", "web"]);
    }

    #[test]
    fn rejects_service_without_image_or_build() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[services.web]\n").unwrap();
        assert!(load_project_file(file.path(), None).is_err());
    }

    #[test]
    fn explicit_override_wins_over_file_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[project]\nname = \"FromFile\"\n").unwrap();
        let (name, _) = load_project_file(file.path(), Some("FromCli")).unwrap();
        assert_eq!(name, "fromcli");
    }

    #[test]
    fn project_name_s2_falls_back_to_directory_basename() {
        let dir = tempfile::Builder::new()
            .prefix("Simple-FigFile")
            .tempdir()
            .unwrap();
        let path = dir.path().join("compose.toml");
        std::fs::write(&path, "").unwrap();

        unsafe {
            std::env::remove_var("COMPOSE_PROJECT_NAME");
            std::env::remove_var("FIG_PROJECT_NAME");
        }

        let (name, _) = load_project_file(&path, None).unwrap();
        assert!(name.starts_with("simplefigfile"));
    }
}
