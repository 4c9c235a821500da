//! Dependency-ordered topological sort over service declarations (spec
//! §4.E), grounded in the original `sort_service_dicts` DFS.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineCoreError, Result};
use crate::model::{self, ServiceDeclaration};

/// One declaration plus its name, as handed to the sorter.
#[derive(Debug, Clone)]
pub struct NamedDeclaration {
    pub name: String,
    pub declaration: ServiceDeclaration,
}

/// The service names a declaration depends on: link targets, `volumes_from`
/// service targets, and a `net: service:X` target.
fn dependency_names(decl: &ServiceDeclaration) -> Vec<String> {
    let mut names = Vec::new();

    for link in &decl.links {
        names.push(model::parse_link(link).target);
    }

    for source in &decl.volumes_from {
        // `volumes_from` entries may reference a bare container id; those
        // aren't service names and are left for resolution to decide.
        // Heuristically, anything containing no path-like characters and
        // matching a known service name is a dependency — but since the
        // sorter only has names in hand, any source not itself a literal
        // container id is treated as a candidate service reference and
        // filtered against known names by the caller.
        names.push(source.clone());
    }

    if let Some(name) = model::net_service_name(&decl.net) {
        names.push(name.to_string());
    }

    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unmarked,
    Temporary,
    Permanent,
}

/// Sorts declarations so that for every `i < j` in the result, service `i`
/// does not depend on service `j` (spec §8 invariant 1). Cycle detection
/// classifies self-link, self-volume-mount, and generic circular-import
/// errors distinctly (spec §4.E, S1/S3).
pub fn sort(declarations: Vec<NamedDeclaration>) -> Result<Vec<NamedDeclaration>> {
    let by_name: HashMap<String, NamedDeclaration> = declarations
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();

    let known: HashSet<&str> = by_name.keys().map(String::as_str).collect();

    let mut names: Vec<String> = by_name.keys().cloned().collect();
    names.sort();

    let mut marks: HashMap<String, Mark> = names
        .iter()
        .map(|n| (n.clone(), Mark::Unmarked))
        .collect();

    let mut output = Vec::with_capacity(names.len());

    for name in &names {
        visit(name, &by_name, &known, &mut marks, &mut output)?;
    }

    Ok(output
        .into_iter()
        .map(|name| by_name.get(&name).cloned().unwrap())
        .collect())
}

fn visit(
    name: &str,
    by_name: &HashMap<String, NamedDeclaration>,
    known: &HashSet<&str>,
    marks: &mut HashMap<String, Mark>,
    output: &mut Vec<String>,
) -> Result<()> {
    match marks.get(name) {
        Some(Mark::Permanent) => return Ok(()),
        Some(Mark::Temporary) => {
            return Err(cycle_error(name, name, by_name));
        }
        _ => {}
    }

    marks.insert(name.to_string(), Mark::Temporary);

    let decl = &by_name[name].declaration;
    for dependent in dependency_names(decl) {
        if !known.contains(dependent.as_str()) {
            // Not a service reference (e.g. a bare container id in
            // volumes_from) — resolution, not the sorter, is responsible
            // for validating it.
            continue;
        }
        if marks.get(dependent.as_str()) == Some(&Mark::Temporary) {
            return Err(cycle_error(name, &dependent, by_name));
        }
        visit(&dependent, by_name, known, marks, output)?;
    }

    marks.insert(name.to_string(), Mark::Permanent);
    output.push(name.to_string());
    Ok(())
}

fn cycle_error(
    from: &str,
    to: &str,
    by_name: &HashMap<String, NamedDeclaration>,
) -> EngineCoreError {
    if from == to {
        let decl = &by_name[from].declaration;
        if decl.links.iter().any(|l| model::parse_link(l).target == from) {
            return EngineCoreError::Dependency(format!(
                "A service can not link to itself: {from}"
            ));
        }
        if decl.volumes_from.iter().any(|v| v == from) {
            return EngineCoreError::Dependency(format!(
                "A service can not mount itself as volume: {from}"
            ));
        }
    }
    EngineCoreError::Dependency(format!("Circular import between {from} and {to}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, decl: ServiceDeclaration) -> NamedDeclaration {
        NamedDeclaration {
            name: name.to_string(),
            declaration: decl,
        }
    }

    fn with_image(image: &str) -> ServiceDeclaration {
        ServiceDeclaration {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn s1_sorts_web_db_volume() {
        let web = named("web", ServiceDeclaration {
            links: vec!["db".to_string()],
            ..with_image("busybox")
        });
        let db = named("db", ServiceDeclaration {
            volumes_from: vec!["volume".to_string()],
            ..with_image("busybox")
        });
        let volume = named("volume", with_image("busybox"));

        let sorted = sort(vec![web, db, volume]).unwrap();
        let order: Vec<&str> = sorted.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, vec!["volume", "db", "web"]);
    }

    #[test]
    fn s3_self_link_cycle() {
        let a = named("a", ServiceDeclaration {
            links: vec!["a".to_string()],
            ..with_image("busybox")
        });
        let err = sort(vec![a]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "A service can not link to itself: a"
        );
    }

    #[test]
    fn self_volume_mount_cycle() {
        let a = named("a", ServiceDeclaration {
            volumes_from: vec!["a".to_string()],
            ..with_image("busybox")
        });
        let err = sort(vec![a]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "A service can not mount itself as volume: a"
        );
    }

    #[test]
    fn generic_circular_import() {
        let a = named("a", ServiceDeclaration {
            links: vec!["b".to_string()],
            ..with_image("busybox")
        });
        let b = named("b", ServiceDeclaration {
            links: vec!["a".to_string()],
            ..with_image("busybox")
        });
        let err = sort(vec![a, b]).unwrap_err();
        assert!(err.to_string().starts_with("Circular import between"));
    }

    #[test]
    fn unrelated_services_keep_name_order() {
        let a = named("a", with_image("busybox"));
        let b = named("b", with_image("busybox"));
        let sorted = sort(vec![b, a]).unwrap();
        let order: Vec<&str> = sorted.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn net_service_ref_is_a_dependency() {
        let web = named("web", ServiceDeclaration {
            net: Some("service:db".to_string()),
            ..with_image("busybox")
        });
        let db = named("db", with_image("busybox"));
        let sorted = sort(vec![web, db]).unwrap();
        let order: Vec<&str> = sorted.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, vec!["db", "web"]);
    }
}
