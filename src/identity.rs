//! Container naming and label-based discovery (spec §4.B / §6).
//!
//! Every container this crate manages carries three base labels
//! (project/service/one-off) plus a per-instance number and the crate
//! version. Discovery always filters by labels; the name is informational
//! only, used to build a human-readable `docker ps` style display and to
//! detect pre-label "legacy" containers so we can warn about them.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

pub const PROJECT_LABEL: &str = "com.docker.compose.project";
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
pub const ONE_OFF_LABEL: &str = "com.docker.compose.oneoff";
pub const CONTAINER_NUMBER_LABEL: &str = "com.docker.compose.container-number";
pub const VERSION_LABEL: &str = "com.docker.compose.version";

/// Written to distinguish "unchanged" services from "changed" ones for
/// `smart_recreate` (see SPEC_FULL.md §9 / DESIGN.md).
pub const CONFIG_HASH_LABEL: &str = "com.docker.compose.config-hash";

pub const ENGINE_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    static ref LEGACY_NAME_RE: Regex =
        Regex::new(r"^([A-Za-z0-9]+)_([A-Za-z0-9]+)_(run_)?([1-9][0-9]*)$").unwrap();
}

/// `{project}_{service}[_run]_{number}`.
pub fn container_name(project: &str, service: &str, number: u32, one_off: bool) -> String {
    if one_off {
        format!("{project}_{service}_run_{number}")
    } else {
        format!("{project}_{service}_{number}")
    }
}

/// The base project/service/one-off labels, as a `key -> value` map, used
/// both to stamp new containers and as an engine list-filter.
pub fn labels_for(project: &str, service: &str, one_off: bool) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(PROJECT_LABEL.to_string(), project.to_string());
    labels.insert(SERVICE_LABEL.to_string(), service.to_string());
    labels.insert(
        ONE_OFF_LABEL.to_string(),
        one_off_label_value(one_off).to_string(),
    );
    labels
}

pub fn one_off_label_value(one_off: bool) -> &'static str {
    if one_off { "True" } else { "False" }
}

/// The project/one-off labels only, used for project-wide listings that
/// filter by service name separately rather than as an engine-side label.
pub fn project_labels_for(project: &str, one_off: bool) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(PROJECT_LABEL.to_string(), project.to_string());
    labels.insert(
        ONE_OFF_LABEL.to_string(),
        one_off_label_value(one_off).to_string(),
    );
    labels
}

/// Builds the full label set for a container-create call: project base
/// labels merged with caller-supplied labels, plus the per-instance number
/// and version. Caller-supplied labels are overridden by the base labels on
/// key collision — a service cannot shadow its own identity labels.
pub fn build_container_labels(
    caller_labels: &HashMap<String, String>,
    project: &str,
    service: &str,
    one_off: bool,
    number: u32,
) -> HashMap<String, String> {
    let mut labels = caller_labels.clone();
    for (k, v) in labels_for(project, service, one_off) {
        labels.insert(k, v);
    }
    labels.insert(CONTAINER_NUMBER_LABEL.to_string(), number.to_string());
    labels.insert(VERSION_LABEL.to_string(), ENGINE_CORE_VERSION.to_string());
    labels
}

/// Reads the container-number label, if present and well-formed.
pub fn parse_number_label(labels: &HashMap<String, String>) -> Option<u32> {
    labels.get(CONTAINER_NUMBER_LABEL)?.parse().ok()
}

/// True if `name` matches the pre-label naming convention
/// `{project}_{service}[_run]_{number}` for one of `services`. Used only to
/// emit a one-time warning (spec §4.B); such containers are never treated
/// as managed state.
pub fn matches_legacy_name(name: &str, project: &str, services: &[&str]) -> bool {
    let Some(caps) = LEGACY_NAME_RE.captures(name.trim_start_matches('/')) else {
        return false;
    };
    caps.get(1).map(|m| m.as_str()) == Some(project)
        && services.contains(&caps.get(2).map(|m| m.as_str()).unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_plain() {
        assert_eq!(container_name("test", "web", 1, false), "test_web_1");
    }

    #[test]
    fn container_name_one_off() {
        assert_eq!(container_name("test", "web", 3, true), "test_web_run_3");
    }

    #[test]
    fn labels_for_one_off_values() {
        let labels = labels_for("test", "web", true);
        assert_eq!(labels[ONE_OFF_LABEL], "True");
        let labels = labels_for("test", "web", false);
        assert_eq!(labels[ONE_OFF_LABEL], "False");
    }

    #[test]
    fn build_container_labels_includes_number_and_version() {
        let caller = HashMap::new();
        let labels = build_container_labels(&caller, "test", "web", false, 1);
        assert_eq!(labels[PROJECT_LABEL], "test");
        assert_eq!(labels[SERVICE_LABEL], "web");
        assert_eq!(labels[CONTAINER_NUMBER_LABEL], "1");
        assert_eq!(labels[VERSION_LABEL], ENGINE_CORE_VERSION);
    }

    #[test]
    fn build_container_labels_base_labels_win_collisions() {
        let mut caller = HashMap::new();
        caller.insert(PROJECT_LABEL.to_string(), "attacker".to_string());
        let labels = build_container_labels(&caller, "test", "web", false, 1);
        assert_eq!(labels[PROJECT_LABEL], "test");
    }

    #[test]
    fn parse_number_label_reads_decimal() {
        let mut labels = HashMap::new();
        labels.insert(CONTAINER_NUMBER_LABEL.to_string(), "7".to_string());
        assert_eq!(parse_number_label(&labels), Some(7));
    }

    #[test]
    fn parse_number_label_missing_is_none() {
        assert_eq!(parse_number_label(&HashMap::new()), None);
    }

    #[test]
    fn legacy_name_matches_plain() {
        assert!(matches_legacy_name("test_web_1", "test", &["web", "db"]));
    }

    #[test]
    fn legacy_name_matches_run() {
        assert!(matches_legacy_name("/test_web_run_2", "test", &["web"]));
    }

    #[test]
    fn legacy_name_rejects_other_project() {
        assert!(!matches_legacy_name("other_web_1", "test", &["web"]));
    }

    #[test]
    fn legacy_name_rejects_other_service() {
        assert!(!matches_legacy_name("test_db_1", "test", &["web"]));
    }

    #[test]
    fn legacy_name_rejects_malformed() {
        assert!(!matches_legacy_name("test_web", "test", &["web"]));
        assert!(!matches_legacy_name("test_web_0", "test", &["web"]));
    }
}
