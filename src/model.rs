//! The data model spec §3: declarations (input, immutable), and the
//! engine's view of a running container.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{EngineCoreError, Result};
use crate::identity;

/// A service's declared desired state, as read from a project file. Exactly
/// one of `image`/`build` must be present — enforced by `Service::new`, not
/// here, since the error needs the service name for a useful message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceDeclaration {
    pub image: Option<String>,
    pub build: Option<String>,
    pub dockerfile: Option<String>,

    pub links: Vec<String>,
    pub external_links: Vec<String>,
    pub volumes_from: Vec<String>,
    pub net: Option<String>,

    pub volumes: Vec<String>,
    pub ports: Vec<String>,
    pub expose: Vec<String>,

    pub environment: Vec<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub restart: Option<String>,

    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub pid: Option<String>,
    pub privileged: bool,
    pub read_only: bool,
    pub log_driver: Option<String>,
    pub extra_hosts: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ServiceDeclaration {
    pub fn can_be_built(&self) -> bool {
        self.build.is_some()
    }

    /// Ports a service is not scalable with are those that publish a fixed
    /// host port (spec §3 invariant).
    pub fn can_be_scaled(&self) -> bool {
        !self.ports.iter().any(|p| p.contains(':'))
    }
}

/// `target[:alias]` — a parsed entry from `ServiceDeclaration::links`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub target: String,
    pub alias: Option<String>,
}

pub fn parse_link(spec: &str) -> LinkSpec {
    match spec.split_once(':') {
        Some((target, alias)) => LinkSpec {
            target: target.to_string(),
            alias: Some(alias.to_string()),
        },
        None => LinkSpec {
            target: spec.to_string(),
            alias: None,
        },
    }
}

/// `existing[:alias]` — a parsed entry from `ServiceDeclaration::external_links`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLinkSpec {
    pub container: String,
    pub alias: String,
}

pub fn parse_external_link(spec: &str) -> ExternalLinkSpec {
    match spec.split_once(':') {
        Some((container, alias)) => ExternalLinkSpec {
            container: container.to_string(),
            alias: alias.to_string(),
        },
        None => ExternalLinkSpec {
            container: spec.to_string(),
            alias: spec.to_string(),
        },
    }
}

/// The resolved `net` declaration: a tagged union discriminated once at
/// construction (spec §9 design note), never re-sniffed at use sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetRef {
    Bridge,
    Host,
    None,
    Container(String),
    Service(String),
}

/// The service name a `net` declaration depends on, if any — used by the
/// dependency sort (spec §4.E).
pub fn net_service_name(raw: &Option<String>) -> Option<&str> {
    raw.as_deref()?.strip_prefix("service:")
}

pub fn parse_net_spec(raw: &str) -> NetRef {
    match raw {
        "bridge" => NetRef::Bridge,
        "host" => NetRef::Host,
        "none" => NetRef::None,
        other => {
            if let Some(id) = other.strip_prefix("container:") {
                NetRef::Container(id.to_string())
            } else if let Some(name) = other.strip_prefix("service:") {
                NetRef::Service(name.to_string())
            } else {
                NetRef::Container(other.to_string())
            }
        }
    }
}

/// A resolved `volumes_from` / `net` target: either one of the project's
/// own services, or a bare engine container id supplied out of band (spec
/// §9 design note on polymorphic reference fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOrContainer {
    Service(String),
    Container(String),
}

/// The engine's read-only view of one observed container (spec §3).
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub is_running: bool,
}

impl Container {
    pub fn short_id(&self) -> String {
        self.id.chars().take(12).collect()
    }

    pub fn number(&self) -> Option<u32> {
        identity::parse_number_label(&self.labels)
    }

    pub fn project(&self) -> Option<&str> {
        self.labels.get(identity::PROJECT_LABEL).map(String::as_str)
    }

    pub fn service(&self) -> Option<&str> {
        self.labels.get(identity::SERVICE_LABEL).map(String::as_str)
    }

    pub fn config_hash(&self) -> Option<&str> {
        self.labels
            .get(identity::CONFIG_HASH_LABEL)
            .map(String::as_str)
    }

    /// The container name with the `{project}_` prefix stripped, used when
    /// building link aliases (spec §4.D link resolution, §8 S5).
    pub fn name_without_project(&self) -> &str {
        match self.project() {
            Some(project) => self
                .name
                .strip_prefix(&format!("{project}_"))
                .unwrap_or(&self.name),
            None => &self.name,
        }
    }
}

/// Validates a project/service name against `^[A-Za-z0-9]+$` (spec §3).
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(EngineCoreError::Config(format!(
            "invalid {kind} name \"{name}\" - only [A-Za-z0-9] are allowed"
        )))
    }
}

/// Project-name normalization (spec §6): lowercase, strip non-`[a-z0-9]`,
/// default to `"default"` if empty.
pub fn normalize_project_name(raw: &str) -> String {
    let normalized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if normalized.is_empty() {
        "default".to_string()
    } else {
        normalized
    }
}
