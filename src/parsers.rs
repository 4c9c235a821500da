//! Pure value parsers for declaration fields (spec §4.C). All of these fail
//! with `EngineCoreError::Config` and never touch the engine or the
//! filesystem.

use crate::error::{EngineCoreError, Result};
use std::collections::HashMap;

/// `[external:]internal[:mode]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub external: Option<String>,
    pub internal: String,
    pub mode: VolumeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMode {
    ReadWrite,
    ReadOnly,
}

impl VolumeMode {
    fn as_str(self) -> &'static str {
        match self {
            VolumeMode::ReadWrite => "rw",
            VolumeMode::ReadOnly => "ro",
        }
    }
}

impl std::fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.external {
            Some(ext) => write!(f, "{ext}:{}:{}", self.internal, self.mode.as_str()),
            None => write!(f, "{}", self.internal),
        }
    }
}

pub fn parse_volume_spec(spec: &str) -> Result<VolumeSpec> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() > 3 {
        return Err(EngineCoreError::Config(format!(
            "volume \"{spec}\" has incorrect format, should be external:internal[:mode]"
        )));
    }

    match parts.as_slice() {
        [internal] => Ok(VolumeSpec {
            external: None,
            internal: internal.to_string(),
            mode: VolumeMode::ReadWrite,
        }),
        [external, internal] => Ok(VolumeSpec {
            external: Some(external.to_string()),
            internal: internal.to_string(),
            mode: VolumeMode::ReadWrite,
        }),
        [external, internal, mode] => {
            let mode = match *mode {
                "rw" => VolumeMode::ReadWrite,
                "ro" => VolumeMode::ReadOnly,
                other => {
                    return Err(EngineCoreError::Config(format!(
                        "volume \"{spec}\" has invalid mode ({other}), should be one of: rw, ro"
                    )));
                }
            };
            Ok(VolumeSpec {
                external: Some(external.to_string()),
                internal: internal.to_string(),
                mode,
            })
        }
        _ => unreachable!("split(':') on a string never yields zero parts"),
    }
}

/// `[[host_ip:]host_port:]container_port[/proto]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

/// `split_port` from spec §8 (S6): returns `(container_port, binding)`. A
/// missing host port is represented as `host_port: None` (binds to a random
/// host port, per spec §4.C).
pub fn split_port(port: &str) -> Result<(String, HostBinding)> {
    let parts: Vec<&str> = port.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(EngineCoreError::Config(format!(
            "invalid port \"{port}\", should be [[host_ip:]host_port:]container_port[/proto]"
        )));
    }

    match parts.as_slice() {
        [container_port] => Ok((
            container_port.to_string(),
            HostBinding {
                host_ip: None,
                host_port: None,
            },
        )),
        [host_port, container_port] => Ok((
            container_port.to_string(),
            HostBinding {
                host_ip: None,
                host_port: non_empty(host_port),
            },
        )),
        [host_ip, host_port, container_port] => Ok((
            container_port.to_string(),
            HostBinding {
                host_ip: non_empty(host_ip),
                host_port: non_empty(host_port),
            },
        )),
        _ => unreachable!(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// Builds the `container_port -> [bindings]` map `create_host_config` needs,
/// from a list of raw port specs. Multiple specs for the same container
/// port accumulate bindings in the order given (spec §8, S6).
pub fn build_port_bindings(ports: &[String]) -> Result<HashMap<String, Vec<HostBinding>>> {
    let mut bindings: HashMap<String, Vec<HostBinding>> = HashMap::new();
    for port in ports {
        let (container_port, binding) = split_port(port)?;
        bindings.entry(container_port).or_default().push(binding);
    }
    Ok(bindings)
}

/// Splits a repository reference on its last `:`. If the right side
/// contains `/`, the `:` was a registry host port, not a tag separator, so
/// the whole string is the repo and the tag is empty (spec §4.C / §8 S6).
pub fn parse_repository_tag(s: &str) -> (String, String) {
    match s.rsplit_once(':') {
        None => (s.to_string(), String::new()),
        Some((repo, tag)) => {
            if tag.contains('/') {
                (s.to_string(), String::new())
            } else {
                (repo.to_string(), tag.to_string())
            }
        }
    }
}

/// `name[:max_retry]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSpec {
    pub name: String,
    pub max_retry: u32,
}

pub fn parse_restart_spec(spec: &str) -> Result<RestartSpec> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [name] => Ok(RestartSpec {
            name: name.to_string(),
            max_retry: 0,
        }),
        [name, max_retry] => {
            let max_retry = max_retry.parse().map_err(|_| {
                EngineCoreError::Config(format!(
                    "restart \"{spec}\" has incorrect format, should be name[:max_retry]"
                ))
            })?;
            Ok(RestartSpec {
                name: name.to_string(),
                max_retry,
            })
        }
        _ => Err(EngineCoreError::Config(format!(
            "restart \"{spec}\" has incorrect format, should be name[:max_retry]"
        ))),
    }
}

/// Accepts a list of `host:ip` strings (a mapping is handled by the
/// declaration loader before this point — see `model::ExtraHosts`).
pub fn build_extra_hosts(entries: &[String]) -> Result<HashMap<String, String>> {
    let mut hosts = HashMap::new();
    for entry in entries {
        let (host, ip) = entry.split_once(':').ok_or_else(|| {
            EngineCoreError::Config(format!(
                "extra_hosts entry \"{entry}\" must be host:ip"
            ))
        })?;
        hosts.insert(host.trim().to_string(), ip.trim().to_string());
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_spec_internal_only() {
        let v = parse_volume_spec("/data").unwrap();
        assert_eq!(v.external, None);
        assert_eq!(v.internal, "/data");
        assert_eq!(v.mode, VolumeMode::ReadWrite);
    }

    #[test]
    fn volume_spec_external_internal() {
        let v = parse_volume_spec("/host:/data").unwrap();
        assert_eq!(v.external.as_deref(), Some("/host"));
        assert_eq!(v.internal, "/data");
    }

    #[test]
    fn volume_spec_with_mode() {
        let v = parse_volume_spec("/host:/data:ro").unwrap();
        assert_eq!(v.mode, VolumeMode::ReadOnly);
    }

    #[test]
    fn volume_spec_invalid_mode() {
        assert!(parse_volume_spec("/host:/data:oops").is_err());
    }

    #[test]
    fn volume_spec_too_many_parts() {
        assert!(parse_volume_spec("a:b:c:d").is_err());
    }

    #[test]
    fn volume_spec_roundtrips_through_display() {
        for spec in ["/data", "/host:/data", "/host:/data:ro"] {
            let parsed = parse_volume_spec(spec).unwrap();
            let rendered = parsed.to_string();
            let reparsed = parse_volume_spec(&rendered).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }

    #[test]
    fn split_port_s6() {
        let (port, binding) = split_port("127.0.0.1:1000:2000/udp").unwrap();
        assert_eq!(port, "2000/udp");
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding.host_port.as_deref(), Some("1000"));
    }

    #[test]
    fn split_port_container_only() {
        let (port, binding) = split_port("80").unwrap();
        assert_eq!(port, "80");
        assert_eq!(binding.host_ip, None);
        assert_eq!(binding.host_port, None);
    }

    #[test]
    fn split_port_host_and_container() {
        let (port, binding) = split_port("8080:80").unwrap();
        assert_eq!(port, "80");
        assert_eq!(binding.host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn split_port_empty_host_port_is_random_bind() {
        let (port, binding) = split_port("127.0.0.1::80").unwrap();
        assert_eq!(port, "80");
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding.host_port, None);
    }

    #[test]
    fn split_port_rejects_too_many_parts() {
        assert!(split_port("a:b:c:d").is_err());
    }

    #[test]
    fn build_port_bindings_s6() {
        let ports = vec![
            "127.0.0.1:1000:1000".to_string(),
            "127.0.0.1:2000:1000".to_string(),
        ];
        let bindings = build_port_bindings(&ports).unwrap();
        let b = &bindings["1000"];
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].host_port.as_deref(), Some("1000"));
        assert_eq!(b[1].host_port.as_deref(), Some("2000"));
    }

    #[test]
    fn repository_tag_no_colon() {
        let (repo, tag) = parse_repository_tag("ubuntu");
        assert_eq!(repo, "ubuntu");
        assert_eq!(tag, "");
    }

    #[test]
    fn repository_tag_with_tag() {
        let (repo, tag) = parse_repository_tag("ubuntu:22.04");
        assert_eq!(repo, "ubuntu");
        assert_eq!(tag, "22.04");
    }

    #[test]
    fn repository_tag_registry_port_not_a_tag() {
        let (repo, tag) = parse_repository_tag("myregistry.example.com:5000/ubuntu");
        assert_eq!(repo, "myregistry.example.com:5000/ubuntu");
        assert_eq!(tag, "");
    }

    #[test]
    fn repository_tag_registry_port_with_trailing_tag() {
        let (repo, tag) = parse_repository_tag("myregistry.example.com:5000/ubuntu:22.04");
        assert_eq!(repo, "myregistry.example.com:5000/ubuntu");
        assert_eq!(tag, "22.04");
    }

    #[test]
    fn restart_spec_defaults_max_retry() {
        let r = parse_restart_spec("always").unwrap();
        assert_eq!(r.name, "always");
        assert_eq!(r.max_retry, 0);
    }

    #[test]
    fn restart_spec_with_max_retry() {
        let r = parse_restart_spec("on-failure:5").unwrap();
        assert_eq!(r.max_retry, 5);
    }

    #[test]
    fn restart_spec_rejects_three_parts() {
        assert!(parse_restart_spec("a:b:c").is_err());
    }

    #[test]
    fn extra_hosts_parses_pairs() {
        let hosts = build_extra_hosts(&["somehost:192.168.1.1".to_string()]).unwrap();
        assert_eq!(hosts["somehost"], "192.168.1.1");
    }

    #[test]
    fn extra_hosts_rejects_malformed() {
        assert!(build_extra_hosts(&["nocolon".to_string()]).is_err());
    }
}
