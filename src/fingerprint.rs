//! Config fingerprinting (SPEC_FULL.md §3 "Fingerprint", §9 `smart_recreate`
//! resolution): a SHA-256 digest of a service declaration's
//! container-affecting fields, stamped as a label at create time and
//! compared against the live declaration to detect a true no-op.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::ServiceDeclaration;

/// The subset of `ServiceDeclaration` that feeds container-create
/// parameters. Two declarations with equal fingerprints produce identical
/// create calls (ignoring purely informational fields like `dockerfile`'s
/// path when `build` itself differs, which is already covered by `build`).
#[derive(Serialize)]
struct FingerprintInput<'a> {
    image: &'a Option<String>,
    build: &'a Option<String>,
    dockerfile: &'a Option<String>,
    links: &'a [String],
    external_links: &'a [String],
    volumes_from: &'a [String],
    net: &'a Option<String>,
    volumes: &'a [String],
    ports: &'a [String],
    expose: &'a [String],
    environment: &'a [String],
    hostname: &'a Option<String>,
    domainname: &'a Option<String>,
    restart: &'a Option<String>,
    cap_add: &'a [String],
    cap_drop: &'a [String],
    dns: &'a [String],
    dns_search: &'a [String],
    pid: &'a Option<String>,
    privileged: bool,
    read_only: bool,
    log_driver: &'a Option<String>,
    extra_hosts: &'a [String],
    labels: Vec<(String, String)>,
}

/// Computes the hex-encoded SHA-256 fingerprint of `decl`'s
/// container-affecting fields. Map-valued fields are sorted first so the
/// digest is independent of hash-map iteration order.
pub fn fingerprint(decl: &ServiceDeclaration) -> String {
    let mut labels: Vec<(String, String)> = decl
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.sort();

    let input = FingerprintInput {
        image: &decl.image,
        build: &decl.build,
        dockerfile: &decl.dockerfile,
        links: &decl.links,
        external_links: &decl.external_links,
        volumes_from: &decl.volumes_from,
        net: &decl.net,
        volumes: &decl.volumes,
        ports: &decl.ports,
        expose: &decl.expose,
        environment: &decl.environment,
        hostname: &decl.hostname,
        domainname: &decl.domainname,
        restart: &decl.restart,
        cap_add: &decl.cap_add,
        cap_drop: &decl.cap_drop,
        dns: &decl.dns,
        dns_search: &decl.dns_search,
        pid: &decl.pid,
        privileged: decl.privileged,
        read_only: decl.read_only,
        log_driver: &decl.log_driver,
        extra_hosts: &decl.extra_hosts,
        labels,
    };

    let canonical = serde_json::to_vec(&input).expect("fingerprint input is always serializable");
    let digest = Sha256::digest(&canonical);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(image: &str) -> ServiceDeclaration {
        ServiceDeclaration {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn identical_declarations_fingerprint_equal() {
        assert_eq!(fingerprint(&decl("busybox")), fingerprint(&decl("busybox")));
    }

    #[test]
    fn changed_image_changes_fingerprint() {
        assert_ne!(fingerprint(&decl("busybox")), fingerprint(&decl("alpine")));
    }

    #[test]
    fn label_order_does_not_affect_fingerprint() {
        let mut a = decl("busybox");
        a.labels.insert("x".to_string(), "1".to_string());
        a.labels.insert("y".to_string(), "2".to_string());

        let mut b = decl("busybox");
        b.labels.insert("y".to_string(), "2".to_string());
        b.labels.insert("x".to_string(), "1".to_string());

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
