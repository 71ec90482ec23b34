//! Builds the desired Service for an opted-in workload.
//!
//! Pure mapping from a Deployment to the Service this controller wants to
//! exist: same name and namespace, selector copied verbatim from the pod
//! template labels, one port per valid declared container port, and the
//! management label stamped on so teardown can recognize its own objects.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::warn;

use crate::filter;

fn port_valid(port: i32) -> bool {
    0 < port && port < 65536
}

/// Collects one `ServicePort` per valid declared container port.
///
/// Invalid ports are skipped with a warning rather than failing the build.
/// Names are derived from the workload name and the port number, which keeps
/// them unique within the Service even when several containers declare
/// distinct ports.
fn build_ports(name: &str, workload: &Deployment) -> Vec<ServicePort> {
    let mut service_ports = Vec::new();
    let containers = workload
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|pod| pod.containers.as_slice())
        .unwrap_or_default();

    for container in containers {
        for port in container.ports.as_deref().unwrap_or_default() {
            if port_valid(port.container_port) {
                service_ports.push(ServicePort {
                    name: Some(format!("{}-svc-port-{}", name, port.container_port)),
                    port: port.container_port,
                    target_port: Some(IntOrString::Int(port.container_port)),
                    ..Default::default()
                });
            } else {
                warn!(
                    "service port skipped: {}/{}/{} not valid",
                    name, container.name, port.container_port
                );
            }
        }
    }
    service_ports
}

/// Pod template labels, used verbatim as the Service selector.
fn template_labels(workload: &Deployment) -> std::collections::BTreeMap<String, String> {
    workload
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.clone())
        .unwrap_or_default()
}

/// Builds the desired Service for the given workload.
///
/// An empty port list is allowed (nothing to forward yet) but worth a
/// warning, since it usually means the workload declares no container ports.
pub fn build_exposure(workload: &Deployment) -> Service {
    let name = workload.metadata.name.as_deref().unwrap_or_default();
    let namespace = workload.metadata.namespace.as_deref().unwrap_or("default");

    let ports = build_ports(name, workload);
    if ports.is_empty() {
        warn!("service {}/{} built with no forwarded ports", namespace, name);
    }

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(filter::management_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(template_labels(workload)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_workload;

    #[test]
    fn test_build_exposure_shape() {
        // Labeled workload ns/foo with template label app=foo and one
        // container port 8080.
        let workload = test_workload("foo", "ns", true, &[("app", "foo")], &[8080]);
        let svc = build_exposure(&workload);

        assert_eq!(svc.metadata.name.as_deref(), Some("foo"));
        assert_eq!(svc.metadata.namespace.as_deref(), Some("ns"));
        assert!(filter::managed(&svc), "management label must be stamped on");

        let spec = svc.spec.unwrap();
        let selector = spec.selector.unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some("foo"));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("foo-svc-port-8080"));
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn test_invalid_ports_filtered() {
        let workload = test_workload("foo", "ns", true, &[("app", "foo")], &[0, 80, 65536, 8080]);
        let svc = build_exposure(&workload);

        let ports = svc.spec.unwrap().ports.unwrap();
        let exposed: Vec<i32> = ports.iter().map(|p| p.port).collect();
        assert_eq!(exposed, vec![80, 8080]);
    }

    #[test]
    fn test_port_names_unique() {
        let workload = test_workload("foo", "ns", true, &[("app", "foo")], &[80, 8080, 9090]);
        let svc = build_exposure(&workload);

        let ports = svc.spec.unwrap().ports.unwrap();
        let mut names: Vec<String> = ports.into_iter().filter_map(|p| p.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_no_ports_builds_empty_list() {
        let workload = test_workload("foo", "ns", true, &[("app", "foo")], &[]);
        let svc = build_exposure(&workload);

        let ports = svc.spec.unwrap().ports.unwrap();
        assert!(ports.is_empty());
    }

    #[test]
    fn test_selector_copied_verbatim() {
        let workload = test_workload(
            "foo",
            "ns",
            true,
            &[("app", "foo"), ("tier", "backend")],
            &[8080],
        );
        let svc = build_exposure(&workload);

        let selector = svc.spec.unwrap().selector.unwrap();
        assert_eq!(selector.len(), 2);
        assert_eq!(selector.get("tier").map(String::as_str), Some("backend"));
    }
}
