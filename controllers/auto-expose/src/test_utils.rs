//! Test utilities for unit testing the controller.
//!
//! Helpers for constructing workload and service objects used across the
//! test modules.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::filter;

/// Helper to create a test Deployment with the given opt-in state, pod
/// template labels and declared container ports.
pub fn test_workload(
    name: &str,
    namespace: &str,
    opted_in: bool,
    template_labels: &[(&str, &str)],
    ports: &[i32],
) -> Deployment {
    let labels: BTreeMap<String, String> = template_labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: opted_in.then(|| {
                BTreeMap::from([(
                    filter::LABEL_KEY.to_string(),
                    filter::OPT_IN_VALUE.to_string(),
                )])
            }),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        ports: Some(
                            ports
                                .iter()
                                .map(|p| ContainerPort {
                                    container_port: *p,
                                    ..Default::default()
                                })
                                .collect(),
                        ),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test Service, optionally carrying the management
/// label this controller stamps on its own objects.
pub fn test_service(name: &str, namespace: &str, managed: bool) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: managed.then(filter::management_labels),
            ..Default::default()
        },
        ..Default::default()
    }
}
