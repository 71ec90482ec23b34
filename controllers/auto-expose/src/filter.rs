//! Opt-in and ownership label predicates.
//!
//! Workloads opt in to exposure by carrying `mode: autoExpose` in their
//! metadata labels. Services created by this controller are stamped with
//! `mode: autoExposed` so teardown can tell them apart from user-created
//! Services of the same name.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;

/// Label key shared by the opt-in and management labels.
pub const LABEL_KEY: &str = "mode";
/// Value a Deployment must carry to be managed by this controller.
pub const OPT_IN_VALUE: &str = "autoExpose";
/// Value stamped on Services owned by this controller.
pub const MANAGED_VALUE: &str = "autoExposed";

fn has_key_value(labels: Option<&BTreeMap<String, String>>, key: &str, value: &str) -> bool {
    labels.is_some_and(|l| l.get(key).is_some_and(|v| v == value))
}

/// Whether a workload has opted in to automatic exposure.
///
/// Pure predicate over metadata labels; applied on both the add and delete
/// notification paths before anything reaches the queue.
pub fn interesting(workload: &Deployment) -> bool {
    has_key_value(workload.metadata.labels.as_ref(), LABEL_KEY, OPT_IN_VALUE)
}

/// Whether a Service carries the management label, i.e. was created by this
/// controller. Teardown never deletes a Service that fails this check.
pub fn managed(service: &Service) -> bool {
    has_key_value(service.metadata.labels.as_ref(), LABEL_KEY, MANAGED_VALUE)
}

/// The labels stamped on every Service this controller creates.
pub fn management_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_KEY.to_string(), MANAGED_VALUE.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_service, test_workload};

    #[test]
    fn test_interesting_with_opt_in_label() {
        let workload = test_workload("foo", "ns", true, &[("app", "foo")], &[8080]);
        assert!(interesting(&workload));
    }

    #[test]
    fn test_not_interesting_without_label() {
        // Port configuration is irrelevant; the label alone gates.
        let workload = test_workload("foo", "ns", false, &[("app", "foo")], &[8080, 9090]);
        assert!(!interesting(&workload));
    }

    #[test]
    fn test_not_interesting_with_wrong_value() {
        let mut workload = test_workload("foo", "ns", false, &[], &[]);
        workload.metadata.labels =
            Some(BTreeMap::from([(LABEL_KEY.to_string(), "manual".to_string())]));
        assert!(!interesting(&workload));
    }

    #[test]
    fn test_managed_requires_management_label() {
        let managed_svc = test_service("foo", "ns", true);
        let user_svc = test_service("foo", "ns", false);
        assert!(managed(&managed_svc));
        assert!(!managed(&user_svc));
    }

    #[test]
    fn test_opt_in_value_does_not_mark_service_managed() {
        let mut svc = test_service("foo", "ns", false);
        svc.metadata.labels =
            Some(BTreeMap::from([(LABEL_KEY.to_string(), OPT_IN_VALUE.to_string())]));
        assert!(!managed(&svc));
    }
}
