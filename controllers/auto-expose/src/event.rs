//! Workload keys and change events.
//!
//! A `WorkloadRef` is the namespace/name pair used as the queue and cache
//! key. A `ChangeEvent` tags a ref with the kind of notification that
//! produced it, which decides the lookup path during reconciliation.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Uniquely identifies a workload by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Extracts a ref from object metadata. Returns `None` when the object
    /// has no name; namespace falls back to `default` for cluster-scoped
    /// listings that omit it.
    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref()?;
        let namespace = meta.namespace.as_deref().unwrap_or("default");
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single workload change notification.
///
/// The kind only selects how the current state is looked up: `Deleted`
/// items bypass the cache, which has usually evicted the object already.
/// Convergence itself is always derived from the observed current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added(WorkloadRef),
    Deleted(WorkloadRef),
}

impl ChangeEvent {
    pub fn workload(&self) -> &WorkloadRef {
        match self {
            Self::Added(r) | Self::Deleted(r) => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_from_meta() {
        let meta = ObjectMeta {
            name: Some("foo".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        let r = WorkloadRef::from_meta(&meta).unwrap();
        assert_eq!(r, WorkloadRef::new("ns", "foo"));
        assert_eq!(r.to_string(), "ns/foo");
    }

    #[test]
    fn test_ref_from_meta_defaults_namespace() {
        let meta = ObjectMeta {
            name: Some("foo".to_string()),
            ..Default::default()
        };
        let r = WorkloadRef::from_meta(&meta).unwrap();
        assert_eq!(r.namespace, "default");
    }

    #[test]
    fn test_ref_from_meta_requires_name() {
        let meta = ObjectMeta {
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        assert!(WorkloadRef::from_meta(&meta).is_none());
    }

    #[test]
    fn test_event_workload_accessor() {
        let r = WorkloadRef::new("ns", "foo");
        assert_eq!(ChangeEvent::Added(r.clone()).workload(), &r);
        assert_eq!(ChangeEvent::Deleted(r.clone()).workload(), &r);
    }
}
