//! Namespace/name identity of a queued resource

use std::fmt;

use kube::ResourceExt;

/// Namespace + name of a resource instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource, falling back to `default` like the API server does
    pub fn from_resource<K: ResourceExt>(resource: &K) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_else(|| "default".to_string()),
            name: resource.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
