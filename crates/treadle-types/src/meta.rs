//! Object identity and type metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// API group/version stamped on every persisted workflow.
pub const API_VERSION: &str = "treadle.io/v1";

/// Kind stamped on every persisted workflow.
pub const KIND: &str = "Workflow";

/// Type metadata (`apiVersion`, `kind`).
///
/// The resource store rejects objects whose stamp is missing, so writers call
/// [`TypeMeta::workflow`] before each put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

impl TypeMeta {
    /// The stamp for workflow objects.
    pub fn workflow() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
        }
    }

    /// Whether this stamp identifies a workflow object.
    pub fn is_workflow(&self) -> bool {
        self.api_version == API_VERSION && self.kind == KIND
    }
}

impl Default for TypeMeta {
    fn default() -> Self {
        Self::workflow()
    }
}

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Opaque version assigned by the store on every write.
    ///
    /// A put carrying a version must match the stored one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            resource_version: None,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// `namespace/name` identity of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
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
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(TypesError::InvalidKey(s.to_string())),
        }
    }
}
