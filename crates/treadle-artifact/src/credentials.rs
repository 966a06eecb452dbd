//! Credentials and endpoint handed to every execution unit of a run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ArtifactError, Result};

pub const ENDPOINT_ENV: &str = "TREADLE_ARTIFACT_ENDPOINT";
pub const ACCESS_KEY_ENV: &str = "TREADLE_ARTIFACT_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "TREADLE_ARTIFACT_SECRET_KEY";

const KEY_LEN: usize = 20;

/// Access/secret key pair for one artifact instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for ArtifactCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl ArtifactCredentials {
    /// Two fresh random keys.
    pub fn generate() -> Self {
        Self {
            access_key: random_key(),
            secret_key: random_key(),
        }
    }
}

fn random_key() -> String {
    let mut key = Uuid::new_v4().simple().to_string();
    key.truncate(KEY_LEN);
    key
}

/// Where an artifact instance lives and how to authenticate to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactAccess {
    pub endpoint: String,
    pub credentials: ArtifactCredentials,
}

impl ArtifactAccess {
    pub fn new(endpoint: impl Into<String>, credentials: ArtifactCredentials) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials,
        }
    }

    /// Environment entries to inject into an execution unit.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            (ENDPOINT_ENV.to_string(), self.endpoint.clone()),
            (ACCESS_KEY_ENV.to_string(), self.credentials.access_key.clone()),
            (SECRET_KEY_ENV.to_string(), self.credentials.secret_key.clone()),
        ]
    }

    /// Read access details from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read access details through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(ArtifactError::MissingEnv(name))
        };
        Ok(Self {
            endpoint: get(ENDPOINT_ENV)?,
            credentials: ArtifactCredentials {
                access_key: get(ACCESS_KEY_ENV)?,
                secret_key: get(SECRET_KEY_ENV)?,
            },
        })
    }
}
