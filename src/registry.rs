//! Registry pull credentials
//!
//! Private challenge images need an image pull secret. The secret name is
//! derived from the credentials themselves, so every orchestrator process
//! configured with the same registry login converges on the same Secret and
//! a restart never piles up duplicates.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::kubernetes::ClusterApi;
use crate::identity::{deterministic_hash, sanitize};
use crate::Error;

/// Secret type understood by the kubelet for image pulls
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Data key holding the credential document
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Login for a private image registry
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    /// Registry host, e.g. `registry.example.com:5000`
    #[serde(default)]
    pub server_address: String,
    /// Registry user
    #[serde(default)]
    pub username: String,
    /// Registry password or token
    #[serde(default)]
    pub password: String,
}

// Keep the password out of logs
impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server_address", &self.server_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<&'a str, DockerAuth<'a>>,
}

#[derive(Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: String,
}

impl RegistryCredentials {
    /// Create credentials for a registry
    pub fn new(
        server_address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// True when all three parts are present; otherwise no secret is needed
    pub fn is_complete(&self) -> bool {
        !self.server_address.trim().is_empty()
            && !self.username.trim().is_empty()
            && !self.password.trim().is_empty()
    }

    /// Deterministic pull-secret name: `{username}-{hash(username, password, server)}`
    ///
    /// Returns `None` when the credentials are incomplete. The username part
    /// is sanitized so the result is always a valid Secret name.
    pub fn secret_identity(&self) -> Option<String> {
        if !self.is_complete() {
            return None;
        }

        // Length-prefix each part so ("a@b", "c") and ("a", "b@c") never collide
        let material = format!(
            "{}:{}|{}:{}|{}:{}",
            self.username.len(),
            self.username,
            self.password.len(),
            self.password,
            self.server_address.len(),
            self.server_address
        );
        let digest = deterministic_hash(&material);

        let mut user = sanitize(&self.username);
        user.truncate(crate::identity::MAX_NAME_LEN - digest.len() - 1);
        let user = user.trim_end_matches('-');

        Some(if user.is_empty() {
            format!("registry-{}", digest)
        } else {
            format!("{}-{}", user, digest)
        })
    }

    /// Single-registry credential document in `.dockerconfigjson` format
    pub fn docker_config_json(&self) -> Result<Vec<u8>, Error> {
        let auth = STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut auths = BTreeMap::new();
        auths.insert(
            self.server_address.as_str(),
            DockerAuth {
                username: &self.username,
                password: &self.password,
                auth,
            },
        );
        serde_json::to_vec(&DockerConfig { auths })
            .map_err(|e| Error::serialization_for_kind("dockerconfigjson", e.to_string()))
    }

    /// Build the pull Secret for `namespace`, or `None` when incomplete
    pub fn pull_secret(&self, namespace: &str) -> Result<Option<Secret>, Error> {
        let Some(name) = self.secret_identity() else {
            return Ok(None);
        };

        let mut data = BTreeMap::new();
        data.insert(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(self.docker_config_json()?),
        );

        Ok(Some(Secret {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
            ..Default::default()
        }))
    }
}

/// Ensure the pull secret for `credentials` exists in `namespace`
///
/// Returns the secret name to reference from Pods, or `None` when the
/// credentials are incomplete. An existing Secret of the same name is reused.
pub async fn ensure_pull_secret<C: ClusterApi + ?Sized>(
    api: &C,
    namespace: &str,
    credentials: &RegistryCredentials,
) -> Result<Option<String>, Error> {
    let Some(secret) = credentials.pull_secret(namespace)? else {
        debug!("registry credentials incomplete, no pull secret required");
        return Ok(None);
    };
    let name = secret.metadata.name.clone().unwrap_or_default();

    match api.create_secret(namespace, &secret).await {
        Ok(_) => {
            info!(secret = %name, namespace = %namespace, registry = %credentials.server_address, "created image pull secret");
        }
        Err(e) if e.is_conflict() => {
            debug!(secret = %name, namespace = %namespace, "image pull secret already exists");
        }
        Err(e) => return Err(e),
    }

    Ok(Some(name))
}
