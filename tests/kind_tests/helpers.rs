//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and connecting a backend.

use std::process::Command;
use std::sync::OnceLock;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tempfile::NamedTempFile;

use challenge_orchestrator::backend::KubernetesBackend;
use challenge_orchestrator::config::KubernetesSettings;

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "orchestrator-integration-test";

/// Namespace the tests provision into, kept apart from a real deployment
pub const TEST_NAMESPACE: &str = "gzctf-it";

/// Small image that listens on a TCP port
pub const TEST_IMAGE: &str = "docker.io/hashicorp/http-echo:1.0";

/// Port `TEST_IMAGE` listens on
pub const TEST_PORT: u16 = 5678;

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Ensure the test cluster exists (created at most once per test run)
pub fn ensure_test_cluster() -> Result<(), String> {
    CLUSTER_INIT
        .get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME))
        .clone()
}

/// Write the kind cluster's kubeconfig to a temporary file
pub fn kubeconfig_file() -> Result<NamedTempFile, String> {
    let output = Command::new("kind")
        .args(["get", "kubeconfig", "--name", TEST_CLUSTER_NAME])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to export kubeconfig: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let file = NamedTempFile::new().map_err(|e| format!("failed to create tempfile: {e}"))?;
    std::fs::write(file.path(), &output.stdout)
        .map_err(|e| format!("failed to write kubeconfig: {e}"))?;
    Ok(file)
}

/// Connect a Kubernetes backend to the test cluster
///
/// The returned tempfile must outlive the test body.
pub async fn connect_backend(
    rollback_partial_create: bool,
) -> Result<(KubernetesBackend, NamedTempFile), String> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    ensure_test_cluster()?;
    let kubeconfig = kubeconfig_file()?;

    let settings = KubernetesSettings {
        kubeconfig: kubeconfig.path().to_path_buf(),
        namespace: TEST_NAMESPACE.to_string(),
        public_host: None,
        rollback_partial_create,
    };

    let backend = KubernetesBackend::connect(&settings, None)
        .await
        .map_err(|e| format!("failed to connect backend: {e}"))?;
    Ok((backend, kubeconfig))
}

/// Plain kube client for acting on the cluster behind the backend's back
pub async fn kube_client(kubeconfig: &NamedTempFile) -> Result<Client, String> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig.path())
        .map_err(|e| format!("failed to read kubeconfig: {e}"))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| format!("failed to load kubeconfig: {e}"))?;
    Client::try_from(config).map_err(|e| format!("failed to build client: {e}"))
}
