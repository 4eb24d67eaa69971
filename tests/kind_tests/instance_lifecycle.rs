//! Integration tests for the instance lifecycle
//!
//! These tests tell the story of a contest: teams start instances, the web
//! application polls them until they run, and instances are torn down when
//! the team is done or the contest ends.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use challenge_orchestrator::{ContainerBackend, ContainerConfig, ContainerStatus};

use super::helpers::{connect_backend, kube_client, TEST_IMAGE, TEST_NAMESPACE, TEST_PORT};

/// How long an instance gets to reach Running
const RUNNING_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Test Fixtures
// =============================================================================

fn team_config(team: &str) -> ContainerConfig {
    ContainerConfig::new(TEST_IMAGE, TEST_PORT, team)
        .with_flag("flag{integration}")
        .with_limits(1, 64)
}

// =============================================================================
// Lifecycle Stories
// =============================================================================

/// Story: A team starts an instance, plays, and stops it
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_instance_runs_and_is_torn_down() {
    let (backend, _kubeconfig) = connect_backend(false).await.expect("backend");
    let cancel = CancellationToken::new();

    let mut record = backend
        .create_container(&team_config("team-1"), &cancel)
        .await
        .expect("create should succeed");
    println!("created {} at {:?}", record.container_id, record.public_endpoint());

    assert!(record.is_proxy);
    assert!(record.public_port.is_some());
    assert_eq!(record.status, ContainerStatus::Pending);

    let deadline = tokio::time::Instant::now() + RUNNING_TIMEOUT;
    loop {
        let status = backend
            .query_container(&mut record, &cancel)
            .await
            .expect("query should succeed");
        if status == ContainerStatus::Running {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "instance never reached Running"
        );
        sleep(Duration::from_secs(2)).await;
    }
    assert!(record.internal_ip.is_some());

    let listed = backend.get_containers(&cancel).await.expect("list");
    assert!(listed.iter().any(|c| c.name == record.container_id));

    backend
        .destroy_container(&mut record, &cancel)
        .await
        .expect("destroy should succeed");
    assert_eq!(record.status, ContainerStatus::Destroyed);

    // A second teardown finds nothing and still succeeds
    backend
        .destroy_container(&mut record, &cancel)
        .await
        .expect("repeated destroy should succeed");
    assert_eq!(record.status, ContainerStatus::Destroyed);
}

/// Story: Two teams start the same challenge at the same time
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_concurrent_teams_get_separate_instances() {
    let (backend, _kubeconfig) = connect_backend(false).await.expect("backend");
    let cancel = CancellationToken::new();

    let red = team_config("team-red");
    let blue = team_config("team-blue");
    let (a, b) = tokio::join!(
        backend.create_container(&red, &cancel),
        backend.create_container(&blue, &cancel)
    );
    let mut a = a.expect("red instance");
    let mut b = b.expect("blue instance");

    assert_ne!(a.container_id, b.container_id);
    assert_ne!(a.public_port, b.public_port);

    backend.destroy_container(&mut a, &cancel).await.expect("destroy red");
    let status = backend.query_container(&mut b, &cancel).await.expect("query blue");
    assert_ne!(status, ContainerStatus::Destroyed);

    backend.destroy_container(&mut b, &cancel).await.expect("destroy blue");
}

/// Story: An instance whose Pod is deleted out-of-band is reported as destroyed
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_vanished_instance_reads_as_destroyed() {
    let (backend, kubeconfig) = connect_backend(false).await.expect("backend");
    let client = kube_client(&kubeconfig).await.expect("kube client");
    let cancel = CancellationToken::new();

    let mut record = backend
        .create_container(&team_config("team-gone"), &cancel)
        .await
        .expect("create should succeed");

    // Someone removes the Pod directly, e.g. a node drain or kubectl delete
    let pods: Api<Pod> = Api::namespaced(client, TEST_NAMESPACE);
    let delete = DeleteParams {
        grace_period_seconds: Some(0),
        ..Default::default()
    };
    pods.delete(&record.container_id, &delete)
        .await
        .expect("out-of-band pod delete");

    let deadline = tokio::time::Instant::now() + RUNNING_TIMEOUT;
    loop {
        let status = backend
            .query_container(&mut record, &cancel)
            .await
            .expect("query of a vanished instance should succeed");
        if status == ContainerStatus::Destroyed {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "vanished instance never read as Destroyed"
        );
        sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(record.status, ContainerStatus::Destroyed);

    // Teardown still removes the orphaned Service
    backend
        .destroy_container(&mut record, &cancel)
        .await
        .expect("destroy should sweep the service");
    assert_eq!(record.status, ContainerStatus::Destroyed);
}

/// Story: Operators inspect cluster capacity
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_host_info_lists_kind_nodes() {
    let (backend, _kubeconfig) = connect_backend(false).await.expect("backend");

    let report = backend
        .get_host_info(&CancellationToken::new())
        .await
        .expect("host info");
    println!("{report}");

    assert!(report.starts_with("[[ K8s Nodes ]]"));
    assert!(report.contains("control-plane"));
    assert_eq!(backend.namespace(), TEST_NAMESPACE);
}
