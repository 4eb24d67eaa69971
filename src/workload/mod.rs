//! Kubernetes descriptors for one challenge instance
//!
//! An instance is compiled into exactly two resources:
//! - Pod: the challenge container, never restarted, limits from the request
//! - Service: NodePort exposing the challenge port, selecting the Pod by name
//!
//! Requests are pinned low (1 CPU, 32Mi) independent of the limits so that
//! many instances can be packed on a node while each can still burst up to
//! its limit.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, Pod, PodSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use crate::identity::{deterministic_hash, MAX_NAME_LEN};
use crate::{ContainerConfig, FLAG_ENV_KEY, LABEL_RESOURCE_ID, LABEL_TEAM_INFO};

/// CPU request for every instance, independent of its limit
pub const CPU_REQUEST: &str = "1";

/// Memory request for every instance, independent of its limit
pub const MEMORY_REQUEST: &str = "32Mi";

/// Service type giving each instance a dynamically allocated host port
pub const SERVICE_TYPE: &str = "NodePort";

/// The resources making up one instance
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceResources {
    /// The workload
    pub pod: Pod,
    /// The externally reachable endpoint
    pub service: Service,
}

/// Compile an instance request into its Pod and Service
pub fn build_instance(
    name: &str,
    namespace: &str,
    config: &ContainerConfig,
    pull_secret: Option<&str>,
) -> InstanceResources {
    InstanceResources {
        pod: build_pod(name, namespace, config, pull_secret),
        service: build_service(name, namespace, config),
    }
}

/// Labels shared by the Pod and its Service
pub fn instance_labels(name: &str, team_info: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_RESOURCE_ID.to_string(), name.to_string()),
        (LABEL_TEAM_INFO.to_string(), team_label_value(team_info)),
    ])
}

/// Label-safe form of an opaque team identifier
///
/// Values that are already valid label values are used verbatim so they stay
/// greppable; anything else (non-ASCII team names, overlong values) becomes
/// `team-{hash}`, which is stable for the same input.
pub fn team_label_value(team_info: &str) -> String {
    if is_label_value(team_info) {
        team_info.to_string()
    } else {
        format!("team-{}", deterministic_hash(team_info))
    }
}

fn is_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    value.len() <= MAX_NAME_LEN
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Build the challenge Pod
pub fn build_pod(
    name: &str,
    namespace: &str,
    config: &ContainerConfig,
    pull_secret: Option<&str>,
) -> Pod {
    let env = config.flag.as_ref().map(|flag| {
        vec![EnvVar {
            name: FLAG_ENV_KEY.to_string(),
            value: Some(flag.clone()),
            ..Default::default()
        }]
    });

    let limits = BTreeMap::from([
        ("cpu".to_string(), Quantity(config.cpu_count.to_string())),
        (
            "memory".to_string(),
            Quantity(format!("{}Mi", config.memory_limit_mib)),
        ),
    ]);
    let requests = BTreeMap::from([
        ("cpu".to_string(), Quantity(CPU_REQUEST.to_string())),
        ("memory".to_string(), Quantity(MEMORY_REQUEST.to_string())),
    ]);

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(instance_labels(name, &config.team_info)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            image_pull_secrets: pull_secret.map(|secret| {
                vec![LocalObjectReference {
                    name: secret.to_string(),
                }]
            }),
            containers: vec![Container {
                name: name.to_string(),
                image: Some(config.image.clone()),
                image_pull_policy: Some("Always".to_string()),
                env,
                ports: Some(vec![ContainerPort {
                    container_port: i32::from(config.exposed_port),
                    ..Default::default()
                }]),
                resources: Some(ResourceRequirements {
                    limits: Some(limits),
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the NodePort Service exposing the challenge port
pub fn build_service(name: &str, namespace: &str, config: &ContainerConfig) -> Service {
    let port = i32::from(config.exposed_port);

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(instance_labels(name, &config.team_info)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE.to_string()),
            selector: Some(BTreeMap::from([(
                LABEL_RESOURCE_ID.to_string(),
                name.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node port the control plane assigned to an instance Service
pub fn assigned_node_port(service: &Service) -> Option<u16> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()?
        .node_port
        .and_then(|p| u16::try_from(p).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "chal-0123456789abcdef";

    fn sample_config() -> ContainerConfig {
        ContainerConfig::new("registry/chal:latest", 8080, "team-42").with_limits(2, 256)
    }

    fn container(pod: &Pod) -> &Container {
        &pod.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn story_pod_is_single_container_never_restarted() {
        let pod = build_pod(NAME, "gzctf", &sample_config(), None);
        let spec = pod.spec.as_ref().unwrap();

        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.metadata.name.as_deref(), Some(NAME));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("gzctf"));

        let c = container(&pod);
        assert_eq!(c.name, NAME);
        assert_eq!(c.image.as_deref(), Some("registry/chal:latest"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 8080);
    }

    #[test]
    fn story_limits_follow_request_but_requests_are_fixed() {
        let pod = build_pod(NAME, "gzctf", &sample_config(), None);
        let resources = container(&pod).resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();

        assert_eq!(limits["cpu"], Quantity("2".to_string()));
        assert_eq!(limits["memory"], Quantity("256Mi".to_string()));
        assert_eq!(requests["cpu"], Quantity("1".to_string()));
        assert_eq!(requests["memory"], Quantity("32Mi".to_string()));
    }

    #[test]
    fn story_flag_is_injected_only_when_present() {
        let pod = build_pod(NAME, "gzctf", &sample_config(), None);
        assert!(container(&pod).env.is_none());

        let pod = build_pod(NAME, "gzctf", &sample_config().with_flag("flag{x}"), None);
        let env = container(&pod).env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, FLAG_ENV_KEY);
        assert_eq!(env[0].value.as_deref(), Some("flag{x}"));
    }

    #[test]
    fn story_pull_secret_is_referenced_when_configured() {
        let pod = build_pod(NAME, "gzctf", &sample_config(), None);
        assert!(pod.spec.as_ref().unwrap().image_pull_secrets.is_none());

        let pod = build_pod(NAME, "gzctf", &sample_config(), Some("bot-0011223344556677"));
        let secrets = pod.spec.unwrap().image_pull_secrets.unwrap();
        assert_eq!(secrets[0].name, "bot-0011223344556677");
    }

    #[test]
    fn story_service_selects_pod_by_resource_id() {
        let InstanceResources { pod, service } =
            build_instance(NAME, "gzctf", &sample_config(), None);
        let spec = service.spec.as_ref().unwrap();

        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let selector = spec.selector.as_ref().unwrap();
        assert_eq!(selector.len(), 1);
        assert_eq!(selector[LABEL_RESOURCE_ID], NAME);

        let pod_labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(pod_labels[LABEL_RESOURCE_ID], NAME);

        let port = &spec.ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 8080);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
        assert!(port.node_port.is_none());
    }

    #[test]
    fn story_both_resources_carry_team_label() {
        let res = build_instance(NAME, "gzctf", &sample_config(), None);
        for labels in [
            res.pod.metadata.labels.as_ref().unwrap(),
            res.service.metadata.labels.as_ref().unwrap(),
        ] {
            assert_eq!(labels[LABEL_TEAM_INFO], "team-42");
            assert_eq!(labels[LABEL_RESOURCE_ID], NAME);
        }
    }

    #[test]
    fn test_team_label_value() {
        assert_eq!(team_label_value("team-42"), "team-42");
        assert_eq!(team_label_value("Team_42.a"), "Team_42.a");

        let hashed = team_label_value("队伍 42");
        assert!(hashed.starts_with("team-"));
        assert_eq!(hashed, team_label_value("队伍 42"));
        assert!(is_label_value(&hashed));

        assert!(team_label_value(&"x".repeat(80)).starts_with("team-"));
        assert!(team_label_value("-leading").starts_with("team-"));
    }

    #[test]
    fn test_assigned_node_port() {
        let mut service = build_service(NAME, "gzctf", &sample_config());
        assert_eq!(assigned_node_port(&service), None);

        service.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].node_port = Some(31337);
        assert_eq!(assigned_node_port(&service), Some(31337));
    }
}
