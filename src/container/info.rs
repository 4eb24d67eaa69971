//! Read-only projections for diagnostics and reconciliation sweeps

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// Summary of one workload in the managed namespace
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Backend identifier
    pub id: String,
    /// Resource name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Backend-reported state text
    pub state: String,
}

/// Capacity, conditions and addresses of one cluster node or engine host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Capacity by resource name
    pub capacity: BTreeMap<String, String>,
    /// `(type, status)` pairs
    pub conditions: Vec<(String, String)>,
    /// `(address, type)` pairs
    pub addresses: Vec<(String, String)>,
}

/// Render node projections as the operator-facing host report
pub fn render_host_report(title: &str, nodes: &[NodeInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[[ {} ]]", title);
    for node in nodes {
        let _ = writeln!(out, "[{}]", node.name);
        for (key, value) in &node.capacity {
            let _ = writeln!(out, "{:<20}: {}", key, value);
        }
        for (type_, status) in &node.conditions {
            let _ = writeln!(out, "{:<20}: {}", type_, status);
        }
        let _ = writeln!(out, "{:<20}: ", "Addresses");
        for (address, type_) in &node.addresses {
            let _ = writeln!(out, "{:<22}{}({})", "", address, type_);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_host_report() {
        let node = NodeInfo {
            name: "worker-1".to_string(),
            capacity: BTreeMap::from([
                ("cpu".to_string(), "4".to_string()),
                ("memory".to_string(), "8Gi".to_string()),
            ]),
            conditions: vec![("Ready".to_string(), "True".to_string())],
            addresses: vec![("10.0.0.7".to_string(), "InternalIP".to_string())],
        };

        let report = render_host_report("K8s Nodes", &[node]);
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines[0], "[[ K8s Nodes ]]");
        assert_eq!(lines[1], "[worker-1]");
        assert_eq!(lines[2], format!("{:<20}: 4", "cpu"));
        assert_eq!(lines[3], format!("{:<20}: 8Gi", "memory"));
        assert_eq!(lines[4], format!("{:<20}: True", "Ready"));
        assert_eq!(lines[5], format!("{:<20}: ", "Addresses"));
        assert_eq!(lines[6], format!("{:<22}10.0.0.7(InternalIP)", ""));
    }

    #[test]
    fn test_render_empty_report() {
        assert_eq!(render_host_report("K8s Nodes", &[]), "[[ K8s Nodes ]]\n");
    }
}
