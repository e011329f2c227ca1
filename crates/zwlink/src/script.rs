//! Replay scripts: a simulated topology plus the steps to run against it.
//!
//! ```yaml
//! auto_announce: true
//! networks:
//!   - port: /dev/ttyUSB0
//!     home_id: 42
//!     nodes:
//!       - id: 1
//!         product: Stick
//!       - id: 3
//!         product: Dimmer
//!         values:
//!           - { label: "Level (%)", command_class: 38, data: { kind: BYTE, value: 0 } }
//! steps:
//!   - connect: { name: Stick, port: /dev/ttyUSB0 }
//!   - write: { path: "/Stick/3/Level (Percent)", value: 40 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use zwlink_api::{HomeId, NodeId, Notification, SimData, SimDriver, SimNetwork, ValueId};
use zwlink_core::TreeValue;

use crate::error::CliError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Open ports emit their startup sequence immediately.
    #[serde(default)]
    pub auto_announce: bool,

    /// Setter calls are echoed back as `ValueChanged`.
    #[serde(default)]
    pub echo_writes: bool,

    #[serde(default)]
    pub networks: Vec<SimNetwork>,

    /// Ports that exist but have no network behind them.
    #[serde(default)]
    pub extra_ports: Vec<String>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Open a new controller connection.
    Connect { name: String, port: String },

    /// Emit the startup sequence of the network on `port`.
    Startup { port: String },

    /// Emit one raw notification.
    Notify(Notification),

    /// Change a simulated value and emit `ValueChanged` for it.
    Update {
        home_id: HomeId,
        node_id: NodeId,
        label: String,
        data: SimData,
    },

    /// Mark a simulated node awake or asleep.
    SetAwake {
        home_id: HomeId,
        node_id: NodeId,
        awake: bool,
    },

    /// Write a value to a tree entity as an outside client would.
    Write { path: String, value: TreeValue },

    /// Invoke the operation attached to a tree entity.
    Invoke {
        path: String,
        #[serde(default)]
        args: BTreeMap<String, TreeValue>,
    },

    /// Let timers run for this many milliseconds.
    Wait { ms: u64 },
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&raw).map_err(|e| e.to_string())
        };
        parsed.map_err(|reason| CliError::Script {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Build the simulated driver described by this script.
    pub fn driver(&self) -> SimDriver {
        let driver = SimDriver::new()
            .auto_announce(self.auto_announce)
            .echo_writes(self.echo_writes);
        for network in &self.networks {
            driver.add_network(network.clone());
        }
        for port in &self.extra_ports {
            driver.add_port(port.clone());
        }
        driver
    }

    /// Address of the value labelled `label` on a scripted node.
    pub fn value_id(&self, home_id: HomeId, node_id: NodeId, label: &str) -> Option<ValueId> {
        self.networks
            .iter()
            .filter(|n| n.home_id == home_id)
            .flat_map(|n| &n.nodes)
            .filter(|node| node.id == node_id)
            .flat_map(|node| &node.values)
            .find(|v| v.label == label)
            .map(|v| v.value_id(home_id, node_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "networks": [{
            "port": "/dev/ttyUSB0",
            "home_id": 42,
            "nodes": [{
                "id": 3,
                "product": "Dimmer",
                "values": [{
                    "label": "Level (%)",
                    "command_class": 38,
                    "data": { "kind": "BYTE", "value": 10 }
                }]
            }]
        }],
        "steps": [
            { "connect": { "name": "Stick", "port": "/dev/ttyUSB0" } },
            { "startup": { "port": "/dev/ttyUSB0" } },
            { "update": { "home_id": 42, "node_id": 3, "label": "Level (%)",
                          "data": { "kind": "BYTE", "value": 60 } } },
            { "notify": { "home_id": 42, "node_id": 1, "kind": { "type": "all_nodes_queried" } } },
            { "write": { "path": "/Stick/3/Level (Percent)", "value": 40 } },
            { "invoke": { "path": "/Stick/Refresh" } },
            { "wait": { "ms": 2500 } }
        ]
    }"#;

    #[test]
    fn json_scripts_parse() {
        let script: Script = serde_json::from_str(SCRIPT).unwrap();

        assert_eq!(script.steps.len(), 7);
        assert!(matches!(script.steps[0], Step::Connect { .. }));
        assert!(matches!(script.steps[4], Step::Write { value: TreeValue::Number(_), .. }));
        assert!(matches!(&script.steps[5], Step::Invoke { args, .. } if args.is_empty()));
    }

    #[test]
    fn labels_resolve_to_value_ids() {
        let script: Script = serde_json::from_str(SCRIPT).unwrap();

        let id = script.value_id(HomeId(42), 3, "Level (%)").unwrap();
        assert_eq!(id.command_class, 38);
        assert_eq!(id.node_id, 3);
        assert!(script.value_id(HomeId(42), 3, "Missing").is_none());
        assert!(script.value_id(HomeId(7), 3, "Level (%)").is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<Script>(r#"{ "stepz": [] }"#).is_err());
    }
}
