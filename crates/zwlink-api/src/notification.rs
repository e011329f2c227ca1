// ── Driver notifications ──
//
// The driver emits one flat stream of notifications per process. Every
// notification is scoped to a home id; the driver-lifecycle kinds also
// name the port they originate from, since they may arrive before the
// home id is known to anyone.

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::value::{HomeId, NodeId, ValueId};

/// One event from the driver's notification stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub home_id: HomeId,
    #[serde(default)]
    pub node_id: NodeId,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(home_id: impl Into<HomeId>, node_id: NodeId, kind: NotificationKind) -> Self {
        Self {
            home_id: home_id.into(),
            node_id,
            kind,
        }
    }

    /// The value address carried by value-scoped kinds.
    pub fn value_id(&self) -> Option<&ValueId> {
        match &self.kind {
            NotificationKind::ValueAdded { value, .. }
            | NotificationKind::ValueRemoved { value }
            | NotificationKind::ValueChanged { value }
            | NotificationKind::ValueRefreshed { value } => Some(value),
            _ => None,
        }
    }

    /// Port named by driver-lifecycle kinds.
    pub fn port(&self) -> Option<&str> {
        match &self.kind {
            NotificationKind::DriverReady { port } | NotificationKind::DriverFailed { port } => {
                Some(port)
            }
            _ => None,
        }
    }
}

/// Every notification kind the driver is known to emit.
///
/// Decoding is forward-compatible: an unrecognized `type` tag becomes
/// [`NotificationKind::Unknown`] instead of failing the whole stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    // ── Driver lifecycle ─────────────────────────────────────────────
    DriverReady {
        port: String,
    },
    DriverFailed {
        port: String,
    },
    DriverReset,
    DriverRemoved,

    // ── Query milestones ─────────────────────────────────────────────
    AwakeNodesQueried,
    AllNodesQueried,
    AllNodesQueriedSomeDead,

    // ── Node lifecycle ───────────────────────────────────────────────
    PollingEnabled,
    PollingDisabled,
    NodeNew,
    NodeAdded,
    NodeRemoved,
    NodeNaming,
    NodeEvent {
        #[serde(default)]
        event: u8,
    },
    NodeProtocolInfo,
    EssentialNodeQueriesComplete,
    NodeQueriesComplete,

    // ── Values ───────────────────────────────────────────────────────
    ValueAdded {
        value: ValueId,
        #[serde(default)]
        group: u8,
        #[serde(default)]
        scene_id: u8,
        #[serde(default)]
        button_id: u8,
    },
    ValueRemoved {
        value: ValueId,
    },
    ValueChanged {
        value: ValueId,
    },
    ValueRefreshed {
        value: ValueId,
    },

    // ── Associations, scenes, buttons ────────────────────────────────
    Group {
        #[serde(default)]
        group: u8,
    },
    SceneEvent {
        #[serde(default)]
        scene_id: u8,
    },
    CreateButton {
        #[serde(default)]
        button_id: u8,
    },
    DeleteButton {
        #[serde(default)]
        button_id: u8,
    },
    ButtonOn {
        #[serde(default)]
        button_id: u8,
    },
    ButtonOff {
        #[serde(default)]
        button_id: u8,
    },

    // ── Health & controller ──────────────────────────────────────────
    /// Generic report from the driver; carries the network health checks.
    #[serde(rename = "notification")]
    Generic {
        code: NotificationCode,
    },
    ControllerCommand {
        #[serde(default)]
        state: u8,
    },
    NotSupported,

    #[serde(other)]
    Unknown,
}

impl NotificationKind {
    /// Milestones after which the device set is authoritative.
    pub fn is_query_milestone(&self) -> bool {
        matches!(
            self,
            Self::AwakeNodesQueried | Self::AllNodesQueried | Self::AllNodesQueriedSomeDead
        )
    }
}

/// Codes carried by a [`NotificationKind::Generic`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationCode {
    MsgComplete,
    Timeout,
    NoOperation,
    Awake,
    Sleep,
    Dead,
    Alive,
    #[serde(other)]
    Other,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::{Genre, ValueKind};

    #[test]
    fn decodes_value_added_with_defaults() {
        let json = serde_json::json!({
            "home_id": 42,
            "node_id": 3,
            "kind": {
                "type": "value_added",
                "value": {
                    "home_id": 42,
                    "node_id": 3,
                    "genre": "USER",
                    "command_class": 38,
                    "instance": 1,
                    "index": 0,
                    "kind": "DECIMAL"
                }
            }
        });

        let n: Notification = serde_json::from_value(json).unwrap();
        let value = n.value_id().unwrap();
        assert_eq!(value.genre, Genre::User);
        assert_eq!(value.kind, ValueKind::Decimal);
        assert!(matches!(
            n.kind,
            NotificationKind::ValueAdded {
                group: 0,
                scene_id: 0,
                button_id: 0,
                ..
            }
        ));
    }

    #[test]
    fn unknown_kind_decodes_to_unknown() {
        let json = r#"{ "home_id": 1, "kind": { "type": "user_alerts" } }"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::Unknown);
        assert_eq!(n.node_id, 0);
    }

    #[test]
    fn driver_ready_names_its_port() {
        let n = Notification::new(
            42u64,
            1,
            NotificationKind::DriverReady {
                port: "/dev/ttyUSB0".into(),
            },
        );
        assert_eq!(n.port(), Some("/dev/ttyUSB0"));
        assert_eq!(n.kind.as_ref(), "driver_ready");
    }

    #[test]
    fn generic_notification_uses_wire_name() {
        let yaml = "home_id: 7\nnode_id: 1\nkind:\n  type: notification\n  code: dead\n";
        let n: Notification = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            n.kind,
            NotificationKind::Generic {
                code: NotificationCode::Dead
            }
        );
    }

    #[test]
    fn milestones_are_classified() {
        assert!(NotificationKind::AllNodesQueriedSomeDead.is_query_milestone());
        assert!(NotificationKind::AwakeNodesQueried.is_query_milestone());
        assert!(!NotificationKind::NodeQueriesComplete.is_query_milestone());
    }
}
