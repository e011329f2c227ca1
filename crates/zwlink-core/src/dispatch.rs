// ── Notification dispatcher ──
//
// Classifies each driver notification and calls the matching handler.
// No business logic lives here: the match is exhaustive over
// `NotificationKind`, kinds with no handler are logged, and handler
// failures are logged and absorbed so one bad event never stalls the
// stream.

use tracing::{debug, trace, warn};
use zwlink_api::{HomeId, NodeId, Notification, NotificationCode, NotificationKind, ValueId};

use crate::codec::PointMeta;
use crate::error::CoreError;

/// Which full-query milestone the driver reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Milestone {
    AwakeNodesQueried,
    AllNodesQueried,
    AllNodesQueriedSomeDead,
}

/// Receiver of classified notifications, implemented by the controller
/// session actor.
pub(crate) trait NotificationHandler {
    fn driver_ready(&mut self, home_id: HomeId, node_id: NodeId, port: &str) -> Result<(), CoreError>;

    fn query_milestone(&mut self, milestone: Milestone) -> Result<(), CoreError>;

    fn node_added(&mut self, node_id: NodeId) -> Result<(), CoreError>;

    fn node_removed(&mut self, node_id: NodeId) -> Result<(), CoreError>;

    fn node_naming(&mut self, node_id: NodeId) -> Result<(), CoreError>;

    fn node_queries_complete(&mut self, node_id: NodeId) -> Result<(), CoreError>;

    fn value_added(&mut self, value: &ValueId, meta: PointMeta) -> Result<(), CoreError>;

    /// Both `ValueChanged` and `ValueRefreshed`.
    fn value_changed(&mut self, value: &ValueId) -> Result<(), CoreError>;

    fn value_removed(&mut self, value: &ValueId) -> Result<(), CoreError>;

    /// A generic driver report; carries the network health checks.
    fn health_report(&mut self, node_id: NodeId, code: NotificationCode) -> Result<(), CoreError>;
}

/// Route one notification to `handler`.
pub(crate) fn dispatch<H: NotificationHandler>(handler: &mut H, notification: &Notification) {
    let Notification {
        home_id,
        node_id,
        kind,
    } = notification;
    let (home_id, node_id) = (*home_id, *node_id);

    let result = match kind {
        // ── Driver lifecycle ─────────────────────────────────────────
        NotificationKind::DriverReady { port } => handler.driver_ready(home_id, node_id, port),
        NotificationKind::DriverFailed { port } => {
            warn!(port = %port, "driver failed to open the connection");
            Ok(())
        }
        NotificationKind::DriverReset | NotificationKind::DriverRemoved => {
            debug!(%home_id, kind = kind.as_ref(), "driver lifecycle event");
            Ok(())
        }

        // ── Query milestones ─────────────────────────────────────────
        NotificationKind::AwakeNodesQueried => handler.query_milestone(Milestone::AwakeNodesQueried),
        NotificationKind::AllNodesQueried => handler.query_milestone(Milestone::AllNodesQueried),
        NotificationKind::AllNodesQueriedSomeDead => {
            handler.query_milestone(Milestone::AllNodesQueriedSomeDead)
        }

        // ── Node lifecycle ───────────────────────────────────────────
        NotificationKind::NodeAdded => handler.node_added(node_id),
        NotificationKind::NodeRemoved => handler.node_removed(node_id),
        NotificationKind::NodeNaming => handler.node_naming(node_id),
        NotificationKind::NodeQueriesComplete => handler.node_queries_complete(node_id),
        NotificationKind::PollingEnabled
        | NotificationKind::PollingDisabled
        | NotificationKind::NodeNew
        | NotificationKind::NodeEvent { .. }
        | NotificationKind::NodeProtocolInfo
        | NotificationKind::EssentialNodeQueriesComplete => {
            trace!(%home_id, node_id, kind = kind.as_ref(), "node event");
            Ok(())
        }

        // ── Values ───────────────────────────────────────────────────
        NotificationKind::ValueAdded {
            value,
            group,
            scene_id,
            button_id,
        } => {
            let meta = PointMeta {
                group: *group,
                scene_id: *scene_id,
                button_id: *button_id,
                unit: String::new(),
            };
            handler.value_added(value, meta)
        }
        NotificationKind::ValueChanged { value } | NotificationKind::ValueRefreshed { value } => {
            handler.value_changed(value)
        }
        NotificationKind::ValueRemoved { value } => handler.value_removed(value),

        // ── Associations, scenes, buttons ────────────────────────────
        NotificationKind::Group { .. }
        | NotificationKind::SceneEvent { .. }
        | NotificationKind::CreateButton { .. }
        | NotificationKind::DeleteButton { .. }
        | NotificationKind::ButtonOn { .. }
        | NotificationKind::ButtonOff { .. } => {
            debug!(%home_id, node_id, kind = kind.as_ref(), "event not mirrored into the tree");
            Ok(())
        }

        // ── Health & controller ──────────────────────────────────────
        NotificationKind::Generic { code } => handler.health_report(node_id, *code),
        NotificationKind::ControllerCommand { state } => {
            debug!(%home_id, state, "controller command progress");
            Ok(())
        }
        NotificationKind::NotSupported => {
            debug!(%home_id, node_id, "driver reported an unsupported request");
            Ok(())
        }
        NotificationKind::Unknown => {
            debug!(%home_id, node_id, "unrecognized notification dropped");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(%home_id, node_id, kind = kind.as_ref(), error = %e, "notification handler failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use zwlink_api::{Genre, ValueKind};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail: bool,
    }

    impl Recorder {
        fn record(&mut self, call: String) -> Result<(), CoreError> {
            self.calls.push(call);
            if self.fail {
                Err(CoreError::Internal("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    impl NotificationHandler for Recorder {
        fn driver_ready(&mut self, home_id: HomeId, node_id: NodeId, port: &str) -> Result<(), CoreError> {
            self.record(format!("ready {} {node_id} {port}", home_id.0))
        }
        fn query_milestone(&mut self, milestone: Milestone) -> Result<(), CoreError> {
            self.record(format!("milestone {milestone:?}"))
        }
        fn node_added(&mut self, node_id: NodeId) -> Result<(), CoreError> {
            self.record(format!("added {node_id}"))
        }
        fn node_removed(&mut self, node_id: NodeId) -> Result<(), CoreError> {
            self.record(format!("removed {node_id}"))
        }
        fn node_naming(&mut self, node_id: NodeId) -> Result<(), CoreError> {
            self.record(format!("naming {node_id}"))
        }
        fn node_queries_complete(&mut self, node_id: NodeId) -> Result<(), CoreError> {
            self.record(format!("complete {node_id}"))
        }
        fn value_added(&mut self, value: &ValueId, meta: PointMeta) -> Result<(), CoreError> {
            self.record(format!("value+ {} g{}", value.command_class, meta.group))
        }
        fn value_changed(&mut self, value: &ValueId) -> Result<(), CoreError> {
            self.record(format!("value~ {}", value.command_class))
        }
        fn value_removed(&mut self, value: &ValueId) -> Result<(), CoreError> {
            self.record(format!("value- {}", value.command_class))
        }
        fn health_report(&mut self, node_id: NodeId, code: NotificationCode) -> Result<(), CoreError> {
            self.record(format!("health {node_id} {}", code.as_ref()))
        }
    }

    fn value() -> ValueId {
        ValueId {
            home_id: HomeId(42),
            node_id: 3,
            genre: Genre::User,
            command_class: 0x26,
            instance: 1,
            index: 0,
            kind: ValueKind::Byte,
        }
    }

    fn n(kind: NotificationKind) -> Notification {
        Notification::new(HomeId(42), 3, kind)
    }

    #[test]
    fn handled_kinds_reach_their_handler() {
        let mut recorder = Recorder::default();
        for notification in [
            n(NotificationKind::DriverReady {
                port: "/dev/ttyUSB0".into(),
            }),
            n(NotificationKind::NodeAdded),
            n(NotificationKind::ValueAdded {
                value: value(),
                group: 2,
                scene_id: 0,
                button_id: 0,
            }),
            n(NotificationKind::ValueRefreshed { value: value() }),
            n(NotificationKind::ValueChanged { value: value() }),
            n(NotificationKind::ValueRemoved { value: value() }),
            n(NotificationKind::NodeNaming),
            n(NotificationKind::NodeQueriesComplete),
            n(NotificationKind::AllNodesQueriedSomeDead),
            n(NotificationKind::Generic {
                code: NotificationCode::Dead,
            }),
            n(NotificationKind::NodeRemoved),
        ] {
            dispatch(&mut recorder, &notification);
        }

        assert_eq!(
            recorder.calls,
            vec![
                "ready 42 3 /dev/ttyUSB0",
                "added 3",
                "value+ 38 g2",
                "value~ 38",
                "value~ 38",
                "value- 38",
                "naming 3",
                "complete 3",
                "milestone AllNodesQueriedSomeDead",
                "health 3 dead",
                "removed 3",
            ]
        );
    }

    #[test]
    fn log_only_and_unknown_kinds_are_dropped() {
        let mut recorder = Recorder::default();
        for kind in [
            NotificationKind::DriverReset,
            NotificationKind::DriverRemoved,
            NotificationKind::DriverFailed {
                port: "/dev/ttyUSB0".into(),
            },
            NotificationKind::PollingEnabled,
            NotificationKind::NodeEvent { event: 255 },
            NotificationKind::SceneEvent { scene_id: 1 },
            NotificationKind::ButtonOn { button_id: 1 },
            NotificationKind::ControllerCommand { state: 7 },
            NotificationKind::NotSupported,
            NotificationKind::Unknown,
        ] {
            dispatch(&mut recorder, &n(kind));
        }
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn handler_errors_do_not_stop_the_stream() {
        let mut recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        dispatch(&mut recorder, &n(NotificationKind::NodeAdded));
        dispatch(&mut recorder, &n(NotificationKind::NodeRemoved));
        assert_eq!(recorder.calls, vec!["added 3", "removed 3"]);
    }
}
