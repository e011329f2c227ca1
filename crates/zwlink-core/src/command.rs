// ── Command API ──
//
// Every host-initiated operation on a controller session flows through
// the `Command` enum. Tree operations and write-back handlers enqueue
// commands without waiting; `ControllerSession::execute` enqueues one
// and awaits its result.

use tokio::sync::{mpsc, oneshot};
use zwlink_api::{NodeId, Notification};

use crate::device::DeviceSummary;
use crate::error::CoreError;
use crate::tree::{EntityId, TreeValue};

/// A command envelope sent through a session's mailbox.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    /// `None` for fire-and-forget commands raised by tree handlers.
    pub response_tx: Option<oneshot::Sender<Result<CommandResult, CoreError>>>,
}

/// All operations a host can perform on one controller session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Controller operations ────────────────────────────────────────
    /// Relabel the controller and/or move it to another port.
    Edit {
        name: Option<String>,
        port: Option<String>,
    },
    Delete,
    Restart,
    /// Reopen a connection whose port failed to open. No-op while the
    /// port is open.
    Reconnect,
    AllOn,
    AllOff,

    // ── Device operations ────────────────────────────────────────────
    RenameDevice { device: EntityId, name: String },
    ChangeNodeId { device: EntityId, node_id: NodeId },
    RefreshDevice { device: EntityId },

    // ── Point operations ─────────────────────────────────────────────
    /// Forward an externally written point value to the driver.
    WritePoint { entity: EntityId, value: TreeValue },

    // ── Queries ──────────────────────────────────────────────────────
    ListDevices,
}

impl Command {
    /// Whether the command needs the driver to have reported the home id.
    pub(crate) fn requires_network(&self) -> bool {
        !matches!(
            self,
            Self::Edit { .. }
                | Self::Delete
                | Self::Restart
                | Self::Reconnect
                | Self::ListDevices
        )
    }
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Ok,
    Devices(Vec<DeviceSummary>),
}

// ── Mailbox ──────────────────────────────────────────────────────────

/// Everything a session actor consumes, in arrival order.
pub(crate) enum SessionMessage {
    Notification(Notification),
    Command(CommandEnvelope),
    /// Answered once every earlier message has been handled.
    Barrier(oneshot::Sender<()>),
    /// Close the driver connection and stop, keeping the tree entity.
    Shutdown(oneshot::Sender<()>),
}

/// Sending half of a session's single FIFO inbox.
///
/// Unbounded so that the driver callback and tree handlers, which run
/// on foreign threads and must not block, can always enqueue.
#[derive(Clone)]
pub(crate) struct Mailbox(mpsc::UnboundedSender<SessionMessage>);

impl Mailbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Returns `false` once the session has stopped.
    pub fn send(&self, message: SessionMessage) -> bool {
        self.0.send(message).is_ok()
    }

    /// Whether both handles feed the same session.
    pub fn same_session(&self, other: &Mailbox) -> bool {
        self.0.same_channel(&other.0)
    }

    pub fn notify(&self, notification: Notification) -> bool {
        self.send(SessionMessage::Notification(notification))
    }

    /// Enqueue a command without waiting for its result.
    pub fn command(&self, command: Command) -> bool {
        self.send(SessionMessage::Command(CommandEnvelope {
            command,
            response_tx: None,
        }))
    }
}
