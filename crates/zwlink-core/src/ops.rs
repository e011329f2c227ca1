// ── Operation names ──
//
// Entity and parameter names under which operations are published. They
// are part of the persisted tree layout and of what hosts invoke, so
// they never change.

use crate::command::{Command, Mailbox};
use crate::error::CoreError;

pub const STATUS: &str = "Status";

// ── Supervisor ───────────────────────────────────────────────────────
pub const ADD_CONNECTION: &str = "Add Connection";

// ── Controller ───────────────────────────────────────────────────────
pub const EDIT: &str = "Edit";
pub const DELETE: &str = "Delete";
pub const ALL_ON: &str = "All On";
pub const ALL_OFF: &str = "All Off";
pub const REFRESH: &str = "Refresh";

/// Every operation published on a controller entity.
pub const CONTROLLER_OPERATIONS: [&str; 5] = [EDIT, DELETE, ALL_ON, ALL_OFF, REFRESH];

// ── Device ───────────────────────────────────────────────────────────
pub const RENAME: &str = "Rename";
pub const CHANGE_NODE_ID: &str = "Change Node ID";

// ── Parameters ───────────────────────────────────────────────────────
pub const PARAM_NAME: &str = "Name";
pub const PARAM_PORT: &str = "Comm Port ID";
pub const PARAM_NODE_ID: &str = "Node ID";

/// Default name offered by the add-connection operation.
pub const DEFAULT_CONNECTION_NAME: &str = "USB Port";

/// Queue `command` from inside an operation handler.
pub(crate) fn enqueue(mailbox: &Mailbox, command: Command) -> Result<(), CoreError> {
    if mailbox.command(command) {
        Ok(())
    } else {
        Err(CoreError::Internal("controller session has stopped".into()))
    }
}
