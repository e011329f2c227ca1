// ── Core error types ──
//
// User-facing errors from zwlink-core. Transient driver faults, unknown
// notification kinds, and missing identity mappings are absorbed by the
// session actor and only logged; what reaches callers is configuration
// rejection and command failures.

use thiserror::Error;
use zwlink_api::{NodeId, ValueKind};

use crate::tree::TreeError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("A connection named '{name}' already exists")]
    DuplicateConnection { name: String },

    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    // ── Session errors ───────────────────────────────────────────────
    #[error("No controller session named '{name}'")]
    SessionNotFound { name: String },

    #[error("Controller session '{name}' has been removed")]
    SessionRemoved { name: String },

    #[error("Controller session '{name}' is not ready")]
    NotReady { name: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Entity {entity} is already bound to node {node_id}")]
    IdentityConflict { entity: String, node_id: NodeId },

    #[error("Point not found: {identifier}")]
    PointNotFound { identifier: String },

    #[error("Value kind {kind} is not supported")]
    UnsupportedValueKind { kind: ValueKind },

    #[error("Cannot write {value} to a {kind} point")]
    InvalidValue { kind: ValueKind, value: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Driver error: {0}")]
    Driver(#[from] zwlink_api::Error),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error rejects user input, as opposed to a runtime
    /// failure of the engine or one of its collaborators.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateConnection { .. }
                | Self::MissingParameter { .. }
                | Self::InvalidParameter { .. }
        )
    }
}
