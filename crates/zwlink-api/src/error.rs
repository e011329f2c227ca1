// ── Driver error types ──
//
// Everything the driver boundary can report. The core crate translates
// these into `CoreError` variants; consumers never match on them directly.

use thiserror::Error;

use crate::value::{HomeId, NodeId, ValueId, ValueKind};

/// Errors surfaced by a [`Driver`](crate::Driver) implementation.
#[derive(Debug, Error)]
pub enum Error {
    // ── Session errors ───────────────────────────────────────────────
    #[error("notification callback already registered for this process")]
    AlreadySubscribed,

    #[error("no connection open on port {port}")]
    UnknownPort { port: String },

    #[error("port {port} is already in use")]
    PortInUse { port: String },

    #[error("network {home_id} is not ready")]
    NotReady { home_id: HomeId },

    #[error("node {node_id} on network {home_id} is unreachable")]
    Unreachable { home_id: HomeId, node_id: NodeId },

    // ── Value errors ─────────────────────────────────────────────────
    #[error("unknown node {node_id} on network {home_id}")]
    UnknownNode { home_id: HomeId, node_id: NodeId },

    #[error("unknown value {0}")]
    UnknownValue(ValueId),

    #[error("value {id} is {actual}, not {expected}")]
    TypeMismatch {
        id: ValueId,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("value kind {0} is not supported by this driver")]
    Unsupported(ValueKind),

    // ── I/O ──────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
