//! Notification-driven synchronization between a Z-Wave driver and an
//! entity tree.
//!
//! This crate mirrors every controller, device, and value a driver
//! reports into a hierarchical tree, and forwards writes made to that
//! tree back down to the network:
//!
//! - **[`Supervisor`]**: Process-level entry point. Registers the single
//!   driver callback, restores controllers persisted in the tree, and
//!   publishes the `Add Connection` operation.
//!
//! - **[`ControllerSession`]**: One hardware connection. A single-writer
//!   actor applies driver notifications, host [`Command`]s, and tree
//!   requests in arrival order; [`SessionStatus`] is observable through a
//!   `watch` channel.
//!
//! - **Device sessions**: Per-device state. The device's tree entity, its
//!   points, and the rename / change-node-id / refresh operations.
//!
//! - **[`codec`]**: Two-way mapping between the driver's tagged values
//!   and [`TreeValue`]s, plus the point attributes persisted in the tree.
//!
//! - **[`tree`]**: The [`Tree`] collaborator boundary and [`MemoryTree`],
//!   an in-process implementation with JSON snapshots.

pub mod codec;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod ops;
pub mod session;
pub mod supervisor;
pub mod tree;

mod dispatch;
mod index;
mod route;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::EngineConfig;
pub use device::{DeviceSummary, PointEntry};
pub use error::CoreError;
pub use session::{ControllerSession, SessionStatus};
pub use supervisor::Supervisor;
pub use tree::{
    Action, ActionArgs, EntityId, EntitySnapshot, MemoryTree, Param, Permission, Tree, TreeError,
    TreeValue, ValueType, WriteEvent,
};
