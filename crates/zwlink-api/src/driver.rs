// ── Driver abstraction ──
//
// The driver owns the radio, the protocol decoding, and the per-port
// connections. Everything above it talks to the network through this
// trait: typed value getters/setters keyed by `ValueId`, controller-wide
// commands, and a single process-wide notification callback.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Error;
use crate::notification::Notification;
use crate::value::{HomeId, NodeId, ValueId};

/// Process-wide notification callback.
///
/// Invoked serially by the driver for each controller; different
/// controllers may invoke it concurrently.
pub type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// A Z-Wave driver library.
///
/// Calls are blocking but bounded by the driver itself and are never
/// cancelled once issued. Value getters read the driver's local cache;
/// setters and requests are queued onto the network.
pub trait Driver: Send + Sync + 'static {
    // ── Session ──────────────────────────────────────────────────────

    /// Register the notification callback. Allowed once per process:
    /// unsubscribing is not supported.
    fn subscribe(&self, callback: NotificationCallback) -> Result<(), Error>;

    /// Open a controller connection on `port`.
    fn add_connection(&self, port: &str) -> Result<(), Error>;

    /// Close the controller connection on `port`.
    fn remove_connection(&self, port: &str) -> Result<(), Error>;

    /// Serial ports a controller could be attached to.
    fn available_ports(&self) -> BTreeSet<String>;

    // ── Node information ─────────────────────────────────────────────

    fn controller_node_id(&self, home_id: HomeId) -> Result<NodeId, Error>;

    fn node_product_name(&self, home_id: HomeId, node_id: NodeId) -> Result<String, Error>;

    fn is_node_awake(&self, home_id: HomeId, node_id: NodeId) -> Result<bool, Error>;

    // ── Value metadata ───────────────────────────────────────────────

    fn value_label(&self, id: &ValueId) -> Result<String, Error>;

    fn value_units(&self, id: &ValueId) -> Result<String, Error>;

    // ── Typed getters ────────────────────────────────────────────────

    fn get_bool(&self, id: &ValueId) -> Result<bool, Error>;
    fn get_byte(&self, id: &ValueId) -> Result<u8, Error>;
    fn get_float(&self, id: &ValueId) -> Result<f32, Error>;
    fn get_int(&self, id: &ValueId) -> Result<i32, Error>;
    fn get_short(&self, id: &ValueId) -> Result<i16, Error>;
    fn get_string(&self, id: &ValueId) -> Result<String, Error>;
    fn get_list_selection(&self, id: &ValueId) -> Result<String, Error>;
    fn get_list_items(&self, id: &ValueId) -> Result<Vec<String>, Error>;
    fn get_raw(&self, id: &ValueId) -> Result<Vec<u8>, Error>;

    // ── Typed setters ────────────────────────────────────────────────
    //
    // There is no short setter: `Short` values go through `set_int`.

    fn set_bool(&self, id: &ValueId, value: bool) -> Result<(), Error>;
    fn set_byte(&self, id: &ValueId, value: u8) -> Result<(), Error>;
    fn set_float(&self, id: &ValueId, value: f32) -> Result<(), Error>;
    fn set_int(&self, id: &ValueId, value: i32) -> Result<(), Error>;
    fn set_string(&self, id: &ValueId, value: &str) -> Result<(), Error>;
    fn set_list_selection(&self, id: &ValueId, selection: &str) -> Result<(), Error>;
    fn set_raw(&self, id: &ValueId, value: &[u8]) -> Result<(), Error>;

    // ── Network commands ─────────────────────────────────────────────

    fn switch_all_on(&self, home_id: HomeId) -> Result<(), Error>;
    fn switch_all_off(&self, home_id: HomeId) -> Result<(), Error>;
    fn refresh_node_info(&self, home_id: HomeId, node_id: NodeId) -> Result<(), Error>;
    fn request_node_state(&self, home_id: HomeId, node_id: NodeId) -> Result<(), Error>;

    /// Persist the network configuration the driver has learned.
    fn write_config(&self, home_id: HomeId) -> Result<(), Error>;
}
