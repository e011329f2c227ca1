//! In-memory simulated Z-Wave network.
//!
//! [`SimDriver`] implements [`Driver`] against a scripted set of networks
//! so the synchronization engine can be exercised without hardware. It
//! records every mutating call for inspection and can replay the startup
//! notification sequence a real driver emits when a port is opened.
//!
//! Networks are plain serde types, so a whole topology can be loaded
//! from a YAML or JSON script:
//!
//! ```yaml
//! port: /dev/ttyUSB0
//! home_id: 42
//! controller_node: 1
//! nodes:
//!   - id: 3
//!     product: Multisensor
//!     values:
//!       - label: Temperature
//!         command_class: 0x31
//!         units: C
//!         data: { kind: DECIMAL, value: 21.5 }
//! ```

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::driver::{Driver, NotificationCallback};
use crate::error::Error;
use crate::notification::{Notification, NotificationKind};
use crate::value::{Genre, HomeId, NodeId, ValueId, ValueKind};

// ── Topology ────────────────────────────────────────────────────────

/// One simulated controller and the nodes it can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimNetwork {
    pub port: String,
    pub home_id: HomeId,
    #[serde(default = "default_controller_node")]
    pub controller_node: NodeId,
    #[serde(default)]
    pub nodes: Vec<SimNode>,
}

/// One simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimNode {
    pub id: NodeId,
    #[serde(default)]
    pub product: String,
    #[serde(default = "default_true")]
    pub awake: bool,
    #[serde(default)]
    pub values: Vec<SimValue>,
}

/// One simulated value on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimValue {
    pub label: String,
    pub command_class: u8,
    #[serde(default = "default_instance")]
    pub instance: u8,
    #[serde(default)]
    pub index: u16,
    #[serde(default = "default_genre")]
    pub genre: Genre,
    #[serde(default)]
    pub units: String,
    pub data: SimData,
}

/// Typed payload of a simulated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimData {
    Bool(bool),
    Byte(u8),
    Decimal(f32),
    Int(i32),
    Short(i16),
    String(String),
    List { selection: String, items: Vec<String> },
    Raw(Vec<u8>),
    Schedule,
    Button,
}

impl SimData {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Byte(_) => ValueKind::Byte,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Int(_) => ValueKind::Int,
            Self::Short(_) => ValueKind::Short,
            Self::String(_) => ValueKind::String,
            Self::List { .. } => ValueKind::List,
            Self::Raw(_) => ValueKind::Raw,
            Self::Schedule => ValueKind::Schedule,
            Self::Button => ValueKind::Button,
        }
    }
}

impl SimValue {
    pub fn new(label: impl Into<String>, command_class: u8, data: SimData) -> Self {
        Self {
            label: label.into(),
            command_class,
            instance: default_instance(),
            index: 0,
            genre: default_genre(),
            units: String::new(),
            data,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: u16) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Address of this value on `node_id` of `home_id`.
    pub fn value_id(&self, home_id: HomeId, node_id: NodeId) -> ValueId {
        ValueId {
            home_id,
            node_id,
            genre: self.genre,
            command_class: self.command_class,
            instance: self.instance,
            index: self.index,
            kind: self.data.kind(),
        }
    }
}

impl SimNode {
    pub fn new(id: NodeId, product: impl Into<String>) -> Self {
        Self {
            id,
            product: product.into(),
            awake: true,
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: SimValue) -> Self {
        self.values.push(value);
        self
    }
}

impl SimNetwork {
    pub fn new(port: impl Into<String>, home_id: impl Into<HomeId>, controller_node: NodeId) -> Self {
        Self {
            port: port.into(),
            home_id: home_id.into(),
            controller_node,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: SimNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// The notifications a driver emits after the port is opened: ready,
    /// every node and value, then the all-nodes-queried milestone.
    pub fn startup_sequence(&self) -> Vec<Notification> {
        let home = self.home_id;
        let mut out = vec![Notification::new(
            home,
            self.controller_node,
            NotificationKind::DriverReady {
                port: self.port.clone(),
            },
        )];
        for node in &self.nodes {
            out.push(Notification::new(home, node.id, NotificationKind::NodeAdded));
            for value in &node.values {
                out.push(Notification::new(
                    home,
                    node.id,
                    NotificationKind::ValueAdded {
                        value: value.value_id(home, node.id),
                        group: 0,
                        scene_id: 0,
                        button_id: 0,
                    },
                ));
            }
            out.push(Notification::new(
                home,
                node.id,
                NotificationKind::NodeQueriesComplete,
            ));
        }
        out.push(Notification::new(
            home,
            self.controller_node,
            NotificationKind::AllNodesQueried,
        ));
        out
    }

    fn node(&self, node_id: NodeId) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    fn value(&self, id: &ValueId) -> Option<&SimValue> {
        self.node(id.node_id)?
            .values
            .iter()
            .find(|v| v.value_id(self.home_id, id.node_id) == *id)
    }

    fn value_mut(&mut self, id: &ValueId) -> Option<&mut SimValue> {
        let home = self.home_id;
        self.nodes
            .iter_mut()
            .find(|n| n.id == id.node_id)?
            .values
            .iter_mut()
            .find(|v| v.value_id(home, id.node_id) == *id)
    }
}

fn default_controller_node() -> NodeId {
    1
}
fn default_true() -> bool {
    true
}
fn default_instance() -> u8 {
    1
}
fn default_genre() -> Genre {
    Genre::User
}

// ── Recorded calls ──────────────────────────────────────────────────

/// A mutating call made against the simulated driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum DriverCall {
    AddConnection { port: String },
    RemoveConnection { port: String },
    SetBool { id: ValueId, value: bool },
    SetByte { id: ValueId, value: u8 },
    SetFloat { id: ValueId, value: f32 },
    SetInt { id: ValueId, value: i32 },
    SetString { id: ValueId, value: String },
    SetListSelection { id: ValueId, value: String },
    SetRaw { id: ValueId, value: Vec<u8> },
    SwitchAllOn { home_id: HomeId },
    SwitchAllOff { home_id: HomeId },
    RefreshNodeInfo { home_id: HomeId, node_id: NodeId },
    RequestNodeState { home_id: HomeId, node_id: NodeId },
    WriteConfig { home_id: HomeId },
}

impl DriverCall {
    /// Whether this call writes a point value.
    pub fn is_setter(&self) -> bool {
        matches!(
            self,
            Self::SetBool { .. }
                | Self::SetByte { .. }
                | Self::SetFloat { .. }
                | Self::SetInt { .. }
                | Self::SetString { .. }
                | Self::SetListSelection { .. }
                | Self::SetRaw { .. }
        )
    }
}

// ── SimDriver ───────────────────────────────────────────────────────

#[derive(Default)]
struct SimState {
    extra_ports: BTreeSet<String>,
    networks: Vec<SimNetwork>,
    open: BTreeSet<String>,
    calls: Vec<DriverCall>,
    auto_announce: bool,
    echo_writes: bool,
}

impl SimState {
    fn network_by_home(&self, home_id: HomeId) -> Result<&SimNetwork, Error> {
        self.networks
            .iter()
            .find(|n| n.home_id == home_id)
            .ok_or(Error::NotReady { home_id })
    }

    fn network_by_home_mut(&mut self, home_id: HomeId) -> Result<&mut SimNetwork, Error> {
        self.networks
            .iter_mut()
            .find(|n| n.home_id == home_id)
            .ok_or(Error::NotReady { home_id })
    }

    fn value(&self, id: &ValueId) -> Result<&SimValue, Error> {
        self.network_by_home(id.home_id)?
            .value(id)
            .ok_or(Error::UnknownValue(*id))
    }

    fn data(&self, id: &ValueId) -> Result<&SimData, Error> {
        self.value(id).map(|v| &v.data)
    }

    fn store(&mut self, id: &ValueId, data: SimData, call: DriverCall) -> Result<(), Error> {
        let slot = self
            .network_by_home_mut(id.home_id)?
            .value_mut(id)
            .ok_or(Error::UnknownValue(*id))?;
        slot.data = data;
        self.calls.push(call);
        Ok(())
    }
}

/// A [`Driver`] backed by in-memory networks.
#[derive(Default)]
pub struct SimDriver {
    state: Mutex<SimState>,
    callback: OnceLock<NotificationCallback>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network reachable through its port.
    #[must_use]
    pub fn with_network(self, network: SimNetwork) -> Self {
        self.add_network(network);
        self
    }

    /// Emit the startup sequence whenever a port is opened.
    #[must_use]
    pub fn auto_announce(self, enabled: bool) -> Self {
        self.state().auto_announce = enabled;
        self
    }

    /// Emit `ValueChanged` after every successful setter call, the way a
    /// real driver reports the new value back.
    #[must_use]
    pub fn echo_writes(self, enabled: bool) -> Self {
        self.state().echo_writes = enabled;
        self
    }

    /// Advertise a port with no network behind it.
    pub fn add_port(&self, port: impl Into<String>) {
        self.state().extra_ports.insert(port.into());
    }

    pub fn add_network(&self, network: SimNetwork) {
        let mut state = self.state();
        state.networks.retain(|n| n.port != network.port);
        state.networks.push(network);
    }

    /// Add a node to a network. Emits nothing; pair with [`emit`](Self::emit).
    pub fn add_node(&self, home_id: HomeId, node: SimNode) -> Result<(), Error> {
        let mut state = self.state();
        let network = state.network_by_home_mut(home_id)?;
        network.nodes.retain(|n| n.id != node.id);
        network.nodes.push(node);
        Ok(())
    }

    /// Drop a node from a network. Emits nothing.
    pub fn remove_node(&self, home_id: HomeId, node_id: NodeId) -> Result<(), Error> {
        let mut state = self.state();
        state
            .network_by_home_mut(home_id)?
            .nodes
            .retain(|n| n.id != node_id);
        Ok(())
    }

    pub fn set_awake(&self, home_id: HomeId, node_id: NodeId, awake: bool) -> Result<(), Error> {
        let mut state = self.state();
        let node = state
            .network_by_home_mut(home_id)?
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or(Error::UnknownNode { home_id, node_id })?;
        node.awake = awake;
        Ok(())
    }

    /// Overwrite a value's payload without recording a call.
    pub fn set_data(&self, id: &ValueId, data: SimData) -> Result<(), Error> {
        let mut state = self.state();
        let slot = state
            .network_by_home_mut(id.home_id)?
            .value_mut(id)
            .ok_or(Error::UnknownValue(*id))?;
        slot.data = data;
        Ok(())
    }

    pub fn data(&self, id: &ValueId) -> Result<SimData, Error> {
        self.state().data(id).cloned()
    }

    /// Startup sequence for the network on `port`, if any.
    pub fn startup_sequence(&self, port: &str) -> Vec<Notification> {
        self.state()
            .networks
            .iter()
            .find(|n| n.port == port)
            .map(SimNetwork::startup_sequence)
            .unwrap_or_default()
    }

    /// Deliver a notification to the registered callback.
    pub fn emit(&self, notification: Notification) {
        match self.callback.get() {
            Some(callback) => callback(notification),
            None => tracing::debug!(
                kind = notification.kind.as_ref(),
                "no subscriber, notification dropped"
            ),
        }
    }

    pub fn emit_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for n in notifications {
            self.emit(n);
        }
    }

    /// Every mutating call recorded so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    /// Only the value setter calls recorded so far.
    pub fn setter_calls(&self) -> Vec<DriverCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_setter())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn is_open(&self, port: &str) -> bool {
        self.state().open.contains(port)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: DriverCall) {
        self.state().calls.push(call);
    }

    /// Store a written value and echo it back if configured. The echo is
    /// emitted after the state lock is released.
    fn write(&self, id: &ValueId, data: SimData, call: DriverCall) -> Result<(), Error> {
        let echo = {
            let mut state = self.state();
            state.store(id, data, call)?;
            state.echo_writes
        };
        if echo {
            self.emit(Notification::new(
                id.home_id,
                id.node_id,
                NotificationKind::ValueChanged { value: *id },
            ));
        }
        Ok(())
    }

    fn expect_kind(&self, id: &ValueId, expected: ValueKind) -> Result<SimData, Error> {
        let data = self.state().data(id)?.clone();
        if data.kind() == expected {
            Ok(data)
        } else {
            Err(Error::TypeMismatch {
                id: *id,
                expected,
                actual: data.kind(),
            })
        }
    }
}

impl Driver for SimDriver {
    fn subscribe(&self, callback: NotificationCallback) -> Result<(), Error> {
        self.callback
            .set(callback)
            .map_err(|_| Error::AlreadySubscribed)
    }

    fn add_connection(&self, port: &str) -> Result<(), Error> {
        let announce = {
            let mut state = self.state();
            let known = state.extra_ports.contains(port)
                || state.networks.iter().any(|n| n.port == port);
            if !known {
                return Err(Error::UnknownPort { port: port.into() });
            }
            if !state.open.insert(port.to_owned()) {
                return Err(Error::PortInUse { port: port.into() });
            }
            state.calls.push(DriverCall::AddConnection { port: port.into() });
            state.auto_announce
        };
        if announce {
            self.emit_all(self.startup_sequence(port));
        }
        Ok(())
    }

    fn remove_connection(&self, port: &str) -> Result<(), Error> {
        let removed = {
            let mut state = self.state();
            if !state.open.remove(port) {
                return Err(Error::UnknownPort { port: port.into() });
            }
            state.calls.push(DriverCall::RemoveConnection { port: port.into() });
            state
                .networks
                .iter()
                .find(|n| n.port == port)
                .map(|n| Notification::new(n.home_id, n.controller_node, NotificationKind::DriverRemoved))
        };
        if let Some(n) = removed {
            self.emit(n);
        }
        Ok(())
    }

    fn available_ports(&self) -> BTreeSet<String> {
        let state = self.state();
        state
            .extra_ports
            .iter()
            .cloned()
            .chain(state.networks.iter().map(|n| n.port.clone()))
            .collect()
    }

    fn controller_node_id(&self, home_id: HomeId) -> Result<NodeId, Error> {
        Ok(self.state().network_by_home(home_id)?.controller_node)
    }

    fn node_product_name(&self, home_id: HomeId, node_id: NodeId) -> Result<String, Error> {
        self.state()
            .network_by_home(home_id)?
            .node(node_id)
            .map(|n| n.product.clone())
            .ok_or(Error::UnknownNode { home_id, node_id })
    }

    fn is_node_awake(&self, home_id: HomeId, node_id: NodeId) -> Result<bool, Error> {
        self.state()
            .network_by_home(home_id)?
            .node(node_id)
            .map(|n| n.awake)
            .ok_or(Error::UnknownNode { home_id, node_id })
    }

    fn value_label(&self, id: &ValueId) -> Result<String, Error> {
        self.state().value(id).map(|v| v.label.clone())
    }

    fn value_units(&self, id: &ValueId) -> Result<String, Error> {
        self.state().value(id).map(|v| v.units.clone())
    }

    fn get_bool(&self, id: &ValueId) -> Result<bool, Error> {
        match self.expect_kind(id, ValueKind::Bool)? {
            SimData::Bool(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::Bool, &other)),
        }
    }

    fn get_byte(&self, id: &ValueId) -> Result<u8, Error> {
        match self.expect_kind(id, ValueKind::Byte)? {
            SimData::Byte(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::Byte, &other)),
        }
    }

    fn get_float(&self, id: &ValueId) -> Result<f32, Error> {
        match self.expect_kind(id, ValueKind::Decimal)? {
            SimData::Decimal(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::Decimal, &other)),
        }
    }

    fn get_int(&self, id: &ValueId) -> Result<i32, Error> {
        match self.expect_kind(id, ValueKind::Int)? {
            SimData::Int(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::Int, &other)),
        }
    }

    fn get_short(&self, id: &ValueId) -> Result<i16, Error> {
        match self.expect_kind(id, ValueKind::Short)? {
            SimData::Short(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::Short, &other)),
        }
    }

    fn get_string(&self, id: &ValueId) -> Result<String, Error> {
        match self.expect_kind(id, ValueKind::String)? {
            SimData::String(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::String, &other)),
        }
    }

    fn get_list_selection(&self, id: &ValueId) -> Result<String, Error> {
        match self.expect_kind(id, ValueKind::List)? {
            SimData::List { selection, .. } => Ok(selection),
            other => Err(mismatch(id, ValueKind::List, &other)),
        }
    }

    fn get_list_items(&self, id: &ValueId) -> Result<Vec<String>, Error> {
        match self.expect_kind(id, ValueKind::List)? {
            SimData::List { items, .. } => Ok(items),
            other => Err(mismatch(id, ValueKind::List, &other)),
        }
    }

    fn get_raw(&self, id: &ValueId) -> Result<Vec<u8>, Error> {
        match self.expect_kind(id, ValueKind::Raw)? {
            SimData::Raw(v) => Ok(v),
            other => Err(mismatch(id, ValueKind::Raw, &other)),
        }
    }

    fn set_bool(&self, id: &ValueId, value: bool) -> Result<(), Error> {
        self.expect_kind(id, ValueKind::Bool)?;
        self.write(id, SimData::Bool(value), DriverCall::SetBool { id: *id, value })
    }

    fn set_byte(&self, id: &ValueId, value: u8) -> Result<(), Error> {
        self.expect_kind(id, ValueKind::Byte)?;
        self.write(id, SimData::Byte(value), DriverCall::SetByte { id: *id, value })
    }

    fn set_float(&self, id: &ValueId, value: f32) -> Result<(), Error> {
        self.expect_kind(id, ValueKind::Decimal)?;
        self.write(id, SimData::Decimal(value), DriverCall::SetFloat { id: *id, value })
    }

    /// Accepts both `Int` and `Short` values, like the real driver.
    fn set_int(&self, id: &ValueId, value: i32) -> Result<(), Error> {
        let current = self.state().data(id)?.clone();
        let data = match current {
            SimData::Int(_) => SimData::Int(value),
            SimData::Short(_) => SimData::Short(i16::try_from(value).map_err(|_| {
                Error::TypeMismatch {
                    id: *id,
                    expected: ValueKind::Short,
                    actual: ValueKind::Int,
                }
            })?),
            other => return Err(mismatch(id, ValueKind::Int, &other)),
        };
        self.write(id, data, DriverCall::SetInt { id: *id, value })
    }

    fn set_string(&self, id: &ValueId, value: &str) -> Result<(), Error> {
        self.expect_kind(id, ValueKind::String)?;
        self.write(
            id,
            SimData::String(value.to_owned()),
            DriverCall::SetString {
                id: *id,
                value: value.to_owned(),
            },
        )
    }

    fn set_list_selection(&self, id: &ValueId, selection: &str) -> Result<(), Error> {
        let SimData::List { items, .. } = self.expect_kind(id, ValueKind::List)? else {
            return Err(Error::UnknownValue(*id));
        };
        if !items.iter().any(|i| i == selection) {
            return Err(Error::UnknownValue(*id));
        }
        self.write(
            id,
            SimData::List {
                selection: selection.to_owned(),
                items,
            },
            DriverCall::SetListSelection {
                id: *id,
                value: selection.to_owned(),
            },
        )
    }

    fn set_raw(&self, id: &ValueId, value: &[u8]) -> Result<(), Error> {
        self.expect_kind(id, ValueKind::Raw)?;
        self.write(
            id,
            SimData::Raw(value.to_vec()),
            DriverCall::SetRaw {
                id: *id,
                value: value.to_vec(),
            },
        )
    }

    fn switch_all_on(&self, home_id: HomeId) -> Result<(), Error> {
        self.state().network_by_home(home_id)?;
        self.record(DriverCall::SwitchAllOn { home_id });
        Ok(())
    }

    fn switch_all_off(&self, home_id: HomeId) -> Result<(), Error> {
        self.state().network_by_home(home_id)?;
        self.record(DriverCall::SwitchAllOff { home_id });
        Ok(())
    }

    fn refresh_node_info(&self, home_id: HomeId, node_id: NodeId) -> Result<(), Error> {
        self.record(DriverCall::RefreshNodeInfo { home_id, node_id });
        Ok(())
    }

    fn request_node_state(&self, home_id: HomeId, node_id: NodeId) -> Result<(), Error> {
        self.record(DriverCall::RequestNodeState { home_id, node_id });
        Ok(())
    }

    fn write_config(&self, home_id: HomeId) -> Result<(), Error> {
        self.record(DriverCall::WriteConfig { home_id });
        Ok(())
    }
}

fn mismatch(id: &ValueId, expected: ValueKind, actual: &SimData) -> Error {
    Error::TypeMismatch {
        id: *id,
        expected,
        actual: actual.kind(),
    }
}
