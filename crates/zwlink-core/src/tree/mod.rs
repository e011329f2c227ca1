// ── Entity tree collaborator ──
//
// The hierarchical data model the engine keeps in sync with the network:
// root → controller → device → point. The storage itself is a
// collaborator; the engine only talks to it through `Tree`.
// `MemoryTree` is the in-process implementation used by the binary and
// the tests.

mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;

pub use memory::{EntitySnapshot, MemoryTree};

// ── EntityId ────────────────────────────────────────────────────────

/// Stable identifier of one tree entity.
///
/// Survives moves between parents; a name change is only possible by
/// creating a new entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── Values ──────────────────────────────────────────────────────────

/// A typed value stored on an entity, either as its current value or as
/// a named attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<TreeValue>),
}

impl TreeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[TreeValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for TreeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for TreeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for TreeValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u8> for TreeValue {
    fn from(n: u8) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u16> for TreeValue {
    fn from(n: u16) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for TreeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for TreeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Declared type of an entity's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Number,
    String,
    /// String restricted to the listed options.
    Enum(Vec<String>),
    Array,
    Dynamic,
}

// ── Operations ──────────────────────────────────────────────────────

/// Who may invoke an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
}

/// One typed parameter of an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    pub value_type: ValueType,
    pub default: Option<TreeValue>,
}

impl Param {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<TreeValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Arguments of one operation invocation, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    params: BTreeMap<String, TreeValue>,
}

impl ActionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<TreeValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&TreeValue> {
        self.params.get(name)
    }

    /// A parameter rendered as a string. Numbers are accepted and
    /// formatted; null and missing parameters are `None`.
    pub fn string(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            TreeValue::Null => None,
            TreeValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub(crate) fn fill_defaults(&mut self, params: &[Param]) {
        for param in params {
            if let Some(default) = &param.default {
                self.params
                    .entry(param.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }
}

pub type ActionHandler = Arc<dyn Fn(ActionArgs) -> Result<(), CoreError> + Send + Sync>;

/// An invocable operation attached to an entity.
#[derive(Clone)]
pub struct Action {
    pub permission: Permission,
    pub params: Vec<Param>,
    pub handler: ActionHandler,
}

impl Action {
    pub fn new(
        permission: Permission,
        handler: impl Fn(ActionArgs) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            permission,
            params: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("permission", &self.permission)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// ── Write-back ──────────────────────────────────────────────────────

/// A change of an entity's value, delivered to its write handler.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEvent {
    pub entity: EntityId,
    pub value: TreeValue,
    /// `true` for writes from outside the engine; `false` for values the
    /// engine stored itself.
    pub external: bool,
}

pub type WriteHandler = Arc<dyn Fn(WriteEvent) + Send + Sync>;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("entity {0} does not exist")]
    NotFound(EntityId),

    #[error("'{name}' already exists under {parent}")]
    NameTaken { parent: EntityId, name: String },

    #[error("invalid entity name '{name}'")]
    InvalidName { name: String },

    #[error("the root entity cannot be removed or moved")]
    Root,

    #[error("cannot move {0} beneath itself")]
    Cycle(EntityId),

    #[error("entity {0} is not writable")]
    NotWritable(EntityId),

    #[error("entity {0} has no action")]
    NoAction(EntityId),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is malformed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

// ── Tree ────────────────────────────────────────────────────────────

/// Storage and query interface of the entity tree.
///
/// Handlers attached to entities are invoked without any internal lock
/// held, so they may call back into the tree.
pub trait Tree: Send + Sync + 'static {
    fn root(&self) -> EntityId;

    /// Get the child called `name`, creating it if absent.
    fn create_child(&self, parent: EntityId, name: &str) -> Result<EntityId, TreeError>;

    fn child(&self, parent: EntityId, name: &str) -> Option<EntityId>;

    fn children(&self, parent: EntityId) -> Vec<EntityId>;

    fn parent(&self, entity: EntityId) -> Option<EntityId>;

    /// Remove an entity and its whole subtree.
    fn remove(&self, entity: EntityId) -> Result<(), TreeError>;

    /// Re-parent an entity, keeping its id, name, and subtree.
    fn move_child(&self, entity: EntityId, new_parent: EntityId) -> Result<(), TreeError>;

    fn exists(&self, entity: EntityId) -> bool;

    fn name(&self, entity: EntityId) -> Option<String>;

    /// Display name, falling back to the entity's name.
    fn display_name(&self, entity: EntityId) -> Option<String>;

    fn set_display_name(&self, entity: EntityId, name: &str) -> Result<(), TreeError>;

    fn attribute(&self, entity: EntityId, key: &str) -> Option<TreeValue>;

    fn attributes(&self, entity: EntityId) -> BTreeMap<String, TreeValue>;

    fn set_attribute(&self, entity: EntityId, key: &str, value: TreeValue) -> Result<(), TreeError>;

    fn value_type(&self, entity: EntityId) -> Option<ValueType>;

    fn set_value_type(&self, entity: EntityId, value_type: ValueType) -> Result<(), TreeError>;

    fn value(&self, entity: EntityId) -> Option<TreeValue>;

    /// Store a value produced by the engine. The write handler, if any,
    /// sees it with `external == false`.
    fn set_value(&self, entity: EntityId, value: TreeValue) -> Result<(), TreeError>;

    fn writable(&self, entity: EntityId) -> bool;

    fn set_writable(&self, entity: EntityId, writable: bool) -> Result<(), TreeError>;

    fn set_write_handler(
        &self,
        entity: EntityId,
        handler: Option<WriteHandler>,
    ) -> Result<(), TreeError>;

    fn hidden(&self, entity: EntityId) -> bool;

    fn set_hidden(&self, entity: EntityId, hidden: bool) -> Result<(), TreeError>;

    fn action(&self, entity: EntityId) -> Option<Action>;

    fn set_action(&self, entity: EntityId, action: Option<Action>) -> Result<(), TreeError>;

    /// Non-serializable entities are left out of persisted snapshots.
    fn set_serializable(&self, entity: EntityId, serializable: bool) -> Result<(), TreeError>;

    /// Remove the child called `name`, if present.
    fn remove_child(&self, parent: EntityId, name: &str) -> Result<bool, TreeError> {
        match self.child(parent, name) {
            Some(child) => self.remove(child).map(|()| true),
            None => Ok(false),
        }
    }

    /// Create (or replace) a non-serializable child carrying `action`.
    fn attach_action(
        &self,
        parent: EntityId,
        name: &str,
        action: Action,
    ) -> Result<EntityId, TreeError> {
        let child = self.create_child(parent, name)?;
        self.set_action(child, Some(action))?;
        self.set_serializable(child, false)?;
        Ok(child)
    }
}

/// Names are path segments: non-empty and free of `/`.
pub fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name.contains('/') {
        Err(TreeError::InvalidName { name: name.into() })
    } else {
        Ok(())
    }
}
