// ── Value codec ──
//
// Two-way mapping between the driver's tagged values and the tree's
// typed values. Reads pick the tree type from the value's kind; writes
// pick the driver setter from the kind recorded on the point entity,
// never from the shape of the incoming value.

use zwlink_api::{Driver, Genre, HomeId, NodeId, ValueId, ValueKind};

use crate::error::CoreError;
use crate::tree::{EntityId, Tree, TreeError, TreeValue, ValueType};

/// Attribute names persisted on controller, device, and point entities.
pub mod attr {
    pub const PORT: &str = "port";
    pub const NETWORK_DEVICE_ID: &str = "networkDeviceId";
    pub const COMMAND_CLASS: &str = "commandClass";
    pub const GROUP: &str = "group";
    pub const INSTANCE: &str = "instance";
    pub const GENRE: &str = "genre";
    pub const INDEX: &str = "index";
    pub const SCENE_ID: &str = "sceneId";
    pub const BUTTON_ID: &str = "buttonId";
    pub const UNIT: &str = "unit";
    pub const VALUE_KIND: &str = "valueKind";
}

// ── Point names ─────────────────────────────────────────────────────

/// Characters that may not appear verbatim in an entity name.
const RESERVED: &[char] = &['.', '/', '\\', '?', '*', ':', '|', '<', '>', '"', '%', '\''];

/// Percent-escape reserved and control characters so `raw` can be used
/// as an entity name.
pub fn encode_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if RESERVED.contains(&c) || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Entity name for a point with the driver label `label`.
pub fn point_name(label: &str) -> String {
    encode_name(&label.replace("(%)", "(Percent)"))
}

// ── Point attributes ────────────────────────────────────────────────

/// Notification fields stored next to a point's address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointMeta {
    pub group: u8,
    pub scene_id: u8,
    pub button_id: u8,
    pub unit: String,
}

/// Record the full address of `id` on a point entity.
pub fn tag_point(
    tree: &dyn Tree,
    entity: EntityId,
    id: &ValueId,
    meta: &PointMeta,
) -> Result<(), TreeError> {
    tree.set_attribute(entity, attr::NETWORK_DEVICE_ID, id.node_id.into())?;
    tree.set_attribute(entity, attr::COMMAND_CLASS, id.command_class.into())?;
    tree.set_attribute(entity, attr::GROUP, meta.group.into())?;
    tree.set_attribute(entity, attr::INSTANCE, id.instance.into())?;
    tree.set_attribute(entity, attr::GENRE, id.genre.to_string().into())?;
    tree.set_attribute(entity, attr::INDEX, id.index.into())?;
    tree.set_attribute(entity, attr::SCENE_ID, meta.scene_id.into())?;
    tree.set_attribute(entity, attr::BUTTON_ID, meta.button_id.into())?;
    tree.set_attribute(entity, attr::UNIT, meta.unit.clone().into())?;
    tree.set_attribute(entity, attr::VALUE_KIND, id.kind.to_string().into())
}

/// Node id stored as a number or as a numeric string.
pub fn node_id_of(value: &TreeValue) -> Option<NodeId> {
    match value {
        TreeValue::Number(n) => small_integer(*n).and_then(|v| NodeId::try_from(v).ok()),
        TreeValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Rebuild a point's address from the attributes written by
/// [`tag_point`].
pub fn address_from_attributes(
    tree: &dyn Tree,
    entity: EntityId,
    home_id: HomeId,
) -> Result<ValueId, CoreError> {
    let node_id = tree
        .attribute(entity, attr::NETWORK_DEVICE_ID)
        .as_ref()
        .and_then(node_id_of)
        .ok_or_else(|| malformed(attr::NETWORK_DEVICE_ID))?;
    let genre: Genre = text_attr(tree, entity, attr::GENRE)?
        .parse()
        .map_err(|_| malformed(attr::GENRE))?;
    let kind: ValueKind = text_attr(tree, entity, attr::VALUE_KIND)?
        .parse()
        .map_err(|_| malformed(attr::VALUE_KIND))?;
    Ok(ValueId {
        home_id,
        node_id,
        genre,
        command_class: u8::try_from(int_attr(tree, entity, attr::COMMAND_CLASS)?)
            .map_err(|_| malformed(attr::COMMAND_CLASS))?,
        instance: u8::try_from(int_attr(tree, entity, attr::INSTANCE)?)
            .map_err(|_| malformed(attr::INSTANCE))?,
        index: u16::try_from(int_attr(tree, entity, attr::INDEX)?)
            .map_err(|_| malformed(attr::INDEX))?,
        kind,
    })
}

fn text_attr(tree: &dyn Tree, entity: EntityId, key: &str) -> Result<String, CoreError> {
    match tree.attribute(entity, key) {
        Some(TreeValue::String(s)) => Ok(s),
        _ => Err(malformed(key)),
    }
}

fn int_attr(tree: &dyn Tree, entity: EntityId, key: &str) -> Result<i64, CoreError> {
    match tree.attribute(entity, key) {
        Some(TreeValue::Number(n)) => small_integer(n).ok_or_else(|| malformed(key)),
        Some(TreeValue::String(s)) => s.trim().parse().map_err(|_| malformed(key)),
        _ => Err(malformed(key)),
    }
}

fn malformed(key: &str) -> CoreError {
    CoreError::InvalidParameter {
        name: key.into(),
        reason: "missing or malformed point attribute".into(),
    }
}

/// Exact integer value of `n`, if it has one within ±2^31.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn small_integer(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() <= f64::from(i32::MAX)).then(|| n as i64)
}

// ── Read direction ──────────────────────────────────────────────────

/// A driver value rendered for the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value_type: ValueType,
    pub value: TreeValue,
    pub writable: bool,
}

/// Fetch the typed value at `id` and render it for the tree.
///
/// `Schedule` and `Button` values become inert, non-writable
/// placeholders.
pub fn decode(driver: &dyn Driver, id: &ValueId) -> Result<Decoded, zwlink_api::Error> {
    let (value_type, value, writable) = match id.kind {
        ValueKind::Bool => (ValueType::Bool, TreeValue::Bool(driver.get_bool(id)?), true),
        ValueKind::Byte => (ValueType::Number, number_value(driver.get_byte(id)?), true),
        ValueKind::Decimal => (ValueType::Number, number_value(driver.get_float(id)?), true),
        ValueKind::Int => (ValueType::Number, number_value(driver.get_int(id)?), true),
        ValueKind::Short => (ValueType::Number, number_value(driver.get_short(id)?), true),
        ValueKind::String => (
            ValueType::String,
            TreeValue::String(driver.get_string(id)?),
            true,
        ),
        ValueKind::List => {
            let items = driver.get_list_items(id)?;
            let selection = driver.get_list_selection(id)?;
            (ValueType::Enum(items), TreeValue::String(selection), true)
        }
        ValueKind::Raw => {
            let bytes = driver.get_raw(id)?;
            let items = bytes.into_iter().map(TreeValue::from).collect();
            (ValueType::Array, TreeValue::Array(items), true)
        }
        ValueKind::Schedule | ValueKind::Button => {
            tracing::error!(value = %id, kind = %id.kind, "value kind is not implemented");
            (ValueType::String, TreeValue::Null, false)
        }
    };
    Ok(Decoded {
        value_type,
        value,
        writable,
    })
}

fn number_value(n: impl Into<f64>) -> TreeValue {
    TreeValue::Number(n.into())
}

/// Store a decoded value on its point entity.
pub fn apply(tree: &dyn Tree, entity: EntityId, decoded: &Decoded) -> Result<(), TreeError> {
    tree.set_value_type(entity, decoded.value_type.clone())?;
    tree.set_writable(entity, decoded.writable)?;
    tree.set_value(entity, decoded.value.clone())
}

// ── Write direction ─────────────────────────────────────────────────

/// A tree value converted for one specific driver setter.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    Bool(bool),
    Byte(u8),
    Float(f32),
    /// Used for both `Int` and `Short` points.
    Int(i32),
    String(String),
    ListSelection(String),
    Raw(Vec<u8>),
}

/// Convert `value` for a point whose recorded kind is `kind`.
///
/// Numbers are rounded to the nearest integer for integral kinds and
/// rejected when out of range.
pub fn encode(kind: ValueKind, value: &TreeValue) -> Result<Encoded, CoreError> {
    let invalid = || CoreError::InvalidValue {
        kind,
        value: value.to_string(),
    };
    match kind {
        ValueKind::Bool => match value {
            TreeValue::Bool(b) => Ok(Encoded::Bool(*b)),
            TreeValue::String(s) => s.trim().parse().map(Encoded::Bool).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        ValueKind::Byte => {
            let n = integral(kind, value, 0, i32::from(u8::MAX))?;
            u8::try_from(n).map(Encoded::Byte).map_err(|_| invalid())
        }
        ValueKind::Short => {
            integral(kind, value, i32::from(i16::MIN), i32::from(i16::MAX)).map(Encoded::Int)
        }
        ValueKind::Int => integral(kind, value, i32::MIN, i32::MAX).map(Encoded::Int),
        ValueKind::Decimal => decimal(kind, value).map(Encoded::Float),
        ValueKind::String => match value {
            TreeValue::Null | TreeValue::Array(_) => Err(invalid()),
            TreeValue::String(s) => Ok(Encoded::String(s.clone())),
            other => Ok(Encoded::String(other.to_string())),
        },
        ValueKind::List => value
            .as_str()
            .map(|s| Encoded::ListSelection(s.to_owned()))
            .ok_or_else(invalid),
        ValueKind::Raw => value
            .as_array()
            .ok_or_else(invalid)?
            .iter()
            .map(|item| {
                let n = integral(kind, item, 0, i32::from(u8::MAX))?;
                u8::try_from(n).map_err(|_| invalid())
            })
            .collect::<Result<Vec<u8>, CoreError>>()
            .map(Encoded::Raw),
        ValueKind::Schedule | ValueKind::Button => Err(CoreError::UnsupportedValueKind { kind }),
    }
}

/// Issue the setter matching `encoded`. `Int` covers `Short` points.
pub fn send(driver: &dyn Driver, id: &ValueId, encoded: &Encoded) -> Result<(), zwlink_api::Error> {
    match encoded {
        Encoded::Bool(v) => driver.set_bool(id, *v),
        Encoded::Byte(v) => driver.set_byte(id, *v),
        Encoded::Float(v) => driver.set_float(id, *v),
        Encoded::Int(v) => driver.set_int(id, *v),
        Encoded::String(v) => driver.set_string(id, v),
        Encoded::ListSelection(v) => driver.set_list_selection(id, v),
        Encoded::Raw(v) => driver.set_raw(id, v),
    }
}

fn number(kind: ValueKind, value: &TreeValue) -> Result<f64, CoreError> {
    let n = match value {
        TreeValue::Number(n) => Some(*n),
        TreeValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
        .ok_or_else(|| CoreError::InvalidValue {
            kind,
            value: value.to_string(),
        })
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn integral(kind: ValueKind, value: &TreeValue, min: i32, max: i32) -> Result<i32, CoreError> {
    let n = number(kind, value)?.round();
    if n < f64::from(min) || n > f64::from(max) {
        return Err(CoreError::InvalidValue {
            kind,
            value: value.to_string(),
        });
    }
    Ok(n as i32)
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn decimal(kind: ValueKind, value: &TreeValue) -> Result<f32, CoreError> {
    let n = number(kind, value)?;
    if n.abs() > f64::from(f32::MAX) {
        return Err(CoreError::InvalidValue {
            kind,
            value: value.to_string(),
        });
    }
    Ok(n as f32)
}
