// ── Value addressing ──
//
// A point on the network is addressed by (home, node, genre, command
// class, instance, index) plus the kind tag the driver reports for it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Network node identifier, scoped to a [`HomeId`].
pub type NodeId = u8;

/// The "Basic" command class. Never materialized as a point.
pub const COMMAND_CLASS_BASIC: u8 = 0x20;

// ── HomeId ──────────────────────────────────────────────────────────

/// Network-wide identifier assigned by the driver once a controller is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomeId(pub u64);

impl fmt::Display for HomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u64> for HomeId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl FromStr for HomeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).map(Self),
            None => s.parse().map(Self),
        }
    }
}

// ── Genre ───────────────────────────────────────────────────────────

/// Coarse classification of a point's purpose.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Genre {
    Basic,
    Config,
    Count,
    System,
    User,
}

// ── ValueKind ───────────────────────────────────────────────────────

/// The driver's tag for a point's value representation.
///
/// The tag is authoritative on the write path: some kinds share a wire
/// representation (a `Short` is written through the `Int` setter).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ValueKind {
    Bool,
    Byte,
    Decimal,
    Int,
    Short,
    String,
    List,
    Raw,
    Schedule,
    Button,
}

impl ValueKind {
    /// Kinds that can be read into the tree and written back.
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Schedule | Self::Button)
    }

    /// Kinds whose tree representation is a number.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Byte | Self::Decimal | Self::Int | Self::Short)
    }
}

// ── ValueId ─────────────────────────────────────────────────────────

/// Full address of one value on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId {
    pub home_id: HomeId,
    pub node_id: NodeId,
    pub genre: Genre,
    pub command_class: u8,
    pub instance: u8,
    pub index: u16,
    pub kind: ValueKind,
}

impl ValueId {
    /// Whether this value belongs to a command class that is materialized
    /// as a point. Class 0x20 and below are retracted by the driver before
    /// a point could be built for them.
    pub fn is_materialized(&self) -> bool {
        self.command_class > COMMAND_CLASS_BASIC
    }

    /// The same address re-scoped to another node (used when a device's
    /// network id is changed by hand).
    pub fn with_node(self, node_id: NodeId) -> Self {
        Self { node_id, ..self }
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/0x{:02x}/{}/{} ({}, {})",
            self.home_id,
            self.node_id,
            self.command_class,
            self.instance,
            self.index,
            self.genre,
            self.kind
        )
    }
}
