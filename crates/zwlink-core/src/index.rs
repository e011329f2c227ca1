// ── Identity index ──
//
// Two-way mapping between network node ids and device sessions, plus
// the reverse lookup from a device's tree entity to its node id. Owned
// by one controller session actor; never shared.

use std::collections::{BTreeMap, HashMap};

use zwlink_api::NodeId;

use crate::device::DeviceSession;
use crate::error::CoreError;
use crate::tree::EntityId;

#[derive(Debug, Default)]
pub(crate) struct IdentityIndex {
    by_node: BTreeMap<NodeId, DeviceSession>,
    by_entity: HashMap<EntityId, NodeId>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under its node id, replacing an earlier session
    /// for the same node.
    ///
    /// An entity already bound to a different node is never taken over;
    /// the index is left untouched and `IdentityConflict` is returned.
    pub fn insert(&mut self, session: DeviceSession) -> Result<(), CoreError> {
        let node_id = session.node_id();
        let entity = session.entity();
        if let Some(&owner) = self.by_entity.get(&entity).filter(|&&owner| owner != node_id) {
            return Err(CoreError::IdentityConflict {
                entity: session.display_name().to_owned(),
                node_id: owner,
            });
        }
        if let Some(stale) = self.by_node.remove(&node_id) {
            self.by_entity.remove(&stale.entity());
        }
        self.by_entity.insert(entity, node_id);
        self.by_node.insert(node_id, session);
        Ok(())
    }

    pub fn remove(&mut self, node_id: NodeId) -> Option<DeviceSession> {
        let session = self.by_node.remove(&node_id)?;
        self.by_entity.remove(&session.entity());
        Some(session)
    }

    pub fn get(&self, node_id: NodeId) -> Option<&DeviceSession> {
        self.by_node.get(&node_id)
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut DeviceSession> {
        self.by_node.get_mut(&node_id)
    }

    pub fn node_for(&self, entity: EntityId) -> Option<NodeId> {
        self.by_entity.get(&entity).copied()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.by_node.contains_key(&node_id)
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSession> {
        self.by_node.values()
    }

    /// Move the session for `node_id` onto another entity (after a rename).
    /// Refused when `entity` belongs to another node.
    pub fn rebind(&mut self, node_id: NodeId, entity: EntityId, display_name: &str) -> bool {
        if self.by_entity.get(&entity).is_some_and(|&owner| owner != node_id) {
            return false;
        }
        let Some(session) = self.by_node.get_mut(&node_id) else {
            return false;
        };
        self.by_entity.remove(&session.entity());
        session.rebind_to(entity, display_name);
        self.by_entity.insert(entity, node_id);
        true
    }

    /// Keep only the sessions for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&DeviceSession) -> bool) -> Vec<NodeId> {
        let dropped: Vec<NodeId> = self
            .by_node
            .values()
            .filter(|&s| !keep(s))
            .map(DeviceSession::node_id)
            .collect();
        for node_id in &dropped {
            self.remove(*node_id);
        }
        dropped
    }

    /// Both directions agree on every entry.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.by_node.len() == self.by_entity.len()
            && self
                .by_node
                .iter()
                .all(|(node, s)| s.node_id() == *node && self.by_entity.get(&s.entity()) == Some(node))
    }
}
