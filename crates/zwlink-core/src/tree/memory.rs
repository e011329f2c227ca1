// ── In-memory entity tree ──
//
// Concurrent storage with O(1) entity lookups and a version counter
// bumped on every mutation. Structural changes (create, remove, move)
// are serialized by one lock; everything else goes straight to the map.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{
    Action, ActionArgs, EntityId, Permission, Tree, TreeError, TreeValue, ValueType, WriteEvent,
    WriteHandler, validate_name,
};
use crate::error::CoreError;

struct TreeNode {
    name: String,
    parent: Option<EntityId>,
    children: BTreeMap<String, EntityId>,
    display_name: Option<String>,
    attributes: BTreeMap<String, TreeValue>,
    value_type: Option<ValueType>,
    value: TreeValue,
    writable: bool,
    hidden: bool,
    serializable: bool,
    write_handler: Option<WriteHandler>,
    action: Option<Action>,
}

impl TreeNode {
    fn new(name: String, parent: Option<EntityId>) -> Self {
        Self {
            name,
            parent,
            children: BTreeMap::new(),
            display_name: None,
            attributes: BTreeMap::new(),
            value_type: None,
            value: TreeValue::Null,
            writable: false,
            hidden: false,
            serializable: true,
            write_handler: None,
            action: None,
        }
    }
}

/// Serializable image of an entity and its subtree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, TreeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "TreeValue::is_null")]
    pub value: TreeValue,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Permission of the attached action. Only present in live views;
    /// actions are never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Permission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntitySnapshot>,
}

impl EntitySnapshot {
    /// Depth-first walk yielding `(depth, entity)` pairs.
    pub fn walk(&self) -> Vec<(usize, &EntitySnapshot)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

/// A [`Tree`] held entirely in memory, persistable as JSON.
pub struct MemoryTree {
    root: EntityId,
    nodes: DashMap<EntityId, TreeNode>,
    structure: Mutex<()>,
    version: watch::Sender<u64>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let root = EntityId::new();
        let nodes = DashMap::new();
        nodes.insert(root, TreeNode::new(String::new(), None));
        let (version, _) = watch::channel(0u64);
        Self {
            root,
            nodes,
            structure: Mutex::new(()),
            version,
        }
    }

    /// Rebuild a tree from a snapshot. Entities get fresh ids.
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        let tree = Self::new();
        tree.update(tree.root, |n| apply_snapshot(n, snapshot)).ok();
        for child in &snapshot.children {
            tree.insert_snapshot(tree.root, child);
        }
        tree
    }

    pub fn load(path: &Path) -> Result<Self, TreeError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: EntitySnapshot = serde_json::from_str(&raw)?;
        Ok(Self::from_snapshot(&snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<(), TreeError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, raw)?;
        tracing::debug!(path = %path.display(), "tree snapshot saved");
        Ok(())
    }

    /// Persistable image: non-serializable entities are left out.
    pub fn snapshot(&self) -> EntitySnapshot {
        self.capture(self.root, false)
            .unwrap_or_default()
    }

    /// Live image including operations and other transient entities.
    pub fn view(&self) -> EntitySnapshot {
        self.capture(self.root, true).unwrap_or_default()
    }

    /// Subscribe to the mutation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Write a value on behalf of an outside client. Fails unless the
    /// entity is writable; the write handler sees `external == true`.
    pub fn external_write(&self, entity: EntityId, value: TreeValue) -> Result<(), TreeError> {
        let handler = self.update(entity, |n| {
            if !n.writable {
                return Err(TreeError::NotWritable(entity));
            }
            n.value = value.clone();
            Ok(n.write_handler.clone())
        })??;
        if let Some(handler) = handler {
            handler(WriteEvent {
                entity,
                value,
                external: true,
            });
        }
        Ok(())
    }

    /// Invoke the action attached to `entity`, filling in parameter
    /// defaults for anything `args` leaves out.
    pub fn invoke(&self, entity: EntityId, mut args: ActionArgs) -> Result<(), CoreError> {
        let action = self.action(entity).ok_or(TreeError::NoAction(entity))?;
        args.fill_defaults(&action.params);
        (action.handler)(args)
    }

    /// Resolve a `/`-separated path from the root.
    pub fn find(&self, path: &str) -> Option<EntityId> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self.root, |at, name| self.child(at, name))
    }

    pub fn path(&self, entity: EntityId) -> Option<String> {
        let mut segments = Vec::new();
        let mut at = entity;
        loop {
            let (name, parent) = self.with_node(at, |n| (n.name.clone(), n.parent))?;
            match parent {
                Some(p) => {
                    segments.push(name);
                    at = p;
                }
                None => break,
            }
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn with_node<R>(&self, entity: EntityId, f: impl FnOnce(&TreeNode) -> R) -> Option<R> {
        self.nodes.get(&entity).map(|n| f(n.value()))
    }

    fn update<R>(&self, entity: EntityId, f: impl FnOnce(&mut TreeNode) -> R) -> Result<R, TreeError> {
        let result = {
            let mut node = self
                .nodes
                .get_mut(&entity)
                .ok_or(TreeError::NotFound(entity))?;
            f(node.value_mut())
        };
        self.bump_version();
        Ok(result)
    }

    fn lock_structure(&self) -> std::sync::MutexGuard<'_, ()> {
        self.structure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn capture(&self, entity: EntityId, transient: bool) -> Option<EntitySnapshot> {
        let (mut snapshot, children) = self.with_node(entity, |n| {
            if !transient && !n.serializable {
                return None;
            }
            Some((
                EntitySnapshot {
                    name: n.name.clone(),
                    display_name: n.display_name.clone(),
                    attributes: n.attributes.clone(),
                    value_type: n.value_type.clone(),
                    value: n.value.clone(),
                    writable: n.writable,
                    hidden: n.hidden,
                    action: if transient {
                        n.action.as_ref().map(|a| a.permission)
                    } else {
                        None
                    },
                    children: Vec::new(),
                },
                n.children.values().copied().collect::<Vec<_>>(),
            ))
        })??;
        snapshot.children = children
            .into_iter()
            .filter_map(|c| self.capture(c, transient))
            .collect();
        Some(snapshot)
    }

    fn insert_snapshot(&self, parent: EntityId, snapshot: &EntitySnapshot) {
        let Ok(id) = self.create_child(parent, &snapshot.name) else {
            tracing::warn!(name = %snapshot.name, "skipping snapshot entity with invalid name");
            return;
        };
        self.update(id, |n| apply_snapshot(n, snapshot)).ok();
        for child in &snapshot.children {
            self.insert_snapshot(id, child);
        }
    }

    fn subtree(&self, entity: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![entity];
        while let Some(at) = stack.pop() {
            out.push(at);
            if let Some(children) = self.with_node(at, |n| n.children.values().copied().collect::<Vec<_>>()) {
                stack.extend(children);
            }
        }
        out
    }
}

fn apply_snapshot(node: &mut TreeNode, snapshot: &EntitySnapshot) {
    node.display_name.clone_from(&snapshot.display_name);
    node.attributes.clone_from(&snapshot.attributes);
    node.value_type.clone_from(&snapshot.value_type);
    node.value = snapshot.value.clone();
    node.writable = snapshot.writable;
    node.hidden = snapshot.hidden;
}

impl Tree for MemoryTree {
    fn root(&self) -> EntityId {
        self.root
    }

    fn create_child(&self, parent: EntityId, name: &str) -> Result<EntityId, TreeError> {
        validate_name(name)?;
        let _guard = self.lock_structure();
        let existing = self
            .with_node(parent, |p| p.children.get(name).copied())
            .ok_or(TreeError::NotFound(parent))?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = EntityId::new();
        self.nodes.insert(id, TreeNode::new(name.to_owned(), Some(parent)));
        self.update(parent, |p| p.children.insert(name.to_owned(), id))?;
        Ok(id)
    }

    fn child(&self, parent: EntityId, name: &str) -> Option<EntityId> {
        self.with_node(parent, |p| p.children.get(name).copied())
            .flatten()
    }

    fn children(&self, parent: EntityId) -> Vec<EntityId> {
        self.with_node(parent, |p| p.children.values().copied().collect())
            .unwrap_or_default()
    }

    fn parent(&self, entity: EntityId) -> Option<EntityId> {
        self.with_node(entity, |n| n.parent).flatten()
    }

    fn remove(&self, entity: EntityId) -> Result<(), TreeError> {
        if entity == self.root {
            return Err(TreeError::Root);
        }
        let _guard = self.lock_structure();
        let (name, parent) = self
            .with_node(entity, |n| (n.name.clone(), n.parent))
            .ok_or(TreeError::NotFound(entity))?;
        if let Some(parent) = parent {
            self.update(parent, |p| p.children.remove(&name))?;
        }
        for id in self.subtree(entity) {
            self.nodes.remove(&id);
        }
        self.bump_version();
        Ok(())
    }

    fn move_child(&self, entity: EntityId, new_parent: EntityId) -> Result<(), TreeError> {
        if entity == self.root {
            return Err(TreeError::Root);
        }
        let _guard = self.lock_structure();
        let (name, old_parent) = self
            .with_node(entity, |n| (n.name.clone(), n.parent))
            .ok_or(TreeError::NotFound(entity))?;

        let mut at = Some(new_parent);
        while let Some(ancestor) = at {
            if ancestor == entity {
                return Err(TreeError::Cycle(entity));
            }
            at = self.parent(ancestor);
        }

        let taken = self
            .with_node(new_parent, |p| p.children.contains_key(&name))
            .ok_or(TreeError::NotFound(new_parent))?;
        if taken {
            return Err(TreeError::NameTaken {
                parent: new_parent,
                name,
            });
        }

        if let Some(old) = old_parent {
            self.update(old, |p| p.children.remove(&name))?;
        }
        self.update(new_parent, |p| p.children.insert(name.clone(), entity))?;
        self.update(entity, |n| n.parent = Some(new_parent))?;
        Ok(())
    }

    fn exists(&self, entity: EntityId) -> bool {
        self.nodes.contains_key(&entity)
    }

    fn name(&self, entity: EntityId) -> Option<String> {
        self.with_node(entity, |n| n.name.clone())
    }

    fn display_name(&self, entity: EntityId) -> Option<String> {
        self.with_node(entity, |n| n.display_name.clone().unwrap_or_else(|| n.name.clone()))
    }

    fn set_display_name(&self, entity: EntityId, name: &str) -> Result<(), TreeError> {
        self.update(entity, |n| n.display_name = Some(name.to_owned()))
    }

    fn attribute(&self, entity: EntityId, key: &str) -> Option<TreeValue> {
        self.with_node(entity, |n| n.attributes.get(key).cloned())
            .flatten()
    }

    fn attributes(&self, entity: EntityId) -> BTreeMap<String, TreeValue> {
        self.with_node(entity, |n| n.attributes.clone())
            .unwrap_or_default()
    }

    fn set_attribute(&self, entity: EntityId, key: &str, value: TreeValue) -> Result<(), TreeError> {
        self.update(entity, |n| {
            n.attributes.insert(key.to_owned(), value);
        })
    }

    fn value_type(&self, entity: EntityId) -> Option<ValueType> {
        self.with_node(entity, |n| n.value_type.clone()).flatten()
    }

    fn set_value_type(&self, entity: EntityId, value_type: ValueType) -> Result<(), TreeError> {
        self.update(entity, |n| n.value_type = Some(value_type))
    }

    fn value(&self, entity: EntityId) -> Option<TreeValue> {
        self.with_node(entity, |n| n.value.clone())
    }

    fn set_value(&self, entity: EntityId, value: TreeValue) -> Result<(), TreeError> {
        let handler = self.update(entity, |n| {
            n.value = value.clone();
            n.write_handler.clone()
        })?;
        if let Some(handler) = handler {
            handler(WriteEvent {
                entity,
                value,
                external: false,
            });
        }
        Ok(())
    }

    fn writable(&self, entity: EntityId) -> bool {
        self.with_node(entity, |n| n.writable).unwrap_or(false)
    }

    fn set_writable(&self, entity: EntityId, writable: bool) -> Result<(), TreeError> {
        self.update(entity, |n| n.writable = writable)
    }

    fn set_write_handler(
        &self,
        entity: EntityId,
        handler: Option<WriteHandler>,
    ) -> Result<(), TreeError> {
        self.update(entity, |n| n.write_handler = handler)
    }

    fn hidden(&self, entity: EntityId) -> bool {
        self.with_node(entity, |n| n.hidden).unwrap_or(false)
    }

    fn set_hidden(&self, entity: EntityId, hidden: bool) -> Result<(), TreeError> {
        self.update(entity, |n| n.hidden = hidden)
    }

    fn action(&self, entity: EntityId) -> Option<Action> {
        self.with_node(entity, |n| n.action.clone()).flatten()
    }

    fn set_action(&self, entity: EntityId, action: Option<Action>) -> Result<(), TreeError> {
        self.update(entity, |n| n.action = action)
    }

    fn set_serializable(&self, entity: EntityId, serializable: bool) -> Result<(), TreeError> {
        self.update(entity, |n| n.serializable = serializable)
    }
}
