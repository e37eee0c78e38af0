//! The identity store: live instances keyed by id.

use crate::description::{Kind, Node};
use crate::error::EffectError;
use crate::hooks::Hook;
use crate::patch::Patch;
use crate::scheduler::EffectState;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A unique identifier for an instance.
///
/// (this is just a UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(u32, u16, u16, [u8; 8]);

impl InstanceId {
    pub(crate) fn new() -> InstanceId {
        let uuid = Uuid::new_v4();
        let (a, b, c, d) = uuid.as_fields();
        InstanceId(a, b, c, *d)
    }
}

/// Where an instance sits: the slot `index` among its parent's rendered children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub parent: Option<InstanceId>,
    pub index: usize,
}

impl Position {
    pub fn root() -> Position {
        Position {
            parent: None,
            index: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.parent {
            Some(parent) => write!(f, "{:?}[{}]", parent, self.index),
            None => write!(f, "root"),
        }
    }
}

/// A live, stateful object bound to one tree position across updates.
#[derive(Clone)]
pub struct Instance {
    pub(crate) id: InstanceId,
    /// The description this instance was last matched against.
    pub(crate) description: Node,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) index: usize,
    pub(crate) depth: usize,
    /// Rendered child slots; `None` is an empty slot.
    pub(crate) children: Vec<Option<InstanceId>>,
    /// Hook slots in call order.
    pub(crate) hooks: Vec<Hook>,
    /// State cells adopted from a destroyed instance, consumed by the first evaluation.
    pub(crate) inherited: Vec<Arc<dyn core::any::Any + Send + Sync>>,
    /// Host nodes last sent to the host as this node's children (host instances only).
    pub(crate) host_children: Vec<InstanceId>,
    /// An effect error caught by this instance, if it is a boundary.
    pub(crate) caught: Option<EffectError>,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        description: Node,
        position: Position,
        depth: usize,
        inherited: Vec<Arc<dyn core::any::Any + Send + Sync>>,
    ) -> Instance {
        Instance {
            id,
            description,
            parent: position.parent,
            index: position.index,
            depth,
            children: Vec::new(),
            hooks: Vec::new(),
            inherited,
            host_children: Vec::new(),
            caught: None,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn description(&self) -> &Node {
        &self.description
    }

    pub fn position(&self) -> Position {
        Position {
            parent: self.parent,
            index: self.index,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn children(&self) -> &[Option<InstanceId>] {
        &self.children
    }

    pub fn is_host(&self) -> bool {
        matches!(self.description.kind, Kind::Host(_))
    }

    /// States of this instance's effects, in hook order.
    pub fn effect_states(&self) -> Vec<EffectState> {
        self.hooks
            .iter()
            .filter_map(|hook| match hook {
                Hook::Effect(slot) => Some(slot.lock().state),
                _ => None,
            })
            .collect()
    }

    /// The error this boundary is currently showing a fallback for.
    pub fn caught_error(&self) -> Option<&EffectError> {
        self.caught.as_ref()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("kind", &self.description.kind)
            .field("key", &self.description.key)
            .field("position", &self.position())
            .field("children", &self.children)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Anything instances can be looked up in: the committed store, or a render pass's draft on top
/// of it.
pub(crate) trait InstanceSource {
    fn instance(&self, id: InstanceId) -> Option<&Instance>;

    /// Collects the host nodes that make up this instance, in order: the instance itself if it
    /// is a host node, otherwise the host nodes of its children.
    fn collect_host_nodes(&self, id: InstanceId, out: &mut Vec<InstanceId>) {
        if let Some(instance) = self.instance(id) {
            if instance.is_host() {
                out.push(id);
            } else {
                self.collect_child_host_nodes(id, out);
            }
        }
    }

    /// Collects the host nodes below an instance that attach directly to it.
    fn collect_child_host_nodes(&self, id: InstanceId, out: &mut Vec<InstanceId>) {
        if let Some(instance) = self.instance(id) {
            for child in instance.children.iter().flatten() {
                self.collect_host_nodes(*child, out);
            }
        }
    }

    /// Returns the closest host node at or above `id`, or `None` for the host root.
    fn host_container(&self, mut id: Option<InstanceId>) -> Option<InstanceId> {
        while let Some(current) = id {
            match self.instance(current) {
                Some(instance) if instance.is_host() => return Some(current),
                Some(instance) => id = instance.parent,
                None => return None,
            }
        }
        None
    }
}

/// Holds every live instance of a mounted tree.
#[derive(Debug, Default)]
pub struct IdentityStore {
    nodes: HashMap<InstanceId, Instance>,
    root: Option<InstanceId>,
    /// Host nodes last sent to the host as top-level nodes.
    root_host_children: Vec<InstanceId>,
}

impl IdentityStore {
    pub fn new() -> IdentityStore {
        IdentityStore::default()
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn root(&self) -> Option<InstanceId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the instance at a child slot of `parent`, or at the root.
    pub fn child_at(&self, parent: Option<InstanceId>, index: usize) -> Option<InstanceId> {
        match parent {
            Some(parent) => self.get(parent)?.children.get(index).copied().flatten(),
            None if index == 0 => self.root,
            None => None,
        }
    }

    /// Host nodes that make up an instance: itself if it is a host node, otherwise the host
    /// nodes of its children, in order.
    pub fn host_nodes(&self, id: InstanceId) -> Vec<InstanceId> {
        let mut out = Vec::new();
        self.collect_host_nodes(id, &mut out);
        out
    }

    pub(crate) fn insert(&mut self, instance: Instance) {
        self.nodes.insert(instance.id, instance);
    }

    pub(crate) fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        self.nodes.remove(&id)
    }

    pub(crate) fn set_root(&mut self, root: Option<InstanceId>) {
        self.root = root;
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.root_host_children.clear();
    }

    /// Recomputes the host children of a container and returns a patch if they changed.
    pub(crate) fn relink(&mut self, container: Option<InstanceId>) -> Option<Patch> {
        let mut children = Vec::new();
        match container {
            Some(id) => {
                if !self.contains(id) {
                    // removed in the same commit
                    return None;
                }
                self.collect_child_host_nodes(id, &mut children);
            }
            None => {
                if let Some(root) = self.root {
                    self.collect_host_nodes(root, &mut children);
                }
            }
        }

        let current = match container {
            Some(id) => &mut self.nodes.get_mut(&id)?.host_children,
            None => &mut self.root_host_children,
        };
        if *current == children {
            return None;
        }
        log::trace!(
            "relink: container {:?}, old={:?}, new={:?}",
            container,
            current,
            children
        );
        *current = children.clone();
        Some(Patch::Children {
            parent: container,
            children,
        })
    }
}

impl InstanceSource for IdentityStore {
    fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.nodes.get(&id)
    }
}
