//! The reconciler: diffs new descriptions against committed instances.
//!
//! A render pass never mutates the [`IdentityStore`]. Every instance it touches is copied into a
//! draft, and destroyed instances move to a graveyard; the engine commits both at once.
//!
//! # Matching
//! At each position the old instance is kept if its kind and key match the new description, and
//! destroyed (along with its whole subtree) otherwise. Child lists are matched with
//! [`match_children`].
//!
//! # Bailout
//! An instance that was not scheduled for this pass skips its subtree if it is handed the same
//! [`Node`] again, or if its component's [`MemoPolicy`](crate::MemoPolicy) says its inputs are
//! equal. Scheduled instances below a skipped subtree are picked up afterwards as entry points.

mod matching;

pub use matching::{match_children, ChildPlan};

use crate::component::ComponentRef;
use crate::description::{Key, Kind, Node};
use crate::error::{EffectError, StructuralError};
use crate::fanout::CellId;
use crate::hooks::{Hook, Request, Scope};
use crate::patch::Patch;
use crate::scheduler::PendingEffect;
use crate::store::{IdentityStore, Instance, InstanceId, InstanceSource, Position};
use core::any::Any;
use crossbeam::channel::Sender;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

/// A change a render pass made to the tree.
#[derive(Debug, Clone)]
pub enum Transition {
    Create {
        id: InstanceId,
        position: Position,
        description: Node,
    },
    Update {
        id: InstanceId,
        position: Position,
        description: Node,
    },
    Destroy {
        id: InstanceId,
        position: Position,
    },
}

impl Transition {
    pub fn id(&self) -> InstanceId {
        match self {
            Transition::Create { id, .. }
            | Transition::Update { id, .. }
            | Transition::Destroy { id, .. } => *id,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Transition::Create { position, .. }
            | Transition::Update { position, .. }
            | Transition::Destroy { position, .. } => *position,
        }
    }
}

/// Everything a render pass produced, in the order the commit needs it.
#[derive(Default)]
pub(crate) struct PassOutput {
    pub(crate) transitions: Vec<Transition>,
    /// Destroyed instances, children before parents.
    pub(crate) destroyed: Vec<InstanceId>,
    /// Host creates and updates, parents before children.
    pub(crate) patches: Vec<Patch>,
    pub(crate) removals: Vec<Patch>,
    /// Host containers whose host children may have changed; `None` is the top level.
    pub(crate) containers: Vec<Option<InstanceId>>,
    /// Effects in depth-first post-order.
    pub(crate) effects: Vec<PendingEffect>,
    pub(crate) subscriptions: Vec<(InstanceId, Vec<CellId>)>,
    pub(crate) new_cells: Vec<(CellId, InstanceId)>,
    pub(crate) errors: Vec<StructuralError>,
    /// The new root, if it changed.
    pub(crate) root: Option<Option<InstanceId>>,
}

/// The result of a render pass, ready to be committed.
pub(crate) struct Draft {
    pub(crate) instances: HashMap<InstanceId, Instance>,
    pub(crate) graveyard: HashMap<InstanceId, Instance>,
    pub(crate) output: PassOutput,
}

/// A render pass in progress.
pub(crate) struct Work<'a> {
    store: &'a IdentityStore,
    requests: &'a Sender<Request>,
    scheduled: &'a HashSet<InstanceId>,
    draft: HashMap<InstanceId, Instance>,
    graveyard: HashMap<InstanceId, Instance>,
    destroyed: HashSet<InstanceId>,
    visited: HashSet<InstanceId>,
    /// Effects registered by each evaluation, in evaluation order.
    effects: Vec<(InstanceId, Vec<PendingEffect>)>,
    out: PassOutput,
}

impl<'a> InstanceSource for Work<'a> {
    fn instance(&self, id: InstanceId) -> Option<&Instance> {
        if self.destroyed.contains(&id) {
            return None;
        }
        self.draft.get(&id).or_else(|| self.store.get(id))
    }
}

impl<'a> Work<'a> {
    pub(crate) fn new(
        store: &'a IdentityStore,
        requests: &'a Sender<Request>,
        scheduled: &'a HashSet<InstanceId>,
    ) -> Work<'a> {
        Work {
            store,
            requests,
            scheduled,
            draft: HashMap::new(),
            graveyard: HashMap::new(),
            destroyed: HashSet::new(),
            visited: HashSet::new(),
            effects: Vec::new(),
            out: PassOutput::default(),
        }
    }

    pub(crate) fn finish(mut self) -> Draft {
        self.out.effects = self.effects_in_post_order();
        Draft {
            instances: self.draft,
            graveyard: self.graveyard,
            output: self.out,
        }
    }

    /// Child indices from the root down to `id`, or `None` if `id` is no longer in the tree.
    fn tree_path(&self, id: InstanceId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut cursor = self.instance(id)?;
        while let Some(parent) = cursor.parent {
            path.push(cursor.index);
            cursor = self.instance(parent)?;
        }
        path.reverse();
        Some(path)
    }

    /// Orders the pass's effects depth-first, children before parents, wherever in the pass
    /// their instances were evaluated.
    fn effects_in_post_order(&mut self) -> Vec<PendingEffect> {
        let groups = mem::take(&mut self.effects);
        let mut groups: Vec<(Vec<usize>, Vec<PendingEffect>)> = groups
            .into_iter()
            .filter_map(|(id, effects)| match self.tree_path(id) {
                Some(path) => Some((path, effects)),
                None => {
                    log::trace!("dropping effects of destroyed {:?}", id);
                    None
                }
            })
            .collect();
        groups.sort_by(|(a, _), (b, _)| {
            let common = a.len().min(b.len());
            // a descendant sorts before its ancestor
            a[..common]
                .cmp(&b[..common])
                .then_with(|| b.len().cmp(&a.len()))
        });
        groups.into_iter().flat_map(|(_, effects)| effects).collect()
    }

    /// Returns a draft copy of an instance, copying it from the store on first access.
    fn draft_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        if self.destroyed.contains(&id) {
            return None;
        }
        if !self.draft.contains_key(&id) {
            let instance = self.store.get(id)?.clone();
            self.draft.insert(id, instance);
        }
        self.draft.get_mut(&id)
    }

    /// Renders a new root description (or unmounts, for `None`).
    pub(crate) fn reconcile_root(&mut self, node: Option<Node>) {
        let existing = self.store.root();
        let root = self.reconcile_slot(None, 0, 0, existing, node);
        if root != existing {
            self.out.root = Some(root);
            self.mark_container(None);
        }
    }

    /// Re-evaluates scheduled instances the top-down pass did not reach, shallowest first.
    pub(crate) fn run_entry_points(&mut self) {
        let mut entries: Vec<(usize, InstanceId)> = self
            .scheduled
            .iter()
            .filter_map(|id| self.instance(*id).map(|instance| (instance.depth, *id)))
            .collect();
        entries.sort();

        for (_, id) in entries {
            if self.visited.contains(&id) {
                continue;
            }
            let (position, description) = match self.instance(id) {
                Some(instance) => (instance.position(), instance.description.clone()),
                // destroyed by an earlier entry point
                None => continue,
            };
            log::trace!("entry point {:?} at {}", id, position);
            self.visited.insert(id);
            self.out.transitions.push(Transition::Update {
                id,
                position,
                description,
            });
            self.render_body(id);
        }
    }

    fn reconcile_slot(
        &mut self,
        parent: Option<InstanceId>,
        index: usize,
        depth: usize,
        existing: Option<InstanceId>,
        node: Option<Node>,
    ) -> Option<InstanceId> {
        match (existing, node) {
            (None, None) => None,
            (Some(id), None) => {
                self.destroy(id);
                None
            }
            (None, Some(node)) => self.create(Position { parent, index }, depth, node, Vec::new()),
            (Some(id), Some(node)) => {
                let old = match self.instance(id) {
                    Some(instance) => instance.description.clone(),
                    None => {
                        return self.create(Position { parent, index }, depth, node, Vec::new())
                    }
                };

                if old.same_identity(&node) {
                    self.update(id, index, node);
                    return Some(id);
                }

                let inherited = if node.inherit_state && node.key.is_some() && node.key == old.key {
                    self.state_cells(id)
                } else {
                    Vec::new()
                };
                self.destroy(id);
                self.create(Position { parent, index }, depth, node, inherited)
            }
        }
    }

    /// The state cells of an instance, in hook order.
    fn state_cells(&self, id: InstanceId) -> Vec<Arc<dyn Any + Send + Sync>> {
        self.instance(id)
            .map(|instance| {
                instance
                    .hooks
                    .iter()
                    .filter_map(|hook| match hook {
                        Hook::State(cell) => Some(Arc::clone(cell)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create(
        &mut self,
        position: Position,
        depth: usize,
        node: Node,
        inherited: Vec<Arc<dyn Any + Send + Sync>>,
    ) -> Option<InstanceId> {
        if let Kind::Host(tag) = &node.kind {
            if tag.is_empty() {
                let error = StructuralError::Malformed {
                    position,
                    reason: "host node has an empty tag".into(),
                };
                log::warn!("{}", error);
                self.out.errors.push(error);
                return None;
            }
        }

        let id = InstanceId::new();
        log::trace!("create {:?} {:?} at {}", node.kind, id, position);
        self.draft
            .insert(id, Instance::new(id, node.clone(), position, depth, inherited));
        self.visited.insert(id);

        if let Kind::Host(tag) = &node.kind {
            self.out.patches.push(Patch::Create {
                id,
                tag: tag.clone(),
                inputs: node.inputs.clone(),
            });
        }
        self.out.transitions.push(Transition::Create {
            id,
            position,
            description: node,
        });

        self.render_body(id);
        Some(id)
    }

    fn update(&mut self, id: InstanceId, index: usize, node: Node) {
        let (old, old_index) = match self.instance(id) {
            Some(instance) => (instance.description.clone(), instance.index),
            None => return,
        };
        if old_index != index {
            if let Some(instance) = self.draft_mut(id) {
                instance.index = index;
            }
        }

        if !self.scheduled.contains(&id) {
            if old.ptr_eq(&node) {
                log::trace!("bailout {:?}: same description", id);
                return;
            }
            if let Kind::Component(component) = &node.kind {
                if component
                    .component()
                    .memo
                    .should_skip(id, &old.inputs, &node.inputs)
                {
                    log::trace!("bailout {:?}: memo", id);
                    if let Some(instance) = self.draft_mut(id) {
                        instance.description = node;
                    }
                    return;
                }
            }
        }

        self.visited.insert(id);
        let position = match self.draft_mut(id) {
            Some(instance) => {
                instance.description = node.clone();
                instance.position()
            }
            None => return,
        };

        if let Kind::Host(_) = &node.kind {
            if !old.inputs.identical(&node.inputs) {
                self.out.patches.push(Patch::Update {
                    id,
                    inputs: node.inputs.clone(),
                });
            }
        }
        self.out.transitions.push(Transition::Update {
            id,
            position,
            description: node,
        });

        self.render_body(id);
    }

    /// Renders an instance's children, evaluating it first if it is a component.
    fn render_body(&mut self, id: InstanceId) {
        let (node, caught) = match self.instance(id) {
            Some(instance) => (instance.description.clone(), instance.caught.clone()),
            None => return,
        };

        match &node.kind {
            Kind::Host(_) | Kind::Fragment => self.reconcile_children(id, &node.children),
            Kind::Component(component) => {
                let (child, effects) = self.evaluate(id, component, &node, caught);
                if !effects.is_empty() {
                    self.effects.push((id, effects));
                }
                self.reconcile_children(id, &[child]);
            }
        }
    }

    fn evaluate(
        &mut self,
        id: InstanceId,
        component: &ComponentRef,
        node: &Node,
        caught: Option<EffectError>,
    ) -> (Option<Node>, Vec<PendingEffect>) {
        let component = component.component();
        if let (Some(error), Some(fallback)) = (&caught, &component.fallback) {
            log::trace!("{:?} renders its fallback", id);
            return (fallback(error), Vec::new());
        }

        let (hooks, inherited) = match self.draft_mut(id) {
            Some(instance) => (
                mem::take(&mut instance.hooks),
                mem::take(&mut instance.inherited),
            ),
            None => return (None, Vec::new()),
        };

        let requests = self.requests;
        let (child, output) = {
            let mut scope = Scope::new(id, &node.inputs, hooks, inherited, requests, &*self);
            let child = (component.evaluate)(&mut scope);
            (child, scope.finish())
        };

        if let Some(instance) = self.draft_mut(id) {
            instance.hooks = output.hooks;
        }
        self.out.subscriptions.push((id, output.subscriptions));
        self.out
            .new_cells
            .extend(output.new_cells.into_iter().map(|cell| (cell, id)));
        (child, output.effects)
    }

    fn reconcile_children(&mut self, parent: InstanceId, nodes: &[Option<Node>]) {
        let (old, depth) = match self.instance(parent) {
            Some(instance) => (instance.children.clone(), instance.depth + 1),
            None => return,
        };

        let old_keys: Vec<Option<Key>> = old
            .iter()
            .map(|slot| {
                slot.and_then(|id| self.instance(id))
                    .and_then(|instance| instance.description.key.clone())
            })
            .collect();
        let new_keys: Vec<Option<Key>> = nodes
            .iter()
            .map(|node| node.as_ref().and_then(|node| node.key.clone()))
            .collect();
        let plan = match_children(&old_keys, &new_keys);

        for key in plan.duplicates {
            let error = StructuralError::DuplicateKey {
                parent: Some(parent),
                key,
            };
            log::warn!("{}", error);
            self.out.errors.push(error);
        }

        for index in plan.unmatched {
            if let Some(id) = old[index] {
                self.destroy(id);
            }
        }

        let mut children = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let existing = plan.sources[index].and_then(|source| old[source]);
            children.push(self.reconcile_slot(Some(parent), index, depth, existing, node.clone()));
        }

        if children != old {
            log::trace!("children of {:?} changed", parent);
            self.mark_container(Some(parent));
            if let Some(instance) = self.draft_mut(parent) {
                instance.children = children;
            }
        }
    }

    /// Destroys an instance and its subtree, children first.
    fn destroy(&mut self, id: InstanceId) {
        if self.destroyed.contains(&id) {
            return;
        }
        let instance = match self.draft.remove(&id) {
            Some(instance) => instance,
            None => match self.store.get(id) {
                Some(instance) => instance.clone(),
                None => return,
            },
        };
        self.destroyed.insert(id);

        for child in instance.children.iter().flatten() {
            self.destroy(*child);
        }

        log::trace!("destroy {:?} at {}", id, instance.position());
        if instance.is_host() {
            self.out.removals.push(Patch::Remove(id));
        }
        self.out.transitions.push(Transition::Destroy {
            id,
            position: instance.position(),
        });
        self.out.destroyed.push(id);
        self.graveyard.insert(id, instance);
    }

    /// Marks the host container of `from` for relinking.
    fn mark_container(&mut self, from: Option<InstanceId>) {
        let container = self.host_container(from);
        if !self.out.containers.contains(&container) {
            self.out.containers.push(container);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::NodeDescription;
    use crossbeam::channel::unbounded;

    fn commit(store: &mut IdentityStore, draft: Draft) {
        for id in &draft.output.destroyed {
            store.remove(*id);
        }
        for (_, instance) in draft.instances {
            store.insert(instance);
        }
        if let Some(root) = draft.output.root {
            store.set_root(root);
        }
    }

    fn render(store: &mut IdentityStore, node: Option<Node>) -> Vec<Transition> {
        let (tx, _rx) = unbounded();
        let scheduled = HashSet::new();
        let mut work = Work::new(store, &tx, &scheduled);
        work.reconcile_root(node);
        let draft = work.finish();
        let transitions = draft.output.transitions.clone();
        commit(store, draft);
        transitions
    }

    fn list(keys: &[u64]) -> Node {
        keys.iter()
            .fold(NodeDescription::host("list"), |list, key| {
                list.with_child(NodeDescription::host("item").with_key(*key))
            })
            .into()
    }

    #[test]
    fn same_kind_keeps_identity() {
        let mut store = IdentityStore::new();
        render(
            &mut store,
            Some(NodeDescription::host("box").with_input("x", 1).into()),
        );
        let root = store.root().unwrap();

        let transitions = render(
            &mut store,
            Some(NodeDescription::host("box").with_input("x", 2).into()),
        );
        assert_eq!(store.root(), Some(root));
        assert!(matches!(transitions[..], [Transition::Update { id, .. }] if id == root));
    }

    #[test]
    fn kind_change_destroys_subtree_before_create() {
        let mut store = IdentityStore::new();
        render(
            &mut store,
            Some(NodeDescription::host("box").with_child(NodeDescription::host("dot")).into()),
        );
        let transitions = render(&mut store, Some(NodeDescription::host("text").into()));
        let kinds: Vec<&str> = transitions
            .iter()
            .map(|t| match t {
                Transition::Create { .. } => "create",
                Transition::Update { .. } => "update",
                Transition::Destroy { .. } => "destroy",
            })
            .collect();
        assert_eq!(kinds, vec!["destroy", "destroy", "create"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn keyed_reorder_only_updates() {
        let mut store = IdentityStore::new();
        render(&mut store, Some(list(&[1, 2])));
        let root = store.root().unwrap();
        let before = store.get(root).unwrap().children().to_vec();

        let transitions = render(&mut store, Some(list(&[2, 1])));
        assert!(transitions
            .iter()
            .all(|t| matches!(t, Transition::Update { .. })));
        let after = store.get(root).unwrap().children().to_vec();
        assert_eq!(after, vec![before[1], before[0]]);
    }

    #[test]
    fn empty_tag_is_malformed() {
        let mut store = IdentityStore::new();
        let (tx, _rx) = unbounded();
        let scheduled = HashSet::new();
        let mut work = Work::new(&store, &tx, &scheduled);
        work.reconcile_root(Some(NodeDescription::host("").into()));
        let draft = work.finish();
        assert!(matches!(
            draft.output.errors[..],
            [StructuralError::Malformed { .. }]
        ));
        commit(&mut store, draft);
        assert!(store.is_empty());
    }

    #[test]
    fn same_node_bails_out() {
        let mut store = IdentityStore::new();
        let node: Node = NodeDescription::host("box")
            .with_child(NodeDescription::host("dot"))
            .into();
        render(&mut store, Some(node.clone()));
        let transitions = render(&mut store, Some(node));
        assert!(transitions.is_empty());
    }
}
