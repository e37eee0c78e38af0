//! The engine: drives update cycles.
//!
//! An update cycle drains the request queue (root renders, state writes and shared-value
//! publishes), runs a render pass, commits it, flushes host patches, and runs the immediate lane.
//! State written by immediate effects starts another pass before the host may paint. The
//! deferred lane runs when the host calls [`Engine::run_deferred`].

use crate::component::{Component, ComponentRef, Registry};
use crate::config::EngineConfig;
use crate::description::{Kind, Node};
use crate::error::{EngineError, StructuralError};
use crate::fanout::FanoutGraph;
use crate::hooks::{Request, Scope};
use crate::host::Host;
use crate::patch::Patch;
use crate::rect::Rect;
use crate::reconciler::{Draft, Transition, Work};
use crate::scheduler::{run_destroy_cleanups, EffectFailure, EffectScheduler};
use crate::store::{IdentityStore, InstanceId};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;


/// What an update did.
#[derive(Debug, Default)]
pub struct Commit {
    /// Instance transitions of every pass, in order.
    pub transitions: Vec<Transition>,
    /// Host patches flushed, in order.
    pub patches: Vec<Patch>,
    pub errors: Vec<StructuralError>,
    /// Render passes run.
    pub passes: usize,
    /// Effects run.
    pub effects_run: usize,
}

impl Commit {
    pub fn is_empty(&self) -> bool {
        self.passes == 0 && self.effects_run == 0
    }

    pub fn created(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.transitions.iter().filter_map(|t| match t {
            Transition::Create { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn destroyed(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.transitions.iter().filter_map(|t| match t {
            Transition::Destroy { id, .. } => Some(*id),
            _ => None,
        })
    }
}

/// Work taken off the request queue for one pass.
struct Batch {
    root: Option<Option<Node>>,
    scheduled: HashSet<InstanceId>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.root.is_none() && self.scheduled.is_empty()
    }
}

/// A mounted tree and everything needed to update it.
pub struct Engine<H: Host> {
    host: H,
    config: EngineConfig,
    registry: Registry,
    store: IdentityStore,
    graph: FanoutGraph,
    effects: EffectScheduler,
    requests: Sender<Request>,
    inbox: Receiver<Request>,
    pending_root: Option<Option<Node>>,
    /// Instances scheduled by the engine itself (caught boundaries, explicit schedules).
    pending: Vec<InstanceId>,
}

impl<H: Host> Engine<H> {
    pub fn new(host: H, config: EngineConfig) -> Engine<H> {
        let (requests, inbox) = unbounded();
        Engine {
            host,
            config,
            registry: Registry::new(),
            store: IdentityStore::new(),
            graph: FanoutGraph::new(),
            effects: EffectScheduler::new(),
            requests,
            inbox,
            pending_root: None,
            pending: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a component that always re-evaluates.
    pub fn register_component<F>(&mut self, name: &str, evaluate: F) -> ComponentRef
    where
        F: Fn(&mut Scope<'_>) -> Option<Node> + Send + Sync + 'static,
    {
        self.registry.register(Component::new(name, evaluate))
    }

    /// Registers a component built with a memo policy or as a boundary.
    pub fn register(&mut self, component: Component) -> ComponentRef {
        self.registry.register(component)
    }

    pub fn component(&self, name: &str) -> Option<ComponentRef> {
        self.registry.get(name).cloned()
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn graph(&self) -> &FanoutGraph {
        &self.graph
    }

    pub fn root(&self) -> Option<InstanceId> {
        self.store.root()
    }

    pub fn pending_deferred(&self) -> usize {
        self.effects.pending_deferred()
    }

    pub fn read_layout(&self, id: InstanceId) -> Option<Rect> {
        self.host.read_layout(id)
    }

    /// Queues a root render for the next update. Replaces any root render not yet run.
    pub fn set_root(&mut self, root: impl Into<Option<Node>>) {
        if self.pending_root.replace(root.into()).is_some() {
            log::debug!("queued root render superseded");
        }
    }

    /// Forces an instance to re-evaluate in the next update.
    pub fn schedule_render(&mut self, id: InstanceId) {
        self.pending.push(id);
    }

    /// Renders a new root and runs the update.
    pub fn render(&mut self, root: impl Into<Option<Node>>) -> Result<Commit, EngineError> {
        self.set_root(root);
        self.update()
    }

    /// Runs an update cycle: render passes and immediate effects until nothing is scheduled,
    /// then lets the host paint.
    pub fn update(&mut self) -> Result<Commit, EngineError> {
        let mut commit = Commit::default();
        self.settle(&mut commit)?;
        if commit.passes > 0 {
            self.host.paint();
        }
        self.request_slot();
        Ok(commit)
    }

    /// Runs queued deferred effects. Called by the host in a slot it granted.
    ///
    /// State written by the effects is rendered in a new cycle before this returns.
    pub fn run_deferred(&mut self) -> Result<Commit, EngineError> {
        let mut commit = Commit::default();
        let outcome = self
            .effects
            .run_deferred(&self.store, &self.host, self.config.max_deferred_batch);
        commit.effects_run += outcome.ran;
        log::debug!(
            "deferred lane: {} ran, {} skipped, {} left",
            outcome.ran,
            outcome.skipped,
            self.effects.pending_deferred()
        );
        // leftovers of other commits still need a slot when this one fails
        let result = self.settle_deferred(outcome.failure, &mut commit);
        self.request_slot();
        result.map(|()| commit)
    }

    fn settle_deferred(
        &mut self,
        failure: Option<EffectFailure>,
        commit: &mut Commit,
    ) -> Result<(), EngineError> {
        if let Some(failure) = failure {
            self.catch(failure)?;
        }
        if self.has_pending() {
            self.settle(commit)?;
            self.host.paint();
        }
        Ok(())
    }

    /// Destroys the whole tree, running every cleanup.
    pub fn unmount(&mut self) -> Result<Commit, EngineError> {
        self.render(None::<Node>)
    }

    /// Unmounts, then drops all registered components and queued work.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        let result = self.unmount().map(|_| ());
        self.registry.clear();
        self.graph.clear();
        self.effects.clear();
        self.store.clear();
        self.pending_root = None;
        self.pending.clear();
        while self.inbox.try_recv().is_ok() {}
        result
    }

    /// Clears the error a boundary caught and re-renders its children.
    pub fn recover(&mut self, boundary: InstanceId) {
        if let Some(instance) = self.store.get_mut(boundary) {
            if instance.caught.take().is_some() {
                self.pending.push(boundary);
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.pending_root.is_some() || !self.pending.is_empty() || !self.inbox.is_empty()
    }

    fn request_slot(&mut self) {
        if self.effects.wants_slot() {
            self.host.request_deferred_slot();
        }
    }

    /// Runs passes until no requests are left.
    fn settle(&mut self, commit: &mut Commit) -> Result<(), EngineError> {
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                return Ok(());
            }
            if commit.passes >= self.config.max_sync_passes {
                log::error!(
                    "update did not settle after {} passes; dropping {} scheduled instance(s)",
                    commit.passes,
                    batch.scheduled.len()
                );
                return Err(EngineError::UpdateDepthExceeded {
                    passes: commit.passes,
                });
            }
            commit.passes += 1;

            let draft = {
                let mut work = Work::new(&self.store, &self.requests, &batch.scheduled);
                if let Some(root) = batch.root {
                    work.reconcile_root(root);
                }
                work.run_entry_points();
                work.finish()
            };
            self.commit(draft, commit)?;

            let outcome = self.effects.run_immediate(&self.store, &self.host);
            commit.effects_run += outcome.ran;
            if let Some(failure) = outcome.failure {
                self.catch(failure)?;
            }
        }
    }

    fn take_batch(&mut self) -> Batch {
        let mut scheduled: HashSet<InstanceId> = self.pending.drain(..).collect();
        let mut published = HashSet::new();
        while let Ok(request) = self.inbox.try_recv() {
            match request {
                Request::Render(id) => {
                    scheduled.insert(id);
                }
                Request::Publish(cell) => {
                    if published.insert(cell) {
                        scheduled.extend(self.graph.publish(cell));
                    }
                }
            }
        }
        scheduled.retain(|id| self.store.contains(*id));
        Batch {
            root: self.pending_root.take(),
            scheduled,
        }
    }

    fn commit(&mut self, draft: Draft, commit: &mut Commit) -> Result<(), EngineError> {
        let Draft {
            instances,
            graveyard,
            output,
        } = draft;

        for id in &output.destroyed {
            if let Some(instance) = graveyard.get(id) {
                run_destroy_cleanups(instance);
            }
            self.graph.remove_instance(*id);
            self.store.remove(*id);
        }

        for (_, instance) in instances {
            self.store.insert(instance);
        }
        if let Some(root) = output.root {
            self.store.set_root(root);
        }

        for (cell, owner) in output.new_cells {
            self.graph.register_cell(cell, owner);
        }
        for (id, cells) in output.subscriptions {
            if self.store.contains(id) {
                self.graph.resubscribe(id, cells);
            }
        }

        let mut patches = output.removals;
        patches.extend(output.patches);
        for container in output.containers {
            if let Some(patch) = self.store.relink(container) {
                patches.push(patch);
            }
        }

        log::debug!(
            "commit: {} transition(s), {} patch(es), {} effect(s), {} error(s)",
            output.transitions.len(),
            patches.len(),
            output.effects.len(),
            output.errors.len()
        );

        commit.transitions.extend(output.transitions);
        commit.errors.extend(output.errors);

        let store = &self.store;
        self.effects.enqueue(
            output
                .effects
                .into_iter()
                .filter(|effect| store.contains(effect.instance))
                .collect(),
        );

        for patch in &patches {
            patch.apply(&mut self.host)?;
        }
        commit.patches.extend(patches);
        Ok(())
    }

    /// Hands an effect failure to the nearest boundary above the failing instance.
    fn catch(&mut self, failure: EffectFailure) -> Result<(), EngineError> {
        let EffectFailure {
            instance,
            phase,
            error,
        } = failure;

        match self.find_boundary(instance) {
            Some(boundary) => {
                log::warn!(
                    "effect of {:?} failed ({:?}): {}; caught by {:?}",
                    instance,
                    phase,
                    error,
                    boundary
                );
                if let Some(boundary) = self.store.get_mut(boundary) {
                    boundary.caught = Some(error);
                }
                self.pending.push(boundary);
                Ok(())
            }
            None => Err(EngineError::Effect {
                instance,
                phase,
                source: error,
            }),
        }
    }

    /// The nearest boundary ancestor of `id` that is not already showing its fallback.
    fn find_boundary(&self, id: InstanceId) -> Option<InstanceId> {
        let mut cursor = self.store.get(id)?.parent;
        while let Some(current) = cursor {
            let instance = self.store.get(current)?;
            if let Kind::Component(component) = &instance.description.kind {
                if component.component().is_boundary() && instance.caught.is_none() {
                    return Some(current);
                }
            }
            cursor = instance.parent;
        }
        None
    }
}

impl<H: Host + Default> Default for Engine<H> {
    fn default() -> Self {
        Engine::new(H::default(), EngineConfig::default())
    }
}

impl<H: Host> core::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("instances", &self.store.len())
            .field("cells", &self.graph.cell_count())
            .field("effects", &self.effects)
            .finish()
    }
}
