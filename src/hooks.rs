//! Per-instance hook slots and the [`Scope`] components evaluate in.
//!
//! Hooks are order-based: the nth hook call of an evaluation always refers to the nth slot of
//! the instance. A slot whose stored type does not match the call is replaced, and the mismatch
//! is logged.

use crate::error::EffectError;
use crate::fanout::CellId;
use crate::scheduler::{Cleanup, Deps, EffectCx, EffectSlot, Lane, PendingEffect};
use crate::store::{InstanceId, InstanceSource};
use crate::value::{deps_identical, Inputs, Value};
use core::any::{Any, TypeId};
use core::fmt;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A request from a cell handle to the engine; drained at the start of the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    /// Re-evaluate an instance whose state changed.
    Render(InstanceId),
    /// A shared value was published.
    Publish(CellId),
}

/// One hook slot.
#[derive(Clone)]
pub(crate) enum Hook {
    /// An `Arc<StateInner<T>>`.
    State(Arc<dyn Any + Send + Sync>),
    /// An `Arc<Mutex<T>>`.
    Handle(Arc<dyn Any + Send + Sync>),
    Memo {
        deps: Vec<Value>,
        value: Arc<dyn Any + Send + Sync>,
    },
    Effect(Arc<Mutex<EffectSlot>>),
    /// A `SharedValue<T>`, optionally provided to the subtree as the context for `T`.
    Shared {
        provides: Option<TypeId>,
        handle: Arc<dyn Any + Send + Sync>,
    },
}

impl Hook {
    fn name(&self) -> &'static str {
        match self {
            Hook::State(_) => "state",
            Hook::Handle(_) => "handle",
            Hook::Memo { .. } => "memo",
            Hook::Effect(_) => "effect",
            Hook::Shared { .. } => "shared value",
        }
    }
}

struct StateInner<T> {
    value: Mutex<T>,
    owner: Mutex<InstanceId>,
    requests: Sender<Request>,
}

/// A state cell. Writing it schedules its owning instance for re-evaluation.
///
/// Handles are cheap to clone and may be moved into effects and callbacks.
pub struct StateCell<T> {
    inner: Arc<StateInner<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        StateCell {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> StateCell<T> {
    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }
}

impl<T> StateCell<T> {
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.lock())
    }

    pub fn set(&self, value: T) {
        *self.inner.value.lock() = value;
        self.schedule();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.lock());
        self.schedule();
    }

    fn schedule(&self) {
        let owner = *self.inner.owner.lock();
        if self.inner.requests.send(Request::Render(owner)).is_err() {
            log::debug!("state of {:?} written after its engine was dropped", owner);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("StateCell")
            .field(&*self.inner.value.lock())
            .finish()
    }
}

/// A mutable handle. Writes are never observed by the engine: the handle has no way to
/// schedule anything.
pub struct MutableHandle<T> {
    cell: Arc<Mutex<T>>,
}

impl<T> Clone for MutableHandle<T> {
    fn clone(&self) -> Self {
        MutableHandle {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone> MutableHandle<T> {
    pub fn get(&self) -> T {
        self.cell.lock().clone()
    }
}

impl<T> MutableHandle<T> {
    pub fn set(&self, value: T) {
        *self.cell.lock() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.lock())
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("MutableHandle")
            .field(&*self.cell.lock())
            .finish()
    }
}

/// A shared value cell. Publishing schedules every subscriber, wherever it is in the tree.
pub struct SharedValue<T> {
    id: CellId,
    value: Arc<Mutex<T>>,
    requests: Sender<Request>,
}

impl<T> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        SharedValue {
            id: self.id,
            value: Arc::clone(&self.value),
            requests: self.requests.clone(),
        }
    }
}

impl<T: Clone> SharedValue<T> {
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }
}

impl<T> SharedValue<T> {
    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn publish(&self, value: T) {
        *self.value.lock() = value;
        self.notify();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.value.lock());
        self.notify();
    }

    fn notify(&self) {
        if self.requests.send(Request::Publish(self.id)).is_err() {
            log::debug!("{:?} published after its engine was dropped", self.id);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedValue")
            .field("id", &self.id)
            .field("value", &*self.value.lock())
            .finish()
    }
}

/// Everything a scope hands back to the render pass.
pub(crate) struct ScopeOutput {
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<PendingEffect>,
    pub(crate) subscriptions: Vec<CellId>,
    pub(crate) new_cells: Vec<CellId>,
}

/// The evaluation context of one component instance.
pub struct Scope<'a> {
    id: InstanceId,
    inputs: &'a Inputs,
    hooks: Vec<Hook>,
    cursor: usize,
    inherited: VecDeque<Arc<dyn Any + Send + Sync>>,
    requests: &'a Sender<Request>,
    source: &'a dyn InstanceSource,
    effects: Vec<PendingEffect>,
    subscriptions: Vec<CellId>,
    new_cells: Vec<CellId>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        id: InstanceId,
        inputs: &'a Inputs,
        hooks: Vec<Hook>,
        inherited: Vec<Arc<dyn Any + Send + Sync>>,
        requests: &'a Sender<Request>,
        source: &'a dyn InstanceSource,
    ) -> Scope<'a> {
        Scope {
            id,
            inputs,
            hooks,
            cursor: 0,
            inherited: inherited.into(),
            requests,
            source,
            effects: Vec::new(),
            subscriptions: Vec::new(),
            new_cells: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> ScopeOutput {
        if self.cursor < self.hooks.len() {
            log::warn!(
                "{:?} called {} hooks but has {} slots",
                self.id,
                self.cursor,
                self.hooks.len()
            );
        }
        ScopeOutput {
            hooks: self.hooks,
            effects: self.effects,
            subscriptions: self.subscriptions,
            new_cells: self.new_cells,
        }
    }

    /// The instance being evaluated.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn inputs(&self) -> &Inputs {
        self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    fn next_index(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    fn put(&mut self, index: usize, hook: Hook) {
        if let Some(existing) = self.hooks.get_mut(index) {
            log::error!(
                "{:?}: hook {} changed from {} to {}; slot reset",
                self.id,
                index,
                existing.name(),
                hook.name()
            );
            *existing = hook;
        } else {
            self.hooks.push(hook);
        }
    }

    /// A state cell, initialized on first evaluation.
    ///
    /// On the first evaluation of an instance that inherited state cells, the next inherited
    /// cell is adopted instead if its type matches.
    pub fn use_state<T: Send + 'static>(&mut self, init: impl FnOnce() -> T) -> StateCell<T> {
        let index = self.next_index();
        if let Some(Hook::State(slot)) = self.hooks.get(index) {
            if let Ok(inner) = Arc::clone(slot).downcast::<StateInner<T>>() {
                return StateCell { inner };
            }
        }

        let inner = match self.adopt_inherited::<T>() {
            Some(inner) => inner,
            None => Arc::new(StateInner {
                value: Mutex::new(init()),
                owner: Mutex::new(self.id),
                requests: self.requests.clone(),
            }),
        };
        self.put(index, Hook::State(inner.clone()));
        StateCell { inner }
    }

    fn adopt_inherited<T: Send + 'static>(&mut self) -> Option<Arc<StateInner<T>>> {
        let slot = self.inherited.pop_front()?;
        match slot.downcast::<StateInner<T>>() {
            Ok(inner) => {
                log::trace!("{:?} adopted an inherited state cell", self.id);
                *inner.owner.lock() = self.id;
                Some(inner)
            }
            Err(_) => {
                log::debug!("{:?}: inherited state cell has another type; dropped", self.id);
                None
            }
        }
    }

    /// A mutable handle, initialized on first evaluation.
    pub fn use_handle<T: Send + 'static>(&mut self, init: impl FnOnce() -> T) -> MutableHandle<T> {
        let index = self.next_index();
        if let Some(Hook::Handle(slot)) = self.hooks.get(index) {
            if let Ok(cell) = Arc::clone(slot).downcast::<Mutex<T>>() {
                return MutableHandle { cell };
            }
        }

        let cell = Arc::new(Mutex::new(init()));
        self.put(index, Hook::Handle(cell.clone()));
        MutableHandle { cell }
    }

    /// Computes a value and caches it until `deps` change under per-key identity.
    pub fn use_memo<T>(&mut self, deps: Vec<Value>, compute: impl FnOnce() -> T) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        let index = self.next_index();
        if let Some(Hook::Memo { deps: cached, value }) = self.hooks.get(index) {
            if deps_identical(cached, &deps) {
                if let Some(value) = value.downcast_ref::<T>() {
                    return value.clone();
                }
            }
        }

        let value = compute();
        let hook = Hook::Memo {
            deps,
            value: Arc::new(value.clone()),
        };
        match self.hooks.get_mut(index) {
            // recomputation of the same slot is not a mismatch
            Some(slot @ Hook::Memo { .. }) => *slot = hook,
            _ => self.put(index, hook),
        }
        value
    }

    /// Registers an effect. It runs after the commit, in `lane`, whenever `deps` differ from
    /// the last committed snapshot. The body may return a cleanup.
    pub fn use_effect<F>(&mut self, lane: Lane, deps: Deps, body: F)
    where
        F: FnOnce(&mut EffectCx<'_>) -> Result<Option<Cleanup>, EffectError> + Send + 'static,
    {
        let index = self.next_index();
        let slot = match self.hooks.get(index) {
            Some(Hook::Effect(slot)) => Arc::clone(slot),
            _ => {
                let slot = Arc::new(Mutex::new(EffectSlot::new()));
                self.put(index, Hook::Effect(Arc::clone(&slot)));
                slot
            }
        };

        let needs_run = slot.lock().needs_run(&deps);
        if needs_run {
            self.effects
                .push(PendingEffect::new(self.id, lane, deps, slot, Box::new(body)));
        }
    }

    /// Registers an effect with a separate cleanup, which undoes this run of `body`.
    pub fn register_effect<F, C>(&mut self, lane: Lane, deps: Deps, body: F, cleanup: C)
    where
        F: FnOnce(&mut EffectCx<'_>) -> Result<(), EffectError> + Send + 'static,
        C: FnOnce() -> Result<(), EffectError> + Send + 'static,
    {
        self.use_effect(lane, deps, move |cx| {
            body(cx)?;
            Ok(Some(Box::new(cleanup) as Cleanup))
        });
    }

    /// A shared-value cell owned by this instance. It lives as long as the instance.
    pub fn use_shared_value<T: Send + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> SharedValue<T> {
        self.shared_hook(None, init)
    }

    /// A shared-value cell provided to this instance's subtree as the context for `T`.
    pub fn provide<T: Send + 'static>(&mut self, init: impl FnOnce() -> T) -> SharedValue<T> {
        self.shared_hook(Some(TypeId::of::<T>()), init)
    }

    fn shared_hook<T: Send + 'static>(
        &mut self,
        provides: Option<TypeId>,
        init: impl FnOnce() -> T,
    ) -> SharedValue<T> {
        let index = self.next_index();
        if let Some(Hook::Shared { handle, .. }) = self.hooks.get(index) {
            if let Some(shared) = handle.downcast_ref::<SharedValue<T>>() {
                return shared.clone();
            }
        }

        let shared = SharedValue {
            id: CellId::new(),
            value: Arc::new(Mutex::new(init())),
            requests: self.requests.clone(),
        };
        self.new_cells.push(shared.id);
        self.put(
            index,
            Hook::Shared {
                provides,
                handle: Arc::new(shared.clone()),
            },
        );
        shared
    }

    /// Reads a shared value and subscribes this instance to it.
    pub fn subscribe<T: Clone>(&mut self, shared: &SharedValue<T>) -> T {
        if !self.subscriptions.contains(&shared.id) {
            self.subscriptions.push(shared.id);
        }
        shared.get()
    }

    /// Reads the nearest ancestor-provided value of type `T` and subscribes to it.
    pub fn use_context<T: Clone + Send + 'static>(&mut self) -> Option<T> {
        let shared = self.find_provider::<T>()?;
        Some(self.subscribe(&shared))
    }

    fn find_provider<T: Send + 'static>(&self) -> Option<SharedValue<T>> {
        let source = self.source;
        let wanted = TypeId::of::<T>();
        let mut cursor = source.instance(self.id).and_then(|instance| instance.parent);
        while let Some(id) = cursor {
            let instance = source.instance(id)?;
            for hook in &instance.hooks {
                if let Hook::Shared {
                    provides: Some(ty),
                    handle,
                    ..
                } = hook
                {
                    if *ty == wanted {
                        return handle.downcast_ref::<SharedValue<T>>().cloned();
                    }
                }
            }
            cursor = instance.parent;
        }
        None
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("cursor", &self.cursor)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
