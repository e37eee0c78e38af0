//! The effect scheduler: runs committed side effects in two lanes.
//!
//! ## Lanes
//! Immediate-lane effects run synchronously after a commit has been flushed to the host, before
//! the host may paint. They exist for layout reads and writes that must not flicker. Deferred-lane
//! effects run once the host hands control back through a deferred slot, and may be batched
//! across several commits.
//!
//! ## Ordering
//! Cleanups of destroyed instances run first, at the start of the commit. After that, effects
//! run in the commit's depth-first post-order (children before parents); each effect's previous
//! cleanup runs right before its body.

use crate::error::{EffectError, EffectPhase};
use crate::hooks::Hook;
use crate::host::Host;
use crate::rect::Rect;
use crate::store::{IdentityStore, Instance, InstanceId};
use crate::value::{deps_identical, Value};
use core::fmt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Scheduling class of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// After the host flush, before paint.
    Immediate,
    /// After paint, whenever the host grants a deferred slot.
    Deferred,
}

/// When an effect re-runs.
#[derive(Debug, Clone)]
pub enum Deps {
    /// After every commit of its instance.
    Always,
    /// After the first commit only.
    Once,
    /// When the list differs from the last committed one under per-key identity.
    Values(Vec<Value>),
}

/// Undoes an effect; runs before the effect's next run or when its instance is destroyed.
pub type Cleanup = Box<dyn FnOnce() -> Result<(), EffectError> + Send>;

pub(crate) type EffectBody =
    Box<dyn FnOnce(&mut EffectCx<'_>) -> Result<Option<Cleanup>, EffectError> + Send>;

/// Where an effect is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    Idle,
    Pending,
    Running,
}

/// Per-hook effect storage, shared between an instance and the lane queues.
pub(crate) struct EffectSlot {
    pub(crate) state: EffectState,
    /// The dependency snapshot of the last commit; `None` before the first commit and for
    /// [`Deps::Always`].
    deps: Option<Vec<Value>>,
    cleanup: Option<Cleanup>,
}

impl EffectSlot {
    pub(crate) fn new() -> EffectSlot {
        EffectSlot {
            state: EffectState::Idle,
            deps: None,
            cleanup: None,
        }
    }

    pub(crate) fn needs_run(&self, deps: &Deps) -> bool {
        match (deps, &self.deps) {
            (Deps::Always, _) => true,
            (Deps::Once, old) => old.is_none(),
            (Deps::Values(new), Some(old)) => !deps_identical(old, new),
            (Deps::Values(_), None) => true,
        }
    }
}

impl fmt::Debug for EffectSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EffectSlot")
            .field("state", &self.state)
            .field("deps", &self.deps)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// An effect registered during a render, waiting for its commit.
pub(crate) struct PendingEffect {
    pub(crate) instance: InstanceId,
    pub(crate) lane: Lane,
    deps: Deps,
    slot: Arc<Mutex<EffectSlot>>,
    body: EffectBody,
    commit: u64,
}

impl PendingEffect {
    pub(crate) fn new(
        instance: InstanceId,
        lane: Lane,
        deps: Deps,
        slot: Arc<Mutex<EffectSlot>>,
        body: EffectBody,
    ) -> PendingEffect {
        PendingEffect {
            instance,
            lane,
            deps,
            slot,
            body,
            commit: 0,
        }
    }
}

/// What an effect body can see while it runs.
pub struct EffectCx<'a> {
    instance: InstanceId,
    lane: Lane,
    store: &'a IdentityStore,
    host: &'a dyn Host,
}

impl<'a> EffectCx<'a> {
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// The host nodes this effect's instance renders to, in order.
    pub fn host_nodes(&self) -> Vec<InstanceId> {
        self.store.host_nodes(self.instance)
    }

    pub fn read_layout(&self, id: InstanceId) -> Option<Rect> {
        self.host.read_layout(id)
    }

    /// Geometry of the first host node of this instance.
    pub fn layout(&self) -> Option<Rect> {
        self.host_nodes()
            .first()
            .and_then(|id| self.host.read_layout(*id))
    }
}

/// An effect that failed while running a lane.
#[derive(Debug)]
pub(crate) struct EffectFailure {
    pub(crate) instance: InstanceId,
    pub(crate) phase: EffectPhase,
    pub(crate) error: EffectError,
}

/// Result of running a lane.
#[derive(Debug, Default)]
pub(crate) struct LaneOutcome {
    pub(crate) ran: usize,
    pub(crate) skipped: usize,
    pub(crate) failure: Option<EffectFailure>,
}

/// Two-queue effect scheduler.
#[derive(Default)]
pub struct EffectScheduler {
    immediate: VecDeque<PendingEffect>,
    deferred: VecDeque<PendingEffect>,
    commits: u64,
    slot_requested: bool,
}

impl EffectScheduler {
    pub fn new() -> EffectScheduler {
        EffectScheduler::default()
    }

    /// Commits the dependency snapshots of a render's effects and queues them by lane.
    pub(crate) fn enqueue(&mut self, effects: Vec<PendingEffect>) {
        if effects.is_empty() {
            return;
        }
        self.commits += 1;
        for mut effect in effects {
            effect.commit = self.commits;
            {
                let mut slot = effect.slot.lock();
                slot.state = EffectState::Pending;
                slot.deps = match &effect.deps {
                    Deps::Always => None,
                    Deps::Once => Some(Vec::new()),
                    Deps::Values(values) => Some(values.clone()),
                };
            }
            let queue = match effect.lane {
                Lane::Immediate => &mut self.immediate,
                Lane::Deferred => &mut self.deferred,
            };
            // a newer commit supersedes a run that has not happened yet
            queue.retain(|other| !Arc::ptr_eq(&other.slot, &effect.slot));
            queue.push_back(effect);
        }
    }

    pub fn pending_immediate(&self) -> usize {
        self.immediate.len()
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Returns true if a deferred slot should be requested from the host, and records the
    /// request.
    pub(crate) fn wants_slot(&mut self) -> bool {
        if self.deferred.is_empty() || self.slot_requested {
            return false;
        }
        self.slot_requested = true;
        true
    }

    pub(crate) fn run_immediate(&mut self, store: &IdentityStore, host: &dyn Host) -> LaneOutcome {
        run_lane(&mut self.immediate, Lane::Immediate, store, host, None)
    }

    pub(crate) fn run_deferred(
        &mut self,
        store: &IdentityStore,
        host: &dyn Host,
        limit: Option<usize>,
    ) -> LaneOutcome {
        self.slot_requested = false;
        run_lane(&mut self.deferred, Lane::Deferred, store, host, limit)
    }

    pub(crate) fn clear(&mut self) {
        for effect in self.immediate.drain(..).chain(self.deferred.drain(..)) {
            effect.slot.lock().state = EffectState::Idle;
        }
        self.slot_requested = false;
    }
}

impl fmt::Debug for EffectScheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EffectScheduler")
            .field("immediate", &self.immediate.len())
            .field("deferred", &self.deferred.len())
            .field("slot_requested", &self.slot_requested)
            .finish()
    }
}

fn run_lane(
    queue: &mut VecDeque<PendingEffect>,
    lane: Lane,
    store: &IdentityStore,
    host: &dyn Host,
    limit: Option<usize>,
) -> LaneOutcome {
    let mut outcome = LaneOutcome::default();
    let mut budget = limit.unwrap_or(usize::MAX);

    while budget > 0 {
        let effect = match queue.pop_front() {
            Some(effect) => effect,
            None => break,
        };
        budget -= 1;

        if !store.contains(effect.instance) {
            // destroyed before the lane ran; its cleanup already ran on destroy
            log::trace!("skipping {:?} effect of destroyed {:?}", lane, effect.instance);
            effect.slot.lock().state = EffectState::Idle;
            outcome.skipped += 1;
            continue;
        }

        let commit = effect.commit;
        let instance = effect.instance;
        let mut cx = EffectCx {
            instance,
            lane,
            store,
            host,
        };
        match run_effect(effect.slot, effect.body, &mut cx) {
            Ok(()) => outcome.ran += 1,
            Err((phase, error)) => {
                // the rest of this commit's lane is abandoned
                queue.retain(|other| {
                    if other.commit == commit {
                        other.slot.lock().state = EffectState::Idle;
                        false
                    } else {
                        true
                    }
                });
                outcome.failure = Some(EffectFailure {
                    instance,
                    phase,
                    error,
                });
                break;
            }
        }
    }

    outcome
}

fn run_effect(
    slot: Arc<Mutex<EffectSlot>>,
    body: EffectBody,
    cx: &mut EffectCx<'_>,
) -> Result<(), (EffectPhase, EffectError)> {
    let cleanup = {
        let mut slot = slot.lock();
        slot.state = EffectState::Running;
        slot.cleanup.take()
    };

    if let Some(cleanup) = cleanup {
        if let Err(err) = cleanup() {
            slot.lock().state = EffectState::Idle;
            return Err((EffectPhase::Cleanup, err));
        }
    }

    let result = body(cx);
    let mut slot = slot.lock();
    slot.state = EffectState::Idle;
    match result {
        Ok(cleanup) => {
            slot.cleanup = cleanup;
            Ok(())
        }
        Err(err) => Err((EffectPhase::Body, err)),
    }
}

/// Runs every cleanup of a destroyed instance, in hook order.
///
/// Failures are logged and never stop the commit.
pub(crate) fn run_destroy_cleanups(instance: &Instance) {
    for hook in &instance.hooks {
        if let Hook::Effect(slot) = hook {
            let cleanup = {
                let mut slot = slot.lock();
                slot.state = EffectState::Idle;
                slot.cleanup.take()
            };
            if let Some(cleanup) = cleanup {
                if let Err(err) = cleanup() {
                    log::error!("cleanup of destroyed {:?} failed: {}", instance.id, err);
                }
            }
        }
    }
}
