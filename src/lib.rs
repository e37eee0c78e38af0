//! UI reconciliation and update scheduling.
//!
//! # Conceptual overview
//! Roost turns trees of immutable node descriptions into persistent component instances, and
//! decides on every update which instances are kept, which are destroyed, and which side effects
//! run.
//!
//! ## Descriptions and instances
//! A [`Node`] describes what should exist at a position: a host primitive, a component, or a
//! fragment, along with its inputs and children. Descriptions are cheap to create and should not
//! do anything on their own. When a description is matched into a position, the engine keeps the
//! [`Instance`] already living there if kind and key agree, or replaces it. Instances carry the
//! state of components from one update to the next.
//!
//! Children are matched by position unless some of them have keys. In a keyed list, children
//! follow their key wherever it moves; children without a key are matched in order among
//! themselves, so that lists like `[header, keyed items..., footer]` keep header and footer
//! stable.
//!
//! ## Updates
//! State cells, shared values and root renders all go through the same request queue. An update
//! drains it, renders a draft of everything that changed, and commits the draft at once. A
//! component that is handed the same [`Node`] again, or whose memo guard finds its inputs equal,
//! skips its whole subtree; anything below it that was scheduled on its own is still rendered.
//!
//! ## Effects
//! Effects run after commit in one of two lanes. Immediate effects run before the host may paint,
//! and may read layout and write state without flicker. Deferred effects run when the host has
//! time, in a slot it grants through [`Engine::run_deferred`]. An effect's cleanup always runs
//! before its next run, and before anything replaces its instance.
//!
//! ## Hosts
//! The engine never touches host primitives. It hands the [`Host`] patches: node creations,
//! input updates, removals, and the list of host children for every host node whose children
//! changed. Components and fragments have no host node; their host descendants are attached to
//! the closest host ancestor.

mod component;
mod config;
mod description;
mod engine;
mod error;
mod fanout;
mod hooks;
mod host;
mod memo;
mod patch;
mod rect;
mod reconciler;
mod scheduler;
mod store;
mod value;

#[cfg(test)]
mod testing;

pub use component::{Component, ComponentRef, Registry};
pub use config::EngineConfig;
pub use description::{HostTag, Key, Kind, Node, NodeDescription};
pub use engine::{Commit, Engine};
pub use error::{EffectError, EffectPhase, EngineError, HostError, PolicyError, StructuralError};
pub use fanout::{CellId, FanoutGraph};
pub use hooks::{MutableHandle, Scope, SharedValue, StateCell};
pub use host::Host;
pub use memo::{inputs_identical, Comparator, MemoPolicy};
pub use patch::Patch;
pub use rect::Rect;
pub use reconciler::{match_children, ChildPlan, Transition};
pub use scheduler::{Cleanup, Deps, EffectCx, EffectScheduler, EffectState, Lane};
pub use store::{IdentityStore, Instance, InstanceId, Position};
pub use value::{deps_identical, Inputs, Value};
