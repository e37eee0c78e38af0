//! Error types.

use crate::description::Key;
use crate::store::{InstanceId, Position};

/// A problem with the shape of a description tree.
///
/// Structural errors never abort a commit: the offending position falls back to a safe default
/// and the error is reported in [`Commit::errors`](crate::Commit).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    /// Two siblings share a key. The first occurrence keeps the key; later ones are created
    /// fresh at their own positions.
    #[error("duplicate key {key} among the children of {parent:?}")]
    DuplicateKey {
        parent: Option<InstanceId>,
        key: Key,
    },

    /// The description cannot be rendered; nothing is rendered at its position.
    #[error("malformed description at {position}: {reason}")]
    Malformed { position: Position, reason: String },
}

/// Returned by an effect body or cleanup.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EffectError {
    message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> EffectError {
        EffectError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Returned by a memo comparator that could not compare its inputs.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("comparator failed: {0}")]
pub struct PolicyError(pub String);

/// Returned by a host renderer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("no host node for {0:?}")]
    NoSuchNode(InstanceId),

    #[error("host failure: {0}")]
    Other(String),
}

/// Which part of an effect failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectPhase {
    Body,
    Cleanup,
}

/// Errors that abort an update.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// An effect failed and no boundary above its instance caught it.
    #[error("uncaught effect error in {instance:?} ({phase:?}): {source}")]
    Effect {
        instance: InstanceId,
        phase: EffectPhase,
        #[source]
        source: EffectError,
    },

    #[error(transparent)]
    Host(#[from] HostError),

    /// Immediate-lane effects kept scheduling updates.
    #[error("update did not settle after {passes} synchronous passes")]
    UpdateDepthExceeded { passes: usize },
}
