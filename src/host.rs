//! The host renderer and scheduler interface.

use crate::error::HostError;
use crate::rect::Rect;
use crate::store::InstanceId;
use crate::value::Inputs;

/// A host implementation: turns committed host nodes into real primitives.
///
/// Host nodes are identified by the id of the instance that owns them; the host keeps its own
/// mapping from ids to primitives. The engine never touches host primitives directly.
pub trait Host {
    /// Creates a new host node.
    fn create_node(&mut self, id: InstanceId, tag: &str, inputs: &Inputs)
        -> Result<(), HostError>;

    /// Updates a host node's inputs.
    fn update_node(&mut self, id: InstanceId, inputs: &Inputs) -> Result<(), HostError>;

    /// Removes a host node.
    ///
    /// Does not remove it from its parent's children; a `set_children` call follows.
    fn remove_node(&mut self, id: InstanceId) -> Result<(), HostError>;

    /// Sets the children of a host node, or the top-level nodes if `parent` is `None`.
    fn set_children(
        &mut self,
        parent: Option<InstanceId>,
        children: &[InstanceId],
    ) -> Result<(), HostError>;

    /// Returns the laid-out geometry of a host node.
    fn read_layout(&self, id: InstanceId) -> Option<Rect>;

    /// Asks the host to call [`Engine::run_deferred`](crate::Engine::run_deferred) once it has
    /// painted and has time to spare.
    ///
    /// Called at most once until the deferred lane runs.
    fn request_deferred_slot(&mut self) {}

    /// The host may paint now. Immediate-lane effects of the update have settled.
    fn paint(&mut self) {}
}
