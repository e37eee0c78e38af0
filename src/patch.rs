use crate::description::HostTag;
use crate::error::HostError;
use crate::host::Host;
use crate::store::InstanceId;
use crate::value::Inputs;

/// Patches for host nodes, produced by a commit and flushed to the [`Host`] in order.
#[derive(Debug, Clone)]
pub enum Patch {
    /// Creates a host node.
    Create {
        id: InstanceId,
        tag: HostTag,
        inputs: Inputs,
    },
    /// Updates a host node's inputs.
    Update { id: InstanceId, inputs: Inputs },
    /// Removes a host node.
    /// **Does not remove the node from its parent's children.**
    Remove(InstanceId),
    /// Sets a host node's children (or the top-level nodes).
    Children {
        parent: Option<InstanceId>,
        children: Vec<InstanceId>,
    },
}

impl Patch {
    /// The host node this patch mutates, if it targets a single node.
    pub fn target(&self) -> Option<InstanceId> {
        match self {
            Patch::Create { id, .. } | Patch::Update { id, .. } | Patch::Remove(id) => Some(*id),
            Patch::Children { parent, .. } => *parent,
        }
    }

    pub(crate) fn apply<H: Host + ?Sized>(&self, host: &mut H) -> Result<(), HostError> {
        match self {
            Patch::Create { id, tag, inputs } => host.create_node(*id, tag, inputs),
            Patch::Update { id, inputs } => host.update_node(*id, inputs),
            Patch::Remove(id) => host.remove_node(*id),
            Patch::Children { parent, children } => host.set_children(*parent, children),
        }
    }
}
