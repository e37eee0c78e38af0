//! A host that records what the engine asks of it.

use crate::error::HostError;
use crate::host::Host;
use crate::rect::Rect;
use crate::store::InstanceId;
use crate::value::Inputs;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Create(InstanceId, String),
    Update(InstanceId),
    Remove(InstanceId),
    Children(Option<InstanceId>, Vec<InstanceId>),
    Paint,
    RequestSlot,
}

#[derive(Debug, Default)]
pub struct RecordingHost {
    pub calls: Vec<HostCall>,
    pub nodes: HashMap<InstanceId, (String, Inputs)>,
    pub children: HashMap<Option<InstanceId>, Vec<InstanceId>>,
    pub layout: HashMap<InstanceId, Rect>,
    /// Host tags whose creation fails.
    pub fail_tag: Option<String>,
}

impl RecordingHost {
    pub fn take_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    /// Host node mutations in `calls`, without paints and slot requests.
    pub fn mutations(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| !matches!(call, HostCall::Paint | HostCall::RequestSlot))
            .count()
    }

    pub fn top_level(&self) -> &[InstanceId] {
        self.children.get(&None).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tag(&self, id: InstanceId) -> Option<&str> {
        self.nodes.get(&id).map(|(tag, _)| tag.as_str())
    }
}

impl Host for RecordingHost {
    fn create_node(&mut self, id: InstanceId, tag: &str, inputs: &Inputs) -> Result<(), HostError> {
        if self.fail_tag.as_deref() == Some(tag) {
            return Err(HostError::Other(format!("cannot create {}", tag)));
        }
        self.calls.push(HostCall::Create(id, tag.into()));
        self.nodes.insert(id, (tag.into(), inputs.clone()));
        Ok(())
    }

    fn update_node(&mut self, id: InstanceId, inputs: &Inputs) -> Result<(), HostError> {
        let node = self.nodes.get_mut(&id).ok_or(HostError::NoSuchNode(id))?;
        node.1 = inputs.clone();
        self.calls.push(HostCall::Update(id));
        Ok(())
    }

    fn remove_node(&mut self, id: InstanceId) -> Result<(), HostError> {
        self.nodes.remove(&id).ok_or(HostError::NoSuchNode(id))?;
        self.children.remove(&Some(id));
        self.calls.push(HostCall::Remove(id));
        Ok(())
    }

    fn set_children(
        &mut self,
        parent: Option<InstanceId>,
        children: &[InstanceId],
    ) -> Result<(), HostError> {
        if let Some(parent) = parent {
            if !self.nodes.contains_key(&parent) {
                return Err(HostError::NoSuchNode(parent));
            }
        }
        self.children.insert(parent, children.to_vec());
        self.calls
            .push(HostCall::Children(parent, children.to_vec()));
        Ok(())
    }

    fn read_layout(&self, id: InstanceId) -> Option<Rect> {
        self.layout.get(&id).copied()
    }

    fn request_deferred_slot(&mut self) {
        self.calls.push(HostCall::RequestSlot);
    }

    fn paint(&mut self) {
        self.calls.push(HostCall::Paint);
    }
}
