use crate::component::ComponentRef;
use crate::value::{Inputs, Value};
use core::fmt;
use core::ops::Deref;
use std::sync::Arc;

/// A host primitive tag, e.g. `"layer"` or `"text"`.
pub type HostTag = Arc<str>;

/// What a description renders as.
///
/// Resolved once when a description is matched into a position; two kinds are the same kind when
/// their host tags are equal, their component refs point to the same registered component, or
/// both are fragments.
#[derive(Debug, Clone)]
pub enum Kind {
    /// A host primitive, turned into a host node by the host.
    Host(HostTag),
    /// A registered component, evaluated into a single child slot.
    Component(ComponentRef),
    /// Expands into its children; has no host node of its own.
    Fragment,
}

impl PartialEq for Kind {
    fn eq(&self, other: &Kind) -> bool {
        match (self, other) {
            (Kind::Host(a), Kind::Host(b)) => a == b,
            (Kind::Component(a), Kind::Component(b)) => a.ptr_eq(b),
            (Kind::Fragment, Kind::Fragment) => true,
            _ => false,
        }
    }
}

/// An explicit identity token overriding positional matching in a list of children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(u64),
    Str(Arc<str>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<u64> for Key {
    fn from(i: u64) -> Key {
        Key::Int(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Key {
        Key::Str(s.into())
    }
}

/// Describes what should exist at a position in the tree.
///
/// Descriptions are cheap to create and immutable once turned into a [`Node`]. They are values,
/// not the live objects: the engine matches them against the instances it already holds.
///
/// ```text
/// let row: Node = NodeDescription::host("row")
///     .with_input("gap", 4)
///     .with_child(NodeDescription::component(&label).with_key(1))
///     .into();
/// ```
#[derive(Debug, Clone)]
pub struct NodeDescription {
    pub kind: Kind,
    pub inputs: Inputs,
    pub children: Vec<Option<Node>>,
    pub key: Option<Key>,
    /// If set, an instance created for this description at a position where an instance with the
    /// same key but a different kind was destroyed adopts that instance's state cells.
    pub inherit_state: bool,
}

impl NodeDescription {
    pub fn new(kind: Kind) -> NodeDescription {
        NodeDescription {
            kind,
            inputs: Inputs::new(),
            children: Vec::new(),
            key: None,
            inherit_state: false,
        }
    }

    pub fn host(tag: impl Into<HostTag>) -> NodeDescription {
        NodeDescription::new(Kind::Host(tag.into()))
    }

    pub fn component(component: &ComponentRef) -> NodeDescription {
        NodeDescription::new(Kind::Component(component.clone()))
    }

    pub fn fragment(children: impl IntoIterator<Item = Option<Node>>) -> NodeDescription {
        NodeDescription {
            children: children.into_iter().collect(),
            ..NodeDescription::new(Kind::Fragment)
        }
    }

    pub fn with_input(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name, value);
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(Some(child.into()));
        self
    }

    /// Adds a conditional child slot; `None` keeps the slot occupied but empty.
    pub fn with_slot(mut self, child: Option<Node>) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn inherit_state(mut self) -> Self {
        self.inherit_state = true;
        self
    }

    pub fn into_node(self) -> Node {
        Node(Arc::new(self))
    }
}

/// A shared, immutable node description.
///
/// Nodes are only ever compared by identity ([`Node::ptr_eq`]); handing the engine the same
/// `Node` again is what lets it skip a subtree.
#[derive(Clone)]
pub struct Node(Arc<NodeDescription>);

impl Node {
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Returns true if an existing instance for `self` can be updated to `other` in place.
    pub(crate) fn same_identity(&self, other: &Node) -> bool {
        self.kind == other.kind && self.key == other.key
    }
}

impl Deref for Node {
    type Target = NodeDescription;
    fn deref(&self) -> &NodeDescription {
        &self.0
    }
}

impl From<NodeDescription> for Node {
    fn from(desc: NodeDescription) -> Node {
        desc.into_node()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}
