//! Components and the component registry.

use crate::description::Node;
use crate::error::{EffectError, PolicyError};
use crate::hooks::Scope;
use crate::memo::MemoPolicy;
use crate::value::Inputs;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type Evaluate = Arc<dyn Fn(&mut Scope<'_>) -> Option<Node> + Send + Sync>;
pub(crate) type Fallback = Arc<dyn Fn(&EffectError) -> Option<Node> + Send + Sync>;

/// A component: evaluated with a [`Scope`] into at most one child description.
pub struct Component {
    name: Arc<str>,
    pub(crate) evaluate: Evaluate,
    pub(crate) memo: MemoPolicy,
    pub(crate) fallback: Option<Fallback>,
}

impl Component {
    pub fn new<F>(name: impl Into<Arc<str>>, evaluate: F) -> Component
    where
        F: Fn(&mut Scope<'_>) -> Option<Node> + Send + Sync + 'static,
    {
        Component {
            name: name.into(),
            evaluate: Arc::new(evaluate),
            memo: MemoPolicy::Never,
            fallback: None,
        }
    }

    /// Skip re-evaluation when the inputs are identical key by key.
    pub fn memo(mut self) -> Self {
        self.memo = MemoPolicy::Guarded(None);
        self
    }

    /// Skip re-evaluation when `equal` says the old and new inputs are equal.
    pub fn memo_with<F>(mut self, equal: F) -> Self
    where
        F: Fn(&Inputs, &Inputs) -> Result<bool, PolicyError> + Send + Sync + 'static,
    {
        self.memo = MemoPolicy::Guarded(Some(Arc::new(equal)));
        self
    }

    /// Makes this component a boundary: an effect error in its subtree replaces the subtree
    /// with whatever `fallback` renders.
    pub fn boundary<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&EffectError) -> Option<Node> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_boundary(&self) -> bool {
        self.fallback.is_some()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("memo", &self.memo)
            .field("boundary", &self.is_boundary())
            .finish()
    }
}

/// A reference to a registered component. Two refs are the same kind only if they point to
/// the same registration.
#[derive(Clone)]
pub struct ComponentRef(Arc<Component>);

impl ComponentRef {
    pub fn ptr_eq(&self, other: &ComponentRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub(crate) fn component(&self) -> &Component {
        &self.0
    }
}

impl From<Component> for ComponentRef {
    fn from(component: Component) -> ComponentRef {
        ComponentRef(Arc::new(component))
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{}>", self.0.name)
    }
}

/// Registered components by name.
#[derive(Debug, Default)]
pub struct Registry {
    components: HashMap<Arc<str>, ComponentRef>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers a component, replacing any component of the same name.
    ///
    /// Existing instances keep the replaced registration; descriptions made from the new ref
    /// are a different kind.
    pub fn register(&mut self, component: Component) -> ComponentRef {
        let component = ComponentRef::from(component);
        let name: Arc<str> = component.name().into();
        if self
            .components
            .insert(name, component.clone())
            .is_some()
        {
            log::warn!("component {} registered twice; replaced", component.name());
        }
        component
    }

    pub fn get(&self, name: &str) -> Option<&ComponentRef> {
        self.components.get(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.components.clear();
    }
}
