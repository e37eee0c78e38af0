//! Memoization policy: deciding whether a subtree's work can be skipped.

use crate::error::PolicyError;
use crate::store::InstanceId;
use crate::value::Inputs;
use core::fmt;
use std::sync::Arc;

/// Compares old and new inputs; `Ok(true)` means "equal, skip the subtree".
pub type Comparator = Arc<dyn Fn(&Inputs, &Inputs) -> Result<bool, PolicyError> + Send + Sync>;

/// Per-component bailout policy, fixed when the component is registered.
#[derive(Clone)]
pub enum MemoPolicy {
    /// Never skip; the subtree re-evaluates whenever its parent hands it a new description.
    Never,
    /// Skip when the comparator reports the inputs equal. `None` uses [`inputs_identical`].
    Guarded(Option<Comparator>),
}

impl Default for MemoPolicy {
    fn default() -> Self {
        MemoPolicy::Never
    }
}

impl MemoPolicy {
    pub fn is_guarded(&self) -> bool {
        matches!(self, MemoPolicy::Guarded(_))
    }

    /// Returns true if the instance's subtree can be kept as is.
    ///
    /// A failing comparator never skips.
    pub fn should_skip(&self, instance: InstanceId, old: &Inputs, new: &Inputs) -> bool {
        match self {
            MemoPolicy::Never => false,
            MemoPolicy::Guarded(None) => inputs_identical(old, new),
            MemoPolicy::Guarded(Some(comparator)) => match comparator(old, new) {
                Ok(equal) => equal,
                Err(err) => {
                    log::warn!("memo guard of {:?}: {}; re-evaluating", instance, err);
                    false
                }
            },
        }
    }
}

impl fmt::Debug for MemoPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoPolicy::Never => write!(f, "Never"),
            MemoPolicy::Guarded(None) => write!(f, "Guarded(identity)"),
            MemoPolicy::Guarded(Some(_)) => write!(f, "Guarded(custom)"),
        }
    }
}

/// The default comparator: per-key identity.
pub fn inputs_identical(old: &Inputs, new: &Inputs) -> bool {
    old.identical(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn inputs(pairs: &[(&str, Value)]) -> Inputs {
        let mut inputs = Inputs::new();
        for (name, value) in pairs {
            inputs.insert(*name, value.clone());
        }
        inputs
    }

    #[test]
    fn default_policy_never_skips() {
        let a = inputs(&[("x", 1.into())]);
        assert!(!MemoPolicy::default().should_skip(InstanceId::new(), &a, &a));
    }

    #[test]
    fn guarded_policy_compares_per_key() {
        let policy = MemoPolicy::Guarded(None);
        let id = InstanceId::new();
        let shared = Value::object(String::from("theme"));
        let a = inputs(&[("x", 1.into()), ("theme", shared.clone())]);
        let b = inputs(&[("x", 1.into()), ("theme", shared)]);
        let c = inputs(&[("x", 1.into()), ("theme", Value::object(String::from("theme")))]);
        assert!(policy.should_skip(id, &a, &b));
        assert!(!policy.should_skip(id, &a, &c), "fresh composite is a different value");
    }

    #[test]
    fn failing_comparator_does_not_skip() {
        let policy = MemoPolicy::Guarded(Some(Arc::new(|_: &Inputs, _: &Inputs| {
            Err::<bool, _>(PolicyError("boom".into()))
        })));
        let a = Inputs::new();
        assert!(!policy.should_skip(InstanceId::new(), &a, &a));
    }
}
