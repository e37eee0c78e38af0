//! Matching old child slots to new ones.

use crate::description::Key;
use std::collections::{HashMap, HashSet};

/// How the slots of a new child list map onto the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPlan {
    /// For each new slot, the old slot it continues, if any.
    pub sources: Vec<Option<usize>>,
    /// Old slots no new slot continues, in order.
    pub unmatched: Vec<usize>,
    /// Keys that occur more than once in the new list; later occurrences are matched to nothing.
    pub duplicates: Vec<Key>,
    /// Whether the list was matched by key.
    pub dynamic: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum MatchKey<'a> {
    Key(&'a Key),
    AutoKey(usize),
}

/// Assigns match keys to a list: explicit keys as they are, and sequential auto-keys to every
/// slot without one.
///
/// Auto-keying makes lists like `[fixed, fixed, keyed..., fixed]` keep the fixed slots stable.
fn match_keys(keys: &[Option<Key>]) -> impl Iterator<Item = MatchKey<'_>> {
    let mut auto_key_counter = 0;
    keys.iter().map(move |key| match key {
        Some(key) => MatchKey::Key(key),
        None => {
            let k = auto_key_counter;
            auto_key_counter += 1;
            MatchKey::AutoKey(k)
        }
    })
}

/// Matches a new child list against an old one.
///
/// `None` entries are slots without a key; null slots are unkeyed too. A list where no slot on
/// either side has a key is matched by index. Otherwise slots match by key, and slots without a
/// key match by their ordinal among unkeyed slots.
pub fn match_children(old: &[Option<Key>], new: &[Option<Key>]) -> ChildPlan {
    let dynamic = old.iter().chain(new).any(Option::is_some);

    if !dynamic {
        return ChildPlan {
            sources: (0..new.len())
                .map(|i| if i < old.len() { Some(i) } else { None })
                .collect(),
            unmatched: (new.len()..old.len()).collect(),
            duplicates: Vec::new(),
            dynamic,
        };
    }

    // committed lists can hold duplicates that were created fresh; only the first one can be
    // matched again, the rest are dropped
    let mut current = HashMap::with_capacity(old.len());
    let mut unmatched = Vec::new();
    for (index, key) in match_keys(old).enumerate() {
        if current.contains_key(&key) {
            unmatched.push(index);
        } else {
            current.insert(key, index);
        }
    }

    let mut seen = HashSet::with_capacity(new.len());
    let mut duplicates = Vec::new();
    let mut sources = Vec::with_capacity(new.len());
    for key in match_keys(new) {
        if !seen.insert(key) {
            if let MatchKey::Key(key) = key {
                duplicates.push(key.clone());
            }
            sources.push(None);
            continue;
        }
        sources.push(current.remove(&key));
    }

    let unkeyed = new.iter().filter(|key| key.is_none()).count();
    if unkeyed > 0 {
        log::debug!("{} unkeyed slot(s) in a keyed list; matched by order", unkeyed);
    }

    unmatched.extend(current.into_values());
    unmatched.sort_unstable();

    ChildPlan {
        sources,
        unmatched,
        duplicates,
        dynamic,
    }
}
