//! # Merge Engine
//!
//! Combines a resource's existing attribute value with a patch value.
//!
//! - **Replace**: the patch value wins, always.
//! - **Merge**: objects are deep-merged by key; anything else, patch wins.
//! - **Append**: lists are concatenated; anything else, patch wins.
//!
//! An existing value that could not be evaluated cannot be combined with, so
//! Merge and Append fall back to Replace for it.

use crate::overlay::{MergeStrategy, PatchAttribute};
use crate::value::Value;
use indexmap::map::Entry;

/// Deep merge two values.
///
/// When both sides are objects, keys of `patch` are merged into `existing`:
/// new keys are appended in `patch` order, keys present on both sides recurse
/// (which overwrites unless both values are objects). Existing keys keep their
/// position. In every other case `patch` is returned unchanged.
pub fn deep_merge(existing: Value, patch: Value) -> Value {
    match (existing, patch) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, overlay_value) in overlay {
                match base.entry(key) {
                    Entry::Occupied(mut slot) => {
                        let current = std::mem::take(slot.get_mut());
                        *slot.get_mut() = deep_merge(current, overlay_value);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(overlay_value);
                    }
                }
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

/// Appends the elements of `patch` to `existing`.
///
/// Both must be lists; order is kept and nothing is deduplicated. Otherwise
/// `patch` wins.
pub fn append_to_list(existing: Value, patch: Value) -> Value {
    match (existing, patch) {
        (Value::List(mut items), Value::List(extra)) => {
            items.extend(extra);
            Value::List(items)
        }
        (_, patch) => patch,
    }
}

/// Computes the new value of an attribute from its current value and a patch.
pub fn apply_strategy(existing: Option<Value>, attr: &PatchAttribute) -> Value {
    let patch = attr.value.clone();
    let existing = match existing {
        Some(value) if !value.is_unevaluated() => value,
        Some(_) => {
            tracing::debug!(
                strategy = %attr.strategy,
                "existing value is not evaluable; replacing"
            );
            return patch;
        }
        None => return patch,
    };

    match attr.strategy {
        MergeStrategy::Replace => patch,
        MergeStrategy::Merge => deep_merge(existing, patch),
        MergeStrategy::Append => append_to_list(existing, patch),
    }
}
