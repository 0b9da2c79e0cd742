//! Process-wide singletons keyed by `(class, label)`
//!
//! A singleton is an entity whose identity is its `(class, label)` pair:
//! declaring the same pair twice yields the same uid. Registration is
//! explicit — nothing registers itself as a side effect of type definition —
//! and the whole store can be cleared between test cases for
//! reproducibility.
//!
//! Singletons support declarative inheritance: a declaration may name a
//! `from_ref` label of the same class and inherits its attributes, with
//! explicit values overriding scalars, objects merging key-wise, and arrays
//! concatenating. Declarations must be loaded in dependency order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A registered singleton instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingletonEntry {
    /// Stable identity, fixed at first declaration of the `(class, label)`
    pub uid: Uuid,
    /// Class tag this instance belongs to
    pub class_tag: String,
    /// Identity label within the class
    pub label: String,
    /// Declared attributes
    pub attrs: BTreeMap<String, Value>,
}

type Store = BTreeMap<(String, String), SingletonEntry>;

fn store() -> &'static Mutex<Store> {
    static STORE: OnceLock<Mutex<Store>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

/// Declare (or re-obtain) the singleton `(class_tag, label)`.
///
/// The first declaration fixes the uid; later declarations with the same
/// pair return the same entry and merge any newly supplied attributes over
/// the stored ones.
pub fn declare(
    class_tag: &str,
    label: &str,
    attrs: BTreeMap<String, Value>,
) -> SingletonEntry {
    let mut guard = store().lock().expect("singleton store poisoned");
    let key = (class_tag.to_string(), label.to_string());
    let entry = guard.entry(key).or_insert_with(|| SingletonEntry {
        uid: Uuid::new_v4(),
        class_tag: class_tag.to_string(),
        label: label.to_string(),
        attrs: BTreeMap::new(),
    });
    for (k, v) in attrs {
        entry.attrs.insert(k, v);
    }
    entry.clone()
}

/// Declare a singleton inheriting attributes from `from_ref` of the same
/// class. Explicit attributes override scalars; object values merge with
/// the explicit side winning key-wise; array values concatenate
/// (inherited first).
pub fn declare_from(
    class_tag: &str,
    label: &str,
    from_ref: &str,
    attrs: BTreeMap<String, Value>,
) -> Result<SingletonEntry> {
    let inherited = get(class_tag, from_ref).ok_or_else(|| {
        CoreError::not_found(format!(
            "singleton {class_tag}:{from_ref} (inherited by '{label}')"
        ))
    })?;
    let mut merged = inherited.attrs;
    for (k, v) in attrs {
        let combined = match (merged.remove(&k), v) {
            (Some(Value::Object(mut base)), Value::Object(over)) => {
                for (ok, ov) in over {
                    base.insert(ok, ov);
                }
                Value::Object(base)
            }
            (Some(Value::Array(mut base)), Value::Array(over)) => {
                base.extend(over);
                Value::Array(base)
            }
            (_, v) => v,
        };
        merged.insert(k, combined);
    }
    Ok(declare(class_tag, label, merged))
}

/// Fetch a declared singleton, if any
pub fn get(class_tag: &str, label: &str) -> Option<SingletonEntry> {
    let guard = store().lock().expect("singleton store poisoned");
    guard
        .get(&(class_tag.to_string(), label.to_string()))
        .cloned()
}

/// All instances of a class, label order
pub fn instances_of(class_tag: &str) -> Vec<SingletonEntry> {
    let guard = store().lock().expect("singleton store poisoned");
    guard
        .values()
        .filter(|e| e.class_tag == class_tag)
        .cloned()
        .collect()
}

/// Drop every registered singleton. Call between test cases.
pub fn clear() {
    let mut guard = store().lock().expect("singleton store poisoned");
    guard.clear();
}
