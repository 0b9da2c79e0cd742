//! The entity contract shared by every persistent value
//!
//! An entity is an immutable-identity record: a stable [`Uuid`], an optional
//! short label, and a set of string tags. Nodes, edges, graphs, records,
//! behaviors, and domains all satisfy this contract, which is what lets
//! registries, criteria matching, and dispatch treat them uniformly.
//!
//! Identity and state are separate concerns: two entities are the *same*
//! entity when their `(kind, uid)` match; whether their *state* matches is a
//! question for state-hashes (see [`crate::hashing`]).

use std::collections::BTreeSet;

use serde_json::Value;
use uuid::Uuid;

use crate::graph::ItemKind;

/// Common behavior for identified, labeled, tagged values.
///
/// Implementors provide `uid`, `label`, and `tags`; everything else has a
/// default. The trait is object-safe so criteria predicates and registries
/// can work over `&dyn Entity`.
pub trait Entity {
    /// Stable unique identity
    fn uid(&self) -> Uuid;

    /// Optional short human-readable label (uniqueness is not enforced)
    fn label(&self) -> Option<&str>;

    /// Tag set; by convention namespaced tags use `prefix:value` form
    fn tags(&self) -> &BTreeSet<String>;

    /// The polymorphic kind of this entity, when it participates in the
    /// graph-item lattice. Non-graph entities return `None`.
    fn kind(&self) -> Option<ItemKind> {
        None
    }

    /// Look up a named attribute as a JSON value.
    ///
    /// Used by criteria equality matching; entities without inspectable
    /// attributes return `None` for everything.
    fn attr(&self, _name: &str) -> Option<Value> {
        None
    }

    /// First eight hex characters of the uid, for logs and display names
    fn short_uid(&self) -> String {
        self.uid().simple().to_string()[..8].to_string()
    }

    /// True when the tag set contains `tag`
    fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(tag)
    }

    /// Label if present, otherwise the short uid
    fn display_name(&self) -> String {
        match self.label() {
            Some(label) => label.to_string(),
            None => self.short_uid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain {
        uid: Uuid,
        label: Option<String>,
        tags: BTreeSet<String>,
    }

    impl Entity for Plain {
        fn uid(&self) -> Uuid {
            self.uid
        }
        fn label(&self) -> Option<&str> {
            self.label.as_deref()
        }
        fn tags(&self) -> &BTreeSet<String> {
            &self.tags
        }
    }

    #[test]
    fn display_name_prefers_label() {
        let e = Plain {
            uid: Uuid::new_v4(),
            label: Some("hero".into()),
            tags: BTreeSet::new(),
        };
        assert_eq!(e.display_name(), "hero");
    }

    #[test]
    fn display_name_falls_back_to_short_uid() {
        let e = Plain {
            uid: Uuid::new_v4(),
            label: None,
            tags: BTreeSet::new(),
        };
        assert_eq!(e.display_name().len(), 8);
    }
}
