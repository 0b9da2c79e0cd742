//! Structured match criteria for registry search and handler selection
//!
//! A [`Criteria`] bundles the filters a search or a handler registration can
//! express: an identifier (uid or label), a kind bound on the item lattice,
//! required tags, attribute equalities, and an opaque predicate. The same
//! struct drives `find_all`/`find_one` on registries, requirement
//! satisfaction, and handler `selection_criteria`, so specificity is
//! comparable across all three.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::entity::Entity;
use crate::graph::ItemKind;

/// A desired item named by uid or by label.
///
/// Serialized untagged: uuid-shaped strings read back as uids, anything
/// else as a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    /// Exact uid match
    Uid(Uuid),
    /// Label match
    Label(String),
}

impl Identifier {
    /// True when the entity is the one named
    pub fn matches(&self, entity: &dyn Entity) -> bool {
        match self {
            Identifier::Uid(uid) => entity.uid() == *uid,
            Identifier::Label(label) => entity.label() == Some(label.as_str()),
        }
    }
}

impl From<Uuid> for Identifier {
    fn from(uid: Uuid) -> Self {
        Identifier::Uid(uid)
    }
}

impl From<&str> for Identifier {
    fn from(label: &str) -> Self {
        Identifier::Label(label.to_string())
    }
}

/// Opaque predicate over entities. Not serialized; lost on round trips.
pub type CriteriaFn = Arc<dyn Fn(&dyn Entity) -> bool + Send + Sync>;

/// A structured match over entities.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Criteria {
    /// Desired uid or label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,

    /// Kind bound: matches the kind itself and its subtypes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,

    /// Tags the entity must carry (subset test)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub has_tags: BTreeSet<String>,

    /// Attribute equalities; keys resolve through [`Entity::attr`], falling
    /// back to node locals for unknown field names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, Value>,

    /// Arbitrary predicate; transient
    #[serde(skip)]
    pub predicate: Option<CriteriaFn>,
}

impl Criteria {
    /// Criteria that match everything
    pub fn any() -> Self {
        Self::default()
    }

    /// Builder: require an identifier
    pub fn with_identifier(mut self, identifier: impl Into<Identifier>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Builder: require a label (identifier shorthand)
    pub fn with_label(self, label: &str) -> Self {
        self.with_identifier(label)
    }

    /// Builder: require a kind (subtypes included)
    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Builder: require a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.has_tags.insert(tag.into());
        self
    }

    /// Builder: require several tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder: require an attribute equality
    pub fn with_equals(mut self, key: impl Into<String>, value: Value) -> Self {
        self.equals.insert(key.into(), value);
        self
    }

    /// Builder: attach an opaque predicate
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&dyn Entity) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// True when every filter accepts the entity.
    ///
    /// Attribute equalities first try [`Entity::attr`] with the key as a
    /// field name; when that misses, the key is looked up inside the
    /// `locals` attribute, so `equals: {"hp": 3}` matches a node whose
    /// locals carry `hp = 3`.
    pub fn matches(&self, entity: &dyn Entity) -> bool {
        if let Some(identifier) = &self.identifier {
            if !identifier.matches(entity) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            match entity.kind() {
                Some(actual) if actual.is_a(kind) => {}
                _ => return false,
            }
        }
        if !self.has_tags.iter().all(|t| entity.has_tag(t)) {
            return false;
        }
        for (key, expected) in &self.equals {
            let actual = entity.attr(key).or_else(|| {
                entity
                    .attr("locals")
                    .and_then(|locals| locals.get(key).cloned())
            });
            if actual.as_ref() != Some(expected) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(entity) {
                return false;
            }
        }
        true
    }

    /// No filters set; matches everything
    pub fn is_empty(&self) -> bool {
        self.identifier.is_none()
            && self.kind.is_none()
            && self.has_tags.is_empty()
            && self.equals.is_empty()
            && self.predicate.is_none()
    }

    /// Selection specificity, CSS-style: an identifier dominates any number
    /// of other filters; otherwise each filter counts one.
    pub fn specificity(&self) -> u32 {
        if self.identifier.is_some() {
            return 100;
        }
        let mut count = 0;
        if self.kind.is_some() {
            count += 1;
        }
        count += self.has_tags.len() as u32;
        count += self.equals.len() as u32;
        if self.predicate.is_some() {
            count += 1;
        }
        count
    }
}

impl fmt::Debug for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Criteria")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("has_tags", &self.has_tags)
            .field("equals", &self.equals)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for Criteria {
    fn eq(&self, other: &Self) -> bool {
        // Predicates are opaque; equality covers the declarative filters.
        self.identifier == other.identifier
            && self.kind == other.kind
            && self.has_tags == other.has_tags
            && self.equals == other.equals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphItem, Node};
    use serde_json::json;

    fn node(label: &str) -> GraphItem {
        GraphItem::Node(Node::new(Some(label.into())).tagged("red").with_local("hp", json!(3)))
    }

    #[test]
    fn label_and_tag_matching() {
        let n = node("hero");
        assert!(Criteria::any().with_label("hero").matches(&n));
        assert!(!Criteria::any().with_label("villain").matches(&n));
        assert!(Criteria::any().with_tag("red").matches(&n));
        assert!(!Criteria::any().with_tag("blue").matches(&n));
    }

    #[test]
    fn kind_matching_includes_subtypes() {
        let sg = GraphItem::Subgraph(Node::new(Some("scene".into())));
        assert!(Criteria::any().with_kind(ItemKind::Node).matches(&sg));
        assert!(Criteria::any().with_kind(ItemKind::Subgraph).matches(&sg));
        let n = node("plain");
        assert!(!Criteria::any().with_kind(ItemKind::Subgraph).matches(&n));
    }

    #[test]
    fn equals_falls_back_to_locals() {
        let n = node("hero");
        assert!(Criteria::any().with_equals("hp", json!(3)).matches(&n));
        assert!(!Criteria::any().with_equals("hp", json!(4)).matches(&n));
        assert!(Criteria::any()
            .with_equals("label", json!("hero"))
            .matches(&n));
    }

    #[test]
    fn predicate_filter() {
        let n = node("hero");
        let c = Criteria::any().with_predicate(|e| e.label() == Some("hero"));
        assert!(c.matches(&n));
    }

    #[test]
    fn specificity_ranks_identifier_highest() {
        assert_eq!(Criteria::any().specificity(), 0);
        assert_eq!(
            Criteria::any().with_tag("a").with_tag("b").specificity(),
            2
        );
        assert_eq!(Criteria::any().with_label("x").specificity(), 100);
    }
}
