//! Templates: declarative recipes for materializing graph items
//!
//! A [`Template`] captures what a node should look like without creating it.
//! Requirements embed templates (or name one via `template_ref`), and the
//! planning phase materializes them when a CREATE offer is accepted.
//!
//! The [`TemplateRegistry`] resolves `template_ref` names. An entry may be
//! *anchored* to a node: lookups that originate inside the anchor's subtree
//! treat the entry as closer than an unanchored or ancestor-level entry,
//! which is how scene-local templates win over world-level ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::graph::{GraphItem, ItemKind, Node};

/// A recipe for a graph item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// What to materialize; `Node` or `Subgraph`
    pub kind: ItemKind,

    /// Label for the materialized item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Tags for the materialized item
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Initial locals
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locals: BTreeMap<String, Value>,
}

impl Template {
    /// Template for a plain node
    pub fn node(label: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Node,
            label: Some(label.into()),
            tags: BTreeSet::new(),
            locals: BTreeMap::new(),
        }
    }

    /// Template for a subgraph
    pub fn subgraph(label: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Subgraph,
            ..Self::node(label)
        }
    }

    /// Builder: add a tag
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: set an initial local
    pub fn with_local(mut self, key: impl Into<String>, value: Value) -> Self {
        self.locals.insert(key.into(), value);
        self
    }

    /// Materialize a fresh item from this recipe.
    ///
    /// Every call produces a new uid; templates are recipes, not instances.
    pub fn materialize(&self) -> GraphItem {
        let mut node = Node::new(self.label.clone());
        node.tags = self.tags.clone();
        node.locals = self.locals.clone();
        match self.kind {
            ItemKind::Subgraph => GraphItem::Subgraph(node),
            _ => GraphItem::Node(node),
        }
    }
}

/// A named template, optionally anchored to a scope node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    /// The recipe
    pub template: Template,
    /// Node whose subtree this entry belongs to; `None` = world-level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_id: Option<Uuid>,
}

/// Named template storage with anchored lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRegistry {
    entries: BTreeMap<String, Vec<TemplateEntry>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a world-level template under `name`
    pub fn insert(&mut self, name: impl Into<String>, template: Template) {
        self.entries.entry(name.into()).or_default().push(TemplateEntry {
            template,
            anchor_id: None,
        });
    }

    /// Register a template anchored to a scope node
    pub fn insert_anchored(&mut self, name: impl Into<String>, template: Template, anchor: Uuid) {
        self.entries.entry(name.into()).or_default().push(TemplateEntry {
            template,
            anchor_id: Some(anchor),
        });
    }

    /// All entries registered under `name`, registration order preserved
    pub fn get(&self, name: &str) -> &[TemplateEntry] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve `name` preferring entries anchored nearest to the scope
    /// chain. `scope_chain` lists the anchor candidates from the cursor
    /// outward (cursor, its parent, ...); an entry anchored at position `i`
    /// beats entries anchored farther out, and any anchored entry on the
    /// chain beats unanchored ones. Entries anchored off-chain are skipped.
    pub fn resolve(&self, name: &str, scope_chain: &[Uuid]) -> Option<(&TemplateEntry, u32)> {
        let mut best: Option<(&TemplateEntry, u32)> = None;
        for entry in self.get(name) {
            let rank = match entry.anchor_id {
                Some(anchor) => match scope_chain.iter().position(|uid| *uid == anchor) {
                    Some(pos) => pos as u32,
                    None => continue,
                },
                None => scope_chain.len() as u32,
            };
            match best {
                Some((_, best_rank)) if best_rank <= rank => {}
                _ => best = Some((entry, rank)),
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn materialize_produces_fresh_uids() {
        let t = Template::node("companion").tagged("friend").with_local("hp", json!(5));
        let a = t.materialize();
        let b = t.materialize();
        use crate::entity::Entity;
        assert_ne!(a.uid(), b.uid());
        assert_eq!(a.label(), Some("companion"));
        assert!(a.has_tag("friend"));
    }

    #[test]
    fn anchored_lookup_prefers_nearest_scope() {
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        let off_chain = Uuid::new_v4();

        let mut reg = TemplateRegistry::new();
        reg.insert("npc.guard", Template::node("world guard"));
        reg.insert_anchored("npc.guard", Template::node("far guard"), far);
        reg.insert_anchored("npc.guard", Template::node("near guard"), near);
        reg.insert_anchored("npc.guard", Template::node("other guard"), off_chain);

        let (entry, rank) = reg.resolve("npc.guard", &[near, far]).unwrap();
        assert_eq!(entry.template.label.as_deref(), Some("near guard"));
        assert_eq!(rank, 0);

        // Without the near anchor on the chain, the far anchor wins.
        let (entry, _) = reg.resolve("npc.guard", &[far]).unwrap();
        assert_eq!(entry.template.label.as_deref(), Some("far guard"));

        // With no anchors on the chain, fall back to the world entry.
        let (entry, rank) = reg.resolve("npc.guard", &[]).unwrap();
        assert_eq!(entry.template.label.as_deref(), Some("world guard"));
        assert_eq!(rank, 0);
    }

    #[test]
    fn missing_name_resolves_to_none() {
        let reg = TemplateRegistry::new();
        assert!(reg.resolve("ghost", &[]).is_none());
    }
}
