//! Generic keyed collections with criteria search
//!
//! [`Registry`] is the base collection shape: items keyed by uid, searched
//! lazily by [`Criteria`]. The graph arena specializes this for graph items
//! with containment structure; this generic form backs domain registries
//! and any other entity collection a host keeps.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::criteria::Criteria;
use crate::entity::Entity;
use crate::error::{CoreError, Result};

/// A uid-keyed collection of entities.
#[derive(Debug, Clone, Default)]
pub struct Registry<T> {
    items: BTreeMap<Uuid, T>,
}

impl<T: Entity> Registry<T> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Insert an item, rejecting a uid already bound to a different item.
    pub fn add(&mut self, item: T) -> Result<Uuid>
    where
        T: PartialEq,
    {
        let uid = item.uid();
        if let Some(existing) = self.items.get(&uid) {
            if *existing == item {
                return Ok(uid);
            }
            return Err(CoreError::DuplicateIdentity { uid });
        }
        self.items.insert(uid, item);
        Ok(uid)
    }

    pub fn get(&self, uid: &Uuid) -> Option<&T> {
        self.items.get(uid)
    }

    pub fn get_mut(&mut self, uid: &Uuid) -> Option<&mut T> {
        self.items.get_mut(uid)
    }

    /// Unique-label lookup; ambiguity raises, absence is `Ok(None)`.
    pub fn get_by_label(&self, label: &str) -> Result<Option<&T>> {
        let mut matches = self.items.values().filter(|i| i.label() == Some(label));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(one), None) => Ok(Some(one)),
            (Some(_), Some(_)) => Err(CoreError::AmbiguousLabel {
                label: label.to_string(),
                count: self
                    .items
                    .values()
                    .filter(|i| i.label() == Some(label))
                    .count(),
            }),
        }
    }

    /// Lazy criteria search
    pub fn find_all<'a>(&'a self, criteria: &'a Criteria) -> impl Iterator<Item = &'a T> + 'a {
        self.items
            .values()
            .filter(move |item| criteria.matches(*item as &dyn Entity))
    }

    /// First criteria match
    pub fn find_one<'a>(&'a self, criteria: &'a Criteria) -> Option<&'a T> {
        self.find_all(criteria).next()
    }

    pub fn remove(&mut self, uid: &Uuid) -> Option<T> {
        self.items.remove(uid)
    }

    pub fn contains(&self, uid: &Uuid) -> bool {
        self.items.contains_key(uid)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphItem, Node};

    #[test]
    fn add_get_remove() {
        let mut reg: Registry<GraphItem> = Registry::new();
        let uid = reg
            .add(GraphItem::Node(Node::new(Some("a".into()))))
            .unwrap();
        assert!(reg.contains(&uid));
        assert_eq!(reg.get_by_label("a").unwrap().unwrap().uid(), uid);
        reg.remove(&uid);
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_identity_rejected() {
        let mut reg: Registry<GraphItem> = Registry::new();
        let node = Node::new(Some("a".into()));
        let uid = node.uid;
        reg.add(GraphItem::Node(node)).unwrap();
        let other = Node::with_uid(uid, Some("b".into()));
        assert!(reg.add(GraphItem::Node(other)).is_err());
    }
}
