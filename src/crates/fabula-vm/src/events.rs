//! Mutation capture: events, canonicalization, and replay
//!
//! Every mutation of a watched graph is captured as an [`Event`] — one of
//! `CREATE`/`READ`/`UPDATE`/`DELETE` with the mutated attribute and the new
//! and old values. Buffered events are **canonicalized** before they are
//! persisted in a patch:
//!
//! - For each entity, structural creates and deletes reduce to at most one
//!   kept `DELETE` (the first, when the entity existed before the buffer)
//!   and one kept `CREATE` (the last, when the entity exists after it):
//!   `C → [C]`, `C D → []`, `C D C → [C]`, `D C → [D, C]`, and so on.
//! - Attribute updates that precede the last kept `CREATE` are dropped (the
//!   entity did not exist yet), and all updates are dropped when the entity
//!   ends up non-existent.
//! - Surviving attribute operations coalesce to the last write per
//!   `(entity, attribute)`; an attribute `DELETE` supersedes earlier
//!   updates to the same attribute.
//!
//! Canonicalization is idempotent: applying it twice yields the same event
//! list as applying it once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use fabula_core::graph::{Graph, GraphItem};

use crate::error::{Result, VmError};

/// The four mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Read,
    Update,
    Delete,
}

/// A single captured mutation.
///
/// Conventions:
/// - **structural CREATE**: `source_id` is the graph, `name` is `None`, and
///   `value` is the unstructured item (which carries its uid);
/// - **structural DELETE**: `source_id` is the graph, `name` is `None`, and
///   `value` is the removed item's uid;
/// - **attribute UPDATE/DELETE**: `source_id` is the item and `name` is the
///   attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The registry or item the mutation happened on
    pub source_id: Uuid,

    /// Mutation kind
    pub event_type: EventType,

    /// Attribute name, for attribute-level events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// New value (or removed uid, for structural deletes)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,

    /// Previous value, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

impl Event {
    /// Structural CREATE of an item in a registry
    pub fn created(registry_id: Uuid, item_tree: Value) -> Self {
        Self {
            source_id: registry_id,
            event_type: EventType::Create,
            name: None,
            value: item_tree,
            old_value: None,
        }
    }

    /// Structural DELETE of an item from a registry
    pub fn removed(registry_id: Uuid, uid: Uuid) -> Self {
        Self {
            source_id: registry_id,
            event_type: EventType::Delete,
            name: None,
            value: Value::String(uid.to_string()),
            old_value: None,
        }
    }

    /// Attribute UPDATE on an item
    pub fn updated(source_id: Uuid, name: impl Into<String>, value: Value, old: Option<Value>) -> Self {
        Self {
            source_id,
            event_type: EventType::Update,
            name: Some(name.into()),
            value,
            old_value: old,
        }
    }

    /// Attribute DELETE on an item
    pub fn attr_removed(source_id: Uuid, name: impl Into<String>, old: Option<Value>) -> Self {
        Self {
            source_id,
            event_type: EventType::Delete,
            name: Some(name.into()),
            value: Value::Null,
            old_value: old,
        }
    }

    /// The entity uid a structural event is about, if it is one
    fn structural_uid(&self) -> Option<Uuid> {
        match (self.event_type, &self.name) {
            (EventType::Create, None) => self
                .value
                .get("uid")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok()),
            (EventType::Delete, None) => {
                self.value.as_str().and_then(|s| Uuid::parse_str(s).ok())
            }
            _ => None,
        }
    }

    /// Apply one event to a graph in place.
    pub fn apply(&self, graph: &mut Graph) -> Result<()> {
        match self.event_type {
            EventType::Read => Ok(()),
            EventType::Create => {
                if self.source_id != graph.uid {
                    return Err(VmError::replay_failed(format!(
                        "create targets unknown registry {}",
                        self.source_id
                    )));
                }
                let item = GraphItem::structure(self.value.clone())?;
                graph.add(item)?;
                Ok(())
            }
            EventType::Update => {
                let name = self.name.as_deref().ok_or_else(|| {
                    VmError::replay_failed("update event without an attribute name")
                })?;
                if self.source_id == graph.uid {
                    apply_graph_attr(graph, name, self.value.clone())
                } else {
                    let item = graph.get_mut(&self.source_id).ok_or_else(|| {
                        VmError::replay_failed(format!("update targets missing item {}", self.source_id))
                    })?;
                    item.set_attr(name, self.value.clone())?;
                    Ok(())
                }
            }
            EventType::Delete => match &self.name {
                Some(name) => {
                    let item = graph.get_mut(&self.source_id).ok_or_else(|| {
                        VmError::replay_failed(format!("delete targets missing item {}", self.source_id))
                    })?;
                    item.clear_attr(name)?;
                    Ok(())
                }
                None => {
                    let uid = self.structural_uid().ok_or_else(|| {
                        VmError::replay_failed("delete event without an attribute name or uid value")
                    })?;
                    graph.remove(&uid).ok_or_else(|| {
                        VmError::replay_failed(format!("delete targets missing item {uid}"))
                    })?;
                    Ok(())
                }
            },
        }
    }

    /// Apply a slice of events, in order, to a copy of `graph`.
    pub fn apply_all(events: &[Event], graph: &Graph) -> Result<Graph> {
        let mut copy = graph.clone();
        for event in events {
            event.apply(&mut copy)?;
        }
        Ok(copy)
    }

    /// Reduce an event buffer to its canonical form.
    pub fn canonicalize_events(events: &[Event]) -> Vec<Event> {
        #[derive(Default)]
        struct Track {
            first_token: Option<EventType>,
            last_token: Option<EventType>,
            first_delete: Option<usize>,
            last_create: Option<usize>,
            attr_last: BTreeMap<String, usize>,
        }

        let mut tracks: BTreeMap<Uuid, Track> = BTreeMap::new();

        for (idx, event) in events.iter().enumerate() {
            if let Some(uid) = event.structural_uid() {
                let track = tracks.entry(uid).or_default();
                match event.event_type {
                    EventType::Create => {
                        track.first_token.get_or_insert(EventType::Create);
                        track.last_token = Some(EventType::Create);
                        track.last_create = Some(idx);
                    }
                    EventType::Delete => {
                        track.first_token.get_or_insert(EventType::Delete);
                        track.last_token = Some(EventType::Delete);
                        track.first_delete.get_or_insert(idx);
                    }
                    _ => {}
                }
            } else if event.name.is_some()
                && matches!(event.event_type, EventType::Update | EventType::Delete)
            {
                let track = tracks.entry(event.source_id).or_default();
                track
                    .attr_last
                    .insert(event.name.clone().expect("checked above"), idx);
            }
            // READ events never survive canonicalization.
        }

        let mut kept: Vec<usize> = Vec::new();
        for track in tracks.values() {
            let has_structural = track.first_token.is_some();
            if track.first_token == Some(EventType::Delete) {
                kept.push(track.first_delete.expect("tracked"));
            }
            if has_structural && track.last_token == Some(EventType::Create) {
                kept.push(track.last_create.expect("tracked"));
            }

            // The entity exists after the buffer when it was never touched
            // structurally, or when the final structural token is a CREATE.
            let exists_after = !has_structural || track.last_token == Some(EventType::Create);
            if exists_after {
                let create_floor = if track.last_token == Some(EventType::Create) {
                    track.last_create
                } else {
                    None
                };
                for idx in track.attr_last.values() {
                    if let Some(floor) = create_floor {
                        if *idx < floor {
                            continue;
                        }
                    }
                    kept.push(*idx);
                }
            }
        }

        kept.sort_unstable();
        kept.dedup();
        kept.into_iter().map(|idx| events[idx].clone()).collect()
    }
}

fn apply_graph_attr(graph: &mut Graph, name: &str, value: Value) -> Result<()> {
    match name {
        "label" => {
            graph.label = value.as_str().map(str::to_string);
            Ok(())
        }
        "tags" => {
            graph.tags = serde_json::from_value(value)?;
            Ok(())
        }
        "locals" => {
            graph.locals = serde_json::from_value(value)?;
            Ok(())
        }
        other => Err(VmError::replay_failed(format!(
            "unknown graph attribute '{other}'"
        ))),
    }
}

/// A buffer of emitted events with replay helpers.
///
/// Useful in preview execution: collect mutations first, decide to commit
/// later. Replay always happens against a copy of the target graph.
#[derive(Debug, Clone, Default)]
pub struct ReplayWatcher {
    /// Events in emission order
    pub events: Vec<Event>,
}

impl ReplayWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event
    pub fn submit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Canonicalize the buffer and apply it to a copy of `graph`
    pub fn replay(&self, graph: &Graph) -> Result<Graph> {
        Event::apply_all(&Event::canonicalize_events(&self.events), graph)
    }

    /// Empty the buffer
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
