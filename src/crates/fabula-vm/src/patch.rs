//! Patches and snapshots: the replayable units of the stream
//!
//! A [`Patch`] is an ordered list of events tagged with the source graph's
//! uid and the state-hash of the graph it was captured against. Applying a
//! patch never mutates its input: it deep-copies, verifies the baseline
//! hash when one is recorded, and replays the events in order.
//!
//! A [`Snapshot`] is a full encoded copy of a graph. Streams interleave
//! snapshots and patches; recovery restores the latest snapshot and applies
//! every later patch in seq order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use fabula_core::graph::Graph;
use fabula_core::record::Record;

use crate::error::{Result, VmError};
use crate::events::Event;

/// An ordered list of events with baseline metadata; apply-once to a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Stable identity
    pub uid: Uuid,

    /// Uid of the graph the events were captured on
    pub registry_id: Uuid,

    /// State-hash of that graph before the events; verified on apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_state_hash: Option<String>,

    /// Events in emission order
    pub events: Vec<Event>,
}

impl Patch {
    pub fn new(registry_id: Uuid, events: Vec<Event>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            registry_id,
            registry_state_hash: None,
            events,
        }
    }

    /// Builder: record the baseline state-hash
    pub fn with_state_hash(mut self, hash: impl Into<String>) -> Self {
        self.registry_state_hash = Some(hash.into());
        self
    }

    /// Return a copy with the event list canonicalized
    pub fn canonicalized(&self) -> Patch {
        Patch {
            uid: self.uid,
            registry_id: self.registry_id,
            registry_state_hash: self.registry_state_hash.clone(),
            events: Event::canonicalize_events(&self.events),
        }
    }

    /// Apply to a deep copy of `graph` and return the copy.
    ///
    /// When a baseline hash is recorded, the copy's pre-application hash
    /// must match or the apply fails without side effects.
    pub fn apply(&self, graph: &Graph) -> Result<Graph> {
        if let Some(expected) = &self.registry_state_hash {
            let actual = graph.state_hash();
            if *expected != actual {
                return Err(VmError::StateHashMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        let mut copy = graph.clone();
        for event in &self.events {
            event.apply(&mut copy)?;
        }
        Ok(copy)
    }

    /// Encode as a `patch`-channel stream record
    pub fn to_record(&self) -> Result<Record> {
        Ok(Record::new("patch", serde_json::to_value(self)?))
    }

    /// Decode from a stream record
    pub fn from_record(record: &Record) -> Result<Patch> {
        if !record.has_channel("patch") {
            return Err(VmError::replay_failed(format!(
                "record {} is not a patch",
                record.uid
            )));
        }
        Ok(serde_json::from_value(record.payload.clone())?)
    }
}

/// A full encoded copy of a graph at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stable identity
    pub uid: Uuid,

    /// The unstructured graph
    pub item: Value,
}

impl Snapshot {
    /// Capture a graph
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            uid: Uuid::new_v4(),
            item: graph.unstructure(),
        }
    }

    /// Rebuild the captured graph
    pub fn restore(&self) -> Result<Graph> {
        Ok(Graph::structure(self.item.clone())?)
    }

    /// Encode as a `snapshot`-channel stream record
    pub fn to_record(&self) -> Result<Record> {
        Ok(Record::new("snapshot", serde_json::to_value(self)?))
    }

    /// Decode from a stream record
    pub fn from_record(record: &Record) -> Result<Snapshot> {
        if !record.has_channel("snapshot") {
            return Err(VmError::replay_failed(format!(
                "record {} is not a snapshot",
                record.uid
            )));
        }
        Ok(serde_json::from_value(record.payload.clone())?)
    }
}
