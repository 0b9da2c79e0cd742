//! Connection records: plain, choice, dependency, and affordance edges
//!
//! Edges are first-class: they have identity, tags, and may carry payload.
//! One record backs all edge variants; the enclosing
//! [`GraphItem`](crate::graph::GraphItem) variant decides which of the
//! optional fields are meaningful:
//!
//! - **Edge** — plain labeled connection.
//! - **ChoiceEdge** — selectable by the cursor; may carry a [`predicate`]
//!   and a [`trigger_phase`] for auto-firing, and `is_call`/`call_type` for
//!   call-with-return semantics.
//! - **Dependency** — carries a [`Requirement`] demanded at the source; the
//!   destination is filled in by planning when the requirement binds.
//! - **Affordance** — carries a [`Requirement`] published by the source
//!   provider toward the destination.
//!
//! [`predicate`]: Edge::predicate
//! [`trigger_phase`]: Edge::trigger_phase
//! [`Requirement`]: crate::requirement::Requirement

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::predicate::EdgePredicate;
use crate::requirement::Requirement;

/// Which redirect phase an auto-firing choice edge triggers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPhase {
    /// Fire before state mutation, redirecting the cursor pre-update
    Prereqs,
    /// Fire after finalization, redirecting before control returns
    Postreqs,
}

/// A directed labeled connection between two vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Stable identity
    pub uid: Uuid,

    /// Optional short label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Tag set
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Source vertex uid; optional during construction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,

    /// Destination vertex uid; optional during construction, and filled in
    /// by planning for dependency edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<Uuid>,

    /// Availability condition, evaluated against the current namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<EdgePredicate>,

    /// When set, the edge auto-fires during that phase if its predicate
    /// holds; otherwise it is presented as a selectable choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_phase: Option<TriggerPhase>,

    /// Following this edge pushes a stack frame recording the return cursor
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_call: bool,

    /// Semantic category of the call, for stack bookkeeping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    /// The requirement carried by dependency and affordance edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<Requirement>,

    /// Arbitrary payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Edge {
    /// Create an edge with a fresh uid between two vertices
    pub fn new(source_id: Option<Uuid>, destination_id: Option<Uuid>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label: None,
            tags: BTreeSet::new(),
            source_id,
            destination_id,
            predicate: None,
            trigger_phase: None,
            is_call: false,
            call_type: None,
            requirement: None,
            payload: None,
        }
    }

    /// Builder: set the label
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: add a tag
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: set the availability predicate
    pub fn with_predicate(mut self, predicate: EdgePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Builder: auto-fire during the given phase
    pub fn triggered(mut self, phase: TriggerPhase) -> Self {
        self.trigger_phase = Some(phase);
        self
    }

    /// Builder: mark as a call edge
    pub fn as_call(mut self, call_type: Option<String>) -> Self {
        self.is_call = true;
        self.call_type = call_type;
        self
    }

    /// Builder: attach a requirement
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    /// Both endpoints resolve to uids
    pub fn is_complete(&self) -> bool {
        self.source_id.is_some() && self.destination_id.is_some()
    }
}
