//! Typed phase outcomes
//!
//! Handlers return one of a closed set of outcome shapes instead of an
//! opaque any-value: booleans for validation, namespace layers for
//! composition, edges for redirects, fragments for the journal, offers and
//! receipts for planning, and patches for finalization. Aggregators treat
//! [`Outcome::None`] as an absent result.

use serde_json::Value;
use uuid::Uuid;

use fabula_core::dispatch::{Behavior, CallReceipt, Domain, HandlerRegistry, HandlerResult};
use fabula_core::ns::NsLayer;

use crate::context::Context;
use crate::fragment::Fragment;
use crate::patch::Patch;
use crate::provision::offers::ProvisionOffer;
use crate::provision::provisioner::ProvisionerHandle;
use crate::provision::receipt::{BuildReceipt, PlanningReceipt};

/// The dispatch registry type the VM instantiates
pub type VmRegistry = HandlerRegistry<Context, Outcome>;
/// A VM behavior
pub type VmBehavior = Behavior<Context, Outcome>;
/// A VM domain
pub type VmDomain = Domain<Context, Outcome>;
/// A VM call receipt
pub type VmReceipt = CallReceipt<Outcome>;

/// What a handler invocation produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Nothing; filtered out by every aggregator
    None,
    /// A validation verdict
    Bool(bool),
    /// An arbitrary JSON value
    Value(Value),
    /// A namespace contribution
    Ns(NsLayer),
    /// A redirect edge
    Edge(Uuid),
    /// Composed journal fragments
    Fragments(Vec<Fragment>),
    /// Collected provision offers
    Offers(Vec<ProvisionOffer>),
    /// Build receipts from an acceptance stage
    Builds(Vec<BuildReceipt>),
    /// The summarized planning outcome
    Planning(PlanningReceipt),
    /// The step's committed patch
    Patch(Patch),
    /// Contributed provisioners
    Provisioners(Vec<ProvisionerHandle>),
}

impl Outcome {
    /// The redirect edge, if this outcome is one
    pub fn as_edge(&self) -> Option<Uuid> {
        match self {
            Outcome::Edge(uid) => Some(*uid),
            _ => None,
        }
    }

    /// The planning receipt, if this outcome is one
    pub fn as_planning(&self) -> Option<&PlanningReceipt> {
        match self {
            Outcome::Planning(receipt) => Some(receipt),
            _ => None,
        }
    }

    /// The fragments, if this outcome carries them
    pub fn into_fragments(self) -> Vec<Fragment> {
        match self {
            Outcome::Fragments(fragments) => fragments,
            _ => Vec::new(),
        }
    }

    /// The patch, if this outcome carries one
    pub fn into_patch(self) -> Option<Patch> {
        match self {
            Outcome::Patch(patch) => Some(patch),
            _ => None,
        }
    }
}

impl HandlerResult for Outcome {
    fn is_present(&self) -> bool {
        !matches!(self, Outcome::None)
    }

    fn is_truthy(&self) -> bool {
        match self {
            Outcome::None => false,
            Outcome::Bool(b) => *b,
            Outcome::Value(v) => v.is_truthy(),
            Outcome::Ns(layer) => !layer.is_empty(),
            Outcome::Edge(_) => true,
            Outcome::Fragments(f) => !f.is_empty(),
            Outcome::Offers(o) => !o.is_empty(),
            Outcome::Builds(b) => !b.is_empty(),
            Outcome::Planning(_) => true,
            Outcome::Patch(_) => true,
            Outcome::Provisioners(p) => !p.is_empty(),
        }
    }
}
