//! Provision offers and the cost model
//!
//! An offer is a provisioner's proposal to satisfy a requirement at some
//! cost. Costs combine a base cost from the operation with a proximity
//! penalty from containment distance:
//!
//! | Base                         | Proximity                     |
//! |------------------------------|-------------------------------|
//! | direct (existing)        = 0 | same node            = 0      |
//! | light indirect (update) = 10 | same subgraph        = 5      |
//! | heavy indirect (clone)  = 50 | same grandparent     = 10     |
//! | create                 = 100 | distant              = 20     |
//!
//! Acceptance is a closed action set rather than an opaque callable, so
//! offers stay inspectable and replay stays deterministic; the `Custom`
//! variant remains as the extension point for host-defined provisioners.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use fabula_core::entity::Entity;
use fabula_core::error::HandlerError;
use fabula_core::factory::Template;
use fabula_core::graph::{Graph, GraphItem, Node};
use fabula_core::requirement::ProvisioningPolicy;

use crate::context::Context;
use crate::error::{Result, VmError};

/// Base acceptance cost by operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionCost {
    /// Link an existing provider as-is
    Direct,
    /// Mutate an existing provider to satisfy
    LightIndirect,
    /// Copy a reference into a new provider
    HeavyIndirect,
    /// Materialize a brand-new provider
    Create,
}

impl ProvisionCost {
    /// The base cost value
    pub fn base(self) -> u32 {
        match self {
            ProvisionCost::Direct => 0,
            ProvisionCost::LightIndirect => 10,
            ProvisionCost::HeavyIndirect => 50,
            ProvisionCost::Create => 100,
        }
    }
}

/// Containment proximity between a requirement's source and a candidate.
///
/// Returns `(penalty, detail)`.
pub fn proximity_between(graph: &Graph, source: Option<Uuid>, candidate: Uuid) -> (u32, &'static str) {
    let Some(source) = source else {
        return (20, "distant");
    };
    if source == candidate {
        return (0, "same block");
    }
    let source_chain = graph.ancestors(&source);
    let candidate_chain = graph.ancestors(&candidate);
    match (source_chain.first(), candidate_chain.first()) {
        (Some(a), Some(b)) if a == b => return (5, "same scene"),
        _ => {}
    }
    match (source_chain.get(1), candidate_chain.get(1)) {
        (Some(a), Some(b)) if a == b => return (10, "same episode"),
        _ => {}
    }
    (20, "distant")
}

/// What accepting an offer actually does.
#[derive(Clone)]
pub enum OfferAction {
    /// Link an existing node
    UseExisting {
        /// The provider to link
        provider_id: Uuid,
    },
    /// Materialize a template into a new node
    CreateFromTemplate {
        /// The recipe
        template: Template,
    },
    /// Mutate an existing node's locals to satisfy
    UpdateExisting {
        /// The provider to mutate
        provider_id: Uuid,
        /// Locals to set
        updates: BTreeMap<String, Value>,
    },
    /// Deep-copy a referenced node under a fresh uid
    CloneReference {
        /// The item to copy
        reference_id: Uuid,
    },
    /// Host-defined acceptance
    Custom(CustomAcceptor),
    /// Nothing to do
    Noop,
}

/// Extension point for host-defined offer acceptance
pub type CustomAcceptor =
    Arc<dyn Fn(&mut Context) -> std::result::Result<Option<Uuid>, HandlerError> + Send + Sync>;

impl fmt::Debug for OfferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferAction::UseExisting { provider_id } => {
                f.debug_struct("UseExisting").field("provider_id", provider_id).finish()
            }
            OfferAction::CreateFromTemplate { template } => f
                .debug_struct("CreateFromTemplate")
                .field("template", template)
                .finish(),
            OfferAction::UpdateExisting { provider_id, updates } => f
                .debug_struct("UpdateExisting")
                .field("provider_id", provider_id)
                .field("updates", updates)
                .finish(),
            OfferAction::CloneReference { reference_id } => f
                .debug_struct("CloneReference")
                .field("reference_id", reference_id)
                .finish(),
            OfferAction::Custom(_) => f.write_str("Custom(<fn>)"),
            OfferAction::Noop => f.write_str("Noop"),
        }
    }
}

/// A proposal to satisfy one requirement.
#[derive(Debug, Clone)]
pub struct DependencyOffer {
    /// Stable identity
    pub uid: Uuid,
    /// The requirement this offer addresses
    pub requirement_id: Uuid,
    /// The operation acceptance performs
    pub operation: ProvisioningPolicy,
    /// Base cost plus proximity penalty
    pub cost: u32,
    /// Proximity penalty alone
    pub proximity: u32,
    /// Human-readable proximity classification
    pub proximity_detail: &'static str,
    /// Known target, for dedup of existing/update offers
    pub provider_id: Option<Uuid>,
    /// What acceptance does
    pub action: OfferAction,
    /// Name of the provisioner that made the offer
    pub source_provisioner: Option<String>,
}

impl DependencyOffer {
    /// Attempt the offer's action. `Ok(Some(uid))` binds `uid` as the
    /// provider; `Ok(None)` means the offer could not deliver (the caller
    /// moves on to the next offer).
    pub fn accept(&self, ctx: &mut Context) -> Result<Option<Uuid>> {
        match &self.action {
            OfferAction::UseExisting { provider_id } => {
                if ctx.graph().contains(provider_id) {
                    Ok(Some(*provider_id))
                } else {
                    Ok(None)
                }
            }
            OfferAction::CreateFromTemplate { template } => {
                let uid = ctx.watched_mut().insert(template.materialize())?;
                Ok(Some(uid))
            }
            OfferAction::UpdateExisting { provider_id, updates } => {
                if !ctx.graph().contains(provider_id) {
                    return Ok(None);
                }
                for (key, value) in updates {
                    ctx.watched_mut().set_local(*provider_id, key, value.clone())?;
                }
                Ok(Some(*provider_id))
            }
            OfferAction::CloneReference { reference_id } => {
                let Some(original) = ctx.graph().get(reference_id).and_then(GraphItem::as_node)
                else {
                    return Ok(None);
                };
                let mut copy = Node::new(original.label.clone());
                copy.tags = original.tags.clone();
                copy.locals = original.locals.clone();
                let uid = ctx.watched_mut().insert(GraphItem::Node(copy))?;
                Ok(Some(uid))
            }
            OfferAction::Custom(acceptor) => acceptor(ctx).map_err(VmError::from),
            OfferAction::Noop => Ok(None),
        }
    }
}

/// A published affordance addressed at frontier nodes matching its tags.
#[derive(Debug, Clone)]
pub struct AffordanceOffer {
    /// Stable identity
    pub uid: Uuid,
    /// The affordance edge being offered
    pub affordance_id: Uuid,
    /// The requirement that edge carries
    pub requirement_id: Uuid,
    /// Base cost plus proximity penalty
    pub cost: u32,
    /// Proximity penalty alone
    pub proximity: u32,
    /// Frontier nodes must carry all of these tags; empty matches all
    pub target_tags: BTreeSet<String>,
    /// Label used for per-destination uniqueness
    pub label: Option<String>,
    /// Name of the provisioner that made the offer
    pub source_provisioner: Option<String>,
}

impl AffordanceOffer {
    /// Does this offer address `node`?
    pub fn available_for(&self, node: &GraphItem) -> bool {
        self.target_tags.iter().all(|t| node.has_tag(t))
    }

    /// Accept toward `destination`: point the affordance edge there and
    /// bind its requirement to the edge's source provider. Returns the
    /// provider uid.
    pub fn accept(&self, ctx: &mut Context, destination: Uuid) -> Result<Uuid> {
        let (source, current_destination) = {
            let edge = ctx
                .graph()
                .get(&self.affordance_id)
                .and_then(GraphItem::as_edge)
                .ok_or_else(|| {
                    VmError::replay_failed(format!("affordance {} missing", self.affordance_id))
                })?;
            (edge.source_id, edge.destination_id)
        };
        let provider = source.ok_or(VmError::DanglingEdge {
            edge: self.affordance_id,
        })?;

        if current_destination != Some(destination) {
            ctx.watched_mut()
                .set_edge_destination(self.affordance_id, destination)?;
        }
        ctx.watched_mut()
            .bind_requirement_provider(self.affordance_id, provider)?;
        Ok(provider)
    }
}

/// Either kind of offer, as the planning pipeline carries them.
#[derive(Debug, Clone)]
pub enum ProvisionOffer {
    Dependency(DependencyOffer),
    Affordance(AffordanceOffer),
}

impl ProvisionOffer {
    /// Total cost for selection ordering
    pub fn cost(&self) -> u32 {
        match self {
            ProvisionOffer::Dependency(o) => o.cost,
            ProvisionOffer::Affordance(o) => o.cost,
        }
    }

    /// Proximity penalty for selection ordering
    pub fn proximity(&self) -> u32 {
        match self {
            ProvisionOffer::Dependency(o) => o.proximity,
            ProvisionOffer::Affordance(o) => o.proximity,
        }
    }

    /// The dependency offer inside, if any
    pub fn as_dependency(&self) -> Option<&DependencyOffer> {
        match self {
            ProvisionOffer::Dependency(o) => Some(o),
            _ => None,
        }
    }

    /// The affordance offer inside, if any
    pub fn as_affordance(&self) -> Option<&AffordanceOffer> {
        match self {
            ProvisionOffer::Affordance(o) => Some(o),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_bases() {
        assert_eq!(ProvisionCost::Direct.base(), 0);
        assert_eq!(ProvisionCost::LightIndirect.base(), 10);
        assert_eq!(ProvisionCost::HeavyIndirect.base(), 50);
        assert_eq!(ProvisionCost::Create.base(), 100);
    }

    #[test]
    fn proximity_tiers() {
        let mut g = Graph::new(None);
        let episode = g.add_subgraph("episode", &[]).unwrap();
        let scene_a = g.add_subgraph("scene-a", &[]).unwrap();
        let scene_b = g.add_subgraph("scene-b", &[]).unwrap();
        g.add_member(episode, scene_a).unwrap();
        g.add_member(episode, scene_b).unwrap();

        let source = g.add_node("source").unwrap();
        let near = g.add_node("near").unwrap();
        let cousin = g.add_node("cousin").unwrap();
        let remote = g.add_node("remote").unwrap();
        g.add_member(scene_a, source).unwrap();
        g.add_member(scene_a, near).unwrap();
        g.add_member(scene_b, cousin).unwrap();

        assert_eq!(proximity_between(&g, Some(source), source), (0, "same block"));
        assert_eq!(proximity_between(&g, Some(source), near), (5, "same scene"));
        assert_eq!(
            proximity_between(&g, Some(source), cousin),
            (10, "same episode")
        );
        assert_eq!(proximity_between(&g, Some(source), remote), (20, "distant"));
        assert_eq!(proximity_between(&g, None, remote), (20, "distant"));
    }

    #[test]
    fn affordance_targeting_by_tags() {
        let offer = AffordanceOffer {
            uid: Uuid::new_v4(),
            affordance_id: Uuid::new_v4(),
            requirement_id: Uuid::new_v4(),
            cost: 0,
            proximity: 0,
            target_tags: BTreeSet::from(["scene".to_string()]),
            label: None,
            source_provisioner: None,
        };
        let tagged = GraphItem::Node(Node::new(None).tagged("scene"));
        let plain = GraphItem::Node(Node::new(None));
        assert!(offer.available_for(&tagged));
        assert!(!offer.available_for(&plain));
    }
}
