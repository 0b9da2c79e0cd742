//! Provisioners: offer factories discovered through the scope chain
//!
//! A provisioner inspects a requirement (or a frontier node) and proposes
//! offers; it never mutates anything itself — mutation happens when the
//! planning handlers accept an offer. The built-ins cover the four
//! policies:
//!
//! - [`GraphProvisioner`] — EXISTING offers for nodes already matching, and
//!   affordance offers for published affordance edges;
//! - [`TemplateProvisioner`] — CREATE offers from inline templates or the
//!   anchored template registry;
//! - [`UpdatingProvisioner`] — UPDATE offers that mutate a matched node to
//!   satisfy;
//! - [`CloningProvisioner`] — CLONE offers when a reference resolves.
//!
//! Hosts add their own by implementing [`Provisioner`] and contributing it
//! through a `get_provisioners` handler.

use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use fabula_core::entity::Entity;
use fabula_core::graph::{GraphItem, ItemKind};
use fabula_core::requirement::{ProvisioningPolicy, Requirement};

use crate::context::Context;
use crate::provision::offers::{
    proximity_between, AffordanceOffer, DependencyOffer, OfferAction, ProvisionCost,
};

/// An offer factory.
pub trait Provisioner: Send + Sync + std::fmt::Debug {
    /// Short name, echoed into receipts
    fn name(&self) -> &'static str;

    /// Candidate offers for one unbound requirement
    fn dependency_offers(&self, requirement: &Requirement, ctx: &Context) -> Vec<DependencyOffer>;

    /// Published affordances addressed at the frontier node
    fn affordance_offers(&self, _cursor: Uuid, _ctx: &Context) -> Vec<AffordanceOffer> {
        Vec::new()
    }
}

/// Shared handle shape for provisioners carried through dispatch
pub type ProvisionerHandle = Arc<dyn Provisioner>;

fn source_of(ctx: &Context) -> Option<Uuid> {
    ctx.current_requirement_source_id.or(Some(ctx.cursor_id))
}

/// EXISTING offers for graph-resident matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphProvisioner;

impl Provisioner for GraphProvisioner {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn dependency_offers(&self, requirement: &Requirement, ctx: &Context) -> Vec<DependencyOffer> {
        if !matches!(
            requirement.policy,
            ProvisioningPolicy::Existing | ProvisioningPolicy::Any
        ) {
            return Vec::new();
        }
        // Template-backed requirements belong to the template provisioner.
        if requirement.template_ref.is_some() {
            return Vec::new();
        }

        let graph = ctx.graph();
        let source = source_of(ctx);
        let mut offers = Vec::new();
        for item in graph.items() {
            if !item.item_kind().is_node() {
                continue;
            }
            if !requirement.satisfied_by(item, graph) {
                continue;
            }
            let uid = item.uid();
            let (proximity, detail) = proximity_between(graph, source, uid);
            offers.push(DependencyOffer {
                uid: Uuid::new_v4(),
                requirement_id: requirement.uid,
                operation: ProvisioningPolicy::Existing,
                cost: ProvisionCost::Direct.base() + proximity,
                proximity,
                proximity_detail: detail,
                provider_id: Some(uid),
                action: OfferAction::UseExisting { provider_id: uid },
                source_provisioner: Some(self.name().to_string()),
            });
        }
        offers
    }

    fn affordance_offers(&self, cursor: Uuid, ctx: &Context) -> Vec<AffordanceOffer> {
        let graph = ctx.graph();
        let mut offers = Vec::new();
        for item in graph.items() {
            if item.item_kind() != ItemKind::Affordance {
                continue;
            }
            let Some(edge) = item.as_edge() else { continue };
            let Some(requirement) = &edge.requirement else {
                continue;
            };
            if requirement.provider_id.is_some() {
                continue;
            }
            // Addressed affordances only offer to their destination;
            // unaddressed ones broadcast by target tag.
            let target_tags: BTreeSet<String> = match edge.destination_id {
                Some(dest) if dest == cursor => BTreeSet::new(),
                Some(_) => continue,
                None => edge
                    .tags
                    .iter()
                    .filter_map(|t| t.strip_prefix("target:"))
                    .map(str::to_string)
                    .collect(),
            };
            let provider = edge.source_id;
            let (proximity, _) = match provider {
                Some(p) => proximity_between(graph, Some(p), cursor),
                None => (20, "distant"),
            };
            offers.push(AffordanceOffer {
                uid: Uuid::new_v4(),
                affordance_id: edge.uid,
                requirement_id: requirement.uid,
                cost: ProvisionCost::Direct.base() + proximity,
                proximity,
                target_tags,
                label: edge.label.clone(),
                source_provisioner: Some(self.name().to_string()),
            });
        }
        offers
    }
}

/// CREATE offers from inline templates or the anchored registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateProvisioner;

impl Provisioner for TemplateProvisioner {
    fn name(&self) -> &'static str {
        "template"
    }

    fn dependency_offers(&self, requirement: &Requirement, ctx: &Context) -> Vec<DependencyOffer> {
        if !matches!(
            requirement.policy,
            ProvisioningPolicy::Create | ProvisioningPolicy::Any
        ) {
            return Vec::new();
        }

        if let Some(template) = &requirement.template {
            return vec![DependencyOffer {
                uid: Uuid::new_v4(),
                requirement_id: requirement.uid,
                operation: ProvisioningPolicy::Create,
                cost: ProvisionCost::Create.base(),
                proximity: 0,
                proximity_detail: "new instance",
                provider_id: None,
                action: OfferAction::CreateFromTemplate {
                    template: template.clone(),
                },
                source_provisioner: Some(self.name().to_string()),
            }];
        }

        if let Some(name) = &requirement.template_ref {
            let anchor = source_of(ctx).unwrap_or(ctx.cursor_id);
            let chain = ctx.graph().scope_chain(&anchor);
            if let Some((entry, rank)) = ctx.templates().resolve(name, &chain) {
                let proximity = (rank * 5).min(20);
                let detail = if entry.anchor_id.is_some() {
                    "anchored template"
                } else {
                    "world template"
                };
                return vec![DependencyOffer {
                    uid: Uuid::new_v4(),
                    requirement_id: requirement.uid,
                    operation: ProvisioningPolicy::Create,
                    cost: ProvisionCost::Create.base() + proximity,
                    proximity,
                    proximity_detail: detail,
                    provider_id: None,
                    action: OfferAction::CreateFromTemplate {
                        template: entry.template.clone(),
                    },
                    source_provisioner: Some(self.name().to_string()),
                }];
            }
        }

        Vec::new()
    }
}

/// UPDATE offers: mutate a matched node's locals to satisfy.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdatingProvisioner;

impl Provisioner for UpdatingProvisioner {
    fn name(&self) -> &'static str {
        "updating"
    }

    fn dependency_offers(&self, requirement: &Requirement, ctx: &Context) -> Vec<DependencyOffer> {
        if requirement.policy != ProvisioningPolicy::Update {
            return Vec::new();
        }

        let graph = ctx.graph();
        let source = source_of(ctx);
        let updates = requirement.criteria.equals.clone();
        let mut offers = Vec::new();

        for item in graph.items() {
            if !item.item_kind().is_node() {
                continue;
            }
            // Candidates are named by identifier or sighted by tags; the
            // equality criteria are what the update will make true.
            let candidate = match &requirement.identifier {
                Some(identifier) => identifier.matches(item as &dyn Entity),
                None => requirement
                    .criteria
                    .has_tags
                    .iter()
                    .all(|t| item.has_tag(t)),
            };
            if !candidate {
                continue;
            }
            let uid = item.uid();
            let (proximity, detail) = proximity_between(graph, source, uid);
            offers.push(DependencyOffer {
                uid: Uuid::new_v4(),
                requirement_id: requirement.uid,
                operation: ProvisioningPolicy::Update,
                cost: ProvisionCost::LightIndirect.base() + proximity,
                proximity,
                proximity_detail: detail,
                provider_id: Some(uid),
                action: OfferAction::UpdateExisting {
                    provider_id: uid,
                    updates: updates.clone(),
                },
                source_provisioner: Some(self.name().to_string()),
            });
        }
        offers
    }
}

/// CLONE offers when the requirement's reference resolves.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloningProvisioner;

impl Provisioner for CloningProvisioner {
    fn name(&self) -> &'static str {
        "cloning"
    }

    fn dependency_offers(&self, requirement: &Requirement, ctx: &Context) -> Vec<DependencyOffer> {
        if requirement.policy != ProvisioningPolicy::Clone {
            return Vec::new();
        }
        let Some(reference) = requirement.reference_id else {
            return Vec::new();
        };
        let graph = ctx.graph();
        if !matches!(
            graph.get(&reference).map(GraphItem::item_kind),
            Some(kind) if kind.is_node()
        ) {
            return Vec::new();
        }
        let (proximity, detail) = proximity_between(graph, source_of(ctx), reference);
        vec![DependencyOffer {
            uid: Uuid::new_v4(),
            requirement_id: requirement.uid,
            operation: ProvisioningPolicy::Clone,
            cost: ProvisionCost::HeavyIndirect.base() + proximity,
            proximity,
            proximity_detail: detail,
            provider_id: None,
            action: OfferAction::CloneReference {
                reference_id: reference,
            },
            source_provisioner: Some(self.name().to_string()),
        }]
    }
}

/// The built-in provisioner set, in registration order
pub fn default_provisioners() -> Vec<ProvisionerHandle> {
    vec![
        Arc::new(GraphProvisioner),
        Arc::new(UpdatingProvisioner),
        Arc::new(CloningProvisioner),
        Arc::new(TemplateProvisioner),
    ]
}
