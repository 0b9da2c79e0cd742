//! The four-stage planning pipeline
//!
//! Planning is wired as four behaviors on the `planning` task, one per
//! priority band:
//!
//! 1. **EARLY — collect offers.** Discover provisioners by `get_provisioners`
//!    dispatch, gather affordance offers (broadcast) and dependency offers
//!    (per open requirement), deduplicate EXISTING offers by provider, and
//!    sort every list by `(cost, proximity, registration order)`.
//! 2. **NORMAL — link affordances.** Accept every available affordance at
//!    the frontier (label-unique per destination, additive not exclusive),
//!    and bind any pending dependency the new provider satisfies.
//! 3. **LATE — link dependencies.** For each still-unbound dependency,
//!    accept the best offer once; bind the provider and any sibling
//!    dependency it also satisfies; emit a failure receipt when no offer
//!    delivers.
//! 4. **LAST — summarize.** Reduce the step's build receipts into one
//!    `PlanningReceipt` and clear the scratch state.
//!
//! Acceptance failures before the last offer are soft (the next offer is
//! tried); exhausting all offers for a hard requirement records it in the
//! receipt and sets the sticky unresolvable flag, but never aborts the
//! frame.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use uuid::Uuid;

use fabula_core::dispatch::{Behavior, CallArgs, HandlerPriority};
use fabula_core::error::HandlerError;
use fabula_core::graph::{GraphItem, ItemKind};
use fabula_core::requirement::{ProvisioningPolicy, Requirement};

use crate::context::{dispatch_task, Context};
use crate::error::VmError;
use crate::outcome::{Outcome, VmRegistry};
use crate::provision::offers::{DependencyOffer, ProvisionOffer};
use crate::provision::provisioner::{default_provisioners, ProvisionerHandle};
use crate::provision::receipt::{BuildReceipt, PlanningReceipt};
use crate::provision::OfferKey;

/// Register the planning pipeline and provisioner discovery defaults.
pub fn register_planning_behaviors(registry: &mut VmRegistry) {
    registry.add(
        Behavior::new("planning", planning_collect_offers)
            .labeled("planning_collect_offers")
            .with_priority(HandlerPriority::Early),
    );
    registry.add(
        Behavior::new("planning", planning_link_affordances)
            .labeled("planning_link_affordances")
            .with_priority(HandlerPriority::Normal),
    );
    registry.add(
        Behavior::new("planning", planning_link_dependencies)
            .labeled("planning_link_dependencies")
            .with_priority(HandlerPriority::Later),
    );
    registry.add(
        Behavior::new("planning", planning_summarize)
            .labeled("planning_summarize")
            .with_priority(HandlerPriority::Last),
    );
    registry.add(
        Behavior::new("get_provisioners", provide_default_provisioners)
            .labeled("default_provisioners")
            .for_caller(ItemKind::Graph)
            .with_priority(HandlerPriority::Early),
    );
}

fn herr(stage: &str) -> impl Fn(VmError) -> HandlerError + '_ {
    move |e| HandlerError::new(stage, e.to_string())
}

/// Baseline provisioners for graphs without custom contributors.
fn provide_default_provisioners(
    _ctx: &mut Context,
    _args: &CallArgs,
) -> Result<Outcome, HandlerError> {
    Ok(Outcome::Provisioners(default_provisioners()))
}

fn discover_provisioners(ctx: &mut Context) -> Result<Vec<ProvisionerHandle>, HandlerError> {
    let graph_uid = ctx.graph().uid;
    let receipts = dispatch_task(ctx, graph_uid, "get_provisioners")
        .map_err(herr("get_provisioners"))?;
    Ok(receipts
        .into_iter()
        .filter_map(|r| match r.result {
            Outcome::Provisioners(p) => Some(p),
            _ => None,
        })
        .flatten()
        .collect())
}

/// Open dependency edges sourced at `frontier`: `(edge, source, requirement)`
fn open_dependencies(ctx: &Context, frontier: Uuid) -> Vec<(Uuid, Option<Uuid>, Requirement)> {
    ctx.graph()
        .dependencies_from(&frontier)
        .filter_map(|item| {
            let edge = item.as_edge()?;
            let requirement = edge.requirement.clone()?;
            if requirement.provider_id.is_some() {
                return None;
            }
            Some((edge.uid, edge.source_id, requirement))
        })
        .collect()
}

/// Unbound affordance-carried requirements terminating at `frontier`
fn open_affordance_requirements(ctx: &Context, frontier: Uuid) -> Vec<(Uuid, Requirement)> {
    ctx.graph()
        .affordances_into(&frontier)
        .filter_map(|item| {
            let edge = item.as_edge()?;
            let requirement = edge.requirement.clone()?;
            if requirement.provider_id.is_some() {
                return None;
            }
            Some((edge.uid, requirement))
        })
        .collect()
}

/// EARLY: gather, deduplicate, and sort all offers for the frontier.
fn planning_collect_offers(ctx: &mut Context, _args: &CallArgs) -> Result<Outcome, HandlerError> {
    let provisioners = discover_provisioners(ctx)?;
    let cursor = ctx.cursor_id;
    let mut offers: BTreeMap<OfferKey, Vec<ProvisionOffer>> = BTreeMap::new();

    // Broadcast affordance offers.
    for provisioner in &provisioners {
        for offer in provisioner.affordance_offers(cursor, ctx) {
            offers
                .entry(OfferKey::Broadcast)
                .or_default()
                .push(ProvisionOffer::Affordance(offer));
        }
    }

    // Unicast dependency offers, one list per open requirement.
    for (edge_uid, source, requirement) in open_dependencies(ctx, cursor) {
        ctx.current_requirement_source_id = source;
        for provisioner in &provisioners {
            for offer in provisioner.dependency_offers(&requirement, ctx) {
                offers
                    .entry(OfferKey::Dependency(edge_uid))
                    .or_default()
                    .push(ProvisionOffer::Dependency(offer));
            }
        }
    }

    // Fallback provisioning for requirements published by affordances.
    for (edge_uid, requirement) in open_affordance_requirements(ctx, cursor) {
        let source = ctx
            .graph()
            .get(&edge_uid)
            .and_then(GraphItem::as_edge)
            .and_then(|e| e.source_id);
        ctx.current_requirement_source_id = source;
        for provisioner in &provisioners {
            for offer in provisioner.dependency_offers(&requirement, ctx) {
                offers
                    .entry(OfferKey::AffordanceRequirement(requirement.uid))
                    .or_default()
                    .push(ProvisionOffer::Dependency(offer));
            }
        }
    }
    ctx.current_requirement_source_id = None;

    let mut flattened = Vec::new();
    for (key, list) in offers {
        let deduped = dedupe_and_sort(list);
        flattened.extend(deduped.iter().cloned());
        ctx.provision_offers.insert(key, deduped);
    }
    debug!(offers = flattened.len(), "planning collected offers");
    Ok(Outcome::Offers(flattened))
}

/// Deduplicate EXISTING offers by provider and sort by
/// `(cost, proximity, registration order)`.
///
/// CREATE/UPDATE/CLONE offers are never deduplicated — each acceptance
/// produces a distinct result.
fn dedupe_and_sort(list: Vec<ProvisionOffer>) -> Vec<ProvisionOffer> {
    let mut best_existing: BTreeMap<Uuid, (u32, u32, usize)> = BTreeMap::new();
    for (idx, offer) in list.iter().enumerate() {
        if let Some(dep) = offer.as_dependency() {
            if dep.operation == ProvisioningPolicy::Existing {
                if let Some(provider) = dep.provider_id {
                    let key = (dep.cost, dep.proximity, idx);
                    match best_existing.get(&provider) {
                        Some(best) if *best <= key => {}
                        _ => {
                            best_existing.insert(provider, key);
                        }
                    }
                }
            }
        }
    }

    let mut kept: Vec<(u32, u32, usize, ProvisionOffer)> = Vec::new();
    for (idx, offer) in list.into_iter().enumerate() {
        let is_duplicate = offer
            .as_dependency()
            .filter(|d| d.operation == ProvisioningPolicy::Existing)
            .and_then(|d| d.provider_id)
            .map(|provider| best_existing.get(&provider) != Some(&(offer.cost(), offer.proximity(), idx)))
            .unwrap_or(false);
        if is_duplicate {
            continue;
        }
        kept.push((offer.cost(), offer.proximity(), idx, offer));
    }
    kept.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
    kept.into_iter().map(|(_, _, _, offer)| offer).collect()
}

/// Bind every open dependency at `frontier` whose requirement `provider`
/// satisfies. Sibling binding is silent: no receipts.
fn bind_satisfied_dependencies(
    ctx: &mut Context,
    frontier: Uuid,
    provider: Uuid,
) -> Result<(), VmError> {
    let Some(provider_item) = ctx.graph().get(&provider).cloned() else {
        return Ok(());
    };
    let to_bind: Vec<Uuid> = ctx
        .graph()
        .dependencies_from(&frontier)
        .filter_map(|item| {
            let edge = item.as_edge()?;
            let requirement = edge.requirement.as_ref()?;
            if requirement.provider_id.is_some() {
                return None;
            }
            if requirement.satisfied_by(&provider_item, ctx.graph()) {
                Some(edge.uid)
            } else {
                None
            }
        })
        .collect();
    for edge in to_bind {
        ctx.watched_mut().set_edge_destination(edge, provider)?;
        ctx.watched_mut().bind_requirement_provider(edge, provider)?;
    }
    Ok(())
}

/// NORMAL: accept available affordances at the frontier.
fn planning_link_affordances(ctx: &mut Context, _args: &CallArgs) -> Result<Outcome, HandlerError> {
    let cursor = ctx.cursor_id;
    let Some(cursor_item) = ctx.graph().get(&cursor).cloned() else {
        return Ok(Outcome::Builds(Vec::new()));
    };

    let broadcast: Vec<_> = ctx
        .provision_offers
        .get(&OfferKey::Broadcast)
        .map(|list| {
            list.iter()
                .filter_map(|o| o.as_affordance().cloned())
                .collect()
        })
        .unwrap_or_default();

    let mut used_labels: BTreeSet<String> = BTreeSet::new();
    let mut snapshot = Vec::new();

    for offer in &broadcast {
        if let Some(label) = &offer.label {
            if used_labels.contains(label) {
                continue;
            }
        }
        if !offer.available_for(&cursor_item) {
            continue;
        }
        match offer.accept(ctx, cursor) {
            Ok(provider) => {
                if let Some(label) = &offer.label {
                    used_labels.insert(label.clone());
                }
                bind_satisfied_dependencies(ctx, cursor, provider)
                    .map_err(herr("planning_link_affordances"))?;
                let build = BuildReceipt::accepted(
                    offer.source_provisioner.clone(),
                    offer.requirement_id,
                    provider,
                    ProvisioningPolicy::Existing,
                    false, // affordances are always soft
                );
                ctx.provision_builds.push(build.clone());
                snapshot.push(build);
            }
            Err(error) => {
                warn!(%error, affordance = %offer.affordance_id, "affordance offer failed");
                continue;
            }
        }
    }

    // Fallback: provision the requirements of still-unbound affordances.
    for (edge_uid, requirement) in open_affordance_requirements(ctx, cursor) {
        let key = OfferKey::AffordanceRequirement(requirement.uid);
        let offers = ctx.provision_offers.remove(&key).unwrap_or_default();
        let (provider, winner) = try_offers_in_order(ctx, &offers);
        match (provider, winner) {
            (Some(provider), Some(winner)) => {
                ctx.watched_mut()
                    .bind_requirement_provider(edge_uid, provider)
                    .map_err(herr("planning_link_affordances"))?;
                let build = BuildReceipt::accepted(
                    winner.source_provisioner.clone(),
                    requirement.uid,
                    provider,
                    winner.operation,
                    requirement.hard_requirement,
                );
                ctx.provision_builds.push(build.clone());
                snapshot.push(build);
            }
            _ => {
                ctx.watched_mut()
                    .mark_requirement_unresolvable(edge_uid)
                    .map_err(herr("planning_link_affordances"))?;
                let reason = if offers.is_empty() {
                    "no_offers"
                } else {
                    "no_viable_offers"
                };
                let build = BuildReceipt::failed(
                    None,
                    requirement.uid,
                    ProvisioningPolicy::Noop,
                    requirement.hard_requirement,
                    reason,
                );
                ctx.provision_builds.push(build.clone());
                snapshot.push(build);
            }
        }
    }

    Ok(Outcome::Builds(snapshot))
}

/// Try sorted offers until one delivers a provider.
fn try_offers_in_order(
    ctx: &mut Context,
    offers: &[ProvisionOffer],
) -> (Option<Uuid>, Option<DependencyOffer>) {
    for offer in offers.iter().filter_map(ProvisionOffer::as_dependency) {
        match offer.accept(ctx) {
            Ok(Some(provider)) => return (Some(provider), Some(offer.clone())),
            Ok(None) => continue,
            Err(error) => {
                warn!(%error, offer = %offer.uid, "offer acceptance failed; trying next");
                continue;
            }
        }
    }
    (None, None)
}

/// LATE: select and accept the best offer per unbound dependency.
fn planning_link_dependencies(
    ctx: &mut Context,
    _args: &CallArgs,
) -> Result<Outcome, HandlerError> {
    let cursor = ctx.cursor_id;
    let mut snapshot = Vec::new();

    // Materialized up front: acceptance inserts nodes while we iterate.
    let deps = open_dependencies(ctx, cursor);
    for (edge_uid, _source, requirement) in deps {
        // The affordance stage (or sibling binding) may have bound it already.
        let still_open = ctx
            .graph()
            .get(&edge_uid)
            .and_then(GraphItem::as_edge)
            .and_then(|e| e.requirement.as_ref())
            .map(|r| r.provider_id.is_none())
            .unwrap_or(false);
        if !still_open {
            continue;
        }

        let offers = ctx
            .provision_offers
            .get(&OfferKey::Dependency(edge_uid))
            .cloned()
            .unwrap_or_default();

        if offers.is_empty() {
            ctx.watched_mut()
                .mark_requirement_unresolvable(edge_uid)
                .map_err(herr("planning_link_dependencies"))?;
            let build = BuildReceipt::failed(
                None,
                requirement.uid,
                ProvisioningPolicy::Noop,
                requirement.hard_requirement,
                "no_offers",
            );
            ctx.provision_builds.push(build.clone());
            snapshot.push(build);
            continue;
        }

        let (provider, winner) = try_offers_in_order(ctx, &offers);
        match (provider, winner) {
            (Some(provider), Some(winner)) => {
                ctx.watched_mut()
                    .set_edge_destination(edge_uid, provider)
                    .map_err(herr("planning_link_dependencies"))?;
                ctx.watched_mut()
                    .bind_requirement_provider(edge_uid, provider)
                    .map_err(herr("planning_link_dependencies"))?;
                bind_satisfied_dependencies(ctx, cursor, provider)
                    .map_err(herr("planning_link_dependencies"))?;
                let build = BuildReceipt::accepted(
                    winner.source_provisioner.clone(),
                    requirement.uid,
                    provider,
                    winner.operation,
                    requirement.hard_requirement,
                );
                ctx.provision_builds.push(build.clone());
                snapshot.push(build);
            }
            _ => {
                ctx.watched_mut()
                    .mark_requirement_unresolvable(edge_uid)
                    .map_err(herr("planning_link_dependencies"))?;
                let first_op = offers
                    .first()
                    .and_then(ProvisionOffer::as_dependency)
                    .map(|o| o.operation)
                    .unwrap_or(ProvisioningPolicy::Noop);
                let build = BuildReceipt::failed(
                    offers
                        .first()
                        .and_then(ProvisionOffer::as_dependency)
                        .and_then(|o| o.source_provisioner.clone()),
                    requirement.uid,
                    first_op,
                    requirement.hard_requirement,
                    "no_viable_offers",
                );
                ctx.provision_builds.push(build.clone());
                snapshot.push(build);
            }
        }
    }

    Ok(Outcome::Builds(snapshot))
}

/// LAST: reduce build receipts and clear the scratch.
fn planning_summarize(ctx: &mut Context, _args: &CallArgs) -> Result<Outcome, HandlerError> {
    let receipt = PlanningReceipt::summarize(&ctx.provision_builds);
    debug!(
        attached = receipt.attached,
        created = receipt.created,
        updated = receipt.updated,
        softlock = receipt.softlock_detected,
        "planning summarized"
    );
    ctx.clear_planning_state();
    Ok(Outcome::Planning(receipt))
}
