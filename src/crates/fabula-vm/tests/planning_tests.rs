//! Provisioning tests: cost model, offer selection, and the built-in
//! provisioner set.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use fabula_core::criteria::Criteria;
use fabula_core::dispatch::{Behavior, HandlerLayer, HandlerPriority};
use fabula_core::entity::Entity;
use fabula_core::factory::{Template, TemplateRegistry};
use fabula_core::graph::{Edge, Graph, GraphItem, ItemKind, Node};
use fabula_core::requirement::{ProvisioningPolicy, Requirement};

use fabula_vm::{
    DependencyOffer, DispatchLayers, GraphProvisioner, Ledger, OfferAction, Outcome,
    ProvisionCost, Provisioner, ResolutionPhase, TemplateProvisioner, VmRegistry,
};

fn requirement_on(graph: &mut Graph, source: Uuid, requirement: Requirement) -> Uuid {
    graph
        .add(GraphItem::Dependency(
            Edge::new(Some(source), None).with_requirement(requirement),
        ))
        .unwrap()
}

fn bound_provider(graph: &Graph, dep: Uuid) -> Option<Uuid> {
    graph
        .get(&dep)
        .and_then(GraphItem::as_edge)
        .and_then(|e| e.requirement.as_ref())
        .and_then(|r| r.provider_id)
}

// ---------------------------------------------------------------------
// Cost model

#[test]
fn graph_provisioner_calculates_proximity_costs() {
    let mut graph = Graph::new(None);
    let episode = graph.add_subgraph("episode", &[]).unwrap();
    let scene_a = graph.add_subgraph("scene-a", &[]).unwrap();
    let scene_b = graph.add_subgraph("scene-b", &[]).unwrap();
    graph.add_member(episode, scene_a).unwrap();
    graph.add_member(episode, scene_b).unwrap();

    let source = graph.add_node("source").unwrap();
    let same_scene = graph.add_node("scene-npc").unwrap();
    let other_scene = graph.add_node("other-scene-npc").unwrap();
    let remote = graph.add_node("remote").unwrap();
    graph.add_member(scene_a, source).unwrap();
    graph.add_member(scene_a, same_scene).unwrap();
    graph.add_member(scene_b, other_scene).unwrap();
    let remote_episode = graph.add_subgraph("remote", &[]).unwrap();
    graph.add_member(remote_episode, remote).unwrap();

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, source);
    let mut frame = ledger.frame(&dispatch);
    let ctx = frame.context().unwrap();
    ctx.current_requirement_source_id = Some(source);

    let offer_for = |ctx: &fabula_vm::Context, target: Uuid| -> DependencyOffer {
        let requirement = Requirement::new(ProvisioningPolicy::Existing).with_identifier(target);
        let offers = GraphProvisioner.dependency_offers(&requirement, ctx);
        assert_eq!(offers.len(), 1, "expected a proximity offer");
        offers.into_iter().next().unwrap()
    };

    let same_node = offer_for(ctx, source);
    assert_eq!(same_node.proximity, 0);
    assert_eq!(same_node.cost, ProvisionCost::Direct.base());
    assert_eq!(same_node.proximity_detail, "same block");

    let near = offer_for(ctx, same_scene);
    assert_eq!(near.proximity, 5);
    assert_eq!(near.cost, ProvisionCost::Direct.base() + 5);
    assert_eq!(near.proximity_detail, "same scene");

    let cousin = offer_for(ctx, other_scene);
    assert_eq!(cousin.proximity, 10);
    assert_eq!(cousin.cost, ProvisionCost::Direct.base() + 10);
    assert_eq!(cousin.proximity_detail, "same episode");

    let distant = offer_for(ctx, remote);
    assert_eq!(distant.proximity, 20);
    assert_eq!(distant.cost, ProvisionCost::Direct.base() + 20);
    assert_eq!(distant.proximity_detail, "distant");
}

#[test]
fn graph_provisioner_skips_template_references() {
    let mut graph = Graph::new(None);
    let source = graph.add_node("source").unwrap();
    let target = graph.add_node("templated").unwrap();

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, source);
    let mut frame = ledger.frame(&dispatch);
    let ctx = frame.context().unwrap();

    let requirement = Requirement::new(ProvisioningPolicy::Any)
        .with_identifier(target)
        .with_template_ref("npc.guard");
    assert!(GraphProvisioner.dependency_offers(&requirement, ctx).is_empty());
}

#[test]
fn template_provisioner_uses_fixed_create_cost() {
    let mut graph = Graph::new(None);
    let source = graph.add_node("source").unwrap();

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, source);
    let mut frame = ledger.frame(&dispatch);
    let ctx = frame.context().unwrap();

    let requirement = Requirement::new(ProvisioningPolicy::Create)
        .with_template(Template::node("fabricated"));
    let offers = TemplateProvisioner.dependency_offers(&requirement, ctx);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].cost, ProvisionCost::Create.base());
    assert_eq!(offers[0].proximity_detail, "new instance");
}

// ---------------------------------------------------------------------
// Selection and deduplication

#[test]
fn selection_prefers_cheapest_closest_provider() {
    let mut graph = Graph::new(None);
    let scene = graph.add_subgraph("scene", &[]).unwrap();
    let cursor = graph.add_node("cursor").unwrap();
    let near = graph
        .add_node_item(Node::new(Some("near".into())).tagged("ally"))
        .unwrap();
    let far = graph
        .add_node_item(Node::new(Some("far".into())).tagged("ally"))
        .unwrap();
    graph.add_member(scene, cursor).unwrap();
    graph.add_member(scene, near).unwrap();
    let _ = far;

    let requirement = Requirement::new(ProvisioningPolicy::Any)
        .labeled("ally")
        .with_criteria(Criteria::any().with_tag("ally"));
    let dep = requirement_on(&mut graph, cursor, requirement);

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    frame.run_phase(ResolutionPhase::Planning).unwrap();
    let ctx = frame.context().unwrap();
    assert_eq!(bound_provider(ctx.graph(), dep), Some(near));
}

#[test]
fn duplicate_existing_offers_resolve_to_one_attachment() {
    // A second get_provisioners contributor duplicates the graph
    // provisioner; EXISTING offers for the same provider must collapse.
    let mut graph = Graph::new(None);
    let cursor = graph.add_node("cursor").unwrap();
    let ally = graph
        .add_node_item(Node::new(Some("ally".into())).tagged("ally"))
        .unwrap();

    let requirement = Requirement::new(ProvisioningPolicy::Existing)
        .labeled("ally")
        .with_criteria(Criteria::any().with_tag("ally"));
    let dep = requirement_on(&mut graph, cursor, requirement);

    let mut author = VmRegistry::new(HandlerLayer::Author);
    author.add(
        Behavior::new("get_provisioners", |_ctx: &mut fabula_vm::Context, _args| {
            Ok(Outcome::Provisioners(vec![Arc::new(GraphProvisioner)]))
        })
        .for_caller(ItemKind::Graph)
        .with_priority(HandlerPriority::Later),
    );

    let dispatch = DispatchLayers::with_core_behaviors().with_author_registry(author);
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    let outcome = frame.run_phase(ResolutionPhase::Planning).unwrap();
    let receipt = outcome.as_planning().unwrap();
    assert_eq!(receipt.attached, 1);
    let ctx = frame.context().unwrap();
    assert_eq!(bound_provider(ctx.graph(), dep), Some(ally));
}

// ---------------------------------------------------------------------
// Template anchoring

#[test]
fn anchored_templates_beat_world_templates() {
    let mut graph = Graph::new(None);
    let scene = graph.add_subgraph("scene", &[]).unwrap();
    let cursor = graph.add_node("cursor").unwrap();
    graph.add_member(scene, cursor).unwrap();

    let mut templates = TemplateRegistry::new();
    templates.insert("npc.guard", Template::node("world guard"));
    templates.insert_anchored("npc.guard", Template::node("scene guard"), scene);

    let requirement = Requirement::new(ProvisioningPolicy::Create)
        .labeled("guard")
        .with_template_ref("npc.guard");
    let dep = requirement_on(&mut graph, cursor, requirement);

    let dispatch = DispatchLayers::with_core_behaviors().with_templates(templates);
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    let outcome = frame.run_phase(ResolutionPhase::Planning).unwrap();
    assert_eq!(outcome.as_planning().unwrap().created, 1);

    let ctx = frame.context().unwrap();
    let provider = bound_provider(ctx.graph(), dep).unwrap();
    assert_eq!(
        ctx.graph().get(&provider).unwrap().label(),
        Some("scene guard")
    );
}

// ---------------------------------------------------------------------
// Updating and cloning

#[test]
fn updating_provisioner_mutates_to_satisfy() {
    let mut graph = Graph::new(None);
    let cursor = graph.add_node("cursor").unwrap();
    let target = graph.add_node("target").unwrap();

    let requirement = Requirement::new(ProvisioningPolicy::Update)
        .labeled("calm_target")
        .with_identifier("target")
        .with_criteria(Criteria::any().with_equals("mood", json!("calm")));
    let dep = requirement_on(&mut graph, cursor, requirement);

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    let outcome = frame.run_phase(ResolutionPhase::Planning).unwrap();
    assert_eq!(outcome.as_planning().unwrap().updated, 1);

    let ctx = frame.context().unwrap();
    assert_eq!(bound_provider(ctx.graph(), dep), Some(target));
    let mutated = ctx.graph().get(&target).unwrap().as_node().unwrap();
    assert_eq!(mutated.local("mood"), Some(&json!("calm")));
}

#[test]
fn cloning_provisioner_copies_the_reference() {
    let mut graph = Graph::new(None);
    let cursor = graph.add_node("cursor").unwrap();
    let token = graph
        .add_node_item(Node::new(Some("token".into())).with_local("charge", json!(3)))
        .unwrap();

    let requirement = Requirement::new(ProvisioningPolicy::Clone)
        .labeled("copy")
        .with_reference(token);
    let dep = requirement_on(&mut graph, cursor, requirement);

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    let outcome = frame.run_phase(ResolutionPhase::Planning).unwrap();
    assert_eq!(outcome.as_planning().unwrap().created, 1);

    let ctx = frame.context().unwrap();
    let clone = bound_provider(ctx.graph(), dep).unwrap();
    assert_ne!(clone, token);
    let cloned = ctx.graph().get(&clone).unwrap().as_node().unwrap();
    assert_eq!(cloned.label.as_deref(), Some("token"));
    assert_eq!(cloned.local("charge"), Some(&json!(3)));
}

// ---------------------------------------------------------------------
// Sibling binding and affordance rules

#[test]
fn one_provider_binds_satisfied_siblings() {
    let mut graph = Graph::new(None);
    let cursor = graph.add_node("cursor").unwrap();

    // The creating dependency gets the smaller edge uid so the pipeline
    // meets it first; the sibling is then bound without its own receipt.
    let creator = Requirement::new(ProvisioningPolicy::Create)
        .labeled("ally")
        .with_template(Template::node("ally").tagged("ally"));
    let mut creator_edge = Edge::new(Some(cursor), None).with_requirement(creator);
    creator_edge.uid = Uuid::from_u128(0x1);
    let creator_dep = graph.add(GraphItem::Dependency(creator_edge)).unwrap();

    let sibling = Requirement::new(ProvisioningPolicy::Existing)
        .labeled("backup")
        .with_criteria(Criteria::any().with_tag("ally"));
    let mut sibling_edge = Edge::new(Some(cursor), None).with_requirement(sibling);
    sibling_edge.uid = Uuid::from_u128(0x2);
    let sibling_dep = graph.add(GraphItem::Dependency(sibling_edge)).unwrap();

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    let outcome = frame.run_phase(ResolutionPhase::Planning).unwrap();
    let receipt = outcome.as_planning().unwrap();
    assert_eq!(receipt.created, 1);
    assert!(receipt.unresolved_hard_requirements.is_empty());

    let ctx = frame.context().unwrap();
    let provider = bound_provider(ctx.graph(), creator_dep).unwrap();
    assert_eq!(bound_provider(ctx.graph(), sibling_dep), Some(provider));
}

#[test]
fn affordance_labels_are_unique_per_destination() {
    let mut graph = Graph::new(None);
    let scene = graph.add_node("scene").unwrap();
    let first = graph.add_node("first").unwrap();
    let second = graph.add_node("second").unwrap();

    let mut first_edge = Edge::new(Some(first), Some(scene))
        .labeled("gift")
        .with_requirement(Requirement::new(ProvisioningPolicy::Existing).soft());
    first_edge.uid = Uuid::from_u128(0x10);
    let first_aff = graph.add(GraphItem::Affordance(first_edge)).unwrap();

    let mut second_edge = Edge::new(Some(second), Some(scene)).labeled("gift").with_requirement(
        Requirement::new(ProvisioningPolicy::Existing)
            .with_identifier("nobody")
            .soft(),
    );
    second_edge.uid = Uuid::from_u128(0x20);
    let second_aff = graph.add(GraphItem::Affordance(second_edge)).unwrap();

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, scene);
    let mut frame = ledger.frame(&dispatch);

    frame.run_phase(ResolutionPhase::Planning).unwrap();
    let ctx = frame.context().unwrap();

    let provider_of = |uid: Uuid| {
        ctx.graph()
            .get(&uid)
            .and_then(GraphItem::as_edge)
            .and_then(|e| e.requirement.as_ref())
            .and_then(|r| r.provider_id)
    };
    assert_eq!(provider_of(first_aff), Some(first));
    assert_eq!(provider_of(second_aff), None);
}

#[test]
fn broadcast_affordances_respect_target_tags() {
    let mut graph = Graph::new(None);
    let scene = graph
        .add_node_item(Node::new(Some("scene".into())).tagged("outdoors"))
        .unwrap();
    let provider = graph.add_node("provider").unwrap();

    // Unaddressed affordance broadcasting to outdoor scenes only.
    let aff = graph
        .add(GraphItem::Affordance(
            Edge::new(Some(provider), None)
                .labeled("shade")
                .tagged("target:outdoors")
                .with_requirement(Requirement::new(ProvisioningPolicy::Existing).soft()),
        ))
        .unwrap();

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, scene);
    let mut frame = ledger.frame(&dispatch);
    frame.run_phase(ResolutionPhase::Planning).unwrap();

    let ctx = frame.context().unwrap();
    let edge = ctx.graph().get(&aff).and_then(GraphItem::as_edge).unwrap();
    assert_eq!(edge.destination_id, Some(scene));
    assert_eq!(
        edge.requirement.as_ref().and_then(|r| r.provider_id),
        Some(provider)
    );
}

// ---------------------------------------------------------------------
// Host extension

#[derive(Debug)]
struct SummoningProvisioner;

impl Provisioner for SummoningProvisioner {
    fn name(&self) -> &'static str {
        "summoning"
    }

    fn dependency_offers(
        &self,
        requirement: &Requirement,
        _ctx: &fabula_vm::Context,
    ) -> Vec<DependencyOffer> {
        if requirement.label.as_deref() != Some("spirit") {
            return Vec::new();
        }
        vec![DependencyOffer {
            uid: Uuid::new_v4(),
            requirement_id: requirement.uid,
            operation: ProvisioningPolicy::Create,
            cost: 1,
            proximity: 0,
            proximity_detail: "summoned",
            provider_id: None,
            action: OfferAction::Custom(Arc::new(|ctx: &mut fabula_vm::Context| {
                let uid = ctx
                    .watched_mut()
                    .insert(GraphItem::Node(Node::new(Some("spirit".into()))))
                    .map_err(|e| {
                        fabula_core::error::HandlerError::new("summoning", e.to_string())
                    })?;
                Ok(Some(uid))
            })),
            source_provisioner: Some("summoning".to_string()),
        }]
    }
}

#[test]
fn custom_provisioners_join_through_dispatch() {
    let mut graph = Graph::new(None);
    let cursor = graph.add_node("cursor").unwrap();
    let requirement = Requirement::new(ProvisioningPolicy::Any)
        .labeled("spirit")
        .with_criteria(Criteria::any().with_tag("spirit"));
    let dep = requirement_on(&mut graph, cursor, requirement);

    let mut author = VmRegistry::new(HandlerLayer::Author);
    author.add(
        Behavior::new("get_provisioners", |_ctx: &mut fabula_vm::Context, _args| {
            Ok(Outcome::Provisioners(vec![Arc::new(SummoningProvisioner)]))
        })
        .for_caller(ItemKind::Graph),
    );

    let dispatch = DispatchLayers::with_core_behaviors().with_author_registry(author);
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);

    frame.run_phase(ResolutionPhase::Planning).unwrap();
    let ctx = frame.context().unwrap();
    let provider = bound_provider(ctx.graph(), dep).unwrap();
    assert_eq!(ctx.graph().get(&provider).unwrap().label(), Some("spirit"));
}

// ---------------------------------------------------------------------
// Planning commits through the event stream

#[test]
fn planned_creation_survives_commit_and_replay() {
    let mut graph = Graph::new(None);
    let a = graph.add_node("A").unwrap();
    let scene = graph.add_node("scene").unwrap();
    let edge = graph.add_choice_edge(a, scene).unwrap();
    let requirement = Requirement::new(ProvisioningPolicy::Create)
        .labeled("companion")
        .with_template(Template::node("companion"));
    requirement_on(&mut graph, scene, requirement);

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::with_options(
        graph,
        a,
        fabula_vm::LedgerOptions::new().event_sourced(true),
    );

    ledger.resolve_choice(edge, &dispatch).unwrap();
    assert!(ledger.graph.get_by_label("companion").unwrap().is_some());

    let recovered = Ledger::recover_graph_from_stream(&ledger.records).unwrap();
    assert_eq!(recovered.state_hash(), ledger.graph.state_hash());
}

#[test]
fn unused_local_is_irrelevant_to_dedup() {
    // BTreeMap iteration order of offers keys must not affect the winner:
    // with a single candidate the winner is that candidate regardless of
    // how many provisioners proposed it.
    let mut graph = Graph::new(None);
    let cursor = graph.add_node("cursor").unwrap();
    let only = graph
        .add_node_item(Node::new(Some("only".into())).tagged("pick"))
        .unwrap();
    let requirement = Requirement::new(ProvisioningPolicy::Any)
        .labeled("pick")
        .with_criteria(Criteria::any().with_tag("pick"));
    let dep = requirement_on(&mut graph, cursor, requirement);

    let dispatch = DispatchLayers::with_core_behaviors();
    let mut ledger = Ledger::new(graph, cursor);
    let mut frame = ledger.frame(&dispatch);
    frame.run_phase(ResolutionPhase::Planning).unwrap();
    let ctx = frame.context().unwrap();
    assert_eq!(bound_provider(ctx.graph(), dep), Some(only));
}
