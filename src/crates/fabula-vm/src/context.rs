//! The per-step context: scope, namespace, and dispatch wiring
//!
//! A [`Context`] is the working surface of one resolution step. It owns the
//! watched (preview) graph, knows the cursor and step, carries the layered
//! registry chain handlers are discovered through, and holds the planning
//! scratch that the four planning handlers pass between themselves.
//!
//! The namespace at a node is composed by walking the containment chain —
//! satisfied-dependency projections, then the node's locals, each
//! ancestor's locals, the graph root's locals, attached domain defaults,
//! and finally whatever `get_ns` handlers contribute. Nearer layers shadow
//! farther ones, and the frame adds its own nearest layer (`cursor`,
//! `epoch`, `phase`, `rand_seed`) on top.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use fabula_core::dispatch::{chain_select, invoke_selected, merge_layers, CallArgs};
use fabula_core::entity::Entity;
use fabula_core::factory::TemplateRegistry;
use fabula_core::graph::{Graph, GraphItem, ItemKind};
use fabula_core::ns::{NsLayer, NsValue, Namespace};

use crate::error::{Result, VmError};
use crate::outcome::{Outcome, VmDomain, VmReceipt, VmRegistry};
use crate::phase::ResolutionPhase;
use crate::provision::offers::ProvisionOffer;
use crate::provision::receipt::BuildReceipt;
use crate::provision::OfferKey;
use crate::watched::WatchedGraph;

/// The working surface of one resolution step.
pub struct Context {
    graph: WatchedGraph,

    /// The frontier node of this step
    pub cursor_id: Uuid,

    /// The step counter at this frame
    pub step: u64,

    /// Phase currently running, when inside one
    pub phase: Option<ResolutionPhase>,

    /// Whether mutations are being captured for a patch
    pub event_sourced: bool,

    /// State-hash of the committed graph this preview was copied from
    pub baseline_state_hash: String,

    /// Deterministic seed for this step's randomness
    pub rand_seed: u64,

    layers: Vec<Arc<VmRegistry>>,
    domains: Vec<Arc<VmDomain>>,
    templates: Arc<TemplateRegistry>,

    /// Planning scratch: collected offers by key
    pub provision_offers: BTreeMap<OfferKey, Vec<ProvisionOffer>>,

    /// Planning scratch: build receipts so far this step
    pub provision_builds: Vec<BuildReceipt>,

    /// The requirement source the current offer collection is for
    pub current_requirement_source_id: Option<Uuid>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph: WatchedGraph,
        cursor_id: Uuid,
        step: u64,
        event_sourced: bool,
        baseline_state_hash: String,
        rand_seed: u64,
        layers: Vec<Arc<VmRegistry>>,
        domains: Vec<Arc<VmDomain>>,
        templates: Arc<TemplateRegistry>,
    ) -> Self {
        Self {
            graph,
            cursor_id,
            step,
            phase: None,
            event_sourced,
            baseline_state_hash,
            rand_seed,
            layers,
            domains,
            templates,
            provision_offers: BTreeMap::new(),
            provision_builds: Vec::new(),
            current_requirement_source_id: None,
        }
    }

    /// The working graph (the preview, in event-sourced play)
    pub fn graph(&self) -> &Graph {
        self.graph.graph()
    }

    /// The watched wrapper, for mutation with event capture
    pub fn watched_mut(&mut self) -> &mut WatchedGraph {
        &mut self.graph
    }

    /// Events captured so far this step
    pub fn captured_events(&self) -> &[crate::events::Event] {
        self.graph.events()
    }

    /// Tear down into the watched graph
    pub(crate) fn into_watched(self) -> WatchedGraph {
        self.graph
    }

    /// The template registry in scope
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Attached domains
    pub fn domains(&self) -> &[Arc<VmDomain>] {
        &self.domains
    }

    /// The cursor item
    pub fn cursor(&self) -> Result<&GraphItem> {
        self.graph
            .graph()
            .get(&self.cursor_id)
            .ok_or_else(|| VmError::invalid_cursor(format!("cursor {} not in graph", self.cursor_id)))
    }

    /// Containment chain of the cursor, cursor first
    pub fn scope_chain(&self) -> Vec<Uuid> {
        self.graph.graph().scope_chain(&self.cursor_id)
    }

    /// A fresh RNG for this step.
    ///
    /// Seeded from `(graph uid, step, cursor uid)`, so every caller inside
    /// one step observes the same sequence and replays are exact.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.rand_seed)
    }

    /// Reset the planning scratch (the LAST planning handler does this)
    pub fn clear_planning_state(&mut self) {
        self.provision_offers.clear();
        self.provision_builds.clear();
        self.current_requirement_source_id = None;
    }

    /// The namespace at the cursor, including the frame layer
    pub fn namespace(&mut self) -> Result<Namespace> {
        self.namespace_for(self.cursor_id)
    }

    /// The namespace at an arbitrary anchor node.
    pub fn namespace_for(&mut self, anchor: Uuid) -> Result<Namespace> {
        let mut ns = Namespace::new();

        // Walk the graph first; all layers are owned before dispatch runs.
        let (deps_layer, local_layers, root_layer) = {
            let graph = self.graph.graph();

            let mut deps_layer = NsLayer::new();
            for item in graph.dependencies_from(&anchor) {
                let Some(edge) = item.as_edge() else { continue };
                let Some(requirement) = &edge.requirement else {
                    continue;
                };
                let (Some(label), Some(provider)) = (&requirement.label, requirement.provider_id)
                else {
                    continue;
                };
                if graph.contains(&provider) {
                    deps_layer.insert(label.clone(), NsValue::node(provider));
                    deps_layer.insert(format!("{label}_satisfied"), NsValue::from(true));
                }
            }

            let mut local_layers = Vec::new();
            for uid in graph.scope_chain(&anchor) {
                if let Some(node) = graph.get(&uid).and_then(GraphItem::as_node) {
                    if !node.locals.is_empty() {
                        local_layers.push(locals_to_layer(&node.locals));
                    }
                }
            }

            let root_layer = if graph.locals.is_empty() {
                None
            } else {
                Some(locals_to_layer(&graph.locals))
            };

            (deps_layer, local_layers, root_layer)
        };

        if !deps_layer.is_empty() {
            ns.push_layer(deps_layer);
        }
        for layer in local_layers {
            ns.push_layer(layer);
        }
        if let Some(layer) = root_layer {
            ns.push_layer(layer);
        }
        for domain in &self.domains {
            if !domain.defaults.is_empty() {
                ns.push_layer(domain.defaults.clone());
            }
        }

        // Handler contributions, merged into one far layer so canonical
        // dispatch order decides shadowing among them.
        let receipts = dispatch_task(self, anchor, "get_ns")?;
        let contributed: Vec<NsLayer> = receipts
            .into_iter()
            .filter_map(|r| match r.result {
                Outcome::Ns(layer) => Some(layer),
                _ => None,
            })
            .collect();
        if !contributed.is_empty() {
            ns.push_layer(merge_layers(contributed));
        }

        // The frame layer shadows everything.
        let mut frame_layer = NsLayer::new();
        frame_layer.insert("cursor".to_string(), NsValue::node(self.cursor_id));
        frame_layer.insert("epoch".to_string(), NsValue::from(self.step));
        if let Some(phase) = self.phase {
            frame_layer.insert(
                "phase".to_string(),
                NsValue::from(Value::String(phase.task().to_string())),
            );
        }
        frame_layer.insert("rand_seed".to_string(), NsValue::from(self.rand_seed));

        Ok(ns.new_child(frame_layer))
    }
}

fn locals_to_layer(locals: &BTreeMap<String, Value>) -> NsLayer {
    locals
        .iter()
        .map(|(k, v)| (k.clone(), NsValue::Value(v.clone())))
        .collect()
}

/// Dispatch `task` for `caller_uid` through the context's registry chain.
///
/// Selection happens against the working graph; the caller may be any graph
/// item or the graph itself. Receipts come back in canonical order. A
/// handler failure aborts the whole dispatch.
pub fn dispatch_task(ctx: &mut Context, caller_uid: Uuid, task: &str) -> Result<Vec<VmReceipt>> {
    let (selected, caller_kind) = {
        let refs: Vec<&VmRegistry> = ctx.layers.iter().map(|a| a.as_ref()).collect();
        let graph = ctx.graph.graph();
        if caller_uid == graph.uid {
            (chain_select(&refs, graph, task), ItemKind::Graph)
        } else {
            let Some(item) = graph.get(&caller_uid) else {
                return Err(VmError::invalid_cursor(format!(
                    "dispatch caller {caller_uid} not in graph"
                )));
            };
            (chain_select(&refs, item, task), item.item_kind())
        }
    };

    tracing::trace!(task, caller = %caller_uid, handlers = selected.len(), "dispatch");
    let args = CallArgs::new(caller_uid, caller_kind, task);
    invoke_selected(&selected, ctx, &args).map_err(VmError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_core::dispatch::{Behavior, HandlerLayer};
    use fabula_core::graph::Node;
    use fabula_core::requirement::{ProvisioningPolicy, Requirement};
    use serde_json::json;

    fn bare_context(graph: Graph, cursor: Uuid) -> Context {
        let baseline = graph.state_hash();
        Context::new(
            WatchedGraph::new(graph, false),
            cursor,
            0,
            false,
            baseline,
            7,
            Vec::new(),
            Vec::new(),
            Arc::new(TemplateRegistry::new()),
        )
    }

    #[test]
    fn namespace_layers_shadow_nearest_first() {
        let mut graph = Graph::new(None);
        graph.locals.insert("x".into(), json!("graph"));
        graph.locals.insert("g_layer".into(), json!("present"));

        let scene = graph.add_subgraph("scene", &[]).unwrap();
        let node = graph.add_node("n").unwrap();
        graph.add_member(scene, node).unwrap();

        if let Some(s) = graph.get_mut(&scene).and_then(GraphItem::as_node_mut) {
            s.locals.insert("x".into(), json!("subgraph"));
            s.locals.insert("sg_layer".into(), json!("present"));
        }
        if let Some(n) = graph.get_mut(&node).and_then(GraphItem::as_node_mut) {
            n.locals.insert("x".into(), json!("node"));
            n.locals.insert("n_layer".into(), json!("present"));
        }

        let mut ctx = bare_context(graph, node);
        let ns = ctx.namespace().unwrap();

        assert_eq!(ns.get("x").unwrap().as_value(), Some(&json!("node")));
        assert!(ns.truthy("g_layer"));
        assert!(ns.truthy("sg_layer"));
        assert!(ns.truthy("n_layer"));
    }

    #[test]
    fn namespace_has_frame_bindings() {
        let mut graph = Graph::new(None);
        let node = graph.add_node("n").unwrap();
        let mut ctx = bare_context(graph, node);
        ctx.phase = Some(ResolutionPhase::Validate);

        let ns = ctx.namespace().unwrap();
        assert_eq!(ns.get_node("cursor"), Some(node));
        assert_eq!(
            ns.get("phase").unwrap().as_value(),
            Some(&json!("validate"))
        );
        assert!(ns.contains_key("epoch"));
        assert!(ns.contains_key("rand_seed"));
    }

    #[test]
    fn satisfied_dependencies_project_into_namespace() {
        let mut graph = Graph::new(None);
        let scene = graph.add_node("scene").unwrap();
        let ally = graph.add_node("ally").unwrap();

        let mut req = Requirement::new(ProvisioningPolicy::Existing).labeled("companion");
        req.provider_id = Some(ally);
        graph
            .add(GraphItem::Dependency(
                fabula_core::graph::Edge::new(Some(scene), Some(ally)).with_requirement(req),
            ))
            .unwrap();

        let mut ctx = bare_context(graph, scene);
        let ns = ctx.namespace().unwrap();
        assert_eq!(ns.get_node("companion"), Some(ally));
        assert!(ns.truthy("companion_satisfied"));
    }

    #[test]
    fn get_ns_handlers_contribute_a_layer() {
        let mut graph = Graph::new(None);
        let node = graph.add_node("n").unwrap();

        let mut reg = VmRegistry::new(HandlerLayer::Author);
        reg.add(Behavior::new("get_ns", |_ctx: &mut Context, _args: &CallArgs| {
            let mut layer = NsLayer::new();
            layer.insert("w_layer".into(), NsValue::from("present"));
            Ok(Outcome::Ns(layer))
        }));

        let baseline = graph.state_hash();
        let mut ctx = Context::new(
            WatchedGraph::new(graph, false),
            node,
            0,
            false,
            baseline,
            0,
            vec![Arc::new(reg)],
            Vec::new(),
            Arc::new(TemplateRegistry::new()),
        );
        let ns = ctx.namespace().unwrap();
        assert!(ns.truthy("w_layer"));
    }

    #[test]
    fn rng_is_deterministic_per_seed() {
        use rand::Rng;
        let mut graph = Graph::new(None);
        let node = graph.add_node("n").unwrap();
        let ctx = bare_context(graph, node);
        let a: Vec<u32> = {
            let mut rng = ctx.rng();
            (0..3).map(|_| rng.gen()).collect()
        };
        let b: Vec<u32> = {
            let mut rng = ctx.rng();
            (0..3).map(|_| rng.gen()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn dependency_projection_skips_unbound_requirements() {
        let mut graph = Graph::new(None);
        let scene = graph.add_node("scene").unwrap();
        let req = Requirement::new(ProvisioningPolicy::Existing).labeled("companion");
        graph
            .add(GraphItem::Dependency(
                fabula_core::graph::Edge::new(Some(scene), None).with_requirement(req),
            ))
            .unwrap();

        let mut ctx = bare_context(graph, scene);
        let ns = ctx.namespace().unwrap();
        assert!(!ns.contains_key("companion"));
        assert!(!ns.truthy("companion_satisfied"));
    }

    #[test]
    fn node_builder_locals_visible() {
        let mut graph = Graph::new(None);
        let node = graph
            .add_node_item(Node::new(Some("m".into())).with_local("foo", json!("bar")))
            .unwrap();
        let mut ctx = bare_context(graph, node);
        let ns = ctx.namespace().unwrap();
        assert_eq!(ns.get("foo").unwrap().as_value(), Some(&json!("bar")));
    }
}
