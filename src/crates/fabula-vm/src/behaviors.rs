//! Dispatch wiring and the built-in phase behaviors
//!
//! [`DispatchLayers`] bundles everything a frame discovers handlers
//! through: the global and application registries, author registries,
//! attached domains, and the template registry. Registries are immutable
//! once play starts — behaviors are shared by `Arc`, so cloning a chain is
//! cheap.
//!
//! [`DispatchLayers::with_core_behaviors`] registers the default pipeline:
//! cursor validation, the four-stage planning pipeline, trigger-edge
//! redirects for PREREQS/POSTREQS, the default journal line, and the
//! event-sourced patch compositor for FINALIZE.

use std::sync::Arc;

use fabula_core::dispatch::{Behavior, CallArgs, HandlerLayer, HandlerPriority};
use fabula_core::entity::Entity;
use fabula_core::error::HandlerError;
use fabula_core::factory::TemplateRegistry;
use fabula_core::graph::TriggerPhase;

use crate::context::Context;
use crate::events::Event;
use crate::fragment::Fragment;
use crate::outcome::{Outcome, VmDomain, VmRegistry};
use crate::patch::Patch;
use crate::provision::register_planning_behaviors;

/// The registry chain and runtime environment a frame dispatches through.
pub struct DispatchLayers {
    /// Available everywhere
    pub global: Arc<VmRegistry>,
    /// The runtime's default behaviors
    pub application: Arc<VmRegistry>,
    /// World/story contributions, nearest last
    pub author: Vec<Arc<VmRegistry>>,
    /// Domains active for every step of this ledger
    pub domains: Vec<Arc<VmDomain>>,
    /// Templates resolvable by `template_ref`
    pub templates: Arc<TemplateRegistry>,
}

impl DispatchLayers {
    /// Empty wiring: no behaviors at all.
    ///
    /// Phases run with their aggregator identities (validation is
    /// vacuously true, planning resolves to nothing).
    pub fn new() -> Self {
        Self {
            global: Arc::new(VmRegistry::new(HandlerLayer::Global).labeled("dispatch.global")),
            application: Arc::new(
                VmRegistry::new(HandlerLayer::Application).labeled("dispatch.vm"),
            ),
            author: Vec::new(),
            domains: Vec::new(),
            templates: Arc::new(TemplateRegistry::new()),
        }
    }

    /// Standard wiring: the default pipeline registered at the application
    /// layer.
    pub fn with_core_behaviors() -> Self {
        let mut application = VmRegistry::new(HandlerLayer::Application).labeled("dispatch.vm");
        register_core_behaviors(&mut application);
        Self {
            application: Arc::new(application),
            ..Self::new()
        }
    }

    /// Builder: contribute an author-layer registry
    pub fn with_author_registry(mut self, registry: VmRegistry) -> Self {
        self.author.push(Arc::new(registry));
        self
    }

    /// Builder: attach a domain for every step
    pub fn with_domain(mut self, domain: VmDomain) -> Self {
        self.domains.push(Arc::new(domain));
        self
    }

    /// Builder: set the template registry
    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    /// The discovery chain, nearest first: inline, domain-local, author,
    /// application, global.
    pub(crate) fn chain_with_local(
        &self,
        local: Option<Arc<VmRegistry>>,
    ) -> Vec<Arc<VmRegistry>> {
        let mut chain = Vec::new();
        if let Some(local) = local {
            chain.push(local);
        }
        for domain in &self.domains {
            chain.push(Arc::new(domain.handlers.clone()));
        }
        for author in self.author.iter().rev() {
            chain.push(author.clone());
        }
        chain.push(self.application.clone());
        chain.push(self.global.clone());
        chain
    }
}

impl Default for DispatchLayers {
    fn default() -> Self {
        Self::with_core_behaviors()
    }
}

/// Register the default phase behaviors into a registry.
pub fn register_core_behaviors(registry: &mut VmRegistry) {
    registry.add(Behavior::new("validate", validate_cursor).labeled("validate_cursor"));
    register_planning_behaviors(registry);
    registry.add(
        Behavior::new("prereqs", |ctx: &mut Context, _args: &CallArgs| {
            triggered_edge(ctx, TriggerPhase::Prereqs)
        })
        .labeled("follow_prereq_triggers"),
    );
    registry.add(
        Behavior::new("postreqs", |ctx: &mut Context, _args: &CallArgs| {
            triggered_edge(ctx, TriggerPhase::Postreqs)
        })
        .labeled("follow_postreq_triggers"),
    );
    registry.add(
        Behavior::new("journal", compose_step_entry)
            .labeled("compose_step_entry")
            .with_priority(HandlerPriority::Last),
    );
    registry.add(
        Behavior::new("finalize", compose_step_patch)
            .labeled("compose_step_patch")
            .with_priority(HandlerPriority::Last),
    );
}

/// The proposed cursor must resolve to a vertex.
fn validate_cursor(ctx: &mut Context, _args: &CallArgs) -> Result<Outcome, HandlerError> {
    let valid = ctx
        .graph()
        .get(&ctx.cursor_id)
        .map(|item| item.item_kind().is_node())
        .unwrap_or(false);
    Ok(Outcome::Bool(valid))
}

/// First auto-firing choice edge whose predicate holds, if any.
fn triggered_edge(ctx: &mut Context, trigger: TriggerPhase) -> Result<Outcome, HandlerError> {
    let ns = ctx
        .namespace()
        .map_err(|e| HandlerError::new("triggered_edge", e.to_string()))?;
    let graph = ctx.graph();
    for item in graph.choice_edges_from(&ctx.cursor_id) {
        let Some(edge) = item.as_edge() else { continue };
        if edge.trigger_phase != Some(trigger) || edge.destination_id.is_none() {
            continue;
        }
        let available = edge
            .predicate
            .as_ref()
            .map(|p| p.evaluate(&ns))
            .unwrap_or(true);
        if available {
            return Ok(Outcome::Edge(edge.uid));
        }
    }
    Ok(Outcome::None)
}

/// Default journal line: `[step N] <cursor>`.
fn compose_step_entry(ctx: &mut Context, _args: &CallArgs) -> Result<Outcome, HandlerError> {
    let (uid, label) = {
        let cursor = ctx
            .cursor()
            .map_err(|e| HandlerError::new("compose_step_entry", e.to_string()))?;
        (cursor.uid(), cursor.display_name())
    };
    let content = format!("[step {}] {}", ctx.step, label);
    Ok(Outcome::Fragments(vec![
        Fragment::new(content).with_source(uid, Some(label)),
    ]))
}

/// Wrap the captured event buffer into the step's patch.
fn compose_step_patch(ctx: &mut Context, _args: &CallArgs) -> Result<Outcome, HandlerError> {
    if !ctx.event_sourced {
        return Ok(Outcome::None);
    }
    let events = Event::canonicalize_events(ctx.captured_events());
    let patch = Patch::new(ctx.graph().uid, events)
        .with_state_hash(ctx.baseline_state_hash.clone());
    Ok(Outcome::Patch(patch))
}
