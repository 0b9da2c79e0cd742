//! The resolution frame: one cursor move, one phase pipeline
//!
//! A [`Frame`] is the ephemeral evaluator for steps of one ledger. Each
//! [`follow_edge`](Frame::follow_edge) call advances the cursor once and
//! runs the phase pipeline; [`resolve_choice`](Frame::resolve_choice)
//! trampolines `follow_edge` until no redirect comes back.
//!
//! One step, in order:
//!
//! 1. increment the step, move the cursor, push a stack frame for call
//!    edges (depth-limited), and invalidate the cached context;
//! 2. VALIDATE — all handlers must agree or the step aborts;
//! 3. PLANNING — provision the frontier; outcome recorded;
//! 4. PREREQS — a returned edge suspends the step and redirects;
//! 5. UPDATE — state mutation;
//! 6. JOURNAL — fragments appended to the stream under a `step-NNNN` marker;
//! 7. FINALIZE — in event-sourced play the captured buffer becomes a patch,
//!    which is committed to the stream and applied to the ledger's graph;
//! 8. POSTREQS — a returned edge redirects after commit.
//!
//! In event-sourced play each hop works on a preview graph (committed copy
//! plus the buffered events), so a redirected hop's mutations ride along
//! uncommitted until a hop completes and commits one patch for the whole
//! run of hops.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use fabula_core::dispatch::HandlerLayer;
use fabula_core::entity::Entity;
use fabula_core::error::CoreError;
use fabula_core::graph::ItemKind;
use fabula_core::hashing;
use fabula_core::record::Record;

use crate::behaviors::DispatchLayers;
use crate::context::{dispatch_task, Context};
use crate::error::{Result, VmError};
use crate::events::Event;
use crate::ledger::Ledger;
use crate::outcome::{Outcome, VmReceipt, VmRegistry};
use crate::patch::Patch;
use crate::phase::{Aggregation, ResolutionPhase};
use crate::watched::WatchedGraph;

use fabula_core::dispatch::HandlerResult;

/// One entry of the call stack: where to return when unwinding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Node to jump back to when the call returns
    pub return_cursor_id: Uuid,

    /// Label of the calling node at push time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_site_label: Option<String>,

    /// Semantic category of the call
    #[serde(default = "default_call_type")]
    pub call_type: String,

    /// Nesting depth at push time (0 = first call)
    pub depth: u32,
}

fn default_call_type() -> String {
    "generic".to_string()
}

/// The per-step evaluator. Borrows its ledger exclusively for the duration.
pub struct Frame<'a> {
    ledger: &'a mut Ledger,
    dispatch: &'a DispatchLayers,
    local_behaviors: Option<Arc<VmRegistry>>,
    ctx: Option<Context>,
    pending_events: Vec<Event>,

    /// Receipts per phase of the most recent step
    pub phase_receipts: BTreeMap<ResolutionPhase, Vec<VmReceipt>>,

    /// Aggregated outcome per phase of the most recent step
    pub phase_outcomes: BTreeMap<ResolutionPhase, Outcome>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(ledger: &'a mut Ledger, dispatch: &'a DispatchLayers) -> Self {
        Self {
            ledger,
            dispatch,
            local_behaviors: None,
            ctx: None,
            pending_events: Vec::new(),
            phase_receipts: BTreeMap::new(),
            phase_outcomes: BTreeMap::new(),
        }
    }

    /// Inject ad-hoc behaviors for this frame only (the inline layer)
    pub fn with_local_behaviors(mut self, registry: VmRegistry) -> Self {
        let mut registry = registry;
        registry.layer = HandlerLayer::Inline;
        self.local_behaviors = Some(Arc::new(registry));
        self
    }

    /// The ledger this frame drives
    pub fn ledger(&self) -> &Ledger {
        self.ledger
    }

    /// Deterministic RNG for the current `(graph, step, cursor)`
    pub fn rng(&self) -> StdRng {
        let seed = hashing::seed_for_step(
            self.ledger.graph.uid,
            self.ledger.step,
            self.ledger.cursor_id,
        );
        StdRng::seed_from_u64(seed)
    }

    /// Tearing down a context must not lose its mutations: buffered events
    /// roll into the pending buffer (event-sourced) or the working graph
    /// swaps straight in (direct play).
    fn invalidate_context(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let (graph, events) = ctx.into_watched().into_parts();
            if self.ledger.event_sourced {
                self.pending_events = events;
            } else {
                self.ledger.graph = graph;
            }
        }
    }

    fn build_context(&self) -> Result<Context> {
        let committed = &self.ledger.graph;
        let baseline = committed.state_hash();
        let mut preview = committed.clone();
        if self.ledger.event_sourced && !self.pending_events.is_empty() {
            for event in Event::canonicalize_events(&self.pending_events) {
                event.apply(&mut preview)?;
            }
        }
        let watched = WatchedGraph::with_events(
            preview,
            self.pending_events.clone(),
            self.ledger.event_sourced,
        );
        let seed = hashing::seed_for_step(
            self.ledger.graph.uid,
            self.ledger.step,
            self.ledger.cursor_id,
        );
        Ok(Context::new(
            watched,
            self.ledger.cursor_id,
            self.ledger.step,
            self.ledger.event_sourced,
            baseline,
            seed,
            self.dispatch.chain_with_local(self.local_behaviors.clone()),
            self.dispatch.domains.clone(),
            self.dispatch.templates.clone(),
        ))
    }

    /// The step context, built lazily against the current cursor
    pub fn context(&mut self) -> Result<&mut Context> {
        if self.ctx.is_none() {
            let ctx = self.build_context()?;
            self.ctx = Some(ctx);
        }
        Ok(self.ctx.as_mut().expect("just built"))
    }

    /// Run one phase: dispatch its task through the scope chain and reduce
    /// the receipts with the phase's aggregator.
    pub fn run_phase(&mut self, phase: ResolutionPhase) -> Result<Outcome> {
        let aggregation = phase.aggregation();
        if aggregation == Aggregation::NotRun {
            return Ok(Outcome::None);
        }
        let ctx = self.context()?;
        ctx.phase = Some(phase);
        let cursor = ctx.cursor_id;
        let receipts = dispatch_task(ctx, cursor, phase.task())?;

        let outcome = match aggregation {
            Aggregation::NotRun => Outcome::None,
            Aggregation::AllTruthy => Outcome::Bool(
                receipts
                    .iter()
                    .filter(|r| r.result.is_present())
                    .all(|r| r.result.is_truthy()),
            ),
            Aggregation::Gather => Outcome::None,
            Aggregation::FirstResult => receipts
                .iter()
                .map(|r| &r.result)
                .find(|o| o.is_present())
                .cloned()
                .unwrap_or(Outcome::None),
            Aggregation::LastResult => receipts
                .iter()
                .rev()
                .map(|r| &r.result)
                .find(|o| o.is_present())
                .cloned()
                .unwrap_or(Outcome::None),
        };

        debug!(phase = phase.task(), receipts = receipts.len(), "phase ran");
        self.phase_receipts.insert(phase, receipts);
        self.phase_outcomes.insert(phase, outcome.clone());
        Ok(outcome)
    }

    /// Advance the cursor across one edge and run the pipeline.
    ///
    /// Returns the redirect edge when PREREQS or POSTREQS produced one; the
    /// caller trampolines.
    pub fn follow_edge(&mut self, edge_uid: Uuid) -> Result<Option<Uuid>> {
        let (kind, destination, is_call, call_type, call_site_label) = {
            let item = self
                .ledger
                .graph
                .get(&edge_uid)
                .ok_or_else(|| CoreError::not_found(format!("edge {edge_uid}")))?;
            let kind = item.item_kind();
            let edge = item
                .as_edge()
                .ok_or_else(|| VmError::invalid_cursor(format!("{edge_uid} is not an edge")))?;
            let destination = edge
                .destination_id
                .ok_or(VmError::DanglingEdge { edge: edge_uid })?;
            let call_site_label = edge
                .source_id
                .and_then(|s| self.ledger.graph.get(&s))
                .map(|n| n.display_name());
            (
                kind,
                destination,
                edge.is_call,
                edge.call_type.clone(),
                call_site_label,
            )
        };

        if !matches!(kind, ItemKind::Edge | ItemKind::ChoiceEdge) {
            return Err(VmError::invalid_cursor(format!(
                "{kind:?} edges are not traversable"
            )));
        }
        if !self.ledger.graph.contains(&destination) {
            return Err(VmError::DanglingEdge { edge: edge_uid });
        }

        let stack_len_before = self.ledger.call_stack.len();
        if is_call {
            if self.ledger.call_stack.len() >= self.ledger.stack_limit {
                return Err(VmError::StackOverflow {
                    depth: self.ledger.call_stack.len(),
                });
            }
            let depth = self.ledger.call_stack.len() as u32;
            self.ledger.call_stack.push(StackFrame {
                return_cursor_id: self.ledger.cursor_id,
                call_site_label,
                call_type: call_type.unwrap_or_else(default_call_type),
                depth,
            });
        }

        self.ledger.step += 1;
        self.ledger.cursor_id = destination;
        self.ledger.cursor_history.push(destination);
        self.invalidate_context();
        debug!(step = self.ledger.step, cursor = %destination, "cursor advanced");

        if !self.run_phase(ResolutionPhase::Validate)?.is_truthy() {
            return Err(VmError::invalid_cursor(
                "validation rejected the proposed cursor",
            ));
        }

        self.run_phase(ResolutionPhase::Planning)?;

        if let Some(next) = self.run_phase(ResolutionPhase::Prereqs)?.as_edge() {
            self.suspend_step();
            return Ok(Some(next));
        }

        self.run_phase(ResolutionPhase::Update)?;

        let journal = self.run_phase(ResolutionPhase::Journal)?;
        let marker = Ledger::step_marker(self.ledger.step);
        self.ledger.records.set_marker(&marker)?;
        self.ledger.records.add_record(
            Record::new("marker", serde_json::Value::Null)
                .labeled(marker.as_str())
                .on_channel("frame"),
        );
        for fragment in journal.into_fragments() {
            self.ledger.records.add_record(fragment.to_record());
        }

        let finalize = self.run_phase(ResolutionPhase::Finalize)?;
        self.commit_step(finalize, stack_len_before)?;

        if let Some(next) = self.run_phase(ResolutionPhase::Postreqs)?.as_edge() {
            return Ok(Some(next));
        }
        Ok(None)
    }

    /// Trampoline [`follow_edge`](Self::follow_edge) until no redirect
    /// comes back.
    pub fn resolve_choice(&mut self, edge_uid: Uuid) -> Result<()> {
        let mut current = Some(edge_uid);
        while let Some(edge) = current {
            current = self.follow_edge(edge)?;
        }
        Ok(())
    }

    /// Selectable (non-auto-trigger) choice edges available at the cursor,
    /// in deterministic order.
    pub fn available_choices(&mut self) -> Result<Vec<Uuid>> {
        let ctx = self.context()?;
        let ns = ctx.namespace()?;
        let graph = ctx.graph();
        let mut choices = Vec::new();
        for item in graph.choice_edges_from(&ctx.cursor_id) {
            let Some(edge) = item.as_edge() else { continue };
            if edge.trigger_phase.is_some() || edge.destination_id.is_none() {
                continue;
            }
            let available = edge
                .predicate
                .as_ref()
                .map(|p| p.evaluate(&ns))
                .unwrap_or(true);
            if available {
                choices.push(edge.uid);
            }
        }
        Ok(choices)
    }

    /// A prereq redirect suspends the step: mutations stay uncommitted in
    /// event-sourced play, or land directly in direct play.
    fn suspend_step(&mut self) {
        self.invalidate_context();
    }

    fn commit_step(&mut self, finalize: Outcome, stack_len_before: usize) -> Result<()> {
        let ctx = self
            .ctx
            .take()
            .ok_or_else(|| VmError::invalid_cursor("no active context at commit"))?;
        let (graph, events) = ctx.into_watched().into_parts();

        if self.ledger.event_sourced {
            let patch = match finalize.into_patch() {
                Some(patch) => patch,
                None => Patch::new(
                    self.ledger.graph.uid,
                    Event::canonicalize_events(&events),
                )
                .with_state_hash(self.ledger.graph.state_hash()),
            };
            let record = patch.to_record()?;
            self.ledger.graph = patch.apply(&self.ledger.graph)?;
            self.ledger.records.add_record(record);
            self.pending_events.clear();
        } else {
            self.ledger.graph = graph;
        }

        if self.ledger.call_stack.len() != stack_len_before {
            let record = Record::new(
                "stack",
                serde_json::to_value(&self.ledger.call_stack)?,
            )
            .on_channel("stack");
            self.ledger.records.add_record(record);
        }

        self.ledger.maybe_push_snapshot(None, false)?;
        Ok(())
    }
}
