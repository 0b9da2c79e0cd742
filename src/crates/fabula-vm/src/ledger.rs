//! The ledger: persistent owner of a graph, cursor, and record stream
//!
//! A [`Ledger`] is what a host keeps between steps: the committed graph,
//! the cursor, the step counter, the call stack, and the append-only
//! record stream holding snapshots, patches, fragments, and markers. It is
//! single-owner state — a ledger is never shared across threads, and the
//! frame takes exclusive access for the duration of a step.
//!
//! # Recovery
//!
//! A stream replays without the live graph: restore the most recent
//! snapshot, then apply every later patch in seq order. Snapshot cadence is
//! configurable; patches alone carry the steps between snapshots.
//!
//! # Example
//!
//! ```rust,ignore
//! use fabula_vm::{DispatchLayers, Ledger, LedgerOptions};
//!
//! let dispatch = DispatchLayers::with_core_behaviors();
//! let mut ledger = Ledger::with_options(graph, start, LedgerOptions::new().event_sourced(true));
//! ledger.resolve_choice(edge, &dispatch)?;
//! let recovered = Ledger::recover_graph_from_stream(&ledger.records)?;
//! assert_eq!(recovered.state_hash(), ledger.graph.state_hash());
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use fabula_core::graph::Graph;
use fabula_core::record::{Record, StreamRegistry};

use crate::behaviors::DispatchLayers;
use crate::error::{Result, VmError};
use crate::frame::{Frame, StackFrame};
use crate::patch::{Patch, Snapshot};

/// Default depth limit for the call stack
pub const DEFAULT_STACK_LIMIT: usize = 50;

fn default_cadence() -> u64 {
    1
}

fn default_stack_limit() -> usize {
    DEFAULT_STACK_LIMIT
}

/// Construction options for a ledger.
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Push a snapshot every N steps
    pub snapshot_cadence: u64,
    /// Capture mutations as patches for replay
    pub event_sourced: bool,
    /// Call stack depth limit
    pub stack_limit: usize,
}

impl LedgerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: snapshot cadence in steps (0 disables cadence snapshots)
    pub fn snapshot_cadence(mut self, cadence: u64) -> Self {
        self.snapshot_cadence = cadence;
        self
    }

    /// Builder: toggle event-sourced play
    pub fn event_sourced(mut self, on: bool) -> Self {
        self.event_sourced = on;
        self
    }

    /// Builder: call stack depth limit
    pub fn stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            snapshot_cadence: 1,
            event_sourced: false,
            stack_limit: DEFAULT_STACK_LIMIT,
        }
    }
}

/// Persistent owner of a graph, cursor, call stack, and record stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    /// Stable identity
    pub uid: Uuid,

    /// Optional label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// The committed graph
    pub graph: Graph,

    /// The current frontier node
    pub cursor_id: Uuid,

    /// Steps resolved so far
    #[serde(default)]
    pub step: u64,

    /// Call stack of pending returns
    #[serde(default)]
    pub call_stack: Vec<StackFrame>,

    /// Every cursor visited, in order
    #[serde(default)]
    pub cursor_history: Vec<Uuid>,

    /// The append-only record stream
    #[serde(default)]
    pub records: StreamRegistry,

    /// Push a snapshot every N steps (0 disables)
    #[serde(default = "default_cadence")]
    pub snapshot_cadence: u64,

    /// Capture mutations as patches for replay
    #[serde(default)]
    pub event_sourced: bool,

    /// Call stack depth limit
    #[serde(default = "default_stack_limit")]
    pub stack_limit: usize,
}

impl Ledger {
    /// New ledger at step zero with default options
    pub fn new(graph: Graph, cursor_id: Uuid) -> Self {
        Self::with_options(graph, cursor_id, LedgerOptions::default())
    }

    /// New ledger with explicit options
    pub fn with_options(graph: Graph, cursor_id: Uuid, options: LedgerOptions) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label: None,
            graph,
            cursor_id,
            step: 0,
            call_stack: Vec::new(),
            cursor_history: Vec::new(),
            records: StreamRegistry::new(),
            snapshot_cadence: options.snapshot_cadence,
            event_sourced: options.event_sourced,
            stack_limit: options.stack_limit,
        }
    }

    /// The marker name delimiting one step's records
    pub fn step_marker(step: u64) -> String {
        format!("step-{step:04}")
    }

    /// Borrow a frame over this ledger
    pub fn frame<'a>(&'a mut self, dispatch: &'a DispatchLayers) -> Frame<'a> {
        Frame::new(self, dispatch)
    }

    /// Follow one edge; returns a redirect edge if one fired
    pub fn follow_edge(
        &mut self,
        edge_uid: Uuid,
        dispatch: &DispatchLayers,
    ) -> Result<Option<Uuid>> {
        self.frame(dispatch).follow_edge(edge_uid)
    }

    /// Resolve a choice to quiescence (trampolining redirects)
    pub fn resolve_choice(&mut self, edge_uid: Uuid, dispatch: &DispatchLayers) -> Result<()> {
        self.frame(dispatch).resolve_choice(edge_uid)
    }

    // ------------------------------------------------------------------
    // Snapshots and recovery

    /// Push a snapshot of the committed graph onto the stream
    pub fn push_snapshot(&mut self) -> Result<u64> {
        let record = Snapshot::from_graph(&self.graph).to_record()?;
        let seq = self.records.add_record(record);
        debug!(seq, step = self.step, "snapshot pushed");
        Ok(seq)
    }

    /// Push a snapshot when the step lands on the cadence, or when forced
    pub fn maybe_push_snapshot(&mut self, cadence: Option<u64>, force: bool) -> Result<()> {
        let cadence = cadence.unwrap_or(self.snapshot_cadence);
        if force || (cadence > 0 && self.step % cadence == 0) {
            self.push_snapshot()?;
        }
        Ok(())
    }

    /// Rebuild a graph from a record stream alone.
    ///
    /// Restores the most recent snapshot, then applies every patch with a
    /// later seq, in seq order. A stream without a snapshot cannot recover.
    pub fn recover_graph_from_stream(records: &StreamRegistry) -> Result<Graph> {
        let snapshot_record = records
            .last(Some("snapshot"))
            .ok_or(VmError::MissingSnapshot)?;
        let snapshot = Snapshot::from_record(snapshot_record)?;
        let mut graph = snapshot.restore()?;
        let snapshot_seq = snapshot_record.seq;

        for record in records.iter_channel("patch") {
            if record.seq <= snapshot_seq {
                continue;
            }
            let patch = Patch::from_record(record)?;
            graph = patch.apply(&graph)?;
        }
        Ok(graph)
    }

    // ------------------------------------------------------------------
    // Journal access

    /// The fragment records of one step's section
    pub fn journal_for_step(&self, step: u64) -> Result<Vec<&Record>> {
        Ok(self
            .records
            .get_section_channel(&Self::step_marker(step), "fragment")?
            .collect())
    }

    // ------------------------------------------------------------------
    // Persistence

    /// Encode the whole ledger payload as JSON bytes.
    ///
    /// Ledger payloads are self-describing trees — class-tagged graph
    /// items, JSON-valued events, marker maps — so JSON is the one format
    /// that round-trips them faithfully.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a ledger payload from JSON bytes
    pub fn decode(data: &[u8]) -> Result<Ledger> {
        Ok(serde_json::from_slice(data)?)
    }
}
