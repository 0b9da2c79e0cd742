//! # fabula-vm - Deterministic Resolution for Narrative Graphs
//!
//! The runtime half of the fabula engine: a deterministic, event-sourced
//! virtual machine that evaluates a story graph one cursor move at a time.
//! Each move runs a fixed pipeline of resolution phases that plan
//! dependencies, mutate state, compose journal output, and emit replayable
//! patches. Every step is reproducible from a snapshot plus the ordered
//! patch log.
//!
//! ## Overview
//!
//! - **Resolution frames** - One cursor move = one [`Frame`] pass through
//!   the phase pipeline (`VALIDATE → PLANNING → PREREQS → UPDATE →
//!   JOURNAL → FINALIZE → POSTREQS`)
//! - **Provisioning** - Typed dependency resolution with cost-ranked
//!   offers from pluggable [`Provisioner`]s
//! - **Event sourcing** - Mutations captured on a preview graph, collapsed
//!   by canonicalization, committed as [`Patch`]es
//! - **The ledger** - Snapshot + patch stream with full recovery, journal
//!   sections, and call-stack history
//! - **Determinism** - Per-step RNG seeded from
//!   `(graph uid, step, cursor uid)`; identical snapshots plus identical
//!   choices produce identical patches and fragments
//!
//! ## Execution Model
//!
//! ```text
//!   host selects a choice edge
//!        │
//!        ▼
//!   Ledger::resolve_choice ──► Frame::follow_edge ──┐
//!        ▲                                          │ redirect?
//!        └──────────────────────────────────────────┘
//!            each hop: VALIDATE → PLANNING → PREREQS ─┐
//!                      UPDATE → JOURNAL → FINALIZE    │ (suspend on
//!                      POSTREQS                       │  redirect)
//!                                                     ▼
//!            records: marker · fragments · patch · snapshot
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fabula_core::graph::Graph;
//! use fabula_vm::{DispatchLayers, Ledger, LedgerOptions};
//!
//! let mut graph = Graph::new(Some("demo".into()));
//! let camp = graph.add_node("camp").unwrap();
//! let road = graph.add_node("road").unwrap();
//! let edge = graph.add_choice_edge(camp, road).unwrap();
//!
//! let dispatch = DispatchLayers::with_core_behaviors();
//! let mut ledger = Ledger::with_options(
//!     graph,
//!     camp,
//!     LedgerOptions::new().event_sourced(true),
//! );
//!
//! ledger.resolve_choice(edge, &dispatch).unwrap();
//! assert_eq!(ledger.cursor_id, road);
//! assert_eq!(ledger.step, 1);
//! ```
//!
//! ## See Also
//!
//! - `fabula-core` - The entity/graph model, dispatch machinery, and
//!   record streams this crate executes over.

pub mod behaviors;
pub mod context;
pub mod error;
pub mod events;
pub mod fragment;
pub mod frame;
pub mod ledger;
pub mod outcome;
pub mod patch;
pub mod phase;
pub mod provision;
pub mod watched;

// Re-export main types
pub use behaviors::{register_core_behaviors, DispatchLayers};
pub use context::{dispatch_task, Context};
pub use error::{Result, VmError};
pub use events::{Event, EventType, ReplayWatcher};
pub use fragment::Fragment;
pub use frame::{Frame, StackFrame};
pub use ledger::{Ledger, LedgerOptions, DEFAULT_STACK_LIMIT};
pub use outcome::{Outcome, VmBehavior, VmDomain, VmReceipt, VmRegistry};
pub use patch::{Patch, Snapshot};
pub use phase::{Aggregation, ResolutionPhase};
pub use provision::{
    default_provisioners, AffordanceOffer, BuildReceipt, CloningProvisioner, DependencyOffer,
    GraphProvisioner, OfferAction, OfferKey, PlanningReceipt, ProvisionCost, ProvisionOffer,
    Provisioner, ProvisionerHandle, TemplateProvisioner, UpdatingProvisioner,
};
pub use watched::WatchedGraph;
