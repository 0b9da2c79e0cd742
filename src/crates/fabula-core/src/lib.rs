//! # fabula-core - Graph, Dispatch, and Record Foundations
//!
//! Foundation crate for the fabula narrative virtual machine: the entity
//! and graph model, criteria search, the layered handler dispatch system,
//! namespaces, templates, requirements, and the append-only record stream
//! that the runtime crate builds its ledger on.
//!
//! ## Overview
//!
//! A story world is a directed labeled graph evaluated one cursor move at a
//! time. This crate provides everything below the evaluator:
//!
//! - **Entities** - Identified, labeled, tagged values ([`entity::Entity`])
//! - **Graph arena** - Nodes, edges, and nestable subgraphs owned by uid
//!   ([`graph::Graph`])
//! - **Criteria** - Structured matching for search and handler selection
//!   ([`criteria::Criteria`])
//! - **Dispatch** - Priority-ordered, layer-aware behavior registries
//!   ([`dispatch::HandlerRegistry`])
//! - **Namespaces** - Layered key/value scopes with nearest-wins shadowing
//!   ([`ns::Namespace`])
//! - **Requirements** - Declarative dependency statements with policies
//!   ([`requirement::Requirement`])
//! - **Templates** - Recipes for materializing nodes ([`factory::Template`])
//! - **Record streams** - Sequenced, marker-delimited append-only logs
//!   ([`record::StreamRegistry`])
//! - **Singletons** - Process-wide `(class, label)` identities
//!   ([`singleton`])
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────┐
//!                  │            Graph (arena)          │
//!                  │  Node ─ Edge ─ Subgraph by uid    │
//!                  │  criteria search · containment    │
//!                  └───────┬──────────────┬───────────┘
//!                          │              │
//!              ┌───────────▼───┐   ┌──────▼────────────┐
//!              │   Dispatch    │   │    Namespaces     │
//!              │ layers · prio │   │ nearest-wins maps │
//!              │ · specificity │   └───────────────────┘
//!              └───────┬───────┘
//!                      │
//!              ┌───────▼───────────────────────────────┐
//!              │  StreamRegistry (records + markers)   │
//!              └───────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fabula_core::graph::Graph;
//! use fabula_core::criteria::Criteria;
//!
//! let mut g = Graph::new(Some("demo".into()));
//! let camp = g.add_node("camp").unwrap();
//! let road = g.add_node("road").unwrap();
//! g.add_choice_edge(camp, road).unwrap();
//!
//! let criteria = Criteria::any().with_label("road");
//! let found = g.find_one(&criteria).unwrap();
//! use fabula_core::entity::Entity;
//! assert_eq!(found.uid(), road);
//! ```
//!
//! ## See Also
//!
//! - `fabula-vm` - The resolution frame, planning pipeline, event capture,
//!   and ledger built on these foundations.

pub mod criteria;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod factory;
pub mod graph;
pub mod hashing;
pub mod ns;
pub mod predicate;
pub mod record;
pub mod registry;
pub mod requirement;
pub mod singleton;

// Re-export main types
pub use criteria::{Criteria, Identifier};
pub use dispatch::{
    chain_select, invoke_selected, merge_layers, Behavior, CallArgs, CallReceipt, Domain,
    HandlerBinding, HandlerLayer, HandlerPriority, HandlerRegistry, HandlerResult, Selected,
};
pub use entity::Entity;
pub use error::{CoreError, HandlerError, Result};
pub use factory::{Template, TemplateEntry, TemplateRegistry};
pub use graph::{Edge, Graph, GraphItem, ItemKind, Node, TriggerPhase};
pub use ns::{NsLayer, NsValue, Namespace};
pub use predicate::EdgePredicate;
pub use record::{Record, StreamRegistry};
pub use registry::Registry;
pub use requirement::{ProvisioningPolicy, Requirement};
