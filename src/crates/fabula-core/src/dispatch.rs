//! Handler registration, selection, and priority-ordered invocation
//!
//! A **behavior** wraps a callable with the metadata dispatch needs: a task
//! key, a priority, a caller-kind bound, selection criteria, and one of five
//! binding patterns. A [`HandlerRegistry`] stores behaviors for one layer;
//! [`chain_select`] concatenates several registries so that precedence stays
//! consistent across layers, then sorts by the canonical key:
//!
//! 1. registry layer (global → inline),
//! 2. priority (`FIRST` → `LAST`),
//! 3. specificity (identifier selectors count 100, otherwise criteria count),
//! 4. origin distance (position of the registry in the discovery chain,
//!    closer first),
//! 5. kind-lattice distance (nearer subtype bound first),
//! 6. binding rank (static < class < instance),
//! 7. registration seq (later registrations first on full ties).
//!
//! The machinery is generic over the context type `C` handlers mutate and
//! the result type `R` they return, so the runtime crate can instantiate it
//! with its own context and a typed outcome enum.
//!
//! # Example
//!
//! ```rust
//! use fabula_core::dispatch::{CallArgs, HandlerLayer, HandlerRegistry, CallReceipt};
//! use fabula_core::graph::{Graph, ItemKind};
//! use fabula_core::entity::Entity;
//!
//! let mut reg: HandlerRegistry<u32, bool> = HandlerRegistry::new(HandlerLayer::Application);
//! reg.register("validate", |count: &mut u32, _args: &CallArgs| {
//!     *count += 1;
//!     Ok(true)
//! });
//!
//! let g = Graph::new(Some("demo".into()));
//! let selected = reg.find_all(&g, Some("validate"));
//! assert_eq!(selected.len(), 1);
//! ```

use std::any::Any;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::criteria::Criteria;
use crate::entity::Entity;
use crate::error::HandlerError;
use crate::graph::ItemKind;
use crate::ns::NsLayer;

/// Discovery layer of a registry; lower layers run earlier in the
/// canonical order, so nearer layers can clobber under last-result
/// aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HandlerLayer {
    /// Available everywhere (core tasks)
    Global = 1,
    /// Included by the application (runtime tasks)
    Application = 2,
    /// Contributed by world/story authors
    Author = 3,
    /// Defined on a node, its ancestors, or attached domains
    Local = 4,
    /// Injected ad hoc for one frame
    Inline = 5,
}

/// Invocation priority within a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HandlerPriority {
    First = 1,
    Early = 25,
    Normal = 50,
    Later = 75,
    Last = 100,
}

/// How a behavior's callable is bound.
///
/// The five patterns differ in what receiver the invoker supplies: nothing
/// (static), the caller (on-caller variants), or a retained owner object
/// (on-owner variants). Owner-bound behaviors hold a strong reference to
/// their owner.
pub enum HandlerBinding<C, R> {
    /// Free function
    Static(HandlerFn<C, R>),
    /// Conceptually a method on the caller; receives the caller at dispatch
    InstanceOnCaller(HandlerFn<C, R>),
    /// Conceptually a classmethod of the caller's kind
    ClassOnCaller(HandlerFn<C, R>),
    /// Bound method of a retained owner object
    InstanceOnOwner {
        /// The owner receiver, downcast by the handler itself
        owner: Arc<dyn Any + Send + Sync>,
        /// Callable receiving `(owner, ctx, args)`
        func: OwnerHandlerFn<C, R>,
    },
    /// Classmethod on a different owner kind; no instance retained
    ClassOnOwner {
        /// Tag naming the owner kind, for diagnostics
        owner_tag: String,
        /// The callable
        func: HandlerFn<C, R>,
    },
}

impl<C, R> HandlerBinding<C, R> {
    /// Canonical rank: static < class < instance
    fn rank(&self) -> u8 {
        match self {
            HandlerBinding::Static(_) => 1,
            HandlerBinding::ClassOnCaller(_) | HandlerBinding::ClassOnOwner { .. } => 2,
            HandlerBinding::InstanceOnCaller(_) | HandlerBinding::InstanceOnOwner { .. } => 3,
        }
    }
}

impl<C, R> Clone for HandlerBinding<C, R> {
    fn clone(&self) -> Self {
        match self {
            HandlerBinding::Static(f) => HandlerBinding::Static(f.clone()),
            HandlerBinding::InstanceOnCaller(f) => HandlerBinding::InstanceOnCaller(f.clone()),
            HandlerBinding::ClassOnCaller(f) => HandlerBinding::ClassOnCaller(f.clone()),
            HandlerBinding::InstanceOnOwner { owner, func } => HandlerBinding::InstanceOnOwner {
                owner: owner.clone(),
                func: func.clone(),
            },
            HandlerBinding::ClassOnOwner { owner_tag, func } => HandlerBinding::ClassOnOwner {
                owner_tag: owner_tag.clone(),
                func: func.clone(),
            },
        }
    }
}

/// Callable shape for caller-bound and static behaviors
pub type HandlerFn<C, R> =
    Arc<dyn Fn(&mut C, &CallArgs) -> Result<R, HandlerError> + Send + Sync>;

/// Callable shape for owner-bound behaviors
pub type OwnerHandlerFn<C, R> =
    Arc<dyn Fn(&(dyn Any + Send + Sync), &mut C, &CallArgs) -> Result<R, HandlerError> + Send + Sync>;

/// What a behavior learns about its invocation.
#[derive(Debug, Clone)]
pub struct CallArgs {
    /// Uid of the caller the dispatch selected on
    pub caller: Uuid,
    /// Kind of the caller
    pub caller_kind: ItemKind,
    /// Task key of the dispatch
    pub task: String,
    /// Extra keyword-style arguments
    pub extras: std::collections::BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new(caller: Uuid, caller_kind: ItemKind, task: impl Into<String>) -> Self {
        Self {
            caller,
            caller_kind,
            task: task.into(),
            extras: std::collections::BTreeMap::new(),
        }
    }

    /// Builder: attach an extra argument
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

/// A callable with dispatch metadata.
pub struct Behavior<C, R> {
    /// Stable identity, echoed in receipts
    pub uid: Uuid,
    /// Optional label for diagnostics
    pub label: Option<String>,
    /// Task key this behavior answers
    pub task: Option<String>,
    /// Invocation priority
    pub priority: HandlerPriority,
    /// Caller-kind bound; `None` accepts any caller
    pub caller_kind: Option<ItemKind>,
    /// Additional selection filters
    pub criteria: Criteria,
    /// Registration index, assigned by the registry
    pub seq: u64,
    /// The callable and its binding pattern
    pub binding: HandlerBinding<C, R>,
}

impl<C, R> Behavior<C, R> {
    /// A statically bound behavior answering `task`
    pub fn new<F>(task: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut C, &CallArgs) -> Result<R, HandlerError> + Send + Sync + 'static,
    {
        Self {
            uid: Uuid::new_v4(),
            label: None,
            task: Some(task.into()),
            priority: HandlerPriority::Normal,
            caller_kind: None,
            criteria: Criteria::any(),
            seq: 0,
            binding: HandlerBinding::Static(Arc::new(func)),
        }
    }

    /// Builder: label for diagnostics
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: set the priority
    pub fn with_priority(mut self, priority: HandlerPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: bind to a caller kind (subtypes included)
    pub fn for_caller(mut self, kind: ItemKind) -> Self {
        self.caller_kind = Some(kind);
        self
    }

    /// Builder: additional selection criteria
    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Builder: replace the binding pattern
    pub fn with_binding(mut self, binding: HandlerBinding<C, R>) -> Self {
        self.binding = binding;
        self
    }

    /// Display name for error reporting
    pub fn name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.uid.simple().to_string()[..8].to_string(),
        }
    }

    /// Selection specificity; an identifier criterion dominates
    pub fn specificity(&self) -> u32 {
        let mut s = self.criteria.specificity();
        if s < 100 && self.caller_kind.is_some() {
            s += 1;
        }
        s
    }

    /// Lattice distance from the caller's kind to this behavior's bound;
    /// unbounded behaviors are treated as farthest.
    pub fn kind_distance(&self, caller_kind: ItemKind) -> u32 {
        match self.caller_kind {
            Some(bound) => caller_kind.distance_to(bound).unwrap_or(u32::MAX),
            None => u32::MAX,
        }
    }

    /// Would this behavior fire for `(caller, task)`?
    pub fn selects(&self, caller: &dyn Entity, task: &str) -> bool {
        if self.task.as_deref() != Some(task) {
            return false;
        }
        if let Some(bound) = self.caller_kind {
            match caller.kind() {
                Some(kind) if kind.is_a(bound) => {}
                _ => return false,
            }
        }
        self.criteria.matches(caller)
    }

    /// Invoke with the binding-appropriate receiver, boxing the result in a
    /// [`CallReceipt`].
    pub fn invoke(&self, ctx: &mut C, args: &CallArgs) -> Result<CallReceipt<R>, HandlerError> {
        let result = match &self.binding {
            HandlerBinding::Static(f)
            | HandlerBinding::InstanceOnCaller(f)
            | HandlerBinding::ClassOnCaller(f)
            | HandlerBinding::ClassOnOwner { func: f, .. } => f(ctx, args),
            HandlerBinding::InstanceOnOwner { owner, func } => func(owner.as_ref(), ctx, args),
        }?;
        Ok(CallReceipt {
            behavior_id: self.uid,
            result,
        })
    }
}

impl<C, R> fmt::Debug for Behavior<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("uid", &self.uid)
            .field("label", &self.label)
            .field("task", &self.task)
            .field("priority", &self.priority)
            .field("caller_kind", &self.caller_kind)
            .field("seq", &self.seq)
            .finish()
    }
}

/// The boxed result of one behavior invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReceipt<R> {
    /// Which behavior produced this result
    pub behavior_id: Uuid,
    /// The raw result
    pub result: R,
}

/// Result types that aggregators can reason about.
///
/// `is_present` marks results that count at all (an absent result is the
/// unit of gathering); `is_truthy` drives the boolean reductions.
pub trait HandlerResult {
    /// Does this result carry anything?
    fn is_present(&self) -> bool {
        true
    }
    /// Boolean reading of the result
    fn is_truthy(&self) -> bool;
}

impl HandlerResult for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl HandlerResult for Value {
    fn is_present(&self) -> bool {
        !self.is_null()
    }
    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }
}

impl<R: HandlerResult> CallReceipt<R> {
    /// All present results, in receipt order
    pub fn gather(receipts: Vec<CallReceipt<R>>) -> Vec<R> {
        receipts
            .into_iter()
            .map(|r| r.result)
            .filter(HandlerResult::is_present)
            .collect()
    }

    /// First present result
    pub fn first_result(receipts: Vec<CallReceipt<R>>) -> Option<R> {
        receipts
            .into_iter()
            .map(|r| r.result)
            .find(HandlerResult::is_present)
    }

    /// Last present result (pipelining: the final compositor wins)
    pub fn last_result(receipts: Vec<CallReceipt<R>>) -> Option<R> {
        receipts
            .into_iter()
            .rev()
            .map(|r| r.result)
            .find(HandlerResult::is_present)
    }

    /// Every present result is truthy; vacuously true
    pub fn all_truthy(receipts: &[CallReceipt<R>]) -> bool {
        receipts
            .iter()
            .filter(|r| r.result.is_present())
            .all(|r| r.result.is_truthy())
    }

    /// Any present result is truthy
    pub fn any_truthy(receipts: &[CallReceipt<R>]) -> bool {
        receipts
            .iter()
            .filter(|r| r.result.is_present())
            .any(|r| r.result.is_truthy())
    }
}

/// Merge mapping results nearest-last: receipts are in canonical order, so
/// later (nearer, more specific) layers overwrite earlier ones.
pub fn merge_layers(layers: Vec<NsLayer>) -> NsLayer {
    let mut out = NsLayer::new();
    for layer in layers {
        out.extend(layer);
    }
    out
}

/// A store of behaviors at one discovery layer.
pub struct HandlerRegistry<C, R> {
    /// Stable identity
    pub uid: Uuid,
    /// Optional label for diagnostics
    pub label: Option<String>,
    /// The discovery layer of every behavior registered here
    pub layer: HandlerLayer,
    /// Task assumed by [`HandlerRegistry::add`] when a behavior has none
    pub default_task: Option<String>,
    behaviors: Vec<Arc<Behavior<C, R>>>,
    next_seq: u64,
}

impl<C, R> HandlerRegistry<C, R> {
    pub fn new(layer: HandlerLayer) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label: None,
            layer,
            default_task: None,
            behaviors: Vec::new(),
            next_seq: 0,
        }
    }

    /// Builder: label for diagnostics
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: default task applied to task-less behaviors
    pub fn with_default_task(mut self, task: impl Into<String>) -> Self {
        self.default_task = Some(task.into());
        self
    }

    /// Add a behavior, assigning its registration seq
    pub fn add(&mut self, mut behavior: Behavior<C, R>) -> Uuid {
        behavior.seq = self.next_seq;
        self.next_seq += 1;
        if behavior.task.is_none() {
            behavior.task = self.default_task.clone();
        }
        let uid = behavior.uid;
        self.behaviors.push(Arc::new(behavior));
        uid
    }

    /// Register a statically bound behavior at normal priority
    pub fn register<F>(&mut self, task: impl Into<String>, func: F) -> Uuid
    where
        F: Fn(&mut C, &CallArgs) -> Result<R, HandlerError> + Send + Sync + 'static,
    {
        self.add(Behavior::new(task, func))
    }

    /// All behaviors selecting `(caller, task)`, registration order
    pub fn find_all(&self, caller: &dyn Entity, task: Option<&str>) -> Vec<Arc<Behavior<C, R>>> {
        let Some(task) = task else {
            return self.behaviors.clone();
        };
        self.behaviors
            .iter()
            .filter(|b| b.selects(caller, task))
            .cloned()
            .collect()
    }

    /// All registered behaviors
    pub fn behaviors(&self) -> &[Arc<Behavior<C, R>>] {
        &self.behaviors
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

impl<C, R> Clone for HandlerRegistry<C, R> {
    fn clone(&self) -> Self {
        Self {
            uid: self.uid,
            label: self.label.clone(),
            layer: self.layer,
            default_task: self.default_task.clone(),
            behaviors: self.behaviors.clone(),
            next_seq: self.next_seq,
        }
    }
}

impl<C, R> fmt::Debug for HandlerRegistry<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("uid", &self.uid)
            .field("label", &self.label)
            .field("layer", &self.layer)
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}

/// A behavior chosen by selection, annotated with where it came from.
pub struct Selected<C, R> {
    /// The chosen behavior
    pub behavior: Arc<Behavior<C, R>>,
    /// Layer of the registry it came from
    pub layer: HandlerLayer,
    /// Position of the registry in the discovery chain (0 = nearest)
    pub origin_dist: u32,
}

impl<C, R> Clone for Selected<C, R> {
    fn clone(&self) -> Self {
        Self {
            behavior: self.behavior.clone(),
            layer: self.layer,
            origin_dist: self.origin_dist,
        }
    }
}

impl<C, R> Selected<C, R> {
    /// The canonical sort key (ascending)
    fn sort_key(&self, caller_kind: ItemKind) -> (u8, u8, u32, u32, u32, u8, Reverse<u64>) {
        (
            self.layer as u8,
            self.behavior.priority as u8,
            self.behavior.specificity(),
            self.origin_dist,
            self.behavior.kind_distance(caller_kind),
            self.behavior.binding.rank(),
            Reverse(self.behavior.seq),
        )
    }
}

/// Select across several registries and sort by the canonical key.
///
/// `registries` is the discovery chain, nearest first; the position of each
/// registry becomes the origin distance of its behaviors.
pub fn chain_select<C, R>(
    registries: &[&HandlerRegistry<C, R>],
    caller: &dyn Entity,
    task: &str,
) -> Vec<Selected<C, R>> {
    let caller_kind = caller.kind().unwrap_or(ItemKind::Node);
    let mut selected = Vec::new();
    for (dist, registry) in registries.iter().enumerate() {
        for behavior in registry.find_all(caller, Some(task)) {
            selected.push(Selected {
                behavior,
                layer: registry.layer,
                origin_dist: dist as u32,
            });
        }
    }
    selected.sort_by_key(|s| s.sort_key(caller_kind));
    selected
}

/// Invoke a selected chain in order, collecting receipts.
///
/// A handler failure stops the chain and surfaces; the step that drove the
/// dispatch must not commit.
pub fn invoke_selected<C, R>(
    selected: &[Selected<C, R>],
    ctx: &mut C,
    args: &CallArgs,
) -> Result<Vec<CallReceipt<R>>, HandlerError> {
    let mut receipts = Vec::with_capacity(selected.len());
    for s in selected {
        receipts.push(s.behavior.invoke(ctx, args)?);
    }
    Ok(receipts)
}

/// A namespace-bearing bundle of behaviors attachable to nodes.
///
/// Domains contribute two things to a scope: their handler registry (at the
/// local layer) and a defaults layer merged into the namespace.
pub struct Domain<C, R> {
    /// Stable identity
    pub uid: Uuid,
    /// Optional label
    pub label: Option<String>,
    /// Tag set
    pub tags: BTreeSet<String>,
    /// Behaviors this domain contributes
    pub handlers: HandlerRegistry<C, R>,
    /// Namespace entries this domain contributes
    pub defaults: NsLayer,
}

impl<C, R> Domain<C, R> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label: Some(label.into()),
            tags: BTreeSet::new(),
            handlers: HandlerRegistry::new(HandlerLayer::Local),
            defaults: NsLayer::new(),
        }
    }

    /// Builder: contribute a namespace default
    pub fn with_default(mut self, key: impl Into<String>, value: crate::ns::NsValue) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }
}

impl<C, R> fmt::Debug for Domain<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("uid", &self.uid)
            .field("label", &self.label)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<C, R> Entity for Domain<C, R> {
    fn uid(&self) -> Uuid {
        self.uid
    }
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}
