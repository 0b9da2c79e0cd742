//! Typed dependency resolution: offers, provisioners, and planning
//!
//! Requirements declare what the frontier needs; provisioners propose
//! offers; the planning pipeline selects and accepts them by cost. See
//! [`planning`] for the four-stage wiring.

pub mod offers;
pub mod planning;
pub mod provisioner;
pub mod receipt;

pub use offers::{
    proximity_between, AffordanceOffer, CustomAcceptor, DependencyOffer, OfferAction,
    ProvisionCost, ProvisionOffer,
};
pub use planning::register_planning_behaviors;
pub use provisioner::{
    default_provisioners, CloningProvisioner, GraphProvisioner, Provisioner, ProvisionerHandle,
    TemplateProvisioner, UpdatingProvisioner,
};
pub use receipt::{BuildReceipt, PlanningReceipt};

use uuid::Uuid;

/// Addressing key for collected offers.
///
/// Affordance offers broadcast to the whole frontier; dependency offers are
/// unicast to one dependency edge; affordance-carried requirements that
/// themselves need provisioning get their own fallback key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OfferKey {
    /// Affordance offers addressed at whatever frontier matches
    Broadcast,
    /// Offers for the requirement of one dependency edge
    Dependency(Uuid),
    /// Fallback offers for an affordance-published requirement
    AffordanceRequirement(Uuid),
}
