//! Requirements: declarative statements of what a dependency needs
//!
//! A [`Requirement`] names a desired provider (by identifier and/or
//! criteria), says how it may be obtained (the [`ProvisioningPolicy`]), and
//! records the outcome once planning runs: either a bound `provider_id` or
//! the sticky `is_unresolvable` flag.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::criteria::{Criteria, Identifier};
use crate::entity::Entity;
use crate::factory::Template;
use crate::graph::{Graph, GraphItem};

/// How a requirement may be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningPolicy {
    /// Must find an existing provider
    Existing,
    /// Must create a new provider from a template
    Create,
    /// Find an existing provider and mutate it to satisfy
    Update,
    /// Copy a referenced item
    Clone,
    /// Prefer an existing provider, create when absent
    Any,
    /// Nothing to do
    Noop,
}

/// What a dependency needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Stable identity, referenced by build receipts
    pub uid: Uuid,

    /// Label; satisfied requirements project into the namespace under it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Desired provider by uid or label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,

    /// Structured match a provider must pass
    #[serde(default, skip_serializing_if = "Criteria::is_empty")]
    pub criteria: Criteria,

    /// Inline recipe for CREATE provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,

    /// Name of a registered template for CREATE provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<String>,

    /// Token reference for token instantiation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_ref: Option<String>,

    /// Item to copy for CLONE provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<Uuid>,

    /// How this requirement may be satisfied
    pub policy: ProvisioningPolicy,

    /// When true, failure to satisfy is a planning error; when false the
    /// requirement may be waived
    #[serde(default = "default_hard")]
    pub hard_requirement: bool,

    /// The node that fulfilled this requirement, once satisfied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<Uuid>,

    /// Sticky flag: planning could not satisfy a hard requirement
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_unresolvable: bool,
}

fn default_hard() -> bool {
    true
}

impl Requirement {
    /// New requirement with the given policy; hard by default
    pub fn new(policy: ProvisioningPolicy) -> Self {
        Self {
            uid: Uuid::new_v4(),
            label: None,
            identifier: None,
            criteria: Criteria::any(),
            template: None,
            template_ref: None,
            token_ref: None,
            reference_id: None,
            policy,
            hard_requirement: true,
            provider_id: None,
            is_unresolvable: false,
        }
    }

    /// Builder: set the label
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: name the desired provider
    pub fn with_identifier(mut self, identifier: impl Into<Identifier>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Builder: set the provider criteria
    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Builder: attach an inline template
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    /// Builder: name a registered template
    pub fn with_template_ref(mut self, name: impl Into<String>) -> Self {
        self.template_ref = Some(name.into());
        self
    }

    /// Builder: set the clone reference
    pub fn with_reference(mut self, reference_id: Uuid) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    /// Builder: make this requirement waivable
    pub fn soft(mut self) -> Self {
        self.hard_requirement = false;
        self
    }

    /// A provider has been bound
    pub fn satisfied(&self) -> bool {
        self.provider_id.is_some()
    }

    /// Would `candidate` satisfy this requirement?
    ///
    /// True iff the identifier (when set) names the candidate, all criteria
    /// match, and — for CLONE policy — the reference resolves in `graph`.
    pub fn satisfied_by(&self, candidate: &GraphItem, graph: &Graph) -> bool {
        if let Some(identifier) = &self.identifier {
            if !identifier.matches(candidate as &dyn Entity) {
                return false;
            }
        }
        if !self.criteria.matches(candidate as &dyn Entity) {
            return false;
        }
        if self.policy == ProvisioningPolicy::Clone {
            match self.reference_id {
                Some(reference) if graph.get(&reference).is_some() => {}
                _ => return false,
            }
        }
        true
    }

    /// Namespace key for the satisfied flag: `"{label}_satisfied"`
    pub fn satisfied_key(&self) -> Option<String> {
        self.label.as_ref().map(|l| format!("{l}_satisfied"))
    }
}
