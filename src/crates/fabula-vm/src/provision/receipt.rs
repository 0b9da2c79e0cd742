//! Build and planning receipts
//!
//! Every acceptance attempt — success or failure — produces exactly one
//! [`BuildReceipt`]. The LAST planning handler reduces the step's receipts
//! into a single [`PlanningReceipt`], which is what the PLANNING phase
//! resolves to.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fabula_core::requirement::ProvisioningPolicy;

/// The outcome of one offer acceptance attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReceipt {
    /// Name of the provisioner whose offer was tried, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,

    /// The requirement the attempt was for
    pub requirement_id: Uuid,

    /// The provider that satisfied it, on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<Uuid>,

    /// The operation the winning (or failing) offer carried
    pub operation: ProvisioningPolicy,

    /// Whether the acceptance succeeded
    pub accepted: bool,

    /// Whether the requirement was hard
    pub hard_req: bool,

    /// Failure description, for rejected attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BuildReceipt {
    /// A successful acceptance
    pub fn accepted(
        provisioner: Option<String>,
        requirement_id: Uuid,
        provider_id: Uuid,
        operation: ProvisioningPolicy,
        hard_req: bool,
    ) -> Self {
        Self {
            provisioner,
            requirement_id,
            provider_id: Some(provider_id),
            operation,
            accepted: true,
            hard_req,
            reason: None,
        }
    }

    /// A failed acceptance
    pub fn failed(
        provisioner: Option<String>,
        requirement_id: Uuid,
        operation: ProvisioningPolicy,
        hard_req: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provisioner,
            requirement_id,
            provider_id: None,
            operation,
            accepted: false,
            hard_req,
            reason: Some(reason.into()),
        }
    }
}

/// The summarized outcome of one planning phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningReceipt {
    /// Existing providers linked
    pub attached: u32,
    /// Providers created (templates materialized or references cloned)
    pub created: u32,
    /// Providers mutated to satisfy
    pub updated: u32,
    /// Soft requirements left unsatisfied, without error
    pub waived_soft_requirements: Vec<Uuid>,
    /// Hard requirements left unsatisfied
    pub unresolved_hard_requirements: Vec<Uuid>,
    /// True when any hard requirement went unresolved
    pub softlock_detected: bool,
}

impl PlanningReceipt {
    /// Reduce a step's build receipts into one summary.
    pub fn summarize(builds: &[BuildReceipt]) -> Self {
        let mut receipt = PlanningReceipt::default();
        for build in builds {
            if build.accepted {
                match build.operation {
                    ProvisioningPolicy::Create | ProvisioningPolicy::Clone => {
                        receipt.created += 1
                    }
                    ProvisioningPolicy::Update => receipt.updated += 1,
                    _ => receipt.attached += 1,
                }
            } else if build.hard_req {
                if !receipt
                    .unresolved_hard_requirements
                    .contains(&build.requirement_id)
                {
                    receipt
                        .unresolved_hard_requirements
                        .push(build.requirement_id);
                }
            } else if !receipt
                .waived_soft_requirements
                .contains(&build.requirement_id)
            {
                receipt.waived_soft_requirements.push(build.requirement_id);
            }
        }
        receipt.softlock_detected = !receipt.unresolved_hard_requirements.is_empty();
        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_has_zero_counts() {
        let receipt = PlanningReceipt::summarize(&[]);
        assert_eq!(receipt.attached, 0);
        assert_eq!(receipt.created, 0);
        assert_eq!(receipt.updated, 0);
        assert!(!receipt.softlock_detected);
    }

    #[test]
    fn summary_buckets_by_operation_and_hardness() {
        let req_hard = Uuid::new_v4();
        let req_soft = Uuid::new_v4();
        let builds = vec![
            BuildReceipt::accepted(None, Uuid::new_v4(), Uuid::new_v4(), ProvisioningPolicy::Existing, true),
            BuildReceipt::accepted(None, Uuid::new_v4(), Uuid::new_v4(), ProvisioningPolicy::Create, true),
            BuildReceipt::accepted(None, Uuid::new_v4(), Uuid::new_v4(), ProvisioningPolicy::Update, false),
            BuildReceipt::failed(None, req_hard, ProvisioningPolicy::Noop, true, "no_offers"),
            BuildReceipt::failed(None, req_soft, ProvisioningPolicy::Noop, false, "no_offers"),
        ];
        let receipt = PlanningReceipt::summarize(&builds);
        assert_eq!(receipt.attached, 1);
        assert_eq!(receipt.created, 1);
        assert_eq!(receipt.updated, 1);
        assert_eq!(receipt.unresolved_hard_requirements, vec![req_hard]);
        assert_eq!(receipt.waived_soft_requirements, vec![req_soft]);
        assert!(receipt.softlock_detected);
    }
}
