//! The ordered phase pipeline of one resolution step
//!
//! A frame resolves one cursor move by running the phases in enum order and
//! reducing each phase's call receipts with a phase-specific aggregator:
//!
//! | Phase      | Aggregator   | Outcome                                 |
//! |------------|--------------|-----------------------------------------|
//! | `Init`     | —            | sentinel, not run                       |
//! | `Discover` | —            | context construction hook, not run      |
//! | `Validate` | all-truthy   | reject an illegal cursor                |
//! | `Planning` | last result  | a `PlanningReceipt`                     |
//! | `Prereqs`  | first result | an optional redirect edge               |
//! | `Update`   | gather       | in-place state mutation                 |
//! | `Journal`  | last result  | the composed fragment list              |
//! | `Finalize` | last result  | the committed `Patch`, if event-sourced |
//! | `Postreqs` | first result | an optional redirect edge               |

use serde::{Deserialize, Serialize};

use fabula_core::graph::TriggerPhase;

/// Phases of a single resolution step, values in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ResolutionPhase {
    /// Not started; never runs
    Init = 0,
    /// Context/capability discovery hook; reserved, never runs
    Discover = 10,
    /// Confirm the proposed cursor is legal
    Validate = 20,
    /// Resolve dependencies and affordances on the frontier
    Planning = 30,
    /// Redirect before state mutation
    Prereqs = 40,
    /// Mutate state in place
    Update = 50,
    /// Compose the user-visible journal entry
    Journal = 60,
    /// Commit events; cleanup
    Finalize = 70,
    /// Redirect before returning control
    Postreqs = 80,
}

/// How a phase reduces its receipts to one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// The phase never runs
    NotRun,
    /// Every present result must be truthy (vacuously true)
    AllTruthy,
    /// All present results, in canonical order
    Gather,
    /// The first present result, if any
    FirstResult,
    /// The last present result — the final compositor wins
    LastResult,
}

impl ResolutionPhase {
    /// All phases in execution order
    pub fn ordered() -> [ResolutionPhase; 9] {
        [
            ResolutionPhase::Init,
            ResolutionPhase::Discover,
            ResolutionPhase::Validate,
            ResolutionPhase::Planning,
            ResolutionPhase::Prereqs,
            ResolutionPhase::Update,
            ResolutionPhase::Journal,
            ResolutionPhase::Finalize,
            ResolutionPhase::Postreqs,
        ]
    }

    /// Dispatch task key for this phase
    pub fn task(self) -> &'static str {
        match self {
            ResolutionPhase::Init => "init",
            ResolutionPhase::Discover => "discover",
            ResolutionPhase::Validate => "validate",
            ResolutionPhase::Planning => "planning",
            ResolutionPhase::Prereqs => "prereqs",
            ResolutionPhase::Update => "update",
            ResolutionPhase::Journal => "journal",
            ResolutionPhase::Finalize => "finalize",
            ResolutionPhase::Postreqs => "postreqs",
        }
    }

    /// Aggregation policy for this phase
    pub fn aggregation(self) -> Aggregation {
        match self {
            ResolutionPhase::Init | ResolutionPhase::Discover => Aggregation::NotRun,
            ResolutionPhase::Validate => Aggregation::AllTruthy,
            ResolutionPhase::Planning => Aggregation::LastResult,
            ResolutionPhase::Prereqs => Aggregation::FirstResult,
            ResolutionPhase::Update => Aggregation::Gather,
            ResolutionPhase::Journal => Aggregation::LastResult,
            ResolutionPhase::Finalize => Aggregation::LastResult,
            ResolutionPhase::Postreqs => Aggregation::FirstResult,
        }
    }

    /// The phase an auto-firing edge trigger names
    pub fn from_trigger(trigger: TriggerPhase) -> Self {
        match trigger {
            TriggerPhase::Prereqs => ResolutionPhase::Prereqs,
            TriggerPhase::Postreqs => ResolutionPhase::Postreqs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered_by_value() {
        let phases = ResolutionPhase::ordered();
        for pair in phases.windows(2) {
            assert!((pair[0] as u8) < (pair[1] as u8));
        }
    }

    #[test]
    fn sentinels_do_not_run() {
        assert_eq!(ResolutionPhase::Init.aggregation(), Aggregation::NotRun);
        assert_eq!(ResolutionPhase::Discover.aggregation(), Aggregation::NotRun);
    }

    #[test]
    fn trigger_mapping() {
        assert_eq!(
            ResolutionPhase::from_trigger(TriggerPhase::Prereqs),
            ResolutionPhase::Prereqs
        );
        assert_eq!(
            ResolutionPhase::from_trigger(TriggerPhase::Postreqs),
            ResolutionPhase::Postreqs
        );
    }
}
