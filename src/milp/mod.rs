pub mod lp_file;
#[cfg(feature = "lp")]
pub mod relaxation;

use log::warn;

use crate::model::{MilpModel, ModelBuildError, Violation};
use crate::primitives::FVal;

/// Outcome classes of the external mixed-integer solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    OPTIMAL,
    FEASIBLE,
    INFEASIBLE,
    UNBOUNDED,
    ERROR,
}

impl SolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::OPTIMAL => "optimal",
            SolveStatus::FEASIBLE => "feasible",
            SolveStatus::INFEASIBLE => "infeasible",
            SolveStatus::UNBOUNDED => "unbounded",
            SolveStatus::ERROR => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "optimal" => Some(SolveStatus::OPTIMAL),
            "feasible" => Some(SolveStatus::FEASIBLE),
            "infeasible" => Some(SolveStatus::INFEASIBLE),
            "unbounded" => Some(SolveStatus::UNBOUNDED),
            "error" => Some(SolveStatus::ERROR),
            _ => None,
        }
    }
}

/// What a solver hands back across the boundary: a status and, when the
/// status permits, one value per declared variable.
#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolveStatus,
    pub objective: FVal,
    pub values: Vec<FVal>,
}

/// The boundary to the external mixed-integer solver: consume the assembled
/// model, return a status and variable values. Branch-and-bound internals
/// live behind this trait.
pub trait MilpSolver {
    fn solve(&mut self, model: &MilpModel) -> Solution;
}

/// A solver outcome that must not be treated as a schedule. Carries the full
/// LP-format model snapshot for diagnosis.
#[derive(Debug)]
pub enum SolverStatusError {
    NonOptimalStatus {
        status: SolveStatus,
        model_snapshot: String,
    },
    MalformedAssignment {
        error: ModelBuildError,
        model_snapshot: String,
    },
    InvalidAssignment {
        status: SolveStatus,
        violations: Vec<Violation>,
        model_snapshot: String,
    },
}

/// Gate between the solver and the reporter: only optimal/feasible statuses
/// with an assignment that satisfies the constraint set pass through.
pub fn accept_solution(
    model: &MilpModel,
    solution: Solution,
) -> Result<Solution, SolverStatusError> {
    match solution.status {
        SolveStatus::OPTIMAL => {}
        SolveStatus::FEASIBLE => {
            warn!("Solver stopped at a feasible, possibly suboptimal schedule");
        }
        status => {
            return Err(SolverStatusError::NonOptimalStatus {
                status,
                model_snapshot: lp_file::render(model),
            })
        }
    }

    let violations = match model.check(&solution.values) {
        Ok(violations) => violations,
        Err(error) => {
            return Err(SolverStatusError::MalformedAssignment {
                error,
                model_snapshot: lp_file::render(model),
            })
        }
    };
    if !violations.is_empty() {
        return Err(SolverStatusError::InvalidAssignment {
            status: solution.status,
            violations,
            model_snapshot: lp_file::render(model),
        });
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::DemandScenarios;
    use crate::discretize::Discretization;
    use crate::model::build_model;
    use crate::network::TimeExpandedNetwork;
    use crate::test::sample::create_two_city_instance;

    fn model() -> MilpModel {
        let instance = create_two_city_instance();
        let disc = Discretization::new(instance.config.tao).unwrap();
        let network = TimeExpandedNetwork::build(&instance, &disc);
        let scenarios = DemandScenarios::from_averages(2, vec![0.0, 10.0, 10.0, 0.0]);
        build_model(&instance, &network, &scenarios)
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SolveStatus::OPTIMAL,
            SolveStatus::FEASIBLE,
            SolveStatus::INFEASIBLE,
            SolveStatus::UNBOUNDED,
            SolveStatus::ERROR,
        ] {
            assert_eq!(SolveStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SolveStatus::parse("almost"), None);
    }

    #[test]
    fn test_accepts_feasible_zero_assignment() {
        let model = model();
        let solution = Solution {
            status: SolveStatus::OPTIMAL,
            objective: 0.0,
            values: vec![0.0; model.num_vars()],
        };
        assert!(accept_solution(&model, solution).is_ok());
    }

    #[test]
    fn test_rejects_non_optimal_status() {
        let model = model();
        let solution = Solution {
            status: SolveStatus::INFEASIBLE,
            objective: 0.0,
            values: vec![],
        };
        match accept_solution(&model, solution) {
            Err(SolverStatusError::NonOptimalStatus {
                status,
                model_snapshot,
            }) => {
                assert_eq!(status, SolveStatus::INFEASIBLE);
                assert!(model_snapshot.contains("Minimize"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_violating_assignment() {
        let model = model();
        let mut values = vec![0.0; model.num_vars()];
        // Passengers without a bus violate the synchronization constraint.
        let pax = model.var_named("Y_A_B_0").unwrap();
        values[pax.0 as usize] = 5.0;
        let solution = Solution {
            status: SolveStatus::OPTIMAL,
            objective: 0.0,
            values,
        };
        match accept_solution(&model, solution) {
            Err(SolverStatusError::InvalidAssignment { violations, .. }) => {
                assert!(violations.iter().any(|v| v.label == "seat_sync_A_B_0"));
            }
            other => panic!("expected violation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_malformed_assignment() {
        let model = model();
        let solution = Solution {
            status: SolveStatus::OPTIMAL,
            objective: 0.0,
            values: vec![0.0; 3],
        };
        assert!(matches!(
            accept_solution(&model, solution),
            Err(SolverStatusError::MalformedAssignment { .. })
        ));
    }
}
