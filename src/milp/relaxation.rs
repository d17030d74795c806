//! In-process backend solving the continuous relaxation of the flow model
//! with `good_lp`'s pure-Rust `minilp` solver.
//!
//! The underlying solver handles linear programs only, so integrality is
//! relaxed: returned bus counts may be fractional. The intended production
//! path stays `write-lp` plus an external mixed-integer solver; this backend
//! exists for self-contained runs and tests.

use std::time::Duration;

use good_lp::*;
use good_lp::Solution as _;
use log::{info, warn};

use crate::milp::{MilpSolver, Solution, SolveStatus};
use crate::model::{ConstrSense, MilpModel};
use crate::primitives::FVal;

pub struct RelaxationSolver {
    /// Advisory only: the underlying solver exposes no interruption hook, so
    /// the limit is not enforced. MILP solve time is not bounded by input
    /// size; external solvers enforce their own limits.
    pub time_limit: Duration,
}

impl Default for RelaxationSolver {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
        }
    }
}

impl MilpSolver for RelaxationSolver {
    fn solve(&mut self, model: &MilpModel) -> Solution {
        let mut problem = ProblemVariables::new();
        let lp_vars: Vec<Variable> = model
            .vars()
            .map(|(_, var)| {
                let mut definition = variable().min(var.lower);
                if var.upper.is_finite() {
                    definition = definition.max(var.upper);
                }
                problem.add(definition)
            })
            .collect();

        let objective: Expression = model
            .objective()
            .terms
            .iter()
            .map(|&(var, coeff)| coeff * lp_vars[var.0 as usize])
            .sum();

        let mut lp = problem.minimise(objective).using(default_solver);
        for constr in model.constraints() {
            let lhs: Expression = constr
                .expr
                .terms
                .iter()
                .map(|&(var, coeff)| coeff * lp_vars[var.0 as usize])
                .sum();
            let rhs = constr.rhs;
            lp = lp.with(match constr.sense {
                ConstrSense::LEQ => constraint!(lhs <= rhs),
                ConstrSense::EQ => constraint!(lhs == rhs),
                ConstrSense::GEQ => constraint!(lhs >= rhs),
            });
        }

        match lp.solve() {
            Ok(solved) => {
                let values: Vec<FVal> =
                    lp_vars.iter().map(|&var| solved.value(var)).collect();
                let objective = model.objective_value(&values);
                info!("Relaxation solved, objective {}", objective);
                Solution {
                    status: SolveStatus::OPTIMAL,
                    objective,
                    values,
                }
            }
            Err(ResolutionError::Infeasible) => Solution {
                status: SolveStatus::INFEASIBLE,
                objective: 0.0,
                values: vec![],
            },
            Err(ResolutionError::Unbounded) => Solution {
                status: SolveStatus::UNBOUNDED,
                objective: 0.0,
                values: vec![],
            },
            Err(err) => {
                warn!("Relaxation solver failed: {:?}", err);
                Solution {
                    status: SolveStatus::ERROR,
                    objective: 0.0,
                    values: vec![],
                }
            }
        }
    }
}
