use std::fmt::Debug;

use log::info;

use crate::col::{map_with_capacity, HashMap};
use crate::demand::DemandScenarios;
use crate::instance::Instance;
use crate::network::{ArcIdx, ArcKind, TimeExpandedNetwork};
use crate::primitives::{EPS, FVal};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarIdx(pub u32);
impl Debug for VarIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("v#{}", self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstrSense {
    LEQ,
    EQ,
    GEQ,
}

#[derive(Debug, Clone)]
pub struct VarPayload {
    pub name: String,
    pub lower: FVal,
    /// `FVal::INFINITY` if unbounded above.
    pub upper: FVal,
    pub integer: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LinExpr {
    pub terms: Vec<(VarIdx, FVal)>,
}

impl LinExpr {
    pub fn add(&mut self, var: VarIdx, coeff: FVal) {
        self.terms.push((var, coeff));
    }

    pub fn value(&self, assignment: &[FVal]) -> FVal {
        self.terms
            .iter()
            .map(|&(var, coeff)| coeff * assignment[var.0 as usize])
            .sum()
    }

    /// Terms with duplicate variables folded and zero coefficients dropped,
    /// in first-appearance order. Used at emission boundaries; the raw term
    /// list keeps the constraints exactly as assembled.
    pub fn canonical_terms(&self) -> Vec<(VarIdx, FVal)> {
        let mut order: Vec<VarIdx> = Vec::with_capacity(self.terms.len());
        let mut coeff_by_var: HashMap<VarIdx, FVal> = map_with_capacity(self.terms.len());
        for &(var, coeff) in &self.terms {
            match coeff_by_var.entry(var) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    *entry.get_mut() += coeff;
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(coeff);
                    order.push(var);
                }
            }
        }
        order
            .into_iter()
            .map(|var| (var, coeff_by_var[&var]))
            .filter(|&(_, coeff)| coeff != 0.0)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub label: String,
    pub expr: LinExpr,
    pub sense: ConstrSense,
    pub rhs: FVal,
}

/// One unsatisfied constraint or variable bound at a candidate assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub label: String,
    pub lhs: FVal,
    pub sense: ConstrSense,
    pub rhs: FVal,
}

#[derive(Debug)]
pub enum ModelBuildError {
    NoSuchArc { arc: ArcIdx },
    NoPassengerVariable { arc: ArcIdx },
    AssignmentLengthMismatch { expected: usize, actual: usize },
}

/// The assembled mixed-integer flow model: one bus variable per arc, one
/// passenger variable per service arc, the labeled constraint set, and the
/// net-revenue objective (minimized).
#[derive(Debug)]
pub struct MilpModel {
    vars: Vec<VarPayload>,
    constraints: Vec<Constraint>,
    objective: LinExpr,
    bus_var_by_arc: Vec<VarIdx>,
    pax_var_by_arc: Vec<Option<VarIdx>>,
    var_by_name: HashMap<String, VarIdx>,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn build_model(
    instance: &Instance,
    network: &TimeExpandedNetwork,
    scenarios: &DemandScenarios,
) -> MilpModel {
    let n = instance.num_cities();
    let taos = network.taos();
    let config = &instance.config;
    let seats_per_bus = config.capacity_per_bus as FVal * config.seat_utilization;

    let city_label: Vec<String> = instance
        .cities()
        .map(|(_, city)| sanitize(&city.name))
        .collect();

    // Per-pair unit operating cost and fare revenue, both proportional to
    // travel duration.
    let mut unit_cost = vec![0.0; n * n];
    let mut unit_revenue = vec![0.0; n * n];
    for (origin, _) in instance.cities() {
        for (destination, _) in instance.cities() {
            if let Some(seconds) = instance.travel_time(origin, destination) {
                let cell = origin.0 as usize * n + destination.0 as usize;
                unit_cost[cell] = seconds as FVal * config.cost_per_hour / 3600.0;
                unit_revenue[cell] = seconds as FVal * config.revenue_per_hour / 3600.0;
            }
        }
    }

    let mut vars: Vec<VarPayload> = Vec::with_capacity(network.num_arcs() * 2);
    let mut bus_var_by_arc: Vec<VarIdx> = Vec::with_capacity(network.num_arcs());
    let mut pax_var_by_arc: Vec<Option<VarIdx>> = vec![None; network.num_arcs()];

    for (_, kind) in network.arcs() {
        let var_idx = VarIdx(vars.len() as u32);
        let payload = match kind {
            ArcKind::Service {
                origin,
                destination,
                depart,
                ..
            } => VarPayload {
                name: format!(
                    "X_{}_{}_{}",
                    city_label[origin.0 as usize], city_label[destination.0 as usize], depart
                ),
                lower: 0.0,
                upper: 1.0,
                integer: true,
            },
            // Holding and cycling variables carry bus counts, capped by the
            // station's capacity; only in-transit buses are binary.
            ArcKind::Holding { city, bin } => VarPayload {
                name: format!("X_{0}_{0}_{1}", city_label[city.0 as usize], bin),
                lower: 0.0,
                upper: instance.city(city).station_capacity as FVal,
                integer: true,
            },
            ArcKind::Cycling { city } => VarPayload {
                name: format!("X_{0}_{0}_{1}", city_label[city.0 as usize], taos),
                lower: 0.0,
                upper: instance.city(city).station_capacity as FVal,
                integer: true,
            },
        };
        vars.push(payload);
        bus_var_by_arc.push(var_idx);
    }

    for (arc_idx, kind) in network.service_arcs() {
        let ArcKind::Service {
            origin,
            destination,
            depart,
            ..
        } = kind
        else {
            continue;
        };
        let var_idx = VarIdx(vars.len() as u32);
        vars.push(VarPayload {
            name: format!(
                "Y_{}_{}_{}",
                city_label[origin.0 as usize], city_label[destination.0 as usize], depart
            ),
            lower: 0.0,
            upper: FVal::INFINITY,
            integer: true,
        });
        pax_var_by_arc[arc_idx.0 as usize] = Some(var_idx);
    }

    let mut constraints: Vec<Constraint> = Vec::new();

    // Station capacity: holding flow never exceeds the station's bus capacity.
    for (city, payload) in instance.cities() {
        for bin in 0..taos {
            let holding = network.holding_arc(city, bin).expect("bin in range");
            let mut expr = LinExpr::default();
            expr.add(bus_var_by_arc[holding.0 as usize], 1.0);
            constraints.push(Constraint {
                label: format!("station_cap_{}_{}", city_label[city.0 as usize], bin),
                expr,
                sense: ConstrSense::LEQ,
                rhs: payload.station_capacity as FVal,
            });
        }
    }

    // Node-level bus conservation: service arrivals plus the held bus mass
    // balance service departures plus the same held bus mass at every
    // (city, bin). The holding variable enters both sides of the balance.
    for (city, _) in instance.cities() {
        for bin in 0..taos {
            let holding = network.holding_arc(city, bin).expect("bin in range");
            let mut expr = LinExpr::default();
            for &arc in network.arriving_at(city, bin) {
                expr.add(bus_var_by_arc[arc.0 as usize], 1.0);
            }
            expr.add(bus_var_by_arc[holding.0 as usize], 1.0);
            for &arc in network.departing_at(city, bin) {
                expr.add(bus_var_by_arc[arc.0 as usize], -1.0);
            }
            expr.add(bus_var_by_arc[holding.0 as usize], -1.0);
            constraints.push(Constraint {
                label: format!("bus_balance_{}_{}", city_label[city.0 as usize], bin),
                expr,
                sense: ConstrSense::EQ,
                rhs: 0.0,
            });
        }
    }

    // Fleet-level cycling conservation: the buses carried across the day
    // boundary never exceed the fleet size.
    {
        let mut expr = LinExpr::default();
        for (city, _) in instance.cities() {
            let cycling = network.cycling_arc(city);
            expr.add(bus_var_by_arc[cycling.0 as usize], 1.0);
        }
        constraints.push(Constraint {
            label: "fleet_cycle_cap".into(),
            expr,
            sense: ConstrSense::LEQ,
            rhs: config.fleet_size as FVal,
        });
    }

    // Passenger-bus synchronization: a bus must run for passengers to ride.
    for (arc_idx, kind) in network.service_arcs() {
        let ArcKind::Service {
            origin,
            destination,
            depart,
            ..
        } = kind
        else {
            continue;
        };
        let pax = pax_var_by_arc[arc_idx.0 as usize].expect("service arc has passenger var");
        let mut expr = LinExpr::default();
        expr.add(pax, 1.0);
        expr.add(bus_var_by_arc[arc_idx.0 as usize], -seats_per_bus);
        constraints.push(Constraint {
            label: format!(
                "seat_sync_{}_{}_{}",
                city_label[origin.0 as usize], city_label[destination.0 as usize], depart
            ),
            expr,
            sense: ConstrSense::LEQ,
            rhs: 0.0,
        });
    }

    // Daily demand cap: total passenger flow per ordered pair stays below
    // the scenario-average demand. Pairs whose travel time exceeds the
    // horizon legitimately have no service arcs and an empty left-hand side.
    for (origin, _) in instance.cities() {
        for (destination, _) in instance.cities() {
            if origin == destination {
                continue;
            }
            let mut expr = LinExpr::default();
            for depart in 0..taos {
                if let Some(arc) = network.service_arc(origin, destination, depart) {
                    let pax = pax_var_by_arc[arc.0 as usize].expect("service arc");
                    expr.add(pax, 1.0);
                }
            }
            constraints.push(Constraint {
                label: format!(
                    "daily_demand_{}_{}",
                    city_label[origin.0 as usize], city_label[destination.0 as usize]
                ),
                expr,
                sense: ConstrSense::LEQ,
                rhs: scenarios.average(origin, destination),
            });
        }
    }

    // Objective: operating cost net of fare revenue, minimized.
    let mut objective = LinExpr::default();
    for (arc_idx, kind) in network.service_arcs() {
        let ArcKind::Service {
            origin,
            destination,
            ..
        } = kind
        else {
            continue;
        };
        let cell = origin.0 as usize * n + destination.0 as usize;
        objective.add(bus_var_by_arc[arc_idx.0 as usize], unit_cost[cell]);
        let pax = pax_var_by_arc[arc_idx.0 as usize].expect("service arc");
        objective.add(pax, -unit_revenue[cell]);
    }

    let var_by_name = vars
        .iter()
        .enumerate()
        .map(|(i, v)| (v.name.clone(), VarIdx(i as u32)))
        .collect();

    info!(
        "Flow model: {} variables, {} constraints",
        vars.len(),
        constraints.len()
    );

    MilpModel {
        vars,
        constraints,
        objective,
        bus_var_by_arc,
        pax_var_by_arc,
        var_by_name,
    }
}

impl MilpModel {
    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn vars(&self) -> impl Iterator<Item = (VarIdx, &VarPayload)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarIdx(i as u32), v))
    }

    pub fn var(&self, idx: VarIdx) -> &VarPayload {
        &self.vars[idx.0 as usize]
    }

    pub fn var_named(&self, name: &str) -> Option<VarIdx> {
        self.var_by_name.get(name).copied()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint_labeled(&self, label: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.label == label)
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    pub fn objective_value(&self, assignment: &[FVal]) -> FVal {
        self.objective.value(assignment)
    }

    pub fn bus_var(&self, arc: ArcIdx) -> Result<VarIdx, ModelBuildError> {
        self.bus_var_by_arc
            .get(arc.0 as usize)
            .copied()
            .ok_or(ModelBuildError::NoSuchArc { arc })
    }

    pub fn passenger_var(&self, arc: ArcIdx) -> Result<VarIdx, ModelBuildError> {
        self.pax_var_by_arc
            .get(arc.0 as usize)
            .copied()
            .ok_or(ModelBuildError::NoSuchArc { arc })?
            .ok_or(ModelBuildError::NoPassengerVariable { arc })
    }

    /// Evaluates every constraint and variable bound at the assignment and
    /// returns the unsatisfied ones.
    pub fn check(&self, assignment: &[FVal]) -> Result<Vec<Violation>, ModelBuildError> {
        if assignment.len() != self.vars.len() {
            return Err(ModelBuildError::AssignmentLengthMismatch {
                expected: self.vars.len(),
                actual: assignment.len(),
            });
        }
        let mut violations = Vec::new();
        for (idx, var) in self.vars.iter().enumerate() {
            let value = assignment[idx];
            if value < var.lower - EPS {
                violations.push(Violation {
                    label: format!("lower_bound({})", var.name),
                    lhs: value,
                    sense: ConstrSense::GEQ,
                    rhs: var.lower,
                });
            }
            if value > var.upper + EPS {
                violations.push(Violation {
                    label: format!("upper_bound({})", var.name),
                    lhs: value,
                    sense: ConstrSense::LEQ,
                    rhs: var.upper,
                });
            }
        }
        for constraint in &self.constraints {
            let lhs = constraint.expr.value(assignment);
            let satisfied = match constraint.sense {
                ConstrSense::LEQ => lhs <= constraint.rhs + EPS,
                ConstrSense::EQ => (lhs - constraint.rhs).abs() <= EPS,
                ConstrSense::GEQ => lhs >= constraint.rhs - EPS,
            };
            if !satisfied {
                violations.push(Violation {
                    label: constraint.label.clone(),
                    lhs,
                    sense: constraint.sense,
                    rhs: constraint.rhs,
                });
            }
        }
        Ok(violations)
    }

    /// Integer variables whose value is not integral within tolerance.
    /// Reported separately from [`check`](Self::check) so that relaxed
    /// solutions can be surfaced as warnings rather than hard failures.
    pub fn integrality_violations(&self, assignment: &[FVal]) -> Vec<(VarIdx, FVal)> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, var)| var.integer)
            .map(|(i, _)| (VarIdx(i as u32), assignment[i]))
            .filter(|&(_, value)| (value - value.round()).abs() > EPS)
            .collect()
    }
}
