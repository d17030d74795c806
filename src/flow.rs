use std::fmt::Write;

use crate::instance::Instance;
use crate::model::MilpModel;
use crate::network::{ArcIdx, ArcKind, TimeExpandedNetwork};
use crate::primitives::{EPS, FVal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcFlow {
    pub arc: ArcIdx,
    pub kind: ArcKind,
    pub bus: FVal,
    pub passengers: FVal,
}

/// The nonzero part of a validated assignment: every service, holding, and
/// cycling arc that carries bus or passenger flow, ordered for display.
#[derive(Debug)]
pub struct ScheduleFlow {
    flows: Vec<ArcFlow>,
}

fn sort_key(kind: &ArcKind) -> (u32, u32, u32, u32) {
    match *kind {
        ArcKind::Service {
            origin,
            destination,
            depart,
            ..
        } => (origin.0, 0, depart, destination.0),
        ArcKind::Holding { city, bin } => (city.0, 1, bin, city.0),
        ArcKind::Cycling { city } => (city.0, 2, u32::MAX, city.0),
    }
}

impl ScheduleFlow {
    pub fn extract(
        model: &MilpModel,
        network: &TimeExpandedNetwork,
        values: &[FVal],
    ) -> Self {
        let mut flows = Vec::new();
        for (arc_idx, kind) in network.arcs() {
            let bus_var = model.bus_var(arc_idx).expect("arc taken from the network");
            let bus = values[bus_var.0 as usize];
            let passengers = match model.passenger_var(arc_idx) {
                Ok(var) => values[var.0 as usize],
                Err(_) => 0.0,
            };
            if bus.abs() > EPS || passengers.abs() > EPS {
                flows.push(ArcFlow {
                    arc: arc_idx,
                    kind,
                    bus,
                    passengers,
                });
            }
        }
        flows.sort_by_key(|flow| sort_key(&flow.kind));
        Self { flows }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArcFlow> {
        self.flows.iter()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn describe(&self, instance: &Instance, network: &TimeExpandedNetwork) -> String {
        let mut out = String::new();
        if self.flows.is_empty() {
            writeln!(out, "No nonzero flows.").unwrap();
            return out;
        }
        for flow in &self.flows {
            match flow.kind {
                ArcKind::Service {
                    origin,
                    destination,
                    depart,
                    ..
                } => writeln!(
                    out,
                    "{} -> {} @ {}: {} bus, {} passengers",
                    instance.city(origin).name,
                    instance.city(destination).name,
                    depart,
                    flow.bus,
                    flow.passengers,
                )
                .unwrap(),
                ArcKind::Holding { city, bin } => writeln!(
                    out,
                    "{} holds @ {}: {} bus",
                    instance.city(city).name,
                    bin,
                    flow.bus,
                )
                .unwrap(),
                ArcKind::Cycling { city } => writeln!(
                    out,
                    "{} carries over @ {}: {} bus",
                    instance.city(city).name,
                    network.taos(),
                    flow.bus,
                )
                .unwrap(),
            }
        }
        out
    }
}
