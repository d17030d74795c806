use std::fmt::Debug;

use log::info;

use crate::col::{map_new, HashMap};
use crate::discretize::Discretization;
use crate::instance::{CityIdx, Instance};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArcIdx(pub u32);
impl Debug for ArcIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("a#{}", self.0))
    }
}

/// Compact address of a service arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub origin: CityIdx,
    pub destination: CityIdx,
    pub depart: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcKind {
    /// A bus in transit between two cities, departing at `depart` and
    /// arriving at `arrive` (strictly before the end of the day).
    Service {
        origin: CityIdx,
        destination: CityIdx,
        depart: u32,
        arrive: u32,
    },
    /// A bus idle at a station between consecutive bins.
    Holding { city: CityIdx, bin: u32 },
    /// Fleet continuity across the day boundary, anchored at bin `taos`.
    Cycling { city: CityIdx },
}

/// The city graph expanded over time bins. Nodes `(city, bin)` stay implicit
/// coordinates; arcs live in one dense arena with per-node adjacency for the
/// service arcs arriving at and departing from each node.
#[derive(Debug)]
pub struct TimeExpandedNetwork {
    arcs: Vec<ArcKind>,
    service_by_key: HashMap<ServiceKey, ArcIdx>,
    holding_offset: usize,
    cycling_offset: usize,
    arriving: Vec<Vec<ArcIdx>>,
    departing: Vec<Vec<ArcIdx>>,
    travel_bins: Vec<u32>,
    num_cities: usize,
    taos: u32,
}

impl TimeExpandedNetwork {
    pub fn build(instance: &Instance, disc: &Discretization) -> Self {
        let n = instance.num_cities();
        let taos = disc.taos();

        let mut travel_bins = vec![0_u32; n * n];
        for (origin, _) in instance.cities() {
            for (destination, _) in instance.cities() {
                if let Some(seconds) = instance.travel_time(origin, destination) {
                    travel_bins[origin.0 as usize * n + destination.0 as usize] =
                        disc.bins(seconds);
                }
            }
        }

        let mut arcs = Vec::new();
        let mut service_by_key = map_new();
        let mut arriving: Vec<Vec<ArcIdx>> = vec![Vec::new(); n * taos as usize];
        let mut departing: Vec<Vec<ArcIdx>> = vec![Vec::new(); n * taos as usize];

        // Service arcs exist only if they arrive strictly before the end of
        // the day; there is no wraparound.
        for (origin, _) in instance.cities() {
            for (destination, _) in instance.cities() {
                if origin == destination {
                    continue;
                }
                let bins = travel_bins[origin.0 as usize * n + destination.0 as usize];
                for depart in 0..taos {
                    let arrive = depart + bins;
                    if arrive >= taos {
                        break;
                    }
                    let idx = ArcIdx(arcs.len() as u32);
                    arcs.push(ArcKind::Service {
                        origin,
                        destination,
                        depart,
                        arrive,
                    });
                    service_by_key.insert(
                        ServiceKey {
                            origin,
                            destination,
                            depart,
                        },
                        idx,
                    );
                    departing[origin.0 as usize * taos as usize + depart as usize].push(idx);
                    arriving[destination.0 as usize * taos as usize + arrive as usize].push(idx);
                }
            }
        }

        let holding_offset = arcs.len();
        for (city, _) in instance.cities() {
            for bin in 0..taos {
                arcs.push(ArcKind::Holding { city, bin });
            }
        }

        let cycling_offset = arcs.len();
        for (city, _) in instance.cities() {
            arcs.push(ArcKind::Cycling { city });
        }

        info!(
            "Time-expanded network: {} service, {} holding, {} cycling arcs over {} bins",
            holding_offset,
            cycling_offset - holding_offset,
            arcs.len() - cycling_offset,
            taos
        );

        Self {
            arcs,
            service_by_key,
            holding_offset,
            cycling_offset,
            arriving,
            departing,
            travel_bins,
            num_cities: n,
            taos,
        }
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }

    pub fn num_service_arcs(&self) -> usize {
        self.holding_offset
    }

    pub fn num_cities(&self) -> usize {
        self.num_cities
    }

    pub fn taos(&self) -> u32 {
        self.taos
    }

    pub fn arc(&self, idx: ArcIdx) -> ArcKind {
        self.arcs[idx.0 as usize]
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcIdx, ArcKind)> + '_ {
        self.arcs
            .iter()
            .enumerate()
            .map(|(i, &kind)| (ArcIdx(i as u32), kind))
    }

    pub fn service_arcs(&self) -> impl Iterator<Item = (ArcIdx, ArcKind)> + '_ {
        self.arcs().take(self.holding_offset)
    }

    pub fn travel_bins(&self, origin: CityIdx, destination: CityIdx) -> u32 {
        self.travel_bins[origin.0 as usize * self.num_cities + destination.0 as usize]
    }

    pub fn service_arc(
        &self,
        origin: CityIdx,
        destination: CityIdx,
        depart: u32,
    ) -> Option<ArcIdx> {
        self.service_by_key
            .get(&ServiceKey {
                origin,
                destination,
                depart,
            })
            .copied()
    }

    pub fn holding_arc(&self, city: CityIdx, bin: u32) -> Option<ArcIdx> {
        if (city.0 as usize) < self.num_cities && bin < self.taos {
            Some(ArcIdx(
                (self.holding_offset + city.0 as usize * self.taos as usize + bin as usize) as u32,
            ))
        } else {
            None
        }
    }

    pub fn cycling_arc(&self, city: CityIdx) -> ArcIdx {
        ArcIdx((self.cycling_offset + city.0 as usize) as u32)
    }

    /// Service arcs arriving at `(city, bin)`.
    pub fn arriving_at(&self, city: CityIdx, bin: u32) -> &[ArcIdx] {
        &self.arriving[city.0 as usize * self.taos as usize + bin as usize]
    }

    /// Service arcs departing from `(city, bin)`.
    pub fn departing_at(&self, city: CityIdx, bin: u32) -> &[ArcIdx] {
        &self.departing[city.0 as usize * self.taos as usize + bin as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretize::Discretization;
    use crate::test::sample::create_two_city_instance;

    #[test]
    fn test_service_arcs_stay_within_the_day() {
        let instance = create_two_city_instance();
        let disc = Discretization::new(instance.config.tao).unwrap();
        let network = TimeExpandedNetwork::build(&instance, &disc);

        let a = instance.city_by_name("A").unwrap();
        let b = instance.city_by_name("B").unwrap();
        assert_eq!(network.travel_bins(a, b), 4);

        // 92 departures per direction: bins 0..=91 arrive before bin 96.
        assert_eq!(network.num_service_arcs(), 2 * 92);
        assert!(network.service_arc(a, b, 91).is_some());
        assert!(network.service_arc(a, b, 92).is_none());
        for (_, kind) in network.service_arcs() {
            match kind {
                ArcKind::Service { arrive, .. } => assert!(arrive < network.taos()),
                other => panic!("not a service arc: {:?}", other),
            }
        }
    }

    #[test]
    fn test_holding_and_cycling_arcs() {
        let instance = create_two_city_instance();
        let disc = Discretization::new(instance.config.tao).unwrap();
        let network = TimeExpandedNetwork::build(&instance, &disc);
        let a = instance.city_by_name("A").unwrap();

        assert_eq!(network.num_arcs(), 2 * 92 + 2 * 96 + 2);
        assert!(network.holding_arc(a, 0).is_some());
        assert!(network.holding_arc(a, 95).is_some());
        assert!(network.holding_arc(a, 96).is_none());

        let cycling: Vec<_> = network
            .arcs()
            .filter(|(_, kind)| matches!(kind, ArcKind::Cycling { .. }))
            .collect();
        assert_eq!(cycling.len(), 2);
        assert_eq!(network.arc(network.cycling_arc(a)), ArcKind::Cycling { city: a });
    }

    #[test]
    fn test_adjacency_matches_arc_coordinates() {
        let instance = create_two_city_instance();
        let disc = Discretization::new(instance.config.tao).unwrap();
        let network = TimeExpandedNetwork::build(&instance, &disc);
        let a = instance.city_by_name("A").unwrap();
        let b = instance.city_by_name("B").unwrap();

        let arc = network.service_arc(a, b, 10).unwrap();
        assert!(network.departing_at(a, 10).contains(&arc));
        assert!(network.arriving_at(b, 14).contains(&arc));
        assert!(network.arriving_at(b, 3).is_empty());
    }
}
