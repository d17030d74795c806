use std::fmt::Debug;

use serde::Deserialize;

use crate::col::{map_with_capacity, HashMap};
use crate::primitives::{FVal, Time};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CityIdx(pub u32);
impl Debug for CityIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("c#{}", self.0))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CityRow {
    #[serde(rename = "# name")]
    pub name: String,
    pub population: u64,
    pub station_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TravelTimeRow {
    #[serde(rename = "# origin")]
    pub origin: String,
    pub destination: String,
    pub seconds: Time,
}

/// Calibration constants of the gravity model, taken from one observed
/// city pair: the expected trip count between two cities scales with the
/// product of their populations, normalized by the reference pair.
#[derive(Debug, Clone, PartialEq)]
pub struct GravityCalibration {
    pub ref_population_a: u64,
    pub ref_population_b: u64,
    pub baseline_trips: FVal,
    pub observed_mean: FVal,
    pub observed_std: FVal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarrierConfig {
    /// Width of a time bin, in seconds. Must divide a day evenly.
    pub tao: Time,
    /// Number of demand samples per ordered city pair.
    pub scenario_count: usize,
    pub fleet_size: u32,
    pub capacity_per_bus: u32,
    pub seat_utilization: FVal,
    pub cost_per_hour: FVal,
    pub revenue_per_hour: FVal,
    /// Truncation bounds of the demand distribution, as factors of the mean.
    pub demand_lower_bound: FVal,
    pub demand_upper_bound: FVal,
    pub gravity: GravityCalibration,
    pub sample_seed: u64,
}

pub const DEFAULT_SAMPLE_SEED: u64 = 2023;

#[derive(Debug)]
pub enum ConfigError {
    Csv(csv::Error),
    MissingKey(Box<str>),
    InvalidValue(Box<str>),
    EmptyCitySet,
    DuplicateCity { name: String },
    UnknownCity { name: String },
    SelfLoopTravelTime { city: String },
    DuplicateTravelTime { origin: String, destination: String },
    MissingTravelTime { origin: String, destination: String },
    TaoDoesNotDivideDay { tao: Time },
}

fn reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).delimiter(b';');

    builder
}

pub fn parse_cities(stream: impl std::io::Read) -> Result<Box<[CityRow]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}

pub fn parse_travel_times(
    stream: impl std::io::Read,
) -> Result<Box<[TravelTimeRow]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}

fn take(
    map: &mut std::collections::HashMap<String, String>,
    key: &str,
) -> Result<String, ConfigError> {
    map.remove(key).ok_or_else(|| ConfigError::MissingKey(key.into()))
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_e| {
        ConfigError::InvalidValue(format!("Could not parse value of {}!", key).into())
    })
}

fn take_parsed<T: std::str::FromStr>(
    map: &mut std::collections::HashMap<String, String>,
    key: &str,
) -> Result<T, ConfigError> {
    let value = take(map, key)?;
    parse_value(key, &value)
}

/// Builds a [`CarrierConfig`] from raw key/value pairs. Shared between the
/// CSV config parser and the sqlite instance import.
pub fn config_from_key_values(
    mut map: std::collections::HashMap<String, String>,
) -> Result<CarrierConfig, ConfigError> {
    let sample_seed = match map.remove("sample_seed") {
        Some(value) => parse_value("sample_seed", &value)?,
        None => DEFAULT_SAMPLE_SEED,
    };
    Ok(CarrierConfig {
        tao: take_parsed(&mut map, "tao")?,
        scenario_count: take_parsed(&mut map, "scenario_count")?,
        fleet_size: take_parsed(&mut map, "fleet_size")?,
        capacity_per_bus: take_parsed(&mut map, "capacity_per_bus")?,
        seat_utilization: take_parsed(&mut map, "seat_utilization")?,
        cost_per_hour: take_parsed(&mut map, "cost_per_hour")?,
        revenue_per_hour: take_parsed(&mut map, "revenue_per_hour")?,
        demand_lower_bound: take_parsed(&mut map, "demand_lower_bound")?,
        demand_upper_bound: take_parsed(&mut map, "demand_upper_bound")?,
        gravity: GravityCalibration {
            ref_population_a: take_parsed(&mut map, "gravity_ref_population_a")?,
            ref_population_b: take_parsed(&mut map, "gravity_ref_population_b")?,
            baseline_trips: take_parsed(&mut map, "gravity_baseline_trips")?,
            observed_mean: take_parsed(&mut map, "gravity_observed_mean")?,
            observed_std: take_parsed(&mut map, "gravity_observed_std")?,
        },
        sample_seed,
    })
}

impl CarrierConfig {
    pub fn to_key_values(&self) -> Vec<(String, String)> {
        vec![
            ("tao".into(), self.tao.to_string()),
            ("scenario_count".into(), self.scenario_count.to_string()),
            ("fleet_size".into(), self.fleet_size.to_string()),
            ("capacity_per_bus".into(), self.capacity_per_bus.to_string()),
            ("seat_utilization".into(), self.seat_utilization.to_string()),
            ("cost_per_hour".into(), self.cost_per_hour.to_string()),
            ("revenue_per_hour".into(), self.revenue_per_hour.to_string()),
            (
                "demand_lower_bound".into(),
                self.demand_lower_bound.to_string(),
            ),
            (
                "demand_upper_bound".into(),
                self.demand_upper_bound.to_string(),
            ),
            (
                "gravity_ref_population_a".into(),
                self.gravity.ref_population_a.to_string(),
            ),
            (
                "gravity_ref_population_b".into(),
                self.gravity.ref_population_b.to_string(),
            ),
            (
                "gravity_baseline_trips".into(),
                self.gravity.baseline_trips.to_string(),
            ),
            (
                "gravity_observed_mean".into(),
                self.gravity.observed_mean.to_string(),
            ),
            (
                "gravity_observed_std".into(),
                self.gravity.observed_std.to_string(),
            ),
            ("sample_seed".into(), self.sample_seed.to_string()),
        ]
    }
}

pub fn parse_config(stream: impl std::io::Read) -> Result<Box<CarrierConfig>, ConfigError> {
    let key_value_pairs = reader()
        .from_reader(stream)
        .deserialize()
        .collect::<Result<Box<[(String, String)]>, csv::Error>>()
        .map_err(ConfigError::Csv)?;
    let key_value_map = key_value_pairs
        .iter()
        .cloned()
        .collect::<std::collections::HashMap<_, _>>();
    Ok(Box::new(config_from_key_values(key_value_map)?))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityPayload {
    pub name: String,
    pub population: u64,
    pub station_capacity: u32,
}

/// The static inputs of one optimization run: the city set with populations
/// and station capacities, the mirrored travel-time matrix, and the carrier
/// configuration. Built once and never mutated afterwards.
#[derive(Debug)]
pub struct Instance {
    cities: Vec<CityPayload>,
    /// Dense row-major matrix; `None` on the diagonal.
    travel_time: Vec<Option<Time>>,
    pub config: CarrierConfig,
}

impl Instance {
    pub fn assemble(
        city_rows: &[CityRow],
        travel_time_rows: &[TravelTimeRow],
        config: CarrierConfig,
    ) -> Result<Self, ConfigError> {
        if city_rows.is_empty() {
            return Err(ConfigError::EmptyCitySet);
        }

        // Cities are indexed densely in file order.
        let mut idx_by_name: HashMap<&str, CityIdx> = map_with_capacity(city_rows.len());
        let mut cities = Vec::with_capacity(city_rows.len());
        for row in city_rows {
            if idx_by_name
                .insert(&row.name, CityIdx(cities.len() as u32))
                .is_some()
            {
                return Err(ConfigError::DuplicateCity {
                    name: row.name.clone(),
                });
            }
            cities.push(CityPayload {
                name: row.name.clone(),
                population: row.population,
                station_capacity: row.station_capacity,
            });
        }

        let n = cities.len();
        let mut travel_time: Vec<Option<Time>> = vec![None; n * n];
        for row in travel_time_rows {
            let origin = *idx_by_name
                .get(row.origin.as_str())
                .ok_or_else(|| ConfigError::UnknownCity {
                    name: row.origin.clone(),
                })?;
            let destination = *idx_by_name.get(row.destination.as_str()).ok_or_else(|| {
                ConfigError::UnknownCity {
                    name: row.destination.clone(),
                }
            })?;
            if origin == destination {
                return Err(ConfigError::SelfLoopTravelTime {
                    city: row.origin.clone(),
                });
            }
            let forward = origin.0 as usize * n + destination.0 as usize;
            let backward = destination.0 as usize * n + origin.0 as usize;
            if travel_time[forward].is_some() || travel_time[backward].is_some() {
                return Err(ConfigError::DuplicateTravelTime {
                    origin: row.origin.clone(),
                    destination: row.destination.clone(),
                });
            }
            // The input is symmetric; storage is directional.
            travel_time[forward] = Some(row.seconds);
            travel_time[backward] = Some(row.seconds);
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if travel_time[i * n + j].is_none() {
                    return Err(ConfigError::MissingTravelTime {
                        origin: cities[i].name.clone(),
                        destination: cities[j].name.clone(),
                    });
                }
            }
        }

        Ok(Self {
            cities,
            travel_time,
            config,
        })
    }

    pub fn num_cities(&self) -> usize {
        self.cities.len()
    }

    pub fn cities(&self) -> impl Iterator<Item = (CityIdx, &CityPayload)> {
        self.cities
            .iter()
            .enumerate()
            .map(|(i, c)| (CityIdx(i as u32), c))
    }

    pub fn city(&self, idx: CityIdx) -> &CityPayload {
        &self.cities[idx.0 as usize]
    }

    pub fn city_by_name(&self, name: &str) -> Option<CityIdx> {
        self.cities
            .iter()
            .position(|c| c.name == name)
            .map(|i| CityIdx(i as u32))
    }

    /// Travel duration between two distinct cities; `None` for a city and
    /// itself.
    pub fn travel_time(&self, origin: CityIdx, destination: CityIdx) -> Option<Time> {
        self.travel_time[origin.0 as usize * self.cities.len() + destination.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn test_config() -> CarrierConfig {
        CarrierConfig {
            tao: 900,
            scenario_count: 4,
            fleet_size: 10,
            capacity_per_bus: 35,
            seat_utilization: 0.6,
            cost_per_hour: 10.0,
            revenue_per_hour: 100.0,
            demand_lower_bound: 0.25,
            demand_upper_bound: 2.25,
            gravity: GravityCalibration {
                ref_population_a: 2_700_000,
                ref_population_b: 2_800_000,
                baseline_trips: 2650.0,
                observed_mean: 2566.0,
                observed_std: 51.0,
            },
            sample_seed: DEFAULT_SAMPLE_SEED,
        }
    }

    #[test]
    fn test_parse_cities() {
        let content = r#"# name; population; station_capacity
Taipei; 2700000; 27
Chiayi; 274000; 3"#;
        let cities = parse_cities(content.as_bytes()).unwrap();
        assert_eq!(
            *cities,
            [
                CityRow {
                    name: "Taipei".into(),
                    population: 2_700_000,
                    station_capacity: 27,
                },
                CityRow {
                    name: "Chiayi".into(),
                    population: 274_000,
                    station_capacity: 3,
                }
            ]
        );
    }

    #[test]
    fn test_parse_travel_times() {
        let content = r#"# origin; destination; seconds
Taipei; Chiayi; 9540
Chiayi; Tainan; 3120"#;
        let travel_times = parse_travel_times(content.as_bytes()).unwrap();
        assert_eq!(
            *travel_times,
            [
                TravelTimeRow {
                    origin: "Taipei".into(),
                    destination: "Chiayi".into(),
                    seconds: 9540,
                },
                TravelTimeRow {
                    origin: "Chiayi".into(),
                    destination: "Tainan".into(),
                    seconds: 3120,
                }
            ]
        );
    }

    #[test]
    fn test_parse_config() {
        let content = r#"# config_key; value
tao; 900
scenario_count; 4
fleet_size; 10
capacity_per_bus; 35
seat_utilization; 0.6
cost_per_hour; 10
revenue_per_hour; 100
demand_lower_bound; 0.25
demand_upper_bound; 2.25
gravity_ref_population_a; 2700000
gravity_ref_population_b; 2800000
gravity_baseline_trips; 2650
gravity_observed_mean; 2566
gravity_observed_std; 51
"#;
        let config = parse_config(content.as_bytes()).unwrap();
        assert_eq!(config.tao, 900);
        assert_eq!(config.scenario_count, 4);
        assert_eq!(config.sample_seed, DEFAULT_SAMPLE_SEED);
        assert_eq!(config.gravity.observed_std, 51.0);
    }

    #[test]
    fn test_parse_config_missing_key() {
        let content = r#"# config_key; value
tao; 900
"#;
        assert!(matches!(
            parse_config(content.as_bytes()),
            Err(ConfigError::MissingKey(_))
        ));
    }

    fn city_rows() -> Vec<CityRow> {
        vec![
            CityRow {
                name: "A".into(),
                population: 1_000_000,
                station_capacity: 5,
            },
            CityRow {
                name: "B".into(),
                population: 2_000_000,
                station_capacity: 5,
            },
            CityRow {
                name: "C".into(),
                population: 500_000,
                station_capacity: 2,
            },
        ]
    }

    fn travel_rows() -> Vec<TravelTimeRow> {
        vec![
            TravelTimeRow {
                origin: "A".into(),
                destination: "B".into(),
                seconds: 3600,
            },
            TravelTimeRow {
                origin: "A".into(),
                destination: "C".into(),
                seconds: 1800,
            },
            TravelTimeRow {
                origin: "B".into(),
                destination: "C".into(),
                seconds: 5400,
            },
        ]
    }

    #[test]
    fn test_assemble_mirrors_travel_times() {
        let instance = Instance::assemble(&city_rows(), &travel_rows(), test_config()).unwrap();
        let a = instance.city_by_name("A").unwrap();
        let b = instance.city_by_name("B").unwrap();
        assert_eq!(instance.travel_time(a, b), Some(3600));
        assert_eq!(instance.travel_time(b, a), Some(3600));
        assert_eq!(instance.travel_time(a, a), None);
        assert_eq!(instance.num_cities(), 3);
    }

    #[test]
    fn test_assemble_missing_pair() {
        let mut rows = travel_rows();
        rows.pop();
        assert!(matches!(
            Instance::assemble(&city_rows(), &rows, test_config()),
            Err(ConfigError::MissingTravelTime { .. })
        ));
    }

    #[test]
    fn test_assemble_duplicate_pair() {
        let mut rows = travel_rows();
        rows.push(TravelTimeRow {
            origin: "B".into(),
            destination: "A".into(),
            seconds: 3601,
        });
        assert!(matches!(
            Instance::assemble(&city_rows(), &rows, test_config()),
            Err(ConfigError::DuplicateTravelTime { .. })
        ));
    }

    #[test]
    fn test_assemble_unknown_city() {
        let mut rows = travel_rows();
        rows[0].origin = "Z".into();
        assert!(matches!(
            Instance::assemble(&city_rows(), &rows, test_config()),
            Err(ConfigError::UnknownCity { .. })
        ));
    }

    #[test]
    fn test_assemble_empty_city_set() {
        assert!(matches!(
            Instance::assemble(&[], &[], test_config()),
            Err(ConfigError::EmptyCitySet)
        ));
    }
}
