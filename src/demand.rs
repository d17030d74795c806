use itertools::Itertools;
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::instance::{CityIdx, Instance};
use crate::primitives::FVal;

/// Upper bound on rejection attempts per accepted sample. The calibrated
/// truncation interval spans dozens of standard deviations, so hitting this
/// cap means the configuration is pathological, not unlucky.
const MAX_REJECTIONS_PER_SAMPLE: usize = 10_000;

#[derive(Debug, PartialEq)]
pub enum DemandSamplingError {
    NonFiniteMean {
        origin: CityIdx,
        destination: CityIdx,
        mean: FVal,
    },
    NonPositiveStd {
        origin: CityIdx,
        destination: CityIdx,
        std: FVal,
    },
    DegenerateBounds {
        origin: CityIdx,
        destination: CityIdx,
        lower: FVal,
        upper: FVal,
    },
    RejectionLimitExceeded {
        origin: CityIdx,
        destination: CityIdx,
    },
    ZeroScenarioCount,
}

/// Gravity-model estimate of the daily trip count distribution for one
/// ordered city pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripMetrics {
    pub mean: FVal,
    pub std: FVal,
}

pub fn trip_metrics(instance: &Instance, origin: CityIdx, destination: CityIdx) -> TripMetrics {
    let gravity = &instance.config.gravity;
    let reference = gravity.ref_population_a as FVal * gravity.ref_population_b as FVal;
    let mean = instance.city(origin).population as FVal
        * instance.city(destination).population as FVal
        / reference
        * gravity.baseline_trips;
    // The relative spread of the calibration pair carries over.
    let std = gravity.observed_std / gravity.observed_mean * mean;
    TripMetrics { mean, std }
}

/// Sampled daily demand for every ordered city pair, reduced to the
/// per-pair scenario average that caps daily passenger flow.
#[derive(Debug)]
pub struct DemandScenarios {
    num_cities: usize,
    samples: Vec<Box<[FVal]>>,
    averages: Vec<FVal>,
}

impl DemandScenarios {
    /// Rebuilds scenarios from persisted averages (samples are not kept).
    pub fn from_averages(num_cities: usize, averages: Vec<FVal>) -> Self {
        assert_eq!(averages.len(), num_cities * num_cities);
        Self {
            num_cities,
            samples: vec![Box::default(); num_cities * num_cities],
            averages,
        }
    }

    pub fn average(&self, origin: CityIdx, destination: CityIdx) -> FVal {
        self.averages[origin.0 as usize * self.num_cities + destination.0 as usize]
    }

    pub fn samples(&self, origin: CityIdx, destination: CityIdx) -> &[FVal] {
        &self.samples[origin.0 as usize * self.num_cities + destination.0 as usize]
    }

    pub fn averages(&self) -> impl Iterator<Item = (CityIdx, CityIdx, FVal)> + '_ {
        let n = self.num_cities;
        self.averages
            .iter()
            .enumerate()
            .filter(move |(i, _)| i / n != i % n)
            .map(move |(i, &avg)| (CityIdx((i / n) as u32), CityIdx((i % n) as u32), avg))
    }
}

fn sample_pair(
    instance: &Instance,
    origin: CityIdx,
    destination: CityIdx,
) -> Result<Box<[FVal]>, DemandSamplingError> {
    let config = &instance.config;
    let TripMetrics { mean, std } = trip_metrics(instance, origin, destination);

    if !mean.is_finite() {
        return Err(DemandSamplingError::NonFiniteMean {
            origin,
            destination,
            mean,
        });
    }
    if !(std > 0.0) || !std.is_finite() {
        return Err(DemandSamplingError::NonPositiveStd {
            origin,
            destination,
            std,
        });
    }
    let lower = config.demand_lower_bound * mean;
    let upper = config.demand_upper_bound * mean;
    if !(lower < upper) {
        return Err(DemandSamplingError::DegenerateBounds {
            origin,
            destination,
            lower,
            upper,
        });
    }

    // Per-pair RNG stream: deterministic regardless of thread scheduling.
    let mut rng = ChaCha8Rng::seed_from_u64(config.sample_seed);
    rng.set_stream(origin.0 as u64 * instance.num_cities() as u64 + destination.0 as u64);
    let dist = Normal::new(mean, std).map_err(|_e| DemandSamplingError::NonPositiveStd {
        origin,
        destination,
        std,
    })?;

    let mut samples = Vec::with_capacity(config.scenario_count);
    while samples.len() < config.scenario_count {
        let mut accepted = None;
        for _ in 0..MAX_REJECTIONS_PER_SAMPLE {
            let value = dist.sample(&mut rng);
            if lower <= value && value <= upper {
                accepted = Some(value);
                break;
            }
        }
        match accepted {
            Some(value) => samples.push(value),
            None => {
                return Err(DemandSamplingError::RejectionLimitExceeded {
                    origin,
                    destination,
                })
            }
        }
    }
    Ok(samples.into_boxed_slice())
}

/// Draws the demand scenarios for every ordered city pair. Any degenerate
/// pair aborts the whole pass: a silently omitted pair would leave its daily
/// demand cap unconstrained.
pub fn generate(instance: &Instance) -> Result<DemandScenarios, DemandSamplingError> {
    if instance.config.scenario_count == 0 {
        return Err(DemandSamplingError::ZeroScenarioCount);
    }
    let n = instance.num_cities();
    let pairs: Vec<(CityIdx, CityIdx)> = (0..n as u32)
        .cartesian_product(0..n as u32)
        .filter(|(i, j)| i != j)
        .map(|(i, j)| (CityIdx(i), CityIdx(j)))
        .collect();

    let sampled: Vec<((CityIdx, CityIdx), Box<[FVal]>)> = pairs
        .into_par_iter()
        .map(|(origin, destination)| {
            sample_pair(instance, origin, destination)
                .map(|samples| ((origin, destination), samples))
        })
        .collect::<Result<_, _>>()?;

    let mut samples: Vec<Box<[FVal]>> = vec![Box::default(); n * n];
    let mut averages: Vec<FVal> = vec![0.0; n * n];
    for ((origin, destination), pair_samples) in sampled {
        let cell = origin.0 as usize * n + destination.0 as usize;
        averages[cell] =
            pair_samples.iter().sum::<FVal>() / pair_samples.len() as FVal;
        samples[cell] = pair_samples;
    }

    info!(
        "Sampled {} scenarios for {} city pairs",
        instance.config.scenario_count,
        n * (n - 1)
    );
    Ok(DemandScenarios {
        num_cities: n,
        samples,
        averages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{CityRow, Instance, TravelTimeRow};
    use crate::test::sample::{create_sample_instance, two_city_config};

    #[test]
    fn test_metrics_scale_with_population_product() {
        let instance = create_sample_instance();
        let taipei = instance.city_by_name("Taipei").unwrap();
        let taichung = instance.city_by_name("Taichung").unwrap();
        let metrics = trip_metrics(&instance, taipei, taichung);
        // The reference pair reproduces the baseline exactly.
        assert!((metrics.mean - 2650.0).abs() < 1e-9);
        assert!((metrics.std - 51.0 / 2566.0 * 2650.0).abs() < 1e-9);
    }

    #[test]
    fn test_samples_honor_truncation_bounds() {
        let instance = create_sample_instance();
        let scenarios = generate(&instance).unwrap();
        for (origin, _) in instance.cities() {
            for (destination, _) in instance.cities() {
                if origin == destination {
                    continue;
                }
                let metrics = trip_metrics(&instance, origin, destination);
                let samples = scenarios.samples(origin, destination);
                assert_eq!(samples.len(), instance.config.scenario_count);
                for &sample in samples {
                    assert!(sample >= instance.config.demand_lower_bound * metrics.mean);
                    assert!(sample <= instance.config.demand_upper_bound * metrics.mean);
                }
                let avg = scenarios.average(origin, destination);
                assert!(avg.is_finite());
                assert!(avg > 0.0);
            }
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let instance = create_sample_instance();
        let first = generate(&instance).unwrap();
        let second = generate(&instance).unwrap();
        for (origin, destination, avg) in first.averages() {
            assert_eq!(avg, second.average(origin, destination));
        }
    }

    #[test]
    fn test_zero_population_fails_explicitly() {
        let cities = vec![
            CityRow {
                name: "A".into(),
                population: 0,
                station_capacity: 5,
            },
            CityRow {
                name: "B".into(),
                population: 1_000_000,
                station_capacity: 5,
            },
        ];
        let travel_times = vec![TravelTimeRow {
            origin: "A".into(),
            destination: "B".into(),
            seconds: 3600,
        }];
        let instance = Instance::assemble(&cities, &travel_times, two_city_config()).unwrap();
        // Zero population on one side collapses the gravity mean to zero;
        // the generator must refuse rather than emit an undefined average.
        assert!(matches!(
            generate(&instance),
            Err(DemandSamplingError::NonPositiveStd { .. })
        ));
    }
}
