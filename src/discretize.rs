use crate::instance::ConfigError;
use crate::primitives::{Time, SECONDS_PER_DAY};

/// Fixed temporal discretization of the planning day: the day is split into
/// `taos` bins of `tao` seconds each. Set once at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discretization {
    tao: Time,
    taos: u32,
}

impl Discretization {
    pub fn new(tao: Time) -> Result<Self, ConfigError> {
        if tao == 0 || SECONDS_PER_DAY % tao != 0 {
            return Err(ConfigError::TaoDoesNotDivideDay { tao });
        }
        Ok(Self {
            tao,
            taos: SECONDS_PER_DAY / tao,
        })
    }

    pub fn tao(&self) -> Time {
        self.tao
    }

    /// Number of bins in the day.
    pub fn taos(&self) -> u32 {
        self.taos
    }

    /// Number of bins covering the given duration, rounded up. Exact for
    /// multiples of the bin width.
    pub fn bins(&self, seconds: Time) -> u32 {
        let quotient = seconds / self.tao;
        if seconds % self.tao == 0 {
            quotient
        } else {
            quotient + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::ConfigError;

    #[test]
    fn test_quarter_hour_discretization() {
        let disc = Discretization::new(900).unwrap();
        assert_eq!(disc.taos(), 96);
        assert_eq!(disc.bins(0), 0);
        assert_eq!(disc.bins(900), 1);
        assert_eq!(disc.bins(901), 2);
        assert_eq!(disc.bins(3600), 4);
        assert_eq!(disc.bins(3599), 4);
    }

    #[test]
    fn test_ceiling_bounds() {
        let disc = Discretization::new(600).unwrap();
        for seconds in [1, 599, 600, 601, 1199, 1200, 86_399, 86_400] {
            let bins = disc.bins(seconds);
            assert!(bins * disc.tao() >= seconds);
            assert!((bins - 1) * disc.tao() < seconds);
        }
    }

    #[test]
    fn test_tao_must_divide_day() {
        assert!(matches!(
            Discretization::new(1000),
            Err(ConfigError::TaoDoesNotDivideDay { tao: 1000 })
        ));
        assert!(matches!(
            Discretization::new(0),
            Err(ConfigError::TaoDoesNotDivideDay { tao: 0 })
        ));
    }
}
