//! Initial-condition policies for trajectory generation.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Half-width of the band the secondary angles are drawn from, around π
const SECONDARY_BAND: f64 = 1.0;

/// Distribution of the first angle. Momenta always start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// U(−0.3, 0.3)
    #[serde(alias = "random_closetozero")]
    NearZero,
    /// U(0.3, 2) or U(−2, −0.3) with equal probability
    #[serde(alias = "random_nozero")]
    AwayFromZero,
    /// U(π − 0.3, π + 0.3)
    #[serde(alias = "random_closetopi")]
    NearPi,
    /// U(0.3, 2)
    #[serde(alias = "random_nozero_pos")]
    AwayFromZeroPositive,
    /// U(π, π + 0.3)
    #[serde(alias = "random_closetopi_pos")]
    NearPiPositive,
}

impl InitPolicy {
    pub const ALL: [InitPolicy; 5] = [
        InitPolicy::NearZero,
        InitPolicy::AwayFromZero,
        InitPolicy::NearPi,
        InitPolicy::AwayFromZeroPositive,
        InitPolicy::NearPiPositive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InitPolicy::NearZero => "near_zero",
            InitPolicy::AwayFromZero => "away_from_zero",
            InitPolicy::NearPi => "near_pi",
            InitPolicy::AwayFromZeroPositive => "away_from_zero_positive",
            InitPolicy::NearPiPositive => "near_pi_positive",
        }
    }

    pub fn sample_angle<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let (lo, hi) = match self {
            InitPolicy::NearZero => (-0.3, 0.3),
            InitPolicy::AwayFromZero => {
                if rng.random_bool(0.5) {
                    (0.3, 2.0)
                } else {
                    (-2.0, -0.3)
                }
            }
            InitPolicy::NearPi => (PI - 0.3, PI + 0.3),
            InitPolicy::AwayFromZeroPositive => (0.3, 2.0),
            InitPolicy::NearPiPositive => (PI, PI + 0.3),
        };
        uniform(lo, hi, rng)
    }

    /// Initial states `[n, coord_dim]`: first angle from this policy, every
    /// further angle from U(π − 1, π + 1), momenta zero.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, coord_dim: usize, rng: &mut R) -> Result<Array2<f64>> {
        if coord_dim == 0 || coord_dim % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "cannot sample initial states with {coord_dim} coordinates"
            )));
        }
        let mut y0 = Array2::zeros((n, coord_dim));
        for mut row in y0.rows_mut() {
            row[0] = self.sample_angle(rng)?;
            for k in 1..coord_dim / 2 {
                row[2 * k] = uniform(PI - SECONDARY_BAND, PI + SECONDARY_BAND, rng)?;
            }
        }
        Ok(y0)
    }
}

fn uniform<R: Rng + ?Sized>(lo: f64, hi: f64, rng: &mut R) -> Result<f64> {
    let dist = Uniform::new(lo, hi).map_err(|e| Error::Distribution(e.to_string()))?;
    Ok(dist.sample(rng))
}

impl FromStr for InitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "near_zero" | "random_closetozero" => Ok(InitPolicy::NearZero),
            "away_from_zero" | "random_nozero" => Ok(InitPolicy::AwayFromZero),
            "near_pi" | "random_closetopi" => Ok(InitPolicy::NearPi),
            "away_from_zero_positive" | "random_nozero_pos" => Ok(InitPolicy::AwayFromZeroPositive),
            "near_pi_positive" | "random_closetopi_pos" => Ok(InitPolicy::NearPiPositive),
            other => Err(Error::UnknownInitPolicy(other.to_string())),
        }
    }
}

/// Where the initial states of a generation run come from.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialConditions {
    Policy(InitPolicy),
    /// Fixed `[n, coord_dim]` states
    Explicit(Array2<f64>),
}

impl From<InitPolicy> for InitialConditions {
    fn from(policy: InitPolicy) -> Self {
        InitialConditions::Policy(policy)
    }
}

impl InitialConditions {
    pub fn resolve<R: Rng + ?Sized>(&self, n: usize, coord_dim: usize, rng: &mut R) -> Result<Array2<f64>> {
        match self {
            InitialConditions::Policy(policy) => policy.sample(n, coord_dim, rng),
            InitialConditions::Explicit(states) => {
                if states.ncols() != coord_dim {
                    return Err(Error::CoordinateMismatch {
                        expected: coord_dim,
                        found: states.ncols(),
                    });
                }
                Ok(states.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_policies_respect_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for policy in InitPolicy::ALL {
            let y0 = policy.sample(500, 4, &mut rng).unwrap();
            for row in y0.rows() {
                let q = row[0];
                let ok = match policy {
                    InitPolicy::NearZero => (-0.3..=0.3).contains(&q),
                    InitPolicy::AwayFromZero => q.abs() >= 0.3 && q.abs() <= 2.0,
                    InitPolicy::NearPi => (q - PI).abs() <= 0.3,
                    InitPolicy::AwayFromZeroPositive => (0.3..=2.0).contains(&q),
                    InitPolicy::NearPiPositive => (PI..=PI + 0.3).contains(&q),
                };
                assert!(ok, "{} produced {}", policy.name(), q);
                assert!((row[2] - PI).abs() <= SECONDARY_BAND);
                assert_eq!(row[1], 0.0);
                assert_eq!(row[3], 0.0);
            }
        }
    }

    #[test]
    fn test_away_from_zero_draws_both_signs() {
        let mut rng = StdRng::seed_from_u64(7);
        let y0 = InitPolicy::AwayFromZero.sample(200, 2, &mut rng).unwrap();
        assert!(y0.column(0).iter().any(|&q| q > 0.0));
        assert!(y0.column(0).iter().any(|&q| q < 0.0));
    }

    #[test]
    fn test_names_and_aliases_parse() {
        for policy in InitPolicy::ALL {
            assert_eq!(policy.name().parse::<InitPolicy>().unwrap(), policy);
        }
        assert_eq!("random_closetopi_pos".parse::<InitPolicy>().unwrap(), InitPolicy::NearPiPositive);
        let err = "random_anywhere".parse::<InitPolicy>().unwrap_err();
        assert!(matches!(err, Error::UnknownInitPolicy(_)));
    }

    #[test]
    fn test_explicit_states_checked_against_system() {
        let mut rng = StdRng::seed_from_u64(0);
        let explicit = InitialConditions::Explicit(Array2::zeros((3, 2)));
        assert!(explicit.resolve(3, 2, &mut rng).is_ok());
        assert!(explicit.resolve(3, 4, &mut rng).unwrap_err().is_config());
    }
}
