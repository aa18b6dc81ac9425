//! Deficit-weighted choice of the next utility type.
//!
//! With no typed annotations yet the target shares are used as-is. Afterwards
//! each type is weighted by how far it lags its target, floored at `epsilon`
//! so an over-represented type keeps a nonzero chance and is never locked out.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use meterlab_core::UtilityType;

use crate::distribution::{Fractions, TargetDistribution};

/// Default probability floor.
pub const DEFAULT_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balancer {
    target: TargetDistribution,
    epsilon: f64,
}

impl Balancer {
    /// Non-positive or non-finite `epsilon` falls back to [`DEFAULT_EPSILON`].
    pub fn new(target: TargetDistribution, epsilon: f64) -> Self {
        let epsilon = if epsilon.is_finite() && epsilon > 0.0 {
            epsilon
        } else {
            DEFAULT_EPSILON
        };
        Self { target, epsilon }
    }

    pub fn target(&self) -> &TargetDistribution {
        &self.target
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Unnormalized sampling weights, in [`UtilityType::ALL`] order.
    pub fn weights(&self, current: Option<&Fractions>) -> [f64; 3] {
        match current {
            None => self.target.shares(),
            Some(fractions) => {
                let mut w = [0.0; 3];
                for t in UtilityType::ALL {
                    let deficit = self.target.share(t) - fractions.get(t);
                    w[t.index()] = deficit.max(self.epsilon);
                }
                w
            }
        }
    }

    /// Normalized draw probabilities.
    pub fn probabilities(&self, current: Option<&Fractions>) -> [f64; 3] {
        let w = self.weights(current);
        let sum: f64 = w.iter().sum();
        [w[0] / sum, w[1] / sum, w[2] / sum]
    }

    /// Draw the utility type to assign next.
    pub fn choose<R: Rng + ?Sized>(&self, current: Option<&Fractions>, rng: &mut R) -> UtilityType {
        let weights = self.weights(current);
        match WeightedIndex::new(weights) {
            Ok(dist) => UtilityType::ALL[dist.sample(rng)],
            // Unreachable with a valid target, kept total for robustness.
            Err(_) => UtilityType::ALL[argmax(&weights)],
        }
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new(TargetDistribution::default(), DEFAULT_EPSILON)
    }
}

fn argmax(values: &[f64; 3]) -> usize {
    let mut best = 0;
    for i in 1..values.len() {
        if values[i] > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::ClassCounts;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn scenario_target() -> TargetDistribution {
        TargetDistribution::new(&[
            (UtilityType::ColdWater, 0.6),
            (UtilityType::HotWater, 0.1),
            (UtilityType::Electricity, 0.3),
        ])
        .unwrap()
    }

    #[test]
    fn initial_state_uses_target_directly() {
        let b = Balancer::new(scenario_target(), DEFAULT_EPSILON);
        let p = b.probabilities(None);
        assert_eq!(p[UtilityType::ColdWater.index()], 0.6);
        assert_eq!(p[UtilityType::HotWater.index()], 0.1);
        assert_eq!(p[UtilityType::Electricity.index()], 0.3);
    }

    #[test]
    fn deficits_steer_toward_the_missing_type() {
        let b = Balancer::new(scenario_target(), DEFAULT_EPSILON);
        let counts = ClassCounts {
            cold_water: 60,
            hot_water: 0,
            electricity: 40,
            no_meter: 0,
            total_images: 100,
        };
        let fractions = counts.fractions().unwrap();

        let w = b.weights(Some(&fractions));
        assert_eq!(w[UtilityType::ColdWater.index()], DEFAULT_EPSILON);
        assert!((w[UtilityType::HotWater.index()] - 0.1).abs() < 1e-12);
        assert_eq!(w[UtilityType::Electricity.index()], DEFAULT_EPSILON);

        let p = b.probabilities(Some(&fractions));
        assert!(p[UtilityType::HotWater.index()] > 0.99);

        let mut rng = StdRng::seed_from_u64(7);
        let hot = (0..1000)
            .filter(|_| b.choose(Some(&fractions), &mut rng) == UtilityType::HotWater)
            .count();
        assert!(hot > 970, "hot drawn {hot} / 1000 times");
    }

    #[test]
    fn over_represented_type_is_never_locked_out() {
        let b = Balancer::new(scenario_target(), DEFAULT_EPSILON);
        let counts = ClassCounts {
            cold_water: 1000,
            ..Default::default()
        };
        let p = b.probabilities(counts.fractions().as_ref());
        for t in UtilityType::ALL {
            assert!(p[t.index()] > 0.0, "{t} has zero probability");
        }
    }

    #[test]
    fn invalid_epsilon_falls_back_to_default() {
        assert_eq!(Balancer::new(scenario_target(), 0.0).epsilon(), DEFAULT_EPSILON);
        assert_eq!(Balancer::new(scenario_target(), f64::NAN).epsilon(), DEFAULT_EPSILON);
        assert_eq!(Balancer::new(scenario_target(), 0.01).epsilon(), 0.01);
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let b = Balancer::default();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..32).map(|_| b.choose(None, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    /// Run `cycles` completed assignments against unlimited pools.
    fn simulate(b: &Balancer, cycles: usize, seed: u64) -> ClassCounts {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts = ClassCounts::default();
        for _ in 0..cycles {
            let t = b.choose(counts.fractions().as_ref(), &mut rng);
            counts.add(t, 1);
            counts.total_images += 1;
        }
        counts
    }

    #[test]
    fn empirical_mix_converges_to_target() {
        let b = Balancer::new(scenario_target(), DEFAULT_EPSILON);
        let counts = simulate(&b, 10_000, 1);
        let f = counts.fractions().unwrap();
        for t in UtilityType::ALL {
            let diff = (f.get(t) - b.target().share(t)).abs();
            assert!(diff < 0.01, "{t}: observed {} target {}", f.get(t), b.target().share(t));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn targets() -> impl Strategy<Value = TargetDistribution> {
            (1u32..=18, 1u32..=18).prop_filter_map("all shares >= 5%", |(a, b)| {
                if a + b >= 20 {
                    return None;
                }
                let c = 20 - a - b;
                TargetDistribution::new(&[
                    (UtilityType::ColdWater, a as f64 / 20.0),
                    (UtilityType::HotWater, b as f64 / 20.0),
                    (UtilityType::Electricity, c as f64 / 20.0),
                ])
                .ok()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 24,
                ..ProptestConfig::default()
            })]

            /// Property: with unlimited pools the mix tracks any target.
            #[test]
            fn converges_for_any_target(target in targets(), seed in any::<u64>()) {
                let b = Balancer::new(target, DEFAULT_EPSILON);
                let counts = simulate(&b, 10_000, seed);
                let f = counts.fractions().unwrap();
                for t in UtilityType::ALL {
                    prop_assert!((f.get(t) - target.share(t)).abs() < 0.015);
                }
            }
        }
    }
}
