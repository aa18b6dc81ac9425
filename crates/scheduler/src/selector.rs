//! Which source client to pull the next candidate from.

use rand::Rng;
use rand::seq::SliceRandom;

use meterlab_core::{ClientDescriptor, Environment, SourceRegistry, UtilityType};

/// Uniform choice among the clients able to serve a utility type.
#[derive(Debug, Copy, Clone, Default)]
pub struct ClientSelector;

impl ClientSelector {
    /// Clients of `environment` eligible for `utility`.
    ///
    /// Hot water is restricted to clients flagged as carrying it; when none
    /// are, every client of the environment stays eligible.
    pub fn eligible<'r>(
        registry: &'r SourceRegistry,
        environment: Environment,
        utility: UtilityType,
    ) -> Vec<&'r ClientDescriptor> {
        let all = registry.clients_for(environment);
        if utility != UtilityType::HotWater {
            return all;
        }
        let hot: Vec<_> = all.iter().copied().filter(|c| c.supports_hot_water).collect();
        if hot.is_empty() { all } else { hot }
    }

    /// `None` only when the environment has no clients at all.
    pub fn select<'r, R: Rng + ?Sized>(
        registry: &'r SourceRegistry,
        environment: Environment,
        utility: UtilityType,
        rng: &mut R,
    ) -> Option<&'r ClientDescriptor> {
        Self::eligible(registry, environment, utility)
            .choose(rng)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterlab_core::ClientId;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn client(id: &str, hot: bool) -> ClientDescriptor {
        ClientDescriptor {
            id: ClientId::new(id).unwrap(),
            environment: Environment::Qa,
            supports_hot_water: hot,
            database: id.to_lowercase(),
        }
    }

    fn registry(clients: Vec<ClientDescriptor>) -> SourceRegistry {
        SourceRegistry::new(clients).unwrap()
    }

    fn ids(list: &[&ClientDescriptor]) -> Vec<String> {
        list.iter().map(|c| c.id.to_string()).collect()
    }

    #[test]
    fn hot_water_goes_only_to_capable_clients() {
        let reg = registry(vec![client("A", false), client("B", true)]);
        let hot = ClientSelector::eligible(&reg, Environment::Qa, UtilityType::HotWater);
        assert_eq!(ids(&hot), vec!["B"]);

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let c = ClientSelector::select(&reg, Environment::Qa, UtilityType::HotWater, &mut rng).unwrap();
            assert_eq!(c.id.as_str(), "B");
        }
    }

    #[test]
    fn other_types_use_every_client() {
        let reg = registry(vec![client("A", false), client("B", true)]);
        for t in [UtilityType::ColdWater, UtilityType::Electricity] {
            let list = ClientSelector::eligible(&reg, Environment::Qa, t);
            assert_eq!(ids(&list), vec!["A", "B"]);
        }
    }

    #[test]
    fn hot_water_falls_back_when_no_client_is_flagged() {
        let reg = registry(vec![client("A", false), client("B", false)]);
        let list = ClientSelector::eligible(&reg, Environment::Qa, UtilityType::HotWater);
        assert_eq!(ids(&list), vec!["A", "B"]);
    }

    #[test]
    fn empty_environment_yields_nothing() {
        let reg = registry(vec![client("A", true)]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ClientSelector::select(&reg, Environment::Prod, UtilityType::ColdWater, &mut rng).is_none());
    }

    #[test]
    fn choice_is_roughly_uniform() {
        let reg = registry(vec![client("A", true), client("B", true), client("C", true)]);
        let mut rng = StdRng::seed_from_u64(11);
        let mut hits = [0usize; 3];
        for _ in 0..3000 {
            let c = ClientSelector::select(&reg, Environment::Qa, UtilityType::ColdWater, &mut rng).unwrap();
            let i = match c.id.as_str() {
                "A" => 0,
                "B" => 1,
                _ => 2,
            };
            hits[i] += 1;
        }
        for h in hits {
            assert!((800..1200).contains(&h), "skewed selection: {hits:?}");
        }
    }
}
