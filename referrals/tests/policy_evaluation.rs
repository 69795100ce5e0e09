// First-come-first-served heuristics and their Monte Carlo comparison.

use rand::SeedableRng;
use rand::rngs::StdRng;
use referrals::{
    Allocator, Category, DailyDemand, Execution, MonteCarloConfig, MonthlyRates, NearestGreedy,
    Network, Shelter, UniformRandom, evaluate_policies,
};

fn near_and_far() -> Network {
    Network::builder()
        .hotspot("A")
        .category("men")
        .shelter(Shelter::new("X", 1.0).eligible_for(["men"]))
        .shelter(Shelter::new("Z", 5.0).eligible_for(["men"]))
        .distance("A", "X", 1.0)
        .distance("A", "Z", 3.0)
        .build()
        .unwrap()
}

fn city() -> Network {
    Network::builder()
        .hotspot("downtown")
        .hotspot("east")
        .category("men")
        .category("women")
        .shelter(Shelter::new("S0", 6.0).eligible_for(["men"]))
        .shelter(Shelter::new("S1", 4.0).eligible_for(["women"]))
        .shelter(Shelter::new("S2", 5.0).eligible_for(["men", "women"]))
        .shelter(Shelter::new("S3", 2.5).eligible_for(["women"]))
        .distance("downtown", "S0", 1.2)
        .distance("downtown", "S1", 2.0)
        .distance("downtown", "S2", 4.5)
        .distance("east", "S2", 1.0)
        .distance("east", "S3", 0.8)
        .build()
        .unwrap()
}

fn rates() -> Vec<MonthlyRates> {
    [(300.0, 120.0), (240.0, 150.0)]
        .into_iter()
        .map(|(men, women)| MonthlyRates::from([(Category::from("men"), men), (Category::from("women"), women)]))
        .collect()
}

fn policies() -> Vec<Box<dyn Allocator>> {
    vec![Box::new(UniformRandom), Box::new(NearestGreedy)]
}

#[test]
fn given_two_men_when_nearest_greedy_then_second_spills_to_far_shelter() {
    let mut rng = StdRng::seed_from_u64(0);

    let outcome = NearestGreedy.allocate_day(&near_and_far(), &DailyDemand::new().with("A", "men", 2), &mut rng);

    assert_eq!(outcome.sheltered, 2);
    assert_eq!(outcome.unsheltered, 0);
    assert_eq!(outcome.total_distance, 4.0);
}

#[test]
fn heuristics_account_for_every_arrival() {
    let network = city();
    let mut rng = StdRng::seed_from_u64(99);

    for men in 0..15 {
        for women in 0..12 {
            let demand = DailyDemand::new()
                .with("downtown", "men", men)
                .with("downtown", "women", women / 2)
                .with("east", "women", women - women / 2);
            for policy in policies() {
                let outcome = policy.allocate_day(&network, &demand, &mut rng);
                assert_eq!(outcome.people(), demand.total(), "{}", policy.name());
                // 13 men's beds and 11 women's beds exist in total (2.5 floors to 2)
                assert!(outcome.sheltered <= 6 + 4 + 5 + 2);
            }
        }
    }
}

#[test]
fn nearest_never_travels_further_than_random_on_one_hotspot() {
    let network = near_and_far();
    for people in 0..8 {
        let demand = DailyDemand::new().with("A", "men", people);
        let mut rng = StdRng::seed_from_u64(people);
        let nearest = NearestGreedy.allocate_day(&network, &demand, &mut rng);
        let random = UniformRandom.allocate_day(&network, &demand, &mut rng);

        assert_eq!(nearest.sheltered, random.sheltered);
        assert!(nearest.total_distance <= random.total_distance);
    }
}

#[test]
fn identical_seeds_reproduce_bit_identical_metrics() {
    let network = city();
    let config = MonteCarloConfig {
        n_days: 200,
        month_index: 1,
        seed: 2024,
        ..MonteCarloConfig::new("downtown")
    };

    let first = evaluate_policies(&network, &rates(), &policies(), &config).unwrap();
    let second = evaluate_policies(&network, &rates(), &policies(), &config).unwrap();

    assert_eq!(first, second);
    let bits = |e: &referrals::PolicyEvaluation| -> Vec<u64> {
        e.series.iter().flat_map(|s| s.total_distance.iter().map(|d| d.to_bits())).collect()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn parallel_days_match_sequential_days() {
    let network = city();
    let sequential = MonteCarloConfig {
        n_days: 150,
        ..MonteCarloConfig::new("east")
    };
    let parallel = MonteCarloConfig {
        execution: Execution::Parallel { threads: Some(4) },
        ..sequential.clone()
    };

    assert_eq!(
        evaluate_policies(&network, &rates(), &policies(), &sequential).unwrap(),
        evaluate_policies(&network, &rates(), &policies(), &parallel).unwrap()
    );
}

#[test]
fn different_seeds_sample_different_demand() {
    let network = city();
    let base = MonteCarloConfig {
        n_days: 50,
        ..MonteCarloConfig::new("downtown")
    };
    let other = MonteCarloConfig { seed: 124, ..base.clone() };

    let a = evaluate_policies(&network, &rates(), &policies(), &base).unwrap();
    let b = evaluate_policies(&network, &rates(), &policies(), &other).unwrap();

    assert_ne!(a.sampled_demand, b.sampled_demand);
}

#[test]
fn mean_daily_arrivals_track_the_monthly_rate() {
    let network = city();
    let config = MonteCarloConfig {
        n_days: 3000,
        ..MonteCarloConfig::new("downtown")
    };

    let evaluation = evaluate_policies(&network, &rates(), &policies(), &config).unwrap();

    let men = Category::from("men");
    let mean = evaluation.sampled_demand.iter().map(|d| d[&men] as f64).sum::<f64>() / 3000.0;
    // lambda = 300 / 30 = 10, standard error ~0.06
    assert!((mean - 10.0).abs() < 0.4, "mean {mean}");
}
