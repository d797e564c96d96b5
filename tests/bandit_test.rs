//! Online learning and persistence of `BanditOverride`.

use warmpath::policy::{BanditAction, BanditConfig, BanditOverride};
use warmpath::SystemMetricsSnapshot;

fn high_miss() -> SystemMetricsSnapshot {
    SystemMetricsSnapshot::new(100.0, 0.8, 90.0, 70.0, 0.0)
}

fn low_miss() -> SystemMetricsSnapshot {
    SystemMetricsSnapshot::new(100.0, 0.1, 20.0, 70.0, 0.0)
}

/// Reward aggressive under high miss rates and normal under low ones.
fn train(bandit: &BanditOverride, rounds: usize) {
    let high = BanditOverride::features(&high_miss());
    let low = BanditOverride::features(&low_miss());
    for _ in 0..rounds {
        bandit.update(&high, BanditAction::Aggressive, 0.5);
        bandit.update(&low, BanditAction::Normal, 0.5);
    }
}

#[test]
fn features_follow_metric_order() {
    let metrics = SystemMetricsSnapshot::new(120.0, 0.3, 45.0, 80.0, 12.0);
    assert_eq!(BanditOverride::features(&metrics), [120.0, 0.3, 45.0, 80.0]);
}

#[test]
fn learns_context_dependent_arm() {
    let bandit = BanditOverride::new(BanditConfig::new().epsilon(0.0).seed(7));
    train(&bandit, 300);

    let high = BanditOverride::features(&high_miss());
    let low = BanditOverride::features(&low_miss());
    assert!(bandit.predict_proba(&high).unwrap() > 0.5);
    assert!(bandit.predict_proba(&low).unwrap() < 0.5);

    // ε = 0: always exploit once fitted.
    for _ in 0..20 {
        assert_eq!(bandit.select_action(&high), BanditAction::Aggressive);
        assert_eq!(bandit.select_action(&low), BanditAction::Normal);
    }
}

#[test]
fn full_exploration_picks_both_arms() {
    let bandit = BanditOverride::new(BanditConfig::new().epsilon(1.0).seed(42));
    train(&bandit, 50);

    let x = BanditOverride::features(&low_miss());
    let aggressive = (0..400)
        .filter(|_| bandit.select_action(&x) == BanditAction::Aggressive)
        .count();
    assert!((100..300).contains(&aggressive), "got {aggressive} aggressive of 400");
    assert_eq!(bandit.decisions(), 400);
}

#[test]
fn unfitted_bandit_explores() {
    let bandit = BanditOverride::new(BanditConfig::new().epsilon(0.0).seed(3));
    let x = BanditOverride::features(&high_miss());
    let actions: Vec<_> = (0..64).map(|_| bandit.select_action(&x)).collect();
    assert!(actions.contains(&BanditAction::Normal));
    assert!(actions.contains(&BanditAction::Aggressive));
    assert!(!bandit.is_fitted());
}

#[test]
fn same_seed_same_choices() {
    let a = BanditOverride::new(BanditConfig::new().seed(11));
    let b = BanditOverride::new(BanditConfig::new().seed(11));
    let x = BanditOverride::features(&low_miss());
    for _ in 0..32 {
        assert_eq!(a.select_action(&x), b.select_action(&x));
    }
}

#[test]
fn save_and_load_preserve_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models/bandit.json");

    let bandit = BanditOverride::new(BanditConfig::new().epsilon(0.0).seed(5));
    train(&bandit, 100);
    bandit.save(&path).unwrap();

    let restored = BanditOverride::load(&path, BanditConfig::new().epsilon(0.0).seed(5)).unwrap();
    let x = BanditOverride::features(&high_miss());
    assert_eq!(restored.predict_proba(&x), bandit.predict_proba(&x));
    assert_eq!(restored.steps(), 200);
    assert!(restored.is_fitted());
}

#[test]
fn load_or_new_tolerates_missing_and_corrupt_files() {
    let dir = tempfile::tempdir().unwrap();

    let missing = BanditOverride::load_or_new(&dir.path().join("nope.json"), BanditConfig::default());
    assert!(!missing.is_fitted());

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, b"{ not json").unwrap();
    let fresh = BanditOverride::load_or_new(&corrupt, BanditConfig::default());
    assert!(!fresh.is_fitted());
    assert_eq!(fresh.epsilon(), 0.1);
}

#[test]
fn action_indices_round_trip() {
    assert_eq!(BanditAction::Normal.as_index(), 0);
    assert_eq!(BanditAction::Aggressive.as_index(), 1);
    assert_eq!(BanditAction::from_index(1), Some(BanditAction::Aggressive));
    assert_eq!(BanditAction::from_index(2), None);
    assert_eq!(BanditAction::Normal.complement(), BanditAction::Aggressive);
}
