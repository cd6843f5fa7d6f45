//! End-to-end synthetic latent-shift scenario.
//!
//! A binary latent confounder U drives the outcome. Both domains share
//! the structural equations; only the confounder mixture differs
//! (source P(U=1) = 0.9, target P(U=1) = 0.4). Neither domain observes
//! U, only the noisy proxies W and C. The adapted predictor (source
//! bridge composed with the target proxy embedding) must beat the naive
//! source model evaluated on target rows.

use adaptar::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Structural equations shared by both domains:
///   U ~ Bernoulli(p_u), X ~ Uniform(-1, 1)
///   W = U + noise, C = 0.5 X + U + noise, Y = X + 3 U + noise
fn latent_shift_domain(n: usize, p_u: f64, seed: u64) -> DomainData {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Vec::with_capacity(n);
    let mut w = Vec::with_capacity(n);
    let mut c = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let u = f64::from(u8::from(rng.gen::<f64>() < p_u));
        let xi: f64 = rng.gen_range(-1.0..1.0);
        x.push(xi);
        w.push(u + 0.05 * rng.gen_range(-1.0..1.0));
        c.push(0.5 * xi + u + 0.05 * rng.gen_range(-1.0..1.0));
        y.push(xi + 3.0 * u + 0.05 * rng.gen_range(-1.0..1.0));
    }
    DomainData::new(column(&x), column(&w))
        .and_then(|d| d.with_c(column(&c)))
        .and_then(|d| d.with_y(column(&y)))
        .expect("aligned blocks")
}

fn scenario_config() -> AdaptConfig {
    AdaptConfig::new(Strategy::FullAdapt).with_lam_set(LamSet {
        cme: Some(1e-3),
        h0: Some(1e-3),
        ..LamSet::default()
    })
}

fn record_l2(records: &[EvalRecord], combo: Combo) -> f64 {
    records
        .iter()
        .find(|r| r.combo == combo)
        .and_then(|r| r.errors.get("l2"))
        .copied()
        .unwrap_or_else(|| panic!("missing l2 for {combo}"))
}

#[test]
fn adaptation_beats_naive_source_model_on_shifted_target() {
    let source_train = latent_shift_domain(240, 0.9, 101);
    let target_train = latent_shift_domain(240, 0.4, 102);
    let source_test = latent_shift_domain(120, 0.9, 103);
    let target_test = latent_shift_domain(120, 0.4, 104);

    let mut model = KernelAdaptation::new(source_train, target_train, scenario_config())
        .expect("valid config");
    model.fit(Task::Regression, false).expect("fit");

    let records = model
        .evaluation(&source_test, &target_test)
        .expect("labelled test sets");

    let naive = record_l2(&records, Combo::SourceTarget);
    let adapted = record_l2(&records, Combo::Adaptation);
    let in_domain = record_l2(&records, Combo::SourceSource);

    // The source model fits its own domain.
    assert!(
        in_domain < naive,
        "source-source ({in_domain}) should beat source-on-target ({naive})"
    );
    // Composing the source bridge with the target embedding corrects for
    // the confounder shift without ever seeing target labels.
    assert!(
        adapted <= naive,
        "adaptation ({adapted}) must not lose to the naive baseline ({naive})"
    );
}

#[test]
fn source_and_target_predictors_visibly_disagree() {
    let source_train = latent_shift_domain(240, 0.9, 201);
    let target_train = latent_shift_domain(240, 0.4, 202);

    let mut model = KernelAdaptation::new(source_train, target_train, scenario_config())
        .expect("valid config");
    model.fit(Task::Regression, true).expect("fit with target labels");

    let test_x = column(&[-0.8, -0.4, 0.0, 0.4, 0.8]);
    let pred_source = model
        .predict(&test_x, Domain::Source, Domain::Source)
        .expect("source bundle");
    let pred_target = model
        .predict(&test_x, Domain::Target, Domain::Target)
        .expect("target bundle");

    let mean_sq_diff: f64 = (0..5)
        .map(|i| (pred_source.get(i, 0) - pred_target.get(i, 0)).powi(2))
        .sum::<f64>()
        / 5.0;
    assert!(
        mean_sq_diff > 0.01,
        "shifted confounder mixtures must separate the predictors, got {mean_sq_diff}"
    );
}

#[test]
fn bandwidth_sweep_selects_a_competitive_model() {
    let source_train = latent_shift_domain(150, 0.9, 301);
    let target_train = latent_shift_domain(150, 0.4, 302);
    let target_test = latent_shift_domain(90, 0.4, 303);
    let source_test = latent_shift_domain(90, 0.9, 304);

    let opts = TuneOptions {
        n_params: 4,
        n_folds: 3,
        min_log: -1,
        max_log: 1,
        seed: 42,
    };
    let result = tune_adapt_model_cv(
        &source_train,
        &target_train,
        &scenario_config(),
        Task::Regression,
        &opts,
    )
    .expect("sweep");

    assert_eq!(result.scores.len(), 4);
    let records = result
        .model
        .evaluation(&source_test, &target_test)
        .expect("labelled test sets");
    // The tuned model still satisfies the adaptation property.
    let naive = record_l2(&records, Combo::SourceTarget);
    let adapted = record_l2(&records, Combo::Adaptation);
    assert!(adapted <= naive * 1.05, "adapted {adapted} vs naive {naive}");
}
