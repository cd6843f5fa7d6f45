//! Cross-validated hyperparameter search.
//!
//! [`KFold`] provides seeded fold assignment; [`tune_adapt_model_cv`]
//! sweeps the shared kernel bandwidth over a log-spaced grid, scoring
//! each candidate by k-fold cross-validation on the source domain and
//! refitting the winner on the full training set. Candidates are
//! independent, so the sweep runs them in parallel.

use crate::adaptation::{positive_indicator, positive_score, AdaptConfig, Domain, KernelAdaptation};
use crate::bridge::Task;
use crate::cme::log_grid;
use crate::dataset::{Block, DomainData};
use crate::error::{AdaptarError, Result};
use crate::metrics::{mse, roc_auc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

/// K-fold splitter with optional seeded shuffling.
///
/// When `n` is not divisible by the fold count, the remainder rows are
/// spread one-per-fold over the leading folds.
#[derive(Debug, Clone)]
pub struct KFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl KFold {
    /// Creates a splitter with `n_splits` folds, no shuffling.
    #[must_use]
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: 0,
        }
    }

    /// Enables seeded shuffling of the row order.
    #[must_use]
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Produces `(train_indices, test_indices)` pairs over `n` rows.
    ///
    /// # Errors
    ///
    /// Returns an error if there are fewer rows than folds, or fewer
    /// than two folds.
    pub fn split(&self, n: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if self.n_splits < 2 {
            return Err(AdaptarError::InvalidHyperparameter {
                param: "n_splits".to_string(),
                value: self.n_splits.to_string(),
                constraint: ">= 2".to_string(),
            });
        }
        if n < self.n_splits {
            return Err(AdaptarError::InvalidConfig {
                message: format!("{n} rows cannot fill {} folds", self.n_splits),
            });
        }

        let mut indices: Vec<usize> = (0..n).collect();
        if self.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
            indices.shuffle(&mut rng);
        }

        let base = n / self.n_splits;
        let remainder = n % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for fold in 0..self.n_splits {
            let size = base + usize::from(fold < remainder);
            let test: Vec<usize> = indices[start..start + size].to_vec();
            let train: Vec<usize> = indices[..start]
                .iter()
                .chain(indices[start + size..].iter())
                .copied()
                .collect();
            folds.push((train, test));
            start += size;
        }
        Ok(folds)
    }
}

/// Search-grid options for the bandwidth sweep.
#[derive(Debug, Clone, Copy)]
pub struct TuneOptions {
    /// Number of log-spaced bandwidth candidates.
    pub n_params: usize,
    /// Cross-validation fold count.
    pub n_folds: usize,
    /// Log10 lower exponent of the bandwidth grid.
    pub min_log: i32,
    /// Log10 upper exponent of the bandwidth grid.
    pub max_log: i32,
    /// Fold-shuffling seed.
    pub seed: u64,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            n_params: 10,
            n_folds: 5,
            min_log: -1,
            max_log: 1,
            seed: 42,
        }
    }
}

/// Outcome of a bandwidth sweep.
#[derive(Debug, Clone)]
pub struct TuneResult {
    /// Winning bandwidth.
    pub best_scale: f64,
    /// Every `(bandwidth, mean cv score)` pair, grid order. Higher is
    /// better for both tasks (negated MSE for regression).
    pub scores: Vec<(f64, f64)>,
    /// The winner, refitted on the full training sets.
    pub model: KernelAdaptation,
}

/// Sweeps the shared kernel bandwidth by k-fold cross-validation on the
/// source domain and refits the best candidate.
///
/// Each candidate fits on k-1 source folds (target rows are used
/// unlabelled throughout) and scores source-domain predictions on the
/// held-out fold: AUC for classification, negated MSE for regression. A
/// candidate that fails numerically on a fold scores worst-possible for
/// that fold instead of aborting the sweep; ties keep the first-seen
/// best. Candidates evaluate in parallel.
///
/// # Errors
///
/// Returns an error on invalid grid or fold options, a missing source
/// outcome block, or if the winning refit fails.
pub fn tune_adapt_model_cv(
    source_train: &DomainData,
    target_train: &DomainData,
    config: &AdaptConfig,
    task: Task,
    opts: &TuneOptions,
) -> Result<TuneResult> {
    let grid = log_grid(opts.min_log, opts.max_log, opts.n_params)?;
    let folds = KFold::new(opts.n_folds)
        .with_shuffle(opts.seed)
        .split(source_train.n_samples())?;
    source_train.require(Block::Y, "tune_adapt_model_cv")?;

    let scores: Vec<(f64, f64)> = grid
        .into_par_iter()
        .map(|scale| {
            let mut total = 0.0;
            for (train_idx, test_idx) in &folds {
                let fold_score = score_candidate(
                    source_train,
                    target_train,
                    config,
                    task,
                    scale,
                    train_idx,
                    test_idx,
                );
                total += match fold_score {
                    Ok(s) => s,
                    Err(
                        AdaptarError::SingularMatrix { .. } | AdaptarError::NonFinite { .. },
                    ) => f64::NEG_INFINITY,
                    Err(e) => return Err(e),
                };
            }
            Ok((scale, total / folds.len() as f64))
        })
        .collect::<Result<_>>()?;

    let mut best: Option<(f64, f64)> = None;
    for &(scale, score) in &scores {
        let improved = match best {
            None => true,
            Some((_, best_score)) => score > best_score,
        };
        if improved {
            best = Some((scale, score));
        }
    }
    let (best_scale, _) = best.ok_or_else(|| AdaptarError::InvalidConfig {
        message: "bandwidth grid is empty".to_string(),
    })?;

    let mut winner_config = config.clone();
    winner_config.scale = best_scale;
    let mut model =
        KernelAdaptation::new(source_train.clone(), target_train.clone(), winner_config)?;
    model.fit(task, false)?;

    Ok(TuneResult {
        best_scale,
        scores,
        model,
    })
}

fn score_candidate(
    source_train: &DomainData,
    target_train: &DomainData,
    config: &AdaptConfig,
    task: Task,
    scale: f64,
    train_idx: &[usize],
    test_idx: &[usize],
) -> Result<f64> {
    let fold_train = source_train.select_rows(train_idx);
    let fold_test = source_train.select_rows(test_idx);

    let mut candidate = config.clone();
    candidate.scale = scale;
    let mut model = KernelAdaptation::new(fold_train, target_train.clone(), candidate)?;
    model.fit(task, false)?;

    let test_x = fold_test.require(Block::X, "tune_adapt_model_cv")?;
    let y_true = fold_test.require(Block::Y, "tune_adapt_model_cv")?;
    let pred = model.predict(test_x, Domain::Source, Domain::Source)?;

    match task {
        Task::Regression => Ok(-mse(y_true.as_slice(), pred.as_slice())?),
        Task::Classification => {
            roc_auc(&positive_indicator(y_true), &positive_score(&pred))
        }
    }
}
