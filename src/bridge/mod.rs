//! Bridge-function estimation, the second stage of proximal causal
//! inference.
//!
//! A bridge function maps the embedded confounder proxy (produced by a
//! first-stage [`ConditionalMeanEmbed`]) together with a companion
//! variable block to the outcome. Because the fitted bridge is expressed
//! against the embedding *span* rather than against raw rows, prediction
//! accepts an arbitrary evaluation CME, which may come from a different
//! domain than the one the bridge was trained on. That two-argument
//! composition is what produces adapted cross-domain predictions.

use crate::cme::{outcome_gram, regularize, CmeOptions, ConditionalMeanEmbed, OutcomeBlock, SolveMethod};
use crate::dataset::CovariateSet;
use crate::error::{AdaptarError, Result};
use crate::primitives::Matrix;
use serde::{Deserialize, Serialize};

/// Prediction task the outcome column(s) encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    /// Continuous outcome, single column.
    Regression,
    /// One-hot multiclass or signed-binary outcome.
    Classification,
}

/// A fitted bridge function. Immutable after `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFunction {
    stage: String,
    /// Dual coefficients, (n_bridge, n_outputs).
    beta: Matrix<f64>,
    /// First-stage weights at the bridge rows, (n_cme, n_bridge).
    gamma_fit: Matrix<f64>,
    /// Outcome sub-blocks of the fitting CME (the embedded proxy).
    fit_outcomes: Vec<OutcomeBlock>,
    /// Companion variable block at the bridge rows.
    companion: OutcomeBlock,
    scale: f64,
    lam: f64,
    task: Task,
    n: usize,
}

impl BridgeFunction {
    /// Fits the bridge against the span of `fit_cme`.
    ///
    /// `covars` are the bridge rows' covariates for the fitting CME's
    /// blocks, `companion` the bridge rows' companion block, and `y` the
    /// outcome: one column for regression, one-hot or signed-binary
    /// columns for classification. The lifted-feature Gram is
    /// `M = (gamma^T G_w gamma) .* K_c` and the dual solution
    /// `beta = (M + n*lam*I)^{-1} y`.
    ///
    /// # Errors
    ///
    /// Returns an error on row misalignment between `covars`, `companion`
    /// and `y`, or if the regularized system cannot be factorized.
    pub fn fit(
        stage: &str,
        fit_cme: &ConditionalMeanEmbed,
        covars: &CovariateSet,
        companion: OutcomeBlock,
        y: Matrix<f64>,
        task: Task,
        opts: &CmeOptions,
    ) -> Result<Self> {
        let gamma_fit = fit_cme.gamma(covars)?;
        let n = gamma_fit.n_cols();
        if companion.values.n_rows() != n {
            return Err(AdaptarError::shape_mismatch(
                format!("{n} companion rows"),
                format!("{}", companion.values.n_rows()),
            ));
        }
        if y.n_rows() != n {
            return Err(AdaptarError::shape_mismatch(
                format!("{n} outcome rows"),
                format!("{}", y.n_rows()),
            ));
        }

        let g_w = outcome_gram(fit_cme.outcome_blocks(), fit_cme.outcome_blocks(), opts.scale)?;
        let lifted = gamma_fit
            .transpose()
            .matmul(&g_w)
            .and_then(|t| t.matmul(&gamma_fit))
            .map_err(AdaptarError::from)?;
        let k_c = companion
            .kernel
            .gram(&companion.values, &companion.values, opts.scale)?;
        let m = lifted.hadamard(&k_c).map_err(AdaptarError::from)?;

        let lam = match opts.lam {
            Some(lam) => lam,
            None => {
                let g_y = y.matmul(&y.transpose()).map_err(AdaptarError::from)?;
                ConditionalMeanEmbed::select_lam_loo(&m, &g_y, opts)?.lam
            }
        };

        let m_reg = regularize(&m, lam)?;
        let beta = match opts.method {
            SolveMethod::Direct => m_reg
                .cholesky_inverse()?
                .matmul(&y)
                .map_err(AdaptarError::from)?,
            SolveMethod::Stabilized => m_reg.cholesky()?.factor_solve_matrix(&y),
        };
        if !beta.is_finite() {
            return Err(AdaptarError::NonFinite {
                context: format!("stage {stage} dual coefficients"),
            });
        }

        Ok(Self {
            stage: stage.to_string(),
            beta,
            gamma_fit,
            fit_outcomes: fit_cme.outcome_blocks().to_vec(),
            companion,
            scale: opts.scale,
            lam,
            task,
            n,
        })
    }

    /// Expected outcome at `test_x`, composing this bridge with an
    /// evaluation CME (possibly fitted on another domain's rows).
    ///
    /// When `cme_eval` embeds the companion block jointly with the proxy,
    /// the companion Gram is taken against the evaluation rows; otherwise
    /// the companion block must be present in `test_x` and its Gram is
    /// taken against the test rows directly. Output is
    /// (n_test, n_outputs).
    ///
    /// # Errors
    ///
    /// Returns an error if `test_x` lacks a block the evaluation CME (or
    /// the companion fallback) requires.
    pub fn get_exp_y_x(
        &self,
        test_x: &CovariateSet,
        cme_eval: &ConditionalMeanEmbed,
    ) -> Result<Matrix<f64>> {
        let gamma_eval = cme_eval.gamma(test_x)?;
        let k_w = outcome_gram(&self.fit_outcomes, cme_eval.outcome_blocks(), self.scale)?;
        let lifted = self
            .gamma_fit
            .transpose()
            .matmul(&k_w)
            .map_err(AdaptarError::from)?;

        let scored = match cme_eval.outcome_block(self.companion.block) {
            Some(eval_companion) => {
                // Joint embedding: the evaluation CME carries the
                // companion, so contract against its rows.
                let k_c = self.companion.kernel.gram(
                    &self.companion.values,
                    &eval_companion.values,
                    self.scale,
                )?;
                lifted
                    .hadamard(&k_c)
                    .and_then(|a| a.matmul(&gamma_eval))
                    .map_err(AdaptarError::from)?
            }
            None => {
                // Proxy-only embedding: the companion comes straight from
                // the test covariates.
                let test_companion = test_x.get(&self.companion.block).ok_or_else(|| {
                    AdaptarError::missing_block(&self.companion.block.to_string(), &self.stage)
                })?;
                let k_x = self.companion.kernel.gram(
                    &self.companion.values,
                    test_companion,
                    self.scale,
                )?;
                lifted
                    .matmul(&gamma_eval)
                    .and_then(|b| b.hadamard(&k_x))
                    .map_err(AdaptarError::from)?
            }
        };

        let pred = self
            .beta
            .transpose()
            .matmul(&scored)
            .map_err(AdaptarError::from)?;
        Ok(pred.transpose())
    }

    /// Class probabilities at `test_x`: per-row L1 normalization of the
    /// absolute scores. Degenerate all-zero rows become uniform.
    ///
    /// # Errors
    ///
    /// Returns an error for a regression bridge, or any prediction error.
    pub fn predict_proba(
        &self,
        test_x: &CovariateSet,
        cme_eval: &ConditionalMeanEmbed,
    ) -> Result<Matrix<f64>> {
        if self.task != Task::Classification {
            return Err(AdaptarError::InvalidConfig {
                message: format!("stage {} was fitted for regression", self.stage),
            });
        }
        let scores = self.get_exp_y_x(test_x, cme_eval)?;
        Ok(normalize_rows(&scores))
    }

    /// Number of bridge training rows.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.n
    }

    /// The ridge strength in effect (selected or supplied).
    #[must_use]
    pub fn lam(&self) -> f64 {
        self.lam
    }

    /// Task variant this bridge targets.
    #[must_use]
    pub fn task(&self) -> Task {
        self.task
    }

    /// Number of output columns (1 for regression, class count otherwise).
    #[must_use]
    pub fn n_outputs(&self) -> usize {
        self.beta.n_cols()
    }
}

/// Per-row L1 normalization of absolute values; all-zero rows go uniform.
#[must_use]
pub fn normalize_rows(scores: &Matrix<f64>) -> Matrix<f64> {
    let (n, k) = scores.shape();
    let mut out = Matrix::zeros(n, k);
    for i in 0..n {
        let total: f64 = (0..k).map(|j| scores.get(i, j).abs()).sum();
        if total > 0.0 {
            for j in 0..k {
                out.set(i, j, scores.get(i, j).abs() / total);
            }
        } else {
            for j in 0..k {
                out.set(i, j, 1.0 / k as f64);
            }
        }
    }
    out
}
