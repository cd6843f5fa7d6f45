//! Conditional mean embedding via regularized kernel ridge regression.
//!
//! A fitted [`ConditionalMeanEmbed`] answers "what is the expected
//! RKHS-embedded value of the outcome blocks given these covariates" for
//! new covariate rows. The embedding is represented by weights over the
//! training rows, `gamma(x) = (K + n*lam*I)^{-1} k(train, x)`, and is
//! always consumed by a downstream bridge estimator, never exposed as a
//! scalar prediction.

use crate::dataset::{Block, CovariateSet};
use crate::error::{AdaptarError, Result};
use crate::kernel::{BlockKernel, StageKernel};
use crate::primitives::Matrix;
use serde::{Deserialize, Serialize};

/// Number of grid points used by leave-one-out lambda selection.
pub const LOO_GRID_POINTS: usize = 10;

/// Solve strategy for the regularized Gram system.
///
/// Both strategies produce the same dual solution up to numerical
/// tolerance; `Stabilized` never forms the explicit inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMethod {
    /// Explicit Cholesky-based inverse, applied by matrix product.
    Direct,
    /// Cholesky factor kept, systems solved by substitution per column.
    Stabilized,
}

/// Fit-time options for a CME stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CmeOptions {
    /// Ridge strength; `None` selects by leave-one-out over a log grid.
    pub lam: Option<f64>,
    /// Log10 lower exponent of the selection grid.
    pub lam_min: i32,
    /// Log10 upper exponent of the selection grid.
    pub lam_max: i32,
    /// Shared RBF length-scale.
    pub scale: f64,
    /// Solve strategy.
    pub method: SolveMethod,
}

impl Default for CmeOptions {
    fn default() -> Self {
        Self {
            lam: None,
            lam_min: -4,
            lam_max: -1,
            scale: 1.0,
            method: SolveMethod::Direct,
        }
    }
}

/// One outcome sub-block: its name, training values, and kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeBlock {
    /// Block name (W, C, ...).
    pub block: Block,
    /// Training values, (n_samples, block_dim).
    pub values: Matrix<f64>,
    /// Kernel evaluated over this sub-block.
    pub kernel: BlockKernel,
}

/// Result of leave-one-out lambda selection.
#[derive(Debug, Clone)]
pub struct LooSelection {
    /// Selected lambda (first-seen minimum on ties).
    pub lam: f64,
    /// The evaluated grid, low to high.
    pub grid: Vec<f64>,
    /// Held-out reconstruction error per grid value.
    pub errors: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum FittedSolve {
    Inverse(Matrix<f64>),
    Factor(Matrix<f64>),
}

/// A fitted conditional mean embedding. Immutable after `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalMeanEmbed {
    stage: String,
    covar_kernel: StageKernel,
    covars: CovariateSet,
    outcomes: Vec<OutcomeBlock>,
    scale: f64,
    lam: f64,
    n: usize,
    solver: FittedSolve,
}

impl ConditionalMeanEmbed {
    /// Fits the embedding of `outcomes` conditional on `covars`.
    ///
    /// When `opts.lam` is `None`, lambda is chosen by closed-form
    /// leave-one-out error over [`LOO_GRID_POINTS`] log-spaced values in
    /// `[10^lam_min, 10^lam_max]`, one factorization per grid value.
    ///
    /// # Errors
    ///
    /// Fails with [`AdaptarError::MissingBlock`] if `covars` lacks a
    /// block the stage kernel requires, [`AdaptarError::SingularMatrix`]
    /// if the regularized Gram cannot be factorized, and
    /// [`AdaptarError::NonFinite`] if the solve produced NaN or Inf.
    pub fn fit(
        stage: &str,
        outcomes: Vec<OutcomeBlock>,
        covars: CovariateSet,
        covar_kernel: StageKernel,
        opts: &CmeOptions,
    ) -> Result<Self> {
        if outcomes.is_empty() {
            return Err(AdaptarError::InvalidConfig {
                message: format!("stage {stage} has no outcome blocks"),
            });
        }

        let k = covar_kernel.gram(&covars, &covars, opts.scale, stage)?;
        let n = k.n_rows();
        for ob in &outcomes {
            if ob.values.n_rows() != n {
                return Err(AdaptarError::shape_mismatch(
                    format!("{n} outcome rows"),
                    format!("{}", ob.values.n_rows()),
                ));
            }
        }

        let lam = match opts.lam {
            Some(lam) => lam,
            None => {
                let g_y = outcome_gram(&outcomes, &outcomes, opts.scale)?;
                Self::select_lam_loo(&k, &g_y, opts)?.lam
            }
        };

        let k_reg = regularize(&k, lam)?;
        let solver = match opts.method {
            SolveMethod::Direct => {
                let inv = k_reg.cholesky_inverse()?;
                if !inv.is_finite() {
                    return Err(AdaptarError::NonFinite {
                        context: format!("stage {stage} regularized inverse"),
                    });
                }
                FittedSolve::Inverse(inv)
            }
            SolveMethod::Stabilized => FittedSolve::Factor(k_reg.cholesky()?),
        };

        Ok(Self {
            stage: stage.to_string(),
            covar_kernel,
            covars,
            outcomes,
            scale: opts.scale,
            lam,
            n,
            solver,
        })
    }

    /// Closed-form leave-one-out selection over the log-spaced grid.
    ///
    /// For each candidate, with `H = K (K + n*lam*I)^{-1}` and the
    /// outcome Gram `G`, the kernelized held-out error is
    /// `sum_i [(I-H) G (I-H)^T]_ii / (1 - H_ii)^2`. Exactly one
    /// factorization per grid value; ties keep the first minimum.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid bounds are inverted or every
    /// candidate failed to factorize.
    pub fn select_lam_loo(k: &Matrix<f64>, g_y: &Matrix<f64>, opts: &CmeOptions) -> Result<LooSelection> {
        let grid = log_grid(opts.lam_min, opts.lam_max, LOO_GRID_POINTS)?;
        let n = k.n_rows();

        let mut errors = Vec::with_capacity(grid.len());
        let mut best: Option<(f64, f64)> = None;
        for &lam in &grid {
            let err = match loo_error(k, g_y, lam) {
                Ok(err) => err,
                // A candidate that cannot factorize scores worst-possible.
                Err(AdaptarError::SingularMatrix { .. }) => f64::INFINITY,
                Err(e) => return Err(e),
            };
            errors.push(err);
            let improved = match best {
                None => true,
                Some((_, best_err)) => err < best_err,
            };
            if improved {
                best = Some((lam, err));
            }
        }

        let (lam, err) = best.ok_or_else(|| AdaptarError::InvalidConfig {
            message: "lambda grid is empty".to_string(),
        })?;
        if !err.is_finite() && n > 0 {
            return Err(AdaptarError::SingularMatrix { pivot: 0.0 });
        }
        Ok(LooSelection { lam, grid, errors })
    }

    /// Applies the fitted ridge operator `(K + n*lam*I)^{-1}` to a
    /// right-hand side.
    ///
    /// # Errors
    ///
    /// Returns an error if the row count doesn't match the training size.
    pub fn apply_inverse(&self, rhs: &Matrix<f64>) -> Result<Matrix<f64>> {
        if rhs.n_rows() != self.n {
            return Err(AdaptarError::shape_mismatch(self.n, rhs.n_rows()));
        }
        match &self.solver {
            FittedSolve::Inverse(inv) => inv.matmul(rhs).map_err(AdaptarError::from),
            FittedSolve::Factor(l) => Ok(l.factor_solve_matrix(rhs)),
        }
    }

    /// Embedding weights for new covariate rows:
    /// `(K + n*lam*I)^{-1} k(train, new)`, shape (n_train, n_new).
    ///
    /// # Errors
    ///
    /// Returns an error if `new_x` lacks a required block.
    pub fn gamma(&self, new_x: &CovariateSet) -> Result<Matrix<f64>> {
        let k_new = self
            .covar_kernel
            .gram(&self.covars, new_x, self.scale, &self.stage)?;
        self.apply_inverse(&k_new)
    }

    /// Ordered covariate block names used at fit time.
    #[must_use]
    pub fn block_names(&self) -> Vec<Block> {
        self.covar_kernel.blocks()
    }

    /// Outcome sub-blocks (name, values, kernel).
    #[must_use]
    pub fn outcome_blocks(&self) -> &[OutcomeBlock] {
        &self.outcomes
    }

    /// Outcome sub-block by name.
    #[must_use]
    pub fn outcome_block(&self, block: Block) -> Option<&OutcomeBlock> {
        self.outcomes.iter().find(|ob| ob.block == block)
    }

    /// Number of training rows.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.n
    }

    /// The ridge strength in effect (selected or supplied).
    #[must_use]
    pub fn lam(&self) -> f64 {
        self.lam
    }

    /// Shared RBF length-scale.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Stage name this embedding was fitted for.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }
}

/// Product Gram matrix across matching outcome sub-blocks of two CME
/// training sets.
///
/// # Errors
///
/// Returns an error if the block lists don't overlap on every block of
/// `a`, or widths differ.
pub fn outcome_gram(a: &[OutcomeBlock], b: &[OutcomeBlock], scale: f64) -> Result<Matrix<f64>> {
    let mut combined: Option<Matrix<f64>> = None;
    for ob in a {
        let other = b
            .iter()
            .find(|o| o.block == ob.block)
            .ok_or_else(|| AdaptarError::missing_block(&ob.block.to_string(), "outcome gram"))?;
        let g = ob.kernel.gram(&ob.values, &other.values, scale)?;
        combined = Some(match combined {
            None => g,
            Some(acc) => acc.hadamard(&g).map_err(AdaptarError::from)?,
        });
    }
    combined.ok_or_else(|| AdaptarError::InvalidConfig {
        message: "outcome gram over empty block list".to_string(),
    })
}

/// `K + n * lam * I`.
pub(crate) fn regularize(k: &Matrix<f64>, lam: f64) -> Result<Matrix<f64>> {
    if lam <= 0.0 {
        return Err(AdaptarError::InvalidHyperparameter {
            param: "lam".to_string(),
            value: lam.to_string(),
            constraint: "> 0".to_string(),
        });
    }
    let n = k.n_rows();
    let mut out = k.clone();
    let shift = lam * n as f64;
    for i in 0..n {
        out.set(i, i, out.get(i, i) + shift);
    }
    Ok(out)
}

/// Log-spaced grid of `points` values in `[10^min_log, 10^max_log]`.
///
/// # Errors
///
/// Returns an error if the bounds are inverted.
pub fn log_grid(min_log: i32, max_log: i32, points: usize) -> Result<Vec<f64>> {
    if min_log > max_log {
        return Err(AdaptarError::InvalidHyperparameter {
            param: "lam_min".to_string(),
            value: min_log.to_string(),
            constraint: format!("<= lam_max ({max_log})"),
        });
    }
    if points == 1 {
        return Ok(vec![10f64.powi(min_log)]);
    }
    let lo = f64::from(min_log);
    let hi = f64::from(max_log);
    let step = (hi - lo) / (points - 1) as f64;
    Ok((0..points)
        .map(|i| 10f64.powf(lo + step * i as f64))
        .collect())
}

fn loo_error(k: &Matrix<f64>, g_y: &Matrix<f64>, lam: f64) -> Result<f64> {
    let n = k.n_rows();
    let k_reg = regularize(k, lam)?;
    let inv = k_reg.cholesky_inverse()?;
    let h = k.matmul(&inv).map_err(AdaptarError::from)?;

    // E = (I - H) G (I - H)^T; only the diagonal is needed.
    let i_minus_h = Matrix::eye(n).sub(&h).map_err(AdaptarError::from)?;
    let eg = i_minus_h.matmul(g_y).map_err(AdaptarError::from)?;

    let mut err = 0.0;
    for i in 0..n {
        let mut diag = 0.0;
        for j in 0..n {
            diag += eg.get(i, j) * i_minus_h.get(i, j);
        }
        let denom = 1.0 - h.get(i, i);
        // A hat-diagonal at 1.0 means the row interpolates itself exactly.
        let denom = if denom.abs() < 1e-12 { 1e-12 } else { denom };
        err += diag / (denom * denom);
    }
    Ok(err)
}
