//! Domain-adaptation orchestrator.
//!
//! [`KernelAdaptation`] wires the three estimation stages together per
//! domain: a proxy embedding, an evaluation embedding, and a bridge
//! function. Prediction picks the bridge from one domain and the
//! evaluation embedding from another; `(Source bridge, Target embedding)`
//! is the adapted predictor for the shifted target domain.

use crate::bridge::{normalize_rows, BridgeFunction, Task};
use crate::cme::{CmeOptions, ConditionalMeanEmbed, OutcomeBlock, SolveMethod};
use crate::dataset::{Block, CovariateSet, DomainData};
use crate::error::{AdaptarError, Result};
use crate::kernel::{BlockKernel, StageKernel};
use crate::metrics::{accuracy, mse, roc_auc};
use crate::primitives::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which domain an estimator is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    /// The fully observed training domain.
    Source,
    /// The shifted deployment domain.
    Target,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Source => write!(f, "source"),
            Domain::Target => write!(f, "target"),
        }
    }
}

/// Adaptation strategy, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Both proxies observed: bridge `h0` over the outcome-mechanism
    /// proxy `C`, evaluation embedding of `(W, C)` given `X`.
    FullAdapt,
    /// Multiple source environments labelled by `Z`: bridge `m0` over the
    /// covariates `X`, evaluation embedding of `W` given `X`.
    MultiEnv,
}

impl Strategy {
    /// Stage names used in error messages and logs.
    #[must_use]
    pub fn stage_names(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Strategy::FullAdapt => ("cme_w_xc", "cme_wc_x", "h0"),
            Strategy::MultiEnv => ("cme_w_xz", "cme_w_x", "m0"),
        }
    }

    /// The strategy's default kernel assignment.
    #[must_use]
    pub fn default_kernels(self) -> KernelSpecs {
        match self {
            Strategy::FullAdapt => KernelSpecs {
                stage1_covars: StageKernel::rbf(&[Block::X, Block::C]),
                proxy_kernel: BlockKernel::rbf(),
                eval_covars: StageKernel::rbf(&[Block::X]),
                eval_outcomes: vec![
                    (Block::W, BlockKernel::rbf()),
                    (Block::C, BlockKernel::rbf()),
                ],
                companion: (Block::C, BlockKernel::rbf()),
            },
            Strategy::MultiEnv => KernelSpecs {
                stage1_covars: StageKernel::rbf(&[Block::X])
                    .with_block(Block::Z, BlockKernel::binary()),
                proxy_kernel: BlockKernel::rbf(),
                eval_covars: StageKernel::rbf(&[Block::X]),
                eval_outcomes: vec![(Block::W, BlockKernel::rbf())],
                companion: (Block::X, BlockKernel::rbf()),
            },
        }
    }
}

/// Per-stage kernel assignment. Built once, validated, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecs {
    /// Covariate kernel of the proxy embedding (stage 1).
    pub stage1_covars: StageKernel,
    /// Outcome kernel of the proxy block `W`.
    pub proxy_kernel: BlockKernel,
    /// Covariate kernel of the evaluation embedding (stage 2).
    pub eval_covars: StageKernel,
    /// Outcome blocks and kernels of the evaluation embedding.
    pub eval_outcomes: Vec<(Block, BlockKernel)>,
    /// Bridge companion block and its kernel (stage 3).
    pub companion: (Block, BlockKernel),
}

/// Per-stage ridge strengths; `None` selects by leave-one-out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LamSet {
    /// Embedding stages.
    pub cme: Option<f64>,
    /// FullAdapt bridge.
    pub h0: Option<f64>,
    /// MultiEnv bridge.
    pub m0: Option<f64>,
    /// Log10 lower exponent of the selection grid.
    pub lam_min: i32,
    /// Log10 upper exponent of the selection grid.
    pub lam_max: i32,
}

impl Default for LamSet {
    fn default() -> Self {
        Self {
            cme: None,
            h0: None,
            m0: None,
            lam_min: -4,
            lam_max: -1,
        }
    }
}

/// Orchestrator configuration; round-trips through
/// [`KernelAdaptation::get_params`] / [`KernelAdaptation::set_params`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptConfig {
    /// Adaptation strategy.
    pub strategy: Strategy,
    /// Whether to 3-way split each domain's training rows so the three
    /// stages train on disjoint partitions.
    pub split: bool,
    /// Shared RBF length-scale.
    pub scale: f64,
    /// Per-stage ridge strengths.
    pub lam_set: LamSet,
    /// Solve strategy for every regularized system.
    pub method: SolveMethod,
    /// Per-stage kernels.
    pub kernels: KernelSpecs,
    /// Decision threshold for single-column classification scores.
    pub threshold: f64,
    /// Seed for the 3-way split permutation.
    pub seed: u64,
}

impl AdaptConfig {
    /// Default configuration for a strategy.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            split: true,
            scale: 1.0,
            lam_set: LamSet::default(),
            method: SolveMethod::Direct,
            kernels: strategy.default_kernels(),
            threshold: 0.5,
            seed: 42,
        }
    }

    /// Replaces the shared length-scale.
    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Replaces the ridge strengths.
    #[must_use]
    pub fn with_lam_set(mut self, lam_set: LamSet) -> Self {
        self.lam_set = lam_set;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.scale <= 0.0 {
            return Err(AdaptarError::InvalidHyperparameter {
                param: "scale".to_string(),
                value: self.scale.to_string(),
                constraint: "> 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(AdaptarError::InvalidHyperparameter {
                param: "threshold".to_string(),
                value: self.threshold.to_string(),
                constraint: "in [0, 1]".to_string(),
            });
        }
        if self.lam_set.lam_min > self.lam_set.lam_max {
            return Err(AdaptarError::InvalidHyperparameter {
                param: "lam_min".to_string(),
                value: self.lam_set.lam_min.to_string(),
                constraint: format!("<= lam_max ({})", self.lam_set.lam_max),
            });
        }
        for (name, lam) in [
            ("lam_set.cme", self.lam_set.cme),
            ("lam_set.h0", self.lam_set.h0),
            ("lam_set.m0", self.lam_set.m0),
        ] {
            if let Some(v) = lam {
                if v <= 0.0 {
                    return Err(AdaptarError::InvalidHyperparameter {
                        param: name.to_string(),
                        value: v.to_string(),
                        constraint: "> 0".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Evaluation combination: which bridge, which embedding, which test set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combo {
    /// Source bridge and embedding, scored on source test rows.
    SourceSource,
    /// Source bridge and embedding, scored on target test rows (the
    /// naive, unadapted baseline).
    SourceTarget,
    /// Target bridge and embedding, scored on target test rows.
    TargetTarget,
    /// Target bridge and embedding, scored on source test rows.
    TargetSource,
    /// Source bridge composed with the target embedding, scored on
    /// target test rows.
    Adaptation,
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Combo::SourceSource => "source-source",
            Combo::SourceTarget => "source-target",
            Combo::TargetTarget => "target-target",
            Combo::TargetSource => "target-source",
            Combo::Adaptation => "adaptation",
        };
        write!(f, "{name}")
    }
}

/// One evaluation row: the combination and its metric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    /// The combination scored.
    pub combo: Combo,
    /// Metric name to value: `l2` for regression, `hard_acc` and `auc`
    /// for classification.
    pub errors: BTreeMap<String, f64>,
}

/// Fitted estimators for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DomainBundle {
    eval_cme: ConditionalMeanEmbed,
    bridge: Option<BridgeFunction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    task: Task,
    source: DomainBundle,
    target: DomainBundle,
}

/// The adaptation estimator.
///
/// # Examples
///
/// ```no_run
/// use adaptar::adaptation::{AdaptConfig, Domain, KernelAdaptation, Strategy};
/// use adaptar::bridge::Task;
/// # use adaptar::dataset::DomainData;
/// # fn domains() -> (DomainData, DomainData) { unimplemented!() }
///
/// let (source_train, target_train) = domains();
/// let config = AdaptConfig::new(Strategy::FullAdapt);
/// let mut model = KernelAdaptation::new(source_train, target_train, config)?;
/// model.fit(Task::Regression, false)?;
/// # let test_x = adaptar::primitives::Matrix::zeros(1, 1);
/// let adapted = model.predict(&test_x, Domain::Source, Domain::Target)?;
/// # Ok::<(), adaptar::error::AdaptarError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelAdaptation {
    source_train: DomainData,
    target_train: DomainData,
    config: AdaptConfig,
    fitted: Option<FittedState>,
}

impl KernelAdaptation {
    /// Builds an unfitted orchestrator over one source and one target
    /// training set.
    ///
    /// For [`Strategy::MultiEnv`], concatenate the per-environment
    /// datasets with [`DomainData::concat`] first; each must carry its
    /// environment label block `Z`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        source_train: DomainData,
        target_train: DomainData,
        config: AdaptConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source_train,
            target_train,
            config,
            fitted: None,
        })
    }

    /// Fits the per-domain estimator bundles.
    ///
    /// The source always gets the full bundle (proxy embedding,
    /// evaluation embedding, bridge). The target gets the full bundle
    /// when `train_target` is true, and otherwise only the label-free
    /// evaluation embedding, fitted on all of its rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a required block is missing from a domain or
    /// a stage fails numerically.
    pub fn fit(&mut self, task: Task, train_target: bool) -> Result<()> {
        self.fitted = None;
        let source = self.fit_full_bundle(&self.source_train, task)?;
        let target = if train_target {
            self.fit_full_bundle(&self.target_train, task)?
        } else {
            self.fit_reduced_bundle(&self.target_train)?
        };
        self.fitted = Some(FittedState {
            task,
            source,
            target,
        });
        Ok(())
    }

    fn cme_opts(&self, lam: Option<f64>) -> CmeOptions {
        CmeOptions {
            lam,
            lam_min: self.config.lam_set.lam_min,
            lam_max: self.config.lam_set.lam_max,
            scale: self.config.scale,
            method: self.config.method,
        }
    }

    fn bridge_lam(&self) -> Option<f64> {
        match self.config.strategy {
            Strategy::FullAdapt => self.config.lam_set.h0,
            Strategy::MultiEnv => self.config.lam_set.m0,
        }
    }

    fn fit_full_bundle(&self, data: &DomainData, task: Task) -> Result<DomainBundle> {
        let (stage1_name, stage2_name, bridge_name) = self.config.strategy.stage_names();
        let specs = &self.config.kernels;
        let parts: [DomainData; 3] = if self.config.split {
            data.split3(self.config.seed)?
        } else {
            [data.clone(), data.clone(), data.clone()]
        };

        // Stage 1: proxy embedding.
        let covars1 = parts[0].covariates(&specs.stage1_covars.blocks(), stage1_name)?;
        let proxy = OutcomeBlock {
            block: Block::W,
            values: parts[0].require(Block::W, stage1_name)?.clone(),
            kernel: specs.proxy_kernel,
        };
        let opts = self.cme_opts(self.config.lam_set.cme);
        let stage1 = ConditionalMeanEmbed::fit(
            stage1_name,
            vec![proxy],
            covars1,
            specs.stage1_covars.clone(),
            &opts,
        )?;

        // Stage 2: evaluation embedding.
        let eval_cme = self.fit_eval_cme(&parts[1], stage2_name)?;

        // Stage 3: bridge over the companion block.
        let covars3 = parts[2].covariates(&specs.stage1_covars.blocks(), bridge_name)?;
        let (companion_block, companion_kernel) = specs.companion;
        let companion = OutcomeBlock {
            block: companion_block,
            values: parts[2].require(companion_block, bridge_name)?.clone(),
            kernel: companion_kernel,
        };
        let y = parts[2].require(Block::Y, bridge_name)?.clone();
        let bridge_opts = self.cme_opts(self.bridge_lam());
        let bridge = BridgeFunction::fit(
            bridge_name,
            &stage1,
            &covars3,
            companion,
            y,
            task,
            &bridge_opts,
        )?;

        Ok(DomainBundle {
            eval_cme,
            bridge: Some(bridge),
        })
    }

    fn fit_reduced_bundle(&self, data: &DomainData) -> Result<DomainBundle> {
        let (_, stage2_name, _) = self.config.strategy.stage_names();
        let eval_cme = self.fit_eval_cme(data, stage2_name)?;
        Ok(DomainBundle {
            eval_cme,
            bridge: None,
        })
    }

    fn fit_eval_cme(&self, data: &DomainData, stage: &str) -> Result<ConditionalMeanEmbed> {
        let specs = &self.config.kernels;
        let covars = data.covariates(&specs.eval_covars.blocks(), stage)?;
        let outcomes = specs
            .eval_outcomes
            .iter()
            .map(|&(block, kernel)| {
                Ok(OutcomeBlock {
                    block,
                    values: data.require(block, stage)?.clone(),
                    kernel,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let opts = self.cme_opts(self.config.lam_set.cme);
        ConditionalMeanEmbed::fit(stage, outcomes, covars, specs.eval_covars.clone(), &opts)
    }

    fn state(&self) -> Result<&FittedState> {
        self.fitted
            .as_ref()
            .ok_or_else(|| AdaptarError::not_fitted("KernelAdaptation"))
    }

    fn bundle<'a>(&self, state: &'a FittedState, domain: Domain) -> &'a DomainBundle {
        match domain {
            Domain::Source => &state.source,
            Domain::Target => &state.target,
        }
    }

    /// Expected outcome at `test_x`, composing the bridge from
    /// `h_domain` with the evaluation embedding from `cme_domain`.
    ///
    /// `(Source, Target)` is the adapted predictor. Output shape is
    /// (n_test, n_outputs).
    ///
    /// # Errors
    ///
    /// Returns [`AdaptarError::NotFitted`] before `fit`, or when
    /// `h_domain` names a domain whose bridge was never trained.
    pub fn predict(
        &self,
        test_x: &Matrix<f64>,
        h_domain: Domain,
        cme_domain: Domain,
    ) -> Result<Matrix<f64>> {
        let state = self.state()?;
        let bridge = self
            .bundle(state, h_domain)
            .bridge
            .as_ref()
            .ok_or_else(|| AdaptarError::not_fitted(&format!("{h_domain} bridge")))?;
        let eval_cme = &self.bundle(state, cme_domain).eval_cme;

        let mut covars = CovariateSet::new();
        covars.insert(Block::X, test_x.clone());
        bridge.get_exp_y_x(&covars, eval_cme)
    }

    /// Class probabilities at `test_x` under the adapted combination
    /// (source bridge, target embedding), rows L1-normalized.
    ///
    /// # Errors
    ///
    /// Returns an error before `fit` or when the task is regression.
    pub fn predict_proba(&self, test_x: &Matrix<f64>) -> Result<Matrix<f64>> {
        let state = self.state()?;
        if state.task != Task::Classification {
            return Err(AdaptarError::InvalidConfig {
                message: "predict_proba requires a classification fit".to_string(),
            });
        }
        let scores = self.predict(test_x, Domain::Source, Domain::Target)?;
        Ok(normalize_rows(&scores))
    }

    /// Scores every available domain combination on held-out data.
    ///
    /// Combinations whose bridge was never trained (a label-free target)
    /// are skipped rather than reported as errors.
    ///
    /// # Errors
    ///
    /// Returns an error before `fit`, on a missing test outcome, or on
    /// an irreconcilable prediction/label shape.
    pub fn evaluation(
        &self,
        source_test: &DomainData,
        target_test: &DomainData,
    ) -> Result<Vec<EvalRecord>> {
        let state = self.state()?;
        let combos = [
            (Combo::SourceSource, Domain::Source, Domain::Source, source_test),
            (Combo::SourceTarget, Domain::Source, Domain::Source, target_test),
            (Combo::TargetTarget, Domain::Target, Domain::Target, target_test),
            (Combo::TargetSource, Domain::Target, Domain::Target, source_test),
            (Combo::Adaptation, Domain::Source, Domain::Target, target_test),
        ];

        let mut records = Vec::new();
        for (combo, h_domain, cme_domain, data) in combos {
            if self.bundle(state, h_domain).bridge.is_none() {
                continue;
            }
            let test_x = data.require(Block::X, "evaluation")?;
            let y_true = data.require(Block::Y, "evaluation")?;
            let pred = self.predict(test_x, h_domain, cme_domain)?;
            let errors = self.score(state.task, y_true, &pred)?;
            records.push(EvalRecord { combo, errors });
        }
        Ok(records)
    }

    /// Scores one prediction matrix against labels.
    ///
    /// Rank reconciliation follows a single rule: a trailing singleton
    /// column is the only coercion allowed; any other width disagreement
    /// between a regression prediction and its labels is a fatal
    /// [`AdaptarError::ShapeMismatch`].
    fn score(
        &self,
        task: Task,
        y_true: &Matrix<f64>,
        pred: &Matrix<f64>,
    ) -> Result<BTreeMap<String, f64>> {
        if y_true.n_rows() != pred.n_rows() {
            return Err(AdaptarError::shape_mismatch(
                format!("{} rows", y_true.n_rows()),
                format!("{} rows", pred.n_rows()),
            ));
        }
        let mut errors = BTreeMap::new();
        match task {
            Task::Regression => {
                if y_true.n_cols() != pred.n_cols() {
                    return Err(AdaptarError::shape_mismatch(
                        format!("{} columns", y_true.n_cols()),
                        format!("{} columns", pred.n_cols()),
                    ));
                }
                errors.insert("l2".to_string(), mse(y_true.as_slice(), pred.as_slice())?);
            }
            Task::Classification => {
                errors.insert(
                    "hard_acc".to_string(),
                    accuracy(y_true, pred, self.config.threshold)?,
                );
                let labels = positive_indicator(y_true);
                let scores = positive_score(pred);
                match roc_auc(&labels, &scores) {
                    Ok(auc) => {
                        errors.insert("auc".to_string(), auc);
                    }
                    // Single-class test slices get no AUC entry.
                    Err(AdaptarError::InvalidConfig { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(errors)
    }

    /// Current configuration.
    #[must_use]
    pub fn get_params(&self) -> AdaptConfig {
        self.config.clone()
    }

    /// Replaces the configuration and clears any fitted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the new configuration is invalid.
    pub fn set_params(&mut self, config: AdaptConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.fitted = None;
        Ok(())
    }

    /// Returns true once `fit` has succeeded.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Source-domain training rows.
    #[must_use]
    pub fn source_train(&self) -> &DomainData {
        &self.source_train
    }

    /// Target-domain training rows.
    #[must_use]
    pub fn target_train(&self) -> &DomainData {
        &self.target_train
    }
}

/// Binary positive-class indicator from a label column or a one-hot
/// matrix (last column is the positive class).
pub(crate) fn positive_indicator(y_true: &Matrix<f64>) -> Vec<f64> {
    let n = y_true.n_rows();
    if y_true.n_cols() > 1 {
        let last = y_true.n_cols() - 1;
        return (0..n).map(|i| y_true.get(i, last)).collect();
    }
    let signed = y_true.as_slice().iter().any(|v| *v < 0.0);
    let cut = if signed { 0.0 } else { 0.5 };
    (0..n)
        .map(|i| f64::from(u8::from(y_true.get(i, 0) > cut)))
        .collect()
}

/// Positive-class score from a score column or a one-hot matrix (last
/// column is the positive class).
pub(crate) fn positive_score(pred: &Matrix<f64>) -> Vec<f64> {
    let n = pred.n_rows();
    if pred.n_cols() > 1 {
        let last = pred.n_cols() - 1;
        return (0..n).map(|i| pred.get(i, last)).collect();
    }
    (0..n).map(|i| pred.get(i, 0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::column;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Latent binary confounder U with mixing probability `p_u`; W and C
    /// are noisy readouts of U, Y depends on X and U.
    fn synth_domain(n: usize, p_u: f64, seed: u64) -> DomainData {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Vec::with_capacity(n);
        let mut w = Vec::with_capacity(n);
        let mut c = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let u = f64::from(u8::from(rng.gen::<f64>() < p_u));
            let xi: f64 = rng.gen_range(-1.0..1.0);
            let wi = u + 0.1 * rng.gen_range(-1.0..1.0);
            let ci = 0.5 * xi + u + 0.1 * rng.gen_range(-1.0..1.0);
            let yi = xi + 2.0 * u + 0.05 * rng.gen_range(-1.0..1.0);
            x.push(xi);
            w.push(wi);
            c.push(ci);
            y.push(yi);
        }
        DomainData::new(column(&x), column(&w))
            .and_then(|d| d.with_c(column(&c)))
            .and_then(|d| d.with_y(column(&y)))
            .expect("aligned blocks")
    }

    fn fitted_model(train_target: bool) -> KernelAdaptation {
        let source = synth_domain(90, 0.9, 7);
        let target = synth_domain(90, 0.2, 8);
        let config = AdaptConfig::new(Strategy::FullAdapt).with_lam_set(LamSet {
            cme: Some(1e-3),
            h0: Some(1e-3),
            ..LamSet::default()
        });
        let mut model = KernelAdaptation::new(source, target, config).expect("valid config");
        model.fit(Task::Regression, train_target).expect("fit");
        model
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let source = synth_domain(30, 0.9, 1);
        let target = synth_domain(30, 0.2, 2);
        let model =
            KernelAdaptation::new(source, target, AdaptConfig::new(Strategy::FullAdapt))
                .expect("valid config");
        let err = model
            .predict(&column(&[0.0]), Domain::Source, Domain::Source)
            .unwrap_err();
        assert!(matches!(err, AdaptarError::NotFitted { .. }));
    }

    #[test]
    fn test_untrained_target_bridge_fails() {
        let model = fitted_model(false);
        let err = model
            .predict(&column(&[0.0]), Domain::Target, Domain::Target)
            .unwrap_err();
        assert!(matches!(err, AdaptarError::NotFitted { .. }));
    }

    #[test]
    fn test_domain_predictors_differ_under_shift() {
        let model = fitted_model(true);
        let test_x = column(&[-0.8, -0.4, 0.0, 0.4, 0.8]);
        let pred_s = model
            .predict(&test_x, Domain::Source, Domain::Source)
            .expect("source bundle");
        let pred_t = model
            .predict(&test_x, Domain::Target, Domain::Target)
            .expect("target bundle");
        let diff: f64 = (0..5)
            .map(|i| (pred_s.get(i, 0) - pred_t.get(i, 0)).powi(2))
            .sum::<f64>()
            / 5.0;
        assert!(diff > 1e-4, "shifted domains must disagree, got {diff}");
    }

    #[test]
    fn test_evaluation_covers_all_combos_when_target_trained() {
        let model = fitted_model(true);
        let source_test = synth_domain(40, 0.9, 11);
        let target_test = synth_domain(40, 0.2, 12);
        let records = model
            .evaluation(&source_test, &target_test)
            .expect("labelled test sets");
        assert_eq!(records.len(), 5);
        for record in &records {
            assert!(record.errors.contains_key("l2"));
        }
    }

    #[test]
    fn test_evaluation_skips_missing_target_bridge() {
        let model = fitted_model(false);
        let source_test = synth_domain(40, 0.9, 11);
        let target_test = synth_domain(40, 0.2, 12);
        let records = model
            .evaluation(&source_test, &target_test)
            .expect("labelled test sets");
        let combos: Vec<Combo> = records.iter().map(|r| r.combo).collect();
        assert_eq!(
            combos,
            vec![Combo::SourceSource, Combo::SourceTarget, Combo::Adaptation]
        );
    }

    #[test]
    fn test_params_round_trip_reproduces_fit() {
        let mut a = fitted_model(false);
        let params = a.get_params();

        let mut b = KernelAdaptation::new(
            a.source_train().clone(),
            a.target_train().clone(),
            AdaptConfig::new(Strategy::FullAdapt).with_scale(2.5),
        )
        .expect("valid config");
        b.set_params(params).expect("round-tripped config");
        b.fit(Task::Regression, false).expect("fit");
        a.fit(Task::Regression, false).expect("refit");

        let test_x = column(&[-0.5, 0.0, 0.5]);
        let pa = a
            .predict(&test_x, Domain::Source, Domain::Target)
            .expect("fitted");
        let pb = b
            .predict(&test_x, Domain::Source, Domain::Target)
            .expect("fitted");
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_set_params_clears_fitted_state() {
        let mut model = fitted_model(false);
        assert!(model.is_fitted());
        let params = model.get_params();
        model.set_params(params).expect("valid config");
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let source = synth_domain(30, 0.9, 1);
        let target = synth_domain(30, 0.2, 2);
        let config = AdaptConfig::new(Strategy::FullAdapt).with_scale(0.0);
        assert!(KernelAdaptation::new(source, target, config).is_err());
    }

    #[test]
    fn test_multi_env_fit_and_predict() {
        // Two source environments with different confounder mixtures,
        // labelled by Z; target carries no labels.
        let env0 = attach_z(synth_domain(45, 0.9, 3), 0.0);
        let env1 = attach_z(synth_domain(45, 0.6, 4), 1.0);
        let source = DomainData::concat(&[env0, env1]).expect("same widths");
        let target = synth_domain(60, 0.2, 5);

        let config = AdaptConfig::new(Strategy::MultiEnv).with_lam_set(LamSet {
            cme: Some(1e-3),
            m0: Some(1e-3),
            ..LamSet::default()
        });
        let mut model = KernelAdaptation::new(source, target, config).expect("valid config");
        model.fit(Task::Regression, false).expect("fit");

        let test_x = column(&[-0.5, 0.0, 0.5]);
        let pred = model
            .predict(&test_x, Domain::Source, Domain::Target)
            .expect("adapted combination");
        assert_eq!(pred.shape(), (3, 1));
        assert!(pred.is_finite());
    }

    fn attach_z(data: DomainData, label: f64) -> DomainData {
        let z = column(&vec![label; data.n_samples()]);
        data.with_z(z).expect("aligned")
    }

    #[test]
    fn test_multi_env_requires_z_block() {
        let source = synth_domain(45, 0.9, 3);
        let target = synth_domain(45, 0.2, 5);
        let mut model = KernelAdaptation::new(
            source,
            target,
            AdaptConfig::new(Strategy::MultiEnv),
        )
        .expect("valid config");
        let err = model.fit(Task::Regression, false).unwrap_err();
        assert!(err.to_string().contains("missing variable block Z"));
    }

    #[test]
    fn test_classification_predict_proba() {
        let mut rng = StdRng::seed_from_u64(21);
        let make = |p_u: f64, rng: &mut StdRng| {
            let n = 90;
            let mut x = Vec::new();
            let mut w = Vec::new();
            let mut c = Vec::new();
            let mut y = Vec::new();
            for _ in 0..n {
                let u = f64::from(u8::from(rng.gen::<f64>() < p_u));
                let xi: f64 = rng.gen_range(-1.0..1.0);
                x.push(xi);
                w.push(u + 0.1 * rng.gen_range(-1.0..1.0));
                c.push(0.5 * xi + u + 0.1 * rng.gen_range(-1.0..1.0));
                // One-hot class = whether X + U crosses 0.5.
                let class = usize::from(xi + u > 0.5);
                y.push([f64::from(u8::from(class == 0)), f64::from(u8::from(class == 1))]);
            }
            let y_flat: Vec<f64> = y.iter().flatten().copied().collect();
            DomainData::new(column(&x), column(&w))
                .and_then(|d| d.with_c(column(&c)))
                .and_then(|d| d.with_y(Matrix::from_vec(n, 2, y_flat).expect("matrix")))
                .expect("aligned blocks")
        };
        let source = make(0.9, &mut rng);
        let target = make(0.2, &mut rng);

        let config = AdaptConfig::new(Strategy::FullAdapt).with_lam_set(LamSet {
            cme: Some(1e-3),
            h0: Some(1e-3),
            ..LamSet::default()
        });
        let mut model = KernelAdaptation::new(source, target, config).expect("valid config");
        model.fit(Task::Classification, false).expect("fit");

        let test_x = column(&[-0.7, 0.0, 0.7]);
        let proba = model.predict_proba(&test_x).expect("classification fit");
        assert_eq!(proba.shape(), (3, 2));
        for i in 0..3 {
            assert!((proba.get(i, 0) + proba.get(i, 1) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_positive_class_is_last_one_hot_column() {
        // Three-class one-hot: the last column marks the positive class,
        // so the middle column must never be picked up.
        let labels = Matrix::from_vec(
            2,
            3,
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        )
        .expect("matrix");
        assert_eq!(positive_indicator(&labels), vec![0.0, 1.0]);

        let scores = Matrix::from_vec(
            2,
            3,
            vec![0.1, 0.2, 0.7, 0.5, 0.3, 0.2],
        )
        .expect("matrix");
        assert_eq!(positive_score(&scores), vec![0.7, 0.2]);
    }

    #[test]
    fn test_regression_predict_proba_rejected() {
        let model = fitted_model(false);
        assert!(model.predict_proba(&column(&[0.0])).is_err());
    }
}
