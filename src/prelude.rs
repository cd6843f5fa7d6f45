//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use adaptar::prelude::*;
//! ```

pub use crate::adaptation::{
    AdaptConfig, Combo, Domain, EvalRecord, KernelAdaptation, KernelSpecs, LamSet, Strategy,
};
pub use crate::bridge::{BridgeFunction, Task};
pub use crate::cme::{CmeOptions, ConditionalMeanEmbed, OutcomeBlock, SolveMethod};
pub use crate::dataset::{column, Block, CovariateSet, DomainData};
pub use crate::error::{AdaptarError, Result};
pub use crate::kernel::{BlockKernel, KernelKind, StageKernel};
pub use crate::metrics::{accuracy, mse, roc_auc};
pub use crate::model_selection::{tune_adapt_model_cv, KFold, TuneOptions, TuneResult};
pub use crate::primitives::{Matrix, Vector};
