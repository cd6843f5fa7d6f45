//! Adaptar: kernel proximal causal inference for domain adaptation.
//!
//! Adaptar estimates causal effects under domain shift when the latent
//! confounder is observed only through proxy variables. A first-stage
//! conditional mean embedding lifts the confounder proxy into an RKHS, a
//! second-stage bridge function regresses the outcome against that
//! embedding, and composing the source-domain bridge with the target
//! domain's embedding yields an adapted predictor without target labels.
//!
//! # Quick Start
//!
//! ```no_run
//! use adaptar::prelude::*;
//! # fn domains() -> (DomainData, DomainData) { unimplemented!() }
//!
//! // Source domain carries X, W, C, Y; target only needs X and W.
//! let (source_train, target_train) = domains();
//!
//! let config = AdaptConfig::new(Strategy::FullAdapt);
//! let mut model = KernelAdaptation::new(source_train, target_train, config)?;
//! model.fit(Task::Regression, false)?;
//!
//! // Source bridge + target embedding = adapted prediction.
//! # let test_x = Matrix::zeros(1, 1);
//! let adapted = model.predict(&test_x, Domain::Source, Domain::Target)?;
//! # Ok::<(), AdaptarError>(())
//! ```
//!
//! # Modules
//!
//! - [`primitives`]: Core Vector and Matrix types
//! - [`dataset`]: Tagged per-domain datasets and variable blocks
//! - [`kernel`]: Kernel kinds and the Gram-matrix engine
//! - [`cme`]: Conditional mean embeddings (stage-1 kernel ridge)
//! - [`bridge`]: Bridge functions (stage-2 lifted-feature ridge)
//! - [`adaptation`]: Domain-adaptation orchestrator and scoring
//! - [`model_selection`]: Cross-validated bandwidth search
//! - [`metrics`]: Evaluation metrics

pub mod adaptation;
pub mod bridge;
pub mod cme;
pub mod dataset;
pub mod error;
pub mod kernel;
pub mod metrics;
pub mod model_selection;
pub mod prelude;
pub mod primitives;
