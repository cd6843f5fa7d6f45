//! Tagged per-domain datasets and covariate sets.
//!
//! A domain dataset is a row-aligned collection of named variable blocks:
//! covariates `X`, a confounder proxy `W`, an optional outcome-mechanism
//! proxy `C`, an optional environment label `Z`, and an optional outcome
//! `Y`. Row `i` is the same observational unit in every block; this is
//! validated at construction, not at first use inside a fit.

use crate::error::{AdaptarError, Result};
use crate::primitives::Matrix;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Variable-block names in a domain dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Block {
    /// Observed covariates.
    X,
    /// Proxy for the latent confounder.
    W,
    /// Proxy for the outcome mechanism.
    C,
    /// Environment label (multi-source settings).
    Z,
    /// Outcome.
    Y,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Block::X => "X",
            Block::W => "W",
            Block::C => "C",
            Block::Z => "Z",
            Block::Y => "Y",
        };
        write!(f, "{name}")
    }
}

/// Ordered mapping from block name to a 2-D value matrix, supplied at fit
/// and prediction time.
pub type CovariateSet = BTreeMap<Block, Matrix<f64>>;

/// A row-aligned per-domain dataset.
///
/// `X` and `W` are always required; `C`, `Z` and `Y` depend on the
/// adaptation strategy and on whether the domain carries outcome labels.
///
/// # Examples
///
/// ```
/// use adaptar::dataset::DomainData;
/// use adaptar::primitives::Matrix;
///
/// let x = Matrix::from_vec(3, 1, vec![0.0, 1.0, 2.0]).expect("matrix");
/// let w = Matrix::from_vec(3, 1, vec![0.1, 0.9, 0.0]).expect("matrix");
/// let data = DomainData::new(x, w).expect("row-aligned blocks");
/// assert_eq!(data.n_samples(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainData {
    x: Matrix<f64>,
    w: Matrix<f64>,
    c: Option<Matrix<f64>>,
    z: Option<Matrix<f64>>,
    y: Option<Matrix<f64>>,
}

impl DomainData {
    /// Creates a dataset from the required `X` and `W` blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if row counts differ or either block is empty.
    pub fn new(x: Matrix<f64>, w: Matrix<f64>) -> Result<Self> {
        if x.n_rows() == 0 {
            return Err(AdaptarError::InvalidConfig {
                message: "domain dataset must contain at least one sample".to_string(),
            });
        }
        if x.n_rows() != w.n_rows() {
            return Err(AdaptarError::shape_mismatch(
                format!("W with {} rows", x.n_rows()),
                format!("{} rows", w.n_rows()),
            ));
        }
        Ok(Self {
            x,
            w,
            c: None,
            z: None,
            y: None,
        })
    }

    /// Attaches the outcome-mechanism proxy block `C`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row count differs from `X`.
    pub fn with_c(mut self, c: Matrix<f64>) -> Result<Self> {
        self.check_rows(&c, Block::C)?;
        self.c = Some(c);
        Ok(self)
    }

    /// Attaches the environment label block `Z`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row count differs from `X`.
    pub fn with_z(mut self, z: Matrix<f64>) -> Result<Self> {
        self.check_rows(&z, Block::Z)?;
        self.z = Some(z);
        Ok(self)
    }

    /// Attaches the outcome block `Y`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row count differs from `X`.
    pub fn with_y(mut self, y: Matrix<f64>) -> Result<Self> {
        self.check_rows(&y, Block::Y)?;
        self.y = Some(y);
        Ok(self)
    }

    fn check_rows(&self, m: &Matrix<f64>, block: Block) -> Result<()> {
        if m.n_rows() != self.x.n_rows() {
            return Err(AdaptarError::shape_mismatch(
                format!("{block} with {} rows", self.x.n_rows()),
                format!("{} rows", m.n_rows()),
            ));
        }
        Ok(())
    }

    /// Number of aligned rows shared by every block.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.x.n_rows()
    }

    /// Looks up a block by name.
    #[must_use]
    pub fn block(&self, block: Block) -> Option<&Matrix<f64>> {
        match block {
            Block::X => Some(&self.x),
            Block::W => Some(&self.w),
            Block::C => self.c.as_ref(),
            Block::Z => self.z.as_ref(),
            Block::Y => self.y.as_ref(),
        }
    }

    /// Looks up a block, failing with [`AdaptarError::MissingBlock`].
    ///
    /// # Errors
    ///
    /// Returns an error naming the stage that needed the block.
    pub fn require(&self, block: Block, stage: &str) -> Result<&Matrix<f64>> {
        self.block(block)
            .ok_or_else(|| AdaptarError::missing_block(&block.to_string(), stage))
    }

    /// Returns true if the domain carries outcome labels.
    #[must_use]
    pub fn has_outcome(&self) -> bool {
        self.y.is_some()
    }

    /// Builds a covariate set from the requested blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if any requested block is absent.
    pub fn covariates(&self, blocks: &[Block], stage: &str) -> Result<CovariateSet> {
        let mut set = CovariateSet::new();
        for &b in blocks {
            set.insert(b, self.require(b, stage)?.clone());
        }
        Ok(set)
    }

    /// Returns the dataset restricted to the given rows, in order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select_rows(indices),
            w: self.w.select_rows(indices),
            c: self.c.as_ref().map(|m| m.select_rows(indices)),
            z: self.z.as_ref().map(|m| m.select_rows(indices)),
            y: self.y.as_ref().map(|m| m.select_rows(indices)),
        }
    }

    /// Splits the dataset into three disjoint partitions at roughly
    /// 33%/33%/34%, using a seeded permutation of this dataset's rows.
    ///
    /// The three sequential estimation stages each train on one partition
    /// so the bridge stage never sees the rows that fitted the embedding
    /// it consumes.
    ///
    /// # Errors
    ///
    /// Returns an error if any partition would come out empty (fewer
    /// than four rows): an empty partition would fit a degenerate 0-row
    /// stage instead of failing.
    pub fn split3(&self, seed: u64) -> Result<[Self; 3]> {
        let n = self.n_samples();
        let a = (0.33 * n as f64) as usize;
        let b = (0.67 * n as f64) as usize;
        if a == 0 || b == a || n == b {
            return Err(AdaptarError::InvalidConfig {
                message: format!("{n} rows cannot fill three disjoint partitions"),
            });
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        Ok([
            self.select_rows(&indices[..a]),
            self.select_rows(&indices[a..b]),
            self.select_rows(&indices[b..]),
        ])
    }

    /// Row-concatenates several per-environment datasets into one.
    ///
    /// Optional blocks are carried only when present in every input.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty or column widths differ.
    pub fn concat(parts: &[DomainData]) -> Result<Self> {
        let first = parts.first().ok_or_else(|| AdaptarError::InvalidConfig {
            message: "cannot concatenate an empty list of environments".to_string(),
        })?;

        let mut out = first.clone();
        for part in &parts[1..] {
            out.x = out.x.vstack(&part.x).map_err(AdaptarError::from)?;
            out.w = out.w.vstack(&part.w).map_err(AdaptarError::from)?;
            out.c = stack_option(out.c.take(), part.c.as_ref())?;
            out.z = stack_option(out.z.take(), part.z.as_ref())?;
            out.y = stack_option(out.y.take(), part.y.as_ref())?;
        }
        Ok(out)
    }
}

fn stack_option(
    acc: Option<Matrix<f64>>,
    next: Option<&Matrix<f64>>,
) -> Result<Option<Matrix<f64>>> {
    match (acc, next) {
        (Some(a), Some(b)) => Ok(Some(a.vstack(b).map_err(AdaptarError::from)?)),
        _ => Ok(None),
    }
}

/// Reshapes a flat slice into an (n, 1) column matrix.
///
/// Convenience for callers holding 1-D outcome or proxy arrays.
#[must_use]
pub fn column(values: &[f64]) -> Matrix<f64> {
    Matrix::from_vec(values.len(), 1, values.to_vec())
        .expect("length always equals rows * 1")
}
