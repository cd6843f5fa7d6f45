//! Kernel kinds and the Gram-matrix engine.
//!
//! Every estimator stage declares, per variable block, which kernel to
//! evaluate. Blocks combine by the product rule: concatenated covariates
//! (and concatenated outcome blocks such as Y = (W, C)) are treated as
//! independent factors, so the combined Gram matrix is the elementwise
//! product of the per-block Gram matrices.

use crate::dataset::{Block, CovariateSet};
use crate::error::{AdaptarError, Result};
use crate::primitives::Matrix;
use serde::{Deserialize, Serialize};

/// Kernel function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    /// Radial-basis kernel with a shared length-scale.
    Rbf,
    /// Exact-match indicator kernel for categorical/binary blocks.
    Binary,
}

/// Kernel assignment for one (sub-)block, with an optional explicit
/// column width used when a single matrix concatenates several blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockKernel {
    /// Kernel function for this block.
    pub kind: KernelKind,
    /// Column width inside a concatenated matrix; `None` means the whole
    /// matrix.
    pub dim: Option<usize>,
}

impl BlockKernel {
    /// RBF kernel over the whole block.
    #[must_use]
    pub fn rbf() -> Self {
        Self {
            kind: KernelKind::Rbf,
            dim: None,
        }
    }

    /// Exact-match indicator kernel over the whole block.
    #[must_use]
    pub fn binary() -> Self {
        Self {
            kind: KernelKind::Binary,
            dim: None,
        }
    }

    /// Restricts the kernel to the first `dim` unclaimed columns of a
    /// concatenated matrix.
    #[must_use]
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    /// Gram matrix under this kernel, honoring a declared `dim`.
    ///
    /// With `dim` unset the whole matrix is one block; with `dim` set the
    /// declared width must cover the matrix exactly, so a stale width is
    /// an error rather than a silently widened kernel.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared width doesn't match the matrix,
    /// the column widths of `a` and `b` differ, or the scale is invalid.
    pub fn gram(&self, a: &Matrix<f64>, b: &Matrix<f64>, scale: f64) -> Result<Matrix<f64>> {
        gram_concat(a, b, std::slice::from_ref(self), scale)
    }
}

/// Per-stage kernel specification: an ordered list of blocks and their
/// kernels. Constructed once, validated, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageKernel {
    entries: Vec<(Block, BlockKernel)>,
}

impl StageKernel {
    /// Builds a stage spec assigning the RBF kernel to each listed block.
    #[must_use]
    pub fn rbf(blocks: &[Block]) -> Self {
        Self {
            entries: blocks.iter().map(|&b| (b, BlockKernel::rbf())).collect(),
        }
    }

    /// Adds a block with an explicit kernel.
    #[must_use]
    pub fn with_block(mut self, block: Block, kernel: BlockKernel) -> Self {
        self.entries.push((block, kernel));
        self
    }

    /// Ordered list of blocks this stage consumes.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.entries.iter().map(|(b, _)| *b).collect()
    }

    /// Kernel assigned to a block, if the block is part of this stage.
    #[must_use]
    pub fn kernel_for(&self, block: Block) -> Option<BlockKernel> {
        self.entries
            .iter()
            .find(|(b, _)| *b == block)
            .map(|(_, k)| *k)
    }

    /// Combined Gram matrix between two covariate sets.
    ///
    /// Evaluates each block's kernel between `a` and `b` and multiplies
    /// the per-block Gram matrices elementwise.
    ///
    /// # Errors
    ///
    /// Fails fast with [`AdaptarError::MissingBlock`] if either set lacks
    /// a block this stage requires.
    pub fn gram(
        &self,
        a: &CovariateSet,
        b: &CovariateSet,
        scale: f64,
        stage: &str,
    ) -> Result<Matrix<f64>> {
        if self.entries.is_empty() {
            return Err(AdaptarError::InvalidConfig {
                message: format!("stage {stage} has an empty kernel specification"),
            });
        }

        let mut combined: Option<Matrix<f64>> = None;
        for (block, kernel) in &self.entries {
            let lhs = a
                .get(block)
                .ok_or_else(|| AdaptarError::missing_block(&block.to_string(), stage))?;
            let rhs = b
                .get(block)
                .ok_or_else(|| AdaptarError::missing_block(&block.to_string(), stage))?;
            let g = kernel.gram(lhs, rhs, scale)?;
            combined = Some(match combined {
                None => g,
                Some(acc) => acc.hadamard(&g).map_err(AdaptarError::from)?,
            });
        }
        Ok(combined.expect("at least one entry checked above"))
    }
}

/// Gram matrix for a single block under one kernel kind.
///
/// # Errors
///
/// Returns an error if the column widths of `a` and `b` differ or the
/// scale is not positive for an RBF kernel.
pub fn gram_block(
    a: &Matrix<f64>,
    b: &Matrix<f64>,
    kind: KernelKind,
    scale: f64,
) -> Result<Matrix<f64>> {
    if a.n_cols() != b.n_cols() {
        return Err(AdaptarError::shape_mismatch(
            format!("{} columns", a.n_cols()),
            format!("{} columns", b.n_cols()),
        ));
    }
    match kind {
        KernelKind::Rbf => rbf_gram(a, b, scale),
        KernelKind::Binary => Ok(binary_gram(a, b)),
    }
}

/// RBF Gram matrix: `k(u, v) = exp(-||u - v||^2 / (2 * scale^2))`.
fn rbf_gram(a: &Matrix<f64>, b: &Matrix<f64>, scale: f64) -> Result<Matrix<f64>> {
    if scale <= 0.0 {
        return Err(AdaptarError::InvalidHyperparameter {
            param: "scale".to_string(),
            value: scale.to_string(),
            constraint: "> 0".to_string(),
        });
    }

    let (n, d) = a.shape();
    let m = b.n_rows();
    let denom = 2.0 * scale * scale;
    let mut out = Matrix::zeros(n, m);
    for i in 0..n {
        for j in 0..m {
            let mut dist = 0.0;
            for k in 0..d {
                let diff = a.get(i, k) - b.get(j, k);
                dist += diff * diff;
            }
            out.set(i, j, (-dist / denom).exp());
        }
    }
    Ok(out)
}

/// Exact-match indicator Gram matrix: 1.0 when every column agrees.
fn binary_gram(a: &Matrix<f64>, b: &Matrix<f64>) -> Matrix<f64> {
    let (n, d) = a.shape();
    let m = b.n_rows();
    let mut out = Matrix::zeros(n, m);
    for i in 0..n {
        for j in 0..m {
            let equal = (0..d).all(|k| (a.get(i, k) - b.get(j, k)).abs() < f64::EPSILON);
            if equal {
                out.set(i, j, 1.0);
            }
        }
    }
    out
}

/// Combined Gram matrix for a concatenated outcome matrix split into
/// sub-blocks by each kernel's `dim` (product rule across sub-blocks).
///
/// # Errors
///
/// Returns an error if the declared widths don't cover the matrix.
pub fn gram_concat(
    a: &Matrix<f64>,
    b: &Matrix<f64>,
    kernels: &[BlockKernel],
    scale: f64,
) -> Result<Matrix<f64>> {
    if kernels.len() == 1 && kernels[0].dim.is_none() {
        return gram_block(a, b, kernels[0].kind, scale);
    }

    let mut start = 0;
    let mut combined: Option<Matrix<f64>> = None;
    for kernel in kernels {
        let width = kernel.dim.ok_or_else(|| AdaptarError::InvalidConfig {
            message: "concatenated kernel entries need explicit dims".to_string(),
        })?;
        let end = start + width;
        if end > a.n_cols() {
            return Err(AdaptarError::shape_mismatch(
                format!("<= {} columns", a.n_cols()),
                format!("{end} columns"),
            ));
        }
        let g = gram_block(
            &a.slice_cols(start, end),
            &b.slice_cols(start, end),
            kernel.kind,
            scale,
        )?;
        combined = Some(match combined {
            None => g,
            Some(acc) => acc.hadamard(&g).map_err(AdaptarError::from)?,
        });
        start = end;
    }
    if start != a.n_cols() {
        return Err(AdaptarError::shape_mismatch(
            format!("{} columns covered by kernel dims", a.n_cols()),
            format!("{start}"),
        ));
    }
    Ok(combined.expect("kernels list is non-empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::column;

    #[test]
    fn test_rbf_gram_diagonal_is_one() {
        let x = column(&[0.0, 1.0, 2.5]);
        let g = gram_block(&x, &x, KernelKind::Rbf, 1.0).expect("valid scale");
        for i in 0..3 {
            assert!((g.get(i, i) - 1.0).abs() < 1e-12);
        }
        // Symmetry.
        assert!((g.get(0, 1) - g.get(1, 0)).abs() < 1e-12);
        // Closer points are more similar.
        assert!(g.get(0, 1) > g.get(0, 2));
    }

    #[test]
    fn test_rbf_gram_known_value() {
        let a = column(&[0.0]);
        let b = column(&[1.0]);
        let g = gram_block(&a, &b, KernelKind::Rbf, 1.0).expect("valid scale");
        assert!((g.get(0, 0) - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_rbf_rejects_nonpositive_scale() {
        let x = column(&[0.0, 1.0]);
        assert!(gram_block(&x, &x, KernelKind::Rbf, 0.0).is_err());
    }

    #[test]
    fn test_binary_gram_exact_match() {
        let a = column(&[0.0, 1.0, 1.0]);
        let b = column(&[1.0, 0.0]);
        let g = gram_block(&a, &b, KernelKind::Binary, 1.0).expect("widths match");
        assert_eq!(g.get(0, 0), 0.0);
        assert_eq!(g.get(0, 1), 1.0);
        assert_eq!(g.get(1, 0), 1.0);
        assert_eq!(g.get(2, 0), 1.0);
    }

    #[test]
    fn test_stage_gram_is_product_of_blocks() {
        let x = column(&[0.0, 1.0]);
        let c = column(&[2.0, 2.0]);
        let mut covars = CovariateSet::new();
        covars.insert(Block::X, x.clone());
        covars.insert(Block::C, c.clone());

        let stage = StageKernel::rbf(&[Block::X, Block::C]);
        let g = stage.gram(&covars, &covars, 1.0, "cme_w_xc").expect("blocks present");

        let gx = gram_block(&x, &x, KernelKind::Rbf, 1.0).expect("scale");
        let gc = gram_block(&c, &c, KernelKind::Rbf, 1.0).expect("scale");
        let expected = gx.hadamard(&gc).expect("shapes match");
        assert_eq!(g, expected);
    }

    #[test]
    fn test_stage_gram_missing_block_fails_fast() {
        let mut covars = CovariateSet::new();
        covars.insert(Block::X, column(&[0.0, 1.0]));

        let stage = StageKernel::rbf(&[Block::X, Block::C]);
        let err = stage.gram(&covars, &covars, 1.0, "cme_w_xc").unwrap_err();
        assert!(err.to_string().contains("missing variable block C"));
    }

    #[test]
    fn test_gram_concat_splits_by_dim() {
        // Two columns: first is W, second is C.
        let wc = Matrix::from_vec(2, 2, vec![0.0, 5.0, 1.0, 5.0]).expect("matrix");
        let kernels = [
            BlockKernel::rbf().with_dim(1),
            BlockKernel::rbf().with_dim(1),
        ];
        let g = gram_concat(&wc, &wc, &kernels, 1.0).expect("dims cover matrix");

        let w = wc.slice_cols(0, 1);
        let c = wc.slice_cols(1, 2);
        let gw = gram_block(&w, &w, KernelKind::Rbf, 1.0).expect("scale");
        let gc = gram_block(&c, &c, KernelKind::Rbf, 1.0).expect("scale");
        assert_eq!(g, gw.hadamard(&gc).expect("shapes match"));
    }

    #[test]
    fn test_block_kernel_gram_honors_declared_dim() {
        let wc = Matrix::from_vec(2, 2, vec![0.0, 5.0, 1.0, 6.0]).expect("matrix");
        // A width narrower than the matrix is an error, never a silently
        // widened kernel.
        assert!(BlockKernel::rbf().with_dim(1).gram(&wc, &wc, 1.0).is_err());
        // A full-width declaration is equivalent to no declaration.
        let declared = BlockKernel::rbf().with_dim(2).gram(&wc, &wc, 1.0).expect("covered");
        let plain = BlockKernel::rbf().gram(&wc, &wc, 1.0).expect("whole block");
        assert_eq!(declared, plain);
    }

    #[test]
    fn test_stage_gram_rejects_stale_dim() {
        let mut covars = CovariateSet::new();
        covars.insert(
            Block::X,
            Matrix::from_vec(2, 2, vec![0.0, 1.0, 2.0, 3.0]).expect("matrix"),
        );
        let stage =
            StageKernel::rbf(&[]).with_block(Block::X, BlockKernel::rbf().with_dim(1));
        assert!(stage.gram(&covars, &covars, 1.0, "cme_w_x").is_err());
    }

    #[test]
    fn test_gram_concat_rejects_uncovered_columns() {
        let wc = Matrix::from_vec(2, 3, vec![0.0; 6]).expect("matrix");
        let kernels = [BlockKernel::rbf().with_dim(1), BlockKernel::rbf().with_dim(1)];
        assert!(gram_concat(&wc, &wc, &kernels, 1.0).is_err());
    }
}
