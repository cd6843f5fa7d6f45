//! Core compute primitives (Vector, Matrix).
//!
//! Dense row-major `f64` containers backing the kernel pipeline. Gram
//! matrices are symmetric positive definite after regularization, so the
//! solve path is Cholesky-based throughout.

mod matrix;
mod vector;

pub use matrix::Matrix;
pub use vector::Vector;
