//! Matrix type for 2D numeric data.

use super::Vector;
use crate::error::{AdaptarError, Result};
use serde::{Deserialize, Serialize};

/// A 2D matrix of floating-point values (row-major storage).
///
/// # Examples
///
/// ```
/// use adaptar::primitives::Matrix;
///
/// let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("data length matches rows * cols");
/// assert_eq!(m.shape(), (2, 3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Copy> Matrix<T> {
    /// Creates a new matrix from a vector of data.
    ///
    /// # Errors
    ///
    /// Returns an error if data length doesn't match rows * cols.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> std::result::Result<Self, &'static str> {
        if data.len() != rows * cols {
            return Err("Data length must equal rows * cols");
        }
        Ok(Self { data, rows, cols })
    }

    /// Returns the shape as (rows, cols).
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.cols
    }

    /// Gets element at (row, col).
    ///
    /// # Panics
    ///
    /// Panics if indices are out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.cols + col]
    }

    /// Sets element at (row, col).
    ///
    /// # Panics
    ///
    /// Panics if indices are out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.cols + col] = value;
    }

    /// Returns a row as a Vector.
    #[must_use]
    pub fn row(&self, row_idx: usize) -> Vector<T> {
        let start = row_idx * self.cols;
        let end = start + self.cols;
        Vector::from_slice(&self.data[start..end])
    }

    /// Returns a column as a Vector.
    #[must_use]
    pub fn column(&self, col_idx: usize) -> Vector<T> {
        let data: Vec<T> = (0..self.rows)
            .map(|row| self.data[row * self.cols + col_idx])
            .collect();
        Vector::from_vec(data)
    }

    /// Returns the underlying data as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Returns a new matrix containing the given rows, in order.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &idx in indices {
            let start = idx * self.cols;
            data.extend_from_slice(&self.data[start..start + self.cols]);
        }
        Self {
            data,
            rows: indices.len(),
            cols: self.cols,
        }
    }

    /// Returns a new matrix containing the column range `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    #[must_use]
    pub fn slice_cols(&self, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= self.cols, "column range out of bounds");
        let mut data = Vec::with_capacity(self.rows * (end - start));
        for i in 0..self.rows {
            let base = i * self.cols;
            data.extend_from_slice(&self.data[base + start..base + end]);
        }
        Self {
            data,
            rows: self.rows,
            cols: end - start,
        }
    }
}

impl Matrix<f64> {
    /// Creates a matrix of zeros.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Creates an identity matrix.
    #[must_use]
    pub fn eye(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self {
            data,
            rows: n,
            cols: n,
        }
    }

    /// Creates an (n, 1) column matrix from a vector.
    #[must_use]
    pub fn from_column(v: &Vector<f64>) -> Self {
        Self {
            data: v.as_slice().to_vec(),
            rows: v.len(),
            cols: 1,
        }
    }

    /// Transposes the matrix.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut data = vec![0.0; self.rows * self.cols];
        for i in 0..self.rows {
            for j in 0..self.cols {
                data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        Self {
            data,
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Matrix-matrix multiplication.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn matmul(&self, other: &Self) -> std::result::Result<Self, &'static str> {
        if self.cols != other.rows {
            return Err("Matrix dimensions don't match for multiplication");
        }

        let mut result = vec![0.0; self.rows * other.cols];
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                let row_base = k * other.cols;
                let out_base = i * other.cols;
                for j in 0..other.cols {
                    result[out_base + j] += a * other.data[row_base + j];
                }
            }
        }

        Ok(Self {
            data: result,
            rows: self.rows,
            cols: other.cols,
        })
    }

    /// Matrix-vector multiplication.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn matvec(&self, vec: &Vector<f64>) -> std::result::Result<Vector<f64>, &'static str> {
        if self.cols != vec.len() {
            return Err("Matrix columns must match vector length");
        }

        let result: Vec<f64> = (0..self.rows)
            .map(|i| {
                let row = &self.data[i * self.cols..(i + 1) * self.cols];
                row.iter().zip(vec.as_slice()).map(|(a, b)| a * b).sum()
            })
            .collect();

        Ok(Vector::from_vec(result))
    }

    /// Adds another matrix element-wise.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn add(&self, other: &Self) -> std::result::Result<Self, &'static str> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err("Matrix dimensions must match for addition");
        }

        let data: Vec<f64> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();

        Ok(Self {
            data,
            rows: self.rows,
            cols: self.cols,
        })
    }

    /// Subtracts another matrix element-wise.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn sub(&self, other: &Self) -> std::result::Result<Self, &'static str> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err("Matrix dimensions must match for subtraction");
        }

        let data: Vec<f64> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a - b)
            .collect();

        Ok(Self {
            data,
            rows: self.rows,
            cols: self.cols,
        })
    }

    /// Multiplies each element by a scalar.
    #[must_use]
    pub fn mul_scalar(&self, scalar: f64) -> Self {
        Self {
            data: self.data.iter().map(|x| x * scalar).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Element-wise (Hadamard) product.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn hadamard(&self, other: &Self) -> std::result::Result<Self, &'static str> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err("Matrix dimensions must match for Hadamard product");
        }

        let data: Vec<f64> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();

        Ok(Self {
            data,
            rows: self.rows,
            cols: self.cols,
        })
    }

    /// Horizontally concatenates two matrices with equal row counts.
    ///
    /// # Errors
    ///
    /// Returns an error if row counts differ.
    pub fn hstack(&self, other: &Self) -> std::result::Result<Self, &'static str> {
        if self.rows != other.rows {
            return Err("Matrix row counts must match for hstack");
        }

        let cols = self.cols + other.cols;
        let mut data = Vec::with_capacity(self.rows * cols);
        for i in 0..self.rows {
            data.extend_from_slice(&self.data[i * self.cols..(i + 1) * self.cols]);
            data.extend_from_slice(&other.data[i * other.cols..(i + 1) * other.cols]);
        }

        Ok(Self {
            data,
            rows: self.rows,
            cols,
        })
    }

    /// Vertically concatenates two matrices with equal column counts.
    ///
    /// # Errors
    ///
    /// Returns an error if column counts differ.
    pub fn vstack(&self, other: &Self) -> std::result::Result<Self, &'static str> {
        if self.cols != other.cols {
            return Err("Matrix column counts must match for vstack");
        }

        let mut data = Vec::with_capacity((self.rows + other.rows) * self.cols);
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);

        Ok(Self {
            data,
            rows: self.rows + other.rows,
            cols: self.cols,
        })
    }

    /// Returns true if every element is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Cholesky factorization A = L * L^T (lower factor, row-major).
    ///
    /// # Errors
    ///
    /// Returns [`AdaptarError::SingularMatrix`] if the matrix is not
    /// square or a pivot is non-positive.
    pub fn cholesky(&self) -> Result<Self> {
        if self.rows != self.cols {
            return Err(AdaptarError::InvalidConfig {
                message: "Cholesky factorization requires a square matrix".to_string(),
            });
        }

        let n = self.rows;
        let mut l = vec![0.0; n * n];

        for i in 0..n {
            for j in 0..=i {
                let mut sum = 0.0;

                if i == j {
                    for k in 0..j {
                        sum += l[j * n + k] * l[j * n + k];
                    }
                    let pivot = self.get(j, j) - sum;
                    if pivot <= 0.0 {
                        return Err(AdaptarError::SingularMatrix { pivot });
                    }
                    l[j * n + j] = pivot.sqrt();
                } else {
                    for k in 0..j {
                        sum += l[i * n + k] * l[j * n + k];
                    }
                    l[i * n + j] = (self.get(i, j) - sum) / l[j * n + j];
                }
            }
        }

        Ok(Self {
            data: l,
            rows: n,
            cols: n,
        })
    }

    /// Solves the linear system Ax = b using Cholesky decomposition.
    ///
    /// The matrix must be symmetric positive definite.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is not square, not positive
    /// definite, or the vector length doesn't match.
    pub fn cholesky_solve(&self, b: &Vector<f64>) -> Result<Vector<f64>> {
        if self.rows != b.len() {
            return Err(AdaptarError::shape_mismatch(self.rows, b.len()));
        }
        let l = self.cholesky()?;
        Ok(l.solve_with_factor(b.as_slice()))
    }

    /// Solves AX = B column by column using Cholesky decomposition.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is not square, not positive
    /// definite, or the row counts don't match.
    pub fn cholesky_solve_matrix(&self, b: &Matrix<f64>) -> Result<Matrix<f64>> {
        if self.rows != b.rows {
            return Err(AdaptarError::shape_mismatch(self.rows, b.rows));
        }
        let l = self.cholesky()?;
        Ok(l.factor_solve_matrix(b))
    }

    /// Inverse of a symmetric positive definite matrix via Cholesky.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is not square or not positive
    /// definite.
    pub fn cholesky_inverse(&self) -> Result<Matrix<f64>> {
        self.cholesky_solve_matrix(&Matrix::eye(self.rows))
    }

    /// Solves AX = B against a precomputed lower Cholesky factor of A
    /// (`self` is the factor, not A).
    pub(crate) fn factor_solve_matrix(&self, b: &Matrix<f64>) -> Matrix<f64> {
        let n = self.rows;
        let mut out = Matrix::zeros(n, b.cols);
        for j in 0..b.cols {
            let col: Vec<f64> = (0..n).map(|i| b.get(i, j)).collect();
            let x = self.solve_with_factor(&col);
            for i in 0..n {
                out.set(i, j, x[i]);
            }
        }
        out
    }

    /// Forward/backward substitution against a precomputed lower factor.
    fn solve_with_factor(&self, b: &[f64]) -> Vector<f64> {
        let n = self.rows;
        let l = &self.data;

        // Forward substitution: L * y = b
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += l[i * n + j] * y[j];
            }
            y[i] = (b[i] - sum) / l[i * n + i];
        }

        // Backward substitution: L^T * x = y
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += l[j * n + i] * x[j];
            }
            x[i] = (y[i] - sum) / l[i * n + i];
        }

        Vector::from_vec(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_length_mismatch() {
        let m = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0]);
        assert!(m.is_err());
    }

    #[test]
    fn test_transpose() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("matrix");
        let t = m.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.get(0, 1), 4.0);
        assert_eq!(t.get(2, 0), 3.0);
    }

    #[test]
    fn test_matmul_identity() {
        let m = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).expect("matrix");
        let i = Matrix::eye(2);
        let prod = m.matmul(&i).expect("dimensions match");
        assert_eq!(prod, m);
    }

    #[test]
    fn test_hadamard() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).expect("matrix");
        let b = Matrix::from_vec(2, 2, vec![2.0, 0.5, 1.0, 0.25]).expect("matrix");
        let h = a.hadamard(&b).expect("dimensions match");
        assert_eq!(h.as_slice(), &[2.0, 1.0, 3.0, 1.0]);
    }

    #[test]
    fn test_hstack() {
        let a = Matrix::from_vec(2, 1, vec![1.0, 2.0]).expect("matrix");
        let b = Matrix::from_vec(2, 2, vec![3.0, 4.0, 5.0, 6.0]).expect("matrix");
        let s = a.hstack(&b).expect("row counts match");
        assert_eq!(s.shape(), (2, 3));
        assert_eq!(s.row(0).as_slice(), &[1.0, 3.0, 4.0]);
        assert_eq!(s.row(1).as_slice(), &[2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_select_rows() {
        let m = Matrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("matrix");
        let s = m.select_rows(&[2, 0]);
        assert_eq!(s.shape(), (2, 2));
        assert_eq!(s.row(0).as_slice(), &[5.0, 6.0]);
        assert_eq!(s.row(1).as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_slice_cols() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("matrix");
        let s = m.slice_cols(1, 3);
        assert_eq!(s.shape(), (2, 2));
        assert_eq!(s.row(0).as_slice(), &[2.0, 3.0]);
    }

    #[test]
    fn test_cholesky_solve_spd() {
        // A = [[4, 2], [2, 3]], b = [2, 3] -> x = [0, 1]
        let a = Matrix::from_vec(2, 2, vec![4.0, 2.0, 2.0, 3.0]).expect("matrix");
        let b = Vector::from_slice(&[2.0, 3.0]);
        let x = a.cholesky_solve(&b).expect("SPD system");
        assert!((x[0] - 0.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_not_positive_definite() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 2.0, 1.0]).expect("matrix");
        let b = Vector::from_slice(&[1.0, 1.0]);
        let result = a.cholesky_solve(&b);
        assert!(matches!(
            result,
            Err(crate::error::AdaptarError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn test_cholesky_inverse_roundtrip() {
        let a = Matrix::from_vec(3, 3, vec![4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0])
            .expect("matrix");
        let inv = a.cholesky_inverse().expect("SPD matrix");
        let prod = a.matmul(&inv).expect("dimensions match");
        let eye = Matrix::eye(3);
        for i in 0..3 {
            for j in 0..3 {
                assert!((prod.get(i, j) - eye.get(i, j)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_cholesky_solve_matrix_matches_vector_solve() {
        let a = Matrix::from_vec(2, 2, vec![4.0, 2.0, 2.0, 3.0]).expect("matrix");
        let b = Matrix::from_vec(2, 2, vec![2.0, 1.0, 3.0, 1.0]).expect("matrix");
        let x = a.cholesky_solve_matrix(&b).expect("SPD system");

        for j in 0..2 {
            let col = Vector::from_vec((0..2).map(|i| b.get(i, j)).collect());
            let xv = a.cholesky_solve(&col).expect("SPD system");
            for i in 0..2 {
                assert!((x.get(i, j) - xv[i]).abs() < 1e-12);
            }
        }
    }
}
