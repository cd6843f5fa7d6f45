//! Vector type for 1D numeric data.

use serde::{Deserialize, Serialize};
use std::ops::Index;

/// A 1D vector of floating-point values.
///
/// # Examples
///
/// ```
/// use adaptar::primitives::Vector;
///
/// let v = Vector::from_slice(&[3.0, 4.0]);
/// assert_eq!(v.len(), 2);
/// assert!((v.norm() - 5.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector<T> {
    data: Vec<T>,
}

impl<T: Copy> Vector<T> {
    /// Creates a vector from owned data.
    #[must_use]
    pub fn from_vec(data: Vec<T>) -> Self {
        Self { data }
    }

    /// Creates a vector by copying a slice.
    #[must_use]
    pub fn from_slice(data: &[T]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the vector has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the underlying data as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Consumes the vector and returns the underlying data.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl Vector<f64> {
    /// Creates a vector of zeros.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    /// Dot product with another vector.
    ///
    /// # Panics
    ///
    /// Panics if lengths differ.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        assert_eq!(self.len(), other.len(), "Vectors must have same length");
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Euclidean norm.
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Sum of elements.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Arithmetic mean (0.0 for an empty vector).
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum() / self.data.len() as f64
    }

    /// Adds a scalar to every element.
    #[must_use]
    pub fn add_scalar(&self, scalar: f64) -> Self {
        Self {
            data: self.data.iter().map(|x| x + scalar).collect(),
        }
    }

    /// Returns true if every element is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

impl<T> Index<usize> for Vector<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_commutative() {
        let u = Vector::from_slice(&[1.0, 2.0, 3.0]);
        let v = Vector::from_slice(&[4.0, 5.0, 6.0]);
        assert!((u.dot(&v) - v.dot(&u)).abs() < 1e-12);
        assert!((u.dot(&v) - 32.0).abs() < 1e-12);
    }

    #[test]
    fn test_norm() {
        let v = Vector::from_slice(&[-3.0, 4.0]);
        assert!((v.norm() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_equals_sum_over_len() {
        let v = Vector::from_slice(&[2.0, 4.0, 6.0, 8.0, 10.0]);
        assert!((v.mean() - 6.0).abs() < 1e-12);
        assert!((v.mean() - v.sum() / v.len() as f64).abs() < 1e-12);
    }

    #[test]
    fn test_add_scalar() {
        let v = Vector::from_slice(&[1.0, 2.0]).add_scalar(0.5);
        assert_eq!(v.as_slice(), &[1.5, 2.5]);
    }

    #[test]
    fn test_empty_mean_is_zero() {
        let v: Vector<f64> = Vector::from_vec(vec![]);
        assert!(v.is_empty());
        assert_eq!(v.mean(), 0.0);
    }

    #[test]
    fn test_is_finite() {
        assert!(Vector::from_slice(&[1.0, 2.0]).is_finite());
        assert!(!Vector::from_slice(&[1.0, f64::NAN]).is_finite());
    }
}
