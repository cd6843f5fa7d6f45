//! Evaluation metrics: `mse` for regression, `accuracy` and `roc_auc`
//! for classification.

use crate::error::{AdaptarError, Result};
use crate::primitives::Matrix;

/// Mean squared error between two equal-length columns.
///
/// # Errors
///
/// Returns an error if lengths differ or either input is empty.
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    if y_true.len() != y_pred.len() {
        return Err(AdaptarError::shape_mismatch(y_true.len(), y_pred.len()));
    }
    if y_true.is_empty() {
        return Err(AdaptarError::InvalidConfig {
            message: "mse over empty arrays".to_string(),
        });
    }
    let sum: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    Ok(sum / y_true.len() as f64)
}

/// Hard classification accuracy.
///
/// Scores and labels may each be a single column (signed or thresholded
/// at `threshold`) or one-hot multi-column (argmax per row); the two sides
/// are decoded independently so a one-hot score matrix can be checked
/// against single-column labels.
///
/// # Errors
///
/// Returns an error if row counts differ or either input is empty.
pub fn accuracy(y_true: &Matrix<f64>, scores: &Matrix<f64>, threshold: f64) -> Result<f64> {
    if y_true.n_rows() != scores.n_rows() {
        return Err(AdaptarError::shape_mismatch(y_true.n_rows(), scores.n_rows()));
    }
    let n = y_true.n_rows();
    if n == 0 {
        return Err(AdaptarError::InvalidConfig {
            message: "accuracy over empty arrays".to_string(),
        });
    }
    let truth = decode_classes(y_true, threshold);
    let pred = decode_classes(scores, threshold);
    let hits = truth.iter().zip(pred.iter()).filter(|(t, p)| t == p).count();
    Ok(hits as f64 / n as f64)
}

/// Per-row class index: argmax for multi-column input, threshold for a
/// single column (signed-binary labels in `{-1, +1}` threshold at 0).
fn decode_classes(m: &Matrix<f64>, threshold: f64) -> Vec<usize> {
    let (n, k) = m.shape();
    if k == 1 {
        let cut = if m.as_slice().iter().any(|v| *v < 0.0) {
            0.0
        } else {
            threshold
        };
        return (0..n).map(|i| usize::from(m.get(i, 0) > cut)).collect();
    }
    (0..n)
        .map(|i| {
            let mut best = 0;
            for j in 1..k {
                if m.get(i, j) > m.get(i, best) {
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// Area under the ROC curve for binary labels, by the rank statistic with
/// midranks for tied scores.
///
/// `y_true` holds the positive-class indicator (anything > 0.5 counts as
/// positive); `scores` the positive-class score.
///
/// # Errors
///
/// Returns an error if lengths differ, or only one class is present.
pub fn roc_auc(y_true: &[f64], scores: &[f64]) -> Result<f64> {
    if y_true.len() != scores.len() {
        return Err(AdaptarError::shape_mismatch(y_true.len(), scores.len()));
    }
    let n = y_true.len();
    let n_pos = y_true.iter().filter(|v| **v > 0.5).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(AdaptarError::InvalidConfig {
            message: "roc_auc needs both classes present".to_string(),
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Midranks over tied score runs.
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = midrank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(t, _)| **t > 0.5)
        .map(|(_, r)| *r)
        .sum();
    let auc = (rank_sum_pos - n_pos as f64 * (n_pos as f64 + 1.0) / 2.0)
        / (n_pos as f64 * n_neg as f64);
    Ok(auc)
}
