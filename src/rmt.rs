//! Random Matrix Theory significance threshold selection.
//!
//! Ported from `original_source/src/core/rmt.h`: sweep a correlation
//! threshold `t` downward from `threshold_start`, at each step keep only
//! genes that still have at least one surviving edge (`|r| >= t`), take
//! the eigenvalue spectrum of the resulting submatrix, "unfold" it to a
//! unit mean spacing, and compare the nearest-neighbor spacing
//! distribution against the Wigner surmise with a chi-square
//! goodness-of-fit test. The threshold is accepted once the chi-square
//! statistic falls inside the band defined by
//! `chi_square_threshold_1`/`chi_square_threshold_2`.

use crate::analytic::CancellationToken;
use crate::cmx::CorrelationMatrix;
use crate::error::{KincError, Result};
use crate::progress::Progress;
use nalgebra::{DMatrix, SymmetricEigen};

#[derive(Clone, Debug)]
pub struct RmtConfig {
    pub threshold_start: f32,
    pub threshold_step: f32,
    pub threshold_stop: f32,
    pub chi_square_threshold_1: f64,
    pub chi_square_threshold_2: f64,
    pub min_eigenvalue_size: usize,
    pub min_unfolding_pace: usize,
    pub max_unfolding_pace: usize,
    pub chi_square_bin_size: f64,
}

impl Default for RmtConfig {
    fn default() -> Self {
        RmtConfig {
            threshold_start: 0.99,
            threshold_step: 0.001,
            threshold_stop: 0.5,
            chi_square_threshold_1: 99.607,
            chi_square_threshold_2: 200.0,
            min_eigenvalue_size: 50,
            min_unfolding_pace: 10,
            max_unfolding_pace: 40,
            chi_square_bin_size: 0.05,
        }
    }
}

pub struct RmtThresholder {
    config: RmtConfig,
}

impl RmtThresholder {
    pub fn new(config: RmtConfig) -> Self {
        RmtThresholder { config }
    }

    /// Sweeps the threshold down from `threshold_start` and returns the
    /// first `t` whose spectrum's chi-square statistic falls at or below
    /// `chi_square_threshold_1`. Errors with
    /// [`KincError::ThresholdNotFound`] (carrying the full trace) if the
    /// sweep reaches `threshold_stop`, or ever exceeds
    /// `chi_square_threshold_2`, without finding one.
    ///
    /// Cancellation is checked once per threshold step, and `progress`
    /// ticks once per step, matching the per-pair suspension points of
    /// [`crate::analytic::CmxBuildAnalytic::run`].
    pub fn find_threshold(
        &self,
        cmx: &mut CorrelationMatrix,
        cancel: &CancellationToken,
        progress: &Progress,
    ) -> Result<f32> {
        let dense = build_dense_max_abs_matrix(cmx)?;
        let n = dense.len();

        let mut t = self.config.threshold_start;
        let mut trace = Vec::new();

        while t >= self.config.threshold_stop {
            if cancel.is_cancelled() {
                return Err(KincError::Cancelled);
            }

            let included: Vec<usize> = (0..n)
                .filter(|&i| (0..n).any(|j| i != j && dense[i][j].abs() >= t))
                .collect();

            if included.len() >= self.config.min_eigenvalue_size {
                if let Some(chi_square) = self.spectrum_chi_square(&dense, &included, t) {
                    trace.push((t, chi_square as f32));

                    if chi_square <= self.config.chi_square_threshold_1 {
                        progress.tick();
                        return Ok(t);
                    }
                    if chi_square > self.config.chi_square_threshold_2 {
                        progress.tick();
                        return Err(KincError::ThresholdNotFound { last_t: t, trace });
                    }
                }
            }

            progress.tick();
            t -= self.config.threshold_step;
        }

        Err(KincError::ThresholdNotFound { last_t: t, trace })
    }

    /// Computes the chi-square goodness-of-fit statistic for the
    /// submatrix of `dense` restricted to `included` rows/columns,
    /// minimized over the allowed unfolding pace window.
    fn spectrum_chi_square(&self, dense: &[Vec<f32>], included: &[usize], t: f32) -> Option<f64> {
        let matrix = thresholded_submatrix(dense, included, t);
        let eigen = SymmetricEigen::new(matrix);

        let mut eigenvalues: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
        eigenvalues.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let unique = remove_degenerate(&eigenvalues);
        if unique.len() < self.config.min_unfolding_pace + 1 {
            return None;
        }

        let mut best: Option<f64> = None;
        let max_pace = self.config.max_unfolding_pace.min(unique.len() - 1);
        for pace in self.config.min_unfolding_pace..=max_pace {
            let spacings = unfold(&unique, pace);
            if spacings.is_empty() {
                continue;
            }
            let chi = chi_square_against_wigner(&spacings, self.config.chi_square_bin_size);
            best = Some(match best {
                Some(b) if b <= chi => b,
                _ => chi,
            });
        }
        best
    }

    /// Number of genes that retain at least one edge `|r| >= t`.
    /// Monotonically non-increasing as `t` increases, since raising the
    /// threshold only ever prunes edges, never adds them.
    pub fn surviving_gene_count(&self, cmx: &mut CorrelationMatrix, t: f32) -> Result<usize> {
        let dense = build_dense_max_abs_matrix(cmx)?;
        let n = dense.len();
        Ok((0..n)
            .filter(|&i| (0..n).any(|j| i != j && dense[i][j].abs() >= t))
            .count())
    }
}

/// Builds the `included.len() x included.len()` submatrix fed to the
/// eigendecomposition: `A[u,v] = dense[u][v]` if `|dense[u][v]| >= t`,
/// else 0. Entrywise thresholding, distinct from the row/column
/// compaction `included` already performed -- two genes can each retain
/// an edge to some third gene at or above `t` while their own mutual
/// correlation sits below it, and that edge must read as absent here.
fn thresholded_submatrix(dense: &[Vec<f32>], included: &[usize], t: f32) -> DMatrix<f64> {
    let m = included.len();
    DMatrix::from_fn(m, m, |r, c| {
        let v = dense[included[r]][included[c]];
        if v.abs() >= t {
            v as f64
        } else {
            0.0
        }
    })
}

/// Reads every stored pair and builds a dense, symmetric `gene_count x
/// gene_count` matrix of the largest-magnitude cluster correlation per
/// pair (NaN pairs, and pairs never written, become 0 -- absent edges).
fn build_dense_max_abs_matrix(cmx: &mut CorrelationMatrix) -> Result<Vec<Vec<f32>>> {
    let n = cmx.gene_count() as usize;
    let mut dense = vec![vec![0.0f32; n]; n];
    for row in dense.iter_mut().enumerate() {
        row.1[row.0] = 1.0;
    }

    while let Some(pair) = cmx.read_next_pair()? {
        let mut best = 0.0f32;
        for cluster in 0..pair.cluster_size() {
            let r = pair.at(cluster)?;
            if r.is_finite() && r.abs() > best {
                best = r.abs();
            }
        }
        let (i, j) = (pair.i as usize, pair.j as usize);
        dense[i][j] = best;
        dense[j][i] = best;
    }

    Ok(dense)
}

/// Drops eigenvalues that are nearly identical to their predecessor
/// (within `1e-6` of the spectrum's range), matching the original's
/// degenerate-eigenvalue pruning ahead of unfolding.
fn remove_degenerate(sorted: &[f64]) -> Vec<f64> {
    if sorted.is_empty() {
        return Vec::new();
    }
    let range = sorted.last().unwrap() - sorted.first().unwrap();
    let delta = 1e-6 * range.max(1e-12);

    let mut out = Vec::with_capacity(sorted.len());
    out.push(sorted[0]);
    for &v in &sorted[1..] {
        if v - out.last().unwrap() > delta {
            out.push(v);
        }
    }
    out
}

/// Unfolds the spectrum to unit mean spacing via a sliding degree-3
/// polynomial fit over a window of `pace` eigenvalues, then returns the
/// resulting nearest-neighbor spacings.
fn unfold(eigenvalues: &[f64], pace: usize) -> Vec<f64> {
    let n = eigenvalues.len();
    if n <= pace {
        return Vec::new();
    }

    let mut unfolded = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(pace / 2);
        let hi = (lo + pace).min(n);
        let lo = hi.saturating_sub(pace);
        let window = &eigenvalues[lo..hi];
        let coeffs = fit_cubic(window);
        unfolded.push(eval_cubic(&coeffs, eigenvalues[i]));
    }

    unfolded.sort_by(|a, b| a.partial_cmp(b).unwrap());
    unfolded
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|s| s.is_finite() && *s >= 0.0)
        .collect()
}

/// Least-squares cubic fit of the cumulative staircase (index vs value)
/// over one unfolding window, solved via the normal equations.
fn fit_cubic(window: &[f64]) -> [f64; 4] {
    let n = window.len();
    let xs: Vec<f64> = window.to_vec();
    let ys: Vec<f64> = (0..n).map(|i| i as f64 + 1.0).collect();

    let mut a = [[0.0f64; 4]; 4];
    let mut b = [0.0f64; 4];
    for (x, y) in xs.iter().zip(ys.iter()) {
        let powers = [1.0, *x, x * x, x * x * x];
        for r in 0..4 {
            for c in 0..4 {
                a[r][c] += powers[r] * powers[c];
            }
            b[r] += powers[r] * y;
        }
    }

    solve_4x4(a, b).unwrap_or([0.0, 1.0, 0.0, 0.0])
}

fn eval_cubic(coeffs: &[f64; 4], x: f64) -> f64 {
    coeffs[0] + coeffs[1] * x + coeffs[2] * x * x + coeffs[3] * x * x * x
}

/// Solves a 4x4 linear system via Gaussian elimination with partial
/// pivoting; returns `None` if the system is singular.
fn solve_4x4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4)
            .max_by(|&r1, &r2| a[r1][col].abs().partial_cmp(&a[r2][col].abs()).unwrap())?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..4 {
            let factor = a[row][col] / a[col][col];
            for c in col..4 {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 4];
    for row in (0..4).rev() {
        let mut sum = b[row];
        for c in (row + 1)..4 {
            sum -= a[row][c] * x[c];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

/// Chi-square statistic comparing the empirical spacing histogram
/// (bin width `bin_size`) against the Wigner surmise
/// `P(s) = (pi/2) s exp(-pi s^2 / 4)`.
fn chi_square_against_wigner(spacings: &[f64], bin_size: f64) -> f64 {
    let n = spacings.len() as f64;
    let max_s = spacings.iter().cloned().fold(0.0, f64::max).max(3.0);
    let bin_count = (max_s / bin_size).ceil() as usize + 1;

    let mut observed = vec![0.0f64; bin_count];
    for &s in spacings {
        let bin = (s / bin_size) as usize;
        if bin < bin_count {
            observed[bin] += 1.0;
        }
    }

    let mut chi_square = 0.0;
    for (bin, &count) in observed.iter().enumerate() {
        let s_lo = bin as f64 * bin_size;
        let s_hi = s_lo + bin_size;
        let expected = n * (wigner_cdf(s_hi) - wigner_cdf(s_lo));
        if expected > 1e-9 {
            chi_square += (count - expected).powi(2) / expected;
        }
    }
    chi_square
}

/// CDF of the Wigner surmise: `1 - exp(-pi s^2 / 4)`.
fn wigner_cdf(s: f64) -> f64 {
    1.0 - (-std::f64::consts::PI * s * s / 4.0).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmx::CorrelationMatrix;

    #[test]
    fn remove_degenerate_collapses_near_duplicates() {
        let sorted = vec![1.0, 1.0 + 1e-9, 2.0, 2.0 + 1e-9, 3.0];
        let unique = remove_degenerate(&sorted);
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn wigner_cdf_is_monotonic_and_bounded() {
        assert!(wigner_cdf(0.0) < wigner_cdf(1.0));
        assert!(wigner_cdf(10.0) > 0.999);
    }

    #[test]
    fn threshold_not_found_reports_a_trace_on_sparse_input() {
        let path = std::env::temp_dir().join(format!("kinc_rmt_test_{}.cmx", std::process::id()));
        let writer = CorrelationMatrix::create(&path, 10, 20, 1, 1).unwrap();
        writer.finish().unwrap();

        let mut cmx = CorrelationMatrix::open(&path).unwrap();
        let thresholder = RmtThresholder::new(RmtConfig {
            min_eigenvalue_size: 5,
            ..RmtConfig::default()
        });
        let cancel = CancellationToken::new();
        let progress = Progress::disabled();
        let result = thresholder.find_threshold(&mut cmx, &cancel, &progress);
        assert!(matches!(result, Err(KincError::ThresholdNotFound { .. })));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn cancellation_is_observed_mid_sweep() {
        let path = std::env::temp_dir().join(format!("kinc_rmt_cancel_{}.cmx", std::process::id()));
        let writer = CorrelationMatrix::create(&path, 10, 20, 1, 1).unwrap();
        writer.finish().unwrap();

        let mut cmx = CorrelationMatrix::open(&path).unwrap();
        let thresholder = RmtThresholder::new(RmtConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let progress = Progress::disabled();
        let result = thresholder.find_threshold(&mut cmx, &cancel, &progress);
        assert!(matches!(result, Err(KincError::Cancelled)));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn thresholded_submatrix_zeroes_sub_threshold_entries() {
        // Genes 0 and 2 both qualify as "included" via their edge to gene
        // 1 (0.9 >= 0.5), but their own mutual correlation (0.3) is below
        // the threshold and must read as an absent (zero) edge.
        let dense = vec![
            vec![1.0, 0.9, 0.3],
            vec![0.9, 1.0, 0.9],
            vec![0.3, 0.9, 1.0],
        ];
        let included = vec![0, 1, 2];
        let matrix = thresholded_submatrix(&dense, &included, 0.5);

        assert_eq!(matrix[(0, 2)], 0.0);
        assert_eq!(matrix[(2, 0)], 0.0);
        assert!((matrix[(0, 1)] - 0.9).abs() < 1e-9);
        assert!((matrix[(1, 2)] - 0.9).abs() < 1e-9);
        assert_eq!(matrix[(0, 0)], 1.0);
    }

    #[test]
    fn spectrum_unfolding_normalizes_mean_spacing_to_one() {
        // An evenly spaced spectrum is its own cumulative staircase up to
        // an affine map, so a local cubic fit should recover unit spacing
        // almost exactly.
        let eigenvalues: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let spacings = unfold(&eigenvalues, 10);
        assert!(!spacings.is_empty());
        let mean: f64 = spacings.iter().sum::<f64>() / spacings.len() as f64;
        assert!((mean - 1.0).abs() < 0.2, "mean spacing {mean} should be close to 1");
    }
}
