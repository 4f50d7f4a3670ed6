//! Per-pair GMM clustering + Pearson correlation kernel.
//!
//! For one gene pair this module: selects the samples where both genes
//! have finite (and sufficiently expressed) values, fits a GMM for every
//! candidate cluster count `K` in `[min_clusters, max_clusters]`, picks
//! the best `K` by BIC or ICL, hard-labels samples, reorders clusters by
//! descending population, and computes one Pearson correlation per
//! cluster. [`GmmPearsonKernel`] owns the reused `n * Kmax` log-gamma
//! arena named in the design so repeated calls across many pairs don't
//! re-allocate it.

mod gmm;
mod kmeans;
mod linalg;
mod pearson;

use linalg::Point;
use log::debug;

/// Model-selection criterion used to pick the best cluster count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criterion {
    Bic,
    Icl,
}

#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub min_samples: u32,
    pub min_expression: f32,
    pub min_clusters: u8,
    pub max_clusters: u8,
    pub criterion: Criterion,
    pub max_em_iterations: u32,
    pub tol: f64,
    pub max_kmeans_iters: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            min_samples: 30,
            min_expression: f32::NEG_INFINITY,
            min_clusters: 1,
            max_clusters: 5,
            criterion: Criterion::Bic,
            max_em_iterations: 100,
            tol: 1e-4,
            max_kmeans_iters: 100,
        }
    }
}

/// Result of fitting one gene pair. A `labels` vector of length
/// `sample_count` (one entry per original sample, `-1` if filtered) and
/// one correlation per surviving cluster, ordered by descending
/// population. Empty `correlations` means the pair should not be
/// emitted at all (K*=0, or every cluster's correlation came back NaN).
pub struct PairOutcome {
    pub labels: Vec<i8>,
    pub correlations: Vec<f32>,
}

impl PairOutcome {
    fn empty(sample_count: usize) -> Self {
        PairOutcome {
            labels: vec![-1; sample_count],
            correlations: Vec::new(),
        }
    }

    pub fn should_emit(&self) -> bool {
        !self.correlations.is_empty() && self.correlations.iter().any(|r| !r.is_nan())
    }
}

/// The per-pair GMM + Pearson kernel. Reuses its log-responsibility
/// arena across calls to `fit_pair`.
pub struct GmmPearsonKernel {
    config: KernelConfig,
    arena: Vec<f64>,
}

impl GmmPearsonKernel {
    pub fn new(config: KernelConfig) -> Self {
        GmmPearsonKernel {
            config,
            arena: Vec::new(),
        }
    }

    /// Fits gene pair `(x, y)` (same length, one entry per sample) and
    /// returns the resulting labels and per-cluster correlations.
    pub fn fit_pair(&mut self, x: &[f32], y: &[f32]) -> PairOutcome {
        assert_eq!(x.len(), y.len(), "gene pair arrays must have equal length");
        let sample_count = x.len();

        let mut selected_indices = Vec::new();
        let mut data = Vec::new();
        for (s, (&xs, &ys)) in x.iter().zip(y.iter()).enumerate() {
            if xs.is_finite()
                && ys.is_finite()
                && xs >= self.config.min_expression
                && ys >= self.config.min_expression
            {
                selected_indices.push(s);
                data.push(Point {
                    x: xs as f64,
                    y: ys as f64,
                });
            }
        }

        if data.len() < self.config.min_samples as usize {
            return PairOutcome::empty(sample_count);
        }

        // clusteringMethod = none shortcut: a single whole-sample-set
        // Pearson correlation, skipping GMM entirely.
        if self.config.max_clusters == 0 {
            let r = pearson::plain_pearson(&data) as f32;
            let mut labels = vec![-1i8; sample_count];
            for &idx in &selected_indices {
                labels[idx] = 0;
            }
            return PairOutcome {
                labels,
                correlations: vec![r],
            };
        }

        let max_k = (self.config.max_clusters as usize).min(data.len());
        let min_k = (self.config.min_clusters as usize).max(1).min(max_k);

        let mut best: Option<(usize, gmm::GmmFit, f64)> = None;

        for k in min_k..=max_k {
            let fit = match gmm::fit(
                &data,
                k,
                self.config.max_em_iterations,
                self.config.tol,
                self.config.max_kmeans_iters,
                k as u64,
                &mut self.arena,
            ) {
                Ok(fit) => fit,
                Err(err) => {
                    debug!("K={k} rejected: {err}");
                    continue;
                }
            };

            let score = match self.config.criterion {
                Criterion::Bic => gmm::bic(fit.log_likelihood, k, data.len()),
                Criterion::Icl => gmm::icl(fit.log_likelihood, k, data.len(), &fit.log_gamma),
            };

            let better = match &best {
                None => true,
                // Ties broken toward the smaller K: only replace on a
                // strictly lower score.
                Some((_, _, best_score)) => score < *best_score,
            };
            if better {
                best = Some((k, fit, score));
            }
        }

        let (k_star, fit, _score) = match best {
            Some(b) => b,
            None => return PairOutcome::empty(sample_count),
        };

        let (reordered_labels, cluster_order) = reorder_by_population(&fit.labels, k_star);

        let mut correlations = Vec::with_capacity(k_star);
        for new_cluster in 0..k_star {
            let r = pearson::cluster_pearson(
                &data,
                &reordered_labels,
                new_cluster as i8,
                self.config.min_samples,
            );
            correlations.push(r);
        }
        let _ = cluster_order; // retained for clarity/debuggability

        let mut labels = vec![-1i8; sample_count];
        for (&idx, &label) in selected_indices.iter().zip(reordered_labels.iter()) {
            labels[idx] = label;
        }

        PairOutcome {
            labels,
            correlations,
        }
    }
}

/// Remaps hard cluster labels so cluster 0 has the largest population,
/// cluster 1 the next largest, and so on (ties broken by original index).
fn reorder_by_population(labels: &[usize], k: usize) -> (Vec<i8>, Vec<usize>) {
    let mut counts = vec![0usize; k];
    for &l in labels {
        counts[l] += 1;
    }

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));

    let mut remap = vec![0usize; k];
    for (new_idx, &old_idx) in order.iter().enumerate() {
        remap[old_idx] = new_idx;
    }

    let reordered = labels.iter().map(|&l| remap[l] as i8).collect();
    (reordered, order)
}
