//! k-means++ initialization and Lloyd's-algorithm refinement, used to seed
//! the GMM's EM iterations.

use super::linalg::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Runs k-means++ seeding followed by Lloyd's algorithm to convergence
/// (or `max_iters`), returning the final hard labels and centroids.
///
/// Convergence is defined as the design requires: zero label flips
/// between consecutive iterations (or the iteration budget is spent).
pub fn fit(data: &[Point], k: usize, max_iters: u32, seed: u64) -> (Vec<usize>, Vec<Point>) {
    assert!(k >= 1 && k <= data.len());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = seed_plus_plus(data, k, &mut rng);
    let mut labels = vec![0usize; data.len()];
    assign(data, &centroids, &mut labels);

    for _ in 0..max_iters {
        let new_centroids = recompute_centroids(data, &labels, k, &centroids);
        let mut new_labels = labels.clone();
        assign(data, &new_centroids, &mut new_labels);

        let flips = labels
            .iter()
            .zip(new_labels.iter())
            .filter(|(a, b)| a != b)
            .count();

        centroids = new_centroids;
        labels = new_labels;

        if flips == 0 {
            break;
        }
    }

    (labels, centroids)
}

fn seed_plus_plus(data: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    let first = rng.gen_range(0..data.len());
    centroids.push(data[first]);

    let mut dist2 = vec![0.0f64; data.len()];
    while centroids.len() < k {
        for (i, p) in data.iter().enumerate() {
            dist2[i] = centroids
                .iter()
                .map(|c| sq_dist(p, c))
                .fold(f64::INFINITY, f64::min);
        }
        let total: f64 = dist2.iter().sum();
        if total <= 0.0 {
            // All remaining points coincide with an existing centroid;
            // just pick arbitrarily to fill out K.
            let idx = rng.gen_range(0..data.len());
            centroids.push(data[idx]);
            continue;
        }
        let mut target = rng.gen_range(0.0..total);
        let mut chosen = data.len() - 1;
        for (i, d) in dist2.iter().enumerate() {
            if target < *d {
                chosen = i;
                break;
            }
            target -= d;
        }
        centroids.push(data[chosen]);
    }

    centroids
}

fn assign(data: &[Point], centroids: &[Point], labels: &mut [usize]) {
    for (label, p) in labels.iter_mut().zip(data.iter()) {
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (k, c) in centroids.iter().enumerate() {
            let d = sq_dist(p, c);
            if d < best_dist {
                best_dist = d;
                best = k;
            }
        }
        *label = best;
    }
}

fn recompute_centroids(data: &[Point], labels: &[usize], k: usize, fallback: &[Point]) -> Vec<Point> {
    let mut sums = vec![(0.0f64, 0.0f64, 0usize); k];
    for (p, &label) in data.iter().zip(labels.iter()) {
        sums[label].0 += p.x;
        sums[label].1 += p.y;
        sums[label].2 += 1;
    }

    sums.into_iter()
        .enumerate()
        .map(|(idx, (sx, sy, n))| {
            if n == 0 {
                fallback[idx]
            } else {
                Point {
                    x: sx / n as f64,
                    y: sy / n as f64,
                }
            }
        })
        .collect()
}

fn sq_dist(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_two_obvious_blobs() {
        let mut data = Vec::new();
        for i in 0..20 {
            data.push(Point {
                x: (i % 3) as f64 * 0.01,
                y: (i % 5) as f64 * 0.01,
            });
        }
        for i in 0..20 {
            data.push(Point {
                x: 5.0 + (i % 3) as f64 * 0.01,
                y: 5.0 + (i % 5) as f64 * 0.01,
            });
        }

        let (labels, centroids) = fit(&data, 2, 100, 42);
        assert_eq!(centroids.len(), 2);

        // Every point in the first half should share a label, distinct
        // from every point in the second half.
        let first_label = labels[0];
        assert!(labels[0..20].iter().all(|&l| l == first_label));
        let second_label = labels[20];
        assert_ne!(first_label, second_label);
        assert!(labels[20..].iter().all(|&l| l == second_label));
    }
}
