//! Per-cluster Pearson correlation, ported from
//! `original_source/src/core/pairwise_pearson.cpp`'s `computeCluster`.

use super::linalg::Point;

/// Pearson correlation over every point whose label equals `cluster`,
/// or NaN if fewer than `min_samples` points carry that label.
pub fn cluster_pearson(data: &[Point], labels: &[i8], cluster: i8, min_samples: u32) -> f32 {
    let mut n = 0u32;
    let mut sum_x = 0.0f64;
    let mut sum_y = 0.0f64;
    let mut sum_x2 = 0.0f64;
    let mut sum_y2 = 0.0f64;
    let mut sum_xy = 0.0f64;

    for (p, &label) in data.iter().zip(labels.iter()) {
        if label == cluster {
            sum_x += p.x;
            sum_y += p.y;
            sum_x2 += p.x * p.x;
            sum_y2 += p.y * p.y;
            sum_xy += p.x * p.y;
            n += 1;
        }
    }

    if n < min_samples {
        return f32::NAN;
    }

    pearson_from_sums(n as f64, sum_x, sum_y, sum_x2, sum_y2, sum_xy) as f32
}

/// Plain Pearson correlation over the full sample set, used for the
/// `clusteringMethod = none` path (no GMM split, a single cluster).
pub fn plain_pearson(data: &[Point]) -> f64 {
    let n = data.len() as f64;
    let (sum_x, sum_y, sum_x2, sum_y2, sum_xy) = data.iter().fold(
        (0.0, 0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sx2, sy2, sxy), p| (sx + p.x, sy + p.y, sx2 + p.x * p.x, sy2 + p.y * p.y, sxy + p.x * p.y),
    );
    pearson_from_sums(n, sum_x, sum_y, sum_x2, sum_y2, sum_xy)
}

fn pearson_from_sums(n: f64, sum_x: f64, sum_y: f64, sum_x2: f64, sum_y2: f64, sum_xy: f64) -> f64 {
    let numerator = n * sum_xy - sum_x * sum_y;
    let denom_x = n * sum_x2 - sum_x * sum_x;
    let denom_y = n * sum_y2 - sum_y * sum_y;
    let denominator = denom_x * denom_y;

    if denominator <= 0.0 {
        return f64::NAN;
    }

    numerator / denominator.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_series_gives_correlation_one() {
        let data: Vec<Point> = (1..=4)
            .map(|v| Point {
                x: v as f64,
                y: 2.0 * v as f64,
            })
            .collect();
        let labels = vec![0i8; 4];
        let r = cluster_pearson(&data, &labels, 0, 3);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn insufficient_samples_yield_nan() {
        let data: Vec<Point> = (1..=4)
            .map(|v| Point {
                x: v as f64,
                y: 2.0 * v as f64,
            })
            .collect();
        let labels = vec![0i8; 4];
        let r = cluster_pearson(&data, &labels, 0, 5);
        assert!(r.is_nan());
    }

    #[test]
    fn anti_correlated_series_gives_minus_one() {
        let data: Vec<Point> = (1..=4)
            .map(|v| Point {
                x: v as f64,
                y: -2.0 * v as f64,
            })
            .collect();
        let labels = vec![0i8; 4];
        let r = cluster_pearson(&data, &labels, 0, 3);
        assert!((r + 1.0).abs() < 1e-6);
    }

    #[test]
    fn constant_series_has_undefined_correlation() {
        let data = vec![
            Point { x: 1.0, y: 1.0 },
            Point { x: 1.0, y: 2.0 },
            Point { x: 1.0, y: 3.0 },
        ];
        let labels = vec![0i8; 3];
        let r = cluster_pearson(&data, &labels, 0, 3);
        assert!(r.is_nan());
    }
}
