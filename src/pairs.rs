//! Canonical ordering and addressing of unordered gene pairs.
//!
//! A gene pair `(i, j)` is always canonicalized so the larger index is
//! stored as the row coordinate (`i > j`). The linear pair ordinal is
//! `i*(i-1)/2 + j`, the standard enumeration of the strictly-lower
//! triangle of a square matrix.

use crate::error::{KincError, Result};

/// Computes the ordinal of the unordered pair `(a, b)`.
///
/// Fails with [`KincError::Domain`] if `a == b`.
pub fn ordinal(a: u32, b: u32) -> Result<u64> {
    if a == b {
        return Err(KincError::domain(format!(
            "gene pair indices must differ, got ({a}, {b})"
        )));
    }
    let (i, j) = if a > b { (a, b) } else { (b, a) };
    let i = i as u64;
    let j = j as u64;
    Ok(i * (i - 1) / 2 + j)
}

/// Recovers the canonical pair `(i, j)` with `i > j` for a given ordinal.
///
/// Inverts the triangular number via integer square root.
pub fn pair(ordinal: u64) -> Result<(u32, u32)> {
    // i is the largest integer such that i*(i-1)/2 <= ordinal.
    let i = ((1.0 + (1.0 + 8.0 * ordinal as f64).sqrt()) / 2.0).floor() as u64;

    // The floating point estimate can be off by one in either direction
    // near perfect-square boundaries; nudge it back onto the triangular
    // number sequence.
    let mut i = i;
    while i * (i - 1) / 2 > ordinal {
        i -= 1;
    }
    while (i + 1) * i / 2 <= ordinal {
        i += 1;
    }

    let j = ordinal - i * (i - 1) / 2;
    if i > u32::MAX as u64 || j >= i {
        return Err(KincError::domain(format!(
            "ordinal {ordinal} does not map to a valid pair"
        )));
    }
    Ok((i as u32, j as u32))
}

/// Returns the canonical pair for `(a, b)`, i.e. `(max(a,b), min(a,b))`.
///
/// Fails with [`KincError::Domain`] if `a == b`.
pub fn canonicalize(a: u32, b: u32) -> Result<(u32, u32)> {
    if a == b {
        return Err(KincError::domain(format!(
            "gene pair indices must differ, got ({a}, {b})"
        )));
    }
    Ok(if a > b { (a, b) } else { (b, a) })
}

/// Total number of pairs among `gene_count` genes, i.e. `G*(G-1)/2`.
pub fn total_pairs(gene_count: u32) -> u64 {
    let g = gene_count as u64;
    g * (g.saturating_sub(1)) / 2
}

/// Monotone forward iterator over every canonical pair `(i, j)` for a gene
/// count, yielding `(i, j, ordinal)` in strictly increasing ordinal order.
pub struct PairIterator {
    gene_count: u32,
    i: u32,
    j: u32,
}

impl PairIterator {
    pub fn new(gene_count: u32) -> Self {
        PairIterator {
            gene_count,
            i: 1,
            j: 0,
        }
    }
}

impl Iterator for PairIterator {
    type Item = (u32, u32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.i >= self.gene_count {
            return None;
        }
        let i = self.i;
        let j = self.j;
        let ord = ordinal(i, j).expect("iterator only ever produces valid pairs");

        self.j += 1;
        if self.j >= self.i {
            self.j = 0;
            self.i += 1;
        }

        Some((i, j, ord))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_equal_indices() {
        assert!(ordinal(3, 3).is_err());
        assert!(pair_roundtrip_helper(3, 3).is_none());
    }

    fn pair_roundtrip_helper(a: u32, b: u32) -> Option<(u32, u32)> {
        ordinal(a, b).ok().and_then(|o| pair(o).ok())
    }

    #[test]
    fn canonicalization_is_order_independent() {
        for (a, b) in [(5u32, 2u32), (2, 5), (10, 1), (1, 10)] {
            let o1 = ordinal(a, b).unwrap();
            let o2 = ordinal(b, a).unwrap();
            assert_eq!(o1, o2);
        }
    }

    #[test]
    fn index_round_trips_over_small_range() {
        let g = 50u32;
        for o in 0..total_pairs(g) {
            let (i, j) = pair(o).unwrap();
            assert!(i > j);
            assert_eq!(ordinal(i, j).unwrap(), o);
        }
    }

    #[test]
    fn iterator_matches_ordinal() {
        let g = 12u32;
        let collected: Vec<_> = PairIterator::new(g).collect();
        assert_eq!(collected.len() as u64, total_pairs(g));
        for (idx, (i, j, ord)) in collected.iter().enumerate() {
            assert_eq!(*ord, idx as u64);
            assert_eq!(ordinal(*i, *j).unwrap(), *ord);
        }
    }

    #[test]
    fn out_of_order_indices_canonicalize() {
        assert_eq!(canonicalize(2, 7).unwrap(), (7, 2));
        assert_eq!(canonicalize(7, 2).unwrap(), (7, 2));
    }
}
