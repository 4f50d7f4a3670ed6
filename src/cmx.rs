//! Correlation matrix (CMX): per-pair, per-cluster correlation vector.
//!
//! The wire format reserves a `maxModes x correlationSize` float grid per
//! row, matching the original format's support for more than one
//! correlation method stored side by side; this crate only ever writes
//! Pearson's results into mode 0 (`correlationMethod in {pearson}` per the
//! design), but the grid shape is kept for file-format parity. Unused
//! slots, and clusters whose population fell below `minSamples`, are NaN.
//!
//! A leading `K` byte records how many of `correlationSize` slots in mode
//! 0 are "real" cluster entries (as opposed to padding): relying on
//! trailing-NaN-counting alone cannot tell a skipped slot apart from a
//! genuinely undefined correlation for a valid, too-small cluster.

use crate::error::{KincError, Result};
use crate::pairs;
use crate::store::{PairedMatrixStore, PayloadCodec};
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationRow {
    pub k: u8,
    /// Row-major `[mode][cluster]`, length `max_modes * correlation_size`.
    pub values: Vec<f32>,
}

#[derive(Clone, Copy)]
pub struct CmxCodec {
    sample_size: u32,
    correlation_size: u32, // Kmax
    max_modes: u8,
}

impl CmxCodec {
    fn grid_len(&self) -> usize {
        self.max_modes as usize * self.correlation_size as usize
    }
}

impl PayloadCodec for CmxCodec {
    type Row = CorrelationRow;
    const MAGIC: &'static [u8; 8] = b"KINCCMX\0";
    const VERSION: u16 = 1;
    const TYPE_TAG: u16 = 3;

    fn row_stride(&self) -> u64 {
        1 + 4 * self.grid_len() as u64
    }

    fn descriptor(&self) -> [u8; 32] {
        let mut d = [0u8; 32];
        d[0..4].copy_from_slice(&self.sample_size.to_le_bytes());
        d[4..8].copy_from_slice(&self.correlation_size.to_le_bytes());
        d[8] = self.max_modes;
        d
    }

    fn from_descriptor(bytes: &[u8; 32], _gene_count: u32) -> Result<Self> {
        let sample_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let correlation_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let max_modes = bytes[8];
        Ok(CmxCodec {
            sample_size,
            correlation_size,
            max_modes,
        })
    }

    fn encode(&self, row: &Self::Row, out: &mut Vec<u8>) {
        out.push(row.k);
        for &v in &row.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Row> {
        let k = bytes[0];
        let values = bytes[1..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(CorrelationRow { k, values })
    }
}

/// Correlation matrix backed by a [`PairedMatrixStore`].
pub struct CorrelationMatrix {
    store: PairedMatrixStore<CmxCodec>,
    /// Sequential scan cursor, used by `read_next_pair`.
    scan_ordinal: u64,
}

impl CorrelationMatrix {
    pub fn create<P: AsRef<Path>>(
        path: P,
        gene_count: u32,
        sample_size: u32,
        correlation_size: u32,
        max_modes: u8,
    ) -> Result<CorrelationMatrixWriter> {
        let codec = CmxCodec {
            sample_size,
            correlation_size,
            max_modes,
        };
        let store = PairedMatrixStore::create(path, gene_count, codec)?;
        Ok(CorrelationMatrixWriter { store })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = PairedMatrixStore::open(path)?;
        Ok(CorrelationMatrix {
            store,
            scan_ordinal: 0,
        })
    }

    pub fn gene_count(&self) -> u32 {
        self.store.gene_count()
    }

    pub fn correlation_size(&self) -> u32 {
        self.store.codec().correlation_size
    }

    /// Reads the row for gene pair `(i, j)`, canonicalizing first.
    pub fn read(&mut self, i: u32, j: u32) -> Result<Option<CorrelationMatrixPair>> {
        let (i, j) = pairs::canonicalize(i, j)?;
        let ordinal = pairs::ordinal(i, j)?;
        let correlation_size = self.correlation_size();
        let row = self.store.read_pair(ordinal)?;
        Ok(row.map(|row| CorrelationMatrixPair {
            i,
            j,
            correlation_size,
            row,
        }))
    }

    /// Sequential scan: returns the next present pair in ordinal order, or
    /// `None` once the index is exhausted.
    pub fn read_next_pair(&mut self) -> Result<Option<CorrelationMatrixPair>> {
        loop {
            let total = pairs::total_pairs(self.gene_count());
            if self.scan_ordinal >= total {
                return Ok(None);
            }
            let ordinal = self.scan_ordinal;
            self.scan_ordinal += 1;
            if let Some(offset) = self.store.find(ordinal) {
                let row = self.store.read_payload(offset)?;
                let (i, j) = pairs::pair(ordinal)?;
                return Ok(Some(CorrelationMatrixPair {
                    i,
                    j,
                    correlation_size: self.correlation_size(),
                    row,
                }));
            }
        }
    }

    /// Whole-matrix value access by `(row, col)`. Canonicalizes so
    /// `row > col`. The diagonal always reads 1.0 without touching the
    /// store. Off-diagonal reads return the first cluster's correlation
    /// of mode 0 (by convention, the cluster with the largest membership,
    /// since the kernel orders clusters by descending population) -- this
    /// is the same "first correlation of first mode" convention the
    /// original format used for its 2-D display, kept here for parity and
    /// noted as lossy: it discards every other cluster's correlation.
    pub fn value_at(&mut self, row: u32, col: u32) -> Result<f32> {
        if row == col {
            return Ok(1.0);
        }
        match self.read(row, col)? {
            Some(pair) => pair.at(0),
            None => Ok(f32::NAN),
        }
    }
}

/// A non-owning, read-only view of one pair's correlation row.
pub struct CorrelationMatrixPair {
    pub i: u32,
    pub j: u32,
    correlation_size: u32,
    row: CorrelationRow,
}

impl CorrelationMatrixPair {
    pub fn cluster_size(&self) -> u8 {
        self.row.k
    }

    /// Correlation of cluster `cluster` in mode 0.
    ///
    /// Bounds-checked with `>=` against `correlation_size` (the maximum),
    /// not `>`: the original accessor's `>` was an off-by-one, resolved
    /// here per the design's Open Question (a).
    pub fn at(&self, cluster: u8) -> Result<f32> {
        self.raw(0, cluster)
    }

    /// Correlation of `cluster` under the given `mode` (correlation
    /// method slot). Only mode 0 (Pearson) is ever written by this crate,
    /// but the accessor is kept general for file-format parity.
    pub fn raw(&self, mode: u8, cluster: u8) -> Result<f32> {
        if cluster as u32 >= self.correlation_size {
            return Err(KincError::domain(format!(
                "cluster index {cluster} out of range (max {})",
                self.correlation_size
            )));
        }
        let idx = mode as usize * self.correlation_size as usize + cluster as usize;
        self.row
            .values
            .get(idx)
            .copied()
            .ok_or_else(|| KincError::domain(format!("mode index {mode} out of range")))
    }
}

/// Write-side handle for building a CMX during an analytic pass.
pub struct CorrelationMatrixWriter {
    store: PairedMatrixStore<CmxCodec>,
}

impl CorrelationMatrixWriter {
    /// Writes one pair's correlations (mode 0 only); `correlations.len()`
    /// becomes the row's `K`, and any remaining slots up to
    /// `correlation_size` are padded with NaN.
    pub fn write(&mut self, i: u32, j: u32, correlations: &[f32]) -> Result<()> {
        let (i, j) = pairs::canonicalize(i, j)?;
        let ordinal = pairs::ordinal(i, j)?;
        let correlation_size = self.store.codec().correlation_size as usize;
        let max_modes = self.store.codec().max_modes as usize;

        if correlations.len() > correlation_size {
            return Err(KincError::domain(format!(
                "pair ({i},{j}) has {} clusters, exceeds max {correlation_size}",
                correlations.len()
            )));
        }

        let mut values = vec![f32::NAN; max_modes * correlation_size];
        values[0..correlations.len()].copy_from_slice(correlations);

        self.store.write(
            ordinal,
            &CorrelationRow {
                k: correlations.len() as u8,
                values,
            },
        )
    }

    pub fn finish(self) -> Result<()> {
        self.store.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back_correlations() {
        let path = std::env::temp_dir().join(format!("kinc_cmx_test_{}.cmx", std::process::id()));

        let mut writer = CorrelationMatrix::create(&path, 5, 10, 3, 1).unwrap();
        writer.write(2, 1, &[0.5, f32::NAN]).unwrap();
        writer.finish().unwrap();

        let mut cmx = CorrelationMatrix::open(&path).unwrap();
        let pair = cmx.read(2, 1).unwrap().unwrap();
        assert_eq!(pair.cluster_size(), 2);
        assert_eq!(pair.at(0).unwrap(), 0.5);
        assert!(pair.at(1).unwrap().is_nan());
        assert!(pair.at(2).unwrap().is_nan()); // padded, not written

        assert!(cmx.at_bound_check_is_inclusive());

        std::fs::remove_file(&path).ok();
    }

    trait TestExt {
        fn at_bound_check_is_inclusive(&mut self) -> bool;
    }

    impl TestExt for CorrelationMatrix {
        fn at_bound_check_is_inclusive(&mut self) -> bool {
            // correlation_size is 3, so cluster index 3 must be rejected.
            let pair = self.read(2, 1).unwrap().unwrap();
            pair.at(3).is_err()
        }
    }

    #[test]
    fn diagonal_reads_one_without_touching_store() {
        let path = std::env::temp_dir().join(format!("kinc_cmx_diag_{}.cmx", std::process::id()));
        let writer = CorrelationMatrix::create(&path, 5, 10, 3, 1).unwrap();
        writer.finish().unwrap();

        let mut cmx = CorrelationMatrix::open(&path).unwrap();
        assert_eq!(cmx.value_at(3, 3).unwrap(), 1.0);
        assert!(cmx.value_at(3, 1).unwrap().is_nan()); // absent pair

        std::fs::remove_file(&path).ok();
    }
}
