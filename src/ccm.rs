//! Cluster matrix (CCM): per-pair, variable-K sample-label vector.
//!
//! Each row holds the cluster count `K` for the pair (0..=maxK) followed by
//! one label per sample (`-1` for a filtered-out sample, `0..K-1`
//! otherwise). The sample count is fixed for the whole store, so although
//! `K` varies per pair the row stride does not: `1 + sample_count` bytes.

use crate::error::{KincError, Result};
use crate::pairs;
use crate::store::{PairedMatrixStore, PayloadCodec};
use std::path::Path;

/// One CCM row: the cluster count and a per-sample label vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRow {
    pub k: u8,
    pub labels: Vec<i8>,
}

#[derive(Clone, Copy)]
pub struct CcmCodec {
    sample_size: u32,
    max_k: u8,
}

impl PayloadCodec for CcmCodec {
    type Row = ClusterRow;
    const MAGIC: &'static [u8; 8] = b"KINCCCM\0";
    const VERSION: u16 = 1;
    const TYPE_TAG: u16 = 2;

    fn row_stride(&self) -> u64 {
        1 + self.sample_size as u64
    }

    fn descriptor(&self) -> [u8; 32] {
        let mut d = [0u8; 32];
        d[0..4].copy_from_slice(&self.sample_size.to_le_bytes());
        d[4] = self.max_k;
        d
    }

    fn from_descriptor(bytes: &[u8; 32], _gene_count: u32) -> Result<Self> {
        let sample_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let max_k = bytes[4];
        Ok(CcmCodec {
            sample_size,
            max_k,
        })
    }

    fn encode(&self, row: &Self::Row, out: &mut Vec<u8>) {
        out.push(row.k);
        for &label in &row.labels {
            out.push(label as u8);
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Row> {
        let k = bytes[0];
        let labels = bytes[1..].iter().map(|&b| b as i8).collect();
        Ok(ClusterRow { k, labels })
    }
}

/// Cluster matrix backed by a [`PairedMatrixStore`].
pub struct ClusterMatrix {
    store: PairedMatrixStore<CcmCodec>,
}

impl ClusterMatrix {
    pub fn create<P: AsRef<Path>>(
        path: P,
        gene_count: u32,
        sample_size: u32,
        max_k: u8,
    ) -> Result<ClusterMatrixWriter> {
        let codec = CcmCodec {
            sample_size,
            max_k,
        };
        let store = PairedMatrixStore::create(path, gene_count, codec)?;
        Ok(ClusterMatrixWriter { store })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = PairedMatrixStore::open(path)?;
        Ok(ClusterMatrix { store })
    }

    pub fn gene_count(&self) -> u32 {
        self.store.gene_count()
    }

    /// Reads the row for gene pair `(i, j)`, canonicalizing first.
    pub fn read(&mut self, i: u32, j: u32) -> Result<Option<ClusterMatrixPair>> {
        let (i, j) = pairs::canonicalize(i, j)?;
        let ordinal = pairs::ordinal(i, j)?;
        let row = self.store.read_pair(ordinal)?;
        Ok(row.map(|row| ClusterMatrixPair { i, j, row }))
    }
}

/// A non-owning, read-only view of one pair's cluster-label row.
///
/// Holds the decoded row itself rather than a back-reference into the
/// matrix, keeping the handle a simple value with no borrow cycle.
pub struct ClusterMatrixPair {
    pub i: u32,
    pub j: u32,
    row: ClusterRow,
}

impl ClusterMatrixPair {
    pub fn cluster_size(&self) -> u8 {
        self.row.k
    }

    pub fn label(&self, sample: usize) -> Result<i8> {
        self.row
            .labels
            .get(sample)
            .copied()
            .ok_or_else(|| KincError::domain(format!("sample index {sample} out of range")))
    }
}

/// Write-side handle for building a CCM during an analytic pass.
pub struct ClusterMatrixWriter {
    store: PairedMatrixStore<CcmCodec>,
}

impl ClusterMatrixWriter {
    pub fn write(&mut self, i: u32, j: u32, row: ClusterRow) -> Result<()> {
        let (i, j) = pairs::canonicalize(i, j)?;
        let ordinal = pairs::ordinal(i, j)?;
        self.store.write(ordinal, &row)
    }

    pub fn finish(self) -> Result<()> {
        self.store.finish()
    }
}
