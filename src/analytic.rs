//! Orchestration of a full analytic pass: expression matrix in, CCM/CMX
//! out (the `cmx` build), or CMX in, a significance threshold out (the
//! `rmt` step).
//!
//! Gene pairs are fit independently of one another, so the per-pair GMM
//! fits run in parallel over `rayon`'s global pool; the results are then
//! collected and emitted to the stores in strictly increasing ordinal
//! order, since [`crate::store::PairedMatrixStore::write`] requires that.
//! The RMT threshold sweep is never parallelized across threshold steps:
//! each step depends on the accepted/rejected state of the step before it.

use crate::ccm::{ClusterMatrix, ClusterRow};
use crate::cmx::CorrelationMatrix;
use crate::config::{ClusterMatrixMeta, CorrelationMatrixMeta};
use crate::error::Result;
use crate::expression::ExpressionMatrix;
use crate::kernel::{GmmPearsonKernel, KernelConfig};
use crate::pairs::PairIterator;
use crate::progress::Progress;
use crate::rmt::{RmtConfig, RmtThresholder};
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. An analytic pass polls this between pairs
/// (and between threshold steps) and bails out with
/// [`crate::error::KincError::Cancelled`] once it is set.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Builds the CCM and CMX for an expression matrix: one GMM + Pearson
/// fit per gene pair.
pub struct CmxBuildAnalytic {
    kernel_config: KernelConfig,
    ccm_meta: ClusterMatrixMeta,
    cmx_meta: CorrelationMatrixMeta,
}

impl CmxBuildAnalytic {
    pub fn new(
        kernel_config: KernelConfig,
        ccm_meta: ClusterMatrixMeta,
        cmx_meta: CorrelationMatrixMeta,
    ) -> Self {
        CmxBuildAnalytic {
            kernel_config,
            ccm_meta,
            cmx_meta,
        }
    }

    /// Runs the full pass, writing sealed CCM and CMX files at
    /// `ccm_path`/`cmx_path`. Cancellation is checked once per emitted
    /// pair; on cancellation the tentative output files are discarded.
    pub fn run<P: AsRef<Path>>(
        &self,
        emx: &ExpressionMatrix,
        ccm_path: P,
        cmx_path: P,
        cancel: &CancellationToken,
        progress: &Progress,
    ) -> Result<()> {
        let gene_count = emx.row_count();

        let mut ccm_writer = ClusterMatrix::create(
            &ccm_path,
            gene_count,
            self.ccm_meta.sample_count,
            self.ccm_meta.max_clusters,
        )?;
        let mut cmx_writer = CorrelationMatrix::create(
            &cmx_path,
            gene_count,
            self.cmx_meta.sample_count,
            self.cmx_meta.correlation_size(),
            self.cmx_meta.max_modes,
        )?;

        // Chunk the pair space so each rayon task fits many pairs (the
        // per-pair GMM fit is the expensive, order-blind unit of work);
        // results are collected back in ordinal order before emission.
        const CHUNK: usize = 4096;
        let all_pairs: Vec<(u32, u32, u64)> = PairIterator::new(gene_count).collect();

        for chunk in all_pairs.chunks(CHUNK) {
            if cancel.is_cancelled() {
                drop(ccm_writer);
                drop(cmx_writer);
                crate::store::discard_tentative(&ccm_path).ok();
                crate::store::discard_tentative(&cmx_path).ok();
                return Err(crate::error::KincError::Cancelled);
            }

            let outcomes: Vec<_> = chunk
                .par_iter()
                .map(|&(i, j, ord)| {
                    let mut kernel = GmmPearsonKernel::new(self.kernel_config.clone());
                    let x = emx.gene(i);
                    let y = emx.gene(j);
                    (i, j, ord, kernel.fit_pair(x, y))
                })
                .collect();

            for (i, j, _ord, outcome) in outcomes {
                if !outcome.should_emit() {
                    continue;
                }
                let k = outcome.correlations.len() as u8;
                ccm_writer.write(
                    i,
                    j,
                    ClusterRow {
                        k,
                        labels: outcome.labels,
                    },
                )?;
                cmx_writer.write(i, j, &outcome.correlations)?;
                progress.tick();
            }
        }

        ccm_writer.finish()?;
        cmx_writer.finish()?;
        progress.finish();

        Ok(())
    }
}

/// Runs the RMT threshold sweep over an already-built CMX.
pub struct RmtAnalytic {
    config: RmtConfig,
}

impl RmtAnalytic {
    pub fn new(config: RmtConfig) -> Self {
        RmtAnalytic { config }
    }

    pub fn run(
        &self,
        cmx: &mut CorrelationMatrix,
        cancel: &CancellationToken,
        progress: &Progress,
    ) -> Result<f32> {
        if cancel.is_cancelled() {
            return Err(crate::error::KincError::Cancelled);
        }
        let thresholder = RmtThresholder::new(self.config.clone());
        thresholder.find_threshold(cmx, cancel, progress)
    }
}
