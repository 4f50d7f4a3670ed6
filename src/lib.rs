//! # kinc-core
//!
//! Gene co-expression network construction: for every pair of genes in a
//! dense expression matrix, cluster samples with a 2-D Gaussian Mixture
//! Model, compute one Pearson correlation per cluster, and store the
//! result in a compact sparse binary format. A Random Matrix Theory
//! threshold sweep then picks the correlation cutoff at which the
//! resulting network's spectral statistics depart from random-matrix
//! behavior.
//!
//! ## Usage
//!
//! ```ignore
//! use kinc_core::analytic::{CancellationToken, CmxBuildAnalytic};
//! use kinc_core::config::{ClusterMatrixMeta, CorrelationMatrixMeta, ExpressionMatrixMeta};
//! use kinc_core::expression::{ExpressionMatrix, Transform};
//! use kinc_core::kernel::KernelConfig;
//! use kinc_core::progress::Progress;
//!
//! let emx = ExpressionMatrix::load_text(
//!     "expression.tsv",
//!     &ExpressionMatrixMeta { transform: Transform::None, nan_token: "NA".to_string() },
//! )?;
//!
//! let analytic = CmxBuildAnalytic::new(
//!     KernelConfig::default(),
//!     ClusterMatrixMeta { gene_count: emx.row_count(), sample_count: emx.column_count(), max_clusters: 5 },
//!     CorrelationMatrixMeta { gene_count: emx.row_count(), sample_count: emx.column_count(), max_clusters: 5, max_modes: 1 },
//! );
//!
//! analytic.run(&emx, "out.ccm", "out.cmx", &CancellationToken::new(), &Progress::disabled())?;
//! # Ok::<(), kinc_core::error::KincError>(())
//! ```

pub mod analytic;
pub mod ccm;
pub mod cmx;
pub mod config;
pub mod error;
pub mod expression;
pub mod kernel;
pub mod pairs;
pub mod progress;
pub mod rmt;
pub mod store;

pub use error::{KincError, Result};
