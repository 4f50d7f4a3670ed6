use clap::{Parser, Subcommand, ValueEnum};
use kinc_core::analytic::{CancellationToken, CmxBuildAnalytic, RmtAnalytic};
use kinc_core::cmx::CorrelationMatrix;
use kinc_core::config::{ClusterMatrixMeta, CorrelationMatrixMeta, ExpressionMatrixMeta};
use kinc_core::error::KincError;
use kinc_core::expression::{ExpressionMatrix, Transform};
use kinc_core::kernel::{Criterion, KernelConfig};
use kinc_core::progress::Progress;
use kinc_core::rmt::RmtConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kinc", about = "Gene co-expression network construction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Builds the cluster matrix (CCM) and correlation matrix (CMX) from
    /// a dense expression matrix.
    Cmx(CmxArgs),
    /// Sweeps a Random Matrix Theory significance threshold over a CMX.
    Rmt(RmtArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum ClusteringArg {
    None,
    Gmm,
}

#[derive(Clone, Copy, ValueEnum)]
enum CriterionArg {
    Bic,
    Icl,
}

#[derive(clap::Args)]
struct CmxArgs {
    #[arg(long)]
    emx: PathBuf,
    #[arg(long)]
    ccm_out: PathBuf,
    #[arg(long)]
    cmx_out: PathBuf,

    #[arg(long, value_enum, default_value_t = ClusteringArg::Gmm)]
    clustering: ClusteringArg,

    #[arg(long, default_value = "NA")]
    nan_token: String,

    #[arg(long, default_value_t = 30)]
    min_samples: u32,
    #[arg(long, default_value_t = f32::NEG_INFINITY)]
    min_expression: f32,
    #[arg(long, default_value_t = 1)]
    min_clusters: u8,
    #[arg(long, default_value_t = 5)]
    max_clusters: u8,
    #[arg(long, value_enum, default_value_t = CriterionArg::Bic)]
    criterion: CriterionArg,
}

#[derive(clap::Args)]
struct RmtArgs {
    #[arg(long)]
    cmx: PathBuf,

    #[arg(long, default_value_t = 0.99)]
    threshold_start: f32,
    #[arg(long, default_value_t = 0.001)]
    threshold_step: f32,
    #[arg(long, default_value_t = 0.5)]
    threshold_stop: f32,
    #[arg(long, default_value_t = 10)]
    min_unfolding_pace: usize,
    #[arg(long, default_value_t = 40)]
    max_unfolding_pace: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Cmx(args) => run_cmx(args),
        Command::Rmt(args) => run_rmt(args),
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &KincError) -> u8 {
    match err {
        KincError::Io(_) => 1,
        KincError::Format(_) => 2,
        KincError::Domain(_) => 3,
        KincError::Ordering(_) => 4,
        KincError::Numeric(_) => 5,
        KincError::ThresholdNotFound { .. } => 6,
        KincError::Cancelled => 130,
    }
}

fn run_cmx(args: CmxArgs) -> kinc_core::Result<()> {
    let emx_meta = ExpressionMatrixMeta {
        transform: Transform::None,
        nan_token: args.nan_token.clone(),
    };
    let emx = ExpressionMatrix::load_text(&args.emx, &emx_meta)?;

    let max_clusters = match args.clustering {
        ClusteringArg::None => 0,
        ClusteringArg::Gmm => args.max_clusters,
    };

    let kernel_config = KernelConfig {
        min_samples: args.min_samples,
        min_expression: args.min_expression,
        min_clusters: args.min_clusters,
        max_clusters,
        criterion: match args.criterion {
            CriterionArg::Bic => Criterion::Bic,
            CriterionArg::Icl => Criterion::Icl,
        },
        ..KernelConfig::default()
    };

    let effective_max_clusters = max_clusters.max(1);
    let ccm_meta = ClusterMatrixMeta {
        gene_count: emx.row_count(),
        sample_count: emx.column_count(),
        max_clusters: effective_max_clusters,
    };
    let cmx_meta = CorrelationMatrixMeta {
        gene_count: emx.row_count(),
        sample_count: emx.column_count(),
        max_clusters: effective_max_clusters,
        max_modes: 1,
    };

    let analytic = CmxBuildAnalytic::new(kernel_config, ccm_meta, cmx_meta);
    let total = kinc_core::pairs::total_pairs(emx.row_count());
    let progress = Progress::new(total, "building CMX");
    let cancel = CancellationToken::new();

    analytic.run(&emx, &args.ccm_out, &args.cmx_out, &cancel, &progress)
}

fn run_rmt(args: RmtArgs) -> kinc_core::Result<()> {
    let mut cmx = CorrelationMatrix::open(&args.cmx)?;

    let rmt_config = RmtConfig {
        threshold_start: args.threshold_start,
        threshold_step: args.threshold_step,
        threshold_stop: args.threshold_stop,
        min_unfolding_pace: args.min_unfolding_pace,
        max_unfolding_pace: args.max_unfolding_pace,
        ..RmtConfig::default()
    };

    let total_steps = ((args.threshold_start - args.threshold_stop) / args.threshold_step)
        .abs()
        .ceil() as u64
        + 1;
    let progress = Progress::new(total_steps, "sweeping RMT threshold");

    let analytic = RmtAnalytic::new(rmt_config);
    let cancel = CancellationToken::new();
    let threshold = analytic.run(&mut cmx, &cancel, &progress)?;

    println!("{threshold}");
    Ok(())
}
