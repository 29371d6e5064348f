use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use hitclust::config::{parse_memory_limit, parse_positive_count, RunConfig, DEFAULT_MEMORY_LIMIT};
use hitclust::hits_table::read_hits_file;
use hitclust::pipeline::{class_counts, run_all, run_extract, run_rank, ExtractPaths, ExtractSummary};

/// hitclust - Rank alignment hits and assemble per-cluster FASTA partitions
///
/// Sits between the aligner and distance-based clustering: ranks candidate
/// hits per query, joins cluster membership with hits and sequences, and
/// writes one FASTA file per cluster.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Debug logging
    #[clap(short = 'v', long = "verbose", global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[clap(short = 'q', long = "quiet", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank alignments per query and write the top-N hit table
    Rank(RankArgs),

    /// Build cluster FASTA partitions from membership, hits and sequences
    Extract(ExtractArgs),

    /// Rank and extract in one run
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RankOptions {
    /// Input alignments (PAF, optionally .gz/.bgz)
    #[clap(short = 'i', long = "alignments")]
    alignments: PathBuf,

    /// Hits to keep per query
    #[clap(short = 'n', long = "top-n", default_value = "10", value_parser = parse_positive_count)]
    top_n: usize,

    /// Output top-N hit table
    #[clap(short = 'o', long = "output")]
    output: PathBuf,

    /// Also write the best hit per query here
    #[clap(long = "best-hits")]
    best_hits: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExtractOptions {
    /// Two-column cluster membership table (cluster_id, query_id)
    #[clap(short = 'm', long = "cluster-membership")]
    cluster_membership: PathBuf,

    /// Query sequences (FASTA)
    #[clap(long = "query-fasta")]
    query_fasta: PathBuf,

    /// Reference sequences (FASTA)
    #[clap(long = "reference-fasta")]
    reference_fasta: PathBuf,

    /// Output directory for clusters containing references
    #[clap(long = "with-reference-dir")]
    with_reference_dir: PathBuf,

    /// Output directory for query-only clusters
    #[clap(long = "query-only-dir")]
    query_only_dir: PathBuf,

    /// Output flat membership table (cluster_id, member_type, member_id)
    #[clap(long = "membership-out")]
    membership_out: PathBuf,

    /// Optional cluster manifest (name, id, class, counts)
    #[clap(long = "manifest")]
    manifest: Option<PathBuf>,
}

impl ExtractOptions {
    fn paths(&self) -> ExtractPaths {
        ExtractPaths {
            cluster_membership: self.cluster_membership.clone(),
            query_fasta: self.query_fasta.clone(),
            reference_fasta: self.reference_fasta.clone(),
            with_reference_dir: self.with_reference_dir.clone(),
            query_only_dir: self.query_only_dir.clone(),
            membership_out: self.membership_out.clone(),
            manifest: self.manifest.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct ResourceOptions {
    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "8", value_parser = parse_positive_count)]
    threads: usize,

    /// Memory hint, with optional k/M/G suffix
    #[clap(long = "memory", default_value = DEFAULT_MEMORY_LIMIT, value_parser = parse_memory_limit)]
    memory: u64,
}

impl ResourceOptions {
    /// Validate and size the global rayon pool
    fn config(&self) -> Result<RunConfig> {
        let config = RunConfig::new(self.threads, self.memory)?;
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.get())
            .build_global()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct RankArgs {
    #[clap(flatten)]
    rank: RankOptions,

    #[clap(flatten)]
    resources: ResourceOptions,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Top-N hit table produced by `rank`
    #[clap(long = "hits")]
    hits: PathBuf,

    #[clap(flatten)]
    extract: ExtractOptions,

    #[clap(flatten)]
    resources: ResourceOptions,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[clap(flatten)]
    rank: RankOptions,

    #[clap(flatten)]
    extract: ExtractOptions,

    #[clap(flatten)]
    resources: ResourceOptions,
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn report(summary: &ExtractSummary) {
    let (with_reference, query_only) = class_counts(&summary.clusters);
    log::info!(
        "Done: {} clusters ({} with reference, {} query-only), {} members, {} queries conserved",
        summary.clusters.len(),
        with_reference,
        query_only,
        summary.member_count,
        summary.conservation.output_queries
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Command::Rank(args) => {
            let config = args.resources.config()?.with_top_n(args.rank.top_n)?;
            run_rank(
                &args.rank.alignments,
                &config,
                &args.rank.output,
                args.rank.best_hits.as_deref(),
            )?;
        }
        Command::Extract(args) => {
            let config = args.resources.config()?;
            let hits = read_hits_file(&args.hits)?;
            let summary = run_extract(&args.extract.paths(), &hits, &config)?;
            report(&summary);
        }
        Command::Run(args) => {
            let config = args.resources.config()?.with_top_n(args.rank.top_n)?;
            let summary = run_all(
                &args.rank.alignments,
                &args.rank.output,
                args.rank.best_hits.as_deref(),
                &args.extract.paths(),
                &config,
            )?;
            report(&summary);
        }
    }

    Ok(())
}
