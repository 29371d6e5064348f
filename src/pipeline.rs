/// Stage orchestration
///
/// `rank` turns alignments into top-N and best-hit tables; `extract` joins
/// membership, hits and sequences into cluster FASTA partitions and checks
/// conservation. Stages run strictly in order and each consumes the full
/// output of the previous one.
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::conservation::{validate_conservation, ConservationReport};
use crate::hits_table::{write_hits_file, HitLink};
use crate::membership::{build_members, group_clusters, read_membership_file, write_members_file};
use crate::paf::read_paf_file;
use crate::partition::{
    assign_cluster_names, write_manifest, FastaPartitionWriter, OutputClass, WrittenCluster,
};
use crate::ranking::{best_hits, HitRanker, RankedHit};
use crate::sequences::{read_fasta_file, SequenceResolver};

/// Rank hits of an alignment file and write the tables
pub fn run_rank(
    alignments: &Path,
    config: &RunConfig,
    output: &Path,
    best_hits_output: Option<&Path>,
) -> Result<Vec<RankedHit>> {
    let records = read_paf_file(alignments)?;
    let query_count = records
        .iter()
        .map(|r| r.query_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    log::info!(
        "Ranking {} alignments of {} queries (top {})",
        records.len(),
        query_count,
        config.top_n
    );

    let ranked = HitRanker::new(config.top_n).rank(records);

    let all: Vec<&RankedHit> = ranked.iter().collect();
    write_hits_file(output, &all)?;

    if let Some(path) = best_hits_output {
        write_hits_file(path, &best_hits(&ranked))?;
    }

    Ok(ranked)
}

/// Files read and written by the extraction stage
#[derive(Debug, Clone)]
pub struct ExtractPaths {
    pub cluster_membership: PathBuf,
    pub query_fasta: PathBuf,
    pub reference_fasta: PathBuf,
    pub with_reference_dir: PathBuf,
    pub query_only_dir: PathBuf,
    pub membership_out: PathBuf,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExtractSummary {
    pub clusters: Vec<WrittenCluster>,
    pub member_count: usize,
    pub conservation: ConservationReport,
}

/// Build cluster partitions from membership, ranked hits and sequences
pub fn run_extract(
    paths: &ExtractPaths,
    hits: &[HitLink],
    config: &RunConfig,
) -> Result<ExtractSummary> {
    let entries = read_membership_file(&paths.cluster_membership)?;
    let members = build_members(&entries, hits);
    let member_count = members.len();

    let mut clusters = group_clusters(members.clone());
    assign_cluster_names(&mut clusters);
    log::info!(
        "{} clusters from {} membership entries ({} members)",
        clusters.len(),
        entries.len(),
        member_count
    );

    let (reference, query) = rayon::join(
        || read_fasta_file(&paths.reference_fasta),
        || read_fasta_file(&paths.query_fasta),
    );
    let (reference, query) = (reference?, query?);

    let input_ids: Vec<String> = query.ids().map(str::to_string).collect();
    let resolver = SequenceResolver::new(reference, query);

    let writer = FastaPartitionWriter::new(&paths.with_reference_dir, &paths.query_only_dir)
        .with_chunk_budget(config.chunk_budget());
    let staged = writer
        .stage_all(&clusters, &resolver)
        .context("Failed to write cluster partitions")?;

    // Checked before promotion so a failing run leaves no final output
    let conservation =
        validate_conservation(input_ids.iter().map(|s| s.as_str()), staged.clusters())?;

    let written = staged
        .promote()
        .context("Failed to move cluster partitions into place")?;

    write_members_file(&paths.membership_out, &members)?;
    if let Some(manifest) = &paths.manifest {
        write_manifest(manifest, &written)?;
    }

    Ok(ExtractSummary {
        clusters: written,
        member_count,
        conservation,
    })
}

/// Both stages in one process; hits flow to extraction without a re-read
pub fn run_all(
    alignments: &Path,
    hits_output: &Path,
    best_hits_output: Option<&Path>,
    paths: &ExtractPaths,
    config: &RunConfig,
) -> Result<ExtractSummary> {
    let ranked = run_rank(alignments, config, hits_output, best_hits_output)?;
    let links: Vec<HitLink> = ranked.iter().map(HitLink::from).collect();
    run_extract(paths, &links, config)
}

/// Count written clusters per output class
pub fn class_counts(written: &[WrittenCluster]) -> (usize, usize) {
    let with_reference = written
        .iter()
        .filter(|w| w.class == OutputClass::WithReference)
        .count();
    (with_reference, written.len() - with_reference)
}
