/// End-to-end tests of ranking and cluster extraction
///
/// Each test lays out alignments, membership and FASTA inputs in a temporary
/// directory and checks the partition files, membership table and manifest.
use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use hitclust::config::RunConfig;
use hitclust::error::PipelineError;
use hitclust::hits_table::read_hits_file;
use hitclust::partition::OutputClass;
use hitclust::pipeline::{run_all, run_extract, run_rank, ExtractSummary};

use test_utils::*;

fn config() -> RunConfig {
    RunConfig::new(2, 1 << 30).unwrap()
}

/// Four queries, two references. q1 and q2 share cluster cA and hit r1/r2;
/// q3 and q4 have no hits and sit alone in cB and cC.
fn write_inputs(root: &Path) {
    create_paf_file(
        &root.join("aln.paf"),
        &[
            paf_line("q1", "r1", 100, 100, 98, 60, 'P'),
            paf_line("q1", "r2", 100, 90, 80, 10, 'S'),
            paf_line("q2", "r2", 100, 100, 95, 60, 'P'),
        ],
    );
    create_membership_file(
        &root.join("membership.tsv"),
        &[("cA", "q1"), ("cA", "q2"), ("cB", "q3"), ("cC", "q4")],
    );
    create_fasta_file(
        &root.join("queries.fasta"),
        &[("q1", "AAAA"), ("q2", "CCCC"), ("q3", "GGGG"), ("q4", "TTTT")],
    );
    create_fasta_file(
        &root.join("references.fasta"),
        &[("r1", "ACGT"), ("r2", "TGCA"), ("r9", "NNNN")],
    );
}

fn run_fixture(root: &Path) -> Result<ExtractSummary> {
    write_inputs(root);
    run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        Some(root.join("best.tsv").as_path()),
        &extract_paths(root),
        &config(),
    )
}

#[test]
fn test_clusters_are_split_by_reference_presence() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    let summary = run_fixture(root)?;

    assert_eq!(summary.clusters.len(), 3);
    assert_eq!(
        list_files(&root.join("with_reference")),
        vec![root.join("with_reference/1.fasta")]
    );
    assert_eq!(
        list_files(&root.join("query_only")),
        vec![root.join("query_only/2.fasta"), root.join("query_only/3.fasta")]
    );

    assert_eq!(
        fasta_ids(&root.join("with_reference/1.fasta")),
        vec!["q1", "q2", "r1", "r2"]
    );
    assert_eq!(fasta_ids(&root.join("query_only/2.fasta")), vec!["q3"]);
    assert_eq!(fasta_ids(&root.join("query_only/3.fasta")), vec!["q4"]);

    let classes: Vec<OutputClass> = summary.clusters.iter().map(|c| c.class).collect();
    assert_eq!(
        classes,
        vec![
            OutputClass::WithReference,
            OutputClass::QueryOnly,
            OutputClass::QueryOnly
        ]
    );
    Ok(())
}

#[test]
fn test_membership_table_and_manifest() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    let summary = run_fixture(root)?;

    assert_eq!(
        fs::read_to_string(root.join("members.tsv"))?,
        "cA\tQuery\tq1\n\
         cA\tQuery\tq2\n\
         cA\tReference\tr1\n\
         cA\tReference\tr2\n\
         cB\tQuery\tq3\n\
         cC\tQuery\tq4\n"
    );
    assert_eq!(summary.member_count, 6);

    assert_eq!(
        fs::read_to_string(root.join("manifest.tsv"))?,
        "cluster_name\tcluster_id\tclass\tn_query\tn_reference\n\
         1\tcA\twith_reference\t2\t2\n\
         2\tcB\tquery_only\t1\t0\n\
         3\tcC\tquery_only\t1\t0\n"
    );
    Ok(())
}

#[test]
fn test_record_layout_and_conservation() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    let summary = run_fixture(root)?;

    assert_eq!(
        fs::read_to_string(root.join("with_reference/1.fasta"))?,
        ">q1\nAAAA\n>q2\nCCCC\n>r1\nACGT\n>r2\nTGCA\n"
    );
    assert!(summary.conservation.is_conserved());
    assert_eq!(summary.conservation.input_queries, 4);
    assert_eq!(summary.conservation.output_queries, 4);
    Ok(())
}

#[test]
fn test_best_hit_table_keeps_one_row_per_query() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    run_fixture(root)?;

    let best = read_hits_file(root.join("best.tsv"))?;
    let pairs: Vec<(&str, Option<&str>)> = best
        .iter()
        .map(|h| (h.query_id.as_str(), h.target_id.as_deref()))
        .collect();
    assert_eq!(pairs, vec![("q1", Some("r1")), ("q2", Some("r2"))]);

    let all = read_hits_file(root.join("hits.tsv"))?;
    assert_eq!(all.len(), 3);
    Ok(())
}

#[test]
fn test_staged_rank_then_extract_matches_single_run() -> Result<()> {
    let single = TempDir::new()?;
    run_fixture(single.path())?;

    let staged = TempDir::new()?;
    let root = staged.path();
    write_inputs(root);
    run_rank(&root.join("aln.paf"), &config(), &root.join("hits.tsv"), None)?;
    let hits = read_hits_file(root.join("hits.tsv"))?;
    run_extract(&extract_paths(root), &hits, &config())?;

    for file in [
        "members.tsv",
        "manifest.tsv",
        "with_reference/1.fasta",
        "query_only/2.fasta",
        "query_only/3.fasta",
    ] {
        assert_eq!(
            fs::read(single.path().join(file))?,
            fs::read(root.join(file))?,
            "{file} differs"
        );
    }
    Ok(())
}

#[test]
fn test_repeated_runs_are_byte_identical() -> Result<()> {
    let first = TempDir::new()?;
    let second = TempDir::new()?;
    run_fixture(first.path())?;
    run_fixture(second.path())?;

    for file in [
        "hits.tsv",
        "best.tsv",
        "members.tsv",
        "manifest.tsv",
        "with_reference/1.fasta",
        "query_only/2.fasta",
        "query_only/3.fasta",
    ] {
        assert_eq!(
            fs::read(first.path().join(file))?,
            fs::read(second.path().join(file))?,
            "{file} differs"
        );
    }
    Ok(())
}

#[test]
fn test_query_sequence_wins_over_reference_sequence() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_inputs(root);
    // q2 also appears in the reference set with a different sequence
    create_fasta_file(
        &root.join("references.fasta"),
        &[("q2", "NNNN"), ("r1", "ACGT"), ("r2", "TGCA")],
    );

    run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        None,
        &extract_paths(root),
        &config(),
    )?;

    let content = fs::read_to_string(root.join("with_reference/1.fasta"))?;
    assert!(content.contains(">q2\nCCCC\n"));
    assert!(!content.contains("NNNN"));
    Ok(())
}

#[test]
fn test_missing_sequence_aborts_without_partitions() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_inputs(root);
    create_fasta_file(&root.join("references.fasta"), &[("r1", "ACGT")]);

    let err = run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        None,
        &extract_paths(root),
        &config(),
    )
    .unwrap_err();

    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::MissingSequence { id, cluster_id }) => {
            assert_eq!(id, "r2");
            assert_eq!(cluster_id, "cA");
        }
        other => panic!("expected a missing sequence error, got {other:?}"),
    }

    // Nothing promoted, staging cleaned up
    assert!(list_files(&root.join("with_reference")).is_empty());
    assert!(list_files(&root.join("query_only")).is_empty());
    assert!(!root.join("manifest.tsv").exists());
    assert!(!root.join("members.tsv").exists());
    Ok(())
}

#[test]
fn test_bad_fasta_leaves_no_membership_table() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_inputs(root);
    create_fasta_file(
        &root.join("queries.fasta"),
        &[("q1", "AAAA"), ("q1", "CCCC"), ("q3", "GGGG"), ("q4", "TTTT")],
    );

    let err = run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        None,
        &extract_paths(root),
        &config(),
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::FastaRecord { record: 2, .. })
    ));
    assert!(!root.join("members.tsv").exists());
    assert!(!root.join("with_reference").exists());
    Ok(())
}

#[test]
fn test_unclustered_query_fails_conservation() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_inputs(root);
    create_fasta_file(
        &root.join("queries.fasta"),
        &[
            ("q1", "AAAA"),
            ("q2", "CCCC"),
            ("q3", "GGGG"),
            ("q4", "TTTT"),
            ("q5", "ACAC"),
        ],
    );

    let err = run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        None,
        &extract_paths(root),
        &config(),
    )
    .unwrap_err();

    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::ConservationMismatch {
            input,
            output,
            delta,
        }) => assert_eq!((*input, *output, *delta), (5, 4, -1)),
        other => panic!("expected a conservation mismatch, got {other:?}"),
    }

    assert!(list_files(&root.join("with_reference")).is_empty());
    assert!(list_files(&root.join("query_only")).is_empty());
    assert!(!root.join("members.tsv").exists());
    Ok(())
}

#[test]
fn test_rerun_replaces_partitions_of_earlier_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    // First run: 12 query-only clusters named 01..12
    let ids: Vec<String> = (0..12).map(|i| format!("q{i:02}")).collect();
    let fasta: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "ACGT")).collect();
    let rows: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), id.as_str())).collect();
    create_fasta_file(&root.join("queries.fasta"), &fasta);
    create_fasta_file(&root.join("references.fasta"), &[]);
    create_membership_file(&root.join("membership.tsv"), &rows);
    run_extract(&extract_paths(root), &[], &config())?;
    assert_eq!(list_files(&root.join("query_only")).len(), 12);

    // Unrelated files in the output directory are left alone
    fs::write(root.join("query_only/notes.txt"), "keep")?;

    // Second run into the same directories: 3 clusters named 1..3
    write_inputs(root);
    run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        None,
        &extract_paths(root),
        &config(),
    )?;

    assert_eq!(
        list_files(&root.join("query_only")),
        vec![
            root.join("query_only/2.fasta"),
            root.join("query_only/3.fasta"),
            root.join("query_only/notes.txt"),
        ]
    );
    assert_eq!(
        list_files(&root.join("with_reference")),
        vec![root.join("with_reference/1.fasta")]
    );

    let on_disk: usize = ["with_reference/1.fasta", "query_only/2.fasta", "query_only/3.fasta"]
        .iter()
        .map(|f| fasta_ids(&root.join(f)).iter().filter(|id| id.starts_with('q')).count())
        .sum();
    assert_eq!(on_disk, 4);
    Ok(())
}

#[test]
fn test_shared_reference_is_written_to_each_cluster() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_inputs(root);
    create_membership_file(
        &root.join("membership.tsv"),
        &[("cA", "q1"), ("cB", "q2"), ("cB", "q3"), ("cC", "q4")],
    );

    run_all(
        &root.join("aln.paf"),
        &root.join("hits.tsv"),
        None,
        &extract_paths(root),
        &config(),
    )?;

    assert_eq!(
        fasta_ids(&root.join("with_reference/1.fasta")),
        vec!["q1", "r1", "r2"]
    );
    assert_eq!(
        fasta_ids(&root.join("with_reference/2.fasta")),
        vec!["q2", "q3", "r2"]
    );
    assert_eq!(fasta_ids(&root.join("query_only/3.fasta")), vec!["q4"]);
    Ok(())
}

#[test]
fn test_large_cluster_is_merged_from_fragments() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    let sequences: Vec<(String, String)> = (1..=4)
        .map(|i| (format!("q{i}"), generate_dna_sequence(30_000)))
        .collect();
    let fasta: Vec<(&str, &str)> = sequences
        .iter()
        .map(|(id, seq)| (id.as_str(), seq.as_str()))
        .collect();
    create_fasta_file(&root.join("queries.fasta"), &fasta);
    create_fasta_file(&root.join("references.fasta"), &[]);
    create_membership_file(
        &root.join("membership.tsv"),
        &[("big", "q1"), ("big", "q2"), ("big", "q3"), ("big", "q4")],
    );

    // A tiny memory hint drops the chunk budget to its floor
    let summary = run_extract(&extract_paths(root), &[], &RunConfig::new(1, 1)?)?;

    assert_eq!(summary.clusters.len(), 1);
    assert!(summary.clusters[0].fragments > 1);

    let expected: String = sequences
        .iter()
        .map(|(id, seq)| format!(">{id}\n{seq}\n"))
        .collect();
    assert_eq!(
        fs::read_to_string(root.join("query_only/1.fasta"))?,
        expected
    );
    assert_eq!(
        list_files(&root.join("query_only")),
        vec![root.join("query_only/1.fasta")]
    );
    Ok(())
}

#[test]
fn test_cluster_names_are_zero_padded() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    let ids: Vec<String> = (0..12).map(|i| format!("q{i:02}")).collect();
    let fasta: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "ACGT")).collect();
    let rows: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), id.as_str())).collect();
    create_fasta_file(&root.join("queries.fasta"), &fasta);
    create_fasta_file(&root.join("references.fasta"), &[]);
    create_membership_file(&root.join("membership.tsv"), &rows);

    run_extract(&extract_paths(root), &[], &config())?;

    let files = list_files(&root.join("query_only"));
    assert_eq!(files.len(), 12);
    assert_eq!(files[0], root.join("query_only/01.fasta"));
    assert_eq!(files[11], root.join("query_only/12.fasta"));
    assert_eq!(fasta_ids(&root.join("query_only/01.fasta")), vec!["q00"]);
    Ok(())
}
