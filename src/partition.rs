/// Per-cluster FASTA partitions
///
/// Each cluster becomes one FASTA file named by its zero-padded ordinal.
/// Clusters holding at least one reference go to the with-reference
/// directory, the rest to the query-only directory.
///
/// Writing happens in two phases. First every cluster is written in
/// parallel into a staging directory inside its output directory. Only when
/// all clusters succeeded are the staged files renamed into place, so a
/// failed run never promotes any partition. Staging directories are removed
/// when the writer returns, on success and on error. Promotion also deletes
/// numbered cluster files an earlier run left behind.
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::PipelineError;
use crate::membership::{Cluster, ClusterMember};
use crate::sequences::SequenceResolver;

pub const FASTA_EXTENSION: &str = "fasta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputClass {
    WithReference,
    QueryOnly,
}

impl OutputClass {
    pub fn of(cluster: &Cluster) -> Self {
        if cluster.has_reference {
            OutputClass::WithReference
        } else {
            OutputClass::QueryOnly
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputClass::WithReference => "with_reference",
            OutputClass::QueryOnly => "query_only",
        }
    }
}

/// Digits needed to print the largest ordinal
pub fn cluster_name_width(cluster_count: usize) -> usize {
    cluster_count.max(1).to_string().len()
}

/// Sort clusters by id and name them by zero-padded ordinal (1-based)
pub fn assign_cluster_names(clusters: &mut [Cluster]) {
    clusters.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
    let width = cluster_name_width(clusters.len());
    for (i, cluster) in clusters.iter_mut().enumerate() {
        cluster.cluster_name = format!("{:0width$}", i + 1, width = width);
    }
}

/// Outcome of writing one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenCluster {
    pub cluster_name: String,
    pub cluster_id: String,
    pub class: OutputClass,
    pub path: PathBuf,
    pub query_ids: Vec<String>,
    pub reference_count: usize,
    /// Physical chunks written before merging
    pub fragments: usize,
}

/// A cluster written to staging but not yet moved into place
struct StagedCluster {
    staged_path: PathBuf,
    written: WrittenCluster,
}

/// One FASTA record per distinct member id, ascending by id.
/// Should an id be both a query and a reference member, the query entry is kept.
fn fasta_order(members: &[ClusterMember]) -> Vec<&ClusterMember> {
    let mut ordered: Vec<&ClusterMember> = members.iter().collect();
    ordered.sort_by(|a, b| {
        a.member_id
            .cmp(&b.member_id)
            .then_with(|| a.member_type.cmp(&b.member_type))
    });
    ordered.dedup_by(|later, earlier| later.member_id == earlier.member_id);
    ordered
}

/// Sequential chunk files for one cluster; a chunk never splits a record
struct ChunkWriter {
    dir: PathBuf,
    budget: u64,
    current: Option<BufWriter<File>>,
    current_bytes: u64,
    chunks: Vec<PathBuf>,
}

impl ChunkWriter {
    fn new(dir: PathBuf, budget: u64) -> Self {
        ChunkWriter {
            dir,
            budget,
            current: None,
            current_bytes: 0,
            chunks: Vec::new(),
        }
    }

    fn start_chunk(&mut self) -> io::Result<()> {
        self.finish_chunk()?;
        let path = self
            .dir
            .join(format!("part-{:05}.{FASTA_EXTENSION}", self.chunks.len()));
        self.current = Some(BufWriter::new(File::create(&path)?));
        self.current_bytes = 0;
        self.chunks.push(path);
        Ok(())
    }

    fn finish_chunk(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.current.take() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Write one complete record (header and sequence) in a single call
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        let len = record.len() as u64;
        if self.current.is_none() || (self.current_bytes > 0 && self.current_bytes + len > self.budget)
        {
            self.start_chunk()?;
        }
        if let Some(writer) = self.current.as_mut() {
            writer.write_all(record)?;
        }
        self.current_bytes += len;
        Ok(())
    }

    fn finish(mut self) -> io::Result<Vec<PathBuf>> {
        self.finish_chunk()?;
        Ok(self.chunks)
    }
}

/// Concatenate chunks, in order, into `dest`
fn merge_chunks(chunks: &[PathBuf], dest: &Path) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(dest)?);
    for chunk in chunks {
        let mut input = File::open(chunk)?;
        io::copy(&mut input, &mut out)?;
    }
    out.flush()?;
    for chunk in chunks {
        fs::remove_file(chunk)?;
    }
    Ok(())
}

/// Writes cluster FASTA files into the two output directories
#[derive(Debug, Clone)]
pub struct FastaPartitionWriter {
    with_reference_dir: PathBuf,
    query_only_dir: PathBuf,
    chunk_budget: u64,
}

impl FastaPartitionWriter {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(with_reference_dir: P, query_only_dir: Q) -> Self {
        FastaPartitionWriter {
            with_reference_dir: with_reference_dir.into(),
            query_only_dir: query_only_dir.into(),
            chunk_budget: u64::MAX,
        }
    }

    /// Bytes buffered per chunk before a cluster spills into a new chunk
    pub fn with_chunk_budget(mut self, bytes: u64) -> Self {
        self.chunk_budget = bytes.max(1);
        self
    }

    pub fn dir_for(&self, class: OutputClass) -> &Path {
        match class {
            OutputClass::WithReference => &self.with_reference_dir,
            OutputClass::QueryOnly => &self.query_only_dir,
        }
    }

    /// Write every cluster and promote the files. Clusters must already be named.
    pub fn write_all(
        &self,
        clusters: &[Cluster],
        resolver: &SequenceResolver,
    ) -> std::result::Result<Vec<WrittenCluster>, PipelineError> {
        self.stage_all(clusters, resolver)?.promote()
    }

    /// Write every cluster into staging. Nothing is visible in the output
    /// directories until [`StagedPartitions::promote`].
    pub fn stage_all(
        &self,
        clusters: &[Cluster],
        resolver: &SequenceResolver,
    ) -> std::result::Result<StagedPartitions, PipelineError> {
        fs::create_dir_all(&self.with_reference_dir)?;
        fs::create_dir_all(&self.query_only_dir)?;

        let with_reference_staging = staging_dir(&self.with_reference_dir)?;
        let query_only_staging = staging_dir(&self.query_only_dir)?;

        let staged: Vec<StagedCluster> = clusters
            .par_iter()
            .map(|cluster| {
                let staging = match OutputClass::of(cluster) {
                    OutputClass::WithReference => with_reference_staging.path(),
                    OutputClass::QueryOnly => query_only_staging.path(),
                };
                self.stage_cluster(cluster, resolver, staging)
            })
            .collect::<std::result::Result<_, _>>()?;

        let (staged_paths, written): (Vec<PathBuf>, Vec<WrittenCluster>) = staged
            .into_iter()
            .map(|s| (s.staged_path, s.written))
            .unzip();

        Ok(StagedPartitions {
            with_reference_dir: self.with_reference_dir.clone(),
            query_only_dir: self.query_only_dir.clone(),
            staged_paths,
            written,
            _staging: [with_reference_staging, query_only_staging],
        })
    }

    fn stage_cluster(
        &self,
        cluster: &Cluster,
        resolver: &SequenceResolver,
        staging: &Path,
    ) -> std::result::Result<StagedCluster, PipelineError> {
        let class = OutputClass::of(cluster);

        // Resolve everything up front: a missing sequence must not leave a file behind.
        let records = fasta_order(&cluster.members)
            .into_iter()
            .map(|m| {
                resolver
                    .resolve(&m.member_id, &cluster.cluster_id)
                    .map(|seq| format!(">{}\n{}\n", m.member_id, seq))
            })
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let chunk_dir = staging.join(&cluster.cluster_name);
        fs::create_dir(&chunk_dir)?;

        let mut chunks = ChunkWriter::new(chunk_dir, self.chunk_budget);
        for record in &records {
            chunks.write_record(record.as_bytes())?;
        }
        let chunks = chunks.finish()?;

        let file_name = format!("{}.{FASTA_EXTENSION}", cluster.cluster_name);
        let staged_path = staging.join(&file_name);

        match chunks.len() {
            // Clusters always have at least one query, but stay well-formed anyway.
            0 => {
                File::create(&staged_path)?;
            }
            1 => fs::rename(&chunks[0], &staged_path)?,
            n => {
                log::warn!(
                    "Cluster {} ({}) was written in {} fragments; merging",
                    cluster.cluster_name,
                    cluster.cluster_id,
                    n
                );
                merge_chunks(&chunks, &staged_path).map_err(|source| {
                    PipelineError::FragmentMerge {
                        cluster: cluster.cluster_name.clone(),
                        source,
                    }
                })?;
            }
        }

        log::debug!(
            "Staged cluster {} ({}): {} records",
            cluster.cluster_name,
            cluster.cluster_id,
            records.len()
        );

        Ok(StagedCluster {
            staged_path,
            written: WrittenCluster {
                cluster_name: cluster.cluster_name.clone(),
                cluster_id: cluster.cluster_id.clone(),
                class,
                path: self.dir_for(class).join(file_name),
                query_ids: cluster.query_ids().map(str::to_string).collect(),
                reference_count: cluster.reference_count(),
                fragments: chunks.len(),
            },
        })
    }
}

/// Cluster files sitting in staging. Dropping this without promoting
/// removes them.
pub struct StagedPartitions {
    with_reference_dir: PathBuf,
    query_only_dir: PathBuf,
    staged_paths: Vec<PathBuf>,
    written: Vec<WrittenCluster>,
    _staging: [TempDir; 2],
}

impl StagedPartitions {
    /// Clusters as they will be once promoted
    pub fn clusters(&self) -> &[WrittenCluster] {
        &self.written
    }

    /// Move staged files into the output directories and delete cluster
    /// files an earlier run left there, so the directories hold exactly this
    /// run's partitions.
    pub fn promote(self) -> std::result::Result<Vec<WrittenCluster>, PipelineError> {
        let mut previous = existing_partitions(&self.with_reference_dir)?;
        previous.extend(existing_partitions(&self.query_only_dir)?);

        for (staged_path, cluster) in self.staged_paths.iter().zip(&self.written) {
            fs::rename(staged_path, &cluster.path)?;
        }

        let current: HashSet<&Path> = self.written.iter().map(|w| w.path.as_path()).collect();
        let mut stale = 0usize;
        for path in previous.iter().filter(|p| !current.contains(p.as_path())) {
            fs::remove_file(path)?;
            stale += 1;
        }
        if stale > 0 {
            log::info!("Removed {stale} cluster files left from an earlier run");
        }

        let written = self.written;
        let fragmented = written.iter().filter(|w| w.fragments > 1).count();
        log::info!(
            "Wrote {} cluster files ({} with reference, {} query-only, {} merged from fragments)",
            written.len(),
            written
                .iter()
                .filter(|w| w.class == OutputClass::WithReference)
                .count(),
            written
                .iter()
                .filter(|w| w.class == OutputClass::QueryOnly)
                .count(),
            fragmented
        );

        Ok(written)
    }
}

fn staging_dir(parent: &Path) -> io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix(".hitclust-staging-")
        .tempdir_in(parent)
}

/// Cluster files (`<ordinal>.fasta`) already present in `dir`
pub fn existing_partitions(dir: &Path) -> io::Result<HashSet<PathBuf>> {
    let mut paths = HashSet::new();
    if !dir.exists() {
        return Ok(paths);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_partition = path.extension().and_then(|e| e.to_str()) == Some(FASTA_EXTENSION)
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()));
        if is_partition && path.is_file() {
            paths.insert(path);
        }
    }
    Ok(paths)
}

/// Write the cluster manifest: name, id, class and member counts
pub fn write_manifest<P: AsRef<Path>>(path: P, clusters: &[WrittenCluster]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create cluster manifest {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "cluster_name\tcluster_id\tclass\tn_query\tn_reference")?;
    for c in clusters {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            c.cluster_name,
            c.cluster_id,
            c.class.as_str(),
            c.query_ids.len(),
            c.reference_count
        )?;
    }
    writer.flush()?;
    Ok(())
}
