/// Cluster membership join
///
/// Clustering assigns every query to one cluster. Each cluster also takes in
/// the references its queries hit, so that downstream distance clustering
/// sees queries and candidate references together.
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::error::PipelineError;
use crate::hits_table::HitLink;
use crate::paf::open_input;

/// One (cluster, query) assertion from the clustering step
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MembershipEntry {
    pub cluster_id: String,
    pub query_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberType {
    Query,
    Reference,
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberType::Query => write!(f, "Query"),
            MemberType::Reference => write!(f, "Reference"),
        }
    }
}

/// Field order gives the (cluster_id, member_type, member_id) sort
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterMember {
    pub cluster_id: String,
    pub member_type: MemberType,
    pub member_id: String,
}

/// All members of one cluster, in (member_type, member_id) order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub cluster_id: String,
    pub cluster_name: String,
    pub has_reference: bool,
    pub members: Vec<ClusterMember>,
}

impl Cluster {
    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| m.member_type == MemberType::Query)
            .map(|m| m.member_id.as_str())
    }

    pub fn reference_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.member_type == MemberType::Reference)
            .count()
    }
}

/// Read a two-column (cluster_id, query_id) membership table
pub fn read_membership<R: BufRead>(
    reader: R,
    path: &Path,
) -> std::result::Result<Vec<MembershipEntry>, PipelineError> {
    let mut entries = BTreeSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 2 {
            return Err(PipelineError::parse(
                path,
                idx + 1,
                format!("membership row has {} columns, expected 2", fields.len()),
            ));
        }
        let cluster_id = fields[0].trim();
        let query_id = fields[1].trim();
        if cluster_id.is_empty() || query_id.is_empty() {
            return Err(PipelineError::parse(path, idx + 1, "empty cluster or query id"));
        }
        entries.insert(MembershipEntry {
            cluster_id: cluster_id.to_string(),
            query_id: query_id.to_string(),
        });
    }

    Ok(entries.into_iter().collect())
}

pub fn read_membership_file<P: AsRef<Path>>(path: P) -> Result<Vec<MembershipEntry>> {
    let path = path.as_ref();
    let input = open_input(path)
        .with_context(|| format!("Failed to open cluster membership {}", path.display()))?;
    let entries = read_membership(input, path)?;
    log::info!(
        "Read {} membership entries from {}",
        entries.len(),
        path.display()
    );
    Ok(entries)
}

/// Join membership with hits into the distinct, sorted member list.
///
/// Every entry yields its query; every distinct target hit by that query
/// yields a reference member of the same cluster. Deduplication is per
/// (cluster, type, id), so a reference reached from two clusters is listed
/// under both.
pub fn build_members(entries: &[MembershipEntry], hits: &[HitLink]) -> Vec<ClusterMember> {
    let mut targets_by_query: HashMap<&str, Vec<&str>> = HashMap::new();
    for hit in hits {
        if let Some(target) = hit.target_id.as_deref() {
            targets_by_query
                .entry(hit.query_id.as_str())
                .or_default()
                .push(target);
        }
    }

    let mut members = BTreeSet::new();
    for entry in entries {
        members.insert(ClusterMember {
            cluster_id: entry.cluster_id.clone(),
            member_type: MemberType::Query,
            member_id: entry.query_id.clone(),
        });

        if let Some(targets) = targets_by_query.get(entry.query_id.as_str()) {
            for target in targets {
                members.insert(ClusterMember {
                    cluster_id: entry.cluster_id.clone(),
                    member_type: MemberType::Reference,
                    member_id: target.to_string(),
                });
            }
        }
    }

    members.into_iter().collect()
}

/// Group sorted members into clusters. `cluster_name` is left empty; names
/// are assigned once the full cluster set is known.
pub fn group_clusters(members: Vec<ClusterMember>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for member in members {
        match clusters.last_mut() {
            Some(cluster) if cluster.cluster_id == member.cluster_id => {
                cluster.has_reference |= member.member_type == MemberType::Reference;
                cluster.members.push(member);
            }
            _ => clusters.push(Cluster {
                cluster_id: member.cluster_id.clone(),
                cluster_name: String::new(),
                has_reference: member.member_type == MemberType::Reference,
                members: vec![member],
            }),
        }
    }

    clusters
}

/// Write the flat (cluster_id, member_type, member_id) table
pub fn write_members<W: Write>(writer: &mut W, members: &[ClusterMember]) -> std::io::Result<()> {
    for m in members {
        writeln!(writer, "{}\t{}\t{}", m.cluster_id, m.member_type, m.member_id)?;
    }
    Ok(())
}

pub fn write_members_file<P: AsRef<Path>>(path: P, members: &[ClusterMember]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create membership table {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_members(&mut writer, members)?;
    writer.flush()?;
    Ok(())
}
